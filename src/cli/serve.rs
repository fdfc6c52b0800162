use std::sync::Arc;

use crate::{
    config::Config,
    die,
    prober::Prober,
    registry::populate::populated_registry,
    resolver::Resolver,
    server::{self, AppState},
    ServeArgs,
};

pub(crate) async fn serve_cmd(config: &Config, args: &ServeArgs) {
    let registry = match populated_registry(config).await {
        Ok(registry) => Arc::new(registry),
        Err(err) => die!("failed to build the directory: {}", err),
    };

    let prober = if config.prober.enabled {
        let prober = Arc::new(Prober::new(registry.clone(), config.prober.clone()));

        Some(prober.spawn())
    } else {
        tracing::info!("liveness probing is disabled, every eligible provider stays live");

        None
    };

    let state = AppState {
        resolver: Arc::new(Resolver::new(registry, &config.resolver)),
    };

    let bind = args.bind.as_deref().unwrap_or(&config.server.bind);

    if let Err(err) = server::serve(state, bind).await {
        die!("failed to serve on {}: {}", bind, err);
    }

    if let Some(prober) = prober {
        prober.abort();
    }
}
