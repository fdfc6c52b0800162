use std::sync::Arc;

use super::list::{format_output, table::Table};
use crate::{
    config::Config,
    die, error,
    prober::{ProbeResult, ProbeStatus, Prober},
    registry::populate::populated_registry,
    ProbeArgs,
};

fn detail_cell(status: &ProbeStatus) -> String {
    match status {
        ProbeStatus::Failed(reason) => reason.clone(),
        _ => "-".to_string(),
    }
}

impl From<Vec<ProbeResult>> for Table {
    fn from(value: Vec<ProbeResult>) -> Self {
        let mut tab = Table::new();

        tab.set_header(vec!["PROVIDER", "MODEL", "STATUS", "DETAIL"]);

        for result in value {
            tab.add_row(vec![
                result.provider,
                result.model,
                result.status.to_string(),
                detail_cell(&result.status),
            ]);
        }

        tab
    }
}

pub(crate) async fn probe_cmd(config: &Config, args: &ProbeArgs) {
    let registry = match populated_registry(config).await {
        Ok(registry) => Arc::new(registry),
        Err(err) => die!("failed to build the directory: {}", err),
    };

    let prober = Prober::new(registry, config.prober.clone());

    match prober.refresh().await {
        Some(refresh) => {
            tracing::info!(
                "{} models are servable by live providers",
                refresh.live.models().len()
            );

            format_output(refresh.results, args.format);
        }
        None => error!("a liveness refresh is already running"),
    }
}
