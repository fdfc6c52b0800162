use arc_swap::ArcSwap;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{Catalog, Directory};
use crate::providers::ProviderPool;

/// The providers, the catalog they are described by, and the directories
/// built from it. Only the live directory changes after construction.
pub(crate) struct Registry {
    catalog: Catalog,
    pool: ProviderPool,
    baseline: Directory,
    live: ArcSwap<Directory>,
}

impl Registry {
    /// Until the first probe completes every eligible provider is assumed live.
    pub(crate) fn new(catalog: Catalog, pool: ProviderPool) -> Registry {
        let baseline = Directory::build(&catalog, &catalog.eligible());
        let live = ArcSwap::from_pointee(baseline.clone());

        Registry {
            catalog,
            pool,
            baseline,
            live,
        }
    }

    pub(crate) fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn pool(&self) -> &ProviderPool {
        &self.pool
    }

    pub(crate) fn baseline(&self) -> &Directory {
        &self.baseline
    }

    /// A snapshot of the live directory. It stays valid, and unchanged, for
    /// as long as the caller holds it.
    pub(crate) fn live(&self) -> Arc<Directory> {
        self.live.load_full()
    }

    /// Rebuild the live directory from the providers in `live` and swap it in.
    pub(crate) fn replace_live(&self, live: &BTreeSet<String>) -> Arc<Directory> {
        let directory = Arc::new(Directory::build(&self.catalog, live));

        self.live.store(directory.clone());

        directory
    }
}
