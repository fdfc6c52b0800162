//! The registry handles provider and model resolution. It is populated once
//! from the configuration with the known providers and models, and answers two
//! questions: which models does a provider serve, and which providers serve a
//! model.
//!
//! Those answers live in a [`Directory`], built from a [`Catalog`] of
//! declarative descriptors. A model names the provider it originates from and
//! the provider(s) best suited to serve it, either a single provider or an
//! ordered retry-group. Providers may additionally declare models themselves,
//! through a model list, a default model or the legacy `supports_gpt_4` and
//! `supports_gpt_35_turbo` flags, or enumerate them through their API.
//!
//! Each provider is assigned a "priority", an eight bit unsigned number where 0
//! is the lowest priority (a provider of last resort) and 255 the highest. When
//! looking for any provider serving a model, higher priority providers are
//! scanned first, ties are broken by name.
//!
//! Two directories are kept. The baseline holds every eligible provider and is
//! used to tell a model that does not exist apart from one nobody can serve at
//! the moment. The live directory only holds providers that answered the last
//! liveness probe and is replaced atomically by the prober.

pub(crate) mod descriptor;
pub(crate) mod directory;
pub(crate) mod populate;
#[allow(clippy::module_inception)]
pub(crate) mod registry;

pub(crate) use descriptor::Catalog;
pub(crate) use directory::{CandidatePair, Directory};
pub(crate) use registry::Registry;

use crate::providers;
use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum Error {
    /// The provider's API base cannot be used
    #[error("provider \"{0}\" could not be set up: {1}")]
    InvalidProvider(String, #[source] providers::Error),
    /// The variable holding the API key is not unicode
    #[error("failed to read the API key of provider \"{0}\" from {1}")]
    ApiKey(String, String),
    /// Failed to list the models of a provider
    #[error("failed to obtain models from provider \"{0}\": {1}")]
    ModelListingFailed(String, #[source] providers::Error),
    /// Listing the models of a provider took too long
    #[error("timed out obtaining models from provider \"{0}\"")]
    ModelListingTimedOut(String),
}
