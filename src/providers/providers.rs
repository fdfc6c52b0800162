//! Concrete provider types, along with the kinds used to select them in the configuration

use serde::{Deserialize, Serialize};

/// The wire protocol a configured provider speaks.
///
/// The `to_string` and serialized names are part of the configuration format and
/// should remain stable.
#[derive(
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub(crate) enum ProviderKind {
    /// An OpenAI-compatible `/v1/chat/completions` endpoint.
    #[default]
    OpenAI,
}

pub(crate) use super::openai::OpenAIProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert_eq!(ProviderKind::OpenAI.to_string(), "openai");
        assert!("ollama".parse::<ProviderKind>().is_err());
    }
}
