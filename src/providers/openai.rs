//! An umbrella module for OpenAI-compatible providers

mod api;
mod provider;

pub(crate) use self::provider::OpenAIProvider;
