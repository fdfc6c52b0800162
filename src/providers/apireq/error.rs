//! Wrapper around Reqwest's error type to facilitate exclusive matching, and the
//! conversions from request-level failures into provider errors.

use std::error::Error as StdError;
use std::fmt;

use super::SseError;
use crate::providers::{Error as ProviderError, ErrorKind as ProviderErrorKind};

#[derive(Debug, Clone, Copy)]
pub(crate) enum ErrorKind {
    ConnectFailed,
    DecodingFailed,
    RedirectPolicyViolated,
    TimedOut,
    UnknownReqwestError,
}

#[derive(Debug)]
pub(crate) struct Error {
    kind: ErrorKind,
    source: reqwest::Error,
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_decode() {
            ErrorKind::DecodingFailed
        } else if err.is_timeout() {
            ErrorKind::TimedOut
        } else if err.is_redirect() {
            ErrorKind::RedirectPolicyViolated
        } else if err.is_connect() {
            ErrorKind::ConnectFailed
        } else {
            ErrorKind::UnknownReqwestError
        };

        Error { kind, source: err }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::ConnectFailed => write!(f, "connection failed"),
            ErrorKind::DecodingFailed => write!(f, "decoding failed"),
            ErrorKind::RedirectPolicyViolated => write!(f, "redirect policy violated"),
            ErrorKind::TimedOut => write!(f, "timed out"),
            ErrorKind::UnknownReqwestError => write!(f, "unknown reqwest error"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.source)
    }
}

impl From<Error> for ProviderError {
    fn from(value: Error) -> Self {
        let kind = match value.kind {
            ErrorKind::ConnectFailed => ProviderErrorKind::Connection,
            ErrorKind::DecodingFailed | ErrorKind::RedirectPolicyViolated => {
                ProviderErrorKind::UnexpectedResponse
            }
            ErrorKind::TimedOut => ProviderErrorKind::TimedOut,
            ErrorKind::UnknownReqwestError => ProviderErrorKind::UnspecifiedError,
        };

        ProviderError::from_source(kind, Box::new(value))
    }
}

impl From<SseError> for ProviderError {
    fn from(value: SseError) -> Self {
        let kind = match &value {
            SseError::DeseralizationFailed(_)
            | SseError::UnsupportedSseFieldName
            | SseError::ResponseExceededBuffer => ProviderErrorKind::UnexpectedResponse,
            SseError::StreamFailed(_) => ProviderErrorKind::Connection,
        };

        ProviderError::from_source(kind, Box::new(value))
    }
}
