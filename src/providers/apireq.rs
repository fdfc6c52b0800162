//! A utility module with helpers for making and parsing API requests.

mod error;
mod sse_parser;
mod stream_ext;

pub(crate) use error::Error as ReqwestError;
pub(crate) use reqwest::Url;

pub(crate) use sse_parser::Error as SseError;
pub(crate) use sse_parser::SseJsonParser;
pub(crate) use stream_ext::{ByteStream, ReqwestResponseStreamExt};
