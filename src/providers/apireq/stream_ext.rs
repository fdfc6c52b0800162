use super::SseJsonParser;
use bytes::Bytes;
use futures_core::Stream;
use std::pin::Pin;

/// The body of a response, as a boxed stream of byte chunks.
pub(crate) type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

pub(crate) trait ReqwestResponseStreamExt {
    /// Parse the body as a stream of server-sent events carrying JSON.
    fn stream_sse(self) -> SseJsonParser<ByteStream>;
}

impl ReqwestResponseStreamExt for reqwest::Response {
    fn stream_sse(self) -> SseJsonParser<ByteStream> {
        SseJsonParser::new(Box::pin(self.bytes_stream()))
    }
}
