//! This module parses server-sent events carrying JSON objects from an HTTP response.
//! It expects a byte stream, as produced by the [`reqwest::Response::bytes_stream`]
//! method, which is incrementally parsed event by event.

use bytes::Bytes;
use core::fmt;
use futures_core::stream::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use std::error::Error as StdError;
use std::marker::Unpin;

use super::ReqwestError;

trait RemoveFirstN {
    fn remove_first(&mut self, n: usize);
}

impl<T: std::marker::Copy> RemoveFirstN for Vec<T> {
    fn remove_first(&mut self, n: usize) {
        self.copy_within(n.., 0);
        self.truncate(self.len() - n);
    }
}

#[derive(Debug)]
pub(crate) struct DeseralizationFailedError {
    blob: String,
    error: serde_json::error::Error,
}

// The parser only understands the subset of server-sent events that
// completion APIs use: "data" carries the payload, "event", "id" and
// "retry" are accepted and dropped. Anything else is rejected.
#[derive(Debug)]
pub(crate) enum Error {
    UnsupportedSseFieldName,
    ResponseExceededBuffer,
    DeseralizationFailed(DeseralizationFailedError),
    StreamFailed(ReqwestError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedSseFieldName =>
                write!(f, "the SSE parser only supports the \"data\", \"event\", \"id\" and \"retry\" fields, an unsupported field name was received"),
            Self::ResponseExceededBuffer =>
                write!(f, "the response overflowed the streaming buffer, this could indicate a malicious server"),
            Self::DeseralizationFailed(e) => write!(f, "failed to deseralized a streamed JSON object \"{}\": {}", e.blob, e.error),
            Self::StreamFailed(e) => write!(f, "the source stream failed: {}", e),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::StreamFailed(e) => Some(e),
            Self::DeseralizationFailed(e) => Some(&e.error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct SseJsonParser<S>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    stream: S,
    buf: Vec<u8>,
    max_size: usize,
    i: usize,
    data: Vec<u8>,
    exhausted: bool,
}

impl<S: Stream<Item = reqwest::Result<Bytes>> + Unpin> SseJsonParser<S> {
    pub(crate) fn new(stream: S) -> SseJsonParser<S> {
        Self::with_max_size_and_capacity(
            stream,
            1 << 24, // 16 MiB
            1 << 10, // 1 KiB
        )
    }

    pub(crate) fn with_max_size_and_capacity(
        stream: S,
        max_size: usize,
        init_capacity: usize,
    ) -> SseJsonParser<S> {
        SseJsonParser {
            stream,
            buf: Vec::with_capacity(init_capacity),
            max_size,
            i: 0,
            data: Vec::<u8>::new(),
            exhausted: false,
        }
    }

    async fn refill_buffer(&mut self) -> Result<bool, Error> {
        match self.stream.next().await {
            Some(Ok(b)) => {
                if b.len() + self.buf.len() > self.max_size {
                    return Err(Error::ResponseExceededBuffer);
                }

                self.buf.extend(b);

                Ok(true)
            }
            Some(Err(err)) => Err(Error::StreamFailed(err.into())),
            None => Ok(false),
        }
    }

    // Advance the cursor to the next newline. Returns false when
    // more data is needed.
    fn advance_to_line(&mut self) -> bool {
        let i = &mut self.i;

        while *i < self.buf.len() && self.buf[*i] != b'\n' {
            *i += 1;
        }

        *i != self.buf.len()
    }

    // Get line without the trailing [\r]\n
    fn striped_line(i: usize, buf: &[u8]) -> &[u8] {
        if i == 0 {
            &buf[..0]
        } else if buf[i - 1] == b'\r' {
            &buf[..i - 1]
        } else {
            &buf[..i]
        }
    }

    fn extract_event_data(&mut self) -> Result<bool, Error> {
        loop {
            if !self.advance_to_line() {
                return Ok(false);
            }

            let line_content = Self::striped_line(self.i, &self.buf);

            let end_of_event = if line_content.is_empty() {
                // An event made only of comments carries no data
                Ok(!self.data.is_empty())
            } else {
                let mut split = line_content.splitn(2, |x| *x == b':');

                let field_name = split.next().unwrap_or_default();
                let value = split.next().unwrap_or_default();

                match field_name {
                    // Comment
                    b"" => Ok(false),
                    b"data" => {
                        let value = value.strip_prefix(b" ").unwrap_or(value);

                        if value != b"[DONE]" {
                            self.data.extend_from_slice(value);
                            self.data.push(b'\n');
                        }

                        Ok(false)
                    }
                    b"event" | b"id" | b"retry" => Ok(false),
                    _ => Err(Error::UnsupportedSseFieldName),
                }
            };

            self.buf.remove_first(self.i + 1);
            self.i = 0;

            if !end_of_event? {
                continue;
            }

            // remove trailing \n
            self.data.pop();

            return Ok(true);
        }
    }

    // An event cut off by the end of the stream is still delivered
    fn flush_trailing_event(&mut self) -> bool {
        let rest = std::mem::take(&mut self.buf);
        self.i = 0;

        let line = Self::striped_line(rest.len(), &rest);

        if let Some(value) = line.strip_prefix(b"data:") {
            let value = value.strip_prefix(b" ").unwrap_or(value);

            if value != b"[DONE]" {
                self.data.extend_from_slice(value);
                self.data.push(b'\n');
            }
        }

        if self.data.is_empty() {
            return false;
        }

        self.data.pop();

        true
    }

    async fn parse_chunk(&mut self) -> Option<Result<&[u8], Error>> {
        self.data.clear();

        loop {
            match self.extract_event_data() {
                Ok(true) => return Some(Ok(&self.data)),
                Ok(false) => {}
                Err(err) => return Some(Err(err)),
            }

            if self.exhausted {
                return None;
            }

            match self.refill_buffer().await {
                Ok(true) => continue,
                Ok(false) => {
                    self.exhausted = true;

                    if self.flush_trailing_event() {
                        return Some(Ok(&self.data));
                    }

                    return None;
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }

    pub(crate) async fn parse<'de, T: Deserialize<'de>>(&'de mut self) -> Option<Result<T, Error>> {
        let c = self.parse_chunk().await;

        c.map(|r| match r {
            Ok(bytes) => serde_json::from_slice::<T>(bytes).map_err(|e| {
                Error::DeseralizationFailed(DeseralizationFailedError {
                    blob: String::from_utf8_lossy(bytes).into_owned(),
                    error: e,
                })
            }),
            Err(err) => Err(err),
        })
    }
}
