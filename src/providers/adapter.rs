//! Response adapters for providers that return mangled text.

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use super::{AsyncMessageIterator, Error, MessageDelta};

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub(crate) enum Adapter {
    /// Pass replies through untouched.
    #[default]
    Identity,
    /// Replies are percent-encoded.
    UrlDecode,
}

impl Adapter {
    pub(crate) fn apply(self, text: String) -> String {
        match self {
            Adapter::Identity => text,
            Adapter::UrlDecode => percent_decode_str(&text).decode_utf8_lossy().into_owned(),
        }
    }

    pub(crate) fn wrap(self, inner: Box<dyn AsyncMessageIterator>) -> Box<dyn AsyncMessageIterator> {
        match self {
            Adapter::Identity => inner,
            Adapter::UrlDecode => Box::new(UrlDecodeStream {
                inner,
                raw_tail: String::new(),
                decoded: Vec::new(),
                finished: false,
            }),
        }
    }
}

/// Length of the trailing `%` or `%X` of `text` that needs the next fragment
/// to be decoded.
fn partial_escape_len(text: &str) -> usize {
    match text.as_bytes() {
        [.., b'%'] => 1,
        [.., b'%', x] if x.is_ascii_hexdigit() => 2,
        _ => 0,
    }
}

/// How many leading bytes of `bytes` can be turned into text without cutting
/// a multi-byte character short. Invalid sequences are let through, to be
/// replaced like the buffered path does.
fn complete_utf8_len(bytes: &[u8]) -> usize {
    let mut start = 0;

    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(_) => return bytes.len(),
            Err(e) => match e.error_len() {
                Some(len) => start += e.valid_up_to() + len,
                None => return start + e.valid_up_to(),
            },
        }
    }
}

/// Percent-decodes a stream. Escapes and characters split across fragments
/// are held back until the fragment completing them arrives.
struct UrlDecodeStream {
    inner: Box<dyn AsyncMessageIterator>,
    raw_tail: String,
    decoded: Vec<u8>,
    finished: bool,
}

impl UrlDecodeStream {
    fn take(&mut self, len: usize) -> String {
        let bytes: Vec<u8> = self.decoded.drain(..len).collect();

        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[async_trait]
impl AsyncMessageIterator for UrlDecodeStream {
    async fn next(&mut self) -> Option<Result<MessageDelta, Error>> {
        while !self.finished {
            let delta = match self.inner.next().await {
                Some(Ok(delta)) => delta,
                Some(Err(err)) => return Some(Err(err)),
                None => {
                    self.finished = true;
                    break;
                }
            };

            let mut raw = std::mem::take(&mut self.raw_tail);
            raw.push_str(&delta.content);

            let cut = raw.len() - partial_escape_len(&raw);
            self.raw_tail = raw.split_off(cut);
            self.decoded.extend(percent_decode_str(&raw));

            let ready = complete_utf8_len(&self.decoded);

            if ready > 0 {
                return Some(Ok(MessageDelta {
                    content: self.take(ready),
                }));
            }
        }

        // Whatever is left can no longer be completed
        let tail = std::mem::take(&mut self.raw_tail);
        self.decoded.extend(percent_decode_str(&tail));

        if self.decoded.is_empty() {
            return None;
        }

        let len = self.decoded.len();

        Some(Ok(MessageDelta {
            content: self.take(len),
        }))
    }
}
