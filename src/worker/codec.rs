//! NDJSON line codec for worker output.
//!
//! Frames raw bytes on `\n` with a maximum line length so a runaway worker
//! cannot make the relay allocate without bound. The cap is far above typical
//! line sizes: a single tool result embedding a large file easily exceeds a
//! megabyte and must arrive untruncated.
//!
//! The decoder never fails on content. Over-long lines are dropped up to the
//! next newline and invalid UTF-8 is replaced, so one bad line cannot end the
//! stream.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::{AppError, Result};

/// Maximum line length accepted from a worker: 16 MiB.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Newline-delimited codec for worker stdout.
///
/// Yields each line without its `\n` (and a trailing `\r`), decoded lossily.
#[derive(Debug)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes of `src` already scanned without finding a newline.
    next_index: usize,
    /// Inside an over-long line; drop input until the next newline.
    discarding: bool,
}

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self {
            max_length: max,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match (self.discarding, newline) {
                (true, Some(end)) => {
                    src.advance(end + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(src.len());
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(end)) if end > self.max_length => {
                    warn!(bytes = end, limit = self.max_length, "dropping over-long worker line");
                    src.advance(end + 1);
                    self.next_index = 0;
                }
                (false, Some(end)) => {
                    let line = src.split_to(end + 1);
                    self.next_index = 0;
                    return Ok(Some(to_line(&line[..end])));
                }
                (false, None) if src.len() > self.max_length => {
                    warn!(limit = self.max_length, "dropping over-long worker line");
                    src.advance(src.len());
                    self.discarding = true;
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, None) => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            src.clear();
            return Ok(None);
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split_to(src.len());
        Ok(Some(to_line(&rest)))
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
