//! Incremental text input.
//!
//! Stdin arrives in arbitrary byte chunks that may split a multi-byte
//! character. [`Utf8Fragments`] holds back an incomplete trailing sequence
//! until the next chunk completes it.

use futures_util::{Stream, stream};
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 256;

/// Incremental UTF-8 decoder.
#[derive(Debug, Default)]
pub struct Utf8Fragments {
    pending: Vec<u8>,
}

impl Utf8Fragments {
    /// Decode as much of `bytes` (plus any held-back prefix) as possible.
    ///
    /// Invalid sequences become U+FFFD.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is held back at end of input.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Stream text fragments from `reader` as they arrive.
///
/// Read errors end the stream.
pub fn read_fragments<R>(reader: R) -> impl Stream<Item = String>
where
    R: AsyncRead + Unpin,
{
    stream::unfold(
        Some((reader, Utf8Fragments::default())),
        |state| async move {
            let (mut reader, mut decoder) = state?;
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        let rest = decoder.finish();
                        return (!rest.is_empty()).then_some((rest, None));
                    }
                    Ok(n) => {
                        let text = decoder.push(&buf[..n]);
                        if !text.is_empty() {
                            return Some((text, Some((reader, decoder))));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read input");
                        return None;
                    }
                }
            }
        },
    )
}

/// Split literal text into word-sized fragments, as a model would stream it.
pub fn word_fragments(text: &str) -> stream::Iter<std::vec::IntoIter<String>> {
    let fragments: Vec<String> = text.split_inclusive(' ').map(String::from).collect();
    stream::iter(fragments)
}
