//! Async adapter pulling chunks from a byte stream into a [`RecordDecoder`].

use std::fmt::Display;

use futures::{Stream, StreamExt};

use super::incremental::RecordDecoder;
use super::types::{DecodeError, DecodedElement};

/// Lazily decodes elements from a stream of byte chunks.
///
/// Chunks are pulled only when the decoder has no complete element left,
/// so the producer is never read ahead of the consumer.
pub struct RecordStream<S> {
    inner: S,
    decoder: RecordDecoder,
    done: bool,
}

impl<S, B, E> RecordStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    pub fn new(inner: S, decoder: RecordDecoder) -> Self {
        Self {
            inner,
            decoder,
            done: false,
        }
    }

    /// Next decoded element, or `None` once the stream is exhausted.
    ///
    /// After a terminal error (`DecodeError::is_terminal`) this returns `None`.
    pub async fn next(&mut self) -> Option<Result<DecodedElement, DecodeError>> {
        if self.done {
            return None;
        }

        loop {
            if let Some(item) = self.decoder.next() {
                if matches!(&item, Err(e) if e.is_terminal()) {
                    self.done = true;
                }
                return Some(item);
            }

            if self.decoder.is_finished() {
                self.done = true;
                return None;
            }

            match self.inner.next().await {
                Some(Ok(chunk)) => self.decoder.push(chunk.as_ref()),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(DecodeError::Io(e.to_string())));
                }
                None => self.decoder.finish(),
            }
        }
    }

    /// Decoder state, for position and memory inspection.
    pub fn decoder(&self) -> &RecordDecoder {
        &self.decoder
    }

    /// Converts into a `futures::Stream` of decoded elements.
    pub fn into_stream(self) -> impl Stream<Item = Result<DecodedElement, DecodeError>> {
        futures::stream::unfold(self, |mut records| async move {
            records.next().await.map(|item| (item, records))
        })
    }
}
