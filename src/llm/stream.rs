//! Byte stream → [`Chunk`] stream decoding shared by the HTTP providers.

use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use tracing::warn;

use propsearch_core::chunk::{Chunk, ChunkFormat, ChunkParseError, FrameSplitter};

use super::provider::{ChunkStream, LlmError};

struct DecodeState<S> {
    body: Pin<Box<S>>,
    splitter: FrameSplitter,
    format: ChunkFormat,
    pending: VecDeque<Result<Chunk, LlmError>>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn decode(&mut self, frame: &[u8]) {
        if self.finished {
            return;
        }
        match self.format.parse_chunk(frame) {
            Ok(chunk) if chunk.is_keep_alive() => {}
            Ok(chunk) => {
                self.finished = chunk.is_final;
                self.pending.push_back(Ok(chunk));
            }
            Err(ChunkParseError::Provider(message)) => {
                self.finished = true;
                self.pending.push_back(Err(LlmError::Provider(message)));
            }
            Err(e) => {
                warn!(
                    format = self.format.name(),
                    error = %e,
                    frame = %String::from_utf8_lossy(&frame[..frame.len().min(200)]),
                    "Skipping malformed stream frame"
                );
            }
        }
    }
}

/// Decode a response body into chunks using `format`.
///
/// Network chunk boundaries may fall anywhere, including inside a UTF-8
/// sequence; frames are reassembled before decoding. Keep-alives are
/// dropped. The stream ends after the first final chunk, or with a
/// synthetic final chunk when the body ends without one.
pub fn decode_chunks<S, B, E>(body: S, format: ChunkFormat) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let state = DecodeState {
        body: Box::pin(body),
        splitter: FrameSplitter::new(),
        format,
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    for frame in st.splitter.push(bytes.as_ref()) {
                        st.decode(&frame);
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending
                        .push_back(Err(LlmError::Connection(e.to_string())));
                }
                None => {
                    if let Some(frame) = st.splitter.finish() {
                        st.decode(&frame);
                    }
                    if !st.finished {
                        st.finished = true;
                        st.pending.push_back(Ok(Chunk::final_marker()));
                    }
                }
            }
        }
    })
    .boxed()
}
