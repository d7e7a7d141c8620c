//! Streamed turn responses: byte chunks in, session events out.

pub mod decoder;
pub mod event;

pub use decoder::FrameDecoder;
pub use event::{classify, classify_value, StreamEvent, WireFrame};

/// Decoder and classifier for one response body.
#[derive(Debug, Default)]
pub struct EventStream {
    decoder: FrameDecoder,
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events completed by `chunk`, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.decoder
            .push(chunk)
            .into_iter()
            .flat_map(classify_value)
            .collect()
    }

    /// End of body; returns the number of trailing bytes that never formed a frame.
    pub fn finish(self) -> usize {
        self.decoder.finish()
    }
}
