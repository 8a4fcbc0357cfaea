use std::sync::Arc;

/// A decoded frame held in memory for playback.
#[derive(Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    pub data: Vec<u8>, // RGBA8
    pub width: u32,
    pub height: u32,
}

impl DecodedFrame {
    /// Size of the pixel data in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Shared handle to a decoded frame. Backfilled slots point at the same pixels.
pub type FrameHandle = Arc<DecodedFrame>;

/// Playback direction through the frame ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayDirection {
    Forward,
    Backward,
}

impl PlayDirection {
    /// Signed step for one frame in this direction.
    pub fn delta(self) -> i64 {
        match self {
            PlayDirection::Forward => 1,
            PlayDirection::Backward => -1,
        }
    }
}
