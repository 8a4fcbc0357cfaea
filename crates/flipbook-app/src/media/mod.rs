pub mod decoder;
pub mod types;
pub mod video;

pub use types::{DecodedFrame, FrameHandle, PlayDirection};
