//! Frame loading and playback engine for flipbook-style pseudo-video.
//!
//! A [`session::Session`] turns a [`source::FrameSource`] into decoded frames with one of the
//! [`fetch`] strategies, freezes them into a gapless [`buffer::FrameBuffer`], and hands back a
//! [`playback::PlaybackController`] that scrubs, steps and loops over it.

pub mod buffer;
pub mod extract;
pub mod fetch;
pub mod media;
pub mod playback;
pub mod progress;
pub mod session;
pub mod settings;
pub mod source;
