//! Playback building blocks: a bounded frame queue for decode/display
//! handoff and a pacer that holds a display loop to the stream's frame rate.

pub mod frame_queue;
pub mod frame_sync;

pub use frame_queue::FrameQueue;
pub use frame_sync::{FrameSync, SleepStats};
