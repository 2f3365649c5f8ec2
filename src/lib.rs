//! Music-to-light synchronization: offline audio analysis into a frame
//! table, and real-time replay of that table against audio playback.

pub mod audio;
pub mod error;
pub mod note;
pub mod output;
pub mod player;
pub mod sync;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use table::{Frame, FrameTable};
