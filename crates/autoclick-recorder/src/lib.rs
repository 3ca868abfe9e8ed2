//! autoclick-recorder - Mouse recording and timed replay
//!
//! Record pointer moves, clicks and scrolls with their timing, store them
//! as JSON, and play them back at any speed.
//!
//! Input is captured through the system-wide rdev listener; only one
//! recorder can listen at a time.

pub mod events;
pub mod hook;
pub mod recorder;
pub mod replay;
pub mod routine;
pub mod storage;
pub mod task;

#[cfg(test)]
mod testing;

pub use events::{Event, EventKind, EventLog, LogSummary};
pub use hook::{InputHook, RdevHook};
pub use recorder::{Recorder, RecorderConfig};
pub use replay::{ReplayStats, Replayer};
pub use routine::{ImageClickRoutine, OnFound, Repeat};
pub use storage::RecordingStorage;
pub use task::{TaskHandle, TaskMessage};

pub mod prelude {
    pub use crate::events::{Event, EventKind, EventLog};
    pub use crate::recorder::{Recorder, RecorderConfig};
    pub use crate::replay::{ReplayStats, Replayer};
    pub use crate::routine::{ImageClickRoutine, OnFound, Repeat};
    pub use crate::storage::RecordingStorage;
}
