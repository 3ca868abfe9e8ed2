//! # autoclick
//!
//! Mouse recording, timed replay, and clicking on things you can describe
//! or show.
//!
//! ## Features
//!
//! - **Recording**: capture pointer moves, clicks and scrolls with timing
//! - **Replay**: play recordings back at any speed
//! - **Targeting**: find a point by vision-model description or image template
//! - **Failsafe**: park the pointer in a screen corner to abort
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use autoclick::prelude::*;
//!
//! // Click on a described element
//! let settings = Settings::load(None)?;
//! let resolver = Resolver::from_settings(ResolverKind::Description, &settings)?;
//! let mut clicker = Clicker::new(EnigoMouse::new()?, XcapScreen::new());
//! clicker.click_on_target(&resolver, &TargetQuery::description("the Save button"))?;
//!
//! // Replay a recording at double speed
//! let log = RecordingStorage::load_file("recording.json".as_ref())?;
//! Replayer::new().speed(2.0).play(&log, clicker.mouse_mut())?;
//! # Ok::<(), autoclick::Error>(())
//! ```

// Re-export core targeting and input
pub use autoclick_core::*;

// Re-export recorder module
pub use autoclick_recorder as recorder;

pub use autoclick_recorder::{
    Event, EventKind, EventLog, ImageClickRoutine, OnFound, Recorder, RecorderConfig,
    RecordingStorage, Repeat, ReplayStats, Replayer,
};

/// Prelude - import everything you need
pub mod prelude {
    pub use autoclick_core::prelude::*;
    pub use autoclick_recorder::prelude::*;
}
