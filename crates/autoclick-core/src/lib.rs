//! autoclick-core - Locate things on screen and click them
//!
//! Deterministic primitives with structured JSON errors:
//!
//! - **Targets**: find a point by vision-model description or by image template
//! - **Input**: synthetic pointer actions guarded by a corner failsafe
//! - **Capture**: full-screen or region screenshots
//!
//! Backends sit behind the [`Mouse`], [`ScreenCapture`] and
//! [`resolver::VisionProvider`] traits so callers can substitute their own.

pub mod clicker;
pub mod config;
pub mod error;
pub mod failsafe;
pub mod geometry;
pub mod input;
pub mod resolver;
pub mod screen;
pub mod stop;

pub use clicker::{Clicker, TargetClick};
pub use config::Settings;
pub use error::{Error, ErrorCode, Result};
pub use failsafe::{Corner, FailSafe};
pub use geometry::{NormalizedPoint, Point, Region, ScreenSize};
pub use input::{EnigoMouse, Mouse, MouseButton};
pub use resolver::{
    DescriptionResolver, ResolutionResult, Resolver, ResolverKind, Target, TargetQuery,
    TargetResolver, TemplateResolver,
};
pub use screen::{ScreenCapture, XcapScreen};
pub use stop::StopSignal;

pub mod prelude {
    pub use crate::clicker::{Clicker, TargetClick};
    pub use crate::config::Settings;
    pub use crate::error::{Error, ErrorCode, Result};
    pub use crate::failsafe::FailSafe;
    pub use crate::geometry::{Point, Region};
    pub use crate::input::{EnigoMouse, Mouse, MouseButton};
    pub use crate::resolver::{Resolver, ResolverKind, TargetQuery, TargetResolver};
    pub use crate::screen::{ScreenCapture, XcapScreen};
    pub use crate::stop::StopSignal;
}
