//! Failsafe: parking the pointer in the reserved screen corner aborts automation
//!
//! The configuration is process-wide and set once at startup with [`init`].
//! Checking it is a pure read of the current pointer position.

use crate::error::{Error, Result};
use crate::geometry::{Point, ScreenSize};
use crate::input::Mouse;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

static FAILSAFE: OnceLock<FailSafe> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Corner {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailSafe {
    pub enabled: bool,
    pub corner: Corner,
    /// Pixels from the corner that still count as parked
    pub margin: u32,
}

impl Default for FailSafe {
    fn default() -> Self {
        Self {
            enabled: true,
            corner: Corner::TopLeft,
            margin: 0,
        }
    }
}

impl FailSafe {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn is_tripped(&self, pos: Point, size: ScreenSize) -> bool {
        if !self.enabled {
            return false;
        }
        let m = self.margin as i64;
        let (x, y) = (pos.x as i64, pos.y as i64);
        let right = size.width as i64 - 1;
        let bottom = size.height as i64 - 1;
        let near_left = x <= m;
        let near_top = y <= m;
        let near_right = x >= right - m;
        let near_bottom = y >= bottom - m;
        match self.corner {
            Corner::TopLeft => near_left && near_top,
            Corner::TopRight => near_right && near_top,
            Corner::BottomLeft => near_left && near_bottom,
            Corner::BottomRight => near_right && near_bottom,
        }
    }

    /// Fails with `ABORTED_BY_USER` if the pointer is parked in the corner
    pub fn check<M: Mouse + ?Sized>(&self, mouse: &M) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let pos = mouse.position()?;
        let size = match self.corner {
            // top-left never needs the screen size
            Corner::TopLeft => ScreenSize::new(u32::MAX, u32::MAX),
            _ => mouse.screen_size()?,
        };
        if self.is_tripped(pos, size) {
            tracing::warn!(x = pos.x, y = pos.y, corner = ?self.corner, "failsafe triggered");
            return Err(Error::aborted(format!(
                "pointer parked in the {:?} corner at {}",
                self.corner, pos
            ))
            .with_suggestions(vec!["Move the pointer away from the corner and retry".to_string()]));
        }
        Ok(())
    }
}

/// Install the process-wide failsafe. Returns false if one was already set.
pub fn init(failsafe: FailSafe) -> bool {
    FAILSAFE.set(failsafe).is_ok()
}

/// The installed failsafe, or the default (enabled, top-left) before [`init`]
pub fn current() -> FailSafe {
    FAILSAFE.get().copied().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: ScreenSize = ScreenSize::new(1920, 1080);

    #[test]
    fn top_left_exact() {
        let fs = FailSafe::default();
        assert!(fs.is_tripped(Point::new(0, 0), SCREEN));
        assert!(!fs.is_tripped(Point::new(1, 0), SCREEN));
    }

    #[test]
    fn margin_and_other_corners() {
        let fs = FailSafe {
            enabled: true,
            corner: Corner::BottomRight,
            margin: 3,
        };
        assert!(fs.is_tripped(Point::new(1917, 1079), SCREEN));
        assert!(!fs.is_tripped(Point::new(1900, 1079), SCREEN));
        assert!(!fs.is_tripped(Point::new(0, 0), SCREEN));
    }

    #[test]
    fn disabled_never_trips() {
        assert!(!FailSafe::disabled().is_tripped(Point::new(0, 0), SCREEN));
    }

    #[test]
    fn corner_parses_kebab() {
        let c: Corner = serde_json::from_str("\"bottom-left\"").unwrap();
        assert_eq!(c, Corner::BottomLeft);
    }
}
