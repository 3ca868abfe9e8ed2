//! Mouse input simulation
//!
//! Everything that moves the real pointer goes through the [`Mouse`] trait so
//! replay and targeting code can run against a fake in tests.

use crate::error::{Error, Result};
use crate::geometry::{Point, ScreenSize};
use enigo::{Axis, Coordinate, Direction, Enigo, Mouse as _, Settings};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MouseButton {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "left" | "primary" => Ok(MouseButton::Left),
            "right" | "secondary" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            other => Err(Error::invalid_query(format!(
                "Unknown mouse button '{}'. Use left, right or middle",
                other
            ))),
        }
    }
}

/// Synthetic pointer control.
///
/// Scroll deltas use the recording convention: positive `dy` scrolls up,
/// positive `dx` scrolls right.
pub trait Mouse {
    fn position(&self) -> Result<Point>;
    fn screen_size(&self) -> Result<ScreenSize>;
    fn move_to(&mut self, point: Point) -> Result<()>;
    /// Press and release `button` at the current position
    fn click(&mut self, button: MouseButton) -> Result<()>;
    fn scroll(&mut self, dx: i32, dy: i32) -> Result<()>;
}

/// [`Mouse`] backed by enigo
pub struct EnigoMouse {
    enigo: Enigo,
}

impl EnigoMouse {
    pub fn new() -> Result<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| Error::input_failed("Connecting to input backend", format!("{:?}", e)))?;
        Ok(Self { enigo })
    }
}

impl Mouse for EnigoMouse {
    fn position(&self) -> Result<Point> {
        let (x, y) = self
            .enigo
            .location()
            .map_err(|e| Error::input_failed("Reading pointer position", format!("{:?}", e)))?;
        Ok(Point::new(x, y))
    }

    fn screen_size(&self) -> Result<ScreenSize> {
        let (w, h) = self
            .enigo
            .main_display()
            .map_err(|e| Error::input_failed("Reading display size", format!("{:?}", e)))?;
        Ok(ScreenSize::new(w.max(0) as u32, h.max(0) as u32))
    }

    fn move_to(&mut self, point: Point) -> Result<()> {
        self.enigo
            .move_mouse(point.x, point.y, Coordinate::Abs)
            .map_err(|e| Error::input_failed("Move", format!("{:?}", e)))
    }

    fn click(&mut self, button: MouseButton) -> Result<()> {
        let button = match button {
            MouseButton::Left => enigo::Button::Left,
            MouseButton::Right => enigo::Button::Right,
            MouseButton::Middle => enigo::Button::Middle,
        };
        self.enigo
            .button(button, Direction::Click)
            .map_err(|e| Error::input_failed("Click", format!("{:?}", e)))
    }

    fn scroll(&mut self, dx: i32, dy: i32) -> Result<()> {
        // enigo scrolls down for positive vertical lengths
        if dy != 0 {
            self.enigo
                .scroll(-dy, Axis::Vertical)
                .map_err(|e| Error::input_failed("Scroll", format!("{:?}", e)))?;
        }
        if dx != 0 {
            self.enigo
                .scroll(dx, Axis::Horizontal)
                .map_err(|e| Error::input_failed("Scroll", format!("{:?}", e)))?;
        }
        Ok(())
    }
}
