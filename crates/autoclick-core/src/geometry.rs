//! Screen geometry: pixel points, normalized points and search regions

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Absolute pixel position on the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Position as a fraction of screen width/height, both in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    /// Clamps into [0, 1]; non-finite input is rejected
    pub fn new(x: f64, y: f64) -> Option<Self> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        Some(Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
        })
    }

    pub fn from_pixels(x: f64, y: f64, size: ScreenSize) -> Option<Self> {
        if size.width == 0 || size.height == 0 {
            return None;
        }
        Self::new(x / size.width as f64, y / size.height as f64)
    }

    /// Denormalize against `size`, staying on screen
    pub fn to_pixels(self, size: ScreenSize) -> Point {
        let max_x = size.width.saturating_sub(1) as f64;
        let max_y = size.height.saturating_sub(1) as f64;
        Point {
            x: (self.x * size.width as f64).round().clamp(0.0, max_x) as i32,
            y: (self.y * size.height as f64).round().clamp(0.0, max_y) as i32,
        }
    }
}

/// Rectangle in full-screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x as f64
            && y >= self.y as f64
            && x < self.x as f64 + self.width as f64
            && y < self.y as f64 + self.height as f64
    }

    /// Intersection with a `width` x `height` image; `None` when empty
    pub fn clip(&self, width: u32, height: u32) -> Option<Region> {
        let x0 = self.x.min(width);
        let y0 = self.y.min(height);
        let x1 = self.x.saturating_add(self.width).min(width);
        let y1 = self.y.saturating_add(self.height).min(height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Region::new(x0, y0, x1 - x0, y1 - y0))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for Region {
    type Err = Error;

    /// Parses `x,y,width,height`
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(Error::invalid_query(format!(
                "Region must be in format x,y,width,height, got '{}'",
                s
            )));
        }
        let mut nums = [0u32; 4];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| {
                Error::invalid_query(format!(
                    "Region component '{}' is not a non-negative integer",
                    part
                ))
            })?;
        }
        let [x, y, width, height] = nums;
        if width == 0 || height == 0 {
            return Err(Error::invalid_query("Region width and height must be positive"));
        }
        Ok(Region::new(x, y, width, height))
    }
}
