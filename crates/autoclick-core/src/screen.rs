//! Screen capture

use crate::error::{Error, Result};
use crate::geometry::Region;
use image::{imageops, RgbaImage};
use std::path::Path;
use xcap::Monitor;

/// Synchronous raster capture of the screen
pub trait ScreenCapture {
    fn capture(&self) -> Result<RgbaImage>;

    /// Capture only `region`, clipped to the screen
    fn capture_region(&self, region: Region) -> Result<RgbaImage> {
        let full = self.capture()?;
        let area = region.clip(full.width(), full.height()).ok_or_else(|| {
            Error::invalid_query(format!(
                "Region {} lies outside the {}x{} screen",
                region,
                full.width(),
                full.height()
            ))
        })?;
        Ok(imageops::crop_imm(&full, area.x, area.y, area.width, area.height).to_image())
    }
}

/// Captures the primary monitor via xcap
#[derive(Debug, Default, Clone, Copy)]
pub struct XcapScreen;

impl XcapScreen {
    pub fn new() -> Self {
        Self
    }

    fn primary() -> Result<Monitor> {
        let monitors = Monitor::all().map_err(|e| Error::capture_failed(e.to_string()))?;
        let mut fallback = None;
        for monitor in monitors {
            if monitor.is_primary().unwrap_or(false) {
                return Ok(monitor);
            }
            fallback.get_or_insert(monitor);
        }
        fallback.ok_or_else(|| Error::capture_failed("no monitors found"))
    }
}

impl ScreenCapture for XcapScreen {
    fn capture(&self) -> Result<RgbaImage> {
        let monitor = Self::primary()?;
        let image = monitor
            .capture_image()
            .map_err(|e| Error::capture_failed(e.to_string()))?;
        tracing::debug!(width = image.width(), height = image.height(), "captured screen");
        Ok(image)
    }
}

/// Save a capture as PNG
pub fn save_png(image: &RgbaImage, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| Error::new(crate::ErrorCode::Io, format!("Saving {}: {}", path.display(), e)))
}
