//! Target resolution - turn a screen capture plus a query into a click point
//!
//! Two variants share the [`TargetResolver`] contract:
//!
//! - [`DescriptionResolver`]: asks a vision model where a described element is
//! - [`TemplateResolver`]: normalized cross-correlation of a template image
//!
//! Results are always in normalized full-screen coordinates. Callers
//! denormalize against the screen size at click time.

pub mod template;
pub mod vision;

pub use template::TemplateResolver;
pub use vision::{DescriptionResolver, OpenAiVision, VisionError, VisionProvider};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::geometry::{NormalizedPoint, Region};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// What to look for
#[derive(Debug, Clone)]
pub enum Target {
    /// Natural-language description, e.g. "the blue submit button"
    Description(String),
    Template(RgbaImage),
}

#[derive(Debug, Clone)]
pub struct TargetQuery {
    pub target: Target,
    /// Restrict the search to this rectangle of the capture
    pub region: Option<Region>,
}

impl TargetQuery {
    pub fn description(text: impl Into<String>) -> Self {
        Self {
            target: Target::Description(text.into()),
            region: None,
        }
    }

    pub fn template(image: RgbaImage) -> Self {
        Self {
            target: Target::Template(image),
            region: None,
        }
    }

    pub fn in_region(mut self, region: Option<Region>) -> Self {
        self.region = region;
        self
    }

    /// Short human-readable label for logs and errors
    pub fn label(&self) -> String {
        match &self.target {
            Target::Description(text) => format!("\"{}\"", text),
            Target::Template(img) => format!("template {}x{}", img.width(), img.height()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<NormalizedPoint>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ResolutionResult {
    pub fn found(point: NormalizedPoint, confidence: f64, description: Option<String>) -> Self {
        Self {
            found: true,
            point: Some(point),
            confidence: clamp_unit(confidence),
            description,
        }
    }

    pub fn not_found(confidence: f64, description: Option<String>) -> Self {
        Self {
            found: false,
            point: None,
            confidence: clamp_unit(confidence),
            description,
        }
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub trait TargetResolver {
    fn resolve(&self, capture: &RgbaImage, query: &TargetQuery) -> Result<ResolutionResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    Description,
    Template,
}

/// Resolver selected by configuration
pub enum Resolver {
    Description(DescriptionResolver),
    Template(TemplateResolver),
}

impl Resolver {
    pub fn from_settings(kind: ResolverKind, settings: &Settings) -> Result<Self> {
        Ok(match kind {
            ResolverKind::Description => {
                let provider = OpenAiVision::from_settings(&settings.vision)
                    .map_err(|e| Error::resolution_failed(e.to_string()))?;
                Resolver::Description(
                    DescriptionResolver::new(Box::new(provider))
                        .min_confidence(settings.vision.min_confidence),
                )
            }
            ResolverKind::Template => Resolver::Template(
                TemplateResolver::new()
                    .threshold(settings.template.threshold)
                    .step(settings.template.step),
            ),
        })
    }

    pub fn kind(&self) -> ResolverKind {
        match self {
            Resolver::Description(_) => ResolverKind::Description,
            Resolver::Template(_) => ResolverKind::Template,
        }
    }
}

impl TargetResolver for Resolver {
    fn resolve(&self, capture: &RgbaImage, query: &TargetQuery) -> Result<ResolutionResult> {
        match self {
            Resolver::Description(r) => r.resolve(capture, query),
            Resolver::Template(r) => r.resolve(capture, query),
        }
    }
}

/// The part of `capture` to search: the clipped region, or everything
pub(crate) fn search_area(capture: &RgbaImage, region: Option<Region>) -> Result<Region> {
    let (w, h) = capture.dimensions();
    match region {
        None => Ok(Region::full(w, h)),
        Some(r) => r.clip(w, h).ok_or_else(|| {
            Error::invalid_query(format!("Region {} lies outside the {}x{} capture", r, w, h))
        }),
    }
}
