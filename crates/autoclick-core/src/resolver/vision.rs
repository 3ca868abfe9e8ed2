//! Description-based resolution through a vision model
//!
//! The provider only moves bytes: it sends the capture and a prompt, and
//! hands back the model's text. Turning that text into a point (or
//! refusing to) happens in [`DescriptionResolver`].

use super::{search_area, ResolutionResult, Target, TargetQuery, TargetResolver};
use crate::config::VisionSettings;
use crate::error::{Error, Result};
use crate::geometry::NormalizedPoint;
use base64::Engine as _;
use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Cursor;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("no API key configured (set OPENAI_API_KEY or vision.api_key)")]
    MissingApiKey,
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("failed to encode capture: {0}")]
    Encode(String),
}

/// External vision capability: (image, prompt) -> model text
pub trait VisionProvider: Send + Sync {
    fn complete(&self, image: &RgbaImage, prompt: &str)
        -> std::result::Result<String, VisionError>;
}

/// OpenAI chat-completions vision endpoint
pub struct OpenAiVision {
    agent: ureq::Agent,
    api_key: String,
    model: String,
    endpoint: String,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiVision {
    pub fn from_settings(settings: &VisionSettings) -> std::result::Result<Self, VisionError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(VisionError::MissingApiKey)?;
        let timeout = Duration::from_secs(settings.timeout_secs);
        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            api_key,
            model: settings.model.clone(),
            endpoint: settings.endpoint.clone(),
            max_tokens: settings.max_tokens,
            timeout,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<serde_json::Value>,
    response_format: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl VisionProvider for OpenAiVision {
    fn complete(
        &self,
        image: &RgbaImage,
        prompt: &str,
    ) -> std::result::Result<String, VisionError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| VisionError::Encode(e.to_string()))?;
        let b64 = base64::engine::general_purpose::STANDARD.encode(&png);

        let request = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![serde_json::json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": format!("data:image/png;base64,{}", b64) } },
                ],
            })],
            response_format: serde_json::json!({ "type": "json_object" }),
        };
        let body = serde_json::to_string(&request).map_err(|e| VisionError::Encode(e.to_string()))?;

        tracing::debug!(model = %self.model, bytes = png.len(), "sending capture to vision model");
        let resp = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Content-Type", "application/json")
            .send_string(&body);

        let resp = match resp {
            Ok(r) => r,
            Err(ureq::Error::Status(code, r)) => {
                let detail = r.into_string().unwrap_or_default();
                return Err(VisionError::Network(format!(
                    "HTTP {}: {}",
                    code,
                    truncate(&detail, 200)
                )));
            }
            Err(e) if is_timeout(&e) => return Err(VisionError::Timeout(self.timeout)),
            Err(e) => return Err(VisionError::Network(e.to_string())),
        };

        let text = resp
            .into_string()
            .map_err(|e| VisionError::InvalidResponse(e.to_string()))?;
        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| VisionError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VisionError::InvalidResponse("no message content".to_string()))
    }
}

fn is_timeout(err: &ureq::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(io.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) {
                return true;
            }
        }
        source = e.source();
    }
    false
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => format!("{}...", &s[..i]),
        None => s.to_string(),
    }
}

/// The JSON object the model is asked to reply with
#[derive(Debug, Deserialize)]
struct VisionReply {
    found: bool,
    x_percent: Option<f64>,
    y_percent: Option<f64>,
    confidence: Option<f64>,
    description: Option<String>,
}

pub struct DescriptionResolver {
    provider: Box<dyn VisionProvider>,
    min_confidence: f64,
}

impl DescriptionResolver {
    pub fn new(provider: Box<dyn VisionProvider>) -> Self {
        Self {
            provider,
            min_confidence: 0.0,
        }
    }

    /// Found replies below this confidence are reported as not found
    pub fn min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = min.clamp(0.0, 1.0);
        self
    }
}

fn build_prompt(description: &str) -> String {
    format!(
        r#"Analyze this screenshot and locate: {description}

Please provide the approximate position as a percentage of the image dimensions (0-100% for both x and y).

Respond in JSON format:
{{
    "found": true/false,
    "x_percent": <number 0-100>,
    "y_percent": <number 0-100>,
    "confidence": <number 0-1>,
    "description": "<brief description of what was found>"
}}"#
    )
}

/// Models sometimes wrap the object in a markdown fence
fn strip_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn percent(v: Option<f64>, axis: &str) -> Result<f64> {
    match v {
        Some(p) if p.is_finite() && (0.0..=100.0).contains(&p) => Ok(p / 100.0),
        Some(p) => Err(Error::resolution_failed(format!(
            "{}_percent {} is outside 0-100",
            axis, p
        ))),
        None => Err(Error::resolution_failed(format!("found reply without {}_percent", axis))),
    }
}

impl TargetResolver for DescriptionResolver {
    fn resolve(&self, capture: &RgbaImage, query: &TargetQuery) -> Result<ResolutionResult> {
        let Target::Description(text) = &query.target else {
            return Err(Error::invalid_query("Description resolver needs a text query"));
        };
        if text.trim().is_empty() {
            return Err(Error::invalid_query("Target description is empty"));
        }

        let area = search_area(capture, query.region)?;
        let view: Cow<RgbaImage> = if query.region.is_some() {
            Cow::Owned(
                imageops::crop_imm(capture, area.x, area.y, area.width, area.height).to_image(),
            )
        } else {
            Cow::Borrowed(capture)
        };

        let raw = self
            .provider
            .complete(&view, &build_prompt(text))
            .map_err(|e| Error::resolution_failed(e.to_string()))?;
        let reply: VisionReply = serde_json::from_str(strip_fence(&raw))
            .map_err(|e| Error::resolution_failed(format!("malformed model reply: {}", e)))?;

        let confidence = match reply.confidence {
            Some(c) if c.is_finite() && (0.0..=1.0).contains(&c) => c,
            Some(c) => {
                return Err(Error::resolution_failed(format!(
                    "confidence {} is outside 0-1",
                    c
                )))
            }
            None => 0.0,
        };

        if !reply.found {
            tracing::debug!(query = %query.label(), "model reports target not found");
            return Ok(ResolutionResult::not_found(confidence, reply.description));
        }

        let fx = percent(reply.x_percent, "x")?;
        let fy = percent(reply.y_percent, "y")?;

        if confidence < self.min_confidence {
            return Ok(ResolutionResult::not_found(confidence, reply.description));
        }

        // region-relative fraction -> full-capture pixels -> normalized
        let px = area.x as f64 + fx * area.width as f64;
        let py = area.y as f64 + fy * area.height as f64;
        let point = NormalizedPoint::new(px / capture.width() as f64, py / capture.height() as f64)
            .ok_or_else(|| Error::resolution_failed("model returned a non-finite position"))?;

        tracing::debug!(x = px, y = py, confidence, "model located target");
        Ok(ResolutionResult::found(point, confidence, reply.description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Region, ScreenSize};
    use crate::ErrorCode;
    use std::sync::{Arc, Mutex};

    /// Replies with a canned answer and remembers the image size it saw
    struct Canned {
        reply: std::result::Result<String, fn() -> VisionError>,
        seen: Arc<Mutex<Option<(u32, u32)>>>,
    }

    impl Canned {
        fn ok(text: &str) -> Box<Self> {
            Box::new(Self {
                reply: Ok(text.to_string()),
                seen: Arc::default(),
            })
        }

        fn err(f: fn() -> VisionError) -> Box<Self> {
            Box::new(Self {
                reply: Err(f),
                seen: Arc::default(),
            })
        }
    }

    impl VisionProvider for Canned {
        fn complete(
            &self,
            image: &RgbaImage,
            prompt: &str,
        ) -> std::result::Result<String, VisionError> {
            assert!(prompt.contains("locate:"));
            *self.seen.lock().unwrap() = Some(image.dimensions());
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(f) => Err(f()),
            }
        }
    }

    fn capture() -> RgbaImage {
        RgbaImage::new(200, 100)
    }

    fn resolve(provider: Box<Canned>, query: TargetQuery) -> Result<ResolutionResult> {
        DescriptionResolver::new(provider).resolve(&capture(), &query)
    }

    #[test]
    fn found_reply_is_normalized() {
        let r = resolve(
            Canned::ok(r#"{"found": true, "x_percent": 25, "y_percent": 50, "confidence": 0.9, "description": "OK button"}"#),
            TargetQuery::description("the OK button"),
        )
        .unwrap();
        assert!(r.found);
        assert_eq!(
            r.point.unwrap().to_pixels(ScreenSize::new(200, 100)),
            crate::Point::new(50, 50)
        );
        assert_eq!(r.description.as_deref(), Some("OK button"));
    }

    #[test]
    fn not_found_reply_has_no_point() {
        let r = resolve(
            Canned::ok(r#"{"found": false, "x_percent": 10, "y_percent": 10, "confidence": 0.2}"#),
            TargetQuery::description("a unicorn"),
        )
        .unwrap();
        assert!(!r.found);
        assert!(r.point.is_none());
        assert_eq!(r.confidence, 0.2);
    }

    #[test]
    fn malformed_replies_never_yield_coordinates() {
        for bad in [
            "I think it's near the top",
            r#"{"x_percent": 10, "y_percent": 10}"#,
            r#"{"found": true, "y_percent": 10}"#,
            r#"{"found": true, "x_percent": 140, "y_percent": 10}"#,
            r#"{"found": true, "x_percent": 10, "y_percent": 10, "confidence": 85}"#,
        ] {
            let err = resolve(Canned::ok(bad), TargetQuery::description("x")).unwrap_err();
            assert!(err.is(ErrorCode::ResolutionFailed), "{}", bad);
        }
    }

    #[test]
    fn provider_failures_are_wrapped() {
        let err = resolve(
            Canned::err(|| VisionError::Timeout(Duration::from_secs(60))),
            TargetQuery::description("x"),
        )
        .unwrap_err();
        assert!(err.is(ErrorCode::ResolutionFailed));
        assert!(err.message.contains("timed out"));

        let err = resolve(
            Canned::err(|| VisionError::MissingApiKey),
            TargetQuery::description("x"),
        )
        .unwrap_err();
        assert!(err.is(ErrorCode::ResolutionFailed));
    }

    #[test]
    fn region_reply_maps_back_to_full_screen() {
        let provider = Canned::ok(r#"{"found": true, "x_percent": 50, "y_percent": 50, "confidence": 1}"#);
        let seen = Arc::clone(&provider.seen);
        let resolver = DescriptionResolver::new(provider);
        let region = Region::new(100, 20, 80, 40);
        let r = resolver
            .resolve(&capture(), &TargetQuery::description("icon").in_region(Some(region)))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some((80, 40)));
        let p = r.point.unwrap().to_pixels(ScreenSize::new(200, 100));
        assert_eq!((p.x, p.y), (140, 40));
        assert!(region.contains(p.x as f64, p.y as f64));
    }

    #[test]
    fn below_min_confidence_is_not_found() {
        let r = DescriptionResolver::new(Canned::ok(
            r#"{"found": true, "x_percent": 5, "y_percent": 5, "confidence": 0.3}"#,
        ))
        .min_confidence(0.5)
        .resolve(&capture(), &TargetQuery::description("x"))
        .unwrap();
        assert!(!r.found);
        assert!(r.point.is_none());
    }

    #[test]
    fn fenced_json_is_accepted() {
        let r = resolve(
            Canned::ok("```json\n{\"found\": true, \"x_percent\": 0, \"y_percent\": 100, \"confidence\": 0.7}\n```"),
            TargetQuery::description("corner"),
        )
        .unwrap();
        assert!(r.found);
    }

    #[test]
    fn missing_key_is_reported() {
        let err = OpenAiVision::from_settings(&VisionSettings::default()).err().unwrap();
        assert!(matches!(err, VisionError::MissingApiKey));
    }
}
