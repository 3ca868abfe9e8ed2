//! Recorded mouse events and the append-only log that holds them
//!
//! On disk a log is a single JSON object:
//!
//! ```json
//! {"recorded_at": "2024-05-01T10:00:00Z", "events": [
//!   {"type": "move", "x": 10, "y": 20, "timestamp": 0.0},
//!   {"type": "click", "x": 10, "y": 20, "button": "left", "timestamp": 0.5},
//!   {"type": "scroll", "x": 10, "y": 20, "dx": 0, "dy": -1, "timestamp": 0.9}
//! ]}
//! ```

use autoclick_core::{Error, MouseButton, Point, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest accepted timestamp: one year after recording start, in seconds
pub const MAX_TIMESTAMP: f64 = 365.0 * 24.0 * 3600.0;

fn valid_timestamp(t: f64) -> bool {
    t.is_finite() && (0.0..=MAX_TIMESTAMP).contains(&t)
}

/// Single event - position and seconds since recording start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub x: f64,
    pub y: f64,
    pub timestamp: f64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventKind {
    Move,
    Click { button: MouseButton },
    /// Positive `dy` scrolls up, positive `dx` scrolls right
    Scroll { dx: i32, dy: i32 },
}

impl Event {
    pub fn moved(x: f64, y: f64, timestamp: f64) -> Self {
        Self {
            x,
            y,
            timestamp,
            kind: EventKind::Move,
        }
    }

    pub fn click(x: f64, y: f64, button: MouseButton, timestamp: f64) -> Self {
        Self {
            x,
            y,
            timestamp,
            kind: EventKind::Click { button },
        }
    }

    pub fn scroll(x: f64, y: f64, dx: i32, dy: i32, timestamp: f64) -> Self {
        Self {
            x,
            y,
            timestamp,
            kind: EventKind::Scroll { dx, dy },
        }
    }

    /// Position rounded to whole pixels
    pub fn point(&self) -> Point {
        Point::new(self.x.round() as i32, self.y.round() as i32)
    }

    pub fn is_move(&self) -> bool {
        matches!(self.kind, EventKind::Move)
    }
}

/// Ordered mouse events plus metadata.
///
/// Appendable until [`EventLog::seal`]; logs read from disk come back sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    #[serde(with = "recorded_at")]
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    events: Vec<Event>,
    #[serde(skip)]
    sealed: bool,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            recorded_at: Utc::now(),
            label: None,
            completed_at: None,
            events: Vec::new(),
            sealed: false,
        }
    }

    pub fn with_label(label: Option<String>) -> Self {
        Self { label, ..Self::new() }
    }

    pub fn append(&mut self, event: Event) -> Result<()> {
        if self.sealed {
            return Err(Error::log_sealed());
        }
        if !valid_timestamp(event.timestamp) {
            return Err(Error::invalid_state(format!("invalid timestamp {}", event.timestamp)));
        }
        if let Some(last) = self.events.last() {
            if event.timestamp < last.timestamp {
                return Err(Error::invalid_state(format!(
                    "timestamp {} precedes previous event at {}",
                    event.timestamp, last.timestamp
                )));
            }
        }
        self.events.push(event);
        Ok(())
    }

    /// Mark the log immutable. Calling it again changes nothing.
    pub fn seal(&mut self) {
        if !self.sealed {
            self.sealed = true;
            self.completed_at.get_or_insert_with(Utc::now);
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Timestamp of the last event, in seconds
    pub fn duration(&self) -> f64 {
        self.events.last().map_or(0.0, |e| e.timestamp)
    }

    pub fn summary(&self) -> LogSummary {
        let mut s = LogSummary {
            recorded_at: self.recorded_at,
            label: self.label.clone(),
            events: self.events.len(),
            moves: 0,
            clicks: 0,
            scrolls: 0,
            duration_secs: self.duration(),
        };
        for e in &self.events {
            match e.kind {
                EventKind::Move => s.moves += 1,
                EventKind::Click { .. } => s.clicks += 1,
                EventKind::Scroll { .. } => s.scrolls += 1,
            }
        }
        s
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a persisted log. The result is sealed.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let mut log: EventLog =
            serde_json::from_slice(bytes).map_err(|e| Error::malformed_log(e.to_string()))?;

        let mut prev = 0.0;
        for (i, e) in log.events.iter().enumerate() {
            if !valid_timestamp(e.timestamp) {
                return Err(Error::malformed_log(format!(
                    "event {} has invalid timestamp {}",
                    i, e.timestamp
                )));
            }
            if e.timestamp < prev {
                return Err(Error::malformed_log(format!(
                    "event {} at {} precedes the previous event at {}",
                    i, e.timestamp, prev
                )));
            }
            prev = e.timestamp;
        }

        log.sealed = true;
        Ok(log)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Self::from_slice(text.as_bytes())
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSummary {
    pub recorded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub events: usize,
    pub moves: usize,
    pub clicks: usize,
    pub scrolls: usize,
    pub duration_secs: f64,
}

/// RFC 3339 out; RFC 3339 or a naive local ISO timestamp in
mod recorded_at {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(d)?;
        if let Ok(t) = DateTime::parse_from_rfc3339(&text) {
            return Ok(t.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|e| de::Error::custom(format!("invalid recorded_at {:?}: {}", text, e)))?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| {
                de::Error::custom(format!("recorded_at {:?} does not exist locally", text))
            })
    }
}
