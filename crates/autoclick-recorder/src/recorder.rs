//! Mouse recorder - Idle -> Recording -> Idle, reusable
//!
//! The hook pushes observations into a channel; the recorder drains them
//! into the event log on [`Recorder::poll`] and [`Recorder::stop`].

use crate::events::{Event, EventLog};
use crate::hook::{Input, InputHook, Observation, RdevHook};
use autoclick_core::config::RecorderSettings;
use autoclick_core::{Error, Result};
use crossbeam_channel::{unbounded, Receiver};
use std::time::Instant;

/// Recorder configuration
#[derive(Debug, Clone, Default)]
pub struct RecorderConfig {
    /// Minimum pointer travel in pixels before another move is recorded
    pub move_threshold: f64,
    /// Stored in the log's metadata
    pub label: Option<String>,
}

impl RecorderConfig {
    pub fn from_settings(settings: &RecorderSettings) -> Self {
        Self {
            move_threshold: settings.move_threshold.max(0.0),
            label: None,
        }
    }
}

struct Session {
    log: EventLog,
    start: Instant,
    rx: Receiver<Observation>,
    last_move: Option<(f64, f64)>,
    last_timestamp: f64,
}

impl Session {
    fn drain(&mut self, move_threshold: f64) {
        while let Ok(obs) = self.rx.try_recv() {
            self.record(obs, move_threshold);
        }
    }

    fn record(&mut self, obs: Observation, move_threshold: f64) {
        // observations arrive in order; clamp guards against clock skew between threads
        let t = obs
            .at
            .saturating_duration_since(self.start)
            .as_secs_f64()
            .max(self.last_timestamp);

        let event = match obs.input {
            Input::Move { x, y } => {
                if let Some((lx, ly)) = self.last_move {
                    if move_threshold > 0.0 && (x - lx).hypot(y - ly) < move_threshold {
                        return;
                    }
                }
                self.last_move = Some((x, y));
                Event::moved(x, y, t)
            }
            Input::Press { x, y, button } => Event::click(x, y, button, t),
            Input::Wheel { x, y, dx, dy } => Event::scroll(x, y, dx, dy, t),
        };

        match self.log.append(event) {
            Ok(()) => self.last_timestamp = t,
            Err(e) => tracing::warn!(error = %e, "dropped recorded event"),
        }
    }
}

pub struct Recorder<H: InputHook> {
    hook: H,
    config: RecorderConfig,
    session: Option<Session>,
}

impl Recorder<RdevHook> {
    /// Recorder on the system-wide mouse listener
    pub fn system(config: RecorderConfig) -> Self {
        Self::with_config(RdevHook::new(), config)
    }
}

impl<H: InputHook> Recorder<H> {
    pub fn new(hook: H) -> Self {
        Self::with_config(hook, RecorderConfig::default())
    }

    pub fn with_config(hook: H, config: RecorderConfig) -> Self {
        Self {
            hook,
            config,
            session: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::already_recording());
        }
        let (tx, rx) = unbounded();
        let start = Instant::now();
        self.hook.attach(tx)?;
        self.session = Some(Session {
            log: EventLog::with_label(self.config.label.clone()),
            start,
            rx,
            last_move: None,
            last_timestamp: 0.0,
        });
        tracing::info!(move_threshold = self.config.move_threshold, "recording started");
        Ok(())
    }

    /// Pull pending input into the log. Returns the number of events so far.
    ///
    /// Fails once the hook has stopped delivering input; the session stays
    /// open until [`Recorder::stop`].
    pub fn poll(&mut self) -> Result<usize> {
        let threshold = self.config.move_threshold;
        let Some(session) = self.session.as_mut() else {
            return Ok(0);
        };
        session.drain(threshold);
        match self.hook.failure() {
            Some(e) => Err(e),
            None => Ok(session.log.len()),
        }
    }

    /// Stop listening and return the sealed log
    ///
    /// If the hook died mid-session the session is discarded and its error
    /// returned instead of a silently truncated log.
    pub fn stop(&mut self) -> Result<EventLog> {
        let mut session = self.session.take().ok_or_else(Error::not_recording)?;
        self.hook.detach();
        session.drain(self.config.move_threshold);
        if let Some(e) = self.hook.failure() {
            tracing::warn!(events = session.log.len(), error = %e, "recording lost its input");
            return Err(e);
        }
        session.log.seal();
        tracing::info!(
            events = session.log.len(),
            duration = session.log.duration(),
            "recording stopped"
        );
        Ok(session.log)
    }
}

impl<H: InputHook> Drop for Recorder<H> {
    fn drop(&mut self) {
        if self.session.take().is_some() {
            self.hook.detach();
        }
    }
}
