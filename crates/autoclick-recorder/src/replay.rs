//! Timed replay of an event log through a [`Mouse`]

use crate::events::{Event, EventKind, EventLog};
use autoclick_core::failsafe::{self, FailSafe};
use autoclick_core::stop::sleep_unless;
use autoclick_core::{Error, Mouse, Result, StopSignal};
use serde::Serialize;
use std::time::{Duration, Instant};

const PROGRESS_EVERY: usize = 100;

/// One scheduled action: wait `delay`, then perform `event`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step<'a> {
    pub delay: Duration,
    pub event: &'a Event,
}

/// Replay recorded mouse events
pub struct Replayer {
    speed: f64,
    skip_moves: bool,
    instant: bool,
    start_delay: Duration,
    stop: Option<StopSignal>,
    failsafe: FailSafe,
}

impl Replayer {
    pub fn new() -> Self {
        Self {
            speed: 1.0,
            skip_moves: false,
            instant: false,
            start_delay: Duration::ZERO,
            stop: None,
            failsafe: failsafe::current(),
        }
    }

    /// Set playback speed (1.0 = real-time, 2.0 = 2x speed)
    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Replay only clicks and scrolls
    pub fn skip_moves(mut self, skip: bool) -> Self {
        self.skip_moves = skip;
        self
    }

    /// No waits between events
    pub fn instant(mut self, instant: bool) -> Self {
        self.instant = instant;
        self
    }

    /// Pause before the first event
    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_failsafe(mut self, failsafe: FailSafe) -> Self {
        self.failsafe = failsafe;
        self
    }

    /// Waits and actions for `log`, without performing anything.
    ///
    /// Each delay is measured from the previous performed event, or from
    /// playback start for the first one, and divided by the speed.
    pub fn schedule<'a>(&self, log: &'a EventLog) -> Result<Vec<Step<'a>>> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(Error::invalid_speed(self.speed));
        }
        let mut last = 0.0;
        let mut steps = Vec::with_capacity(log.len());
        for event in log.events() {
            if self.skip_moves && event.is_move() {
                continue;
            }
            let delay = if self.instant || event.timestamp <= last {
                Duration::ZERO
            } else {
                Duration::try_from_secs_f64((event.timestamp - last) / self.speed)
                    .map_err(|_| Error::invalid_speed(self.speed))?
            };
            last = event.timestamp;
            steps.push(Step { delay, event });
        }
        Ok(steps)
    }

    pub fn play<M: Mouse + ?Sized>(&self, log: &EventLog, mouse: &mut M) -> Result<ReplayStats> {
        let steps = self.schedule(log)?;
        let mut stats = ReplayStats {
            skipped: log.len() - steps.len(),
            ..ReplayStats::default()
        };
        tracing::info!(
            events = log.len(),
            speed = self.speed,
            skip_moves = self.skip_moves,
            instant = self.instant,
            "starting playback"
        );

        if !self.start_delay.is_zero() {
            tracing::info!(
                delay_ms = self.start_delay.as_millis() as u64,
                "move the pointer to the failsafe corner to abort"
            );
            if !sleep_unless(self.stop.as_ref(), self.start_delay) {
                return Err(self.stopped(&stats));
            }
        }

        let started = Instant::now();
        for step in steps {
            if !sleep_unless(self.stop.as_ref(), step.delay) || self.is_stopped() {
                return Err(self.stopped(&stats));
            }
            self.perform(step.event, mouse, &mut stats)?;

            let done = stats.executed();
            if done % PROGRESS_EVERY == 0 {
                tracing::info!(executed = done, "playback progress");
            }
        }

        stats.elapsed_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            executed = stats.executed(),
            elapsed = stats.elapsed_secs,
            "playback completed"
        );
        Ok(stats)
    }

    fn perform<M: Mouse + ?Sized>(
        &self,
        event: &Event,
        mouse: &mut M,
        stats: &mut ReplayStats,
    ) -> Result<()> {
        let point = event.point();
        self.failsafe.check(mouse)?;
        mouse.move_to(point)?;
        match event.kind {
            EventKind::Move => stats.moves += 1,
            EventKind::Click { button } => {
                self.failsafe.check(mouse)?;
                mouse.click(button)?;
                stats.clicks += 1;
                tracing::debug!(%point, %button, "replayed click");
            }
            EventKind::Scroll { dx, dy } => {
                self.failsafe.check(mouse)?;
                mouse.scroll(dx, dy)?;
                stats.scrolls += 1;
            }
        }
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stop.as_ref().is_some_and(StopSignal::is_stopped)
    }

    fn stopped(&self, stats: &ReplayStats) -> Error {
        tracing::info!(executed = stats.executed(), "playback stopped");
        Error::aborted(format!("playback stopped after {} events", stats.executed()))
    }
}

impl Default for Replayer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReplayStats {
    pub moves: usize,
    pub clicks: usize,
    pub scrolls: usize,
    /// Events left out by `skip_moves`
    pub skipped: usize,
    pub elapsed_secs: f64,
}

impl ReplayStats {
    pub fn executed(&self) -> usize {
        self.moves + self.clicks + self.scrolls
    }
}
