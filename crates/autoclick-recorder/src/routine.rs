//! Repeated target-and-act loop
//!
//! Each iteration captures the screen, resolves the target and either
//! clicks it or replays a recorded log. The loop ends after the requested
//! number of successes, when the target disappears, or on stop.

use crate::events::EventLog;
use crate::replay::Replayer;
use autoclick_core::stop::sleep_unless;
use autoclick_core::{
    Clicker, Error, Mouse, MouseButton, ResolutionResult, Result, ScreenCapture, StopSignal,
    TargetQuery, TargetResolver,
};
use std::time::Duration;

/// Floor for the wait between successful iterations
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);
/// Wait before searching again in retry mode when no interval is set
pub const RETRY_DELAY: Duration = Duration::from_secs(2);
const ATTEMPTS: u32 = 3;
const BACKOFF: Duration = Duration::from_millis(500);
const SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Times(u32),
    Unlimited,
}

/// What to do once the target is found
#[derive(Debug, Clone)]
pub enum OnFound {
    Click(MouseButton),
    Replay { log: EventLog, speed: f64 },
}

pub struct ImageClickRoutine {
    query: TargetQuery,
    repeat: Repeat,
    interval: Duration,
    retry_on_not_found: bool,
    on_found: OnFound,
    settle: Duration,
    stop: Option<StopSignal>,
}

impl ImageClickRoutine {
    pub fn new(query: TargetQuery) -> Self {
        Self {
            query,
            repeat: Repeat::Times(1),
            interval: Duration::ZERO,
            retry_on_not_found: false,
            on_found: OnFound::Click(MouseButton::Left),
            settle: SETTLE,
            stop: None,
        }
    }

    pub fn repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = repeat;
        self
    }

    /// Wait between successful iterations, and between searches in retry mode
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Keep searching while the target is missing instead of giving up
    pub fn retry_on_not_found(mut self, retry: bool) -> Self {
        self.retry_on_not_found = retry;
        self
    }

    pub fn on_found(mut self, action: OnFound) -> Self {
        self.on_found = action;
        self
    }

    /// Pause between locating the target and acting on it
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Run the loop, returning the number of successful iterations
    pub fn run<M: Mouse, S: ScreenCapture>(
        &self,
        clicker: &mut Clicker<M, S>,
        resolver: &dyn TargetResolver,
        mut progress: impl FnMut(&str),
    ) -> Result<u32> {
        if let OnFound::Replay { speed, .. } = &self.on_found {
            if !(speed.is_finite() && *speed > 0.0) {
                return Err(Error::invalid_speed(*speed));
            }
        }

        let label = self.query.label();
        let mut successes = 0u32;
        let mut iteration = 0u32;

        while !self.done(successes) {
            self.check_stop(successes)?;
            iteration += 1;
            tracing::info!(query = %label, iteration, successes, "searching for target");
            if iteration > 1 {
                self.pause(MIN_INTERVAL, successes)?;
            }

            let result = self.locate(clicker, resolver, successes)?;
            let point = match (result.found, result.point) {
                (true, Some(p)) => p,
                _ => {
                    if self.retry_on_not_found {
                        let delay = if self.interval.is_zero() {
                            RETRY_DELAY
                        } else {
                            self.interval
                        };
                        if successes == 0 {
                            progress(&format!(
                                "Target not found, retrying in {:.1}s",
                                delay.as_secs_f64()
                            ));
                        } else {
                            progress(&format!(
                                "Target disappeared after {} successes, retrying in {:.1}s",
                                successes,
                                delay.as_secs_f64()
                            ));
                        }
                        self.pause(delay, successes)?;
                        iteration = 0;
                        continue;
                    }
                    if successes == 0 {
                        return Err(Error::target_not_found(
                            &label,
                            result.confidence,
                            result.description.as_deref(),
                        ));
                    }
                    tracing::info!(successes, "target no longer found");
                    break;
                }
            };

            tracing::info!(
                x = point.x,
                y = point.y,
                confidence = result.confidence,
                "target found"
            );
            self.pause(self.settle, successes)?;

            match &self.on_found {
                OnFound::Click(button) => {
                    let size = clicker.mouse().screen_size()?;
                    clicker.click_at(point.to_pixels(size), *button)?;
                }
                OnFound::Replay { log, speed } => {
                    progress("Replaying recorded actions");
                    let mut replayer = Replayer::new().speed(*speed);
                    if let Some(stop) = &self.stop {
                        replayer = replayer.stop_signal(stop.clone());
                    }
                    replayer.play(log, clicker.mouse_mut())?;
                }
            }
            successes += 1;
            progress(&format!(
                "Iteration {} done (confidence {:.2})",
                successes, result.confidence
            ));

            if !self.done(successes) {
                self.pause(self.interval.max(MIN_INTERVAL), successes)?;
            }
        }

        tracing::info!(successes, "routine finished");
        Ok(successes)
    }

    fn done(&self, successes: u32) -> bool {
        match self.repeat {
            Repeat::Times(n) => successes >= n,
            Repeat::Unlimited => false,
        }
    }

    /// Capture and resolve, retrying errors with a back-off
    fn locate<M: Mouse, S: ScreenCapture>(
        &self,
        clicker: &Clicker<M, S>,
        resolver: &dyn TargetResolver,
        successes: u32,
    ) -> Result<ResolutionResult> {
        let mut attempt = 1;
        loop {
            match clicker.locate(resolver, &self.query) {
                Ok(r) => return Ok(r),
                Err(e) if attempt < ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "target search failed, retrying");
                    self.pause(BACKOFF, successes)?;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(attempts = ATTEMPTS, error = %e, "target search failed");
                    return Err(e);
                }
            }
        }
    }

    fn pause(&self, duration: Duration, successes: u32) -> Result<()> {
        if sleep_unless(self.stop.as_ref(), duration) {
            Ok(())
        } else {
            Err(self.stopped(successes))
        }
    }

    fn check_stop(&self, successes: u32) -> Result<()> {
        match &self.stop {
            Some(s) if s.is_stopped() => Err(self.stopped(successes)),
            _ => Ok(()),
        }
    }

    fn stopped(&self, successes: u32) -> Error {
        tracing::info!(successes, "routine stopped");
        Error::aborted(format!("stopped after {} successful iterations", successes))
            .with_context(serde_json::json!({ "successes": successes }))
    }
}
