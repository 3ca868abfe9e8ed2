//! Clicker - resolve a target on screen and click it

use crate::error::{Error, Result};
use crate::failsafe::{self, FailSafe};
use crate::geometry::Point;
use crate::input::{Mouse, MouseButton};
use crate::resolver::{ResolutionResult, TargetQuery, TargetResolver};
use crate::screen::ScreenCapture;
use crate::stop::{sleep_unless, StopSignal};
use serde::Serialize;
use std::time::Duration;

/// Outcome of a successful target-and-click
#[derive(Debug, Clone, Serialize)]
pub struct TargetClick {
    /// Absolute pixel position that was clicked
    pub point: Point,
    pub result: ResolutionResult,
}

pub struct Clicker<M, S> {
    mouse: M,
    screen: S,
    failsafe: FailSafe,
    button: MouseButton,
}

impl<M: Mouse, S: ScreenCapture> Clicker<M, S> {
    /// Uses the process-wide failsafe installed by [`failsafe::init`]
    pub fn new(mouse: M, screen: S) -> Self {
        Self {
            mouse,
            screen,
            failsafe: failsafe::current(),
            button: MouseButton::Left,
        }
    }

    pub fn with_failsafe(mut self, failsafe: FailSafe) -> Self {
        self.failsafe = failsafe;
        self
    }

    /// Button used by [`Clicker::click_on_target`]
    pub fn button(mut self, button: MouseButton) -> Self {
        self.button = button;
        self
    }

    pub fn mouse(&self) -> &M {
        &self.mouse
    }

    pub fn mouse_mut(&mut self) -> &mut M {
        &mut self.mouse
    }

    pub fn screen(&self) -> &S {
        &self.screen
    }

    /// Capture the screen and resolve `query` without clicking
    pub fn locate(
        &self,
        resolver: &dyn TargetResolver,
        query: &TargetQuery,
    ) -> Result<ResolutionResult> {
        let capture = self.screen.capture()?;
        tracing::debug!(
            query = %query.label(),
            width = capture.width(),
            height = capture.height(),
            "resolving target"
        );
        resolver.resolve(&capture, query)
    }

    /// Capture, resolve, and click once at the resolved point.
    ///
    /// The normalized point is converted with the screen size read right
    /// before clicking, not the capture's.
    pub fn click_on_target(
        &mut self,
        resolver: &dyn TargetResolver,
        query: &TargetQuery,
    ) -> Result<TargetClick> {
        let result = self.locate(resolver, query)?;
        let normalized = match (result.found, result.point) {
            (true, Some(p)) => p,
            _ => {
                tracing::info!(
                    query = %query.label(),
                    confidence = result.confidence,
                    "target not found"
                );
                return Err(Error::target_not_found(
                    &query.label(),
                    result.confidence,
                    result.description.as_deref(),
                ));
            }
        };

        let size = self.mouse.screen_size()?;
        let point = normalized.to_pixels(size);
        self.click_at(point, self.button)?;
        tracing::info!(
            query = %query.label(),
            %point,
            confidence = result.confidence,
            "clicked target"
        );
        Ok(TargetClick { point, result })
    }

    pub fn click_at(&mut self, point: Point, button: MouseButton) -> Result<()> {
        self.failsafe.check(&self.mouse)?;
        self.mouse.move_to(point)?;
        self.failsafe.check(&self.mouse)?;
        self.mouse.click(button)?;
        tracing::debug!(%point, %button, "click");
        Ok(())
    }

    /// Click `count` times at `point`, waiting `interval` between clicks.
    ///
    /// A stop request ends the run with `ABORTED_BY_USER`.
    pub fn repeat_clicks(
        &mut self,
        point: Point,
        count: u32,
        interval: Duration,
        button: MouseButton,
        stop: Option<&StopSignal>,
    ) -> Result<u32> {
        tracing::info!(
            %point,
            count,
            interval_ms = interval.as_millis() as u64,
            "repeating clicks"
        );
        for i in 0..count {
            if i > 0 && !sleep_unless(stop, interval) {
                return Err(Error::aborted(format!("stopped after {} of {} clicks", i, count)));
            }
            if stop.is_some_and(StopSignal::is_stopped) {
                return Err(Error::aborted(format!("stopped after {} of {} clicks", i, count)));
            }
            self.click_at(point, button)?;
        }
        Ok(count)
    }
}
