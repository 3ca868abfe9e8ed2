//! Fakes shared by the unit tests

use crate::hook::{Input, InputHook, Observation};
use autoclick_core::{
    Error, Mouse, MouseButton, Point, ResolutionResult, Result, ScreenCapture, ScreenSize,
    TargetQuery, TargetResolver,
};
use crossbeam_channel::Sender;
use image::RgbaImage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
struct HookState {
    tx: Option<Sender<Observation>>,
    busy: bool,
    failure: Option<String>,
}

/// Hook driven by the test through [`FakeHook::emit`]
#[derive(Clone, Default)]
pub struct FakeHook(Arc<Mutex<HookState>>);

impl FakeHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, input: Input) {
        if let Some(tx) = self.0.lock().tx.as_ref() {
            tx.send(Observation::now(input)).unwrap();
        }
    }

    pub fn set_busy(&self, busy: bool) {
        self.0.lock().busy = busy;
    }

    pub fn is_attached(&self) -> bool {
        self.0.lock().tx.is_some()
    }

    /// Act like the listener thread died: nothing more is delivered
    pub fn fail(&self, reason: &str) {
        let mut state = self.0.lock();
        state.failure = Some(reason.to_string());
        state.tx = None;
    }
}

impl InputHook for FakeHook {
    fn attach(&mut self, tx: Sender<Observation>) -> Result<()> {
        let mut state = self.0.lock();
        if state.busy || state.tx.is_some() {
            return Err(Error::listener_busy());
        }
        state.tx = Some(tx);
        Ok(())
    }

    fn detach(&mut self) {
        self.0.lock().tx = None;
    }

    fn failure(&self) -> Option<Error> {
        let state = self.0.lock();
        let reason = state.failure.as_ref()?;
        Some(Error::input_failed("Listening for mouse input", reason))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Move(Point),
    Click(MouseButton),
    Scroll(i32, i32),
}

/// Records actions with the time they were issued
pub struct FakeMouse {
    pub pos: Point,
    pub size: ScreenSize,
    pub actions: Vec<(Instant, Action)>,
}

impl FakeMouse {
    pub fn new() -> Self {
        Self {
            pos: Point::new(500, 500),
            size: ScreenSize::new(1000, 1000),
            actions: Vec::new(),
        }
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.iter().map(|(_, a)| a.clone()).collect()
    }

    pub fn clicks(&self) -> usize {
        self.actions.iter().filter(|(_, a)| matches!(a, Action::Click(_))).count()
    }
}

impl Mouse for FakeMouse {
    fn position(&self) -> Result<Point> {
        Ok(self.pos)
    }

    fn screen_size(&self) -> Result<ScreenSize> {
        Ok(self.size)
    }

    fn move_to(&mut self, point: Point) -> Result<()> {
        self.pos = point;
        self.actions.push((Instant::now(), Action::Move(point)));
        Ok(())
    }

    fn click(&mut self, button: MouseButton) -> Result<()> {
        self.actions.push((Instant::now(), Action::Click(button)));
        Ok(())
    }

    fn scroll(&mut self, dx: i32, dy: i32) -> Result<()> {
        self.actions.push((Instant::now(), Action::Scroll(dx, dy)));
        Ok(())
    }
}

pub struct BlankScreen;

impl ScreenCapture for BlankScreen {
    fn capture(&self) -> Result<RgbaImage> {
        Ok(RgbaImage::new(100, 100))
    }
}

/// Answers from a script, then "not found" forever
pub struct Scripted {
    replies: Mutex<VecDeque<Result<ResolutionResult>>>,
    pub calls: Mutex<usize>,
}

impl Scripted {
    pub fn new(replies: Vec<Result<ResolutionResult>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
        }
    }
}

impl TargetResolver for Scripted {
    fn resolve(&self, _: &RgbaImage, _: &TargetQuery) -> Result<ResolutionResult> {
        *self.calls.lock() += 1;
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(ResolutionResult::not_found(0.0, None)))
    }
}
