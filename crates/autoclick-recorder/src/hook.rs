//! Process-wide mouse listener
//!
//! `rdev::listen` blocks its thread for the life of the process and cannot
//! be cancelled, so one listener thread is started on first use and
//! forwards into a single subscriber slot. Attaching fills the slot,
//! detaching empties it. A second attach while the slot is taken fails.

use autoclick_core::{EnigoMouse, Error, Mouse, MouseButton, Result};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Once;
use std::thread;
use std::time::Instant;

/// Mouse input as seen by a hook, with the pointer position filled in
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Input {
    Move { x: f64, y: f64 },
    Press { x: f64, y: f64, button: MouseButton },
    Wheel { x: f64, y: f64, dx: i32, dy: i32 },
}

#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub at: Instant,
    pub input: Input,
}

impl Observation {
    pub fn now(input: Input) -> Self {
        Self { at: Instant::now(), input }
    }
}

/// Source of live mouse input
pub trait InputHook: Send {
    /// Start delivering observations to `tx`
    fn attach(&mut self, tx: Sender<Observation>) -> Result<()>;
    /// Stop delivering and drop the sender
    fn detach(&mut self);
    /// Set once the underlying listener has died; nothing more will arrive
    fn failure(&self) -> Option<Error> {
        None
    }
}

fn listener_error(reason: String) -> Error {
    Error::input_failed("Listening for mouse input", reason).with_suggestions(vec![
        "Check that a display is available".to_string(),
        "On macOS, grant accessibility permission to the terminal".to_string(),
    ])
}

/// Subscriber slot fed by one listener thread
#[derive(Debug)]
pub(crate) struct Slot {
    sender: Mutex<Option<Sender<Observation>>>,
    failure: Mutex<Option<String>>,
}

impl Slot {
    pub(crate) const fn new() -> Self {
        Self {
            sender: parking_lot::const_mutex(None),
            failure: parking_lot::const_mutex(None),
        }
    }

    fn claim(&self, tx: Sender<Observation>) -> Result<()> {
        if let Some(reason) = self.failure() {
            return Err(listener_error(reason));
        }
        let mut sender = self.sender.lock();
        if sender.is_some() {
            return Err(Error::listener_busy());
        }
        *sender = Some(tx);
        Ok(())
    }

    fn release(&self) {
        self.sender.lock().take();
    }

    fn deliver(&self, input: Input) {
        if let Some(tx) = self.sender.lock().as_ref() {
            let _ = tx.send(Observation::now(input));
        }
    }

    /// The listener is gone; drops the current subscriber
    pub(crate) fn fail(&self, reason: String) {
        *self.failure.lock() = Some(reason);
        self.release();
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }
}

static SLOT: Slot = Slot::new();

/// [`InputHook`] backed by the global rdev listener
#[derive(Debug)]
pub struct RdevHook {
    slot: &'static Slot,
    start: fn(&'static Slot),
    attached: bool,
}

impl RdevHook {
    pub fn new() -> Self {
        Self::on_slot(&SLOT, ensure_listener)
    }

    pub(crate) fn on_slot(slot: &'static Slot, start: fn(&'static Slot)) -> Self {
        Self {
            slot,
            start,
            attached: false,
        }
    }
}

impl Default for RdevHook {
    fn default() -> Self {
        Self::new()
    }
}

impl InputHook for RdevHook {
    fn attach(&mut self, tx: Sender<Observation>) -> Result<()> {
        if self.attached {
            return Err(Error::already_recording());
        }
        self.slot.claim(tx)?;
        (self.start)(self.slot);
        if let Some(reason) = self.slot.failure() {
            self.slot.release();
            return Err(listener_error(reason));
        }
        self.attached = true;
        tracing::debug!("mouse listener attached");
        Ok(())
    }

    fn detach(&mut self) {
        if self.attached {
            self.slot.release();
            self.attached = false;
            tracing::debug!("mouse listener detached");
        }
    }

    fn failure(&self) -> Option<Error> {
        self.slot.failure().map(listener_error)
    }
}

impl Drop for RdevHook {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Fills in the pointer position for button and wheel events, which rdev
/// reports without one
pub(crate) struct PointerTracker<F> {
    last: Option<(f64, f64)>,
    locate: F,
}

impl<F: FnMut() -> Option<(f64, f64)>> PointerTracker<F> {
    /// `locate` reads the pointer directly, used until the first move is seen
    pub(crate) fn new(locate: F) -> Self {
        Self { last: None, locate }
    }

    fn position(&mut self) -> Option<(f64, f64)> {
        if self.last.is_none() {
            self.last = (self.locate)();
        }
        self.last
    }

    pub(crate) fn translate(&mut self, event: &rdev::EventType) -> Option<Input> {
        match *event {
            rdev::EventType::MouseMove { x, y } => {
                self.last = Some((x, y));
                Some(Input::Move { x, y })
            }
            rdev::EventType::ButtonPress(button) => {
                let button = match button {
                    rdev::Button::Left => MouseButton::Left,
                    rdev::Button::Right => MouseButton::Right,
                    rdev::Button::Middle => MouseButton::Middle,
                    rdev::Button::Unknown(_) => return None,
                };
                let Some((x, y)) = self.position() else {
                    tracing::warn!(%button, "pointer position unknown, press dropped");
                    return None;
                };
                Some(Input::Press { x, y, button })
            }
            rdev::EventType::Wheel { delta_x, delta_y } => {
                let Some((x, y)) = self.position() else {
                    tracing::warn!("pointer position unknown, scroll dropped");
                    return None;
                };
                Some(Input::Wheel {
                    x,
                    y,
                    dx: delta_x as i32,
                    dy: delta_y as i32,
                })
            }
            _ => None,
        }
    }
}

fn pointer_position() -> Option<(f64, f64)> {
    let mouse = EnigoMouse::new().ok()?;
    let p = mouse.position().ok()?;
    Some((p.x as f64, p.y as f64))
}

fn ensure_listener(slot: &'static Slot) {
    static STARTED: Once = Once::new();
    STARTED.call_once(|| spawn_listener(slot));
}

fn spawn_listener(slot: &'static Slot) {
    let spawned = thread::Builder::new()
        .name("autoclick-listener".into())
        .spawn(move || {
            let mut tracker = PointerTracker::new(pointer_position);
            let result = rdev::listen(move |event: rdev::Event| {
                if let Some(input) = tracker.translate(&event.event_type) {
                    slot.deliver(input);
                }
            });
            if let Err(e) = result {
                tracing::error!(error = ?e, "mouse listener stopped");
                slot.fail(format!("{:?}", e));
            }
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to start mouse listener thread");
        slot.fail(e.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoclick_core::ErrorCode;
    use crossbeam_channel::unbounded;
    use std::cell::Cell;

    fn no_listener(_: &'static Slot) {}

    fn dead_listener(slot: &'static Slot) {
        slot.fail("no display".to_string());
    }

    #[test]
    fn press_before_any_move_reads_the_pointer() {
        let reads = Cell::new(0);
        let mut tracker = PointerTracker::new(|| {
            reads.set(reads.get() + 1);
            Some((640.0, 360.0))
        });

        let press = tracker.translate(&rdev::EventType::ButtonPress(rdev::Button::Left));
        assert_eq!(
            press,
            Some(Input::Press { x: 640.0, y: 360.0, button: MouseButton::Left })
        );
        let wheel = tracker.translate(&rdev::EventType::Wheel { delta_x: 0, delta_y: 2 });
        assert_eq!(wheel, Some(Input::Wheel { x: 640.0, y: 360.0, dx: 0, dy: 2 }));
        assert_eq!(reads.get(), 1);
    }

    #[test]
    fn moves_take_over_from_the_pointer_read() {
        let reads = Cell::new(0);
        let mut tracker = PointerTracker::new(|| {
            reads.set(reads.get() + 1);
            Some((1.0, 1.0))
        });
        tracker.translate(&rdev::EventType::MouseMove { x: 30.0, y: 40.0 });
        let press = tracker.translate(&rdev::EventType::ButtonPress(rdev::Button::Right));
        assert_eq!(
            press,
            Some(Input::Press { x: 30.0, y: 40.0, button: MouseButton::Right })
        );
        assert_eq!(reads.get(), 0);
    }

    #[test]
    fn unknown_position_never_defaults_to_the_origin() {
        let mut tracker = PointerTracker::new(|| None);
        assert_eq!(tracker.translate(&rdev::EventType::ButtonPress(rdev::Button::Left)), None);
        assert_eq!(
            tracker.translate(&rdev::EventType::ButtonPress(rdev::Button::Unknown(8))),
            None
        );
        assert_eq!(tracker.translate(&rdev::EventType::KeyPress(rdev::Key::KeyA)), None);
    }

    #[test]
    fn only_one_hook_owns_the_slot() {
        static TAKEN: Slot = Slot::new();
        let mut first = RdevHook::on_slot(&TAKEN, no_listener);
        let mut second = RdevHook::on_slot(&TAKEN, no_listener);

        first.attach(unbounded().0).unwrap();
        let err = second.attach(unbounded().0).unwrap_err();
        assert!(err.is(ErrorCode::InvalidState));
        assert!(first.attach(unbounded().0).unwrap_err().is(ErrorCode::InvalidState));

        first.detach();
        second.attach(unbounded().0).unwrap();
        drop(second);
        first.attach(unbounded().0).unwrap();
    }

    #[test]
    fn slot_forwards_to_the_attached_hook_only() {
        static FORWARD: Slot = Slot::new();
        let mut hook = RdevHook::on_slot(&FORWARD, no_listener);
        let (tx, rx) = unbounded();
        hook.attach(tx).unwrap();
        FORWARD.deliver(Input::Move { x: 1.0, y: 2.0 });
        assert_eq!(rx.try_recv().unwrap().input, Input::Move { x: 1.0, y: 2.0 });

        hook.detach();
        FORWARD.deliver(Input::Move { x: 3.0, y: 4.0 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dead_listener_is_reported() {
        static DEAD: Slot = Slot::new();
        let mut hook = RdevHook::on_slot(&DEAD, dead_listener);
        let err = hook.attach(unbounded().0).unwrap_err();
        assert!(err.is(ErrorCode::InputFailed));
        assert!(hook.failure().is_some());
        // the slot was not left claimed
        assert!(DEAD.sender.lock().is_none());
    }

    #[test]
    fn listener_dying_after_attach_is_visible() {
        static LATE: Slot = Slot::new();
        let mut hook = RdevHook::on_slot(&LATE, no_listener);
        hook.attach(unbounded().0).unwrap();
        assert!(hook.failure().is_none());
        LATE.fail("permission revoked".to_string());
        assert!(hook.failure().unwrap().is(ErrorCode::InputFailed));
    }
}
