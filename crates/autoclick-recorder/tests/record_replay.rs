use autoclick_core::{FailSafe, Mouse, MouseButton, Point, Result, ScreenSize};
use autoclick_recorder::hook::{Input, InputHook, Observation};
use autoclick_recorder::{EventKind, Recorder, RecordingStorage, Replayer};
use crossbeam_channel::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct ScriptHook(Arc<Mutex<Option<Sender<Observation>>>>);

impl ScriptHook {
    fn emit(&self, input: Input) {
        if let Some(tx) = self.0.lock().unwrap().as_ref() {
            tx.send(Observation::now(input)).unwrap();
        }
    }
}

impl InputHook for ScriptHook {
    fn attach(&mut self, tx: Sender<Observation>) -> Result<()> {
        *self.0.lock().unwrap() = Some(tx);
        Ok(())
    }

    fn detach(&mut self) {
        *self.0.lock().unwrap() = None;
    }
}

#[derive(Default)]
struct LogMouse {
    pos: Option<Point>,
    actions: Vec<String>,
}

impl Mouse for LogMouse {
    fn position(&self) -> Result<Point> {
        Ok(self.pos.unwrap_or(Point::new(400, 300)))
    }

    fn screen_size(&self) -> Result<ScreenSize> {
        Ok(ScreenSize::new(800, 600))
    }

    fn move_to(&mut self, point: Point) -> Result<()> {
        self.pos = Some(point);
        self.actions.push(format!("move {} {}", point.x, point.y));
        Ok(())
    }

    fn click(&mut self, button: MouseButton) -> Result<()> {
        self.actions.push(format!("click {}", button));
        Ok(())
    }

    fn scroll(&mut self, dx: i32, dy: i32) -> Result<()> {
        self.actions.push(format!("scroll {} {}", dx, dy));
        Ok(())
    }
}

#[test]
fn record_store_load_replay() {
    let hook = ScriptHook::default();
    let mut recorder = Recorder::new(hook.clone());
    recorder.start().unwrap();
    hook.emit(Input::Move { x: 100.0, y: 120.0 });
    std::thread::sleep(Duration::from_millis(20));
    hook.emit(Input::Press { x: 100.0, y: 120.0, button: MouseButton::Left });
    std::thread::sleep(Duration::from_millis(20));
    hook.emit(Input::Wheel { x: 100.0, y: 120.0, dx: 0, dy: -2 });
    hook.emit(Input::Move { x: 300.0, y: 200.0 });
    let log = recorder.stop().unwrap();
    assert_eq!(log.len(), 4);

    let dir = tempfile::tempdir().unwrap();
    let storage = RecordingStorage::with_dir(dir.path()).unwrap();
    let path = storage.save(&log).unwrap();
    let loaded = RecordingStorage::load_file(&path).unwrap();
    assert_eq!(loaded.events(), log.events());
    assert_eq!(loaded.events()[1].kind, EventKind::Click { button: MouseButton::Left });

    let mut mouse = LogMouse::default();
    let stats = Replayer::new()
        .speed(4.0)
        .with_failsafe(FailSafe::default())
        .play(&loaded, &mut mouse)
        .unwrap();
    assert_eq!((stats.moves, stats.clicks, stats.scrolls), (2, 1, 1));
    assert_eq!(
        mouse.actions,
        vec![
            "move 100 120",
            "move 100 120",
            "click left",
            "move 100 120",
            "scroll 0 -2",
            "move 300 200",
        ]
    );
}

#[test]
fn skip_moves_replays_only_clicks_and_scrolls() {
    let hook = ScriptHook::default();
    let mut recorder = Recorder::new(hook.clone());
    recorder.start().unwrap();
    for i in 0..50 {
        hook.emit(Input::Move { x: 10.0 + i as f64, y: 10.0 });
    }
    hook.emit(Input::Press { x: 59.0, y: 10.0, button: MouseButton::Middle });
    let log = recorder.stop().unwrap();

    let mut mouse = LogMouse::default();
    let stats = Replayer::new()
        .skip_moves(true)
        .instant(true)
        .with_failsafe(FailSafe::disabled())
        .play(&log, &mut mouse)
        .unwrap();
    assert_eq!(stats.skipped, 50);
    assert_eq!(mouse.actions, vec!["move 59 10", "click middle"]);
}
