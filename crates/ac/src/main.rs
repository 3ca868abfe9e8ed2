//! ac - autoclick CLI
//!
//! Record and replay mouse input, and click on targets found by a vision
//! model or an image template.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use autoclick::prelude::*;
use autoclick::recorder::task::{self, TaskHandle};
use autoclick::screen::save_png;
use autoclick::{failsafe, Error, ErrorCode, Settings};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ac")]
#[command(about = "autoclick - mouse recording, replay and targeted clicking")]
#[command(version)]
struct Cli {
    /// Settings file (default: $CONFIG_DIR/autoclick/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    // === Recording ===
    /// Record mouse movements, clicks and scrolls
    Record {
        /// Output file (default: timestamped file in the recordings directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long)]
        label: Option<String>,
        /// Minimum pixels between recorded moves
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Play back a recording
    Playback {
        /// Recording file or stored recording name
        #[arg(short, long)]
        input: String,
        #[arg(short, long)]
        speed: Option<f64>,
        /// Replay only clicks and scrolls
        #[arg(long)]
        skip_moves: bool,
        /// Ignore recorded timing
        #[arg(long)]
        instant: bool,
        /// Skip the preparation pause
        #[arg(long)]
        no_delay: bool,
    },
    /// List stored recordings
    List,
    /// Show a recording
    Show {
        file: String,
        #[arg(long)]
        all: bool,
    },
    /// Delete a stored recording
    Delete {
        file: String,
    },

    // === Clicking ===
    /// Ask a vision model to find a described element, then click it
    AiClick {
        #[arg(short, long)]
        target: String,
        /// Search region as x,y,width,height
        #[arg(short, long)]
        region: Option<Region>,
    },
    /// Find a template image on screen and click it
    ImageClick {
        #[arg(short, long)]
        image: PathBuf,
        /// Match threshold in [0, 1]
        #[arg(short, long)]
        confidence: Option<f64>,
        #[arg(short, long)]
        region: Option<Region>,
        /// Successful iterations to perform
        #[arg(long, default_value = "1")]
        repeat: u32,
        /// Repeat until stopped or the image disappears
        #[arg(long)]
        unlimited: bool,
        /// Seconds between iterations
        #[arg(long, default_value = "0")]
        interval: f64,
        /// Keep searching while the image is missing
        #[arg(long)]
        retry: bool,
        /// Replay this recording instead of clicking
        #[arg(long)]
        playback: Option<String>,
        #[arg(long, default_value = "1.0")]
        playback_speed: f64,
    },
    /// Capture the screen to a PNG file
    Screenshot {
        #[arg(short, long, default_value = "screenshot.png")]
        output: PathBuf,
        #[arg(short, long)]
        region: Option<Region>,
    },
    /// Click repeatedly at a position
    Repeat {
        #[arg(long)]
        x: i32,
        #[arg(long)]
        y: i32,
        #[arg(long)]
        count: u32,
        /// Seconds between clicks
        #[arg(long, default_value = "1.0")]
        interval: f64,
        #[arg(long, default_value = "left")]
        button: MouseButton,
    },
}

#[derive(Serialize)]
struct Output<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Error>,
}

impl<T: Serialize> Output<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }
    fn err(e: Error) -> Output<()> {
        Output { success: false, data: None, error: Some(e) }
    }
}

fn print_json<T: Serialize>(output: &T) {
    match serde_json::to_string_pretty(output) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Error: failed to encode output: {}", e),
    }
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        if let Some(err) = e.downcast_ref::<Error>() {
            print_json(&Output::<()>::err(err.clone()));
        }
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let log_file = cli.log_file.clone().or_else(|| settings.logging.file.clone());
    init_logging(&cli.log_level, log_file.as_deref())?;
    failsafe::init(settings.failsafe);
    tracing::debug!(failsafe = ?settings.failsafe, "settings loaded");

    match cli.command {
        Commands::Record { output, label, threshold } => {
            record(&settings, output, label, threshold)
        }
        Commands::Playback { input, speed, skip_moves, instant, no_delay } => {
            playback(&settings, &input, speed, skip_moves, instant, no_delay)
        }
        Commands::List => list(),
        Commands::Show { file, all } => show(&file, all),
        Commands::Delete { file } => delete(&file),
        Commands::AiClick { target, region } => ai_click(&settings, target, region),
        Commands::ImageClick {
            image,
            confidence,
            region,
            repeat,
            unlimited,
            interval,
            retry,
            playback,
            playback_speed,
        } => {
            let repeat = if unlimited { Repeat::Unlimited } else { Repeat::Times(repeat) };
            image_click(
                &settings,
                &image,
                confidence,
                region,
                repeat,
                seconds(interval, "interval")?,
                retry,
                playback.as_deref(),
                playback_speed,
            )
        }
        Commands::Screenshot { output, region } => screenshot(&output, region),
        Commands::Repeat { x, y, count, interval, button } => {
            repeat_clicks(Point::new(x, y), count, seconds(interval, "interval")?, button)
        }
    }
}

/// stderr always, plus an uncoloured copy in `file` when given
fn init_logging(level: &str, file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = fmt::layer().with_writer(io::stderr).with_target(false);

    let file_layer = match file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let f = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_writer(std::sync::Mutex::new(f)).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()?;
    Ok(())
}

fn seconds(value: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        Error::invalid_query(format!(
            "{} must be a non-negative number of seconds, got {}",
            what, value
        ))
        .into()
    })
}

/// A path on disk, or a name in the recordings directory
fn load_recording(name: &str) -> Result<EventLog> {
    let path = Path::new(name);
    if path.exists() {
        return Ok(RecordingStorage::load_file(path)?);
    }
    Ok(RecordingStorage::new()?.load(name)?)
}

/// Stop the task on Ctrl+C and wait for it, logging its progress
fn wait_interruptible<T>(handle: TaskHandle<T>) -> Result<T> {
    let stop = handle.stop_signal();
    ctrlc::set_handler(move || {
        tracing::info!("stop requested");
        stop.stop();
    })?;
    Ok(handle.wait_with(|msg| tracing::info!("{}", msg))?)
}

// ── Recording ───────────────────────────────────────────────────────────────

fn record(
    settings: &Settings,
    output: Option<PathBuf>,
    label: Option<String>,
    threshold: Option<f64>,
) -> Result<()> {
    let mut config = RecorderConfig::from_settings(&settings.recorder);
    if let Some(t) = threshold {
        config.move_threshold = t.max(0.0);
    }
    config.label = label;

    let mut recorder = Recorder::system(config);
    recorder.start()?;
    eprintln!("Recording... press Enter or Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))?;
    let r = running.clone();
    std::thread::spawn(move || {
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_ok() {
            r.store(false, Ordering::SeqCst);
        }
    });

    let mut count = 0;
    while running.load(Ordering::SeqCst) {
        let n = recorder.poll()?;
        if n != count {
            count = n;
            eprint!("\r{} events", count);
            io::stderr().flush()?;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let log = recorder.stop()?;
    eprintln!("\n{} events recorded", log.len());
    let path = match output {
        Some(path) => {
            RecordingStorage::save_to(&log, &path)?;
            path
        }
        None => RecordingStorage::new()?.save(&log)?,
    };
    println!("Saved: {}", path.display());
    Ok(())
}

fn playback(
    settings: &Settings,
    input: &str,
    speed: Option<f64>,
    skip_moves: bool,
    instant: bool,
    no_delay: bool,
) -> Result<()> {
    let log = load_recording(input)?;
    let speed = speed.unwrap_or(settings.playback.speed);
    let start_delay = if no_delay {
        Duration::ZERO
    } else {
        Duration::from_millis(settings.playback.start_delay_ms)
    };
    eprintln!("Replaying {} events at {}x speed", log.len(), speed);

    let handle = task::spawn("playback", move |ctx| {
        let mut mouse = EnigoMouse::new()?;
        Replayer::new()
            .speed(speed)
            .skip_moves(skip_moves)
            .instant(instant)
            .start_delay(start_delay)
            .stop_signal(ctx.stop_signal().clone())
            .play(&log, &mut mouse)
    })?;
    let stats = wait_interruptible(handle)?;
    print_json(&Output::ok(stats));
    Ok(())
}

fn list() -> Result<()> {
    let storage = RecordingStorage::new()?;
    let files = storage.list()?;
    if files.is_empty() {
        println!("No recordings saved in {}", storage.path().display());
    } else {
        for f in files {
            println!("{}", f);
        }
    }
    Ok(())
}

fn show(file: &str, all: bool) -> Result<()> {
    let log = load_recording(file)?;
    let s = log.summary();
    if let Some(label) = &s.label {
        println!("Label: {}", label);
    }
    println!("Recorded: {}", s.recorded_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Events: {} over {:.2}s", s.events, s.duration_secs);
    println!("\nSummary: {} clicks, {} moves, {} scrolls", s.clicks, s.moves, s.scrolls);
    if all {
        for (i, e) in log.events().iter().enumerate() {
            let what = match e.kind {
                EventKind::Move => "move".to_string(),
                EventKind::Click { button } => format!("click {}", button),
                EventKind::Scroll { dx, dy } => format!("scroll {},{}", dx, dy),
            };
            println!("{:>5} {:>9.3}s {} at {}", i, e.timestamp, what, e.point());
        }
    }
    Ok(())
}

fn delete(file: &str) -> Result<()> {
    let storage = RecordingStorage::new()?;
    storage.delete(file)?;
    println!("Deleted: {}", file);
    Ok(())
}

// ── Clicking ────────────────────────────────────────────────────────────────

fn ai_click(settings: &Settings, target: String, region: Option<Region>) -> Result<()> {
    let resolver = Resolver::from_settings(ResolverKind::Description, settings)?;
    let mut clicker = Clicker::new(EnigoMouse::new()?, XcapScreen::new());
    let query = TargetQuery::description(target).in_region(region);
    let click = clicker.click_on_target(&resolver, &query)?;
    print_json(&Output::ok(click));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn image_click(
    settings: &Settings,
    image: &Path,
    confidence: Option<f64>,
    region: Option<Region>,
    repeat: Repeat,
    interval: Duration,
    retry: bool,
    playback: Option<&str>,
    playback_speed: f64,
) -> Result<()> {
    let mut settings = settings.clone();
    if let Some(c) = confidence {
        settings.template.threshold = c;
    }
    settings.validate()?;
    let resolver = Resolver::from_settings(ResolverKind::Template, &settings)?;

    let template = image::open(image)
        .map_err(|e| {
            Error::invalid_query(format!("Cannot read template {}: {}", image.display(), e))
        })?
        .to_rgba8();
    let on_found = match playback {
        Some(name) => OnFound::Replay {
            log: load_recording(name)?,
            speed: playback_speed,
        },
        None => OnFound::Click(MouseButton::Left),
    };
    let query = TargetQuery::template(template).in_region(region);

    let handle = task::spawn("image-click", move |ctx| {
        let mut clicker = Clicker::new(EnigoMouse::new()?, XcapScreen::new());
        ImageClickRoutine::new(query)
            .repeat(repeat)
            .interval(interval)
            .retry_on_not_found(retry)
            .on_found(on_found)
            .stop_signal(ctx.stop_signal().clone())
            .run(&mut clicker, &resolver, |msg| ctx.progress(msg))
    })?;
    let successes = wait_interruptible(handle)?;
    print_json(&Output::ok(serde_json::json!({ "successes": successes })));
    Ok(())
}

fn screenshot(output: &Path, region: Option<Region>) -> Result<()> {
    let screen = XcapScreen::new();
    let capture = match region {
        Some(r) => screen.capture_region(r)?,
        None => screen.capture()?,
    };
    save_png(&capture, output)?;
    print_json(&Output::ok(serde_json::json!({
        "path": output.display().to_string(),
        "width": capture.width(),
        "height": capture.height(),
    })));
    Ok(())
}

fn repeat_clicks(point: Point, count: u32, interval: Duration, button: MouseButton) -> Result<()> {
    if count == 0 {
        return Err(Error::new(ErrorCode::InvalidQuery, "count must be at least 1").into());
    }
    let handle = task::spawn("repeat", move |ctx| {
        let mut clicker = Clicker::new(EnigoMouse::new()?, XcapScreen::new());
        clicker.repeat_clicks(point, count, interval, button, Some(ctx.stop_signal()))
    })?;
    let clicks = wait_interruptible(handle)?;
    print_json(&Output::ok(serde_json::json!({ "clicks": clicks, "x": point.x, "y": point.y })));
    Ok(())
}
