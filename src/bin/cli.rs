//! CLI application for landmark initialization and tracking over image frames.
//!
//! Usage:
//!   face-track frame_000.png frame_001.png ...          # Auto-accept the first fit
//!   face-track frames/*.png --level high --json         # JSON line per frame
//!   face-track frames/*.png --anchors "70,80;130,80;100,110;80,130;120,130"

use std::path::{Path, PathBuf};

use clap::Parser;
use face_track::{
    DetectorSettings, FaceTracker, FrameOutput, GrayImage, InitState, Point, RustfaceDetector,
    Signal, TrackStatus, TrackerConfig, TrackingLevel, ANCHORS,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "face-track")]
#[command(
    author,
    version,
    about = "Facial landmark initialization and tracking",
    long_about = None
)]
struct Args {
    /// Frame images, in playback order
    #[arg(required = true)]
    frames: Vec<PathBuf>,

    /// Tracking level (low, medium, high); overrides the config file
    #[arg(short, long)]
    level: Option<TrackingLevel>,

    /// JSON tracker config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Face detector model path
    #[arg(long, default_value = "seeta_fd_frontal_v1.0.bin")]
    detector: PathBuf,

    /// Minimum face size for detection
    #[arg(long, default_value = "20")]
    min_face_size: u32,

    /// Reject the first fit and place the five anchors at "x,y;x,y;..."
    #[arg(long)]
    anchors: Option<String>,

    /// Output one JSON object per frame
    #[arg(short, long)]
    json: bool,

    /// Show debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&args) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn parse_anchors(list: &str) -> Result<Vec<Point>, String> {
    let points = list
        .split(';')
        .map(|pair| {
            let (x, y) = pair
                .trim()
                .split_once(',')
                .ok_or_else(|| format!("anchor '{pair}' is not of the form x,y"))?;
            let x: f32 = x.trim().parse().map_err(|_| format!("bad x coordinate in '{pair}'"))?;
            let y: f32 = y.trim().parse().map_err(|_| format!("bad y coordinate in '{pair}'"))?;
            Ok(Point::new(x, y))
        })
        .collect::<Result<Vec<_>, String>>()?;
    if points.len() != ANCHORS.len() {
        return Err(format!("expected {} anchors, got {}", ANCHORS.len(), points.len()));
    }
    Ok(points)
}

fn load_frame(path: &Path) -> Result<GrayImage, Box<dyn std::error::Error>> {
    Ok(GrayImage::from(image::open(path)?.to_luma8()))
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(level) = args.level {
        config.level = level;
    }
    let anchors = args.anchors.as_deref().map(parse_anchors).transpose()?;

    let settings = DetectorSettings {
        min_face_size: args.min_face_size,
        ..DetectorSettings::default()
    };
    let detector = RustfaceDetector::load(&args.detector, settings)?;
    let mut tracker = FaceTracker::with_defaults(config, Box::new(detector));

    for path in &args.frames {
        let frame = load_frame(path)?;
        let Some(output) = step(&mut tracker, frame, anchors.as_deref(), path) else {
            continue;
        };

        if args.json {
            println!("{}", serde_json::to_string(&output)?);
        } else {
            println!("{}", summarize(path, &output));
        }
    }

    let final_state = tracker.output();
    info!(
        frames = tracker.frame_index(),
        state = ?final_state.state,
        points = final_state.points.len(),
        "done"
    );
    Ok(())
}

/// Process one frame and answer a pending fit. Tracker errors are logged and
/// leave the run going; `None` means the frame produced no output.
fn step(
    tracker: &mut FaceTracker,
    frame: GrayImage,
    anchors: Option<&[Point]>,
    path: &Path,
) -> Option<FrameOutput> {
    let output = match tracker.process_frame(frame) {
        Ok(output) => output,
        Err(e) => {
            warn!(frame = %path.display(), error = %e, "frame failed");
            return None;
        }
    };

    if output.state == InitState::AwaitingDecision {
        if let Err(e) = decide(tracker, anchors) {
            warn!(frame = %path.display(), error = %e, "fit decision failed");
        }
    }
    Some(output)
}

/// Accept the pending fit, or reject it and replay the given anchor clicks.
fn decide(tracker: &mut FaceTracker, anchors: Option<&[Point]>) -> face_track::Result<()> {
    match anchors {
        None => tracker.handle(Signal::AcceptFit),
        Some(clicks) => {
            tracker.handle(Signal::RejectFit)?;
            for &click in clicks {
                tracker.handle(Signal::AnchorClick(click))?;
            }
            Ok(())
        }
    }
}

fn summarize(path: &Path, output: &FrameOutput) -> String {
    let mut s = format!("[{}] {}: {:?}", output.frame_index, path.display(), output.state);

    if let Some(face) = output.face {
        s.push_str(&format!(
            ", face {:.0}x{:.0} at ({:.0}, {:.0})",
            face.width, face.height, face.x, face.y
        ));
    }
    if output.fit_failed {
        s.push_str(", fit failed");
    }
    if let Some(report) = output.report {
        let tracked = output.points.iter().filter(|p| p.status == TrackStatus::Tracked).count();
        s.push_str(&format!(
            ", {} points ({} tracked, {} extrapolated, {} lost)",
            output.points.len(),
            tracked,
            report.extrapolated,
            report.lost
        ));
        if report.fallback_applied {
            s.push_str(", rigid fallback");
        }
    }
    s
}
