use anyhow::{Context, Result};
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use pose_coach::camera::{CameraSource, TestPatternCamera};
use pose_coach::catalog::PosesCatalog;
use pose_coach::client::HttpAnalysisClient;
use pose_coach::config::{CameraConfig, CameraSourceKind, Config};
use pose_coach::logging;
use pose_coach::sampler::FrameSampler;
use pose_coach::session::{Command, Session};

const CONFIG_PATH: &str = "pose_coach.toml";
const LOG_DIR: &str = "logs";

/// One line typed at the console.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Session(Command),
    ListPoses,
    Show,
    Help,
    Empty,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        [] => Input::Empty,
        ["a"] | ["auto"] => Input::Session(Command::Auto),
        ["m"] | ["manual"] => Input::Session(Command::Manual),
        ["p", pose] | ["pose", pose] => Input::Session(Command::SelectPose(pose.to_string())),
        ["l"] | ["list"] => Input::ListPoses,
        ["s"] | ["show"] => Input::Show,
        ["h"] | ["help"] | ["?"] => Input::Help,
        ["q"] | ["quit"] => Input::Session(Command::Quit),
        _ => Input::Unknown(line.trim().to_string()),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  a         - auto mode (service picks the pose)");
    println!("  m         - manual mode");
    println!("  p <pose>  - select target pose (manual mode)");
    println!("  l         - list poses");
    println!("  s         - show current feedback");
    println!("  q         - quit");
}

fn open_camera(config: &CameraConfig) -> Option<Box<dyn CameraSource>> {
    match config.source {
        CameraSourceKind::TestPattern => {
            info!("[camera] test pattern {}x{}", config.width, config.height);
            Some(Box::new(TestPatternCamera::new(config.width, config.height)))
        }
        CameraSourceKind::Device => open_device(config),
    }
}

#[cfg(feature = "desktop")]
fn open_device(config: &CameraConfig) -> Option<Box<dyn CameraSource>> {
    use pose_coach::camera::ThreadedCamera;

    match ThreadedCamera::start(config.index, Some(config.width), Some(config.height)) {
        Ok(camera) => Some(Box::new(camera)),
        Err(e) => {
            tracing::error!("[camera] {e}; continuing without video");
            None
        }
    }
}

#[cfg(not(feature = "desktop"))]
fn open_device(_config: &CameraConfig) -> Option<Box<dyn CameraSource>> {
    warn!("[camera] built without the `desktop` feature, no device capture; set camera.source = \"test-pattern\"");
    None
}

/// Reads console lines on a plain thread and forwards them.
///
/// The thread is detached: a blocking read cannot be interrupted, and the
/// process exits without waiting for it once `main` returns.
fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_path = logging::init(LOG_DIR)?;
    info!("Pose Coach ({})", env!("GIT_VERSION"));
    info!("Log: {}", log_path.display());

    let config = Config::load_or_default(CONFIG_PATH)
        .with_env_overrides()
        .context("invalid environment override")?;
    info!(
        "[config] service={} interval={}ms jpeg_quality={} stale_results={:?}",
        config.service.base_url,
        config.sampler.interval_ms,
        config.sampler.jpeg_quality,
        config.sampler.stale_results
    );

    let client = Arc::new(
        HttpAnalysisClient::new(&config.service.base_url, config.service.request_timeout())
            .context("failed to build HTTP client")?,
    );
    let catalog = PosesCatalog::load(client.as_ref()).await;

    let sampler = FrameSampler::new(open_camera(&config.camera), config.sampler.jpeg_quality);
    let session = Session::new(
        sampler,
        client,
        catalog.clone(),
        config.sampler.interval(),
        config.sampler.stale_results,
    );

    let current = session.subscribe();
    let mut updates = session.subscribe();
    let (commands, rx) = mpsc::channel(16);
    let session_task = tokio::spawn(session.run(rx));

    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let text = updates.borrow_and_update().render_text();
            println!("{text}");
        }
    });

    print_help();
    println!();
    println!("{}", current.borrow().render_text());

    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match parse_input(&line) {
            Input::Session(Command::Quit) => break,
            Input::Session(command) => {
                if commands.send(command).await.is_err() {
                    warn!("session already stopped");
                    break;
                }
            }
            Input::ListPoses if catalog.is_empty() => println!("No poses available"),
            Input::ListPoses => {
                for pose in catalog.poses() {
                    println!("  {pose}");
                }
            }
            Input::Show => println!("{}", current.borrow().render_text()),
            Input::Help => print_help(),
            Input::Empty => {}
            Input::Unknown(text) => println!("Unknown command: {text}"),
        }
    }

    info!("Shutting down...");
    let _ = commands.send(Command::Quit).await;
    // the camera is released when the session, which owns it, finishes
    let state = session_task.await.context("session task failed")?;
    printer.abort();
    info!("Final mode: {} pose: {:?}", state.mode(), state.pose());
    Ok(())
}
