//! Headless fly-through client for streamed CAD models.
//!
//! Loads a model manifest, then flies a scripted camera toward the model and
//! runs the streamer once per frame, logging what gets loaded, cancelled and
//! evicted along the way.

mod camera;
mod loader;
mod synthetic;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use cadstream::{
    Budget, FileFetcher, HttpFetcher, ModelId, SectorFetcher, SectorStreamer, StreamerConfig,
    StreamerEvent,
};
use clap::{Parser, Subcommand};
use tokio::runtime::{Handle, Runtime};

use crate::camera::{CameraSettings, FlightCamera};
use crate::loader::{ManifestLoader, ModelSource};
use crate::synthetic::SyntheticSpec;

#[derive(Parser, Debug)]
#[command(name = "cadstream-client")]
#[command(about = "Fly a scripted camera through a streamed CAD model")]
struct CliArgs {
    /// JSON streamer config; environment overrides apply on top.
    #[arg(long, env = "CADSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Override the geometry budget in MiB.
    #[arg(long)]
    budget_mib: Option<u64>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Stream a model from a directory or an HTTP base URL.
    Stream {
        source: String,
        #[arg(long, default_value_t = 1)]
        model: u64,
        #[arg(long, default_value_t = 1)]
        revision: u64,
        #[arg(long, default_value_t = 600)]
        frames: u32,
    },
    /// Write a synthetic model to a directory.
    Generate {
        out: PathBuf,
        #[arg(long, default_value_t = 2)]
        depth: u32,
        #[arg(long, default_value_t = 200.0)]
        size: f64,
    },
    /// Generate a synthetic model in a temporary directory and stream it.
    Demo {
        #[arg(long, default_value_t = 3)]
        depth: u32,
        #[arg(long, default_value_t = 600)]
        frames: u32,
    },
}

const FRAME_TIME: Duration = Duration::from_millis(16);
const SYNTHETIC_MODEL: ModelId = ModelId::new(1, 1);

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = CliArgs::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: CliArgs) -> cadstream::Result<()> {
    let mut config = match &args.config {
        Some(path) => StreamerConfig::from_path(path)?.with_env_overrides()?,
        None => StreamerConfig::from_env()?,
    };
    if let Some(mib) = args.budget_mib {
        config.budget = Budget {
            geometry_download_size_bytes: mib.saturating_mul(1024 * 1024),
            ..config.budget
        };
    }

    match args.mode {
        Mode::Generate { out, depth, size } => {
            let generated = synthetic::generate(&out, SYNTHETIC_MODEL, SyntheticSpec { depth, size })?;
            println!(
                "Wrote model {} ({} sectors, {} detailed bytes) to {}",
                generated.model,
                generated.sectors,
                generated.detailed_bytes,
                generated.root.display()
            );
            Ok(())
        }
        Mode::Demo { depth, frames } => {
            let root = std::env::temp_dir().join("cadstream-demo");
            let spec = SyntheticSpec {
                depth,
                ..SyntheticSpec::default()
            };
            synthetic::generate(&root, SYNTHETIC_MODEL, spec)?;
            stream(&ModelSource::Directory(root), SYNTHETIC_MODEL, frames, config)
        }
        Mode::Stream {
            source,
            model,
            revision,
            frames,
        } => stream(
            &ModelSource::parse(&source),
            ModelId::new(model, revision),
            frames,
            config,
        ),
    }
}

fn stream(
    source: &ModelSource,
    model: ModelId,
    frames: u32,
    config: StreamerConfig,
) -> cadstream::Result<()> {
    let runtime = Runtime::new()?;
    let handle = runtime.handle().clone();
    match source {
        ModelSource::Directory(root) => {
            let streamer = SectorStreamer::new(FileFetcher::new(root), config, handle.clone())?;
            fly(streamer, &handle, source, model, frames)
        }
        ModelSource::Http(url) => {
            let streamer = SectorStreamer::new(HttpFetcher::new(url.as_str()), config, handle.clone())?;
            fly(streamer, &handle, source, model, frames)
        }
    }
}

/// The frame loop: bootstrap the manifest, then update and poll each frame.
fn fly<F: SectorFetcher>(
    mut streamer: SectorStreamer<F>,
    runtime: &Handle,
    source: &ModelSource,
    model: ModelId,
    frames: u32,
) -> cadstream::Result<()> {
    let events = streamer.subscribe();
    let mut manifest = ManifestLoader::start(runtime, source, model);
    let mut camera: Option<FlightCamera> = None;

    let mut frame = 0;
    while frame < frames {
        let started = Instant::now();

        let bootstrap = if camera.is_none() { manifest.poll() } else { None };
        if let Some(result) = bootstrap {
            let scene = streamer.add_model(model, &result?)?;
            let Some(root) = scene.root() else {
                tracing::warn!("Model {} has no sectors", model);
                return Ok(());
            };
            camera = Some(FlightCamera::framing(&root.bounds, CameraSettings::default()));
        }

        if let Some(camera) = camera.as_mut() {
            camera.advance(FRAME_TIME.as_secs_f64());
            let summary = streamer.update(&camera.state());
            streamer.poll();
            log_events(&events);

            if frame % 60 == 0 {
                let state = streamer.loading_state();
                tracing::info!(
                    "Frame {}: distance {:.1}m, {} resident sectors, {}/{} loaded, {} candidates",
                    frame,
                    camera.distance(),
                    streamer.components().sector_count(),
                    state.items_loaded,
                    state.items_requested,
                    summary.candidates
                );
            }
            frame += 1;
        }

        if let Some(remaining) = FRAME_TIME.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    let resident_bytes: u64 = streamer
        .loader()
        .resident()
        .map(|(_, loaded)| loaded.cost.download_size)
        .sum();
    tracing::info!(
        "Finished after {} frames: {} sectors resident, {} bytes",
        frames,
        streamer.components().sector_count(),
        resident_bytes
    );
    Ok(())
}

fn log_events(events: &async_channel::Receiver<StreamerEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            StreamerEvent::SectorLoaded { key, lod } => tracing::debug!("Loaded {} ({})", key, lod),
            StreamerEvent::SectorFailed { key, lod, error } => {
                tracing::warn!("Sector {} failed at {}: {}", key, lod, error);
            }
            StreamerEvent::SectorCancelled { key } => tracing::debug!("Cancelled {}", key),
            StreamerEvent::SectorEvicted { key } => tracing::debug!("Evicted {}", key),
            StreamerEvent::LoadingStateChanged(state) => tracing::trace!(
                "Loading: {}/{} ({})",
                state.items_loaded,
                state.items_requested,
                if state.is_loading { "busy" } else { "idle" }
            ),
        }
    }
}
