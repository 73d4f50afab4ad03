//! Jukebox runtime helpers.
//!
//! Provides device enumeration, single-file playback, and the long-running jukebox mode.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, Sender, bounded};
use uac_player::advance::{TrackAdvancer, spawn_advance_worker};
use uac_player::codec::SymphoniaDecoderFactory;
use uac_player::monitor::spawn_monitor;
use uac_player::output::{DeviceEvent, OutputDevice, OutputPort, PcmFormat};
use uac_player::persist::{JsonFileStore, KeyValueStore, MemoryStore};
use uac_player::pipeline::{Pipeline, PipelineHandle};
use uac_player::sink::{CpalSink, spawn_reconnect};
use uac_player::skip::spawn_skip_trigger;
use uac_player::storage::{FsStorage, Storage};
use uac_player::track::{PlaybackRequest, TrackReference};

use crate::config::JukeboxConfig;
use crate::touch::KeyboardSensor;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const PLAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_FADE_TIMEOUT: Duration = Duration::from_secs(3);

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let names = uac_player::device::list_devices(&host)?;
    if names.is_empty() {
        println!("(no output devices)");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

/// Play one file and return once the pipeline is idle again.
pub fn run_play(config: JukeboxConfig, path: &Path) -> Result<()> {
    let track = absolute_track(path)?;
    let pipeline = start_pipeline(&config)?;
    let handle = pipeline.handle();

    let needle = normalize_device_name(config.device.clone());
    let sink = CpalSink::open(
        needle.as_deref(),
        PcmFormat::DEFAULT,
        config.player.volume,
        handle.device_events(),
    )
    .context("open output device")?;
    tracing::info!(device = %sink.name(), "output device");
    handle
        .device_events()
        .send(DeviceEvent::Connected(sink.clone()))
        .map_err(|_| anyhow!("pipeline closed"))?;
    wait_connected(&handle, CONNECT_TIMEOUT)?;

    handle
        .submit(PlaybackRequest::new(track.clone()))
        .with_context(|| format!("submit {track}"))?;
    handle.wait_idle(Duration::MAX);

    let snapshot = handle.snapshot();
    if snapshot.requests_rejected > 0 || snapshot.sessions_aborted > 0 {
        bail!("could not play {track}; see log for details");
    }
    if !sink.drain(PLAY_DRAIN_TIMEOUT) {
        tracing::warn!("output did not drain in time");
    }
    pipeline.shutdown();
    Ok(())
}

/// Run the jukebox. With `install_ctrlc`, Ctrl-C stops it gracefully; otherwise it runs
/// until the process exits.
pub fn run_jukebox(config: JukeboxConfig, install_ctrlc: bool) -> Result<()> {
    let (_shutdown_tx, shutdown) = shutdown_signal(install_ctrlc)?;

    let storage: Arc<dyn Storage> = Arc::new(FsStorage);
    let store: Arc<dyn KeyValueStore> = match &config.state_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "resume pointer file");
            Arc::new(JsonFileStore::new(path))
        }
        None => {
            tracing::info!("no state file configured; resume pointer kept in memory");
            Arc::new(MemoryStore::default())
        }
    };

    let pipeline = start_pipeline(&config)?;
    let handle = pipeline.handle();

    let reconnect = spawn_reconnect(
        handle.clone(),
        normalize_device_name(config.device.clone()),
        config.player.volume,
        config.reconnect_interval,
    )?;
    let monitor = spawn_monitor(handle.clone(), config.monitor.clone())?;

    let advancer = TrackAdvancer::new(&config.advance, storage, store, handle.clone());
    let (advance, advance_worker) = spawn_advance_worker(advancer, &config.advance)?;
    let skip = if config.touch {
        let sensor = KeyboardSensor::spawn()?;
        Some(spawn_skip_trigger(
            Box::new(sensor),
            config.skip.clone(),
            advance,
        )?)
    } else {
        drop(advance);
        None
    };

    tracing::info!(
        dir = %config.advance.base_dir.display(),
        loop_enabled = config.advance.loop_enabled,
        touch = config.touch,
        "jukebox running"
    );
    if config.touch {
        tracing::info!("press Enter to skip");
    }

    let _ = shutdown.recv();
    tracing::info!("shutting down");

    if let Some(skip) = skip {
        skip.stop();
    }
    advance_worker.stop();
    if handle.stop() && !handle.wait_idle(SHUTDOWN_FADE_TIMEOUT) {
        tracing::warn!("session did not stop in time");
    }
    monitor.stop();
    reconnect.stop();
    pipeline.shutdown();
    Ok(())
}

fn start_pipeline(config: &JukeboxConfig) -> Result<Pipeline> {
    Pipeline::spawn(
        config.player.clone(),
        Arc::new(FsStorage),
        Arc::new(SymphoniaDecoderFactory),
        OutputPort::new(),
    )
    .context("start pipeline")
}

/// Ctrl-C fires the receiver once; a second Ctrl-C exits immediately.
fn shutdown_signal(install_ctrlc: bool) -> Result<(Sender<()>, Receiver<()>)> {
    let (tx, rx) = bounded(1);
    if install_ctrlc {
        let signal = tx.clone();
        ctrlc::set_handler(move || {
            if signal.try_send(()).is_err() {
                std::process::exit(130);
            }
        })
        .context("install Ctrl-C handler")?;
    }
    Ok((tx, rx))
}

fn wait_connected(handle: &PipelineHandle, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while !handle.port().is_connected() {
        if Instant::now() >= deadline {
            bail!("output device did not attach within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    Ok(())
}

fn absolute_track(path: &Path) -> Result<TrackReference> {
    let abs: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("resolve current directory")?
            .join(path)
    };
    if !abs.is_file() {
        bail!("{} is not a file", abs.display());
    }
    Ok(TrackReference::new(abs.to_string_lossy()))
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
