//! Configuration loading and parsing.
//!
//! The TOML file is optional and every key in it is optional. Values resolve in the order
//! CLI flag, config file, built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use uac_player::config::{AdvanceConfig, MonitorConfig, PlayerConfig, SkipConfig};

use crate::cli::Args;

const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// Top-level jukebox configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Directory scanned for tracks.
    pub media_dir: Option<String>,
    /// Output device substring.
    pub device: Option<String>,
    /// Resume pointer file.
    pub state_file: Option<String>,
    /// Start over after the last track.
    #[serde(rename = "loop")]
    pub loop_playback: Option<bool>,
    /// Output volume, 0-100.
    pub volume: Option<u8>,
    /// Keyboard skip trigger.
    pub touch: Option<bool>,
    /// Idle check period of the advance worker.
    pub advance_interval_ms: Option<u64>,
    /// Diagnostics report period.
    pub monitor_interval_secs: Option<u64>,
    /// Device reopen period while disconnected.
    pub reconnect_interval_ms: Option<u64>,
    pub pipeline: Option<PipelineSection>,
    pub skip: Option<SkipSection>,
}

/// `[pipeline]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    pub queue_capacity: Option<usize>,
    pub header_chunk_kib: Option<usize>,
    pub input_chunk_kib: Option<usize>,
    pub max_output_kib: Option<usize>,
    pub fade_step: Option<u8>,
    pub fade_step_delay_ms: Option<u64>,
    pub settle_delay_ms: Option<u64>,
}

/// `[skip]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkipSection {
    pub poll_interval_ms: Option<u64>,
    pub threshold: Option<u32>,
    pub debounce_ms: Option<u64>,
}

impl FileConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<FileConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct JukeboxConfig {
    pub device: Option<String>,
    pub state_file: Option<PathBuf>,
    pub touch: bool,
    pub reconnect_interval: Duration,
    pub player: PlayerConfig,
    pub advance: AdvanceConfig,
    pub skip: SkipConfig,
    pub monitor: MonitorConfig,
}

/// Merge CLI flags over the config file over defaults.
pub fn resolve(file: FileConfig, args: &Args) -> Result<JukeboxConfig> {
    let mut player = PlayerConfig::default();
    if let Some(p) = file.pipeline {
        if let Some(v) = p.queue_capacity {
            if v == 0 {
                bail!("pipeline.queue_capacity must be at least 1");
            }
            player.queue_capacity = v;
        }
        if let Some(v) = p.header_chunk_kib {
            player.header_chunk_bytes = kib(v, "pipeline.header_chunk_kib")?;
        }
        if let Some(v) = p.input_chunk_kib {
            player.input_chunk_bytes = kib(v, "pipeline.input_chunk_kib")?;
        }
        if let Some(v) = p.max_output_kib {
            player.max_output_bytes = kib(v, "pipeline.max_output_kib")?;
        }
        if let Some(v) = p.fade_step {
            player.fade_step = v.max(1);
        }
        if let Some(v) = p.fade_step_delay_ms {
            player.fade_step_delay = Duration::from_millis(v);
        }
        if let Some(v) = p.settle_delay_ms {
            player.settle_delay = Duration::from_millis(v);
        }
    }
    if player.max_output_bytes < player.initial_output_bytes {
        bail!(
            "pipeline.max_output_kib must be at least {} KiB",
            player.initial_output_bytes / 1024
        );
    }
    if let Some(v) = args.volume.or(file.volume) {
        if v > 100 {
            bail!("volume must be 0-100, got {v}");
        }
        player.volume = v;
    }

    let mut advance = AdvanceConfig::default();
    if let Some(dir) = args
        .media_dir
        .clone()
        .or_else(|| file.media_dir.map(PathBuf::from))
    {
        advance.base_dir = dir;
    }
    advance.loop_enabled = !args.no_loop && file.loop_playback.unwrap_or(true);
    if let Some(ms) = file.advance_interval_ms {
        advance.interval = Duration::from_millis(ms.max(1));
    }

    let mut skip = SkipConfig::default();
    if let Some(s) = file.skip {
        if let Some(ms) = s.poll_interval_ms {
            skip.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(v) = s.threshold {
            skip.threshold = v;
        }
        if let Some(ms) = s.debounce_ms {
            skip.debounce = Duration::from_millis(ms);
        }
    }

    let mut monitor = MonitorConfig::default();
    if let Some(secs) = file.monitor_interval_secs {
        monitor.interval = Duration::from_secs(secs.max(1));
    }

    Ok(JukeboxConfig {
        device: args.device.clone().or(file.device),
        state_file: args
            .state_file
            .clone()
            .or_else(|| file.state_file.map(PathBuf::from)),
        touch: !args.no_touch && file.touch.unwrap_or(true),
        reconnect_interval: file
            .reconnect_interval_ms
            .map(|ms| Duration::from_millis(ms.max(1)))
            .unwrap_or(DEFAULT_RECONNECT_INTERVAL),
        player,
        advance,
        skip,
        monitor,
    })
}

fn kib(value: usize, key: &str) -> Result<usize> {
    if value == 0 {
        bail!("{key} must be at least 1");
    }
    value
        .checked_mul(1024)
        .with_context(|| format!("{key} is too large"))
}
