//! CPAL output device discovery and stream config selection.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{PlayerError, Result};
use crate::output::PcmFormat;

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default device when no needle is given.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let devices = host.output_devices().map_err(device_err)?;
        for d in devices {
            if device_name(&d).is_some_and(|n| matches_device_name(&n, needle)) {
                return Ok(d);
            }
        }
        return Err(PlayerError::Device(format!(
            "no output device matched: {needle}"
        )));
    }

    host.default_output_device()
        .ok_or_else(|| PlayerError::Device("no default output device".into()))
}

pub fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|d| d.name().to_string())
}

/// Stream config for `format`. The sample rate must be supported exactly; among the ranges
/// that support it, the closest channel layout wins, then the preferred sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    format: PcmFormat,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges = device.supported_output_configs().map_err(device_err)?;

    let mut best: Option<(u8, u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        if !(range.min_sample_rate()..=range.max_sample_rate()).contains(&format.sample_rate) {
            continue;
        }
        let channels = channel_rank(range.channels(), format.channels);
        let sample_format = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_channels, b_format, _)) => {
                is_better_candidate(channels, sample_format, *b_channels, *b_format)
            }
        };
        if replace {
            best = Some((
                channels,
                sample_format,
                range.with_sample_rate(format.sample_rate),
            ));
        }
    }

    best.map(|(_, _, cfg)| cfg).ok_or_else(|| {
        PlayerError::Device(format!(
            "device does not support {} Hz (no sample-rate conversion)",
            format.sample_rate
        ))
    })
}

/// Prefer a fixed buffer size (capped) when the device advertises a range.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const MAX_FRAMES: u32 = 4_096;
            let chosen = if *max > MAX_FRAMES {
                (*min).max(MAX_FRAMES)
            } else {
                *max
            };
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of all output devices, in host order.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host.output_devices().map_err(device_err)?;
    Ok(devices
        .map(|d| device_name(&d).unwrap_or_else(|| "<unnamed>".to_string()))
        .collect())
}

fn channel_rank(device_channels: u16, source_channels: u16) -> u8 {
    match (source_channels, device_channels) {
        (s, d) if s == d => 0,
        (1, 2) => 1,
        (2, 1) => 2,
        _ => 3,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I16 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(channels: u8, format: u8, best_channels: u8, best_format: u8) -> bool {
    if channels != best_channels {
        channels < best_channels
    } else {
        format < best_format
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

fn device_err(err: impl std::fmt::Display) -> PlayerError {
    PlayerError::Device(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn channel_rank_prefers_exact_then_upmix() {
        assert_eq!(channel_rank(2, 2), 0);
        assert_eq!(channel_rank(2, 1), 1);
        assert_eq!(channel_rank(1, 2), 2);
        assert_eq!(channel_rank(6, 2), 3);
    }

    #[test]
    fn is_better_candidate_prefers_channel_match_over_format() {
        assert!(is_better_candidate(0, 3, 1, 0));
        assert!(!is_better_candidate(1, 0, 0, 3));
    }

    #[test]
    fn is_better_candidate_prefers_lower_format_rank() {
        assert!(is_better_candidate(0, 0, 0, 1));
        assert!(!is_better_candidate(0, 2, 0, 1));
    }
}
