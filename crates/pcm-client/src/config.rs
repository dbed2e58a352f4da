use std::time::Duration;

use audio_output::{OutputConfig, RetryPolicy, StreamFormat};

use crate::cli::{Args, Backend};

#[derive(Clone, Debug)]
pub struct ClientPlayConfig {
    pub backend: Backend,
    pub device: Option<String>,
    pub format: StreamFormat,
    pub source_buffer: Duration,
    pub output: OutputConfig,
}

/// Backend to use when none is given on the command line.
pub fn resolve_backend(requested: Option<Backend>) -> Backend {
    requested.unwrap_or(if cfg!(target_os = "linux") {
        Backend::Alsa
    } else {
        Backend::Cpal
    })
}

/// Output tuning from the global flags.
pub fn output_config(args: &Args) -> OutputConfig {
    OutputConfig {
        max_buffer_time: Duration::from_millis(args.buffer_ms.max(1)),
        retry: RetryPolicy {
            interval: Duration::from_millis(args.retry_ms),
        },
        ..OutputConfig::default()
    }
}

pub fn play_config(args: &Args, rate: u32, channels: u16, source_buffer_ms: u64) -> ClientPlayConfig {
    ClientPlayConfig {
        backend: resolve_backend(args.backend),
        device: normalize_device_name(args.device.clone()),
        format: StreamFormat::new(rate, channels),
        source_buffer: Duration::from_millis(source_buffer_ms),
        output: output_config(args),
    }
}

pub fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
