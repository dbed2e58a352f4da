//! Client runtime: device listing and stdin playback.

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use audio_output::cpal_host::CpalHost;
use audio_output::host::AudioHost;
use audio_output::queue::SampleQueue;
use audio_output::source::QueuedSource;
use audio_output::{OutputDeviceDescriptor, PlaybackState, Player, find_output_device, list_output_devices};

use crate::cli::Backend;
use crate::config::ClientPlayConfig;

const DEFAULT_DEVICE: &str = "default";
const READ_CHUNK_BYTES: usize = 16 * 1024;

/// Print the output devices of `backend` to stdout.
pub fn list_devices(backend: Backend) -> Result<()> {
    match backend {
        Backend::Cpal => print_devices(&CpalHost::default()),
        #[cfg(target_os = "linux")]
        Backend::Alsa => print_devices(&audio_output::alsa_host::AlsaHost),
        #[cfg(not(target_os = "linux"))]
        Backend::Alsa => anyhow::bail!("the ALSA backend is only available on Linux"),
    }
}

fn print_devices<H: AudioHost>(host: &H) -> Result<()> {
    for device in list_output_devices(host) {
        println!("#{}: {}", device.ordinal, device.id);
        for line in device.display_name.lines() {
            println!("    {line}");
        }
    }
    Ok(())
}

/// Play raw S16_LE PCM from stdin until EOF.
pub fn run_play(config: ClientPlayConfig) -> Result<()> {
    match config.backend {
        Backend::Cpal => {
            let host = CpalHost::new(config.output.cpal_queue_periods);
            play_stdin(host, config)
        }
        #[cfg(target_os = "linux")]
        Backend::Alsa => play_stdin(audio_output::alsa_host::AlsaHost, config),
        #[cfg(not(target_os = "linux"))]
        Backend::Alsa => anyhow::bail!("the ALSA backend is only available on Linux"),
    }
}

fn play_stdin<H: AudioHost>(host: H, config: ClientPlayConfig) -> Result<()> {
    let device = select_device(&host, config.device.as_deref());
    tracing::info!(
        device = %device.id,
        rate_hz = config.format.sample_rate_hz,
        channels = config.format.channels,
        "source (stdin, S16_LE)"
    );

    let source = Arc::new(QueuedSource::new(config.format, config.source_buffer));
    let queue = source.queue();
    let player = Arc::new(Mutex::new(Player::new(host, source, config.output.clone())));

    {
        let player = player.clone();
        let queue = queue.clone();
        let _ = ctrlc::set_handler(move || {
            queue.close();
            if let Ok(mut p) = player.lock() {
                p.stop();
            }
            std::process::exit(130);
        });
    }

    player
        .lock()
        .map_err(|_| anyhow::anyhow!("player lock poisoned"))?
        .start(device)
        .context("start output")?;

    let fed = feed_stdin(&queue);
    queue.close();
    let frames = fed.context("read stdin")?;
    tracing::info!(frames, "input finished; draining");

    while !queue.wait_until_empty(Duration::from_millis(200)) {
        let running = player
            .lock()
            .map(|p| p.state() == PlaybackState::Running)
            .unwrap_or(false);
        if !running {
            break;
        }
    }

    let mut player = player
        .lock()
        .map_err(|_| anyhow::anyhow!("player lock poisoned"))?;
    player.stop();
    let status = player.status();
    tracing::info!(
        frames_written = status.frames_written,
        underruns = status.underrun_events,
        reopens = status.opens.saturating_sub(1),
        chunk_misses = status.chunk_misses,
        "playback finished"
    );
    Ok(())
}

fn select_device<H: AudioHost>(host: &H, needle: Option<&str>) -> OutputDeviceDescriptor {
    let Some(needle) = needle else {
        return OutputDeviceDescriptor::named(DEFAULT_DEVICE);
    };
    find_output_device(host, needle).unwrap_or_else(|| {
        // Device strings like `plughw:1,0` are valid without being listed as hints.
        tracing::warn!(device = %needle, "device not listed; opening by name");
        OutputDeviceDescriptor::named(needle)
    })
}

/// Copy stdin into `queue` until EOF or until the queue is closed. Returns frames fed.
fn feed_stdin(queue: &SampleQueue) -> Result<u64> {
    let mut stdin = std::io::stdin().lock();
    let mut bytes = vec![0u8; READ_CHUNK_BYTES];
    let mut samples = Vec::with_capacity(READ_CHUNK_BYTES / 2);
    let mut carry = None;
    let mut fed = 0u64;

    loop {
        let n = match stdin.read(&mut bytes) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        samples.clear();
        decode_s16le(&mut carry, &bytes[..n], &mut samples);
        let pushed = queue.push_blocking(&samples);
        fed += (pushed / queue.channels()) as u64;
        if pushed < samples.len() {
            break;
        }
    }
    Ok(fed)
}

/// Append little-endian `i16` samples from `bytes`, keeping an odd trailing byte in `carry`.
fn decode_s16le(carry: &mut Option<u8>, bytes: &[u8], out: &mut Vec<i16>) {
    let mut rest = bytes;
    if let Some(lo) = carry.take() {
        match rest.split_first() {
            Some((hi, tail)) => {
                out.push(i16::from_le_bytes([lo, *hi]));
                rest = tail;
            }
            None => {
                *carry = Some(lo);
                return;
            }
        }
    }
    let pairs = rest.chunks_exact(2);
    if let [odd] = pairs.remainder() {
        *carry = Some(*odd);
    }
    out.extend(pairs.map(|p| i16::from_le_bytes([p[0], p[1]])));
}
