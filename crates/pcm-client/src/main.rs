//! PCM client: plays raw S16_LE PCM from stdin on a local output device.
//!
//! Playback runs on a dedicated output thread that keeps the device fed one period at a
//! time, recovers from underruns and reopens the device after it disappears.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pcm_client::{cli, config, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_output=info,pcm_client=info")
        }))
        .with_writer(std::io::stderr)
        .init();

    let backend = config::resolve_backend(args.backend);
    if args.list_devices {
        return runtime::list_devices(backend);
    }

    match &args.cmd {
        Some(cli::Command::Play {
            rate,
            channels,
            source_buffer_ms,
        }) => runtime::run_play(config::play_config(&args, *rate, *channels, *source_buffer_ms)),
        None => anyhow::bail!("nothing to do: pass --list-devices or the `play` subcommand"),
    }
}
