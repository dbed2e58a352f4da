use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "pcm-client", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Output device: exact PCM name (e.g. `hw:0,0`) or substring of its description
    #[arg(long)]
    pub device: Option<String>,

    /// Host audio backend (defaults to ALSA on Linux, CPAL elsewhere)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Upper bound for the hardware buffer, in milliseconds (split into 4 periods)
    #[arg(long, default_value_t = 100)]
    pub buffer_ms: u64,

    /// Delay between retries when the device or the source is unavailable
    #[arg(long, default_value_t = 100)]
    pub retry_ms: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// ALSA PCM devices (Linux only)
    Alsa,
    /// CPAL default host
    Cpal,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play raw S16_LE interleaved PCM read from stdin
    Play {
        /// Sample rate of the input, in Hz
        #[arg(long, default_value_t = 48_000)]
        rate: u32,

        /// Channel count of the input
        #[arg(long, default_value_t = 2)]
        channels: u16,

        /// Input buffered ahead of the device, in milliseconds
        #[arg(long, default_value_t = 500)]
        source_buffer_ms: u64,
    },
}
