#[cfg(target_os = "linux")]
pub mod alsa_host;
pub mod catalog;
pub mod config;
pub mod contract;
pub mod cpal_host;
pub mod error;
pub mod host;
pub mod player;
pub mod queue;
pub mod session;
pub mod source;
pub mod status;
pub mod worker;

pub use catalog::{OutputDeviceDescriptor, find_output_device, list_output_devices};
pub use config::{OutputConfig, RetryPolicy};
pub use contract::{ChunkSource, StreamFormat, render_delay};
pub use error::OutputError;
pub use player::{PlaybackState, Player};
pub use status::StatusSnapshot;
