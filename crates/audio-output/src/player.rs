//! Control surface: start/stop the playback worker and list devices.
//!
//! The controller never touches the device while the worker runs. Stopping signals the
//! worker, joins its thread, and only then closes the session the worker handed back.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::catalog::{self, OutputDeviceDescriptor};
use crate::config::OutputConfig;
use crate::contract::ChunkSource;
use crate::error::OutputError;
use crate::host::AudioHost;
use crate::session::DeviceSession;
use crate::status::{OutputStatusState, StatusSnapshot};
use crate::worker::{PlaybackWorker, StopSignal, stop_channel};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Running,
}

struct RunningWorker<H: AudioHost> {
    device: OutputDeviceDescriptor,
    stop: StopSignal,
    join: JoinHandle<Option<DeviceSession<H::Pcm>>>,
}

/// Output engine controller for one device at a time.
pub struct Player<H: AudioHost> {
    host: Arc<H>,
    source: Arc<dyn ChunkSource>,
    config: OutputConfig,
    status: Arc<OutputStatusState>,
    running: Option<RunningWorker<H>>,
}

impl<H: AudioHost> Player<H> {
    pub fn new(host: H, source: Arc<dyn ChunkSource>, config: OutputConfig) -> Self {
        Self {
            host: Arc::new(host),
            source,
            config,
            status: OutputStatusState::shared(),
            running: None,
        }
    }

    /// Output endpoints of the host.
    pub fn list_output_devices(&self) -> Vec<OutputDeviceDescriptor> {
        catalog::list_output_devices(self.host.as_ref())
    }

    /// Start playing to `device` on a dedicated thread.
    ///
    /// The device is opened by the worker, so an unavailable device does not fail here;
    /// the worker keeps retrying. A running worker is stopped first.
    pub fn start(&mut self, device: OutputDeviceDescriptor) -> Result<(), OutputError> {
        self.stop();

        let (stop, token) = stop_channel();
        let worker = PlaybackWorker::new(
            self.host.clone(),
            device.clone(),
            self.source.clone(),
            self.config.clone(),
            self.status.clone(),
        );
        let join = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || worker.run(token))?;

        tracing::info!(device = %device.id, name = %device.display_name, "playback started");
        self.running = Some(RunningWorker { device, stop, join });
        Ok(())
    }

    /// Stop the worker, wait for it, then close its session. Safe to call when stopped.
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.stop.stop();
        match running.join.join() {
            Ok(Some(mut session)) => {
                session.close();
                self.status.session_closed();
            }
            Ok(None) => {}
            Err(_) => tracing::error!(device = %running.device.id, "output worker panicked"),
        }
        tracing::info!(device = %running.device.id, "playback stopped");
    }

    pub fn state(&self) -> PlaybackState {
        if self.running.is_some() {
            PlaybackState::Running
        } else {
            PlaybackState::Stopped
        }
    }

    /// Device the worker is bound to, if running.
    pub fn device(&self) -> Option<&OutputDeviceDescriptor> {
        self.running.as_ref().map(|r| &r.device)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }
}

impl<H: AudioHost> Drop for Player<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::StreamFormat;
    use crate::host::EndpointHint;
    use crate::host::fake::{FakeEvent, FakeHost};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Always-available source recording the render delays it was asked for.
    struct ToneSource {
        delays: Mutex<Vec<(Duration, usize)>>,
    }

    impl ChunkSource for ToneSource {
        fn format(&self) -> StreamFormat {
            StreamFormat::new(48_000, 2)
        }

        fn request_chunk(&self, out: &mut [i16], render_delay: Duration, frames: usize) -> bool {
            self.delays.lock().unwrap().push((render_delay, frames));
            for (i, s) in out[..frames * 2].iter_mut().enumerate() {
                *s = (i % 64) as i16;
            }
            true
        }
    }

    fn tone() -> Arc<ToneSource> {
        Arc::new(ToneSource {
            delays: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn end_to_end_open_stream_and_stop() {
        let host = FakeHost::new();
        host.set_period_frames(512);
        host.set_write_delay(Duration::from_millis(2));
        let source = tone();
        let mut player = Player::new(host.clone(), source.clone(), OutputConfig::default());

        player.start(OutputDeviceDescriptor::named("default")).unwrap();
        assert_eq!(player.state(), PlaybackState::Running);
        std::thread::sleep(Duration::from_millis(60));
        player.stop();
        assert_eq!(player.state(), PlaybackState::Stopped);

        let events = host.events();
        assert_eq!(
            events[0],
            FakeEvent::Open {
                device: "default".to_string()
            }
        );
        assert!(matches!(
            events[1],
            FakeEvent::HwParams {
                channels: 2,
                rate_hz: 48_000,
                ..
            }
        ));
        assert_eq!(
            events[2],
            FakeEvent::SwParams {
                avail_min: 512,
                start_threshold: 512
            }
        );

        // Steady state alternates probe and write; the session ends with drain + close.
        let body = &events[3..events.len() - 2];
        assert!(body.len() >= 4);
        for pair in body.chunks(2) {
            assert!(matches!(pair[0], FakeEvent::Probe { .. }));
            if let Some(write) = pair.get(1) {
                assert_eq!(*write, FakeEvent::Write { frames: 512 });
            }
        }
        assert_eq!(&events[events.len() - 2..], &[FakeEvent::Drain, FakeEvent::Close]);

        // Backlog grows one period per write until the buffer is full.
        let mut last = 0;
        for e in body {
            if let FakeEvent::Probe { avail, delay } = *e {
                assert!(delay >= last);
                assert!(delay >= 0 && avail >= 0);
                last = delay;
            }
        }
        let requested = source.delays.lock().unwrap().clone();
        assert!(requested.iter().all(|(_, frames)| *frames == 512));
        assert_eq!(requested[1].0, Duration::from_micros(10_666));

        assert_eq!(host.open_handles(), 0);
        let after_stop = host.events().len();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(host.events().len(), after_stop);
    }

    #[test]
    fn stop_is_idempotent_and_safe_when_never_started() {
        let host = FakeHost::new();
        let mut player = Player::new(host.clone(), tone(), OutputConfig::default());
        player.stop();
        player.start(OutputDeviceDescriptor::named("default")).unwrap();
        player.stop();
        player.stop();
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn restart_switches_device() {
        let host = FakeHost::new();
        host.set_write_delay(Duration::from_millis(1));
        let mut player = Player::new(host.clone(), tone(), OutputConfig::default());

        player.start(OutputDeviceDescriptor::named("hw:0")).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        player.start(OutputDeviceDescriptor::named("hw:1")).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(player.device().map(|d| d.id.as_str()), Some("hw:1"));
        drop(player);

        let opened: Vec<String> = host
            .events()
            .into_iter()
            .filter_map(|e| match e {
                FakeEvent::Open { device } => Some(device),
                _ => None,
            })
            .collect();
        assert_eq!(opened, vec!["hw:0".to_string(), "hw:1".to_string()]);
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn unavailable_device_does_not_fail_start() {
        let host = FakeHost::new();
        host.fail_opens(usize::MAX);
        let mut player = Player::new(host.clone(), tone(), OutputConfig::default());
        player.start(OutputDeviceDescriptor::named("hw:9")).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        let status = player.status();
        assert!(status.open_failures >= 1);
        assert!(status.device.is_none());
        player.stop();
        assert_eq!(host.total_opened(), 0);
    }

    #[test]
    fn status_reports_negotiated_format_while_running() {
        let host = FakeHost::new();
        host.set_period_frames(256);
        host.set_rate_override(44_100);
        host.set_write_delay(Duration::from_millis(1));
        let mut player = Player::new(host, tone(), OutputConfig::default());
        player.start(OutputDeviceDescriptor::named("default")).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let status = player.status();
        assert_eq!(status.device.as_deref(), Some("default"));
        assert_eq!(status.sample_rate, Some(44_100));
        assert_eq!(status.period_frames, Some(256));
        assert!(status.frames_written >= 256);

        player.stop();
        assert!(player.status().device.is_none());
    }

    #[test]
    fn lists_only_output_devices() {
        let host = FakeHost::new();
        host.set_hints(vec![
            EndpointHint {
                name: Some("default".to_string()),
                description: Some("Default".to_string()),
                direction: None,
            },
            EndpointHint {
                name: Some("dsnoop".to_string()),
                description: Some("Capture".to_string()),
                direction: Some("Input".to_string()),
            },
        ]);
        let player = Player::new(host, tone(), OutputConfig::default());
        let devices = player.list_output_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "default");
    }
}
