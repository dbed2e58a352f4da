//! Output device discovery and selection.
//!
//! Thin layer over [`AudioHost::endpoint_hints`] for:
//! - listing the endpoints usable for playback
//! - selecting a device by id or by substring match

use crate::host::{AudioHost, EndpointHint};

/// Output endpoint usable as a session target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputDeviceDescriptor {
    /// PCM name passed to the host when opening the device.
    pub id: String,
    /// Human description (falls back to the id).
    pub display_name: String,
    /// Zero-based position among the listed output devices.
    pub ordinal: usize,
}

impl OutputDeviceDescriptor {
    /// Descriptor for a device known only by name (for example `default`).
    pub fn named(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            ordinal: 0,
        }
    }
}

/// Return every endpoint usable for output, in discovery order.
///
/// Enumeration failures are logged and reported as an empty list.
pub fn list_output_devices<H: AudioHost>(host: &H) -> Vec<OutputDeviceDescriptor> {
    match host.endpoint_hints() {
        Ok(hints) => filter_output_hints(hints),
        Err(e) => {
            tracing::warn!("device enumeration failed: {e}");
            Vec::new()
        }
    }
}

/// Keep hints without a direction tag or tagged `Output`, and number them.
pub fn filter_output_hints(hints: impl IntoIterator<Item = EndpointHint>) -> Vec<OutputDeviceDescriptor> {
    hints
        .into_iter()
        .filter(|h| h.direction.as_deref().is_none_or(|io| io == "Output"))
        .filter_map(|h| {
            let id = h.name?;
            let display_name = h.description.unwrap_or_else(|| id.clone());
            Some((id, display_name))
        })
        .enumerate()
        .map(|(ordinal, (id, display_name))| OutputDeviceDescriptor {
            id,
            display_name,
            ordinal,
        })
        .collect()
}

/// Pick an output device by exact id, or the first whose id or description contains
/// `needle` (case-insensitive).
pub fn find_output_device<H: AudioHost>(host: &H, needle: &str) -> Option<OutputDeviceDescriptor> {
    let devices = list_output_devices(host);
    if let Some(exact) = devices.iter().find(|d| d.id == needle) {
        return Some(exact.clone());
    }
    devices
        .into_iter()
        .find(|d| matches_device_name(&d.id, needle) || matches_device_name(&d.display_name, needle))
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    fn hint(name: &str, desc: &str, io: Option<&str>) -> EndpointHint {
        EndpointHint {
            name: Some(name.to_string()),
            description: Some(desc.to_string()),
            direction: io.map(str::to_string),
        }
    }

    #[test]
    fn input_endpoints_are_never_listed() {
        let devices = filter_output_hints(vec![
            hint("dsnoop:CARD=PCH", "Direct sample snooping", Some("Input")),
            hint("default", "Default ALSA Output", None),
            hint("hw:CARD=PCH,DEV=0", "HDA Intel PCH", Some("Output")),
        ]);
        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["default", "hw:CARD=PCH,DEV=0"]);
    }

    #[test]
    fn ordinals_count_only_kept_entries() {
        let devices = filter_output_hints(vec![
            hint("a", "A", Some("Input")),
            hint("b", "B", None),
            hint("c", "C", Some("Input")),
            hint("d", "D", Some("Output")),
        ]);
        assert_eq!(devices[0].ordinal, 0);
        assert_eq!(devices[0].id, "b");
        assert_eq!(devices[1].ordinal, 1);
        assert_eq!(devices[1].id, "d");
    }

    #[test]
    fn nameless_hints_are_skipped_and_description_falls_back_to_id() {
        let devices = filter_output_hints(vec![
            EndpointHint {
                name: None,
                description: Some("ghost".to_string()),
                direction: None,
            },
            EndpointHint {
                name: Some("null".to_string()),
                description: None,
                direction: None,
            },
        ]);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].display_name, "null");
        assert_eq!(devices[0].ordinal, 0);
    }

    #[test]
    fn enumeration_failure_is_an_empty_list() {
        let host = FakeHost::new();
        host.fail_enumeration();
        assert!(list_output_devices(&host).is_empty());
    }

    #[test]
    fn find_prefers_exact_id_then_substring() {
        let host = FakeHost::new();
        host.set_hints(vec![
            hint("hw:CARD=USB,DEV=0", "USB DAC", Some("Output")),
            hint("default", "Default Audio Device", None),
        ]);
        assert_eq!(find_output_device(&host, "default").unwrap().id, "default");
        assert_eq!(find_output_device(&host, "usb dac").unwrap().ordinal, 0);
        assert!(find_output_device(&host, "speaker").is_none());
        assert!(find_output_device(&host, "  ").is_none());
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }
}
