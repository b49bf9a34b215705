//! Device list policy.

use vmbundle_protocol::{DeviceSpec, NetworkAttachment};

/// Geometry of the guest display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    /// Width in pixels.
    pub width_pixels: u32,
    /// Height in pixels.
    pub height_pixels: u32,
    /// Pixel density.
    pub pixels_per_inch: u32,
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self {
            width_pixels: 1920,
            height_pixels: 1200,
            pixels_per_inch: 80,
        }
    }
}

/// Which devices a machine gets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePolicy {
    /// Display geometry.
    pub display: DisplayGeometry,
    /// Attach the host's audio input.
    pub audio_input: bool,
}

impl Default for DevicePolicy {
    fn default() -> Self {
        Self {
            display: DisplayGeometry::default(),
            audio_input: true,
        }
    }
}

impl DevicePolicy {
    /// Build the device list for a machine booting from `disk_image`.
    ///
    /// Every device produced here can be saved and restored.
    pub fn devices(&self, disk_image: &str) -> Vec<DeviceSpec> {
        vec![
            DeviceSpec::Storage {
                path: disk_image.to_owned(),
                read_only: false,
            },
            DeviceSpec::Network {
                attachment: NetworkAttachment::Nat,
            },
            DeviceSpec::Display {
                width_pixels: self.display.width_pixels,
                height_pixels: self.display.height_pixels,
                pixels_per_inch: self.display.pixels_per_inch,
            },
            DeviceSpec::Audio {
                input: self.audio_input,
                output: true,
            },
            DeviceSpec::Keyboard,
            DeviceSpec::Pointing,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_devices() {
        let devices = DevicePolicy::default().devices("/vm/Disk.img");
        let kinds: Vec<_> = devices.iter().map(DeviceSpec::kind).collect();
        assert_eq!(
            kinds,
            ["storage", "network", "display", "audio", "keyboard", "pointing"]
        );
        assert_eq!(
            devices[0],
            DeviceSpec::Storage {
                path: "/vm/Disk.img".into(),
                read_only: false
            }
        );
        assert!(devices.iter().all(DeviceSpec::supports_save_restore));
    }

    #[test]
    fn test_policy_devices_saveable() {
        let policy = DevicePolicy {
            audio_input: false,
            display: DisplayGeometry {
                width_pixels: 2560,
                height_pixels: 1600,
                pixels_per_inch: 144,
            },
        };
        let devices = policy.devices("/vm/Disk.img");
        assert!(devices.contains(&DeviceSpec::Audio {
            input: false,
            output: true
        }));
        assert!(devices.iter().all(DeviceSpec::supports_save_restore));
    }
}
