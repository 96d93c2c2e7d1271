//! Capture device abstraction.

use crate::camera::CameraError;
use crate::frame::Frame;

/// Info about a discovered capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// A frame source that can be started, stopped and polled for frames.
///
/// Implementations do not need to be `Sync`; the camera session serializes
/// all access behind a mutex.
pub trait CaptureDevice: Send {
    fn info(&self) -> &DeviceInfo;

    /// Begin streaming. Transient failures map to [`CameraError::DeviceBusy`].
    fn start(&mut self) -> Result<(), CameraError>;

    fn stop(&mut self) -> Result<(), CameraError>;

    /// Dequeue the next frame in the device's native format.
    fn grab(&mut self) -> Result<Frame, CameraError>;
}

/// Pick the device to use from an enumeration.
///
/// Returns the first device whose name contains `preferred` (case-insensitive),
/// otherwise the first device listed.
pub fn select_device<'a>(devices: &'a [DeviceInfo], preferred: &str) -> Option<&'a DeviceInfo> {
    let needle = preferred.to_lowercase();
    if !needle.is_empty() {
        if let Some(found) = devices
            .iter()
            .find(|d| d.name.to_lowercase().contains(&needle))
        {
            return Some(found);
        }
    }
    devices.first()
}
