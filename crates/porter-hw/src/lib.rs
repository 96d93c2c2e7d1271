//! porter-hw: Hardware abstraction for the kiosk camera.
//!
//! Provides V4L2 device discovery and capture, a synthetic frame source,
//! pixel-format conversion, and a typed preview lifecycle.

pub mod camera;
pub mod device;
pub mod frame;
pub mod synthetic;
pub mod v4l_device;

pub use camera::{Camera, CameraError, CameraSource, CaptureHandle, PreviewSession, StopPreviewError};
pub use device::{CaptureDevice, DeviceInfo};
pub use frame::{Frame, FrameError, PixelFormat};
pub use synthetic::SyntheticDevice;
