//! Camera lifecycle: an idle [`Camera`] becomes an active [`PreviewSession`].
//!
//! Only an active session (or a [`CaptureHandle`] cloned from it) can capture.
//! Stopping the session returns the idle camera; handles that outlive the
//! session fail with [`CameraError::PreviewStopped`].

use crate::device::{select_device, CaptureDevice, DeviceInfo};
use crate::frame::{Frame, FrameError, PixelFormat};
use crate::synthetic::SyntheticDevice;
use crate::v4l_device::{self, V4lDevice};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera not initialized: no capture device found")]
    NotInitialized,
    #[error("device busy")]
    DeviceBusy,
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("preview is not running")]
    PreviewStopped,
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
}

/// A failed [`PreviewSession::stop_preview`]. The idle camera is handed back
/// so the caller can start it again.
#[derive(Error)]
#[error("failed to stop preview: {error}")]
pub struct StopPreviewError {
    pub camera: Camera,
    #[source]
    pub error: CameraError,
}

impl std::fmt::Debug for StopPreviewError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopPreviewError")
            .field("device", &self.camera.info().path)
            .field("error", &self.error)
            .finish()
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera").field("device", &self.info().path).finish()
    }
}

/// Which device to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSource {
    /// Enumerate V4L2 devices and pick one by preferred name.
    Auto { preferred: String },
    /// Open a specific V4L2 device node.
    Path(String),
    /// Built-in gradient generator.
    Synthetic,
}

impl CameraSource {
    /// Parse a config value: `auto`, `synthetic`, or a device path.
    pub fn parse(value: &str, preferred: &str) -> Self {
        match value.trim() {
            "" | "auto" => CameraSource::Auto {
                preferred: preferred.to_string(),
            },
            "synthetic" => CameraSource::Synthetic,
            path => CameraSource::Path(path.to_string()),
        }
    }
}

/// Shared state behind a camera and its previews.
struct Shared {
    device: Mutex<Box<dyn CaptureDevice>>,
    info: DeviceInfo,
    /// Id of the running preview, 0 while idle. Each start gets a fresh id.
    session: AtomicU64,
    next_session: AtomicU64,
}

impl Shared {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Box<dyn CaptureDevice>>, CameraError> {
        self.device
            .lock()
            .map_err(|_| CameraError::CaptureFailed("capture device lock poisoned".into()))
    }

    fn grab(&self, session: u64) -> Result<Frame, CameraError> {
        if self.session.load(Ordering::Acquire) != session {
            return Err(CameraError::PreviewStopped);
        }
        let mut device = self.lock()?;
        // Re-check under the lock: stop_preview may have raced us.
        if self.session.load(Ordering::Acquire) != session {
            return Err(CameraError::PreviewStopped);
        }
        device.grab()
    }
}

/// An initialized camera that is not streaming.
pub struct Camera {
    shared: Arc<Shared>,
}

impl Camera {
    /// Wrap an already-opened device.
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        let info = device.info().clone();
        Self {
            shared: Arc::new(Shared {
                device: Mutex::new(device),
                info,
                session: AtomicU64::new(0),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// Open the configured device.
    ///
    /// Returns [`CameraError::NotInitialized`] when auto-discovery finds no
    /// capture device.
    pub fn open(source: &CameraSource, width: u32, height: u32) -> Result<Self, CameraError> {
        let device: Box<dyn CaptureDevice> = match source {
            CameraSource::Synthetic => Box::new(SyntheticDevice::new(width, height)),
            CameraSource::Path(path) => Box::new(V4lDevice::open(path, width, height)?),
            CameraSource::Auto { preferred } => {
                let devices = v4l_device::list_devices();
                let chosen = select_device(&devices, preferred).ok_or(CameraError::NotInitialized)?;
                tracing::info!(
                    device = %chosen.path,
                    name = %chosen.name,
                    candidates = devices.len(),
                    "selected capture device"
                );
                Box::new(V4lDevice::open(&chosen.path, width, height)?)
            }
        };
        Ok(Self::new(device))
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.shared.info
    }

    /// Start streaming.
    ///
    /// Consumes the camera: a device that cannot start is treated as
    /// unavailable and camera-dependent features stay disabled.
    pub fn start_preview(self) -> Result<PreviewSession, CameraError> {
        let id = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        {
            let mut device = self.shared.lock()?;
            device.start()?;
            self.shared.session.store(id, Ordering::Release);
        }
        tracing::info!(device = %self.shared.info.path, session = id, "preview started");
        Ok(PreviewSession {
            shared: self.shared,
            id,
        })
    }
}

/// A streaming camera. The only owner allowed to stop the preview.
pub struct PreviewSession {
    shared: Arc<Shared>,
    id: u64,
}

impl PreviewSession {
    pub fn info(&self) -> &DeviceInfo {
        &self.shared.info
    }

    /// A cloneable capture handle for background tasks.
    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            shared: Arc::clone(&self.shared),
            session: self.id,
        }
    }

    pub fn capture_still(&self) -> Result<Frame, CameraError> {
        self.handle().capture_still()
    }

    pub fn capture_analysis_frame(&self, format: PixelFormat) -> Result<Frame, CameraError> {
        self.handle().capture_analysis_frame(format)
    }

    /// Stop streaming and return the idle camera.
    ///
    /// Waits for a capture in progress on another handle to finish. Handles
    /// are invalidated even when the device refuses to stop; the error then
    /// carries the camera back as [`CameraError::DeviceBusy`].
    pub fn stop_preview(self) -> Result<Camera, StopPreviewError> {
        let stopped = self.shared.lock().and_then(|mut device| {
            self.shared.session.store(0, Ordering::Release);
            device.stop()
        });
        let camera = Camera {
            shared: self.shared,
        };
        match stopped {
            Ok(()) => {
                tracing::info!(device = %camera.info().path, "preview stopped");
                Ok(camera)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to stop camera preview stream");
                Err(StopPreviewError {
                    camera,
                    error: CameraError::DeviceBusy,
                })
            }
        }
    }
}

/// Capture access to a running preview, shareable across threads.
#[derive(Clone)]
pub struct CaptureHandle {
    shared: Arc<Shared>,
    session: u64,
}

impl CaptureHandle {
    pub fn is_active(&self) -> bool {
        self.shared.session.load(Ordering::Acquire) == self.session
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.shared.info
    }

    /// Grab one full-resolution colour still.
    pub fn capture_still(&self) -> Result<Frame, CameraError> {
        let frame = self.shared.grab(self.session)?;
        Ok(frame.convert(PixelFormat::Rgb8)?)
    }

    /// Grab one preview frame converted to `format` for analysis.
    pub fn capture_analysis_frame(&self, format: PixelFormat) -> Result<Frame, CameraError> {
        let frame = self.shared.grab(self.session)?;
        Ok(frame.convert(format)?)
    }
}
