//! V4L2 capture via the `v4l` crate.

use crate::camera::CameraError;
use crate::device::{CaptureDevice, DeviceInfo};
use crate::frame::{Frame, PixelFormat};
use std::path::Path;
use std::time::Duration;
use v4l::buffer::Type as BufType;
use v4l::io::traits::{CaptureStream, Stream};
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const MMAP_BUFFERS: u32 = 4;
const MAX_VIDEO_NODES: usize = 16;
const EBUSY: i32 = 16;
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// V4L2 camera device handle.
///
/// The mmap stream lives from `start` to `stop`, so consecutive grabs
/// dequeue consecutive frames of one continuous preview.
pub struct V4lDevice {
    stream: Option<MmapStream<'static>>,
    device: Device,
    info: DeviceInfo,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl V4lDevice {
    /// Open a V4L2 device by path and negotiate a YUYV (or GREY/Y16) format.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            busy_or(e, |e| CameraError::DeviceNotFound(format!("{device_path}: {e}")))
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Gray8
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated camera format"
        );

        Ok(Self {
            device,
            info: DeviceInfo {
                path: device_path.to_string(),
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            },
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    fn open_stream(&self) -> Result<MmapStream<'static>, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, MMAP_BUFFERS)
            .map_err(|e| {
                busy_or(e, |e| {
                    CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                })
            })?;
        stream.set_timeout(DEQUEUE_TIMEOUT);
        Ok(stream)
    }
}

fn dequeue(stream: &mut MmapStream<'static>, width: u32, height: u32, format: PixelFormat) -> Result<Frame, CameraError> {
    let (buf, meta) = stream
        .next()
        .map_err(|e| busy_or(e, |e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))))?;
    let bytes = (meta.bytesused as usize).min(buf.len());
    let data = if bytes == 0 { buf.to_vec() } else { buf[..bytes].to_vec() };
    Ok(Frame::new(data, width, height, format, meta.sequence)?)
}

impl CaptureDevice for V4lDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start(&mut self) -> Result<(), CameraError> {
        // Drops (and stops) a stream left over from a failed stop.
        self.stream = None;
        let mut stream = self.open_stream()?;

        // The first dequeue issues STREAMON, so a device held by another
        // process fails here. The frame itself is often under-exposed.
        dequeue(&mut stream, self.width, self.height, self.pixel_format)?;
        self.stream = Some(stream);
        tracing::debug!(device = %self.info.path, "stream on");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        Stream::stop(&mut stream)
            .map_err(|e| busy_or(e, |e| CameraError::CaptureFailed(format!("failed to stop stream: {e}"))))?;
        tracing::debug!(device = %self.info.path, "stream off");
        Ok(())
    }

    fn grab(&mut self) -> Result<Frame, CameraError> {
        let (width, height, format) = (self.width, self.height, self.pixel_format);
        let stream = self.stream.as_mut().ok_or(CameraError::PreviewStopped)?;
        dequeue(stream, width, height, format)
    }
}

/// List available V4L2 video capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for i in 0..MAX_VIDEO_NODES {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }
        devices.push(DeviceInfo {
            path,
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        });
    }

    devices
}

fn busy_or(e: std::io::Error, other: impl FnOnce(std::io::Error) -> CameraError) -> CameraError {
    if e.raw_os_error() == Some(EBUSY) || e.to_string().contains("busy") {
        CameraError::DeviceBusy
    } else {
        other(e)
    }
}
