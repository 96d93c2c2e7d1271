//! Synthetic capture device producing deterministic gradient frames.
//!
//! Used by the daemon when no hardware is wanted (`camera_device = "synthetic"`)
//! and by tests that need a controllable frame source.

use crate::camera::CameraError;
use crate::device::{CaptureDevice, DeviceInfo};
use crate::frame::{Frame, PixelFormat};
use std::time::Duration;

const SYNTHETIC_PATH: &str = "synthetic:0";
const SYNTHETIC_NAME: &str = "Synthetic Test Camera";

pub struct SyntheticDevice {
    info: DeviceInfo,
    width: u32,
    height: u32,
    format: PixelFormat,
    grab_delay: Option<Duration>,
    busy_starts: usize,
    busy_stops: usize,
    streaming: bool,
    sequence: u32,
}

impl SyntheticDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            info: DeviceInfo {
                path: SYNTHETIC_PATH.to_string(),
                name: SYNTHETIC_NAME.to_string(),
                driver: "synthetic".to_string(),
                bus: "virtual".to_string(),
            },
            width,
            height,
            format: PixelFormat::Yuyv,
            grab_delay: None,
            busy_starts: 0,
            busy_stops: 0,
            streaming: false,
            sequence: 0,
        }
    }

    /// Native format of produced frames (YUYV by default).
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Sleep this long inside every `grab`, simulating sensor latency.
    pub fn with_grab_delay(mut self, delay: Duration) -> Self {
        self.grab_delay = Some(delay);
        self
    }

    /// Fail the next `count` calls to `start` with [`CameraError::DeviceBusy`].
    pub fn with_busy_starts(mut self, count: usize) -> Self {
        self.busy_starts = count;
        self
    }

    /// Fail the next `count` calls to `stop` with [`CameraError::DeviceBusy`].
    pub fn with_busy_stops(mut self, count: usize) -> Self {
        self.busy_stops = count;
        self
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let shift = (self.sequence % 256) as usize;
        let luma = |x: usize, y: usize| ((x * 255 / w.max(1) + y * 255 / h.max(1) + shift) / 3) as u8;

        let mut data = Vec::with_capacity(w * h * self.format.bytes_per_pixel());
        for y in 0..h {
            for x in 0..w {
                let l = luma(x, y);
                match self.format {
                    PixelFormat::Gray8 => data.push(l),
                    PixelFormat::Rgb8 => data.extend_from_slice(&[l, l, l]),
                    PixelFormat::Y16 => data.extend_from_slice(&[0, l]),
                    PixelFormat::Yuyv => data.extend_from_slice(&[l, 128]),
                }
            }
        }
        data
    }
}

impl CaptureDevice for SyntheticDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start(&mut self) -> Result<(), CameraError> {
        if self.busy_starts > 0 {
            self.busy_starts -= 1;
            return Err(CameraError::DeviceBusy);
        }
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        if self.busy_stops > 0 {
            self.busy_stops -= 1;
            return Err(CameraError::DeviceBusy);
        }
        self.streaming = false;
        Ok(())
    }

    fn grab(&mut self) -> Result<Frame, CameraError> {
        if !self.streaming {
            return Err(CameraError::PreviewStopped);
        }
        if let Some(delay) = self.grab_delay {
            std::thread::sleep(delay);
        }
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Frame::new(
            self.render(),
            self.width,
            self.height,
            self.format,
            self.sequence,
        )?)
    }
}
