//! Test doubles shared by the daemon's unit tests.

use porter_core::{
    DetectionError, FaceLocator, FaceRegion, FolderStore, RecognitionService, ServiceError, StorageError,
    VisitorFolder, VisitorStore,
};
use porter_hw::{Frame, PixelFormat};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 120]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

/// Tracks how many callers are inside a section at once.
#[derive(Debug, Default)]
pub struct Concurrency {
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub entered: AtomicUsize,
}

impl Concurrency {
    pub fn enter(&self) -> ConcurrencyGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.entered.fetch_add(1, Ordering::SeqCst);
        ConcurrencyGuard(self)
    }
}

pub struct ConcurrencyGuard<'a>(&'a Concurrency);

impl Drop for ConcurrencyGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Locator that sleeps, then reports fixed faces.
pub struct SlowLocator {
    pub delay: Duration,
    pub faces: Vec<FaceRegion>,
    pub fail: bool,
    pub calls: Arc<Concurrency>,
}

impl SlowLocator {
    pub fn new(delay: Duration, faces: Vec<FaceRegion>) -> Self {
        Self {
            delay,
            faces,
            fail: false,
            calls: Arc::new(Concurrency::default()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Duration::ZERO, vec![])
        }
    }
}

impl FaceLocator for SlowLocator {
    fn preferred_format(&self) -> PixelFormat {
        PixelFormat::Gray8
    }

    fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectionError> {
        porter_core::locator::ensure_supported(self, frame)?;
        let _inside = self.calls.enter();
        std::thread::sleep(self.delay);
        if self.fail {
            return Err(DetectionError::InferenceFailed("scripted failure".into()));
        }
        Ok(self.faces.clone())
    }
}

/// Store wrapper that delays root enumeration and counts concurrent scans.
pub struct SlowStore {
    inner: Arc<FolderStore>,
    delay: Mutex<Duration>,
    scans_in_flight: Concurrency,
    pub max_active: AtomicUsize,
    pub scans: AtomicUsize,
}

impl SlowStore {
    pub fn new(inner: Arc<FolderStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay: Mutex::new(delay),
            scans_in_flight: Concurrency::default(),
            max_active: AtomicUsize::new(0),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

impl VisitorStore for SlowStore {
    fn visitor_folders(&self) -> Result<Vec<VisitorFolder>, StorageError> {
        let _inside = self.scans_in_flight.enter();
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.max_active
            .fetch_max(self.scans_in_flight.active.load(Ordering::SeqCst), Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        std::thread::sleep(delay);
        self.inner.visitor_folders()
    }

    fn photos(&self, folder: &VisitorFolder) -> Result<Vec<PathBuf>, StorageError> {
        self.inner.photos(folder)
    }

    fn read_photo(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        self.inner.read_photo(path)
    }

    fn create_visitor(&self, name: &str) -> Result<VisitorFolder, StorageError> {
        self.inner.create_visitor(name)
    }

    fn add_photo(&self, name: &str, jpeg: &[u8]) -> Result<PathBuf, StorageError> {
        self.inner.add_photo(name, jpeg)
    }

    fn remove_visitor(&self, name: &str) -> Result<(), StorageError> {
        self.inner.remove_visitor(name)
    }
}

/// Recognition service that replays a scripted `identify` reply and records calls.
pub struct ScriptedService {
    reply: Mutex<Result<Vec<String>, ServiceError>>,
    pub identified: AtomicUsize,
    pub enrolled: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub offline: bool,
}

impl ScriptedService {
    pub fn new(reply: Result<Vec<String>, ServiceError>) -> Self {
        Self {
            reply: Mutex::new(reply),
            identified: AtomicUsize::new(0),
            enrolled: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            offline: false,
        }
    }

    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::new(Err(ServiceError::Transport("offline".into())))
        }
    }

    pub fn set_reply(&self, reply: Result<Vec<String>, ServiceError>) {
        *self.reply.lock().unwrap() = reply;
    }

    fn check_online(&self) -> Result<(), ServiceError> {
        if self.offline {
            Err(ServiceError::Transport("offline".into()))
        } else {
            Ok(())
        }
    }
}

impl RecognitionService for ScriptedService {
    fn identify(&self, _jpeg: &[u8]) -> Result<Vec<String>, ServiceError> {
        self.identified.fetch_add(1, Ordering::SeqCst);
        self.reply.lock().unwrap().clone()
    }

    fn enroll(&self, name: &str, _photos: &[Vec<u8>]) -> Result<(), ServiceError> {
        self.check_online()?;
        self.enrolled.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn add_image(&self, name: &str, _jpeg: &[u8]) -> Result<(), ServiceError> {
        self.check_online()?;
        self.enrolled.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), ServiceError> {
        self.check_online()?;
        self.removed.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
