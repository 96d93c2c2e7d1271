//! Doorbell access flow and visitor administration.

use crate::cache::{CacheError, RefreshOutcome, VisitorList, WhitelistCache};
use crate::doorbell::Doorbell;
use crate::frame_loop::{lock_locator, DetectionFeed, LoopCounters, SharedLocator};
use porter_core::store::validate_name;
use porter_core::{
    DetectionSnapshot, GatewayError, RecognitionGateway, RecognitionOutcome, StillError, StillImage, StillPreparer,
    StorageError, VisitorStore,
};
use porter_hw::{CameraError, CaptureHandle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KioskError {
    #[error("camera not initialized")]
    CameraUnavailable,
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("still: {0}")]
    Still(#[from] StillError),
    #[error("store: {0}")]
    Storage(#[from] StorageError),
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for KioskError {
    fn from(e: tokio::task::JoinError) -> Self {
        KioskError::Task(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Welcome { visitor: String },
    NotRecognized { outcome: RecognitionOutcome },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "ring", content = "result", rename_all = "snake_case")]
pub enum RingOutcome {
    /// A previous press is still being handled.
    Ignored,
    Decided(AccessDecision),
}

/// Result of an administrative change. The store is updated even when the
/// recognition service could not be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminReport {
    pub visitor: String,
    pub photo: Option<PathBuf>,
    pub service_synced: bool,
}

/// A visitor's stored photos, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitorPhotos {
    pub visitor: String,
    pub image_folder: PathBuf,
    pub photos: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KioskStatus {
    pub version: &'static str,
    pub camera: Option<String>,
    pub camera_active: bool,
    pub locator_loaded: bool,
    pub recognition_configured: bool,
    pub live_feed: bool,
    pub visitors: usize,
    pub refreshing: bool,
    pub frame_loop: Option<LoopCounters>,
}

/// The kiosk's components. Any of the optional parts may be missing when the
/// hardware or service was not available at startup.
pub struct KioskParts {
    pub camera: Option<CaptureHandle>,
    pub locator: Option<SharedLocator>,
    pub preparer: StillPreparer,
    pub gateway: Option<RecognitionGateway>,
    pub store: Arc<dyn VisitorStore>,
    pub cache: WhitelistCache,
    pub feed: Option<DetectionFeed>,
}

pub struct Kiosk {
    camera: Option<CaptureHandle>,
    locator: Option<SharedLocator>,
    preparer: StillPreparer,
    gateway: Option<RecognitionGateway>,
    store: Arc<dyn VisitorStore>,
    cache: WhitelistCache,
    feed: Option<DetectionFeed>,
    doorbell: Doorbell,
}

impl Kiosk {
    pub fn new(parts: KioskParts) -> Self {
        Self {
            camera: parts.camera,
            locator: parts.locator,
            preparer: parts.preparer,
            gateway: parts.gateway,
            store: parts.store,
            cache: parts.cache,
            feed: parts.feed,
            doorbell: Doorbell::default(),
        }
    }

    /// Handle a doorbell press.
    pub async fn ring(&self) -> RingOutcome {
        let Some(_press) = self.doorbell.try_press() else {
            return RingOutcome::Ignored;
        };
        let decision = self.decide().await;
        tracing::info!(?decision, "doorbell handled");
        RingOutcome::Decided(decision)
    }

    async fn decide(&self) -> AccessDecision {
        let Some(camera) = self.active_camera() else {
            return AccessDecision::Unavailable {
                reason: KioskError::CameraUnavailable.to_string(),
            };
        };
        let Some(gateway) = self.gateway.clone() else {
            return AccessDecision::NotRecognized {
                outcome: RecognitionOutcome::ServiceError("recognition service not configured".into()),
            };
        };

        let still = match self.capture_still(camera).await {
            Ok(still) => still,
            Err(e) => {
                tracing::warn!(error = %e, "doorbell capture failed");
                return AccessDecision::Unavailable { reason: e.to_string() };
            }
        };

        let whitelist = self.cache.visitors();
        let identified = tokio::task::spawn_blocking(move || gateway.identify(&still, &whitelist)).await;
        match identified {
            Ok(Ok(RecognitionOutcome::Matched(names))) => match names.into_iter().next() {
                Some(visitor) => AccessDecision::Welcome { visitor },
                None => AccessDecision::NotRecognized {
                    outcome: RecognitionOutcome::NoMatch,
                },
            },
            Ok(Ok(outcome)) => AccessDecision::NotRecognized { outcome },
            Ok(Err(e @ GatewayError::EmptyImage)) => AccessDecision::Unavailable { reason: e.to_string() },
            Ok(Err(GatewayError::Service(e))) => AccessDecision::NotRecognized {
                outcome: RecognitionOutcome::ServiceError(e.to_string()),
            },
            Err(e) => AccessDecision::Unavailable {
                reason: KioskError::from(e).to_string(),
            },
        }
    }

    /// Enroll a new visitor from a fresh still, replacing any existing one.
    pub async fn enroll(&self, name: &str) -> Result<AdminReport, KioskError> {
        let name = validate_name(name)?.to_string();
        let camera = self.active_camera().ok_or(KioskError::CameraUnavailable)?;
        let still = self.capture_still(camera).await?;

        let store = Arc::clone(&self.store);
        let gateway = self.gateway.clone();
        let report = tokio::task::spawn_blocking(move || -> Result<AdminReport, KioskError> {
            store.create_visitor(&name)?;
            let photo = store.add_photo(&name, &still.jpeg)?;
            let service_synced = sync(gateway.as_ref(), &name, |g| g.enroll(&name, &[still.jpeg.clone()]));
            Ok(AdminReport {
                visitor: name,
                photo: Some(photo),
                service_synced,
            })
        })
        .await??;

        tracing::info!(visitor = %report.visitor, synced = report.service_synced, "visitor enrolled");
        self.refresh_after_change().await;
        Ok(report)
    }

    /// Add a fresh still to an existing visitor.
    pub async fn add_photo(&self, name: &str) -> Result<AdminReport, KioskError> {
        let name = validate_name(name)?.to_string();
        if !self.store_has(&name).await? {
            return Err(StorageError::NotFound(name).into());
        }
        let camera = self.active_camera().ok_or(KioskError::CameraUnavailable)?;
        let still = self.capture_still(camera).await?;

        let store = Arc::clone(&self.store);
        let gateway = self.gateway.clone();
        let report = tokio::task::spawn_blocking(move || -> Result<AdminReport, KioskError> {
            let photo = store.add_photo(&name, &still.jpeg)?;
            let service_synced = sync(gateway.as_ref(), &name, |g| g.add_image(&name, &still.jpeg));
            Ok(AdminReport {
                visitor: name,
                photo: Some(photo),
                service_synced,
            })
        })
        .await??;

        tracing::info!(visitor = %report.visitor, synced = report.service_synced, "visitor photo added");
        self.refresh_after_change().await;
        Ok(report)
    }

    pub async fn remove_visitor(&self, name: &str) -> Result<AdminReport, KioskError> {
        let name = validate_name(name)?.to_string();
        let store = Arc::clone(&self.store);
        let gateway = self.gateway.clone();
        let report = tokio::task::spawn_blocking(move || -> Result<AdminReport, KioskError> {
            store.remove_visitor(&name)?;
            let service_synced = sync(gateway.as_ref(), &name, |g| g.remove(&name));
            Ok(AdminReport {
                visitor: name,
                photo: None,
                service_synced,
            })
        })
        .await??;

        tracing::info!(visitor = %report.visitor, synced = report.service_synced, "visitor removed");
        self.refresh_after_change().await;
        Ok(report)
    }

    /// List a visitor's photos straight from the store.
    pub async fn visitor_photos(&self, name: &str) -> Result<VisitorPhotos, KioskError> {
        let name = validate_name(name)?.to_string();
        let store = Arc::clone(&self.store);
        let listing = tokio::task::spawn_blocking(move || -> Result<VisitorPhotos, KioskError> {
            let folder = store
                .visitor_folders()?
                .into_iter()
                .find(|f| f.name == name)
                .ok_or_else(|| StorageError::NotFound(name.clone()))?;
            let photos = store.photos(&folder)?;
            Ok(VisitorPhotos {
                visitor: name,
                image_folder: folder.path,
                photos,
            })
        })
        .await??;
        Ok(listing)
    }

    pub async fn refresh_whitelist(&self) -> Result<RefreshOutcome, CacheError> {
        self.cache.refresh().await
    }

    pub fn visitors(&self) -> VisitorList {
        self.cache.visitors()
    }

    pub fn latest_detection(&self) -> Option<DetectionSnapshot> {
        self.feed.as_ref().and_then(DetectionFeed::latest)
    }

    pub fn status(&self) -> KioskStatus {
        KioskStatus {
            version: env!("CARGO_PKG_VERSION"),
            camera: self.camera.as_ref().map(|c| c.info().name.clone()),
            camera_active: self.active_camera().is_some(),
            locator_loaded: self.locator.is_some(),
            recognition_configured: self.gateway.is_some(),
            live_feed: self.feed.is_some(),
            visitors: self.cache.visitors().len(),
            refreshing: self.cache.is_refreshing(),
            frame_loop: self.feed.as_ref().map(DetectionFeed::counters),
        }
    }

    fn active_camera(&self) -> Option<CaptureHandle> {
        self.camera.as_ref().filter(|c| c.is_active()).cloned()
    }

    async fn capture_still(&self, camera: CaptureHandle) -> Result<StillImage, KioskError> {
        let locator = self.locator.clone();
        let preparer = self.preparer;
        tokio::task::spawn_blocking(move || -> Result<StillImage, KioskError> {
            let frame = camera.capture_still()?;
            let still = match locator {
                Some(locator) => {
                    let mut locator = lock_locator(&locator);
                    preparer.prepare(&frame, &mut **locator)?
                }
                None => preparer.prepare_uncropped(&frame)?,
            };
            Ok(still)
        })
        .await?
    }

    async fn store_has(&self, name: &str) -> Result<bool, KioskError> {
        let store = Arc::clone(&self.store);
        let name = name.to_string();
        let folders = tokio::task::spawn_blocking(move || store.visitor_folders()).await??;
        Ok(folders.iter().any(|f| f.name == name))
    }

    async fn refresh_after_change(&self) {
        if let Err(e) = self.cache.refresh_now().await {
            tracing::warn!(error = %e, "whitelist refresh after change failed");
        }
    }
}

/// Run a service call, logging instead of failing. Returns whether it succeeded.
fn sync(
    gateway: Option<&RecognitionGateway>,
    name: &str,
    call: impl FnOnce(&RecognitionGateway) -> Result<(), GatewayError>,
) -> bool {
    let Some(gateway) = gateway else {
        tracing::warn!(visitor = name, "recognition service not configured, change not synced");
        return false;
    };
    match call(gateway) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(visitor = name, error = %e, "recognition service not updated");
            false
        }
    }
}
