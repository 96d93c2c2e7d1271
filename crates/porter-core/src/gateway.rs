//! Recognition gateway: the kiosk's view of the external recognition service.

use crate::still::StillImage;
use crate::types::{RecognitionOutcome, Visitor};
use std::sync::Arc;
use thiserror::Error;

/// Faults reported by a recognition service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unknown visitor: {0}")]
    UnknownVisitor(String),
    #[error("malformed service response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("still image is empty")]
    EmptyImage,
    #[error("recognition service: {0}")]
    Service(#[from] ServiceError),
}

/// An external face recognition service.
///
/// Calls block; run them off the async runtime.
pub trait RecognitionService: Send + Sync {
    /// Names of the enrolled people in the image, best match first.
    fn identify(&self, jpeg: &[u8]) -> Result<Vec<String>, ServiceError>;

    /// Enroll `name` with the given photos, replacing any earlier enrollment.
    fn enroll(&self, name: &str, photos: &[Vec<u8>]) -> Result<(), ServiceError>;

    fn add_image(&self, name: &str, jpeg: &[u8]) -> Result<(), ServiceError>;

    fn remove(&self, name: &str) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct RecognitionGateway {
    service: Arc<dyn RecognitionService>,
}

impl RecognitionGateway {
    pub fn new(service: Arc<dyn RecognitionService>) -> Self {
        Self { service }
    }

    /// Ask who is in `still`, restricted to the visitors in `whitelist`.
    ///
    /// Service faults become [`RecognitionOutcome::ServiceError`]; only local
    /// faults are returned as errors.
    pub fn identify(&self, still: &StillImage, whitelist: &[Visitor]) -> Result<RecognitionOutcome, GatewayError> {
        if still.is_empty() {
            return Err(GatewayError::EmptyImage);
        }
        if whitelist.is_empty() {
            tracing::debug!("whitelist empty, skipping recognition service");
            return Ok(RecognitionOutcome::NoMatch);
        }

        let outcome = match self.service.identify(&still.jpeg) {
            Ok(names) => {
                let (known, unknown): (Vec<String>, Vec<String>) = names
                    .into_iter()
                    .partition(|n| whitelist.iter().any(|v| v.name == *n));
                if !unknown.is_empty() {
                    tracing::debug!(?unknown, "ignoring matches outside the whitelist");
                }
                if known.is_empty() {
                    RecognitionOutcome::NoMatch
                } else {
                    RecognitionOutcome::Matched(known)
                }
            }
            Err(ServiceError::NoFaceDetected) => RecognitionOutcome::NoFaceDetected,
            Err(e) => {
                tracing::warn!(error = %e, "recognition service failed");
                RecognitionOutcome::ServiceError(e.to_string())
            }
        };
        tracing::debug!(?outcome, "recognition outcome");
        Ok(outcome)
    }

    pub fn enroll(&self, name: &str, photos: &[Vec<u8>]) -> Result<(), GatewayError> {
        if photos.iter().any(|p| p.is_empty()) {
            return Err(GatewayError::EmptyImage);
        }
        Ok(self.service.enroll(name, photos)?)
    }

    pub fn add_image(&self, name: &str, jpeg: &[u8]) -> Result<(), GatewayError> {
        if jpeg.is_empty() {
            return Err(GatewayError::EmptyImage);
        }
        Ok(self.service.add_image(name, jpeg)?)
    }

    pub fn remove(&self, name: &str) -> Result<(), GatewayError> {
        Ok(self.service.remove(name)?)
    }
}
