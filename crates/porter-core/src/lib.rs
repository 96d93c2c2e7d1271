//! porter-core: Face location, crop planning and visitor recognition.
//!
//! Faces are located with SCRFD running on ONNX Runtime. Identification is
//! delegated to an external recognition service behind [`RecognitionService`];
//! visitors live in a folder-per-visitor [`VisitorStore`].

pub mod crop;
pub mod face_api;
pub mod gateway;
pub mod locator;
pub mod scrfd;
pub mod still;
pub mod store;
pub mod types;
pub mod whitelist;

use std::path::PathBuf;

pub use crop::CropPlanner;
pub use face_api::{FaceApiConfig, FaceApiService};
pub use gateway::{GatewayError, RecognitionGateway, RecognitionService, ServiceError};
pub use locator::{DetectionError, FaceLocator};
pub use scrfd::ScrfdLocator;
pub use still::{StillError, StillImage, StillPreparer};
pub use store::{FolderStore, StorageError, VisitorFolder, VisitorStore};
pub use types::{CropRegion, DetectionSnapshot, FaceRegion, FrameSize, RecognitionOutcome, Thumbnail, Visitor};
pub use whitelist::scan_visitors;

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";

/// `$XDG_DATA_HOME/porter`, falling back to `~/.local/share/porter`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("porter")
}

pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
