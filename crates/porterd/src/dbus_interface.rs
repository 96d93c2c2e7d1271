use crate::cache::RefreshOutcome;
use crate::kiosk::Kiosk;
use serde::Serialize;
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.porter.Kiosk1";
pub const OBJECT_PATH: &str = "/org/porter/Kiosk1";

/// D-Bus interface for the porter kiosk daemon.
///
/// Bus name: org.porter.Kiosk1
/// Object path: /org/porter/Kiosk1
///
/// Results are JSON documents.
pub struct KioskService {
    kiosk: Arc<Kiosk>,
}

impl KioskService {
    pub fn new(kiosk: Arc<Kiosk>) -> Self {
        Self { kiosk }
    }
}

#[derive(Serialize)]
struct VisitorEntry<'a> {
    name: &'a str,
    image_folder: String,
    photo_count: usize,
    thumbnail: Option<String>,
    display_width: u32,
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("serialization failed: {e}")))
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.porter.Kiosk1")]
impl KioskService {
    /// Press the doorbell: capture, identify and decide.
    async fn ring(&self) -> zbus::fdo::Result<String> {
        tracing::debug!("ring requested");
        to_json(&self.kiosk.ring().await)
    }

    /// Rescan the visitor store. Reports `already_running` if a scan is in progress.
    async fn refresh_whitelist(&self) -> zbus::fdo::Result<String> {
        tracing::debug!("refresh requested");
        let body = match self.kiosk.refresh_whitelist().await.map_err(failed)? {
            RefreshOutcome::Refreshed(list) => serde_json::json!({ "refreshed": true, "visitors": list.len() }),
            RefreshOutcome::AlreadyRunning => serde_json::json!({ "refreshed": false, "already_running": true }),
        };
        Ok(body.to_string())
    }

    async fn list_visitors(&self) -> zbus::fdo::Result<String> {
        let visitors = self.kiosk.visitors();
        let entries: Vec<VisitorEntry<'_>> = visitors
            .iter()
            .map(|v| VisitorEntry {
                name: &v.name,
                image_folder: v.image_folder.display().to_string(),
                photo_count: v.photo_count,
                thumbnail: v.thumbnail.as_ref().map(|t| t.source.display().to_string()),
                display_width: v.display_width,
            })
            .collect();
        to_json(&entries)
    }

    /// Paths of every stored photo of `name`, oldest first.
    async fn visitor_photos(&self, name: &str) -> zbus::fdo::Result<String> {
        to_json(&self.kiosk.visitor_photos(name).await.map_err(failed)?)
    }

    /// Latest detection snapshot, or `null` before the first one.
    async fn latest_detection(&self) -> zbus::fdo::Result<String> {
        to_json(&self.kiosk.latest_detection())
    }

    async fn enroll(&self, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, "enroll requested");
        to_json(&self.kiosk.enroll(name).await.map_err(failed)?)
    }

    async fn add_photo(&self, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, "add photo requested");
        to_json(&self.kiosk.add_photo(name).await.map_err(failed)?)
    }

    async fn remove_visitor(&self, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, "remove requested");
        to_json(&self.kiosk.remove_visitor(name).await.map_err(failed)?)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&self.kiosk.status())
    }
}
