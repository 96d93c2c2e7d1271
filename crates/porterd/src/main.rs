use anyhow::{Context, Result};
use porter_core::{CropPlanner, FaceApiService, FaceLocator, FolderStore, RecognitionGateway, ScrfdLocator, StillPreparer};
use porter_hw::{Camera, CameraSource, PreviewSession};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

mod cache;
mod config;
mod dbus_interface;
mod doorbell;
mod frame_loop;
mod kiosk;
#[cfg(test)]
mod testing;

use cache::WhitelistCache;
use config::{BusKind, Config};
use frame_loop::{FrameLoop, SharedLocator};
use kiosk::{Kiosk, KioskParts};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("porterd starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(
        camera = %config.camera_device,
        data_dir = %config.data_dir.display(),
        model_dir = %config.model_dir.display(),
        live_feed = config.live_feed_enabled,
        "configuration loaded"
    );

    let store = Arc::new(FolderStore::open(&config.data_dir).context("failed to open visitor store")?);
    tracing::info!(root = %store.root().display(), "visitor store ready");

    let locator = load_locator(&config);
    let session = start_camera(&config).await;
    let gateway = connect_recognition(&config).await;

    let cache = WhitelistCache::new(store.clone(), config.thumbnail_width);
    if let Err(e) = cache.refresh().await {
        tracing::warn!(error = %e, "initial whitelist scan failed");
    }

    let frame_loop = match (&session, &locator) {
        (Some(session), Some(locator)) if config.live_feed_enabled => Some(FrameLoop::spawn(
            session.handle(),
            Arc::clone(locator),
            config.frame_interval(),
        )),
        (Some(_), Some(_)) => {
            tracing::info!("live feed disabled, frame loop not started");
            None
        }
        _ => {
            tracing::warn!("camera or face locator unavailable, frame loop not started");
            None
        }
    };

    let kiosk = Arc::new(Kiosk::new(KioskParts {
        camera: session.as_ref().map(PreviewSession::handle),
        locator,
        preparer: StillPreparer::new(CropPlanner::new(config.crop_margin), config.jpeg_quality),
        gateway,
        store,
        cache,
        feed: frame_loop.as_ref().map(FrameLoop::feed),
    }));

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, dbus_interface::KioskService::new(kiosk))?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = dbus_interface::BUS_NAME, "porterd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("porterd shutting down");

    if let Some(frame_loop) = frame_loop {
        frame_loop.stop().await;
    }
    if let Some(session) = session {
        match tokio::task::spawn_blocking(move || session.stop_preview()).await? {
            Ok(_camera) => {}
            Err(e) => tracing::warn!(error = %e, "failed to stop preview"),
        }
    }

    Ok(())
}

/// Load the SCRFD model. Without it stills are sent uncropped and no overlay runs.
fn load_locator(config: &Config) -> Option<SharedLocator> {
    let path = config.scrfd_model_path();
    match ScrfdLocator::load(&path, config.detection_threshold) {
        Ok(locator) => {
            let boxed: Box<dyn FaceLocator> = Box::new(locator);
            Some(Arc::new(Mutex::new(boxed)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "face locator unavailable");
            None
        }
    }
}

/// Open the configured camera and start its preview.
///
/// Failure leaves camera-dependent features disabled rather than stopping the daemon.
async fn start_camera(config: &Config) -> Option<PreviewSession> {
    let source = CameraSource::parse(&config.camera_device, &config.preferred_camera);
    let (width, height) = (config.capture_width, config.capture_height);
    let started = tokio::task::spawn_blocking(move || {
        let camera = Camera::open(&source, width, height)?;
        tracing::info!(
            device = %camera.info().path,
            name = %camera.info().name,
            driver = %camera.info().driver,
            "camera opened"
        );
        camera.start_preview()
    })
    .await;

    match started {
        Ok(Ok(session)) => Some(session),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "camera unavailable");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "camera setup task failed");
            None
        }
    }
}

/// Build the Face API client and make sure the person group exists.
async fn connect_recognition(config: &Config) -> Option<RecognitionGateway> {
    let Some(api) = config.face_api() else {
        tracing::warn!("face_api_endpoint/face_api_key not set, recognition disabled");
        return None;
    };
    let endpoint = api.endpoint.clone();

    // The blocking HTTP client must be built off the async runtime.
    let built = tokio::task::spawn_blocking(move || {
        let service = FaceApiService::new(api)?;
        if let Err(e) = service.ensure_person_group() {
            tracing::warn!(error = %e, "person group check failed");
        }
        Ok::<_, porter_core::ServiceError>(service)
    })
    .await;

    match built {
        Ok(Ok(service)) => {
            tracing::info!(%endpoint, "recognition service configured");
            Some(RecognitionGateway::new(Arc::new(service)))
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "recognition service unavailable");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "recognition setup task failed");
            None
        }
    }
}
