use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use porter_hw::{Camera, CameraSource, PixelFormat};
use std::path::PathBuf;
use std::time::Duration;

#[zbus::proxy(
    interface = "org.porter.Kiosk1",
    default_service = "org.porter.Kiosk1",
    default_path = "/org/porter/Kiosk1"
)]
trait Kiosk {
    async fn ring(&self) -> zbus::Result<String>;
    async fn refresh_whitelist(&self) -> zbus::Result<String>;
    async fn list_visitors(&self) -> zbus::Result<String>;
    async fn visitor_photos(&self, name: &str) -> zbus::Result<String>;
    async fn latest_detection(&self) -> zbus::Result<String>;
    async fn enroll(&self, name: &str) -> zbus::Result<String>;
    async fn add_photo(&self, name: &str) -> zbus::Result<String>;
    async fn remove_visitor(&self, name: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "porter", about = "Porter access-control kiosk CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Press the doorbell
    Ring,
    /// List whitelisted visitors
    Visitors,
    /// List a visitor's stored photos
    Photos { name: String },
    /// Rescan the whitelist folder
    Refresh,
    /// Enroll a new visitor from the current camera view
    Enroll {
        /// Visitor name (also the folder name)
        name: String,
    },
    /// Add a photo from the current camera view to a visitor
    AddPhoto { name: String },
    /// Remove a visitor
    Remove { name: String },
    /// Show daemon status
    Status,
    /// Print face detections as they change
    Watch {
        /// Polling interval in milliseconds
        #[arg(short, long, default_value_t = 250)]
        interval_ms: u64,
    },
    /// List V4L2 capture devices (bypasses the daemon)
    Devices,
    /// Capture one still straight from a camera (bypasses the daemon)
    Snapshot {
        /// `auto`, `synthetic`, or a device path
        #[arg(short, long, default_value = "auto")]
        device: String,
        #[arg(long, default_value = "LifeCam")]
        preferred: String,
        #[arg(short, long, default_value = "porter-snapshot.jpg")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let system = cli.system;

    match cli.command {
        Commands::Ring => print_json(&connect(system).await?.ring().await?)?,
        Commands::Visitors => print_json(&connect(system).await?.list_visitors().await?)?,
        Commands::Photos { name } => print_json(&connect(system).await?.visitor_photos(&name).await?)?,
        Commands::Refresh => print_json(&connect(system).await?.refresh_whitelist().await?)?,
        Commands::Enroll { name } => print_json(&connect(system).await?.enroll(&name).await?)?,
        Commands::AddPhoto { name } => print_json(&connect(system).await?.add_photo(&name).await?)?,
        Commands::Remove { name } => print_json(&connect(system).await?.remove_visitor(&name).await?)?,
        Commands::Status => print_json(&connect(system).await?.status().await?)?,
        Commands::Watch { interval_ms } => {
            let proxy = connect(system).await?;
            watch(&proxy, Duration::from_millis(interval_ms.max(10))).await?
        }
        Commands::Devices => list_devices(),
        Commands::Snapshot {
            device,
            preferred,
            output,
        } => snapshot(&device, &preferred, &output)?,
    }

    Ok(())
}

async fn connect(system: bool) -> Result<KioskProxy<'static>> {
    let connection = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("cannot connect to D-Bus")?;
    KioskProxy::new(&connection)
        .await
        .context("porterd is not reachable")
}

fn print_json(body: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(body).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Poll the latest detection and print each new snapshot until interrupted.
async fn watch(proxy: &KioskProxy<'_>, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut last_sequence = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
        let value: serde_json::Value = serde_json::from_str(&proxy.latest_detection().await?)?;
        let sequence = value.get("sequence").and_then(serde_json::Value::as_u64);
        if sequence.is_none() || sequence == last_sequence {
            continue;
        }
        last_sequence = sequence;

        let faces = value
            .get("faces")
            .and_then(serde_json::Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        println!("#{} faces={} {}", sequence.unwrap_or_default(), faces, value["faces"]);
    }
}

fn list_devices() {
    let devices = porter_hw::v4l_device::list_devices();
    if devices.is_empty() {
        println!("No capture devices found");
        return;
    }
    for d in devices {
        println!("{}\t{}\t{}\t{}", d.path, d.name, d.driver, d.bus);
    }
}

fn snapshot(device: &str, preferred: &str, output: &std::path::Path) -> Result<()> {
    let source = CameraSource::parse(device, preferred);
    let camera = Camera::open(&source, 640, 480).context("cannot open camera")?;
    println!("Camera: {} ({})", camera.info().name, camera.info().path);

    let session = camera.start_preview()?;
    let frame = session.capture_still();
    session.stop_preview()?;
    let frame = frame?;

    if frame.format != PixelFormat::Rgb8 {
        bail!("unexpected still format {}", frame.format);
    }
    let image = image::RgbImage::from_raw(frame.width, frame.height, frame.data)
        .context("still buffer does not match its dimensions")?;
    image
        .save(output)
        .with_context(|| format!("cannot write {}", output.display()))?;
    println!("Saved {}x{} still to {}", frame.width, frame.height, output.display());
    Ok(())
}
