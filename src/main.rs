//! qrscan: scan one QR code from the camera and hand off the route

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use qrscan::capture::{self, V4l2Camera};
use qrscan::decoder::RqrrDecoder;
use qrscan::page::{ChannelNavigator, NavigationState, ScanPage};
use qrscan::session::CameraScanSession;
use qrscan::still::decode_static_image;
use qrscan::surface::CanvasFactory;
use qrscan::Config;

#[derive(Parser, Debug)]
#[command(name = "qrscan")]
#[command(about = "Scan a QR code from the camera or from a still image")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Decode this image (path or data: URL) instead of opening the camera
    #[arg(long)]
    image: Option<String>,

    /// Display name forwarded to the scan page
    #[arg(long)]
    user: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qrscan=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;
    qrscan::CONFIG.store(Arc::new(config));
    let config = qrscan::CONFIG.load_full();

    if let Some(source) = args.image {
        match decode_static_image(&source, &RqrrDecoder::new()).await {
            Some(data) => println!("{data}"),
            None => println!("not found"),
        }
        return Ok(());
    }

    // Auto-detect capture device if needed
    let mut camera_config = config.camera.clone();
    if camera_config.device.path.is_empty() {
        camera_config.device = capture::auto_detect_device().await?;
        camera_config.format = camera_config.device.format;
    }
    info!("Using capture device: {:?}", camera_config.device);

    let session = CameraScanSession::new(
        V4l2Camera::new(camera_config),
        CanvasFactory::new(config.scanner.max_surface_dimension),
        RqrrDecoder::new(),
        &config.scanner,
    );
    let (navigator, routes) = ChannelNavigator::channel();
    let state = NavigationState {
        nombre_usuario: args.user,
    };
    let mut page = ScanPage::new(
        Some(&state),
        session,
        Arc::new(navigator),
        config.navigation.clone(),
    );

    page.on_init().await;
    if let Some(e) = page.last_error() {
        eprintln!("Camera unavailable: {e}");
        return Ok(());
    }

    tokio::select! {
        route = routes.recv_async() => {
            if let Ok(route) = route {
                println!("{}", route.to_url());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted before a code was found");
        }
    }

    page.on_destroy();
    info!("qrscan shutting down");
    Ok(())
}
