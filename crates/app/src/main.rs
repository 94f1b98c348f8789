mod adapters;

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use spotihue_core::{
    AppConfig, ColorExtractor, Controller, Dependencies, SqliteStore, StateStore,
};
use tracing_subscriber::EnvFilter;

use crate::adapters::{LocalOrHttpArtwork, LoggingLights, NowPlayingFile};

#[tokio::main]
async fn main() -> spotihue_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::default(),
    };

    match &cli.command {
        Commands::Extract {
            image,
            clusters,
            resize,
        } => run_extract(config, image, *clusters, *resize),
        Commands::Run { lights, retries } => run_sync(&cli, config, lights, *retries).await,
        Commands::Status => run_status(&cli, config),
        Commands::Stop => run_stop(&cli, config),
        Commands::Lights { lights } => run_lights(&cli, config, lights).await,
    }
}

fn run_extract(
    config: AppConfig,
    image: &PathBuf,
    clusters: Option<usize>,
    resize: Option<f64>,
) -> spotihue_core::Result<()> {
    let mut extraction = config.extraction;
    if let Some(clusters) = clusters {
        extraction.clusters = clusters;
    }
    if let Some(resize) = resize {
        extraction.resize_percentage = resize;
    }
    tracing::info!(?image, clusters = extraction.clusters, "extracting colors");

    let artwork = std::fs::read(image)?;
    let colors = ColorExtractor::new(extraction).derive_light_colors(&artwork)?;
    println!("{}", serde_json::to_string_pretty(&colors)?);
    Ok(())
}

async fn run_sync(
    cli: &Cli,
    config: AppConfig,
    lights: &[String],
    retries: u32,
) -> spotihue_core::Result<()> {
    let controller = Arc::new(controller(cli, config, lights)?);
    let handle = controller.start(lights, retries).await?;
    tracing::info!(run_id = %handle.run_id, now_playing = ?cli.now_playing, "sync loop running");

    let interrupt = controller.clone();
    let interrupted = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            if let Err(err) = interrupt.stop(&interrupted) {
                tracing::warn!(error = %err, "could not stop sync loop");
            }
        }
    });

    let report = controller.wait(&handle).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_status(cli: &Cli, config: AppConfig) -> spotihue_core::Result<()> {
    let controller = controller(cli, config, &[])?;
    let status = controller.status()?;
    let track = controller.current_track()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "running": status.running,
            "run_id": status.run_id,
            "track": track,
        }))?
    );
    Ok(())
}

fn run_stop(cli: &Cli, config: AppConfig) -> spotihue_core::Result<()> {
    let stopped = controller(cli, config, &[])?.stop_current()?;
    tracing::info!(run_id = %stopped.run_id, "stop requested");
    Ok(())
}

async fn run_lights(cli: &Cli, config: AppConfig, lights: &[String]) -> spotihue_core::Result<()> {
    let controller = controller(cli, config, lights)?;
    if !controller.bridge_ready().await {
        controller.setup_bridge().await?;
    }
    let fixtures = controller.available_lights().await?;
    println!("{}", serde_json::to_string_pretty(&fixtures)?);
    Ok(())
}

fn controller(cli: &Cli, config: AppConfig, lights: &[String]) -> spotihue_core::Result<Controller> {
    let store: Arc<dyn StateStore> = Arc::new(SqliteStore::open(&cli.state)?);
    let deps = Dependencies {
        tracks: Arc::new(NowPlayingFile::new(&cli.now_playing)),
        artwork: Arc::new(LocalOrHttpArtwork::new()?),
        lights: Arc::new(LoggingLights::new(lights)),
        store,
    };
    Controller::new(config, deps)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Sync smart lights to album artwork", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite file holding run state, shared between invocations.
    #[arg(long, global = true, default_value = "spotihue-state.db")]
    state: PathBuf,
    /// JSON file describing the track that is currently playing.
    #[arg(long, global = true, default_value = "now-playing.json")]
    now_playing: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the light colors derived from an image file.
    Extract {
        image: PathBuf,
        /// Number of colors to derive.
        #[arg(short = 'k', long)]
        clusters: Option<usize>,
        /// Resize percentage applied before clustering.
        #[arg(long)]
        resize: Option<f64>,
    },
    /// Run the sync loop in the foreground until nothing is playing.
    Run {
        /// Comma separated fixture names.
        #[arg(long, value_delimiter = ',', required = true)]
        lights: Vec<String>,
        /// Polls with nothing playing before the loop gives up.
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },
    /// Report whether a loop is running and the last track it saw.
    Status,
    /// Stop the running loop, including one started by another process.
    Stop,
    /// List the fixtures the light controller reports.
    Lights {
        #[arg(long, value_delimiter = ',')]
        lights: Vec<String>,
    },
}
