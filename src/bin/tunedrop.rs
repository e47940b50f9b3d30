use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use teloxide::prelude::*;
use tracing_subscriber::EnvFilter;

use tunedrop::config::ConfigLoader;
use tunedrop::error::BotError;
use tunedrop::fetcher::{BoundedFetcher, SpotdlFetcher};
use tunedrop::link::LinkExpander;
use tunedrop::pipeline::{DeliveryOptions, Pipeline};
use tunedrop::quota::{FileQuotaStore, QuotaStore};
use tunedrop::resolver::SpotdlResolver;
use tunedrop::router::{BotState, Command, handle_command, handle_text};
use tunedrop::spotdl::SpotdlTool;

#[derive(Parser)]
#[command(name = "tunedrop")]
#[command(about = "Telegram bot that sends Spotify songs back as MP3 files")]
#[command(version, author)]
struct Cli {
    /// JSON settings file (defaults to ./tunedrop.json when present)
    #[arg(long)]
    config: Option<String>,

    /// Working directory for downloads, overrides the settings file
    #[arg(long)]
    download_dir: Option<Utf8PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<BotError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BotError) -> u8 {
    match error {
        BotError::ConfigurationMissing(_)
        | BotError::ConfigRead(_)
        | BotError::ConfigParse(_)
        | BotError::InvalidSetting { .. } => 2,
        BotError::MissingTool(_) => 3,
        _ => 1,
    }
}

async fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(dir) = cli.download_dir {
        config.download_dir = dir;
    }

    let tool = SpotdlTool::new(&config.spotdl_bin, &config.credentials)?;
    tracing::info!(spotdl = %tool.program().display(), "using spotdl");

    std::fs::create_dir_all(config.download_dir.as_std_path()).into_diagnostic()?;
    let quota = FileQuotaStore::new(config.counter_file.clone(), config.quota_ceiling);
    let record = quota.current()?;
    tracing::info!(
        week = record.week,
        count = record.count,
        ceiling = quota.ceiling(),
        "download counter loaded"
    );

    let pipeline = Pipeline::new(
        quota,
        SpotdlResolver::new(tool.clone()),
        BoundedFetcher::new(SpotdlFetcher::new(tool), config.fetch_workers),
        DeliveryOptions::from_config(&config),
    );
    let state = Arc::new(BotState {
        pipeline,
        expander: LinkExpander::new()?,
    });

    let bot = Bot::new(config.credentials.telegram_token.clone());
    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text));

    tracing::info!(download_dir = %config.download_dir, "starting bot in polling mode");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}
