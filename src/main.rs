use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use fuser::MountOption;
use tracing_subscriber::EnvFilter;

use shelleyfs::config::Config;
use shelleyfs::fs::{FsCore, mount};
use shelleyfs::shelley::HttpShelleyClient;
use shelleyfs::state::StateStore;

#[derive(Parser)]
#[command(name = "shelleyfs", about = "Mount a Shelley conversation backend as a filesystem")]
struct Cli {
    /// Where to mount the filesystem
    mountpoint: PathBuf,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Unmount automatically when the process exits
    #[arg(long)]
    auto_unmount: bool,

    /// Raise the default log level to debug
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "shelleyfs=debug" } else { "shelleyfs=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;
    let client = Arc::new(HttpShelleyClient::new(
        http_client,
        config.backend_url.clone(),
        config.token.clone(),
    ));

    let store = StateStore::new(&config.state_dir);
    let restored = runtime
        .block_on(store.load_all())
        .with_context(|| format!("failed to load state from {}", config.state_dir.display()))?;
    tracing::info!(count = restored, "restored conversations");

    let core = Arc::new(FsCore::new(
        store,
        client,
        config.cache_capacity,
        config.clone_timeout,
    ));

    let mut options = vec![
        MountOption::FSName("shelleyfs".to_string()),
        MountOption::DefaultPermissions,
        MountOption::NoDev,
        MountOption::NoSuid,
    ];
    if cli.allow_other {
        options.push(MountOption::AllowOther);
    }
    if cli.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }

    tracing::info!(
        mountpoint = %cli.mountpoint.display(),
        backend = %config.backend_url,
        "mounting"
    );
    mount(core, runtime.handle().clone(), &cli.mountpoint, &options)
}
