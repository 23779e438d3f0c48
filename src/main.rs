use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pixcache::domain::{CacheKey, RequestedSize, ResourceId};
use pixcache::infrastructure::{AppConfig, CliArgs, Command, ImageLoader, StorageManager};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

/// Resolves every id and prints its dimensions and source tier.
async fn fetch(config: &AppConfig, ids: Vec<String>, width: u32, height: u32) -> Result<()> {
    let loader = ImageLoader::new(config.loader_options()).await?;
    let requested = RequestedSize::new(width, height);

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let handle = loader.spawn_load(id.as_str(), requested);
            (id, handle)
        })
        .collect();

    let total = handles.len();
    let mut failed = 0;
    for (id, handle) in handles {
        match handle.await {
            Ok(Ok(loaded)) => println!(
                "{id}: {}x{} from {}",
                loaded.buffer.width(),
                loaded.buffer.height(),
                loaded.source
            ),
            Ok(Err(e)) => {
                eprintln!("{id}: {e}");
                failed += 1;
            }
            Err(e) => {
                eprintln!("{id}: worker failed: {e}");
                failed += 1;
            }
        }
    }

    info!(stats = %loader.memory_cache_stats(), "Fetch finished");

    match failed {
        0 => Ok(()),
        n => Err(eyre!("{n} of {total} images failed to resolve")),
    }
}

async fn stats(config: &AppConfig) -> Result<()> {
    let loader = ImageLoader::new(config.loader_options()).await?;
    if let Some(path) = config.effective_config_path() {
        println!("config: {}", path.display());
    }
    println!("cache level: {}", loader.cache_level());
    match loader.disk_store() {
        Some(disk) => println!(
            "disk: {} entries, {}/{} bytes in {}",
            disk.len(),
            disk.size(),
            disk.max_size(),
            disk.directory().display()
        ),
        None => println!("disk: disabled"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = pixcache::VERSION, "Starting pixcache");

    match args.command {
        Command::Fetch { ids, width, height } => fetch(&config, ids, width, height).await,
        Command::Key { id } => {
            println!("{}", CacheKey::derive(&ResourceId::new(id)));
            Ok(())
        }
        Command::Stats => stats(&config).await,
    }
}
