//! sitesync CLI
//!
//! Local execution entry point for batch syncs and one-off relays.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sitesync::{
    config::load_config,
    error::{AppError, Result},
    models::{Config, RawItem, TaskSnapshot},
    pipeline::{self, Observer},
    services::{
        BackendClient, ContentSource, HtmlContentSource, HttpBackendClient, HttpPageFetcher,
        MediaRelay, SourceKind,
        relay::RelayPhase,
        source::{Category, ListFilter},
    },
    storage::build_store,
    utils::{http::HttpFetcher, log as console, paths},
};

/// sitesync - media relay and record sync
#[derive(Parser, Debug)]
#[command(
    name = "sitesync",
    version,
    about = "Relays site media to object storage and syncs records to the backend"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "sitesync.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync a batch of list items
    Sync {
        /// JSON file holding an array of items
        #[arg(long)]
        input: PathBuf,

        /// Items are audio novels
        #[arg(long)]
        audio: bool,
    },

    /// List categories, or one category page, from the configured site
    List {
        /// Read the audio site layout
        #[arg(long)]
        audio: bool,

        /// Category name to list; omit to print the categories
        #[arg(long)]
        category: Option<String>,

        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Keep entries whose title contains this text
        #[arg(long)]
        keyword: Option<String>,

        /// Keep at most this many entries
        #[arg(long)]
        limit: Option<usize>,

        /// Write the items as JSON for `sync --input`
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Check which upstream ids already exist on the backend
    Exists {
        ids: Vec<u64>,

        /// Ask the audio novel endpoint
        #[arg(long)]
        audio: bool,
    },

    /// Relay one video URL into the media store
    Relay {
        url: String,

        /// Upstream id the media belongs to
        #[arg(long)]
        id: u64,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, config_level: &str) {
    let level = if verbose { "debug" } else { config_level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
    console::init(level);
}

/// Log every terminal task state.
fn progress_observer() -> Observer {
    Arc::new(|snapshot: &TaskSnapshot| {
        if snapshot.status.is_terminal() {
            log::info!(
                "[{}] {} {} {}",
                snapshot.status,
                snapshot.id,
                snapshot.title,
                snapshot
                    .error
                    .as_deref()
                    .or(snapshot.detail.as_deref())
                    .unwrap_or("")
            );
        } else {
            log::debug!(
                "[{}%] {} {} {}",
                snapshot.progress,
                snapshot.id,
                snapshot.step,
                snapshot.detail.as_deref().unwrap_or("")
            );
        }
    })
}

fn source_kind(audio: bool) -> SourceKind {
    if audio {
        SourceKind::Audio
    } else {
        SourceKind::Article
    }
}

fn find_category<'a>(categories: &'a [Category], name: &str) -> Option<&'a Category> {
    categories.iter().find_map(|c| {
        if c.name == name || c.id == name {
            Some(c)
        } else {
            find_category(&c.children, name)
        }
    })
}

fn print_categories(categories: &[Category], depth: usize) {
    for category in categories {
        console::sub_item(&format!(
            "{}{} ({})",
            "  ".repeat(depth),
            category.name,
            category.url
        ));
        print_categories(&category.children, depth + 1);
    }
}

async fn list(
    config: &Config,
    kind: SourceKind,
    category: Option<String>,
    page: u32,
    filter: ListFilter,
    output: Option<PathBuf>,
) -> Result<()> {
    let fetcher = HttpFetcher::new(&config.crawler)?;
    let source = HtmlContentSource::new(
        Arc::new(HttpPageFetcher::new(fetcher)),
        kind,
        &config.extract,
        &config.content,
    )?;
    let categories = source.list_categories().await?;

    let Some(name) = category else {
        console::header(&format!("{} categories", categories.len()));
        print_categories(&categories, 0);
        return Ok(());
    };
    let category = find_category(&categories, &name)
        .ok_or_else(|| AppError::config(format!("unknown category '{name}'")))?;
    let items: Vec<RawItem> = source.list_page(category, page, &filter).await?;
    log::info!("{} items on page {} of {}", items.len(), page, category.name);

    match output {
        Some(path) => {
            std::fs::write(&path, serde_json::to_string_pretty(&items)?)?;
            console::success(&format!("Wrote {} items to {}", items.len(), path.display()));
        }
        None => {
            for item in &items {
                console::sub_item(&format!("{} {} {}", item.id, item.title, item.url));
            }
        }
    }
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(cli.verbose, &config.logging.level);

    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Sync { input, audio } => {
            let content = std::fs::read_to_string(&input)?;
            let items: Vec<RawItem> = serde_json::from_str(&content)?;
            log::info!("Loaded {} items from {}", items.len(), input.display());

            let stats = pipeline::run_sync(
                &config,
                items,
                source_kind(audio),
                Some(progress_observer()),
            )
            .await?;
            if stats.failed > 0 {
                console::warn(&format!("{} of {} items failed", stats.failed, stats.total));
            } else {
                console::success("Sync complete!");
            }
        }

        Command::List {
            audio,
            category,
            page,
            keyword,
            limit,
            output,
        } => {
            let filter = ListFilter { keyword, limit };
            list(&config, source_kind(audio), category, page, filter, output).await?;
        }

        Command::Exists { ids, audio } => {
            config.validate_backend()?;
            let fetcher = HttpFetcher::new(&config.crawler)?;
            let backend = HttpBackendClient::new(fetcher, &config.backend)?;
            let found = if audio {
                backend.audio_exists_batch(&ids).await?
            } else {
                backend.exists_batch(&ids).await?
            };
            for id in &ids {
                match found.get(id) {
                    Some(status) if status.exists => console::sub_item(&format!(
                        "{id}: exists (remote id {})",
                        status
                            .remote_id
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "?".into())
                    )),
                    _ => console::sub_item(&format!("{id}: missing")),
                }
            }
        }

        Command::Relay { url, id } => {
            let fetcher = HttpFetcher::new(&config.crawler)?;
            let store = build_store(&config.storage, fetcher.client().clone()).await?;
            let relay = MediaRelay::new(Arc::new(fetcher), store, &config.relay);
            let target = format!(
                "{}/{}",
                paths::video_dir(&paths::today_prefix(), id),
                paths::video_subdir(0)
            );
            let progress = |phase: RelayPhase, done: usize, total: usize| {
                log::debug!("{:?} {}/{}", phase, done, total);
            };
            match relay.relay_video(&url, &target, &progress).await {
                Some(media) => {
                    console::success(&format!("Relayed to {}", media.resource_key));
                    if let Some(public) = media.public_url {
                        console::sub_item(&public);
                    }
                }
                None => return Err(AppError::relay(format!("relay failed for {url}"))),
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");

            match config.validate_backend() {
                Ok(()) => log::info!("✓ Backend settings OK"),
                Err(e) => log::warn!("Backend settings incomplete: {}", e),
            }

            log::info!("All validations passed!");
        }
    }

    log::info!("Done!");

    Ok(())
}
