//! Pinpix command line interface: drop pins, browse and maintain their albums.

use album_sync::{AlbumEvent, AlbumSync};
use clap::{Parser, Subcommand};
use flickr_client::FlickrClient;
use pin_store::{Photo, PinStore};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_appender::rolling;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser)]
#[command(name = "pinpix", author, version, about = "Map pin photo album manager")]
struct Cli {
    /// Override log level (e.g. info, debug)
    #[arg(long)]
    log_level: Option<String>,
    /// Flickr API key (falls back to the config file, then FLICKR_API_KEY)
    #[arg(long)]
    api_key: Option<String>,
    /// Ceiling on the random page drawn when fetching an album
    #[arg(long)]
    page_cap: Option<u32>,
    /// Concurrent downloads used by `preload`
    #[arg(long)]
    preload_concurrency: Option<usize>,
    /// HTTP request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Directory holding the database and logs
    #[arg(long)]
    cache_path: Option<PathBuf>,
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop a pin at a coordinate
    DropPin {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
    },
    /// List all dropped pins
    ListPins,
    /// Delete a pin and its album
    DeletePin {
        id: i64,
    },
    /// Open a pin's album, fetching one if none is persisted
    Album {
        pin_id: i64,
    },
    /// Discard a pin's album and fetch a fresh random one
    Refresh {
        pin_id: i64,
    },
    /// Delete specific photos from a pin's album
    DeletePhotos {
        pin_id: i64,
        /// Ids of the photos to delete
        photo_ids: Vec<i64>,
    },
    /// Download the image bytes of a single photo
    Load {
        photo_id: i64,
    },
    /// Download pending image bytes for a whole album
    Preload {
        pin_id: i64,
    },
    /// Show pin and photo counts
    Status,
    /// Write the active configuration to the config file
    InitConfig,
}

fn require_api_key(cfg: &config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if cfg.api_key.is_empty() {
        return Err(
            "No Flickr API key configured; set api_key in the config file, \
             pass --api-key, or export FLICKR_API_KEY"
                .into(),
        );
    }
    Ok(())
}

fn make_sync(cfg: &config::AppConfig, store: PinStore) -> AlbumSync {
    let mut client = FlickrClient::new(cfg.api_key.clone());
    client.set_per_page(cfg.per_page);
    client.set_page_cap(cfg.page_cap);
    if let Some(secs) = cfg.request_timeout_secs {
        client.set_timeout(Duration::from_secs(secs));
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                AlbumEvent::PhotosAdded { pin_id, photo_ids } => {
                    println!("Added {} photos to pin {}", photo_ids.len(), pin_id)
                }
                AlbumEvent::PhotosRemoved { pin_id, photo_ids } => {
                    println!("Removed {} photos from pin {}", photo_ids.len(), pin_id)
                }
                AlbumEvent::PhotoLoaded { pin_id, photo_id } => {
                    println!("Loaded photo {} (pin {})", photo_id, pin_id)
                }
            }
        }
    });

    AlbumSync::with_events(client, store, tx)
}

fn print_album(pin_id: i64, photos: &[Photo]) {
    println!("Album for pin {}: {} photos", pin_id, photos.len());
    for photo in photos {
        let status = if photo.is_pending() { "pending" } else { "loaded" };
        println!("  {} [{}] {}", photo.id, status, photo.remote_url);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let overrides = config::AppConfigOverrides {
        log_level: cli.log_level.clone(),
        api_key: cli.api_key.clone(),
        page_cap: cli.page_cap,
        preload_concurrency: cli.preload_concurrency,
        request_timeout_secs: cli.timeout_secs,
        cache_path: cli.cache_path.clone(),
    };
    let cfg = config::AppConfig::load_from(cli.config.clone()).apply_overrides(&overrides);

    let base_dir = cfg.cache_path.clone();
    std::fs::create_dir_all(&base_dir)?;
    let file_appender = rolling::daily(&base_dir, "pinpix.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cfg.log_level.clone()))
        .with_writer(std::io::stdout.and(file_writer))
        .init();

    let db_path = base_dir.join("pinpix.sqlite");
    let store = PinStore::new(&db_path)?;
    tracing::debug!(db = %db_path.display(), "Opened pin store");

    match cli.command {
        Commands::DropPin {
            latitude,
            longitude,
        } => {
            if let Some(existing) = store.find_pin_async(latitude, longitude).await? {
                println!(
                    "A pin already exists at this coordinate (id {})",
                    existing.id
                );
            }
            let pin = store.create_pin_async(latitude, longitude).await?;
            println!("Dropped pin {} at ({}, {})", pin.id, pin.latitude, pin.longitude);
        }
        Commands::ListPins => {
            let pins = store.list_pins_async().await?;
            if pins.is_empty() {
                println!("No pins dropped yet");
            }
            for pin in pins {
                let photos = store.photo_count_async(pin.id).await?;
                println!(
                    "{}: ({}, {}) {} photos, dropped {}",
                    pin.id, pin.latitude, pin.longitude, photos, pin.created_at
                );
            }
        }
        Commands::DeletePin { id } => {
            store.delete_pin_async(id).await?;
            println!("Deleted pin {}", id);
        }
        Commands::Album { pin_id } => {
            require_api_key(&cfg)?;
            let sync = make_sync(&cfg, store.clone());
            let photos = sync.open_album(pin_id).await?;
            print_album(pin_id, &photos);
        }
        Commands::Refresh { pin_id } => {
            require_api_key(&cfg)?;
            let sync = make_sync(&cfg, store.clone());
            let photos = sync.refresh_album(pin_id).await?;
            print_album(pin_id, &photos);
        }
        Commands::DeletePhotos { pin_id, photo_ids } => {
            let sync = make_sync(&cfg, store.clone());
            let count = photo_ids.len();
            sync.delete_photos(pin_id, photo_ids).await?;
            println!("Deleted {} photos from pin {}", count, pin_id);
        }
        Commands::Load { photo_id } => {
            require_api_key(&cfg)?;
            let sync = make_sync(&cfg, store.clone());
            match sync.ensure_photo(photo_id).await? {
                Some(photo) => println!(
                    "Photo {} has {} bytes",
                    photo.id,
                    photo.image_data.map(|b| b.len()).unwrap_or(0)
                ),
                None => println!("Photo {} no longer exists", photo_id),
            }
        }
        Commands::Preload { pin_id } => {
            require_api_key(&cfg)?;
            let sync = make_sync(&cfg, store.clone());
            let loaded = sync.preload_album(pin_id, cfg.preload_concurrency).await?;
            println!("Materialized {} photos for pin {}", loaded, pin_id);
        }
        Commands::Status => {
            let pins = store.list_pins_async().await?;
            let mut photos = 0u32;
            for pin in &pins {
                photos += store.photo_count_async(pin.id).await?;
            }
            println!("{} pins, {} photos", pins.len(), photos);
        }
        Commands::InitConfig => {
            cfg.save_to(cli.config.clone())?;
            println!("Wrote configuration");
        }
    }

    Ok(())
}
