use anyhow::{Context, Result};
use chunkdrop::common::Config;
use chunkdrop::send::{SendOptions, UploadClient};
use chunkdrop::server;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "chunkdrop")]
#[command(about = "Chunked file upload server and sender")]
#[command(version)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(short, long, global = true, env = "CHUNKDROP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive uploads into the shared directory
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory for completed files
        #[arg(short, long)]
        storage: Option<PathBuf>,

        /// Scratch directory for in-flight chunks
        #[arg(long)]
        temp: Option<PathBuf>,
    },

    /// Upload files to a running server as one batch
    Send {
        #[arg(required = true, help = "Files to send")]
        paths: Vec<PathBuf>,

        #[arg(short = 'S', long, default_value = "http://localhost:3001")]
        server: String,

        /// Chunk size in KiB
        #[arg(long, default_value_t = 1024)]
        chunk_size: u64,

        /// Chunks in flight per file
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Batch id shared by all files (generated when omitted)
        #[arg(short, long)]
        batch: Option<String>,

        /// Send a SHA-256 with every chunk
        #[arg(long)]
        verify: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            port,
            storage,
            temp,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(storage) = storage {
                config.storage_dir = storage;
            }
            if let Some(temp) = temp {
                config.temp_dir = temp;
            }
            server::start_server(config).await
        }
        Commands::Send {
            paths,
            server,
            chunk_size,
            concurrency,
            batch,
            verify,
        } => {
            let options = SendOptions {
                chunk_size: chunk_size
                    .checked_mul(1024)
                    .filter(|size| *size > 0)
                    .context("chunk size must be between 1 KiB and u64::MAX bytes")?,
                concurrency,
                batch_id: Some(batch.unwrap_or_else(|| format!("batch_{}", Uuid::new_v4().simple()))),
                verify_chunks: verify,
            };
            send_files(&server, &paths, &options).await
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn send_files(server: &str, paths: &[PathBuf], options: &SendOptions) -> Result<()> {
    let client = UploadClient::new(server)?;
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")?
        .progress_chars("#>-");

    for path in paths {
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))?
            .len();

        let progress = ProgressBar::new(size).with_style(style.clone());
        progress.set_message(path.display().to_string());

        let completed = client.send_file(path, options, &progress).await;
        progress.finish_and_clear();
        let completed = completed.with_context(|| format!("Failed to send {}", path.display()))?;

        println!(
            "sent {} ({} bytes, sha256 {})",
            completed.filename, completed.size, completed.sha256
        );
    }

    if let Some(batch) = &options.batch_id {
        println!("batch: {}/download/batch/{}", server.trim_end_matches('/'), batch);
    }
    Ok(())
}
