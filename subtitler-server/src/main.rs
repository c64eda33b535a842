mod config;
mod error;
mod routes;
mod ws;

use std::sync::Arc;

use clap::Parser;
use subtitler::model::ModelCache;
use subtitler::{BatchRunner, ConnectionRegistry, JobRegistry, ModelSize, TranscriptionEngine};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::routes::AppState;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("subtitler=info,subtitler_server=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if config.list_models {
        print_models(&config);
        return;
    }

    if let Some(model_name) = &config.download_model {
        let Some(size) = ModelSize::parse_name(model_name) else {
            eprintln!("Unknown model: {model_name}");
            eprintln!("Use --list-models to see available models");
            std::process::exit(1);
        };
        let cache = ModelCache::new(config.whisper_options().resolve_cache_dir());
        match cache.fetch(size).await {
            Ok(path) => println!("Model ready: {}", path.display()),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let media_root = match std::fs::canonicalize(&config.media_root) {
        Ok(root) => root,
        Err(e) => {
            error!(path = %config.media_root.display(), error = %e, "media root is not accessible");
            std::process::exit(1);
        }
    };

    let runner_config = config.runner_config();
    let connections = Arc::new(ConnectionRegistry::new(runner_config.cancel_wait));
    let jobs = Arc::new(JobRegistry::new(runner_config.job_retention));
    let runner = Arc::new(BatchRunner::new(
        runner_config.clone(),
        build_engine(&config),
        connections,
        jobs,
    ));

    let app = routes::router(AppState {
        runner,
        media_root: Arc::new(media_root.clone()),
    });

    let addr = match config.bind_addr() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Invalid listen address {}:{}: {e}", config.host, config.port);
            std::process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(
        %addr,
        media_root = %media_root.display(),
        max_concurrent = runner_config.max_concurrent_transcriptions,
        "subtitler server listening"
    );

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

#[cfg(feature = "whisper")]
fn build_engine(config: &Config) -> Arc<dyn TranscriptionEngine> {
    Arc::new(subtitler::WhisperEngine::new(config.whisper_options()))
}

#[cfg(not(feature = "whisper"))]
fn build_engine(_config: &Config) -> Arc<dyn TranscriptionEngine> {
    tracing::warn!("built without the \"whisper\" feature, every transcription will fail");
    Arc::new(subtitler::UnavailableEngine)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn print_models(config: &Config) {
    println!("{:<16} SIZE", "MODEL");
    println!("{:<16} ----", "-----");
    for size in ModelSize::all() {
        println!("{:<16} {}", size.name(), size.approx_size());
    }

    let cache = ModelCache::new(config.whisper_options().resolve_cache_dir());
    let cached = cache.cached();
    if !cached.is_empty() {
        println!("\nCached models in {}:", cache.dir().display());
        for path in cached {
            let size = std::fs::metadata(&path)
                .map(|m| format_bytes(m.len()))
                .unwrap_or_default();
            println!(
                "  {} ({})",
                path.file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                size
            );
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.0} MB", bytes as f64 / 1_048_576.0)
    } else {
        format!("{bytes} B")
    }
}
