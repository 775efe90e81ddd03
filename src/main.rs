//! Shipwright - Entry Point
//!
//! A deployment orchestration service: point it at a GitHub repository
//! and it clones the code, infers the build, runs it in an isolated
//! container and publishes the result through Netlify or Vercel.

use shipwright::app::options::AppOptions;
use shipwright::app::run::run;
use shipwright::config::Config;
use shipwright::logs::{init_logging, LogOptions};
use shipwright::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Print version and exit
    let version = version_info();
    if std::env::args().any(|arg| arg == "--version" || arg == "-V") {
        println!("{}", serde_json::to_string_pretty(&version).unwrap());
        return;
    }

    // Build the typed configuration once, up front
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: config.log_level.clone(),
        json_format: config.log_json,
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    info!("Starting shipwright {} ({})", version.version, version.git_hash);

    let options = AppOptions::from_config(&config);
    let result = run(options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the service: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
