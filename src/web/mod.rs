//! keepsake-web: direct messaging server.
//!
//! Provides the REST API for conversations, threads, sends and read-state,
//! and persists everything in SQLite.

pub mod config;
pub mod handlers;
pub mod router;
pub mod session;
pub mod state;
pub mod utils;

use clap::Parser;

use crate::service::MessagingService;
use crate::storage::{db_path, Storage};

use config::{Cli, Config};
use state::SharedState;

/// Entry point: parse CLI, open the store, start server.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(cli);

    crate::logging::init();

    crate::tlog!("keepsake-web starting");
    crate::tlog!("  data directory: {}", config.data_dir.display());

    std::fs::create_dir_all(&config.data_dir)?;
    let path = db_path(&config.data_dir);
    let storage = Storage::open(&path)?.with_max_content_chars(config.max_content_chars);
    crate::tlog!("  database: {}", path.display());
    crate::tlog!("  max content: {} chars", config.max_content_chars);
    crate::tlog!(
        "  request timeout: {}ms",
        config.request_timeout.as_millis()
    );

    let state = SharedState::new(MessagingService::new(storage), config.request_timeout);
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    crate::tlog!("keepsake-web listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            crate::tlog!("keepsake-web shutting down");
        })
        .await?;
    Ok(())
}
