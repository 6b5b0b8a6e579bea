//! Configuration types and constants for the keepsake-web server.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::storage::DEFAULT_MAX_CONTENT_CHARS;

pub(crate) const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub(crate) const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Direct messaging server for keepsake.
///
/// Serves the conversation list, threads, sends and read-state over a JSON
/// REST API and persists messages in SQLite.
///
/// Configuration can be set via CLI arguments or environment variables.
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug, Default)]
#[command(name = "keepsake-web", version, about)]
pub struct Cli {
    /// HTTP server bind address [env: KEEPSAKE_BIND] [default: 127.0.0.1:3000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Data directory for the database [env: KEEPSAKE_HOME] [default: ~/.keepsake]
    #[arg(long, short = 'd')]
    pub data_dir: Option<PathBuf>,

    /// Longest accepted message, in characters [env: KEEPSAKE_MAX_CONTENT_CHARS] [default: 2000]
    #[arg(long)]
    pub max_content_chars: Option<usize>,

    /// How long a request may wait for the store before failing
    /// [env: KEEPSAKE_REQUEST_TIMEOUT_MS] [default: 5000]
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub max_content_chars: usize,
    pub request_timeout: Duration,
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            crate::tlog!("config: ignoring unparseable {}={:?}", name, raw);
            None
        }
    }
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Self {
        let data_dir = cli
            .data_dir
            .or_else(|| std::env::var("KEEPSAKE_HOME").ok().map(PathBuf::from))
            .unwrap_or_else(|| {
                std::env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".keepsake"))
                    .unwrap_or_else(|_| PathBuf::from(".keepsake"))
            });

        let bind_addr = cli
            .bind
            .or_else(|| std::env::var("KEEPSAKE_BIND").ok())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let max_content_chars = cli
            .max_content_chars
            .or_else(|| env_parsed("KEEPSAKE_MAX_CONTENT_CHARS"))
            .unwrap_or(DEFAULT_MAX_CONTENT_CHARS);

        let request_timeout_ms = cli
            .request_timeout_ms
            .or_else(|| env_parsed("KEEPSAKE_REQUEST_TIMEOUT_MS"))
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);

        Self {
            bind_addr,
            data_dir,
            max_content_chars,
            request_timeout: Duration::from_millis(request_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_values_win() {
        let cli = Cli {
            bind: Some("0.0.0.0:9000".to_string()),
            data_dir: Some(PathBuf::from("/tmp/keepsake-cfg")),
            max_content_chars: Some(10),
            request_timeout_ms: Some(250),
        };
        let config = Config::from_cli_and_env(cli);
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/keepsake-cfg"));
        assert_eq!(config.max_content_chars, 10);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from(["keepsake-web", "-b", "127.0.0.1:4000", "--max-content-chars", "42"]);
        assert_eq!(cli.bind.as_deref(), Some("127.0.0.1:4000"));
        assert_eq!(cli.max_content_chars, Some(42));
        assert!(cli.data_dir.is_none());
    }
}
