//! Process configuration.
//!
//! [`SeatlineConfig`] is built once at startup from command-line flags with
//! environment fallbacks and then passed by reference to every constructor.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::network::{NetworkConfig, TlsConfig};
use crate::service::{DispatchConfig, RetryPolicy};

/// Hall seeded at startup and served by `POST /ticket`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HallConfig {
    pub default_hall_id: String,
    pub rows: u32,
    pub cols: u32,
}

impl Default for HallConfig {
    fn default() -> Self {
        Self {
            default_hall_id: "main".to_string(),
            rows: 50,
            cols: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Everything the server needs to boot.
#[derive(Debug, Clone)]
pub struct SeatlineConfig {
    pub network: NetworkConfig,
    pub dispatch: DispatchConfig,
    /// `memory:` or `redb:<path>`.
    pub datasource: String,
    /// Port for the Prometheus exporter; `None` disables it.
    pub metrics_port: Option<u16>,
    pub hall: HallConfig,
    pub log_format: LogFormat,
}

impl Default for SeatlineConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            dispatch: DispatchConfig::default(),
            datasource: "memory:".to_string(),
            metrics_port: None,
            hall: HallConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Seatline reactive dispatch server.
#[derive(Debug, Parser)]
#[command(name = "seatline-server", version, about)]
pub struct Cli {
    #[arg(long, env = "SEATLINE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SEATLINE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// `memory:` or `redb:<path>`.
    #[arg(long, env = "SEATLINE_DATASOURCE", default_value = "memory:")]
    pub datasource: String,

    #[arg(long, env = "SEATLINE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Comma-separated allowed CORS origins.
    #[arg(long, env = "SEATLINE_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,

    #[arg(long, env = "SEATLINE_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Per-operation deadline; 0 disables it.
    #[arg(long, env = "SEATLINE_OPERATION_TIMEOUT_MS", default_value_t = 30_000)]
    pub operation_timeout_ms: u64,

    #[arg(long, env = "SEATLINE_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    pub drain_timeout_secs: u64,

    /// Concurrent dispatch cap; the excess is answered 503. At least 1.
    #[arg(
        long,
        env = "SEATLINE_MAX_CONCURRENT",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_concurrent_operations: u32,

    /// Commit-conflict retries after the first attempt.
    #[arg(long, env = "SEATLINE_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    #[arg(long, env = "SEATLINE_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "SEATLINE_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    #[arg(long, env = "SEATLINE_HALL_ID", default_value = "main")]
    pub hall_id: String,

    #[arg(long, env = "SEATLINE_HALL_ROWS", default_value_t = 50)]
    pub hall_rows: u32,

    #[arg(long, env = "SEATLINE_HALL_COLS", default_value_t = 100)]
    pub hall_cols: u32,

    #[arg(long, env = "SEATLINE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Cli {
    #[must_use]
    pub fn into_config(self) -> SeatlineConfig {
        let tls = match (self.tls_cert, self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path,
                key_path,
            }),
            _ => None,
        };

        let dispatch = DispatchConfig {
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..RetryPolicy::default()
            },
            operation_timeout: (self.operation_timeout_ms > 0)
                .then(|| Duration::from_millis(self.operation_timeout_ms)),
            max_concurrent_operations: self.max_concurrent_operations,
            ..DispatchConfig::default()
        };

        SeatlineConfig {
            network: NetworkConfig {
                host: self.host,
                port: self.port,
                tls,
                cors_origins: self.cors_origins,
                request_timeout: Duration::from_secs(self.request_timeout_secs),
                drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            },
            dispatch,
            datasource: self.datasource,
            metrics_port: self.metrics_port,
            hall: HallConfig {
                default_hall_id: self.hall_id,
                rows: self.hall_rows,
                cols: self.hall_cols,
            },
            log_format: self.log_format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_memory_and_seed_main_hall() {
        let config = SeatlineConfig::default();
        assert_eq!(config.datasource, "memory:");
        assert_eq!(config.hall, HallConfig::default());
        assert_eq!(config.hall.rows, 50);
        assert_eq!(config.hall.cols, 100);
        assert!(config.metrics_port.is_none());
    }

    #[test]
    fn cli_defaults_match_config_defaults() {
        let config = Cli::parse_from(["seatline-server"]).into_config();
        assert_eq!(config.network.port, 8080);
        assert_eq!(config.network.cors_origins, vec!["*".to_string()]);
        assert!(config.network.tls.is_none());
        assert_eq!(config.dispatch.retry, RetryPolicy::default());
        assert_eq!(config.dispatch.operation_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.hall, HallConfig::default());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn cli_flags_override_defaults() {
        let config = Cli::parse_from([
            "seatline-server",
            "--port",
            "9000",
            "--datasource",
            "redb:/tmp/seatline.redb",
            "--operation-timeout-ms",
            "0",
            "--max-retries",
            "1",
            "--cors-origins",
            "https://a.example,https://b.example",
            "--tls-cert",
            "cert.pem",
            "--tls-key",
            "key.pem",
            "--log-format",
            "json",
        ])
        .into_config();

        assert_eq!(config.network.port, 9000);
        assert_eq!(config.datasource, "redb:/tmp/seatline.redb");
        assert!(config.dispatch.operation_timeout.is_none());
        assert_eq!(config.dispatch.retry.max_retries, 1);
        assert_eq!(config.network.cors_origins.len(), 2);
        assert_eq!(
            config.network.tls.map(|t| t.cert_path),
            Some(PathBuf::from("cert.pem"))
        );
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn zero_concurrency_cap_is_rejected() {
        let err = Cli::try_parse_from(["seatline-server", "--max-concurrent-operations", "0"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let config = Cli::parse_from(["seatline-server", "--max-concurrent-operations", "1"])
            .into_config();
        assert_eq!(config.dispatch.max_concurrent_operations, 1);
    }

    #[test]
    fn tls_cert_without_key_is_rejected() {
        assert!(Cli::try_parse_from(["seatline-server", "--tls-cert", "cert.pem"]).is_err());
    }
}
