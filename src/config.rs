//! Configuration for civic-pulse
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// civic-pulse - issue aggregate engine and real-time notification gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "civic-pulse")]
#[command(about = "Aggregates citizen issue reports and pushes live updates")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (dev JWT secret, in-memory store fallback)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "civic_pulse")]
    pub mongodb_db: String,

    /// JWT secret for token validation (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Upper bound for a single store round trip, in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000")]
    pub store_timeout_ms: u64,

    /// Overall deadline for one issue mutation, lock wait and retries included
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "15000")]
    pub request_timeout_ms: u64,

    /// How many times a lost compare-and-swap is retried before giving up
    #[arg(long, env = "MAX_CAS_RETRIES", default_value = "5")]
    pub max_cas_retries: u32,

    /// Radius in kilometers used to find users near a new issue
    #[arg(long, env = "NEARBY_RADIUS_KM", default_value = "5.0")]
    pub nearby_radius_km: f64,

    /// Outbound queue length per live connection
    #[arg(long, env = "CONNECTION_BUFFER", default_value = "256")]
    pub connection_buffer: usize,
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        match (&self.jwt_secret, self.dev_mode) {
            (Some(secret), _) => Some(secret.clone()),
            (None, true) => Some("dev-only-insecure-secret-not-for-production".to_string()),
            (None, false) => None,
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if !(self.nearby_radius_km.is_finite() && self.nearby_radius_km > 0.0) {
            return Err("NEARBY_RADIUS_KM must be a positive number".to_string());
        }

        if self.connection_buffer == 0 {
            return Err("CONNECTION_BUFFER must be at least 1".to_string());
        }

        if self.store_timeout_ms == 0 {
            return Err("STORE_TIMEOUT_MS must be at least 1".to_string());
        }

        if self.request_timeout_ms < self.store_timeout_ms {
            return Err("REQUEST_TIMEOUT_MS must not be shorter than STORE_TIMEOUT_MS".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["civic-pulse"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_production_requires_secret() {
        let args = parse(&[]);
        if args.jwt_secret.is_none() {
            assert!(args.validate().is_err());
        }
    }

    #[test]
    fn test_dev_mode_provides_secret() {
        let args = parse(&["--dev-mode"]);
        assert!(args.jwt_secret().is_some());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_radius() {
        let args = parse(&["--dev-mode", "--nearby-radius-km=-1"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_request_deadline_covers_store_timeout() {
        let args = parse(&["--dev-mode", "--store-timeout-ms=2000", "--request-timeout-ms=500"]);
        assert!(args.validate().is_err());

        let args = parse(&["--dev-mode", "--store-timeout-ms=500", "--request-timeout-ms=2000"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.request_timeout(), Duration::from_secs(2));
    }
}
