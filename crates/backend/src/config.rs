use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveTime, Utc, Weekday};
use serde::Deserialize;
use std::path::Path;

use crate::challenge::window::TradingWindow;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub portfolio: PortfolioConfig,
    pub challenge: ChallengeConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_body_limit() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub session_ttl_hours: i64,
    #[serde(default)]
    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioConfig {
    pub sandbox_name: String,
    pub sandbox_initial_balance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeConfig {
    pub name: String,
    /// RFC 3339 instant before which CONCOURS wallets cannot trade.
    pub launch_date: String,
    pub initial_balance: f64,
    pub required_unique_tickers: u32,
    /// Three-letter or full English weekday names.
    pub trading_days: Vec<String>,
    /// "HH:MM", local to `utc_offset_hours`.
    pub session_open: String,
    pub session_close: String,
    #[serde(default)]
    pub utc_offset_hours: i32,
}

impl ChallengeConfig {
    pub fn launch_date(&self) -> Result<DateTime<Utc>> {
        let parsed = DateTime::parse_from_rfc3339(&self.launch_date)
            .with_context(|| format!("challenge.launch_date is not RFC 3339: {}", self.launch_date))?;
        Ok(parsed.with_timezone(&Utc))
    }

    /// Build the trading window described by this section.
    pub fn trading_window(&self) -> Result<TradingWindow> {
        let days = self
            .trading_days
            .iter()
            .map(|d| {
                d.parse::<Weekday>()
                    .map_err(|e| anyhow::anyhow!("challenge.trading_days: invalid day {d:?}: {e}"))
            })
            .collect::<Result<Vec<_>>>()?;
        let open = parse_hhmm("challenge.session_open", &self.session_open)?;
        let close = parse_hhmm("challenge.session_close", &self.session_close)?;
        let offset = FixedOffset::east_opt(self.utc_offset_hours * 3600).with_context(|| {
            format!(
                "challenge.utc_offset_hours out of range: {}",
                self.utc_offset_hours
            )
        })?;
        Ok(TradingWindow::new(
            self.launch_date()?,
            days,
            open,
            close,
            offset,
        ))
    }
}

fn parse_hhmm(field: &str, value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .with_context(|| format!("{field} must be HH:MM, got {value:?}"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub log_level: String,
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).context("failed to parse afribourse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        anyhow::ensure!(
            self.server.body_limit_bytes > 0,
            "server.body_limit_bytes must be > 0"
        );
        anyhow::ensure!(
            self.auth.session_ttl_hours > 0,
            "auth.session_ttl_hours must be > 0"
        );
        anyhow::ensure!(
            self.portfolio.sandbox_initial_balance > 0.0,
            "portfolio.sandbox_initial_balance must be > 0"
        );
        anyhow::ensure!(
            self.challenge.initial_balance > 0.0,
            "challenge.initial_balance must be > 0"
        );
        anyhow::ensure!(
            !self.challenge.trading_days.is_empty(),
            "challenge.trading_days must not be empty"
        );
        anyhow::ensure!(
            (-12..=14).contains(&self.challenge.utc_offset_hours),
            "challenge.utc_offset_hours must be in [-12, 14]"
        );

        let open = parse_hhmm("challenge.session_open", &self.challenge.session_open)?;
        let close = parse_hhmm("challenge.session_close", &self.challenge.session_close)?;
        anyhow::ensure!(
            open < close,
            "challenge.session_open must be before challenge.session_close"
        );
        self.challenge.trading_window()?;
        Ok(())
    }

    pub fn default_config_path() -> String {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));

        if let Some(dir) = &exe_dir {
            let candidate = dir.join("afribourse.toml");
            if candidate.exists() {
                return candidate.to_string_lossy().to_string();
            }
        }

        let candidate = Path::new("config/afribourse.toml");
        if candidate.exists() {
            return candidate.to_string_lossy().to_string();
        }

        // Development checkout
        let candidate = Path::new("crates/backend/config/afribourse.toml");
        if candidate.exists() {
            return candidate.to_string_lossy().to_string();
        }

        "config/afribourse.toml".to_string()
    }
}

#[cfg(test)]
pub(crate) fn sample_config() -> &'static str {
    r#"
[server]
host = "127.0.0.1"
port = 8080

[database]
path = "data/afribourse.db"

[auth]
session_ttl_hours = 24

[portfolio]
sandbox_name = "Mon Portefeuille Virtuel"
sandbox_initial_balance = 1000000.0

[challenge]
name = "Challenge AfriBourse 2026"
launch_date = "2026-02-02T00:00:00Z"
initial_balance = 1000000.0
required_unique_tickers = 5
trading_days = ["Mon", "Tue", "Wed", "Thu", "Fri"]
session_open = "09:00"
session_close = "15:30"
utc_offset_hours = 0

[observability]
service_name = "afribourse"
log_level = "info"
"#
}
