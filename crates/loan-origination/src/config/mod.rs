use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::workflows::loan::{ActivityOptions, LoanActivityOptions, RetryPolicy, WorkflowSettings};

const SECONDS_PER_HOUR: u64 = 60 * 60;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the loan origination service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub workflow: WorkflowConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            workflow: WorkflowConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Deadlines and activity bounds for hosted loan processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub stage_deadline_hours: u64,
    pub funding_deadline_hours: u64,
    pub activity_timeout_secs: u64,
    pub activity_max_attempts: u32,
    /// Attempts the simulated credit bureau fails before answering.
    pub credit_check_failures: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            stage_deadline_hours: 720,
            funding_deadline_hours: 168,
            activity_timeout_secs: 10,
            activity_max_attempts: 5,
            credit_check_failures: 2,
        }
    }
}

impl WorkflowConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let activity_max_attempts = read_number(
            "LOAN_ACTIVITY_MAX_ATTEMPTS",
            defaults.activity_max_attempts,
        )?;
        if activity_max_attempts == 0 {
            return Err(ConfigError::InvalidAttempts);
        }

        Ok(Self {
            stage_deadline_hours: read_number(
                "LOAN_STAGE_DEADLINE_HOURS",
                defaults.stage_deadline_hours,
            )?,
            funding_deadline_hours: read_number(
                "LOAN_FUNDING_DEADLINE_HOURS",
                defaults.funding_deadline_hours,
            )?,
            activity_timeout_secs: read_number(
                "LOAN_ACTIVITY_TIMEOUT_SECS",
                defaults.activity_timeout_secs,
            )?,
            activity_max_attempts,
            credit_check_failures: read_number(
                "LOAN_CREDIT_CHECK_FAILURES",
                defaults.credit_check_failures,
            )?,
        })
    }

    pub fn settings(&self) -> WorkflowSettings {
        let activity = ActivityOptions {
            start_to_close_timeout: Duration::from_secs(self.activity_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.activity_max_attempts,
                ..RetryPolicy::default()
            },
        };

        WorkflowSettings {
            stage_deadline: Duration::from_secs(self.stage_deadline_hours * SECONDS_PER_HOUR),
            funding_deadline: Duration::from_secs(self.funding_deadline_hours * SECONDS_PER_HOUR),
            activities: LoanActivityOptions::uniform(activity),
        }
    }
}

fn read_number<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str, value: String },
    InvalidAttempts,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a non-negative integer, got '{value}'")
            }
            ConfigError::InvalidAttempts => {
                write!(f, "LOAN_ACTIVITY_MAX_ATTEMPTS must be at least 1")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidAttempts => None,
        }
    }
}
