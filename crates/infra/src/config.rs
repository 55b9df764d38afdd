//! Configuration loading and representation.
//!
//! Values come from environment variables. Unset or empty variables fall back
//! to the defaults below; anything present but unparsable is an error naming
//! the variable.

use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use bastion_auth::{DEFAULT_ACCESS_TTL, DEFAULT_REFRESH_TTL};
use bastion_observability::LogFormat;
use bastion_resilience::{BreakerSettings, RateLimitPolicy};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    /// Grace period for in-flight requests after a shutdown signal.
    pub shutdown_timeout: Duration,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
    pub trusted_proxies: Vec<IpAddr>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub store: CounterBackend,
    pub global: RateLimitPolicy,
    pub healthcheck: RateLimitPolicy,
}

/// Where rate-limit counters live.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CounterBackend {
    /// Shared across instances; the production setting.
    #[default]
    Redis,
    /// Per-process counters. Must be opted into explicitly.
    Memory,
}

impl FromStr for CounterBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown counter store '{other}' (expected redis or memory)")),
        }
    }
}

/// Matches the compose service name used in deployment.
pub const DEFAULT_REDIS_URL: &str = "redis://redis:6379";

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, PartialEq)]
pub struct JwtConfig {
    /// `None` means no secret was configured.
    pub secret: Option<String>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl core::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
    pub jwt: JwtConfig,
    pub breaker: BreakerSettings,
    pub redis_url: String,
    pub database: Option<DatabaseConfig>,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let server = ServerConfig {
            host: env.string("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parse("SERVER_PORT", 8080)?,
            request_timeout: env.secs("SERVER_REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout: env.secs("SERVER_SHUTDOWN_TIMEOUT_SECS", 10)?,
            trusted_proxies: env.list("TRUSTED_PROXIES")?,
        };

        let rate_limit = RateLimitConfig {
            enabled: env.flag("RATE_LIMIT_ENABLED", true)?,
            store: env.parse("RATE_LIMIT_STORE", CounterBackend::default())?,
            global: RateLimitPolicy::new(
                env.positive("RATE_LIMIT_MAX", 100)?,
                env.secs("RATE_LIMIT_WINDOW_SECS", 60)?,
            ),
            healthcheck: RateLimitPolicy::new(
                env.positive("HEALTHCHECK_RATE_LIMIT_MAX", 10)?,
                env.secs("HEALTHCHECK_RATE_LIMIT_WINDOW_SECS", 60)?,
            ),
        };

        let logging = LoggingConfig {
            level: env.string("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            format: env.parse("LOG_FORMAT", LogFormat::Json)?,
        };

        let jwt = JwtConfig {
            secret: env.string("JWT_SECRET"),
            access_ttl: env.secs("JWT_ACCESS_TTL_SECS", DEFAULT_ACCESS_TTL.as_secs())?,
            refresh_ttl: env.secs("JWT_REFRESH_TTL_SECS", DEFAULT_REFRESH_TTL.as_secs())?,
        };

        let defaults = BreakerSettings::default();
        let failure_ratio: f64 = env.parse("BREAKER_FAILURE_RATIO", defaults.failure_ratio)?;
        if !(failure_ratio > 0.0 && failure_ratio <= 1.0) {
            return Err(ConfigError::Invalid {
                var: "BREAKER_FAILURE_RATIO",
                value: failure_ratio.to_string(),
                reason: "must be in (0, 1]".to_string(),
            });
        }
        let breaker = BreakerSettings {
            name: defaults.name,
            min_requests: env.positive("BREAKER_MIN_REQUESTS", defaults.min_requests)?,
            failure_ratio,
            open_timeout: env.secs("BREAKER_OPEN_TIMEOUT_SECS", defaults.open_timeout.as_secs())?,
            half_open_max_requests: env
                .positive("BREAKER_HALF_OPEN_MAX_REQUESTS", defaults.half_open_max_requests)?,
            interval: Duration::from_secs(
                env.parse("BREAKER_INTERVAL_SECS", defaults.interval.as_secs())?,
            ),
        };

        let database = match env.string("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: env.positive("DATABASE_MAX_CONNECTIONS", 25)?,
            }),
            None => None,
        };

        Ok(Self {
            server,
            rate_limit,
            logging,
            jwt,
            breaker,
            redis_url: env
                .string("REDIS_URL")
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            database,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.string(var) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    /// Comma-separated values; blank entries are skipped.
    fn list<T>(&self, var: &'static str) -> Result<Vec<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(raw) = self.string(var) else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    var,
                    value: item.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    fn positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + Display + Copy,
        T::Err: Display,
    {
        let value = self.parse(var, default)?;
        if value <= T::default() {
            return Err(ConfigError::Invalid {
                var,
                value: value.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn secs(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.positive(var, default).map(Duration::from_secs)
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(var) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    var,
                    value,
                    reason: "expected a boolean".to_string(),
                }),
            },
        }
    }
}
