use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for stockade
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub reservations: ReservationConfig,

    #[serde(default)]
    pub rate_limiting: RateLimitConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self, crate::Error> {
        use crate::Error;

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment
    pub fn from_env() -> Result<Self, crate::Error> {
        if let Ok(config_path) = std::env::var("STOCKADE_CONFIG") {
            return Self::load(&config_path);
        }

        let default_paths = [
            "./config/default.toml",
            "./config/production.toml",
            "/etc/stockade/config.toml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        if self.server.port == 0 {
            return Err(Error::Config("Invalid server port".to_string()));
        }

        if self.database.pool_size == 0 {
            return Err(Error::Config("Database pool size must be > 0".to_string()));
        }

        if self.reservations.hold_duration_secs == 0 {
            return Err(Error::Config("Hold duration must be > 0".to_string()));
        }

        if self.reservations.sweeper_batch_limit == 0 {
            return Err(Error::Config("Sweeper batch limit must be > 0".to_string()));
        }

        if self.reservations.degraded_threshold > self.reservations.healthy_threshold {
            return Err(Error::Config(
                "Degraded threshold must not exceed healthy threshold".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Run pending migrations on startup
    #[serde(default = "default_true")]
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            auto_migrate: default_true(),
        }
    }
}

fn default_database_url() -> String {
    "postgres://localhost/stockade".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis is optional; in-memory fallbacks are used when absent
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default = "default_cache_key_prefix")]
    pub key_prefix: String,

    /// Cached user principal lifetime
    #[serde(default = "default_user_ttl")]
    pub user_ttl_secs: u64,

    #[serde(default = "default_cache_op_timeout_ms")]
    pub operation_timeout_ms: u64,

    #[serde(default = "default_cache_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_cache_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            key_prefix: default_cache_key_prefix(),
            user_ttl_secs: default_user_ttl(),
            operation_timeout_ms: default_cache_op_timeout_ms(),
            max_retries: default_cache_max_retries(),
            retry_delay_ms: default_cache_retry_delay_ms(),
        }
    }
}

impl CacheConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_cache_key_prefix() -> String {
    "stockade".to_string()
}

fn default_user_ttl() -> u64 {
    1800
}

fn default_cache_op_timeout_ms() -> u64 {
    500
}

fn default_cache_max_retries() -> u32 {
    3
}

fn default_cache_retry_delay_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_amqp_url")]
    pub url: String,

    #[serde(default = "default_exchange")]
    pub exchange: String,

    #[serde(default = "default_reservation_queue")]
    pub reservation_queue: String,

    #[serde(default = "default_email_queue")]
    pub email_queue: String,

    /// Per-consumer inflight cap on the reservation queue
    #[serde(default = "default_prefetch_reservation")]
    pub prefetch_reservation: u16,

    /// Per-consumer inflight cap on the email queue
    #[serde(default = "default_prefetch_email")]
    pub prefetch_email: u16,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_amqp_url(),
            exchange: default_exchange(),
            reservation_queue: default_reservation_queue(),
            email_queue: default_email_queue(),
            prefetch_reservation: default_prefetch_reservation(),
            prefetch_email: default_prefetch_email(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            publish_attempts: default_publish_attempts(),
        }
    }
}

impl BusConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

fn default_amqp_url() -> String {
    "amqp://127.0.0.1:5672".to_string()
}

fn default_exchange() -> String {
    "stockade.events".to_string()
}

fn default_reservation_queue() -> String {
    "stockade.reservations".to_string()
}

fn default_email_queue() -> String {
    "stockade.emails".to_string()
}

fn default_prefetch_reservation() -> u16 {
    10
}

fn default_prefetch_email() -> u16 {
    5
}

fn default_reconnect_interval_ms() -> u64 {
    5000
}

fn default_publish_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            jwt_expiry_secs: default_jwt_expiry(),
        }
    }
}

fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_jwt_expiry() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub smtp_enabled: bool,

    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub smtp_username: String,

    #[serde(default)]
    pub smtp_password: String,

    #[serde(default = "default_from_address")]
    pub from_address: String,

    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            smtp_enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_address: default_from_address(),
            from_name: default_from_name(),
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_address() -> String {
    "noreply@stockade.local".to_string()
}

fn default_from_name() -> String {
    "Stockade".to_string()
}

/// Reservation lifecycle and sweeper knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    /// Lifetime of a PENDING reservation
    #[serde(default = "default_hold_duration")]
    pub hold_duration_secs: u64,

    /// Cadence of the expiry pass
    #[serde(default = "default_sweeper_interval")]
    pub sweeper_interval_secs: u64,

    /// Max candidates per sweeper tick
    #[serde(default = "default_sweeper_batch_limit")]
    pub sweeper_batch_limit: i64,

    /// Ring buffer size for sweeper error history
    #[serde(default = "default_sweeper_error_history")]
    pub sweeper_error_history: usize,

    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: f64,

    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: f64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            hold_duration_secs: default_hold_duration(),
            sweeper_interval_secs: default_sweeper_interval(),
            sweeper_batch_limit: default_sweeper_batch_limit(),
            sweeper_error_history: default_sweeper_error_history(),
            healthy_threshold: default_healthy_threshold(),
            degraded_threshold: default_degraded_threshold(),
        }
    }
}

impl ReservationConfig {
    pub fn hold_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.hold_duration_secs as i64)
    }

    pub fn sweeper_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper_interval_secs)
    }
}

fn default_hold_duration() -> u64 {
    600
}

fn default_sweeper_interval() -> u64 {
    60
}

fn default_sweeper_batch_limit() -> i64 {
    500
}

fn default_sweeper_error_history() -> usize {
    100
}

fn default_healthy_threshold() -> f64 {
    0.95
}

fn default_degraded_threshold() -> f64 {
    0.80
}

/// Fixed-window rate limits per endpoint class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Reservation creation, per user
    #[serde(default = "default_create_limit")]
    pub create: RateLimitRule,

    /// Checkout, per user
    #[serde(default = "default_checkout_limit")]
    pub checkout: RateLimitRule,

    /// General traffic, per IP
    #[serde(default = "default_general_limit")]
    pub general: RateLimitRule,

    /// Auth attempts, per IP
    #[serde(default = "default_auth_limit")]
    pub auth: RateLimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            create: default_create_limit(),
            checkout: default_checkout_limit(),
            general: default_general_limit(),
            auth: default_auth_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max_requests: u64,
    pub window_secs: u64,
}

fn default_create_limit() -> RateLimitRule {
    RateLimitRule {
        max_requests: 5,
        window_secs: 60,
    }
}

fn default_checkout_limit() -> RateLimitRule {
    RateLimitRule {
        max_requests: 10,
        window_secs: 60,
    }
}

fn default_general_limit() -> RateLimitRule {
    RateLimitRule {
        max_requests: 100,
        window_secs: 900,
    }
}

fn default_auth_limit() -> RateLimitRule {
    RateLimitRule {
        max_requests: 5,
        window_secs: 900,
    }
}
