use std::fmt;

use crate::models::ReservationStatus;

/// Main error type for stockade
#[derive(Debug)]
pub enum Error {
    /// Configuration errors
    Config(String),

    /// Database errors (SQLx wrapped)
    Database(sqlx::Error),

    /// Message bus errors
    Bus(String),

    /// Cache errors
    Cache(String),

    /// Notification/email errors
    Notification(String),

    /// Validation errors
    Validation(String),

    /// Authentication errors
    Unauthorized(String),

    /// Authorization errors
    Forbidden(String),

    /// Not found errors
    NotFound(String),

    /// State-machine or uniqueness conflicts
    Conflict(String),

    /// Requested quantity would exceed the per-user cap for the item
    QuotaExceeded {
        requested: i32,
        committed: i32,
        max_per_user: i32,
    },

    /// Not enough available stock to reserve
    InsufficientStock { requested: i32, available: i32 },

    /// Not enough reserved stock to confirm
    NotEnoughReserved { requested: i32, reserved: i32 },

    /// Reservation already reached a terminal status
    AlreadyTerminal(ReservationStatus),

    /// Caller does not own the reservation
    NotOwner,

    /// Reservation hold has elapsed
    Expired,

    /// Item is not open for reservations (inactive or outside sale window)
    Unavailable(String),

    /// Throttled
    RateLimited { retry_after_secs: u64 },

    /// Serialization errors
    Serialization(serde_json::Error),

    /// IO errors
    Io(std::io::Error),

    /// Generic errors with description
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::Bus(msg) => write!(f, "Bus error: {}", msg),
            Error::Cache(msg) => write!(f, "Cache error: {}", msg),
            Error::Notification(msg) => write!(f, "Notification error: {}", msg),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            Error::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Error::QuotaExceeded {
                requested,
                committed,
                max_per_user,
            } => write!(
                f,
                "Quota exceeded: requested {} with {} already committed (max {} per user)",
                requested, committed, max_per_user
            ),
            Error::InsufficientStock {
                requested,
                available,
            } => write!(
                f,
                "Insufficient stock: requested {}, available {}",
                requested, available
            ),
            Error::NotEnoughReserved {
                requested,
                reserved,
            } => write!(
                f,
                "Not enough reserved stock: requested {}, reserved {}",
                requested, reserved
            ),
            Error::AlreadyTerminal(status) => {
                write!(f, "Reservation is already {}", status)
            }
            Error::NotOwner => write!(f, "Reservation belongs to another user"),
            Error::Expired => write!(f, "Reservation hold has expired"),
            Error::Unavailable(msg) => write!(f, "Item unavailable: {}", msg),
            Error::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited, retry after {}s", retry_after_secs)
            }
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::Serialization(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

// Conversions from external error types
impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Database(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(error: uuid::Error) -> Self {
        Error::Validation(format!("Invalid UUID: {}", error))
    }
}

// Common error constructors
impl Error {
    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a new unauthorized error
    pub fn unauthorized<T: Into<String>>(msg: T) -> Self {
        Error::Unauthorized(msg.into())
    }

    /// Create a new forbidden error
    pub fn forbidden<T: Into<String>>(msg: T) -> Self {
        Error::Forbidden(msg.into())
    }

    /// Create a new conflict error
    pub fn conflict<T: Into<String>>(msg: T) -> Self {
        Error::Conflict(msg.into())
    }

    /// Create a new bus error
    pub fn bus<T: Into<String>>(msg: T) -> Self {
        Error::Bus(msg.into())
    }

    /// Create a new cache error
    pub fn cache<T: Into<String>>(msg: T) -> Self {
        Error::Cache(msg.into())
    }

    /// Create a new notification error
    pub fn notification<T: Into<String>>(msg: T) -> Self {
        Error::Notification(msg.into())
    }

    /// Create a new unavailable error
    pub fn unavailable<T: Into<String>>(msg: T) -> Self {
        Error::Unavailable(msg.into())
    }
}

impl Error {
    /// Get HTTP status code for error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) | Error::NotOwner => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_)
            | Error::QuotaExceeded { .. }
            | Error::InsufficientStock { .. }
            | Error::NotEnoughReserved { .. }
            | Error::AlreadyTerminal(_)
            | Error::Expired => 409,
            Error::Unavailable(_) => 422,
            Error::RateLimited { .. } => 429,
            Error::Bus(_) => 503,
            Error::Config(_)
            | Error::Database(_)
            | Error::Cache(_)
            | Error::Notification(_)
            | Error::Serialization(_)
            | Error::Io(_)
            | Error::Other(_) => 500,
        }
    }

    /// Get error category for monitoring
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Database(_) => "database",
            Error::Bus(_) => "bus",
            Error::Cache(_) => "cache",
            Error::Notification(_) => "notification",
            Error::Validation(_) => "validation",
            Error::Unauthorized(_) => "auth",
            Error::Forbidden(_) | Error::NotOwner => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) | Error::AlreadyTerminal(_) => "conflict",
            Error::QuotaExceeded { .. } => "quota",
            Error::InsufficientStock { .. } | Error::NotEnoughReserved { .. } => "stock",
            Error::Expired => "expired",
            Error::Unavailable(_) => "unavailable",
            Error::RateLimited { .. } => "rate_limit",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }

    /// Whether a retry of the same call could succeed without any state change
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Bus(_) | Error::Cache(_) | Error::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::validation("bad input").status_code(), 400);
        assert_eq!(Error::not_found("item").status_code(), 404);
        assert_eq!(
            Error::InsufficientStock {
                requested: 5,
                available: 3
            }
            .status_code(),
            409
        );
        assert_eq!(Error::NotOwner.status_code(), 403);
        assert_eq!(Error::RateLimited { retry_after_secs: 30 }.status_code(), 429);
        assert_eq!(Error::bus("broker down").status_code(), 503);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            Error::AlreadyTerminal(ReservationStatus::Confirmed).category(),
            "conflict"
        );
        assert_eq!(
            Error::QuotaExceeded {
                requested: 1,
                committed: 2,
                max_per_user: 2
            }
            .category(),
            "quota"
        );
        assert_eq!(Error::Expired.category(), "expired");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::bus("publish failed").is_transient());
        assert!(!Error::validation("quantity must be >= 1").is_transient());
        assert!(!Error::NotOwner.is_transient());
    }
}
