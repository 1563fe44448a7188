//! Error types surfaced by the MQTT binding extension
//!
//! Every public operation returns [`ExtensionResult`]. Transport failures keep
//! their own [`MqttError`] type and are wrapped here so callers see a single
//! taxonomy.

use crate::config::ConfigError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for extension operations
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("Invalid argument '{name}': {message}")]
    InvalidArgument { name: &'static str, message: String },

    #[error("Unable to bind {value} to type '{parameter_type}'")]
    Binding {
        value: String,
        parameter_type: String,
    },

    #[error("Can't bind MqttTrigger to type '{0}'")]
    UnsupportedBindingType(String),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Payload is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Cannot access a disposed object: {object}")]
    ObjectDisposed { object: &'static str },

    #[error("Function execution failed: {0}")]
    FunctionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ExtensionError {
    /// Create invalid argument error
    pub fn invalid_argument<S: Into<String>>(name: &'static str, message: S) -> Self {
        Self::InvalidArgument {
            name,
            message: message.into(),
        }
    }

    /// Shorthand for the empty-or-whitespace check used on topic names
    pub fn empty_value(name: &'static str) -> Self {
        Self::invalid_argument(name, "Value cannot be empty.")
    }

    /// Create binding error
    pub fn binding<V: Into<String>, P: Into<String>>(value: V, parameter_type: P) -> Self {
        Self::Binding {
            value: value.into(),
            parameter_type: parameter_type.into(),
        }
    }

    /// Create invalid operation error
    pub fn invalid_operation<S: Into<String>>(message: S) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create object disposed error
    pub fn object_disposed(object: &'static str) -> Self {
        Self::ObjectDisposed { object }
    }

    /// True for errors caused by caller misuse rather than the environment
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::InvalidOperation { .. }
                | Self::ObjectDisposed { .. }
        )
    }
}

/// Result type for extension operations
pub type ExtensionResult<T> = Result<T, ExtensionError>;

/// Reject empty or whitespace-only values for a named argument
pub(crate) fn ensure_not_blank(name: &'static str, value: &str) -> ExtensionResult<()> {
    if value.trim().is_empty() {
        return Err(ExtensionError::empty_value(name));
    }
    Ok(())
}
