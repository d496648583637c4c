//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("limits.max_streaming_buffer_size ({buffer}) exceeds limits.max_upload_size ({upload})")]
    BufferExceedsUpload { buffer: usize, upload: usize },
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }

    let limits = &config.limits;
    if limits.max_upload_size == 0 {
        errors.push(ValidationError::Zero("limits.max_upload_size"));
    }
    if limits.max_streaming_buffer_size == 0 {
        errors.push(ValidationError::Zero("limits.max_streaming_buffer_size"));
    }
    if limits.max_streaming_buffer_size > limits.max_upload_size {
        errors.push(ValidationError::BufferExceedsUpload {
            buffer: limits.max_streaming_buffer_size,
            upload: limits.max_upload_size,
        });
    }

    if config.http2.min_ping_receive_interval_secs == 0 {
        errors.push(ValidationError::Zero("http2.min_ping_receive_interval_secs"));
    }
    if config.http2.keepalive_interval_secs == Some(0) {
        errors.push(ValidationError::Zero("http2.keepalive_interval_secs"));
    }
    if config.http2.keepalive_timeout_secs == 0 {
        errors.push(ValidationError::Zero("http2.keepalive_timeout_secs"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
