//! Structured error types for the triage engine.

use thiserror::Error;

/// Failure reported by an external data source. Fatal for the whole analysis run.
#[derive(Debug, Error)]
pub enum SourceError {
  #[error("{collaborator} unavailable: {reason}")]
  Unavailable {
    collaborator: &'static str,
    reason: String,
  },

  #[error("unknown channel: {0}")]
  UnknownChannel(String),
}

impl SourceError {
  pub fn unavailable(collaborator: &'static str, reason: impl Into<String>) -> Self {
    Self::Unavailable {
      collaborator,
      reason: reason.into(),
    }
  }
}

#[derive(Debug, Error)]
pub enum TriageError {
  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("source: {0}")]
  Source(#[from] SourceError),

  #[error("config: {0}")]
  Config(#[from] toml::de::Error),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),
}

impl TriageError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }
}
