use std::fmt;
use thiserror::Error;

/// Trait for errors that can be rendered for a person at a terminal.
///
/// Library errors implement this so the CLI can print a headline, an
/// explanation and concrete next steps without matching on every variant.
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;

    /// Render message, context and suggestions as one block of text.
    fn display_for_user(&self) -> String {
        let mut out = format!("{}: {}", self.category(), self.user_message());
        if let Some(context) = self.context() {
            out.push_str("\n  ");
            out.push_str(&context);
        }
        for suggestion in self.suggestions() {
            out.push_str("\n  - ");
            out.push_str(&suggestion);
        }
        out
    }
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Backend,
    RateLimit,
    Cancellation,
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Backend => write!(f, "Backend"),
            Self::RateLimit => write!(f, "Rate limit"),
            Self::Cancellation => write!(f, "Cancellation"),
            Self::Validation => write!(f, "Validation"),
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Duplicate backend profile name: {name}")]
    DuplicateProfile { name: String },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(reason) => {
                format!("Configuration file has invalid format: {reason}")
            }
            Self::InvalidValue { key, value } => {
                format!("Configuration '{key}' has invalid value: {value}")
            }
            Self::NotFound { path } => format!("Configuration file not found: {path}"),
            Self::DuplicateProfile { name } => {
                format!("Backend profile '{name}' is defined more than once")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::InvalidFile(_) => Some(
                "Configuration files must be valid TOML with [defaults], [[profiles]] and [tiers] sections."
                    .to_string(),
            ),
            Self::InvalidValue { key, .. } => Some(format!(
                "The '{key}' configuration option has specific format requirements."
            )),
            Self::NotFound { .. } => Some(
                "npcspawn searches for .npcspawn/config.toml starting from the current directory upward."
                    .to_string(),
            ),
            Self::DuplicateProfile { .. } => Some(
                "Rate-limit state is keyed by profile name, so names must be unique.".to_string(),
            ),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec![
                "Check the TOML syntax of the configuration file".to_string(),
                "Run `npcspawn chains` after fixing it to confirm the routing table loads".to_string(),
            ],
            Self::InvalidValue { key, .. } => vec![format!(
                "Fix or remove the '{key}' entry to fall back to the built-in default"
            )],
            Self::NotFound { path } => vec![
                format!("Create {path} or pass --config with an existing file"),
                "Set NPCSPAWN_HOME to the directory holding config.toml".to_string(),
            ],
            Self::DuplicateProfile { name } => {
                vec![format!(
                    "Rename [default_backend] or the [[profiles]] entry called '{name}'"
                )]
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } | Self::InvalidFile(_) => ErrorCategory::Configuration,
            Self::InvalidValue { .. } | Self::DuplicateProfile { .. } => ErrorCategory::Validation,
        }
    }
}
