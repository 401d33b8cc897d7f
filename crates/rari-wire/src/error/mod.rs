use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Error value produced by a server component, either returned synchronously
/// or as the outcome of its future. This is what travels in `E` rows.
#[derive(ThisError, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct RenderError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), digest: None }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }
}

impl From<String> for RenderError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for RenderError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[derive(ThisError, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RscError {
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Module load error: {0}")]
    ModuleLoad(String),

    #[error("{0}")]
    Rejected(RenderError),

    #[error("Unrecovered rejection: {0}")]
    UnrecoveredRejection(Box<RscError>),

    #[error("Stream cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RscError {
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }

    pub fn decoding(message: impl Into<String>) -> Self {
        Self::Decoding(message.into())
    }

    pub fn module_load(message: impl Into<String>) -> Self {
        Self::ModuleLoad(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(RenderError::new(message))
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn unrecovered(self) -> Self {
        match self {
            already @ Self::UnrecoveredRejection(_) => already,
            other => Self::UnrecoveredRejection(Box::new(other)),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Encoding(_) => "ENCODING_ERROR",
            Self::Decoding(_) => "DECODING_ERROR",
            Self::ModuleLoad(_) => "MODULE_LOAD_ERROR",
            Self::Rejected(_) => "REJECTED",
            Self::UnrecoveredRejection(_) => "UNRECOVERED_REJECTION",
            Self::Cancelled => "CANCELLED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Encoding(msg)
            | Self::Decoding(msg)
            | Self::ModuleLoad(msg)
            | Self::Transport(msg)
            | Self::Configuration(msg) => msg.clone(),
            Self::Rejected(err) => err.message.clone(),
            Self::UnrecoveredRejection(inner) => inner.message(),
            Self::Cancelled => "stream cancelled".to_string(),
        }
    }

    /// The component error carried by a rejection, looking through the
    /// unrecovered wrapper.
    pub fn render_error(&self) -> RenderError {
        match self {
            Self::Rejected(err) => err.clone(),
            Self::UnrecoveredRejection(inner) => inner.render_error(),
            other => RenderError::new(other.to_string()),
        }
    }

    /// Whether the error poisons the whole stream rather than a single slot.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Encoding(_) | Self::Decoding(_) | Self::Transport(_) | Self::Cancelled
        )
    }
}

impl From<RenderError> for RscError {
    fn from(error: RenderError) -> Self {
        Self::Rejected(error)
    }
}

impl From<serde_json::Error> for RscError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decoding(error.to_string())
    }
}

impl From<std::io::Error> for RscError {
    fn from(error: std::io::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

impl From<std::str::Utf8Error> for RscError {
    fn from(error: std::str::Utf8Error) -> Self {
        Self::Decoding(format!("invalid UTF-8 in stream: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(RscError::encoding("x").code(), "ENCODING_ERROR");
        assert_eq!(RscError::decoding("x").code(), "DECODING_ERROR");
        assert_eq!(RscError::module_load("x").code(), "MODULE_LOAD_ERROR");
        assert_eq!(RscError::rejected("x").code(), "REJECTED");
        assert_eq!(RscError::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn test_unrecovered_wraps_once() {
        let error = RscError::rejected("Test error").unrecovered().unrecovered();

        match &error {
            RscError::UnrecoveredRejection(inner) => {
                assert_eq!(**inner, RscError::rejected("Test error"));
            }
            other => panic!("Expected UnrecoveredRejection, got {other:?}"),
        }
        assert_eq!(error.message(), "Test error");
        assert_eq!(error.to_string(), "Unrecovered rejection: Test error");
    }

    #[test]
    fn test_render_error_through_wrapper() {
        let error = RscError::Rejected(RenderError::new("boom").with_digest("d1")).unrecovered();
        let render_error = error.render_error();

        assert_eq!(render_error.message, "boom");
        assert_eq!(render_error.digest.as_deref(), Some("d1"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(RscError::decoding("bad row").is_fatal());
        assert!(RscError::Cancelled.is_fatal());
        assert!(!RscError::rejected("component").is_fatal());
        assert!(!RscError::module_load("missing").is_fatal());
    }

    #[test]
    fn test_render_error_serialization_skips_empty_digest() {
        let json = serde_json::to_string(&RenderError::new("Oops")).unwrap();
        assert_eq!(json, r#"{"message":"Oops"}"#);

        let parsed: RenderError = serde_json::from_str(r#"{"message":"Oops","digest":"abc"}"#).unwrap();
        assert_eq!(parsed.digest.as_deref(), Some("abc"));
    }
}
