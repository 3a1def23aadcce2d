use crate::types::PositionRange;
use thiserror::Error;

/// Code carried by the cooperative cancellation signal.
pub const CANCELLED_CODE: &str = "OPERATION_CANCELLED";

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct SmError {
    pub code: String,
    pub message: String,
    pub span: Option<PositionRange>,
}

impl SmError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            span: None,
        }
    }

    pub fn with_span(
        code: impl Into<String>,
        message: impl Into<String>,
        span: PositionRange,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            span: Some(span),
        }
    }

    /// The expected signal raised when a cancellation token fires.
    pub fn cancelled() -> Self {
        Self::new(CANCELLED_CODE, "The operation was cancelled.")
    }

    pub fn is_cancellation(&self) -> bool {
        self.code == CANCELLED_CODE
    }

    /// Prefixes the message, keeping code and span.
    pub fn wrap(self, prefix: impl AsRef<str>) -> Self {
        Self {
            message: format!("{}{}", prefix.as_ref(), self.message),
            ..self
        }
    }
}
