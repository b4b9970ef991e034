use std::fmt;

/// Which adapter operation produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GenerateContent,
    StreamGenerateContent,
    BatchCreate,
    BatchRetrieve,
    BatchList,
    BatchCancel,
    BatchResults,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::GenerateContent => "generate_content",
            Operation::StreamGenerateContent => "stream_generate_content",
            Operation::BatchCreate => "batch_create",
            Operation::BatchRetrieve => "batch_retrieve",
            Operation::BatchList => "batch_list",
            Operation::BatchCancel => "batch_cancel",
            Operation::BatchResults => "batch_results",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation and model an error originated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub operation: Operation,
    pub model: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub fn new(operation: Operation, model: Option<&str>) -> Self {
        Self {
            operation,
            model: model.map(str::to_string),
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "operation={} model={model}", self.operation),
            None => write!(f, "operation={}", self.operation),
        }
    }
}

/// Broad transport failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Cancelled,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Cancelled => "cancelled",
            TransportErrorKind::Other => "other",
        })
    }
}

/// Canonical error type used across all modules.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Transport error ({kind}, {context}): {message}")]
    Transport {
        context: ErrorContext,
        kind: TransportErrorKind,
        message: String,
    },
    #[error("Upstream error: status={status}, message={message}")]
    Upstream {
        context: Option<ErrorContext>,
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("Decode error ({context}): {message}")]
    Decode {
        context: ErrorContext,
        message: String,
    },
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category, mostly useful to callers deciding on retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    NotFound,
    RateLimit,
    ServerError,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        404 => ErrorCategory::NotFound,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl CanonicalError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            CanonicalError::InvalidRequest(_) | CanonicalError::Unsupported { .. } => {
                ErrorCategory::InvalidRequest
            }
            CanonicalError::Config(_)
            | CanonicalError::Transport { .. }
            | CanonicalError::Decode { .. }
            | CanonicalError::Internal(_) => ErrorCategory::ServerError,
            CanonicalError::Upstream { status, .. } => category_from_upstream_status(*status),
        }
    }

    /// HTTP-ish status code for the error, as surfaced in stream failure events.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            CanonicalError::Upstream { status, .. } => *status,
            CanonicalError::InvalidRequest(_) | CanonicalError::Unsupported { .. } => 400,
            CanonicalError::Transport {
                kind: TransportErrorKind::Timeout,
                ..
            } => 504,
            CanonicalError::Transport { .. } => 502,
            CanonicalError::Config(_)
            | CanonicalError::Decode { .. }
            | CanonicalError::Internal(_) => 500,
        }
    }

    /// Vendor error code when the upstream supplied one.
    #[must_use]
    pub fn upstream_code(&self) -> Option<&str> {
        match self {
            CanonicalError::Upstream { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn decode(operation: Operation, model: Option<&str>, message: impl Into<String>) -> Self {
        CanonicalError::Decode {
            context: ErrorContext::new(operation, model),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transport(
        operation: Operation,
        model: Option<&str>,
        kind: TransportErrorKind,
        message: impl Into<String>,
    ) -> Self {
        CanonicalError::Transport {
            context: ErrorContext::new(operation, model),
            kind,
            message: message.into(),
        }
    }

    /// Attach operation/model context to an upstream error that lacks it.
    #[must_use]
    pub fn with_context(self, context: ErrorContext) -> Self {
        match self {
            CanonicalError::Upstream {
                context: None,
                status,
                code,
                message,
            } => CanonicalError::Upstream {
                context: Some(context),
                status,
                code,
                message,
            },
            other => other,
        }
    }
}
