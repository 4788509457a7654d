use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Machine-readable failure code raised inside an isolate or by bridge glue.
///
/// Closed set: every code has exactly one public error kind it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeErrorCode {
    MemoryLimit,
    Timeout,
    SecurityViolation,
    SyntaxError,
    Runtime,
    NotInitialized,
    Disposed,
    /// The isolated context was abandoned and the bridge cannot continue.
    BridgeLost,
    Internal,
}

impl RuntimeErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeErrorCode::MemoryLimit => "MEMORY_LIMIT",
            RuntimeErrorCode::Timeout => "TIMEOUT",
            RuntimeErrorCode::SecurityViolation => "SECURITY_VIOLATION",
            RuntimeErrorCode::SyntaxError => "SYNTAX_ERROR",
            RuntimeErrorCode::Runtime => "RUNTIME",
            RuntimeErrorCode::NotInitialized => "NOT_INITIALIZED",
            RuntimeErrorCode::Disposed => "DISPOSED",
            RuntimeErrorCode::BridgeLost => "BRIDGE_LOST",
            RuntimeErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for RuntimeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generic failure raised by a bridge. Never crosses the evaluator boundary.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RuntimeError {
    pub code: RuntimeErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl RuntimeError {
    pub fn new(code: RuntimeErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn memory_limit(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::MemoryLimit, message)
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            RuntimeErrorCode::Timeout,
            format!("execution exceeded {timeout_ms}ms"),
        )
        .with_details(serde_json::json!({ "timeout_ms": timeout_ms }))
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::SecurityViolation, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::SyntaxError, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::Runtime, message)
    }

    pub fn not_initialized() -> Self {
        Self::new(RuntimeErrorCode::NotInitialized, "bridge is not initialized")
    }

    pub fn disposed() -> Self {
        Self::new(RuntimeErrorCode::Disposed, "bridge has been disposed")
    }

    pub fn bridge_lost(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::BridgeLost, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::Internal, message)
    }
}

/// Where a failing expression came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// The original expression text as written by the user.
    pub expression: String,
    pub workflow_id: Option<String>,
    pub node_name: Option<String>,
    pub execution_id: Option<String>,
    pub item_index: Option<usize>,
}

impl ErrorContext {
    pub fn for_expression(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            ..Self::default()
        }
    }
}

/// The public error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionErrorKind {
    MemoryLimit,
    Timeout,
    SecurityViolation,
    Syntax,
    Runtime,
}

impl ExpressionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionErrorKind::MemoryLimit => "memory_limit",
            ExpressionErrorKind::Timeout => "timeout",
            ExpressionErrorKind::SecurityViolation => "security_violation",
            ExpressionErrorKind::Syntax => "syntax",
            ExpressionErrorKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for ExpressionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed evaluation failure returned to callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("memory limit exceeded: {message}")]
    MemoryLimit { message: String, context: ErrorContext },

    #[error("expression timed out: {message}")]
    Timeout { message: String, context: ErrorContext },

    #[error("security violation: {message}")]
    SecurityViolation { message: String, context: ErrorContext },

    #[error("syntax error: {message}")]
    Syntax { message: String, context: ErrorContext },

    #[error("expression failed: {message}")]
    Runtime { message: String, context: ErrorContext },
}

impl ExpressionError {
    pub fn new(kind: ExpressionErrorKind, message: impl Into<String>, context: ErrorContext) -> Self {
        let message = message.into();
        match kind {
            ExpressionErrorKind::MemoryLimit => ExpressionError::MemoryLimit { message, context },
            ExpressionErrorKind::Timeout => ExpressionError::Timeout { message, context },
            ExpressionErrorKind::SecurityViolation => {
                ExpressionError::SecurityViolation { message, context }
            }
            ExpressionErrorKind::Syntax => ExpressionError::Syntax { message, context },
            ExpressionErrorKind::Runtime => ExpressionError::Runtime { message, context },
        }
    }

    pub fn kind(&self) -> ExpressionErrorKind {
        match self {
            ExpressionError::MemoryLimit { .. } => ExpressionErrorKind::MemoryLimit,
            ExpressionError::Timeout { .. } => ExpressionErrorKind::Timeout,
            ExpressionError::SecurityViolation { .. } => ExpressionErrorKind::SecurityViolation,
            ExpressionError::Syntax { .. } => ExpressionErrorKind::Syntax,
            ExpressionError::Runtime { .. } => ExpressionErrorKind::Runtime,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ExpressionError::MemoryLimit { message, .. }
            | ExpressionError::Timeout { message, .. }
            | ExpressionError::SecurityViolation { message, .. }
            | ExpressionError::Syntax { message, .. }
            | ExpressionError::Runtime { message, .. } => message,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            ExpressionError::MemoryLimit { context, .. }
            | ExpressionError::Timeout { context, .. }
            | ExpressionError::SecurityViolation { context, .. }
            | ExpressionError::Syntax { context, .. }
            | ExpressionError::Runtime { context, .. } => context,
        }
    }
}
