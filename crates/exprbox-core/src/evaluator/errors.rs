//! Single translation point from bridge failures to public errors.

use exprbox_types::data::WorkflowData;
use exprbox_types::error::{
    ErrorContext, ExpressionError, ExpressionErrorKind, RuntimeError, RuntimeErrorCode,
};

/// Public kind for a bridge error code.
///
/// Exhaustive on purpose: a new code without a mapping does not compile.
pub fn kind_for(code: RuntimeErrorCode) -> ExpressionErrorKind {
    match code {
        RuntimeErrorCode::MemoryLimit => ExpressionErrorKind::MemoryLimit,
        RuntimeErrorCode::Timeout => ExpressionErrorKind::Timeout,
        RuntimeErrorCode::SecurityViolation => ExpressionErrorKind::SecurityViolation,
        RuntimeErrorCode::SyntaxError => ExpressionErrorKind::Syntax,
        RuntimeErrorCode::Runtime
        | RuntimeErrorCode::NotInitialized
        | RuntimeErrorCode::Disposed
        | RuntimeErrorCode::BridgeLost
        | RuntimeErrorCode::Internal => ExpressionErrorKind::Runtime,
    }
}

pub fn translate(err: RuntimeError, context: ErrorContext) -> ExpressionError {
    ExpressionError::new(kind_for(err.code), err.message, context)
}

pub fn context_for(expression: &str, data: &WorkflowData) -> ErrorContext {
    ErrorContext {
        expression: expression.to_string(),
        workflow_id: data.workflow_id.clone(),
        node_name: data.node_name.clone(),
        execution_id: data.execution_id.clone(),
        item_index: Some(data.item_index),
    }
}
