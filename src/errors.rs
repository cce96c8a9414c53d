//! Error types for script creation, compilation and invocation

use std::path::PathBuf;

use thiserror::Error;

use crate::parser::ParseError;
use crate::types::Span;

/// Errors surfaced by the execution core.
///
/// Exit and debugger termination are not errors; they are reported as
/// [`Outcome`](crate::types::Outcome) values.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Malformed source; aborts creation and is never cached
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The content scanner refused the script text
    #[error("script content blocked: {reason}")]
    BlockedContent { reason: String },

    #[error(transparent)]
    Binding(#[from] BindingError),

    /// Internal assertion failure; indicates a bug in the core
    #[error("internal invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    /// The pipeline is stopping; the invocation was refused
    #[error("the pipeline has been stopped")]
    Stopping,

    #[error("operation not permitted in {mode} language mode: {operation}")]
    LanguageMode { mode: String, operation: String },

    /// Script-level error raised by `throw` or a failing operation
    #[error("{message}")]
    Runtime {
        message: String,
        span: Option<Span>,
    },

    /// Wrapper added when an error crosses a call indirection (host command)
    #[error("error in call to '{command}': {source}")]
    Indirect {
        command: String,
        #[source]
        source: Box<ScriptError>,
    },

    #[error("call depth exceeded {0}")]
    CallDepthExceeded(usize),

    #[error("failed to read script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ScriptError {
    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime {
            message: message.into(),
            span: None,
        }
    }

    pub fn runtime_at(message: impl Into<String>, span: Span) -> Self {
        ScriptError::Runtime {
            message: message.into(),
            span: Some(span),
        }
    }

    /// Strip every call-indirection wrapper and return the underlying cause.
    pub fn into_inner_cause(self) -> ScriptError {
        let mut err = self;
        while let ScriptError::Indirect { source, .. } = err {
            err = *source;
        }
        err
    }
}

/// Local, non-retryable failures while binding functions, variables or
/// parameters for an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("function '{0}' is defined more than once")]
    DuplicateFunction(String),

    #[error("function definition has no name")]
    NullFunctionName,

    #[error("variable definition at position {0} has no name")]
    NullVariable(usize),

    #[error("dynamic parameter clause must produce exactly one map, got {0}")]
    DynamicParamShape(String),
}

/// Assertions about the core's own bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("script retrieved from the cache is bound to a session")]
    CachedHandleBound,

    #[error("compiled tier '{0}' was requested before it was produced")]
    MissingTier(&'static str),

    #[error("security flags read before the script was compiled")]
    NotCompiled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_inner_cause_strips_nested_wrappers() {
        let err = ScriptError::Indirect {
            command: "outer".into(),
            source: Box::new(ScriptError::Indirect {
                command: "inner".into(),
                source: Box::new(ScriptError::runtime("boom")),
            }),
        };

        match err.into_inner_cause() {
            ScriptError::Runtime { message, .. } => assert_eq!(message, "boom"),
            other => panic!("Expected Runtime, got {:?}", other),
        }
    }

    #[test]
    fn test_binding_errors_are_distinct() {
        assert_ne!(
            BindingError::DuplicateFunction("f".into()),
            BindingError::NullFunctionName
        );
        assert_eq!(
            BindingError::NullVariable(2).to_string(),
            "variable definition at position 2 has no name"
        );
    }
}
