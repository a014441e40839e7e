//! Runtime error values.
//!
//! The bytecode level has no exceptions: every fatal condition produces a
//! [`RuntimeError`] that propagates out of the interpreter loop and out of
//! [`Context::run`](crate::Context::run), leaving the coroutine in a safely
//! destructible state. Native functions report errors the same way instead of
//! panicking into the interpreter.

use thiserror::Error;

/// Classification of a fatal runtime condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Overflow, division by zero, negative power with a non-unit base.
    Arithmetic,
    /// Wrong operand type, calling a non-callable, indexing a non-indexable.
    TypeMismatch,
    /// Missing symbol, member or method.
    MissingSymbol,
    /// An uninitialized local or closure slot was observed.
    UndefinedValue,
    /// The coroutine stack would exceed its maximum size.
    StackOverflow,
    /// An `assert` failed.
    AssertionFailure,
    /// A module was malformed at load time.
    ModuleLoad,
    /// Invariant violation inside the runtime itself.
    Internal,
}

/// A fatal runtime error with a human-readable message.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RuntimeError {
    kind: ErrorKind,
    message: String,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> RuntimeError {
        RuntimeError { kind, message: message.into() }
    }

    pub fn arithmetic(message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(ErrorKind::Arithmetic, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(ErrorKind::TypeMismatch, message)
    }

    pub fn missing_symbol(message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(ErrorKind::MissingSymbol, message)
    }

    pub fn undefined_value(message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(ErrorKind::UndefinedValue, message)
    }

    pub fn stack_overflow() -> RuntimeError {
        RuntimeError::new(ErrorKind::StackOverflow, "Stack overflow.")
    }

    pub fn assertion(message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(ErrorKind::AssertionFailure, message)
    }

    pub fn module_load(message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(ErrorKind::ModuleLoad, message)
    }

    pub fn internal(message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<tiro_core::ModuleError> for RuntimeError {
    fn from(err: tiro_core::ModuleError) -> RuntimeError {
        RuntimeError::module_load(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_display() {
        let err = RuntimeError::arithmetic("Integer overflow in addition.");
        assert_eq!(err.to_string(), "Integer overflow in addition.");
        assert_eq!(err.kind(), ErrorKind::Arithmetic);
    }
}
