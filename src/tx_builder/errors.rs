//! Error types for instruction building and transaction assembly
//!
//! Errors raised while staging instructions are local and deterministic:
//! nothing has been signed or sent when one of these is returned. They are
//! designed to be:
//! - Informative: the failing program and reason are carried along
//! - Composable: schema failures convert in via `From`
//! - Observable: `category()` feeds metrics labels

use thiserror::Error;

use crate::schema::SchemaError;

/// Error type for instruction builders and the transaction assembler
#[derive(Error, Debug)]
pub enum TransactionBuilderError {
    /// Failed to build an instruction for a specific program
    ///
    /// Contains the program ID and detailed reason for failure
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild {
        /// The program ID that failed to build an instruction
        program: String,
        /// Detailed reason for the failure
        reason: String,
    },

    /// A metadata record or argument failed client-side validation
    ///
    /// This includes:
    /// - Creator shares not summing to 100
    /// - Name, symbol or uri exceeding the program's limits
    /// - Seller fee above 10000 basis points
    #[error("Validation error: {0}")]
    Validation(String),

    /// No bump seed produced an off-curve program address
    #[error("Address derivation failed (program={program}): {reason}")]
    AddressDerivation { program: String, reason: String },

    /// Invalid instruction order or structure
    ///
    /// The mint account must be created before it is initialized, and
    /// initialized before anything references it.
    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    /// Instruction payload could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(#[from] SchemaError),

    /// Failed to sign the transaction
    ///
    /// This can indicate:
    /// - A required signer is missing from the batch
    /// - A keypair does not match an account marked as signer
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Internal invariant violation or unexpected state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransactionBuilderError {
    /// Check if this error is potentially retryable
    ///
    /// Building is deterministic over its inputs, so nothing here is.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::InstructionBuild { .. } => "instruction",
            Self::Validation(_) => "validation",
            Self::AddressDerivation { .. } => "address",
            Self::InvalidInstructionOrder(_) => "order",
            Self::Encoding(_) => "encoding",
            Self::Signing(_) => "signing",
            Self::Internal(_) => "internal",
        }
    }
}

// Convenience constructors for common error scenarios
impl TransactionBuilderError {
    /// Create an instruction build error for a specific program
    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create a validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Create an invalid instruction order error
    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransactionBuilderError::InstructionBuild {
            program: "token_metadata".to_string(),
            reason: "invalid accounts".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Instruction build error (program=token_metadata): invalid accounts"
        );

        let err = TransactionBuilderError::validation("creator shares sum to 90");
        assert_eq!(err.to_string(), "Validation error: creator shares sum to 90");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            TransactionBuilderError::validation("test").category(),
            "validation"
        );
        assert_eq!(
            TransactionBuilderError::invalid_order("test").category(),
            "order"
        );
        assert_eq!(
            TransactionBuilderError::internal("test").category(),
            "internal"
        );
    }

    #[test]
    fn test_convenience_constructors() {
        let err = TransactionBuilderError::instruction_failed("program", "reason");
        assert!(matches!(err, TransactionBuilderError::InstructionBuild { .. }));
        assert!(!err.is_retryable());

        let err = TransactionBuilderError::invalid_order("mint before create");
        assert!(matches!(
            err,
            TransactionBuilderError::InvalidInstructionOrder(_)
        ));
    }
}
