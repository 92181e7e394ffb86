//! Test error type conversions and consolidation
//!
//! Lower layers convert into [`MintError`](crate::errors::MintError) at the
//! pipeline boundary without losing their category or retryability.

#[cfg(test)]
mod tests {
    use solana_sdk::signature::Signature;

    use crate::errors::MintError;
    use crate::rpc_manager::RpcManagerError;
    use crate::schema::SchemaError;
    use crate::tx_builder::TransactionBuilderError;

    #[test]
    fn test_builder_error_to_mint_error() {
        let err: MintError = TransactionBuilderError::validation("creator shares sum to 99").into();

        match &err {
            MintError::Build(TransactionBuilderError::Validation(msg)) => {
                assert!(msg.contains("99"));
            }
            other => panic!("Expected Build variant, got {other:?}"),
        }
        assert_eq!(err.category(), "build");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rpc_error_to_mint_error() {
        let rpc_err = RpcManagerError::Timeout {
            endpoint: "https://test.com".to_string(),
            timeout_ms: 5000,
        };
        let err: MintError = rpc_err.into();

        assert!(matches!(err, MintError::Rpc(RpcManagerError::Timeout { .. })));
        assert_eq!(err.category(), "rpc");
        // RPC timeouts are transient
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rejected_rpc_error_is_final() {
        let err: MintError = RpcManagerError::TransactionRejected {
            endpoint: "mock".to_string(),
            message: "invalid account data".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_schema_error_to_builder_error() {
        let schema_err = crate::schema::decode_account::<crate::schema::MasterEditionV2>(&[])
            .unwrap_err();
        let builder_err: TransactionBuilderError = schema_err.into();
        assert!(matches!(builder_err, TransactionBuilderError::Encoding(_)));

        let schema_err: SchemaError = crate::schema::decode_account::<crate::schema::MetadataAccount>(&[4, 1])
            .unwrap_err();
        let err: MintError = schema_err.into();
        assert_eq!(err.category(), "schema");
    }

    #[test]
    fn test_ambiguous_outcomes_carry_signature() {
        let sig = Signature::new_unique();

        let timeout = MintError::Timeout {
            signature: sig,
            waited_ms: 90_000,
        };
        assert_eq!(timeout.broadcast_signature(), Some(sig));
        assert!(timeout.is_retryable());

        let cancelled = MintError::Cancelled { signature: Some(sig) };
        assert_eq!(cancelled.broadcast_signature(), Some(sig));
        assert!(cancelled.to_string().contains(&sig.to_string()));

        let early = MintError::Cancelled { signature: None };
        assert_eq!(early.broadcast_signature(), None);
        assert_eq!(early.to_string(), "Cancelled before broadcast");
    }

    #[test]
    fn test_estimation_error_is_not_retryable() {
        let err = MintError::estimation("rate endpoint returned 503");
        assert_eq!(err.category(), "estimation");
        assert!(!err.is_retryable());
        assert_eq!(err.broadcast_signature(), None);
    }
}
