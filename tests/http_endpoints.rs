//! Integration tests for the HTTP pricing oracle and storage gateway
//!
//! A local mockito server stands in for the Arweave price endpoint, the
//! rate endpoint and the upload gateway.

#[cfg(test)]
mod http_endpoints {
    use mockito::Matcher;
    use std::sync::Arc;
    use std::time::Duration;

    use nft_minter::cost::{CostEstimator, HttpPricingOracle, PricingOracle};
    use nft_minter::errors::MintError;
    use nft_minter::types::FileAsset;
    use nft_minter::uploader::{HttpStorageGateway, StorageGateway, StorageUploader, UploadRequest};
    use solana_sdk::{pubkey::Pubkey, signature::Signature};
    use tokio_util::sync::CancellationToken;

    const RATES_BODY: &str = r#"{"arweave":{"usd":10.0},"solana":{"usd":20.0}}"#;

    fn files() -> Vec<FileAsset> {
        vec![
            FileAsset::from_bytes("sunrise.png", "image/png", b"png-bytes".to_vec()),
            FileAsset::from_bytes("metadata.json", "application/json", br#"{"name":"Sunrise"}"#.to_vec()),
        ]
    }

    #[tokio::test]
    async fn test_oracle_quotes_price_and_rates() {
        let mut server = mockito::Server::new_async().await;
        let price = server
            .mock("GET", "/price/1024")
            .with_status(200)
            .with_body("2000000000000\n")
            .create_async()
            .await;
        let rates = server
            .mock("GET", "/rates")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(RATES_BODY)
            .create_async()
            .await;

        let oracle = HttpPricingOracle::new(
            &server.url(),
            &format!("{}/rates", server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        let estimate = CostEstimator::new(Arc::new(oracle))
            .estimate_sizes(&[1000, 24])
            .await
            .unwrap();

        price.assert_async().await;
        rates.assert_async().await;
        assert_eq!(estimate.winston, 2_000_000_000_000);
        assert_eq!(estimate.lamports, 1_000_000_000);
        assert_eq!(estimate.payment_lamports(), 1_001_000_000);
    }

    #[tokio::test]
    async fn test_oracle_rejects_non_numeric_price() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/price/10")
            .with_status(200)
            .with_body("<html>busy</html>")
            .create_async()
            .await;

        let oracle = HttpPricingOracle::new(&server.url(), &server.url(), Duration::from_secs(5)).unwrap();
        let err = oracle.storage_price_winston(10).await.unwrap_err();
        assert!(matches!(err, MintError::Estimation(_)));
    }

    #[tokio::test]
    async fn test_oracle_rejects_zero_rate() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rates")
            .with_status(200)
            .with_body(r#"{"arweave":{"usd":10.0},"solana":{"usd":0.0}}"#)
            .create_async()
            .await;

        let oracle = HttpPricingOracle::new(
            &server.url(),
            &format!("{}/rates", server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(oracle.usd_rates().await, Err(MintError::Estimation(_))));
    }

    #[tokio::test]
    async fn test_oracle_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/price/5")
            .with_status(503)
            .create_async()
            .await;

        let oracle = HttpPricingOracle::new(&server.url(), &server.url(), Duration::from_secs(5)).unwrap();
        let err = oracle.storage_price_winston(5).await.unwrap_err();
        assert_eq!(err.category(), "estimation");
    }

    #[tokio::test]
    async fn test_gateway_posts_multipart_form() {
        let mut server = mockito::Server::new_async().await;
        let signature = Signature::new_unique();
        let mint = Pubkey::new_unique();

        let upload = server
            .mock("POST", "/upload")
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data; boundary=.+".to_string()),
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="transaction""#.to_string()),
                Matcher::Regex(signature.to_string()),
                Matcher::Regex(r#"name="env""#.to_string()),
                Matcher::Regex(r#"name="tags""#.to_string()),
                Matcher::Regex(mint.to_string()),
                Matcher::Regex(r#"name="file\[\]"; filename="sunrise.png""#.to_string()),
                Matcher::Regex(r#"filename="metadata.json""#.to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"messages":[
                    {"filename":"sunrise.png","transactionId":"img-tx"},
                    {"filename":"metadata.json","transactionId":"meta-tx"},
                    {"filename":"manifest.json","transactionId":"manifest-tx"}
                ]}"#,
            )
            .create_async()
            .await;

        let gateway = HttpStorageGateway::new(&format!("{}/upload", server.url()), Duration::from_secs(5)).unwrap();
        let uploader = StorageUploader::new(Arc::new(gateway), "devnet");
        let result = uploader
            .upload(signature, &mint, files(), &CancellationToken::new())
            .await
            .unwrap();

        upload.assert_async().await;
        assert_eq!(result.uri, "https://arweave.net/manifest-tx");
        assert_eq!(result.manifest.transaction_id("sunrise.png"), Some("img-tx"));
    }

    #[tokio::test]
    async fn test_gateway_error_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"error":"Transaction not confirmed"}"#)
            .create_async()
            .await;

        let gateway = HttpStorageGateway::new(&server.url(), Duration::from_secs(5)).unwrap();
        let request = UploadRequest::new(Signature::new_unique(), "devnet", &Pubkey::new_unique(), files());
        let response = gateway.upload(&request).await.unwrap();
        assert_eq!(response.error.as_deref(), Some("Transaction not confirmed"));
        assert!(response.messages.is_empty());

        let uploader = StorageUploader::new(Arc::new(gateway), "devnet");
        let err = uploader
            .upload(Signature::new_unique(), &Pubkey::new_unique(), files(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MintError::Upload(msg) if msg.contains("not confirmed")));
    }

    #[tokio::test]
    async fn test_gateway_http_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(500)
            .create_async()
            .await;

        let gateway = HttpStorageGateway::new(&server.url(), Duration::from_secs(5)).unwrap();
        let request = UploadRequest::new(Signature::new_unique(), "devnet", &Pubkey::new_unique(), files());
        let err = gateway.upload(&request).await.unwrap_err();
        assert!(err.to_string().contains("500"));
        assert!(err.is_retryable());
    }
}
