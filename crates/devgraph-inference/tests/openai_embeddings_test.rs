//! HTTP-level tests for the OpenAI-compatible embedding backend.

#![cfg(feature = "openai")]

use devgraph_core::{EmbeddingBackend, Error};
use devgraph_inference::openai::{OpenAIBackend, OpenAIConfig};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer, dimension: usize) -> OpenAIConfig {
    OpenAIConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        embed_model: "test-embed".to_string(),
        embed_dimension: dimension,
        request_dimensions: true,
        timeout_seconds: 5,
    }
}

#[tokio::test]
async fn test_embeddings_sorted_by_index() {
    let mock_server = MockServer::start().await;

    // Provider returns the batch out of order.
    let response = serde_json::json!({
        "data": [
            { "embedding": [0.0, 1.0, 0.0], "index": 1 },
            { "embedding": [1.0, 0.0, 0.0], "index": 0 }
        ],
        "model": "test-embed",
        "usage": { "prompt_tokens": 2, "total_tokens": 2 }
    });

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-embed",
            "dimensions": 3,
            "input": ["first", "second"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(&response))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = OpenAIBackend::new(config(&mock_server, 3)).expect("backend");
    let vectors = backend
        .embed_texts(&["first".to_string(), "second".to_string()])
        .await
        .expect("embeddings");

    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0].as_slice(), &[1.0, 0.0, 0.0]);
    assert_eq!(vectors[1].as_slice(), &[0.0, 1.0, 0.0]);
}

#[tokio::test]
async fn test_server_error_is_provider_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "error": { "message": "overloaded", "type": "server_error" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = OpenAIBackend::new(config(&mock_server, 3)).expect("backend");
    let err = backend.embed("hello").await.unwrap_err();
    assert!(matches!(err, Error::Provider(_)), "got {:?}", err);
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unauthorized_is_config_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": { "message": "Incorrect API key", "type": "invalid_request_error",
                       "code": "invalid_api_key" }
        })))
        .mount(&mock_server)
        .await;

    let backend = OpenAIBackend::new(config(&mock_server, 3)).expect("backend");
    let err = backend.embed("hello").await.unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_missing_embeddings_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [ { "embedding": [1.0, 0.0, 0.0], "index": 0 } ],
            "model": "test-embed"
        })))
        .mount(&mock_server)
        .await;

    let backend = OpenAIBackend::new(config(&mock_server, 3)).expect("backend");
    let err = backend
        .embed_texts(&["a".to_string(), "b".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Provider(_)));
}
