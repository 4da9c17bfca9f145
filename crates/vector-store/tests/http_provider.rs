use gcq_vector_store::{
    EmbeddingError, EmbeddingProvider, HttpProvider, ProviderKind, ProviderSpec, RetryPolicy,
};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial: Duration::from_millis(1),
        factor: 2.0,
        cap: Duration::from_millis(4),
        max_attempts: 5,
    }
}

fn spec(server: &MockServer, dimensions: usize) -> ProviderSpec {
    let mut spec = ProviderSpec::new(ProviderKind::Http, "test-model");
    spec.base_url = Some(server.uri());
    spec.endpoint = Some("/api/embeddings".to_string());
    spec.dimensions = Some(dimensions);
    spec
}

/// Answers with one `[len, 1]` vector per input.
struct LengthEmbedder;

impl Respond for LengthEmbedder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = serde_json::from_slice(&request.body).expect("json body");
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .expect("input array")
            .iter()
            .map(|t| vec![t.as_str().map_or(0, str::len) as f32, 1.0])
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

#[tokio::test]
async fn batches_requests_and_preserves_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(LengthEmbedder)
        .expect(3)
        .mount(&server)
        .await;

    let mut spec = spec(&server, 2);
    spec.batch_size = 2;
    let provider = HttpProvider::connect(spec, CancellationToken::new())
        .await
        .expect("provider");

    let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"]
        .iter()
        .map(|s| (*s).to_string())
        .collect();
    let vectors = provider.embed(&texts).await.expect("embed");
    assert_eq!(vectors.len(), 5);

    for (text, vector) in texts.iter().zip(&vectors) {
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        let ratio = vector[0] / vector[1];
        assert!((ratio - text.len() as f32).abs() < 1e-3, "order broken for {text}");
    }
}

#[tokio::test]
async fn retries_server_errors_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.0, 2.0]] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = HttpProvider::connect(spec(&server, 2), CancellationToken::new())
        .await
        .expect("provider")
        .with_retry_policy(fast_retry());
    let vectors = provider.embed(&["x".to_string()]).await.expect("embed");
    assert_eq!(vectors, vec![vec![0.0, 1.0]]);
}

#[tokio::test]
async fn rate_limit_exhausts_into_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .expect(5)
        .mount(&server)
        .await;

    let provider = HttpProvider::connect(spec(&server, 2), CancellationToken::new())
        .await
        .expect("provider")
        .with_retry_policy(fast_retry());
    let err = provider
        .embed(&["x".to_string()])
        .await
        .expect_err("retries exhausted");
    assert!(matches!(err, EmbeddingError::Unavailable(_)), "{err:?}");
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = HttpProvider::connect(spec(&server, 2), CancellationToken::new())
        .await
        .expect("provider")
        .with_retry_policy(fast_retry());
    let err = provider
        .embed(&["x".to_string()])
        .await
        .expect_err("bad request");
    assert!(matches!(err, EmbeddingError::BadRequest(_)), "{err:?}");
}

#[tokio::test]
async fn sends_bearer_token_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer sekret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embedding": [1.0, 0.0] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut spec = spec(&server, 2);
    spec.token = Some("sekret".to_string());
    let provider = HttpProvider::connect(spec, CancellationToken::new())
        .await
        .expect("provider");
    provider.embed(&["x".to_string()]).await.expect("embed");
}

#[tokio::test]
async fn accepts_openai_shaped_responses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "index": 1, "embedding": [0.0, 3.0] },
                { "index": 0, "embedding": [4.0, 0.0] }
            ]
        })))
        .mount(&server)
        .await;

    let provider = HttpProvider::connect(spec(&server, 2), CancellationToken::new())
        .await
        .expect("provider");
    let vectors = provider
        .embed(&["first".to_string(), "second".to_string()])
        .await
        .expect("embed");
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn probes_dimension_when_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[1.0, 0.0, 0.0, 0.0]] })),
        )
        .mount(&server)
        .await;

    let mut spec = spec(&server, 0);
    spec.dimensions = None;
    let provider = HttpProvider::connect(spec, CancellationToken::new())
        .await
        .expect("provider");
    assert_eq!(provider.dimension(), 4);
}

#[tokio::test]
async fn closed_provider_refuses_work() {
    let server = MockServer::start().await;
    let provider = HttpProvider::connect(spec(&server, 2), CancellationToken::new())
        .await
        .expect("provider");
    provider.close().await;
    let err = provider
        .embed(&["x".to_string()])
        .await
        .expect_err("closed");
    assert_eq!(err, EmbeddingError::Cancelled);
}

#[tokio::test]
async fn health_reports_unreachable_endpoint() {
    let mut spec = ProviderSpec::new(ProviderKind::Ollama, "nomic-embed-text");
    spec.base_url = Some("http://127.0.0.1:9".to_string());
    let provider = HttpProvider::connect(spec, CancellationToken::new())
        .await
        .expect("dimension is known, no network needed");
    let health = provider.health().await;
    assert_eq!(health.status, gcq_protocol::ProviderStatus::Unreachable);
}
