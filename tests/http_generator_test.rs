//! HTTP generator adapter against mock backends.

use std::sync::Arc;

use arbiter::adapters::clock::ManualClock;
use arbiter::adapters::generators::HttpGenerator;
use arbiter::domain::errors::GenerationError;
use arbiter::domain::models::{
    CircuitBreakerConfig, GenerationContext, GenerationPhase, GeneratorBackend, GeneratorConfig,
};
use arbiter::domain::ports::Generator;
use arbiter::services::GuardedGenerator;
use mockito::Matcher;

fn chat_config(base_url: &str) -> GeneratorConfig {
    GeneratorConfig::new("chat", base_url, "test-model")
}

fn ctx() -> GenerationContext {
    GenerationContext::new(GenerationPhase::Initial)
}

#[tokio::test]
async fn test_openai_chat_parses_reported_confidence() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "model": "test-model",
            "stream": false
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "Paris is the capital.\nConfidence: 0.8"
                    }
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let generator = HttpGenerator::new(chat_config(&server.url()))
        .unwrap()
        .with_api_key("secret");
    let generation = generator.invoke("capital of france?", &ctx()).await.unwrap();

    assert_eq!(generation.text, "Paris is the capital.");
    assert!((generation.confidence - 0.8).abs() < 1e-9);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_ollama_uses_base_confidence_and_calibration() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body(r#"{"response": "An answer without a score."}"#)
        .create_async()
        .await;

    let mut config = chat_config(&server.url()).with_backend(GeneratorBackend::Ollama);
    config.base_confidence = 0.6;
    config.calibration = 0.5;
    let generator = HttpGenerator::new(config).unwrap();
    let generation = generator.invoke("anything", &ctx()).await.unwrap();

    assert_eq!(generation.text, "An answer without a score.");
    assert!((generation.confidence - 0.3).abs() < 1e-9);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_ollama_stream_is_joined_into_one_answer() {
    let mut server = mockito::Server::new_async().await;
    let body = concat!(
        "{\"response\":\"Rust uses \",\"done\":false}\n",
        "{\"response\":\"ownership.\\nConfidence: 0.9\",\"done\":false}\n",
        "{\"response\":\"\",\"done\":true}\n",
    );
    let mock = server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(serde_json::json!({ "stream": true })))
        .with_status(200)
        .with_header("content-type", "application/x-ndjson")
        .with_body(body)
        .create_async()
        .await;

    let config = chat_config(&server.url()).with_backend(GeneratorBackend::Ollama);
    let generator = HttpGenerator::new(config).unwrap();
    let generation = generator.invoke("memory model?", &ctx()).await.unwrap();

    assert_eq!(generation.text, "Rust uses ownership.");
    assert!((generation.confidence - 0.9).abs() < 1e-9);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_status_and_bad_body() {
    let mut server = mockito::Server::new_async().await;
    let _unavailable = server
        .mock("POST", "/v1/chat/completions")
        .with_status(503)
        .with_body("overloaded")
        .create_async()
        .await;

    let generator = HttpGenerator::new(chat_config(&server.url())).unwrap();
    match generator.invoke("q", &ctx()).await.unwrap_err() {
        GenerationError::Status { code, body } => {
            assert_eq!(code, 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("expected status error, got {other:?}"),
    }

    let mut server = mockito::Server::new_async().await;
    let _garbage = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;
    let generator = HttpGenerator::new(chat_config(&server.url())).unwrap();
    assert!(matches!(
        generator.invoke("q", &ctx()).await.unwrap_err(),
        GenerationError::Parse(_)
    ));
}

#[tokio::test]
async fn test_guarded_generator_stops_calling_failing_backend() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let clock = Arc::new(ManualClock::default());
    let guarded = GuardedGenerator::new(
        Arc::new(HttpGenerator::new(chat_config(&server.url())).unwrap()),
        &CircuitBreakerConfig {
            failure_threshold: 2,
            cooldown_secs: 60,
        },
        clock,
    );

    for _ in 0..2 {
        assert!(matches!(
            guarded.invoke("q", &ctx()).await.unwrap_err(),
            GenerationError::Status { code: 500, .. }
        ));
    }
    assert!(matches!(
        guarded.invoke("q", &ctx()).await.unwrap_err(),
        GenerationError::CircuitOpen(_)
    ));
    mock.assert_async().await;
}
