use std::num::NonZeroUsize;

use chrono::{Duration, Utc};
use prost::Message;
use recs_trainer::appeal::{AppealTrainer, TrainingOutcome};
use recs_trainer::config::Config;
use recs_trainer::ml::MlpConfig;
use recs_trainer::ml::onnx::{INPUT_NAME, ModelProto, OUTPUT_NAME};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIM: usize = 4;

fn config_for(server: &MockServer) -> Config {
    Config::new(server.uri(), "service-key", "sk-test")
        .with_anthropic("anthropic-key", server.uri())
        .with_openai_base_url(server.uri())
        .with_embedding_dim(NonZeroUsize::new(DIM).expect("non-zero"))
}

fn quick_mlp() -> MlpConfig {
    MlpConfig {
        hidden_layers: vec![8, 4],
        max_epochs: 30,
        ..MlpConfig::default()
    }
}

/// RPC missing: items and events come from the plain tables.
async fn mount_tables(server: &MockServer, items: usize) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/get_items_with_events"))
        .respond_with(ResponseTemplate::new(404).set_body_string("function not found"))
        .mount(server)
        .await;

    let rows: Vec<_> = (0..items)
        .map(|i| serde_json::json!({"id": i, "title": format!("Title {i}"), "description": "text"}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/rest/v1/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;

    let now = Utc::now();
    let mut events = Vec::new();
    for i in 0..items {
        events.push(serde_json::json!({
            "item_id": i,
            "event_type": "complete",
            "strength": 1.0,
            "created_at": (now - Duration::days(i64::try_from(i).unwrap_or(0))).to_rfc3339(),
        }));
        if i % 2 == 0 {
            events.push(serde_json::json!({
                "item_id": i,
                "event_type": "skip",
                "strength": -1.0,
                "created_at": now.to_rfc3339(),
            }));
        }
    }
    // only views for the extra item: it has no mass and must be dropped
    events.push(serde_json::json!({
        "item_id": 999,
        "event_type": "view",
        "strength": 1.0,
        "created_at": now.to_rfc3339(),
    }));
    Mock::given(method("GET"))
        .and(path("/rest/v1/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(events))
        .mount(server)
        .await;
}

#[tokio::test]
async fn falls_back_to_openai_and_writes_loadable_artifacts() {
    let server = MockServer::start().await;
    mount_tables(&server, 15).await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "anthropic-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{"type": "text", "text": "Here is your embedding: [0.1, 0.2]"}]
        })))
        .expect(15)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"embedding": [0.3, -0.1, 0.7, 0.2]}]
        })))
        .expect(15)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let trainer = AppealTrainer::from_config(&config)
        .expect("trainer should build")
        .with_mlp_config(quick_mlp());
    let dir = tempfile::tempdir().expect("tempdir should be created");

    let outcome = trainer.run_training(dir.path()).await.expect("training should run");

    let TrainingOutcome::Trained(report) = outcome else {
        panic!("expected trained outcome, got {outcome:?}");
    };
    assert_eq!(report.samples, 15);
    assert_eq!(report.test_samples, 3);
    assert_eq!(report.degraded_embeddings, 0);
    assert!(report.epochs > 0);

    let bytes = std::fs::read(&report.onnx_path).expect("onnx file should exist");
    let model = ModelProto::decode(bytes.as_slice()).expect("onnx should decode");
    let graph = model.graph.expect("graph should be present");
    assert_eq!(graph.input[0].name, INPUT_NAME);
    assert_eq!(graph.output[0].name, OUTPUT_NAME);
    assert!(report.model_path.is_file());
    assert!(report.scaler_path.is_file());
}

#[tokio::test]
async fn unreachable_embedding_providers_degrade_to_zero_vectors() {
    let server = MockServer::start().await;
    mount_tables(&server, 10).await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let trainer = AppealTrainer::from_config(&config_for(&server))
        .expect("trainer should build")
        .with_mlp_config(quick_mlp());
    let dir = tempfile::tempdir().expect("tempdir should be created");

    let outcome = trainer.run_training(dir.path()).await.expect("training should run");

    let TrainingOutcome::Trained(report) = outcome else {
        panic!("expected trained outcome, got {outcome:?}");
    };
    assert_eq!(report.degraded_embeddings, 10);
}

#[tokio::test]
async fn insufficient_examples_return_early_without_artifacts() {
    let server = MockServer::start().await;
    mount_tables(&server, 4).await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let trainer = AppealTrainer::from_config(&config_for(&server)).expect("trainer should build");
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let output = dir.path().join("nested").join("models");

    let outcome = trainer.run_training(&output).await.expect("training should not fail");

    assert!(matches!(
        outcome,
        TrainingOutcome::InsufficientData { examples: 4, required: 10 }
    ));
    assert!(output.is_dir());
    assert_eq!(std::fs::read_dir(&output).expect("dir should exist").count(), 0);
}
