//! n8n and Flowise backends against a mock HTTP server

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wabridge::protocol::{UserContext, WorkflowType};
use wabridge::routing::{
    BackendError, FlowiseBackend, FlowiseConfig, N8nBackend, N8nConfig, RouteContext,
    UnconfiguredBackend, WorkflowBackend, WorkflowRouter,
};
use wabridge::testing::mocks::MockWorkflowConfigStore;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn user() -> UserContext {
    UserContext {
        user_id: Uuid::new_v4(),
        name: "Dummy".into(),
        phone: "628123456".into(),
        email: "dummy@example.com".into(),
    }
}

#[tokio::test]
async fn test_n8n_posts_user_context_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook/whatsapp"))
        .and(body_partial_json(json!({
            "message": "halo",
            "user_context": {"phone": "628123456", "name": "Dummy"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = N8nBackend::new(
        N8nConfig::new().with_webhook_url(format!("{}/webhook/whatsapp", server.uri())),
    );
    backend
        .send_message_to_workflow(&user(), "halo")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_n8n_non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let backend = N8nBackend::new(N8nConfig::new().with_webhook_url(server.uri()));
    let err = backend
        .send_message_to_workflow(&user(), "halo")
        .await
        .unwrap_err();

    match err {
        BackendError::Status { status, body } => {
            assert_eq!(status, 502);
            assert!(body.contains("bad gateway"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_n8n_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let backend = N8nBackend::new(
        N8nConfig::new()
            .with_webhook_url(server.uri())
            .with_timeout_ms(50),
    );
    let err = backend
        .send_message_to_workflow(&user(), "halo")
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Timeout));
}

#[tokio::test]
async fn test_flowise_posts_question_with_session_and_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/prediction/flow-1"))
        .and(header("authorization", "Bearer flowise-key"))
        .and(body_partial_json(json!({
            "question": "apa kabar",
            "overrideConfig": {"sessionId": "628123456"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "baik"})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = FlowiseBackend::new(
        FlowiseConfig::new()
            .with_base_url(server.uri())
            .with_chatflow_id("flow-1")
            .with_api_key("flowise-key"),
    );
    backend
        .send_message_to_workflow(&user(), "apa kabar")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_router_falls_back_to_n8n_for_unknown_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/n8n"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let n8n = Arc::new(N8nBackend::new(
        N8nConfig::new().with_webhook_url(format!("{}/n8n", server.uri())),
    ));
    let router = WorkflowRouter::new(
        Arc::new(MockWorkflowConfigStore::returning("unknown-type")),
        n8n,
        Arc::new(UnconfiguredBackend::new(WorkflowType::Flowise)),
    );

    let outcome = router
        .route(
            &RouteContext::with_timeout(Duration::from_secs(2)),
            &user(),
            "halo",
        )
        .await
        .unwrap();
    assert_eq!(outcome.backend, WorkflowType::N8n);
    assert!(outcome.fallback.is_some());
}

#[tokio::test]
async fn test_router_config_failure_defaults_to_n8n() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let router = WorkflowRouter::new(
        Arc::new(MockWorkflowConfigStore::failing()),
        Arc::new(N8nBackend::new(
            N8nConfig::new().with_webhook_url(server.uri()),
        )),
        Arc::new(UnconfiguredBackend::new(WorkflowType::Flowise)),
    );

    let outcome = router
        .route(
            &RouteContext::with_timeout(Duration::from_secs(2)),
            &user(),
            "halo",
        )
        .await
        .unwrap();
    assert_eq!(outcome.backend, WorkflowType::N8n);
}

#[tokio::test]
async fn test_unconfigured_flowise_fails_routing() {
    let router = WorkflowRouter::new(
        Arc::new(MockWorkflowConfigStore::returning("flowise")),
        Arc::new(N8nBackend::new(N8nConfig::new())),
        Arc::new(UnconfiguredBackend::new(WorkflowType::Flowise)),
    );

    let result = router
        .route(
            &RouteContext::with_timeout(Duration::from_secs(1)),
            &user(),
            "halo",
        )
        .await;
    assert!(result.is_err());
}
