//! End-to-end scenarios driving the Engine and Worker against a mocked
//! control protocol, and the admission API against an in-process router.

use pipeworks::api::{router, AppState};
use pipeworks::control_client::ControlClient;
use pipeworks::dockerinfo::{EndpointDirectory, ServiceEndpoint};
use pipeworks::engine::Engine;
use pipeworks::graph::{node_key, ExecutionGraph, GraphNode, OperationSignature};
use pipeworks::queue::mem::InMemoryTaskQueue;
use pipeworks::queue::TaskQueue;
use pipeworks::state::{TaskStatus, WorkflowStatus};
use pipeworks::store::mem::InMemoryStateStore;
use pipeworks::store::StateStore;
use pipeworks::worker::Worker;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn node(container: &str, op: &str, deps: &[&str], next: &[&str]) -> GraphNode {
    GraphNode {
        container_name: container.to_string(),
        proto_uri: format!("{container}.proto"),
        image: format!("{container}:latest"),
        node_type: "task".to_string(),
        operation: OperationSignature {
            operation_name: op.to_string(),
            input_message_name: String::new(),
            output_message_name: String::new(),
            input_message_stream: false,
            output_message_stream: false,
        },
        next: next.iter().map(|s| (*s).to_string()).collect(),
        deps: deps.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn graph_from(nodes: Vec<GraphNode>) -> ExecutionGraph {
    let mut graph = ExecutionGraph::default();
    for n in nodes {
        graph.add_node(n);
    }
    graph.start_keys = graph
        .nodes
        .values()
        .filter(|n| n.deps.is_empty())
        .map(GraphNode::key)
        .collect();
    graph
}

async fn endpoints_for(server: &MockServer, containers: &[&str]) -> EndpointDirectory {
    let addr = server.address();
    containers
        .iter()
        .map(|name| {
            (
                (*name).to_string(),
                ServiceEndpoint {
                    address: addr.ip().to_string(),
                    port: addr.port(),
                },
            )
        })
        .collect()
}

fn harness() -> (Arc<InMemoryStateStore>, Arc<InMemoryTaskQueue>, Arc<Engine>) {
    let store = Arc::new(InMemoryStateStore::new());
    let queue = Arc::new(InMemoryTaskQueue::new());
    let engine = Arc::new(Engine::new(store.clone(), queue.clone()));
    (store, queue, engine)
}

fn complete_response(protocol: &str, uri: &str, format: &str) -> serde_json::Value {
    serde_json::json!({
        "status": "complete",
        "output": {"protocol": protocol, "uri": uri, "format": format},
    })
}

#[tokio::test]
async fn s1_single_node_completes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/control/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(complete_response(
            "s3",
            "s3://b/out.json",
            "json",
        )))
        .mount(&server)
        .await;

    let (store, _queue, engine) = harness();
    let graph = graph_from(vec![node("svc", "Process", &[], &[])]);
    engine.initialize("wf1", &graph).await.unwrap();
    engine.start("wf1", None).await.unwrap();

    let control = ControlClient::new(Duration::from_secs(5)).unwrap();
    let worker = Worker::new(engine.clone(), control, Duration::from_millis(5));
    let endpoints = endpoints_for(&server, &["svc"]).await;
    worker.run("wf1", &endpoints, Duration::ZERO).await.unwrap();

    let workflow = store.get_workflow("wf1").await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    let tasks = store.get_workflow_tasks("wf1").await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert_eq!(tasks[0].output_refs[0].uri, "s3://b/out.json");
}

#[tokio::test]
async fn s2_two_node_chain_propagates_output_as_input() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/control/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(complete_response(
            "s3",
            "s3://b/mid.json",
            "json",
        )))
        .mount(&server)
        .await;

    let (store, _queue, engine) = harness();
    let graph = graph_from(vec![
        node("a", "Process", &[], &["b:Process"]),
        node("b", "Process", &["a:Process"], &[]),
    ]);
    engine.initialize("wf2", &graph).await.unwrap();
    engine.start("wf2", None).await.unwrap();

    let control = ControlClient::new(Duration::from_secs(5)).unwrap();
    let worker = Worker::new(engine.clone(), control, Duration::from_millis(5));
    let endpoints = endpoints_for(&server, &["a", "b"]).await;
    worker.run("wf2", &endpoints, Duration::ZERO).await.unwrap();

    let workflow = store.get_workflow("wf2").await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);

    let b_task = store
        .get_workflow_tasks("wf2")
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.node_key == "b:Process")
        .unwrap();
    assert_eq!(b_task.status, TaskStatus::Completed);
    assert_eq!(b_task.input_refs[0].uri, "s3://b/mid.json");
}

#[tokio::test]
async fn s3_diamond_fan_in_sees_both_branch_outputs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/control/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(complete_response(
            "s3",
            "s3://b/x.json",
            "json",
        )))
        .mount(&server)
        .await;

    let (store, _queue, engine) = harness();
    let graph = graph_from(vec![
        node("a", "Process", &[], &["b:Process", "c:Process"]),
        node("b", "Process", &["a:Process"], &["d:Process"]),
        node("c", "Process", &["a:Process"], &["d:Process"]),
        node("d", "Process", &["b:Process", "c:Process"], &[]),
    ]);
    engine.initialize("wf3", &graph).await.unwrap();
    engine.start("wf3", None).await.unwrap();

    let control = ControlClient::new(Duration::from_secs(5)).unwrap();
    let worker = Worker::new(engine.clone(), control, Duration::from_millis(5));
    let endpoints = endpoints_for(&server, &["a", "b", "c", "d"]).await;
    worker.run("wf3", &endpoints, Duration::ZERO).await.unwrap();

    let workflow = store.get_workflow("wf3").await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);

    let tasks = store.get_workflow_tasks("wf3").await.unwrap();
    assert_eq!(tasks.len(), 4);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));

    let d_task = tasks.iter().find(|t| t.node_key == "d:Process").unwrap();
    assert_eq!(d_task.input_refs.len(), 2);
}

#[tokio::test]
async fn s4_long_running_task_completes_after_polling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/control/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "running",
            "task_id": "svc-1",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/control/status/svc-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "running"})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/control/status/svc-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "complete"})))
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/control/output/svc-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "output": {"protocol": "s3", "uri": "s3://b/done.json", "format": "json"},
        })))
        .mount(&server)
        .await;

    let (store, _queue, engine) = harness();
    let graph = graph_from(vec![node("svc", "Process", &[], &[])]);
    engine.initialize("wf4", &graph).await.unwrap();
    engine.start("wf4", None).await.unwrap();

    let control = ControlClient::new(Duration::from_secs(5)).unwrap();
    let worker = Worker::new(engine.clone(), control, Duration::from_millis(5));
    let endpoints = endpoints_for(&server, &["svc"]).await;
    worker.run("wf4", &endpoints, Duration::ZERO).await.unwrap();

    let workflow = store.get_workflow("wf4").await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn s5_failure_propagates_to_workflow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/control/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "failed",
            "error": "Invalid input",
        })))
        .mount(&server)
        .await;

    let (store, _queue, engine) = harness();
    let graph = graph_from(vec![node("svc", "Process", &[], &[])]);
    engine.initialize("wf5", &graph).await.unwrap();
    engine.start("wf5", None).await.unwrap();

    let control = ControlClient::new(Duration::from_secs(5)).unwrap();
    let worker = Worker::new(engine.clone(), control, Duration::from_millis(5));
    let endpoints = endpoints_for(&server, &["svc"]).await;
    worker.run("wf5", &endpoints, Duration::ZERO).await.unwrap();

    let workflow = store.get_workflow("wf5").await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Failed);
    assert!(workflow.error.unwrap().ends_with("failed: Invalid input"));

    let tasks = store.get_workflow_tasks("wf5").await.unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Failed);
    assert_eq!(tasks[0].error.as_deref(), Some("Invalid input"));
}

#[tokio::test]
async fn unrecognized_execute_status_fails_the_task_with_the_raw_value() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/control/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "paused",
        })))
        .mount(&server)
        .await;

    let (store, _queue, engine) = harness();
    let graph = graph_from(vec![node("svc", "Process", &[], &[])]);
    engine.initialize("wf-unknown", &graph).await.unwrap();
    engine.start("wf-unknown", None).await.unwrap();

    let control = ControlClient::new(Duration::from_secs(5)).unwrap();
    let worker = Worker::new(engine.clone(), control, Duration::from_millis(5));
    let endpoints = endpoints_for(&server, &["svc"]).await;
    worker.run("wf-unknown", &endpoints, Duration::ZERO).await.unwrap();

    let tasks = store.get_workflow_tasks("wf-unknown").await.unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Failed);
    assert_eq!(tasks[0].error.as_deref(), Some("Unknown status: paused"));
}

#[tokio::test]
async fn s6_cyclic_blueprint_is_rejected_with_no_workflow_persisted() {
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let queue: Arc<dyn TaskQueue> = Arc::new(InMemoryTaskQueue::new());
    let engine = Arc::new(Engine::new(store.clone(), queue.clone()));
    let state = AppState { engine, store: store.clone(), queue };

    let blueprint = serde_json::json!({
        "name": "n", "pipeline_id": "p", "creation_date": "2024-01-01",
        "type": "pipeline", "version": "1",
        "nodes": [
            {
                "container_name": "a", "proto_uri": "a.proto", "image": "a:latest", "node_type": "task",
                "operation_signature_list": [{
                    "operation_signature": {"operation_name": "Process"},
                    "connected_to": [{"container_name": "b", "operation_signature": {"operation_name": "Process"}}],
                }],
            },
            {
                "container_name": "b", "proto_uri": "b.proto", "image": "b:latest", "node_type": "task",
                "operation_signature_list": [{
                    "operation_signature": {"operation_name": "Process"},
                    "connected_to": [{"container_name": "a", "operation_signature": {"operation_name": "Process"}}],
                }],
            },
        ],
    });
    let dockerinfo = serde_json::json!({"docker_info_list": [
        {"container_name": "a", "ip_address": "127.0.0.1", "port": "8080"},
        {"container_name": "b", "ip_address": "127.0.0.1", "port": "8081"},
    ]});
    let body = serde_json::json!({"blueprint": blueprint, "dockerinfo": dockerinfo}).to_string();

    let response = router(state)
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/workflows")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"], "Invalid blueprint: Circular dependency detected");

    assert!(store.list_running_workflows().await.unwrap().is_empty());
}

#[test]
fn node_key_helper_matches_container_operation_shape() {
    assert_eq!(node_key("svc", "Process"), "svc:Process");
}
