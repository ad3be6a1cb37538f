use std::{
	future::IntoFuture,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use axum::{
	Json, Router,
	extract::State,
	http::{HeaderMap, StatusCode, header::AUTHORIZATION},
	response::IntoResponse,
	routing,
};
use reqwest::header::AUTHORIZATION as REQWEST_AUTHORIZATION;
use serde_json::{Map, Value, json};
use tokio::{
	net::TcpListener,
	sync::{oneshot, oneshot::Sender},
};

use vigil_domain::SearchOptions;
use vigil_providers::{
	AcBackend, BackendQuery, EmbeddingProvider, Error, HealthStatus, HttpEmbedding, SearchBackend,
	VectorBackend,
};

#[derive(Clone)]
struct StubState {
	calls: Arc<AtomicUsize>,
	failures: usize,
	healthy: bool,
	last_auth: Arc<Mutex<Option<String>>>,
	last_body: Arc<Mutex<Option<Value>>>,
}
impl StubState {
	fn new(failures: usize, healthy: bool) -> Self {
		Self {
			calls: Arc::new(AtomicUsize::new(0)),
			failures,
			healthy,
			last_auth: Arc::new(Mutex::new(None)),
			last_body: Arc::new(Mutex::new(None)),
		}
	}
}

async fn start_backend_server(state: StubState) -> (String, Sender<()>) {
	let app = Router::new()
		.route("/{index}/_search", routing::post(search_handler))
		.route("/_cluster/health", routing::get(health_handler))
		.route("/v1/embeddings", routing::post(embeddings_handler))
		.with_state(state);
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind backend server.");
	let addr = listener.local_addr().expect("Failed to read backend server address.");
	let (tx, rx) = oneshot::channel();
	let server = axum::serve(listener, app).with_graceful_shutdown(async move {
		let _ = rx.await;
	});

	tokio::spawn(async move {
		let _ = server.into_future().await;
	});

	(format!("http://{addr}"), tx)
}

async fn search_handler(
	State(state): State<StubState>,
	headers: HeaderMap,
	Json(payload): Json<Value>,
) -> impl IntoResponse {
	let call_index = state.calls.fetch_add(1, Ordering::SeqCst);

	*state.last_auth.lock().expect("Auth lock poisoned.") =
		headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()).map(str::to_string);
	*state.last_body.lock().expect("Body lock poisoned.") = Some(payload);

	if call_index < state.failures {
		return StatusCode::SERVICE_UNAVAILABLE.into_response();
	}

	let body = json!({
		"hits": { "hits": [
			{
				"_id": "sdn-1",
				"_score": 0.9,
				"_source": { "name": "Ivan Petrov", "entity_type": "person", "country": "RU" },
				"matched_queries": ["phrase", "fuzzy"]
			}
		]}
	});

	(StatusCode::OK, Json(body)).into_response()
}

async fn embeddings_handler(
	State(state): State<StubState>,
	headers: HeaderMap,
	Json(payload): Json<Value>,
) -> impl IntoResponse {
	state.calls.fetch_add(1, Ordering::SeqCst);

	*state.last_auth.lock().expect("Auth lock poisoned.") =
		headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()).map(str::to_string);

	let inputs = payload["input"].as_array().map(Vec::len).unwrap_or(0);
	// Reverse order so clients must sort by index.
	let data: Vec<Value> = (0..inputs)
		.rev()
		.map(|index| json!({ "index": index, "embedding": [index as f32, 1.0] }))
		.collect();

	*state.last_body.lock().expect("Body lock poisoned.") = Some(payload);

	(StatusCode::OK, Json(json!({ "data": data }))).into_response()
}

async fn health_handler(State(state): State<StubState>) -> impl IntoResponse {
	if state.healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }
}

fn backend_config(url: String) -> vigil_config::Backend {
	vigil_config::Backend {
		url,
		vector_dim: 4,
		max_retries: 3,
		base_backoff_ms: 1,
		..Default::default()
	}
}

#[test]
fn builds_bearer_auth_header() {
	let headers =
		vigil_providers::auth_headers(Some("secret"), &Map::new()).expect("Failed to build headers.");
	let value = headers.get(REQWEST_AUTHORIZATION).expect("Missing authorization header.");

	assert_eq!(value, "Bearer secret");
}

#[tokio::test]
async fn ac_search_retries_transient_failures() {
	let state = StubState::new(2, true);
	let (url, shutdown) = start_backend_server(state.clone()).await;
	let backend = AcBackend::new(&backend_config(url)).expect("Failed to build backend.");
	let options = SearchOptions::default();
	let candidates = backend
		.search(BackendQuery::Text("ivan petrov"), &options)
		.await
		.expect("Search failed.");

	assert_eq!(state.calls.load(Ordering::SeqCst), 3);
	assert_eq!(candidates.len(), 1);
	assert_eq!(candidates[0].doc_id, "sdn-1");
	assert_eq!(candidates[0].match_fields[0], "name");
	assert!(backend.is_connected());
	assert_eq!(backend.latency_stats().count, 1);

	let _ = shutdown.send(());
}

#[tokio::test]
async fn exhausted_retries_return_empty_and_disconnect() {
	let state = StubState::new(usize::MAX, false);
	let (url, shutdown) = start_backend_server(state.clone()).await;
	let backend = AcBackend::new(&backend_config(url)).expect("Failed to build backend.");
	let options = SearchOptions::default();
	let candidates = backend
		.search(BackendQuery::Text("ivan petrov"), &options)
		.await
		.expect("Search should degrade to empty.");

	assert!(candidates.is_empty());
	assert_eq!(state.calls.load(Ordering::SeqCst), 4);
	assert!(!backend.is_connected());

	// No probe is due yet, so the disconnected adapter does not call the backend again.
	let again = backend
		.search(BackendQuery::Text("ivan petrov"), &options)
		.await
		.expect("Search should degrade to empty.");

	assert!(again.is_empty());
	assert_eq!(state.calls.load(Ordering::SeqCst), 4);

	let health = backend.health_check().await;

	assert_eq!(health.status, HealthStatus::Unhealthy);
	assert!(!health.connected);

	let _ = shutdown.send(());
}

#[tokio::test]
async fn health_probe_reconnects_adapter() {
	let state = StubState::new(usize::MAX, true);
	let (url, shutdown) = start_backend_server(state.clone()).await;
	let backend = AcBackend::new(&backend_config(url)).expect("Failed to build backend.");
	let options = SearchOptions::default();
	let _ = backend.search(BackendQuery::Text("ivan petrov"), &options).await;

	assert!(!backend.is_connected());

	let health = backend.health_check().await;

	assert_eq!(health.status, HealthStatus::Healthy);
	assert!(backend.is_connected());

	let _ = shutdown.send(());
}

#[tokio::test]
async fn vector_search_sends_knn_body_with_auth() {
	let state = StubState::new(0, true);
	let (url, shutdown) = start_backend_server(state.clone()).await;
	let cfg = vigil_config::Backend { api_key: Some("secret".to_string()), ..backend_config(url) };
	let backend = VectorBackend::new(&cfg).expect("Failed to build backend.");
	let options = SearchOptions::default().with_top_k(5);
	let candidates = backend
		.search(BackendQuery::Vector(&[0.5, 0.5, 0.5, 0.5]), &options)
		.await
		.expect("Search failed.");
	let body = state.last_body.lock().expect("Body lock poisoned.").clone().expect("No body.");
	let auth = state.last_auth.lock().expect("Auth lock poisoned.").clone();

	assert_eq!(auth.as_deref(), Some("Bearer secret"));
	assert_eq!(body["knn"]["k"], 5);
	assert_eq!(body["knn"]["field"], "name_vector");
	assert_eq!(candidates[0].match_fields, vec!["name_vector"]);
	assert!(candidates[0].trace.cosine.is_some());

	let _ = shutdown.send(());
}

#[tokio::test]
async fn vector_dimension_mismatch_skips_backend() {
	let state = StubState::new(0, true);
	let (url, shutdown) = start_backend_server(state.clone()).await;
	let backend = VectorBackend::new(&backend_config(url)).expect("Failed to build backend.");
	let options = SearchOptions::default();
	let result = backend.search(BackendQuery::Vector(&[0.5, 0.5]), &options).await;

	assert!(matches!(result, Err(Error::DimensionMismatch { expected: 4, actual: 2 })));
	assert_eq!(state.calls.load(Ordering::SeqCst), 0);

	let _ = shutdown.send(());
}

#[tokio::test]
async fn ac_backend_rejects_vector_queries() {
	let backend =
		AcBackend::new(&vigil_config::Backend::default()).expect("Failed to build backend.");
	let options = SearchOptions::default();
	let result = backend.search(BackendQuery::Vector(&[0.1]), &options).await;

	assert!(matches!(result, Err(Error::UnsupportedQuery { kind: "vector", .. })));
}

#[tokio::test]
async fn embedding_client_is_reused_across_requests() {
	let state = StubState::new(0, true);
	let (url, shutdown) = start_backend_server(state.clone()).await;
	let cfg = vigil_config::Embedding {
		enabled: true,
		api_base: url,
		api_key: "embed-key".to_string(),
		dimensions: 2,
		..Default::default()
	};
	let embedder = HttpEmbedding::new(&cfg).expect("Failed to build embedding client.");
	let texts = vec!["ivan petrov".to_string(), "olga petrova".to_string()];

	for _ in 0..2 {
		let vectors = embedder.embed(&texts).await.expect("Embedding failed.");

		assert_eq!(vectors, vec![vec![0.0, 1.0], vec![1.0, 1.0]]);
	}

	let body = state.last_body.lock().expect("Body lock poisoned.").clone().expect("No body.");
	let auth = state.last_auth.lock().expect("Auth lock poisoned.").clone();

	assert_eq!(state.calls.load(Ordering::SeqCst), 2);
	assert_eq!(auth.as_deref(), Some("Bearer embed-key"));
	assert_eq!(body["model"], cfg.model.as_str());
	assert_eq!(body["dimensions"], 2);

	let _ = shutdown.send(());
}

#[test]
fn embedding_client_rejects_non_string_headers() {
	let mut default_headers = Map::new();

	default_headers.insert("x-tenant".to_string(), json!(7));

	let cfg = vigil_config::Embedding { default_headers, ..Default::default() };

	assert!(matches!(HttpEmbedding::new(&cfg), Err(Error::InvalidConfig { .. })));
}
