use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use slotforge_engine::backend::{GenerationJob, ImageBackend};
use slotforge_engine::config::A1111Config;
use slotforge_engine::{A1111Backend, Board, BoardOptions, EngineError, SessionPhase};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Clone, Default)]
struct MockState {
    txt2img_bodies: Arc<Mutex<Vec<Value>>>,
    auth_headers: Arc<Mutex<Vec<String>>>,
    progress_queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    fail_txt2img: bool,
    txt2img_delay: Duration,
}

fn png_base64(color: [u8; 3]) -> String {
    let image = RgbImage::from_pixel(4, 4, Rgb(color));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    BASE64.encode(out.into_inner())
}

fn record_auth(state: &MockState, headers: &HeaderMap) {
    if let Some(value) = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
    {
        state
            .auth_headers
            .lock()
            .expect("auth headers lock")
            .push(value.to_string());
    }
}

async fn txt2img(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    record_auth(&state, &headers);
    let n_iter = body["n_iter"].as_u64().unwrap_or(1);
    state
        .txt2img_bodies
        .lock()
        .expect("txt2img bodies lock")
        .push(body);
    if !state.txt2img_delay.is_zero() {
        tokio::time::sleep(state.txt2img_delay).await;
    }
    if state.fail_txt2img {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "OutOfMemoryError", "detail": "CUDA out of memory"})),
        );
    }
    let images: Vec<String> = (0..n_iter)
        .map(|idx| png_base64([(idx as u8).wrapping_mul(40), 10, 200]))
        .collect();
    (StatusCode::OK, Json(json!({"images": images, "parameters": {}})))
}

async fn progress(
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    state
        .progress_queries
        .lock()
        .expect("progress queries lock")
        .push(query);
    Json(json!({
        "progress": 0.42,
        "eta_relative": 3.4,
        "state": {"job": "job-1", "sampling_step": 5, "sampling_steps": 20},
        "current_image": null
    }))
}

async fn loras(State(state): State<MockState>, headers: HeaderMap) -> Json<Value> {
    record_auth(&state, &headers);
    Json(json!([
        {"name": "gold_leaf_v1", "alias": "gold", "path": "/models/Lora/gold_leaf_v1.safetensors"},
        {"name": "", "alias": "broken"},
        {"name": "pixel_art"}
    ]))
}

async fn sd_models() -> Json<Value> {
    Json(json!([
        {"title": "sdxl_base.safetensors [31e35c80fc]", "model_name": "sdxl_base"},
        {"title": "dreamshaper_8.safetensors", "model_name": "dreamshaper_8"}
    ]))
}

async fn spawn_mock_server(state: MockState) -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/sdapi/v1/txt2img", post(txt2img))
        .route("/sdapi/v1/progress", get(progress))
        .route("/sdapi/v1/loras", get(loras))
        .route("/sdapi/v1/sd-models", get(sd_models))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let address: SocketAddr = listener.local_addr().expect("mock listener local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        server.await.expect("run mock server");
    });
    (format!("http://{address}"), shutdown_tx, handle)
}

fn job(count: u32) -> GenerationJob {
    GenerationJob {
        prompt: "golden scarab, art deco".to_string(),
        negative_prompt: "text, watermark".to_string(),
        width: 256,
        height: 0,
        cfg_scale: 7.0,
        steps: 20,
        sampler: "Euler a".to_string(),
        variant_count: count,
    }
}

fn backend(base_url: String, config: A1111Config) -> A1111Backend {
    A1111Backend::new(&A1111Config { base_url, ..config }).expect("build a1111 backend")
}

#[tokio::test]
async fn txt2img_posts_payload_and_decodes_images() {
    let state = MockState::default();
    let (base_url, shutdown, handle) = spawn_mock_server(state.clone()).await;
    let backend = backend(
        format!("{base_url}/sdapi/v1/"),
        A1111Config {
            bearer_token: Some("secret-token".to_string()),
            ..A1111Config::default()
        },
    );

    let images = backend.txt2img(&job(3)).await.expect("txt2img succeeds");
    assert_eq!(images.len(), 3);
    assert!(images.iter().all(|image| image.mime_type() == "image/png"));
    assert_eq!(images[0].dimensions(), Some((4, 4)));

    let bodies = state.txt2img_bodies.lock().expect("txt2img bodies lock").clone();
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_eq!(body["prompt"], json!("golden scarab, art deco"));
    assert_eq!(body["negative_prompt"], json!("text, watermark"));
    assert_eq!(body["width"], json!(256));
    assert_eq!(body["height"], json!(512));
    assert_eq!(body["n_iter"], json!(3));
    assert_eq!(body["batch_size"], json!(1));
    assert_eq!(body["sampler_name"], json!("Euler a"));
    assert_eq!(
        state.auth_headers.lock().expect("auth headers lock").clone(),
        vec!["Bearer secret-token".to_string()]
    );

    let _ = shutdown.send(());
    handle.await.expect("mock server task");
}

#[tokio::test]
async fn backend_error_status_is_surfaced() {
    let state = MockState {
        fail_txt2img: true,
        ..MockState::default()
    };
    let (base_url, shutdown, handle) = spawn_mock_server(state).await;
    let backend = backend(base_url, A1111Config::default());

    match backend.txt2img(&job(1)).await {
        Err(EngineError::Backend {
            status, message, ..
        }) => {
            assert_eq!(status, 500);
            assert!(message.contains("CUDA out of memory"));
        }
        other => panic!("expected backend error, got {other:?}"),
    }

    let _ = shutdown.send(());
    handle.await.expect("mock server task");
}

#[tokio::test]
async fn progress_loras_and_health() {
    let state = MockState::default();
    let (base_url, shutdown, handle) = spawn_mock_server(state.clone()).await;
    let backend = backend(
        base_url.clone(),
        A1111Config {
            basic_auth: Some("artist:hunter2".to_string()),
            ..A1111Config::default()
        },
    );

    let snapshot = backend.progress().await.expect("progress succeeds");
    assert_eq!(snapshot.to_string(), "42% · 5/20 · ETA 3s");
    let queries = state.progress_queries.lock().expect("progress queries lock").clone();
    assert_eq!(
        queries[0].get("skip_current_image").map(String::as_str),
        Some("true")
    );

    let loras = backend.loras().await.expect("loras succeeds");
    let names: Vec<&str> = loras.iter().map(|lora| lora.name.as_str()).collect();
    assert_eq!(names, vec!["gold_leaf_v1", "pixel_art"]);
    assert_eq!(loras[0].alias.as_deref(), Some("gold"));
    assert_eq!(
        state.auth_headers.lock().expect("auth headers lock").clone(),
        vec![format!("Basic {}", BASE64.encode("artist:hunter2"))]
    );

    let report = backend.health().await;
    assert!(report.ok);
    assert_eq!(report.base_url.as_deref(), Some(base_url.as_str()));
    assert_eq!(report.models, vec!["sdxl_base", "dreamshaper_8"]);
    assert_eq!(report.max_images_per_request, 10);

    let _ = shutdown.send(());
    handle.await.expect("mock server task");
}

#[tokio::test]
async fn unreachable_backend_reports_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind throwaway listener");
    let address = listener.local_addr().expect("throwaway local addr");
    drop(listener);
    let backend = backend(format!("http://{address}"), A1111Config::default());

    let err = backend.txt2img(&job(1)).await.expect_err("nothing is listening");
    assert!(matches!(err, EngineError::Transport { .. }));
    assert!(!backend.health().await.ok);
}

#[tokio::test]
async fn board_polls_progress_while_job_is_in_flight() {
    let state = MockState {
        txt2img_delay: Duration::from_millis(400),
        ..MockState::default()
    };
    let (base_url, shutdown, handle) = spawn_mock_server(state.clone()).await;
    let backend = Arc::new(backend(base_url, A1111Config::default()));
    let board = Board::with_reference_layout(
        backend,
        BoardOptions {
            poll_interval: Duration::from_millis(50),
            ..BoardOptions::default()
        },
    );
    board.set_global_prompt("neon cyberpunk city");
    board.update_settings(|settings| settings.style = "cinematic".to_string());

    let section = board.section("symbol-icon-1").expect("section exists").clone();
    let mut rx = section.subscribe();
    let watcher = tokio::spawn(async move {
        let mut saw_polling = false;
        while rx.changed().await.is_ok() {
            let view = rx.borrow_and_update().clone();
            if view.phase == SessionPhase::Polling && view.progress.map(|p| p.percent) == Some(42) {
                saw_polling = true;
            }
            if saw_polling && view.phase == SessionPhase::Idle {
                break;
            }
        }
        saw_polling
    });

    let count = section.generate(Some(2)).await.expect("generate succeeds");
    assert_eq!(count, 2);
    assert!(watcher.await.expect("watcher task"));

    // Let a request that was already on the wire land before counting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let polls = state.progress_queries.lock().expect("progress queries lock").len();
    assert!(polls >= 1);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        state.progress_queries.lock().expect("progress queries lock").len(),
        polls
    );

    let bodies = state.txt2img_bodies.lock().expect("txt2img bodies lock").clone();
    let prompt = bodies[0]["prompt"].as_str().unwrap_or_default().to_string();
    assert!(prompt.starts_with("neon cyberpunk city, cinematic, simple clear symbol icon"));
    assert!(prompt.split_whitespace().count() >= 25);
    assert_eq!(bodies[0]["width"], json!(256));

    let _ = shutdown.send(());
    handle.await.expect("mock server task");
}
