use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, Method},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use atelier_gateway::{GatewayError, GenerateRequest, ImageGenerator};
use atelier_shared::images::{
    artifact_filename, extension_for_mime, is_image_filename, mime_type_for, to_data_url,
};
use atelier_shared::{AddedImage, LimitInfo, MirrorImage, SyncStats};

use crate::artifacts::ArtifactStore;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::fallback_quota::{client_ip, FallbackQuota};
use crate::mirror::MirrorStore;
use crate::sync;

#[derive(Clone)]
pub struct AppState {
    pub mirror: Arc<MirrorStore>,
    pub artifacts: Arc<ArtifactStore>,
    pub quota: FallbackQuota,
    pub generator: Arc<dyn ImageGenerator>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/generate", post(generate))
        .route("/api/gallery", get(gallery_list))
        .route("/api/gallery", delete(gallery_clear))
        .route("/api/gallery/seed", get(gallery_seed))
        .route("/api/sync", post(sync_run))
        .route("/api/sync", get(sync_status))
        .route("/images/:filename", get(serve_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    uploaded_image: Option<String>,
    #[serde(default)]
    is_editing: bool,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    image: String,
    filename: String,
    id: String,
    timestamp: String,
    prompt: String,
    is_edited: bool,
    limit_info: LimitInfo,
}

#[derive(Serialize)]
struct GalleryResponse {
    images: Vec<MirrorImage>,
}

#[derive(Serialize)]
struct ClearResponse {
    message: &'static str,
}

#[derive(Serialize)]
struct SeedResponse {
    message: &'static str,
    images: Vec<MirrorImage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncRunResponse {
    success: bool,
    message: String,
    added_images: Vec<AddedImage>,
    stats: SyncRunStats,
}

#[derive(Serialize)]
struct SyncRunStats {
    before: SyncStats,
    after: SyncStats,
}

#[derive(Serialize)]
struct SyncStatusResponse {
    success: bool,
    stats: SyncStats,
    message: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Quota bucket for a request: the caller-declared user id when present,
/// otherwise the client IP, otherwise a shared bucket.
fn quota_key(
    user_id: Option<&str>,
    peer: Option<std::net::IpAddr>,
    headers: &HeaderMap,
) -> String {
    if let Some(user_id) = user_id {
        let trimmed = user_id.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    match client_ip(peer, headers) {
        Some(ip) => ip.to_string(),
        None => "unknown".to_string(),
    }
}

async fn generate(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<GenerateBody>,
) -> Result<Json<GenerateResponse>, ServerError> {
    let prompt = body.prompt.trim();
    if prompt.is_empty() {
        return Err(ServerError::MissingPrompt);
    }

    let key = quota_key(
        body.user_id.as_deref(),
        connect.map(|ConnectInfo(addr)| addr.ip()),
        &headers,
    );
    if state.quota.exhausted(&key).await {
        let info = state.quota.limit_info(&key).await;
        warn!(key = %key, "Generation limit reached");
        return Err(ServerError::QuotaExhausted { info });
    }

    let request = GenerateRequest {
        prompt: prompt.to_string(),
        source_image: body.uploaded_image.clone(),
        editing: body.is_editing,
    };
    let image = state
        .generator
        .generate(&request)
        .await
        .map_err(|e| match e {
            GatewayError::EmptyPrompt => ServerError::MissingPrompt,
            other => ServerError::Generation(other),
        })?;

    let now = Utc::now();
    let millis = now.timestamp_millis();
    let filename = artifact_filename(millis, extension_for_mime(&image.mime_type));
    let id = millis.to_string();
    let timestamp = now.to_rfc3339();
    let url = format!("/images/{}", filename);

    // Persistence is best-effort: the client gets its image from the data
    // URL either way, and the mirror sync pass repairs gaps later.
    if let Err(e) = state.artifacts.save(&filename, &image.bytes).await {
        warn!(filename = %filename, error = %e, "Failed to persist image file");
    } else if let Err(e) = state
        .mirror
        .add(MirrorImage {
            id: id.clone(),
            url,
            filename: filename.clone(),
            prompt: prompt.to_string(),
            timestamp: timestamp.clone(),
            is_edited: body.is_editing,
        })
        .await
    {
        warn!(filename = %filename, error = %e, "Failed to record gallery entry");
    }

    // Count the generation only after the provider delivered.
    let count = state.quota.record(&key).await;
    info!(key = %key, count, filename = %filename, "Generated image");

    Ok(Json(GenerateResponse {
        image: to_data_url(&image.mime_type, &image.bytes),
        filename,
        id,
        timestamp,
        prompt: prompt.to_string(),
        is_edited: body.is_editing,
        limit_info: LimitInfo::permanent(count),
    }))
}

async fn gallery_list(State(state): State<AppState>) -> Json<GalleryResponse> {
    let images = state.mirror.load().await;
    Json(GalleryResponse { images })
}

async fn gallery_clear(State(state): State<AppState>) -> Result<Json<ClearResponse>, ServerError> {
    state.mirror.clear().await?;
    info!("Gallery ledger cleared");
    Ok(Json(ClearResponse {
        message: "Gallery cleared successfully",
    }))
}

/// Diagnostic endpoint: reports the gallery, seeding one placeholder
/// entry when it is empty so the frontend has something to render.
async fn gallery_seed(State(state): State<AppState>) -> Result<Json<SeedResponse>, ServerError> {
    let existing = state.mirror.load().await;
    if !existing.is_empty() {
        return Ok(Json(SeedResponse {
            message: "Gallery loaded successfully",
            images: existing,
        }));
    }

    let seed = MirrorImage {
        id: format!("test-{}", Utc::now().timestamp_millis()),
        url: "/images/test-image.png".to_string(),
        filename: "test-image.png".to_string(),
        prompt: "Test image for gallery".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        is_edited: false,
    };
    state.mirror.add(seed.clone()).await?;

    Ok(Json(SeedResponse {
        message: "Test image added to gallery",
        images: vec![seed],
    }))
}

async fn sync_run(State(state): State<AppState>) -> Result<Json<SyncRunResponse>, ServerError> {
    info!("Starting gallery sync via API");

    let before = sync::stats(&state.mirror, &state.artifacts)
        .await
        .map_err(|e| sync_failed("Failed to sync gallery", e))?;
    let added = sync::sync_missing(&state.mirror, &state.artifacts)
        .await
        .map_err(|e| sync_failed("Failed to sync gallery", e))?;
    let after = sync::stats(&state.mirror, &state.artifacts)
        .await
        .map_err(|e| sync_failed("Failed to sync gallery", e))?;

    Ok(Json(SyncRunResponse {
        success: true,
        message: format!("Sync completed. Added {} missing images.", added.len()),
        added_images: added,
        stats: SyncRunStats { before, after },
    }))
}

async fn sync_status(
    State(state): State<AppState>,
) -> Result<Json<SyncStatusResponse>, ServerError> {
    let stats = sync::stats(&state.mirror, &state.artifacts)
        .await
        .map_err(|e| sync_failed("Failed to get gallery stats", e))?;

    Ok(Json(SyncStatusResponse {
        success: true,
        message: format!(
            "Gallery has {} entries, {} image files, {} missing entries.",
            stats.gallery_entries, stats.image_files, stats.missing
        ),
        stats,
    }))
}

fn sync_failed(message: &str, source: ServerError) -> ServerError {
    ServerError::SyncFailed {
        message: message.to_string(),
        detail: source.to_string(),
    }
}

async fn serve_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    if !is_image_filename(&filename) {
        return Err(ServerError::BadRequest(
            "Unsupported file type".to_string(),
        ));
    }

    let bytes = state.artifacts.read(&filename).await?;
    let content_type = mime_type_for(&filename);
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use atelier_gateway::GeneratedImage;
    use tempfile::TempDir;

    struct StubGenerator {
        calls: AtomicUsize,
        fail: bool,
    }

    impl StubGenerator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl ImageGenerator for StubGenerator {
        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> Result<GeneratedImage, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.prompt.trim().is_empty() {
                return Err(GatewayError::EmptyPrompt);
            }
            if self.fail {
                return Err(GatewayError::NoImage);
            }
            Ok(GeneratedImage {
                bytes: b"stub-image-bytes".to_vec(),
                mime_type: "image/png".to_string(),
            })
        }
    }

    struct TestServer {
        addr: SocketAddr,
        generator: Arc<StubGenerator>,
        mirror: Arc<MirrorStore>,
        artifacts: Arc<ArtifactStore>,
        _dir: TempDir,
    }

    // Start a real server on an ephemeral port and drive it over HTTP.
    async fn spawn_server(generator: StubGenerator) -> TestServer {
        let dir = TempDir::new().unwrap();
        let mirror = Arc::new(
            MirrorStore::new(dir.path().join("gallery.json"))
                .await
                .unwrap(),
        );
        let artifacts = Arc::new(ArtifactStore::new(dir.path().join("images")).await.unwrap());
        let generator = Arc::new(generator);

        let state = AppState {
            mirror: mirror.clone(),
            artifacts: artifacts.clone(),
            quota: FallbackQuota::default(),
            generator: generator.clone(),
            config: Arc::new(ServerConfig::default()),
        };
        let app = build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        TestServer {
            addr,
            generator,
            mirror,
            artifacts,
            _dir: dir,
        }
    }

    fn url(addr: SocketAddr, path: &str) -> String {
        format!("http://{}{}", addr, path)
    }

    async fn post_generate(
        client: &reqwest::Client,
        addr: SocketAddr,
        body: serde_json::Value,
    ) -> reqwest::Response {
        client
            .post(url(addr, "/api/generate"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let server = spawn_server(StubGenerator::new()).await;
        let body: serde_json::Value = reqwest::get(url(server.addr, "/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_generate_returns_image_and_persists() {
        let server = spawn_server(StubGenerator::new()).await;
        let client = reqwest::Client::new();

        let resp = post_generate(
            &client,
            server.addr,
            serde_json::json!({ "prompt": "a lighthouse at dawn", "userId": "user_ab12cd34_1" }),
        )
        .await;
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["image"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert_eq!(body["prompt"], "a lighthouse at dawn");
        assert_eq!(body["isEdited"], false);
        assert_eq!(body["limitInfo"]["current"], 1);
        assert_eq!(body["limitInfo"]["remaining"], 2);
        assert_eq!(body["limitInfo"]["canGenerate"], true);
        assert!(body["limitInfo"]["resetDate"].is_null());

        let filename = body["filename"].as_str().unwrap().to_string();
        assert!(filename.starts_with("ai-generated-"));
        assert!(filename.ends_with(".png"));

        let saved = server.artifacts.read(&filename).await.unwrap();
        assert_eq!(saved, b"stub-image-bytes");

        let ledger = server.mirror.load().await;
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].filename, filename);
        assert_eq!(ledger[0].url, format!("/images/{}", filename));
        assert_eq!(ledger[0].prompt, "a lighthouse at dawn");
    }

    #[tokio::test]
    async fn test_generate_requires_prompt() {
        let server = spawn_server(StubGenerator::new()).await;
        let client = reqwest::Client::new();

        let resp = post_generate(&client, server.addr, serde_json::json!({ "prompt": "   " })).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Prompt is required");
        assert_eq!(server.generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generate_quota_exhausts_per_user() {
        let server = spawn_server(StubGenerator::new()).await;
        let client = reqwest::Client::new();

        for _ in 0..3 {
            let resp = post_generate(
                &client,
                server.addr,
                serde_json::json!({ "prompt": "a fox", "userId": "user_ab12cd34_1" }),
            )
            .await;
            assert_eq!(resp.status(), 200);
        }

        let resp = post_generate(
            &client,
            server.addr,
            serde_json::json!({ "prompt": "a fox", "userId": "user_ab12cd34_1" }),
        )
        .await;
        assert_eq!(resp.status(), 403);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "You've reached your free generation limit.");
        assert_eq!(body["limitInfo"]["remaining"], 0);
        assert_eq!(body["limitInfo"]["canGenerate"], false);
        // The provider never saw the fourth request.
        assert_eq!(server.generator.calls.load(Ordering::SeqCst), 3);

        // A different user is unaffected.
        let resp = post_generate(
            &client,
            server.addr,
            serde_json::json!({ "prompt": "a fox", "userId": "user_ef56ab78_2" }),
        )
        .await;
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_quota_keyed_by_forwarded_ip_without_user() {
        let server = spawn_server(StubGenerator::new()).await;
        let client = reqwest::Client::new();

        for _ in 0..3 {
            let resp = client
                .post(url(server.addr, "/api/generate"))
                .header("x-forwarded-for", "203.0.113.9")
                .json(&serde_json::json!({ "prompt": "a fox" }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
        }

        let resp = client
            .post(url(server.addr, "/api/generate"))
            .header("x-forwarded-for", "203.0.113.9")
            .json(&serde_json::json!({ "prompt": "a fox" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 403);

        // No header: the loopback peer address is a different bucket.
        let resp = post_generate(&client, server.addr, serde_json::json!({ "prompt": "a fox" })).await;
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_generate_provider_failure() {
        let server = spawn_server(StubGenerator::failing()).await;
        let client = reqwest::Client::new();

        let resp = post_generate(
            &client,
            server.addr,
            serde_json::json!({ "prompt": "a fox", "userId": "user_ab12cd34_1" }),
        )
        .await;
        assert_eq!(resp.status(), 500);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Failed to generate image.");

        // Nothing persisted, nothing counted.
        assert!(server.mirror.load().await.is_empty());
        assert!(server.artifacts.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gallery_list_and_clear() {
        let server = spawn_server(StubGenerator::new()).await;
        let client = reqwest::Client::new();

        post_generate(
            &client,
            server.addr,
            serde_json::json!({ "prompt": "a fox", "userId": "user_ab12cd34_1" }),
        )
        .await;

        let body: serde_json::Value = client
            .get(url(server.addr, "/api/gallery"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["images"].as_array().unwrap().len(), 1);

        let resp = client
            .delete(url(server.addr, "/api/gallery"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "Gallery cleared successfully");

        // Ledger emptied, files stay on disk for the next sync pass.
        assert!(server.mirror.load().await.is_empty());
        assert_eq!(server.artifacts.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gallery_seed() {
        let server = spawn_server(StubGenerator::new()).await;
        let client = reqwest::Client::new();

        let body: serde_json::Value = client
            .get(url(server.addr, "/api/gallery/seed"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["message"], "Test image added to gallery");
        assert_eq!(body["images"][0]["filename"], "test-image.png");
        assert_eq!(body["images"][0]["prompt"], "Test image for gallery");

        let body: serde_json::Value = client
            .get(url(server.addr, "/api/gallery/seed"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["message"], "Gallery loaded successfully");
        assert_eq!(body["images"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_endpoints() {
        let server = spawn_server(StubGenerator::new()).await;
        server
            .artifacts
            .save("ai-generated-1700000000000.png", b"orphan")
            .await
            .unwrap();
        let client = reqwest::Client::new();

        let body: serde_json::Value = client
            .get(url(server.addr, "/api/sync"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["stats"]["missing"], 1);
        assert_eq!(
            body["message"],
            "Gallery has 0 entries, 1 image files, 1 missing entries."
        );

        let body: serde_json::Value = client
            .post(url(server.addr, "/api/sync"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Sync completed. Added 1 missing images.");
        assert_eq!(body["addedImages"].as_array().unwrap().len(), 1);
        assert_eq!(body["stats"]["before"]["missing"], 1);
        assert_eq!(body["stats"]["after"]["missing"], 0);
    }

    #[tokio::test]
    async fn test_serve_image() {
        let server = spawn_server(StubGenerator::new()).await;
        server.artifacts.save("pic.png", b"png-bytes").await.unwrap();
        let client = reqwest::Client::new();

        let resp = client
            .get(url(server.addr, "/images/pic.png"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "image/png");
        assert_eq!(resp.bytes().await.unwrap().as_ref(), b"png-bytes");

        let resp = client
            .get(url(server.addr, "/images/missing.png"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        // Non-image extensions are refused (the ledger lives next door).
        let resp = client
            .get(url(server.addr, "/images/gallery.json"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        // Encoded traversal decodes to a path with separators.
        let resp = client
            .get(url(server.addr, "/images/..%2Fescape.png"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    // ------------------------------------------------------------------
    // End-to-end through the client crate
    // ------------------------------------------------------------------

    use atelier_client::Studio;
    use atelier_store::{KvStore, MemoryKvStore};

    fn studio_for(server: &TestServer) -> Studio {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::default());
        Studio::new(kv, &format!("http://{}", server.addr))
    }

    #[tokio::test]
    async fn test_client_generate_end_to_end() {
        let server = spawn_server(StubGenerator::new()).await;
        let studio = studio_for(&server);

        let image = studio.generate_image("a lighthouse at dawn", None).await.unwrap();
        assert!(image.url.starts_with("data:image/png;base64,"));
        assert!(!image.is_edited);

        // Local ledger and gallery both advanced.
        let info = studio.limit_info();
        assert_eq!(info.current, 1);
        assert_eq!(info.remaining, 2);
        assert_eq!(studio.gallery_images().len(), 1);

        // The server mirrored the artifact.
        assert_eq!(server.mirror.load().await.len(), 1);
        assert_eq!(server.artifacts.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_client_quota_gate_blocks_before_network() {
        let server = spawn_server(StubGenerator::new()).await;
        let studio = studio_for(&server);

        for _ in 0..3 {
            studio.generate_image("a fox", None).await.unwrap();
        }
        assert_eq!(server.generator.calls.load(Ordering::SeqCst), 3);

        let err = studio.generate_image("a fox", None).await.unwrap_err();
        assert!(matches!(
            err,
            atelier_client::ClientError::QuotaExhausted(_)
        ));
        // The fourth request never left the client.
        assert_eq!(server.generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_sync_and_gallery_roundtrip() {
        let server = spawn_server(StubGenerator::new()).await;
        let studio = studio_for(&server);

        server
            .artifacts
            .save("ai-generated-1700000000000.png", b"orphan")
            .await
            .unwrap();

        let added = studio.run_server_sync().await.unwrap();
        assert_eq!(added.len(), 1);

        let images = studio.server_gallery().await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].filename, "ai-generated-1700000000000.png");

        studio.clear_server_gallery().await.unwrap();
        assert!(studio.server_gallery().await.unwrap().is_empty());
    }
}
