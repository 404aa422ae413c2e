#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use journal_api::auth::jwt::{Claims, JwtConfig};
use journal_api::config::{JobSettings, ServerConfig};
use journal_api::router::build_app_router;
use journal_api::state::AppState;
use journal_core::roles::{ROLE_ADMIN, ROLE_CREATOR};
use journal_core::types::DbId;
use journal_db::memory::{InMemoryArtifactStore, InMemoryCreditStore, InMemoryJobStore};
use journal_db::models::artifact::{NewProject, Project};
use journal_db::repositories::{ArtifactStore, CreditStore};
use journal_pipeline::engine::JobEngine;
use journal_pipeline::executor::FallbackExecutor;
use journal_pipeline::subscribers::SubscriberRegistry;
use tempfile::TempDir;
use tower::ServiceExt;

pub const OWNER: DbId = 7;
pub const OTHER_OWNER: DbId = 8;

/// Build a test `ServerConfig` with safe defaults and in-memory storage.
pub fn test_config(export_dir: &TempDir) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
        },
        database_url: None,
        jobs: JobSettings {
            export_dir: export_dir.path().to_path_buf(),
            ..Default::default()
        },
    }
}

/// The application plus handles on its stores.
pub struct TestApp {
    pub router: Router,
    pub config: ServerConfig,
    pub engine: Arc<JobEngine>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub credits: Arc<InMemoryCreditStore>,
    _export_dir: TempDir,
}

/// Build the full application router on in-memory stores with the
/// deterministic executor, through the same builder `main` uses.
pub fn build_test_app() -> TestApp {
    let export_dir = tempfile::tempdir().unwrap();
    let config = test_config(&export_dir);

    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let credits = Arc::new(InMemoryCreditStore::new());
    let engine = Arc::new(JobEngine::new(
        Arc::new(InMemoryJobStore::new()),
        artifacts.clone(),
        credits.clone(),
        Arc::new(FallbackExecutor::new()),
        Arc::new(SubscriberRegistry::new()),
        config.jobs.engine_config(),
    ));

    let state = AppState {
        pool: None,
        config: Arc::new(config.clone()),
        engine: Arc::clone(&engine),
    };
    let router = build_app_router(state, &config);

    TestApp {
        router,
        config,
        engine,
        artifacts,
        credits,
        _export_dir: export_dir,
    }
}

impl TestApp {
    /// Sign a 15-minute access token the way the account service does.
    pub fn token(&self, owner_id: DbId, role: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: owner_id,
            role: role.to_string(),
            exp: now + 15 * 60,
            iat: now,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(self.config.jwt.secret.as_bytes()),
        )
        .unwrap()
    }

    pub fn creator_token(&self, owner_id: DbId) -> String {
        self.token(owner_id, ROLE_CREATOR)
    }

    pub fn admin_token(&self, owner_id: DbId) -> String {
        self.token(owner_id, ROLE_ADMIN)
    }

    pub async fn grant(&self, owner_id: DbId, amount: i64) {
        self.credits.grant(owner_id, amount).await;
    }

    pub async fn seed_project(&self, owner_id: DbId) -> Project {
        self.artifacts
            .create_project(NewProject {
                owner_id,
                title: "Evening Review".into(),
                content: serde_json::json!({
                    "entries": [{"day": 1, "prompt": "What went well?"}]
                }),
                metadata: serde_json::json!({}),
                source_job_id: None,
            })
            .await
            .unwrap()
    }

    /// Poll `GET /jobs/{id}` until the job leaves `pending` and `running`.
    pub async fn wait_finished(&self, job_id: &str, token: &str) -> serde_json::Value {
        let uri = format!("/api/v1/jobs/{job_id}");
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let response = get_auth(self.router.clone(), &uri, token).await;
                assert_eq!(response.status(), StatusCode::OK);
                let json = body_json(response).await;
                let status = json["data"]["status"].as_str().unwrap().to_string();
                if status != "pending" && status != "running" {
                    return json["data"].clone();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not finish in time")
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    let request = Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_json_auth(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
