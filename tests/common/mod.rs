use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use ecombot::assistant::embedding::HashingEmbedding;
use ecombot::assistant::faq::FaqMatcher;
use ecombot::assistant::knowledge::default_documents;
use ecombot::assistant::provider::{ChatModel, ProviderError};
use ecombot::assistant::rag::RagChain;
use ecombot::assistant::vector_store::{Retriever, VectorStore};
use ecombot::assistant::SupportAssistant;
use ecombot::auth::jwt::JwtService;
use ecombot::config::{AppConfig, AssistantConfig, EmbeddingBackend};
use ecombot::db::{self, PgPool};
use ecombot::models::NewUser;
use ecombot::routes;
use ecombot::state::AppState;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock, RwLockWriteGuard};
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const MODEL_ANSWER: &str = "Answer from the knowledge base.";

/// Stands in for the hosted model and records every prompt it receives.
/// Answers can be held back with [`RecordingModel::hold`].
#[derive(Default)]
pub struct RecordingModel {
    prompts: std::sync::Mutex<Vec<String>>,
    gate: RwLock<()>,
    called: Notify,
}

#[async_trait]
impl ChatModel for RecordingModel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn invoke(&self, prompt: &str) -> Result<String, ProviderError> {
        self.called.notify_one();
        let _open = self.gate.read().await;
        self.prompts
            .lock()
            .map_err(|err| ProviderError::Other(err.to_string()))?
            .push(prompt.to_string());
        Ok(MODEL_ANSWER.to_string())
    }
}

impl RecordingModel {
    #[allow(dead_code)]
    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }

    /// No answer is returned while the guard is alive.
    #[allow(dead_code)]
    pub async fn hold(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    /// Resolves once the model has been invoked.
    #[allow(dead_code)]
    pub async fn wait_for_call(&self) {
        self.called.notified().await
    }
}

#[derive(Clone)]
pub struct TestApp {
    pub state: AppState,
    router: Router,
    model: Arc<RecordingModel>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let faq_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/faq.json");
        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            assistant: AssistantConfig {
                google_api_key: "test-key".to_string(),
                gemini_api_base: "http://127.0.0.1:9".to_string(),
                chat_model: "gemini-1.0-pro".to_string(),
                embedding_model: "models/embedding-001".to_string(),
                request_timeout_secs: 1,
                embedding_backend: EmbeddingBackend::Hashing,
                faq_path: faq_path.clone(),
                faq_match_threshold: 70.0,
                knowledge_base_path: None,
                retriever_top_k: 2,
            },
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let model = Arc::new(RecordingModel::default());
        let embeddings = Arc::new(HashingEmbedding::default());
        let store = VectorStore::from_documents(default_documents(), embeddings.as_ref()).await?;
        let retriever = Retriever::new(
            Arc::new(store),
            embeddings,
            config.assistant.retriever_top_k,
        );
        let assistant = SupportAssistant::new(
            Some(FaqMatcher::from_path(&faq_path)?),
            config.assistant.faq_match_threshold,
            RagChain::new(retriever, model.clone()),
        );

        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, jwt, Arc::new(assistant));
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            model,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn model(&self) -> Arc<RecordingModel> {
        self.model.clone()
    }

    pub async fn insert_user(&self, username: &str, password: &str, is_staff: bool) -> Result<Uuid> {
        let username = username.to_string();
        let password = password.to_string();
        self.with_conn(move |conn| {
            let password_hash = ecombot::auth::password::hash_password(&password)?;
            let user = NewUser {
                id: Uuid::new_v4(),
                email: format!("{username}@example.com"),
                username,
                password_hash,
                full_name: String::new(),
                phone_number: None,
                is_business: false,
                is_staff,
            };
            diesel::insert_into(ecombot::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload { username, password },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    /// Inserts a user and logs them in, returning the id and access token.
    #[allow(dead_code)]
    pub async fn user_with_token(&self, username: &str, is_staff: bool) -> Result<(Uuid, String)> {
        let password = "correct-horse";
        let id = self.insert_user(username, password, is_staff).await?;
        let token = self.login_token(username, password).await?;
        Ok((id, token))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn request(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn json_body<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).context("response body is not the expected JSON")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(db::MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE chat_messages, chat_sessions, businesses, refresh_tokens, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
