use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_FAQ_MATCH_THRESHOLD: f64 = 70.0;
pub const DEFAULT_RETRIEVER_TOP_K: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Gemini,
    Hashing,
}

impl EmbeddingBackend {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "hashing" => Ok(Self::Hashing),
            other => bail!("EMBEDDING_BACKEND must be 'gemini' or 'hashing', got '{other}'"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub refresh_cookie_secure: bool,
    pub refresh_cookie_domain: Option<String>,
    pub cors_allowed_origin: Option<String>,
    pub assistant: AssistantConfig,
}

/// Settings for the support assistant and the hosted model provider behind it.
#[derive(Clone, Debug)]
pub struct AssistantConfig {
    pub google_api_key: String,
    pub gemini_api_base: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub request_timeout_secs: u64,
    pub embedding_backend: EmbeddingBackend,
    pub faq_path: PathBuf,
    pub faq_match_threshold: f64,
    pub knowledge_base_path: Option<PathBuf>,
    pub retriever_top_k: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "ecombot".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "ecombot-clients".to_string());
        let jwt_expiry_minutes = env::var("JWT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let refresh_token_expiry_days = env::var("REFRESH_TOKEN_EXPIRY_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("REFRESH_TOKEN_EXPIRY_DAYS must be an integer")?;
        let refresh_cookie_secure = env::var("REFRESH_COOKIE_SECURE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let refresh_cookie_domain = env::var("REFRESH_COOKIE_DOMAIN").ok();
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            refresh_token_expiry_days,
            refresh_cookie_secure,
            refresh_cookie_domain,
            cors_allowed_origin,
            assistant: AssistantConfig::from_env()?,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

impl AssistantConfig {
    /// Reads only the assistant settings. `GOOGLE_API_KEY` is required whichever
    /// embedding backend is selected.
    pub fn from_env() -> Result<Self> {
        let google_api_key = env::var("GOOGLE_API_KEY")
            .context("GOOGLE_API_KEY must be set (add it to your .env file)")?;
        if google_api_key.trim().is_empty() {
            bail!("GOOGLE_API_KEY must not be empty");
        }
        let gemini_api_base = env::var("GEMINI_API_BASE")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());
        let chat_model =
            env::var("GEMINI_CHAT_MODEL").unwrap_or_else(|_| "gemini-1.0-pro".to_string());
        let embedding_model = env::var("GEMINI_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "models/embedding-001".to_string());
        let request_timeout_secs = env::var("LLM_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("LLM_REQUEST_TIMEOUT_SECS must be an integer")?;
        let embedding_backend = match env::var("EMBEDDING_BACKEND") {
            Ok(raw) => EmbeddingBackend::parse(&raw)?,
            Err(_) => EmbeddingBackend::Gemini,
        };
        let faq_path = env::var("FAQ_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/faq.json"));
        let faq_match_threshold = match env::var("FAQ_MATCH_THRESHOLD") {
            Ok(raw) => parse_threshold(&raw)?,
            Err(_) => DEFAULT_FAQ_MATCH_THRESHOLD,
        };
        let knowledge_base_path = env::var("KNOWLEDGE_BASE_PATH").ok().map(PathBuf::from);
        let retriever_top_k = env::var("RETRIEVER_TOP_K")
            .unwrap_or_else(|_| DEFAULT_RETRIEVER_TOP_K.to_string())
            .parse::<usize>()
            .context("RETRIEVER_TOP_K must be a positive integer")?
            .max(1);

        Ok(Self {
            google_api_key,
            gemini_api_base,
            chat_model,
            embedding_model,
            request_timeout_secs,
            embedding_backend,
            faq_path,
            faq_match_threshold,
            knowledge_base_path,
            retriever_top_k,
        })
    }
}

fn parse_threshold(raw: &str) -> Result<f64> {
    let value: f64 = raw
        .trim()
        .parse()
        .context("FAQ_MATCH_THRESHOLD must be a number")?;
    if !(0.0..=100.0).contains(&value) {
        bail!("FAQ_MATCH_THRESHOLD must be between 0 and 100");
    }
    Ok(value)
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
