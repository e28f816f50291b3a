use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Which remote provider to prefer for embeddings and generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "gemini" => Some(ProviderKind::Gemini),
            _ => None,
        }
    }

    pub fn other(&self) -> Self {
        match self {
            ProviderKind::OpenAi => ProviderKind::Gemini,
            ProviderKind::Gemini => ProviderKind::OpenAi,
        }
    }
}

/// Filesystem layout under the data directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    pub objects_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let log_dir = data_dir.join("logs");
        let db_path = data_dir.join("ragdock.db");
        let objects_dir = data_dir.join("objects");

        for dir in [&data_dir, &log_dir, &objects_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            data_dir,
            log_dir,
            db_path,
            objects_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound call deadlines, per dependency class.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub object_store: Duration,
    pub crawler: Duration,
    pub embedding: Duration,
    pub llm: Duration,
    pub database: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            object_store: Duration::from_secs(30),
            crawler: Duration::from_secs(20),
            embedding: Duration::from_secs(60),
            llm: Duration::from_secs(60),
            database: Duration::from_secs(10),
        }
    }
}

/// Process-global settings, read from the environment once at startup.
/// Per-bot knobs (model name, temperature, max_tokens) live on the bot row,
/// not here.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub embedding_preferred: ProviderKind,
    pub embedding_dimension: usize,
    pub embedding_batch_size: usize,
    pub openai_api_key: Option<String>,
    pub openai_embedding_model: String,
    pub openai_chat_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_embedding_model: String,
    pub gemini_chat_model: String,
    pub default_top_k: usize,
    pub default_min_score: f32,
    pub rate_limit_per_minute: i64,
    pub ingest_concurrency: usize,
    pub model_context_window: usize,
    pub crawler_user_agent: String,
    pub crawler_min_content_chars: usize,
    pub crawler_render_threshold_chars: usize,
    pub auth_userinfo_url: Option<String>,
    /// Origins allowed on the dashboard API. The widget query endpoint is
    /// CORS-open regardless; its access control is the domain allow-list.
    pub cors_origins: Vec<String>,
    pub timeouts: Timeouts,
}

impl Settings {
    pub fn from_env() -> Self {
        Settings {
            port: parse_env("PORT", 8080),
            embedding_preferred: env::var("EMBEDDING_PREFERRED")
                .ok()
                .and_then(|v| ProviderKind::parse(&v))
                .unwrap_or(ProviderKind::OpenAi),
            embedding_dimension: parse_env("EMBEDDING_DIMENSION", 1536),
            embedding_batch_size: parse_env("EMBEDDING_BATCH_SIZE", 64),
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            openai_embedding_model: env::var("OPENAI_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            openai_chat_model: env::var("OPENAI_CHAT_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            gemini_api_key: non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            gemini_embedding_model: env::var("GEMINI_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-004".to_string()),
            gemini_chat_model: env::var("GEMINI_CHAT_MODEL")
                .unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
            default_top_k: parse_env("DEFAULT_TOP_K", 5),
            default_min_score: parse_env("DEFAULT_MIN_SCORE", 0.25),
            rate_limit_per_minute: parse_env("RATE_LIMIT_PER_MINUTE", 60),
            ingest_concurrency: parse_env("INGEST_CONCURRENCY", 4),
            model_context_window: parse_env("MODEL_CONTEXT_WINDOW", 16384),
            crawler_user_agent: env::var("CRAWLER_USER_AGENT")
                .unwrap_or_else(|_| format!("ragdockbot/{}", env!("CARGO_PKG_VERSION"))),
            crawler_min_content_chars: parse_env("CRAWLER_MIN_CONTENT_CHARS", 200),
            crawler_render_threshold_chars: parse_env("CRAWLER_RENDER_THRESHOLD_CHARS", 150),
            auth_userinfo_url: non_empty_env("AUTH_USERINFO_URL"),
            cors_origins: env::var("CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_else(|_| vec!["http://localhost:3000".to_string()]),
            timeouts: Timeouts::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_both_names() {
        assert_eq!(ProviderKind::parse("openai"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::parse(" Gemini "), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::parse("llama"), None);
    }

    #[test]
    fn provider_kind_other_flips() {
        assert_eq!(ProviderKind::OpenAi.other(), ProviderKind::Gemini);
        assert_eq!(ProviderKind::Gemini.other(), ProviderKind::OpenAi);
    }
}
