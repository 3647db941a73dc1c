use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_bytes: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Post-Pipeline/1.0 (+https://www.linkedin.com)".to_string(),
            timeout_seconds: 15,
            max_bytes: 5 * 1024 * 1024,
            max_redirects: 5,
        }
    }
}

/// Per-call policy applied by the provider gateway to every backend.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub call_timeout: Duration,
    /// Attempts against one backend before falling through to the next.
    pub attempts_per_backend: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            attempts_per_backend: 1,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishRetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for PublishRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub variant_count: usize,
    pub max_concurrent_jobs: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variant_count: 2,
            max_concurrent_jobs: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenAi,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub text_model: String,
    pub image_model: String,
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub text_model: String,
    pub image_model: String,
}

#[derive(Debug, Clone)]
pub struct LinkedInSettings {
    pub access_token: String,
    pub author_urn: String,
}

/// Everything the binary needs, read once at startup and passed down by value.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub tmp_dir: PathBuf,
    pub primary_provider: ProviderKind,
    pub enable_fallback: bool,
    pub enable_stub_provider: bool,
    pub gemini: Option<GeminiSettings>,
    pub openai: Option<OpenAiSettings>,
    pub linkedin: Option<LinkedInSettings>,
    pub fetch: FetchConfig,
    pub gateway: GatewayConfig,
    pub publish_retry: PublishRetryConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Reads configuration from the process environment, loading `.env` first
    /// when one is present.
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }

        let primary_provider = env::var("PRIMARY_PROVIDER")
            .ok()
            .and_then(|value| match value.parse() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    warn!("Ignoring PRIMARY_PROVIDER: {}", e);
                    None
                }
            })
            .unwrap_or(ProviderKind::Gemini);

        let gemini = non_empty("GOOGLE_API_KEY").map(|api_key| GeminiSettings {
            api_key,
            text_model: env_or("GEMINI_MODEL", "gemini-2.5-flash"),
            image_model: env_or("GEMINI_IMAGE_MODEL", "gemini-2.0-flash-preview-image-generation"),
        });

        let openai = non_empty("OPENAI_API_KEY").map(|api_key| OpenAiSettings {
            api_key,
            text_model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            image_model: env_or("OPENAI_IMAGE_MODEL", "gpt-image-1"),
        });

        let linkedin = match (non_empty("LINKEDIN_ACCESS_TOKEN"), non_empty("LINKEDIN_AUTHOR_URN")) {
            (Some(access_token), Some(author_urn)) => Some(LinkedInSettings {
                access_token,
                author_urn,
            }),
            (Some(_), None) => {
                warn!("LINKEDIN_ACCESS_TOKEN is set without LINKEDIN_AUTHOR_URN; publishing is simulated");
                None
            }
            _ => None,
        };

        let gateway = GatewayConfig {
            call_timeout: Duration::from_secs(parse_or("PROVIDER_TIMEOUT_SECONDS", 60)),
            ..GatewayConfig::default()
        };

        let publish_retry = PublishRetryConfig {
            max_attempts: parse_or("PUBLISH_MAX_ATTEMPTS", 3u32).max(1),
            ..PublishRetryConfig::default()
        };

        let pipeline = PipelineConfig {
            max_concurrent_jobs: parse_or("MAX_CONCURRENT_JOBS", 4usize).max(1),
            ..PipelineConfig::default()
        };

        Self {
            database_url: env_or("DATABASE_URL", "sqlite://post_pipeline.db"),
            tmp_dir: PathBuf::from(env_or("TMP_DIR", "tmp")),
            primary_provider,
            enable_fallback: parse_bool_or("ENABLE_FALLBACK", true),
            enable_stub_provider: parse_bool_or("ENABLE_STUB_PROVIDER", false),
            gemini,
            openai,
            linkedin,
            fetch: FetchConfig::default(),
            gateway,
            publish_retry,
            pipeline,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    non_empty(key).unwrap_or_else(|| default.to_string())
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match non_empty(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid value {:?} for {}, using {}", raw, key, default);
            default
        }),
        None => default,
    }
}

fn parse_bool_or(key: &str, default: bool) -> bool {
    match non_empty(key).map(|value| value.to_lowercase()) {
        Some(value) => matches!(value.as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}
