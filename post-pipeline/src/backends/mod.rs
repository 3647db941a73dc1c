pub mod gemini;
pub mod openai;
pub mod stub;

pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;
pub use stub::StubBackend;

use crate::config::{AppConfig, ProviderKind};
use crate::provider::AiBackend;
use std::sync::Arc;
use tracing::{info, warn};

/// Builds the ordered backend list: the configured primary first, then the
/// other vendor when fallback is enabled, then the stub when enabled.
pub fn backends_from_config(config: &AppConfig) -> Vec<Arc<dyn AiBackend>> {
    let gemini = config
        .gemini
        .as_ref()
        .map(|settings| Arc::new(GeminiBackend::new(settings)) as Arc<dyn AiBackend>);
    let openai = config
        .openai
        .as_ref()
        .map(|settings| Arc::new(OpenAiBackend::new(settings)) as Arc<dyn AiBackend>);

    let (primary, secondary) = match config.primary_provider {
        ProviderKind::Gemini => (gemini, openai),
        ProviderKind::OpenAi => (openai, gemini),
    };

    let mut backends = Vec::new();
    match primary {
        Some(backend) => backends.push(backend),
        None => warn!("Primary provider {:?} has no API key configured", config.primary_provider),
    }
    if config.enable_fallback || backends.is_empty() {
        backends.extend(secondary);
    }
    if config.enable_stub_provider {
        backends.push(Arc::new(StubBackend::new()));
    }

    let names: Vec<&str> = backends.iter().map(|b| b.name()).collect();
    info!("Provider order: {:?}", names);
    backends
}
