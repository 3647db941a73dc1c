use crate::config::GatewayConfig;
use crate::provider::{AiBackend, GeneratedImage, ImageGenOptions, ModerationInput, ProviderError, ProviderResult, TextOptions};
use crate::types::{Capability, Verdict};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A successful gateway call together with the backend that served it.
#[derive(Debug, Clone)]
pub struct Served<T> {
    pub value: T,
    pub backend: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{capability} rejected by {backend}: {source}")]
    Rejected {
        capability: Capability,
        backend: String,
        #[source]
        source: ProviderError,
    },

    #[error("{capability} failed after {attempts} attempts across all backends (last: {last_backend}): {last_error}")]
    Exhausted {
        capability: Capability,
        last_backend: String,
        attempts: usize,
        last_error: ProviderError,
    },

    #[error("no AI backends are configured")]
    NoBackends { capability: Capability },
}

impl GatewayError {
    pub fn capability(&self) -> Capability {
        match self {
            GatewayError::Rejected { capability, .. }
            | GatewayError::Exhausted { capability, .. }
            | GatewayError::NoBackends { capability } => *capability,
        }
    }

    /// The backend whose failure ended the call.
    pub fn backend(&self) -> Option<&str> {
        match self {
            GatewayError::Rejected { backend, .. } => Some(backend),
            GatewayError::Exhausted { last_backend, .. } => Some(last_backend),
            GatewayError::NoBackends { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallHealth {
    Operational,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub name: String,
    pub up: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayHealth {
    pub overall: OverallHealth,
    pub backends: Vec<BackendHealth>,
}

/// Uniform entry point to the AI backends. Backends are tried in order;
/// retryable failures move on to the next one, anything else stops the call.
pub struct ProviderGateway {
    backends: Vec<Arc<dyn AiBackend>>,
    config: GatewayConfig,
}

impl ProviderGateway {
    pub fn new(backends: Vec<Arc<dyn AiBackend>>, config: GatewayConfig) -> Self {
        Self { backends, config }
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub async fn generate_text(&self, prompt: &str, options: &TextOptions) -> Result<Served<String>, GatewayError> {
        self.call(Capability::GenerateText, move |backend| async move {
            backend.generate_text(prompt, options).await
        })
        .await
    }

    pub async fn generate_image(
        &self,
        prompt: &str,
        options: &ImageGenOptions,
    ) -> Result<Served<GeneratedImage>, GatewayError> {
        self.call(Capability::GenerateImage, move |backend| async move {
            backend.generate_image(prompt, options).await
        })
        .await
    }

    pub async fn moderate(&self, input: &ModerationInput) -> Result<Served<Verdict>, GatewayError> {
        self.call(Capability::Moderate, move |backend| async move { backend.moderate(input).await })
            .await
    }

    fn retry_policy(&self) -> ExponentialBackoff {
        let base = self.config.retry_base_delay;
        ExponentialBackoff {
            current_interval: base,
            initial_interval: base,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: base * 32,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    async fn call<T, F, Fut>(&self, capability: Capability, op: F) -> Result<Served<T>, GatewayError>
    where
        F: Fn(Arc<dyn AiBackend>) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let attempts_per_backend = self.config.attempts_per_backend.max(1);
        let mut attempts = 0;
        let mut last_failure: Option<(String, ProviderError)> = None;

        for backend in &self.backends {
            let name = backend.name().to_string();
            let mut policy = self.retry_policy();

            for attempt in 1..=attempts_per_backend {
                attempts += 1;

                let outcome = match tokio::time::timeout(self.config.call_timeout, op(Arc::clone(backend))).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(self.config.call_timeout)),
                };

                match outcome {
                    Ok(value) => {
                        if attempts > 1 {
                            info!("{} served by {} after {} attempts", capability, name, attempts);
                        } else {
                            debug!("{} served by {}", capability, name);
                        }
                        return Ok(Served { value, backend: name });
                    }
                    Err(error) if !error.is_retryable() => {
                        warn!("{} rejected by {}: {}", capability, name, error);
                        return Err(GatewayError::Rejected {
                            capability,
                            backend: name,
                            source: error,
                        });
                    }
                    Err(error) => {
                        warn!("{} failed on {} (attempt {}): {}", capability, name, attempt, error);
                        let retry_here = attempt < attempts_per_backend && !matches!(error, ProviderError::Unsupported(_));
                        last_failure = Some((name.clone(), error));

                        if retry_here {
                            if let Some(delay) = policy.next_backoff() {
                                tokio::time::sleep(delay).await;
                                continue;
                            }
                        }
                        break;
                    }
                }
            }
        }

        match last_failure {
            Some((last_backend, last_error)) => Err(GatewayError::Exhausted {
                capability,
                last_backend,
                attempts,
                last_error,
            }),
            None => Err(GatewayError::NoBackends { capability }),
        }
    }

    /// Probes every backend concurrently. Never fails; unreachable backends
    /// are reported as down.
    pub async fn health(&self) -> GatewayHealth {
        let probes = self.backends.iter().map(|backend| async move {
            let result = match tokio::time::timeout(self.config.call_timeout, backend.health_check()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.config.call_timeout)),
            };
            BackendHealth {
                name: backend.name().to_string(),
                up: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            }
        });
        let backends = join_all(probes).await;

        let up = backends.iter().filter(|b| b.up).count();
        let overall = if up == 0 {
            OverallHealth::Down
        } else if up == backends.len() {
            OverallHealth::Operational
        } else {
            OverallHealth::Degraded
        };

        GatewayHealth { overall, backends }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockBackend;
    use std::time::Duration;

    fn fast_config() -> GatewayConfig {
        GatewayConfig {
            call_timeout: Duration::from_millis(200),
            attempts_per_backend: 1,
            retry_base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_empty_gateway_reports_no_backends() {
        let gateway = ProviderGateway::new(Vec::new(), fast_config());
        let error = gateway.generate_text("hi", &TextOptions::default()).await.unwrap_err();
        assert!(matches!(error, GatewayError::NoBackends { capability: Capability::GenerateText }));
        assert_eq!(gateway.health().await.overall, OverallHealth::Down);
    }

    #[tokio::test]
    async fn test_retries_same_backend_before_falling_through() {
        let primary = Arc::new(
            MockBackend::new("primary").failing_next(Capability::GenerateText, vec![ProviderError::Transient("503".into())]),
        );
        let config = GatewayConfig {
            attempts_per_backend: 2,
            ..fast_config()
        };
        let gateway = ProviderGateway::new(vec![primary.clone() as Arc<dyn AiBackend>], config);

        let served = gateway.generate_text("hi", &TextOptions::default()).await.unwrap();
        assert_eq!(served.backend, "primary");
        assert_eq!(primary.calls(Capability::GenerateText), 2);
    }
}
