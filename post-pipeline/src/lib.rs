pub mod types;
pub mod config;
pub mod utils;
pub mod extractor;
pub mod provider;
pub mod backends;
pub mod gateway;
pub mod prompts;
pub mod moderation;
pub mod store;
pub mod images;
pub mod publisher;
pub mod pipeline;

pub use types::*;
pub use config::AppConfig;
pub use extractor::{Extractor, FetchError, HttpExtractor};
pub use provider::{AiBackend, MockBackend, ProviderError};
pub use gateway::{GatewayError, GatewayHealth, OverallHealth, ProviderGateway};
pub use store::{JobStore, MemoryJobStore, SqliteJobStore};
pub use images::{FsImageStore, ImageStore, MemoryImageStore};
pub use publisher::{LinkedInPublisher, PublishError, Publisher, SimulatedPublisher};
pub use pipeline::{Orchestrator, OrchestratorBuilder};
