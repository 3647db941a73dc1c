#![allow(dead_code)]

use async_trait::async_trait;
use post_pipeline::config::{GatewayConfig, PipelineConfig, PublishRetryConfig};
use post_pipeline::publisher::{PostDraft, PublishResult};
use post_pipeline::{
    AiBackend, ArticleContent, CreatePostRequest, Extractor, FetchError, ImageOptions, Job, JobFilter, JobId,
    JobStatus, JobStatusView, JobStore, MemoryImageStore, MemoryJobStore, MockBackend, Opinion, Orchestrator,
    OrchestratorBuilder, ProviderGateway, PublishError, Publisher, StoreError, Tone,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

pub fn article() -> ArticleContent {
    ArticleContent {
        url: "https://example.com/remote-work".to_string(),
        title: "Remote work is reshaping teams".to_string(),
        text: "Companies are rethinking how distributed teams collaborate.\n\n\
               Surveys show productivity held steady while hiring pools widened."
            .to_string(),
    }
}

pub fn request() -> CreatePostRequest {
    CreatePostRequest {
        url: "https://example.com/remote-work".to_string(),
        opinion: Opinion::Agree,
        tone: Tone::Professional,
        image_options: ImageOptions::default(),
    }
}

/// Serves a fixed article, or fails every fetch.
pub struct StaticExtractor {
    article: Option<ArticleContent>,
    calls: AtomicUsize,
}

impl StaticExtractor {
    pub fn new() -> Self {
        Self {
            article: Some(article()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            article: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for StaticExtractor {
    async fn extract(&self, url: &str) -> Result<ArticleContent, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.article {
            Some(article) => Ok(ArticleContent {
                url: url.to_string(),
                ..article.clone()
            }),
            None => Err(FetchError::Unreachable {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

/// Keeps every draft it is handed; optionally fails each publish, or only
/// the first one.
pub struct RecordingPublisher {
    drafts: Mutex<Vec<PostDraft>>,
    failure: Option<PublishError>,
    fail_once: Mutex<Option<PublishError>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            drafts: Mutex::new(Vec::new()),
            failure: None,
            fail_once: Mutex::new(None),
        }
    }

    pub fn failing(error: PublishError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new()
        }
    }

    pub fn failing_once(error: PublishError) -> Self {
        Self {
            fail_once: Mutex::new(Some(error)),
            ..Self::new()
        }
    }

    pub async fn drafts(&self) -> Vec<PostDraft> {
        self.drafts.lock().await.clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(&self, draft: &PostDraft) -> Result<PublishResult, PublishError> {
        let mut drafts = self.drafts.lock().await;
        drafts.push(draft.clone());

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if let Some(error) = self.fail_once.lock().await.take() {
            return Err(error);
        }

        let post_id = format!("urn:li:share:{}", drafts.len());
        Ok(PublishResult {
            post_url: format!("https://www.linkedin.com/feed/update/{}", post_id),
            post_id,
        })
    }
}

/// Delegates to a memory store and remembers every status it persisted.
pub struct RecordingJobStore {
    inner: MemoryJobStore,
    statuses: Mutex<HashMap<JobId, Vec<JobStatus>>>,
}

impl RecordingJobStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryJobStore::new(),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    pub async fn statuses(&self, id: JobId) -> Vec<JobStatus> {
        self.statuses.lock().await.get(&id).cloned().unwrap_or_default()
    }

    async fn record(&self, job: &Job) {
        self.statuses.lock().await.entry(job.id).or_default().push(job.status);
    }
}

#[async_trait]
impl JobStore for RecordingJobStore {
    async fn create(&self, job: &Job) -> Result<JobId, StoreError> {
        let id = self.inner.create(job).await?;
        self.record(job).await;
        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.inner.get(id).await
    }

    async fn update(&self, job: &Job) -> Result<Job, StoreError> {
        let stored = self.inner.update(job).await?;
        self.record(&stored).await;
        Ok(stored)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        self.inner.list(filter).await
    }
}

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        call_timeout: Duration::from_secs(2),
        attempts_per_backend: 1,
        retry_base_delay: Duration::from_millis(1),
    }
}

pub fn backend(name: &str) -> Arc<MockBackend> {
    Arc::new(MockBackend::new(name))
}

pub fn as_backends(backends: &[Arc<MockBackend>]) -> Vec<Arc<dyn AiBackend>> {
    backends
        .iter()
        .map(|backend| Arc::clone(backend) as Arc<dyn AiBackend>)
        .collect()
}

/// An orchestrator over in-memory stores with handles to every collaborator.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<MemoryJobStore>,
    pub images: Arc<MemoryImageStore>,
    pub extractor: Arc<StaticExtractor>,
    pub publisher: Arc<RecordingPublisher>,
}

impl Harness {
    pub fn new(backends: &[Arc<MockBackend>]) -> Self {
        Self::with_parts(backends, StaticExtractor::new(), RecordingPublisher::new())
    }

    pub fn with_parts(
        backends: &[Arc<MockBackend>],
        extractor: StaticExtractor,
        publisher: RecordingPublisher,
    ) -> Self {
        Self::with_store(backends, extractor, publisher, Arc::new(MemoryJobStore::new()))
    }

    pub fn with_store(
        backends: &[Arc<MockBackend>],
        extractor: StaticExtractor,
        publisher: RecordingPublisher,
        store: Arc<MemoryJobStore>,
    ) -> Self {
        init_tracing();

        let images = Arc::new(MemoryImageStore::new());
        let extractor = Arc::new(extractor);
        let publisher = Arc::new(publisher);
        let gateway = ProviderGateway::new(as_backends(backends), gateway_config());

        let orchestrator = OrchestratorBuilder::new(extractor.clone(), gateway)
            .with_store(store.clone())
            .with_image_store(images.clone())
            .with_publisher(publisher.clone())
            .with_config(PipelineConfig {
                variant_count: 2,
                max_concurrent_jobs: 4,
            })
            .with_publish_retry(PublishRetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                multiplier: 2.0,
            })
            .build();

        Self {
            orchestrator,
            store,
            images,
            extractor,
            publisher,
        }
    }

    pub async fn settle(&self, job_id: JobId) -> JobStatusView {
        self.orchestrator
            .wait_until_settled(job_id, SETTLE_TIMEOUT)
            .await
            .expect("job did not settle")
    }

    /// Submits the default request and waits for the pipeline to finish.
    pub async fn run(&self, request: CreatePostRequest) -> JobStatusView {
        let accepted = self.orchestrator.submit(request).await.expect("submit failed");
        self.settle(accepted.job_id).await
    }
}
