use crate::config::{PipelineConfig, PublishRetryConfig};
use crate::extractor::{validate_url, Extractor};
use crate::gateway::{GatewayError, GatewayHealth, ProviderGateway};
use crate::images::{ImageStore, MemoryImageStore};
use crate::moderation::{moderation_content, publish_gate};
use crate::prompts;
use crate::provider::{ImageGenOptions, ModerationInput, TextOptions};
use crate::publisher::{publish_with_retry, DraftImage, PostDraft, Publisher, SimulatedPublisher};
use crate::store::{JobStore, MemoryJobStore};
use crate::types::{
    Capability, CreatePostRequest, CreatePostResponse, Image, Job, JobError, JobFilter, JobId, JobInput, JobStatus,
    JobStatusView, PipelineError, PostText, PublishResponse, PublishState, RegenerateTarget, Result, StoreError,
    Variant, VariantId, VariantStage, Verdict,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

const MAX_CANCEL_ATTEMPTS: usize = 5;
const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
enum Task {
    Run(JobId),
    Regenerate {
        job_id: JobId,
        variant: VariantId,
        target: RegenerateTarget,
    },
    Remoderate {
        job_id: JobId,
        variant: VariantId,
    },
}

/// Why a background task stopped early.
#[derive(Debug)]
enum Halt {
    /// The job was cancelled while the worker held a stale snapshot.
    Cancelled,
    /// The failure has been recorded on the job.
    Failed,
    /// Nothing could be recorded (store unavailable, unexpected concurrent write).
    Aborted(String),
}

impl From<StoreError> for Halt {
    fn from(error: StoreError) -> Self {
        Halt::Aborted(error.to_string())
    }
}

type Step<T> = std::result::Result<T, Halt>;

fn gateway_failure(stage: JobStatus, error: &GatewayError) -> JobError {
    JobError {
        stage,
        capability: Some(error.capability()),
        backend: error.backend().map(str::to_string),
        message: error.to_string(),
    }
}

fn unknown_variant(job_id: JobId, variant: VariantId) -> PipelineError {
    PipelineError::InvalidRequest(format!("job {} has no variant {}", job_id, variant))
}

fn needs_moderation(variant: &Variant) -> bool {
    (variant.text.is_some() && variant.verdict == Verdict::Pending)
        || variant.image.as_ref().is_some_and(|image| image.verdict == Verdict::Pending)
}

/// Shared state of the orchestrator, owned jointly by the public handle and
/// every spawned job task.
struct Engine {
    store: Arc<dyn JobStore>,
    images: Arc<dyn ImageStore>,
    extractor: Arc<dyn Extractor>,
    gateway: ProviderGateway,
    publisher: Arc<dyn Publisher>,
    config: PipelineConfig,
    publish_retry: PublishRetryConfig,
}

impl Engine {
    async fn execute(&self, task: Task) {
        let (job_id, outcome) = match task {
            Task::Run(job_id) => (job_id, self.run_job(job_id).await),
            Task::Regenerate {
                job_id,
                variant,
                target,
            } => (job_id, self.regenerate_variant(job_id, variant, target).await),
            Task::Remoderate { job_id, variant } => (job_id, self.remoderate_variant(job_id, variant).await),
        };

        match outcome {
            Ok(()) | Err(Halt::Failed) => {}
            Err(Halt::Cancelled) => info!("Job {} was cancelled; worker stopped", job_id),
            Err(Halt::Aborted(reason)) => error!("Worker for job {} aborted: {}", job_id, reason),
        }
    }

    /// Writes the snapshot. A version conflict means someone else wrote the
    /// job; if that was a cancel, the worker stops quietly.
    async fn commit(&self, job: &Job) -> Step<Job> {
        match self.store.update(job).await {
            Ok(stored) => Ok(stored),
            Err(StoreError::Conflict { .. }) => {
                let current = self.store.get(job.id).await?;
                if current.status == JobStatus::Cancelled {
                    Err(Halt::Cancelled)
                } else {
                    Err(Halt::Aborted(format!(
                        "job {} was modified concurrently (now {})",
                        job.id, current.status
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fail(&self, mut job: Job, error: JobError) -> Halt {
        error!("Job {} failed: {}", job.id, error);
        if let Err(e) = job.fail(error) {
            return Halt::Aborted(e.to_string());
        }
        match self.commit(&job).await {
            Ok(_) => Halt::Failed,
            Err(halt) => halt,
        }
    }

    async fn enter(&self, mut job: Job, stage: JobStatus) -> Step<Job> {
        if job.status == stage {
            return Ok(job);
        }
        job.transition(stage).map_err(|e| Halt::Aborted(e.to_string()))?;
        info!("Job {} entering {}", job.id, stage);
        self.commit(&job).await
    }

    /// Drives a job from its current stage to READY. Every stage skips work
    /// already persisted, so a job interrupted mid-stage picks up where it
    /// left off.
    async fn run_job(&self, id: JobId) -> Step<()> {
        let mut job = self.store.get(id).await?;
        if job.status != JobStatus::Pending && !job.status.is_running() {
            debug!("Job {} is {}; nothing to run", id, job.status);
            return Ok(());
        }

        let first = JobStatus::STAGES
            .iter()
            .position(|stage| *stage == job.status)
            .unwrap_or(0);

        for &stage in &JobStatus::STAGES[first..] {
            job = self.enter(job, stage).await?;
            job = match stage {
                JobStatus::Scraping => self.scrape(job).await?,
                JobStatus::Summarizing => self.summarize(job).await?,
                JobStatus::GeneratingText => self.generate_texts(job).await?,
                JobStatus::GeneratingImages => self.generate_images(job).await?,
                JobStatus::Moderating => self.moderate_all(job).await?,
                other => return Err(Halt::Aborted(format!("{} is not a pipeline stage", other))),
            };
        }

        job.transition(JobStatus::Ready).map_err(|e| Halt::Aborted(e.to_string()))?;
        let job = self.commit(&job).await?;

        if job.moderation_warning() {
            warn!("Job {} is READY with flagged content", job.id);
        } else {
            info!("Job {} is READY with {} variants", job.id, job.variants.len());
        }
        Ok(())
    }

    async fn scrape(&self, mut job: Job) -> Step<Job> {
        if job.article.is_some() {
            return Ok(job);
        }

        match self.extractor.extract(&job.input.url).await {
            Ok(article) => {
                job.article = Some(article);
                job.touch();
                self.commit(&job).await
            }
            Err(e) => Err(self.fail(job, JobError::new(JobStatus::Scraping, e.to_string())).await),
        }
    }

    async fn summarize(&self, mut job: Job) -> Step<Job> {
        if job.summary.is_some() {
            return Ok(job);
        }

        let prompt = job.article.as_ref().map(prompts::summary_prompt);
        let Some(prompt) = prompt else {
            let error = JobError::new(JobStatus::Summarizing, "no article content to summarize");
            return Err(self.fail(job, error).await);
        };

        let options = TextOptions {
            temperature: 0.3,
            ..TextOptions::json()
        };
        let served = match self.gateway.generate_text(&prompt, &options).await {
            Ok(served) => served,
            Err(e) => return Err(self.fail(job, gateway_failure(JobStatus::Summarizing, &e)).await),
        };

        let Some(summary) = prompts::parse_summary(&served.value) else {
            let error = JobError {
                stage: JobStatus::Summarizing,
                capability: Some(Capability::GenerateText),
                backend: Some(served.backend),
                message: "backend returned an empty summary".to_string(),
            };
            return Err(self.fail(job, error).await);
        };

        debug!("Summarized job {} via {}", job.id, served.backend);
        job.summary = Some(summary);
        job.touch();
        self.commit(&job).await
    }

    async fn draft_text(&self, job: &Job, variant: VariantId) -> std::result::Result<PostText, JobError> {
        let stage = JobStatus::GeneratingText;
        let summary = job
            .summary
            .as_ref()
            .ok_or_else(|| JobError::new(stage, "no summary available"))?;

        let prompt = prompts::variant_prompt(summary, &job.input.opinion, job.input.tone, variant);
        let served = self
            .gateway
            .generate_text(&prompt, &TextOptions::json())
            .await
            .map_err(|e| gateway_failure(stage, &e))?;

        let text = prompts::parse_post(&served.value).ok_or_else(|| JobError {
            stage,
            capability: Some(Capability::GenerateText),
            backend: Some(served.backend.clone()),
            message: format!("backend returned no text for variant {}", variant),
        })?;

        debug!("Drafted variant {} of job {} via {}", variant, job.id, served.backend);
        Ok(text)
    }

    async fn generate_texts(&self, mut job: Job) -> Step<Job> {
        let missing: Vec<VariantId> = job
            .variants
            .iter()
            .filter(|variant| variant.text.is_none())
            .map(|variant| variant.id)
            .collect();

        for variant in missing {
            match self.draft_text(&job, variant).await {
                Ok(text) => {
                    if let Some(slot) = job.variant_mut(variant) {
                        slot.text = Some(text);
                        slot.verdict = Verdict::Pending;
                    }
                    job.touch();
                    job = self.commit(&job).await?;
                }
                Err(e) => return Err(self.fail(job, e).await),
            }
        }
        Ok(job)
    }

    /// Asks the text capability for an image prompt, renders it and stores
    /// the bytes under a fresh reference.
    async fn draft_image(
        &self,
        job: &Job,
        variant: VariantId,
        text: &PostText,
    ) -> std::result::Result<Image, JobError> {
        let stage = JobStatus::GeneratingImages;
        let options = &job.input.image_options;

        let request = prompts::image_prompt_request(&text.body, options);
        let served = self
            .gateway
            .generate_text(&request, &TextOptions::default())
            .await
            .map_err(|e| gateway_failure(stage, &e))?;
        let prompt = prompts::clean_image_prompt(&served.value).ok_or_else(|| JobError {
            stage,
            capability: Some(Capability::GenerateText),
            backend: Some(served.backend.clone()),
            message: "backend returned an empty image prompt".to_string(),
        })?;

        let image = self
            .gateway
            .generate_image(&prompt, &ImageGenOptions::from(options))
            .await
            .map_err(|e| gateway_failure(stage, &e))?;
        if image.value.bytes.is_empty() {
            return Err(JobError {
                stage,
                capability: Some(Capability::GenerateImage),
                backend: Some(image.backend),
                message: "backend returned an empty image".to_string(),
            });
        }

        let reference = self
            .images
            .put(job.id, variant, &image.value.bytes, &image.value.mime_type)
            .await
            .map_err(|e| JobError::new(stage, format!("could not store image: {}", e)))?;

        debug!("Stored image {} for job {} via {}", reference, job.id, image.backend);
        Ok(Image {
            reference,
            prompt,
            mime_type: image.value.mime_type,
            verdict: Verdict::Pending,
            created_at: Utc::now(),
        })
    }

    async fn generate_images(&self, mut job: Job) -> Step<Job> {
        let missing: Vec<(VariantId, PostText)> = job
            .variants
            .iter()
            .filter(|variant| variant.image.is_none())
            .filter_map(|variant| variant.text.clone().map(|text| (variant.id, text)))
            .collect();

        for (variant, text) in missing {
            match self.draft_image(&job, variant, &text).await {
                Ok(image) => {
                    if let Some(slot) = job.variant_mut(variant) {
                        slot.image = Some(image);
                        slot.last_error = None;
                    }
                }
                Err(e) if !job.input.image_options.required => {
                    warn!("Job {} variant {} continues without an image: {}", job.id, variant, e);
                    if let Some(slot) = job.variant_mut(variant) {
                        slot.last_error = Some(e);
                    }
                }
                Err(e) => return Err(self.fail(job, e).await),
            }
            job.touch();
            job = self.commit(&job).await?;
        }
        Ok(job)
    }

    async fn moderate_text(&self, text: &PostText) -> std::result::Result<Verdict, JobError> {
        let input = ModerationInput::Text(moderation_content(text));
        self.gateway
            .moderate(&input)
            .await
            .map(|served| served.value)
            .map_err(|e| gateway_failure(JobStatus::Moderating, &e))
    }

    async fn moderate_image(&self, image: &Image) -> std::result::Result<Verdict, JobError> {
        let bytes = self.images.get(&image.reference).await.map_err(|e| {
            JobError::new(
                JobStatus::Moderating,
                format!("could not load image {}: {}", image.reference, e),
            )
        })?;
        let input = ModerationInput::Image {
            bytes,
            mime_type: image.mime_type.clone(),
        };
        self.gateway
            .moderate(&input)
            .await
            .map(|served| served.value)
            .map_err(|e| gateway_failure(JobStatus::Moderating, &e))
    }

    /// Moderates whatever of one variant is still PENDING. Does not write.
    async fn moderate_variant(
        &self,
        mut job: Job,
        variant: VariantId,
    ) -> std::result::Result<Job, (Job, JobError)> {
        let Some(current) = job.variant(variant) else {
            return Ok(job);
        };
        let text = current.text.clone().filter(|_| current.verdict == Verdict::Pending);
        let image = current.image.clone().filter(|image| image.verdict == Verdict::Pending);

        if let Some(text) = text {
            match self.moderate_text(&text).await {
                Ok(verdict) => {
                    if let Some(slot) = job.variant_mut(variant) {
                        slot.verdict = verdict;
                    }
                }
                Err(e) => return Err((job, e)),
            }
        }

        if let Some(image) = image {
            match self.moderate_image(&image).await {
                Ok(verdict) => {
                    if let Some(stored) = job.variant_mut(variant).and_then(|slot| slot.image.as_mut()) {
                        stored.verdict = verdict;
                    }
                }
                Err(e) => return Err((job, e)),
            }
        }

        if job.variant(variant).is_some_and(Variant::is_flagged) {
            info!("Job {} variant {} was flagged by moderation", job.id, variant);
        }
        Ok(job)
    }

    async fn moderate_all(&self, mut job: Job) -> Step<Job> {
        let pending: Vec<VariantId> = job
            .variants
            .iter()
            .filter(|variant| needs_moderation(variant))
            .map(|variant| variant.id)
            .collect();

        for variant in pending {
            match self.moderate_variant(job, variant).await {
                Ok(mut moderated) => {
                    moderated.touch();
                    job = self.commit(&moderated).await?;
                }
                Err((unmoderated, e)) => return Err(self.fail(unmoderated, e).await),
            }
        }
        Ok(job)
    }

    /// Re-runs text and/or image generation and then moderation for one
    /// variant of a READY job. The job status never leaves READY; progress is
    /// tracked on the variant.
    async fn regenerate_variant(&self, id: JobId, variant: VariantId, target: RegenerateTarget) -> Step<()> {
        let mut job = self.store.get(id).await?;
        if !job.variant(variant).is_some_and(Variant::is_busy) {
            debug!("Variant {} of job {} is not awaiting regeneration", variant, id);
            return Ok(());
        }
        info!("Regenerating {} of variant {} for job {}", target, variant, id);

        if target.includes_text() {
            match self.draft_text(&job, variant).await {
                Ok(text) => {
                    if let Some(slot) = job.variant_mut(variant) {
                        slot.text = Some(text);
                        slot.verdict = Verdict::Pending;
                        slot.stage = if target.includes_image() {
                            VariantStage::GeneratingImage
                        } else {
                            VariantStage::Moderating
                        };
                    }
                    job.touch();
                    job = self.commit(&job).await?;
                }
                Err(e) => return self.release_variant(job, variant, Some(e)).await,
            }
        }

        if target.includes_image() {
            let text = job.variant(variant).and_then(|slot| slot.text.clone());
            let drafted = match text {
                Some(text) => self.draft_image(&job, variant, &text).await,
                None => Err(JobError::new(
                    JobStatus::GeneratingImages,
                    format!("variant {} has no text to illustrate", variant),
                )),
            };

            match drafted {
                Ok(image) => {
                    if let Some(slot) = job.variant_mut(variant) {
                        slot.image = Some(image);
                        slot.stage = VariantStage::Moderating;
                    }
                    job.touch();
                    job = self.commit(&job).await?;
                }
                Err(e) => {
                    // Text drafted earlier in this run still needs a verdict.
                    let job = match self.moderate_variant(job, variant).await {
                        Ok(moderated) => moderated,
                        Err((unmoderated, moderation_error)) => {
                            warn!(
                                "Could not moderate new text of variant {} for job {}: {}",
                                variant, id, moderation_error
                            );
                            unmoderated
                        }
                    };
                    return self.release_variant(job, variant, Some(e)).await;
                }
            }
        }

        self.finish_moderation(job, variant).await
    }

    async fn remoderate_variant(&self, id: JobId, variant: VariantId) -> Step<()> {
        let job = self.store.get(id).await?;
        if !job.variant(variant).is_some_and(Variant::is_busy) {
            return Ok(());
        }
        self.finish_moderation(job, variant).await
    }

    async fn finish_moderation(&self, job: Job, variant: VariantId) -> Step<()> {
        match self.moderate_variant(job, variant).await {
            Ok(job) => self.release_variant(job, variant, None).await,
            Err((job, e)) => self.release_variant(job, variant, Some(e)).await,
        }
    }

    /// Returns the variant to IDLE, recording the error if the regeneration
    /// did not complete.
    async fn release_variant(&self, mut job: Job, variant: VariantId, error: Option<JobError>) -> Step<()> {
        match &error {
            Some(e) => warn!("Regeneration of variant {} for job {} failed: {}", variant, job.id, e),
            None => info!("Variant {} of job {} is ready again", variant, job.id),
        }

        if let Some(slot) = job.variant_mut(variant) {
            slot.stage = VariantStage::Idle;
            slot.last_error = error;
        }
        job.touch();
        self.commit(&job).await.map(|_| ())
    }
}

/// Public handle to the job pipeline. Operations validate and persist
/// synchronously; the stages run on background tasks.
pub struct Orchestrator {
    engine: Arc<Engine>,
    tasks: mpsc::UnboundedSender<Task>,
}

impl Orchestrator {
    fn start(engine: Engine) -> Self {
        let engine = Arc::new(engine);
        let (tasks, receiver) = mpsc::unbounded_channel();
        Self::spawn_dispatcher(Arc::clone(&engine), receiver);
        Self { engine, tasks }
    }

    fn spawn_dispatcher(engine: Arc<Engine>, mut receiver: mpsc::UnboundedReceiver<Task>) {
        let permits = Arc::new(Semaphore::new(engine.config.max_concurrent_jobs.max(1)));

        tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let _permit = permit;
                    engine.execute(task).await;
                });
            }
            debug!("Task dispatcher stopped");
        });
    }

    fn enqueue(&self, task: Task) -> Result<()> {
        self.tasks.send(task).map_err(|_| PipelineError::Shutdown)
    }

    fn ensure_idle_ready(job: &Job) -> Result<()> {
        if job.status != JobStatus::Ready {
            return Err(PipelineError::Conflict(format!(
                "job {} is {}; this operation requires READY",
                job.id, job.status
            )));
        }
        if job.regeneration_in_flight() {
            return Err(PipelineError::Conflict(format!(
                "job {} has a regeneration in flight",
                job.id
            )));
        }
        Ok(())
    }

    /// Validates the request, records a PENDING job and queues it.
    pub async fn submit(&self, request: CreatePostRequest) -> Result<CreatePostResponse> {
        let input = JobInput::from(request);
        validate_url(&input.url).map_err(|e| PipelineError::InvalidRequest(e.to_string()))?;
        if input.opinion.as_str().trim().is_empty() {
            return Err(PipelineError::InvalidRequest("opinion must not be empty".to_string()));
        }

        let job = Job::new(input, self.engine.config.variant_count);
        let job_id = self.engine.store.create(&job).await?;
        info!("Accepted job {} for {}", job_id, job.input.url);

        self.enqueue(Task::Run(job_id))?;
        Ok(CreatePostResponse {
            job_id,
            status: job.status,
        })
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobStatusView> {
        let job = self.engine.store.get(job_id).await?;
        Ok(JobStatusView::from(&job))
    }

    /// The full stored job, including article and summary.
    pub async fn job(&self, job_id: JobId) -> Result<Job> {
        Ok(self.engine.store.get(job_id).await?)
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<JobStatusView>> {
        let jobs = self.engine.store.list(filter).await?;
        Ok(jobs.iter().map(JobStatusView::from).collect())
    }

    pub async fn regenerate(
        &self,
        job_id: JobId,
        variant: VariantId,
        target: RegenerateTarget,
    ) -> Result<JobStatusView> {
        let mut job = self.engine.store.get(job_id).await?;
        Self::ensure_idle_ready(&job)?;

        let slot = job.variant_mut(variant).ok_or_else(|| unknown_variant(job_id, variant))?;
        slot.stage = if target.includes_text() {
            VariantStage::GeneratingText
        } else {
            VariantStage::GeneratingImage
        };
        slot.last_error = None;
        job.touch();

        let job = self.engine.store.update(&job).await?;
        info!("Queued {} regeneration of variant {} for job {}", target, variant, job_id);

        self.enqueue(Task::Regenerate {
            job_id,
            variant,
            target,
        })?;
        Ok(JobStatusView::from(&job))
    }

    /// Replaces a variant's post text with user-edited text and sends it back
    /// through moderation.
    pub async fn edit_text(&self, job_id: JobId, variant: VariantId, text: &str) -> Result<JobStatusView> {
        let body = text.trim();
        if body.is_empty() {
            return Err(PipelineError::InvalidRequest("post text must not be empty".to_string()));
        }
        if body.chars().count() > prompts::MAX_POST_CHARS {
            return Err(PipelineError::InvalidRequest(format!(
                "post text exceeds {} characters",
                prompts::MAX_POST_CHARS
            )));
        }

        let mut job = self.engine.store.get(job_id).await?;
        Self::ensure_idle_ready(&job)?;

        let slot = job.variant_mut(variant).ok_or_else(|| unknown_variant(job_id, variant))?;
        let mut edited = PostText::edited(body);
        if let Some(previous) = slot.text.take() {
            edited.hashtags = previous.hashtags;
            edited.suggested_comment = previous.suggested_comment;
            edited.alt_text = previous.alt_text;
        }
        slot.text = Some(edited);
        slot.verdict = Verdict::Pending;
        slot.stage = VariantStage::Moderating;
        slot.last_error = None;
        job.touch();

        let job = self.engine.store.update(&job).await?;
        info!("Variant {} of job {} edited; re-moderating", variant, job_id);

        self.enqueue(Task::Remoderate { job_id, variant })?;
        Ok(JobStatusView::from(&job))
    }

    /// Publishes one variant. Blocks until the publisher has answered,
    /// including its bounded retries.
    pub async fn publish(&self, job_id: JobId, variant: VariantId) -> Result<PublishResponse> {
        let engine = &self.engine;
        let mut job = engine.store.get(job_id).await?;
        Self::ensure_idle_ready(&job)?;

        let current = job.variant(variant).ok_or_else(|| unknown_variant(job_id, variant))?;
        publish_gate(current, &job.input.image_options).map_err(PipelineError::Conflict)?;

        let image = match &current.image {
            Some(image) => Some(DraftImage {
                bytes: engine.images.get(&image.reference).await?,
                mime_type: image.mime_type.clone(),
                alt_text: current.text.as_ref().and_then(|text| text.alt_text.clone()),
            }),
            None => None,
        };
        let draft = PostDraft {
            job_id,
            variant,
            text: current.text.as_ref().map(PostText::publishable_text).unwrap_or_default(),
            image,
        };

        job.transition(JobStatus::Publishing)?;
        if let Some(slot) = job.variant_mut(variant) {
            slot.publish_state = PublishState::Publishing;
        }
        let mut job = engine.store.update(&job).await?;
        info!("Publishing variant {} of job {} via {}", variant, job_id, engine.publisher.name());

        match publish_with_retry(engine.publisher.as_ref(), &draft, &engine.publish_retry).await {
            Ok(result) => {
                job.transition(JobStatus::Published)?;
                if let Some(slot) = job.variant_mut(variant) {
                    slot.publish_state = PublishState::Published;
                    slot.post_url = Some(result.post_url.clone());
                    slot.last_error = None;
                }
                engine.store.update(&job).await?;

                Ok(PublishResponse {
                    job_id,
                    variant,
                    post_id: result.post_id,
                    post_url: result.post_url,
                })
            }
            Err(publish_error) => {
                warn!("Publishing variant {} of job {} failed: {}", variant, job_id, publish_error);
                job.transition(JobStatus::Ready)?;
                if let Some(slot) = job.variant_mut(variant) {
                    slot.publish_state = PublishState::Failed;
                    slot.last_error = Some(JobError {
                        stage: JobStatus::Publishing,
                        capability: None,
                        backend: Some(engine.publisher.name().to_string()),
                        message: publish_error.to_string(),
                    });
                }
                engine.store.update(&job).await?;

                Err(PipelineError::Publish(publish_error))
            }
        }
    }

    /// Cancels a job that has not reached READY. The running worker notices
    /// on its next write and stops, keeping what it had already stored.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobStatusView> {
        for _ in 0..MAX_CANCEL_ATTEMPTS {
            let mut job = self.engine.store.get(job_id).await?;
            if !job.status.is_cancellable() {
                return Err(PipelineError::Conflict(format!(
                    "job {} is {} and cannot be cancelled",
                    job_id, job.status
                )));
            }

            job.transition(JobStatus::Cancelled)?;
            match self.engine.store.update(&job).await {
                Ok(stored) => {
                    info!("Cancelled job {}", job_id);
                    return Ok(JobStatusView::from(&stored));
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!("Job {} changed while cancelling; retrying", job_id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PipelineError::Conflict(format!(
            "job {} kept changing; cancel was not applied",
            job_id
        )))
    }

    pub async fn health(&self) -> GatewayHealth {
        self.engine.gateway.health().await
    }

    /// Re-queues work left unfinished by a previous process: jobs still in
    /// PENDING or a running stage, and variants stuck mid-regeneration.
    pub async fn resume_incomplete(&self) -> Result<usize> {
        let jobs = self.engine.store.list(&JobFilter::default()).await?;
        let mut resumed = 0;

        for job in jobs {
            if job.status == JobStatus::Pending || job.status.is_running() {
                info!("Resuming job {} from {}", job.id, job.status);
                self.enqueue(Task::Run(job.id))?;
                resumed += 1;
                continue;
            }

            if job.status == JobStatus::Publishing {
                warn!("Job {} was interrupted while publishing; outcome unknown", job.id);
                continue;
            }

            for variant in job.variants.iter().filter(|variant| variant.is_busy()) {
                let task = match variant.stage {
                    VariantStage::GeneratingText => Task::Regenerate {
                        job_id: job.id,
                        variant: variant.id,
                        target: RegenerateTarget::Text,
                    },
                    VariantStage::GeneratingImage => Task::Regenerate {
                        job_id: job.id,
                        variant: variant.id,
                        target: RegenerateTarget::Image,
                    },
                    VariantStage::Moderating | VariantStage::Idle => Task::Remoderate {
                        job_id: job.id,
                        variant: variant.id,
                    },
                };
                info!("Resuming variant {} of job {} at {:?}", variant.id, job.id, variant.stage);
                self.enqueue(task)?;
                resumed += 1;
            }
        }

        Ok(resumed)
    }

    /// Polls until the job stops moving: a terminal status with no variant
    /// mid-regeneration.
    pub async fn wait_until_settled(&self, job_id: JobId, timeout: Duration) -> Result<JobStatusView> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.engine.store.get(job_id).await?;
            if job.status.is_terminal() && !job.regeneration_in_flight() {
                return Ok(JobStatusView::from(&job));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PipelineError::Timeout { id: job_id });
            }
            tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
        }
    }
}

/// Assembles an [`Orchestrator`]. Storage and publishing default to the
/// in-memory stores and the simulated publisher.
pub struct OrchestratorBuilder {
    extractor: Arc<dyn Extractor>,
    gateway: ProviderGateway,
    store: Option<Arc<dyn JobStore>>,
    images: Option<Arc<dyn ImageStore>>,
    publisher: Option<Arc<dyn Publisher>>,
    config: PipelineConfig,
    publish_retry: PublishRetryConfig,
}

impl OrchestratorBuilder {
    pub fn new(extractor: Arc<dyn Extractor>, gateway: ProviderGateway) -> Self {
        Self {
            extractor,
            gateway,
            store: None,
            images: None,
            publisher: None,
            config: PipelineConfig::default(),
            publish_retry: PublishRetryConfig::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_image_store(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_publish_retry(mut self, publish_retry: PublishRetryConfig) -> Self {
        self.publish_retry = publish_retry;
        self
    }

    /// Starts the task dispatcher; must be called within a Tokio runtime.
    pub fn build(self) -> Orchestrator {
        Orchestrator::start(Engine {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryJobStore::new()) as Arc<dyn JobStore>),
            images: self
                .images
                .unwrap_or_else(|| Arc::new(MemoryImageStore::new()) as Arc<dyn ImageStore>),
            extractor: self.extractor,
            gateway: self.gateway,
            publisher: self
                .publisher
                .unwrap_or_else(|| Arc::new(SimulatedPublisher) as Arc<dyn Publisher>),
            config: self.config,
            publish_retry: self.publish_retry,
        })
    }
}
