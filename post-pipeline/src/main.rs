use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use post_pipeline::backends::backends_from_config;
use post_pipeline::{
    AppConfig, CreatePostRequest, FsImageStore, HttpExtractor, ImageOptions, JobFilter, JobId, JobStatus,
    LinkedInPublisher, Opinion, Orchestrator, OrchestratorBuilder, ProviderGateway, Publisher, RegenerateTarget,
    SimulatedPublisher, SqliteJobStore, Tone, VariantId, VariantStage,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "post-pipeline")]
#[command(about = "Turn articles into moderated LinkedIn post drafts and publish them")]
struct Cli {
    /// Seconds to wait for background work before giving up
    #[arg(long, global = true, default_value_t = 300)]
    wait_seconds: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a job for an article and wait until it is READY
    Submit {
        url: String,
        /// agree, disagree, neutral, or free-form text
        #[arg(long, default_value = "neutral")]
        opinion: String,
        #[arg(long, default_value = "professional")]
        tone: Tone,
        #[arg(long, default_value = "photographic")]
        style: String,
        #[arg(long, default_value = "16:9")]
        aspect_ratio: String,
        #[arg(long)]
        negative_prompt: Option<String>,
        /// Allow publishing variants whose image could not be generated
        #[arg(long)]
        optional_image: bool,
        /// Return immediately after the job is accepted
        #[arg(long)]
        no_wait: bool,
    },

    /// Show a job
    Status { job_id: JobId },

    /// List jobs, newest first
    List {
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Regenerate the text, image, or both of one variant
    Regenerate {
        job_id: JobId,
        variant: VariantId,
        #[arg(default_value = "both")]
        target: RegenerateTarget,
    },

    /// Replace a variant's post text and re-moderate it
    Edit {
        job_id: JobId,
        variant: VariantId,
        text: String,
    },

    /// Publish one variant to LinkedIn
    Publish { job_id: JobId, variant: VariantId },

    /// Cancel a job that has not reached READY
    Cancel { job_id: JobId },

    /// Probe every configured AI backend
    Health,

    /// Continue jobs left unfinished by an earlier run
    Resume,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    let backends = backends_from_config(config);
    if backends.is_empty() {
        bail!("No AI backend configured: set GOOGLE_API_KEY, OPENAI_API_KEY, or ENABLE_STUB_PROVIDER=true");
    }
    let gateway = ProviderGateway::new(backends, config.gateway.clone());
    info!("AI backends in order: {}", gateway.backend_names().join(", "));

    let store = SqliteJobStore::new(&config.database_url)
        .await
        .with_context(|| format!("Failed to open job store at {}", config.database_url))?;
    let extractor = HttpExtractor::new(config.fetch.clone()).context("Failed to build HTTP client")?;

    let publisher: Arc<dyn Publisher> = match &config.linkedin {
        Some(settings) => Arc::new(LinkedInPublisher::new(settings)),
        None => {
            warn!("No LinkedIn credentials configured; publishing is simulated");
            Arc::new(SimulatedPublisher)
        }
    };

    Ok(OrchestratorBuilder::new(Arc::new(extractor), gateway)
        .with_store(Arc::new(store))
        .with_image_store(Arc::new(FsImageStore::new(config.tmp_dir.clone())))
        .with_publisher(publisher)
        .with_config(config.pipeline.clone())
        .with_publish_retry(config.publish_retry.clone())
        .build())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let orchestrator = build_orchestrator(&config).await?;
    let wait = Duration::from_secs(cli.wait_seconds);

    match cli.command {
        Commands::Submit {
            url,
            opinion,
            tone,
            style,
            aspect_ratio,
            negative_prompt,
            optional_image,
            no_wait,
        } => {
            let request = CreatePostRequest {
                url,
                opinion: Opinion::from(opinion),
                tone,
                image_options: ImageOptions {
                    style,
                    aspect_ratio,
                    negative_prompt,
                    required: !optional_image,
                },
            };
            let accepted = orchestrator.submit(request).await?;
            if no_wait {
                return print_json(&accepted);
            }
            print_json(&orchestrator.wait_until_settled(accepted.job_id, wait).await?)
        }
        Commands::Status { job_id } => print_json(&orchestrator.status(job_id).await?),
        Commands::List { status, limit } => {
            let filter = JobFilter { status, limit };
            print_json(&orchestrator.list(&filter).await?)
        }
        Commands::Regenerate {
            job_id,
            variant,
            target,
        } => {
            orchestrator.regenerate(job_id, variant, target).await?;
            print_json(&orchestrator.wait_until_settled(job_id, wait).await?)
        }
        Commands::Edit { job_id, variant, text } => {
            orchestrator.edit_text(job_id, variant, &text).await?;
            print_json(&orchestrator.wait_until_settled(job_id, wait).await?)
        }
        Commands::Publish { job_id, variant } => print_json(&orchestrator.publish(job_id, variant).await?),
        Commands::Cancel { job_id } => print_json(&orchestrator.cancel(job_id).await?),
        Commands::Health => print_json(&orchestrator.health().await),
        Commands::Resume => {
            let resumed = orchestrator.resume_incomplete().await?;
            info!("Resumed {} unfinished jobs or variants", resumed);

            let mut pending = orchestrator.list(&JobFilter::default()).await?;
            pending.retain(|job| {
                let busy = job.variants.iter().any(|variant| variant.stage != VariantStage::Idle);
                job.status != JobStatus::Publishing && (!job.status.is_terminal() || busy)
            });
            for job in pending {
                print_json(&orchestrator.wait_until_settled(job.job_id, wait).await?)?;
            }
            Ok(())
        }
    }
}
