mod common;

use common::*;
use post_pipeline::{
    Capability, ImageOptions, ImageStore, Job, JobInput, JobStatus, JobStore, MemoryJobStore, MockBackend,
    OrchestratorBuilder, PipelineError, ProviderError, ProviderGateway, PublishError, PublishState,
    RegenerateTarget, SqliteJobStore, TextOrigin, VariantId, VariantStage, Verdict,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[tokio::test]
async fn test_submit_produces_two_moderated_variants() {
    let primary = backend("primary");
    let harness = Harness::new(&[primary.clone()]);

    let view = harness.run(request()).await;
    info!("Job settled as {}", view.status);

    assert_eq!(view.status, JobStatus::Ready);
    assert_eq!(view.title.as_deref(), Some("Remote work is reshaping teams"));
    assert_eq!(view.variants.len(), 2);
    assert!(!view.moderation_warning);
    assert!(view.error.is_none());

    for (variant, letter) in view.variants.iter().zip(["A", "B"]) {
        assert_eq!(variant.id.to_string(), letter);
        let text = variant.text.as_deref().expect("variant has text");
        assert!(text.starts_with(&format!("Variant {} post", letter)));
        assert_eq!(variant.text_origin, Some(TextOrigin::Generated));
        assert_eq!(variant.hashtags.len(), 3);
        assert_eq!(variant.verdict, Verdict::Pass);
        assert_eq!(variant.publish_state, PublishState::Unpublished);
        assert_eq!(variant.stage, VariantStage::Idle);

        let image = variant.image.as_ref().expect("variant has an image");
        assert_eq!(image.verdict, Verdict::Pass);
        assert!(harness.images.get(&image.reference).await.is_ok());
    }

    assert_ne!(view.variants[0].text, view.variants[1].text);
    assert_eq!(harness.images.len().await, 2);
    assert_eq!(primary.calls(Capability::GenerateImage), 2);
    assert_eq!(harness.extractor.calls(), 1);
}

#[tokio::test]
async fn test_text_timeout_on_primary_falls_back_to_secondary() {
    let primary = Arc::new(
        MockBackend::new("primary")
            .failing_always(Capability::GenerateText, ProviderError::Timeout(Duration::from_secs(60))),
    );
    let secondary = backend("secondary");
    let harness = Harness::new(&[primary.clone(), secondary.clone()]);

    let view = harness.run(request()).await;

    assert_eq!(view.status, JobStatus::Ready);
    for variant in &view.variants {
        assert!(variant.text.as_deref().unwrap().contains("from secondary"));
    }
    // Other capabilities stay on the primary.
    assert_eq!(primary.calls(Capability::GenerateImage), 2);
    assert_eq!(secondary.calls(Capability::GenerateImage), 0);
    assert!(primary.calls(Capability::GenerateText) >= 1);
}

#[tokio::test]
async fn test_all_backends_failing_fails_the_job_with_stage_detail() {
    let primary = Arc::new(
        MockBackend::new("primary").failing_always(Capability::GenerateText, ProviderError::Transient("503".into())),
    );
    let secondary = Arc::new(
        MockBackend::new("secondary")
            .failing_always(Capability::GenerateText, ProviderError::RateLimited("429".into())),
    );
    let harness = Harness::new(&[primary, secondary]);

    let view = harness.run(request()).await;

    assert_eq!(view.status, JobStatus::Failed);
    let error = view.error.expect("failed job records its error");
    assert_eq!(error.stage, JobStatus::Summarizing);
    assert_eq!(error.capability, Some(Capability::GenerateText));
    assert_eq!(error.backend.as_deref(), Some("secondary"));
    assert!(view.variants.iter().all(|variant| variant.text.is_none()));
}

#[tokio::test]
async fn test_auth_failure_does_not_fall_through() {
    let primary = Arc::new(
        MockBackend::new("primary").failing_always(Capability::GenerateText, ProviderError::Auth("bad key".into())),
    );
    let secondary = backend("secondary");
    let harness = Harness::new(&[primary, secondary.clone()]);

    let view = harness.run(request()).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error.unwrap().backend.as_deref(), Some("primary"));
    assert_eq!(secondary.calls(Capability::GenerateText), 0);
}

#[tokio::test]
async fn test_unreachable_article_fails_at_scraping() {
    let primary = backend("primary");
    let harness = Harness::with_parts(&[primary.clone()], StaticExtractor::unreachable(), RecordingPublisher::new());

    let view = harness.run(request()).await;

    assert_eq!(view.status, JobStatus::Failed);
    let error = view.error.unwrap();
    assert_eq!(error.stage, JobStatus::Scraping);
    assert!(error.capability.is_none());
    assert_eq!(primary.calls(Capability::GenerateText), 0);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected_up_front() {
    let harness = Harness::new(&[backend("primary")]);

    let mut bad_url = request();
    bad_url.url = "ftp://example.com/file".to_string();
    assert!(matches!(
        harness.orchestrator.submit(bad_url).await,
        Err(PipelineError::InvalidRequest(_))
    ));

    let mut no_opinion = request();
    no_opinion.opinion = "   ".into();
    assert!(matches!(
        harness.orchestrator.submit(no_opinion).await,
        Err(PipelineError::InvalidRequest(_))
    ));

    assert!(matches!(
        harness.orchestrator.status(Uuid::new_v4()).await,
        Err(PipelineError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_regenerating_one_image_leaves_everything_else_alone() {
    let harness = Harness::new(&[backend("primary")]);
    let before = harness.run(request()).await;
    let job_id = before.job_id;

    let queued = harness
        .orchestrator
        .regenerate(job_id, VariantId::A, RegenerateTarget::Image)
        .await
        .unwrap();
    assert_eq!(queued.status, JobStatus::Ready);
    assert_eq!(queued.variants[0].stage, VariantStage::GeneratingImage);

    let after = harness.settle(job_id).await;

    assert_eq!(after.status, JobStatus::Ready);
    let (old_a, new_a) = (&before.variants[0], &after.variants[0]);
    assert_eq!(new_a.text, old_a.text);
    assert_ne!(
        new_a.image.as_ref().unwrap().reference,
        old_a.image.as_ref().unwrap().reference
    );
    assert_eq!(new_a.image.as_ref().unwrap().verdict, Verdict::Pass);
    assert_eq!(new_a.stage, VariantStage::Idle);
    assert_eq!(after.variants[1], before.variants[1]);
}

#[tokio::test]
async fn test_regenerating_text_supersedes_previous_text() {
    let harness = Harness::new(&[backend("primary")]);
    let before = harness.run(request()).await;

    harness
        .orchestrator
        .regenerate(before.job_id, VariantId::B, RegenerateTarget::Text)
        .await
        .unwrap();
    let after = harness.settle(before.job_id).await;

    let (old_b, new_b) = (&before.variants[1], &after.variants[1]);
    assert_ne!(new_b.text, old_b.text);
    assert!(new_b.text.as_deref().unwrap().starts_with("Variant B post"));
    assert_eq!(new_b.verdict, Verdict::Pass);
    assert_eq!(new_b.image, old_b.image);
    assert_eq!(after.variants[0], before.variants[0]);
}

#[tokio::test]
async fn test_regeneration_conflicts() {
    let slow = Arc::new(MockBackend::new("slow").with_delay(Duration::from_millis(100)));
    let harness = Harness::new(&[slow]);

    let accepted = harness.orchestrator.submit(request()).await.unwrap();
    assert!(matches!(
        harness
            .orchestrator
            .regenerate(accepted.job_id, VariantId::A, RegenerateTarget::Both)
            .await,
        Err(PipelineError::Conflict(_))
    ));

    let ready = harness.settle(accepted.job_id).await;
    assert_eq!(ready.status, JobStatus::Ready);

    harness
        .orchestrator
        .regenerate(ready.job_id, VariantId::A, RegenerateTarget::Both)
        .await
        .unwrap();

    assert!(matches!(
        harness
            .orchestrator
            .regenerate(ready.job_id, VariantId::B, RegenerateTarget::Text)
            .await,
        Err(PipelineError::Conflict(_))
    ));
    assert!(matches!(
        harness.orchestrator.publish(ready.job_id, VariantId::B).await,
        Err(PipelineError::Conflict(_))
    ));

    let settled = harness.settle(ready.job_id).await;
    assert!(settled.variants.iter().all(|variant| variant.stage == VariantStage::Idle));

    let unknown = "C".parse::<VariantId>().unwrap();
    assert!(matches!(
        harness
            .orchestrator
            .regenerate(ready.job_id, unknown, RegenerateTarget::Text)
            .await,
        Err(PipelineError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_failed_regeneration_keeps_job_ready() {
    let store = Arc::new(MemoryJobStore::new());
    let healthy = Harness::with_store(
        &[backend("primary")],
        StaticExtractor::new(),
        RecordingPublisher::new(),
        store.clone(),
    );
    let before = healthy.run(request()).await;

    // Same jobs, but every image backend is now down.
    let broken = Arc::new(
        MockBackend::new("broken").failing_always(Capability::GenerateImage, ProviderError::Transient("503".into())),
    );
    let degraded = Harness::with_store(&[broken], StaticExtractor::new(), RecordingPublisher::new(), store);

    degraded
        .orchestrator
        .regenerate(before.job_id, VariantId::A, RegenerateTarget::Image)
        .await
        .unwrap();
    let after = degraded.settle(before.job_id).await;

    assert_eq!(after.status, JobStatus::Ready);
    let variant = &after.variants[0];
    assert_eq!(variant.stage, VariantStage::Idle);
    assert_eq!(variant.image, before.variants[0].image);
    assert_eq!(variant.text, before.variants[0].text);
    let last_error = variant.last_error.as_deref().expect("failure is recorded on the variant");
    assert!(last_error.starts_with("GENERATING_IMAGES failed"));
    assert!(last_error.contains("broken"));
    assert_eq!(after.variants[1], before.variants[1]);
}

#[tokio::test]
async fn test_failed_image_after_new_text_still_moderates_the_text() {
    let store = Arc::new(MemoryJobStore::new());
    let healthy = Harness::with_store(
        &[backend("primary")],
        StaticExtractor::new(),
        RecordingPublisher::new(),
        store.clone(),
    );
    let before = healthy.run(request()).await;

    let broken = Arc::new(
        MockBackend::new("broken").failing_always(Capability::GenerateImage, ProviderError::Transient("503".into())),
    );
    let degraded = Harness::with_store(&[broken.clone()], StaticExtractor::new(), RecordingPublisher::new(), store);

    degraded
        .orchestrator
        .regenerate(before.job_id, VariantId::A, RegenerateTarget::Both)
        .await
        .unwrap();
    let after = degraded.settle(before.job_id).await;

    assert_eq!(after.status, JobStatus::Ready);
    let variant = &after.variants[0];
    assert_ne!(variant.text, before.variants[0].text);
    assert_eq!(variant.verdict, Verdict::Pass);
    assert_eq!(variant.stage, VariantStage::Idle);
    assert_eq!(variant.image, before.variants[0].image);
    assert!(variant.last_error.as_deref().unwrap().starts_with("GENERATING_IMAGES failed"));
    assert_eq!(broken.calls(Capability::Moderate), 1);

    // The new text passed and the old image still stands, so A can go out.
    healthy.orchestrator.publish(before.job_id, VariantId::A).await.unwrap();
}

#[tokio::test]
async fn test_regeneration_stamps_new_artifacts_only() {
    let harness = Harness::new(&[backend("primary")]);
    let view = harness.run(request()).await;
    let before = harness.store.get(view.job_id).await.unwrap();

    harness
        .orchestrator
        .regenerate(view.job_id, VariantId::B, RegenerateTarget::Both)
        .await
        .unwrap();
    harness.settle(view.job_id).await;
    let after = harness.store.get(view.job_id).await.unwrap();

    let text_time = |job: &Job, index: usize| job.variants[index].text.as_ref().unwrap().created_at;
    let image_time = |job: &Job, index: usize| job.variants[index].image.as_ref().unwrap().created_at;

    assert!(text_time(&after, 1) > text_time(&before, 1));
    assert!(image_time(&after, 1) > image_time(&before, 1));
    assert_eq!(text_time(&after, 0), text_time(&before, 0));
    assert_eq!(image_time(&after, 0), image_time(&before, 0));
    assert_eq!(after.variants[0], before.variants[0]);
}

#[tokio::test]
async fn test_persisted_statuses_follow_state_machine_edges() {
    init_tracing();
    let store = Arc::new(RecordingJobStore::new());
    let gateway = ProviderGateway::new(as_backends(&[backend("primary")]), gateway_config());
    let orchestrator = OrchestratorBuilder::new(Arc::new(StaticExtractor::new()), gateway)
        .with_store(store.clone())
        .with_publisher(Arc::new(RecordingPublisher::new()))
        .build();

    let accepted = orchestrator.submit(request()).await.unwrap();
    orchestrator.wait_until_settled(accepted.job_id, SETTLE_TIMEOUT).await.unwrap();
    orchestrator
        .regenerate(accepted.job_id, VariantId::A, RegenerateTarget::Text)
        .await
        .unwrap();
    orchestrator.wait_until_settled(accepted.job_id, SETTLE_TIMEOUT).await.unwrap();
    orchestrator.publish(accepted.job_id, VariantId::A).await.unwrap();

    let mut statuses = store.statuses(accepted.job_id).await;
    statuses.dedup();
    info!("Persisted statuses: {:?}", statuses);

    for pair in statuses.windows(2) {
        assert!(pair[0].can_transition_to(pair[1]), "{} -> {} is not an edge", pair[0], pair[1]);
    }
    assert_eq!(
        statuses,
        vec![
            JobStatus::Pending,
            JobStatus::Scraping,
            JobStatus::Summarizing,
            JobStatus::GeneratingText,
            JobStatus::GeneratingImages,
            JobStatus::Moderating,
            JobStatus::Ready,
            JobStatus::Publishing,
            JobStatus::Published,
        ]
    );
}

#[tokio::test]
async fn test_backend_mime_type_is_kept_with_the_image() {
    let primary = Arc::new(MockBackend::new("primary").with_image_mime_type("image/jpeg"));
    let harness = Harness::new(&[primary.clone()]);
    let view = harness.run(request()).await;

    let job = harness.store.get(view.job_id).await.unwrap();
    let image = job.variants[0].image.as_ref().unwrap();
    assert_eq!(image.mime_type, "image/jpeg");
    assert!(image.reference.ends_with(".jpg"));
    assert_eq!(view.variants[0].image.as_ref().unwrap().mime_type, "image/jpeg");

    harness.orchestrator.publish(view.job_id, VariantId::A).await.unwrap();
    let drafts = harness.publisher.drafts().await;
    assert_eq!(drafts[0].image.as_ref().unwrap().mime_type, "image/jpeg");
}

#[tokio::test]
async fn test_flagged_variant_cannot_be_published() {
    let primary = Arc::new(MockBackend::new("primary").with_flagged_terms(["variant b"]));
    let harness = Harness::new(&[primary]);

    let view = harness.run(request()).await;

    assert_eq!(view.status, JobStatus::Ready);
    assert!(view.moderation_warning);
    assert_eq!(view.variants[0].verdict, Verdict::Pass);
    assert_eq!(view.variants[1].verdict, Verdict::Flag);

    let result = harness.orchestrator.publish(view.job_id, VariantId::B).await;
    assert!(matches!(result, Err(PipelineError::Conflict(_))));

    let after = harness.orchestrator.status(view.job_id).await.unwrap();
    assert_eq!(after.status, JobStatus::Ready);
    assert_eq!(after.variants[1].publish_state, PublishState::Unpublished);
    assert!(harness.publisher.drafts().await.is_empty());
}

#[tokio::test]
async fn test_flagged_image_blocks_publishing() {
    let primary = Arc::new(MockBackend::new("primary").flag_images());
    let harness = Harness::new(&[primary]);

    let view = harness.run(request()).await;

    assert!(view.moderation_warning);
    assert_eq!(view.variants[0].verdict, Verdict::Pass);
    assert_eq!(view.variants[0].image.as_ref().unwrap().verdict, Verdict::Flag);
    assert!(matches!(
        harness.orchestrator.publish(view.job_id, VariantId::A).await,
        Err(PipelineError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_publish_sends_text_hashtags_and_image() {
    let harness = Harness::new(&[backend("primary")]);
    let view = harness.run(request()).await;

    let published = harness.orchestrator.publish(view.job_id, VariantId::A).await.unwrap();
    assert_eq!(published.variant, VariantId::A);
    assert_eq!(published.post_id, "urn:li:share:1");
    assert!(published.post_url.ends_with("urn:li:share:1"));

    let drafts = harness.publisher.drafts().await;
    assert_eq!(drafts.len(), 1);
    assert!(drafts[0].text.starts_with("Variant A post"));
    assert!(drafts[0].text.contains("#Leadership"));
    let image = drafts[0].image.as_ref().expect("image is attached");
    assert!(image.bytes.starts_with(b"mock-image-primary"));
    assert_eq!(image.alt_text.as_deref(), Some("Illustration of the article topic"));

    let after = harness.orchestrator.status(view.job_id).await.unwrap();
    assert_eq!(after.status, JobStatus::Published);
    assert_eq!(after.variants[0].publish_state, PublishState::Published);
    assert_eq!(after.variants[0].post_url.as_deref(), Some(published.post_url.as_str()));
    assert_eq!(after.variants[1].publish_state, PublishState::Unpublished);

    assert!(matches!(
        harness.orchestrator.publish(view.job_id, VariantId::B).await,
        Err(PipelineError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_rejected_publish_fails_only_the_variant() {
    let harness = Harness::with_parts(
        &[backend("primary")],
        StaticExtractor::new(),
        RecordingPublisher::failing(PublishError::Rejected("duplicate post".into())),
    );
    let view = harness.run(request()).await;

    let result = harness.orchestrator.publish(view.job_id, VariantId::A).await;
    assert!(matches!(result, Err(PipelineError::Publish(PublishError::Rejected(_)))));
    assert_eq!(harness.publisher.drafts().await.len(), 1);

    let after = harness.orchestrator.status(view.job_id).await.unwrap();
    assert_eq!(after.status, JobStatus::Ready);
    assert!(after.error.is_none());
    assert_eq!(after.variants[0].publish_state, PublishState::Failed);
    assert!(after.variants[0].last_error.as_deref().unwrap().contains("duplicate post"));
    assert_eq!(after.variants[1].publish_state, PublishState::Unpublished);

    let job = harness.store.get(view.job_id).await.unwrap();
    let error = job.variants[0].last_error.as_ref().unwrap();
    assert_eq!(error.stage, JobStatus::Publishing);
    assert_eq!(error.backend.as_deref(), Some("recording"));
}

#[tokio::test]
async fn test_auth_failure_on_one_variant_leaves_the_other_publishable() {
    let harness = Harness::with_parts(
        &[backend("primary")],
        StaticExtractor::new(),
        RecordingPublisher::failing_once(PublishError::Auth("expired token".into())),
    );
    let view = harness.run(request()).await;

    let result = harness.orchestrator.publish(view.job_id, VariantId::A).await;
    assert!(matches!(result, Err(PipelineError::Publish(PublishError::Auth(_)))));
    // Auth errors are not retried.
    assert_eq!(harness.publisher.drafts().await.len(), 1);

    let published = harness.orchestrator.publish(view.job_id, VariantId::B).await.unwrap();
    assert_eq!(published.variant, VariantId::B);

    let after = harness.orchestrator.status(view.job_id).await.unwrap();
    assert_eq!(after.status, JobStatus::Published);
    assert_eq!(after.variants[0].publish_state, PublishState::Failed);
    assert_eq!(after.variants[1].publish_state, PublishState::Published);
    assert_eq!(after.variants[1].post_url.as_deref(), Some(published.post_url.as_str()));
}

#[tokio::test]
async fn test_failed_variant_can_be_published_again() {
    let harness = Harness::with_parts(
        &[backend("primary")],
        StaticExtractor::new(),
        RecordingPublisher::failing_once(PublishError::Auth("expired token".into())),
    );
    let view = harness.run(request()).await;

    assert!(harness.orchestrator.publish(view.job_id, VariantId::A).await.is_err());
    harness.orchestrator.publish(view.job_id, VariantId::A).await.unwrap();

    let after = harness.orchestrator.status(view.job_id).await.unwrap();
    assert_eq!(after.status, JobStatus::Published);
    assert_eq!(after.variants[0].publish_state, PublishState::Published);
    assert!(after.variants[0].last_error.is_none());
}

#[tokio::test]
async fn test_rate_limited_publish_is_retried_within_bounds() {
    let harness = Harness::with_parts(
        &[backend("primary")],
        StaticExtractor::new(),
        RecordingPublisher::failing(PublishError::RateLimited {
            message: "429".into(),
            retry_after: None,
        }),
    );
    let view = harness.run(request()).await;

    let result = harness.orchestrator.publish(view.job_id, VariantId::A).await;

    assert!(matches!(result, Err(PipelineError::Publish(PublishError::RateLimited { .. }))));
    // max_attempts is 2 in the harness
    assert_eq!(harness.publisher.drafts().await.len(), 2);
}

#[tokio::test]
async fn test_edited_text_is_remoderated() {
    let primary = Arc::new(MockBackend::new("primary").with_flagged_terms(["guaranteed returns"]));
    let harness = Harness::new(&[primary]);
    let view = harness.run(request()).await;

    harness
        .orchestrator
        .edit_text(view.job_id, VariantId::A, "  Distributed teams need better rituals, not more meetings.  ")
        .await
        .unwrap();
    let edited = harness.settle(view.job_id).await;

    let variant = &edited.variants[0];
    assert_eq!(variant.text.as_deref(), Some("Distributed teams need better rituals, not more meetings."));
    assert_eq!(variant.text_origin, Some(TextOrigin::Edited));
    assert_eq!(variant.hashtags, view.variants[0].hashtags);
    assert_eq!(variant.verdict, Verdict::Pass);
    assert_eq!(edited.variants[1], view.variants[1]);

    harness
        .orchestrator
        .edit_text(view.job_id, VariantId::A, "Guaranteed returns if you go remote today!")
        .await
        .unwrap();
    let flagged = harness.settle(view.job_id).await;

    assert_eq!(flagged.variants[0].verdict, Verdict::Flag);
    assert!(matches!(
        harness.orchestrator.publish(view.job_id, VariantId::A).await,
        Err(PipelineError::Conflict(_))
    ));

    assert!(matches!(
        harness.orchestrator.edit_text(view.job_id, VariantId::A, "   ").await,
        Err(PipelineError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_cancel_stops_a_running_job() {
    let slow = Arc::new(MockBackend::new("slow").with_delay(Duration::from_millis(200)));
    let harness = Harness::new(&[slow]);

    let accepted = harness.orchestrator.submit(request()).await.unwrap();
    let cancelled = harness.orchestrator.cancel(accepted.job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    tokio::time::sleep(Duration::from_millis(600)).await;

    let after = harness.orchestrator.status(accepted.job_id).await.unwrap();
    assert_eq!(after.status, JobStatus::Cancelled);
    assert!(after.variants.iter().all(|variant| variant.text.is_none()));

    assert!(matches!(
        harness.orchestrator.cancel(accepted.job_id).await,
        Err(PipelineError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_ready_job_cannot_be_cancelled() {
    let harness = Harness::new(&[backend("primary")]);
    let view = harness.run(request()).await;

    assert!(matches!(
        harness.orchestrator.cancel(view.job_id).await,
        Err(PipelineError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_optional_image_failure_still_reaches_ready() {
    let primary = Arc::new(MockBackend::new("primary").failing_always(
        Capability::GenerateImage,
        ProviderError::Unsupported(Capability::GenerateImage),
    ));
    let harness = Harness::new(&[primary]);

    let mut optional = request();
    optional.image_options = ImageOptions {
        required: false,
        ..ImageOptions::default()
    };
    let view = harness.run(optional).await;

    assert_eq!(view.status, JobStatus::Ready);
    for variant in &view.variants {
        assert!(variant.image.is_none());
        assert!(variant.last_error.is_some());
        assert_eq!(variant.verdict, Verdict::Pass);
    }

    harness.orchestrator.publish(view.job_id, VariantId::A).await.unwrap();
    let drafts = harness.publisher.drafts().await;
    assert!(drafts[0].image.is_none());
}

#[tokio::test]
async fn test_required_image_failure_fails_the_job() {
    let primary = Arc::new(MockBackend::new("primary").failing_always(
        Capability::GenerateImage,
        ProviderError::Unsupported(Capability::GenerateImage),
    ));
    let harness = Harness::new(&[primary]);

    let view = harness.run(request()).await;

    assert_eq!(view.status, JobStatus::Failed);
    let error = view.error.unwrap();
    assert_eq!(error.stage, JobStatus::GeneratingImages);
    assert_eq!(error.capability, Some(Capability::GenerateImage));
    assert!(view.variants.iter().all(|variant| variant.text.is_some()));
}

#[tokio::test]
async fn test_resume_continues_from_persisted_stage() {
    let store = Arc::new(MemoryJobStore::new());
    let mut job = Job::new(JobInput::from(request()), 2);
    job.status = JobStatus::Summarizing;
    job.article = Some(article());
    store.create(&job).await.unwrap();

    let harness = Harness::with_store(
        &[backend("primary")],
        StaticExtractor::new(),
        RecordingPublisher::new(),
        store,
    );

    let resumed = harness.orchestrator.resume_incomplete().await.unwrap();
    assert_eq!(resumed, 1);

    let view = harness.settle(job.id).await;
    assert_eq!(view.status, JobStatus::Ready);
    assert_eq!(harness.extractor.calls(), 0);
    assert!(harness.store.get(job.id).await.unwrap().summary.is_some());
}

#[tokio::test]
async fn test_concurrent_jobs_all_complete() {
    let harness = Harness::new(&[backend("primary")]);

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(harness.orchestrator.submit(request()).await.unwrap().job_id);
    }
    for id in &ids {
        assert_eq!(harness.settle(*id).await.status, JobStatus::Ready);
    }

    let ready = harness
        .orchestrator
        .list(&post_pipeline::JobFilter::with_status(JobStatus::Ready))
        .await
        .unwrap();
    assert_eq!(ready.len(), 5);
}

#[tokio::test]
async fn test_pipeline_on_sqlite_store() {
    init_tracing();
    let store = Arc::new(SqliteJobStore::in_memory().await.unwrap());
    let gateway = post_pipeline::ProviderGateway::new(as_backends(&[backend("primary")]), gateway_config());
    let orchestrator = post_pipeline::OrchestratorBuilder::new(Arc::new(StaticExtractor::new()), gateway)
        .with_store(store.clone())
        .build();

    let accepted = orchestrator.submit(request()).await.unwrap();
    let view = orchestrator.wait_until_settled(accepted.job_id, SETTLE_TIMEOUT).await.unwrap();

    assert_eq!(view.status, JobStatus::Ready);
    let stored = store.get(accepted.job_id).await.unwrap();
    assert!(stored.version > 5);
    assert!(stored.variants.iter().all(|variant| variant.image.is_some()));
}
