pub mod http;
pub mod organize;
pub mod services;
pub mod validate;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::db::QueueStore;
use crate::error::{JobError, StorageError};
use crate::execution_log::{ExecutionLog, PhaseEnd};
use crate::models::{Phase, QueueEntry};
use crate::retry::RetryScheduler;

use services::{Assets, Collaborators, Configuration, Content, GenerationParams, Published, Structure};

/// Phase output summary written to the execution log.
pub type PhaseResult = Result<Value, JobError>;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound for a single phase, collaborator calls included.
    pub phase_timeout: Duration,
    /// Allowed deviation from `target_word_count`, as a fraction.
    pub word_count_tolerance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            phase_timeout: Duration::from_secs(300),
            word_count_tolerance: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    RetryableFailure,
    FatalFailure,
    /// Operator cancellation observed between phases.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub failed_phase: Option<Phase>,
    pub error: Option<JobError>,
    pub published: Option<Published>,
}

impl PipelineResult {
    fn success(published: Published) -> Self {
        Self {
            status: PipelineStatus::Success,
            failed_phase: None,
            error: None,
            published: Some(published),
        }
    }

    fn failed(phase: Phase, error: JobError) -> Self {
        let status = if RetryScheduler::is_retryable(error.kind()) {
            PipelineStatus::RetryableFailure
        } else {
            PipelineStatus::FatalFailure
        };
        Self {
            status,
            failed_phase: Some(phase),
            error: Some(error),
            published: None,
        }
    }

    fn cancelled(before: Phase) -> Self {
        Self {
            status: PipelineStatus::Cancelled,
            failed_phase: Some(before),
            error: None,
            published: None,
        }
    }
}

/// Values handed from one phase to the next.
#[derive(Default)]
struct PipelineContext {
    params: Option<GenerationParams>,
    configuration: Option<Configuration>,
    structure: Option<Structure>,
    content: Option<Content>,
    assets: Option<Assets>,
    published: Option<Published>,
}

fn require<'a, T>(value: &'a Option<T>, what: &str) -> Result<&'a T, JobError> {
    value
        .as_ref()
        .ok_or_else(|| JobError::Unclassified(format!("{what} missing from earlier phase")))
}

/// Runs the fixed phase sequence for one claimed entry. Never retries by itself.
pub struct PipelineRunner {
    services: Collaborators,
    log: ExecutionLog,
    store: Arc<dyn QueueStore>,
    config: PipelineConfig,
}

impl PipelineRunner {
    pub fn new(
        services: Collaborators,
        log: ExecutionLog,
        store: Arc<dyn QueueStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            services,
            log,
            store,
            config,
        }
    }

    /// Execute all phases from the start. Stops at the first failure.
    /// Only storage failures are returned as `Err`.
    pub async fn run(&self, entry: &QueueEntry) -> Result<PipelineResult, StorageError> {
        let mut ctx = PipelineContext::default();

        for phase in Phase::ORDER {
            if self.store.is_cancel_requested(entry.id).await? {
                tracing::info!("Entry {} cancelled before {phase}", entry.id);
                self.log
                    .record_error(
                        entry.id,
                        "cancelled by operator",
                        Some(json!({ "before_phase": phase })),
                    )
                    .await?;
                return Ok(PipelineResult::cancelled(phase));
            }

            self.log
                .record_phase_start(
                    entry.id,
                    phase,
                    Some(json!({ "attempt": entry.attempt_count })),
                )
                .await?;

            let started = Instant::now();
            let result = match tokio::time::timeout(
                self.config.phase_timeout,
                self.execute(phase, entry, &mut ctx),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(JobError::TransientService(format!(
                    "{phase} phase timed out after {}s",
                    self.config.phase_timeout.as_secs()
                ))),
            };
            let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

            match result {
                Ok(output) => {
                    self.log
                        .record_phase_end(entry.id, phase, duration_ms, PhaseEnd::Output(&output))
                        .await?;
                }
                Err(err) => {
                    tracing::debug!("Entry {} failed in {phase}: {err}", entry.id);
                    self.log
                        .record_phase_end(entry.id, phase, duration_ms, PhaseEnd::Error(&err))
                        .await?;
                    return Ok(PipelineResult::failed(phase, err));
                }
            }
        }

        match ctx.published {
            Some(published) => Ok(PipelineResult::success(published)),
            None => Ok(PipelineResult::failed(
                Phase::Publish,
                JobError::Unclassified("publish produced no result".into()),
            )),
        }
    }

    async fn execute(&self, phase: Phase, entry: &QueueEntry, ctx: &mut PipelineContext) -> PhaseResult {
        match phase {
            Phase::Validate => {
                let params = validate::parse_params(&entry.payload)?;
                let configuration = self
                    .services
                    .configurations
                    .get_configuration(entry.configuration_id)
                    .await?;
                if !configuration.enabled {
                    return Err(JobError::Configuration(format!(
                        "configuration '{}' is disabled",
                        configuration.name
                    )));
                }

                let output = json!({
                    "topic": params.topic,
                    "target_word_count": params.target_word_count,
                    "configuration": configuration.name,
                });
                ctx.params = Some(params);
                ctx.configuration = Some(configuration);
                Ok(output)
            }
            Phase::Structure => {
                let params = require(&ctx.params, "parameters")?;
                let structure = self.services.generation.generate_structure(params).await?;
                if structure.sections.is_empty() {
                    return Err(JobError::Validation("structure has no sections".into()));
                }

                let output = json!({
                    "title": structure.title,
                    "sections": structure.sections.len(),
                });
                ctx.structure = Some(structure);
                Ok(output)
            }
            Phase::Content => {
                let params = require(&ctx.params, "parameters")?;
                let structure = require(&ctx.structure, "structure")?;
                let generation = &self.services.generation;

                let mut content = generation.generate_content(structure, params).await?;
                let mut regenerated = false;

                if let Some(target) = params.target_word_count {
                    let tolerance = self.config.word_count_tolerance;
                    if !validate::within_tolerance(content.word_count(), target, tolerance) {
                        tracing::info!(
                            "Entry {}: {} words against target {target}, regenerating once",
                            entry.id,
                            content.word_count()
                        );
                        content = generation.generate_content(structure, params).await?;
                        regenerated = true;

                        if !validate::within_tolerance(content.word_count(), target, tolerance) {
                            return Err(JobError::Validation(format!(
                                "content has {} words, target {target} (tolerance {:.0}%)",
                                content.word_count(),
                                tolerance * 100.0
                            )));
                        }
                    }
                }

                if content.body.trim().is_empty() {
                    return Err(JobError::Validation("generated content is empty".into()));
                }

                let output = json!({
                    "words": content.word_count(),
                    "regenerated": regenerated,
                });
                ctx.content = Some(content);
                Ok(output)
            }
            Phase::Assets => {
                let content = require(&ctx.content, "content")?;
                let assets = self.services.assets.generate_assets(content).await?;

                let output = json!({ "assets": assets.items.len() });
                ctx.assets = Some(assets);
                Ok(output)
            }
            Phase::Organize => {
                let params = require(&ctx.params, "parameters")?;
                let (Some(content), Some(assets)) = (ctx.content.as_mut(), ctx.assets.as_mut())
                else {
                    return Err(JobError::Unclassified(
                        "content or assets missing from earlier phase".into(),
                    ));
                };
                organize::organize(content, assets, params);

                Ok(json!({
                    "slug": content.slug,
                    "tags": content.tags,
                }))
            }
            Phase::Publish => {
                let content = require(&ctx.content, "content")?;
                let assets = require(&ctx.assets, "assets")?;
                let configuration = require(&ctx.configuration, "configuration")?;
                let published = self
                    .services
                    .publishing
                    .publish(content, assets, &configuration.target)
                    .await?;

                let output = json!({
                    "external_id": published.external_id,
                    "url": published.url,
                });
                ctx.published = Some(published);
                Ok(output)
            }
        }
    }
}
