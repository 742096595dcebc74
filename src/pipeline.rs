//! Per-message orchestration: identify, load, augment, invoke, decide,
//! dispatch, checkpoint.
//!
//! A batch is a set of independent units of work. Units run concurrently
//! across distinct conversations; two units hitting the same conversation
//! are serialized by the checkpoint store's optimistic versioning, which is
//! the single point of truth for that guarantee. A unit's failure is
//! reported for its item only and never aborts its siblings.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::Config;
use crate::dispatch::{ExecutionInput, RoutingDecision, WorkflowTrigger};
use crate::error::{CheckpointError, DispatchError, Error, IdentityError};
use crate::history::{self, ChatMessage, ChatRole};
use crate::identity::IdentityStore;
use crate::llm::{ParsedDecision, Reasoner, parse_decision};
use crate::prompts::PromptEngine;
use crate::{InboundItem, InboundMessage, ProfileId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Max whole-cycle retries when a checkpoint save loses an optimistic race.
const MAX_CONFLICT_RETRIES: usize = 3;

/// Max attempts for an operation failing with a transient store error.
const MAX_TRANSIENT_ATTEMPTS: usize = 3;

/// Base delay for exponential backoff between transient retries (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 200;

/// Pipeline stage, used to attribute failures to where they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Identify,
    LoadState,
    Augment,
    Invoke,
    Decide,
    Dispatch,
    Checkpoint,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Identify => "identify",
            Stage::LoadState => "load_state",
            Stage::Augment => "augment",
            Stage::Invoke => "invoke",
            Stage::Decide => "decide",
            Stage::Dispatch => "dispatch",
            Stage::Checkpoint => "checkpoint",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal status of one unit of work.
#[derive(Debug)]
pub enum UnitStatus {
    Completed {
        execution_id: String,
        committed_version: i64,
    },
    /// Expected conditions — a malformed item or an unregistered user — not
    /// faults.
    Skipped { reason: String },
    Failed { stage: Stage, error: Error },
}

/// Per-item outcome of a batch run, in the batch's original order.
#[derive(Debug)]
pub struct UnitOutcome {
    pub index: usize,
    pub status: UnitStatus,
}

/// Outcome report for one batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.count(|status| matches!(status, UnitStatus::Completed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|status| matches!(status, UnitStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, UnitStatus::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&UnitStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}

/// A cycle failure, tagged with the stage it happened in.
struct CycleError {
    stage: Stage,
    error: Error,
}

/// The orchestration pipeline. Holds every collaborator behind its
/// capability interface; construct once per process or batch scope.
pub struct Pipeline<R, W> {
    identity: IdentityStore,
    checkpoints: Arc<CheckpointStore>,
    reasoner: Arc<R>,
    workflow: Arc<W>,
    prompts: Arc<PromptEngine>,
    config: Arc<Config>,
}

impl<R, W> Clone for Pipeline<R, W> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            checkpoints: Arc::clone(&self.checkpoints),
            reasoner: Arc::clone(&self.reasoner),
            workflow: Arc::clone(&self.workflow),
            prompts: Arc::clone(&self.prompts),
            config: Arc::clone(&self.config),
        }
    }
}

impl<R, W> Pipeline<R, W>
where
    R: Reasoner + 'static,
    W: WorkflowTrigger + 'static,
{
    pub fn new(
        identity: IdentityStore,
        checkpoints: Arc<CheckpointStore>,
        reasoner: Arc<R>,
        workflow: Arc<W>,
        prompts: Arc<PromptEngine>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            identity,
            checkpoints,
            reasoner,
            workflow,
            prompts,
            config,
        }
    }

    /// Process a batch of inbound items concurrently under one deadline.
    ///
    /// Outcomes come back in the batch's original order. Units still waiting
    /// on the reasoner at the deadline are cancelled cooperatively and
    /// reported as failures for their item only.
    pub async fn run_batch(&self, items: Vec<InboundItem>, deadline: Duration) -> BatchReport {
        let deadline_at = Instant::now() + deadline;
        let mut join_set = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let pipeline = self.clone();
            join_set.spawn(async move {
                let status = pipeline.run_unit(item, deadline_at).await;
                UnitOutcome { index, status }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => tracing::error!(%error, "unit task panicked"),
            }
        }
        outcomes.sort_by_key(|outcome| outcome.index);

        let report = BatchReport { outcomes };
        tracing::info!(
            completed = report.completed(),
            skipped = report.skipped(),
            failed = report.failed(),
            "batch processed"
        );
        report
    }

    #[tracing::instrument(skip_all)]
    async fn run_unit(&self, item: InboundItem, deadline_at: Instant) -> UnitStatus {
        let message = match item.validate() {
            Ok(message) => message,
            Err(field) => {
                tracing::warn!(field, "skipping item with missing field");
                return UnitStatus::Skipped {
                    reason: format!("missing field: {field}"),
                };
            }
        };

        let profile_id = match self
            .with_transient_retry(Stage::Identify, || self.identity.resolve(&message.from))
            .await
        {
            Ok(Some(profile_id)) => profile_id,
            Ok(None) => {
                // An unregistered user is an expected condition, not a fault.
                tracing::info!(user_id = %message.from, "no profile found, skipping");
                return UnitStatus::Skipped {
                    reason: format!("no profile for user {}", message.from),
                };
            }
            Err(cycle) => {
                tracing::error!(user_id = %message.from, error = %cycle.error, "identity resolution failed");
                return UnitStatus::Failed { stage: cycle.stage, error: cycle.error };
            }
        };

        let bindings = match self
            .with_transient_retry(Stage::Identify, || self.identity.bindings(&profile_id))
            .await
        {
            Ok(bindings) => bindings,
            Err(cycle) => {
                tracing::error!(thread_id = %profile_id, error = %cycle.error, "binding lookup failed");
                return UnitStatus::Failed { stage: cycle.stage, error: cycle.error };
            }
        };

        let system_prompt = match self.prompts.render_router(
            &message.channel_type,
            &bindings,
            &self.config.dispatch.default_agent,
        ) {
            Ok(prompt) => prompt,
            Err(error) => return UnitStatus::Failed { stage: Stage::Augment, error },
        };

        // The whole load-mutate-save cycle reruns when a save loses the
        // optimistic race; the workflow engine dedups re-dispatches on
        // execution input.
        let mut conflict_retries = 0;
        loop {
            match self
                .run_cycle(&message, &profile_id, &system_prompt, deadline_at)
                .await
            {
                Ok(status) => return status,
                Err(cycle) => {
                    if is_conflict(&cycle.error) && conflict_retries < MAX_CONFLICT_RETRIES {
                        conflict_retries += 1;
                        tracing::debug!(
                            thread_id = %profile_id,
                            attempt = conflict_retries,
                            "checkpoint conflict, rerunning cycle"
                        );
                        continue;
                    }
                    tracing::error!(
                        thread_id = %profile_id,
                        stage = %cycle.stage,
                        error = %cycle.error,
                        "unit failed"
                    );
                    return UnitStatus::Failed { stage: cycle.stage, error: cycle.error };
                }
            }
        }
    }

    /// One load-mutate-save cycle: load, augment, invoke, decide, dispatch,
    /// save. A conflict on save surfaces to the caller, which owns the
    /// bounded whole-cycle retry.
    async fn run_cycle(
        &self,
        message: &InboundMessage,
        profile_id: &ProfileId,
        system_prompt: &str,
        deadline_at: Instant,
    ) -> std::result::Result<UnitStatus, CycleError> {
        let checkpoint = self
            .with_transient_retry(Stage::LoadState, || self.checkpoints.load(profile_id))
            .await?;
        let base_version = checkpoint.version;

        // Augment: system prompt at position 0, inbound message appended,
        // then prune so the reasoner never sees more than prune_trigger
        // messages.
        let mut messages = checkpoint.messages;
        let system = ChatMessage::system(system_prompt);
        match messages.first() {
            Some(first) if first.role == ChatRole::System => messages[0] = system,
            _ => messages.insert(0, system),
        }
        messages.push(ChatMessage::human(&message.text));
        let limits = self.config.history;
        let mut messages = history::prune(messages, limits.min_keep, limits.prune_trigger);

        let reply = match tokio::time::timeout_at(
            deadline_at,
            self.reasoner.invoke(system_prompt, &messages),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                return Err(CycleError {
                    stage: Stage::Invoke,
                    error,
                });
            }
            Err(_) => {
                // Cooperative cancellation: the invocation is abandoned and
                // nothing gets persisted for this unit.
                return Err(CycleError {
                    stage: Stage::Invoke,
                    error: anyhow::anyhow!("batch deadline reached while waiting on the reasoner")
                        .into(),
                });
            }
        };

        let next_agent = match parse_decision(&reply.content) {
            ParsedDecision::Parsed { agent_name } => agent_name,
            ParsedDecision::Unparseable => {
                tracing::warn!(
                    thread_id = %profile_id,
                    "unparseable reasoner reply, falling back to default target"
                );
                self.config.dispatch.default_agent.clone()
            }
        };

        let decision = RoutingDecision {
            next_agent,
            message: message.text.clone(),
            thread_id: profile_id.clone(),
            channel_type: message.channel_type.clone(),
            from: message.from.clone(),
        };
        let input = ExecutionInput::from(decision);

        let handle = self
            .with_transient_retry(Stage::Dispatch, || self.workflow.start_execution(&input))
            .await?;

        messages.push(ChatMessage::agent(&reply.content));
        let updated = Checkpoint {
            thread_id: profile_id.clone(),
            messages,
            version: base_version,
        };
        let committed_version = self
            .with_transient_retry(Stage::Checkpoint, || self.checkpoints.save(&updated))
            .await?;

        tracing::info!(
            thread_id = %profile_id,
            execution_id = %handle.execution_id,
            nextagent = %input.nextagent,
            committed_version,
            "message routed"
        );

        Ok(UnitStatus::Completed {
            execution_id: handle.execution_id,
            committed_version,
        })
    }

    /// Run an operation, retrying transient store failures with exponential
    /// backoff. Anything non-transient (including a version conflict) is
    /// returned immediately.
    async fn with_transient_retry<T, F, Fut>(
        &self,
        stage: Stage,
        operation: F,
    ) -> std::result::Result<T, CycleError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..MAX_TRANSIENT_ATTEMPTS {
            if attempt > 0 {
                let delay_ms = RETRY_BASE_DELAY_MS * 2u64.pow((attempt - 1) as u32);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if is_transient(&error) => {
                    tracing::warn!(stage = %stage, attempt = attempt + 1, %error, "transient store error");
                    last_error = Some(error);
                }
                Err(error) => return Err(CycleError { stage, error }),
            }
        }

        Err(CycleError {
            stage,
            error: last_error
                .unwrap_or_else(|| anyhow::anyhow!("transient retries exhausted").into()),
        })
    }
}

fn is_transient(error: &Error) -> bool {
    match error {
        Error::Identity(IdentityError::Unavailable(_)) => true,
        Error::Checkpoint(checkpoint_error) => checkpoint_error.is_transient(),
        Error::Dispatch(DispatchError::Request(_)) => true,
        _ => false,
    }
}

fn is_conflict(error: &Error) -> bool {
    matches!(error, Error::Checkpoint(CheckpointError::Conflict { .. }))
}
