//! Action log: step lifecycle and structured step logs.
//!
//! Steps are created Running and move to a terminal status exactly once.
//! Log appends are best effort: a failed append is reported through
//! `tracing` and never fails the stage that produced it.

use appforge_core::{ActionId, Error, LogLevel, Result, Step, StepId, StepName, StepStatus};
use appforge_db::{ActionRepo, DbError};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

/// Handle to the action log store.
#[derive(Clone)]
pub struct ActionLog {
    repo: Arc<dyn ActionRepo>,
}

impl ActionLog {
    pub fn new(repo: Arc<dyn ActionRepo>) -> Self {
        Self { repo }
    }

    /// Create a Running step on an existing action.
    pub async fn begin_step(
        &self,
        action_id: ActionId,
        name: StepName,
        message: &str,
    ) -> Result<Step> {
        self.repo
            .create_step(action_id, name, message)
            .await
            .map_err(|e| match e {
                DbError::NotFound(_) => Error::ActionNotFound(action_id),
                other => other.into(),
            })
    }

    pub async fn log_info(&self, step_id: StepId, message: &str, meta: Option<serde_json::Value>) {
        self.log(
            step_id,
            LogLevel::Info,
            message,
            meta.unwrap_or(serde_json::Value::Null),
        )
        .await;
    }

    /// Append a log line to a step.
    pub async fn log(
        &self,
        step_id: StepId,
        level: LogLevel,
        message: &str,
        meta: serde_json::Value,
    ) {
        if let Err(e) = self.repo.append_log(step_id, level, message, meta).await {
            warn!(step_id = %step_id, error = %e, "Failed to append step log");
        }
    }

    /// Move a Running step to a terminal status.
    pub async fn complete(&self, step_id: StepId, status: StepStatus) -> Result<Step> {
        if !status.is_terminal() {
            let current = self.repo.get_step(step_id).await.map_err(step_error(step_id))?;
            return Err(Error::InvalidStepTransition {
                step: step_id,
                from: current.status,
                to: status,
            });
        }
        self.repo
            .complete_step(step_id, status)
            .await
            .map_err(step_error(step_id))
    }

    /// Run `work` as one step of an action.
    ///
    /// The step is created Running and handed to `work`. When `work` returns
    /// `Ok` the step is marked Succeeded, unless `work` completed it already
    /// or detached it. When `work` fails or panics, the error is logged into
    /// the step and the step is marked Failed; the error is then returned if
    /// `final_step` is set and swallowed (`Ok(None)`) otherwise.
    pub async fn run<T, F, Fut>(
        &self,
        action_id: ActionId,
        name: StepName,
        message: &str,
        work: F,
        final_step: bool,
    ) -> Result<Option<T>>
    where
        F: FnOnce(StepContext) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let step = self.begin_step(action_id, name, message).await?;
        let ctx = StepContext {
            step_id: step.id,
            name,
            log: self.clone(),
            detached: Arc::new(AtomicBool::new(false)),
        };

        let outcome = AssertUnwindSafe(work(ctx.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::StageFailed(panic_message(panic))));

        match outcome {
            Ok(value) => {
                if !ctx.is_detached() {
                    self.finish(step.id, StepStatus::Succeeded).await;
                }
                Ok(Some(value))
            }
            Err(err) => {
                error!(action_id = %action_id, step = %name, error = %err, "Step failed");
                self.log(step.id, LogLevel::Error, &err.to_string(), serde_json::Value::Null)
                    .await;
                self.finish(step.id, StepStatus::Failed).await;
                if final_step { Err(err) } else { Ok(None) }
            }
        }
    }

    /// Complete a step at the end of `run`; a step `work` already completed
    /// keeps its status.
    async fn finish(&self, step_id: StepId, status: StepStatus) {
        match self.complete(step_id, status).await {
            Ok(_) | Err(Error::InvalidStepTransition { .. }) => {}
            Err(e) => warn!(step_id = %step_id, error = %e, "Failed to complete step"),
        }
    }
}

fn step_error(step_id: StepId) -> impl Fn(DbError) -> Error {
    move |e| match e {
        DbError::NotFound(_) => Error::StepNotFound(step_id.to_string()),
        other => other.into(),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("stage panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("stage panicked: {s}")
    } else {
        "stage panicked".to_string()
    }
}

/// The step a unit of work runs in.
#[derive(Clone)]
pub struct StepContext {
    step_id: StepId,
    name: StepName,
    log: ActionLog,
    detached: Arc<AtomicBool>,
}

impl StepContext {
    pub fn id(&self) -> StepId {
        self.step_id
    }

    pub fn name(&self) -> StepName {
        self.name
    }

    pub async fn info(&self, message: impl AsRef<str>) {
        self.log
            .log(
                self.step_id,
                LogLevel::Info,
                message.as_ref(),
                serde_json::Value::Null,
            )
            .await;
    }

    pub async fn log(&self, level: LogLevel, message: impl AsRef<str>, meta: serde_json::Value) {
        self.log
            .log(self.step_id, level, message.as_ref(), meta)
            .await;
    }

    /// Complete the step from inside the work.
    pub async fn complete(&self, status: StepStatus) -> Result<Step> {
        self.log.complete(self.step_id, status).await
    }

    /// Leave the step Running when the work returns; something else will
    /// complete it later.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("step_id", &self.step_id)
            .field("name", &self.name)
            .field("detached", &self.is_detached())
            .finish()
    }
}
