//! Stage collaborator trait
//!
//! A collaborator is the external call a stage is bound to. The executor
//! drives collaborators through this trait only, so a VCS client, a build
//! tool or a headless browser all look the same to it.

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::context::{StageOutput, WorkingContext};
use crate::error::StageError;

/// The external call bound to a stage
///
/// Implementations that can be interrupted should watch `cancel` and return
/// [`StageError::Cancelled`] once it fires. Implementations that ignore it
/// simply run the current attempt to completion.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn run(
        &self,
        ctx: &WorkingContext,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError>;
}

/// Collaborator backed by an async closure
///
/// The closure receives its own copy of the working context and cannot be
/// interrupted mid-call.
pub struct FnCollaborator<F> {
    f: F,
}

/// Wraps an async closure as a collaborator
pub fn from_fn<F, Fut>(f: F) -> FnCollaborator<F>
where
    F: Fn(WorkingContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageOutput, StageError>> + Send,
{
    FnCollaborator { f }
}

#[async_trait]
impl<F, Fut> Collaborator for FnCollaborator<F>
where
    F: Fn(WorkingContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageOutput, StageError>> + Send,
{
    async fn run(
        &self,
        ctx: &WorkingContext,
        _cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError> {
        (self.f)(ctx.clone()).await
    }
}

/// Races a collaborator future against cancellation
///
/// Dropping the future is the interruption signal; anything it owns (child
/// processes spawned with `kill_on_drop`, open connections) is released.
pub async fn interruptible<T, Fut>(
    cancel: &CancellationToken,
    fut: Fut,
) -> Result<T, StageError>
where
    Fut: Future<Output = Result<T, StageError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StageError::Cancelled),
        result = fut => result,
    }
}
