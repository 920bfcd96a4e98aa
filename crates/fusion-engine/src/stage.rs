//! Running blocking stages from async code.

use tokio::sync::oneshot;

use stackfuse_common::error::{FocusError, FocusResult};

/// Run `work` on the blocking thread pool and await its single result.
///
/// The calling task yields while the stage runs, so the runtime keeps
/// serving other tasks (such as a Ctrl-C listener that sets the cancel flag).
/// The stage reports back through a oneshot channel: exactly one completion,
/// or an error if the stage died without producing one.
pub async fn run_blocking_stage<T, F>(name: &'static str, work: F) -> FocusResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> FocusResult<T> + Send + 'static,
{
    let (done_tx, done_rx) = oneshot::channel();
    let _detached = tokio::task::spawn_blocking(move || {
        let _span = tracing::debug_span!("stage", stage = name).entered();
        let _ = done_tx.send(work());
    });

    match done_rx.await {
        Ok(result) => result,
        Err(_) => Err(FocusError::Other(anyhow::anyhow!(
            "{name} stage ended without reporting a result"
        ))),
    }
}
