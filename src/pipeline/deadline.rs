//! Caller-supplied deadlines for model calls.
//!
//! With a deadline the call runs on a helper thread and the caller waits on
//! a channel. When the deadline passes the caller gets `RagError::Timeout`
//! straight away; the helper finishes in the background and its result is
//! discarded. Nothing is retried here.

use crate::error::{RagError, RagResult, Service};
use crossbeam_channel::{RecvTimeoutError, bounded};
use std::time::Duration;

/// Per-call deadlines. `None` waits as long as the call takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub embedding: Option<Duration>,
    pub rerank: Option<Duration>,
}

impl Timeouts {
    pub fn from_settings(settings: &crate::Settings) -> Self {
        Self {
            embedding: settings.embedding.timeout(),
            rerank: settings.rerank.timeout(),
        }
    }
}

pub(crate) fn run_with_deadline<T, F>(
    service: Service,
    timeout: Option<Duration>,
    call: F,
) -> RagResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> RagResult<T> + Send + 'static,
{
    let Some(timeout) = timeout else {
        return call();
    };

    let (sender, receiver) = bounded(1);
    std::thread::Builder::new()
        .name(format!("qarag-{service}").replace(' ', "-"))
        .spawn(move || {
            // The receiver is gone once the caller timed out
            let _ = sender.send(call());
        })
        .map_err(|e| RagError::external(service, format!("failed to start worker: {e}")))?;

    match receiver.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(%service, timeout_ms = timeout.as_millis() as u64, "call timed out");
            Err(RagError::Timeout {
                service,
                after: timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(RagError::external(service, "worker stopped without a result"))
        }
    }
}
