use std::sync::Arc;

use serde_json::Value;

use crate::lifecycle::Params;

/// The unit of work a job wraps.
///
/// Implementations must not hold on to consumer-side state. A returned error
/// marks the job FAILED; its alternate display (`{:#}`) becomes the job's
/// `error_message`. Calls may block for as long as they need: they run on a
/// dedicated blocking thread.
pub trait Payload: Send + Sync + 'static {
    fn run(&self, params: &Params) -> anyhow::Result<Value>;
}

impl<F> Payload for F
where
    F: Fn(&Params) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn run(&self, params: &Params) -> anyhow::Result<Value> {
        self(params)
    }
}

/// Wrap a closure as a shareable payload.
pub fn from_fn<F>(f: F) -> Arc<dyn Payload>
where
    F: Fn(&Params) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}
