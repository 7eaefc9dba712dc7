//! Concurrent per-device operations
//!
//! One task per device, all joined before returning. Each task is bounded by
//! the configured timeout; a timeout is reported like any other failure.

use linkmap_core::{Device, DeviceId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::agent::{AgentError, DeviceAgent};

/// Run `op` for every device concurrently and collect the outcomes
///
/// Results come back in completion order. A panicked task is logged and
/// dropped.
pub async fn fan_out<T, F, Fut>(
    agent: &Arc<dyn DeviceAgent>,
    devices: Vec<Device>,
    limit: Duration,
    op: F,
) -> Vec<(DeviceId, Result<T, AgentError>)>
where
    T: Send + 'static,
    F: Fn(Arc<dyn DeviceAgent>, Device) -> Fut,
    Fut: Future<Output = Result<T, AgentError>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    let count = devices.len();

    for device in devices {
        let id = device.id.clone();
        let call = op(Arc::clone(agent), device);
        tasks.spawn(async move {
            let result = match timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout(id.to_string())),
            };
            (id, result)
        });
    }

    let mut results = Vec::with_capacity(count);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => results.push(outcome),
            Err(e) => warn!(error = %e, "Device task failed"),
        }
    }

    debug!(devices = count, completed = results.len(), "Fan-out finished");
    results
}
