//! Kubernetes resource watcher.
//!
//! Drives `kube_runtime::Controller` over VirtualMachine objects. The runtime
//! serializes passes per object, reconnects the watch and delivers requeues;
//! this module only maps reconcile outcomes onto `Action`s.

use crate::error::ControllerError;
use crate::reconciler::{NextAction, Reconciler};
use crate::store::ResourceKey;
use crds::{KindRegistry, VirtualMachine};
use futures::StreamExt;
use kube::Api;
use kube::api::ListParams;
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

/// Shared state handed to every reconcile call
pub struct Context {
    pub reconciler: Reconciler,
    /// Requeue interval for objects in steady state
    pub resync: Duration,
}

/// Map a pass outcome onto a runtime action
pub fn to_action(next: NextAction, resync: Duration) -> Action {
    match next {
        NextAction::RequeueAfter(delay) => Action::requeue(delay),
        NextAction::None => Action::requeue(resync),
    }
}

async fn reconcile(vm: Arc<VirtualMachine>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = ResourceKey::of(&vm);
    debug!("Reconciling VirtualMachine {}", key);
    let next = ctx.reconciler.reconcile(&key).await?;
    Ok(to_action(next, ctx.resync))
}

fn error_policy(vm: Arc<VirtualMachine>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = ResourceKey::of(&vm);
    let delay = ctx.reconciler.error_backoff(&key);
    if error.is_conflict() {
        debug!(
            "VirtualMachine {} changed during reconciliation, retry in {}s",
            key,
            delay.as_secs()
        );
    } else if error.is_ambiguous() {
        error!(
            "VirtualMachine {}: {}. Remove the duplicate machines in Aria Automation (retry in {}s)",
            key,
            error,
            delay.as_secs()
        );
    } else {
        error!(
            "Reconciliation error for VirtualMachine {}: {} (retry in {}s)",
            key,
            error,
            delay.as_secs()
        );
    }
    Action::requeue(delay)
}

/// Flip readiness once the kind is known to be listable
fn mark_ready(ready: &AtomicBool) {
    if !ready.swap(true, Ordering::SeqCst) {
        info!("VirtualMachine watch established");
    }
}

/// Watches VirtualMachine resources and triggers reconciliation.
pub struct Watcher {
    api: Api<VirtualMachine>,
    context: Arc<Context>,
    registry: Arc<KindRegistry>,
    concurrency: u16,
    ready: Arc<AtomicBool>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        api: Api<VirtualMachine>,
        context: Arc<Context>,
        registry: Arc<KindRegistry>,
        concurrency: u16,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            api,
            context,
            registry,
            concurrency,
            ready,
        }
    }

    /// Run until the watch stream ends.
    pub async fn run(self) -> Result<(), ControllerError> {
        let kind = self.registry.get("VirtualMachine").ok_or_else(|| {
            ControllerError::InvalidConfig("VirtualMachine kind is not registered".to_string())
        })?;
        info!("Starting {} watcher ({})", kind.kind, kind.crd_name);

        // Debounce batches the status writes of one pass into a single trigger
        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(1))
            .concurrency(self.concurrency);

        // A denied list means the watch cannot work either; stay unready
        self.api
            .list(&ListParams::default().limit(1))
            .await
            .map_err(|e| ControllerError::Watch(format!("cannot list VirtualMachines: {e}")))?;
        mark_ready(&self.ready);

        Controller::new(self.api, watcher::Config::default())
            .with_config(controller_config)
            .run(reconcile, error_policy, self.context)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled VirtualMachine {}", obj.name),
                    Err(e) => error!("Controller error for VirtualMachine: {}", e),
                }
            })
            .await;
        self.ready.store(false, Ordering::SeqCst);

        Err(ControllerError::Watch(
            "VirtualMachine watch stream ended".to_string(),
        ))
    }
}
