//! Reconciliation logic for VirtualMachine CRDs.
//!
//! One pass loads the object, then takes the first branch that applies:
//!
//! 1. deletion: wait for an in-flight request, submit the machine delete, or
//!    drop the finalizer once nothing is left in Aria Automation
//! 2. in-flight request: poll it and record the outcome
//! 3. finalizer registration
//! 4. existence sync: look the machine up by its identity tags, then create
//!    it, mirror it into the spec, or notice that it vanished
//!
//! The persisted status is the only memory between passes, so any pass can be
//! repeated from scratch.


use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::status::*;
use crate::store::{ResourceKey, ResourceStore, StoreError};
use crate::tracker::{OperationStatus, OperationTracker, TrackerError};
use crds::{StatusPhase, VirtualMachine, VirtualMachineStatus};
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};
use vra_client::VraClientTrait;

/// What the dispatch layer should do after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Steady state, come back on the normal resync cadence
    None,
    /// Run another pass for the same key after the delay
    RequeueAfter(Duration),
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min, max),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Outcome of polling an in-flight request outside deletion
enum PollOutcome {
    /// The pass is over
    Done(NextAction),
    /// The request finished; continue with existence sync. The object is
    /// unchanged, its request id still set.
    Finished(VirtualMachine),
}

/// Reconciles VirtualMachine resources against Aria Automation.
pub struct Reconciler {
    pub(crate) tracker: OperationTracker,
    pub(crate) store: Box<dyn ResourceStore>,
    /// Fixed delay between polls of an in-flight request
    requeue: Duration,
    /// Ceiling of the error backoff
    max_requeue: Duration,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    pub fn new(
        vra_client: Box<dyn VraClientTrait>,
        store: Box<dyn ResourceStore>,
        requeue: Duration,
        max_requeue: Duration,
    ) -> Self {
        Self {
            tracker: OperationTracker::new(vra_client),
            store,
            requeue,
            max_requeue,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run one reconcile pass for `key`.
    ///
    /// A missing object is not an error. `Err` is returned for store
    /// conflicts and ambiguous identity lookups; every other failure is
    /// recorded in the status and answered with a requeue.
    pub async fn reconcile(&self, key: &ResourceKey) -> Result<NextAction, ControllerError> {
        let span = info_span!("reconcile", virtualmachine = %key);
        match self.reconcile_inner(key).instrument(span).await {
            Err(ControllerError::Store(StoreError::NotFound(_))) => {
                debug!("VirtualMachine {} no longer exists", key);
                self.forget(key);
                Ok(NextAction::None)
            }
            other => other,
        }
    }

    async fn reconcile_inner(&self, key: &ResourceKey) -> Result<NextAction, ControllerError> {
        let vm = self.store.get(key).await?;
        debug!(
            "Received reconcile request for {} (phase {})",
            key,
            vm.status_or_default().phase
        );

        if vm.is_deleting() {
            return self.reconcile_deletion(key, vm).await;
        }

        let mut vm = vm;
        let mut request_completed = false;
        if vm.status_or_default().has_request() {
            match self.poll_request(key, vm).await? {
                PollOutcome::Done(action) => return Ok(action),
                PollOutcome::Finished(finished) => {
                    vm = finished;
                    request_completed = true;
                }
            }
        }

        if !vm.has_finalizer() {
            info!("Adding finalizer to {}", key);
            vm = self.store.add_finalizer(&vm).await?;
        }

        self.sync_existence(key, vm, request_completed).await
    }

    /// Deletion branch. Never submits anything while a request is in flight.
    async fn reconcile_deletion(
        &self,
        key: &ResourceKey,
        vm: VirtualMachine,
    ) -> Result<NextAction, ControllerError> {
        let status = vm.status_or_default();

        if status.has_request() {
            return self.await_delete_request(key, vm, status).await;
        }

        if status.has_machine() {
            info!("Deleting machine {} for {}", status.external_id, key);
            return match self.tracker.submit_delete(&status.external_id).await {
                Ok(Some(request_id)) => {
                    let next = compose_status(
                        StatusPhase::Pending,
                        MSG_DELETING,
                        None,
                        &request_id,
                        &status.external_id,
                    );
                    self.write_status(vm, next).await?;
                    Ok(self.requeue_fixed(key))
                }
                Ok(None) => {
                    warn!("Machine {} was already gone from Aria Automation", status.external_id);
                    let vm = self
                        .write_status(vm, compose_status(StatusPhase::Pending, MSG_VANISHED, None, "", ""))
                        .await?;
                    self.release(key, &vm).await
                }
                Err(e) => {
                    error!("Failed to delete machine {}: {}", status.external_id, e);
                    let next = compose_status(
                        StatusPhase::Error,
                        MSG_DELETE_FAILED,
                        Some(&e),
                        "",
                        &status.external_id,
                    );
                    self.write_status(vm, next).await?;
                    Ok(self.requeue_error(key))
                }
            };
        }

        self.release(key, &vm).await
    }

    /// Observe the request that is running while the object is being deleted.
    async fn await_delete_request(
        &self,
        key: &ResourceKey,
        vm: VirtualMachine,
        status: VirtualMachineStatus,
    ) -> Result<NextAction, ControllerError> {
        debug!("Request {} in flight for {}, waiting", status.external_request_id, key);
        match self.tracker.poll(&status.external_request_id).await {
            Ok(OperationStatus::InProgress) => Ok(self.requeue_fixed(key)),
            Ok(OperationStatus::Finished) => {
                let name = vm.name_any();
                let found = match self.tracker.find_by_identity(&name, &key.namespace).await {
                    Ok(found) => found,
                    Err(e @ TrackerError::AmbiguousResult { .. }) => return Err(e.into()),
                    Err(e) => {
                        // Keep the request id so the next pass checks again
                        error!("Failed to look up machine for {}: {}", key, e);
                        let next = compose_status(
                            StatusPhase::Error,
                            MSG_LOOKUP_FAILED,
                            Some(&e),
                            &status.external_request_id,
                            &status.external_id,
                        );
                        self.write_status(vm, next).await?;
                        return Ok(self.requeue_error(key));
                    }
                };
                match found {
                    None => {
                        info!("Machine for {} is gone", key);
                        let vm = self
                            .write_status(
                                vm,
                                compose_status(StatusPhase::Pending, MSG_REQUEST_COMPLETED, None, "", ""),
                            )
                            .await?;
                        self.release(key, &vm).await
                    }
                    Some(machine) => {
                        // Typically a create that was still running when deletion was requested
                        info!("Machine {} still exists for {}, deleting it next", machine.id, key);
                        let next = compose_status(
                            StatusPhase::Pending,
                            MSG_REQUEST_COMPLETED,
                            None,
                            "",
                            &machine.id,
                        );
                        self.write_status(vm, next).await?;
                        Ok(self.requeue_fixed(key))
                    }
                }
            }
            Ok(OperationStatus::Failed(message)) => {
                warn!("Request {} failed for {}: {}", status.external_request_id, key, message);
                let next = compose_status(
                    StatusPhase::Error,
                    MSG_REQUEST_FAILED,
                    Some(&message),
                    "",
                    &status.external_id,
                );
                self.write_status(vm, next).await?;
                Ok(self.requeue_error(key))
            }
            Ok(OperationStatus::Unknown(raw)) => {
                let next = compose_status(
                    StatusPhase::Error,
                    MSG_REQUEST_UNKNOWN,
                    Some(&raw),
                    &status.external_request_id,
                    &status.external_id,
                );
                self.write_status(vm, next).await?;
                Ok(self.requeue_error(key))
            }
            Err(e) => self.record_poll_failure(key, vm, &status, e).await,
        }
    }

    /// In-flight branch outside deletion.
    async fn poll_request(
        &self,
        key: &ResourceKey,
        vm: VirtualMachine,
    ) -> Result<PollOutcome, ControllerError> {
        let status = vm.status_or_default();
        let request_id = status.external_request_id.clone();

        let outcome = match self.tracker.poll(&request_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let action = self.record_poll_failure(key, vm, &status, e).await?;
                return Ok(PollOutcome::Done(action));
            }
        };
        debug!("Request {} for {} is {:?}", request_id, key, outcome);

        let action = match outcome {
            OperationStatus::InProgress => {
                let next = compose_status(
                    StatusPhase::InProgress,
                    MSG_REQUEST_IN_PROGRESS,
                    None,
                    &request_id,
                    &status.external_id,
                );
                self.write_status(vm, next).await?;
                self.requeue_fixed(key)
            }
            OperationStatus::Failed(message) => {
                warn!("Request {} failed for {}: {}", request_id, key, message);
                let next = compose_status(
                    StatusPhase::Error,
                    MSG_REQUEST_FAILED,
                    Some(&message),
                    "",
                    &status.external_id,
                );
                self.write_status(vm, next).await?;
                self.requeue_error(key)
            }
            OperationStatus::Unknown(raw) => {
                error!("Request {} for {} reported unknown status {:?}", request_id, key, raw);
                let next = compose_status(
                    StatusPhase::Error,
                    MSG_REQUEST_UNKNOWN,
                    Some(&raw),
                    &request_id,
                    &status.external_id,
                );
                self.write_status(vm, next).await?;
                self.requeue_error(key)
            }
            OperationStatus::Finished => {
                info!("Request {} for {} completed", request_id, key);
                // The request id is cleared by the status the sync branch writes
                return Ok(PollOutcome::Finished(vm));
            }
        };
        Ok(PollOutcome::Done(action))
    }

    async fn record_poll_failure(
        &self,
        key: &ResourceKey,
        vm: VirtualMachine,
        status: &VirtualMachineStatus,
        err: TrackerError,
    ) -> Result<NextAction, ControllerError> {
        error!("Failed to poll request {} for {}: {}", status.external_request_id, key, err);
        let next = compose_status(
            StatusPhase::Error,
            MSG_POLL_FAILED,
            Some(&err),
            &status.external_request_id,
            &status.external_id,
        );
        self.write_status(vm, next).await?;
        Ok(self.requeue_error(key))
    }

    /// Existence-sync branch.
    async fn sync_existence(
        &self,
        key: &ResourceKey,
        vm: VirtualMachine,
        request_completed: bool,
    ) -> Result<NextAction, ControllerError> {
        let status = vm.status_or_default();
        let name = vm.name_any();

        let found = match self.tracker.find_by_identity(&name, &key.namespace).await {
            Ok(found) => found,
            Err(e @ TrackerError::AmbiguousResult { .. }) => {
                error!("Refusing to reconcile {}: {}", key, e);
                return Err(e.into());
            }
            Err(e) => {
                error!("Failed to look up machine for {}: {}", key, e);
                let next = compose_status(
                    StatusPhase::Error,
                    MSG_LOOKUP_FAILED,
                    Some(&e),
                    "",
                    &status.external_id,
                );
                self.write_status(vm, next).await?;
                return Ok(self.requeue_error(key));
            }
        };

        match found {
            Some(machine) => {
                let mut vm = vm;
                if mirror_machine(&mut vm.spec, &machine) {
                    debug!("Mirroring machine {} into {}", machine.id, key);
                    vm = self.store.update_spec(&vm).await?;
                }
                if !status.has_machine() {
                    info!("Machine {} is ready for {}", machine.id, key);
                }
                let next = compose_status(StatusPhase::Running, MSG_READY, None, "", &machine.id);
                self.write_status(vm, next).await?;
                self.reset_error(&key.to_string());
                Ok(NextAction::None)
            }
            None if status.has_machine() => {
                warn!("Machine {} for {} vanished from Aria Automation", status.external_id, key);
                let next = compose_status(StatusPhase::Pending, MSG_VANISHED, None, "", "");
                self.write_status(vm, next).await?;
                Ok(self.requeue_fixed(key))
            }
            None if request_completed => {
                // Do not create in the same pass that saw a request finish
                warn!("Request for {} completed but no machine is visible yet", key);
                let next = compose_status(StatusPhase::Pending, MSG_REQUEST_COMPLETED, None, "", "");
                self.write_status(vm, next).await?;
                Ok(self.requeue_fixed(key))
            }
            None => {
                info!("Creating machine for {}", key);
                match self.tracker.submit_create(&vm).await {
                    Ok(request_id) => {
                        let next = compose_status(StatusPhase::Creating, MSG_CREATED, None, &request_id, "");
                        self.write_status(vm, next).await?;
                        Ok(self.requeue_fixed(key))
                    }
                    Err(e) => {
                        error!("Failed to create machine for {}: {}", key, e);
                        let next = compose_status(StatusPhase::Error, MSG_CREATE_FAILED, Some(&e), "", "");
                        self.write_status(vm, next).await?;
                        Ok(self.requeue_error(key))
                    }
                }
            }
        }
    }

    /// Drop the finalizer; nothing is left in Aria Automation.
    async fn release(&self, key: &ResourceKey, vm: &VirtualMachine) -> Result<NextAction, ControllerError> {
        if vm.has_finalizer() {
            info!("Removing finalizer from {}", key);
            self.store.remove_finalizer(vm).await?;
        }
        self.forget(key);
        Ok(NextAction::None)
    }

    /// Persist `next` unless the stored status already matches
    async fn write_status(
        &self,
        mut vm: VirtualMachine,
        next: VirtualMachineStatus,
    ) -> Result<VirtualMachine, ControllerError> {
        if vm.status.as_ref() == Some(&next) {
            return Ok(vm);
        }
        debug!(
            "Status of {}: {} {:?}",
            vm.name_any(),
            next.phase,
            next.last_message
        );
        vm.status = Some(next);
        Ok(self.store.update_status(&vm).await?)
    }

    fn requeue_fixed(&self, key: &ResourceKey) -> NextAction {
        self.reset_error(&key.to_string());
        NextAction::RequeueAfter(self.requeue)
    }

    fn requeue_error(&self, key: &ResourceKey) -> NextAction {
        NextAction::RequeueAfter(self.error_backoff(key))
    }

    /// Delay before retrying `key` after a failed pass; advances its backoff
    pub fn error_backoff(&self, key: &ResourceKey) -> Duration {
        let resource_key = key.to_string();
        self.increment_error(&resource_key);
        let (seconds, error_count) = self.get_backoff_for_resource(&resource_key);
        debug!("Backing off {} for {}s (error #{})", resource_key, seconds, error_count);
        Duration::from_secs(seconds)
    }

    fn forget(&self, key: &ResourceKey) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(&key.to_string());
        }
    }

    /// Get the Fibonacci backoff duration for a resource based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(|| BackoffState::new(self.requeue, self.max_requeue));
                let backoff_seconds = state.backoff.next_backoff_seconds();
                (backoff_seconds, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (self.requeue.as_secs(), 0)
            }
        }
    }

    /// Increment error count for a resource
    fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(|| BackoffState::new(self.requeue, self.max_requeue))
                .increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
