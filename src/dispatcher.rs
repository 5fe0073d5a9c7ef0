//! Step dispatcher: routes each step to a worker process over the
//! line-protocol channel and correlates responses by request id.
//!
//! This is a domain facade over a handful of [`WorkerHandle`]s, one per
//! [`WorkerRole`] — enum dispatch rather than trait objects, since there are
//! exactly two worker roles and a third pseudo-role (broadcast) that fans
//! out to both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::ipc::protocol::{IpcRequest, IpcResponse};
use crate::ipc::LineWriter;

/// Which worker process a step (or administrative verb) is routed to.
/// Deterministic and config-overridable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    Python,
    Network,
}

impl WorkerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerRole::Python => "python",
            WorkerRole::Network => "network",
        }
    }
}

/// Operations that are broadcast to every worker rather than routed to one.
const BROADCAST_OPS: &[&str] = &["PING", "HEALTH_CHECK", "GET_STATUS", "SHUTDOWN"];

const NETWORK_OPS: &[&str] = &[
    "EXTERNAL_API_CALL",
    "LIST_PROVIDERS",
    "GET_PROVIDER_INFO",
    "SAVE_CREDENTIAL",
    "DELETE_CREDENTIAL",
    "GET_RATE_LIMIT_STATUS",
    "GET_METRICS",
];

/// Resolve the worker-selection mapping. `PYTHON_TASK` and any unknown
/// operation route to the python worker; the network ops route to the
/// network worker; administrative ops broadcast to all.
pub fn route(operation: &str) -> Route {
    if BROADCAST_OPS.contains(&operation) {
        Route::Broadcast
    } else if NETWORK_OPS.contains(&operation) {
        Route::Role(WorkerRole::Network)
    } else {
        Route::Role(WorkerRole::Python)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Role(WorkerRole),
    Broadcast,
}

/// A single worker's write half and outstanding-request table. The read
/// half lives in a background task spawned by [`Dispatcher::register_worker`]
/// that demultiplexes response lines by `id`.
struct WorkerHandle {
    writer: LineWriter<tokio::process::ChildStdin>,
    pending: Arc<DashMap<String, oneshot::Sender<IpcResponse>>>,
    alive: Arc<AtomicBool>,
    /// Bounds in-flight requests to this worker's declared capacity.
    capacity: Arc<Semaphore>,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    workers: DashMap<WorkerRole, Arc<WorkerHandle>>,
    config: DispatcherConfig,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("alive", &self.is_alive())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            workers: DashMap::new(),
            config,
        }
    }

    /// Register a worker's write half and take ownership of its read half,
    /// spawning the demultiplexing task. Called once per worker after the
    /// process supervisor completes the startup handshake.
    pub fn register_worker(
        &self,
        role: WorkerRole,
        writer: LineWriter<tokio::process::ChildStdin>,
        mut reader: crate::ipc::LineReader<tokio::process::ChildStdout>,
        in_flight_capacity: usize,
    ) {
        let pending: Arc<DashMap<String, oneshot::Sender<IpcResponse>>> = Arc::new(DashMap::new());
        let alive = Arc::new(AtomicBool::new(true));

        let handle = Arc::new(WorkerHandle {
            writer,
            pending: pending.clone(),
            alive: alive.clone(),
            capacity: Arc::new(Semaphore::new(in_flight_capacity.max(1))),
        });
        self.workers.insert(role, handle);

        tokio::spawn(async move {
            loop {
                match reader.next_value().await {
                    Ok(Some(value)) => match serde_json::from_value::<IpcResponse>(value) {
                        Ok(response) => {
                            if let Some((_, sender)) = pending.remove(&response.id) {
                                let _ = sender.send(response);
                            } else {
                                debug!(id = %response.id, role = role.as_str(), "no outstanding request for response id");
                            }
                        }
                        Err(e) => {
                            warn!(role = role.as_str(), error = %e, "worker emitted a non-response line");
                        }
                    },
                    Ok(None) => {
                        warn!(role = role.as_str(), "worker closed its stdout; marking dead");
                        break;
                    }
                    Err(e) => {
                        warn!(role = role.as_str(), error = %e, "error reading worker stdout");
                        break;
                    }
                }
            }
            alive.store(false, Ordering::SeqCst);
            // Dropping each sender resolves any still-awaiting caller with a
            // RecvError, which `dispatch_to` translates to WorkerDead.
            pending.clear();
        });
    }

    pub fn deregister_worker(&self, role: WorkerRole) {
        self.workers.remove(&role);
    }

    pub fn worker_is_alive(&self, role: WorkerRole) -> bool {
        self.workers.get(&role).map(|h| h.is_alive()).unwrap_or(false)
    }

    /// Dispatch one request to the routed worker, awaiting the correlated
    /// response subject to the configured timeout.
    pub async fn dispatch(&self, operation: &str, payload: serde_json::Value) -> OrchestratorResult<serde_json::Value> {
        let role = match route(operation) {
            Route::Role(role) => role,
            Route::Broadcast => return Err(OrchestratorError::Internal(
                "dispatch() does not accept broadcast operations; use broadcast()".to_string(),
            )),
        };
        self.dispatch_to(role, operation, payload).await
    }

    pub async fn dispatch_to(
        &self,
        role: WorkerRole,
        operation: &str,
        payload: serde_json::Value,
    ) -> OrchestratorResult<serde_json::Value> {
        let handle = self
            .workers
            .get(&role)
            .map(|h| h.clone())
            .ok_or_else(|| OrchestratorError::WorkerDead { role: role.as_str().to_string() })?;

        if !handle.is_alive() {
            return Err(OrchestratorError::WorkerDead { role: role.as_str().to_string() });
        }

        let _permit = handle
            .capacity
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| OrchestratorError::WorkerDead { role: role.as_str().to_string() })?;

        let request_id = Uuid::new_v4().to_string();
        let request = IpcRequest::new(request_id.clone(), operation, payload);

        let (tx, rx) = oneshot::channel();
        handle.pending.insert(request_id.clone(), tx);

        let value = serde_json::to_value(&request).map_err(|e| OrchestratorError::Parse(e.to_string()))?;
        if let Err(e) = handle.writer.write_value(&value).await {
            handle.pending.remove(&request_id);
            return Err(e);
        }

        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                if response.success {
                    Ok(response.result.unwrap_or(serde_json::Value::Null))
                } else {
                    let err = response.error.unwrap_or(crate::ipc::protocol::IpcErrorPayload {
                        code: "INTERNAL_ERROR".to_string(),
                        message: "worker reported failure without error detail".to_string(),
                    });
                    Err(OrchestratorError::Workflow(format!("{}: {}", err.code, err.message)))
                }
            }
            Ok(Err(_)) => {
                handle.pending.remove(&request_id);
                Err(OrchestratorError::WorkerDead { role: role.as_str().to_string() })
            }
            Err(_) => {
                handle.pending.remove(&request_id);
                Err(OrchestratorError::WorkerTimeout { request_id })
            }
        }
    }

    /// Broadcast an administrative verb (PING/HEALTH_CHECK/GET_STATUS/
    /// SHUTDOWN) to every registered worker, collecting each result.
    pub async fn broadcast(&self, operation: &str, payload: serde_json::Value) -> Vec<(WorkerRole, OrchestratorResult<serde_json::Value>)> {
        let roles: Vec<WorkerRole> = self.workers.iter().map(|e| *e.key()).collect();
        let mut results = Vec::with_capacity(roles.len());
        for role in roles {
            let result = self.dispatch_to(role, operation, payload.clone()).await;
            results.push((role, result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_task_routes_to_python_worker() {
        assert_eq!(route("PYTHON_TASK"), Route::Role(WorkerRole::Python));
    }

    #[test]
    fn unknown_operation_routes_to_python_worker() {
        assert_eq!(route("SOME_UNKNOWN_OP"), Route::Role(WorkerRole::Python));
    }

    #[test]
    fn external_api_call_routes_to_network_worker() {
        assert_eq!(route("EXTERNAL_API_CALL"), Route::Role(WorkerRole::Network));
    }

    #[test]
    fn get_metrics_routes_to_network_worker() {
        assert_eq!(route("GET_METRICS"), Route::Role(WorkerRole::Network));
    }

    #[test]
    fn administrative_verbs_broadcast() {
        assert_eq!(route("PING"), Route::Broadcast);
        assert_eq!(route("SHUTDOWN"), Route::Broadcast);
    }

    #[tokio::test]
    async fn dispatch_to_unregistered_worker_is_worker_dead() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let result = dispatcher.dispatch("PYTHON_TASK", serde_json::json!({})).await;
        assert!(matches!(result, Err(OrchestratorError::WorkerDead { .. })));
    }

    #[test]
    fn dispatch_rejects_broadcast_operations() {
        // A unit-style assertion of the routing guard without needing a live worker.
        assert_eq!(route("SHUTDOWN"), Route::Broadcast);
    }
}
