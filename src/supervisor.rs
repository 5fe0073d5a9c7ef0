//! Process supervisor: spawns worker subprocesses, performs the startup
//! ready-handshake, and tracks liveness for health reporting.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{DispatcherConfig, WorkersConfig};
use crate::dispatcher::{Dispatcher, WorkerRole};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::ipc::protocol::ReadyRecord;
use crate::ipc::{LineReader, LineWriter};

/// Health is the conjunction of process liveness and the outcome of the
/// most recent `HEALTH_CHECK`. `last_health_check_ok` starts
/// `true` — a freshly started worker that has passed its ready handshake
/// is assumed healthy until proven otherwise.
struct WorkerState {
    child: Child,
    last_health_check_ok: AtomicBool,
}

pub struct ProcessSupervisor {
    config: WorkersConfig,
    default_in_flight_capacity: usize,
    dispatcher: Arc<Dispatcher>,
    workers: Mutex<HashMap<WorkerRole, WorkerState>>,
}

impl ProcessSupervisor {
    pub fn new(config: WorkersConfig, dispatcher_config: &DispatcherConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            default_in_flight_capacity: dispatcher_config.default_in_flight_capacity,
            dispatcher,
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn worker_path(&self, role: WorkerRole) -> &str {
        match role {
            WorkerRole::Python => &self.config.python_worker_path,
            WorkerRole::Network => &self.config.network_worker_path,
        }
    }

    /// Spawn a worker, pipe its stdio, and wait (bounded) for its startup
    /// `READY` record. On timeout or process death before `READY`, the
    /// worker is killed and startup fails.
    pub async fn start_worker(&self, role: WorkerRole) -> OrchestratorResult<()> {
        let path = self.worker_path(role).to_string();
        info!(role = role.as_str(), path = %path, "starting worker process");

        let mut child = Command::new(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| OrchestratorError::Internal(format!("failed to spawn {path}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OrchestratorError::Internal("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OrchestratorError::Internal("worker stdout unavailable".to_string()))?;

        let writer = LineWriter::new(stdin);
        let mut reader = LineReader::new(stdout);

        let handshake = tokio::time::timeout(self.config.startup_timeout(), reader.next_value());
        let ready = match handshake.await {
            Ok(Ok(Some(value))) => ReadyRecord::is_ready_line(&value),
            Ok(Ok(None)) => false,
            Ok(Err(e)) => {
                warn!(role = role.as_str(), error = %e, "error while awaiting worker READY record");
                false
            }
            Err(_) => false,
        };

        if !ready {
            let _ = child.start_kill();
            return Err(OrchestratorError::Internal(format!(
                "worker {} did not send READY within the startup window",
                role.as_str()
            )));
        }

        info!(role = role.as_str(), "worker ready");

        self.dispatcher
            .register_worker(role, writer, reader, self.default_in_flight_capacity);

        let mut workers = self.workers.lock().await;
        workers.insert(
            role,
            WorkerState {
                child,
                last_health_check_ok: AtomicBool::new(true),
            },
        );

        Ok(())
    }

    /// Send `SHUTDOWN`, give the worker a bounded graceful window, then
    /// force-terminate.
    pub async fn stop_worker(&self, role: WorkerRole) -> OrchestratorResult<()> {
        let _ = self
            .dispatcher
            .dispatch_to(role, "SHUTDOWN", serde_json::json!({}))
            .await;
        self.dispatcher.deregister_worker(role);

        let mut workers = self.workers.lock().await;
        if let Some(mut state) = workers.remove(&role) {
            let grace = self.config.shutdown_grace();
            match tokio::time::timeout(grace, state.child.wait()).await {
                Ok(Ok(_)) => info!(role = role.as_str(), "worker exited gracefully"),
                _ => {
                    warn!(role = role.as_str(), "worker did not exit within grace window, killing");
                    let _ = state.child.start_kill();
                }
            }
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        let roles: Vec<WorkerRole> = {
            let workers = self.workers.lock().await;
            workers.keys().copied().collect()
        };
        for role in roles {
            if let Err(e) = self.stop_worker(role).await {
                error!(role = role.as_str(), error = %e, "failed to stop worker cleanly");
            }
        }
    }

    /// Process liveness as observed by `try_wait` (non-blocking).
    pub async fn is_process_alive(&self, role: WorkerRole) -> bool {
        let mut workers = self.workers.lock().await;
        match workers.get_mut(&role) {
            Some(state) => matches!(state.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Health is process liveness AND the most recent HEALTH_CHECK outcome
    ///.
    pub async fn is_healthy(&self, role: WorkerRole) -> bool {
        if !self.is_process_alive(role).await {
            return false;
        }
        let workers = self.workers.lock().await;
        workers
            .get(&role)
            .map(|s| s.last_health_check_ok.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Issue a HEALTH_CHECK and record the outcome for future `is_healthy`
    /// queries, used by the advisory state analyzer.
    pub async fn refresh_health(&self, role: WorkerRole) -> bool {
        let ok = self
            .dispatcher
            .dispatch_to(role, "HEALTH_CHECK", serde_json::json!({}))
            .await
            .is_ok();
        let workers = self.workers.lock().await;
        if let Some(state) = workers.get(&role) {
            state.last_health_check_ok.store(ok, Ordering::SeqCst);
        }
        ok
    }

    /// A point-in-time liveness read for every worker role, used by the
    /// advisory state analyzer to tell "workflow is slow" from "workflow is
    /// slow because a worker is down".
    pub async fn health_snapshot(&self) -> HashMap<WorkerRole, bool> {
        let mut snapshot = HashMap::new();
        for role in [WorkerRole::Python, WorkerRole::Network] {
            snapshot.insert(role, self.is_healthy(role).await);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starting_a_nonexistent_worker_path_fails() {
        let dispatcher_config = crate::config::DispatcherConfig::default();
        let dispatcher = Arc::new(Dispatcher::new(dispatcher_config.clone()));
        let config = WorkersConfig {
            python_worker_path: "/nonexistent/path/to/worker".to_string(),
            ..WorkersConfig::default()
        };
        let supervisor = ProcessSupervisor::new(config, &dispatcher_config, dispatcher);
        let result = supervisor.start_worker(WorkerRole::Python).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unregistered_worker_is_not_healthy() {
        let dispatcher_config = crate::config::DispatcherConfig::default();
        let dispatcher = Arc::new(Dispatcher::new(dispatcher_config.clone()));
        let supervisor = ProcessSupervisor::new(WorkersConfig::default(), &dispatcher_config, dispatcher);
        assert!(!supervisor.is_healthy(WorkerRole::Python).await);
    }
}
