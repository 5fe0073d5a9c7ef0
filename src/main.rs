//! Binary entry point: wires every component together in startup order
//! and runs the parent-facing request loop over stdin/stdout.
//!
//! ```text
//! cargo run --bin orchestrator-core -- [config_path]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info, warn};

use orchestrator_core::advisory::AdvisoryService;
use orchestrator_core::approval::ApprovalService;
use orchestrator_core::config::{self, OrchestratorConfig};
use orchestrator_core::dispatcher::{Dispatcher, WorkerRole};
use orchestrator_core::event_bus::EventBus;
use orchestrator_core::executor::WorkflowExecutor;
use orchestrator_core::guardrail::GuardrailEnforcer;
use orchestrator_core::ipc_loop::RequestLoop;
use orchestrator_core::logging;
use orchestrator_core::persistence::SqlStore;
use orchestrator_core::supervisor::ProcessSupervisor;
use orchestrator_core::trigger::TriggerService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing();

    info!(version = env!("CARGO_PKG_VERSION"), "starting orchestrator-core");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = OrchestratorConfig::load(config_path.as_deref())?;
    let config_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("config"));
    let guardrail_policy = config::load_guardrail_policy(&config_dir);

    let event_bus = Arc::new(EventBus::default());
    let store = Arc::new(SqlStore::connect(&config.database.path).await?);

    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher.clone()));
    let supervisor = Arc::new(ProcessSupervisor::new(
        config.workers.clone(),
        &config.dispatcher,
        dispatcher.clone(),
    ));

    for role in [WorkerRole::Python, WorkerRole::Network] {
        if let Err(e) = supervisor.start_worker(role).await {
            warn!(role = role.as_str(), error = %e, "worker failed to start; it will report as dead until restarted");
        }
    }

    let approval = Arc::new(ApprovalService::new(store.clone()));
    let executor = Arc::new(WorkflowExecutor::new(
        store.clone(),
        dispatcher.clone(),
        approval.clone(),
        event_bus.clone(),
    ));
    let advisory = Arc::new(AdvisoryService::new(store.clone(), supervisor.clone()));
    let guardrail = Arc::new(GuardrailEnforcer::new(guardrail_policy, store.clone()));
    let triggers = Arc::new(TriggerService::new(executor.clone()));
    triggers.spawn_listener(&event_bus);

    match executor.resume_pending().await {
        Ok(count) => info!(count, "resumed pending executions from prior run"),
        Err(e) => error!(error = %e, "failed to resume pending executions"),
    }

    let request_loop = RequestLoop::new(
        executor.clone(),
        approval,
        advisory,
        guardrail,
        triggers,
        dispatcher,
        supervisor.clone(),
        store,
    );

    info!("orchestrator-core ready, entering request loop");

    tokio::select! {
        _ = request_loop.run(tokio::io::stdin(), tokio::io::stdout()) => {
            info!("request loop exited");
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, winding down");
            executor.request_shutdown();
        }
    }

    let shutdown_timeout = Duration::from_millis(config.execution.shutdown_timeout_ms);
    if tokio::time::timeout(shutdown_timeout, supervisor.stop_all()).await.is_err() {
        warn!(timeout_ms = config.execution.shutdown_timeout_ms, "worker shutdown timed out");
    }

    info!("orchestrator-core stopped");
    Ok(())
}

/// Ctrl+C or SIGTERM, whichever arrives first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
