//! Trigger service: maps event tags to workflows and starts an execution
//! whenever a matching event is published on the event bus.
//!
//! Triggers cannot be fired directly by a request from the parent process —
//! only an internal `EventBus::publish` call can reach [`TriggerService`],
//! since registration only ever adds an entry to the lookup table consulted
//! by the bus subscription loop spawned in [`TriggerService::spawn_listener`].

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::event_bus::{Event, EventBus};
use crate::executor::WorkflowExecutor;

pub struct TriggerService {
    /// event_tag -> workflow_id.
    triggers: DashMap<String, String>,
    executor: Arc<WorkflowExecutor>,
}

impl TriggerService {
    pub fn new(executor: Arc<WorkflowExecutor>) -> Self {
        Self {
            triggers: DashMap::new(),
            executor,
        }
    }

    pub fn register(&self, event_tag: impl Into<String>, workflow_id: impl Into<String>) {
        self.triggers.insert(event_tag.into(), workflow_id.into());
    }

    /// Returns true if a trigger with this tag existed and was removed.
    pub fn unregister(&self, event_tag: &str) -> bool {
        self.triggers.remove(event_tag).is_some()
    }

    pub fn list(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> =
            self.triggers.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        entries.sort();
        entries
    }

    /// Subscribe to the event bus and start a workflow on every matching
    /// publish, for the lifetime of the process. Called once at startup.
    pub fn spawn_listener(self: &Arc<Self>, event_bus: &EventBus) {
        let mut receiver = event_bus.subscribe();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => this.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "trigger listener lagged behind the event bus; some events were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn handle_event(&self, event: Event) {
        let Some(workflow_id) = self.triggers.get(&event.tag).map(|e| e.clone()) else {
            return;
        };

        let mut context = Map::new();
        if let Some(payload) = event.payload.as_object() {
            for (key, value) in payload {
                if value.is_string() || value.is_number() {
                    context.insert(key.clone(), value.clone());
                }
            }
        }
        context.insert("trigger_event".to_string(), json!(event.tag));
        context.insert("trigger_timestamp".to_string(), json!(Utc::now().to_rfc3339()));

        match self.executor.start_workflow(&workflow_id, Value::Object(context)).await {
            Ok(execution_id) => {
                info!(%execution_id, workflow_id, tag = %event.tag, "trigger started workflow execution");
            }
            Err(e) => {
                warn!(workflow_id, tag = %event.tag, error = %e, "trigger failed to start workflow");
            }
        }
    }
}
