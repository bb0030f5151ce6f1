use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::info;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    grading::GradingClient,
    llm::SharedModel,
    mind_map::MindMapClient,
    practice::provider_for,
    workflow::{WorkflowController, WorkflowServices},
};

/// Sesiones activas, una por pestaña del navegador.
pub type SessionMap = Arc<Mutex<HashMap<Uuid, WorkflowController>>>;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub model: SharedModel,
    pub services: Arc<WorkflowServices>,
    pub sessions: SessionMap,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    /// Monta los clientes sobre un único modelo compartido.
    pub fn new(config: AppConfig, model: SharedModel) -> Self {
        let services = WorkflowServices {
            grading: GradingClient::new(model.clone(), config.grading_temperature),
            mind_map: MindMapClient::new(model.clone()),
            practice: provider_for(config.practice_provider, model.clone()),
        };
        Self {
            config,
            model,
            services: Arc::new(services),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_shutdown(self, sender: oneshot::Sender<()>) -> Self {
        *self.shutdown_sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(sender);
        self
    }

    pub fn create_session(&self) -> WorkflowController {
        self.purge_idle_sessions(Utc::now());
        let controller = WorkflowController::new(self.services.clone());
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(controller.id(), controller.clone());
        controller
    }

    pub fn session(&self, id: Uuid) -> Option<WorkflowController> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn remove_session(&self, id: Uuid) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Descarta las sesiones sin actividad desde hace más de
    /// `session_idle_ttl`. Las que tienen una corrección en curso se conservan.
    pub fn purge_idle_sessions(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.session_idle_ttl;
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, controller| match controller.idle_since() {
            Some(last_activity) => now
                .signed_duration_since(last_activity)
                .to_std()
                .map(|idle| idle <= ttl)
                .unwrap_or(true),
            None => true,
        });
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, remaining = sessions.len(), "Sesiones inactivas descartadas");
        }
        removed
    }
}
