//! Controlador del flujo de una sesión: envío → informe → práctica.
//!
//! Cada sesión tiene su propio `SessionState`, propiedad del controlador.
//! El mutex que lo protege nunca se mantiene a través de un `.await`, y el
//! indicador `loading` se libera con un guard al salir del envío, sea cual
//! sea el resultado (incluida la cancelación del future).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    errors::{GradingError, ValidationError},
    grading::GradingClient,
    mind_map::MindMapClient,
    models::{GradingReport, GradingRequest, MindMapNode, Question, QuestionType},
    practice::SharedSuggestionProvider,
};

pub const GRADING_FAILED_NOTICE: &str = "批改过程中出现问题，请稍后重试";
pub const BUSY_NOTICE: &str = "AI 正在深度阅卷，请稍候";

/// Vista activa de la sesión.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Submitting,
    Reporting,
    Practicing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// Aviso visible para el estudiante.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Estado completo de una sesión. Se descarta con la sesión.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub view: View,
    pub loading: bool,
    pub report: Option<GradingReport>,
    pub suggestions: Vec<Question>,
    pub notice: Option<Notice>,
    pub mind_map: Option<MindMapNode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for SessionState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            view: View::default(),
            loading: false,
            report: None,
            suggestions: Vec::new(),
            notice: None,
            mind_map: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl SessionState {
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("ya hay una corrección en curso")]
    Busy,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("la corrección falló: {0}")]
    Failed(GradingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("todavía no hay informe que mostrar")]
    ReportUnavailable,
}

/// Colaboradores compartidos por todas las sesiones.
#[derive(Clone)]
pub struct WorkflowServices {
    pub grading: GradingClient,
    pub mind_map: MindMapClient,
    pub practice: SharedSuggestionProvider,
}

/// Libera `loading` al soltarse.
struct LoadingGuard {
    state: Arc<Mutex<SessionState>>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.loading = false;
        state.touch();
    }
}

/// Controlador de una sesión. Clonarlo comparte la misma sesión.
#[derive(Clone)]
pub struct WorkflowController {
    id: Uuid,
    services: Arc<WorkflowServices>,
    state: Arc<Mutex<SessionState>>,
}

impl WorkflowController {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self {
            id: Uuid::new_v4(),
            services,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    /// Corrige una entrega y, si sale bien, pasa a la vista de informe.
    ///
    /// Un fallo del proveedor de sugerencias no bloquea la transición: la
    /// lista queda vacía.
    pub async fn submit(&self, request: GradingRequest) -> Result<(), SubmitError> {
        let _loading = {
            let mut state = self.lock();
            if state.loading {
                return Err(SubmitError::Busy);
            }
            if let Err(e) = request.validate() {
                return Err(Self::invalid(&mut state, e));
            }
            state.loading = true;
            state.notice = None;
            state.touch();
            LoadingGuard {
                state: self.state.clone(),
            }
        };

        info!(
            session = %self.id,
            persona = ?request.persona,
            has_image = request.has_image(),
            "Iniciando corrección"
        );

        let report = match self.services.grading.grade(&request).await {
            Ok(report) => report,
            Err(e) => {
                let auth = matches!(&e, GradingError::Transport(t) if t.is_auth());
                error!(session = %self.id, auth, error = %e, "Error en la corrección");
                let mut state = self.lock();
                state.view = View::Submitting;
                state.notice = Some(Notice::error(GRADING_FAILED_NOTICE));
                state.touch();
                return Err(SubmitError::Failed(e));
            }
        };

        let weak_points = report.weak_points();
        let suggestions = match self.services.practice.suggest(&weak_points).await {
            Ok(questions) => questions,
            Err(e) => {
                warn!(
                    session = %self.id,
                    error = %e,
                    "No se pudieron obtener preguntas de práctica; se continúa sin ellas"
                );
                Vec::new()
            }
        };

        info!(
            session = %self.id,
            overall_score = report.overall_score,
            weak_points = weak_points.len(),
            suggestions = suggestions.len(),
            "Corrección completada"
        );

        let mut state = self.lock();
        state.report = Some(report);
        state.suggestions = suggestions;
        state.view = View::Reporting;
        state.notice = None;
        state.touch();
        Ok(())
    }

    /// Rechaza una entrega que ni siquiera pudo construirse (p. ej. imagen
    /// ilegible). Con una corrección en curso se responde `Busy`.
    pub fn reject(&self, error: ValidationError) -> SubmitError {
        let mut state = self.lock();
        if state.loading {
            return SubmitError::Busy;
        }
        Self::invalid(&mut state, error)
    }

    fn invalid(state: &mut SessionState, error: ValidationError) -> SubmitError {
        state.view = View::Submitting;
        state.notice = Some(Notice::warning(error.notice()));
        state.touch();
        SubmitError::Invalid(error)
    }

    /// Última actividad, o `None` mientras hay una corrección en curso.
    pub fn idle_since(&self) -> Option<DateTime<Utc>> {
        let state = self.lock();
        (!state.loading).then_some(state.updated_at)
    }

    /// Cambia de vista. El informe sólo es accesible si existe.
    pub fn navigate(&self, view: View) -> Result<(), NavigationError> {
        let mut state = self.lock();
        if view == View::Reporting && state.report.is_none() {
            return Err(NavigationError::ReportUnavailable);
        }
        state.view = view;
        state.touch();
        Ok(())
    }

    /// Preguntas para la vista de práctica; antes de la primera corrección
    /// se muestra una pregunta indicativa.
    pub fn practice_questions(&self) -> Vec<Question> {
        let state = self.lock();
        if state.suggestions.is_empty() {
            vec![Question::new(
                "1",
                QuestionType::ShortAnswer,
                "请先完成一次批改以获取推荐试题",
                "系统提示",
            )]
        } else {
            state.suggestions.clone()
        }
    }

    /// Genera un mapa mental y lo guarda en la sesión (o lo borra si falla).
    pub async fn generate_mind_map(&self, topic: &str) -> Option<MindMapNode> {
        let mind_map = self.services.mind_map.build_mind_map(topic).await;
        let mut state = self.lock();
        state.mind_map = mind_map.clone();
        state.touch();
        mind_map
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::config::PracticeProviderKind;
    use crate::errors::TransportError;
    use crate::grading::fixtures::report_json;
    use crate::llm::testing::StubModel;
    use crate::models::Persona;
    use crate::practice::{static_questions, StaticSuggestionProvider, SuggestionProvider};

    struct FailingProvider;

    #[async_trait]
    impl SuggestionProvider for FailingProvider {
        fn kind(&self) -> PracticeProviderKind {
            PracticeProviderKind::Generative
        }

        async fn suggest(&self, _weak_points: &[String]) -> anyhow::Result<Vec<Question>> {
            Err(anyhow!("proveedor caído"))
        }
    }

    fn controller_with(stub: Arc<StubModel>, practice: SharedSuggestionProvider) -> WorkflowController {
        let services = WorkflowServices {
            grading: GradingClient::new(stub.clone(), 0.3),
            mind_map: MindMapClient::new(stub),
            practice,
        };
        WorkflowController::new(Arc::new(services))
    }

    fn controller(stub: Arc<StubModel>) -> WorkflowController {
        controller_with(stub, Arc::new(StaticSuggestionProvider))
    }

    fn text_request() -> GradingRequest {
        GradingRequest::new("宋代山水画", Persona::Professor).with_text("北宋山水以全景式构图为主……")
    }

    #[tokio::test]
    async fn successful_submission_reaches_reporting() {
        let stub = Arc::new(StubModel::replying(vec![Ok(report_json(false).to_string())]));
        let controller = controller(stub);

        controller.submit(text_request()).await.unwrap();

        let state = controller.snapshot();
        assert_eq!(state.view, View::Reporting);
        assert!(!state.loading);
        assert!(state.report.is_some());
        assert_eq!(state.suggestions, static_questions());
        assert!(state.notice.is_none());
    }

    #[tokio::test]
    async fn suggestion_failure_still_reaches_reporting() {
        let stub = Arc::new(StubModel::replying(vec![Ok(report_json(false).to_string())]));
        let controller = controller_with(stub, Arc::new(FailingProvider));

        controller.submit(text_request()).await.unwrap();

        let state = controller.snapshot();
        assert_eq!(state.view, View::Reporting);
        assert!(state.suggestions.is_empty());
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_model() {
        let stub = Arc::new(StubModel::new());
        let controller = controller(stub.clone());

        let err = controller
            .submit(GradingRequest::new("", Persona::Senior).with_text("答案"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(ValidationError::MissingTopic)));
        assert_eq!(
            controller.snapshot().notice,
            Some(Notice::warning("请输入题目"))
        );

        let err = controller
            .submit(GradingRequest::new("宋代山水画", Persona::Senior))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(ValidationError::MissingAnswer)));

        assert_eq!(stub.calls(), 0);
        let state = controller.snapshot();
        assert_eq!(state.view, View::Submitting);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn unreadable_image_is_rejected_like_other_invalid_input() {
        let gate = Arc::new(Notify::new());
        let stub = Arc::new(
            StubModel::replying(vec![Ok(report_json(false).to_string())]).with_gate(gate.clone()),
        );
        let controller = controller(stub);

        let err = controller.reject(ValidationError::InvalidImage("byte 3".to_string()));
        assert!(matches!(err, SubmitError::Invalid(ValidationError::InvalidImage(_))));
        let state = controller.snapshot();
        assert_eq!(state.view, View::Submitting);
        assert_eq!(state.notice, Some(Notice::warning("图片无法读取，请重新上传")));
        assert!(controller.idle_since().is_some());

        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.submit(text_request()).await }
        });
        while !controller.is_loading() {
            tokio::task::yield_now().await;
        }
        assert!(controller.idle_since().is_none());
        assert!(matches!(
            controller.reject(ValidationError::InvalidImage("byte 3".to_string())),
            SubmitError::Busy
        ));

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert!(controller.idle_since().is_some());
    }

    #[tokio::test]
    async fn grading_failure_returns_to_submitting_without_touching_report() {
        let stub = Arc::new(StubModel::replying(vec![
            Ok(report_json(false).to_string()),
            Err(TransportError::Upstream("502 Bad Gateway".to_string())),
            Ok("{}".to_string()),
        ]));
        let controller = controller(stub);

        controller.submit(text_request()).await.unwrap();
        let first_report = controller.snapshot().report;

        let err = controller.submit(text_request()).await.unwrap_err();
        assert!(matches!(err, SubmitError::Failed(GradingError::Transport(_))));
        let state = controller.snapshot();
        assert_eq!(state.view, View::Submitting);
        assert_eq!(state.notice, Some(Notice::error(GRADING_FAILED_NOTICE)));
        assert_eq!(state.report, first_report);
        assert!(!state.loading);

        let err = controller.submit(text_request()).await.unwrap_err();
        assert!(matches!(err, SubmitError::Failed(GradingError::Schema(_))));
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn loading_is_set_only_while_grading() {
        for reply in [
            Ok(report_json(false).to_string()),
            Err(TransportError::MissingCredential),
        ] {
            let stub = Arc::new(StubModel::replying(vec![reply]));
            let controller = controller(stub.clone());

            let observed = Arc::new(Mutex::new(Vec::new()));
            let observer = controller.clone();
            let sink = observed.clone();
            stub.on_call(move |_| sink.lock().unwrap().push(observer.is_loading()));

            assert!(!controller.is_loading());
            let _ = controller.submit(text_request()).await;
            assert!(!controller.is_loading());
            assert_eq!(*observed.lock().unwrap(), vec![true]);
        }
    }

    #[tokio::test]
    async fn concurrent_submission_is_rejected_while_loading() {
        let gate = Arc::new(Notify::new());
        let stub = Arc::new(
            StubModel::replying(vec![Ok(report_json(false).to_string())]).with_gate(gate.clone()),
        );
        let controller = controller(stub.clone());

        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.submit(text_request()).await }
        });
        while !controller.is_loading() {
            tokio::task::yield_now().await;
        }

        let err = controller.submit(text_request()).await.unwrap_err();
        assert!(matches!(err, SubmitError::Busy));

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(stub.calls(), 1);
        assert_eq!(controller.snapshot().view, View::Reporting);
    }

    #[tokio::test]
    async fn cancelled_submission_releases_loading() {
        let gate = Arc::new(Notify::new());
        let stub = Arc::new(StubModel::new().with_gate(gate));
        let controller = controller(stub);

        let outcome =
            tokio::time::timeout(Duration::from_millis(20), controller.submit(text_request())).await;
        assert!(outcome.is_err());
        assert!(!controller.is_loading());
        assert_eq!(controller.snapshot().view, View::Submitting);
    }

    #[tokio::test]
    async fn navigation_rules() {
        let stub = Arc::new(StubModel::replying(vec![Ok(report_json(false).to_string())]));
        let controller = controller(stub);

        assert_eq!(
            controller.navigate(View::Reporting),
            Err(NavigationError::ReportUnavailable)
        );
        controller.navigate(View::Practicing).unwrap();
        assert_eq!(controller.practice_questions()[0].topic, "系统提示");
        controller.navigate(View::Submitting).unwrap();

        controller.submit(text_request()).await.unwrap();
        controller.navigate(View::Practicing).unwrap();
        assert_eq!(controller.practice_questions(), static_questions());
        controller.navigate(View::Reporting).unwrap();
        assert_eq!(controller.snapshot().view, View::Reporting);
    }

    #[tokio::test]
    async fn mind_map_is_stored_and_cleared() {
        let reply = json!({"topic": "包豪斯", "root": {"label": "包豪斯", "children": [{"label": "定义"}]}});
        let stub = Arc::new(StubModel::replying(vec![
            Ok(reply.to_string()),
            Ok("not json".to_string()),
        ]));
        let controller = controller(stub);

        let map = controller.generate_mind_map("包豪斯").await;
        assert_eq!(map.as_ref().map(|m| m.children.len()), Some(1));
        assert_eq!(controller.snapshot().mind_map, map);

        assert!(controller.generate_mind_map("包豪斯").await.is_none());
        assert!(controller.snapshot().mind_map.is_none());
    }
}
