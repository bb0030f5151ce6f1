//! Abstracción sobre Rig para hablar con el modelo generativo.
//!
//! El resto del crate sólo conoce `GenerativeModel`: una petición con
//! instrucción de sistema, partes de contenido y un esquema de respuesta JSON,
//! y una respuesta en texto. `LlmManager` la implementa con el proveedor
//! Gemini de Rig.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rig::completion::CompletionModel as _;
use rig::message::{AssistantContent, ImageMediaType, Message, UserContent};
use rig::OneOrMany;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::{config::AppConfig, errors::TransportError};

/// Una parte del contenido de usuario.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// Bytes crudos; el backend los codifica en base64 sin prefijo data-URI.
    InlineImage { mime_type: String, data: Vec<u8> },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn jpeg(data: Vec<u8>) -> Self {
        Self::InlineImage {
            mime_type: "image/jpeg".to_string(),
            data,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::InlineImage { .. })
    }
}

/// Petición de generación con salida JSON estricta.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub parts: Vec<ContentPart>,
    pub response_schema: Value,
    pub temperature: Option<f64>,
}

impl GenerationRequest {
    pub fn prompt_length(&self) -> usize {
        self.parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => text.len(),
                ContentPart::InlineImage { data, .. } => data.len(),
            })
            .sum::<usize>()
            + self.system_instruction.len()
    }
}

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Nombre del modelo, para logs y `/api/status`.
    fn model_name(&self) -> &str;

    /// Devuelve el texto JSON tal cual lo entrega el proveedor (puede venir vacío).
    async fn generate(&self, request: GenerationRequest) -> Result<String, TransportError>;
}

pub type SharedModel = Arc<dyn GenerativeModel>;

/// Gestor del modelo de chat sobre Gemini.
#[derive(Debug, Clone)]
pub struct LlmManager {
    api_key: Option<String>,
    chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            api_key: cfg.gemini_api_key.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        }
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    fn build_message(parts: &[ContentPart]) -> Result<Message, TransportError> {
        let content: Vec<UserContent> = parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => UserContent::text(text.clone()),
                ContentPart::InlineImage { mime_type, data } => UserContent::image_base64(
                    general_purpose::STANDARD.encode(data),
                    Some(image_media_type(mime_type)),
                    None,
                ),
            })
            .collect();

        let content = OneOrMany::many(content)
            .map_err(|_| TransportError::Upstream("petición sin contenido".to_string()))?;
        Ok(Message::User { content })
    }
}

fn image_media_type(mime_type: &str) -> ImageMediaType {
    match mime_type {
        "image/png" => ImageMediaType::PNG,
        "image/webp" => ImageMediaType::WEBP,
        "image/gif" => ImageMediaType::GIF,
        _ => ImageMediaType::JPEG,
    }
}

/// Parámetros específicos de Gemini: salida JSON contra el esquema dado.
fn generation_config(schema: &Value) -> Value {
    json!({
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": schema,
        }
    })
}

#[async_trait]
impl GenerativeModel for LlmManager {
    fn model_name(&self) -> &str {
        &self.chat_model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, TransportError> {
        use rig::client::CompletionClient as _;
        use rig::providers::gemini;

        let api_key = self
            .api_key
            .as_deref()
            .ok_or(TransportError::MissingCredential)?;

        let start_time = std::time::Instant::now();
        let prompt_length = request.prompt_length();
        let has_image = request.parts.iter().any(ContentPart::is_image);

        debug!(
            model = %self.chat_model,
            prompt_length,
            has_image,
            "Iniciando llamada a Gemini"
        );

        let client = gemini::Client::new(api_key);
        let model = client.completion_model(&self.chat_model);
        let message = Self::build_message(&request.parts)?;

        let mut builder = model
            .completion_request(message)
            .preamble(request.system_instruction)
            .additional_params(generation_config(&request.response_schema));
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    model = %self.chat_model,
                    elapsed_ms = start_time.elapsed().as_millis(),
                    prompt_length,
                    error = %e,
                    "La llamada a Gemini falló"
                );
                return Err(TransportError::from_provider_message(e.to_string()));
            }
        };

        let text: String = response
            .choice
            .iter()
            .filter_map(|content| match content {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();

        info!(
            model = %self.chat_model,
            elapsed_ms = start_time.elapsed().as_millis(),
            prompt_length,
            response_length = text.len(),
            "Llamada a Gemini completada"
        );

        Ok(text)
    }
}

/// Dobles de prueba: un modelo guionizado que registra cada petición.
#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use tokio::sync::Notify;

    use super::*;

    type Hook = Box<dyn Fn(&GenerationRequest) + Send + Sync>;

    #[derive(Default)]
    pub struct StubModel {
        replies: Mutex<VecDeque<Result<String, TransportError>>>,
        requests: Mutex<Vec<GenerationRequest>>,
        on_call: Mutex<Option<Hook>>,
        gate: Option<Arc<Notify>>,
    }

    impl StubModel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn replying(replies: Vec<Result<String, TransportError>>) -> Self {
            let stub = Self::new();
            *stub.replies.lock().unwrap() = replies.into();
            stub
        }

        /// Cada llamada espera a `gate.notify_one()` antes de responder.
        pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        /// Se ejecuta al recibir cada petición, antes de responder.
        pub fn on_call(&self, hook: impl Fn(&GenerationRequest) + Send + Sync + 'static) {
            *self.on_call.lock().unwrap() = Some(Box::new(hook));
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn requests(&self) -> Vec<GenerationRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerativeModel for StubModel {
        fn model_name(&self) -> &str {
            "stub-model"
        }

        async fn generate(&self, request: GenerationRequest) -> Result<String, TransportError> {
            if let Some(hook) = self.on_call.lock().unwrap().as_ref() {
                hook(&request);
            }
            self.requests.lock().unwrap().push(request);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Upstream("sin respuesta guionizada".to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_config_requests_strict_json() {
        let schema = json!({"type": "object"});
        let params = generation_config(&schema);
        assert_eq!(
            params["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(params["generationConfig"]["responseSchema"], schema);
    }

    #[test]
    fn empty_request_cannot_be_sent() {
        let err = LlmManager::build_message(&[]).unwrap_err();
        assert!(matches!(err, TransportError::Upstream(_)));
    }

    #[tokio::test]
    async fn missing_key_is_an_auth_error_at_call_time() {
        let manager = LlmManager {
            api_key: None,
            chat_model: "gemini-2.5-flash".to_string(),
        };
        assert!(!manager.has_credential());

        let err = manager
            .generate(GenerationRequest {
                system_instruction: "sys".to_string(),
                parts: vec![ContentPart::text("hola")],
                response_schema: json!({"type": "object"}),
                temperature: Some(0.3),
            })
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::MissingCredential);
        assert!(err.is_auth());
    }
}
