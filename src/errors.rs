//! Taxonomía de errores del flujo de corrección.
//!
//! - `ValidationError`: la petición no es enviable; nunca llega a la red.
//! - `TransportError`: fallo del proveedor (red, credencial, rechazo).
//! - `SchemaError`: hubo respuesta pero no encaja con la forma esperada.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("el tema es obligatorio")]
    MissingTopic,
    #[error("se necesita una respuesta escrita o una imagen")]
    MissingAnswer,
    #[error("la imagen no es base64 válido: {0}")]
    InvalidImage(String),
}

impl ValidationError {
    /// Aviso mostrado al estudiante (textos de la interfaz original).
    pub fn notice(&self) -> &'static str {
        match self {
            Self::MissingTopic => "请输入题目",
            Self::MissingAnswer => "请输入答案或上传图片",
            Self::InvalidImage(_) => "图片无法读取，请重新上传",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no hay credencial configurada (GEMINI_API_KEY)")]
    MissingCredential,
    #[error("el proveedor rechazó la credencial: {0}")]
    Rejected(String),
    #[error("fallo en la llamada al proveedor: {0}")]
    Upstream(String),
}

impl TransportError {
    /// Clasifica un error textual del proveedor. Los rechazos de autenticación
    /// se distinguen del resto para poder registrarlos como tales.
    pub fn from_provider_message(message: String) -> Self {
        let lower = message.to_lowercase();
        let has_auth_status = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| token == "401" || token == "403");
        if has_auth_status
            || lower.contains("api key")
            || lower.contains("api_key")
            || lower.contains("permission_denied")
            || lower.contains("unauthenticated")
        {
            Self::Rejected(message)
        } else {
            Self::Upstream(message)
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::MissingCredential | Self::Rejected(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("respuesta JSON mal formada: {0}")]
    Malformed(String),
    #[error("el campo {field} vale {value}, fuera del rango 0..={max}")]
    OutOfRange {
        field: String,
        value: u32,
        max: u32,
    },
    #[error("valor inválido en {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("la respuesta incluye handwritingEvaluation sin imagen enviada")]
    UnexpectedHandwriting,
    #[error("falta handwritingEvaluation para una respuesta manuscrita")]
    MissingHandwriting,
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Error de la operación `grade`: todo o nada.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GradingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_messages_are_classified() {
        let rejected = TransportError::from_provider_message(
            "ProviderError: 403 PERMISSION_DENIED".to_string(),
        );
        assert!(rejected.is_auth());

        let upstream =
            TransportError::from_provider_message("HttpError: connection reset".to_string());
        assert_eq!(
            upstream,
            TransportError::Upstream("HttpError: connection reset".to_string())
        );
        assert!(!upstream.is_auth());
        assert!(TransportError::MissingCredential.is_auth());

        let unauthorized = TransportError::from_provider_message(
            "HttpError: status 401 Unauthorized".to_string(),
        );
        assert!(unauthorized.is_auth());
    }

    #[test]
    fn status_codes_must_stand_alone() {
        for message in [
            "ProviderError: prompt has 4013 tokens, limit exceeded",
            "ProviderError: request id 14032 failed with 500",
            "HttpError: 503 backend 2401x unavailable",
        ] {
            let err = TransportError::from_provider_message(message.to_string());
            assert_eq!(err, TransportError::Upstream(message.to_string()));
        }
    }

    #[test]
    fn grading_error_wraps_sources() {
        let err: GradingError = ValidationError::MissingTopic.into();
        assert_eq!(err, GradingError::Validation(ValidationError::MissingTopic));
        assert_eq!(err.to_string(), "el tema es obligatorio");
    }
}
