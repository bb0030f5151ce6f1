//! Carga y gestión de configuración de la aplicación (servidor + LLM).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Variante del proveedor de preguntas de práctica.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PracticeProviderKind {
    /// Tres preguntas fijas, independientes de los puntos débiles.
    #[default]
    Static,
    /// Preguntas generadas por el modelo a partir de los puntos débiles.
    Generative,
}

impl PracticeProviderKind {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "generative" => Ok(Self::Generative),
            other => Err(anyhow!("Proveedor de práctica no soportado: {other}")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Generative => "generative",
        }
    }
}

/// Límite del cuerpo de `/submit`: una foto de ~20 MB (límite de datos en
/// línea de Gemini) más el 4/3 de la codificación base64.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 28 * 1024 * 1024;

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub frontend_dir: PathBuf,
    pub open_browser: bool,
    pub max_upload_bytes: usize,
    /// Las sesiones sin actividad durante este tiempo se descartan.
    pub session_idle_ttl: Duration,

    /// Sin clave el servidor arranca igual; cada llamada falla con error de autenticación.
    pub gemini_api_key: Option<String>,
    pub llm_chat_model: String,
    pub grading_temperature: f64,
    pub practice_provider: PracticeProviderKind,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3322".to_string(),
            frontend_dir: PathBuf::from("frontend"),
            open_browser: true,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            session_idle_ttl: Duration::from_secs(2 * 60 * 60),
            gemini_api_key: None,
            llm_chat_model: "gemini-2.5-flash".to_string(),
            grading_temperature: 0.3,
            practice_provider: PracticeProviderKind::Static,
        }
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let server_addr = env::var("SERVER_ADDR").unwrap_or(defaults.server_addr);
        let frontend_dir = env::var("FRONTEND_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.frontend_dir);
        let open_browser = match env::var("OPEN_BROWSER") {
            Ok(value) => parse_bool(&value)?,
            Err(_) => defaults.open_browser,
        };

        let max_upload_bytes = match env::var("MAX_UPLOAD_BYTES") {
            Ok(value) => parse_positive("MAX_UPLOAD_BYTES", &value)? as usize,
            Err(_) => defaults.max_upload_bytes,
        };
        let session_idle_ttl = match env::var("SESSION_IDLE_TTL_SECS") {
            Ok(value) => Duration::from_secs(parse_positive("SESSION_IDLE_TTL_SECS", &value)?),
            Err(_) => defaults.session_idle_ttl,
        };

        let gemini_api_key = env::var("GEMINI_API_KEY")
            .or_else(|_| env::var("API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty());

        let llm_chat_model = env::var("LLM_CHAT_MODEL")
            .ok()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or(defaults.llm_chat_model);

        let grading_temperature = match env::var("GRADING_TEMPERATURE") {
            Ok(value) => parse_temperature(&value)?,
            Err(_) => defaults.grading_temperature,
        };

        let practice_provider = match env::var("PRACTICE_PROVIDER") {
            Ok(value) => PracticeProviderKind::from_str(&value)?,
            Err(_) => defaults.practice_provider,
        };

        Ok(Self {
            server_addr,
            frontend_dir,
            open_browser,
            max_upload_bytes,
            session_idle_ttl,
            gemini_api_key,
            llm_chat_model,
            grading_temperature,
            practice_provider,
        })
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("Valor booleano inválido: {other}")),
    }
}

fn parse_positive(name: &str, value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(anyhow!("{name} debe ser un entero positivo, recibido {value}")),
    }
}

fn parse_temperature(value: &str) -> Result<f64> {
    let temperature: f64 = value
        .trim()
        .parse()
        .map_err(|_| anyhow!("GRADING_TEMPERATURE no es un número: {value}"))?;
    if !(0.0..=2.0).contains(&temperature) {
        return Err(anyhow!(
            "GRADING_TEMPERATURE debe estar entre 0 y 2, recibido {temperature}"
        ));
    }
    Ok(temperature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn practice_provider_names() {
        assert_eq!(
            PracticeProviderKind::from_str(" Generative ").unwrap(),
            PracticeProviderKind::Generative
        );
        assert_eq!(PracticeProviderKind::Static.as_str(), "static");
        assert!(PracticeProviderKind::from_str("llm").is_err());
    }

    #[test]
    fn temperature_must_be_in_range() {
        assert_eq!(parse_temperature("0.3").unwrap(), 0.3);
        assert!(parse_temperature("2.5").is_err());
        assert!(parse_temperature("caliente").is_err());
    }

    #[test]
    fn booleans_accept_common_spellings() {
        assert!(parse_bool("YES").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("quizá").is_err());
    }

    #[test]
    fn limits_must_be_positive_integers() {
        assert_eq!(parse_positive("MAX_UPLOAD_BYTES", " 1048576 ").unwrap(), 1_048_576);
        assert!(parse_positive("MAX_UPLOAD_BYTES", "0").is_err());
        assert!(parse_positive("SESSION_IDLE_TTL_SECS", "-5").is_err());
    }

    #[test]
    fn defaults_match_low_temperature_grading() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.grading_temperature, 0.3);
        assert_eq!(cfg.llm_chat_model, "gemini-2.5-flash");
        assert!(cfg.gemini_api_key.is_none());
        assert!(cfg.max_upload_bytes > 20 * 1024 * 1024);
    }
}
