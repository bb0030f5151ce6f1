//! Modelos de dominio: petición de corrección, informe estructurado,
//! preguntas de práctica y nodos del mapa mental.
//!
//! Los nombres en el cable son camelCase, igual que los devuelve el proveedor.

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Perfil de tono del corrector. Sólo cambia la redacción de la instrucción
/// de sistema, nunca la estructura del JSON pedido.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    #[default]
    Professor,
    Senior,
    Analyst,
}

impl Persona {
    pub fn tone(self) -> &'static str {
        match self {
            Self::Professor => "You are a strict, authoritative professor at Tsinghua Academy of Arts & Design. Focus on academic rigor, historical accuracy, and depth. Critique harshly but constructively.",
            Self::Senior => "You are an encouraging, successful PhD student (Senior) from Tsinghua. Be supportive, use approachable language, but point out critical mistakes that could cost marks.",
            Self::Analyst => "You are an objective data analyst. Focus purely on structure, coverage percentages, and logic flow without emotional coloring.",
        }
    }
}

/// Una entrega del estudiante. Se construye por envío y se descarta después.
#[derive(Debug, Clone, Default)]
pub struct GradingRequest {
    pub topic: String,
    pub answer_text: Option<String>,
    pub answer_image: Option<Vec<u8>>,
    pub persona: Persona,
}

impl GradingRequest {
    pub fn new(topic: impl Into<String>, persona: Persona) -> Self {
        Self {
            topic: topic.into(),
            persona,
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.answer_text = Some(text.into());
        self
    }

    pub fn with_image(mut self, bytes: Vec<u8>) -> Self {
        self.answer_image = Some(bytes);
        self
    }

    /// Texto de la respuesta si no está vacío.
    pub fn text(&self) -> Option<&str> {
        self.answer_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }

    /// Bytes de la imagen si no están vacíos.
    pub fn image(&self) -> Option<&[u8]> {
        self.answer_image
            .as_deref()
            .filter(|bytes| !bytes.is_empty())
    }

    pub fn has_image(&self) -> bool {
        self.image().is_some()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.topic.trim().is_empty() {
            return Err(ValidationError::MissingTopic);
        }
        if self.text().is_none() && self.image().is_none() {
            return Err(ValidationError::MissingAnswer);
        }
        Ok(())
    }
}

// --- Informe de corrección ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePoint {
    pub point: String,
    pub covered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicStatus {
    Good,
    Average,
    Poor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicNode {
    pub section: String,
    pub evaluation: String,
    pub status: LogicStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Fact,
    Date,
    Style,
    Grammar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorItem {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub original: String,
    pub correction: String,
    pub explanation: String,
}

/// Una dimensión del radar. `A`/`B` son los nombres antiguos de las puntuaciones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarMetric {
    pub subject: String,
    #[serde(alias = "A")]
    pub user_score: u32,
    #[serde(alias = "B")]
    pub reference_score: u32,
    pub full_mark: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Optimization {
    pub original_segment: String,
    pub improved_segment: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritingTemplateItem {
    pub technique: String,
    pub template: String,
    pub example: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritingTemplates {
    pub brainstorming: Vec<WritingTemplateItem>,
    pub intro: Vec<WritingTemplateItem>,
    pub conclusion: Vec<WritingTemplateItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandwritingEvaluation {
    pub legibility: String,
    pub estimated_word_count: u32,
    pub time_management_advice: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparativeLevel {
    Excellent,
    Good,
    Pass,
    Fail,
}

/// Informe devuelto por una corrección correcta. Inmutable una vez validado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingReport {
    /// Escala 0-30.
    pub overall_score: u32,
    pub summary: String,
    pub knowledge_points: Vec<KnowledgePoint>,
    pub logic_structure: Vec<LogicNode>,
    pub keywords_detected: Vec<String>,
    pub errors: Vec<ErrorItem>,
    pub radar_data: Vec<RadarMetric>,
    pub optimization: Optimization,
    pub writing_templates: WritingTemplates,
    pub academic_language_score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handwriting_evaluation: Option<HandwritingEvaluation>,
    pub comparative_level: ComparativeLevel,
    pub comparative_comment: String,
    pub model_essay: String,
}

impl GradingReport {
    /// Puntos de conocimiento no cubiertos, en el orden del informe.
    pub fn weak_points(&self) -> Vec<String> {
        self.knowledge_points
            .iter()
            .filter(|kp| !kp.covered)
            .map(|kp| kp.point.clone())
            .collect()
    }

    pub fn score_band(&self) -> ScoreBand {
        ScoreBand::from_score(self.overall_score)
    }

    pub fn essay_band(&self) -> ModelEssayBand {
        ModelEssayBand::from_essay(&self.model_essay)
    }
}

/// Franja de nota usada por la vista para colorear la puntuación (sobre 30).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreBand {
    High,
    Medium,
    Low,
}

impl ScoreBand {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 24 => Self::High,
            s if s >= 18 => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Tipo de pregunta inferido a partir de la longitud del ensayo modelo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEssayBand {
    pub question_type: QuestionType,
    pub label: &'static str,
    pub target_length: &'static str,
}

impl ModelEssayBand {
    pub fn from_essay(essay: &str) -> Self {
        let chars = essay.chars().count();
        let (question_type, target_length) = if chars < 300 {
            (QuestionType::NounExplanation, "~150字")
        } else if chars < 700 {
            (QuestionType::ShortAnswer, "~400字")
        } else {
            (QuestionType::Essay, "~800字+")
        };
        Self {
            question_type,
            label: question_type.label(),
            target_length,
        }
    }
}

// --- Práctica ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    NounExplanation,
    ShortAnswer,
    Essay,
}

impl QuestionType {
    pub fn label(self) -> &'static str {
        match self {
            Self::NounExplanation => "名词解释",
            Self::ShortAnswer => "简答题",
            Self::Essay => "论述题",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub content: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
}

impl Question {
    pub fn new(
        id: impl Into<String>,
        kind: QuestionType,
        content: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            topic: topic.into(),
            year: None,
        }
    }
}

// --- Mapa mental ---

/// Nodo del mapa mental. Las hojas pueden venir sin `children`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindMapNode {
    pub label: String,
    #[serde(default)]
    pub children: Vec<MindMapNode>,
}

impl MindMapNode {
    /// Profundidad del árbol contando la raíz como nivel 1.
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Self::depth).max().unwrap_or(0)
    }
}
