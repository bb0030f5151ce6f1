//! Proveedores de preguntas de práctica a partir de los puntos débiles.
//!
//! `StaticSuggestionProvider` es el comportamiento por defecto: devuelve
//! siempre las mismas tres preguntas. `GenerativeSuggestionProvider` pide al
//! modelo preguntas dirigidas a los puntos débiles.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::PracticeProviderKind,
    grading::clean_json_payload,
    llm::{ContentPart, GenerationRequest, SharedModel},
    models::{Question, QuestionType},
};

const MAX_GENERATED_QUESTIONS: usize = 3;

#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    fn kind(&self) -> PracticeProviderKind;

    async fn suggest(&self, weak_points: &[String]) -> Result<Vec<Question>>;
}

pub type SharedSuggestionProvider = Arc<dyn SuggestionProvider>;

/// Construye el proveedor configurado.
pub fn provider_for(kind: PracticeProviderKind, model: SharedModel) -> SharedSuggestionProvider {
    match kind {
        PracticeProviderKind::Static => Arc::new(StaticSuggestionProvider),
        PracticeProviderKind::Generative => Arc::new(GenerativeSuggestionProvider::new(model)),
    }
}

pub fn static_questions() -> Vec<Question> {
    vec![
        Question::new(
            "1",
            QuestionType::NounExplanation,
            "解释“气韵生动”及其在六法论中的地位",
            "中国画论",
        ),
        Question::new(
            "2",
            QuestionType::ShortAnswer,
            "简述包豪斯的设计教育体系及其影响",
            "现代设计史",
        ),
        Question::new(
            "3",
            QuestionType::Essay,
            "论述现实主义美术在19世纪法国的发展",
            "外国美术史",
        ),
    ]
}

/// Tres preguntas fijas; ignora los puntos débiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSuggestionProvider;

#[async_trait]
impl SuggestionProvider for StaticSuggestionProvider {
    fn kind(&self) -> PracticeProviderKind {
        PracticeProviderKind::Static
    }

    async fn suggest(&self, weak_points: &[String]) -> Result<Vec<Question>> {
        debug!(weak_points = weak_points.len(), "Sugerencias estáticas");
        Ok(static_questions())
    }
}

const SUGGESTION_INSTRUCTION: &str = r#"
You write practice questions for the Tsinghua University Academy of Arts & Design Master's Entrance Exam, Subject 621 (Art History & Theory).
Given the knowledge points a student failed to cover, write at most three exam-style questions in Chinese that train exactly those points.
Use a mix of question types: noun_explanation (名词解释), short_answer (简答题) and essay (论述题).
For each question give its type, the question content and a short topic label (e.g. 中国画论, 外国美术史, 现代设计史).
Output strictly in JSON format matching the schema.
"#;

#[derive(Debug, Deserialize)]
struct GeneratedQuestion {
    #[serde(rename = "type")]
    kind: QuestionType,
    content: String,
    topic: String,
}

#[derive(Debug, Deserialize)]
struct GeneratedQuestions {
    questions: Vec<GeneratedQuestion>,
}

fn suggestion_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "questions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "type": {"type": "string", "enum": ["noun_explanation", "short_answer", "essay"]},
                        "content": {"type": "string"},
                        "topic": {"type": "string"},
                    },
                    "required": ["type", "content", "topic"],
                }
            }
        },
        "required": ["questions"],
    })
}

/// Preguntas generadas a partir de los puntos débiles.
#[derive(Clone)]
pub struct GenerativeSuggestionProvider {
    model: SharedModel,
}

impl GenerativeSuggestionProvider {
    pub fn new(model: SharedModel) -> Self {
        Self { model }
    }
}

#[async_trait]
impl SuggestionProvider for GenerativeSuggestionProvider {
    fn kind(&self) -> PracticeProviderKind {
        PracticeProviderKind::Generative
    }

    async fn suggest(&self, weak_points: &[String]) -> Result<Vec<Question>> {
        if weak_points.is_empty() {
            return Ok(static_questions());
        }

        let list = weak_points
            .iter()
            .map(|point| format!("- {point}"))
            .collect::<Vec<_>>()
            .join("\n");
        let request = GenerationRequest {
            system_instruction: SUGGESTION_INSTRUCTION.to_string(),
            parts: vec![ContentPart::Text(format!(
                "Knowledge points the student missed:\n{list}"
            ))],
            response_schema: suggestion_schema(),
            temperature: None,
        };

        let raw = self.model.generate(request).await?;
        let generated: GeneratedQuestions = serde_json::from_str(clean_json_payload(&raw))?;

        let questions: Vec<Question> = generated
            .questions
            .into_iter()
            .filter(|q| !q.content.trim().is_empty())
            .take(MAX_GENERATED_QUESTIONS)
            .map(|q| Question::new(Uuid::new_v4().to_string(), q.kind, q.content, q.topic))
            .collect();

        if questions.is_empty() {
            return Err(anyhow!("El modelo no devolvió ninguna pregunta utilizable"));
        }

        info!(
            weak_points = weak_points.len(),
            questions = questions.len(),
            "Preguntas de práctica generadas"
        );
        Ok(questions)
    }
}
