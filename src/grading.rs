//! Cliente de corrección: construye la petición (instrucción + partes +
//! esquema), llama al modelo y valida la respuesta contra la forma del
//! `GradingReport`.
//!
//! La corrección es todo o nada: cualquier discrepancia estructural o valor
//! fuera de rango se devuelve como `SchemaError`, nunca como informe parcial.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    errors::{GradingError, SchemaError},
    llm::{ContentPart, GenerationRequest, SharedModel},
    models::{GradingReport, GradingRequest},
};

pub const MAX_OVERALL_SCORE: u32 = 30;
pub const MAX_PERCENT_SCORE: u32 = 100;

const TASK_DESCRIPTION: &str = r#"
You are an expert grader for the Tsinghua University Academy of Arts & Design Master's Entrance Exam, Subject 621 (Art History & Theory).
Reference Texts: 《中国美术史》, 《外国美术史》, 《世界现代设计史》.

Your Task:
1. Analyze the user's answer (text or handwriting image) for the topic: "{topic}".
2. Check for factual errors (dates, artists, dynasties, styles).
3. Evaluate against the standard "Total-Split-Total" (总-分-总) logical structure: Introduction, Body, Conclusion.
4. Assess academic language usage (academicLanguageScore, 0-100).
5. Compare with a hypothetical "Excellent Model Answer" standard (comparativeLevel and comparativeComment).
6. Provide a "One-click Optimization" rewrite for the weakest section.
7. Score the answer with overallScore as an integer from 0 to 30.

8. GENERATE WRITING TEMPLATES specifically for this topic:
   - Brainstorming Templates: 2 distinct thinking frameworks for when students are stuck.
     - technique: a clear name for the mental model (e.g. "Internal vs External Factors").
     - template: a step-by-step guide on HOW to think. Give a process, not a fill-in-the-blank sentence.
     - example: 3 concrete arguments for THIS topic derived using this method.
   - Introduction Templates: 2 opening strategies combining historical context with the definition.
   - Conclusion Templates: 2 elevation strategies towards cultural spirit or modern value.
   - For Intro/Conclusion, provide a "template" pattern and an "example" applied to this topic.

9. GENERATE A FULL MODEL ESSAY (范文) for this topic.
   - Determine the question type based on the topic complexity.
   - Type 1: "Noun Explanation" (名词解释). Target ~150-250 words. Definition -> Historical Context -> Artistic Characteristics -> Impact/Status.
   - Type 2: "Short Answer" (简答题). Target ~400-600 words. Use numbered subheadings ("1. ...", "2. ...").
   - Type 3: "Essay Question" (论述题). Target ~800-1200 words. Use section titles ("一、", "二、", "三、", "四、").
   - Academic, rigorous style using terms from the 621 reference books. Plain text with clear spacing.

radarData must contain the dimensions Knowledge, Logic, Language, Innovation and Depth, with userScore and referenceScore from 0 to 100 and fullMark always 100.
"#;

const HANDWRITING_INSTRUCTION: &str = "An image is provided: perform OCR on the handwritten answer, then fill handwritingEvaluation with legibility, estimatedWordCount and timeManagementAdvice.";

const NO_HANDWRITING_INSTRUCTION: &str =
    "No image is provided: do NOT include handwritingEvaluation in the output.";

/// Construye la instrucción de sistema: tarea fija + tono de la persona.
pub fn system_instruction(request: &GradingRequest) -> String {
    let handwriting = if request.has_image() {
        HANDWRITING_INSTRUCTION
    } else {
        NO_HANDWRITING_INSTRUCTION
    };
    format!(
        "{}\n{}\n\nOutput strictly in JSON format matching the schema.\nTone: {}",
        TASK_DESCRIPTION.replace("{topic}", request.topic.trim()),
        handwriting,
        request.persona.tone()
    )
}

/// Partes de contenido: imagen (si la hay) seguida del texto.
pub fn content_parts(request: &GradingRequest) -> Vec<ContentPart> {
    let topic = request.topic.trim();
    let mut parts = Vec::new();

    match (request.image(), request.text()) {
        (Some(image), text) => {
            parts.push(ContentPart::jpeg(image.to_vec()));
            let mut prompt = format!("Analyze this handwritten answer for the topic: {topic}.");
            if let Some(text) = text {
                prompt.push_str(&format!("\n\nTyped notes from the student:\n{text}"));
            }
            parts.push(ContentPart::Text(prompt));
        }
        (None, text) => {
            parts.push(ContentPart::Text(format!(
                "Topic: {topic}\n\nStudent Answer:\n{}",
                text.unwrap_or_default()
            )));
        }
    }

    parts
}

fn string() -> Value {
    json!({"type": "string"})
}

fn described(kind: &str, description: &str) -> Value {
    json!({"type": kind, "description": description})
}

fn template_list(technique: &str) -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "technique": described("string", technique),
                "template": string(),
                "example": string(),
            },
            "required": ["technique", "template", "example"],
        }
    })
}

/// Esquema de respuesta del informe. `handwritingEvaluation` sólo existe
/// cuando se envía una imagen.
pub fn report_schema(include_handwriting: bool) -> Value {
    let mut properties = json!({
        "overallScore": described("integer", "Score out of 30"),
        "summary": described("string", "Overall commentary based on selected persona tone"),
        "knowledgePoints": {
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "point": string(),
                    "covered": {"type": "boolean"},
                    "missingDetail": string(),
                },
                "required": ["point", "covered"],
            }
        },
        "logicStructure": {
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "section": described("string", "e.g., Introduction, Body Paragraph 1"),
                    "evaluation": string(),
                    "status": {"type": "string", "enum": ["good", "average", "poor"]},
                },
                "required": ["section", "evaluation", "status"],
            }
        },
        "keywordsDetected": {"type": "array", "items": string()},
        "errors": {
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "type": {"type": "string", "enum": ["fact", "date", "style", "grammar"]},
                    "original": string(),
                    "correction": string(),
                    "explanation": string(),
                },
                "required": ["type", "original", "correction", "explanation"],
            }
        },
        "radarData": {
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "subject": described("string", "Dimensions: Knowledge, Logic, Language, Innovation, Depth"),
                    "userScore": described("integer", "User score 0-100"),
                    "referenceScore": described("integer", "Standard/Passing score 0-100"),
                    "fullMark": described("integer", "Always 100"),
                },
                "required": ["subject", "userScore", "referenceScore", "fullMark"],
            }
        },
        "optimization": {
            "type": "object",
            "properties": {
                "originalSegment": described("string", "A weak paragraph from the user input"),
                "improvedSegment": described("string", "Rewritten version in academic style"),
                "reason": string(),
            },
            "required": ["originalSegment", "improvedSegment", "reason"],
        },
        "writingTemplates": {
            "type": "object",
            "properties": {
                "brainstorming": template_list("Name of the thinking model, e.g., 'Internal vs External Analysis'"),
                "intro": template_list("Name of the technique, e.g., 'Historical Context Entry'"),
                "conclusion": template_list("Name of the technique, e.g., 'Cultural Value Elevation'"),
            },
            "required": ["brainstorming", "intro", "conclusion"],
        },
        "academicLanguageScore": described("integer", "0-100"),
        "comparativeLevel": {"type": "string", "enum": ["Excellent", "Good", "Pass", "Fail"]},
        "comparativeComment": string(),
        "modelEssay": described("string", "A complete, high-quality model essay with subheadings. Length adapts to the question type: Noun Explanation (~200 words), Short Answer (~400 words), Essay (~800+ words)."),
    });

    let mut required = vec![
        "overallScore",
        "summary",
        "knowledgePoints",
        "logicStructure",
        "keywordsDetected",
        "errors",
        "radarData",
        "optimization",
        "writingTemplates",
        "academicLanguageScore",
        "comparativeLevel",
        "comparativeComment",
        "modelEssay",
    ];

    if include_handwriting {
        properties["handwritingEvaluation"] = json!({
            "type": "object",
            "properties": {
                "legibility": string(),
                "estimatedWordCount": {"type": "integer"},
                "timeManagementAdvice": string(),
            },
            "required": ["legibility", "estimatedWordCount", "timeManagementAdvice"],
        });
        required.push("handwritingEvaluation");
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Limpia la respuesta del LLM: vacía cuenta como `{}` y se quitan las
/// vallas de Markdown si las hubiera.
pub fn clean_json_payload(raw: &str) -> &str {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if trimmed.is_empty() {
        "{}"
    } else {
        trimmed
    }
}

fn check_range(field: &str, value: u32, max: u32) -> Result<(), SchemaError> {
    if value > max {
        return Err(SchemaError::OutOfRange {
            field: field.to_string(),
            value,
            max,
        });
    }
    Ok(())
}

/// Parsea y valida el texto devuelto por el proveedor.
pub fn parse_report(raw: &str, image_submitted: bool) -> Result<GradingReport, SchemaError> {
    let report: GradingReport = serde_json::from_str(clean_json_payload(raw))?;

    check_range("overallScore", report.overall_score, MAX_OVERALL_SCORE)?;
    check_range(
        "academicLanguageScore",
        report.academic_language_score,
        MAX_PERCENT_SCORE,
    )?;

    for (i, metric) in report.radar_data.iter().enumerate() {
        check_range(
            &format!("radarData[{i}].userScore"),
            metric.user_score,
            MAX_PERCENT_SCORE,
        )?;
        check_range(
            &format!("radarData[{i}].referenceScore"),
            metric.reference_score,
            MAX_PERCENT_SCORE,
        )?;
        if metric.full_mark != MAX_PERCENT_SCORE {
            return Err(SchemaError::InvalidValue {
                field: format!("radarData[{i}].fullMark"),
                reason: format!("debe ser 100, recibido {}", metric.full_mark),
            });
        }
    }

    match (image_submitted, report.handwriting_evaluation.is_some()) {
        (true, false) => return Err(SchemaError::MissingHandwriting),
        (false, true) => return Err(SchemaError::UnexpectedHandwriting),
        _ => {}
    }

    Ok(report)
}

/// Cliente de corrección sobre un `GenerativeModel`.
#[derive(Clone)]
pub struct GradingClient {
    model: SharedModel,
    temperature: f64,
}

impl GradingClient {
    pub fn new(model: SharedModel, temperature: f64) -> Self {
        Self { model, temperature }
    }

    pub fn build_request(&self, request: &GradingRequest) -> GenerationRequest {
        GenerationRequest {
            system_instruction: system_instruction(request),
            parts: content_parts(request),
            response_schema: report_schema(request.has_image()),
            temperature: Some(self.temperature),
        }
    }

    pub async fn grade(&self, request: &GradingRequest) -> Result<GradingReport, GradingError> {
        request.validate()?;

        let generation = self.build_request(request);
        debug!(
            model = %self.model.model_name(),
            persona = ?request.persona,
            has_image = request.has_image(),
            prompt_length = generation.prompt_length(),
            "Enviando petición de corrección"
        );

        let raw = self.model.generate(generation).await?;

        match parse_report(&raw, request.has_image()) {
            Ok(report) => {
                info!(
                    overall_score = report.overall_score,
                    weak_points = report.weak_points().len(),
                    errors = report.errors.len(),
                    "Informe de corrección validado"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    response_length = raw.len(),
                    "La respuesta de corrección no encaja con el esquema"
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
pub mod fixtures {
    use serde_json::{json, Value};

    /// Informe válido tal como lo devolvería el proveedor.
    pub fn report_json(with_handwriting: bool) -> Value {
        let mut report = json!({
            "overallScore": 21,
            "summary": "结构清晰，但对北宋与南宋的风格差异论述不足。",
            "knowledgePoints": [
                {"point": "荆浩《笔法记》", "covered": true},
                {"point": "马远、夏圭的边角构图", "covered": false, "missingDetail": "未提及“马一角、夏半边”"},
                {"point": "郭熙“三远”法", "covered": false, "missingDetail": "缺少高远、深远、平远的解释"}
            ],
            "logicStructure": [
                {"section": "Introduction", "evaluation": "定义准确", "status": "good"},
                {"section": "Body Paragraph 1", "evaluation": "论据单薄", "status": "average"},
                {"section": "Conclusion", "evaluation": "未升华", "status": "poor"}
            ],
            "keywordsDetected": ["全景式构图", "范宽", "全景式构图"],
            "errors": [
                {"type": "date", "original": "范宽生活于南宋", "correction": "范宽为北宋画家", "explanation": "《溪山行旅图》作于北宋初年"}
            ],
            "radarData": [
                {"subject": "Knowledge", "userScore": 70, "referenceScore": 85, "fullMark": 100},
                {"subject": "Logic", "userScore": 65, "referenceScore": 80, "fullMark": 100}
            ],
            "optimization": {
                "originalSegment": "宋代山水画很好看。",
                "improvedSegment": "宋代山水画以“可行、可望、可游、可居”为审美理想。",
                "reason": "使用学术术语"
            },
            "writingTemplates": {
                "brainstorming": [{"technique": "内外因分析", "template": "第一步……第二步……", "example": "一、理学；二、画院；三、文人"}],
                "intro": [{"technique": "历史语境切入", "template": "在……背景下，……", "example": "在五代北宋的社会变革中……"}],
                "conclusion": [{"technique": "文化价值升华", "template": "综上……", "example": "综上，宋代山水画……"}]
            },
            "academicLanguageScore": 68,
            "comparativeLevel": "Good",
            "comparativeComment": "高于平均水平",
            "modelEssay": "一、引言\n宋代山水画……"
        });
        if with_handwriting {
            report["handwritingEvaluation"] = json!({
                "legibility": "字迹工整",
                "estimatedWordCount": 850,
                "timeManagementAdvice": "控制在40分钟内"
            });
        }
        report
    }
}
