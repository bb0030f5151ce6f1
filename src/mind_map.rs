//! Generador de mapas mentales para un tema de examen.
//!
//! Los fallos nunca se propagan: sin mapa, la vista muestra su estado vacío.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    grading::clean_json_payload,
    llm::{ContentPart, GenerationRequest, SharedModel},
    models::MindMapNode,
};

const MIND_MAP_INSTRUCTION: &str = r#"
Generate a hierarchical mind map structure for a Tsinghua 621 Art History essay on the topic: "{topic}".
The structure should cover: Definition, Background, Characteristics/Style, Key Artists/Works, Impact/Influence, and Conclusion.
Return a root node whose children are those six branches, each with its own key points as children.
"#;

/// Forma del cable: `{topic, root}`. Sólo interesa la raíz.
#[derive(Debug, Deserialize)]
struct MindMapEnvelope {
    root: MindMapNode,
}

pub fn mind_map_schema() -> Value {
    let leaf = json!({
        "type": "object",
        "properties": {"label": {"type": "string"}},
        "required": ["label"],
    });
    let branch = json!({
        "type": "object",
        "properties": {
            "label": {"type": "string"},
            "children": {"type": "array", "items": leaf},
        },
        "required": ["label"],
    });
    json!({
        "type": "object",
        "properties": {
            "topic": {"type": "string"},
            "root": {
                "type": "object",
                "properties": {
                    "label": {"type": "string"},
                    "children": {"type": "array", "items": branch},
                },
                "required": ["label", "children"],
            },
        },
        "required": ["topic", "root"],
    })
}

/// Extrae el nodo raíz de la respuesta del proveedor.
pub fn parse_mind_map(raw: &str) -> Result<MindMapNode, serde_json::Error> {
    let envelope: MindMapEnvelope = serde_json::from_str(clean_json_payload(raw))?;
    Ok(envelope.root)
}

#[derive(Clone)]
pub struct MindMapClient {
    model: SharedModel,
}

impl MindMapClient {
    pub fn new(model: SharedModel) -> Self {
        Self { model }
    }

    pub fn build_request(&self, topic: &str) -> GenerationRequest {
        GenerationRequest {
            system_instruction: MIND_MAP_INSTRUCTION.replace("{topic}", topic),
            parts: vec![ContentPart::Text(format!("Generate mind map for: {topic}"))],
            response_schema: mind_map_schema(),
            temperature: None,
        }
    }

    /// Devuelve `None` si el tema está vacío o si algo falla aguas arriba.
    pub async fn build_mind_map(&self, topic: &str) -> Option<MindMapNode> {
        let topic = topic.trim();
        if topic.is_empty() {
            return None;
        }

        let raw = match self.model.generate(self.build_request(topic)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(topic, error = %e, "No se pudo generar el mapa mental");
                return None;
            }
        };

        match parse_mind_map(&raw) {
            Ok(root) => {
                info!(topic, depth = root.depth(), branches = root.children.len(), "Mapa mental generado");
                Some(root)
            }
            Err(e) => {
                warn!(topic, error = %e, "Respuesta de mapa mental inválida");
                None
            }
        }
    }
}
