//! Comparación SOP ↔ guías FDA y preguntas libres sobre ambas fuentes.
//!
//! Flujo:
//!   1. Recuperación en el índice de la sesión (SOP del usuario).
//!   2. Recuperación en el índice de referencia (guías FDA).
//!   3. Construcción de un prompt con ambas fuentes claramente separadas.
//!   4. Llamada al LLM y, en la comparación, validación del JSON devuelto.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    error::{PipelineError, Result},
    llm::{strip_json_fences, LanguageModel},
    models::{ActionItem, Answer, ComparisonResult},
    reference_index::ReferenceIndex,
    session_index::SessionStore,
};

/// Consulta genérica para obtener una muestra representativa del SOP.
const SOP_SAMPLE_QUERY: &str = "sop document";
const SOP_SAMPLE_K: usize = 3;
const COMPARE_REFERENCE_K: usize = 2;
const ANSWER_SOP_K: usize = 2;
const ANSWER_REFERENCE_K: usize = 2;

pub const NO_MATCHING_FDA_CONTENT: &str = "No matching FDA content found.";
pub const NO_SOP_CONTENT: &str = "No relevant information found in your SOP document.";
pub const NO_FDA_CONTENT: &str = "No relevant FDA guidelines found.";
pub const NO_CONTENT_IN_EITHER_SOURCE: &str = "No relevant information was found in either your SOP document or the FDA guidelines to answer this question.";

const COMPARISON_PREAMBLE: &str = "You are an FDA compliance analyst. You reply with a single valid JSON object and nothing else.";
const ANSWER_PREAMBLE: &str = "You are an FDA compliance assistant. You only use the sources provided in the prompt.";
const ACTIONABLE_PREAMBLE: &str = "You are an expert in FDA compliance.";

#[derive(Clone)]
pub struct Comparator {
    sessions: SessionStore,
    reference: ReferenceIndex,
    llm: Arc<dyn LanguageModel>,
}

impl Comparator {
    pub fn new(sessions: SessionStore, reference: ReferenceIndex, llm: Arc<dyn LanguageModel>) -> Self {
        Self { sessions, reference, llm }
    }

    /// Compara una muestra del SOP de la sesión con las guías FDA más relevantes.
    ///
    /// Devuelve `NoMatchFound` (error blando) si no hay contenido que comparar.
    pub async fn compare_sop_to_reference(&self, session_id: &str) -> Result<ComparisonResult> {
        let sample = self
            .sessions
            .lookup(session_id, SOP_SAMPLE_QUERY, SOP_SAMPLE_K)
            .await?;
        if sample.is_empty() {
            return Err(PipelineError::NoMatchFound(NO_SOP_CONTENT.to_string()));
        }
        let user_chunk = sample
            .iter()
            .map(|s| s.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let fda_matches = self.reference.lookup(&user_chunk, COMPARE_REFERENCE_K).await?;
        if fda_matches.is_empty() {
            warn!("Sesión '{session_id}': el índice de referencia no devolvió coincidencias.");
            return Err(PipelineError::NoMatchFound(NO_MATCHING_FDA_CONTENT.to_string()));
        }
        let fda_text = fda_matches
            .iter()
            .map(|m| m.entry.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = comparison_prompt(&user_chunk, &fda_text);
        let response = self.llm.complete(COMPARISON_PREAMBLE, &prompt).await?;
        let result = parse_comparison(&response)?;

        info!(
            "Sesión '{session_id}': comparación completada con {} posibles incidencias.",
            result.potential_issues.len()
        );
        Ok(result)
    }

    /// Responde una pregunta usando el SOP de la sesión y las guías FDA como contexto.
    ///
    /// Si alguna recuperación viene vacía se usa un texto sustituto; si vienen
    /// vacías las dos no se llama al LLM.
    pub async fn answer_question(&self, session_id: &str, question: &str) -> Result<Answer> {
        let sop_docs = self.sessions.lookup(session_id, question, ANSWER_SOP_K).await?;
        let fda_matches = self.reference.lookup(question, ANSWER_REFERENCE_K).await?;

        if sop_docs.is_empty() && fda_matches.is_empty() {
            info!("Sesión '{session_id}': ninguna fuente tiene contenido relevante.");
            return Ok(Answer { answer: NO_CONTENT_IN_EITHER_SOURCE.to_string() });
        }

        let sop_context = if sop_docs.is_empty() {
            NO_SOP_CONTENT.to_string()
        } else {
            sop_docs.iter().map(|d| d.chunk.text.as_str()).collect::<Vec<_>>().join("\n\n")
        };
        let fda_context = if fda_matches.is_empty() {
            NO_FDA_CONTENT.to_string()
        } else {
            fda_matches.iter().map(|m| m.entry.text.as_str()).collect::<Vec<_>>().join("\n\n")
        };

        let prompt = answer_prompt(&sop_context, &fda_context, question);
        let answer = self.llm.complete(ANSWER_PREAMBLE, &prompt).await?;
        Ok(Answer { answer: answer.trim().to_string() })
    }

    /// Convierte una incidencia en un elemento de checklist accionable.
    pub async fn make_actionable(&self, issue: &str) -> Result<ActionItem> {
        let prompt = format!(
            "Given the following issue in a hospital SOP:\n\"{issue}\"\n\n\
             Convert it into a short, clear, actionable checklist item.\n\
             Respond with just the action sentence."
        );
        let action = self.llm.complete(ACTIONABLE_PREAMBLE, &prompt).await?;
        let action = action.trim().trim_matches('"').trim().to_string();
        if action.is_empty() {
            return Err(PipelineError::LanguageModel("el LLM devolvió una acción vacía".into()));
        }
        Ok(ActionItem { action })
    }
}

fn comparison_prompt(user_chunk: &str, fda_text: &str) -> String {
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(ComparisonResult))
        .unwrap_or_default();
    format!(
        r#"You are comparing a hospital's SOP against FDA regulations.

Return a JSON object with the following fields:
- title: A short descriptive title for the overall analysis
- fda_requirement_summary: A comprehensive summary of FDA's expectations and requirements
- user_summary: A concise summary of what the hospital's SOP says
- potential_issues: An array of objects, where each object has the following structure:
    - issue: A specific compliance gap or issue described in a single actionable sentence
    - category: A category for this issue (e.g., "Validation Process", "Equipment Calibration Requirements", "Documentation Requirements", etc.)
    - fda_requirement: The specific FDA requirement related to this particular issue
    - sop_detail: The specific part of the SOP that relates to this issue

Make sure each potential issue is specific, actionable, and includes its own related FDA requirement and SOP detail.
Your response should be structured so each issue can be displayed independently with its own relevant context.

Aim for 3-5 potential issues, each focusing on a different aspect of compliance.

The JSON object must validate against this JSON Schema:
{schema}

Now compare the following SOP content:
"{user_chunk}"

with the following FDA guideline content:
"{fda_text}"
"#
    )
}

fn answer_prompt(sop_context: &str, fda_context: &str, question: &str) -> String {
    format!(
        r#"Answer this question based on the following sources:

YOUR SOP DOCUMENT CONTENT:
{sop_context}

RELEVANT FDA GUIDELINES:
{fda_context}

QUESTION: {question}

In your answer:
1. If information comes from the SOP document, specify that
2. If information comes from FDA guidelines, specify that
3. If there are discrepancies between the two, highlight them
4. If the question cannot be answered from either source, say so

Give a clear, direct answer that references the specific sources of information.
"#
    )
}

/// Interpreta y valida la salida del LLM contra la forma de [`ComparisonResult`].
pub fn parse_comparison(response: &str) -> Result<ComparisonResult> {
    let json = strip_json_fences(response);
    let result: ComparisonResult = serde_json::from_str(json).map_err(|e| {
        warn!("No se pudo parsear el JSON de comparación. Error: {e}. Respuesta LLM: '{response}'");
        PipelineError::LanguageModel(format!("respuesta de comparación mal formada: {e}"))
    })?;

    if result.title.trim().is_empty() {
        return Err(PipelineError::LanguageModel("la comparación no tiene título".into()));
    }
    if let Some(pos) = result
        .potential_issues
        .iter()
        .position(|i| i.issue.trim().is_empty() || i.category.trim().is_empty())
    {
        return Err(PipelineError::LanguageModel(format!(
            "la incidencia {pos} no tiene descripción o categoría"
        )));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunker::Chunker,
        ingest,
        reference_index::InMemoryReferenceStore,
        testing::{HashingEmbedder, ScriptedModel},
    };
    use std::time::Duration;

    const CALIBRATION_RESULT: &str = r#"```json
{
  "title": "Instrument calibration frequency gap",
  "fda_requirement_summary": "FDA guidance requires calibration every 30 days.",
  "user_summary": "The SOP calibrates instruments once a year.",
  "potential_issues": [
    {
      "issue": "Increase calibration frequency from annual to at least every 30 days.",
      "category": "Equipment Calibration Frequency",
      "fda_requirement": "Calibration must occur every 30 days.",
      "sop_detail": "We calibrate instruments annually."
    }
  ]
}
```"#;

    struct Fixture {
        comparator: Comparator,
        sessions: SessionStore,
        reference: ReferenceIndex,
        llm: Arc<ScriptedModel>,
    }

    fn fixture(response: &str) -> Fixture {
        let embedder = Arc::new(HashingEmbedder::default());
        let sessions = SessionStore::new(embedder.clone(), 100, Duration::from_secs(3600));
        let reference = ReferenceIndex::new(
            Arc::new(InMemoryReferenceStore::new()),
            embedder,
            Chunker::windowed(1000, 200).unwrap(),
        );
        let llm = Arc::new(ScriptedModel::new(response));
        let comparator = Comparator::new(sessions.clone(), reference.clone(), llm.clone());
        Fixture { comparator, sessions, reference, llm }
    }

    async fn upload_sop(sessions: &SessionStore, session_id: &str, text: &str) {
        let chunker = Chunker::paragraphs(30, 4000).unwrap();
        sessions.build(session_id, ingest::chunk_text(&chunker, text)).await.unwrap();
    }

    #[tokio::test]
    async fn compare_flags_calibration_frequency_gap() {
        let f = fixture(CALIBRATION_RESULT);
        f.reference
            .ingest(b"Calibration must occur every 30 days.".to_vec(), "fda.txt", "FDA-2024")
            .await
            .unwrap();
        upload_sop(&f.sessions, "s1", "We calibrate instruments annually.").await;

        let result = f.comparator.compare_sop_to_reference("s1").await.unwrap();

        let prompt = f.llm.last_prompt().unwrap();
        assert!(prompt.contains("We calibrate instruments annually."));
        assert!(prompt.contains("Calibration must occur every 30 days."));
        assert!(prompt.contains("potential_issues"));

        let issue = result
            .potential_issues
            .iter()
            .find(|i| i.category.to_lowercase().contains("calibration"))
            .expect("calibration issue");
        assert!(issue.fda_requirement.contains("30 days"));
    }

    #[tokio::test]
    async fn compare_without_reference_content_is_soft_no_match() {
        let f = fixture(CALIBRATION_RESULT);
        upload_sop(&f.sessions, "s1", "We calibrate instruments annually.").await;

        let err = f.comparator.compare_sop_to_reference("s1").await.unwrap_err();
        assert!(err.is_soft());
        assert_eq!(err.to_string(), NO_MATCHING_FDA_CONTENT);
        assert_eq!(f.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn compare_on_unknown_session_propagates_not_found() {
        let f = fixture(CALIBRATION_RESULT);
        let err = f.comparator.compare_sop_to_reference("ghost").await.unwrap_err();
        assert!(matches!(err, PipelineError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn malformed_model_output_is_a_language_model_error() {
        let f = fixture("Sure! The SOP looks mostly fine.");
        f.reference.ingest_text("Calibration must occur every 30 days.", "FDA-2024").await.unwrap();
        upload_sop(&f.sessions, "s1", "We calibrate instruments annually.").await;

        let err = f.comparator.compare_sop_to_reference("s1").await.unwrap_err();
        assert!(matches!(err, PipelineError::LanguageModel(_)));
    }

    #[tokio::test]
    async fn answer_with_both_sources_empty_does_not_call_the_model() {
        let f = fixture("unused");
        f.sessions.build("s1", Vec::new()).await.unwrap();

        let answer = f.comparator.answer_question("s1", "How often do we calibrate?").await.unwrap();

        assert_eq!(answer.answer, NO_CONTENT_IN_EITHER_SOURCE);
        assert!(answer.answer.contains("either"));
        assert_eq!(f.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn answer_uses_placeholder_for_missing_source() {
        let f = fixture("  According to your SOP, instruments are calibrated annually.  ");
        upload_sop(&f.sessions, "s1", "We calibrate instruments annually.").await;

        let answer = f.comparator.answer_question("s1", "How often do we calibrate?").await.unwrap();

        assert_eq!(answer.answer, "According to your SOP, instruments are calibrated annually.");
        let prompt = f.llm.last_prompt().unwrap();
        assert!(prompt.contains(NO_FDA_CONTENT));
        assert!(prompt.contains("We calibrate instruments annually."));
        assert!(prompt.contains("QUESTION: How often do we calibrate?"));
    }

    #[tokio::test]
    async fn answer_on_unknown_session_fails() {
        let f = fixture("unused");
        let err = f.comparator.answer_question("ghost", "anything").await.unwrap_err();
        assert!(matches!(err, PipelineError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn make_actionable_trims_model_output() {
        let f = fixture("\"Schedule instrument calibration every 30 days.\"\n");
        let item = f.comparator.make_actionable("Calibration is annual").await.unwrap();
        assert_eq!(item.action, "Schedule instrument calibration every 30 days.");
        assert!(f.llm.last_prompt().unwrap().contains("Calibration is annual"));
    }

    #[test]
    fn parse_rejects_issue_without_category() {
        let raw = r#"{"title":"t","fda_requirement_summary":"f","user_summary":"u",
            "potential_issues":[{"issue":"x","category":" ","fda_requirement":"r","sop_detail":"s"}]}"#;
        assert!(matches!(parse_comparison(raw), Err(PipelineError::LanguageModel(_))));
    }

    #[test]
    fn parse_rejects_missing_fields() {
        let raw = r#"{"title":"t","potential_issues":[]}"#;
        assert!(matches!(parse_comparison(raw), Err(PipelineError::LanguageModel(_))));
    }
}
