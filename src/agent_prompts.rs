//! Agent Prompts - system and user messages for the three collaborator requests
//!
//! Every prompt asks for a single JSON object; shape checking of the reply
//! happens in `llm.rs`.

use crate::llm::{PlanRequest, RefineRequest, SuggestRequest};
use serde::Serialize;

/// Placeholder used when a session has no history yet.
pub const NO_CONTEXT: &str = "- (no context)";

/// System prompt for the SQL planning step
pub const PLAN_SYSTEM_PROMPT: &str = r#"You are a senior data analyst who writes SQLite queries for business questions.

## Rules

- Write exactly ONE read-only statement (SELECT or WITH ... SELECT).
- Never modify data or schema, never use PRAGMA, ATTACH or other administrative commands.
- Use only tables and columns present in the schema you are given.
- Use the foreign keys in the schema to choose join conditions.
- Dates are stored as ISO-8601 text; group by month with strftime('%Y-%m', column).
- Do not add a LIMIT unless the question asks for a top-N; the platform bounds result size.

## Output

Return a single JSON object with exactly these keys:
{
  "sql": "SELECT ...",
  "explain": "one or two sentences a business user understands",
  "viz_suggestion": {"type": "bar" | "line" | "none", "x": "column", "y": "column"},
  "notes": "assumptions, caveats or data quality remarks"
}"#;

/// System prompt for question refinement
pub const REFINE_SYSTEM_PROMPT: &str = r#"You are a senior product/BI lead. Help an analyst turn a business question into a clear, measurable and unambiguous question before any SQL is written.

Return ONLY valid JSON with these fields:
- refined_question: short, precise, unbiased question.
- clarifications: list of reasonable clarifying questions (at most 3).
- assumptions: list of safe assumptions for missing information (at most 3).
- confidence: float 0..1, how sure you are that the question is ready to execute."#;

/// System prompt for starter question suggestions
pub const SUGGEST_SYSTEM_PROMPT: &str = r#"You are a senior business analyst.
Given a database SCHEMA and (optionally) the beginning of a user's question, propose useful, clear and actionable questions.
Return ONLY JSON with a list under "suggestions", where each item has:
- question: string (a question ready to run or refine)
- why: string (why it is useful)
- tags: short list of labels (e.g. ["sales","monthly"])

Avoid technical jargon; be concrete and business focused."#;

#[derive(Debug, Clone, PartialEq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

pub fn plan_prompt(request: &PlanRequest<'_>) -> PromptPair {
    PromptPair {
        system: format!(
            "{}\n\nIMPORTANT: answer with one valid JSON object.\nRecent context (summary to keep follow-ups coherent):\n{}",
            PLAN_SYSTEM_PROMPT,
            context_or_placeholder(request.context)
        ),
        user: format!(
            "Output format: strict JSON, a single object and no other text.\nAvailable schema (JSON):\n{}\n\nQuestion: {}",
            to_json(request.schema),
            request.question
        ),
    }
}

pub fn refine_prompt(request: &RefineRequest<'_>) -> PromptPair {
    #[derive(Serialize)]
    struct Guidance<'a> {
        base_question: &'a str,
        effective_question: &'a str,
        user_selected_clarifications: &'a [String],
    }

    let guidance = Guidance {
        base_question: request.base_question,
        effective_question: request.effective_question,
        user_selected_clarifications: request.user_selected_clarifications,
    };

    PromptPair {
        system: format!(
            "{}\n\nRecent context:\n{}",
            REFINE_SYSTEM_PROMPT,
            context_or_placeholder(request.context)
        ),
        user: format!(
            "Refine iteratively and answer ONLY with a JSON object. If the user added clarifications, fold them into the refined version.\n\nSchema (JSON):\n{}\n\nUser instructions (JSON):\n{}",
            to_json(request.schema),
            to_json(&guidance)
        ),
    }
}

pub fn suggest_prompt(request: &SuggestRequest<'_>) -> PromptPair {
    let payload = serde_json::json!({
        "schema": request.schema,
        "partial": request.partial.unwrap_or_default(),
        "k": request.count,
    });

    PromptPair {
        system: SUGGEST_SYSTEM_PROMPT.to_string(),
        user: format!("Answer ONLY in strict JSON.\n{}", payload),
    }
}

fn context_or_placeholder(context: &str) -> &str {
    if context.trim().is_empty() {
        NO_CONTEXT
    } else {
        context
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SchemaDescription;

    #[test]
    fn test_plan_prompt_uses_placeholder_without_history() {
        let schema = SchemaDescription::default();
        let prompt = plan_prompt(&PlanRequest {
            schema: &schema,
            question: "sales by category by month",
            context: "",
        });
        assert!(prompt.system.ends_with(NO_CONTEXT));
        assert!(prompt.user.ends_with("Question: sales by category by month"));
    }

    #[test]
    fn test_refine_prompt_carries_clarifications() {
        let schema = SchemaDescription::default();
        let chosen = vec!["only 2024".to_string()];
        let prompt = refine_prompt(&RefineRequest {
            schema: &schema,
            base_question: "sales",
            effective_question: "sales per month",
            user_selected_clarifications: &chosen,
            context: "- Q: earlier",
        });
        assert!(prompt.system.ends_with("- Q: earlier"));
        assert!(prompt.user.contains("\"effective_question\":\"sales per month\""));
        assert!(prompt.user.contains("only 2024"));
    }
}
