use crate::agent_prompts::{self, PromptPair};
use crate::config::LlmSettings;
use crate::db::SchemaDescription;
use crate::error::{CopilotError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const REQUIRED_PLAN_KEYS: [&str; 4] = ["sql", "explain", "viz_suggestion", "notes"];

const MAX_REFINEMENT_ITEMS: usize = 3;

/// Chart hint attached to a plan: `{"type": "bar" | "line" | "none", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VizSuggestion {
    #[serde(rename = "type", default = "VizSuggestion::default_kind")]
    pub kind: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VizSuggestion {
    fn default_kind() -> String {
        "none".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub sql: String,
    #[serde(deserialize_with = "text_field")]
    pub explain: String,
    #[serde(deserialize_with = "viz_field")]
    pub viz_suggestion: VizSuggestion,
    #[serde(deserialize_with = "text_field")]
    pub notes: String,
}

impl QueryPlan {
    /// Parses a collaborator payload. Any missing key is a contract violation;
    /// no defaults are guessed, least of all for `sql`.
    pub fn from_value(value: Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            CopilotError::ContractViolation("query plan must be a JSON object".to_string())
        })?;

        let missing: Vec<&str> = REQUIRED_PLAN_KEYS
            .iter()
            .copied()
            .filter(|key| !object.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(CopilotError::ContractViolation(format!(
                "query plan is missing required keys: {}",
                missing.join(", ")
            )));
        }

        serde_json::from_value(value)
            .map_err(|e| CopilotError::ContractViolation(format!("malformed query plan: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refinement {
    pub refined_question: String,
    #[serde(default)]
    pub clarifications: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

impl Refinement {
    /// Parses a collaborator payload. `refined_question` is required; the
    /// lists are capped at three items and confidence is clamped to [0, 1].
    pub fn from_value(value: Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            CopilotError::ContractViolation("refinement must be a JSON object".to_string())
        })?;
        if !object.contains_key("refined_question") {
            return Err(CopilotError::ContractViolation(
                "refinement is missing required key: refined_question".to_string(),
            ));
        }

        let mut refinement: Refinement = serde_json::from_value(value)
            .map_err(|e| CopilotError::ContractViolation(format!("malformed refinement: {}", e)))?;
        refinement.clarifications.truncate(MAX_REFINEMENT_ITEMS);
        refinement.assumptions.truncate(MAX_REFINEMENT_ITEMS);
        refinement.confidence = if refinement.confidence.is_nan() {
            0.0
        } else {
            refinement.confidence.clamp(0.0, 1.0)
        };
        Ok(refinement)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub question: String,
    #[serde(default)]
    pub why: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefineRequest<'a> {
    pub schema: &'a SchemaDescription,
    pub base_question: &'a str,
    pub effective_question: &'a str,
    pub user_selected_clarifications: &'a [String],
    /// Digest of recent turns
    pub context: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest<'a> {
    pub schema: &'a SchemaDescription,
    pub question: &'a str,
    pub context: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestRequest<'a> {
    pub schema: &'a SchemaDescription,
    pub partial: Option<&'a str>,
    pub count: usize,
}

/// The external text-generation service. Each call is one request/response
/// exchange that yields a JSON payload; shape validation happens in the
/// caller so providers can be swapped freely.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn refine(&self, request: &RefineRequest<'_>) -> Result<Value>;

    async fn plan(&self, request: &PlanRequest<'_>) -> Result<Value>;

    async fn suggest(&self, request: &SuggestRequest<'_>) -> Result<Value>;
}

/// OpenAI-compatible chat-completions client.
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let api_key = settings.api_key.clone().ok_or_else(|| {
            CopilotError::Config("OPENAI_API_KEY (or GITHUB_API_KEY) is not set".to_string())
        })?;
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        })
    }

    async fn call_json(&self, prompt: PromptPair, temperature: Option<f64>) -> Result<Value> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "response_format": {"type": "json_object"}
        });
        if let Some(temperature) = temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CopilotError::Collaborator(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CopilotError::Collaborator(format!(
                "LLM API returned {}: {}",
                status, detail
            )));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| CopilotError::Collaborator(format!("Failed to parse LLM response: {}", e)))?;

        let content = envelope["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CopilotError::Collaborator("No content in LLM response".to_string()))?;
        debug!("LLM content: {}", content);

        serde_json::from_str(content)
            .map_err(|e| CopilotError::Collaborator(format!("LLM content is not JSON: {}", e)))
    }
}

#[async_trait]
impl Collaborator for LlmClient {
    async fn refine(&self, request: &RefineRequest<'_>) -> Result<Value> {
        self.call_json(agent_prompts::refine_prompt(request), None).await
    }

    async fn plan(&self, request: &PlanRequest<'_>) -> Result<Value> {
        self.call_json(agent_prompts::plan_prompt(request), None).await
    }

    async fn suggest(&self, request: &SuggestRequest<'_>) -> Result<Value> {
        self.call_json(agent_prompts::suggest_prompt(request), Some(0.3)).await
    }
}

/// Asks the collaborator for up to `k` starter questions. Never fails: any
/// collaborator error yields [`fallback_suggestions`].
pub async fn suggest_questions(
    collaborator: &dyn Collaborator,
    schema: &SchemaDescription,
    partial: Option<&str>,
    k: usize,
) -> Vec<Suggestion> {
    let partial = partial.map(str::trim).filter(|p| !p.is_empty());
    let request = SuggestRequest {
        schema,
        partial,
        count: k.clamp(3, 8),
    };

    match collaborator.suggest(&request).await {
        Ok(payload) => parse_suggestions(&payload, k),
        Err(e) => {
            warn!("Suggestion request failed, using fallback set: {}", e);
            fallback_suggestions(k)
        }
    }
}

fn parse_suggestions(payload: &Value, k: usize) -> Vec<Suggestion> {
    let items = match payload.get("suggestions").and_then(Value::as_array) {
        Some(items) => items,
        None => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| {
            let question = item.get("question")?.as_str()?.trim();
            if question.is_empty() {
                return None;
            }
            Some(Suggestion {
                question: question.to_string(),
                why: item
                    .get("why")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                tags: item
                    .get("tags")
                    .and_then(Value::as_array)
                    .map(|tags| {
                        tags.iter()
                            .filter_map(|t| t.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
            })
        })
        .take(k)
        .collect()
}

pub fn fallback_suggestions(k: usize) -> Vec<Suggestion> {
    let fixed = [
        (
            "sales by category by month",
            "basic trend of the product mix",
            &["sales", "category", "monthly"][..],
        ),
        (
            "top 10 products by revenue",
            "ranking of contribution",
            &["top", "product", "revenue"][..],
        ),
        (
            "monthly evolution by country",
            "compare markets",
            &["evolution", "country", "monthly"][..],
        ),
    ];

    fixed
        .iter()
        .take(k)
        .map(|(question, why, tags)| Suggestion {
            question: question.to_string(),
            why: why.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        })
        .collect()
}

/// Accepts a string, `null` (empty) or a list of strings (joined by newlines).
fn text_field<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Array(items) => Ok(items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")),
        other => Err(serde::de::Error::custom(format!(
            "expected text, found {}",
            other
        ))),
    }
}

/// Accepts an object or a bare chart type string.
fn viz_field<'de, D>(deserializer: D) -> std::result::Result<VizSuggestion, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(kind) => Ok(VizSuggestion {
            kind,
            extra: Map::new(),
        }),
        Value::Null => Ok(VizSuggestion {
            kind: VizSuggestion::default_kind(),
            extra: Map::new(),
        }),
        object @ Value::Object(_) => {
            serde_json::from_value(object).map_err(serde::de::Error::custom)
        }
        other => Err(serde::de::Error::custom(format!(
            "expected chart hint, found {}",
            other
        ))),
    }
}
