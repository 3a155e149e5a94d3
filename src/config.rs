//! Process settings, read once at startup from the environment (after
//! `dotenv` has loaded any `.env` file) and never mutated afterwards.

use crate::error::{CopilotError, Result};
use crate::gateway::DEFAULT_ROW_LIMIT;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Analytical database queried by the gateway/executor pair
    pub db_path: PathBuf,
    pub row_limit: usize,
    /// SQLite file holding per-session turn history
    pub session_db: PathBuf,
    /// Turns included in the collaborator context digest
    pub context_items: usize,
    /// Rows kept in a turn's result preview
    pub preview_rows: usize,
    pub llm: LlmSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let row_limit = parse_or(&get, "ROW_LIMIT", DEFAULT_ROW_LIMIT)?;
        if row_limit == 0 {
            return Err(CopilotError::Config("ROW_LIMIT must be greater than zero".to_string()));
        }

        Ok(Self {
            db_path: get("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/toy.db")),
            row_limit,
            session_db: get("SESSION_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".session/sessions.db")),
            context_items: parse_or(&get, "CONTEXT_ITEMS", 4)?,
            preview_rows: parse_or(&get, "PREVIEW_ROWS", 20)?,
            llm: LlmSettings {
                base_url: get("BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                model: get("MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                api_key: get("OPENAI_API_KEY").or_else(|| get("GITHUB_API_KEY")),
            },
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| CopilotError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}
