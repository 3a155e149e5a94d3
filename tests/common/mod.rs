#![allow(dead_code)]

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use sql_copilot::db::{SchemaIntrospector, SqliteSessionStore};
use sql_copilot::error::{CopilotError, Result};
use sql_copilot::execution::QueryExecutor;
use sql_copilot::execution_loop::{LoopOptions, PlanningLoop};
use sql_copilot::gateway::SqlGateway;
use sql_copilot::llm::{Collaborator, PlanRequest, RefineRequest, SuggestRequest};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Creates the customers/products/orders sample database
pub fn seed_database(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE customers (
            customer_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            country TEXT
        );
        CREATE TABLE products (
            product_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            price REAL NOT NULL
        );
        CREATE TABLE orders (
            order_id INTEGER PRIMARY KEY,
            customer_id INTEGER REFERENCES customers(customer_id),
            product_id INTEGER REFERENCES products(product_id),
            order_date TEXT NOT NULL,
            quantity INTEGER NOT NULL
        );
        INSERT INTO customers VALUES (1, 'Ana', 'AR'), (2, 'Bruno', 'BR');
        INSERT INTO products VALUES (1, 'Novel', 'Books', 10.0), (2, 'Chess', 'Games', 25.0);
        INSERT INTO orders VALUES
            (1, 1, 1, '2024-01-05', 2),
            (2, 2, 2, '2024-01-20', 1),
            (3, 1, 1, '2024-02-03', 3);
        "#,
    )
    .unwrap();
}

/// Refinement request as seen by the collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct RefineCall {
    pub base_question: String,
    pub effective_question: String,
    pub selected: Vec<String>,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanCall {
    pub question: String,
    pub context: String,
}

/// Collaborator that replays queued payloads and records every request.
/// An exhausted queue answers with a collaborator error.
#[derive(Default)]
pub struct ScriptedCollaborator {
    refinements: Mutex<VecDeque<Result<Value>>>,
    plans: Mutex<VecDeque<Result<Value>>>,
    suggestions: Mutex<VecDeque<Result<Value>>>,
    pub refine_calls: Mutex<Vec<RefineCall>>,
    pub plan_calls: Mutex<Vec<PlanCall>>,
}

impl ScriptedCollaborator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refine_with(self, payload: Value) -> Self {
        self.refinements.lock().unwrap().push_back(Ok(payload));
        self
    }

    pub fn plan_with(self, payload: Value) -> Self {
        self.plans.lock().unwrap().push_back(Ok(payload));
        self
    }

    pub fn plan_sql(self, sql: &str) -> Self {
        self.plan_with(serde_json::json!({
            "sql": sql,
            "explain": format!("Runs {}", sql),
            "viz_suggestion": {"type": "none"},
            "notes": ""
        }))
    }

    pub fn suggest_with(self, payload: Result<Value>) -> Self {
        self.suggestions.lock().unwrap().push_back(payload);
        self
    }

    pub fn refine_calls(&self) -> Vec<RefineCall> {
        self.refine_calls.lock().unwrap().clone()
    }

    pub fn plan_calls(&self) -> Vec<PlanCall> {
        self.plan_calls.lock().unwrap().clone()
    }
}

fn next(queue: &Mutex<VecDeque<Result<Value>>>) -> Result<Value> {
    queue
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(CopilotError::Collaborator("script exhausted".to_string())))
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    async fn refine(&self, request: &RefineRequest<'_>) -> Result<Value> {
        self.refine_calls.lock().unwrap().push(RefineCall {
            base_question: request.base_question.to_string(),
            effective_question: request.effective_question.to_string(),
            selected: request.user_selected_clarifications.to_vec(),
            context: request.context.to_string(),
        });
        next(&self.refinements)
    }

    async fn plan(&self, request: &PlanRequest<'_>) -> Result<Value> {
        self.plan_calls.lock().unwrap().push(PlanCall {
            question: request.question.to_string(),
            context: request.context.to_string(),
        });
        next(&self.plans)
    }

    async fn suggest(&self, _request: &SuggestRequest<'_>) -> Result<Value> {
        next(&self.suggestions)
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub collaborator: Arc<ScriptedCollaborator>,
    pub planner: PlanningLoop,
}

impl Fixture {
    pub fn new(script: ScriptedCollaborator) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("toy.db");
        seed_database(&db_path);

        let collaborator = Arc::new(script);
        let shared: Arc<dyn Collaborator> = collaborator.clone();
        let history = SqliteSessionStore::open(dir.path().join("session/sessions.db")).unwrap();
        let planner = PlanningLoop::new(
            shared,
            SchemaIntrospector::new(&db_path),
            SqlGateway::default(),
            QueryExecutor::new(&db_path),
            Arc::new(history),
            LoopOptions::default(),
        );

        Self {
            dir,
            db_path,
            collaborator,
            planner,
        }
    }
}
