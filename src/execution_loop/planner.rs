//! Planning Loop
//!
//! One user turn moves through Refining -> Planning -> Validating ->
//! Executing -> Recorded, or ends in Failed from Planning, Validating or
//! Executing. Stages run strictly one after another. Whatever happens after
//! Refining, exactly one Turn is appended to the session history.

use crate::config::Settings;
use crate::db::{
    summarize_for_context, SchemaDescription, SchemaIntrospector, SessionStore,
    SqliteSessionStore, Turn,
};
use crate::error::{CopilotError, Result};
use crate::execution::{QueryExecutor, QueryResult};
use crate::execution_loop::refinement::{effective_question, RefinementDraft};
use crate::gateway::SqlGateway;
use crate::llm::{
    suggest_questions, Collaborator, PlanRequest, QueryPlan, RefineRequest, Refinement,
    Suggestion,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnStage {
    Refining,
    Planning,
    Validating,
    Executing,
    Recorded,
    Failed,
}

/// How the question of a turn is prepared before planning.
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionMode {
    /// Refine, then plan the refined question
    Refine,
    /// Refine for the record, but plan the question as asked
    RefineAdvisory,
    /// Caller already refined (possibly over several rounds); skip Refining
    Refined(Refinement),
    /// No refinement at all
    Direct,
}

#[derive(Debug)]
pub struct TurnFailure {
    pub stage: TurnStage,
    pub error: CopilotError,
}

impl TurnFailure {
    fn at(stage: TurnStage, error: CopilotError) -> Self {
        Self { stage, error }
    }
}

impl fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} failed: {}", self.stage, self.error)
    }
}

/// Result of one recorded turn.
#[derive(Debug)]
pub struct TurnOutcome {
    /// The turn exactly as appended to the session history
    pub turn: Turn,
    pub result: Option<QueryResult>,
    pub failure: Option<TurnFailure>,
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn final_stage(&self) -> TurnStage {
        if self.failure.is_some() {
            TurnStage::Failed
        } else {
            TurnStage::Recorded
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOptions {
    pub context_items: usize,
    pub preview_rows: usize,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            context_items: 4,
            preview_rows: 20,
        }
    }
}

pub struct PlanningLoop {
    collaborator: Arc<dyn Collaborator>,
    introspector: SchemaIntrospector,
    gateway: SqlGateway,
    executor: QueryExecutor,
    history: Arc<dyn SessionStore>,
    options: LoopOptions,
}

impl PlanningLoop {
    pub fn new(
        collaborator: Arc<dyn Collaborator>,
        introspector: SchemaIntrospector,
        gateway: SqlGateway,
        executor: QueryExecutor,
        history: Arc<dyn SessionStore>,
        options: LoopOptions,
    ) -> Self {
        Self {
            collaborator,
            introspector,
            gateway,
            executor,
            history,
            options,
        }
    }

    pub fn from_settings(settings: &Settings, collaborator: Arc<dyn Collaborator>) -> Result<Self> {
        let history = SqliteSessionStore::open(&settings.session_db)?;
        Ok(Self::new(
            collaborator,
            SchemaIntrospector::new(&settings.db_path),
            SqlGateway::new(settings.row_limit),
            QueryExecutor::new(&settings.db_path),
            Arc::new(history),
            LoopOptions {
                context_items: settings.context_items,
                preview_rows: settings.preview_rows,
            },
        ))
    }

    pub fn gateway(&self) -> &SqlGateway {
        &self.gateway
    }

    pub fn introspector(&self) -> &SchemaIntrospector {
        &self.introspector
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>> {
        self.history.load(session_id).await
    }

    pub async fn clear(&self, session_id: &str) -> Result<()> {
        self.history.clear(session_id).await
    }

    pub async fn sessions(&self) -> Result<Vec<String>> {
        self.history.sessions().await
    }

    pub async fn context_digest(&self, session_id: &str) -> Result<String> {
        let turns = self.history.load(session_id).await?;
        Ok(summarize_for_context(&turns, self.options.context_items))
    }

    /// One refinement round. `selected` clarifications and a non-blank
    /// `edited` question are folded into the request.
    pub async fn refine_step(
        &self,
        session_id: &str,
        base_question: &str,
        selected: &[String],
        edited: Option<&str>,
    ) -> Result<Refinement> {
        let schema = self.introspector.describe().await?;
        let context = self.context_digest(session_id).await?;
        self.request_refinement(&schema, &context, base_question, selected, edited)
            .await
    }

    pub async fn start_refinement(&self, session_id: &str, question: &str) -> Result<RefinementDraft> {
        let first = self.refine_step(session_id, question, &[], None).await?;
        Ok(RefinementDraft::start(question, first))
    }

    /// Advances `draft` by one round. The draft is left untouched on error.
    pub async fn refine_again(
        &self,
        session_id: &str,
        draft: &mut RefinementDraft,
        chosen: Vec<String>,
        edited: Option<&str>,
    ) -> Result<()> {
        let step = self
            .refine_step(session_id, &draft.current, &chosen, edited)
            .await?;
        draft.record(&chosen, edited, step);
        Ok(())
    }

    /// Runs and records one turn. Gateway, executor and plan-contract
    /// failures are reported in the outcome (and recorded); only errors
    /// before planning or from the history store surface as `Err`.
    pub async fn answer(
        &self,
        session_id: &str,
        question: &str,
        mode: QuestionMode,
    ) -> Result<TurnOutcome> {
        let schema = self.introspector.describe().await?;
        let context = self.context_digest(session_id).await?;

        let (refinement, final_question) = match mode {
            QuestionMode::Refine => {
                let refinement = self
                    .request_refinement(&schema, &context, question, &[], None)
                    .await?;
                let final_question = refined_or(&refinement, question);
                (Some(refinement), final_question)
            }
            QuestionMode::RefineAdvisory => {
                let refinement = self
                    .request_refinement(&schema, &context, question, &[], None)
                    .await?;
                (Some(refinement), question.to_string())
            }
            QuestionMode::Refined(refinement) => {
                let final_question = refined_or(&refinement, question);
                (Some(refinement), final_question)
            }
            QuestionMode::Direct => (None, question.to_string()),
        };

        self.run_turn(session_id, &schema, &context, question, final_question, refinement)
            .await
    }

    /// Executes the current text of a refinement draft.
    pub async fn answer_draft(&self, session_id: &str, draft: &RefinementDraft) -> Result<TurnOutcome> {
        let schema = self.introspector.describe().await?;
        let context = self.context_digest(session_id).await?;
        self.run_turn(
            session_id,
            &schema,
            &context,
            &draft.original,
            draft.current.clone(),
            draft.latest().cloned(),
        )
        .await
    }

    /// Starter questions; collaborator failures degrade to a fixed set.
    pub async fn suggest(&self, partial: Option<&str>, k: usize) -> Result<Vec<Suggestion>> {
        let schema = self.introspector.describe().await?;
        Ok(suggest_questions(self.collaborator.as_ref(), &schema, partial, k).await)
    }

    async fn request_refinement(
        &self,
        schema: &SchemaDescription,
        context: &str,
        base_question: &str,
        selected: &[String],
        edited: Option<&str>,
    ) -> Result<Refinement> {
        info!("Stage {:?}: {}", TurnStage::Refining, base_question);
        let request = RefineRequest {
            schema,
            base_question,
            effective_question: effective_question(base_question, edited),
            user_selected_clarifications: selected,
            context,
        };
        let payload = self.collaborator.refine(&request).await?;
        Refinement::from_value(payload)
    }

    async fn run_turn(
        &self,
        session_id: &str,
        schema: &SchemaDescription,
        context: &str,
        question_original: &str,
        final_question: String,
        refinement: Option<Refinement>,
    ) -> Result<TurnOutcome> {
        let mut turn = Turn {
            timestamp: Utc::now(),
            question: final_question.clone(),
            question_original: question_original.to_string(),
            question_refined: final_question.clone(),
            refinement,
            plan: None,
            sql: None,
            result_preview: None,
            error: None,
        };

        let (result, failure) = match self
            .plan_and_execute(schema, context, &final_question, &mut turn)
            .await
        {
            Ok(result) => (Some(result), None),
            Err(failure) => {
                warn!("Turn failed in session {}: {}", session_id, failure);
                turn.error = Some(failure.error.to_string());
                (None, Some(failure))
            }
        };

        self.history.append(session_id, &turn).await?;
        info!(
            "Stage {:?}: session {} ({})",
            TurnStage::Recorded,
            session_id,
            if failure.is_none() { "success" } else { "failure" }
        );

        Ok(TurnOutcome {
            turn,
            result,
            failure,
        })
    }

    async fn plan_and_execute(
        &self,
        schema: &SchemaDescription,
        context: &str,
        question: &str,
        turn: &mut Turn,
    ) -> std::result::Result<QueryResult, TurnFailure> {
        info!("Stage {:?}: {}", TurnStage::Planning, question);
        let request = PlanRequest {
            schema,
            question,
            context,
        };
        let plan = self
            .collaborator
            .plan(&request)
            .await
            .and_then(QueryPlan::from_value)
            .map_err(|e| TurnFailure::at(TurnStage::Planning, e))?;
        turn.sql = Some(plan.sql.clone());
        turn.plan = Some(plan);

        info!("Stage {:?}", TurnStage::Validating);
        let proposed = turn.sql.as_deref().unwrap_or_default();
        let admitted = self
            .gateway
            .admit(proposed)
            .map_err(|e| TurnFailure::at(TurnStage::Validating, e))?;
        turn.sql = Some(admitted.as_str().to_string());

        info!("Stage {:?}: {}", TurnStage::Executing, admitted);
        let result = self
            .executor
            .execute(&admitted)
            .await
            .map_err(|e| TurnFailure::at(TurnStage::Executing, e))?;
        turn.result_preview = Some(result.preview(self.options.preview_rows));

        Ok(result)
    }
}

fn refined_or(refinement: &Refinement, question: &str) -> String {
    let refined = refinement.refined_question.trim();
    if refined.is_empty() {
        question.to_string()
    } else {
        refined.to_string()
    }
}
