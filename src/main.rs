use sql_copilot::config::Settings;
use sql_copilot::db::{SessionStore, SqliteSessionStore, Turn};
use sql_copilot::execution::QueryResult;
use sql_copilot::execution_loop::{PlanningLoop, QuestionMode, RefinementDraft, TurnOutcome};
use sql_copilot::llm::LlmClient;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sql-copilot")]
#[command(about = "Natural-language analytics over a read-only SQLite database")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question: refine, plan, validate, execute and record
    Ask {
        /// The business question in natural language
        question: String,

        /// Session to record the turn in (a new one is created if omitted)
        #[arg(short, long)]
        session: Option<String>,

        /// Skip refinement and plan the question as written
        #[arg(long)]
        direct: bool,

        /// Refine, but plan the original question
        #[arg(long, conflicts_with = "direct")]
        keep_original: bool,
    },
    /// Refine a question interactively over several rounds, then execute it
    Refine {
        question: String,

        #[arg(short, long)]
        session: Option<String>,
    },
    /// Suggest starter questions for the current schema
    Suggest {
        /// Beginning of a question to complete
        #[arg(short, long)]
        partial: Option<String>,

        #[arg(short = 'k', long, default_value_t = 5)]
        count: usize,
    },
    /// Print the schema description with row counts
    Schema,
    /// Run a SQL text through the safety gateway without executing it
    Check { sql: String },
    /// Show the turns of a session, or list sessions
    History {
        #[arg(short, long, required_unless_present = "list")]
        session: Option<String>,

        #[arg(long)]
        list: bool,
    },
    /// Delete every turn of a session
    Clear {
        #[arg(short, long)]
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let settings = Settings::from_env().context("invalid configuration")?;
    info!("Database: {}", settings.db_path.display());

    match args.command {
        Commands::Ask {
            question,
            session,
            direct,
            keep_original,
        } => {
            let mode = if direct {
                QuestionMode::Direct
            } else if keep_original {
                QuestionMode::RefineAdvisory
            } else {
                QuestionMode::Refine
            };
            let planner = build_loop(&settings)?;
            let session = session_or_new(session);
            let outcome = planner.answer(&session, &question, mode).await?;
            print_outcome(&session, &outcome);
            Ok(())
        }
        Commands::Refine { question, session } => {
            let planner = build_loop(&settings)?;
            run_interactive_refinement(&planner, &session_or_new(session), &question).await
        }
        Commands::Suggest { partial, count } => {
            let planner = build_loop(&settings)?;
            let suggestions = planner.suggest(partial.as_deref(), count).await?;
            for (i, suggestion) in suggestions.iter().enumerate() {
                println!("{}. {}", i + 1, suggestion.question);
                if !suggestion.why.is_empty() {
                    println!("   {}", suggestion.why);
                }
                if !suggestion.tags.is_empty() {
                    println!("   [{}]", suggestion.tags.join(", "));
                }
            }
            Ok(())
        }
        Commands::Schema => print_schema(&settings).await,
        Commands::Check { sql } => {
            let gateway = sql_copilot::gateway::SqlGateway::new(settings.row_limit);
            match gateway.admit(&sql) {
                Ok(admitted) => {
                    println!("ADMITTED: {}", admitted);
                    Ok(())
                }
                Err(e) => anyhow::bail!("REJECTED: {}", e),
            }
        }
        Commands::History { session, list } => {
            let store = SqliteSessionStore::open(&settings.session_db)?;
            if list {
                for id in store.sessions().await? {
                    println!("{}", id);
                }
                return Ok(());
            }
            let session = session.unwrap_or_default();
            let turns = store.load(&session).await?;
            if turns.is_empty() {
                println!("No turns recorded for session {}", session);
            }
            for (i, turn) in turns.iter().enumerate() {
                print_turn(i + 1, turn);
            }
            Ok(())
        }
        Commands::Clear { session } => {
            let store = SqliteSessionStore::open(&settings.session_db)?;
            store.clear(&session).await?;
            println!("Cleared session {}", session);
            Ok(())
        }
    }
}

fn build_loop(settings: &Settings) -> Result<PlanningLoop> {
    let client = LlmClient::new(&settings.llm)?;
    Ok(PlanningLoop::from_settings(settings, Arc::new(client))?)
}

fn session_or_new(session: Option<String>) -> String {
    session.unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().to_string();
        eprintln!("Session: {}", id);
        id
    })
}

async fn run_interactive_refinement(planner: &PlanningLoop, session: &str, question: &str) -> Result<()> {
    let mut draft = planner.start_refinement(session, question).await?;
    let stdin = io::stdin();

    loop {
        print_draft(&draft);
        print!("\nClarification numbers (e.g. 1,3), 'e' to edit, 'x' to execute, 'q' to quit: ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }

        match line.trim() {
            "q" => return Ok(()),
            "x" => {
                let outcome = planner.answer_draft(session, &draft).await?;
                print_outcome(session, &outcome);
                return Ok(());
            }
            "e" => {
                print!("Edited question: ");
                io::stdout().flush()?;
                let mut edited = String::new();
                stdin.lock().read_line(&mut edited)?;
                planner
                    .refine_again(session, &mut draft, Vec::new(), Some(edited.trim()))
                    .await?;
            }
            picks => {
                let chosen = pick_clarifications(&draft, picks);
                if chosen.is_empty() {
                    println!("Nothing selected.");
                    continue;
                }
                planner.refine_again(session, &mut draft, chosen, None).await?;
            }
        }
    }
}

fn pick_clarifications(draft: &RefinementDraft, picks: &str) -> Vec<String> {
    let options = draft
        .latest()
        .map(|step| step.clarifications.as_slice())
        .unwrap_or_default();
    picks
        .split(',')
        .filter_map(|p| p.trim().parse::<usize>().ok())
        .filter_map(|n| n.checked_sub(1).and_then(|i| options.get(i)))
        .cloned()
        .collect()
}

fn print_draft(draft: &RefinementDraft) {
    println!("\n{}", "=".repeat(80));
    println!(" Round {}: {}", draft.rounds(), draft.current);
    println!("{}", "=".repeat(80));
    if let Some(step) = draft.latest() {
        println!(" Confidence: {:.0}%", step.confidence * 100.0);
        if !step.assumptions.is_empty() {
            println!("\n Assumptions:");
            for assumption in &step.assumptions {
                println!("   - {}", assumption);
            }
        }
        if !step.clarifications.is_empty() {
            println!("\n Clarifications:");
            for (i, clarification) in step.clarifications.iter().enumerate() {
                println!("   {}. {}", i + 1, clarification);
            }
        }
    }
}

fn print_outcome(session: &str, outcome: &TurnOutcome) {
    println!("\n{}", "=".repeat(80));
    println!(" {}", outcome.turn.question);
    println!("{}", "=".repeat(80));

    if let Some(plan) = &outcome.turn.plan {
        println!("\n {}", plan.explain);
        if !plan.notes.is_empty() {
            println!(" Notes: {}", plan.notes);
        }
        if plan.viz_suggestion.kind != "none" {
            println!(" Chart: {}", plan.viz_suggestion.kind);
        }
    }
    if let Some(sql) = &outcome.turn.sql {
        println!("\n SQL: {}", sql);
    }

    match (&outcome.result, &outcome.failure) {
        (Some(result), _) => {
            println!();
            print_table(result, 20);
            println!(
                "\n {} row(s) in {} ms",
                result.row_count(),
                result.execution_time_ms
            );
        }
        (None, Some(failure)) => println!("\n {}", failure),
        (None, None) => {}
    }
    println!("\n Recorded in session {}", session);
}

fn print_turn(index: usize, turn: &Turn) {
    let status = if turn.is_failure() { "FAILED" } else { "ok" };
    println!(
        "{}. [{}] {} ({})",
        index,
        turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
        turn.question,
        status
    );
    if turn.question_original != turn.question {
        println!("   asked as: {}", turn.question_original);
    }
    if let Some(sql) = &turn.sql {
        println!("   SQL: {}", sql);
    }
    if let Some(error) = &turn.error {
        println!("   Error: {}", error);
    }
}

async fn print_schema(settings: &Settings) -> Result<()> {
    let introspector = sql_copilot::db::SchemaIntrospector::new(&settings.db_path);
    let schema = introspector.describe().await?;

    let mut tables = serde_json::Map::new();
    for (name, columns) in &schema.tables {
        let count = introspector.row_count(name).await?;
        tables.insert(
            name.clone(),
            serde_json::json!({ "row_count": count, "columns": columns }),
        );
    }
    let document = serde_json::json!({
        "tables": tables,
        "foreign_keys": schema.foreign_keys,
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn print_table(result: &QueryResult, max_rows: usize) {
    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .take(max_rows)
        .map(|row| row.iter().map(render_cell).collect())
        .collect();

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let line = |values: &[String]| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
    };
    println!(" {}", line(result.columns.as_slice()));
    println!(
        " {}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-")
    );
    for row in &cells {
        println!(" {}", line(row.as_slice()));
    }
    if result.row_count() > max_rows {
        println!(" ... {} more row(s)", result.row_count() - max_rows);
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
