//! Iterative question refinement

use crate::llm::Refinement;
use serde::{Deserialize, Serialize};

/// State of a multi-round refinement before the question is executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementDraft {
    pub original: String,
    /// Question text the next round (or execution) starts from
    pub current: String,
    pub steps: Vec<Refinement>,
    /// Every clarification the user picked or typed, across rounds
    pub user_choices: Vec<String>,
}

impl RefinementDraft {
    pub fn start(original: impl Into<String>, first: Refinement) -> Self {
        let original = original.into();
        let current = pick_current(&first, &original);
        Self {
            original,
            current,
            steps: vec![first],
            user_choices: Vec::new(),
        }
    }

    /// Adds one round. A blank refined question falls back to the user's
    /// edit, or to the current text when there was no edit.
    pub fn record(&mut self, chosen: &[String], edited: Option<&str>, step: Refinement) {
        self.user_choices.extend(chosen.iter().cloned());
        let fallback = effective_question(&self.current, edited).to_string();
        self.current = pick_current(&step, &fallback);
        self.steps.push(step);
    }

    pub fn latest(&self) -> Option<&Refinement> {
        self.steps.last()
    }

    pub fn rounds(&self) -> usize {
        self.steps.len()
    }
}

fn pick_current(step: &Refinement, fallback: &str) -> String {
    let refined = step.refined_question.trim();
    if refined.is_empty() {
        fallback.to_string()
    } else {
        refined.to_string()
    }
}

/// Question text sent for a refinement round: a non-blank user edit wins
/// over the base question.
pub fn effective_question<'a>(base_question: &'a str, edited: Option<&'a str>) -> &'a str {
    match edited.map(str::trim) {
        Some(edit) if !edit.is_empty() => edit,
        _ => base_question,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(question: &str, confidence: f64) -> Refinement {
        Refinement {
            refined_question: question.to_string(),
            clarifications: vec!["which year?".to_string()],
            assumptions: vec![],
            confidence,
        }
    }

    #[test]
    fn test_draft_tracks_rounds_and_choices() {
        let mut draft = RefinementDraft::start("sales", step("monthly sales", 0.4));
        assert_eq!(draft.current, "monthly sales");

        draft.record(&["only 2024".to_string()], None, step("monthly sales in 2024", 0.9));

        assert_eq!(draft.rounds(), 2);
        assert_eq!(draft.current, "monthly sales in 2024");
        assert_eq!(draft.user_choices, vec!["only 2024"]);
        assert_eq!(draft.latest().map(|s| s.confidence), Some(0.9));
    }

    #[test]
    fn test_blank_refinement_keeps_previous_text() {
        let draft = RefinementDraft::start("sales", step("  ", 0.1));
        assert_eq!(draft.current, "sales");
    }

    #[test]
    fn test_blank_round_falls_back_to_user_edit() {
        let mut draft = RefinementDraft::start("sales", step("monthly sales", 0.4));
        draft.record(&[], Some(" sales per country "), step("", 0.2));
        assert_eq!(draft.current, "sales per country");

        draft.record(&[], None, step("  ", 0.2));
        assert_eq!(draft.current, "sales per country");
    }

    #[test]
    fn test_effective_question() {
        assert_eq!(effective_question("base", None), "base");
        assert_eq!(effective_question("base", Some("   ")), "base");
        assert_eq!(effective_question("base", Some(" edited ")), "edited");
    }
}
