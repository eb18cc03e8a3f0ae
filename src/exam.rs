//! Exam data model
//!
//! The immutable exam snapshot fetched at session start, the student's
//! answer selections, and the grading payload/response shapes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Answer id submitted for questions the student never answered
pub const NO_ANSWER: i64 = -1;

/// Immutable exam content, fetched once per attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSnapshot {
    pub exam_id: i64,

    #[serde(default)]
    pub exam_name: Option<String>,

    #[serde(default)]
    pub subject_name: Option<String>,

    pub duration_minutes: u32,

    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub question_id: i64,
    pub question_text: String,

    #[serde(default)]
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub answer_id: i64,
    pub answer_text: String,
}

/// One entry of the submitted answer payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerChoice {
    pub question_id: i64,
    pub answer_id: i64,
}

/// Grading response from the exam service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub score: f64,
    pub total_questions: u32,
    pub correct_answers: u32,
}

/// The student's current answer selections, `question_id -> answer_id`.
///
/// Mutated only through [`SelectionMap::select`]; read when the submission
/// payload is assembled.
#[derive(Debug, Default, Clone)]
pub struct SelectionMap {
    choices: HashMap<i64, i64>,
}

impl SelectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the chosen answer for a question.
    pub fn select(&mut self, question_id: i64, answer_id: i64) {
        self.choices.insert(question_id, answer_id);
    }

    pub fn get(&self, question_id: i64) -> Option<i64> {
        self.choices.get(&question_id).copied()
    }

    pub fn answered_count(&self) -> usize {
        self.choices.len()
    }

    /// Build the submission payload in the snapshot's question order.
    /// Unanswered questions map to [`NO_ANSWER`].
    pub fn payload(&self, questions: &[Question]) -> Vec<AnswerChoice> {
        questions
            .iter()
            .map(|q| AnswerChoice {
                question_id: q.question_id,
                answer_id: self.get(q.question_id).unwrap_or(NO_ANSWER),
            })
            .collect()
    }
}
