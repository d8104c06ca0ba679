pub mod ai_helper;
pub mod cache;
pub mod generator;
pub mod manager;
pub mod rate_limit;
pub mod scoring;
pub mod store;

use std::fmt;
use std::str::FromStr;

/// Marker a fill-in-the-blank question must contain where the answer goes.
pub const BLANK_SENTINEL: &str = "______";

/// Upper bound on the number of questions a single quiz may ask for.
pub const MAX_QUESTIONS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    #[error("Topic must not be empty")]
    EmptyTopic,

    #[error("Number of questions must be between 1 and {max}, got {count}")]
    InvalidCount { count: usize, max: usize },

    #[error("Unknown difficulty '{0}', expected Easy, Medium or Hard")]
    UnknownDifficulty(String),

    #[error("Unknown question kind '{0}', expected multiple choice or fill in the blank")]
    UnknownKind(String),

    #[error("Cannot score a quiz without questions")]
    EmptyQuestionSet,

    #[error("Quiz '{0}' not found")]
    QuizNotFound(String),

    #[error("Failed to serialize quiz: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = QuizError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(QuizError::UnknownDifficulty(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum QuestionKind {
    #[default]
    MultipleChoice,
    FillBlank,
}

impl QuestionKind {
    pub const ALL: [QuestionKind; 2] = [QuestionKind::MultipleChoice, QuestionKind::FillBlank];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::MultipleChoice => "Multiple choice",
            QuestionKind::FillBlank => "Fill in the blank",
        }
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionKind {
    type Err = QuizError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s
            .trim()
            .to_lowercase()
            .replace(['-', '_'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        match key.as_str() {
            "mcq" | "multiple choice" | "multiplechoice" => Ok(QuestionKind::MultipleChoice),
            "fill in the blank" | "fill blank" | "fill the blank" | "fillblank" => {
                Ok(QuestionKind::FillBlank)
            }
            _ => Err(QuizError::UnknownKind(s.to_string())),
        }
    }
}

/// A single quiz question. The stored option order is canonical; any
/// shuffling for display happens on a copy.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Question {
    MultipleChoice {
        question: String,
        options: Vec<String>,
        correct_answer: String,
    },
    FillBlank {
        question: String,
        answer: String,
    },
}

impl Question {
    pub fn text(&self) -> &str {
        match self {
            Question::MultipleChoice { question, .. } | Question::FillBlank { question, .. } => {
                question
            }
        }
    }

    pub fn correct_answer(&self) -> &str {
        match self {
            Question::MultipleChoice { correct_answer, .. } => correct_answer,
            Question::FillBlank { answer, .. } => answer,
        }
    }

    /// Checks the structural invariants every stored question must hold:
    /// four distinct options with an exact-match correct answer, or a
    /// prompt carrying the blank sentinel.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Question::MultipleChoice {
                question,
                options,
                correct_answer,
            } => {
                let distinct = options
                    .iter()
                    .map(|o| scoring::normalize(o))
                    .collect::<std::collections::HashSet<_>>()
                    .len();
                !question.trim().is_empty()
                    && options.len() == 4
                    && distinct == 4
                    && options.contains(correct_answer)
            }
            Question::FillBlank { question, answer } => {
                question.contains(BLANK_SENTINEL) && !answer.trim().is_empty()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuizSpec {
    pub topic: String,
    pub difficulty: Difficulty,
    pub count: usize,
    pub kind: QuestionKind,
    pub shuffle_options: bool,
}

impl QuizSpec {
    pub fn new(
        topic: &str,
        difficulty: Difficulty,
        count: usize,
        kind: QuestionKind,
    ) -> Result<Self, QuizError> {
        let spec = Self {
            topic: topic.trim().to_string(),
            difficulty,
            count,
            kind,
            shuffle_options: true,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Fields are public, so a spec built by hand may break these.
    pub fn validate(&self) -> Result<(), QuizError> {
        if self.topic.trim().is_empty() {
            return Err(QuizError::EmptyTopic);
        }
        if self.count == 0 || self.count > MAX_QUESTIONS {
            return Err(QuizError::InvalidCount {
                count: self.count,
                max: MAX_QUESTIONS,
            });
        }
        Ok(())
    }

    pub fn with_shuffle_options(mut self, shuffle_options: bool) -> Self {
        self.shuffle_options = shuffle_options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuestionOutcome {
    pub question_text: String,
    pub submitted_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScoredResult {
    pub score: usize,
    pub total: usize,
    pub percentage: f64,
    pub per_question: Vec<QuestionOutcome>,
}
