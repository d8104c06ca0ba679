use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::quiz::ai_helper::{LlmClient, LlmError};
use crate::quiz::rate_limit::RateLimiter;
use crate::quiz::scoring::normalize;
use crate::quiz::{Difficulty, Question, QuestionKind, QuizSpec, BLANK_SENTINEL};

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(?P<body>.*?)```").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Why a single generation attempt was thrown away. Never leaves this module
/// except through logs.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("no JSON object in model output")]
    NoJsonObject,

    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("question text is empty")]
    MissingQuestion,

    #[error("expected 4 options, got {0}")]
    WrongOptionCount(usize),

    #[error("option {0} is blank")]
    BlankOption(usize),

    #[error("duplicate option '{0}'")]
    DuplicateOption(String),

    #[error("correct answer '{0}' is not one of the options")]
    AnswerNotInOptions(String),

    #[error("answer is empty")]
    MissingAnswer,

    #[error("question is missing the blank marker")]
    MissingBlankMarker,
}

/// Result of one `generate` call. Both variants carry a valid question;
/// `Fallback` records that the model never produced a usable one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Generated(Question),
    Fallback(Question),
}

impl GenerationOutcome {
    pub fn question(&self) -> &Question {
        match self {
            GenerationOutcome::Generated(q) | GenerationOutcome::Fallback(q) => q,
        }
    }

    pub fn into_question(self) -> Question {
        match self {
            GenerationOutcome::Generated(q) | GenerationOutcome::Fallback(q) => q,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, GenerationOutcome::Fallback(_))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per question, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each further failure
    pub initial_backoff: Duration,
    /// Upper bound on a single model call; a stalled call counts as a failed attempt
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(15),
        }
    }
}

pub struct QuestionGenerator {
    client: Arc<dyn LlmClient>,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl QuestionGenerator {
    pub fn new(client: Arc<dyn LlmClient>, min_call_interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            client,
            limiter: RateLimiter::new(min_call_interval),
            retry,
        }
    }

    /// Produces one question, falling back to a canned one when every
    /// attempt fails. Never returns an error.
    pub async fn generate(
        &self,
        topic: &str,
        difficulty: Difficulty,
        kind: QuestionKind,
    ) -> GenerationOutcome {
        let prompt = build_prompt(topic, difficulty, kind);
        let mut delay = self.retry.initial_backoff;
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                debug!("Backing off {}ms before attempt {}", delay.as_millis(), attempt);
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }

            match self.attempt(&prompt, kind).await {
                Ok(question) => return GenerationOutcome::Generated(question),
                Err(e) => warn!(
                    "Question attempt {}/{} for '{}' failed: {}",
                    attempt, max_attempts, topic, e
                ),
            }
        }

        warn!(
            "Giving up on '{}' ({}) after {} attempts, using fallback question",
            topic, difficulty, max_attempts
        );
        GenerationOutcome::Fallback(fallback_question(topic, difficulty, kind))
    }

    /// Generates up to `spec.count` questions with distinct texts. Makes at
    /// most `count + 2` calls; the result is never empty.
    pub async fn generate_quiz(&self, spec: &QuizSpec) -> Vec<GenerationOutcome> {
        let max_calls = spec.count + 2;
        let mut seen = HashSet::new();
        let mut outcomes = Vec::with_capacity(spec.count);

        for _ in 0..max_calls {
            if outcomes.len() >= spec.count {
                break;
            }
            let outcome = self.generate(&spec.topic, spec.difficulty, spec.kind).await;
            if seen.insert(normalize(outcome.question().text())) {
                outcomes.push(outcome);
            } else {
                debug!("Dropping duplicate question for '{}'", spec.topic);
            }
        }

        if outcomes.len() < spec.count {
            warn!(
                "Generated {} unique questions out of {} requested for '{}'",
                outcomes.len(),
                spec.count,
                spec.topic
            );
        } else {
            info!("Generated {} questions for '{}'", outcomes.len(), spec.topic);
        }
        outcomes
    }

    async fn attempt(&self, prompt: &str, kind: QuestionKind) -> Result<Question, GenerationError> {
        self.limiter.acquire().await;
        let timeout = self.retry.call_timeout;
        let raw = tokio::time::timeout(timeout, self.client.complete(prompt))
            .await
            .map_err(|_| LlmError::Timeout(timeout))??
            .ok_or(GenerationError::EmptyResponse)?;
        parse_question(&raw, kind)
    }
}

pub fn build_prompt(topic: &str, difficulty: Difficulty, kind: QuestionKind) -> String {
    let difficulty = difficulty.as_str().to_lowercase();
    match kind {
        QuestionKind::MultipleChoice => format!(
            "Generate a {difficulty} multiple choice question about {topic}.\n\n\
             Return only a JSON object with exactly these fields:\n\
             - \"question\": a clear and specific question\n\
             - \"options\": an array of exactly four distinct possible answers\n\
             - \"correct_answer\": the one option that is correct, copied exactly\n\n\
             Do not write anything outside the JSON object.\n\n\
             Example format:\n\
             {{\"question\": \"What is the capital of France?\", \
             \"options\": [\"London\", \"Berlin\", \"Paris\", \"Madrid\"], \
             \"correct_answer\": \"Paris\"}}\n\n\
             Your response:"
        ),
        QuestionKind::FillBlank => format!(
            "Generate a {difficulty} fill-in-the-blank question about {topic}.\n\n\
             Return only a JSON object with exactly these fields:\n\
             - \"question\": a sentence with {BLANK_SENTINEL} marking where the blank is\n\
             - \"answer\": the word or phrase that belongs in the blank\n\n\
             Do not write anything outside the JSON object.\n\n\
             Example format:\n\
             {{\"question\": \"The capital of France is {BLANK_SENTINEL}.\", \"answer\": \"Paris\"}}\n\n\
             Your response:"
        ),
    }
}

/// Cuts the JSON object out of a completion: drops code fences, keeps the
/// span from the first `{` to the last `}` and flattens whitespace.
pub fn isolate_json(raw: &str) -> Option<String> {
    let body = CODE_FENCE
        .captures(raw)
        .and_then(|caps| caps.name("body"))
        .map(|m| m.as_str())
        .filter(|body| body.contains('{'))
        .unwrap_or(raw);

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    Some(WHITESPACE.replace_all(&body[start..=end], " ").into_owned())
}

/// Models sometimes wrap the question text in `{"description": ...}`.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum QuestionField {
    Text(String),
    Described { description: String },
}

impl QuestionField {
    fn into_text(self) -> String {
        match self {
            QuestionField::Text(text) | QuestionField::Described { description: text } => text,
        }
    }
}

#[derive(serde::Deserialize)]
struct RawMultipleChoice {
    question: QuestionField,
    options: Vec<String>,
    correct_answer: String,
}

#[derive(serde::Deserialize)]
struct RawFillBlank {
    question: QuestionField,
    answer: String,
}

pub fn parse_question(raw: &str, kind: QuestionKind) -> Result<Question, GenerationError> {
    let json = isolate_json(raw).ok_or(GenerationError::NoJsonObject)?;
    match kind {
        QuestionKind::MultipleChoice => {
            let parsed: RawMultipleChoice = serde_json::from_str(&json)?;
            validate_multiple_choice(parsed)
        }
        QuestionKind::FillBlank => {
            let parsed: RawFillBlank = serde_json::from_str(&json)?;
            validate_fill_blank(parsed)
        }
    }
}

fn validate_multiple_choice(raw: RawMultipleChoice) -> Result<Question, GenerationError> {
    let question = raw.question.into_text().trim().to_string();
    if question.is_empty() {
        return Err(GenerationError::MissingQuestion);
    }

    let options = raw
        .options
        .into_iter()
        .map(|o| o.trim().to_string())
        .collect::<Vec<_>>();
    if options.len() != 4 {
        return Err(GenerationError::WrongOptionCount(options.len()));
    }

    let mut seen = HashSet::new();
    for (i, option) in options.iter().enumerate() {
        if option.is_empty() {
            return Err(GenerationError::BlankOption(i));
        }
        if !seen.insert(normalize(option)) {
            return Err(GenerationError::DuplicateOption(option.clone()));
        }
    }

    // Keep the option's own casing so exact comparisons downstream still hold.
    let wanted = normalize(&raw.correct_answer);
    let correct_answer = options
        .iter()
        .find(|o| normalize(o) == wanted)
        .cloned()
        .ok_or(GenerationError::AnswerNotInOptions(raw.correct_answer))?;

    Ok(Question::MultipleChoice {
        question,
        options,
        correct_answer,
    })
}

fn validate_fill_blank(raw: RawFillBlank) -> Result<Question, GenerationError> {
    let question = raw.question.into_text().trim().to_string();
    if question.is_empty() {
        return Err(GenerationError::MissingQuestion);
    }
    if !question.contains(BLANK_SENTINEL) {
        return Err(GenerationError::MissingBlankMarker);
    }
    let answer = raw.answer.trim().to_string();
    if answer.is_empty() {
        return Err(GenerationError::MissingAnswer);
    }
    Ok(Question::FillBlank { question, answer })
}

/// Deterministic stand-in built only from the topic and difficulty.
pub fn fallback_question(topic: &str, difficulty: Difficulty, kind: QuestionKind) -> Question {
    let topic = topic.trim();
    match kind {
        QuestionKind::MultipleChoice => {
            let options = vec![
                format!("{topic} is a subject that can be studied and explained"),
                format!("{topic} has no connection to any other field"),
                format!("{topic} cannot be described in words"),
                format!("{topic} was invented in the last week"),
            ];
            // The answer is copied from the list so the two can never drift apart.
            let correct_answer = options[0].clone();
            Question::MultipleChoice {
                question: format!(
                    "({difficulty}) Which of the following statements about {topic} is true?"
                ),
                options,
                correct_answer,
            }
        }
        QuestionKind::FillBlank => Question::FillBlank {
            question: format!(
                "This {} quiz is about {BLANK_SENTINEL}.",
                difficulty.as_str().to_lowercase()
            ),
            answer: topic.to_string(),
        },
    }
}
