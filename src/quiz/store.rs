use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::RwLock;

use crate::quiz::{Question, QuizError, QuizSpec, ScoredResult};

const SHARE_LINK_LEN: usize = 11;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuizRecord {
    pub share_link: String,
    pub title: String,
    pub spec: QuizSpec,
    pub questions: Vec<Question>,
    /// How many of `questions` are canned fallbacks rather than model output
    pub fallback_count: usize,
    pub created_at: DateTime<Utc>,
}

impl QuizRecord {
    pub fn new(
        spec: QuizSpec,
        title: Option<String>,
        questions: Vec<Question>,
        fallback_count: usize,
    ) -> Self {
        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("{} Quiz", spec.topic));
        Self {
            share_link: new_share_link(),
            title,
            spec,
            questions,
            fallback_count,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Attempt {
    pub id: u64,
    pub share_link: String,
    pub student_name: String,
    pub result: ScoredResult,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuizReport {
    pub total_attempts: usize,
    pub average_score: f64,
    pub average_percentage: f64,
}

#[derive(Default)]
struct Inner {
    quizzes: HashMap<String, QuizRecord>,
    attempts: Vec<Attempt>,
    next_attempt_id: u64,
}

/// Created quizzes, keyed by share link, with their attempt history.
#[derive(Default)]
pub struct QuizStore {
    inner: RwLock<Inner>,
}

impl QuizStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: QuizRecord) {
        self.inner
            .write()
            .await
            .quizzes
            .insert(record.share_link.clone(), record);
    }

    pub async fn get(&self, share_link: &str) -> Result<QuizRecord, QuizError> {
        self.inner
            .read()
            .await
            .quizzes
            .get(share_link)
            .cloned()
            .ok_or_else(|| QuizError::QuizNotFound(share_link.to_string()))
    }

    /// All quizzes, newest first.
    pub async fn list(&self) -> Vec<QuizRecord> {
        let mut quizzes = self
            .inner
            .read()
            .await
            .quizzes
            .values()
            .cloned()
            .collect::<Vec<_>>();
        quizzes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        quizzes
    }

    /// Removes a quiz together with its attempts.
    pub async fn delete(&self, share_link: &str) -> Result<QuizRecord, QuizError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .quizzes
            .remove(share_link)
            .ok_or_else(|| QuizError::QuizNotFound(share_link.to_string()))?;
        inner.attempts.retain(|a| a.share_link != share_link);
        Ok(record)
    }

    pub async fn record_attempt(
        &self,
        share_link: &str,
        student_name: &str,
        result: ScoredResult,
    ) -> Result<Attempt, QuizError> {
        let mut inner = self.inner.write().await;
        if !inner.quizzes.contains_key(share_link) {
            return Err(QuizError::QuizNotFound(share_link.to_string()));
        }
        inner.next_attempt_id += 1;
        let attempt = Attempt {
            id: inner.next_attempt_id,
            share_link: share_link.to_string(),
            student_name: student_name.to_string(),
            result,
            completed_at: Utc::now(),
        };
        inner.attempts.push(attempt.clone());
        Ok(attempt)
    }

    /// Attempts on one quiz, newest first.
    pub async fn attempts(&self, share_link: &str) -> Vec<Attempt> {
        self.inner
            .read()
            .await
            .attempts
            .iter()
            .rev()
            .filter(|a| a.share_link == share_link)
            .cloned()
            .collect()
    }

    pub async fn report(&self, share_link: &str) -> Result<QuizReport, QuizError> {
        let record = self.get(share_link).await?;
        let attempts = self.attempts(share_link).await;

        let total_attempts = attempts.len();
        if total_attempts == 0 || record.questions.is_empty() {
            return Ok(QuizReport {
                total_attempts,
                average_score: 0.0,
                average_percentage: 0.0,
            });
        }

        let average_score =
            attempts.iter().map(|a| a.result.score as f64).sum::<f64>() / total_attempts as f64;
        Ok(QuizReport {
            total_attempts,
            average_score,
            average_percentage: average_score / record.questions.len() as f64 * 100.0,
        })
    }

    pub async fn export_json(&self, share_link: &str) -> Result<String, QuizError> {
        let record = self.get(share_link).await?;
        Ok(serde_json::to_string_pretty(&record)?)
    }
}

fn new_share_link() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHARE_LINK_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::{scoring, Difficulty, QuestionKind};

    fn record() -> QuizRecord {
        let spec = QuizSpec::new("Rust", Difficulty::Medium, 2, QuestionKind::FillBlank).unwrap();
        QuizRecord::new(
            spec,
            None,
            vec![
                Question::FillBlank {
                    question: "Rust's package manager is ______.".to_string(),
                    answer: "Cargo".to_string(),
                },
                Question::FillBlank {
                    question: "Borrowed references are checked by the ______ checker.".to_string(),
                    answer: "borrow".to_string(),
                },
            ],
            0,
        )
    }

    fn answers(a: &str, b: &str) -> Vec<String> {
        vec![a.to_string(), b.to_string()]
    }

    #[test]
    fn record_gets_default_title_and_share_link() {
        let record = record();
        assert_eq!(record.title, "Rust Quiz");
        assert_eq!(record.share_link.len(), SHARE_LINK_LEN);
        assert!(record.share_link.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(record.share_link, self::record().share_link);
    }

    #[tokio::test]
    async fn report_averages_attempts() {
        let store = QuizStore::new();
        let record = record();
        let link = record.share_link.clone();
        store.insert(record.clone()).await;

        let empty = store.report(&link).await.unwrap();
        assert_eq!(empty.total_attempts, 0);
        assert_eq!(empty.average_percentage, 0.0);

        for submission in [answers("cargo", "borrow"), answers("npm", "")] {
            let result = scoring::score(&record.questions, &submission).unwrap();
            store.record_attempt(&link, "Ada", result).await.unwrap();
        }

        let report = store.report(&link).await.unwrap();
        assert_eq!(report.total_attempts, 2);
        assert_eq!(report.average_score, 1.0);
        assert_eq!(report.average_percentage, 50.0);

        let attempts = store.attempts(&link).await;
        assert_eq!(attempts[0].id, 2);
        assert_eq!(attempts[1].result.score, 2);
    }

    #[tokio::test]
    async fn unknown_quiz_is_reported() {
        let store = QuizStore::new();
        let result = scoring::score(&record().questions, &[]).unwrap();
        assert!(matches!(
            store.record_attempt("missing", "Ada", result).await,
            Err(QuizError::QuizNotFound(_))
        ));
        assert!(matches!(store.report("missing").await, Err(QuizError::QuizNotFound(_))));
    }

    #[tokio::test]
    async fn delete_drops_attempts() {
        let store = QuizStore::new();
        let record = record();
        let link = record.share_link.clone();
        store.insert(record.clone()).await;
        let result = scoring::score(&record.questions, &answers("Cargo", "borrow")).unwrap();
        store.record_attempt(&link, "Ada", result).await.unwrap();

        store.delete(&link).await.unwrap();
        assert!(store.get(&link).await.is_err());
        assert!(store.attempts(&link).await.is_empty());
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn export_round_trips_through_json() {
        let store = QuizStore::new();
        let record = record();
        store.insert(record.clone()).await;

        let json = store.export_json(&record.share_link).await.unwrap();
        let parsed: QuizRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert!(json.contains("\"type\": \"fill_blank\""));
    }
}
