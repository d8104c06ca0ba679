use log::{debug, info};

use crate::quiz::cache::{CacheKey, QuizCache};
use crate::quiz::generator::{GenerationOutcome, QuestionGenerator};
use crate::quiz::store::{Attempt, QuizRecord, QuizReport, QuizStore};
use crate::quiz::{scoring, QuizError, QuizSpec};

/// Creates, stores and scores quizzes. The generator, cache and store are
/// handed in so tests can swap any of them.
pub struct QuizManager {
    generator: QuestionGenerator,
    cache: QuizCache,
    store: QuizStore,
}

impl QuizManager {
    pub fn new(generator: QuestionGenerator, cache: QuizCache, store: QuizStore) -> Self {
        Self {
            generator,
            cache,
            store,
        }
    }

    pub async fn create_quiz(
        &self,
        spec: QuizSpec,
        title: Option<String>,
    ) -> Result<QuizRecord, QuizError> {
        spec.validate()?;
        let key = CacheKey::new(&spec.topic, spec.kind, spec.difficulty);

        let record = match self.cache.get(&key).filter(|q| q.len() >= spec.count) {
            Some(mut questions) => {
                info!("Quiz on '{}' served from cache", spec.topic);
                questions.truncate(spec.count);
                QuizRecord::new(spec, title, questions, 0)
            }
            None => {
                let outcomes = self.generator.generate_quiz(&spec).await;
                let fallback_count = outcomes.iter().filter(|o| o.is_fallback()).count();
                let questions = outcomes
                    .into_iter()
                    .map(GenerationOutcome::into_question)
                    .collect::<Vec<_>>();
                // Canned questions would only poison later requests.
                if fallback_count == 0 {
                    self.cache.put(key, questions.clone());
                    debug!("Quiz cache now holds {} entries", self.cache.len());
                }
                QuizRecord::new(spec, title, questions, fallback_count)
            }
        };

        info!(
            "Created quiz {} '{}' with {} questions",
            record.share_link,
            record.title,
            record.questions.len()
        );
        self.store.insert(record.clone()).await;
        Ok(record)
    }

    pub async fn submit(
        &self,
        share_link: &str,
        student_name: &str,
        answers: &[String],
    ) -> Result<Attempt, QuizError> {
        let record = self.store.get(share_link).await?;
        let result = scoring::score(&record.questions, answers)?;
        info!(
            "{} scored {}/{} on quiz {}",
            student_name, result.score, result.total, share_link
        );
        self.store.record_attempt(share_link, student_name, result).await
    }

    pub async fn get(&self, share_link: &str) -> Result<QuizRecord, QuizError> {
        self.store.get(share_link).await
    }

    pub async fn list(&self) -> Vec<QuizRecord> {
        self.store.list().await
    }

    pub async fn delete(&self, share_link: &str) -> Result<QuizRecord, QuizError> {
        self.store.delete(share_link).await
    }

    pub async fn attempts(&self, share_link: &str) -> Vec<Attempt> {
        self.store.attempts(share_link).await
    }

    pub async fn report(&self, share_link: &str) -> Result<QuizReport, QuizError> {
        self.store.report(share_link).await
    }

    pub async fn export_json(&self, share_link: &str) -> Result<String, QuizError> {
        self.store.export_json(share_link).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::ai_helper::{LlmClient, LlmError};
    use crate::quiz::generator::RetryPolicy;
    use crate::quiz::{Difficulty, QuestionKind, MAX_QUESTIONS};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Hands out numbered fill-in-the-blank questions, or fails every call.
    struct CountingClient {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LlmClient for CountingClient {
        async fn complete(&self, _prompt: &str) -> Result<Option<String>, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Ok(None);
            }
            Ok(Some(format!(
                "{{\"question\": \"Fact number {n} is ______.\", \"answer\": \"fact {n}\"}}"
            )))
        }
    }

    fn manager(fail: bool) -> (QuizManager, Arc<CountingClient>) {
        let client = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
            fail,
        });
        let generator = QuestionGenerator::new(
            client.clone(),
            Duration::from_millis(10),
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(10),
                call_timeout: Duration::from_secs(5),
            },
        );
        let manager = QuizManager::new(
            generator,
            QuizCache::new(Duration::from_secs(600)),
            QuizStore::new(),
        );
        (manager, client)
    }

    fn spec(count: usize) -> QuizSpec {
        QuizSpec::new("Trivia", Difficulty::Easy, count, QuestionKind::FillBlank).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn create_submit_and_report() {
        let (manager, _) = manager(false);
        let record = manager.create_quiz(spec(2), Some("Friday".to_string())).await.unwrap();
        assert_eq!(record.title, "Friday");
        assert_eq!(record.questions.len(), 2);
        assert_eq!(record.fallback_count, 0);

        let attempt = manager
            .submit(&record.share_link, "Grace", &["  FACT 1 ".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(attempt.result.score, 1);
        assert_eq!(attempt.result.percentage, 50.0);

        let report = manager.report(&record.share_link).await.unwrap();
        assert_eq!(report.total_attempts, 1);
        assert_eq!(report.average_percentage, 50.0);
        assert_eq!(manager.attempts(&record.share_link).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_is_served_from_cache() {
        let (manager, client) = manager(false);
        let first = manager.create_quiz(spec(3), None).await.unwrap();
        let calls = client.calls.load(Ordering::SeqCst);

        let second = manager.create_quiz(spec(2), None).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), calls);
        assert_eq!(second.questions, first.questions[..2].to_vec());
        assert_ne!(first.share_link, second.share_link);
        assert_eq!(manager.list().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn larger_request_bypasses_smaller_cache_entry() {
        let (manager, client) = manager(false);
        manager.create_quiz(spec(1), None).await.unwrap();
        let calls = client.calls.load(Ordering::SeqCst);

        let record = manager.create_quiz(spec(2), None).await.unwrap();

        assert_eq!(record.questions.len(), 2);
        assert!(client.calls.load(Ordering::SeqCst) > calls);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_quizzes_are_not_cached() {
        let (manager, client) = manager(true);
        let record = manager.create_quiz(spec(1), None).await.unwrap();
        assert_eq!(record.fallback_count, 1);
        assert!(record.questions[0].is_well_formed());

        let calls = client.calls.load(Ordering::SeqCst);
        manager.create_quiz(spec(1), None).await.unwrap();
        assert!(client.calls.load(Ordering::SeqCst) > calls);
    }

    #[tokio::test(start_paused = true)]
    async fn hand_built_invalid_spec_is_rejected() {
        let (manager, client) = manager(false);
        let mut bad = spec(1);
        bad.count = MAX_QUESTIONS + 1;
        assert!(matches!(
            manager.create_quiz(bad, None).await,
            Err(QuizError::InvalidCount { .. })
        ));

        let mut bad = spec(1);
        bad.topic = " ".to_string();
        assert!(matches!(
            manager.create_quiz(bad, None).await,
            Err(QuizError::EmptyTopic)
        ));

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(manager.list().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_quiz_cannot_be_submitted() {
        let (manager, _) = manager(false);
        assert!(matches!(
            manager.submit("nope", "Grace", &[]).await,
            Err(QuizError::QuizNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn export_and_delete() {
        let (manager, _) = manager(false);
        let record = manager.create_quiz(spec(1), None).await.unwrap();

        let json = manager.export_json(&record.share_link).await.unwrap();
        assert!(json.contains("Fact number 1 is ______."));

        manager.delete(&record.share_link).await.unwrap();
        assert!(manager.get(&record.share_link).await.is_err());
    }
}
