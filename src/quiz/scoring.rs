use crate::quiz::{Question, QuestionOutcome, QuizError, ScoredResult};

/// Canonical form used for answer comparison: lower case, trimmed, and
/// every run of whitespace collapsed to a single space.
pub fn normalize(answer: &str) -> String {
    answer
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_correct(submitted: &str, correct: &str) -> bool {
    normalize(submitted) == normalize(correct)
}

/// Scores `submissions` against `questions` by position. Missing
/// submissions count as empty answers, extra ones are ignored.
pub fn score(questions: &[Question], submissions: &[String]) -> Result<ScoredResult, QuizError> {
    if questions.is_empty() {
        return Err(QuizError::EmptyQuestionSet);
    }

    let per_question = questions
        .iter()
        .enumerate()
        .map(|(i, question)| {
            let submitted = submissions.get(i).map(String::as_str).unwrap_or_default();
            QuestionOutcome {
                question_text: question.text().to_string(),
                submitted_answer: submitted.to_string(),
                correct_answer: question.correct_answer().to_string(),
                is_correct: is_correct(submitted, question.correct_answer()),
            }
        })
        .collect::<Vec<_>>();

    let score = per_question.iter().filter(|o| o.is_correct).count();
    let total = questions.len();

    Ok(ScoredResult {
        score,
        total,
        percentage: 100.0 * score as f64 / total as f64,
        per_question,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capital_question() -> Question {
        Question::MultipleChoice {
            question: "What is the capital of France?".to_string(),
            options: vec![
                "London".to_string(),
                "Berlin".to_string(),
                "Paris".to_string(),
                "Madrid".to_string(),
            ],
            correct_answer: "Paris".to_string(),
        }
    }

    fn blank_question() -> Question {
        Question::FillBlank {
            question: "Rust's package manager is ______.".to_string(),
            answer: "Cargo".to_string(),
        }
    }

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize("  Paris   "), normalize("paris"));
        assert_eq!(normalize("New\t\tYork\n City"), "new york city");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \n\t "), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["  Paris   ", "A\u{a0}B", "ÉCOLE  normale", "", "x\n\ny", "MiXeD   Case "] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn shouted_answer_with_padding_is_correct() {
        let result = score(&[capital_question()], &["  PARIS  ".to_string()]).unwrap();
        assert!(result.per_question[0].is_correct);
        assert_eq!(result.per_question[0].submitted_answer, "  PARIS  ");
    }

    #[test]
    fn matches_option_text_not_position() {
        assert!(is_correct("paris", "Paris"));
        assert!(!is_correct("C", "Paris"));
    }

    #[test]
    fn missing_submissions_are_incorrect() {
        let questions = vec![capital_question(), blank_question()];
        let result = score(&questions, &["Paris".to_string()]).unwrap();

        assert_eq!(result.score, 1);
        assert_eq!(result.total, 2);
        assert_eq!(result.percentage, 50.0);
        assert_eq!(result.per_question[1].submitted_answer, "");
        assert!(!result.per_question[1].is_correct);
    }

    #[test]
    fn extra_submissions_are_ignored() {
        let result = score(
            &[blank_question()],
            &["cargo".to_string(), "extra".to_string()],
        )
        .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.per_question.len(), 1);
        assert_eq!(result.score, 1);
    }

    #[test]
    fn totals_always_match_question_count() {
        let questions = vec![capital_question(), blank_question(), capital_question()];
        for submissions in [vec![], vec!["x".to_string()], vec!["Paris".to_string(); 5]] {
            let result = score(&questions, &submissions).unwrap();
            assert_eq!(result.total, questions.len());
            assert_eq!(result.per_question.len(), questions.len());
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let questions = vec![capital_question(), blank_question()];
        let submissions = vec!["paris".to_string(), "npm".to_string()];
        assert_eq!(
            score(&questions, &submissions).unwrap(),
            score(&questions, &submissions).unwrap()
        );
    }

    #[test]
    fn empty_question_set_is_rejected() {
        assert!(matches!(
            score(&[], &["anything".to_string()]),
            Err(QuizError::EmptyQuestionSet)
        ));
    }
}
