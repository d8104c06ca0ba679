mod config;
mod quiz;

use std::sync::Arc;

use chatgpt::client::ChatGPT;
use dotenv::dotenv;
use log::{info, warn};
use quiz::{
    ai_helper::QuizHelper,
    cache::QuizCache,
    generator::{QuestionGenerator, RetryPolicy},
    manager::QuizManager,
    scoring,
    store::{QuizRecord, QuizStore},
    Difficulty, Question, QuestionKind, QuizError, QuizSpec, ScoredResult, MAX_QUESTIONS,
};
use rand::seq::SliceRandom;
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    prelude::*,
    types::{ChatAction, InputFile, KeyboardButton, KeyboardMarkup, KeyboardRemove},
};

use crate::config::Settings;

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveTopic,
    ReceiveDifficulty {
        topic: String,
    },
    ReceiveKind {
        topic: String,
        difficulty: Difficulty,
    },
    ReceiveAmountOfQuestions {
        topic: String,
        difficulty: Difficulty,
        kind: QuestionKind,
    },
    TakingQuiz {
        quiz: QuizRecord,
        question_number: usize,
        answers: Vec<String>,
    },
    ReceiveNextAction {
        share_link: String,
    },
}

type QuizStorage = std::sync::Arc<ErasedStorage<State>>;

#[tokio::main]
async fn main() -> HandlerResult {
    let env_loaded = dotenv();
    pretty_env_logger::init();
    if let Err(e) = env_loaded {
        warn!("No .env file loaded: {}", e);
    }

    let settings = Arc::new(Settings::from_env()?);
    info!("Starting quiz bot...");

    let bot = Bot::from_env();

    info!("Opening dialogue storage at {}", settings.db_path);
    let storage: QuizStorage = SqliteStorage::open(&settings.db_path, Json).await?.erase();

    let gpt = {
        let mut gpt = ChatGPT::new(settings.chatgpt_api_key.clone())?;

        gpt.config.engine = settings.engine.clone();
        gpt.config.temperature = settings.temperature;
        gpt.config.timeout = settings.request_timeout;

        gpt
    };

    let generator = QuestionGenerator::new(
        Arc::new(QuizHelper::new(gpt)),
        settings.min_call_interval,
        RetryPolicy {
            max_attempts: settings.max_attempts,
            initial_backoff: settings.initial_backoff,
            call_timeout: settings.request_timeout,
        },
    );
    let manager = Arc::new(QuizManager::new(
        generator,
        QuizCache::new(settings.cache_ttl),
        QuizStore::new(),
    ));

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveTopic].endpoint(receive_topic))
            .branch(dptree::case![State::ReceiveDifficulty { topic }].endpoint(receive_difficulty))
            .branch(dptree::case![State::ReceiveKind { topic, difficulty }].endpoint(receive_kind))
            .branch(
                dptree::case![State::ReceiveAmountOfQuestions {
                    topic,
                    difficulty,
                    kind
                }]
                .endpoint(receive_amount_of_questions),
            )
            .branch(
                dptree::case![State::TakingQuiz {
                    quiz,
                    question_number,
                    answers
                }]
                .endpoint(taking_quiz),
            )
            .branch(
                dptree::case![State::ReceiveNextAction { share_link }]
                    .endpoint(receive_next_action),
            ),
    )
    .dependencies(dptree::deps![storage, manager, settings])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;

    Ok(())
}

const GREETING_TEXT: &str = "Hi! I'm a quiz bot. Tell me a topic and I'll write a quiz about it.\n\
    To take a quiz someone shared with you, send /take followed by its code.\n\n\
    What topic would you like?";
const TAKE_COMMAND: &str = "/take";

const NEW_QUIZ_ACTION: &str = "New quiz";
const REPORT_ACTION: &str = "Report";
const EXPORT_ACTION: &str = "Export JSON";
const MY_QUIZZES_ACTION: &str = "All quizzes";
const DELETE_ACTION: &str = "Delete quiz";

async fn start(
    bot: Bot,
    dialogue: QuizDialogue,
    manager: Arc<QuizManager>,
    msg: Message,
) -> HandlerResult {
    if try_take_shared_quiz(&bot, &dialogue, &manager, &msg).await? {
        return Ok(());
    }

    bot.send_message(msg.chat.id, GREETING_TEXT)
        .reply_markup(KeyboardRemove::new())
        .await?;
    dialogue.update(State::ReceiveTopic).await?;
    Ok(())
}

/// Returns the (possibly empty) code after a `/take` command, or `None`
/// when the text is some other message such as `/takeover`.
fn take_command_code(text: &str) -> Option<&str> {
    let rest = text.trim().strip_prefix(TAKE_COMMAND)?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

/// Handles `/take <code>`. Returns `true` when the message was a take
/// command, whether or not the quiz was found.
async fn try_take_shared_quiz(
    bot: &Bot,
    dialogue: &QuizDialogue,
    manager: &QuizManager,
    msg: &Message,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let Some(code) = msg.text().and_then(take_command_code) else {
        return Ok(false);
    };
    if code.is_empty() {
        bot.send_message(msg.chat.id, "Please send the quiz code after /take, e.g. /take AbC123xYz09")
            .await?;
        return Ok(true);
    }

    match manager.get(code).await {
        Ok(quiz) => {
            bot.send_message(
                msg.chat.id,
                format!("\"{}\": {} questions. Ready?", quiz.title, quiz.questions.len()),
            )
            .reply_markup(KeyboardMarkup::new(vec![vec![KeyboardButton::new("Go!")]]))
            .await?;
            dialogue
                .update(State::TakingQuiz {
                    quiz,
                    question_number: 0,
                    answers: Vec::new(),
                })
                .await?;
        }
        Err(QuizError::QuizNotFound(_)) => {
            bot.send_message(msg.chat.id, format!("No quiz with code {} was found", code))
                .await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(true)
}

async fn receive_topic(
    bot: Bot,
    dialogue: QuizDialogue,
    manager: Arc<QuizManager>,
    msg: Message,
) -> HandlerResult {
    if try_take_shared_quiz(&bot, &dialogue, &manager, &msg).await? {
        return Ok(());
    }

    let topic = match msg.text().map(str::trim) {
        Some(topic) if !topic.is_empty() => topic.to_string(),
        _ => {
            bot.send_message(msg.chat.id, "Please type a topic (as text)")
                .await?;
            return Ok(());
        }
    };

    let keyboard = KeyboardMarkup::new(vec![Difficulty::ALL
        .iter()
        .map(|d| KeyboardButton::new(d.as_str()))
        .collect::<Vec<_>>()]);
    bot.send_message(msg.chat.id, format!("Topic: {}. Pick a difficulty", topic))
        .reply_markup(keyboard)
        .await?;

    dialogue.update(State::ReceiveDifficulty { topic }).await?;
    Ok(())
}

async fn receive_difficulty(
    bot: Bot,
    dialogue: QuizDialogue,
    topic: String,
    msg: Message,
) -> HandlerResult {
    let difficulty = match msg.text().map(str::parse::<Difficulty>) {
        Some(Ok(difficulty)) => difficulty,
        Some(Err(e)) => {
            bot.send_message(msg.chat.id, e.to_string()).await?;
            return Ok(());
        }
        None => {
            bot.send_message(msg.chat.id, "Please choose one of the options")
                .await?;
            return Ok(());
        }
    };

    let keyboard = KeyboardMarkup::new(
        QuestionKind::ALL
            .iter()
            .map(|k| vec![KeyboardButton::new(k.as_str())])
            .collect::<Vec<_>>(),
    );
    bot.send_message(msg.chat.id, "What kind of questions?")
        .reply_markup(keyboard)
        .await?;

    dialogue
        .update(State::ReceiveKind { topic, difficulty })
        .await?;
    Ok(())
}

async fn receive_kind(
    bot: Bot,
    dialogue: QuizDialogue,
    (topic, difficulty): (String, Difficulty),
    msg: Message,
) -> HandlerResult {
    let kind = match msg.text().map(str::parse::<QuestionKind>) {
        Some(Ok(kind)) => kind,
        Some(Err(e)) => {
            bot.send_message(msg.chat.id, e.to_string()).await?;
            return Ok(());
        }
        None => {
            bot.send_message(msg.chat.id, "Please choose one of the options")
                .await?;
            return Ok(());
        }
    };

    let keyboard = KeyboardMarkup::new(vec![
        vec![KeyboardButton::new("1"), KeyboardButton::new("3")],
        vec![KeyboardButton::new("5"), KeyboardButton::new("10")],
    ]);
    bot.send_message(
        msg.chat.id,
        format!("How many questions? (1 to {})", MAX_QUESTIONS),
    )
    .reply_markup(keyboard)
    .await?;

    dialogue
        .update(State::ReceiveAmountOfQuestions {
            topic,
            difficulty,
            kind,
        })
        .await?;
    Ok(())
}

async fn receive_amount_of_questions(
    bot: Bot,
    dialogue: QuizDialogue,
    manager: Arc<QuizManager>,
    settings: Arc<Settings>,
    (topic, difficulty, kind): (String, Difficulty, QuestionKind),
    msg: Message,
) -> HandlerResult {
    let Some(amount) = msg.text().and_then(|t| t.trim().parse::<usize>().ok()) else {
        bot.send_message(msg.chat.id, "Please enter a number")
            .await?;
        return Ok(());
    };

    let spec = match QuizSpec::new(&topic, difficulty, amount, kind) {
        Ok(spec) => spec.with_shuffle_options(settings.shuffle_options),
        Err(e) => {
            bot.send_message(msg.chat.id, e.to_string()).await?;
            return Ok(());
        }
    };

    // Only cosmetic, so a failure here is not worth aborting over.
    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;

    let quiz = manager.create_quiz(spec, None).await?;

    bot.send_message(
        msg.chat.id,
        format!(
            "Your quiz \"{}\" is ready with {} questions!\nShare it with: {} {}",
            quiz.title,
            quiz.questions.len(),
            TAKE_COMMAND,
            quiz.share_link
        ),
    )
    .reply_markup(KeyboardMarkup::new(vec![vec![KeyboardButton::new("Go!")]]))
    .await?;

    dialogue
        .update(State::TakingQuiz {
            quiz,
            question_number: 0,
            answers: Vec::new(),
        })
        .await?;
    Ok(())
}

async fn taking_quiz(
    bot: Bot,
    dialogue: QuizDialogue,
    manager: Arc<QuizManager>,
    (quiz, question_number, answers): (QuizRecord, usize, Vec<String>),
    msg: Message,
) -> HandlerResult {
    let mut answers = answers;
    if question_number != 0 {
        let Some(answer) = msg.text() else {
            bot.send_message(msg.chat.id, "Please answer with text")
                .await?;
            return Ok(());
        };
        let question = &quiz.questions[question_number - 1];
        if scoring::is_correct(answer, question.correct_answer()) {
            bot.send_message(msg.chat.id, "Correct!").await?;
        } else {
            bot.send_message(
                msg.chat.id,
                format!("Wrong! The correct answer is: {}", question.correct_answer()),
            )
            .await?;
        }
        answers.push(answer.to_string());
    }

    if question_number >= quiz.questions.len() {
        let student_name = msg
            .from()
            .map(|user| user.full_name())
            .unwrap_or_else(|| "Anonymous".to_string());

        let result = match manager.submit(&quiz.share_link, &student_name, &answers).await {
            Ok(attempt) => attempt.result,
            // The quiz outlived the store (e.g. after a restart); still show the score.
            Err(QuizError::QuizNotFound(_)) => scoring::score(&quiz.questions, &answers)?,
            Err(e) => return Err(e.into()),
        };

        bot.send_message(msg.chat.id, format_result(&result))
            .reply_markup(next_action_keyboard())
            .await?;

        dialogue
            .update(State::ReceiveNextAction {
                share_link: quiz.share_link,
            })
            .await?;
        return Ok(());
    }

    let question = &quiz.questions[question_number];
    let question_text = format!(
        "Question {} of {}:\n{}",
        question_number + 1,
        quiz.questions.len(),
        question.text()
    );

    match question {
        Question::MultipleChoice { options, .. } => {
            // Shuffle a copy; the stored order stays canonical.
            let mut shown = options.clone();
            if quiz.spec.shuffle_options {
                shown.shuffle(&mut rand::thread_rng());
            }
            let keyboard = KeyboardMarkup::new(
                shown
                    .into_iter()
                    .map(|o| vec![KeyboardButton::new(o)])
                    .collect::<Vec<_>>(),
            );
            bot.send_message(msg.chat.id, question_text)
                .reply_markup(keyboard)
                .await?;
        }
        Question::FillBlank { .. } => {
            bot.send_message(
                msg.chat.id,
                format!("{}\n\nType the missing word or phrase.", question_text),
            )
            .reply_markup(KeyboardRemove::new())
            .await?;
        }
    }

    dialogue
        .update(State::TakingQuiz {
            quiz,
            question_number: question_number + 1,
            answers,
        })
        .await?;
    Ok(())
}

async fn receive_next_action(
    bot: Bot,
    dialogue: QuizDialogue,
    manager: Arc<QuizManager>,
    share_link: String,
    msg: Message,
) -> HandlerResult {
    if try_take_shared_quiz(&bot, &dialogue, &manager, &msg).await? {
        return Ok(());
    }

    match msg.text() {
        Some(NEW_QUIZ_ACTION) => {
            bot.send_message(msg.chat.id, "What topic would you like?")
                .reply_markup(KeyboardRemove::new())
                .await?;
            dialogue.update(State::ReceiveTopic).await?;
        }
        Some(REPORT_ACTION) => match manager.report(&share_link).await {
            Ok(report) => {
                let recent = manager
                    .attempts(&share_link)
                    .await
                    .iter()
                    .take(5)
                    .map(|a| {
                        format!(
                            "{}: {}/{} ({})",
                            a.student_name,
                            a.result.score,
                            a.result.total,
                            a.completed_at.format("%Y-%m-%d %H:%M UTC")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                bot.send_message(
                    msg.chat.id,
                    format!(
                        "Quiz {}\nAttempts: {}\nAverage score: {:.1}\nAverage percentage: {:.1}%\n\n{}",
                        share_link,
                        report.total_attempts,
                        report.average_score,
                        report.average_percentage,
                        recent
                    ),
                )
                .await?;
            }
            Err(e) => {
                bot.send_message(msg.chat.id, e.to_string()).await?;
            }
        },
        Some(EXPORT_ACTION) => match manager.export_json(&share_link).await {
            Ok(json) => {
                let file = InputFile::memory(json.into_bytes())
                    .file_name(format!("{}_quiz.json", share_link));
                bot.send_document(msg.chat.id, file).await?;
            }
            Err(e) => {
                bot.send_message(msg.chat.id, e.to_string()).await?;
            }
        },
        Some(MY_QUIZZES_ACTION) => {
            let quizzes = manager.list().await;
            let text = if quizzes.is_empty() {
                "No quizzes yet".to_string()
            } else {
                quizzes
                    .iter()
                    .map(|q| {
                        format!(
                            "{} ({}, {}, {} questions): {} {}",
                            q.title,
                            q.spec.difficulty,
                            q.spec.kind,
                            q.questions.len(),
                            TAKE_COMMAND,
                            q.share_link
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            bot.send_message(msg.chat.id, text).await?;
        }
        Some(DELETE_ACTION) => {
            let text = match manager.delete(&share_link).await {
                Ok(quiz) => format!("Deleted \"{}\"", quiz.title),
                Err(e) => e.to_string(),
            };
            bot.send_message(msg.chat.id, text)
                .reply_markup(KeyboardMarkup::new(vec![vec![KeyboardButton::new(
                    NEW_QUIZ_ACTION,
                )]]))
                .await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "Please choose one of the options")
                .reply_markup(next_action_keyboard())
                .await?;
        }
    }
    Ok(())
}

fn next_action_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new(NEW_QUIZ_ACTION),
            KeyboardButton::new(REPORT_ACTION),
            KeyboardButton::new(EXPORT_ACTION),
        ],
        vec![
            KeyboardButton::new(MY_QUIZZES_ACTION),
            KeyboardButton::new(DELETE_ACTION),
        ],
    ])
}

fn format_result(result: &ScoredResult) -> String {
    let breakdown = result
        .per_question
        .iter()
        .enumerate()
        .map(|(i, outcome)| {
            let mark = if outcome.is_correct { "✅" } else { "❌" };
            let submitted = if outcome.submitted_answer.trim().is_empty() {
                "(no answer)"
            } else {
                outcome.submitted_answer.as_str()
            };
            format!(
                "{} {}. {}\n   Your answer: {}\n   Correct answer: {}",
                mark,
                i + 1,
                outcome.question_text,
                submitted,
                outcome.correct_answer
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Quiz finished! You answered {} of {} questions correctly ({:.0}%)\n\n{}\n\nWhat would you like to do next?",
        result.score, result.total, result.percentage, breakdown
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_command_needs_a_word_boundary() {
        assert_eq!(take_command_code("/take AbC123xYz09"), Some("AbC123xYz09"));
        assert_eq!(take_command_code("  /take   AbC123xYz09 "), Some("AbC123xYz09"));
        assert_eq!(take_command_code("/take"), Some(""));
        assert_eq!(take_command_code("/takeover"), None);
        assert_eq!(take_command_code("History"), None);
    }

    #[test]
    fn result_summary_lists_every_question() {
        let questions = vec![
            Question::FillBlank {
                question: "Rust's package manager is ______.".to_string(),
                answer: "Cargo".to_string(),
            },
            Question::FillBlank {
                question: "Rust code is compiled by ______.".to_string(),
                answer: "rustc".to_string(),
            },
        ];
        let result = scoring::score(&questions, &["cargo".to_string()]).unwrap();

        let text = format_result(&result);
        assert!(text.contains("1 of 2 questions correctly (50%)"));
        assert!(text.contains("✅ 1. Rust's package manager is ______."));
        assert!(text.contains("❌ 2. Rust code is compiled by ______."));
        assert!(text.contains("Your answer: (no answer)"));
    }
}
