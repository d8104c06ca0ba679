use std::str::FromStr;
use std::time::Duration;

use chatgpt::config::ChatGPTEngine;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub chatgpt_api_key: String,
    pub engine: ChatGPTEngine,
    pub temperature: f32,
    pub request_timeout: Duration,
    pub min_call_interval: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub cache_ttl: Duration,
    pub db_path: String,
    pub shuffle_options: bool,
}

impl Settings {
    /// Reads settings from the process environment. Call `dotenv()` first
    /// to pick up a local `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let chatgpt_api_key = lookup("CHATGPT_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::Missing("CHATGPT_API_KEY"))?;

        let engine = match lookup("QUIZ_MODEL") {
            None => ChatGPTEngine::Gpt35Turbo,
            Some(model) => match model.trim() {
                "gpt-3.5-turbo" => ChatGPTEngine::Gpt35Turbo,
                "gpt-4" => ChatGPTEngine::Gpt4,
                "gpt-4-32k" => ChatGPTEngine::Gpt4_32k,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "QUIZ_MODEL",
                        value: model,
                    })
                }
            },
        };

        let max_attempts: u32 = parse_or(&lookup, "QUIZ_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "QUIZ_MAX_ATTEMPTS",
                value: max_attempts.to_string(),
            });
        }

        let request_timeout_secs: u64 = parse_or(&lookup, "QUIZ_REQUEST_TIMEOUT_SECS", 15)?;
        if request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "QUIZ_REQUEST_TIMEOUT_SECS",
                value: request_timeout_secs.to_string(),
            });
        }

        Ok(Self {
            chatgpt_api_key,
            engine,
            temperature: parse_or(&lookup, "QUIZ_TEMPERATURE", 0.7)?,
            request_timeout: Duration::from_secs(request_timeout_secs),
            min_call_interval: Duration::from_millis(parse_or(
                &lookup,
                "QUIZ_MIN_CALL_INTERVAL_MS",
                1500,
            )?),
            max_attempts,
            initial_backoff: Duration::from_millis(parse_or(&lookup, "QUIZ_BACKOFF_MS", 500)?),
            cache_ttl: Duration::from_secs(parse_or(&lookup, "QUIZ_CACHE_TTL_SECS", 600)?),
            db_path: lookup("QUIZ_DB_PATH").unwrap_or_else(|| "db.sqlite".to_string()),
            shuffle_options: parse_or(&lookup, "QUIZ_SHUFFLE_OPTIONS", true)?,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
