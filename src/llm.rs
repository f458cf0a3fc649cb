//! The text generator behind drafting features. The trait keeps the
//! network out of everything testable; the HTTP implementation speaks the
//! chat-completions shape synchronously.

use crate::config::Config;
use crate::errors::{RemoteError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// An opaque drafting function: system prompt plus user content in,
/// free-form text out.
pub trait Generator {
    fn generate(&self, system_prompt: &str, user_content: &str) -> Result<String>;
}

pub const PROMPT_COMPONENT_DESCRIPTION: &str = "You are a security analyst. Write a single-sentence, \
factual description of the software component the user names. No marketing language, no trailing period.";

pub const PROMPT_THREAT_MODEL: &str = "You are a threat modeling assistant. Given a software component \
and its description, answer with a JSON object only, shaped as \
{\"security_threats\": [{\"threat_id\": string, \"threat_name\": string, \"description\": string, \
\"countermeasures\": [{\"countermeasure_id\": string, \"countermeasure_name\": string, \"description\": string}]}]}. \
Identify the most relevant threats and two or three countermeasures each.";

pub struct OpenAiGenerator {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl OpenAiGenerator {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.openai_endpoint.clone(),
            api_key: config.openai_api_key.clone(),
            model: config.openai_model.clone(),
        })
    }
}

impl Generator for OpenAiGenerator {
    fn generate(&self, system_prompt: &str, user_content: &str) -> Result<String> {
        debug!(model = %self.model, "querying generator");
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteError::Timeout
                } else {
                    RemoteError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(RemoteError::Authentication("invalid API key".to_string()).into());
        }
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(RemoteError::HttpStatus {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        let body: ChatResponse = response
            .json()
            .map_err(|e| RemoteError::Parse(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RemoteError::Parse("empty choices in generator response".to_string()).into())
    }
}

/// Canned answers keyed by system prompt, used when test mode is on.
#[derive(Default)]
pub struct CannedGenerator {
    answers: HashMap<String, String>,
}

impl CannedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer(mut self, system_prompt: &str, answer: &str) -> Self {
        self.answers.insert(system_prompt.to_string(), answer.to_string());
        self
    }

    /// A generator preloaded with plausible offline answers for every
    /// drafting prompt the CLI uses.
    pub fn offline_defaults() -> Self {
        Self::new()
            .with_answer(
                PROMPT_COMPONENT_DESCRIPTION,
                "A placeholder component description generated in test mode",
            )
            .with_answer(
                PROMPT_THREAT_MODEL,
                r#"{"security_threats": [{"threat_id": "spoofing", "threat_name": "Credential spoofing", "description": "An attacker impersonates a legitimate user.", "countermeasures": [{"countermeasure_id": "mfa", "countermeasure_name": "Enforce multi-factor authentication", "description": "Require a second factor on every login."}, {"countermeasure_id": "lockout", "countermeasure_name": "Lock accounts after failed attempts", "description": "Throttle and lock after repeated failures."}]}]}"#,
            )
    }
}

impl Generator for CannedGenerator {
    fn generate(&self, system_prompt: &str, _user_content: &str) -> Result<String> {
        self.answers
            .get(system_prompt)
            .cloned()
            .ok_or_else(|| RemoteError::Parse("no canned answer for this prompt".to_string()).into())
    }
}

/// Pick the configured generator: canned answers in test mode, the HTTP
/// client otherwise.
pub fn generator_from_config(config: &Config) -> Result<Box<dyn Generator>> {
    if crate::config::test_mode() {
        Ok(Box::new(CannedGenerator::offline_defaults()))
    } else {
        Ok(Box::new(OpenAiGenerator::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canned_generator_returns_answer() {
        let generator = CannedGenerator::new().with_answer("prompt", "answer");
        assert_eq!(generator.generate("prompt", "anything").expect("answer"), "answer");
    }

    #[test]
    fn test_canned_generator_unknown_prompt_fails() {
        let generator = CannedGenerator::new();
        assert!(generator.generate("missing", "x").is_err());
    }

    #[test]
    fn test_offline_defaults_cover_drafting_prompts() {
        let generator = CannedGenerator::offline_defaults();
        assert!(generator.generate(PROMPT_COMPONENT_DESCRIPTION, "redis").is_ok());
        let tm = generator.generate(PROMPT_THREAT_MODEL, "redis").expect("answer");
        assert!(tm.contains("security_threats"));
    }

    #[test]
    fn test_openai_generator_builds_from_config() {
        let config = Config::default();
        assert!(OpenAiGenerator::new(&config).is_ok());
    }
}
