//! OpenAI-compatible chat-completions extractor using function calling.

use super::{Extraction, HomeworkExtractor, parse_extraction};
use crate::config::ExtractorConfig;
use crate::error::ExtractionError;
use async_trait::async_trait;
use regex_lite::Regex;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

const FUNCTION_NAME: &str = "parse_homework";

const SYSTEM_PROMPT: &str = "Разбери текст домашнего задания по предметам. \
Для каждого предмета верни название, дату сдачи (YYYY-MM-DD), если она указана, \
краткое описание задания и список подзадач.";

/// Extractor backed by an OpenAI-compatible `/chat/completions` endpoint.
///
/// Built once at startup and shared by reference with the normalizer.
pub struct OpenAiExtractor {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    timeout_secs: u64,
}

impl OpenAiExtractor {
    pub fn new(
        config: &ExtractorConfig,
        api_key: Option<SecretString>,
    ) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExtractionError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }

    fn request_body(&self, raw_text: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": raw_text }
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": FUNCTION_NAME,
                    "description": "Разбирает текст с домашним заданием по предметам и возвращает структуру предметов с подзадачами",
                    "parameters": function_schema()
                }
            }],
            "tool_choice": { "type": "function", "function": { "name": FUNCTION_NAME } }
        })
    }
}

#[async_trait]
impl HomeworkExtractor for OpenAiExtractor {
    async fn extract(&self, raw_text: &str) -> Result<Extraction, ExtractionError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ExtractionError::Auth("no API key configured".to_string()))?;

        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, chars = raw_text.chars().count(), "Calling extraction service");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .json(&self.request_body(raw_text))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractionError::Timeout(self.timeout_secs)
                } else {
                    ExtractionError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Auth(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Extraction service returned an error");
            return Err(ExtractionError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ExtractionError::Malformed(e.to_string()))?;
        extraction_from_response(&body)
    }
}

/// Pull the function-call arguments (or, failing that, the message content)
/// out of a chat-completions response.
pub(crate) fn extraction_from_response(body: &Value) -> Result<Extraction, ExtractionError> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| ExtractionError::Malformed("response has no choices".to_string()))?;

    let arguments = message
        .pointer("/tool_calls/0/function/arguments")
        .or_else(|| message.pointer("/function_call/arguments"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty());

    let payload = match arguments {
        Some(args) => args.to_string(),
        None => {
            // the model answered in plain text instead of calling the function
            let content = message
                .get("content")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .ok_or(ExtractionError::Empty)?;
            strip_code_fence(content)
        }
    };

    parse_extraction(&payload)
}

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("code fence pattern is valid")
});

fn strip_code_fence(content: &str) -> String {
    match CODE_FENCE.captures(content) {
        Some(caps) => caps[1].to_string(),
        None => content.trim().to_string(),
    }
}

fn function_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "subjects": {
                "type": "array",
                "description": "Список предметов с заданиями",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "Название предмета" },
                        "date": { "type": "string", "description": "Дата сдачи в формате YYYY-MM-DD" },
                        "task": {
                            "type": "object",
                            "properties": {
                                "description": {
                                    "type": "string",
                                    "description": "Краткое описание общего задания"
                                },
                                "subtasks": {
                                    "type": "array",
                                    "description": "Детализированные подзадачи по предмету",
                                    "items": {
                                        "type": "object",
                                        "properties": {
                                            "type": {
                                                "type": "string",
                                                "enum": ["theory", "exercise", "dictation", "map", "drawing", "file", "reminder", "other"],
                                                "description": "Тип подзадачи"
                                            },
                                            "detail": {
                                                "type": "string",
                                                "description": "Что именно нужно сделать"
                                            }
                                        },
                                        "required": ["type", "detail"]
                                    }
                                }
                            },
                            "required": ["description", "subtasks"]
                        }
                    },
                    "required": ["name", "task"]
                }
            }
        },
        "required": ["subjects"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARGS: &str = r#"{"subjects":[{"name":"Матеша","task":{"description":"стр. 106","subtasks":[{"type":"exercise","detail":"№12"}]}}]}"#;

    #[test]
    fn reads_tool_call_arguments() {
        let body = json!({
            "choices": [{ "message": {
                "content": null,
                "tool_calls": [{ "type": "function", "function": { "name": FUNCTION_NAME, "arguments": ARGS } }]
            }}]
        });
        let extraction = extraction_from_response(&body).unwrap();
        assert_eq!(extraction.subjects[0].name, "Матеша");
    }

    #[test]
    fn falls_back_to_fenced_content() {
        let content = format!("```json\n{}\n```", ARGS);
        let body = json!({ "choices": [{ "message": { "content": content } }] });
        let extraction = extraction_from_response(&body).unwrap();
        assert_eq!(extraction.subjects[0].task.subtasks[0].detail, "№12");
    }

    #[test]
    fn strip_code_fence_handles_bare_and_unfenced_content() {
        assert_eq!(strip_code_fence("```\n{\"a\": 1}\n```"), r#"{"a": 1}"#);
        assert_eq!(strip_code_fence("```json{}```  "), "{}");
        assert_eq!(strip_code_fence("  {\"a\": 1}\n"), r#"{"a": 1}"#);
    }

    #[test]
    fn empty_message_is_empty_error() {
        let body = json!({ "choices": [{ "message": { "content": "" } }] });
        assert!(matches!(
            extraction_from_response(&body),
            Err(ExtractionError::Empty)
        ));
    }

    #[test]
    fn missing_choices_is_malformed() {
        assert!(matches!(
            extraction_from_response(&json!({ "error": "nope" })),
            Err(ExtractionError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn missing_api_key_is_auth_error() {
        let extractor = OpenAiExtractor::new(&ExtractorConfig::default(), None).unwrap();
        let err = extractor.extract("text").await.unwrap_err();
        assert!(matches!(err, ExtractionError::Auth(_)));
    }
}
