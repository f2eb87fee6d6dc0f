use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::chat::{ChatMessage, Role};
use crate::config::Config;

const EMPTY_ANSWER_TEXT: &str = "I couldn't generate an answer.";

// 请求体结构（Gemini generateContent REST 接口，字段为 camelCase）
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<Role>, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

// 响应体结构，只解析用到的字段
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[allow(dead_code)]
    mime_type: Option<String>,
    data: String,
}

impl GenerateResponse {
    fn first_parts(&self) -> &[ResponsePart] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }

    /// Concatenated text of the first candidate
    fn text(&self) -> Option<String> {
        let text: String = self
            .first_parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }

    /// Base64 audio of the first part of the first candidate
    fn audio(&self) -> Option<String> {
        self.first_parts()
            .first()
            .and_then(|p| p.inline_data.as_ref())
            .map(|d| d.data.clone())
            .filter(|d| !d.is_empty())
    }
}

/// Tutor instructions with the document text inlined, capped at `limit` chars.
fn system_instruction(context: &str, limit: usize) -> String {
    let content: String = context.chars().take(limit).collect();
    format!(
        "You are a helpful and knowledgeable teaching assistant.\n\
         You have access to the following document content provided by the user.\n\
         Answer the user's questions strictly based on this content.\n\
         If the answer is not in the document, state that clearly.\n\
         Keep answers concise and educational.\n\
         \n\
         DOCUMENT CONTENT:\n\
         {}\n",
        content
    )
}

fn answer_request(context: &str, question: &str, history: &[ChatMessage], limit: usize) -> GenerateRequest {
    let mut contents: Vec<Content> = history
        .iter()
        .map(|m| Content::text(Some(m.role), m.content.as_str()))
        .collect();
    contents.push(Content::text(Some(Role::User), question));

    GenerateRequest {
        contents,
        system_instruction: Some(Content::text(None, system_instruction(context, limit))),
        generation_config: None,
    }
}

fn speech_request(text: &str, voice: &str) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content::text(None, text)],
        system_instruction: None,
        generation_config: Some(GenerationConfig {
            response_modalities: vec!["AUDIO"],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice.to_string(),
                    },
                },
            },
        }),
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    api_base: String,
    chat_model: String,
    tts_model: String,
    voice: String,
    context_char_limit: usize,
}

impl GeminiClient {
    pub fn new(config: &Config, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.to_string(),
            tts_model: config.tts_model.to_string(),
            voice: config.voice.to_string(),
            context_char_limit: config.context_char_limit,
        })
    }

    fn endpoint(&self, model: &str) -> Result<Url> {
        let url = format!("{}/models/{}:generateContent", self.api_base, model);
        Url::parse(&url).with_context(|| format!("Invalid model endpoint: {}", url))
    }

    async fn generate(&self, model: &str, body: &GenerateRequest) -> Result<GenerateResponse> {
        let url = self.endpoint(model)?;
        log::debug!("POST {}", url);

        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .context("Request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("HTTP Error: {} {}", status, detail);
        }

        resp.json::<GenerateResponse>()
            .await
            .context("JSON parse error")
    }

    /// Answer `question` from the document text, given the prior turns.
    pub async fn generate_answer(
        &self,
        context: &str,
        question: &str,
        history: &[ChatMessage],
    ) -> Result<String> {
        let body = answer_request(context, question, history, self.context_char_limit);
        let response = self.generate(&self.chat_model, &body).await.map_err(|e| {
            log::error!("Gemini Chat Error: {:#}", e);
            e
        })?;
        Ok(response.text().unwrap_or_else(|| EMPTY_ANSWER_TEXT.to_string()))
    }

    /// Synthesize `text`. Returns the base64 PCM payload, or `None` on any failure.
    pub async fn generate_speech(&self, text: &str) -> Option<String> {
        let body = speech_request(text, &self.voice);
        match self.generate(&self.tts_model, &body).await {
            Ok(response) => {
                let audio = response.audio();
                if audio.is_none() {
                    log::warn!("Gemini TTS returned no audio data");
                }
                audio
            }
            Err(e) => {
                log::error!("Gemini TTS Error: {:#}", e);
                None
            }
        }
    }
}
