//! Reply generation boundary.
//!
//! The language model is a black box behind [`Responder`]. A failed or empty
//! reply never reaches the speaker as silence: [`generate_reply`] substitutes a
//! fixed apology and says so through [`ReplyOutcome::Fallback`].

use crate::log_debug_content;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Spoken when the model cannot be reached or returns nothing.
pub const FALLBACK_REPLY: &str = "I'm having a little trouble thinking right now.";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a wise, comforting, and magical teddy bear named TedTalks. \
1. IDENTITY: Your name is TedTalks. Never say you are the child. \
2. IMPORTANT SAFETY RULE: If the child says words like 'help', 'scared', 'bullied', 'sick', or 'hurt', \
you MUST gently but clearly tell them: 'Please go tell a grown-up or your parents about this right now.' \
Then offer comfort. \
3. STORYTELLING: If asked for a story, tell a LOGICAL story with a clear beginning, middle, and happy ending. \
If the child is scared of something, make the story about a friendly version of that thing. \
Keep stories medium length (4-6 sentences). \
4. TONE: Be calm, kind, and use simple words.";

pub trait Responder {
    fn respond(&mut self, system_prompt: &str, user_text: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Generated(String),
    Fallback { text: String, reason: String },
}

impl ReplyOutcome {
    pub fn text(&self) -> &str {
        match self {
            ReplyOutcome::Generated(text) => text,
            ReplyOutcome::Fallback { text, .. } => text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ReplyOutcome::Fallback { .. })
    }
}

/// Ask `responder` for a reply; never fails.
pub fn generate_reply(
    responder: &mut dyn Responder,
    system_prompt: &str,
    user_text: &str,
) -> ReplyOutcome {
    let started = Instant::now();
    let outcome = match responder.respond(system_prompt, user_text) {
        Ok(reply) if !reply.trim().is_empty() => ReplyOutcome::Generated(reply.trim().to_string()),
        Ok(_) => fallback("empty reply".to_string()),
        Err(err) => fallback(format!("{err:#}")),
    };
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        fallback = outcome.is_fallback(),
        "reply generated"
    );
    log_debug_content(&format!("reply: {:?}", outcome.text()));
    outcome
}

fn fallback(reason: String) -> ReplyOutcome {
    tracing::warn!(reason = %reason, "reply generation failed, using fallback");
    ReplyOutcome::Fallback {
        text: FALLBACK_REPLY.to_string(),
        reason,
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// One non-streaming `POST {base}/api/chat` per reply.
pub struct OllamaResponder {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
}

impl OllamaResponder {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder().timeout(timeout);
        if is_loopback(base_url) {
            builder = builder.no_proxy();
        }
        let client = builder.build().context("failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn is_loopback(base_url: &str) -> bool {
    let rest = base_url.split_once("://").map_or(base_url, |(_, rest)| rest);
    rest.starts_with("localhost") || rest.starts_with("127.") || rest.starts_with("[::1]")
}

impl Responder for OllamaResponder {
    fn respond(&mut self, system_prompt: &str, user_text: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_text,
                },
            ],
            stream: false,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .with_context(|| format!("request to {} failed", self.endpoint))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            bail!("ollama error {status}: {}", body.trim());
        }
        let parsed: ChatResponse = response.json().context("malformed ollama response")?;
        Ok(parsed.message.content)
    }
}
