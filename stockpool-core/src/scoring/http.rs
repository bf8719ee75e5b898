//! OpenAI-compatible chat-completions scorer.
//!
//! Sends the entity's strategy tuples as a prompt and expects the reply to
//! contain a JSON object `{"score": .., "signal": .., "reasoning": ..}`.
//! Guarded by a circuit breaker so a dead endpoint fails fast.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{ExternalCallError, SecondaryScorer, SecondaryVerdict, StrategyTuple};
use crate::data::CircuitBreaker;
use crate::domain::{EntityId, Signal};
use crate::normalize::{normalize, ScaleHint};

const SYSTEM_PROMPT: &str = "You are a quantitative equity analyst. Given per-strategy scores \
(0 to 1) and details for one stock, reply with a single JSON object \
{\"score\": <0..1>, \"signal\": \"BUY\"|\"HOLD\"|\"SELL\", \"reasoning\": <string>}.";

#[derive(Debug, Clone)]
pub struct HttpLlmConfig {
    /// Full chat-completions URL.
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    score: serde_json::Value,
    signal: String,
    #[serde(default)]
    reasoning: String,
}

pub struct HttpLlmScorer {
    client: reqwest::blocking::Client,
    config: HttpLlmConfig,
    breaker: Arc<CircuitBreaker>,
}

impl HttpLlmScorer {
    pub fn new(config: HttpLlmConfig, breaker: Arc<CircuitBreaker>) -> Result<Self, ExternalCallError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExternalCallError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            breaker,
        })
    }

    pub fn build_prompt(entity: &EntityId, tuples: &[StrategyTuple]) -> String {
        let mut prompt = format!("Stock {entity}. Strategy results:\n");
        for t in tuples {
            prompt.push_str(&format!("- {}: score={:.4}; {}\n", t.key(), t.score, t.value.summary()));
        }
        prompt
    }

    fn call(&self, entity: &EntityId, tuples: &[StrategyTuple]) -> Result<SecondaryVerdict, ExternalCallError> {
        let body = json!({
            "model": self.config.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::build_prompt(entity, tuples)},
            ],
        });

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                ExternalCallError::Timeout(self.config.timeout)
            } else {
                ExternalCallError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExternalCallError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let chat: ChatResponse = response
            .json()
            .map_err(|e| ExternalCallError::Malformed(e.to_string()))?;
        let content = chat
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| ExternalCallError::Malformed("response contained no choices".into()))?;
        parse_verdict(&content)
    }
}

impl SecondaryScorer for HttpLlmScorer {
    fn name(&self) -> &str {
        "http_llm"
    }

    fn evaluate(
        &self,
        entity: &EntityId,
        tuples: &[StrategyTuple],
    ) -> Result<SecondaryVerdict, ExternalCallError> {
        if !self.breaker.is_allowed() {
            return Err(ExternalCallError::CircuitOpen(self.breaker.remaining_cooldown()));
        }
        match self.call(entity, tuples) {
            Ok(verdict) => {
                self.breaker.record_success();
                debug!(entity = %entity, score = verdict.score, signal = %verdict.signal, "llm verdict");
                Ok(verdict)
            }
            Err(err) => {
                self.breaker.record_failure();
                warn!(entity = %entity, error = %err, "llm scorer call failed");
                Err(err)
            }
        }
    }
}

/// Extract the verdict object from a model reply that may wrap it in prose or
/// a code fence.
pub fn parse_verdict(content: &str) -> Result<SecondaryVerdict, ExternalCallError> {
    let start = content.find('{');
    let end = content.rfind('}');
    let json_text = match (start, end) {
        (Some(s), Some(e)) if s < e => &content[s..=e],
        _ => return Err(ExternalCallError::Malformed("no JSON object in reply".into())),
    };
    let raw: RawVerdict = serde_json::from_str(json_text)
        .map_err(|e| ExternalCallError::Malformed(e.to_string()))?;

    let score = match &raw.score {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ExternalCallError::Malformed(format!("score is not a number: {}", raw.score)))?;
    let signal = Signal::parse_label(&raw.signal)
        .ok_or_else(|| ExternalCallError::Malformed(format!("unknown signal '{}'", raw.signal)))?;

    Ok(SecondaryVerdict {
        score: normalize(Some(score), ScaleHint::Auto),
        signal,
        reasoning: raw.reasoning,
    })
}
