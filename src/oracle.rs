// src/oracle.rs
//
// Wyrocznia klasyfikacji (LLM): trait + strażnik z timeoutem + klient
// zgodny z OpenAI chat-completions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::prompt;
use crate::risk::RiskAssessment;

/* ===========================
   Typy
   =========================== */

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle not configured (empty api key)")]
    NotConfigured,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oracle returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("empty oracle response")]
    EmptyResponse,
    #[error("malformed verdict: {0}")]
    Malformed(String),
    #[error("oracle timed out after {0} ms")]
    Timeout(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_violation: bool,
    /// [0, 1]
    pub confidence: f64,
    pub reason: String,
    pub category: String,
}

pub const FALLBACK_CATEGORY: &str = "error";
pub const DEFAULT_CATEGORY: &str = "other";

impl Verdict {
    /// Fail-open: awaria wyroczni nigdy nie prowadzi do bana.
    pub fn fallback(detail: impl std::fmt::Display) -> Self {
        Self {
            is_violation: false,
            confidence: 0.0,
            reason: format!("oracle call failed: {detail}"),
            category: FALLBACK_CATEGORY.to_string(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.category == FALLBACK_CATEGORY && !self.is_violation && self.confidence == 0.0
    }

    pub fn meets(&self, threshold: f64) -> bool {
        self.is_violation && self.confidence >= threshold
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleRequest {
    /// Treść do oceny (sekcje z `prompt::build_message_content`).
    pub content: String,
    pub sender_id: i64,
    pub sender_name: String,
    pub is_new_member: bool,
    pub risk: RiskAssessment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsernameRequest {
    pub user_id: i64,
    pub username: Option<String>,
    pub full_name: String,
    pub join_message: Option<String>,
}

#[async_trait]
pub trait ClassificationOracle: Send + Sync {
    async fn classify_message(&self, req: &OracleRequest) -> Result<Verdict, OracleError>;
    async fn classify_username(&self, req: &UsernameRequest) -> Result<Verdict, OracleError>;
}

/* ===========================
   Parsowanie werdyktu
   =========================== */

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").unwrap());

/// Tolerancyjny parser: goły JSON albo w blokach ``` , alias `is_spam`,
/// liczby jako stringi; brak pola obowiązkowego = błąd.
pub fn parse_verdict(raw: &str) -> Result<Verdict, OracleError> {
    let body = match RE_FENCE.captures(raw) {
        Some(c) => c.get(1).map(|m| m.as_str()).unwrap_or(raw),
        None => raw.trim(),
    };
    if body.is_empty() {
        return Err(OracleError::EmptyResponse);
    }

    let v: Value = serde_json::from_str(body).map_err(|e| OracleError::Malformed(e.to_string()))?;
    let obj = v
        .as_object()
        .ok_or_else(|| OracleError::Malformed("verdict is not a JSON object".into()))?;

    let is_violation = obj
        .get("is_violation")
        .or_else(|| obj.get("is_spam"))
        .ok_or_else(|| OracleError::Malformed("missing is_violation".into()))
        .and_then(as_bool)?;

    let confidence = obj
        .get("confidence")
        .ok_or_else(|| OracleError::Malformed("missing confidence".into()))
        .and_then(as_f64)?
        .clamp(0.0, 1.0);

    let reason = match obj.get("reason") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => return Err(OracleError::Malformed("missing reason".into())),
        Some(other) => other.to_string(),
    };

    let category = obj
        .get("category")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_CATEGORY)
        .to_string();

    Ok(Verdict {
        is_violation,
        confidence,
        reason,
        category,
    })
}

fn as_bool(v: &Value) -> Result<bool, OracleError> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            other => Err(OracleError::Malformed(format!("is_violation: {other:?}"))),
        },
        other => Err(OracleError::Malformed(format!("is_violation: {other}"))),
    }
}

fn as_f64(v: &Value) -> Result<f64, OracleError> {
    let f = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    f.filter(|f| f.is_finite())
        .ok_or_else(|| OracleError::Malformed(format!("confidence: {v}")))
}

/* ===========================
   Strażnik: timeout + fallback
   =========================== */

/// Opakowuje dowolną wyrocznię. Zawsze zwraca werdykt.
#[derive(Clone)]
pub struct OracleGuard {
    inner: Arc<dyn ClassificationOracle>,
    timeout: Duration,
}

impl OracleGuard {
    pub fn new(inner: Arc<dyn ClassificationOracle>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub async fn classify_message(&self, req: &OracleRequest) -> Verdict {
        let res = tokio::time::timeout(self.timeout, self.inner.classify_message(req)).await;
        let verdict = self.settle(res, "message");
        info!(
            user_id = req.sender_id,
            is_violation = verdict.is_violation,
            confidence = verdict.confidence,
            category = %verdict.category,
            risk_score = req.risk.score,
            reason = %verdict.reason,
            "message classified"
        );
        verdict
    }

    pub async fn classify_username(&self, req: &UsernameRequest) -> Verdict {
        let res = tokio::time::timeout(self.timeout, self.inner.classify_username(req)).await;
        let verdict = self.settle(res, "username");
        info!(
            user_id = req.user_id,
            is_violation = verdict.is_violation,
            confidence = verdict.confidence,
            reason = %verdict.reason,
            "username classified"
        );
        verdict
    }

    fn settle(
        &self,
        res: Result<Result<Verdict, OracleError>, tokio::time::error::Elapsed>,
        what: &str,
    ) -> Verdict {
        let err = match res {
            Ok(Ok(v)) => return v,
            Ok(Err(e)) => e,
            Err(_) => OracleError::Timeout(self.timeout.as_millis() as u64),
        };
        warn!(error = %err, check = what, "oracle failure, falling back to allow");
        Verdict::fallback(err)
    }
}

/* ===========================
   Klient OpenAI-compatible
   =========================== */

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

pub struct OpenAiOracle {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiOracle {
    pub fn new(cfg: &LlmConfig) -> Result<Self, OracleError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.timeout_ms.min(5_000)))
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        })
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        if self.api_key.trim().is_empty() {
            return Err(OracleError::NotConfigured);
        }
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": { "type": "json_object" },
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(OracleError::EmptyResponse)?;
        debug!(model = %self.model, response = %content, "oracle raw response");
        Ok(content)
    }
}

#[async_trait]
impl ClassificationOracle for OpenAiOracle {
    async fn classify_message(&self, req: &OracleRequest) -> Result<Verdict, OracleError> {
        let raw = self
            .complete(prompt::MESSAGE_SYSTEM_PROMPT, &prompt::build_message_prompt(req))
            .await?;
        parse_verdict(&raw)
    }

    async fn classify_username(&self, req: &UsernameRequest) -> Result<Verdict, OracleError> {
        let raw = self
            .complete(prompt::USERNAME_SYSTEM_PROMPT, &prompt::build_username_prompt(req))
            .await?;
        parse_verdict(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_fenced_json() {
        let v = parse_verdict(r#"{"is_violation": true, "confidence": 0.93, "reason": "ad", "category": "advertisement"}"#)
            .unwrap();
        assert!(v.is_violation);
        assert_eq!(v.category, "advertisement");

        let v = parse_verdict("```json\n{\"is_spam\": false, \"confidence\": \"0.4\", \"reason\": \"ok\"}\n```").unwrap();
        assert!(!v.is_violation);
        assert!((v.confidence - 0.4).abs() < 1e-9);
        assert_eq!(v.category, DEFAULT_CATEGORY);
    }

    #[test]
    fn confidence_is_clamped() {
        let v = parse_verdict(r#"{"is_violation": true, "confidence": 7, "reason": "x"}"#).unwrap();
        assert_eq!(v.confidence, 1.0);
        let v = parse_verdict(r#"{"is_violation": true, "confidence": -2, "reason": "x"}"#).unwrap();
        assert_eq!(v.confidence, 0.0);
    }

    #[test]
    fn missing_fields_and_garbage_are_errors() {
        assert!(parse_verdict(r#"{"confidence": 0.9, "reason": "x"}"#).is_err());
        assert!(parse_verdict(r#"{"is_violation": true, "reason": "x"}"#).is_err());
        assert!(parse_verdict(r#"{"is_violation": true, "confidence": 0.9}"#).is_err());
        assert!(parse_verdict("not json at all").is_err());
        assert!(matches!(parse_verdict("   "), Err(OracleError::EmptyResponse)));
        assert!(parse_verdict("[1,2]").is_err());
    }

    #[test]
    fn fallback_shape() {
        let v = Verdict::fallback("boom");
        assert!(!v.is_violation);
        assert_eq!(v.confidence, 0.0);
        assert_eq!(v.category, "error");
        assert!(v.reason.contains("boom"));
        assert!(v.is_fallback());
        assert!(!v.meets(0.0));
    }

    struct Slow;

    #[async_trait]
    impl ClassificationOracle for Slow {
        async fn classify_message(&self, _req: &OracleRequest) -> Result<Verdict, OracleError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Verdict {
                is_violation: true,
                confidence: 1.0,
                reason: "late".into(),
                category: "scam".into(),
            })
        }
        async fn classify_username(&self, _req: &UsernameRequest) -> Result<Verdict, OracleError> {
            Err(OracleError::NotConfigured)
        }
    }

    #[tokio::test]
    async fn guard_times_out_to_fallback() {
        let guard = OracleGuard::new(Arc::new(Slow), Duration::from_millis(20));
        let req = OracleRequest {
            content: "x".into(),
            sender_id: 1,
            sender_name: "u".into(),
            is_new_member: false,
            risk: RiskAssessment::default(),
        };
        let v = guard.classify_message(&req).await;
        assert!(v.is_fallback());
        assert!(v.reason.contains("timed out"));

        let u = guard
            .classify_username(&UsernameRequest {
                user_id: 1,
                username: None,
                full_name: "x".into(),
                join_message: None,
            })
            .await;
        assert!(u.is_fallback());
    }

    #[tokio::test]
    async fn empty_key_is_not_configured() {
        let cfg = LlmConfig {
            api_key: String::new(),
            ..LlmConfig::default()
        };
        let oracle = OpenAiOracle::new(&cfg).unwrap();
        let res = oracle
            .classify_username(&UsernameRequest {
                user_id: 1,
                username: Some("a".into()),
                full_name: "A".into(),
                join_message: None,
            })
            .await;
        assert!(matches!(res, Err(OracleError::NotConfigured)));
    }
}
