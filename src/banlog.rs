// src/banlog.rs
//
// Dziennik banów: jedna linia na ban, tylko dopisywanie.
// Format linii:
//   <ts> - <logger> - INFO - 已封禁用户 - 群组: <tytuł> (<chat_id>) - <user> (ID: <uid>) BAN_EVENT <json>
// Część przed BAN_EVENT czyta też stary parser (legacy z chat_id).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Format znacznika czasu w linii (milisekundy po przecinku).
pub const LINE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";
pub const DEFAULT_LOGGER_NAME: &str = "spamguard";
pub const STRUCTURED_MARKER: &str = "BAN_EVENT";
pub const RAW_MARKER: &str = "BAN_EVENT_RAW";
pub const LEGACY_BAN_PREFIX: &str = "已封禁用户";

#[derive(Debug, Error)]
pub enum BanLogError {
    #[error("ban log io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanEvent {
    pub timestamp: DateTime<FixedOffset>,
    pub category: String,
    pub chat_id: i64,
    #[serde(default)]
    pub chat_title: Option<String>,
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// trigger, message_id, risk_score, risk_flags…
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl BanEvent {
    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Nazwa do podsumowania: username, potem imię, potem ID.
    pub fn display_user(&self) -> String {
        self.username
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.full_name.as_deref().filter(|s| !s.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| self.user_id.to_string())
    }
}

/* ===========================
   Formatowanie linii
   =========================== */

// linia = rekord, więc żadnych łamań w polach tekstowych podsumowania
fn one_line(s: &str) -> String {
    s.chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

pub fn format_line(event: &BanEvent, logger: &str, offset: &FixedOffset) -> String {
    format_line_with(event, logger, offset, serde_json::to_string::<BanEvent>)
}

/// Jak `format_line`, z podanym serializerem. `serde_json` nie zawodzi na `BanEvent`
/// (klucze `extra` to stringi, NaN → null), więc linia RAW to zabezpieczenie
/// na wypadek serializera, który jednak zwróci błąd.
pub fn format_line_with<F>(event: &BanEvent, logger: &str, offset: &FixedOffset, to_json: F) -> String
where
    F: FnOnce(&BanEvent) -> serde_json::Result<String>,
{
    let ts = event.timestamp.with_timezone(offset).format(LINE_TIME_FORMAT);
    let summary = format!(
        "{LEGACY_BAN_PREFIX} - 群组: {} ({}) - {} (ID: {})",
        one_line(event.chat_title.as_deref().unwrap_or("-")),
        event.chat_id,
        one_line(&event.display_user()),
        event.user_id,
    );
    match to_json(event) {
        Ok(json) => format!("{ts} - {logger} - INFO - {summary} {STRUCTURED_MARKER} {json}\n"),
        Err(e) => {
            debug!(error = %e, "ban event serialization failed, writing raw");
            format!(
                "{ts} - {logger} - INFO - {summary} {RAW_MARKER} {}\n",
                one_line(&format!("{event:?}"))
            )
        }
    }
}

/* ===========================
   Zapis
   =========================== */

#[derive(Debug, Clone)]
pub struct BanLog {
    path: PathBuf,
    offset: FixedOffset,
    logger: String,
}

impl BanLog {
    pub fn new(path: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        Self {
            path: path.into(),
            offset,
            logger: DEFAULT_LOGGER_NAME.to_string(),
        }
    }

    pub fn with_logger_name(mut self, name: impl Into<String>) -> Self {
        self.logger = name.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Jedno `write_all` na linię, plik w trybie append.
    pub async fn append(&self, event: &BanEvent) -> Result<(), BanLogError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let line = format_line(event, &self.logger, &self.offset);
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cst() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn event() -> BanEvent {
        BanEvent {
            timestamp: cst().with_ymd_and_hms(2025, 3, 1, 12, 30, 5).unwrap(),
            category: "advertisement".into(),
            chat_id: -1001234,
            chat_title: Some("Grupa\nTestowa".into()),
            user_id: 42,
            username: Some("spammer".into()),
            full_name: Some("Spam Er".into()),
            reason: "promo".into(),
            confidence: Some(0.93),
            extra: BTreeMap::new(),
        }
        .with_extra("trigger", "message")
    }

    #[test]
    fn line_layout() {
        let line = format_line(&event(), "spamguard", &cst());
        assert!(line.starts_with("2025-03-01 12:30:05,000 - spamguard - INFO - 已封禁用户 - 群组: Grupa Testowa (-1001234) - spammer (ID: 42) BAN_EVENT {"));
        assert!(line.ends_with("}\n"));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn timestamp_rendered_in_configured_offset() {
        let mut e = event();
        e.timestamp = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let line = format_line(&e, "x", &cst());
        assert!(line.starts_with("2025-03-01 08:00:00,000 - x - INFO"));
    }

    #[test]
    fn serializer_failure_writes_raw_line() {
        let line = format_line_with(&event(), "spamguard", &cst(), |_| {
            Err(<serde_json::Error as serde::ser::Error>::custom("no json today"))
        });
        assert!(line.contains("已封禁用户 - 群组: Grupa Testowa (-1001234) - spammer (ID: 42) BAN_EVENT_RAW BanEvent {"));
        assert!(!line.contains(" BAN_EVENT {"));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));

        // czytnik nadal widzi ban dzięki legacy podsumowaniu
        let r = crate::banstats::parse_line(line.trim_end(), &cst()).unwrap();
        assert_eq!(r.user_id, 42);
        assert_eq!(r.chat_id, Some(-1001234));
    }

    #[tokio::test]
    async fn custom_logger_name_lands_in_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = BanLog::new(dir.path().join("bans.log"), cst()).with_logger_name("tsg-bot");
        log.append(&event()).await.unwrap();
        let body = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(body.starts_with("2025-03-01 12:30:05,000 - tsg-bot - INFO - "));
    }

    #[tokio::test]
    async fn append_creates_dirs_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = BanLog::new(dir.path().join("logs/bans.log"), cst());
        log.append(&event()).await.unwrap();
        log.append(&event()).await.unwrap();
        let body = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert_eq!(body.lines().count(), 2);
        let json = body.lines().next().unwrap().split(" BAN_EVENT ").nth(1).unwrap();
        let back: BanEvent = serde_json::from_str(json).unwrap();
        assert_eq!(back.extra.get("trigger"), Some(&Value::from("message")));
    }
}
