// src/banstats.rs
//
// Statystyki banów z dziennika: okno [teraz - H h, teraz], obustronnie domknięte.
// Kolejność dopasowań: BAN_EVENT (json) → legacy z chat_id → legacy bez chat_id.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::banlog::{BanEvent, LINE_TIME_FORMAT};

/// Kategoria dla starych wpisów (bez JSON-a).
pub const UNKNOWN_CATEGORY: &str = "unknown";

static RE_STRUCTURED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<timestamp>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2},\d{3}).*? BAN_EVENT (?P<json>\{.*\})\s*$",
    )
    .unwrap()
});

static RE_LEGACY_WITH_CHAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?P<timestamp>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2},\d{3}).*?",
        r"已封禁用户 - 群组: (?P<chat_title>.+?) \((?P<chat_id>-?\d+)\) - ",
        r"(?P<username>.+?) \(ID: (?P<user_id>\d+)\)",
    ))
    .unwrap()
});

static RE_LEGACY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?P<timestamp>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2},\d{3}).*?",
        r"已封禁用户 - (?P<username>.+?) \(ID: (?P<user_id>\d+)\)",
    ))
    .unwrap()
});

/* ===========================
   Rekordy
   =========================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    Structured,
    LegacyWithChat,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BanRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub user_id: i64,
    pub username: String,
    pub chat_id: Option<i64>,
    pub chat_title: Option<String>,
    pub category: String,
    pub reason: Option<String>,
    pub confidence: Option<f64>,
    pub source: RecordSource,
}

pub fn parse_timestamp(s: &str, offset: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let naive = NaiveDateTime::parse_from_str(s, LINE_TIME_FORMAT)
        .map_err(|e| debug!(timestamp = s, error = %e, "unparseable log timestamp"))
        .ok()?;
    offset.from_local_datetime(&naive).single()
}

/// `None` dla linii, które nie są wpisem o banie.
pub fn parse_line(line: &str, offset: &FixedOffset) -> Option<BanRecord> {
    if let Some(c) = RE_STRUCTURED.captures(line) {
        match serde_json::from_str::<BanEvent>(&c["json"]) {
            Ok(ev) => {
                let username = ev.display_user();
                return Some(BanRecord {
                    timestamp: ev.timestamp.with_timezone(offset),
                    user_id: ev.user_id,
                    username,
                    chat_id: Some(ev.chat_id),
                    chat_title: ev.chat_title,
                    category: ev.category,
                    reason: Some(ev.reason),
                    confidence: ev.confidence,
                    source: RecordSource::Structured,
                });
            }
            // uszkodzony JSON: część legacy linii nadal jest czytelna
            Err(e) => debug!(error = %e, "BAN_EVENT payload unreadable, trying legacy matchers"),
        }
    }

    if let Some(c) = RE_LEGACY_WITH_CHAT.captures(line) {
        return Some(BanRecord {
            timestamp: parse_timestamp(&c["timestamp"], offset)?,
            user_id: c["user_id"].parse().ok()?,
            username: c["username"].trim().to_string(),
            chat_id: Some(c["chat_id"].parse().ok()?),
            chat_title: Some(c["chat_title"].trim().to_string()),
            category: UNKNOWN_CATEGORY.to_string(),
            reason: None,
            confidence: None,
            source: RecordSource::LegacyWithChat,
        });
    }

    let c = RE_LEGACY.captures(line)?;
    Some(BanRecord {
        timestamp: parse_timestamp(&c["timestamp"], offset)?,
        user_id: c["user_id"].parse().ok()?,
        username: c["username"].trim().to_string(),
        chat_id: None,
        chat_title: None,
        category: UNKNOWN_CATEGORY.to_string(),
        reason: None,
        confidence: None,
        source: RecordSource::Legacy,
    })
}

/* ===========================
   Agregaty
   =========================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatStats {
    pub chat_title: Option<String>,
    pub total: usize,
    pub unique_accounts: usize,
    pub categories: BTreeMap<String, usize>,
    pub entries: Vec<BanRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryStats {
    pub total: usize,
    pub unique_accounts: usize,
    pub chats: BTreeMap<i64, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    pub since: DateTime<FixedOffset>,
    pub until: DateTime<FixedOffset>,
    pub total: usize,
    pub unique_accounts: usize,
    pub entries: Vec<BanRecord>,
    pub by_chat: BTreeMap<i64, ChatStats>,
    pub by_category: BTreeMap<String, CategoryStats>,
}

/// Rekordy spoza okna są odrzucane; reszta sortowana po czasie.
pub fn aggregate(
    records: impl IntoIterator<Item = BanRecord>,
    since: DateTime<FixedOffset>,
    until: DateTime<FixedOffset>,
) -> WindowStats {
    let mut entries: Vec<BanRecord> = records
        .into_iter()
        .filter(|r| r.timestamp >= since && r.timestamp <= until)
        .collect();
    entries.sort_by_key(|r| r.timestamp);

    let unique: BTreeSet<i64> = entries.iter().map(|r| r.user_id).collect();

    let mut by_chat: BTreeMap<i64, ChatStats> = BTreeMap::new();
    let mut chat_users: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
    let mut by_category: BTreeMap<String, CategoryStats> = BTreeMap::new();
    let mut cat_users: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();

    for r in &entries {
        let cat = by_category.entry(r.category.clone()).or_default();
        cat.total += 1;
        cat_users.entry(r.category.clone()).or_default().insert(r.user_id);

        // stare wpisy bez chat_id: tylko w sumach globalnych i kategoriach
        let Some(chat_id) = r.chat_id else { continue };
        *cat.chats.entry(chat_id).or_default() += 1;

        let chat = by_chat.entry(chat_id).or_default();
        if chat.chat_title.is_none() {
            chat.chat_title = r.chat_title.clone();
        }
        chat.total += 1;
        *chat.categories.entry(r.category.clone()).or_default() += 1;
        chat.entries.push(r.clone());
        chat_users.entry(chat_id).or_default().insert(r.user_id);
    }

    for (id, users) in chat_users {
        if let Some(c) = by_chat.get_mut(&id) {
            c.unique_accounts = users.len();
        }
    }
    for (name, users) in cat_users {
        if let Some(c) = by_category.get_mut(&name) {
            c.unique_accounts = users.len();
        }
    }

    WindowStats {
        since,
        until,
        total: entries.len(),
        unique_accounts: unique.len(),
        entries,
        by_chat,
        by_category,
    }
}

/* ===========================
   Czytnik
   =========================== */

#[derive(Debug, Clone)]
pub struct BanStatsReader {
    path: PathBuf,
    offset: FixedOffset,
}

/// Najdłuższe okno (100 lat); dłuższe żądania są przycinane.
pub const MAX_WINDOW_HOURS: u32 = 100 * 366 * 24;

/// `until - hours`, bez przepełnienia dla dowolnego `hours`.
pub fn window_start(until: DateTime<FixedOffset>, hours: u32) -> DateTime<FixedOffset> {
    let span = Duration::hours(i64::from(hours.min(MAX_WINDOW_HOURS)));
    until
        .checked_sub_signed(span)
        .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC.with_timezone(until.offset()))
}

impl BanStatsReader {
    pub fn new(path: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }

    pub async fn get_window_stats(&self, hours: u32) -> WindowStats {
        self.window_stats_at(Utc::now(), hours).await
    }

    /// Jak `get_window_stats`, ale z jawnie podanym "teraz".
    pub async fn window_stats_at(&self, now: DateTime<Utc>, hours: u32) -> WindowStats {
        let until = now.with_timezone(&self.offset);
        let since = window_start(until, hours);

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "ban log not found, empty stats");
                return aggregate(Vec::new(), since, until);
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "ban log read failed");
                return aggregate(Vec::new(), since, until);
            }
        };

        let records = bytes
            .split(|b| *b == b'\n')
            .filter(|l| !l.is_empty())
            .filter_map(|l| parse_line(&String::from_utf8_lossy(l), &self.offset));
        aggregate(records, since, until)
    }
}

/* ===========================
   Raport
   =========================== */

pub fn render_report(stats: &WindowStats) -> String {
    let fmt = "%Y-%m-%d %H:%M:%S";
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Bans {} .. {}",
        stats.since.format(fmt),
        stats.until.format(fmt)
    );
    let _ = writeln!(
        out,
        "total: {}, unique accounts: {}",
        stats.total, stats.unique_accounts
    );

    if !stats.by_chat.is_empty() {
        let _ = writeln!(out, "\nby chat:");
        for (id, c) in &stats.by_chat {
            let cats = c
                .categories
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                "- {} ({id}): {} bans, {} accounts [{cats}]",
                c.chat_title.as_deref().unwrap_or("?"),
                c.total,
                c.unique_accounts
            );
        }
    }

    if !stats.by_category.is_empty() {
        let _ = writeln!(out, "\nby category:");
        for (name, c) in &stats.by_category {
            let _ = writeln!(
                out,
                "- {name}: {} bans, {} accounts, {} chats",
                c.total,
                c.unique_accounts,
                c.chats.len()
            );
        }
    }

    if stats.total == 0 {
        let _ = writeln!(out, "\nno bans in this window");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cst() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn legacy_lines_parse() {
        let with_chat = "2025-03-01 10:00:00,123 - bot - INFO - 已封禁用户 - 群组: Moja Grupa (-100777) - spam_bot (ID: 5)";
        let r = parse_line(with_chat, &cst()).unwrap();
        assert_eq!(r.source, RecordSource::LegacyWithChat);
        assert_eq!(r.chat_id, Some(-100777));
        assert_eq!(r.chat_title.as_deref(), Some("Moja Grupa"));
        assert_eq!(r.category, UNKNOWN_CATEGORY);
        assert_eq!(r.timestamp.to_rfc3339(), "2025-03-01T10:00:00.123+08:00");

        let legacy = "2025-03-01 10:00:00,123 - __main__ - INFO - 已封禁用户 - Ktoś (ID: 6)";
        let r = parse_line(legacy, &cst()).unwrap();
        assert_eq!(r.source, RecordSource::Legacy);
        assert_eq!(r.chat_id, None);
        assert_eq!(r.username, "Ktoś");
    }

    #[test]
    fn unrelated_and_broken_lines_are_skipped() {
        assert!(parse_line("2025-03-01 10:00:00,123 - bot - INFO - started", &cst()).is_none());
        assert!(parse_line("", &cst()).is_none());
        assert!(parse_line("garbage 已封禁用户 - x (ID: 1)", &cst()).is_none());
    }

    #[test]
    fn broken_json_falls_back_to_legacy_summary() {
        let line = "2025-03-01 10:00:00,000 - sg - INFO - 已封禁用户 - 群组: G (-1) - u (ID: 2) BAN_EVENT {nope}";
        let r = parse_line(line, &cst()).unwrap();
        assert_eq!(r.source, RecordSource::LegacyWithChat);
        assert_eq!(r.user_id, 2);
    }

    fn rec(ts: DateTime<FixedOffset>, uid: i64, chat: Option<i64>, cat: &str) -> BanRecord {
        BanRecord {
            timestamp: ts,
            user_id: uid,
            username: format!("u{uid}"),
            chat_id: chat,
            chat_title: chat.map(|c| format!("chat{c}")),
            category: cat.into(),
            reason: None,
            confidence: None,
            source: RecordSource::Structured,
        }
    }

    #[test]
    fn aggregates_per_chat_and_category() {
        let until = cst().with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap();
        let since = until - Duration::hours(24);
        let t = until - Duration::hours(1);
        let stats = aggregate(
            vec![
                rec(t, 1, Some(-1), "scam"),
                rec(t, 1, Some(-1), "scam"),
                rec(t, 2, Some(-2), "advertisement"),
                rec(t, 3, None, UNKNOWN_CATEGORY),
            ],
            since,
            until,
        );
        assert_eq!(stats.total, 4);
        assert_eq!(stats.unique_accounts, 3);
        assert_eq!(stats.by_chat.len(), 2);
        assert_eq!(stats.by_chat[&-1].total, 2);
        assert_eq!(stats.by_chat[&-1].unique_accounts, 1);
        assert_eq!(stats.by_category[UNKNOWN_CATEGORY].total, 1);
        assert!(stats.by_category[UNKNOWN_CATEGORY].chats.is_empty());
        assert_eq!(stats.by_category["scam"].chats[&-1], 2);

        let report = render_report(&stats);
        assert!(report.contains("total: 4, unique accounts: 3"));
        assert!(report.contains("chat-1 (-1): 2 bans, 1 accounts [scam=2]"));
    }

    #[test]
    fn huge_window_is_clamped_not_overflowing() {
        let until = cst().with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap();
        let since = window_start(until, u32::MAX);
        assert_eq!(since, until - Duration::hours(i64::from(MAX_WINDOW_HOURS)));
        assert_eq!(window_start(until, 24), until - Duration::hours(24));

        let old = cst().with_ymd_and_hms(2001, 9, 1, 8, 0, 0).unwrap();
        let stats = aggregate(vec![rec(old, 1, Some(1), "x")], since, until);
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn entries_are_sorted() {
        let until = cst().with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap();
        let a = until - Duration::minutes(5);
        let b = until - Duration::minutes(50);
        let stats = aggregate(vec![rec(a, 1, Some(1), "x"), rec(b, 2, Some(1), "x")], until - Duration::hours(1), until);
        assert_eq!(stats.entries[0].user_id, 2);
        assert_eq!(stats.by_chat[&1].entries[0].user_id, 2);
    }

    proptest! {
        #[test]
        fn window_is_inclusive_at_both_ends(hours in 1u32..72, delta_secs in -10i64..(72 * 3600 + 10)) {
            let until = cst().with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
            let since = until - Duration::hours(i64::from(hours));
            let ts = until - Duration::seconds(delta_secs);
            let stats = aggregate(vec![rec(ts, 1, Some(1), "x")], since, until);
            let inside = delta_secs >= 0 && delta_secs <= i64::from(hours) * 3600;
            prop_assert_eq!(stats.total == 1, inside);
        }
    }
}
