// tests/banstats.rs
//
// Dziennik banów: zapis → odczyt okna, mieszane formaty, brak pliku.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use tigris_spamguard::banlog::{BanEvent, BanLog, DEFAULT_LOGGER_NAME, format_line};
use tigris_spamguard::banstats::{BanStatsReader, RecordSource, UNKNOWN_CATEGORY, render_report};

fn cst() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

fn event(ts: DateTime<FixedOffset>, user_id: i64, chat_id: i64, category: &str) -> BanEvent {
    BanEvent {
        timestamp: ts,
        category: category.into(),
        chat_id,
        chat_title: Some("Grupa Testowa".into()),
        user_id,
        username: Some(format!("user{user_id}")),
        full_name: None,
        reason: "promo".into(),
        confidence: Some(0.9),
        extra: Default::default(),
    }
}

#[tokio::test]
async fn structured_noon_and_legacy_evening_both_count() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bans.log");

    // okno 24 h liczone o 23:30 czasu lokalnego
    let now: DateTime<Utc> = cst()
        .with_ymd_and_hms(2025, 1, 2, 23, 30, 0)
        .unwrap()
        .with_timezone(&Utc);

    let structured = format_line(
        &event(cst().with_ymd_and_hms(2025, 1, 2, 12, 0, 0).unwrap(), 11, -100, "advertisement"),
        DEFAULT_LOGGER_NAME,
        &cst(),
    );
    let body = [
        structured.trim_end(),
        "2025-01-02 23:00:00,000 - spamguard - INFO - 已封禁用户 - 群组: Stara Grupa (-200) - spammer (ID: 12)",
        "2025-01-01 06:00:00,000 - spamguard - INFO - 已封禁用户 - old_one (ID: 13)",
        "2025-01-02 09:00:00,000 - spamguard - INFO - bot started",
        "garbage without timestamp",
    ]
    .join("\n");
    tokio::fs::write(&path, body).await.unwrap();

    let stats = BanStatsReader::new(&path, cst()).window_stats_at(now, 24).await;

    assert_eq!(stats.total, 2);
    assert_eq!(stats.unique_accounts, 2);
    assert_eq!(stats.entries[0].source, RecordSource::Structured);
    assert_eq!(stats.entries[1].source, RecordSource::LegacyWithChat);
    assert_eq!(stats.by_chat[&-100].total, 1);
    assert_eq!(stats.by_chat[&-200].chat_title.as_deref(), Some("Stara Grupa"));
    assert_eq!(stats.by_category["advertisement"].total, 1);
    assert_eq!(stats.by_category[UNKNOWN_CATEGORY].chats[&-200], 1);

    // szersze okno łapie też wpis bez czatu
    let wide = BanStatsReader::new(&path, cst()).window_stats_at(now, 48).await;
    assert_eq!(wide.total, 3);
    assert_eq!(wide.by_chat.len(), 2);
    assert_eq!(wide.by_category[UNKNOWN_CATEGORY].total, 2);

    // okno bez ograniczeń nie wywraca czytnika
    let all = BanStatsReader::new(&path, cst()).window_stats_at(now, u32::MAX).await;
    assert_eq!(all.total, 3);

    let report = render_report(&stats);
    assert!(report.contains("total: 2, unique accounts: 2"));
    assert!(report.contains("Stara Grupa"));
}

#[tokio::test]
async fn appended_events_are_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("bans.log");
    let log = BanLog::new(&path, cst());

    let now = Utc::now().with_timezone(&cst());
    for (uid, cat) in [(1, "scam"), (2, "scam"), (1, "advertisement")] {
        let ev = event(now, uid, -300, cat).with_extra("trigger", "message");
        log.append(&ev).await.unwrap();
    }

    let stats = BanStatsReader::new(&path, cst()).get_window_stats(1).await;
    assert_eq!(stats.total, 3);
    assert_eq!(stats.unique_accounts, 2);
    let chat = &stats.by_chat[&-300];
    assert_eq!(chat.unique_accounts, 2);
    assert_eq!(chat.categories["scam"], 2);
    assert_eq!(stats.by_category["scam"].unique_accounts, 2);
    assert!(stats.entries.iter().all(|r| r.reason.as_deref() == Some("promo")));
}

#[tokio::test]
async fn missing_file_gives_empty_stats() {
    let dir = tempfile::tempdir().unwrap();
    let stats = BanStatsReader::new(dir.path().join("nope.log"), cst())
        .get_window_stats(24)
        .await;
    assert_eq!(stats.total, 0);
    assert_eq!(stats.unique_accounts, 0);
    assert!(stats.by_chat.is_empty());
    assert!(stats.by_category.is_empty());
}
