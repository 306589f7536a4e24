// src/lib.rs

pub mod banlog;
pub mod banstats;
pub mod blacklist;
pub mod config;
pub mod entities;
pub mod logging;
pub mod message;
pub mod oracle;
pub mod prompt;
pub mod risk;
pub mod sink;
pub mod spamguard;
pub mod telegram;
pub mod textguard;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use banlog::BanLog;
use banstats::BanStatsReader;
use blacklist::BlacklistRules;
use config::Settings;
use oracle::{ClassificationOracle, OpenAiOracle, OracleGuard};
use sink::ModerationSink;
use spamguard::SpamGuard;

/// Kontekst aplikacji: konfiguracja + gotowe serwisy.
/// Transport (sink) przychodzi z zewnątrz.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Settings,
    guard: Arc<SpamGuard>,
    stats: BanStatsReader,
}

impl AppContext {
    /// Bootstrap:
    /// - logi
    /// - klient LLM (OpenAI-compatible)
    /// - reguły czarnej listy, dziennik banów
    pub async fn bootstrap(settings: Settings, sink: Arc<dyn ModerationSink>) -> Result<Arc<Self>> {
        // 1) logi
        logging::init(&settings);

        // 2) wyrocznia
        let oracle: Arc<dyn ClassificationOracle> = Arc::new(OpenAiOracle::new(&settings.llm)?);
        if settings.llm.api_key.trim().is_empty() {
            tracing::warn!("llm.api_key is empty, every check will fall back to allow");
        }
        tracing::info!(model = %settings.llm.model, base = %settings.llm.api_base, "LLM client ready");

        Ok(Self::assemble(settings, oracle, sink))
    }

    /// Kontekst do testów: bez logów, z podaną wyrocznią i sinkiem.
    pub fn new_testing(
        settings: Settings,
        oracle: Arc<dyn ClassificationOracle>,
        sink: Arc<dyn ModerationSink>,
    ) -> Arc<Self> {
        Self::assemble(settings, oracle, sink)
    }

    fn assemble(
        settings: Settings,
        oracle: Arc<dyn ClassificationOracle>,
        sink: Arc<dyn ModerationSink>,
    ) -> Arc<Self> {
        let rules = Arc::new(BlacklistRules::compile(&settings.blacklist.rules));
        let offset = settings.banlog.offset();
        let banlog = Arc::new(
            BanLog::new(&settings.banlog.path, offset).with_logger_name(&settings.banlog.logger_name),
        );
        let stats = BanStatsReader::new(&settings.banlog.path, offset);
        let guard = OracleGuard::new(oracle, Duration::from_millis(settings.llm.timeout_ms));

        let spamguard = SpamGuard::new(settings.moderation.clone(), rules, guard, sink, banlog);

        Arc::new(Self {
            settings,
            guard: Arc::new(spamguard),
            stats,
        })
    }

    pub fn spamguard(&self) -> Arc<SpamGuard> {
        self.guard.clone()
    }

    pub fn stats(&self) -> &BanStatsReader {
        &self.stats
    }

    /// Środowisko: "production" | "development" | …
    #[inline]
    pub fn env(&self) -> &str {
        &self.settings.env
    }
}
