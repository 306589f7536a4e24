// src/config.rs

use anyhow::Result;
use chrono::{FixedOffset, Offset, Utc};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::blacklist::RuleSpec;

/// Konta systemowe Telegrama: powiadomienia serwisowe, anonimowy admin grupy.
/// Bez 136817688: to `from` każdej wiadomości pisanej "jako kanał".
pub const DEFAULT_SYSTEM_USER_IDS: [i64; 2] = [777000, 1087968824];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub env: String,
    pub app: App,
    pub llm: LlmConfig,
    pub moderation: ModerationConfig,
    #[serde(default)]
    pub blacklist: BlacklistConfig,
    pub banlog: BanLogConfig,
    pub logging: Logging,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout_ms: u64,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "gpt-4o-mini".into(),
            timeout_ms: 15_000,
            temperature: 0.2,
            max_tokens: 400,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModerationConfig {
    #[serde(default)]
    pub admin_user_ids: Vec<i64>,
    #[serde(default = "default_system_ids")]
    pub system_user_ids: Vec<i64>,
    pub message_confidence_threshold: f64,
    pub username_confidence_threshold: f64,
    pub notice_ttl_secs: u64,
}

fn default_system_ids() -> Vec<i64> {
    DEFAULT_SYSTEM_USER_IDS.to_vec()
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            admin_user_ids: Vec::new(),
            system_user_ids: default_system_ids(),
            message_confidence_threshold: 0.7,
            username_confidence_threshold: 0.8,
            notice_ttl_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BlacklistConfig {
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BanLogConfig {
    pub path: String,
    /// Pole `<logger>` w linii dziennika.
    pub logger_name: String,
    /// Strefa "cywilna" dziennika (Asia/Shanghai = +8, bez DST).
    pub utc_offset_hours: i32,
}

impl Default for BanLogConfig {
    fn default() -> Self {
        Self {
            path: "logs/bans.log".into(),
            logger_name: crate::banlog::DEFAULT_LOGGER_NAME.into(),
            utc_offset_hours: 8,
        }
    }
}

impl BanLogConfig {
    pub fn offset(&self) -> FixedOffset {
        let secs = self.utc_offset_hours.clamp(-12, 14) * 3600;
        FixedOffset::east_opt(secs).unwrap_or(Utc.fix())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    pub json: Option<bool>,
    pub level: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Które środowisko?
        let env = std::env::var("TSG_ENV").unwrap_or_else(|_| "development".to_string());

        // .env.<env> i .env (jeśli są)
        let _ = dotenvy::from_filename(format!(".env.{}", env));
        let _ = dotenvy::dotenv();

        let defaults = Self::defaults(&env);

        // Warstwy: domyślne -> plik TOML -> zmienne środowiskowe TSG_*
        let figment = Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file(format!("config/{}.toml", env)))
            // TSG_LLM__API_KEY => llm.api_key, TSG_MODERATION__NOTICE_TTL_SECS => moderation.notice_ttl_secs
            .merge(Env::prefixed("TSG_").ignore(&["ENV"]).split("__"));

        let mut s: Settings = figment.extract()?;
        s.env = env;
        s.sanitize();
        Ok(s)
    }

    pub fn defaults(env: &str) -> Self {
        Self {
            env: env.to_string(),
            app: App {
                name: "Tigris SpamGuard".into(),
            },
            llm: LlmConfig::default(),
            moderation: ModerationConfig::default(),
            blacklist: BlacklistConfig::default(),
            banlog: BanLogConfig::default(),
            logging: Logging {
                json: Some(false),
                level: Some("info".into()),
            },
        }
    }

    /// Progi do [0,1], offset do [-12, 14], timeout > 0.
    pub fn sanitize(&mut self) {
        let m = &mut self.moderation;
        m.message_confidence_threshold = clamp_unit(m.message_confidence_threshold, 0.7);
        m.username_confidence_threshold = clamp_unit(m.username_confidence_threshold, 0.8);
        self.banlog.utc_offset_hours = self.banlog.utc_offset_hours.clamp(-12, 14);
        if self.llm.timeout_ms == 0 {
            self.llm.timeout_ms = LlmConfig::default().timeout_ms;
        }
        self.llm.temperature = if self.llm.temperature.is_finite() {
            self.llm.temperature.clamp(0.0, 2.0)
        } else {
            LlmConfig::default().temperature
        };
    }
}

fn clamp_unit(v: f64, fallback: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { fallback }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bot_behaviour() {
        let s = Settings::defaults("test");
        assert_eq!(s.moderation.message_confidence_threshold, 0.7);
        assert_eq!(s.moderation.notice_ttl_secs, 10);
        assert_eq!(s.moderation.system_user_ids, vec![777000, 1087968824]);
        assert_eq!(s.banlog.offset().local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn sanitize_clamps() {
        let mut s = Settings::defaults("test");
        s.moderation.message_confidence_threshold = 3.0;
        s.moderation.username_confidence_threshold = f64::NAN;
        s.banlog.utc_offset_hours = 99;
        s.llm.timeout_ms = 0;
        s.sanitize();
        assert_eq!(s.moderation.message_confidence_threshold, 1.0);
        assert_eq!(s.moderation.username_confidence_threshold, 0.8);
        assert_eq!(s.banlog.utc_offset_hours, 14);
        assert_eq!(s.llm.timeout_ms, 15_000);
    }

    #[test]
    fn toml_layer_overrides_defaults() {
        let toml = r#"
            [moderation]
            admin_user_ids = [1, 2]
            message_confidence_threshold = 0.9
            username_confidence_threshold = 0.8
            notice_ttl_secs = 5

            [[blacklist.rules]]
            pattern = "casino"
            reason = "gambling"
        "#;
        let s: Settings = Figment::from(Serialized::defaults(Settings::defaults("test")))
            .merge(Toml::string(toml))
            .extract()
            .unwrap();
        assert_eq!(s.moderation.admin_user_ids, vec![1, 2]);
        assert_eq!(s.moderation.system_user_ids, vec![777000, 1087968824]);
        assert_eq!(s.blacklist.rules.len(), 1);
        assert_eq!(s.banlog.path, "logs/bans.log");
        assert_eq!(s.banlog.logger_name, "spamguard");
    }
}
