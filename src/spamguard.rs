// src/spamguard.rs
//
// Polityka decyzji: zwolnienia → (join) czarna lista / ocena nazwy →
// (wiadomość) normalizacja + ryzyko + wyrocznia → ban/usunięcie/powiadomienie.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::banlog::{BanEvent, BanLog};
use crate::blacklist::BlacklistRules;
use crate::config::ModerationConfig;
use crate::message::{self, Exemptions, NormalizedMessage};
use crate::oracle::{OracleGuard, OracleRequest, UsernameRequest, Verdict};
use crate::prompt;
use crate::risk::{self, RiskAssessment};
use crate::sink::ModerationSink;
use crate::telegram::{Chat, ChatKind, RawMessage, User};

/// Kategoria werdyktu z lokalnej czarnej listy.
pub const BLACKLIST_CATEGORY: &str = "blacklist";

/* ===========================
   Decyzje
   =========================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Admin, konto systemowe albo bot.
    ExemptSender,
    NoSender,
    /// Czat prywatny / kanał – moderujemy tylko grupy.
    NotAGroup,
    NoContent,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ExemptSender => "exempt sender",
            SkipReason::NoSender => "no sender",
            SkipReason::NotAGroup => "not a group chat",
            SkipReason::NoContent => "no content",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Message,
    Username,
    Blacklist,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Message => "message",
            Trigger::Username => "username",
            Trigger::Blacklist => "blacklist",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BanDecision {
    pub trigger: Trigger,
    pub chat_id: i64,
    pub chat_title: Option<String>,
    pub user_id: i64,
    pub username: Option<String>,
    pub full_name: String,
    /// Wiadomość do usunięcia (brak dla join events).
    pub message_id: Option<i64>,
    pub verdict: Verdict,
    pub risk: Option<RiskAssessment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Skip(SkipReason),
    Allow { verdict: Verdict },
    Ban(Box<BanDecision>),
}

impl Decision {
    pub fn is_ban(&self) -> bool {
        matches!(self, Decision::Ban(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Decision::Skip(r) => Some(*r),
            _ => None,
        }
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Decision::Allow { verdict } => Some(verdict),
            Decision::Ban(b) => Some(&b.verdict),
            Decision::Skip(_) => None,
        }
    }
}

/// Co faktycznie się udało przy egzekucji (kroki niezależne).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnforcementReport {
    pub banned: bool,
    /// `None` gdy nie było czego usuwać.
    pub deleted: Option<bool>,
    pub notified: bool,
    pub logged: bool,
}

/* ===========================
   SpamGuard
   =========================== */

pub struct SpamGuard {
    cfg: ModerationConfig,
    exemptions: Exemptions,
    rules: Arc<BlacklistRules>,
    oracle: OracleGuard,
    sink: Arc<dyn ModerationSink>,
    banlog: Arc<BanLog>,
}

impl SpamGuard {
    pub fn new(
        cfg: ModerationConfig,
        rules: Arc<BlacklistRules>,
        oracle: OracleGuard,
        sink: Arc<dyn ModerationSink>,
        banlog: Arc<BanLog>,
    ) -> Self {
        let exemptions = Exemptions::new(
            cfg.admin_user_ids.iter().copied(),
            cfg.system_user_ids.iter().copied(),
        );
        info!(
            message_threshold = cfg.message_confidence_threshold,
            username_threshold = cfg.username_confidence_threshold,
            admins = cfg.admin_user_ids.len(),
            blacklist_rules = rules.len(),
            "SpamGuard ready"
        );
        Self {
            cfg,
            exemptions,
            rules,
            oracle,
            sink,
            banlog,
        }
    }

    /// Punkt wejścia dla każdej wiadomości z grupy: join event albo treść.
    pub async fn handle<M: RawMessage + ?Sized>(&self, raw: &M) -> Vec<Decision> {
        let members = raw.new_chat_members();
        if members.is_empty() {
            return vec![self.on_message(raw).await];
        }
        let Some(chat) = raw.chat() else {
            return vec![Decision::Skip(SkipReason::NotAGroup)];
        };
        let join_text = raw.text().or(raw.caption());
        let mut out = Vec::with_capacity(members.len());
        for user in members {
            out.push(self.on_new_member(chat, user, join_text).await);
        }
        out
    }

    /* ---------- wiadomości ---------- */

    pub async fn on_message<M: RawMessage + ?Sized>(&self, raw: &M) -> Decision {
        let decision = self.check_message(raw).await;
        self.enforce(&decision).await;
        decision
    }

    /// Sama decyzja, bez egzekucji.
    pub async fn check_message<M: RawMessage + ?Sized>(&self, raw: &M) -> Decision {
        if raw.chat().is_some_and(|c| !is_group(c)) {
            debug!(message_id = ?raw.message_id(), "skip: not a group chat");
            return Decision::Skip(SkipReason::NotAGroup);
        }

        let msg = message::normalize(raw, &self.exemptions);
        let Some(sender) = msg.sender.as_ref() else {
            debug!(message_id = msg.id, "skip: no sender");
            return Decision::Skip(SkipReason::NoSender);
        };
        if sender.is_exempt {
            debug!(user_id = sender.id, chat_id = msg.chat_id, "skip: exempt sender");
            return Decision::Skip(SkipReason::ExemptSender);
        }
        if !msg.has_analyzable_content() {
            debug!(user_id = sender.id, message_id = msg.id, "skip: no content");
            return Decision::Skip(SkipReason::NoContent);
        }

        let risk = risk::assess(&msg);
        let req = OracleRequest {
            content: prompt::build_message_content(&msg),
            sender_id: sender.id,
            sender_name: sender
                .username
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| sender.display_name.clone()),
            is_new_member: !raw.new_chat_members().is_empty(),
            risk,
        };
        let verdict = self.oracle.classify_message(&req).await;
        self.message_decision(&msg, verdict, req.risk)
    }

    fn message_decision(&self, msg: &NormalizedMessage, verdict: Verdict, risk: RiskAssessment) -> Decision {
        let Some(sender) = msg.sender.as_ref() else {
            return Decision::Skip(SkipReason::NoSender);
        };
        if !verdict.meets(self.cfg.message_confidence_threshold) {
            debug!(
                user_id = sender.id,
                confidence = verdict.confidence,
                risk_score = risk.score,
                "message allowed"
            );
            return Decision::Allow { verdict };
        }
        Decision::Ban(Box::new(BanDecision {
            trigger: Trigger::Message,
            chat_id: msg.chat_id,
            chat_title: msg.chat_title.clone(),
            user_id: sender.id,
            username: sender.username.clone(),
            full_name: sender.display_name.clone(),
            message_id: Some(msg.id),
            verdict,
            risk: Some(risk),
        }))
    }

    /* ---------- nowi członkowie ---------- */

    pub async fn on_new_member(&self, chat: &Chat, user: &User, join_text: Option<&str>) -> Decision {
        let decision = self.check_new_member(chat, user, join_text).await;
        self.enforce(&decision).await;
        decision
    }

    pub async fn check_new_member(&self, chat: &Chat, user: &User, join_text: Option<&str>) -> Decision {
        if !is_group(chat) {
            return Decision::Skip(SkipReason::NotAGroup);
        }
        if self.exemptions.is_exempt(user) {
            debug!(user_id = user.id, chat_id = chat.id, "skip: exempt new member");
            return Decision::Skip(SkipReason::ExemptSender);
        }

        let full_name = user.full_name();
        let names = user
            .username
            .as_deref()
            .into_iter()
            .chain(std::iter::once(full_name.as_str()));

        let (verdict, trigger) = match self.rules.check(names) {
            Some(hit) => {
                info!(
                    user_id = user.id,
                    chat_id = chat.id,
                    pattern = %hit.pattern,
                    name = %hit.matched_name,
                    "blacklisted name on join"
                );
                (
                    Verdict {
                        is_violation: true,
                        confidence: 1.0,
                        reason: hit.reason,
                        category: BLACKLIST_CATEGORY.to_string(),
                    },
                    Trigger::Blacklist,
                )
            }
            None => {
                let req = UsernameRequest {
                    user_id: user.id,
                    username: user.username.clone(),
                    full_name: full_name.clone(),
                    join_message: join_text.map(str::to_string),
                };
                (self.oracle.classify_username(&req).await, Trigger::Username)
            }
        };

        if trigger == Trigger::Username && !verdict.meets(self.cfg.username_confidence_threshold) {
            return Decision::Allow { verdict };
        }
        Decision::Ban(Box::new(BanDecision {
            trigger,
            chat_id: chat.id,
            chat_title: chat.title.clone(),
            user_id: user.id,
            username: user.username.clone(),
            full_name,
            message_id: None,
            verdict,
            risk: None,
        }))
    }

    /* ---------- egzekucja ---------- */

    /// Ban → usunięcie → powiadomienie → wpis w dzienniku.
    /// Każdy krok niezależny; błędy tylko logowane.
    pub async fn enforce(&self, decision: &Decision) -> Option<EnforcementReport> {
        let Decision::Ban(d) = decision else {
            return None;
        };
        let mut report = EnforcementReport::default();

        info!(
            user_id = d.user_id,
            chat_id = d.chat_id,
            trigger = d.trigger.as_str(),
            category = %d.verdict.category,
            confidence = d.verdict.confidence,
            reason = %d.verdict.reason,
            "spam detected, enforcing"
        );

        match self.sink.ban(d.chat_id, d.user_id).await {
            Ok(()) => {
                report.banned = true;
                info!(user_id = d.user_id, chat_id = d.chat_id, "user banned");
            }
            Err(e) => warn!(error = %e, user_id = d.user_id, chat_id = d.chat_id, "ban failed"),
        }

        if let Some(message_id) = d.message_id {
            match self.sink.delete_message(d.chat_id, message_id).await {
                Ok(()) => {
                    report.deleted = Some(true);
                    debug!(message_id, chat_id = d.chat_id, "message deleted");
                }
                Err(e) => {
                    report.deleted = Some(false);
                    warn!(error = %e, message_id, chat_id = d.chat_id, "delete failed");
                }
            }
        }

        let text = notice_text(d);
        match self
            .sink
            .send_transient_notice(d.chat_id, &text, self.cfg.notice_ttl_secs)
            .await
        {
            Ok(()) => report.notified = true,
            Err(e) => warn!(error = %e, chat_id = d.chat_id, "notice failed"),
        }

        match self.banlog.append(&ban_event(d, &self.banlog)).await {
            Ok(()) => report.logged = true,
            Err(e) => warn!(error = %e, path = %self.banlog.path().display(), "ban log append failed"),
        }

        Some(report)
    }
}

fn is_group(chat: &Chat) -> bool {
    // Unknown: brak typu w danych – nie odrzucamy
    !matches!(chat.kind, ChatKind::Private | ChatKind::Channel)
}

/// Treść powiadomienia dla czatu (usuwane po TTL).
pub fn notice_text(d: &BanDecision) -> String {
    let who = d
        .username
        .as_deref()
        .filter(|u| !u.is_empty())
        .map(|u| format!("@{u}"))
        .unwrap_or_else(|| d.full_name.clone());
    let headline = match d.trigger {
        Trigger::Message => "⚠️ Spam detected and removed",
        Trigger::Username | Trigger::Blacklist => "⚠️ Account with a prohibited name removed",
    };
    format!(
        "{headline}\n👤 User: {who}\n📋 Category: {}\n📊 Confidence: {:.0}%\n💬 Reason: {}",
        d.verdict.category,
        d.verdict.confidence * 100.0,
        d.verdict.reason
    )
}

fn ban_event(d: &BanDecision, log: &BanLog) -> BanEvent {
    let mut ev = BanEvent {
        timestamp: Utc::now().with_timezone(&log.offset()),
        category: d.verdict.category.clone(),
        chat_id: d.chat_id,
        chat_title: d.chat_title.clone(),
        user_id: d.user_id,
        username: d.username.clone(),
        full_name: Some(d.full_name.clone()).filter(|n| !n.is_empty()),
        reason: d.verdict.reason.clone(),
        confidence: Some(d.verdict.confidence),
        extra: Default::default(),
    }
    .with_extra("trigger", d.trigger.as_str());

    if let Some(id) = d.message_id {
        ev = ev.with_extra("message_id", id);
    }
    if let Some(r) = &d.risk {
        ev = ev
            .with_extra("risk_score", r.score)
            .with_extra(
                "risk_flags",
                Value::Array(r.flags.iter().cloned().map(Value::from).collect()),
            );
    }
    ev
}
