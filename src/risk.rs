// src/risk.rs
//
// Agregacja sygnałów ryzyka wiadomości. Wynik jest tylko doradczy:
// trafia do promptu, nigdy sam nie banuje.

use serde::Serialize;

use crate::message::NormalizedMessage;

/* ===========================
   Wagi
   =========================== */

pub const W_CHAT_FORWARD: f64 = 0.40;
pub const W_EMBEDDED_LINK: f64 = 0.50;
pub const W_TELEGRAM_LINK: f64 = 0.30;
pub const W_EXTERNAL_LINK_EACH: f64 = 0.10;
pub const W_CONTACT: f64 = 0.30;
pub const W_BUTTONS: f64 = 0.20;
pub const W_EXTERNAL_REPLY: f64 = 0.20;
pub const W_EXTERNAL_REPLY_CHANNEL: f64 = 0.20;
pub const W_QUOTED_TELEGRAM: f64 = 0.20;
pub const W_QUOTED_EXTERNAL_EACH: f64 = 0.10;
pub const W_MEDIA_GROUP: f64 = 0.10;
pub const W_MULTI_CATEGORY: f64 = 0.20;

/// Linki zewnętrzne liczą się najwyżej trzy razy.
pub const EXTERNAL_LINK_CAP: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSignalKind {
    ChatForward,
    EmbeddedChannelLink,
    TelegramLink,
    ExternalLinks,
    ContactCard,
    InlineButtons,
    ExternalReply,
    ExternalReplyFromChannel,
    QuotedTelegramLinks,
    QuotedExternalLinks,
    MediaGroup,
    TextAnomaly,
    MultipleCategories,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSignal {
    pub kind: RiskSignalKind,
    pub weight: f64,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RiskAssessment {
    /// [0, 1]
    pub score: f64,
    /// Kolejność dodawania, duplikaty dozwolone.
    pub flags: Vec<String>,
    pub signals: Vec<RiskSignal>,
}

impl RiskAssessment {
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

/* ===========================
   Fakty wejściowe
   =========================== */

/// Płaskie fakty wyciągnięte z rekordu – wszystko, czego potrzebuje scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskFacts {
    pub chat_forward: Option<String>,
    pub embedded_links: usize,
    pub plain_telegram_links: usize,
    pub external_links: usize,
    pub has_contact: bool,
    pub button_count: usize,
    pub external_reply: bool,
    pub external_reply_from_channel: bool,
    pub quoted_telegram_links: usize,
    pub quoted_external_links: usize,
    pub media_group: bool,
    pub text_anomaly_score: f64,
    pub text_anomaly_flags: Vec<String>,
}

impl RiskFacts {
    pub fn from_message(m: &NormalizedMessage) -> Self {
        let mut facts = RiskFacts {
            chat_forward: m
                .forward
                .as_ref()
                .filter(|f| f.is_from_chat())
                .map(|f| f.source_name.clone()),
            embedded_links: m.entities.embedded_channel_links.len(),
            plain_telegram_links: m.entities.plain_telegram_links().count(),
            external_links: m.entities.external_links.len(),
            has_contact: m.media.has_contact(),
            button_count: m.button_count(),
            external_reply: m.external_reply.is_some(),
            external_reply_from_channel: m.external_reply.as_ref().is_some_and(|e| e.is_from_channel()),
            media_group: m.is_media_group_member,
            text_anomaly_score: m.text_anomaly.density_score(),
            text_anomaly_flags: m.text_anomaly.flags().to_vec(),
            ..Default::default()
        };

        // cytowana treść: odpowiedź na forward (o ile nadawca nie jest zwolniony) + cytat z innego czatu
        if let Some(r) = m.reply.as_ref().filter(|r| r.is_forward() && !r.sender_exempt) {
            facts.quoted_telegram_links += r.entities.telegram_links.len();
            facts.quoted_external_links += r.entities.external_links.len();
        }
        if let Some(q) = m.external_reply.as_ref().map(|e| &e.quoted).filter(|q| !q.sender_exempt) {
            facts.quoted_telegram_links += q.entities.telegram_links.len();
            facts.quoted_external_links += q.entities.external_links.len();
        }
        facts
    }
}

/* ===========================
   Scoring
   =========================== */

pub fn assess(m: &NormalizedMessage) -> RiskAssessment {
    assess_facts(&RiskFacts::from_message(m))
}

pub fn assess_facts(f: &RiskFacts) -> RiskAssessment {
    let mut signals: Vec<RiskSignal> = Vec::with_capacity(8);
    let mut push = |kind, weight: f64, detail: String| {
        signals.push(RiskSignal { kind, weight, detail });
    };

    if let Some(src) = &f.chat_forward {
        push(RiskSignalKind::ChatForward, W_CHAT_FORWARD, format!("forwarded from chat/channel: {src}"));
    }
    if f.embedded_links > 0 {
        push(
            RiskSignalKind::EmbeddedChannelLink,
            W_EMBEDDED_LINK,
            format!("embedded channel post links: {}", f.embedded_links),
        );
    }
    if f.plain_telegram_links > 0 {
        push(
            RiskSignalKind::TelegramLink,
            W_TELEGRAM_LINK,
            format!("telegram links: {}", f.plain_telegram_links),
        );
    }
    if f.external_links > 0 {
        push(
            RiskSignalKind::ExternalLinks,
            W_EXTERNAL_LINK_EACH * f.external_links.min(EXTERNAL_LINK_CAP) as f64,
            format!("external links: {}", f.external_links),
        );
    }
    if f.has_contact {
        push(RiskSignalKind::ContactCard, W_CONTACT, "contact card shared".into());
    }
    if f.button_count > 0 {
        push(
            RiskSignalKind::InlineButtons,
            W_BUTTONS,
            format!("inline buttons: {}", f.button_count),
        );
    }
    if f.external_reply {
        push(RiskSignalKind::ExternalReply, W_EXTERNAL_REPLY, "quotes a message from another chat".into());
        if f.external_reply_from_channel {
            push(
                RiskSignalKind::ExternalReplyFromChannel,
                W_EXTERNAL_REPLY_CHANNEL,
                "quoted chat is a channel".into(),
            );
        }
    }
    if f.quoted_telegram_links > 0 {
        push(
            RiskSignalKind::QuotedTelegramLinks,
            W_QUOTED_TELEGRAM,
            format!("quoted content has telegram links: {}", f.quoted_telegram_links),
        );
    }
    if f.quoted_external_links > 0 {
        push(
            RiskSignalKind::QuotedExternalLinks,
            W_QUOTED_EXTERNAL_EACH * f.quoted_external_links.min(EXTERNAL_LINK_CAP) as f64,
            format!("quoted content has external links: {}", f.quoted_external_links),
        );
    }
    if f.media_group {
        push(RiskSignalKind::MediaGroup, W_MEDIA_GROUP, "part of a media group".into());
    }
    if f.text_anomaly_score > 0.0 {
        push(
            RiskSignalKind::TextAnomaly,
            f.text_anomaly_score.clamp(0.0, 1.0),
            f.text_anomaly_flags.join(", "),
        );
    }

    // premia za współwystępowanie (stała, niezależna od liczby kategorii)
    let categories = [
        f.chat_forward.is_some(),
        f.embedded_links + f.plain_telegram_links > 0,
        f.external_links > 0,
        f.has_contact,
        f.button_count > 0,
    ]
    .into_iter()
    .filter(|b| *b)
    .count();
    if categories >= 2 {
        push(
            RiskSignalKind::MultipleCategories,
            W_MULTI_CATEGORY,
            format!("{categories} risk categories combined"),
        );
    }

    let score = signals.iter().map(|s| s.weight.max(0.0)).sum::<f64>().clamp(0.0, 1.0);

    let mut flags = Vec::with_capacity(signals.len() + f.text_anomaly_flags.len());
    for s in &signals {
        if s.kind == RiskSignalKind::TextAnomaly {
            flags.extend(f.text_anomaly_flags.iter().cloned());
        } else {
            flags.push(s.detail.clone());
        }
    }

    RiskAssessment { score, flags, signals }
}
