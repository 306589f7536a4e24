// src/message.rs
//
// Normalizacja: surowa wiadomość (przez `RawMessage`) → `NormalizedMessage`.
// Bez zegara, bez losowości – ta sama wiadomość daje zawsze ten sam rekord.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::entities::{self, CategorizedEntities, CategorizedLink, EntityKind, ResolvedEntity};
use crate::telegram::{
    Chat, ChatKind, ContentView, Contact, LegacyForward, Location, MediaFields, MessageEntity,
    MessageOrigin, RawMessage, User,
};
use crate::textguard::{self, TextAnomaly};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("entity span {offset}+{length} outside text of {text_len} UTF-16 units")]
    EntitySpan {
        offset: usize,
        length: usize,
        text_len: usize,
    },
}

/* ===========================
   Zwolnienia (admini, konta systemowe, boty)
   =========================== */

#[derive(Debug, Clone, Default)]
pub struct Exemptions {
    admin_ids: BTreeSet<i64>,
    system_ids: BTreeSet<i64>,
}

impl Exemptions {
    pub fn new(
        admin_ids: impl IntoIterator<Item = i64>,
        system_ids: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            admin_ids: admin_ids.into_iter().collect(),
            system_ids: system_ids.into_iter().collect(),
        }
    }

    pub fn is_exempt_id(&self, id: i64) -> bool {
        self.admin_ids.contains(&id) || self.system_ids.contains(&id)
    }

    pub fn is_exempt(&self, user: &User) -> bool {
        user.is_bot || self.is_exempt_id(user.id)
    }
}

/* ===========================
   Rekord znormalizowany
   =========================== */

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SenderInfo {
    pub id: i64,
    pub display_name: String,
    pub username: Option<String>,
    pub is_bot: bool,
    pub is_exempt: bool,
}

impl SenderInfo {
    fn from_user(user: &User, ex: &Exemptions) -> Self {
        Self {
            id: user.id,
            display_name: user.full_name(),
            username: user.username.clone().filter(|u| !u.is_empty()),
            is_bot: user.is_bot,
            is_exempt: ex.is_exempt(user),
        }
    }

    fn from_chat(chat: &Chat, exempt: bool) -> Self {
        Self {
            id: chat.id,
            display_name: chat.title.clone().unwrap_or_default(),
            username: chat.username.clone(),
            is_bot: false,
            is_exempt: exempt,
        }
    }

    /// `@username (Imię, ID: 1)` – do promptu.
    pub fn describe(&self) -> String {
        match &self.username {
            Some(u) => format!("@{u} ({}, ID: {})", self.display_name, self.id),
            None => format!("{} (ID: {})", self.display_name, self.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardSourceKind {
    User,
    Chat,
    Channel,
    HiddenName,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardProvenance {
    pub source_kind: ForwardSourceKind,
    pub source_id: Option<i64>,
    pub source_name: String,
    pub source_username: Option<String>,
    pub signature: Option<String>,
}

impl ForwardProvenance {
    /// Forward z kanału albo grupy (a nie od osoby).
    pub fn is_from_chat(&self) -> bool {
        matches!(self.source_kind, ForwardSourceKind::Chat | ForwardSourceKind::Channel)
    }

    pub fn describe(&self) -> String {
        let kind = match self.source_kind {
            ForwardSourceKind::User => "user",
            ForwardSourceKind::Chat => "group",
            ForwardSourceKind::Channel => "channel",
            ForwardSourceKind::HiddenName => "hidden user",
        };
        let mut out = format!("{kind}: {}", self.source_name);
        if let Some(u) = &self.source_username {
            out.push_str(&format!(" (@{u})"));
        }
        if let Some(id) = self.source_id {
            out.push_str(&format!(" [ID: {id}]"));
        }
        if let Some(sig) = &self.signature {
            out.push_str(&format!(", signed: {sig}"));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Sticker,
    Animation,
    Contact,
    Location,
    Venue,
    Poll,
    Dice,
    VideoNote,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::Sticker => "sticker",
            MediaKind::Animation => "animation",
            MediaKind::Contact => "contact",
            MediaKind::Location => "location",
            MediaKind::Venue => "venue",
            MediaKind::Poll => "poll",
            MediaKind::Dice => "dice",
            MediaKind::VideoNote => "video_note",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaDescriptor {
    pub kinds: Vec<MediaKind>,
    pub contact: Option<Contact>,
    pub location: Option<Location>,
}

impl MediaDescriptor {
    pub fn has_media(&self) -> bool {
        !self.kinds.is_empty()
    }

    pub fn has_contact(&self) -> bool {
        self.kinds.contains(&MediaKind::Contact)
    }

    pub fn kinds_joined(&self) -> String {
        self.kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ButtonInfo {
    pub label: String,
    pub url: Option<String>,
}

/// Treść, na którą wiadomość odpowiada (ten sam czat albo cytat z innego).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotedContext {
    pub sender: Option<SenderInfo>,
    /// Zwolniony nadawca cytowanej treści (admin, konto systemowe, bot).
    pub sender_exempt: bool,
    pub text: Option<String>,
    pub forward: Option<ForwardProvenance>,
    pub entities: CategorizedEntities,
    pub media: MediaDescriptor,
    pub button_count: usize,
}

impl QuotedContext {
    pub fn is_forward(&self) -> bool {
        self.forward.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalReplyContext {
    pub quoted: QuotedContext,
    pub origin_chat_kind: Option<ChatKind>,
    pub origin_chat_title: Option<String>,
}

impl ExternalReplyContext {
    pub fn is_from_channel(&self) -> bool {
        self.origin_chat_kind == Some(ChatKind::Channel)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedMessage {
    pub id: i64,
    pub chat_id: i64,
    pub chat_title: Option<String>,
    pub chat_kind: ChatKind,
    pub sender: Option<SenderInfo>,
    pub timestamp: i64,

    pub text_content: String,
    /// Tekst pochodzi z podpisu pod mediami.
    pub text_is_caption: bool,
    pub entities: CategorizedEntities,

    pub forward: Option<ForwardProvenance>,
    pub reply: Option<QuotedContext>,
    pub external_reply: Option<ExternalReplyContext>,

    pub media: MediaDescriptor,
    pub buttons: Vec<Vec<ButtonInfo>>,
    pub is_media_group_member: bool,
    pub text_anomaly: TextAnomaly,

    pub is_automatic_forward: bool,
    pub has_protected_content: bool,
    pub is_edited: bool,

    /// Rekord okrojony (błąd normalizacji) – tylko nadawca + surowy tekst.
    pub is_minimal: bool,
}

impl NormalizedMessage {
    pub fn sender_is_exempt(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| s.is_exempt)
    }

    pub fn links(&self) -> Vec<CategorizedLink> {
        self.entities.links()
    }

    pub fn button_count(&self) -> usize {
        self.buttons.iter().map(Vec::len).sum()
    }

    pub fn has_analyzable_content(&self) -> bool {
        !self.text_content.trim().is_empty()
            || self.media.has_media()
            || self.forward.is_some()
            || self.button_count() > 0
            || self.external_reply.is_some()
    }
}

/* ===========================
   Normalizacja
   =========================== */

/// Nigdy nie zawodzi: błąd spanów encji degraduje rekord do minimalnego.
pub fn normalize<M: RawMessage + ?Sized>(raw: &M, ex: &Exemptions) -> NormalizedMessage {
    match try_normalize(raw, ex) {
        Ok(m) => m,
        Err(e) => {
            warn!(
                error = %e,
                message_id = raw.message_id().unwrap_or_default(),
                "message normalization failed, using minimal record"
            );
            minimal(raw, ex)
        }
    }
}

pub fn try_normalize<M: RawMessage + ?Sized>(
    raw: &M,
    ex: &Exemptions,
) -> Result<NormalizedMessage, NormalizeError> {
    let chat = raw.chat();
    let chat_id = chat.map(|c| c.id).unwrap_or_default();
    let (text_content, text_is_caption, raw_entities) = primary_text(raw);
    let resolved = resolve_entities(&text_content, raw_entities)?;

    // zepsute encje w cytacie gubią tylko kontekst cytatu, nie całą wiadomość
    let reply = raw.reply_to().and_then(|r| {
        quoted_context(r, ex, chat_id)
            .map_err(|e| warn!(error = %e, "replied message unreadable, reply context dropped"))
            .ok()
    });
    let external_reply = raw.external_reply().and_then(|q| {
        let quoted = quoted_context(&q, ex, chat_id)
            .map_err(|e| warn!(error = %e, "external quote unreadable, quote context dropped"))
            .ok()?;
        Some(ExternalReplyContext {
            quoted,
            origin_chat_kind: q.origin_chat_kind(),
            origin_chat_title: q.origin_chat().and_then(|c| c.title.clone()),
        })
    });

    let buttons = raw
        .buttons()
        .map(|kb| {
            kb.inline_keyboard
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| ButtonInfo {
                            label: b.text.clone(),
                            url: b.url.clone(),
                        })
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(NormalizedMessage {
        id: raw.message_id().unwrap_or_default(),
        chat_id,
        chat_title: chat.and_then(|c| c.title.clone()),
        chat_kind: chat.map(|c| c.kind).unwrap_or_default(),
        sender: sender_of(raw, ex, chat_id),
        timestamp: raw.date(),
        entities: categorize_text(&text_content, &resolved),
        text_anomaly: textguard::analyze(&text_content, &resolved),
        text_content,
        text_is_caption,
        forward: forward_provenance(raw),
        reply,
        external_reply,
        media: describe_media(raw.media()),
        buttons,
        is_media_group_member: raw.media_group_id().is_some_and(|g| !g.is_empty()),
        is_automatic_forward: raw.is_automatic_forward(),
        has_protected_content: raw.has_protected_content(),
        is_edited: raw.edit_date().is_some(),
        is_minimal: false,
    })
}

fn minimal<M: RawMessage + ?Sized>(raw: &M, ex: &Exemptions) -> NormalizedMessage {
    let chat = raw.chat();
    let chat_id = chat.map(|c| c.id).unwrap_or_default();
    let (text_content, text_is_caption, _) = primary_text(raw);
    NormalizedMessage {
        id: raw.message_id().unwrap_or_default(),
        chat_id,
        chat_title: chat.and_then(|c| c.title.clone()),
        chat_kind: chat.map(|c| c.kind).unwrap_or_default(),
        sender: sender_of(raw, ex, chat_id),
        timestamp: raw.date(),
        text_content,
        text_is_caption,
        entities: CategorizedEntities::default(),
        forward: None,
        reply: None,
        external_reply: None,
        media: MediaDescriptor::default(),
        buttons: Vec::new(),
        is_media_group_member: false,
        text_anomaly: TextAnomaly::default(),
        is_automatic_forward: false,
        has_protected_content: false,
        is_edited: false,
        is_minimal: true,
    }
}

const NO_ENTITIES: &[MessageEntity] = &[];

fn primary_text<'a, V: ContentView + ?Sized>(v: &'a V) -> (String, bool, &'a [MessageEntity]) {
    match v.text().filter(|t| !t.is_empty()) {
        Some(t) => (t.to_string(), false, v.text_entities()),
        None => match v.caption().filter(|c| !c.is_empty()) {
            Some(c) => (c.to_string(), true, v.caption_entities()),
            None => (String::new(), false, NO_ENTITIES),
        },
    }
}

/// Wiadomość "jako czat" (sender_chat) identyfikuje czat, `from` jest wtedy zaślepką.
/// Zwolniony jest tylko anonimowy admin tej grupy (sender_chat == czat);
/// obcy kanał zostaje oceniany niezależnie od `from`.
fn sender_of<V: ContentView + ?Sized>(v: &V, ex: &Exemptions, chat_id: i64) -> Option<SenderInfo> {
    match (v.sender(), v.sender_chat()) {
        (_, Some(sc)) => Some(SenderInfo::from_chat(sc, sc.id == chat_id)),
        (Some(u), None) => Some(SenderInfo::from_user(u, ex)),
        (None, None) => None,
    }
}

fn quoted_context(
    v: &dyn ContentView,
    ex: &Exemptions,
    chat_id: i64,
) -> Result<QuotedContext, NormalizeError> {
    let (text, _, raw_entities) = primary_text(v);
    let resolved = resolve_entities(&text, raw_entities)?;

    let sender = sender_of(v, ex, chat_id);

    Ok(QuotedContext {
        sender_exempt: sender.as_ref().is_some_and(|s| s.is_exempt),
        sender,
        entities: categorize_text(&text, &resolved),
        text: (!text.is_empty()).then_some(text),
        forward: forward_provenance(v),
        media: describe_media(v.media()),
        button_count: v
            .buttons()
            .map(|kb| kb.inline_keyboard.iter().map(Vec::len).sum())
            .unwrap_or(0),
    })
}

/* ===========================
   Encje (UTF-16)
   =========================== */

/// Wycinek tekstu wg offsetów UTF-16. `None` gdy poza tekstem
/// albo gdy cięcie rozrywa parę surogatów.
pub fn utf16_slice(text: &str, offset: usize, length: usize) -> Option<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let end = offset.checked_add(length)?;
    if end > units.len() {
        return None;
    }
    String::from_utf16(&units[offset..end]).ok()
}

pub fn resolve_entities(
    text: &str,
    raw: &[MessageEntity],
) -> Result<Vec<ResolvedEntity>, NormalizeError> {
    raw.iter()
        .map(|e| {
            let slice = utf16_slice(text, e.offset, e.length).ok_or(NormalizeError::EntitySpan {
                offset: e.offset,
                length: e.length,
                text_len: text.encode_utf16().count(),
            })?;
            let mut resolved = ResolvedEntity::new(e.kind.clone(), slice);
            resolved.url = e.url.clone();
            Ok(resolved)
        })
        .collect()
}

// goły adres bez encji (np. cytat bez markupu)
static RE_BARE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:https?://[^\s<>]+|(?:^|[^\w./])(?:t|telegram)\.me/[^\s<>]+)").unwrap()
});

fn categorize_text(text: &str, resolved: &[ResolvedEntity]) -> CategorizedEntities {
    let has_url_entities = resolved
        .iter()
        .any(|e| matches!(e.kind, EntityKind::Url | EntityKind::TextLink));
    let explicit: Vec<String> = if has_url_entities {
        Vec::new()
    } else {
        RE_BARE_URL
            .find_iter(text)
            .map(|m| {
                m.as_str()
                    .trim_start_matches(|c: char| !c.is_alphanumeric())
                    .to_string()
            })
            .collect()
    };
    entities::categorize(resolved, &explicit)
}

/* ===========================
   Forward
   =========================== */

fn forward_provenance<V: ContentView + ?Sized>(v: &V) -> Option<ForwardProvenance> {
    let legacy = v.legacy_forward();
    let legacy_sig = legacy.and_then(|l| l.signature).map(str::to_string);

    if let Some(mut p) = v.forward_origin().and_then(from_origin) {
        if p.signature.is_none() {
            p.signature = legacy_sig;
        }
        return Some(p);
    }
    legacy.and_then(from_legacy)
}

fn from_origin(origin: &MessageOrigin) -> Option<ForwardProvenance> {
    match origin {
        MessageOrigin::User { sender_user, .. } => Some(ForwardProvenance {
            source_kind: ForwardSourceKind::User,
            source_id: Some(sender_user.id),
            source_name: sender_user.full_name(),
            source_username: sender_user.username.clone(),
            signature: None,
        }),
        MessageOrigin::HiddenUser {
            sender_user_name, ..
        } => Some(ForwardProvenance {
            source_kind: ForwardSourceKind::HiddenName,
            source_id: None,
            source_name: sender_user_name.clone(),
            source_username: None,
            signature: None,
        }),
        MessageOrigin::Chat {
            sender_chat,
            author_signature,
            ..
        } => Some(chat_provenance(sender_chat, author_signature.clone())),
        MessageOrigin::Channel {
            chat,
            author_signature,
            ..
        } => Some(chat_provenance(chat, author_signature.clone())),
        MessageOrigin::Unknown => None,
    }
}

fn from_legacy(l: LegacyForward<'_>) -> Option<ForwardProvenance> {
    let signature = l.signature.map(str::to_string);
    if let Some(chat) = l.from_chat {
        return Some(chat_provenance(chat, signature));
    }
    if let Some(u) = l.from {
        return Some(ForwardProvenance {
            source_kind: ForwardSourceKind::User,
            source_id: Some(u.id),
            source_name: u.full_name(),
            source_username: u.username.clone(),
            signature,
        });
    }
    l.sender_name.map(|name| ForwardProvenance {
        source_kind: ForwardSourceKind::HiddenName,
        source_id: None,
        source_name: name.to_string(),
        source_username: None,
        signature,
    })
}

fn chat_provenance(chat: &Chat, signature: Option<String>) -> ForwardProvenance {
    ForwardProvenance {
        source_kind: if chat.kind == ChatKind::Channel {
            ForwardSourceKind::Channel
        } else {
            ForwardSourceKind::Chat
        },
        source_id: Some(chat.id),
        source_name: chat.title.clone().unwrap_or_default(),
        source_username: chat.username.clone(),
        signature,
    }
}

/* ===========================
   Media
   =========================== */

pub fn describe_media(m: &MediaFields) -> MediaDescriptor {
    let present = [
        (m.photo.is_some(), MediaKind::Photo),
        (m.video.is_some(), MediaKind::Video),
        (m.document.is_some(), MediaKind::Document),
        (m.audio.is_some(), MediaKind::Audio),
        (m.voice.is_some(), MediaKind::Voice),
        (m.sticker.is_some(), MediaKind::Sticker),
        (m.animation.is_some(), MediaKind::Animation),
        (m.contact.is_some(), MediaKind::Contact),
        // venue niesie też location – liczymy je osobno
        (m.location.is_some(), MediaKind::Location),
        (m.venue.is_some(), MediaKind::Venue),
        (m.poll.is_some(), MediaKind::Poll),
        (m.dice.is_some(), MediaKind::Dice),
        (m.video_note.is_some(), MediaKind::VideoNote),
    ];
    MediaDescriptor {
        kinds: present
            .into_iter()
            .filter_map(|(has, kind)| has.then_some(kind))
            .collect(),
        contact: m.contact.clone(),
        location: m.location.or_else(|| m.venue.as_ref().map(|v| v.location)),
    }
}
