// src/telegram.rs
//
// Model przewodowy wiadomości Telegram (podzbiór Bot API) + interfejsy,
// przez które normalizator czyta wiadomość. Wszystkie pola są opcjonalne
// albo mają wartości domyślne – brak pola nigdy nie jest błędem.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::entities::EntityKind;

/* ===========================
   Użytkownicy i czaty
   =========================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

impl User {
    pub fn full_name(&self) -> String {
        match self.last_name.as_deref() {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last).trim().to_string(),
            _ => self.first_name.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
            ChatKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub title: Option<String>,
    pub username: Option<String>,
}

/* ===========================
   Encje, przyciski, cytaty
   =========================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Offset w jednostkach UTF-16.
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub length: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub url: Option<String>,
    pub callback_data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

/// Fragment cytowanej wiadomości (przy odpowiedziach między czatami).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextQuote {
    pub text: String,
    pub entities: Vec<MessageEntity>,
}

/* ===========================
   Pochodzenie (forward / external reply)
   =========================== */

/// Nowy, zunifikowany opis pochodzenia wiadomości.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageOrigin {
    User {
        #[serde(default)]
        date: i64,
        sender_user: User,
    },
    HiddenUser {
        #[serde(default)]
        date: i64,
        sender_user_name: String,
    },
    Chat {
        #[serde(default)]
        date: i64,
        sender_chat: Chat,
        #[serde(default)]
        author_signature: Option<String>,
    },
    Channel {
        #[serde(default)]
        date: i64,
        chat: Chat,
        #[serde(default)]
        message_id: Option<i64>,
        #[serde(default)]
        author_signature: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Stary, płaski zestaw pól forwardu.
#[derive(Debug, Clone, Copy)]
pub struct LegacyForward<'a> {
    pub from: Option<&'a User>,
    pub from_chat: Option<&'a Chat>,
    pub sender_name: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub date: Option<i64>,
}

impl LegacyForward<'_> {
    pub fn is_present(&self) -> bool {
        self.from.is_some() || self.from_chat.is_some() || self.sender_name.is_some() || self.date.is_some()
    }
}

/* ===========================
   Media
   =========================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub phone_number: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Venue {
    pub location: Location,
    pub title: String,
    pub address: String,
}

/// Pola mediów wspólne dla wiadomości i cytatu z innego czatu.
/// Szczegóły plików nas nie interesują – liczy się obecność.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaFields {
    pub photo: Option<JsonValue>,
    pub video: Option<JsonValue>,
    pub document: Option<JsonValue>,
    pub audio: Option<JsonValue>,
    pub voice: Option<JsonValue>,
    pub sticker: Option<JsonValue>,
    pub animation: Option<JsonValue>,
    pub video_note: Option<JsonValue>,
    pub contact: Option<Contact>,
    pub location: Option<Location>,
    pub venue: Option<Venue>,
    pub poll: Option<JsonValue>,
    pub dice: Option<JsonValue>,
}

/* ===========================
   Wiadomość
   =========================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalReplyInfo {
    pub origin: Option<MessageOrigin>,
    pub chat: Option<Chat>,
    pub message_id: Option<i64>,
    #[serde(flatten)]
    pub media: MediaFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub message_id: i64,
    pub date: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub sender_chat: Option<Chat>,

    pub text: Option<String>,
    pub entities: Vec<MessageEntity>,
    pub caption: Option<String>,
    pub caption_entities: Vec<MessageEntity>,

    pub forward_from: Option<User>,
    pub forward_from_chat: Option<Chat>,
    pub forward_from_message_id: Option<i64>,
    pub forward_signature: Option<String>,
    pub forward_sender_name: Option<String>,
    pub forward_date: Option<i64>,
    pub forward_origin: Option<MessageOrigin>,
    pub is_automatic_forward: bool,

    pub reply_to_message: Option<Box<Message>>,
    pub external_reply: Option<ExternalReplyInfo>,
    pub quote: Option<TextQuote>,

    pub reply_markup: Option<InlineKeyboardMarkup>,
    pub media_group_id: Option<String>,
    pub has_protected_content: bool,
    pub edit_date: Option<i64>,

    #[serde(flatten)]
    pub media: MediaFields,

    pub new_chat_members: Option<Vec<User>>,
}

/* ===========================
   Interfejsy odczytu
   =========================== */

/// Wąski interfejs treści: wspólny dla wiadomości, wiadomości, na którą
/// ktoś odpowiada, i cytatu z innego czatu.
pub trait ContentView {
    fn message_id(&self) -> Option<i64>;
    fn sender(&self) -> Option<&User>;
    fn sender_chat(&self) -> Option<&Chat>;
    fn text(&self) -> Option<&str>;
    fn text_entities(&self) -> &[MessageEntity];
    fn caption(&self) -> Option<&str>;
    fn caption_entities(&self) -> &[MessageEntity];
    fn media(&self) -> &MediaFields;
    fn legacy_forward(&self) -> Option<LegacyForward<'_>>;
    fn forward_origin(&self) -> Option<&MessageOrigin>;
    fn buttons(&self) -> Option<&InlineKeyboardMarkup>;
}

/// Pełna wiadomość przychodząca (z kontekstem odpowiedzi).
pub trait RawMessage: ContentView {
    fn date(&self) -> i64;
    fn chat(&self) -> Option<&Chat>;
    fn reply_to(&self) -> Option<&dyn ContentView>;
    fn external_reply(&self) -> Option<ExternalQuote<'_>>;
    fn media_group_id(&self) -> Option<&str>;
    fn is_automatic_forward(&self) -> bool;
    fn has_protected_content(&self) -> bool;
    fn edit_date(&self) -> Option<i64>;
    fn new_chat_members(&self) -> &[User];
}

impl ContentView for Message {
    fn message_id(&self) -> Option<i64> {
        Some(self.message_id)
    }
    fn sender(&self) -> Option<&User> {
        self.from.as_ref()
    }
    fn sender_chat(&self) -> Option<&Chat> {
        self.sender_chat.as_ref()
    }
    fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
    fn text_entities(&self) -> &[MessageEntity] {
        &self.entities
    }
    fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }
    fn caption_entities(&self) -> &[MessageEntity] {
        &self.caption_entities
    }
    fn media(&self) -> &MediaFields {
        &self.media
    }
    fn legacy_forward(&self) -> Option<LegacyForward<'_>> {
        let fwd = LegacyForward {
            from: self.forward_from.as_ref(),
            from_chat: self.forward_from_chat.as_ref(),
            sender_name: self.forward_sender_name.as_deref(),
            signature: self.forward_signature.as_deref(),
            date: self.forward_date,
        };
        fwd.is_present().then_some(fwd)
    }
    fn forward_origin(&self) -> Option<&MessageOrigin> {
        self.forward_origin.as_ref()
    }
    fn buttons(&self) -> Option<&InlineKeyboardMarkup> {
        self.reply_markup.as_ref()
    }
}

impl RawMessage for Message {
    fn date(&self) -> i64 {
        self.date
    }
    fn chat(&self) -> Option<&Chat> {
        Some(&self.chat)
    }
    fn reply_to(&self) -> Option<&dyn ContentView> {
        self.reply_to_message
            .as_deref()
            .map(|m| m as &dyn ContentView)
    }
    fn external_reply(&self) -> Option<ExternalQuote<'_>> {
        self.external_reply.as_ref().map(|info| ExternalQuote {
            info,
            quote: self.quote.as_ref(),
        })
    }
    fn media_group_id(&self) -> Option<&str> {
        self.media_group_id.as_deref()
    }
    fn is_automatic_forward(&self) -> bool {
        self.is_automatic_forward
    }
    fn has_protected_content(&self) -> bool {
        self.has_protected_content
    }
    fn edit_date(&self) -> Option<i64> {
        self.edit_date
    }
    fn new_chat_members(&self) -> &[User] {
        self.new_chat_members.as_deref().unwrap_or(&[])
    }
}

/// Adapter: cytat z innego czatu. Dane są rozbite między `external_reply`
/// (pochodzenie, media) a `quote` (tekst i encje cytowanego fragmentu).
#[derive(Debug, Clone, Copy)]
pub struct ExternalQuote<'a> {
    pub info: &'a ExternalReplyInfo,
    pub quote: Option<&'a TextQuote>,
}

impl ExternalQuote<'_> {
    /// Typ czatu, z którego pochodzi cytat.
    pub fn origin_chat_kind(&self) -> Option<ChatKind> {
        if let Some(chat) = &self.info.chat {
            return Some(chat.kind);
        }
        match &self.info.origin {
            Some(MessageOrigin::Channel { chat, .. }) => Some(chat.kind),
            Some(MessageOrigin::Chat { sender_chat, .. }) => Some(sender_chat.kind),
            _ => None,
        }
    }

    pub fn origin_chat(&self) -> Option<&Chat> {
        self.info.chat.as_ref().or(match &self.info.origin {
            Some(MessageOrigin::Channel { chat, .. }) => Some(chat),
            Some(MessageOrigin::Chat { sender_chat, .. }) => Some(sender_chat),
            _ => None,
        })
    }
}

impl ContentView for ExternalQuote<'_> {
    fn message_id(&self) -> Option<i64> {
        self.info.message_id
    }
    fn sender(&self) -> Option<&User> {
        match &self.info.origin {
            Some(MessageOrigin::User { sender_user, .. }) => Some(sender_user),
            _ => None,
        }
    }
    fn sender_chat(&self) -> Option<&Chat> {
        self.origin_chat()
    }
    fn text(&self) -> Option<&str> {
        self.quote.map(|q| q.text.as_str()).filter(|t| !t.is_empty())
    }
    fn text_entities(&self) -> &[MessageEntity] {
        self.quote.map(|q| q.entities.as_slice()).unwrap_or(&[])
    }
    fn caption(&self) -> Option<&str> {
        None
    }
    fn caption_entities(&self) -> &[MessageEntity] {
        &[]
    }
    fn media(&self) -> &MediaFields {
        &self.info.media
    }
    fn legacy_forward(&self) -> Option<LegacyForward<'_>> {
        None
    }
    fn forward_origin(&self) -> Option<&MessageOrigin> {
        self.info.origin.as_ref()
    }
    fn buttons(&self) -> Option<&InlineKeyboardMarkup> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_message_deserializes() {
        let m: Message = serde_json::from_str(r#"{"message_id": 5, "text": "hej"}"#).unwrap();
        assert_eq!(m.message_id, 5);
        assert_eq!(m.chat.kind, ChatKind::Unknown);
        assert!(m.from.is_none());
        assert!(m.legacy_forward().is_none());
    }

    #[test]
    fn origin_and_unknown_entity_kinds() {
        let m: Message = serde_json::from_str(
            r#"{
                "message_id": 1,
                "chat": {"id": -100, "type": "supergroup", "title": "g"},
                "text": "x",
                "entities": [{"type": "date_time", "offset": 0, "length": 1}],
                "forward_origin": {"type": "channel", "date": 1, "chat": {"id": -200, "type": "channel", "title": "ch"}, "message_id": 9}
            }"#,
        )
        .unwrap();
        assert_eq!(m.entities[0].kind, EntityKind::Other);
        assert!(matches!(m.forward_origin, Some(MessageOrigin::Channel { .. })));
    }

    #[test]
    fn external_quote_reads_origin_chat_kind() {
        let m: Message = serde_json::from_str(
            r#"{
                "message_id": 1,
                "external_reply": {
                    "origin": {"type": "channel", "date": 1, "chat": {"id": -5, "type": "channel", "title": "promo"}},
                    "photo": [{"file_id": "a"}]
                },
                "quote": {"text": "wejdź na t.me/promo/1"}
            }"#,
        )
        .unwrap();
        let ext = m.external_reply().unwrap();
        assert_eq!(ext.origin_chat_kind(), Some(ChatKind::Channel));
        assert_eq!(ext.text(), Some("wejdź na t.me/promo/1"));
        assert!(ext.media().photo.is_some());
    }
}
