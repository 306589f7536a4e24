// src/entities.rs

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/* ===========================
   Typy encji
   =========================== */

/// Rodzaj encji z markupu wiadomości (nazwy jak w Bot API).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Mention,
    Hashtag,
    Cashtag,
    BotCommand,
    Url,
    Email,
    PhoneNumber,
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Spoiler,
    Blockquote,
    ExpandableBlockquote,
    Code,
    Pre,
    TextLink,
    TextMention,
    CustomEmoji,
    #[serde(other)]
    Other,
}

impl EntityKind {
    /// Encje, które zmieniają wygląd tekstu (a nie oznaczają linku/wzmianki).
    pub fn is_formatting(&self) -> bool {
        matches!(
            self,
            EntityKind::Bold
                | EntityKind::Italic
                | EntityKind::Underline
                | EntityKind::Strikethrough
                | EntityKind::Spoiler
                | EntityKind::Blockquote
                | EntityKind::ExpandableBlockquote
                | EntityKind::Code
                | EntityKind::Pre
                | EntityKind::TextLink
                | EntityKind::TextMention
                | EntityKind::CustomEmoji
        )
    }

    /// Formatowanie ukrywające treść: ukryty link, ukryta wzmianka, spoiler, custom emoji.
    pub fn is_high_risk_formatting(&self) -> bool {
        matches!(
            self,
            EntityKind::TextLink
                | EntityKind::TextMention
                | EntityKind::Spoiler
                | EntityKind::CustomEmoji
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Mention => "mention",
            EntityKind::Hashtag => "hashtag",
            EntityKind::Cashtag => "cashtag",
            EntityKind::BotCommand => "bot_command",
            EntityKind::Url => "url",
            EntityKind::Email => "email",
            EntityKind::PhoneNumber => "phone_number",
            EntityKind::Bold => "bold",
            EntityKind::Italic => "italic",
            EntityKind::Underline => "underline",
            EntityKind::Strikethrough => "strikethrough",
            EntityKind::Spoiler => "spoiler",
            EntityKind::Blockquote => "blockquote",
            EntityKind::ExpandableBlockquote => "expandable_blockquote",
            EntityKind::Code => "code",
            EntityKind::Pre => "pre",
            EntityKind::TextLink => "text_link",
            EntityKind::TextMention => "text_mention",
            EntityKind::CustomEmoji => "custom_emoji",
            EntityKind::Other => "other",
        }
    }
}

/// Encja już rozwiązana do podciągu (offsety przeliczone wcześniej).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub kind: EntityKind,
    /// Fragment tekstu objęty encją.
    pub text: String,
    /// Docelowy URL dla `text_link`.
    pub url: Option<String>,
    /// Długość w jednostkach UTF-16 (tak liczy platforma).
    pub utf16_len: usize,
}

impl ResolvedEntity {
    pub fn new(kind: EntityKind, text: impl Into<String>) -> Self {
        let text = text.into();
        let utf16_len = text.encode_utf16().count();
        Self { kind, text, url: None, utf16_len }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkCategory {
    TelegramChannelLink,
    EmbeddedChannelPreview,
    ExternalLink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorizedLink {
    pub category: LinkCategory,
    pub raw: String,
}

/// Wynik kategoryzacji – pięć kubełków (+ komendy bota).
/// `embedded_channel_links` to podzbiór `telegram_links`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorizedEntities {
    pub telegram_links: Vec<String>,
    pub embedded_channel_links: Vec<String>,
    pub external_links: Vec<String>,
    pub mentions: Vec<String>,
    pub hashtags: Vec<String>,
    pub bot_commands: Vec<String>,
}

impl CategorizedEntities {
    /// Linki telegramowe, które NIE renderują podglądu posta.
    pub fn plain_telegram_links(&self) -> impl Iterator<Item = &String> {
        self.telegram_links
            .iter()
            .filter(|l| !self.embedded_channel_links.contains(l))
    }

    /// Płaska lista linków z kategorią (do rekordu znormalizowanego).
    pub fn links(&self) -> Vec<CategorizedLink> {
        let mut out = Vec::with_capacity(self.telegram_links.len() + self.external_links.len());
        for l in &self.telegram_links {
            let category = if self.embedded_channel_links.contains(l) {
                LinkCategory::EmbeddedChannelPreview
            } else {
                LinkCategory::TelegramChannelLink
            };
            out.push(CategorizedLink { category, raw: l.clone() });
        }
        for l in &self.external_links {
            out.push(CategorizedLink {
                category: LinkCategory::ExternalLink,
                raw: l.clone(),
            });
        }
        out
    }
}

/* ===========================
   Kategoryzacja
   =========================== */

const TELEGRAM_DOMAINS: [&str; 2] = ["t.me/", "telegram.me/"];

// t.me/<kanał>/<id> albo t.me/c/<id>/<id> (post z podglądem)
static RE_EMBEDDED_POST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:^|[/.@\s])(?:t|telegram)\.me/(?:c/\d+/\d+|[a-z0-9_]{3,}/\d+)(?:[/?#\s]|$)",
    )
    .unwrap()
});

pub fn is_telegram_link(url: &str) -> bool {
    let lower = url.to_lowercase();
    TELEGRAM_DOMAINS.iter().any(|d| lower.contains(d))
}

pub fn is_embedded_channel_link(url: &str) -> bool {
    is_telegram_link(url) && RE_EMBEDDED_POST.is_match(url)
}

/// Jeden przebieg po encjach. Tylko składnia – bez rozwiązywania adresów.
pub fn categorize(entities: &[ResolvedEntity], explicit_urls: &[String]) -> CategorizedEntities {
    let mut out = CategorizedEntities::default();

    for e in entities {
        match e.kind {
            EntityKind::Url | EntityKind::TextLink => {
                let url = e
                    .url
                    .as_deref()
                    .filter(|u| !u.is_empty())
                    .unwrap_or(e.text.as_str());
                push_link(&mut out, url);
            }
            EntityKind::Mention => out.mentions.push(e.text.clone()),
            EntityKind::Hashtag => out.hashtags.push(e.text.clone()),
            EntityKind::BotCommand => out.bot_commands.push(e.text.clone()),
            _ => {}
        }
    }

    for url in explicit_urls {
        push_link(&mut out, url);
    }

    out
}

fn push_link(out: &mut CategorizedEntities, url: &str) {
    let url = url.trim();
    if url.is_empty() {
        return;
    }
    if is_telegram_link(url) {
        out.telegram_links.push(url.to_string());
        if RE_EMBEDDED_POST.is_match(url) {
            out.embedded_channel_links.push(url.to_string());
        }
    } else {
        out.external_links.push(url.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> ResolvedEntity {
        ResolvedEntity::new(EntityKind::Url, s)
    }

    #[test]
    fn embedded_post_links_are_subset_of_telegram_links() {
        let cat = categorize(
            &[
                url("t.me/spamchannel/123"),
                url("https://t.me/c/1234567/89"),
                url("https://t.me/spamchannel"),
                url("https://example.com/a/1"),
            ],
            &[],
        );
        assert_eq!(cat.telegram_links.len(), 3);
        assert_eq!(
            cat.embedded_channel_links,
            vec!["t.me/spamchannel/123".to_string(), "https://t.me/c/1234567/89".to_string()]
        );
        assert_eq!(cat.external_links, vec!["https://example.com/a/1".to_string()]);
        assert_eq!(cat.plain_telegram_links().count(), 1);
    }

    #[test]
    fn domain_match_is_case_insensitive() {
        assert!(is_telegram_link("HTTPS://T.ME/Joinchat"));
        assert!(is_telegram_link("telegram.me/foo"));
        assert!(is_embedded_channel_link("https://Telegram.ME/SomeChannel/42"));
        assert!(!is_embedded_channel_link("https://t.me/joinchat"));
    }

    #[test]
    fn text_link_prefers_hidden_url() {
        let e = ResolvedEntity::new(EntityKind::TextLink, "kliknij").with_url("https://t.me/x_chan/7");
        let cat = categorize(&[e], &[]);
        assert_eq!(cat.telegram_links, vec!["https://t.me/x_chan/7".to_string()]);
        assert_eq!(cat.embedded_channel_links.len(), 1);
    }

    #[test]
    fn malformed_urls_do_not_fail() {
        let cat = categorize(&[url("http://"), url("::::t.me/"), url("")], &["%%%".into()]);
        assert_eq!(cat.telegram_links, vec!["::::t.me/".to_string()]);
        assert!(cat.embedded_channel_links.is_empty());
        assert_eq!(cat.external_links, vec!["http://".to_string(), "%%%".to_string()]);
    }

    #[test]
    fn mentions_and_hashtags_keep_order_and_duplicates() {
        let cat = categorize(
            &[
                ResolvedEntity::new(EntityKind::Mention, "@a"),
                ResolvedEntity::new(EntityKind::Hashtag, "#x"),
                ResolvedEntity::new(EntityKind::Mention, "@a"),
                ResolvedEntity::new(EntityKind::BotCommand, "/start"),
            ],
            &[],
        );
        assert_eq!(cat.mentions, vec!["@a".to_string(), "@a".to_string()]);
        assert_eq!(cat.hashtags, vec!["#x".to_string()]);
        assert_eq!(cat.bot_commands, vec!["/start".to_string()]);
    }
}
