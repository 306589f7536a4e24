// src/prompt.rs
//
// Budowa treści dla wyroczni: sekcje w stałej kolejności, ten sam rekord
// daje zawsze ten sam tekst.

use crate::message::{ExternalReplyContext, ForwardSourceKind, NormalizedMessage, QuotedContext};
use crate::oracle::{OracleRequest, UsernameRequest};
use crate::risk::RiskAssessment;

/// Tekst cytowanej wiadomości jest przycinany do tylu znaków.
pub const QUOTED_TEXT_LIMIT: usize = 300;

pub const MESSAGE_SYSTEM_PROMPT: &str =
    "You are a group chat moderation assistant. You detect spam, scams and abusive content.";

pub const USERNAME_SYSTEM_PROMPT: &str =
    "You are a group chat moderation assistant. You detect abusive or promotional account names.";

const MESSAGE_CRITERIA: &str = "\
Judge the message against these criteria:
1. obvious advertising or promotion
2. scam or phishing links
3. repetitive junk
4. inappropriate content (sexual, violent, illegal)
5. aggressive marketing or invitations to other groups
6. many unrelated links or contact details
7. forwards from channels (usually advertising)
8. telegram channel/group links (t.me/, telegram.me/), usually traffic farming
A channel forward combined with a telegram link is almost always spam.
Ordinary chat replies (greetings, emoji, thanks) are not spam.

Reply with JSON only:
{\"is_violation\": true|false, \"confidence\": 0.0-1.0, \"reason\": \"short explanation\", \
\"category\": \"advertisement|scam|repetitive|inappropriate|marketing|channel_spam|other\"}";

const USERNAME_CRITERIA: &str = "\
Judge whether this account name is a violation: advertising, contact handles or links, \
sexual or hateful terms, impersonation of staff or official accounts.
Ordinary names, nicknames and emoji are fine.

Reply with JSON only:
{\"is_violation\": true|false, \"confidence\": 0.0-1.0, \"reason\": \"short explanation\", \
\"category\": \"advertisement|inappropriate|impersonation|other\"}";

/* ===========================
   Treść wiadomości
   =========================== */

pub fn build_message_content(m: &NormalizedMessage) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !m.text_content.trim().is_empty() {
        let title = if m.text_is_caption { "[MEDIA CAPTION]" } else { "[MESSAGE TEXT]" };
        parts.push(format!("{title}\n{}", m.text_content));
    }

    if let Some(f) = &m.forward {
        let mut s = String::from("[FORWARDED MESSAGE]\n");
        s.push_str(&format!("forwarded from {}", f.describe()));
        parts.push(s);
    }

    if let Some(r) = &m.reply {
        parts.push(reply_section(r));
    }
    if let Some(e) = &m.external_reply {
        parts.push(external_reply_section(e));
    }

    if !m.entities.telegram_links.is_empty() {
        parts.push(format!("[TELEGRAM LINKS]\n{}", bullet_list(&m.entities.telegram_links)));
    }
    if !m.entities.external_links.is_empty() {
        parts.push(format!("[EXTERNAL LINKS]\n{}", bullet_list(&m.entities.external_links)));
    }
    if !m.entities.mentions.is_empty() {
        parts.push(format!("[MENTIONS]\n{}", m.entities.mentions.join(", ")));
    }
    if !m.entities.hashtags.is_empty() {
        parts.push(format!("[HASHTAGS]\n{}", m.entities.hashtags.join(", ")));
    }
    if !m.entities.bot_commands.is_empty() {
        parts.push(format!("[BOT COMMANDS]\n{}", m.entities.bot_commands.join(", ")));
    }

    if m.media.has_media() {
        parts.push(format!("[MEDIA]\n{}", m.media.kinds_joined()));
        if let Some(c) = &m.media.contact {
            let name = format!("{} {}", c.first_name, c.last_name.as_deref().unwrap_or("")).trim().to_string();
            parts.push(format!("[CONTACT CARD]\nname: {name}\nphone: {}", c.phone_number));
        }
        if let Some(l) = &m.media.location {
            parts.push(format!("[LOCATION]\nlatitude: {}, longitude: {}", l.latitude, l.longitude));
        }
    }

    let buttons: Vec<String> = m
        .buttons
        .iter()
        .flatten()
        .map(|b| match &b.url {
            Some(url) => format!("{} -> {url}", b.label),
            None => b.label.clone(),
        })
        .collect();
    if !buttons.is_empty() {
        parts.push(format!("[INLINE BUTTONS]\n{}", bullet_list(&buttons)));
    }

    if m.is_media_group_member {
        parts.push("[MEDIA GROUP]\npart of an album".into());
    }
    if m.is_automatic_forward {
        parts.push("[AUTOMATIC FORWARD]\nlinked channel post forwarded to the discussion group".into());
    }
    if m.has_protected_content {
        parts.push("[PROTECTED CONTENT]\ncannot be forwarded or saved".into());
    }
    if m.is_edited {
        parts.push("[EDITED]".into());
    }

    parts.join("\n\n")
}

fn reply_section(r: &QuotedContext) -> String {
    let who = r
        .sender
        .as_ref()
        .map(|s| s.display_name.clone())
        .unwrap_or_else(|| "unknown".into());

    // odpowiedź do admina/konta systemowego: bez cytowanej treści
    if r.sender_exempt {
        return format!(
            "[REPLY]\nreplying to a trusted account (admin/system): {who}\n\
             judge ONLY the user's own reply and ignore the replied message entirely"
        );
    }

    let mut lines = vec!["[REPLY CONTEXT]".to_string()];
    match &r.sender {
        Some(s) => lines.push(format!(
            "replied user: {} (@{})",
            s.display_name,
            s.username.as_deref().unwrap_or("none")
        )),
        None => lines.push("replied user: unknown".into()),
    }
    push_quoted_details(&mut lines, r);
    lines.join("\n")
}

fn external_reply_section(e: &ExternalReplyContext) -> String {
    let mut lines = vec!["[QUOTE FROM ANOTHER CHAT]".to_string()];
    let kind = e.origin_chat_kind.map(|k| k.as_str()).unwrap_or("unknown");
    lines.push(format!(
        "origin chat: {} ({kind})",
        e.origin_chat_title.as_deref().unwrap_or("unknown")
    ));
    if e.quoted.sender_exempt {
        lines.push("quoted author is a trusted account, quoted content omitted".into());
    } else {
        push_quoted_details(&mut lines, &e.quoted);
    }
    lines.join("\n")
}

fn push_quoted_details(lines: &mut Vec<String>, q: &QuotedContext) {
    if let Some(t) = &q.text {
        lines.push(format!("replied message text:\n{}", truncate_chars(t, QUOTED_TEXT_LIMIT)));
    }
    if let Some(f) = &q.forward {
        if matches!(f.source_kind, ForwardSourceKind::Chat | ForwardSourceKind::Channel) {
            lines.push(format!("(replied message is forwarded from {})", f.describe()));
        } else {
            lines.push(format!("(replied message is a forward: {})", f.describe()));
        }
    }
    if !q.entities.telegram_links.is_empty() {
        lines.push(format!(
            "(replied message has telegram links: {})",
            first_n(&q.entities.telegram_links, 2)
        ));
    }
    if !q.entities.external_links.is_empty() {
        lines.push(format!(
            "(replied message has external links: {})",
            first_n(&q.entities.external_links, 2)
        ));
    }
    if !q.entities.mentions.is_empty() {
        lines.push(format!("(replied message mentions: {})", first_n(&q.entities.mentions, 3)));
    }
    if q.media.has_media() {
        lines.push(format!("(replied message contains: {})", q.media.kinds_joined()));
    }
    if q.button_count > 0 {
        lines.push(format!("(replied message has {} buttons)", q.button_count));
    }
}

/* ===========================
   Kontekst ryzyka i pełne prompty
   =========================== */

pub fn render_risk_context(risk: &RiskAssessment) -> String {
    let mut s = format!("risk score: {:.2}", risk.score);
    if !risk.flags.is_empty() {
        s.push_str(&format!("\nrisk flags: {}", risk.flags.join(", ")));
    }
    s
}

pub fn build_message_prompt(req: &OracleRequest) -> String {
    format!(
        "Analyze the message below and decide whether it is spam, advertising or malicious.\n\n\
         Message:\n```\n{content}\n```\n\n\
         Sender:\n- name: {sender}\n- user id: {uid}\n- new member: {new}\n\n\
         Heuristic signals (advisory):\n{risk}\n\n{criteria}",
        content = req.content,
        sender = req.sender_name,
        uid = req.sender_id,
        new = if req.is_new_member { "yes" } else { "no" },
        risk = render_risk_context(&req.risk),
        criteria = MESSAGE_CRITERIA,
    )
}

pub fn build_username_prompt(req: &UsernameRequest) -> String {
    format!(
        "A user just joined the group. Check the account name.\n\n\
         - username: {username}\n- display name: {full_name}\n- join message: {join}\n- user id: {uid}\n\n{criteria}",
        username = req.username.as_deref().filter(|u| !u.is_empty()).unwrap_or("none"),
        full_name = if req.full_name.is_empty() { "unknown" } else { req.full_name.as_str() },
        join = req.join_message.as_deref().unwrap_or(""),
        uid = req.user_id,
        criteria = USERNAME_CRITERIA,
    )
}

/* ===========================
   Drobiazgi
   =========================== */

fn bullet_list(items: &[String]) -> String {
    items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
}

fn first_n(items: &[String], n: usize) -> String {
    items.iter().take(n).cloned().collect::<Vec<_>>().join(", ")
}

/// Przycina po znakach (nie bajtach) i dokleja `...`.
pub fn truncate_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let mut out: String = s.chars().take(limit).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Exemptions, normalize};
    use crate::telegram::Message;

    fn norm(json: &str) -> NormalizedMessage {
        let m: Message = serde_json::from_str(json).unwrap();
        normalize(&m, &Exemptions::new([1], [777000]))
    }

    #[test]
    fn reply_to_trusted_account_hides_quoted_text() {
        let n = norm(
            r#"{"message_id": 2, "from": {"id": 9, "first_name": "U"}, "text": "👍",
                "reply_to_message": {"message_id": 1, "from": {"id": 1, "first_name": "Admin"},
                    "text": "ZAPISY t.me/promo/77 kup teraz"}}"#,
        );
        let c = build_message_content(&n);
        assert!(c.contains("trusted account"));
        assert!(!c.contains("ZAPISY"));
        assert!(!c.contains("t.me/promo/77"));
    }

    #[test]
    fn reply_to_regular_user_includes_truncated_context() {
        let long = "x".repeat(400);
        let n = norm(&format!(
            r#"{{"message_id": 2, "from": {{"id": 9, "first_name": "U"}}, "text": "tak",
                "reply_to_message": {{"message_id": 1, "from": {{"id": 5, "first_name": "Jan", "username": "jan"}},
                    "text": "{long}"}}}}"#
        ));
        let c = build_message_content(&n);
        assert!(c.contains("[REPLY CONTEXT]"));
        assert!(c.contains("@jan"));
        assert!(c.contains(&format!("{}...", "x".repeat(300))));
        assert!(!c.contains(&"x".repeat(301)));
    }

    #[test]
    fn sections_follow_fixed_order() {
        let n = norm(
            r#"{"message_id": 2, "text": "hej @ala #promo https://a.b",
                "entities": [
                    {"type": "mention", "offset": 4, "length": 4},
                    {"type": "hashtag", "offset": 9, "length": 6},
                    {"type": "url", "offset": 16, "length": 11}
                ],
                "forward_origin": {"type": "hidden_user", "date": 1, "sender_user_name": "Anon"},
                "reply_markup": {"inline_keyboard": [[{"text": "Kup", "url": "https://shop"}]]},
                "has_protected_content": true}"#,
        );
        let c = build_message_content(&n);
        let order = [
            "[MESSAGE TEXT]",
            "[FORWARDED MESSAGE]",
            "[EXTERNAL LINKS]",
            "[MENTIONS]",
            "[HASHTAGS]",
            "[INLINE BUTTONS]",
            "[PROTECTED CONTENT]",
        ];
        let positions: Vec<usize> = order.iter().map(|h| c.find(h).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{c}");
        assert!(c.contains("Kup -> https://shop"));
    }

    #[test]
    fn risk_context_format() {
        let r = RiskAssessment {
            score: 0.5,
            flags: vec!["a".into(), "b".into()],
            signals: Vec::new(),
        };
        assert_eq!(render_risk_context(&r), "risk score: 0.50\nrisk flags: a, b");
    }

    #[test]
    fn truncation_counts_chars() {
        assert_eq!(truncate_chars("żółw", 2), "żó...");
        assert_eq!(truncate_chars("ab", 2), "ab");
    }
}
