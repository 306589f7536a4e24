// src/textguard.rs
//
// Wykrywanie zaciemniania tekstu. Heurystyki są czysto składniowe/statystyczne,
// sumują się addytywnie i każda ma własny limit wagi.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;

use crate::entities::{EntityKind, ResolvedEntity};

/* ===========================
   Wagi i progi
   =========================== */

const W_ZERO_WIDTH: f64 = 0.60;
const W_BIDI: f64 = 0.45;
const W_CONTROL: f64 = 0.30;
const W_COMBINING: f64 = 0.30;
const W_DECORATIVE: f64 = 0.20;
const W_REPEAT: f64 = 0.15;
const W_HIDDEN_FORMATTING: f64 = 0.25;
const W_HEAVY_FORMATTING: f64 = 0.15;
const W_MIXED_FORMATTING: f64 = 0.10;

const CONTROL_MAX: usize = 3;
const COMBINING_MAX_RATIO: f64 = 0.10;
const DECORATIVE_MAX_RATIO: f64 = 0.15;
const FORMATTED_MAX_RATIO: f64 = 0.50;
const MIXED_FORMATTING_KINDS: usize = 3;
const REPEAT_MIN_RUNS: usize = 5;
/// Skan powtórzeń tylko na początku długich tekstów.
const REPEAT_SCAN_CHARS: usize = 4096;

pub const FLAG_ZERO_WIDTH: &str = "zero-width character hiding";
pub const FLAG_BIDI: &str = "bidirectional text override";
pub const FLAG_CONTROL: &str = "control characters";
pub const FLAG_COMBINING: &str = "combining mark stacking";
pub const FLAG_DECORATIVE: &str = "decorative symbol density";
pub const FLAG_REPEAT: &str = "repeated pattern flood";
pub const FLAG_HIDDEN_FORMATTING: &str = "hidden formatting";
pub const FLAG_HEAVY_FORMATTING: &str = "heavy formatting coverage";
pub const FLAG_MIXED_FORMATTING: &str = "mixed formatting kinds";

const ZERO_WIDTH: [char; 6] = [
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{180E}',
];

const BIDI_MARKS: [char; 11] = [
    '\u{202A}', '\u{202B}', '\u{202C}', '\u{202D}', '\u{202E}', '\u{2066}', '\u{2067}',
    '\u{2068}', '\u{2069}', '\u{200E}', '\u{200F}',
];

const DECORATIVE: &[char] = &[
    '★', '☆', '✦', '✧', '✩', '✪', '✫', '✬', '✭', '✮', '✯', '✰', '❤', '♥', '♡', '❥', '✿', '❀',
    '❁', '✾', '➤', '➔', '⇨', '▶', '►', '◆', '◇', '■', '□', '●', '○', '◉', '♦', '♠', '♣', '✔',
    '✅', '✨', '⚡', '🔥', '💰', '💎', '👉', '👇', '📢', '🎁', '💯', '🚀', '⭐', '🌟', '〓', '▪',
    '▫', '※', '彡', 'ღ', '☞', '☛', '✈', '☎', '✆',
];

/* ===========================
   Wynik
   =========================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextAnomaly {
    pub has_formatting: bool,
    pub formatting_kinds: BTreeSet<EntityKind>,
    /// Prawda wtedy i tylko wtedy, gdy wystąpiło formatowanie wysokiego ryzyka.
    pub has_hidden_content: bool,
    /// Opisy z liczbami (do logów / promptu).
    pub issues: Vec<String>,
    pub risk_score: f64,
    pub risk_flags: Vec<String>,
}

impl TextAnomaly {
    pub fn flags(&self) -> &[String] {
        &self.risk_flags
    }

    pub fn density_score(&self) -> f64 {
        self.risk_score
    }

    pub fn is_clean(&self) -> bool {
        self.risk_flags.is_empty()
    }

    fn hit(&mut self, weight: f64, flag: &str, issue: String) {
        self.risk_score += weight;
        self.risk_flags.push(flag.to_string());
        self.issues.push(issue);
    }
}

/* ===========================
   Analiza
   =========================== */

pub fn analyze(text: &str, entities: &[ResolvedEntity]) -> TextAnomaly {
    let mut out = TextAnomaly::default();
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    if total > 0 {
        let zw = chars.iter().filter(|c| ZERO_WIDTH.contains(*c)).count();
        if zw > 0 {
            out.hit(W_ZERO_WIDTH, FLAG_ZERO_WIDTH, format!("{zw} zero-width characters"));
        }

        let bidi = chars.iter().filter(|c| BIDI_MARKS.contains(*c)).count();
        if bidi > 0 {
            out.hit(W_BIDI, FLAG_BIDI, format!("{bidi} bidirectional override marks"));
        }

        let control = chars
            .iter()
            .filter(|c| c.is_control() && !matches!(**c, '\n' | '\r' | '\t'))
            .count();
        if control > CONTROL_MAX {
            out.hit(W_CONTROL, FLAG_CONTROL, format!("{control} control characters"));
        }

        let combining = chars.iter().filter(|c| is_combining_mark(**c)).count();
        let combining_ratio = combining as f64 / total as f64;
        if combining_ratio > COMBINING_MAX_RATIO {
            out.hit(
                W_COMBINING,
                FLAG_COMBINING,
                format!("combining marks {:.0}% of text", combining_ratio * 100.0),
            );
        }

        let decorative = chars.iter().filter(|c| DECORATIVE.contains(*c)).count();
        let decorative_ratio = decorative as f64 / total as f64;
        if decorative_ratio > DECORATIVE_MAX_RATIO {
            out.hit(
                W_DECORATIVE,
                FLAG_DECORATIVE,
                format!("decorative symbols {:.0}% of text", decorative_ratio * 100.0),
            );
        }

        if let Some(pattern) = find_repeated_pattern(&chars) {
            out.hit(W_REPEAT, FLAG_REPEAT, format!("pattern {pattern:?} repeated"));
        }
    }

    analyze_formatting(&mut out, text, entities);

    out.risk_score = out.risk_score.clamp(0.0, 1.0);
    out
}

fn analyze_formatting(out: &mut TextAnomaly, text: &str, entities: &[ResolvedEntity]) {
    let formatting: Vec<&ResolvedEntity> =
        entities.iter().filter(|e| e.kind.is_formatting()).collect();
    if formatting.is_empty() {
        return;
    }

    out.has_formatting = true;
    out.formatting_kinds = formatting.iter().map(|e| e.kind.clone()).collect();

    let hidden: BTreeSet<&'static str> = formatting
        .iter()
        .filter(|e| e.kind.is_high_risk_formatting())
        .map(|e| e.kind.as_str())
        .collect();
    if !hidden.is_empty() {
        out.has_hidden_content = true;
        let kinds = hidden.into_iter().collect::<Vec<_>>().join(", ");
        out.hit(W_HIDDEN_FORMATTING, FLAG_HIDDEN_FORMATTING, format!("hidden formatting: {kinds}"));
    }

    // długości encji liczone w UTF-16, więc tekst też
    let text_len = text.encode_utf16().count();
    if text_len > 0 {
        let formatted: usize = formatting.iter().map(|e| e.utf16_len).sum();
        let ratio = formatted as f64 / text_len as f64;
        if ratio > FORMATTED_MAX_RATIO {
            out.hit(
                W_HEAVY_FORMATTING,
                FLAG_HEAVY_FORMATTING,
                format!("formatting covers {:.0}% of text", ratio.min(1.0) * 100.0),
            );
        }
    }

    let kinds = out.formatting_kinds.len();
    if kinds >= MIXED_FORMATTING_KINDS {
        out.hit(W_MIXED_FORMATTING, FLAG_MIXED_FORMATTING, format!("{kinds} formatting kinds"));
    }
}

/// Krótki wzorzec (1–3 znaki) powtórzony co najmniej 5 razy pod rząd.
fn find_repeated_pattern(chars: &[char]) -> Option<String> {
    let chars = &chars[..chars.len().min(REPEAT_SCAN_CHARS)];
    let n = chars.len();
    for len in 1..=3usize {
        if n < len * REPEAT_MIN_RUNS {
            break;
        }
        let mut start = 0;
        while start + len * REPEAT_MIN_RUNS <= n {
            let unit = &chars[start..start + len];
            if unit.iter().all(|c| c.is_whitespace()) {
                start += 1;
                continue;
            }
            let mut runs = 1;
            let mut pos = start + len;
            while pos + len <= n && &chars[pos..pos + len] == unit {
                runs += 1;
                pos += len;
            }
            if runs >= REPEAT_MIN_RUNS {
                return Some(unit.iter().collect());
            }
            start += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn clean_text_has_no_flags() {
        let a = analyze("Cześć wszystkim, ktoś wie jak to naprawić?", &[]);
        assert!(a.is_clean());
        assert_eq!(a.risk_score, 0.0);
        assert!(!a.has_formatting);
    }

    #[test]
    fn zero_width_dominates() {
        let a = analyze("ad\u{200B}d m\u{200C}e na\u{200D}w", &[]);
        assert!(a.flags().iter().any(|f| f == FLAG_ZERO_WIDTH));
        assert!(a.risk_score >= 0.4);
        assert!(a.issues[0].starts_with("3 "));
    }

    #[test]
    fn bidi_and_control_chars() {
        let a = analyze("abc\u{202E}cba\u{0001}\u{0002}\u{0003}\u{0004}", &[]);
        assert!(a.flags().iter().any(|f| f == FLAG_BIDI));
        assert!(a.flags().iter().any(|f| f == FLAG_CONTROL));

        // trzy znaki sterujące to jeszcze norma
        let b = analyze("abc\u{0001}\u{0002}\u{0003}", &[]);
        assert!(!b.flags().iter().any(|f| f == FLAG_CONTROL));
    }

    #[test]
    fn combining_stacking_detected() {
        let a = analyze("s\u{0301}\u{0302}\u{0303}pam", &[]);
        assert!(a.flags().iter().any(|f| f == FLAG_COMBINING));
    }

    #[test]
    fn decorative_density_detected() {
        let a = analyze("🔥🔥 HOT 💰💰 deal ✨", &[]);
        assert!(a.flags().iter().any(|f| f == FLAG_DECORATIVE));
    }

    #[test]
    fn repeated_pattern_needs_five_runs() {
        assert_eq!(find_repeated_pattern(&"hahahahaha".chars().collect::<Vec<_>>()), Some("ha".into()));
        assert_eq!(find_repeated_pattern(&"!!!!".chars().collect::<Vec<_>>()), None);
        assert_eq!(find_repeated_pattern(&"a     b".chars().collect::<Vec<_>>()), None);
        assert_eq!(find_repeated_pattern(&"abcabcabcabcabc".chars().collect::<Vec<_>>()), Some("abc".into()));
    }

    #[test]
    fn hidden_formatting_sets_flag_and_weights() {
        let text = "kliknij tutaj teraz";
        let entities = vec![
            ResolvedEntity::new(EntityKind::TextLink, "kliknij tutaj teraz").with_url("https://t.me/x"),
            ResolvedEntity::new(EntityKind::Bold, "kliknij"),
            ResolvedEntity::new(EntityKind::Italic, "teraz"),
        ];
        let a = analyze(text, &entities);
        assert!(a.has_formatting);
        assert!(a.has_hidden_content);
        assert_eq!(a.formatting_kinds.len(), 3);
        for f in [FLAG_HIDDEN_FORMATTING, FLAG_HEAVY_FORMATTING, FLAG_MIXED_FORMATTING] {
            assert!(a.flags().iter().any(|x| x == f), "missing {f}");
        }
        assert!((a.risk_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn plain_formatting_is_not_hidden() {
        let a = analyze("ważne ogłoszenie dla grupy", &[ResolvedEntity::new(EntityKind::Bold, "ważne")]);
        assert!(a.has_formatting);
        assert!(!a.has_hidden_content);
        assert!(a.is_clean());
    }

    proptest! {
        #[test]
        fn score_is_bounded(s in "\\PC{0,64}", zw in 0usize..10) {
            let mut text = s.clone();
            for _ in 0..zw { text.push('\u{200B}'); text.push('\u{202E}'); text.push('\u{0001}'); }
            let a = analyze(&text, &[]);
            prop_assert!(a.risk_score >= 0.0 && a.risk_score <= 1.0);
        }
    }
}
