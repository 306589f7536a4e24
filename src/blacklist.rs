// src/blacklist.rs
//
// Lokalna czarna lista nazw (join events). Reguły to dane: wzorzec + powód,
// kompilowane raz do niezmiennego zestawu.
// Wzorzec: "token" (granice słów) albo "/regex/flags" (flags: i, m, s).

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use unicode_normalization::UnicodeNormalization;

const MAX_REGEX_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("empty pattern")]
    Empty,
    #[error("regex pattern too long ({0} > {MAX_REGEX_LEN})")]
    TooLong(usize),
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
}

/// Reguła w postaci konfiguracyjnej.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub pattern: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Token,
    Regex,
}

#[derive(Debug, Clone)]
struct NameRule {
    kind: RuleKind,
    pattern: String,
    compiled: Regex,
    reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistHit {
    pub pattern: String,
    pub reason: String,
    /// Nazwa (przed normalizacją), która trafiła.
    pub matched_name: String,
}

/* ===========================
   Zestaw reguł
   =========================== */

#[derive(Debug, Clone, Default)]
pub struct BlacklistRules {
    rules: Vec<NameRule>,
}

impl BlacklistRules {
    /// Błędne reguły są logowane i pomijane – reszta działa.
    pub fn compile(specs: &[RuleSpec]) -> Self {
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            match NameRule::new(&spec.pattern, &spec.reason) {
                Ok(r) => rules.push(r),
                Err(e) => error!(pattern = %spec.pattern, error = %e, "blacklist rule skipped"),
            }
        }
        Self { rules }
    }

    pub fn try_compile(specs: &[RuleSpec]) -> Result<Self, RuleError> {
        let rules = specs
            .iter()
            .map(|s| NameRule::new(&s.pattern, &s.reason))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Pierwsza reguła (w kolejności konfiguracji), która trafia w którąkolwiek nazwę.
    pub fn check<'a, I>(&self, names: I) -> Option<BlacklistHit>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<(&str, String)> = names
            .into_iter()
            .filter(|n| !n.trim().is_empty())
            .map(|n| (n, normalize_name(n)))
            .collect();

        self.rules.iter().find_map(|rule| {
            names
                .iter()
                .find(|(raw, norm)| rule.matches(raw, norm))
                .map(|(raw, _)| BlacklistHit {
                    pattern: rule.pattern.clone(),
                    reason: rule.reason.clone(),
                    matched_name: raw.to_string(),
                })
        })
    }
}

impl NameRule {
    fn new(pattern: &str, reason: &str) -> Result<Self, RuleError> {
        let (kind, body) = parse_pattern(pattern);
        if body.trim().is_empty() {
            return Err(RuleError::Empty);
        }
        let compiled = match kind {
            RuleKind::Regex => build_regex(&body)?,
            RuleKind::Token => token_regex(&normalize_name(&body))?,
        };
        Ok(Self {
            kind,
            pattern: pattern.trim().to_string(),
            compiled,
            reason: if reason.trim().is_empty() {
                format!("blacklisted name pattern {}", pattern.trim())
            } else {
                reason.trim().to_string()
            },
        })
    }

    fn matches(&self, raw: &str, normalized: &str) -> bool {
        match self.kind {
            RuleKind::Token => self.compiled.is_match(normalized),
            RuleKind::Regex => self.compiled.is_match(raw) || self.compiled.is_match(normalized),
        }
    }
}

/* ===========================
   Wzorce
   =========================== */

pub fn parse_pattern(input: &str) -> (RuleKind, String) {
    let s = input.trim();
    if s.starts_with('/') && s.chars().count() >= 3 && s[1..].contains('/') {
        (RuleKind::Regex, s.to_string())
    } else {
        (RuleKind::Token, s.to_string())
    }
}

/// `/body/flags` → Regex.
fn build_regex(pat_with_slashes: &str) -> Result<Regex, RuleError> {
    let s = pat_with_slashes.trim();
    let (body, flags) = match s.strip_prefix('/') {
        Some(rest) => match rest.rfind('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        },
        None => (s, ""),
    };
    if body.is_empty() {
        return Err(RuleError::Empty);
    }
    if body.len() > MAX_REGEX_LEN {
        return Err(RuleError::TooLong(body.len()));
    }
    Ok(RegexBuilder::new(body)
        .case_insensitive(flags.contains('i'))
        .unicode(true)
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .size_limit(1 << 20)
        .dfa_size_limit(1 << 20)
        .build()?)
}

/// Token z granicami słów – tylko po stronach, gdzie token kończy się
/// literą/cyfrą ASCII (dla CJK zwykłe wyszukiwanie podciągu).
fn token_regex(token_norm: &str) -> Result<Regex, RuleError> {
    let t = token_norm.trim();
    let edge = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    let left = if edge(t.chars().next()) { r"(?:^|[^\p{Alphabetic}\p{N}])" } else { "" };
    let right = if edge(t.chars().last()) { r"(?:$|[^\p{Alphabetic}\p{N}])" } else { "" };
    Ok(Regex::new(&format!("{left}{}{right}", regex::escape(t)))?)
}

/* ===========================
   Normalizacja nazw
   =========================== */

/// NFKC + lowercase + zwinięcie popularnych homoglifów (cyrylica/greka).
pub fn normalize_name(s: &str) -> String {
    s.nfkc()
        .collect::<String>()
        .to_lowercase()
        .chars()
        .map(|c| map_confusable(c).unwrap_or(c))
        .collect()
}

fn map_confusable(ch: char) -> Option<char> {
    match ch {
        // cyrylica
        '\u{0430}' => Some('a'),
        '\u{0435}' => Some('e'),
        '\u{043E}' => Some('o'),
        '\u{0440}' => Some('p'),
        '\u{0441}' => Some('c'),
        '\u{0445}' => Some('x'),
        '\u{0443}' => Some('y'),
        '\u{0456}' => Some('i'),
        '\u{0455}' => Some('s'),
        '\u{04CF}' => Some('l'),
        // greka
        '\u{03B1}' => Some('a'),
        '\u{03B5}' => Some('e'),
        '\u{03BF}' => Some('o'),
        '\u{03C1}' => Some('p'),
        '\u{03C5}' => Some('y'),
        '\u{03C7}' => Some('x'),
        '\u{03BA}' => Some('k'),
        '\u{03BD}' => Some('v'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(p: &str, r: &str) -> RuleSpec {
        RuleSpec {
            pattern: p.into(),
            reason: r.into(),
        }
    }

    #[test]
    fn token_respects_word_boundaries() {
        let rules = BlacklistRules::compile(&[spec("casino", "gambling")]);
        assert!(rules.check(["Best Casino 24"]).is_some());
        assert!(rules.check(["casino_vip"]).is_some());
        assert!(rules.check(["casinoking"]).is_none());
    }

    #[test]
    fn decorative_fonts_and_homoglyphs_hit_tokens() {
        let rules = BlacklistRules::compile(&[spec("casino", ""), spec("paypal", "fraud")]);
        // matematyczne pogrubienie → NFKC
        let hit = rules.check(["𝐂𝐀𝐒𝐈𝐍𝐎 bonus"]).unwrap();
        assert_eq!(hit.pattern, "casino");
        assert!(hit.reason.contains("casino"));
        // cyrylickie litery
        assert_eq!(rules.check(["раураl support"]).unwrap().reason, "fraud");
    }

    #[test]
    fn regex_rules_with_flags() {
        let rules = BlacklistRules::compile(&[spec(r"/t\.me/\w+/i", "link in name")]);
        let hit = rules.check(["ok", "Join T.ME/free"]).unwrap();
        assert_eq!(hit.matched_name, "Join T.ME/free");
    }

    #[test]
    fn cjk_token_is_substring() {
        let rules = BlacklistRules::compile(&[spec("代理", "agent ad")]);
        assert!(rules.check(["招代理日结"]).is_some());
    }

    #[test]
    fn invalid_rules_are_skipped() {
        let rules = BlacklistRules::compile(&[spec("/(unclosed/", "x"), spec("  ", "y"), spec("ok", "z")]);
        assert_eq!(rules.len(), 1);
        assert!(BlacklistRules::try_compile(&[spec("/(unclosed/", "x")]).is_err());
        let long = format!("/{}/", "a".repeat(300));
        assert!(matches!(
            BlacklistRules::try_compile(&[spec(&long, "x")]),
            Err(RuleError::TooLong(300))
        ));
    }

    #[test]
    fn first_rule_in_order_wins() {
        let rules = BlacklistRules::compile(&[spec("vip", "first"), spec("/vip/", "second")]);
        assert_eq!(rules.check(["vip club"]).unwrap().reason, "first");
    }
}
