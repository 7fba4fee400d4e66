//! SQL text mutations that emulate detection evasion.
//!
//! Every strategy works on a segmented view of the statement and leaves
//! comments untouched, so a provenance tag survives any combination.

use rand::seq::SliceRandom;
use rand::Rng;

/// Keywords eligible for case randomization.
const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AND", "OR", "NOT", "UNION", "ALL", "INSERT", "INTO", "VALUES",
    "UPDATE", "SET", "DELETE", "ORDER", "GROUP", "BY", "LIMIT", "OFFSET", "JOIN", "ON", "AS",
    "LIKE", "IN", "IS", "NULL", "HAVING", "DESC", "ASC", "SLEEP", "CONCAT",
];

/// Keywords wrapped in MySQL version comments.
const VERSIONED: &[&str] = &[
    "SELECT", "UNION", "FROM", "WHERE", "AND", "OR", "INSERT", "UPDATE", "DELETE", "ORDER", "GROUP",
];

/// String literals longer than this are left as-is by the encoding strategies.
const SHORT_LITERAL: usize = 16;

/// One independent mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    CommentInjection,
    RandomCase,
    WhitespaceSubstitution,
    HexLiteral,
    CharEncoding,
    VersionComment,
    ScientificNotation,
}

impl Strategy {
    pub const ALL: [Strategy; 7] = [
        Strategy::CommentInjection,
        Strategy::RandomCase,
        Strategy::WhitespaceSubstitution,
        Strategy::HexLiteral,
        Strategy::CharEncoding,
        Strategy::VersionComment,
        Strategy::ScientificNotation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::CommentInjection => "comment_injection",
            Strategy::RandomCase => "random_case",
            Strategy::WhitespaceSubstitution => "whitespace_substitution",
            Strategy::HexLiteral => "hex_literal",
            Strategy::CharEncoding => "char_encoding",
            Strategy::VersionComment => "version_comment",
            Strategy::ScientificNotation => "scientific_notation",
        }
    }

    pub fn apply(&self, sql: &str, rng: &mut impl Rng) -> String {
        let parts = segments(sql);
        let mut out = String::with_capacity(sql.len() + 16);
        // Last code word seen; comments do not separate it from the next word.
        let mut previous: Option<String> = None;
        for (idx, segment) in parts.iter().enumerate() {
            match *segment {
                Segment::Code(code) => out.push_str(&self.mutate_code(code, &mut previous, rng)),
                Segment::Literal(literal) => {
                    previous = None;
                    if is_account_part(&parts, idx) {
                        out.push_str(literal);
                    } else {
                        out.push_str(&self.mutate_literal(literal));
                    }
                }
                Segment::Quoted(text) => {
                    previous = None;
                    out.push_str(text);
                }
                Segment::Comment(text) => out.push_str(text),
            }
        }
        out
    }

    fn mutate_code(&self, code: &str, previous: &mut Option<String>, rng: &mut impl Rng) -> String {
        match self {
            Strategy::CommentInjection => map_spaces(code, |_| {
                if rng.gen_bool(0.7) {
                    "/**/"
                } else {
                    " "
                }
            }),
            Strategy::WhitespaceSubstitution => map_spaces(code, |_| {
                *["\t", "\n", "\r\n", "  "]
                    .choose(&mut *rng)
                    .unwrap_or(&" ")
            }),
            Strategy::RandomCase => map_words(code, &mut None, |word, _| {
                if !is_keyword(word, KEYWORDS) {
                    return None;
                }
                Some(
                    word.chars()
                        .map(|c| {
                            if rng.gen_bool(0.5) {
                                c.to_ascii_lowercase()
                            } else {
                                c.to_ascii_uppercase()
                            }
                        })
                        .collect(),
                )
            }),
            Strategy::VersionComment => map_words(code, &mut None, |word, _| {
                is_keyword(word, VERSIONED).then(|| format!("/*!50000{word}*/"))
            }),
            Strategy::ScientificNotation => map_words(code, previous, |word, previous| {
                let after_limit = previous
                    .map(|prev| prev.eq_ignore_ascii_case("LIMIT") || prev.eq_ignore_ascii_case("OFFSET"))
                    .unwrap_or(false);
                if after_limit {
                    return None;
                }
                scientific(word)
            }),
            Strategy::HexLiteral | Strategy::CharEncoding => code.to_string(),
        }
    }

    fn mutate_literal(&self, literal: &str) -> String {
        let Some(inner) = short_plain_literal(literal) else {
            return literal.to_string();
        };
        match self {
            Strategy::HexLiteral => {
                let hex: String = inner.bytes().map(|b| format!("{b:02x}")).collect();
                format!("0x{hex}")
            }
            Strategy::CharEncoding => {
                let codes: Vec<String> = inner.bytes().map(|b| b.to_string()).collect();
                format!("CHAR({})", codes.join(","))
            }
            _ => literal.to_string(),
        }
    }
}

/// Picks 1-3 strategies without replacement and applies them in sequence.
#[derive(Debug, Clone)]
pub struct ObfuscationEngine {
    strategies: Vec<Strategy>,
}

impl Default for ObfuscationEngine {
    fn default() -> Self {
        Self {
            strategies: Strategy::ALL.to_vec(),
        }
    }
}

impl ObfuscationEngine {
    pub fn with_strategies(strategies: Vec<Strategy>) -> Self {
        Self { strategies }
    }

    /// Returns the mutated statement and the strategies applied, in order.
    pub fn obfuscate(&self, sql: &str, rng: &mut impl Rng) -> (String, Vec<Strategy>) {
        if self.strategies.is_empty() {
            return (sql.to_string(), Vec::new());
        }
        let count = rng.gen_range(1..=self.strategies.len().min(3));
        let chosen: Vec<Strategy> = self
            .strategies
            .choose_multiple(rng, count)
            .copied()
            .collect();
        let mut text = sql.to_string();
        for strategy in &chosen {
            text = strategy.apply(&text, rng);
        }
        (text, chosen)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Code(&'a str),
    /// Single-quoted string literal, quotes included.
    Literal(&'a str),
    /// Double-quoted or backtick-quoted identifier.
    Quoted(&'a str),
    /// Block or line comment, delimiters included.
    Comment(&'a str),
}

fn segments(sql: &str) -> Vec<Segment<'_>> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut out = Vec::new();
    let mut code_start = 0;
    let mut i = 0;

    while i < len {
        let next = bytes.get(i + 1).copied();
        let end = match (bytes[i], next) {
            (b'/', Some(b'*')) => Some(
                sql[i + 2..]
                    .find("*/")
                    .map(|pos| i + 2 + pos + 2)
                    .unwrap_or(len),
            ),
            (b'-', Some(b'-')) => Some(sql[i..].find('\n').map(|pos| i + pos).unwrap_or(len)),
            (b'\'', _) => Some(literal_end(bytes, i)),
            (b'"', _) | (b'`', _) => Some(
                sql[i + 1..]
                    .find(bytes[i] as char)
                    .map(|pos| i + 1 + pos + 1)
                    .unwrap_or(len),
            ),
            _ => None,
        };

        let Some(end) = end else {
            i += 1;
            continue;
        };
        if code_start < i {
            out.push(Segment::Code(&sql[code_start..i]));
        }
        let text = &sql[i..end];
        out.push(match bytes[i] {
            b'\'' => Segment::Literal(text),
            b'"' | b'`' => Segment::Quoted(text),
            _ => Segment::Comment(text),
        });
        i = end;
        code_start = end;
    }
    if code_start < len {
        out.push(Segment::Code(&sql[code_start..]));
    }
    out
}

fn literal_end(bytes: &[u8], start: usize) -> usize {
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\'' if bytes.get(j + 1) == Some(&b'\'') => j += 2,
            b'\'' => return j + 1,
            _ => j += 1,
        }
    }
    bytes.len()
}

/// Inner text of a closed, escape-free, non-empty literal of at most `SHORT_LITERAL` bytes.
fn short_plain_literal(literal: &str) -> Option<&str> {
    let inner = literal.strip_prefix('\'')?.strip_suffix('\'')?;
    if inner.is_empty() || inner.len() > SHORT_LITERAL {
        return None;
    }
    if inner.contains('\'') || inner.contains('\\') {
        return None;
    }
    Some(inner)
}

fn map_spaces<'s>(code: &str, mut replace: impl FnMut(usize) -> &'s str) -> String {
    let mut out = String::with_capacity(code.len());
    for (idx, c) in code.char_indices() {
        if c == ' ' {
            out.push_str(replace(idx));
        } else {
            out.push(c);
        }
    }
    out
}

/// True for the user or host literal of a `'user'@'host'` account name.
fn is_account_part(parts: &[Segment<'_>], idx: usize) -> bool {
    let before = idx
        .checked_sub(1)
        .and_then(|prev| parts.get(prev))
        .is_some_and(|segment| matches!(segment, Segment::Code(code) if code.trim_end().ends_with('@')));
    let after = parts
        .get(idx + 1)
        .is_some_and(|segment| matches!(segment, Segment::Code(code) if code.trim_start().starts_with('@')));
    before || after
}

/// Rewrites identifier-like words; `f` receives the word and the previous word.
///
/// `previous` carries the last word across segments and is updated in place.
/// Words touching a `.` (qualified names, decimals) are passed through as-is.
fn map_words(
    code: &str,
    previous: &mut Option<String>,
    mut f: impl FnMut(&str, Option<&str>) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(code.len());
    let mut word_start: Option<usize> = None;
    let mut word_after_dot = false;
    let mut prev_char: Option<char> = None;

    for (idx, c) in code.char_indices() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if word_start.is_none() {
                word_start = Some(idx);
                word_after_dot = prev_char == Some('.');
            }
            prev_char = Some(c);
            continue;
        }
        if let Some(start) = word_start.take() {
            let word = &code[start..idx];
            let replacement = if word_after_dot || c == '.' {
                None
            } else {
                f(word, previous.as_deref())
            };
            out.push_str(replacement.as_deref().unwrap_or(word));
            *previous = Some(word.to_string());
        }
        out.push(c);
        prev_char = Some(c);
    }
    if let Some(start) = word_start {
        let word = &code[start..];
        let replacement = if word_after_dot {
            None
        } else {
            f(word, previous.as_deref())
        };
        out.push_str(replacement.as_deref().unwrap_or(word));
        *previous = Some(word.to_string());
    }
    out
}

fn is_keyword(word: &str, set: &[&str]) -> bool {
    set.iter().any(|keyword| keyword.eq_ignore_ascii_case(word))
}

/// `42` -> `4.2e1`; integers only, up to 15 digits so the value stays exact.
fn scientific(word: &str) -> Option<String> {
    if word.is_empty() || word.len() > 15 || !word.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits = word.trim_start_matches('0');
    if digits.is_empty() {
        return Some("0e0".to_string());
    }
    let exponent = digits.len() - 1;
    let mantissa = digits.trim_end_matches('0');
    let (head, tail) = mantissa.split_at(1);
    if tail.is_empty() {
        Some(format!("{head}e{exponent}"))
    } else {
        Some(format!("{head}.{tail}e{exponent}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::ProvenanceTag;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    const TAGGED: &str = "/* SIM_META:hr_001|10.0.0.5|-|ID:SX1|BEH:VIEW_SALARY|ANO:1|PROG:Excel|OS:Windows 11|CONN:ODBC Driver 18|HOST:WS-HR-0001|TS:2024-03-04T09:00:00.000Z */\nSELECT name, salary FROM salaries WHERE employee_id = 1042 AND dept = 'HR' LIMIT 10";

    #[test]
    fn every_strategy_preserves_provenance_tag() {
        let mut rng = StdRng::seed_from_u64(17);
        for strategy in Strategy::ALL {
            for _ in 0..20 {
                let mutated = strategy.apply(TAGGED, &mut rng);
                let tag = ProvenanceTag::parse(&mutated)
                    .unwrap_or_else(|| panic!("{} broke the tag", strategy.name()));
                assert_eq!(tag.user, "hr_001");
                assert_eq!(tag.behavior, "VIEW_SALARY");
            }
        }
    }

    #[test]
    fn engine_preserves_tag_across_combinations() {
        let engine = ObfuscationEngine::default();
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..200 {
            let (mutated, applied) = engine.obfuscate(TAGGED, &mut rng);
            assert!((1..=3).contains(&applied.len()));
            let unique: HashSet<Strategy> = applied.iter().copied().collect();
            assert_eq!(unique.len(), applied.len());
            let tag = ProvenanceTag::parse(&mutated).expect("tag");
            assert_eq!(tag.user, "hr_001");
            assert_eq!(tag.behavior, "VIEW_SALARY");
        }
    }

    #[test]
    fn hex_and_char_encode_short_literals() {
        let mut rng = StdRng::seed_from_u64(1);
        let sql = "SELECT * FROM t WHERE a = 'HR' AND b = 'this literal is far too long'";
        let hex = Strategy::HexLiteral.apply(sql, &mut rng);
        assert!(hex.contains("a = 0x4852"));
        assert!(hex.contains("'this literal is far too long'"));
        let chars = Strategy::CharEncoding.apply(sql, &mut rng);
        assert!(chars.contains("a = CHAR(72,82)"));
    }

    #[test]
    fn version_comment_wraps_keywords() {
        let mut rng = StdRng::seed_from_u64(1);
        let out = Strategy::VersionComment.apply("SELECT id FROM users", &mut rng);
        assert_eq!(out, "/*!50000SELECT*/ id /*!50000FROM*/ users");
    }

    #[test]
    fn scientific_notation_skips_limits_and_identifiers() {
        let mut rng = StdRng::seed_from_u64(1);
        let out = Strategy::ScientificNotation.apply(
            "SELECT c1 FROM t2 WHERE id = 1042 AND x = 7 LIMIT 10",
            &mut rng,
        );
        assert_eq!(out, "SELECT c1 FROM t2 WHERE id = 1.042e3 AND x = 7e0 LIMIT 10");
        assert_eq!(scientific("100").as_deref(), Some("1e2"));
    }

    #[test]
    fn random_case_only_touches_keywords() {
        let mut rng = StdRng::seed_from_u64(3);
        let out = Strategy::RandomCase.apply("SELECT Name FROM people WHERE x = 'Ab'", &mut rng);
        assert_eq!(out.to_uppercase(), "SELECT NAME FROM PEOPLE WHERE X = 'AB'");
        assert!(out.contains("Name") && out.contains("people") && out.contains("'Ab'"));
    }

    #[test]
    fn whitespace_and_comments_replace_spaces_outside_literals() {
        let mut rng = StdRng::seed_from_u64(5);
        let sql = "SELECT a FROM t WHERE s = 'a b'";
        let spaced = Strategy::WhitespaceSubstitution.apply(sql, &mut rng);
        assert!(spaced.contains("'a b'"));
        assert_ne!(spaced, sql);
        let commented = Strategy::CommentInjection.apply(sql, &mut rng);
        assert!(commented.contains("'a b'"));
    }

    #[test]
    fn limit_survives_comment_injection_then_scientific() {
        let sql = "SELECT a FROM t ORDER BY name LIMIT 50 OFFSET 10";
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let commented = Strategy::CommentInjection.apply(sql, &mut rng);
            let out = Strategy::ScientificNotation.apply(&commented, &mut rng);
            assert!(out.contains("50") && out.ends_with("10"), "{out}");
            assert!(!out.contains("e1"), "{out}");
        }
    }

    #[test]
    fn account_literals_are_not_encoded() {
        let mut rng = StdRng::seed_from_u64(2);
        let sql = "GRANT SELECT ON hr.salaries TO 'bob'@'%' WHERE x = 'HR'";
        let hex = Strategy::HexLiteral.apply(sql, &mut rng);
        assert!(hex.contains("'bob'@'%'"), "{hex}");
        assert!(hex.contains("x = 0x4852"), "{hex}");
        let chars = Strategy::CharEncoding.apply(sql, &mut rng);
        assert!(chars.contains("'bob'@'%'"), "{chars}");
    }

    #[test]
    fn segmentation_handles_escaped_quotes() {
        let parts = segments("SELECT 'it''s' , '/* no */' -- tail");
        assert_eq!(
            parts,
            vec![
                Segment::Code("SELECT "),
                Segment::Literal("'it''s'"),
                Segment::Code(" , "),
                Segment::Literal("'/* no */'"),
                Segment::Code(" "),
                Segment::Comment("-- tail"),
            ]
        );
    }
}
