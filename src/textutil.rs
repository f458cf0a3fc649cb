//! Small text helpers shared by the codecs, the integrity checker and the
//! CLI: identifier slugging, non-ASCII normalization and the discretized
//! value scales used across the model.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Non-ASCII characters that are silently normalized into their closest
/// ASCII rendition. Anything outside this table is a content-quality
/// violation.
pub static NON_ASCII_CODES: Lazy<HashMap<u32, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (8220, "\""),
        (8221, "\""),
        (8216, "'"),
        (8217, "'"),
        (8211, "-"),
        (8212, "-"),
        (8208, "-"),
        (8209, "-"),
        (8230, "..."),
        (8226, "*"),
        (8594, "->"),
        (8203, ""),
        (160, " "),
        (8239, " "),
        (228, "a"),
        (226, "a"),
        (243, "o"),
        (215, "*"),
        (173, "/"),
        (8800, "!="),
        (8804, "<="),
        (8805, ">="),
        (8776, "~"),
    ])
});

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("static regex"));

/// Lowercased identifier derived from a ref or a display name, with every
/// run of non-alphanumerics collapsed into `separator`. Used as the stable
/// key for generated rule names (`<component>.<control-name>`).
pub fn identifier_from_ref(text: &str, separator: &str) -> String {
    IDENTIFIER_RE.replace_all(text, separator).to_lowercase()
}

/// Ref derived from a display name: uppercased, non-alphanumerics collapsed
/// into dashes.
pub fn ref_from_name(text: &str) -> String {
    IDENTIFIER_RE.replace_all(&text.to_uppercase(), "-").to_string()
}

/// Replace characters from the translation table, leave the rest alone.
pub fn replace_non_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match NON_ASCII_CODES.get(&(ch as u32)) {
            Some(replacement) => out.push_str(replacement),
            None => out.push(ch),
        }
    }
    out
}

/// Characters outside ASCII that the translation table does not cover.
pub fn find_untranslatable(text: &str) -> Vec<char> {
    text.chars()
        .filter(|ch| !ch.is_ascii() && !NON_ASCII_CODES.contains_key(&(*ch as u32)))
        .collect()
}

/// The discretized scale used by risk ratings and weakness impacts.
pub const RATING_SCALE: [u32; 5] = [1, 25, 50, 75, 100];

/// Snap an arbitrary value onto the discretized scale. Values at or below
/// zero clamp to "1", values above 100 clamp to "100".
pub fn closest_discretized(value: &str) -> String {
    let num: i64 = match value.trim().parse() {
        Ok(n) => n,
        Err(_) => return "100".to_string(),
    };
    if num <= 0 {
        return "1".to_string();
    }
    if num > 100 {
        return "100".to_string();
    }
    RATING_SCALE
        .iter()
        .min_by_key(|x| (num - **x as i64).abs())
        .map(|x| x.to_string())
        .unwrap_or_else(|| "100".to_string())
}

/// Convert between the numeric cost encoding ("0"/"1"/"2") and the
/// human-facing one ("low"/"medium"/"high"). Unknown inputs default to high.
pub fn cost_to_number(value: &str) -> String {
    match value {
        "low" => "0",
        "medium" => "1",
        _ => "2",
    }
    .to_string()
}

pub fn cost_to_word(value: &str) -> String {
    match value {
        "0" => "low",
        "1" => "medium",
        _ => "high",
    }
    .to_string()
}

/// Extract the first JSON object embedded in free-form text. Generators
/// wrap their answers in prose more often than not.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_from_ref() {
        assert_eq!(identifier_from_ref("CD-V2-POSTGRESQL", "."), "cd.v2.postgresql");
        assert_eq!(identifier_from_ref("Encrypt data at rest", "."), "encrypt.data.at.rest");
        assert_eq!(identifier_from_ref("a  b//c", "."), "a.b.c");
    }

    #[test]
    fn test_ref_from_name() {
        assert_eq!(ref_from_name("My Component (v2)"), "MY-COMPONENT-V2-");
        assert_eq!(ref_from_name("postgres"), "POSTGRES");
    }

    #[test]
    fn test_replace_non_ascii() {
        assert_eq!(replace_non_ascii("\u{201c}quoted\u{201d}"), "\"quoted\"");
        assert_eq!(replace_non_ascii("a\u{2013}b"), "a-b");
        assert_eq!(replace_non_ascii("plain ascii"), "plain ascii");
    }

    #[test]
    fn test_find_untranslatable() {
        assert!(find_untranslatable("plain").is_empty());
        assert!(find_untranslatable("em\u{2014}dash").is_empty());
        let bad = find_untranslatable("snowman \u{2603}");
        assert_eq!(bad, vec!['\u{2603}']);
    }

    #[test]
    fn test_closest_discretized() {
        assert_eq!(closest_discretized("0"), "1");
        assert_eq!(closest_discretized("-5"), "1");
        assert_eq!(closest_discretized("12"), "1");
        assert_eq!(closest_discretized("13"), "25");
        assert_eq!(closest_discretized("60"), "50");
        assert_eq!(closest_discretized("64"), "75");
        assert_eq!(closest_discretized("90"), "100");
        assert_eq!(closest_discretized("150"), "100");
        assert_eq!(closest_discretized("not a number"), "100");
    }

    #[test]
    fn test_cost_conversions() {
        assert_eq!(cost_to_number("low"), "0");
        assert_eq!(cost_to_number("medium"), "1");
        assert_eq!(cost_to_number("high"), "2");
        assert_eq!(cost_to_number("bogus"), "2");
        assert_eq!(cost_to_word("0"), "low");
        assert_eq!(cost_to_word("1"), "medium");
        assert_eq!(cost_to_word("2"), "high");
    }

    #[test]
    fn test_extract_json_from_prose() {
        let answer = "Sure! Here is your model:\n{\"security_threats\": []}\nHope it helps.";
        let value = extract_json(answer).expect("json should be found");
        assert!(value.get("security_threats").is_some());
    }

    #[test]
    fn test_extract_json_absent() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("} backwards {").is_none());
    }
}
