//! Document and country-name validators
//!
//! Deterministic helpers used by the documentation indicators.

use crate::geographic_risk::CANONICAL_COUNTRIES;

/// Control letters indexed by `number mod 23`
const DNI_CONTROL_LETTERS: &[u8; 23] = b"TRWAGMYFPDXBNJZSQVHLCKE";

/// Default similarity a fuzzy country match must reach
pub const DEFAULT_COUNTRY_THRESHOLD: f64 = 80.0;

/// Validate a Spanish DNI or NIE.
///
/// NIE prefixes X, Y and Z stand for 0, 1 and 2. Anything that is not exactly
/// nine characters of eight digits plus the matching control letter is
/// rejected, surrounding whitespace included.
pub fn validate_national_id(value: &str) -> bool {
    let upper = value.to_uppercase();
    let chars: Vec<char> = upper.chars().collect();
    if chars.len() != 9 {
        return false;
    }

    let mut body = String::with_capacity(8);
    for (i, c) in chars[..8].iter().enumerate() {
        let digit = match (i, c) {
            (0, 'X') => '0',
            (0, 'Y') => '1',
            (0, 'Z') => '2',
            (_, c) if c.is_ascii_digit() => *c,
            _ => return false,
        };
        body.push(digit);
    }

    let number: u32 = match body.parse() {
        Ok(n) => n,
        Err(_) => return false,
    };
    let expected = DNI_CONTROL_LETTERS[(number % 23) as usize] as char;
    chars[8] == expected
}

/// Resolve free text to a canonical country name.
///
/// Returns the best token-sort match when its similarity reaches `threshold`
/// (0-100). Equal scores keep the earlier canonical entry.
pub fn resolve_country_fuzzy(name: &str, threshold: f64) -> Option<&'static str> {
    let query = sorted_tokens(name);
    if query.is_empty() {
        return None;
    }

    let mut best: Option<(&'static str, f64)> = None;
    for candidate in CANONICAL_COUNTRIES {
        let score = indel_ratio(&query, &sorted_tokens(candidate));
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }

    best.filter(|(_, score)| *score >= threshold)
        .map(|(country, _)| country)
}

/// Token-sort similarity between two strings, 0-100
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    indel_ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Lower-case, replace non-alphanumerics by spaces, sort the tokens
fn sorted_tokens(s: &str) -> Vec<char> {
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ").chars().collect()
}

/// Normalized indel similarity: `2 * lcs / (len_a + len_b) * 100`
fn indel_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    let lcs = longest_common_subsequence(a, b);
    (200 * lcs) as f64 / total as f64
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];

    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_dni() {
        assert!(validate_national_id("12345678Z"));
        assert!(validate_national_id("12345678z"));
        assert!(validate_national_id("00000000T"));
    }

    #[test]
    fn test_padded_document_rejected() {
        assert!(!validate_national_id(" 00000000T "));
        assert!(!validate_national_id("00000000T "));
        assert!(!validate_national_id("\t12345678Z"));
    }

    #[test]
    fn test_invalid_control_letter() {
        assert!(!validate_national_id("12345678A"));
    }

    #[test]
    fn test_nie_prefixes() {
        // X1234567 -> 01234567, 1234567 mod 23 = 19 -> L
        assert!(validate_national_id("X1234567L"));
        // Y1234567 -> 11234567, 11234567 mod 23 = 10 -> X
        assert!(validate_national_id("Y1234567X"));
        assert!(!validate_national_id("X1234567A"));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(!validate_national_id(""));
        assert!(!validate_national_id("1234567Z"));
        assert!(!validate_national_id("123456789Z"));
        assert!(!validate_national_id("1234A678Z"));
        assert!(!validate_national_id("A12345678"));
        assert!(!validate_national_id("1X345678Z"));
        assert!(!validate_national_id("ñ2345678Z"));
    }

    #[test]
    fn test_resolve_country_typo() {
        assert_eq!(resolve_country_fuzzy("Espana", DEFAULT_COUNTRY_THRESHOLD), Some("España"));
        assert_eq!(resolve_country_fuzzy("ESPAÑA", DEFAULT_COUNTRY_THRESHOLD), Some("España"));
        assert_eq!(resolve_country_fuzzy("marruecos", DEFAULT_COUNTRY_THRESHOLD), Some("Marruecos"));
    }

    #[test]
    fn test_resolve_unknown_country() {
        assert_eq!(resolve_country_fuzzy("Xyzzyland", DEFAULT_COUNTRY_THRESHOLD), None);
        assert_eq!(resolve_country_fuzzy("", DEFAULT_COUNTRY_THRESHOLD), None);
        assert_eq!(resolve_country_fuzzy("---", DEFAULT_COUNTRY_THRESHOLD), None);
    }

    #[test]
    fn test_token_order_is_ignored() {
        assert_eq!(token_sort_ratio("Herzegovina y Bosnia", "Bosnia y Herzegovina"), 100.0);
        assert_eq!(
            resolve_country_fuzzy("Herzegovina y Bosnia", DEFAULT_COUNTRY_THRESHOLD),
            Some("Bosnia y Herzegovina")
        );
    }

    #[test]
    fn test_ratio_values() {
        assert_eq!(token_sort_ratio("abc", "abc"), 100.0);
        assert_eq!(token_sort_ratio("abc", "xyz"), 0.0);
        let ratio = token_sort_ratio("espana", "españa");
        assert!((ratio - 83.333).abs() < 0.01);
    }
}
