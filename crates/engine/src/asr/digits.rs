//! Digit reading normalization.
//!
//! Maps written-out digit readings (Japanese hiragana/katakana/kanji,
//! English words, full-width numerals) to canonical ASCII digits so the
//! recognizer output can be compared against a prompt.

use super::AsrResult;

/// Reading -> canonical digit. Applied longest-reading-first so compound
/// readings win over their prefixes (e.g. "きゅう" before "く").
const DIGIT_READINGS: &[(&str, &str)] = &[
    // Japanese readings
    ("ゼロ", "0"),
    ("れい", "0"),
    ("レイ", "0"),
    ("零", "0"),
    ("まる", "0"),
    ("マル", "0"),
    ("いち", "1"),
    ("イチ", "1"),
    ("一", "1"),
    ("に", "2"),
    ("ニ", "2"),
    ("二", "2"),
    ("さん", "3"),
    ("サン", "3"),
    ("三", "3"),
    ("よん", "4"),
    ("ヨン", "4"),
    ("し", "4"),
    ("シ", "4"),
    ("四", "4"),
    ("ご", "5"),
    ("ゴ", "5"),
    ("五", "5"),
    ("ろく", "6"),
    ("ロク", "6"),
    ("六", "6"),
    ("なな", "7"),
    ("ナナ", "7"),
    ("しち", "7"),
    ("シチ", "7"),
    ("七", "7"),
    ("はち", "8"),
    ("ハチ", "8"),
    ("八", "8"),
    ("きゅう", "9"),
    ("キュウ", "9"),
    ("く", "9"),
    ("ク", "9"),
    ("九", "9"),
    // English readings
    ("zero", "0"),
    ("one", "1"),
    ("two", "2"),
    ("three", "3"),
    ("four", "4"),
    ("five", "5"),
    ("six", "6"),
    ("seven", "7"),
    ("eight", "8"),
    ("nine", "9"),
    // Full-width numerals
    ("０", "0"),
    ("１", "1"),
    ("２", "2"),
    ("３", "3"),
    ("４", "4"),
    ("５", "5"),
    ("６", "6"),
    ("７", "7"),
    ("８", "8"),
    ("９", "9"),
];

/// When the last digit has no following token, assume this long.
const FALLBACK_TOKEN_SECS: f32 = 0.3;

fn readings_longest_first() -> Vec<(&'static str, &'static str)> {
    let mut table: Vec<_> = DIGIT_READINGS.to_vec();
    table.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));
    table
}

/// Normalizes text to its canonical digit string.
///
/// Known readings are replaced longest-first, then everything that is not
/// an ASCII digit is dropped.
pub fn normalize_to_digits(text: &str) -> String {
    let mut result = text.to_string();
    for (reading, digit) in readings_longest_first() {
        if result.contains(reading) {
            result = result.replace(reading, digit);
        }
    }
    result.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Extracts (digit, start_secs, end_secs) triples from an ASR result.
///
/// Digits are matched against tokens in order. Digits that cannot be
/// matched to any token (e.g. when the recognizer produced no timestamps)
/// get estimated spans of `FALLBACK_TOKEN_SECS` each after the last
/// matched token.
pub fn digit_timestamps(result: &AsrResult) -> Vec<(String, f32, f32)> {
    let digits: Vec<char> = result.digits.chars().collect();
    if digits.is_empty() {
        return Vec::new();
    }

    if result.tokens.is_empty() {
        return digits
            .iter()
            .enumerate()
            .map(|(i, d)| {
                (
                    d.to_string(),
                    i as f32 * FALLBACK_TOKEN_SECS,
                    (i + 1) as f32 * FALLBACK_TOKEN_SECS,
                )
            })
            .collect();
    }

    let mut out: Vec<(String, f32, f32)> = Vec::with_capacity(digits.len());
    let mut digit_idx = 0usize;

    for token in &result.tokens {
        if digit_idx >= digits.len() {
            break;
        }
        let normalized = normalize_to_digits(&token.token);
        for d in normalized.chars() {
            if digit_idx < digits.len() && d == digits[digit_idx] {
                out.push((d.to_string(), token.start, token.end));
                digit_idx += 1;
            }
        }
    }

    // Estimate spans for any digits left unmatched.
    if out.len() < digits.len() {
        let mut last_end = out.last().map(|(_, _, e)| *e).unwrap_or(0.0);
        for d in digits.iter().skip(out.len()) {
            let start = last_end;
            let end = start + FALLBACK_TOKEN_SECS;
            out.push((d.to_string(), start, end));
            last_end = end;
        }
    }

    out
}
