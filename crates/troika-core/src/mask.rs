//! PII masking for log records.
//!
//! Components above the sheets gateway never log a raw phone number,
//! user id or personal name. The masking rules are part of the operational
//! contract:
//!
//! - phone: keep the first digit and the last two, star the middle
//! - user id: first three characters + `***` + last three
//! - name: first and last letter of each word, star the middle

use crate::ids::UserId;

/// Mask a phone number for logging.
#[must_use]
pub fn phone(raw: &str) -> String {
    let digits: Vec<char> = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return "*".repeat(digits.len());
    }
    let mut out = String::with_capacity(digits.len());
    for (i, c) in digits.iter().enumerate() {
        let keep = i == 0 || i.saturating_add(2) >= digits.len();
        out.push(if keep { *c } else { '*' });
    }
    out
}

/// Mask a user id for logging.
#[must_use]
pub fn user_id(id: UserId) -> String {
    let s = id.to_string();
    if s.len() <= 6 {
        return "*".repeat(s.len());
    }
    let head: String = s.chars().take(3).collect();
    let tail: String = s
        .chars()
        .skip(s.chars().count().saturating_sub(3))
        .collect();
    format!("{head}***{tail}")
}

/// Mask a personal name for logging.
///
/// Each whitespace-separated word keeps its first and last letter.
#[must_use]
pub fn name(raw: &str) -> String {
    raw.split_whitespace()
        .map(mask_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn mask_word(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    match chars.len() {
        0 => String::new(),
        1 | 2 => "*".repeat(chars.len()),
        n => {
            let mut out = String::with_capacity(n);
            out.push(chars[0]);
            out.extend(std::iter::repeat('*').take(n.saturating_sub(2)));
            out.push(chars[n.saturating_sub(1)]);
            out
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_keeps_first_and_last_two() {
        assert_eq!(phone("89101234567"), "8********67");
    }

    #[test]
    fn phone_strips_formatting_before_masking() {
        assert_eq!(phone("+7 (910) 123-45-67"), "7********67");
    }

    #[test]
    fn phone_short_input_fully_starred() {
        assert_eq!(phone("123"), "***");
        assert_eq!(phone(""), "");
    }

    #[test]
    fn user_id_masks_middle() {
        assert_eq!(user_id(UserId(111_222_333)), "111***333");
    }

    #[test]
    fn user_id_short_fully_starred() {
        assert_eq!(user_id(UserId(1234)), "****");
    }

    #[test]
    fn name_masks_each_word() {
        assert_eq!(name("Ivanov Ivan"), "I****v I**n");
    }

    #[test]
    fn name_short_words_fully_starred() {
        assert_eq!(name("Li An"), "** **");
    }
}
