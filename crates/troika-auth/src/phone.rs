//! Phone normalization.
//!
//! Partners type phones in every imaginable format; the auth sheet stores
//! the canonical 11-digit `8`-prefixed form. Normalization strips all
//! non-digits, rewrites a leading `7` to `8`, and rejects everything that
//! does not end up as exactly eleven digits.

use crate::error::AuthError;

/// Normalize a phone number to the canonical `8XXXXXXXXXX` form.
///
/// # Errors
///
/// [`AuthError::InvalidPhone`] when the digits do not form an 11-digit
/// number starting with `7` or `8`, or a 10-digit local number.
pub fn normalize_phone(raw: &str) -> Result<String, AuthError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    match digits.len() {
        11 if digits.starts_with('7') || digits.starts_with('8') => {
            Ok(format!("8{}", &digits[1..]))
        },
        10 => Ok(format!("8{digits}")),
        _ => Err(AuthError::InvalidPhone(troika_core::mask::phone(raw))),
    }
}
