use phonenumber::{country::Id as CountryId, Mode};
use regex::Regex;
use std::sync::LazyLock;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email regex is valid")
});

const CNPJ_FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const CNPJ_SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Keeps only ASCII digits.
pub fn only_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Strips formatting from a CNPJ and returns the 14 digits, if that is what remains.
pub fn clean_cnpj(raw: &str) -> Option<String> {
    let digits = only_digits(raw);
    (digits.len() == 14).then_some(digits)
}

fn cnpj_check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let rest = sum % 11;
    if rest < 2 {
        0
    } else {
        11 - rest
    }
}

/// Validates CNPJ check digits.
///
/// # Arguments
///
/// * `raw` - CNPJ with or without punctuation.
///
/// # Returns
///
/// * `bool` - `true` when the number has 14 digits, is not a repeated digit
///   and both check digits match.
pub fn is_valid_cnpj(raw: &str) -> bool {
    let Some(cnpj) = clean_cnpj(raw) else {
        return false;
    };

    let digits: Vec<u32> = cnpj.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    let first = cnpj_check_digit(&digits[..12], &CNPJ_FIRST_WEIGHTS);
    let second = cnpj_check_digit(&digits[..13], &CNPJ_SECOND_WEIGHTS);

    digits[12] == first && digits[13] == second
}

/// Formats a CNPJ as `XX.XXX.XXX/XXXX-XX`. Inputs that are not 14 digits are returned as-is.
pub fn format_cnpj(raw: &str) -> String {
    match clean_cnpj(raw) {
        Some(c) => format!(
            "{}.{}.{}/{}-{}",
            &c[0..2],
            &c[2..5],
            &c[5..8],
            &c[8..12],
            &c[12..14]
        ),
        None => raw.to_string(),
    }
}

/// Validate email format and detect fake patterns
///
/// Returns true if email is valid, false if fake or invalid
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    let fake_patterns = ["999999", "111111", "000000", "123456789"];

    for pattern in &fake_patterns {
        if email.contains(pattern) {
            tracing::warn!(
                "❌ Invalid email detected (fake pattern '{}'): {}",
                pattern,
                email
            );
            return false;
        }
    }

    if !EMAIL_REGEX.is_match(email) {
        tracing::warn!("❌ Invalid email format: {}", email);
        return false;
    }

    true
}

/// Validate and normalize Brazilian phone number
///
/// # Returns
///
/// * `(bool, String)` - validity flag and the E.164 form (`+5534999998888`)
///   or a short reason when invalid.
pub fn validate_br_phone(raw: &str) -> (bool, String) {
    if raw.trim().is_empty() || raw.len() < 8 {
        return (false, "Phone too short".to_string());
    }

    match phonenumber::parse(Some(CountryId::BR), raw) {
        Ok(number) => {
            if phonenumber::is_valid(&number) {
                let formatted = number.format().mode(Mode::E164).to_string();
                tracing::debug!("✓ Valid BR phone: {} → {}", raw, formatted);
                (true, formatted)
            } else {
                tracing::debug!("Invalid BR phone number: {}", raw);
                (false, "Invalid Brazilian phone number".to_string())
            }
        }
        Err(e) => {
            tracing::debug!("Failed to parse BR phone '{}': {:?}", raw, e);
            (false, format!("Parse error: {:?}", e))
        }
    }
}

/// Formats a Brazilian phone for display: `(34) 99999-8888` or `(34) 3210-1234`.
///
/// A leading country code `55` is dropped. Other lengths are returned as digits.
pub fn format_br_phone(raw: &str) -> String {
    let mut digits = only_digits(raw);
    if digits.len() > 11 && digits.starts_with("55") {
        digits = digits[2..].to_string();
    }

    match digits.len() {
        11 => format!("({}) {}-{}", &digits[0..2], &digits[2..7], &digits[7..]),
        10 => format!("({}) {}-{}", &digits[0..2], &digits[2..6], &digits[6..]),
        _ => digits,
    }
}
