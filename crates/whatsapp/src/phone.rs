//! Phone number normalization.

pub const MIN_DIGITS: usize = 10;
pub const MAX_DIGITS: usize = 15;

/// Suffix the network uses for individual chat ids.
pub const CHAT_ID_SUFFIX: &str = "@c.us";

/// A phone number reduced to 10-15 digits, country code included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNumber {
    digits: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid phone number {received:?}: expected 10-15 digits, got {cleaned:?}")]
pub struct InvalidPhone {
    pub received: String,
    pub cleaned: String,
}

impl PhoneNumber {
    /// Strip every non-digit character and check the remaining length.
    pub fn parse(raw: &str) -> Result<Self, InvalidPhone> {
        let cleaned: String = raw.chars().filter(char::is_ascii_digit).collect();
        if (MIN_DIGITS..=MAX_DIGITS).contains(&cleaned.len()) {
            Ok(Self { digits: cleaned })
        } else {
            Err(InvalidPhone {
                received: raw.to_string(),
                cleaned,
            })
        }
    }

    pub fn digits(&self) -> &str {
        &self.digits
    }

    pub fn chat_id(&self) -> String {
        format!("{}{CHAT_ID_SUFFIX}", self.digits)
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_formatting() {
        let phone = PhoneNumber::parse("+91 98765-43210").unwrap();
        assert_eq!(phone.digits(), "919876543210");
        assert_eq!(phone.chat_id(), "919876543210@c.us");
    }

    #[test]
    fn rejects_letters_only() {
        let err = PhoneNumber::parse("abc").unwrap_err();
        assert_eq!(err.received, "abc");
        assert_eq!(err.cleaned, "");
    }

    #[test]
    fn enforces_length_bounds() {
        assert!(PhoneNumber::parse("123456789").is_err());
        assert!(PhoneNumber::parse("1234567890").is_ok());
        assert!(PhoneNumber::parse("123456789012345").is_ok());
        assert!(PhoneNumber::parse("1234567890123456").is_err());
    }

    #[test]
    fn ignores_non_ascii_digits() {
        // Arabic-Indic digits are not accepted as phone digits.
        assert!(PhoneNumber::parse("١٢٣٤٥٦٧٨٩٠").is_err());
    }
}
