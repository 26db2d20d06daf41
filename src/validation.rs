//! Field checks shared by the entity drafts.
use crate::error::{MarketError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// `local@domain.tld`, word characters with single `.`/`-` separators and a
/// two or three letter top level domain.
static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?-u:\w)+([.-]?(?-u:\w)+)*@(?-u:\w)+([.-]?(?-u:\w)+)*(\.(?-u:\w){2,3})+$").unwrap());

/// Trim and check the character count of a required field.
pub fn required_text(field: &'static str, label: &str, value: &str, min: usize, max: usize) -> Result<String> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len < min || len > max {
        return Err(MarketError::validation(
            field,
            format!("{label} must be between {min} and {max} characters"),
        ));
    }
    Ok(trimmed.to_owned())
}

/// Trim and bound an optional field. Blank input collapses to `None`.
pub fn optional_text(field: &'static str, label: &str, value: Option<&str>, max: usize) -> Result<Option<String>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > max {
        return Err(MarketError::validation(
            field,
            format!("{label} cannot exceed {max} characters"),
        ));
    }
    Ok(Some(value.to_owned()))
}

pub fn username(value: &str) -> Result<String> {
    let value = required_text("username", "Username", value, 3, 30)?;
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(MarketError::validation(
            "username",
            "Username can only contain letters, numbers, and underscores",
        ));
    }
    Ok(value)
}

pub fn person_name(field: &'static str, label: &str, value: &str) -> Result<String> {
    let value = required_text(field, label, value, 1, 50)?;
    if !value.chars().all(|c| c.is_alphabetic() || c == ' ') {
        return Err(MarketError::validation(
            field,
            format!("{label} can only contain letters and spaces"),
        ));
    }
    Ok(value)
}

/// Trims, lowercases and checks the address against [`EMAIL_REGEX`].
pub fn email(value: &str) -> Result<String> {
    let value = value.trim().to_lowercase();
    if !EMAIL_REGEX.is_match(&value) {
        return Err(MarketError::validation("email", "Please enter a valid email address"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_trims_before_counting() {
        assert_eq!(required_text("title", "Title", "  Denim  ", 1, 100).unwrap(), "Denim");
        assert!(required_text("title", "Title", "   ", 1, 100).is_err());
        assert!(required_text("description", "Description", "too short", 10, 1000).is_err());
    }

    #[test]
    fn optional_text_collapses_blank() {
        assert_eq!(optional_text("brand", "Brand name", Some("  "), 50).unwrap(), None);
        assert!(optional_text("brand", "Brand name", Some(&"x".repeat(51)), 50).is_err());
    }

    #[test]
    fn usernames_are_restricted() {
        assert!(username("jane_doe42").is_ok());
        assert!(username("jd").is_err());
        assert!(username("jane doe").is_err());
    }

    #[test]
    fn email_shape() {
        assert_eq!(email(" Jane@Example.COM ").unwrap(), "jane@example.com");
        assert!(email("jane@example").is_err());
        assert!(email("@example.com").is_err());
        assert!(email("jane@@example.com").is_err());
        assert!(email("mary-jo.smith@mail.example.co.uk").is_ok());
    }

    #[test]
    fn email_top_level_domain_is_two_or_three_letters() {
        assert!(email("jane@example.io").is_ok());
        assert!(email("jane@example.com").is_ok());
        assert!(email("jane@example.test").is_err());
        assert!(email("jane@example.c").is_err());
    }

    #[test]
    fn email_local_part_is_word_characters() {
        assert!(email("a b@x.com").is_err());
        assert!(email("a!@x.com").is_err());
        assert!(email(".jane@x.com").is_err());
        assert!(email("jane..doe@x.com").is_err());
        assert!(email("jane_doe@x.com").is_ok());
    }
}
