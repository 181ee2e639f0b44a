// src/utils.rs
use crate::core::error::{ApiResult, ClientError};

/// Upper bound on message content, counted in characters after trimming.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Trim message content and enforce the non-empty / length rules
pub fn normalize_content(content: &str) -> ApiResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ClientError::validation("Message content is required"));
    }
    let length = trimmed.chars().count();
    if length > MAX_MESSAGE_CHARS {
        return Err(ClientError::validation(format!(
            "Message is {} characters; the limit is {}",
            length, MAX_MESSAGE_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

/// Ids are interpolated into URL paths, so only plain identifier characters pass.
pub fn validate_id<'a>(kind: &str, id: &'a str) -> ApiResult<&'a str> {
    if id.is_empty() {
        return Err(ClientError::validation(format!("{} id is required", kind)));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ClientError::validation(format!(
            "Invalid {} id: {}",
            kind, id
        )));
    }
    Ok(id)
}

pub fn clamp_page_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_PAGE_LIMIT)
}

/// Shorten text for single-line display
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_content() {
        assert_eq!(normalize_content("  hi there \n").unwrap(), "hi there");
        assert!(normalize_content("").is_err());
        assert!(normalize_content(" \t\n ").is_err());
    }

    #[test]
    fn test_content_length_bound() {
        let at_limit = "a".repeat(MAX_MESSAGE_CHARS);
        assert!(normalize_content(&at_limit).is_ok());
        let over = "é".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            normalize_content(&over),
            Err(ClientError::ValidationRejected(_))
        ));
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("conversation", "3f2b-44_a").is_ok());
        assert!(validate_id("conversation", "").is_err());
        assert!(validate_id("user", "../admin").is_err());
        assert!(validate_id("user", "a b").is_err());
    }

    #[test]
    fn test_clamp_page_limit() {
        assert_eq!(clamp_page_limit(0), 1);
        assert_eq!(clamp_page_limit(50), 50);
        assert_eq!(clamp_page_limit(500), 100);
    }

    #[test]
    fn test_truncate_preview() {
        assert_eq!(truncate_preview("short", 10), "short");
        assert_eq!(truncate_preview("abcdef", 3), "abc…");
    }
}
