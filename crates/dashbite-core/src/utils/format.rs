use chrono::Duration;

/// Shortest and longest phone numbers accepted (ITU E.164 allows 15 digits)
const MIN_PHONE_DIGITS: usize = 8;
const MAX_PHONE_DIGITS: usize = 15;

/// Normalize a phone number for the payment gateway.
/// Strips spaces, dashes, dots and parentheses; a leading `00` becomes `+`.
/// Returns `None` for anything that does not look like a phone number.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let trimmed = phone.trim();
    let (international, rest) = if let Some(rest) = trimmed.strip_prefix('+') {
        (true, rest)
    } else if let Some(rest) = trimmed.strip_prefix("00") {
        (true, rest)
    } else {
        (false, trimmed)
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }

    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) {
        return None;
    }

    if international {
        Some(format!("+{}", digits))
    } else {
        Some(digits)
    }
}

/// Format time left on a token, e.g. "14m", "1h 5m" or "expired"
pub fn format_remaining(remaining: Duration) -> String {
    let minutes = remaining.num_minutes();
    if remaining <= Duration::zero() {
        "expired".to_string()
    } else if minutes < 1 {
        "<1m".to_string()
    } else if minutes < 60 {
        format!("{}m", minutes)
    } else {
        format!("{}h {}m", minutes / 60, minutes % 60)
    }
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format an optional string, returning a default if None
pub fn format_optional(value: &Option<String>, default: &str) -> String {
    value.as_deref().unwrap_or(default).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+233 20 123 4567").as_deref(), Some("+233201234567"));
        assert_eq!(normalize_phone("00225-07-08-09-10-11").as_deref(), Some("+2250708091011"));
        assert_eq!(normalize_phone("(020) 123.4567").as_deref(), Some("0201234567"));
        assert_eq!(normalize_phone("12345"), None); // Too short
        assert_eq!(normalize_phone("+1234567890123456"), None); // Too long
        assert_eq!(normalize_phone("call me"), None);
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::seconds(-5)), "expired");
        assert_eq!(format_remaining(Duration::seconds(30)), "<1m");
        assert_eq!(format_remaining(Duration::minutes(14)), "14m");
        assert_eq!(format_remaining(Duration::minutes(65)), "1h 5m");
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("Hello", 10), "Hello");
        assert_eq!(truncate_string("Hello World", 8), "Hello...");
        assert_eq!(truncate_string("Hi", 2), "Hi");
    }
}
