//! UUID utilities

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse UUID from string
pub fn parse(s: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(s)
}

/// Parse an optional UUID column value
pub fn parse_opt(s: Option<String>) -> Result<Option<Uuid>, uuid::Error> {
    s.as_deref().map(Uuid::parse_str).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(generate(), generate());
    }

    #[test]
    fn test_parse_opt() {
        let id = generate();
        assert_eq!(parse_opt(Some(id.to_string())).unwrap(), Some(id));
        assert_eq!(parse_opt(None).unwrap(), None);
        assert!(parse_opt(Some("not-a-uuid".to_string())).is_err());
    }
}
