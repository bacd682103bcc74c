//! Email address parsing (RFC 5322 §3.4) for configured identities.

/// A parsed email address.
///
/// # Examples
/// - `"Mail Service <relay@example.com>"` → `display_name = "Mail Service"`, `address = "relay@example.com"`
/// - `"ops@example.com"` → `display_name = ""`, `address = "ops@example.com"`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Parse a single address from a configuration or header value.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    ///
    /// If no angle brackets are found, the trimmed input is the address.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(angle_start), Some(angle_end)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if angle_end > angle_start {
                return Self {
                    display_name: strip_quotes(&trimmed[..angle_start]),
                    address: trimmed[angle_start + 1..angle_end].trim().to_string(),
                };
            }
        }

        Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// A syntactically plausible `local@domain` with no whitespace or brackets.
    pub fn is_valid(&self) -> bool {
        let Some((local, domain)) = self.address.rsplit_once('@') else {
            return false;
        };
        !local.is_empty()
            && !domain.is_empty()
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && !self
                .address
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | ',' | ';'))
    }

    /// A mailbox with a new display name and this address.
    pub fn named(&self, display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            address: self.address.clone(),
        }
    }

    /// Format for a header: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_address() {
        let addr = EmailAddress::parse("relay@example.com");
        assert_eq!(addr.address, "relay@example.com");
        assert_eq!(addr.display_name, "");
        assert!(addr.is_valid());
    }

    #[test]
    fn test_parse_name_and_address() {
        let addr = EmailAddress::parse("Mail Service <relay@example.com>");
        assert_eq!(addr.address, "relay@example.com");
        assert_eq!(addr.display_name, "Mail Service");
    }

    #[test]
    fn test_parse_quoted_name() {
        let addr = EmailAddress::parse("\"Last, First\" <user@example.com>");
        assert_eq!(addr.address, "user@example.com");
        assert_eq!(addr.display_name, "Last, First");
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(!EmailAddress::parse("").is_valid());
        assert!(!EmailAddress::parse("no-at-sign").is_valid());
        assert!(!EmailAddress::parse("a@").is_valid());
        assert!(!EmailAddress::parse("a b@example.com").is_valid());
    }

    #[test]
    fn test_named_display() {
        let addr = EmailAddress::parse("relay@example.com").named("Mail Service");
        assert_eq!(addr.display(), "Mail Service <relay@example.com>");
    }
}
