//! Input validation shared by checkout and the payment gateways.

use thiserror::Error;

/// Rejected input. Nothing is persisted or sent to a provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Order has no line items
    #[error("order must contain at least one line item")]
    NoLineItems,

    /// Line item with quantity zero
    #[error("line item {index} must have a quantity of at least 1")]
    ZeroQuantity {
        /// Line index
        index: usize,
    },

    /// Line item or add-on without a name
    #[error("{field} must not be empty")]
    EmptyName {
        /// Offending field, e.g. `items[0].name`
        field: String,
    },

    /// Buyer name missing
    #[error("contact name is required")]
    MissingContactName,

    /// Email present but malformed
    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    /// Hosted card checkout without an email
    #[error("email is required for card checkout")]
    MissingEmail,

    /// Mobile money without a phone number
    #[error("phone number is required for mobile money")]
    MissingPhone,

    /// Phone number that is not a valid mobile number
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    /// Zero amount sent for payment
    #[error("payment amount must be positive")]
    NonPositiveAmount,

    /// Totals do not fit in the money type
    #[error("order totals overflow")]
    AmountOverflow,
}

/// Minimal syntactic email check: one `@`, a non-empty local part and a
/// dotted domain without spaces.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && tld.len() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(is_valid_email("jane@example.com"));
        assert!(is_valid_email("  jane.doe+tickets@mail.example.co.ke "));
    }

    #[test]
    fn rejects_malformed_addresses() {
        for email in ["", "jane", "jane@", "@example.com", "jane@example", "ja ne@example.com", "a@b@c.com", "jane@.c"] {
            assert!(!is_valid_email(email), "{email} should be rejected");
        }
    }
}
