use std::fmt;

use super::WithdrawalId;

/// Prefix shared by every withdrawal reference.
pub const REFERENCE_PREFIX: &str = "WDR-";

/// Build the human-readable reference for a withdrawal request.
///
/// The reference is a pure function of the durable request id, so it must only be
/// computed once the id has been assigned by the store. Ids up to 999999 render as
/// exactly six zero-padded digits; larger ids simply grow.
pub fn format_reference(id: WithdrawalId) -> String {
    format!("{}{:06}", REFERENCE_PREFIX, id)
}

/// Recover the withdrawal id from a reference.
/// Only canonical references (as produced by [`format_reference`]) are accepted.
pub fn parse_reference(reference: &str) -> Result<WithdrawalId, ReferenceError> {
    let digits = reference
        .strip_prefix(REFERENCE_PREFIX)
        .ok_or(ReferenceError::MissingPrefix)?;

    if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ReferenceError::InvalidDigits);
    }

    let id: WithdrawalId = digits.parse().map_err(|_| ReferenceError::InvalidDigits)?;
    if id <= 0 || format_reference(id) != reference {
        return Err(ReferenceError::NotCanonical);
    }

    Ok(id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    MissingPrefix,
    InvalidDigits,
    NotCanonical,
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceError::MissingPrefix => {
                write!(f, "reference must start with {}", REFERENCE_PREFIX)
            }
            ReferenceError::InvalidDigits => {
                write!(f, "reference must end with at least 6 digits")
            }
            ReferenceError::NotCanonical => write!(f, "reference is not in canonical form"),
        }
    }
}

impl std::error::Error for ReferenceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_reference_pads_to_six_digits() {
        assert_eq!(format_reference(1), "WDR-000001");
        assert_eq!(format_reference(5), "WDR-000005");
        assert_eq!(format_reference(123456), "WDR-123456");
        assert_eq!(format_reference(999999), "WDR-999999");
    }

    #[test]
    fn test_format_reference_grows_past_six_digits() {
        assert_eq!(format_reference(1_000_000), "WDR-1000000");
        assert_ne!(format_reference(1_000_000), format_reference(100_000));
    }

    #[test]
    fn test_parse_reference_roundtrip() {
        for id in [1, 9, 10, 99_999, 100_000, 999_999, 1_000_000, 42_424_242, i64::MAX] {
            assert_eq!(parse_reference(&format_reference(id)), Ok(id));
        }
    }

    #[test]
    fn test_format_reference_shape() {
        for id in [1, 77, 4_096, 999_999] {
            let reference = format_reference(id);
            assert_eq!(reference.len(), 10);
            assert!(reference[4..].bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_parse_reference_rejects_malformed() {
        assert_eq!(parse_reference("000001"), Err(ReferenceError::MissingPrefix));
        assert_eq!(parse_reference("wdr-000001"), Err(ReferenceError::MissingPrefix));
        assert_eq!(parse_reference("WDR-1"), Err(ReferenceError::InvalidDigits));
        assert_eq!(parse_reference("WDR-00000a"), Err(ReferenceError::InvalidDigits));
        assert_eq!(parse_reference("WDR-000000"), Err(ReferenceError::NotCanonical));
        assert_eq!(parse_reference("WDR-0000001"), Err(ReferenceError::NotCanonical));
    }
}
