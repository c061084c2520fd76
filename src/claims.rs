//! Claim encoders: domain attributes to circuit input signals
//!
//! Encoders only shape signals. Flags such as `is_above_minimum` are
//! computed here in plaintext and handed to the prover; they carry no
//! zero-knowledge guarantee on their own. Soundness comes from the circuit
//! re-deriving each flag from its private inputs (`age >= minimum_age`),
//! never from trusting the value supplied here.
//!
//! Sensitive values are hashed with their salt before they leave this
//! module. Raw salts and raw document numbers never appear in a signal.

use chrono::{Datelike, NaiveDate};
use sha3::{Digest, Keccak256};

use crate::error::{Result, ServiceError};
use crate::types::ClaimInput;

pub const AGE_CIRCUIT: &str = "age_verification";
pub const CITIZENSHIP_CIRCUIT: &str = "citizenship_verification";

/// Input signals of the age circuit.
pub const AGE_SIGNALS: [&str; 4] = ["age", "minimum_age", "salt_hash", "is_above_minimum"];

/// Input signals of the citizenship circuit.
pub const CITIZENSHIP_SIGNALS: [&str; 4] =
    ["citizenship_hash", "issue_date_epoch", "salt_hash", "is_valid"];

/// Circuits this service knows how to build and encode for.
pub const KNOWN_CIRCUITS: [&str; 2] = [AGE_CIRCUIT, CITIZENSHIP_CIRCUIT];

/// Input signals a known circuit declares.
pub fn declared_signals(circuit: &str) -> Option<&'static [&'static str]> {
    match circuit {
        AGE_CIRCUIT => Some(&AGE_SIGNALS[..]),
        CITIZENSHIP_CIRCUIT => Some(&CITIZENSHIP_SIGNALS[..]),
        _ => None,
    }
}

/// Keccak-256 truncated to 31 bytes so the value always fits in the
/// BN254 scalar field, as a `0x` hex string.
pub fn field_hash(parts: &[&[u8]]) -> String {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    format!("0x{}", hex::encode(&digest[..31]))
}

/// Whole years between `dob` and `today`.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> Result<u32> {
    if dob > today {
        return Err(ServiceError::Claim(format!(
            "date of birth {} is in the future",
            dob
        )));
    }

    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    Ok(age as u32)
}

/// Encode an age claim as of `today`.
pub fn encode_age_claim(
    date_of_birth: NaiveDate,
    minimum_age: u32,
    salt: &str,
    today: NaiveDate,
) -> Result<ClaimInput> {
    require_salt(salt)?;
    let age = age_on(date_of_birth, today)?;

    Ok(ClaimInput::new()
        .with("age", age)
        .with("minimum_age", minimum_age)
        .with("salt_hash", field_hash(&[salt.as_bytes()]))
        .with("is_above_minimum", u8::from(age >= minimum_age)))
}

/// Where the citizenship `is_valid` signal comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitizenshipValidity {
    /// Use [`stub_citizenship_validity`]. Only accepted when the stub is
    /// enabled in configuration.
    Stub,
    /// Outcome of a lookup the caller performed against an authoritative
    /// registry.
    Attested(bool),
}

/// Placeholder validity: always reports the document as valid. No
/// registry is consulted. Gated by `citizenship_validity_stub`.
pub fn stub_citizenship_validity() -> bool {
    true
}

/// Encode a citizenship claim.
pub fn encode_citizenship_claim(
    citizenship_number: &str,
    issue_date: NaiveDate,
    salt: &str,
    validity: CitizenshipValidity,
    stub_enabled: bool,
) -> Result<ClaimInput> {
    require_salt(salt)?;
    let number = citizenship_number.trim();
    if number.is_empty() {
        return Err(ServiceError::Claim("citizenship number is empty".to_string()));
    }

    let is_valid = match validity {
        CitizenshipValidity::Attested(valid) => valid,
        CitizenshipValidity::Stub if stub_enabled => stub_citizenship_validity(),
        CitizenshipValidity::Stub => {
            return Err(ServiceError::Claim(
                "citizenship validity stub is disabled; an attested validity is required"
                    .to_string(),
            ))
        }
    };

    let epoch = issue_date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .filter(|secs| *secs >= 0)
        .ok_or_else(|| {
            ServiceError::Claim(format!("issue date {} precedes the Unix epoch", issue_date))
        })?;

    Ok(ClaimInput::new()
        .with("citizenship_hash", field_hash(&[number.as_bytes(), salt.as_bytes()]))
        .with("issue_date_epoch", epoch)
        .with("salt_hash", field_hash(&[salt.as_bytes()]))
        .with("is_valid", u8::from(is_valid)))
}

fn require_salt(salt: &str) -> Result<()> {
    if salt.is_empty() {
        return Err(ServiceError::Claim("salt must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_age_claim_in_2024() {
        let input = encode_age_claim(date(2000, 1, 1), 18, "abc", date(2024, 6, 1)).unwrap();

        assert_eq!(input.get("age"), Some("24"));
        assert_eq!(input.get("minimum_age"), Some("18"));
        assert_eq!(input.get("is_above_minimum"), Some("1"));
        assert_eq!(input.iter().count(), AGE_SIGNALS.len());
        for signal in AGE_SIGNALS {
            assert!(input.get(signal).is_some(), "missing {}", signal);
        }
    }

    #[test]
    fn test_age_before_birthday() {
        assert_eq!(age_on(date(2000, 6, 15), date(2024, 6, 14)).unwrap(), 23);
        assert_eq!(age_on(date(2000, 6, 15), date(2024, 6, 15)).unwrap(), 24);
        assert_eq!(age_on(date(2000, 2, 29), date(2024, 2, 28)).unwrap(), 23);
    }

    #[test]
    fn test_under_minimum() {
        let input = encode_age_claim(date(2010, 1, 1), 18, "abc", date(2024, 6, 1)).unwrap();
        assert_eq!(input.get("age"), Some("14"));
        assert_eq!(input.get("is_above_minimum"), Some("0"));
    }

    #[test]
    fn test_future_birthdate_rejected() {
        assert!(encode_age_claim(date(2030, 1, 1), 18, "abc", date(2024, 6, 1)).is_err());
    }

    #[test]
    fn test_raw_salt_never_appears() {
        let input = encode_age_claim(date(2000, 1, 1), 18, "abc", date(2024, 6, 1)).unwrap();
        let salt_hash = input.get("salt_hash").unwrap();

        assert_ne!(salt_hash, "abc");
        assert!(salt_hash.starts_with("0x"));
        assert_eq!(salt_hash.len(), 2 + 62);
        assert!(input.iter().all(|(_, v)| v != "abc"));
    }

    #[test]
    fn test_citizenship_claim_hides_number() {
        let input = encode_citizenship_claim(
            "123456789",
            date(2015, 3, 1),
            "pepper",
            CitizenshipValidity::Stub,
            true,
        )
        .unwrap();

        assert!(input.iter().all(|(_, v)| !v.contains("123456789")));
        assert_eq!(input.get("issue_date_epoch"), Some("1425168000"));
        assert_eq!(input.get("is_valid"), Some("1"));
        for signal in CITIZENSHIP_SIGNALS {
            assert!(input.get(signal).is_some(), "missing {}", signal);
        }
    }

    #[test]
    fn test_citizenship_hash_depends_on_salt() {
        let encode = |salt| {
            encode_citizenship_claim("123", date(2015, 3, 1), salt, CitizenshipValidity::Attested(true), false)
                .unwrap()
        };
        assert_ne!(
            encode("a").get("citizenship_hash"),
            encode("b").get("citizenship_hash")
        );
    }

    #[test]
    fn test_stub_validity_requires_flag() {
        let err = encode_citizenship_claim(
            "123",
            date(2015, 3, 1),
            "s",
            CitizenshipValidity::Stub,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("stub is disabled"));

        let attested = encode_citizenship_claim(
            "123",
            date(2015, 3, 1),
            "s",
            CitizenshipValidity::Attested(false),
            false,
        )
        .unwrap();
        assert_eq!(attested.get("is_valid"), Some("0"));
    }

    #[test]
    fn test_pre_epoch_issue_date_rejected() {
        let result = encode_citizenship_claim(
            "123",
            date(1960, 1, 1),
            "s",
            CitizenshipValidity::Attested(true),
            false,
        );
        assert!(result.is_err());
    }
}
