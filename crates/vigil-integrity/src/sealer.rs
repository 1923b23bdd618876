//! Sealing and verification of activity records.
//!
//! A seal is `HMAC-SHA256(secret_key, canonical_bytes(record))`, hex-encoded.
//! Verification mismatches are expected data-quality findings and come back
//! as values; only structural problems (missing key, corrupt signature
//! encoding) are errors.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use vigil_core::traits::SecretsProvider;
use vigil_core::ActivityRecord;

use crate::canonical::canonical_bytes;

type HmacSha256 = Hmac<Sha256>;

/// Structural errors from sealing or verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// No MAC key is provisioned.
    #[error("no MAC key provisioned")]
    MissingKey,

    /// The provisioned key was rejected by the MAC implementation.
    #[error("invalid MAC key")]
    InvalidKey,

    /// The record already carries a signature; sealed records are immutable.
    #[error("record {0} is already sealed")]
    AlreadySealed(i64),

    /// The stored signature is not valid hex.
    #[error("malformed signature encoding on record {record_id}: {reason}")]
    MalformedSignature {
        /// Record whose signature could not be decoded.
        record_id: i64,
        /// Decoder failure detail.
        reason: String,
    },
}

/// Outcome of verifying one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Signature matches the record's current field values.
    Valid,
    /// Signature does not match — the record changed after sealing, or the
    /// signature was replaced. Carries both digests for diagnostics.
    Mismatch {
        /// Hex digest stored on the record.
        expected: String,
        /// Hex digest recomputed from the current field values.
        actual: String,
    },
    /// The record has no signature to check.
    Unsealed,
}

impl Verification {
    /// Whether the record verified cleanly.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Summary of a batch verification sweep.
#[derive(Debug, Clone, Default)]
pub struct BatchVerification {
    /// Per-record verdicts; `false` covers mismatches, malformed
    /// signatures, and unsealed records alike.
    pub outcomes: HashMap<i64, bool>,
    /// Records inspected.
    pub checked: u64,
    /// Records that verified cleanly.
    pub passed: u64,
    /// Records with a mismatching or undecodable signature.
    pub failed: u64,
    /// Records that were never sealed.
    pub unsealed: u64,
}

/// Computes and checks tamper-evident signatures over activity records.
///
/// The key is read once at construction; [`IntegritySealer::reload_key`] is
/// the explicit rotation boundary.
pub struct IntegritySealer {
    key: Vec<u8>,
}

impl IntegritySealer {
    /// Creates a sealer with the key from the secrets provider.
    pub fn new(secrets: &dyn SecretsProvider) -> Result<Self, IntegrityError> {
        let key = secrets.mac_key().ok_or(IntegrityError::MissingKey)?;
        Ok(Self { key })
    }

    /// Re-reads the key from the provider, replacing the current one.
    pub fn reload_key(&mut self, secrets: &dyn SecretsProvider) -> Result<(), IntegrityError> {
        self.key = secrets.mac_key().ok_or(IntegrityError::MissingKey)?;
        Ok(())
    }

    /// Computes the hex signature for an unsealed record.
    pub fn seal(&self, record: &ActivityRecord) -> Result<String, IntegrityError> {
        if record.is_sealed() {
            return Err(IntegrityError::AlreadySealed(record.id));
        }
        Ok(hex::encode(self.mac_bytes(record)?))
    }

    /// Seals a record in place, attaching the signature.
    pub fn seal_in_place(&self, record: &mut ActivityRecord) -> Result<(), IntegrityError> {
        let signature = self.seal(record)?;
        debug!(record_id = record.id, "record sealed");
        record.signature = Some(signature);
        Ok(())
    }

    /// Verifies a record's signature against its current field values.
    ///
    /// A mismatch is reported as data, not an error; the comparison is
    /// constant-time. Idempotent and side-effect free.
    pub fn verify(&self, record: &ActivityRecord) -> Result<Verification, IntegrityError> {
        let Some(stored) = record.signature.as_deref() else {
            return Ok(Verification::Unsealed);
        };

        let stored_bytes =
            hex::decode(stored).map_err(|e| IntegrityError::MalformedSignature {
                record_id: record.id,
                reason: e.to_string(),
            })?;

        let mut mac = self.mac()?;
        let canonical = canonical_bytes(record);
        mac.update(&canonical);

        // Constant-time comparison via the MAC itself.
        if mac.verify_slice(&stored_bytes).is_ok() {
            return Ok(Verification::Valid);
        }

        let actual = hex::encode(self.mac_bytes(record)?);
        warn!(
            record_id = record.id,
            expected = stored,
            actual = %actual,
            "record failed integrity verification"
        );
        Ok(Verification::Mismatch {
            expected: stored.to_string(),
            actual,
        })
    }

    /// Verifies every record independently; one malformed record reports as
    /// failed rather than aborting the batch.
    pub fn verify_batch(&self, records: &[ActivityRecord]) -> BatchVerification {
        let mut batch = BatchVerification::default();
        for record in records {
            batch.checked += 1;
            let verdict = match self.verify(record) {
                Ok(Verification::Valid) => {
                    batch.passed += 1;
                    true
                }
                Ok(Verification::Unsealed) => {
                    batch.unsealed += 1;
                    false
                }
                Ok(Verification::Mismatch { .. }) => {
                    batch.failed += 1;
                    false
                }
                Err(e) => {
                    warn!(record_id = record.id, error = %e, "verification error, counting record as failed");
                    batch.failed += 1;
                    false
                }
            };
            batch.outcomes.insert(record.id, verdict);
        }
        batch
    }

    fn mac(&self) -> Result<HmacSha256, IntegrityError> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| IntegrityError::InvalidKey)
    }

    fn mac_bytes(&self, record: &ActivityRecord) -> Result<Vec<u8>, IntegrityError> {
        let mut mac = self.mac()?;
        mac.update(&canonical_bytes(record));
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;
    use vigil_core::mocks::StaticSecrets;

    fn sealer() -> IntegritySealer {
        IntegritySealer::new(&StaticSecrets::with_key(b"test-mac-key".to_vec())).unwrap()
    }

    fn record(id: i64) -> ActivityRecord {
        let mut properties = serde_json::Map::new();
        properties.insert("path".to_string(), json!("/dashboard"));
        ActivityRecord {
            id,
            activity_type: "page_view".to_string(),
            module: "dashboard".to_string(),
            description: "Viewed dashboard".to_string(),
            user_id: Some(3),
            subject: None,
            ip_address: Some("10.1.2.3".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            properties,
            risk_level: 1,
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            signature: None,
        }
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let result = IntegritySealer::new(&StaticSecrets::empty());
        assert!(matches!(result, Err(IntegrityError::MissingKey)));
    }

    #[test]
    fn seal_verify_round_trip() {
        let sealer = sealer();
        let mut r = record(1);
        sealer.seal_in_place(&mut r).unwrap();
        assert!(r.is_sealed());
        assert_eq!(sealer.verify(&r).unwrap(), Verification::Valid);
    }

    #[test]
    fn any_field_mutation_breaks_the_seal() {
        let sealer = sealer();
        let mut r = record(1);
        sealer.seal_in_place(&mut r).unwrap();

        let mut tampered = r.clone();
        tampered.description = "Viewed admin panel".to_string();
        assert!(matches!(
            sealer.verify(&tampered).unwrap(),
            Verification::Mismatch { .. }
        ));

        let mut tampered = r.clone();
        tampered.risk_level = 9;
        assert!(!sealer.verify(&tampered).unwrap().is_valid());

        let mut tampered = r.clone();
        tampered.user_id = None;
        assert!(!sealer.verify(&tampered).unwrap().is_valid());

        let mut tampered = r;
        tampered
            .properties
            .insert("path".to_string(), json!("/admin"));
        assert!(!sealer.verify(&tampered).unwrap().is_valid());
    }

    #[test]
    fn mismatch_carries_both_digests() {
        let sealer = sealer();
        let mut r = record(1);
        sealer.seal_in_place(&mut r).unwrap();
        let stored = r.signature.clone().unwrap();
        r.module = "admin".to_string();

        match sealer.verify(&r).unwrap() {
            Verification::Mismatch { expected, actual } => {
                assert_eq!(expected, stored);
                assert_ne!(expected, actual);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn sealing_twice_is_rejected() {
        let sealer = sealer();
        let mut r = record(1);
        sealer.seal_in_place(&mut r).unwrap();
        assert_eq!(
            sealer.seal(&r),
            Err(IntegrityError::AlreadySealed(1))
        );
    }

    #[test]
    fn unsealed_record_is_not_an_error() {
        let sealer = sealer();
        assert_eq!(sealer.verify(&record(1)).unwrap(), Verification::Unsealed);
    }

    #[test]
    fn corrupt_signature_encoding_is_an_error() {
        let sealer = sealer();
        let mut r = record(1);
        r.signature = Some("not-hex!".to_string());
        assert!(matches!(
            sealer.verify(&r),
            Err(IntegrityError::MalformedSignature { record_id: 1, .. })
        ));
    }

    #[test]
    fn different_keys_do_not_cross_verify() {
        let sealer_a = sealer();
        let sealer_b =
            IntegritySealer::new(&StaticSecrets::with_key(b"other-key".to_vec())).unwrap();

        let mut r = record(1);
        sealer_a.seal_in_place(&mut r).unwrap();
        assert!(!sealer_b.verify(&r).unwrap().is_valid());
    }

    #[test]
    fn key_reload_replaces_the_key() {
        let mut sealer = sealer();
        let mut r = record(1);
        sealer.seal_in_place(&mut r).unwrap();

        sealer
            .reload_key(&StaticSecrets::with_key(b"rotated".to_vec()))
            .unwrap();
        assert!(!sealer.verify(&r).unwrap().is_valid());
    }

    #[test]
    fn batch_verification_isolates_failures() {
        let sealer = sealer();

        let mut good = record(1);
        sealer.seal_in_place(&mut good).unwrap();

        let mut tampered = record(2);
        sealer.seal_in_place(&mut tampered).unwrap();
        tampered.description = "changed".to_string();

        let mut malformed = record(3);
        malformed.signature = Some("zz".to_string());

        let unsealed = record(4);

        let batch = sealer.verify_batch(&[good, tampered, malformed, unsealed]);
        assert_eq!(batch.checked, 4);
        assert_eq!(batch.passed, 1);
        assert_eq!(batch.failed, 2);
        assert_eq!(batch.unsealed, 1);
        assert_eq!(batch.outcomes[&1], true);
        assert_eq!(batch.outcomes[&2], false);
        assert_eq!(batch.outcomes[&3], false);
        assert_eq!(batch.outcomes[&4], false);
    }
}
