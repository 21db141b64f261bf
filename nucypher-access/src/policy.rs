use std::collections::{BTreeMap, BTreeSet};

use umbral_pre::{PublicKey, VerifiedKeyFrag};

use crate::address::Address;
use crate::arrangement::{Arrangement, ArrangementStatus, ShareIndex};
use crate::error::PolicyError;
use crate::hrac::HRAC;
use crate::treasure_map::TreasureMap;

/// Lifecycle of a policy on the publisher's side.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum PolicyState {
    /// Key fragments generated, nobody contacted yet.
    Drafted,
    /// Looking for holders.
    Sampling,
    /// Waiting for proposal responses.
    Negotiating,
    /// Key fragments are being delivered.
    Enacted,
    /// At least `threshold` holders store a key fragment.
    Active,
    /// The grant gave up.
    Failed,
    /// Some holders have not confirmed the revocation yet.
    RevocationPending,
    /// Every holder confirmed the revocation.
    Revoked,
    /// The expiration has passed.
    Expired,
}

/// Checks `1 <= threshold <= shares <= 255`.
pub fn validate_threshold(threshold: usize, shares: usize) -> Result<(u8, u8), PolicyError> {
    let invalid = PolicyError::InvalidThreshold { threshold, shares };
    if threshold < 1 || threshold > shares {
        return Err(invalid);
    }
    let shares = u8::try_from(shares).map_err(|_| invalid)?;
    // `threshold <= shares <= 255`, so the conversion cannot fail.
    Ok((threshold as u8, shares))
}

/// Checks that the total value can be paid out in equal parts to `shares` holders.
/// Returns the value per holder.
pub fn validate_value(value: u128, shares: u8) -> Result<u128, PolicyError> {
    if value == 0 {
        return Err(PolicyError::InvalidPolicyValue(
            "policy value must be positive".into(),
        ));
    }
    let shares = u128::from(shares);
    if value % shares != 0 {
        return Err(PolicyError::InvalidPolicyValue(format!(
            "policy value of {value} cannot be divided into {shares} equal parts"
        )));
    }
    Ok(value / shares)
}

/// A policy drafted by a publisher for one recipient and label.
#[derive(Debug)]
pub struct Policy {
    pub(crate) label: Box<[u8]>,
    pub(crate) hrac: HRAC,
    pub(crate) policy_encrypting_key: PublicKey,
    pub(crate) bob_verifying_key: PublicKey,
    pub(crate) bob_encrypting_key: PublicKey,
    pub(crate) threshold: u8,
    pub(crate) shares: u8,
    pub(crate) expiration: u64,
    pub(crate) value: Option<u128>,
    pub(crate) state: PolicyState,
    pub(crate) arrangements: Vec<Arrangement>,
    // Key fragments not handed to anybody yet.
    pub(crate) unassigned: BTreeMap<ShareIndex, VerifiedKeyFrag>,
    // Holders that have not confirmed the revocation.
    pub(crate) outstanding: BTreeSet<Address>,
}

impl Policy {
    /// The label the policy was created for.
    pub fn label(&self) -> &[u8] {
        &self.label
    }

    /// Policy HRAC.
    pub fn hrac(&self) -> HRAC {
        self.hrac
    }

    /// The key messages under this policy are encrypted with.
    pub fn policy_encrypting_key(&self) -> PublicKey {
        self.policy_encrypting_key
    }

    /// Recipient's verifying key.
    pub fn bob_verifying_key(&self) -> PublicKey {
        self.bob_verifying_key
    }

    /// Re-encryption threshold `m`.
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Number of key fragments `n`.
    pub fn shares(&self) -> u8 {
        self.shares
    }

    /// Expiration (UNIX seconds).
    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    /// Total payment for the policy, if any.
    pub fn value(&self) -> Option<u128> {
        self.value
    }

    /// Payment offered to each holder.
    pub fn value_per_node(&self) -> Option<u128> {
        self.value.map(|value| value / u128::from(self.shares))
    }

    /// Current state.
    pub fn state(&self) -> PolicyState {
        self.state
    }

    /// Every arrangement proposed so far, rejected ones included.
    pub fn arrangements(&self) -> &[Arrangement] {
        &self.arrangements
    }

    /// Arrangements whose holder stores a key fragment.
    pub fn enacted(&self) -> impl Iterator<Item = &Arrangement> {
        self.arrangements.iter().filter(|arrangement| arrangement.holds_kfrag())
    }

    /// Number of key fragments not handed out yet.
    pub fn unassigned_shares(&self) -> usize {
        self.unassigned.len()
    }

    /// Holders that have not confirmed the revocation.
    pub fn outstanding(&self) -> &BTreeSet<Address> {
        &self.outstanding
    }

    /// Marks the policy expired if its expiration has passed. Returns `true` if it is expired.
    ///
    /// A policy with a revocation under way keeps its state, so that the
    /// outstanding holders can still be revoked.
    pub fn check_expiration(&mut self, now: u64) -> bool {
        let revoking = matches!(
            self.state,
            PolicyState::RevocationPending | PolicyState::Revoked
        );
        if self.expiration <= now && !revoking {
            self.state = PolicyState::Expired;
        }
        self.state == PolicyState::Expired
    }

    /// The holder list of the policy.
    pub fn treasure_map(&self, publisher_verifying_key: &PublicKey) -> TreasureMap {
        let destinations = self
            .enacted()
            .map(|arrangement| (arrangement.ursula_address(), arrangement.id))
            .collect();
        TreasureMap::new(
            publisher_verifying_key,
            &self.hrac,
            &self.policy_encrypting_key,
            destinations,
            self.threshold,
        )
    }

    pub(crate) fn take_share(&mut self) -> Option<(ShareIndex, VerifiedKeyFrag)> {
        self.unassigned.pop_first()
    }

    pub(crate) fn tried_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.arrangements.iter().map(Arrangement::ursula_address)
    }

    pub(crate) fn count_with_status(&self, status: ArrangementStatus) -> usize {
        self.arrangements
            .iter()
            .filter(|arrangement| arrangement.status == status)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{validate_threshold, validate_value};
    use crate::error::PolicyError;

    #[test]
    fn threshold_bounds() {
        assert_eq!(validate_threshold(1, 1).unwrap(), (1, 1));
        assert_eq!(validate_threshold(2, 3).unwrap(), (2, 3));
        assert_eq!(validate_threshold(255, 255).unwrap(), (255, 255));
        assert!(validate_threshold(0, 3).is_err());
        assert!(validate_threshold(4, 3).is_err());
        assert!(matches!(
            validate_threshold(2, 256),
            Err(PolicyError::InvalidThreshold {
                threshold: 2,
                shares: 256
            })
        ));
    }

    #[test]
    fn value_split() {
        assert_eq!(validate_value(300, 3).unwrap(), 100);
        assert!(matches!(
            validate_value(301, 3),
            Err(PolicyError::InvalidPolicyValue(_))
        ));
        assert!(validate_value(0, 3).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn threshold_accepted_iff_in_range(threshold in 0usize..300, shares in 0usize..300) {
            let valid = threshold >= 1 && threshold <= shares && shares <= 255;
            prop_assert_eq!(validate_threshold(threshold, shares).is_ok(), valid);
        }
    }
}
