//! The publisher's side of granting: draft, sample, negotiate, enact.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use umbral_pre::{PublicKey, SecretKeyFactory, Signer, VerifiedKeyFrag};

use crate::address::Address;
use crate::arrangement::{
    unix_now, Arrangement, ArrangementProposal, ArrangementStatus, EnactArrangement, ShareIndex,
};
use crate::config::GrantConfig;
use crate::error::{HolderFailure, PolicyError};
use crate::hrac::HRAC;
use crate::key_frag::EncryptedKeyFrag;
use crate::middleware::{Middleware, NodeDirectory};
use crate::node_metadata::NodeMetadataPayload;
use crate::policy::{validate_threshold, validate_value, Policy, PolicyState};
use crate::pre;
use crate::revocation::{self, RevocationReport};
use crate::treasure_map::TreasureMap;

/// Drives policies of one publisher through their lifecycle.
pub struct PolicyCoordinator {
    signer: Signer,
    delegating_key_factory: SecretKeyFactory,
    directory: Arc<dyn NodeDirectory>,
    middleware: Arc<dyn Middleware>,
    config: GrantConfig,
}

impl PolicyCoordinator {
    /// Creates a coordinator for the publisher owning `signer` and `delegating_key_factory`.
    pub fn new(
        signer: Signer,
        delegating_key_factory: SecretKeyFactory,
        directory: Arc<dyn NodeDirectory>,
        middleware: Arc<dyn Middleware>,
        config: GrantConfig,
    ) -> Self {
        Self {
            signer,
            delegating_key_factory,
            directory,
            middleware,
            config,
        }
    }

    /// Publisher's verifying key.
    pub fn verifying_key(&self) -> PublicKey {
        self.signer.verifying_key()
    }

    pub(crate) fn signer(&self) -> &Signer {
        &self.signer
    }

    /// The configuration in use.
    pub fn config(&self) -> &GrantConfig {
        &self.config
    }

    /// The encrypting key of the policy with the given label.
    /// Does not depend on the recipient, so data can be encrypted before any grant.
    pub fn derive_policy_key(&self, label: &[u8]) -> PublicKey {
        self.delegating_key_factory.make_key(label).public_key()
    }

    /// Drafts a policy and generates its `shares` key fragments.
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        &self,
        label: &[u8],
        bob_verifying_key: &PublicKey,
        bob_encrypting_key: &PublicKey,
        threshold: usize,
        shares: usize,
        expiration: u64,
        value: Option<u128>,
    ) -> Result<Policy, PolicyError> {
        let (threshold, shares) = validate_threshold(threshold, shares)?;
        if expiration <= unix_now() {
            return Err(PolicyError::InvalidExpiration(expiration));
        }
        if let Some(value) = value {
            validate_value(value, shares)?;
        }

        let delegating_sk = self.delegating_key_factory.make_key(label);
        let unassigned = pre::split_key(
            &delegating_sk,
            bob_encrypting_key,
            &self.signer,
            threshold,
            shares,
        )
        .into_iter()
        .collect::<BTreeMap<_, _>>();

        let hrac = HRAC::new(&self.signer.verifying_key(), bob_verifying_key, label);
        debug!(%hrac, threshold, shares, "policy drafted");

        Ok(Policy {
            label: label.into(),
            hrac,
            policy_encrypting_key: delegating_sk.public_key(),
            bob_verifying_key: *bob_verifying_key,
            bob_encrypting_key: *bob_encrypting_key,
            threshold,
            shares,
            expiration,
            value,
            state: PolicyState::Drafted,
            arrangements: Vec::new(),
            unassigned,
            outstanding: BTreeSet::new(),
        })
    }

    /// Candidate holders for a policy, best first.
    ///
    /// Handpicked holders are used as given (minus the excluded ones),
    /// but there must be at least as many of them as there are shares.
    /// Otherwise the directory is asked, and the candidates are ordered
    /// by stake (descending), then by address.
    pub async fn sample_candidates(
        &self,
        policy: &Policy,
        handpicked: Option<&[NodeMetadataPayload]>,
        exclude: &BTreeSet<Address>,
    ) -> Result<Vec<NodeMetadataPayload>, PolicyError> {
        if let Some(handpicked) = handpicked {
            if handpicked.len() < usize::from(policy.shares) {
                return Err(PolicyError::InsufficientUrsulas {
                    needed: policy.shares.into(),
                    available: handpicked.len(),
                });
            }
            return Ok(handpicked
                .iter()
                .filter(|ursula| !exclude.contains(&ursula.staking_provider_address))
                .cloned()
                .collect());
        }

        let mut candidates = self
            .directory
            .candidates(&self.config.domain, exclude)
            .await?;
        candidates.sort_by(|a, b| {
            b.stake
                .cmp(&a.stake)
                .then(a.staking_provider_address.cmp(&b.staking_provider_address))
        });
        Ok(candidates)
    }

    /// Proposes an arrangement to one holder.
    /// Returns the arrangement in the `Accepted` state, or `ArrangementRejected`.
    pub async fn negotiate(
        &self,
        policy: &Policy,
        ursula: NodeMetadataPayload,
    ) -> Result<Arrangement, PolicyError> {
        match self.propose(policy, ursula).await {
            (arrangement, Ok(())) => Ok(arrangement),
            (arrangement, Err(failure)) => Err(PolicyError::ArrangementRejected {
                address: arrangement.ursula_address(),
                failure,
            }),
        }
    }

    // The arrangement ends up `Accepted` or `Rejected`.
    async fn propose(
        &self,
        policy: &Policy,
        ursula: NodeMetadataPayload,
    ) -> (Arrangement, Result<(), HolderFailure>) {
        let mut arrangement = Arrangement::new(ursula, policy.expiration);
        let address = arrangement.ursula_address();
        let proposal = ArrangementProposal::new(
            &self.signer,
            &policy.hrac,
            &arrangement.id,
            &address,
            &policy.policy_encrypting_key,
            policy.expiration,
            policy.value_per_node(),
        );

        let response = timeout(
            self.config.negotiation_timeout,
            self.middleware.propose(&arrangement.ursula, &proposal),
        )
        .await
        .map_err(|_| HolderFailure::NetworkTimeout)
        .and_then(|result| result.map_err(HolderFailure::from))
        .and_then(|response| {
            if response.arrangement_id != arrangement.id
                || !response.verify_signature(&arrangement.ursula.verifying_key)
            {
                return Err(HolderFailure::InvalidSignature);
            }
            if !response.accepted {
                return Err(HolderFailure::Rejected("proposal declined".into()));
            }
            Ok(response)
        });

        match response {
            Ok(_) => {
                debug!(ursula = %address, hrac = %policy.hrac, "arrangement accepted");
                arrangement.status = ArrangementStatus::Accepted;
                (arrangement, Ok(()))
            }
            Err(failure) => {
                debug!(ursula = %address, hrac = %policy.hrac, %failure, "arrangement rejected");
                arrangement.status = ArrangementStatus::Rejected;
                (arrangement, Err(failure))
            }
        }
    }

    /// Hands the next unused share to the holder of an accepted arrangement
    /// and records the arrangement in the policy.
    pub async fn enact(
        &self,
        policy: &mut Policy,
        mut arrangement: Arrangement,
    ) -> Result<(), PolicyError> {
        let address = arrangement.ursula_address();
        if policy
            .arrangements
            .iter()
            .any(|other| other.ursula_address() == address && other.share.is_some())
        {
            return Err(PolicyError::DuplicateArrangement(address));
        }
        let Some((share, kfrag)) = policy.take_share() else {
            return Err(PolicyError::InsufficientUrsulas {
                needed: policy.threshold.into(),
                available: policy.count_with_status(ArrangementStatus::Enacted),
            });
        };
        let result = self
            .enact_share(policy, &mut arrangement, share, kfrag)
            .await;
        policy.arrangements.push(arrangement);
        result
    }

    async fn enact_share(
        &self,
        policy: &Policy,
        arrangement: &mut Arrangement,
        share: ShareIndex,
        kfrag: VerifiedKeyFrag,
    ) -> Result<(), PolicyError> {
        let address = arrangement.ursula_address();
        arrangement.share = Some(share);

        let encrypted_kfrag = EncryptedKeyFrag::new(
            &self.signer,
            &arrangement.ursula.encrypting_key,
            &policy.hrac,
            kfrag,
        )
        .map_err(|error| PolicyError::EnactmentFailed {
            address,
            failure: HolderFailure::Transport(error.to_string()),
        })?;
        let message =
            EnactArrangement::new(&self.signer, &arrangement.id, &policy.hrac, encrypted_kfrag);

        let mut failure = HolderFailure::NetworkTimeout;
        while arrangement.enactment_attempts < self.config.max_enactment_attempts {
            arrangement.enactment_attempts += 1;

            let outcome = timeout(
                self.config.enactment_timeout,
                self.middleware.enact(&arrangement.ursula, &message),
            )
            .await
            .map_err(|_| HolderFailure::NetworkTimeout)
            .and_then(|result| result.map_err(HolderFailure::from))
            .and_then(|ack| {
                if ack.arrangement_id == arrangement.id
                    && ack.verify_signature(&arrangement.ursula.verifying_key)
                {
                    Ok(())
                } else {
                    Err(HolderFailure::InvalidSignature)
                }
            });

            match outcome {
                Ok(()) => {
                    arrangement.status = ArrangementStatus::Enacted;
                    debug!(ursula = %address, %share, "share enacted");
                    return Ok(());
                }
                Err(error) => {
                    debug!(
                        ursula = %address,
                        %share,
                        attempt = arrangement.enactment_attempts,
                        %error,
                        "enactment attempt failed"
                    );
                    failure = error;
                }
            }
        }

        // The holder may have seen the share, so it is never handed to anyone else.
        arrangement.status = ArrangementStatus::EnactmentFailed;
        warn!(ursula = %address, %share, "share burned after failed enactment");
        Err(PolicyError::EnactmentFailed { address, failure })
    }

    /// Grants the policy: rounds of sampling, negotiation and enactment
    /// until a round ends with at least `threshold` enacted arrangements.
    ///
    /// Holders tried once are not asked again. On success the unused shares
    /// are destroyed and no more holders are added later.
    /// On failure the enacted arrangements stay in the policy, to be revoked.
    pub async fn grant(
        &self,
        policy: &mut Policy,
        handpicked: Option<&[NodeMetadataPayload]>,
    ) -> Result<TreasureMap, PolicyError> {
        if policy.check_expiration(unix_now()) {
            return Err(PolicyError::Expired(policy.hrac));
        }
        match policy.state {
            PolicyState::Active => return Ok(policy.treasure_map(&self.signer.verifying_key())),
            PolicyState::RevocationPending => {
                return Err(PolicyError::RevocationIncomplete {
                    outstanding: policy.outstanding.iter().copied().collect(),
                })
            }
            PolicyState::Revoked => return Err(PolicyError::Revoked(policy.hrac)),
            _ => {}
        }

        let threshold = usize::from(policy.threshold);
        let shares = usize::from(policy.shares);
        let mut tried: BTreeSet<Address> = policy.tried_addresses().collect();

        for round in 1..=self.config.max_rounds {
            let enacted = policy.count_with_status(ArrangementStatus::Enacted);
            if enacted + policy.unassigned_shares() < threshold {
                warn!(hrac = %policy.hrac, round, "share pool exhausted");
                break;
            }

            policy.state = PolicyState::Sampling;
            let wanted = (shares - enacted).min(policy.unassigned_shares());
            let candidates = match self.sample_candidates(policy, handpicked, &tried).await {
                Ok(candidates) => candidates,
                Err(error) => {
                    policy.state = PolicyState::Failed;
                    return Err(error);
                }
            };
            if candidates.is_empty() {
                warn!(hrac = %policy.hrac, round, "no more candidates");
                break;
            }

            let candidates: Vec<_> = candidates.into_iter().take(wanted).collect();
            tried.extend(candidates.iter().map(|ursula| ursula.staking_provider_address));
            info!(
                hrac = %policy.hrac,
                round,
                candidates = candidates.len(),
                "negotiating arrangements"
            );

            policy.state = PolicyState::Negotiating;
            let negotiated: Vec<Arrangement> = {
                let policy: &Policy = policy;
                stream::iter(candidates)
                    .map(|ursula| async move { self.propose(policy, ursula).await.0 })
                    .buffer_unordered(self.config.max_concurrency.max(1))
                    .collect()
                    .await
            };
            // Rejections stay in the policy so that a resumed grant skips them.
            let (accepted, rejected): (Vec<_>, Vec<_>) = negotiated
                .into_iter()
                .partition(|arrangement| arrangement.status == ArrangementStatus::Accepted);
            policy.arrangements.extend(rejected);

            policy.state = PolicyState::Enacted;
            let assignments: Vec<_> = accepted
                .into_iter()
                .filter_map(|arrangement| {
                    policy
                        .take_share()
                        .map(|(share, kfrag)| (arrangement, share, kfrag))
                })
                .collect();

            let finished: Vec<Arrangement> = {
                let policy: &Policy = policy;
                stream::iter(assignments)
                    .map(|(mut arrangement, share, kfrag)| async move {
                        // The outcome is recorded in the arrangement status.
                        let _ = self
                            .enact_share(policy, &mut arrangement, share, kfrag)
                            .await;
                        arrangement
                    })
                    .buffer_unordered(self.config.max_concurrency.max(1))
                    .collect()
                    .await
            };
            policy.arrangements.extend(finished);

            let enacted = policy.count_with_status(ArrangementStatus::Enacted);
            info!(hrac = %policy.hrac, round, enacted, "round finished");
            if enacted >= threshold {
                policy.unassigned.clear();
                policy.state = PolicyState::Active;
                info!(hrac = %policy.hrac, enacted, "policy active");
                return Ok(policy.treasure_map(&self.signer.verifying_key()));
            }
        }

        policy.state = PolicyState::Failed;
        let available = policy.count_with_status(ArrangementStatus::Enacted);
        warn!(hrac = %policy.hrac, enacted = available, "grant failed");
        Err(PolicyError::InsufficientUrsulas {
            needed: threshold,
            available,
        })
    }

    /// Revokes the policy on every holder that may store a key fragment.
    pub async fn revoke(&self, policy: &mut Policy) -> RevocationReport {
        revocation::revoke(&self.signer, self.middleware.as_ref(), &self.config, policy).await
    }
}
