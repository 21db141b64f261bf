//! Alice and Bob: the publisher and the recipient, as seen by an application.

use std::collections::hash_map::{Entry, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::Mutex;
use umbral_pre::{PublicKey, SecretKey, SecretKeyFactory, Signer};

use crate::arrangement::unix_now;
use crate::config::{GrantConfig, RetrievalConfig};
use crate::error::{PolicyError, RetrievalError};
use crate::evidence::EvidenceQueue;
use crate::grant::PolicyCoordinator;
use crate::hrac::HRAC;
use crate::message_kit::MessageKit;
use crate::middleware::{Middleware, NodeDirectory};
use crate::node_metadata::NodeMetadataPayload;
use crate::policy::{Policy, PolicyState};
use crate::revocation::RevocationReport;
use crate::retrieval::RetrievalCoordinator;
use crate::treasure_map::{EncryptedTreasureMap, TreasureMap};

const SIGNING_KEY_LABEL: &[u8] = b"NuCypher/signing";
const DELEGATING_KEY_LABEL: &[u8] = b"NuCypher/delegating";

/// Parameters of a grant.
#[derive(Debug, Clone)]
pub struct GrantRequest<'a> {
    /// Policy label.
    pub label: &'a [u8],
    /// Bob's verifying key.
    pub bob_verifying_key: PublicKey,
    /// Bob's encrypting key.
    pub bob_encrypting_key: PublicKey,
    /// Re-encryption threshold `m`.
    pub threshold: usize,
    /// Number of holders `n`.
    pub shares: usize,
    /// Expiration (UNIX seconds).
    pub expiration: u64,
    /// Total payment, split evenly among the holders.
    pub value: Option<u128>,
    /// Holders to use instead of sampling the directory.
    pub handpicked: Option<&'a [NodeMetadataPayload]>,
}

/// The publisher.
pub struct Alice {
    coordinator: PolicyCoordinator,
    // One lock per policy, so different policies never wait for each other.
    policies: StdMutex<HashMap<HRAC, Arc<Mutex<Policy>>>>,
}

impl Alice {
    /// Creates a publisher from its signing key and delegating key factory.
    pub fn new(
        signer: Signer,
        delegating_key_factory: SecretKeyFactory,
        directory: Arc<dyn NodeDirectory>,
        middleware: Arc<dyn Middleware>,
        config: GrantConfig,
    ) -> Self {
        Self {
            coordinator: PolicyCoordinator::new(
                signer,
                delegating_key_factory,
                directory,
                middleware,
                config,
            ),
            policies: StdMutex::new(HashMap::new()),
        }
    }

    /// Derives all the publisher's keys from a seed.
    /// Fails with `AuthenticationFailed` if the seed has the wrong size.
    pub fn from_seed(
        seed: &[u8],
        directory: Arc<dyn NodeDirectory>,
        middleware: Arc<dyn Middleware>,
        config: GrantConfig,
    ) -> Result<Self, PolicyError> {
        let root = SecretKeyFactory::from_secure_randomness(seed)
            .map_err(|_| PolicyError::AuthenticationFailed)?;
        let signer = Signer::new(root.make_key(SIGNING_KEY_LABEL));
        let delegating_key_factory = root.make_factory(DELEGATING_KEY_LABEL);
        Ok(Self::new(
            signer,
            delegating_key_factory,
            directory,
            middleware,
            config,
        ))
    }

    /// Publisher's verifying key.
    pub fn verifying_key(&self) -> PublicKey {
        self.coordinator.verifying_key()
    }

    /// The key to encrypt messages for the policy with the given label.
    pub fn derive_policy_key(&self, label: &[u8]) -> PublicKey {
        self.coordinator.derive_policy_key(label)
    }

    fn policy(&self, hrac: &HRAC) -> Option<Arc<Mutex<Policy>>> {
        self.policies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hrac)
            .cloned()
    }

    /// Drafts and grants a policy, returning the treasure map for Bob.
    ///
    /// A policy stays bound to its label: a repeated grant resumes a failed
    /// policy and only re-encrypts the treasure map of an active one.
    /// Different parameters for an existing policy are refused with `ParameterMismatch`.
    pub async fn grant(
        &self,
        request: GrantRequest<'_>,
    ) -> Result<EncryptedTreasureMap, PolicyError> {
        let hrac = HRAC::new(
            &self.verifying_key(),
            &request.bob_verifying_key,
            request.label,
        );

        let (policy, drafted) = {
            let mut policies = self.policies.lock().unwrap_or_else(PoisonError::into_inner);
            match policies.entry(hrac) {
                Entry::Occupied(entry) => (entry.get().clone(), false),
                Entry::Vacant(entry) => {
                    let policy = self.coordinator.draft(
                        request.label,
                        &request.bob_verifying_key,
                        &request.bob_encrypting_key,
                        request.threshold,
                        request.shares,
                        request.expiration,
                        request.value,
                    )?;
                    (entry.insert(Arc::new(Mutex::new(policy))).clone(), true)
                }
            }
        };

        let mut policy = policy.lock().await;
        if !drafted {
            if policy.check_expiration(unix_now()) {
                return Err(PolicyError::Expired(hrac));
            }
            let same = usize::from(policy.threshold()) == request.threshold
                && usize::from(policy.shares()) == request.shares
                && policy.expiration() == request.expiration
                && policy.value() == request.value
                && policy.bob_encrypting_key == request.bob_encrypting_key;
            if !same {
                return Err(PolicyError::ParameterMismatch(hrac));
            }
        }

        let treasure_map = self
            .coordinator
            .grant(&mut policy, request.handpicked)
            .await?;
        self.encrypt_treasure_map(&treasure_map, &request.bob_encrypting_key)
    }

    fn encrypt_treasure_map(
        &self,
        treasure_map: &TreasureMap,
        bob_encrypting_key: &PublicKey,
    ) -> Result<EncryptedTreasureMap, PolicyError> {
        treasure_map
            .encrypt(self.coordinator.signer(), bob_encrypting_key)
            .map_err(|error| PolicyError::Encryption(error.to_string()))
    }

    /// Revokes the policy granted to Bob under the label.
    pub async fn revoke(
        &self,
        label: &[u8],
        bob_verifying_key: &PublicKey,
    ) -> Result<RevocationReport, PolicyError> {
        let hrac = HRAC::new(&self.verifying_key(), bob_verifying_key, label);
        let policy = self.policy(&hrac).ok_or(PolicyError::UnknownPolicy(hrac))?;
        let mut policy = policy.lock().await;
        Ok(self.coordinator.revoke(&mut policy).await)
    }

    /// State of the policy granted to Bob under the label.
    pub async fn policy_state(
        &self,
        label: &[u8],
        bob_verifying_key: &PublicKey,
    ) -> Option<PolicyState> {
        let hrac = HRAC::new(&self.verifying_key(), bob_verifying_key, label);
        let policy = self.policy(&hrac)?;
        let mut policy = policy.lock().await;
        policy.check_expiration(unix_now());
        Some(policy.state())
    }
}

/// The recipient.
pub struct Bob {
    decrypting_key: SecretKey,
    coordinator: RetrievalCoordinator,
}

impl Bob {
    /// Creates a recipient.
    pub fn new(
        signing_key: SecretKey,
        decrypting_key: SecretKey,
        directory: Arc<dyn NodeDirectory>,
        middleware: Arc<dyn Middleware>,
        config: RetrievalConfig,
        evidence: Option<EvidenceQueue>,
    ) -> Self {
        Self {
            decrypting_key,
            coordinator: RetrievalCoordinator::new(
                Signer::new(signing_key),
                directory,
                middleware,
                config,
                evidence,
            ),
        }
    }

    /// Bob's verifying key.
    pub fn verifying_key(&self) -> PublicKey {
        self.coordinator.verifying_key()
    }

    /// Bob's encrypting key.
    pub fn encrypting_key(&self) -> PublicKey {
        self.decrypting_key.public_key()
    }

    /// Opens and remembers a treasure map received from the publisher.
    pub fn join_policy(
        &self,
        encrypted_treasure_map: &EncryptedTreasureMap,
        publisher_verifying_key: &PublicKey,
    ) -> Result<HRAC, RetrievalError> {
        self.coordinator.join_policy(
            encrypted_treasure_map,
            publisher_verifying_key,
            &self.decrypting_key,
        )
    }

    /// Decrypts a message encrypted under the publisher's policy with the given label.
    pub async fn decrypt(
        &self,
        publisher_verifying_key: &PublicKey,
        label: &[u8],
        message_kit: &MessageKit,
    ) -> Result<Box<[u8]>, RetrievalError> {
        let hrac = HRAC::new(publisher_verifying_key, &self.verifying_key(), label);
        self.coordinator
            .retrieve(message_kit, &hrac, &self.decrypting_key)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Alice;
    use crate::config::GrantConfig;
    use crate::error::PolicyError;
    use crate::middleware::memory::MemoryNetwork;

    #[test]
    fn seed_must_have_the_right_size() {
        let network = Arc::new(MemoryNetwork::new());
        let result = Alice::from_seed(
            b"too short",
            network.clone(),
            network.clone(),
            GrantConfig::default(),
        );
        assert!(matches!(result, Err(PolicyError::AuthenticationFailed)));

        let seed = [7u8; 32];
        let alice =
            Alice::from_seed(&seed, network.clone(), network.clone(), GrantConfig::default())
                .unwrap();
        let again =
            Alice::from_seed(&seed, network.clone(), network, GrantConfig::default()).unwrap();
        assert_eq!(alice.verifying_key(), again.verifying_key());
        assert_eq!(alice.derive_policy_key(b"l"), again.derive_policy_key(b"l"));
    }
}
