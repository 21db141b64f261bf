//! The recipient's side: collecting capsule frags and decrypting.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use futures::stream::{self, StreamExt};
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use umbral_pre::{Capsule, PublicKey, SecretKey, Signer, VerifiedCapsuleFrag};

use crate::address::Address;
use crate::config::RetrievalConfig;
use crate::error::{HolderFailure, RetrievalError};
use crate::evidence::{build_evidence, EvidenceContext, EvidenceQueue};
use crate::hrac::HRAC;
use crate::message_kit::MessageKit;
use crate::middleware::{Middleware, NodeDirectory};
use crate::node_metadata::NodeMetadataPayload;
use crate::pre::{verify_correctness, CorrectnessKeys};
use crate::reencryption::ReencryptionRequest;
use crate::treasure_map::{EncryptedTreasureMap, TreasureMap};

struct JoinedPolicy {
    treasure_map: Arc<TreasureMap>,
    // Resolved once per session.
    holders: Arc<OnceCell<Vec<NodeMetadataPayload>>>,
}

/// Collects capsule frags from the holders of joined policies.
pub struct RetrievalCoordinator {
    signer: Signer,
    directory: Arc<dyn NodeDirectory>,
    middleware: Arc<dyn Middleware>,
    config: RetrievalConfig,
    evidence: Option<EvidenceQueue>,
    policies: RwLock<HashMap<HRAC, JoinedPolicy>>,
}

impl RetrievalCoordinator {
    /// Creates a coordinator for Bob owning `signer`.
    /// Evidence of incorrect re-encryption goes to `evidence`, if given.
    pub fn new(
        signer: Signer,
        directory: Arc<dyn NodeDirectory>,
        middleware: Arc<dyn Middleware>,
        config: RetrievalConfig,
        evidence: Option<EvidenceQueue>,
    ) -> Self {
        Self {
            signer,
            directory,
            middleware,
            config,
            evidence,
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Bob's verifying key.
    pub fn verifying_key(&self) -> PublicKey {
        self.signer.verifying_key()
    }

    /// Opens the treasure map of a policy and remembers it.
    pub fn join_policy(
        &self,
        encrypted_treasure_map: &EncryptedTreasureMap,
        publisher_verifying_key: &PublicKey,
        bob_secret_key: &SecretKey,
    ) -> Result<HRAC, RetrievalError> {
        let treasure_map = encrypted_treasure_map.decrypt(bob_secret_key, publisher_verifying_key)?;
        let hrac = treasure_map.hrac;
        info!(%hrac, holders = treasure_map.destinations.len(), "joined policy");

        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                hrac,
                JoinedPolicy {
                    treasure_map: Arc::new(treasure_map),
                    holders: Arc::new(OnceCell::new()),
                },
            );
        Ok(hrac)
    }

    fn joined(
        &self,
        hrac: &HRAC,
    ) -> Result<(Arc<TreasureMap>, Arc<OnceCell<Vec<NodeMetadataPayload>>>), RetrievalError> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hrac)
            .map(|joined| (joined.treasure_map.clone(), joined.holders.clone()))
            .ok_or(RetrievalError::UnknownPolicy(*hrac))
    }

    /// Retrieves `threshold` verified capsule frags for the message and decrypts it.
    pub async fn retrieve(
        &self,
        message_kit: &MessageKit,
        hrac: &HRAC,
        bob_secret_key: &SecretKey,
    ) -> Result<Box<[u8]>, RetrievalError> {
        let (treasure_map, holders) = self.joined(hrac)?;
        let holders = holders
            .get_or_try_init(|| self.directory.resolve_holders(&treasure_map))
            .await?;

        let threshold = usize::from(treasure_map.threshold);
        let keys = CorrectnessKeys {
            delegating: treasure_map.policy_encrypting_key,
            receiving: bob_secret_key.public_key(),
            verifying: treasure_map.publisher_verifying_key,
        };
        let context = EvidenceContext {
            hrac: *hrac,
            publisher_verifying_key: treasure_map.publisher_verifying_key,
            policy_encrypting_key: treasure_map.policy_encrypting_key,
        };
        let capsule = message_kit.capsule();

        let mut cfrags = BTreeMap::<Address, VerifiedCapsuleFrag>::new();
        let mut pending = holders.len();
        if pending >= threshold {
            let mut responses = stream::iter(holders)
                .map(|ursula| self.request_cfrag(ursula, capsule, &keys, &context))
                .buffer_unordered(self.config.max_concurrency.max(1));

            while let Some((address, outcome)) = responses.next().await {
                pending -= 1;
                match outcome {
                    Ok(cfrag) => {
                        cfrags.insert(address, cfrag);
                    }
                    Err(failure) => debug!(ursula = %address, %failure, "no capsule frag"),
                }
                if cfrags.len() >= threshold || cfrags.len() + pending < threshold {
                    // Dropping the stream cancels the requests still in flight.
                    break;
                }
            }
        }

        if cfrags.len() < threshold {
            warn!(%hrac, threshold, received = cfrags.len(), "not enough capsule frags");
            return Err(RetrievalError::InsufficientCFrags {
                threshold,
                received: cfrags.len(),
            });
        }

        let cfrags: Vec<_> = cfrags.into_values().take(threshold).collect();
        message_kit
            .decrypt_reencrypted(bob_secret_key, &treasure_map.policy_encrypting_key, cfrags)
            .map_err(|error| RetrievalError::DecryptionFailed(error.to_string()))
    }

    async fn request_cfrag(
        &self,
        ursula: &NodeMetadataPayload,
        capsule: &Capsule,
        keys: &CorrectnessKeys,
        context: &EvidenceContext,
    ) -> (Address, Result<VerifiedCapsuleFrag, HolderFailure>) {
        let address = ursula.staking_provider_address;
        let request = ReencryptionRequest::new(
            &self.signer,
            capsule,
            &context.hrac,
            &context.publisher_verifying_key,
            &ursula.verifying_key,
        );

        let response = match timeout(
            self.config.request_timeout,
            self.middleware.reencrypt(ursula, &request),
        )
        .await
        {
            Err(_) => return (address, Err(HolderFailure::NetworkTimeout)),
            Ok(Err(error)) => return (address, Err(error.into())),
            Ok(Ok(response)) => response,
        };

        if !response.verify_signature(capsule, &request.task_signature, &ursula.verifying_key) {
            return (address, Err(HolderFailure::InvalidSignature));
        }

        let (cfrag, signature) = response.into_parts();
        match verify_correctness(capsule, cfrag, keys) {
            Ok(vcfrag) => (address, Ok(vcfrag)),
            Err(cfrag) => {
                warn!(ursula = %address, hrac = %context.hrac, "incorrect capsule frag");
                match build_evidence(
                    capsule,
                    &cfrag,
                    &signature,
                    &request.task_signature,
                    &ursula.verifying_key,
                    &request.bob_verifying_key,
                    context,
                ) {
                    Ok(evidence) => {
                        if let Some(queue) = &self.evidence {
                            queue.push(evidence);
                        }
                    }
                    Err(error) => warn!(ursula = %address, %error, "cannot build evidence"),
                }
                (address, Err(HolderFailure::CorrectnessProofFailure))
            }
        }
    }
}
