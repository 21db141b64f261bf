//! The holder (Ursula) side of the protocol: what a node does with the
//! messages a publisher and a recipient send it.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use tracing::{debug, info};
use umbral_pre::{PublicKey, SecretKey, Signer, VerifiedKeyFrag};

use crate::address::Address;
use crate::arrangement::{
    unix_now, ArrangementId, ArrangementProposal, ArrangementResponse, EnactArrangement,
    EnactmentAck,
};
use crate::error::HolderError;
use crate::hrac::HRAC;
use crate::node_metadata::{NodeMetadata, NodeMetadataPayload};
use crate::pre;
use crate::reencryption::{ReencryptionRequest, ReencryptionResponse};
use crate::revocation_order::{RevocationAck, RevocationOrder};

struct StoredKeyFrag {
    arrangement_id: ArrangementId,
    publisher_verifying_key: PublicKey,
    expiration: u64,
    kfrag: VerifiedKeyFrag,
}

#[derive(Default)]
struct UrsulaStore {
    accepted: HashMap<ArrangementId, ArrangementProposal>,
    kfrags: HashMap<HRAC, StoredKeyFrag>,
    // Revoked policies stay here so that a late enactment cannot bring them back.
    revoked: HashSet<HRAC>,
}

/// A node holding key fragments and re-encrypting on their behalf.
pub struct Ursula {
    signer: Signer,
    decrypting_key: SecretKey,
    metadata: NodeMetadata,
    store: Mutex<UrsulaStore>,
}

impl Ursula {
    /// Creates a node and signs its metadata.
    pub fn new(
        signing_key: SecretKey,
        decrypting_key: SecretKey,
        domain: &str,
        host: &str,
        port: u16,
        stake: u128,
    ) -> Self {
        let signer = Signer::new(signing_key);
        let verifying_key = signer.verifying_key();
        let payload = NodeMetadataPayload {
            staking_provider_address: Address::from_public_key(&verifying_key),
            domain: domain.into(),
            verifying_key,
            encrypting_key: decrypting_key.public_key(),
            host: host.into(),
            port,
            stake,
        };
        let metadata = NodeMetadata::new(&signer, &payload);
        Self {
            signer,
            decrypting_key,
            metadata,
            store: Mutex::new(UrsulaStore::default()),
        }
    }

    /// The node's signed metadata.
    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    /// The node's canonical address.
    pub fn address(&self) -> Address {
        self.metadata.payload.staking_provider_address
    }

    pub(crate) fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Whether the node currently stores a key fragment for the policy.
    pub async fn holds_kfrag(&self, hrac: &HRAC) -> bool {
        self.store.lock().await.kfrags.contains_key(hrac)
    }

    /// Answers an arrangement proposal.
    pub async fn consider_arrangement(
        &self,
        proposal: ArrangementProposal,
    ) -> Result<ArrangementResponse, HolderError> {
        if !proposal.verify_signature() {
            return Err(HolderError::InvalidSignature);
        }
        if proposal.staking_provider_address != self.address() {
            return Err(HolderError::Misaddressed);
        }

        let mut store = self.store.lock().await;
        let accepted = proposal.expiration > unix_now() && !store.revoked.contains(&proposal.hrac);
        debug!(
            ursula = %self.address(),
            hrac = %proposal.hrac,
            accepted,
            "considered arrangement"
        );

        let response = ArrangementResponse::new(&self.signer, &proposal.arrangement_id, accepted);
        if accepted {
            store.accepted.insert(proposal.arrangement_id, proposal);
        }
        Ok(response)
    }

    /// Stores the key fragment of an accepted arrangement.
    /// Repeating the same enactment is acknowledged again.
    pub async fn enact(&self, message: EnactArrangement) -> Result<EnactmentAck, HolderError> {
        if !message.verify_signature() {
            return Err(HolderError::InvalidSignature);
        }

        let mut store = self.store.lock().await;
        if store.revoked.contains(&message.hrac) {
            return Err(HolderError::Revoked(message.hrac));
        }

        if let Some(stored) = store.kfrags.get(&message.hrac) {
            return if stored.arrangement_id == message.arrangement_id {
                Ok(EnactmentAck::new(&self.signer, &message.arrangement_id))
            } else {
                Err(HolderError::ConflictingEnactment(message.hrac))
            };
        }

        let proposal = store
            .accepted
            .get(&message.arrangement_id)
            .filter(|proposal| {
                proposal.hrac == message.hrac
                    && proposal.publisher_verifying_key == message.publisher_verifying_key
            })
            .ok_or(HolderError::UnknownPolicy(message.hrac))?;
        let expiration = proposal.expiration;

        let kfrag = message
            .encrypted_kfrag
            .decrypt(
                &self.decrypting_key,
                &message.hrac,
                &message.publisher_verifying_key,
            )
            .map_err(|error| HolderError::KeyFrag(error.to_string()))?;

        store.accepted.remove(&message.arrangement_id);
        store.kfrags.insert(
            message.hrac,
            StoredKeyFrag {
                arrangement_id: message.arrangement_id,
                publisher_verifying_key: message.publisher_verifying_key,
                expiration,
                kfrag,
            },
        );
        info!(ursula = %self.address(), hrac = %message.hrac, "arrangement enacted");

        Ok(EnactmentAck::new(&self.signer, &message.arrangement_id))
    }

    /// Re-encrypts a capsule for Bob.
    pub async fn reencrypt(
        &self,
        request: ReencryptionRequest,
    ) -> Result<ReencryptionResponse, HolderError> {
        let store = self.store.lock().await;
        if store.revoked.contains(&request.hrac) {
            return Err(HolderError::Revoked(request.hrac));
        }

        let stored = store
            .kfrags
            .get(&request.hrac)
            .filter(|stored| stored.publisher_verifying_key == request.publisher_verifying_key)
            .ok_or(HolderError::UnknownPolicy(request.hrac))?;

        if stored.expiration <= unix_now() {
            return Err(HolderError::Expired(request.hrac));
        }
        if !request.verify_task(&self.signer.verifying_key()) {
            return Err(HolderError::InvalidSignature);
        }

        let vcfrag = pre::reencrypt(&request.capsule, stored.kfrag.clone());
        debug!(ursula = %self.address(), hrac = %request.hrac, "re-encrypted a capsule");

        Ok(ReencryptionResponse::new(
            &self.signer,
            &request.capsule,
            vcfrag,
            &request.task_signature,
        ))
    }

    /// Deletes the key fragment of a policy. Repeated orders are acknowledged again.
    pub async fn revoke(&self, order: RevocationOrder) -> Result<RevocationAck, HolderError> {
        if order.staking_provider_address != self.address() {
            return Err(HolderError::Misaddressed);
        }

        let mut store = self.store.lock().await;
        if store.revoked.contains(&order.hrac) {
            return Ok(RevocationAck::new(&self.signer, &self.address(), &order.hrac));
        }

        let publisher_verifying_key = store
            .kfrags
            .get(&order.hrac)
            .map(|stored| stored.publisher_verifying_key)
            .or_else(|| {
                store
                    .accepted
                    .values()
                    .find(|proposal| proposal.hrac == order.hrac)
                    .map(|proposal| proposal.publisher_verifying_key)
            });

        match publisher_verifying_key {
            Some(key) => {
                if !order.verify_signature(&key) {
                    return Err(HolderError::InvalidSignature);
                }
                store.kfrags.remove(&order.hrac);
                store.accepted.retain(|_, proposal| proposal.hrac != order.hrac);
                store.revoked.insert(order.hrac);
                info!(ursula = %self.address(), hrac = %order.hrac, "policy revoked");
            }
            // Nothing is stored for an unknown policy, so there is nothing to delete.
            None => {
                debug!(ursula = %self.address(), hrac = %order.hrac, "revocation of unknown policy")
            }
        }

        Ok(RevocationAck::new(&self.signer, &self.address(), &order.hrac))
    }
}
