use core::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use umbral_pre::{PublicKey, Signature, Signer};

use crate::address::Address;
use crate::hrac::HRAC;
use crate::key_frag::EncryptedKeyFrag;
use crate::node_metadata::NodeMetadataPayload;
use crate::versioning::{messagepack_serialize, ProtocolObject, ProtocolObjectInner};

/// Current UNIX time in seconds; expirations are expressed in it.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Identifier of an arrangement between a publisher and one holder.
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Copy, Clone, Serialize, Deserialize)]
pub struct ArrangementId(#[serde(with = "crate::arrays_as_bytes")] [u8; ArrangementId::SIZE]);

impl ArrangementId {
    /// The size of the identifier in bytes.
    pub const SIZE: usize = 32;

    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        let mut bytes = [0u8; Self::SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl From<[u8; ArrangementId::SIZE]> for ArrangementId {
    fn from(bytes: [u8; ArrangementId::SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ArrangementId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Display for ArrangementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Position of a key fragment among the `n` generated for a policy.
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Copy, Clone, Serialize, Deserialize)]
pub struct ShareIndex(pub u8);

impl fmt::Display for ShareIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an arrangement is in its lifecycle.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum ArrangementStatus {
    /// The proposal is out, no answer yet.
    Proposed,
    /// The holder agreed to the terms; no share assigned yet.
    Accepted,
    /// The holder declined, timed out or could not be reached.
    Rejected,
    /// The holder stores a key fragment for the policy.
    Enacted,
    /// Enactment attempts were exhausted; the share is burned.
    EnactmentFailed,
    /// The holder confirmed it deleted the key fragment.
    Revoked,
}

/// One (policy, holder) binding.
#[derive(PartialEq, Debug, Clone)]
pub struct Arrangement {
    /// Arrangement identifier.
    pub id: ArrangementId,
    /// The holder's published metadata.
    pub ursula: NodeMetadataPayload,
    /// Expiration of the policy (UNIX seconds).
    pub expiration: u64,
    /// Current status.
    pub status: ArrangementStatus,
    /// The share handed to the holder, once enactment started.
    pub share: Option<ShareIndex>,
    /// Number of enactment attempts made so far.
    pub enactment_attempts: u32,
}

impl Arrangement {
    /// Creates a new arrangement in the `Proposed` state.
    pub fn new(ursula: NodeMetadataPayload, expiration: u64) -> Self {
        Self {
            id: ArrangementId::random(),
            ursula,
            expiration,
            status: ArrangementStatus::Proposed,
            share: None,
            enactment_attempts: 0,
        }
    }

    /// The holder's canonical address.
    pub fn ursula_address(&self) -> Address {
        self.ursula.staking_provider_address
    }

    /// Whether the holder is believed to hold a key fragment for the policy.
    pub fn holds_kfrag(&self) -> bool {
        self.status == ArrangementStatus::Enacted
    }
}

/// Terms the publisher offers to one holder.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ArrangementProposal {
    /// Policy HRAC.
    pub hrac: HRAC,
    /// Arrangement identifier.
    pub arrangement_id: ArrangementId,
    /// The holder the proposal is addressed to.
    pub staking_provider_address: Address,
    /// The policy's encrypting key.
    pub policy_encrypting_key: PublicKey,
    /// Publisher's verifying key.
    pub publisher_verifying_key: PublicKey,
    /// Expiration of the policy (UNIX seconds).
    pub expiration: u64,
    /// Payment offered to this holder, if any.
    pub value: Option<u128>,
    signature: Signature,
}

#[derive(Serialize)]
struct ProposalTerms<'a> {
    hrac: &'a HRAC,
    arrangement_id: &'a ArrangementId,
    staking_provider_address: &'a Address,
    policy_encrypting_key: &'a PublicKey,
    expiration: u64,
    value: Option<u128>,
}

impl ArrangementProposal {
    /// Creates and signs a proposal.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        signer: &Signer,
        hrac: &HRAC,
        arrangement_id: &ArrangementId,
        staking_provider_address: &Address,
        policy_encrypting_key: &PublicKey,
        expiration: u64,
        value: Option<u128>,
    ) -> Self {
        let terms = ProposalTerms {
            hrac,
            arrangement_id,
            staking_provider_address,
            policy_encrypting_key,
            expiration,
            value,
        };
        Self {
            hrac: *hrac,
            arrangement_id: *arrangement_id,
            staking_provider_address: *staking_provider_address,
            policy_encrypting_key: *policy_encrypting_key,
            publisher_verifying_key: signer.verifying_key(),
            expiration,
            value,
            signature: signer.sign(&messagepack_serialize(&terms)),
        }
    }

    /// Checks the publisher's signature over the terms.
    pub fn verify_signature(&self) -> bool {
        let terms = ProposalTerms {
            hrac: &self.hrac,
            arrangement_id: &self.arrangement_id,
            staking_provider_address: &self.staking_provider_address,
            policy_encrypting_key: &self.policy_encrypting_key,
            expiration: self.expiration,
            value: self.value,
        };
        self.signature
            .verify(&self.publisher_verifying_key, &messagepack_serialize(&terms))
    }
}

impl<'a> ProtocolObjectInner<'a> for ArrangementProposal {
    fn brand() -> [u8; 4] {
        *b"APrp"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for ArrangementProposal {}

fn response_message(arrangement_id: &ArrangementId, accepted: bool) -> Vec<u8> {
    [arrangement_id.as_ref(), &[accepted as u8]].concat()
}

/// The holder's signed answer to a proposal.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ArrangementResponse {
    /// Arrangement identifier.
    pub arrangement_id: ArrangementId,
    /// Whether the holder agrees to the terms.
    pub accepted: bool,
    signature: Signature,
}

impl ArrangementResponse {
    /// Creates and signs a response.
    pub fn new(signer: &Signer, arrangement_id: &ArrangementId, accepted: bool) -> Self {
        Self {
            arrangement_id: *arrangement_id,
            accepted,
            signature: signer.sign(&response_message(arrangement_id, accepted)),
        }
    }

    /// Checks the holder's signature.
    pub fn verify_signature(&self, ursula_verifying_key: &PublicKey) -> bool {
        self.signature.verify(
            ursula_verifying_key,
            &response_message(&self.arrangement_id, self.accepted),
        )
    }
}

impl<'a> ProtocolObjectInner<'a> for ArrangementResponse {
    fn brand() -> [u8; 4] {
        *b"ARsp"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for ArrangementResponse {}

fn enactment_message(
    arrangement_id: &ArrangementId,
    hrac: &HRAC,
    encrypted_kfrag: &EncryptedKeyFrag,
) -> Vec<u8> {
    [
        arrangement_id.as_ref(),
        hrac.as_ref(),
        &encrypted_kfrag.to_bytes(),
    ]
    .concat()
}

/// Delivery of one key fragment to a holder that accepted an arrangement.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct EnactArrangement {
    /// Arrangement identifier.
    pub arrangement_id: ArrangementId,
    /// Policy HRAC.
    pub hrac: HRAC,
    /// Key fragment encrypted for the holder.
    pub encrypted_kfrag: EncryptedKeyFrag,
    /// Publisher's verifying key.
    pub publisher_verifying_key: PublicKey,
    signature: Signature,
}

impl EnactArrangement {
    /// Creates and signs an enactment message.
    pub fn new(
        signer: &Signer,
        arrangement_id: &ArrangementId,
        hrac: &HRAC,
        encrypted_kfrag: EncryptedKeyFrag,
    ) -> Self {
        let signature = signer.sign(&enactment_message(arrangement_id, hrac, &encrypted_kfrag));
        Self {
            arrangement_id: *arrangement_id,
            hrac: *hrac,
            encrypted_kfrag,
            publisher_verifying_key: signer.verifying_key(),
            signature,
        }
    }

    /// Checks the publisher's signature.
    pub fn verify_signature(&self) -> bool {
        self.signature.verify(
            &self.publisher_verifying_key,
            &enactment_message(&self.arrangement_id, &self.hrac, &self.encrypted_kfrag),
        )
    }
}

impl<'a> ProtocolObjectInner<'a> for EnactArrangement {
    fn brand() -> [u8; 4] {
        *b"EnAr"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for EnactArrangement {}

fn ack_message(arrangement_id: &ArrangementId) -> Vec<u8> {
    [b"enacted".as_slice(), arrangement_id.as_ref()].concat()
}

/// The holder's signed confirmation that it stores the key fragment.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct EnactmentAck {
    /// Arrangement identifier.
    pub arrangement_id: ArrangementId,
    signature: Signature,
}

impl EnactmentAck {
    /// Creates and signs an acknowledgement.
    pub fn new(signer: &Signer, arrangement_id: &ArrangementId) -> Self {
        Self {
            arrangement_id: *arrangement_id,
            signature: signer.sign(&ack_message(arrangement_id)),
        }
    }

    /// Checks the holder's signature.
    pub fn verify_signature(&self, ursula_verifying_key: &PublicKey) -> bool {
        self.signature
            .verify(ursula_verifying_key, &ack_message(&self.arrangement_id))
    }
}

impl<'a> ProtocolObjectInner<'a> for EnactmentAck {
    fn brand() -> [u8; 4] {
        *b"EnAk"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for EnactmentAck {}
