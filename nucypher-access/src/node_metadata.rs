use serde::{Deserialize, Serialize};
use umbral_pre::{PublicKey, Signature, Signer};

use crate::address::Address;
use crate::versioning::{messagepack_serialize, ProtocolObject, ProtocolObjectInner};

/// Node metadata as published in the directory.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct NodeMetadataPayload {
    /// The staking provider's Ethereum address.
    pub staking_provider_address: Address,
    /// The network identifier.
    pub domain: String,
    /// The node's verifying key. Proposals, responses and cfrags are signed with it.
    pub verifying_key: PublicKey,
    /// The node's encrypting key. Key fragments are encrypted for it.
    pub encrypting_key: PublicKey,
    /// The node's hostname.
    pub host: String,
    /// The node's port.
    pub port: u16,
    /// Stake backing the node; used to order candidates.
    pub stake: u128,
}

impl NodeMetadataPayload {
    /// Canonical address of the node's verifying key.
    pub fn derive_address(&self) -> Address {
        Address::from_public_key(&self.verifying_key)
    }

    /// `host:port` string suitable for connecting to the node.
    pub fn rest_url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Signed node metadata.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct NodeMetadata {
    signature: Signature,
    /// Authorized metadata payload.
    pub payload: NodeMetadataPayload,
}

impl NodeMetadata {
    /// Creates and signs a new metadata object.
    pub fn new(signer: &Signer, payload: &NodeMetadataPayload) -> Self {
        // TODO: how can we ensure that `verifying_key` in `payload` is the same as in `signer`?
        Self {
            signature: signer.sign(&messagepack_serialize(payload)),
            payload: payload.clone(),
        }
    }

    /// Verifies the consistency of metadata.
    pub fn verify(&self) -> bool {
        // Note: in order for this to make sense, `verifying_key` must be checked independently,
        // against the staking provider's bonding.
        self.signature
            .verify(&self.payload.verifying_key, &messagepack_serialize(&self.payload))
    }
}

impl<'a> ProtocolObjectInner<'a> for NodeMetadata {
    fn brand() -> [u8; 4] {
        *b"NdMd"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for NodeMetadata {}
