//! Capabilities the workflows consume: reaching holders and finding them.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::address::Address;
use crate::arrangement::{ArrangementProposal, ArrangementResponse, EnactArrangement, EnactmentAck};
use crate::error::{DirectoryError, MiddlewareError};
use crate::node_metadata::NodeMetadataPayload;
use crate::reencryption::{ReencryptionRequest, ReencryptionResponse};
use crate::revocation_order::{RevocationAck, RevocationOrder};
use crate::treasure_map::TreasureMap;

pub mod memory;

/// Transport to holders. One implementation per transport.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Sends an arrangement proposal.
    async fn propose(
        &self,
        ursula: &NodeMetadataPayload,
        proposal: &ArrangementProposal,
    ) -> Result<ArrangementResponse, MiddlewareError>;

    /// Delivers a key fragment.
    async fn enact(
        &self,
        ursula: &NodeMetadataPayload,
        message: &EnactArrangement,
    ) -> Result<EnactmentAck, MiddlewareError>;

    /// Asks for a capsule frag.
    async fn reencrypt(
        &self,
        ursula: &NodeMetadataPayload,
        request: &ReencryptionRequest,
    ) -> Result<ReencryptionResponse, MiddlewareError>;

    /// Sends a revocation order.
    async fn revoke(
        &self,
        ursula: &NodeMetadataPayload,
        order: &RevocationOrder,
    ) -> Result<RevocationAck, MiddlewareError>;
}

/// Read-only view of the known nodes.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Nodes of the domain with valid metadata, except the excluded ones.
    async fn candidates(
        &self,
        domain: &str,
        exclude: &BTreeSet<Address>,
    ) -> Result<Vec<NodeMetadataPayload>, DirectoryError>;

    /// Metadata of the holders named in the treasure map.
    /// Holders the directory does not know are left out.
    async fn resolve_holders(
        &self,
        treasure_map: &TreasureMap,
    ) -> Result<Vec<NodeMetadataPayload>, DirectoryError>;
}
