//! In-process network: nodes, directory and adjudicator living in one process,
//! with per-node fault injection.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use umbral_pre::{SecretKey, Signer};

use super::{Middleware, NodeDirectory};
use crate::address::Address;
use crate::arrangement::{ArrangementProposal, ArrangementResponse, EnactArrangement, EnactmentAck};
use crate::error::{DirectoryError, MiddlewareError, SubmissionError};
use crate::evidence::{Adjudicator, Evidence};
use crate::holder::Ursula;
use crate::node_metadata::{NodeMetadata, NodeMetadataPayload};
use crate::pre;
use crate::reencryption::{ReencryptionRequest, ReencryptionResponse};
use crate::revocation_order::{RevocationAck, RevocationOrder};
use crate::treasure_map::TreasureMap;
use crate::versioning::ProtocolObject;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// Every message crosses the "wire" as bytes.
fn transmit<T>(message: &T) -> Result<T, MiddlewareError>
where
    T: for<'a> ProtocolObject<'a>,
{
    let bytes = message.to_bytes();
    Ok(T::from_bytes(&bytes)?)
}

/// How a node behaves towards its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Follows the protocol.
    Honest,
    /// Unreachable.
    Offline,
    /// Declines every proposal.
    RejectProposals,
    /// Accepts proposals but never acknowledges an enactment.
    FailEnactment,
    /// Returns properly signed capsule frags that fail their correctness proof.
    CorruptCFrags,
    /// Answers after the given delay.
    Slow(Duration),
}

struct MemoryNode {
    ursula: Arc<Ursula>,
    metadata: Box<[u8]>,
    behaviour: Behaviour,
    proposals_received: usize,
}

/// A network of in-process nodes, usable both as `Middleware` and as `NodeDirectory`.
pub struct MemoryNetwork {
    nodes: Mutex<BTreeMap<Address, MemoryNode>>,
    directory_available: AtomicBool,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            directory_available: AtomicBool::new(true),
        }
    }

    /// Adds an honest node.
    pub fn add_ursula(&self, ursula: Ursula) -> Arc<Ursula> {
        let ursula = Arc::new(ursula);
        let node = MemoryNode {
            ursula: ursula.clone(),
            metadata: ursula.metadata().to_bytes(),
            behaviour: Behaviour::Honest,
            proposals_received: 0,
        };
        lock(&self.nodes).insert(ursula.address(), node);
        ursula
    }

    /// Adds `count` honest nodes with random keys and stakes `count, count - 1, ..., 1`.
    pub fn spawn_ursulas(&self, count: usize, domain: &str) -> Vec<Arc<Ursula>> {
        (0..count)
            .map(|i| {
                let ursula = Ursula::new(
                    SecretKey::random(),
                    SecretKey::random(),
                    domain,
                    "127.0.0.1",
                    9151 + i as u16,
                    (count - i) as u128,
                );
                self.add_ursula(ursula)
            })
            .collect()
    }

    /// Changes the behaviour of a node.
    pub fn set_behaviour(&self, address: &Address, behaviour: Behaviour) {
        if let Some(node) = lock(&self.nodes).get_mut(address) {
            node.behaviour = behaviour;
        }
    }

    /// Makes the directory fail every query.
    pub fn set_directory_available(&self, available: bool) {
        self.directory_available.store(available, Ordering::SeqCst);
    }

    /// Number of proposals the node has received.
    pub fn proposals_received(&self, address: &Address) -> usize {
        lock(&self.nodes)
            .get(address)
            .map_or(0, |node| node.proposals_received)
    }

    /// The node with the given address.
    pub fn ursula(&self, address: &Address) -> Option<Arc<Ursula>> {
        lock(&self.nodes)
            .get(address)
            .map(|node| node.ursula.clone())
    }

    async fn connect(
        &self,
        ursula: &NodeMetadataPayload,
    ) -> Result<(Arc<Ursula>, Behaviour), MiddlewareError> {
        let (node, behaviour) = lock(&self.nodes)
            .get(&ursula.staking_provider_address)
            .map(|node| (node.ursula.clone(), node.behaviour))
            .ok_or_else(|| {
                MiddlewareError::Transport(format!("no route to {}", ursula.rest_url()))
            })?;

        match behaviour {
            Behaviour::Offline => Err(MiddlewareError::Transport(format!(
                "connection to {} refused",
                ursula.rest_url()
            ))),
            Behaviour::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok((node, behaviour))
            }
            _ => Ok((node, behaviour)),
        }
    }

    fn check_directory(&self) -> Result<(), DirectoryError> {
        if self.directory_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DirectoryError::Unavailable("directory is offline".into()))
        }
    }

    fn verified_metadata(node: &MemoryNode) -> Option<NodeMetadataPayload> {
        NodeMetadata::from_bytes(&node.metadata)
            .ok()
            .filter(NodeMetadata::verify)
            .map(|metadata| metadata.payload)
    }
}

#[async_trait]
impl Middleware for MemoryNetwork {
    async fn propose(
        &self,
        ursula: &NodeMetadataPayload,
        proposal: &ArrangementProposal,
    ) -> Result<ArrangementResponse, MiddlewareError> {
        if let Some(node) = lock(&self.nodes).get_mut(&ursula.staking_provider_address) {
            node.proposals_received += 1;
        }
        let (node, behaviour) = self.connect(ursula).await?;
        let proposal = transmit(proposal)?;

        let response = if behaviour == Behaviour::RejectProposals {
            ArrangementResponse::new(node.signer(), &proposal.arrangement_id, false)
        } else {
            node.consider_arrangement(proposal).await?
        };
        transmit(&response)
    }

    async fn enact(
        &self,
        ursula: &NodeMetadataPayload,
        message: &EnactArrangement,
    ) -> Result<EnactmentAck, MiddlewareError> {
        let (node, behaviour) = self.connect(ursula).await?;
        if behaviour == Behaviour::FailEnactment {
            return Err(MiddlewareError::Transport("connection reset".into()));
        }
        let ack = node.enact(transmit(message)?).await?;
        transmit(&ack)
    }

    async fn reencrypt(
        &self,
        ursula: &NodeMetadataPayload,
        request: &ReencryptionRequest,
    ) -> Result<ReencryptionResponse, MiddlewareError> {
        let (node, behaviour) = self.connect(ursula).await?;
        let request = transmit(request)?;
        let response = node.reencrypt(request.clone()).await?;

        let response = if behaviour == Behaviour::CorruptCFrags {
            // Re-encrypt with a key fragment of somebody else's key.
            let (_, bogus_kfrag) = pre::split_key(
                &SecretKey::random(),
                &SecretKey::random().public_key(),
                &Signer::new(SecretKey::random()),
                1,
                1,
            )
            .into_iter()
            .next()
            .ok_or_else(|| MiddlewareError::Transport("no key fragments".into()))?;
            let bogus_cfrag = pre::reencrypt(&request.capsule, bogus_kfrag);
            ReencryptionResponse::new(
                node.signer(),
                &request.capsule,
                bogus_cfrag,
                &request.task_signature,
            )
        } else {
            response
        };
        transmit(&response)
    }

    async fn revoke(
        &self,
        ursula: &NodeMetadataPayload,
        order: &RevocationOrder,
    ) -> Result<RevocationAck, MiddlewareError> {
        let (node, _behaviour) = self.connect(ursula).await?;
        let ack = node.revoke(transmit(order)?).await?;
        transmit(&ack)
    }
}

#[async_trait]
impl NodeDirectory for MemoryNetwork {
    async fn candidates(
        &self,
        domain: &str,
        exclude: &BTreeSet<Address>,
    ) -> Result<Vec<NodeMetadataPayload>, DirectoryError> {
        self.check_directory()?;
        Ok(lock(&self.nodes)
            .iter()
            .filter(|(address, _)| !exclude.contains(address))
            .filter_map(|(_, node)| Self::verified_metadata(node))
            .filter(|payload| payload.domain == domain)
            .collect())
    }

    async fn resolve_holders(
        &self,
        treasure_map: &TreasureMap,
    ) -> Result<Vec<NodeMetadataPayload>, DirectoryError> {
        self.check_directory()?;
        let nodes = lock(&self.nodes);
        Ok(treasure_map
            .destinations
            .keys()
            .filter_map(|address| nodes.get(address))
            .filter_map(Self::verified_metadata)
            .collect())
    }
}

/// An adjudicator keeping the evidence it was given.
#[derive(Default)]
pub struct MemoryAdjudicator {
    evaluations: Mutex<HashSet<[u8; 32]>>,
    accepted: Mutex<Vec<Evidence>>,
}

impl MemoryAdjudicator {
    /// Creates an adjudicator with no evidence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evidence accepted so far.
    pub fn accepted(&self) -> Vec<Evidence> {
        lock(&self.accepted).clone()
    }
}

#[async_trait]
impl Adjudicator for MemoryAdjudicator {
    async fn submit_evidence(&self, evidence: &Evidence) -> Result<(), SubmissionError> {
        if !lock(&self.evaluations).insert(evidence.precomputed.evaluation_hash) {
            return Err(SubmissionError::AlreadySlashed);
        }
        lock(&self.accepted).push(evidence.clone());
        Ok(())
    }
}
