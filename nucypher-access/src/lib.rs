//! Policy granting, threshold retrieval and re-encryption evidence for the NuCypher network.
//!
//! A publisher (Alice) splits a delegating key into `n` key fragments and hands them,
//! through arrangements, to `n` holders (Ursulas). A recipient (Bob) collects
//! `m` capsule frags from those holders to decrypt data encrypted under the policy.
//! Capsule frags that fail their correctness proof become evidence
//! for an on-chain adjudicator.

#![doc(html_root_url = "https://docs.rs/nucypher-access")]
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

mod address;
mod arrangement;
mod arrays_as_bytes;
mod characters;
mod config;
mod error;
mod evidence;
mod grant;
mod holder;
mod hrac;
mod key_frag;
mod message_kit;
mod middleware;
mod node_metadata;
mod policy;
mod pre;
mod reencryption;
mod retrieval;
mod revocation;
mod revocation_order;
mod treasure_map;
mod versioning;

pub use address::Address;
pub use arrangement::{
    unix_now, Arrangement, ArrangementId, ArrangementProposal, ArrangementResponse,
    ArrangementStatus, EnactArrangement, EnactmentAck, ShareIndex,
};
pub use characters::{Alice, Bob, GrantRequest};
pub use config::{GrantConfig, RetrievalConfig};
pub use error::{
    DirectoryError, EvidenceError, HolderError, HolderFailure, MessageKitError, MiddlewareError,
    PolicyError, RetrievalError, SubmissionError,
};
pub use evidence::{
    build_evidence, Adjudicator, Evidence, EvidenceContext, EvidenceQueue, EvidenceSubmitter,
    PrecomputedValues, SubmissionReport,
};
pub use grant::PolicyCoordinator;
pub use holder::Ursula;
pub use hrac::HRAC;
pub use key_frag::{AuthorizedKeyFrag, DecryptionError, EncryptedKeyFrag};
pub use message_kit::MessageKit;
pub use middleware::{memory, Middleware, NodeDirectory};
pub use node_metadata::{NodeMetadata, NodeMetadataPayload};
pub use policy::{validate_threshold, validate_value, Policy, PolicyState};
pub use pre::{decapsulate, reencrypt, split_key, verify_correctness, CorrectnessKeys};
pub use reencryption::{ReencryptionRequest, ReencryptionResponse};
pub use retrieval::RetrievalCoordinator;
pub use revocation::{revoke, RevocationReport};
pub use revocation_order::{RevocationAck, RevocationOrder};
pub use treasure_map::{EncryptedTreasureMap, TreasureMap};
pub use versioning::{DeserializationError, ProtocolObject};

// Re-export umbral_pre so that the users don't have to version-match.
pub use umbral_pre;
