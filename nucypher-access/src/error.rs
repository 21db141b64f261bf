use thiserror::Error;

use crate::address::Address;
use crate::hrac::HRAC;
use crate::key_frag::DecryptionError;
use crate::versioning::DeserializationError;

/// Why a single holder did not do its part. Absorbed by the coordinators,
/// which retry or replace the holder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HolderFailure {
    /// No answer within the configured timeout.
    #[error("network timeout")]
    NetworkTimeout,
    /// The request did not reach the holder, or the reply was unreadable.
    #[error("transport error: {0}")]
    Transport(String),
    /// The holder refused.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The reply was not signed by the holder.
    #[error("invalid signature")]
    InvalidSignature,
    /// The capsule frag failed its correctness proof.
    #[error("capsule frag correctness proof failed")]
    CorrectnessProofFailure,
}

/// Refusals produced by the holder-side handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HolderError {
    /// The message carries a bad signature.
    #[error("invalid signature")]
    InvalidSignature,
    /// The message is addressed to someone else.
    #[error("message is addressed to another node")]
    Misaddressed,
    /// The policy expired.
    #[error("policy {0} has expired")]
    Expired(HRAC),
    /// The policy was revoked.
    #[error("policy {0} was revoked")]
    Revoked(HRAC),
    /// No accepted arrangement or enacted key fragment for the request.
    #[error("no arrangement for policy {0}")]
    UnknownPolicy(HRAC),
    /// The arrangement was enacted with different material.
    #[error("arrangement for policy {0} is already enacted")]
    ConflictingEnactment(HRAC),
    /// The key fragment could not be opened.
    #[error("key fragment cannot be used: {0}")]
    KeyFrag(String),
}

/// Errors of a `Middleware` call.
#[derive(Debug, Error)]
pub enum MiddlewareError {
    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The holder answered with a refusal.
    #[error("holder refused: {0}")]
    Holder(#[from] HolderError),
    /// The message could not be decoded.
    #[error("malformed message: {0}")]
    Deserialization(#[from] DeserializationError),
}

impl From<MiddlewareError> for HolderFailure {
    fn from(error: MiddlewareError) -> Self {
        match error {
            MiddlewareError::Holder(error) => Self::Rejected(error.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Errors of a `NodeDirectory` call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The directory cannot be queried.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Errors of the publisher-side workflows.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// `m` and `n` do not satisfy `1 <= m <= n <= 255`.
    #[error("invalid threshold {threshold} of {shares} shares")]
    InvalidThreshold {
        /// Requested threshold.
        threshold: usize,
        /// Requested number of shares.
        shares: usize,
    },
    /// The expiration is not in the future.
    #[error("expiration {0} is not in the future")]
    InvalidExpiration(u64),
    /// The policy value cannot be paid to the holders.
    #[error("invalid policy value: {0}")]
    InvalidPolicyValue(String),
    /// Fewer than the required number of holders could be arranged with.
    #[error("insufficient ursulas: needed {needed}, got {available}")]
    InsufficientUrsulas {
        /// Number of holders required.
        needed: usize,
        /// Number of holders available or enacted.
        available: usize,
    },
    /// A holder did not accept the proposal.
    #[error("arrangement with {address} rejected: {failure}")]
    ArrangementRejected {
        /// The holder.
        address: Address,
        /// What went wrong.
        failure: HolderFailure,
    },
    /// A holder did not take the key fragment.
    #[error("enactment with {address} failed: {failure}")]
    EnactmentFailed {
        /// The holder.
        address: Address,
        /// What went wrong.
        failure: HolderFailure,
    },
    /// Some holders have not confirmed the revocation yet.
    #[error("revocation incomplete: {} holders outstanding", outstanding.len())]
    RevocationIncomplete {
        /// Holders that still may hold a key fragment.
        outstanding: Vec<Address>,
    },
    /// The policy is not known to this publisher.
    #[error("unknown policy {0}")]
    UnknownPolicy(HRAC),
    /// The policy expiration has passed.
    #[error("policy {0} expired")]
    Expired(HRAC),
    /// The policy was revoked and cannot be granted again.
    #[error("policy {0} revoked")]
    Revoked(HRAC),
    /// A grant request disagrees with the policy already drafted under its label.
    #[error("policy {0} exists with different parameters")]
    ParameterMismatch(HRAC),
    /// The holder already stores a share of the policy.
    #[error("{0} already holds a share of the policy")]
    DuplicateArrangement(Address),
    /// The publisher's key material cannot be used.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// Encrypting a key fragment or the treasure map failed.
    #[error("encryption failed: {0}")]
    Encryption(String),
    /// The node directory failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Errors of the recipient-side workflow.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The policy was not joined.
    #[error("unknown policy {0}")]
    UnknownPolicy(HRAC),
    /// Fewer than `threshold` valid capsule frags were collected.
    #[error("insufficient cfrags: needed {threshold}, got {received}")]
    InsufficientCFrags {
        /// Policy threshold.
        threshold: usize,
        /// Valid capsule frags received.
        received: usize,
    },
    /// The treasure map cannot be opened or is not signed by the publisher.
    #[error("treasure map verification failed: {0}")]
    TreasureMapVerification(#[from] DecryptionError),
    /// The node directory failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    /// The final decryption failed.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}

/// Errors opening a `MessageKit`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageKitError {
    /// The capsule or the ciphertext cannot be decrypted with the given key material.
    #[error("decryption failed: {0}")]
    Decryption(String),
    /// The plaintext of a signed kit is not a signed message.
    #[error("malformed signed message: {0}")]
    Malformed(String),
    /// The message is not signed by the sender the kit names.
    #[error("sender signature verification failed")]
    SenderVerification,
}

/// Errors building evidence.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvidenceError {
    /// A key cannot be parsed as a curve point.
    #[error("invalid public key")]
    InvalidPublicKey,
    /// A signature cannot be parsed.
    #[error("invalid signature encoding")]
    InvalidSignature,
    /// No recovery id yields the expected signer.
    #[error("signature does not recover to the expected signer")]
    RecoveryFailed,
}

/// Errors of an evidence submission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// The same evaluation was already punished.
    #[error("already slashed for this evaluation")]
    AlreadySlashed,
    /// The adjudicator could not be reached or refused.
    #[error("adjudicator error: {0}")]
    Adjudicator(String),
}
