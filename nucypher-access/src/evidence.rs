//! Evidence of an incorrect re-encryption, and its asynchronous submission.
//!
//! Evidence is built only from values Bob already has after a failed
//! correctness check. It is deterministic: the same capsule frag always
//! yields the same bytes, so the adjudicator can reject duplicates.

use std::sync::Arc;

use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use umbral_pre::{Capsule, CapsuleFrag, PublicKey, Signature};

use crate::address::Address;
use crate::error::{EvidenceError, SubmissionError};
use crate::hrac::HRAC;
use crate::reencryption::{response_message, task_message};
use crate::versioning::{messagepack_serialize, ProtocolObject, ProtocolObjectInner};

/// Offset added to the recovery id, as expected by Ethereum's `ecrecover`.
const RECOVERY_OFFSET: u8 = 27;

/// Policy data Bob knows and an external verifier needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvidenceContext {
    /// Policy HRAC.
    pub hrac: HRAC,
    /// Publisher's verifying key.
    pub publisher_verifying_key: PublicKey,
    /// The policy encrypting key.
    pub policy_encrypting_key: PublicKey,
}

/// Values that are expensive to derive on-chain.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct PrecomputedValues {
    /// Uncompressed coordinates (x ‖ y) of the holder's verifying key.
    #[serde(with = "crate::arrays_as_bytes")]
    pub ursula_pubkey_xy: [u8; 64],
    /// Uncompressed coordinates of Bob's verifying key.
    #[serde(with = "crate::arrays_as_bytes")]
    pub bob_pubkey_xy: [u8; 64],
    /// Uncompressed coordinates of the publisher's verifying key.
    #[serde(with = "crate::arrays_as_bytes")]
    pub publisher_pubkey_xy: [u8; 64],
    /// Uncompressed coordinates of the policy encrypting key.
    #[serde(with = "crate::arrays_as_bytes")]
    pub policy_pubkey_xy: [u8; 64],
    /// The holder's canonical address.
    pub ursula_address: Address,
    /// `sha256(capsule ‖ cfrag)`; duplicate evidence is detected by it.
    #[serde(with = "crate::arrays_as_bytes")]
    pub evaluation_hash: [u8; 32],
}

/// Proof that a holder returned an incorrect capsule frag.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// The capsule Bob asked to re-encrypt.
    pub capsule: Capsule,
    /// The capsule frag that failed its correctness proof.
    pub cfrag: CapsuleFrag,
    /// Policy HRAC, part of the signed task.
    pub hrac: HRAC,
    /// Bob's signature over the task.
    pub task_signature: Signature,
    /// The holder's signature over the response.
    pub cfrag_signature: Signature,
    /// Recovery indicator of `task_signature` (27 or 28).
    pub task_signature_v: u8,
    /// Recovery indicator of `cfrag_signature` (27 or 28).
    pub cfrag_signature_v: u8,
    /// The holder's verifying key.
    pub ursula_verifying_key: PublicKey,
    /// Bob's verifying key.
    pub bob_verifying_key: PublicKey,
    /// Precomputed curve values.
    pub precomputed: PrecomputedValues,
}

impl<'a> ProtocolObjectInner<'a> for Evidence {
    fn brand() -> [u8; 4] {
        *b"Evdc"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for Evidence {}

fn coordinates(pk: &PublicKey) -> Result<[u8; 64], EvidenceError> {
    // Drop the SEC1 prefix byte.
    pk.to_uncompressed_bytes()
        .get(1..)
        .and_then(|xy| xy.try_into().ok())
        .ok_or(EvidenceError::InvalidPublicKey)
}

/// Finds `v` such that `ecrecover(sha256(message), v, signature)` gives `signer`.
pub(crate) fn recovery_value(
    message: &[u8],
    signature: &Signature,
    signer: &PublicKey,
) -> Result<u8, EvidenceError> {
    let verifying_key = VerifyingKey::from_sec1_bytes(&signer.to_compressed_bytes())
        .map_err(|_| EvidenceError::InvalidPublicKey)?;
    let signature = EcdsaSignature::from_slice(&signature.to_be_bytes())
        .map_err(|_| EvidenceError::InvalidSignature)?;
    let prehash = Sha256::digest(message);
    let recovery_id = RecoveryId::trial_recovery_from_prehash(&verifying_key, &prehash, &signature)
        .map_err(|_| EvidenceError::RecoveryFailed)?;
    Ok(RECOVERY_OFFSET + recovery_id.to_byte())
}

/// Builds the evidence for a capsule frag that failed its correctness proof.
pub fn build_evidence(
    capsule: &Capsule,
    cfrag: &CapsuleFrag,
    ursula_signature: &Signature,
    task_signature: &Signature,
    ursula_verifying_key: &PublicKey,
    bob_verifying_key: &PublicKey,
    context: &EvidenceContext,
) -> Result<Evidence, EvidenceError> {
    let task = task_message(capsule, &context.hrac, ursula_verifying_key);
    let response = response_message(capsule, cfrag, task_signature);

    let evaluation_hash = Sha256::new()
        .chain_update(messagepack_serialize(capsule))
        .chain_update(messagepack_serialize(cfrag))
        .finalize();

    let precomputed = PrecomputedValues {
        ursula_pubkey_xy: coordinates(ursula_verifying_key)?,
        bob_pubkey_xy: coordinates(bob_verifying_key)?,
        publisher_pubkey_xy: coordinates(&context.publisher_verifying_key)?,
        policy_pubkey_xy: coordinates(&context.policy_encrypting_key)?,
        ursula_address: Address::from_public_key(ursula_verifying_key),
        evaluation_hash: evaluation_hash.into(),
    };

    Ok(Evidence {
        capsule: capsule.clone(),
        cfrag: cfrag.clone(),
        hrac: context.hrac,
        task_signature: task_signature.clone(),
        cfrag_signature: ursula_signature.clone(),
        task_signature_v: recovery_value(&task, task_signature, bob_verifying_key)?,
        cfrag_signature_v: recovery_value(&response, ursula_signature, ursula_verifying_key)?,
        ursula_verifying_key: *ursula_verifying_key,
        bob_verifying_key: *bob_verifying_key,
        precomputed,
    })
}

/// The external party that punishes holders for incorrect re-encryptions.
#[async_trait]
pub trait Adjudicator: Send + Sync {
    /// Submits evidence. Must fail with `AlreadySlashed` for a repeated evaluation hash.
    async fn submit_evidence(&self, evidence: &Evidence) -> Result<(), SubmissionError>;
}

/// Outcome of the submissions made by an `EvidenceSubmitter`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionReport {
    /// Accepted by the adjudicator.
    pub submitted: usize,
    /// Rejected as duplicates.
    pub already_slashed: usize,
    /// Failed for other reasons.
    pub failed: usize,
}

/// Sending half of the evidence queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EvidenceQueue {
    sender: mpsc::UnboundedSender<Evidence>,
}

impl EvidenceQueue {
    /// Queues evidence for submission. Never blocks and never fails the caller.
    pub fn push(&self, evidence: Evidence) {
        if self.sender.send(evidence).is_err() {
            warn!("evidence submitter is gone, evidence dropped");
        }
    }
}

/// Background task submitting queued evidence, one item at a time.
pub struct EvidenceSubmitter;

impl EvidenceSubmitter {
    /// Spawns the submitter on the current runtime.
    /// The task ends when every `EvidenceQueue` clone is dropped.
    pub fn spawn<A>(adjudicator: Arc<A>) -> (EvidenceQueue, JoinHandle<SubmissionReport>)
    where
        A: Adjudicator + ?Sized + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Evidence>();

        let handle = tokio::spawn(async move {
            let mut report = SubmissionReport::default();
            while let Some(evidence) = receiver.recv().await {
                let address = evidence.precomputed.ursula_address;
                match adjudicator.submit_evidence(&evidence).await {
                    Ok(()) => {
                        info!(ursula = %address, "evidence submitted");
                        report.submitted += 1;
                    }
                    Err(SubmissionError::AlreadySlashed) => {
                        debug!(ursula = %address, "evidence already submitted");
                        report.already_slashed += 1;
                    }
                    Err(error) => {
                        warn!(ursula = %address, %error, "evidence submission failed");
                        report.failed += 1;
                    }
                }
            }
            report
        });

        (EvidenceQueue { sender }, handle)
    }
}

#[cfg(test)]
mod tests {
    use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
    use sha2::{Digest, Sha256};
    use umbral_pre::{encrypt, generate_kfrags, reencrypt, SecretKey, Signer};

    use super::{build_evidence, recovery_value, Evidence, EvidenceContext};
    use crate::hrac::HRAC;
    use crate::reencryption::{task_message, ReencryptionRequest, ReencryptionResponse};
    use crate::versioning::ProtocolObject;

    fn make_evidence() -> (Evidence, EvidenceContext) {
        let policy_sk = SecretKey::random();
        let publisher = Signer::new(SecretKey::random());
        let bob = Signer::new(SecretKey::random());
        let ursula = Signer::new(SecretKey::random());

        let (capsule, _ciphertext) = encrypt(&policy_sk.public_key(), b"peace at dawn").unwrap();
        let context = EvidenceContext {
            hrac: HRAC::new(&publisher.verifying_key(), &bob.verifying_key(), b"label"),
            publisher_verifying_key: publisher.verifying_key(),
            policy_encrypting_key: policy_sk.public_key(),
        };

        let kfrag = generate_kfrags(
            &policy_sk,
            &SecretKey::random().public_key(),
            &publisher,
            1,
            1,
            true,
            true,
        )
        .into_vec()
        .remove(0);

        let request = ReencryptionRequest::new(
            &bob,
            &capsule,
            &context.hrac,
            &publisher.verifying_key(),
            &ursula.verifying_key(),
        );
        let response = ReencryptionResponse::new(
            &ursula,
            &capsule,
            reencrypt(&capsule, kfrag),
            &request.task_signature,
        );

        let evidence = build_evidence(
            &capsule,
            response.cfrag(),
            response.signature(),
            &request.task_signature,
            &ursula.verifying_key(),
            &bob.verifying_key(),
            &context,
        )
        .unwrap();
        (evidence, context)
    }

    #[test]
    fn deterministic() {
        let (evidence, context) = make_evidence();
        let rebuilt = build_evidence(
            &evidence.capsule,
            &evidence.cfrag,
            &evidence.cfrag_signature,
            &evidence.task_signature,
            &evidence.ursula_verifying_key,
            &evidence.bob_verifying_key,
            &context,
        )
        .unwrap();
        assert_eq!(rebuilt.to_bytes(), evidence.to_bytes());
        assert_eq!(Evidence::from_bytes(&evidence.to_bytes()).unwrap(), evidence);
    }

    #[test]
    fn recovery_values_recover_the_signers() {
        let (evidence, _context) = make_evidence();

        let message = task_message(
            &evidence.capsule,
            &evidence.hrac,
            &evidence.ursula_verifying_key,
        );
        let signature = EcdsaSignature::from_slice(&evidence.task_signature.to_be_bytes()).unwrap();
        let recovery_id = RecoveryId::from_byte(evidence.task_signature_v - 27).unwrap();
        let recovered =
            VerifyingKey::recover_from_prehash(&Sha256::digest(&message), &signature, recovery_id)
                .unwrap();
        assert_eq!(
            recovered.to_encoded_point(true).as_bytes(),
            evidence.bob_verifying_key.to_compressed_bytes().as_ref()
        );

        // The holder's key does not match Bob's signature.
        assert!(recovery_value(
            &message,
            &evidence.task_signature,
            &evidence.ursula_verifying_key
        )
        .is_err());
        assert!([27, 28].contains(&evidence.cfrag_signature_v));
    }
}
