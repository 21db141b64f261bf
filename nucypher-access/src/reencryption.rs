use serde::{Deserialize, Serialize};
use umbral_pre::{Capsule, CapsuleFrag, PublicKey, Signature, Signer, VerifiedCapsuleFrag};

use crate::hrac::HRAC;
use crate::versioning::{messagepack_serialize, ProtocolObject, ProtocolObjectInner};

// The work order Bob signs: this capsule, under this policy, by this holder.
pub(crate) fn task_message(
    capsule: &Capsule,
    hrac: &HRAC,
    holder_verifying_key: &PublicKey,
) -> Vec<u8> {
    [
        messagepack_serialize(capsule).as_ref(),
        hrac.as_ref(),
        &holder_verifying_key.to_compressed_bytes(),
    ]
    .concat()
}

// What the holder signs: the answer to one particular task.
pub(crate) fn response_message(
    capsule: &Capsule,
    cfrag: &CapsuleFrag,
    task_signature: &Signature,
) -> Vec<u8> {
    [
        messagepack_serialize(capsule).as_ref(),
        messagepack_serialize(cfrag).as_ref(),
        messagepack_serialize(task_signature).as_ref(),
    ]
    .concat()
}

/// A request for an Ursula to reencrypt a capsule.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct ReencryptionRequest {
    /// Capsule to re-encrypt.
    pub capsule: Capsule,
    /// Policy HRAC.
    pub hrac: HRAC,
    /// Publisher's verifying key.
    pub publisher_verifying_key: PublicKey,
    /// Recipient's (Bob's) verifying key.
    pub bob_verifying_key: PublicKey,
    /// Bob's signature over the task, addressed to one particular holder.
    pub task_signature: Signature,
}

impl ReencryptionRequest {
    /// Creates a new reencryption request signed by Bob for the given holder.
    pub fn new(
        bob_signer: &Signer,
        capsule: &Capsule,
        hrac: &HRAC,
        publisher_verifying_key: &PublicKey,
        holder_verifying_key: &PublicKey,
    ) -> Self {
        let task_signature = bob_signer.sign(&task_message(capsule, hrac, holder_verifying_key));
        Self {
            capsule: capsule.clone(),
            hrac: *hrac,
            publisher_verifying_key: *publisher_verifying_key,
            bob_verifying_key: bob_signer.verifying_key(),
            task_signature,
        }
    }

    /// Checks that the task was signed by Bob and addressed to the given holder.
    pub fn verify_task(&self, holder_verifying_key: &PublicKey) -> bool {
        self.task_signature.verify(
            &self.bob_verifying_key,
            &task_message(&self.capsule, &self.hrac, holder_verifying_key),
        )
    }
}

impl<'a> ProtocolObjectInner<'a> for ReencryptionRequest {
    fn brand() -> [u8; 4] {
        *b"ReRq"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for ReencryptionRequest {}

/// A response from Ursula with a reencrypted capsule frag.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct ReencryptionResponse {
    cfrag: CapsuleFrag,
    signature: Signature,
}

impl ReencryptionResponse {
    /// Creates and signs a new reencryption response.
    pub fn new(
        signer: &Signer,
        capsule: &Capsule,
        vcfrag: VerifiedCapsuleFrag,
        task_signature: &Signature,
    ) -> Self {
        let cfrag = vcfrag.unverify();
        let signature = signer.sign(&response_message(capsule, &cfrag, task_signature));
        Self { cfrag, signature }
    }

    /// Assembles a response from parts, without signing anything.
    pub fn from_parts(cfrag: CapsuleFrag, signature: Signature) -> Self {
        Self { cfrag, signature }
    }

    /// The capsule frag, not yet checked for correctness.
    pub fn cfrag(&self) -> &CapsuleFrag {
        &self.cfrag
    }

    /// The holder's signature over the response.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Checks that the response was signed by the given holder for this task.
    pub fn verify_signature(
        &self,
        capsule: &Capsule,
        task_signature: &Signature,
        holder_verifying_key: &PublicKey,
    ) -> bool {
        self.signature.verify(
            holder_verifying_key,
            &response_message(capsule, &self.cfrag, task_signature),
        )
    }

    /// Splits the response into the capsule frag and the signature.
    pub fn into_parts(self) -> (CapsuleFrag, Signature) {
        (self.cfrag, self.signature)
    }
}

impl<'a> ProtocolObjectInner<'a> for ReencryptionResponse {
    fn brand() -> [u8; 4] {
        *b"ReRs"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for ReencryptionResponse {}
