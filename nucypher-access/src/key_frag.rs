use serde::{Deserialize, Serialize};
use thiserror::Error;
use umbral_pre::{
    decrypt_original, encrypt, Capsule, DecryptionError as UmbralDecryptionError, EncryptionError,
    KeyFrag, PublicKey, SecretKey, Signature, Signer, VerifiedKeyFrag,
};

use crate::hrac::HRAC;
use crate::versioning::{
    messagepack_serialize, DeserializationError, ProtocolObject, ProtocolObjectInner,
};

/// A key fragment signed by the publisher for one particular policy.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizedKeyFrag {
    signature: Signature,
    kfrag: KeyFrag,
}

fn signed_message(hrac: &HRAC, kfrag: &KeyFrag) -> Vec<u8> {
    [hrac.as_ref(), messagepack_serialize(kfrag).as_ref()].concat()
}

impl AuthorizedKeyFrag {
    /// Signs the key fragment, binding it to the HRAC.
    pub fn new(signer: &Signer, hrac: &HRAC, verified_kfrag: VerifiedKeyFrag) -> Self {
        // Alice makes plain to Ursula that, upon decrypting this message,
        // this particular KFrag is authorized for use in the policy identified by this HRAC.
        let kfrag = verified_kfrag.unverify();
        let signature = signer.sign(&signed_message(hrac, &kfrag));
        Self { signature, kfrag }
    }

    /// Checks the publisher's signature, returning the key fragment if it is valid.
    pub fn verify(
        self,
        hrac: &HRAC,
        publisher_verifying_key: &PublicKey,
    ) -> Option<VerifiedKeyFrag> {
        if !self
            .signature
            .verify(publisher_verifying_key, &signed_message(hrac, &self.kfrag))
        {
            return None;
        }

        // Ursula has no side channel to get the KeyFrag author's key,
        // so verifying the keyfrag is useless.
        Some(self.kfrag.skip_verification())
    }
}

impl<'a> ProtocolObjectInner<'a> for AuthorizedKeyFrag {
    fn brand() -> [u8; 4] {
        *b"AKFr"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for AuthorizedKeyFrag {}

/// Errors opening an encrypted, signed object.
#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum DecryptionError {
    /// The ciphertext could not be decrypted with the given key.
    #[error("decryption failed: {0}")]
    DecryptionFailed(UmbralDecryptionError),
    /// The plaintext is not a valid protocol object.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(DeserializationError),
    /// The signature inside does not belong to the expected publisher.
    #[error("verification failed")]
    VerificationFailed,
}

/// Encrypted and signed key frag.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKeyFrag {
    capsule: Capsule,
    #[serde(with = "crate::arrays_as_bytes::boxed")]
    ciphertext: Box<[u8]>,
}

impl EncryptedKeyFrag {
    /// Encrypts and signs a key frag.
    pub fn new(
        signer: &Signer,
        recipient_key: &PublicKey,
        hrac: &HRAC,
        verified_kfrag: VerifiedKeyFrag,
    ) -> Result<Self, EncryptionError> {
        let auth_kfrag = AuthorizedKeyFrag::new(signer, hrac, verified_kfrag);
        // Using Umbral for asymmetric encryption here for simplicity,
        // even though we do not plan to re-encrypt the capsule.
        let (capsule, ciphertext) = encrypt(recipient_key, &auth_kfrag.to_bytes())?;
        Ok(Self {
            capsule,
            ciphertext,
        })
    }

    /// Decrypts and verifies a key frag.
    pub fn decrypt(
        &self,
        sk: &SecretKey,
        hrac: &HRAC,
        publisher_verifying_key: &PublicKey,
    ) -> Result<VerifiedKeyFrag, DecryptionError> {
        let auth_kfrag_bytes = decrypt_original(sk, &self.capsule, &self.ciphertext)
            .map_err(DecryptionError::DecryptionFailed)?;
        let auth_kfrag = AuthorizedKeyFrag::from_bytes(&auth_kfrag_bytes)
            .map_err(DecryptionError::DeserializationFailed)?;
        auth_kfrag
            .verify(hrac, publisher_verifying_key)
            .ok_or(DecryptionError::VerificationFailed)
    }
}

impl<'a> ProtocolObjectInner<'a> for EncryptedKeyFrag {
    fn brand() -> [u8; 4] {
        *b"EKFr"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for EncryptedKeyFrag {}
