use serde::{Deserialize, Serialize};
use umbral_pre::{
    decrypt_original, encrypt, Capsule, EncryptionError, PublicKey, SecretKey, Signature, Signer,
    VerifiedCapsuleFrag,
};

use crate::error::MessageKitError;
use crate::pre::decapsulate;
use crate::versioning::{
    messagepack_deserialize, messagepack_serialize, ProtocolObject, ProtocolObjectInner,
};

// The plaintext of a signed kit, before encryption.
#[derive(Serialize, Deserialize)]
struct SignedPlaintext {
    signature: Signature,
    #[serde(with = "crate::arrays_as_bytes::boxed")]
    message: Box<[u8]>,
}

/// Encrypted message prepared for re-encryption.
///
/// A kit may carry the verifying key of its sender. The message is then signed,
/// and the signature travels encrypted together with it.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct MessageKit {
    capsule: Capsule,
    #[serde(with = "crate::arrays_as_bytes::boxed")]
    ciphertext: Box<[u8]>,
    #[serde(default)]
    sender_verifying_key: Option<PublicKey>,
}

impl MessageKit {
    /// Creates a new encrypted message for the given policy key.
    pub fn new(
        policy_encrypting_key: &PublicKey,
        plaintext: &[u8],
    ) -> Result<Self, EncryptionError> {
        let (capsule, ciphertext) = encrypt(policy_encrypting_key, plaintext)?;
        Ok(Self {
            capsule,
            ciphertext,
            sender_verifying_key: None,
        })
    }

    /// Creates a new encrypted message signed by the sender.
    /// The signature is checked on every decryption.
    pub fn new_signed(
        policy_encrypting_key: &PublicKey,
        plaintext: &[u8],
        sender: &Signer,
    ) -> Result<Self, EncryptionError> {
        let signed = SignedPlaintext {
            signature: sender.sign(plaintext),
            message: plaintext.into(),
        };
        let (capsule, ciphertext) =
            encrypt(policy_encrypting_key, &messagepack_serialize(&signed))?;
        Ok(Self {
            capsule,
            ciphertext,
            sender_verifying_key: Some(sender.verifying_key()),
        })
    }

    /// The capsule holders re-encrypt.
    pub fn capsule(&self) -> &Capsule {
        &self.capsule
    }

    /// The key the message is signed with, for signed kits.
    pub fn sender_verifying_key(&self) -> Option<PublicKey> {
        self.sender_verifying_key
    }

    /// Decrypts the message using the original (Alice's) key.
    pub fn decrypt(&self, sk: &SecretKey) -> Result<Box<[u8]>, MessageKitError> {
        let plaintext = decrypt_original(sk, &self.capsule, &self.ciphertext)
            .map_err(|error| MessageKitError::Decryption(error.to_string()))?;
        self.open(plaintext)
    }

    /// Decrypts the message using the Bob's key and re-encrypted capsule frags.
    pub fn decrypt_reencrypted(
        &self,
        sk: &SecretKey,
        policy_encrypting_key: &PublicKey,
        cfrags: Vec<VerifiedCapsuleFrag>,
    ) -> Result<Box<[u8]>, MessageKitError> {
        let plaintext = decapsulate(
            sk,
            policy_encrypting_key,
            &self.capsule,
            cfrags,
            &self.ciphertext,
        )
        .map_err(|error| MessageKitError::Decryption(error.to_string()))?;
        self.open(plaintext)
    }

    fn open(&self, plaintext: Box<[u8]>) -> Result<Box<[u8]>, MessageKitError> {
        let Some(sender_verifying_key) = &self.sender_verifying_key else {
            return Ok(plaintext);
        };
        let signed: SignedPlaintext =
            messagepack_deserialize(&plaintext).map_err(MessageKitError::Malformed)?;
        if !signed.signature.verify(sender_verifying_key, &signed.message) {
            return Err(MessageKitError::SenderVerification);
        }
        Ok(signed.message)
    }
}

impl<'a> ProtocolObjectInner<'a> for MessageKit {
    fn brand() -> [u8; 4] {
        *b"MKit"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for MessageKit {}
