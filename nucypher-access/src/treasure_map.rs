use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use umbral_pre::{
    decrypt_original, encrypt, Capsule, EncryptionError, PublicKey, SecretKey, Signature, Signer,
};

use crate::address::Address;
use crate::arrangement::ArrangementId;
use crate::hrac::HRAC;
use crate::key_frag::DecryptionError;
use crate::versioning::{messagepack_serialize, ProtocolObject, ProtocolObjectInner};

/// The holder list of an active policy: who to ask for re-encryption.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct TreasureMap {
    /// Threshold for successful re-encryption.
    pub threshold: u8,
    /// Policy HRAC.
    pub hrac: HRAC,
    /// Holders with an enacted arrangement.
    pub destinations: BTreeMap<Address, ArrangementId>,
    /// A key to create encrypted messages under this policy.
    pub policy_encrypting_key: PublicKey,
    /// Publisher's verifying key.
    pub publisher_verifying_key: PublicKey,
}

impl TreasureMap {
    /// Create a new treasure map for the holders of an enacted policy.
    pub fn new(
        publisher_verifying_key: &PublicKey,
        hrac: &HRAC,
        policy_encrypting_key: &PublicKey,
        destinations: BTreeMap<Address, ArrangementId>,
        threshold: u8,
    ) -> Self {
        Self {
            threshold,
            hrac: *hrac,
            destinations,
            policy_encrypting_key: *policy_encrypting_key,
            publisher_verifying_key: *publisher_verifying_key,
        }
    }

    /// Encrypts the treasure map for Bob.
    pub fn encrypt(
        &self,
        signer: &Signer,
        recipient_key: &PublicKey,
    ) -> Result<EncryptedTreasureMap, EncryptionError> {
        EncryptedTreasureMap::new(signer, recipient_key, self)
    }
}

impl<'a> ProtocolObjectInner<'a> for TreasureMap {
    fn brand() -> [u8; 4] {
        *b"TMap"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for TreasureMap {}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
struct AuthorizedTreasureMap {
    signature: Signature,
    treasure_map: TreasureMap,
}

fn signed_message(recipient_key: &PublicKey, treasure_map: &TreasureMap) -> Vec<u8> {
    [
        recipient_key.to_compressed_bytes().as_ref(),
        messagepack_serialize(treasure_map).as_ref(),
    ]
    .concat()
}

impl AuthorizedTreasureMap {
    fn new(signer: &Signer, recipient_key: &PublicKey, treasure_map: &TreasureMap) -> Self {
        Self {
            signature: signer.sign(&signed_message(recipient_key, treasure_map)),
            treasure_map: treasure_map.clone(),
        }
    }

    fn verify(
        self,
        recipient_key: &PublicKey,
        publisher_verifying_key: &PublicKey,
    ) -> Option<TreasureMap> {
        let message = signed_message(recipient_key, &self.treasure_map);
        if !self.signature.verify(publisher_verifying_key, &message) {
            return None;
        }
        // The signer must be the publisher the map names.
        if &self.treasure_map.publisher_verifying_key != publisher_verifying_key {
            return None;
        }
        Some(self.treasure_map)
    }
}

impl<'a> ProtocolObjectInner<'a> for AuthorizedTreasureMap {
    fn brand() -> [u8; 4] {
        *b"AMap"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for AuthorizedTreasureMap {}

/// A treasure map encrypted for Bob.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedTreasureMap {
    capsule: Capsule,
    #[serde(with = "crate::arrays_as_bytes::boxed")]
    ciphertext: Box<[u8]>,
}

impl EncryptedTreasureMap {
    fn new(
        signer: &Signer,
        recipient_key: &PublicKey,
        treasure_map: &TreasureMap,
    ) -> Result<Self, EncryptionError> {
        let auth_tmap = AuthorizedTreasureMap::new(signer, recipient_key, treasure_map);
        let (capsule, ciphertext) = encrypt(recipient_key, &auth_tmap.to_bytes())?;
        Ok(Self {
            capsule,
            ciphertext,
        })
    }

    /// Decrypts and verifies the treasure map.
    pub fn decrypt(
        &self,
        sk: &SecretKey,
        publisher_verifying_key: &PublicKey,
    ) -> Result<TreasureMap, DecryptionError> {
        let auth_tmap_bytes = decrypt_original(sk, &self.capsule, &self.ciphertext)
            .map_err(DecryptionError::DecryptionFailed)?;
        let auth_tmap = AuthorizedTreasureMap::from_bytes(&auth_tmap_bytes)
            .map_err(DecryptionError::DeserializationFailed)?;
        auth_tmap
            .verify(&sk.public_key(), publisher_verifying_key)
            .ok_or(DecryptionError::VerificationFailed)
    }
}

impl<'a> ProtocolObjectInner<'a> for EncryptedTreasureMap {
    fn brand() -> [u8; 4] {
        *b"EMap"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for EncryptedTreasureMap {}
