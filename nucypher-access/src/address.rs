use core::fmt;

use generic_array::{
    sequence::Split,
    typenum::{U12, U20},
    GenericArray,
};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use umbral_pre::PublicKey;

/// Canonical (Ethereum) address of a node, derived from its verifying key.
/// Holders are identified by it everywhere in the protocol.
#[derive(PartialEq, Eq, Hash, Debug, Serialize, Deserialize, Copy, Clone, PartialOrd, Ord)]
pub struct Address(#[serde(with = "crate::arrays_as_bytes")] [u8; Address::SIZE]);

impl Address {
    /// Size of canonical Ethereum address, in bytes.
    pub const SIZE: usize = 20;

    /// Creates an address from a fixed-length array.
    pub fn new(bytes: &[u8; Self::SIZE]) -> Self {
        Self(*bytes)
    }

    /// Derives the address owned by the given key.
    pub fn from_public_key(pk: &PublicKey) -> Self {
        // Canonical address is the last 20 bytes of keccak256 hash
        // of the uncompressed public key (without the header, so 64 bytes in total).
        let pk_bytes = pk.to_uncompressed_bytes();
        let digest = Keccak256::new().chain_update(&pk_bytes[1..]).finalize();

        let (_prefix, address): (GenericArray<u8, U12>, GenericArray<u8, U20>) = digest.split();

        Self(address.into())
    }

    /// Returns the EIP-55 mixed-case hex representation (with the `0x` prefix).
    pub fn to_checksum_address(&self) -> String {
        let lowercase = hex::encode(self.0);
        let digest = Keccak256::digest(lowercase.as_bytes());

        let checksummed: String = lowercase
            .chars()
            .enumerate()
            .map(|(i, c)| {
                let nibble = (digest[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
                if nibble >= 8 {
                    c.to_ascii_uppercase()
                } else {
                    c
                }
            })
            .collect();

        format!("0x{checksummed}")
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl From<Address> for [u8; Address::SIZE] {
    fn from(address: Address) -> [u8; Address::SIZE] {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum_address())
    }
}

#[cfg(test)]
mod tests {
    use umbral_pre::SecretKey;

    use super::Address;

    #[test]
    fn checksum_address() {
        // Test vector from EIP-55.
        let bytes: [u8; 20] = hex::decode("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")
            .unwrap()
            .try_into()
            .unwrap();
        let address = Address::new(&bytes);
        assert_eq!(
            address.to_checksum_address(),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
        assert_eq!(address.to_string(), address.to_checksum_address());
    }

    #[test]
    fn derived_from_key() {
        let sk = SecretKey::random();
        let pk = sk.public_key();
        assert_eq!(Address::from_public_key(&pk), Address::from_public_key(&pk));
        assert_ne!(
            Address::from_public_key(&pk),
            Address::from_public_key(&SecretKey::random().public_key())
        );
    }
}
