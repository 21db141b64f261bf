use serde::{Deserialize, Serialize};
use umbral_pre::{PublicKey, Signature, Signer};

use crate::address::Address;
use crate::hrac::HRAC;
use crate::versioning::{ProtocolObject, ProtocolObjectInner};

fn order_message(staking_provider_address: &Address, hrac: &HRAC) -> Vec<u8> {
    [b"revoke".as_slice(), staking_provider_address.as_ref(), hrac.as_ref()].concat()
}

fn ack_message(staking_provider_address: &Address, hrac: &HRAC) -> Vec<u8> {
    [b"revoked".as_slice(), staking_provider_address.as_ref(), hrac.as_ref()].concat()
}

/// Represents a string used by characters to perform a revocation on a specific Ursula.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct RevocationOrder {
    /// The address of the Ursula that is being revoked.
    pub staking_provider_address: Address,
    /// The policy being revoked.
    pub hrac: HRAC,
    signature: Signature,
}

impl RevocationOrder {
    /// Create and sign a new revocation order.
    pub fn new(signer: &Signer, staking_provider_address: &Address, hrac: &HRAC) -> Self {
        Self {
            staking_provider_address: *staking_provider_address,
            hrac: *hrac,
            signature: signer.sign(&order_message(staking_provider_address, hrac)),
        }
    }

    /// Verifies the revocation order against Alice's key.
    pub fn verify_signature(&self, alice_verifying_key: &PublicKey) -> bool {
        self.signature.verify(
            alice_verifying_key,
            &order_message(&self.staking_provider_address, &self.hrac),
        )
    }
}

impl<'a> ProtocolObjectInner<'a> for RevocationOrder {
    fn brand() -> [u8; 4] {
        *b"Revo"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for RevocationOrder {}

/// The holder's signed confirmation that its key fragment for a policy is gone.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct RevocationAck {
    /// The address of the Ursula that revoked.
    pub staking_provider_address: Address,
    /// The revoked policy.
    pub hrac: HRAC,
    signature: Signature,
}

impl RevocationAck {
    /// Creates and signs an acknowledgement.
    pub fn new(signer: &Signer, staking_provider_address: &Address, hrac: &HRAC) -> Self {
        Self {
            staking_provider_address: *staking_provider_address,
            hrac: *hrac,
            signature: signer.sign(&ack_message(staking_provider_address, hrac)),
        }
    }

    /// Verifies the acknowledgement against the holder's key.
    pub fn verify_signature(&self, ursula_verifying_key: &PublicKey) -> bool {
        self.signature.verify(
            ursula_verifying_key,
            &ack_message(&self.staking_provider_address, &self.hrac),
        )
    }
}

impl<'a> ProtocolObjectInner<'a> for RevocationAck {
    fn brand() -> [u8; 4] {
        *b"RvAk"
    }

    fn version() -> (u16, u16) {
        (1, 0)
    }
}

impl<'a> ProtocolObject<'a> for RevocationAck {}

#[cfg(test)]
mod tests {
    use umbral_pre::{SecretKey, Signer};

    use super::{RevocationAck, RevocationOrder};
    use crate::address::Address;
    use crate::hrac::HRAC;
    use crate::versioning::ProtocolObject;

    #[test]
    fn order_and_ack() {
        let alice = Signer::new(SecretKey::random());
        let ursula = Signer::new(SecretKey::random());
        let address = Address::from_public_key(&ursula.verifying_key());
        let hrac = HRAC::new(&alice.verifying_key(), &SecretKey::random().public_key(), b"x");

        let order = RevocationOrder::new(&alice, &address, &hrac);
        let order = RevocationOrder::from_bytes(&order.to_bytes()).unwrap();
        assert!(order.verify_signature(&alice.verifying_key()));
        assert!(!order.verify_signature(&ursula.verifying_key()));

        let ack = RevocationAck::new(&ursula, &address, &hrac);
        assert!(ack.verify_signature(&ursula.verifying_key()));
        // An order is not an acknowledgement, even with the same fields.
        assert!(RevocationAck::from_bytes(&order.to_bytes()).is_err());
    }
}
