//! The proxy re-encryption capability the workflows rely on,
//! narrowed down to the four operations they need.

use umbral_pre::{
    decrypt_reencrypted, generate_kfrags, Capsule, CapsuleFrag, PublicKey, ReencryptionError,
    SecretKey, Signer, VerifiedCapsuleFrag, VerifiedKeyFrag,
};

use crate::arrangement::ShareIndex;

/// Keys a capsule frag is checked against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectnessKeys {
    /// The policy encrypting key.
    pub delegating: PublicKey,
    /// Bob's encrypting key.
    pub receiving: PublicKey,
    /// The publisher's verifying key, which signed the key fragments.
    pub verifying: PublicKey,
}

/// Splits the re-encryption key from `delegating_sk` to `receiving_pk`
/// into `shares` fragments, any `threshold` of which suffice.
pub fn split_key(
    delegating_sk: &SecretKey,
    receiving_pk: &PublicKey,
    signer: &Signer,
    threshold: u8,
    shares: u8,
) -> Vec<(ShareIndex, VerifiedKeyFrag)> {
    generate_kfrags(
        delegating_sk,
        receiving_pk,
        signer,
        threshold as usize,
        shares as usize,
        true,
        true,
    )
    .into_vec()
    .into_iter()
    .enumerate()
    .map(|(index, kfrag)| (ShareIndex(index as u8), kfrag))
    .collect()
}

/// Re-encrypts a capsule with one key fragment.
pub fn reencrypt(capsule: &Capsule, kfrag: VerifiedKeyFrag) -> VerifiedCapsuleFrag {
    umbral_pre::reencrypt(capsule, kfrag)
}

/// Checks the correctness proof of a capsule frag.
/// Gives the capsule frag back on failure, to be used as evidence.
pub fn verify_correctness(
    capsule: &Capsule,
    cfrag: CapsuleFrag,
    keys: &CorrectnessKeys,
) -> Result<VerifiedCapsuleFrag, CapsuleFrag> {
    cfrag
        .verify(capsule, &keys.verifying, &keys.delegating, &keys.receiving)
        .map_err(|(_error, cfrag)| cfrag)
}

/// Opens a capsule with `threshold` verified capsule frags and decrypts the ciphertext.
pub fn decapsulate(
    receiving_sk: &SecretKey,
    delegating_pk: &PublicKey,
    capsule: &Capsule,
    cfrags: Vec<VerifiedCapsuleFrag>,
    ciphertext: &[u8],
) -> Result<Box<[u8]>, ReencryptionError> {
    decrypt_reencrypted(receiving_sk, delegating_pk, capsule, cfrags, ciphertext)
}

#[cfg(test)]
mod tests {
    use umbral_pre::{encrypt, SecretKey, Signer};

    use super::{decapsulate, reencrypt, split_key, verify_correctness, CorrectnessKeys};
    use crate::arrangement::ShareIndex;

    #[test]
    fn any_threshold_of_shares() {
        let delegating_sk = SecretKey::random();
        let receiving_sk = SecretKey::random();
        let signer = Signer::new(SecretKey::random());
        let keys = CorrectnessKeys {
            delegating: delegating_sk.public_key(),
            receiving: receiving_sk.public_key(),
            verifying: signer.verifying_key(),
        };

        let (capsule, ciphertext) = encrypt(&keys.delegating, b"peace at dawn").unwrap();
        let kfrags = split_key(&delegating_sk, &keys.receiving, &signer, 2, 3);
        let indices: Vec<_> = kfrags.iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, [ShareIndex(0), ShareIndex(1), ShareIndex(2)]);

        let cfrags: Vec<_> = kfrags
            .into_iter()
            .skip(1)
            .map(|(_, kfrag)| {
                let cfrag = reencrypt(&capsule, kfrag).unverify();
                verify_correctness(&capsule, cfrag, &keys).unwrap()
            })
            .collect();

        let plaintext = decapsulate(
            &receiving_sk,
            &keys.delegating,
            &capsule,
            cfrags,
            &ciphertext,
        )
        .unwrap();
        assert_eq!(plaintext.as_ref(), b"peace at dawn");
    }

    #[test]
    fn wrong_keys_fail_the_proof() {
        let delegating_sk = SecretKey::random();
        let receiving_sk = SecretKey::random();
        let signer = Signer::new(SecretKey::random());
        let (capsule, _ciphertext) = encrypt(&delegating_sk.public_key(), b"x").unwrap();

        let (_, kfrag) = split_key(&delegating_sk, &receiving_sk.public_key(), &signer, 1, 1)
            .remove(0);
        let cfrag = reencrypt(&capsule, kfrag).unverify();

        let keys = CorrectnessKeys {
            delegating: delegating_sk.public_key(),
            receiving: SecretKey::random().public_key(),
            verifying: signer.verifying_key(),
        };
        let returned = verify_correctness(&capsule, cfrag.clone(), &keys).unwrap_err();
        assert_eq!(returned, cfrag);
    }
}
