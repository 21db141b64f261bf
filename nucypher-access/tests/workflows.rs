use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use nucypher_access::memory::{Behaviour, MemoryAdjudicator, MemoryNetwork};
use nucypher_access::umbral_pre::{SecretKey, SecretKeyFactory, Signer};
use nucypher_access::{
    unix_now, Alice, ArrangementStatus, Bob, EvidenceQueue, EvidenceSubmitter, GrantConfig,
    GrantRequest, MessageKit, PolicyCoordinator, PolicyError, PolicyState, RetrievalConfig,
    RetrievalError, Ursula, HRAC,
};

const DOMAIN: &str = "lynx";
const LABEL: &[u8] = b"/sensor/kitchen";

fn grant_config() -> GrantConfig {
    GrantConfig {
        domain: DOMAIN.into(),
        negotiation_timeout: Duration::from_millis(500),
        enactment_timeout: Duration::from_millis(500),
        revocation_timeout: Duration::from_millis(500),
        ..GrantConfig::default()
    }
}

fn make_alice(network: &Arc<MemoryNetwork>) -> Alice {
    Alice::new(
        Signer::new(SecretKey::random()),
        SecretKeyFactory::random(),
        network.clone(),
        network.clone(),
        grant_config(),
    )
}

fn make_bob(network: &Arc<MemoryNetwork>, evidence: Option<EvidenceQueue>) -> Bob {
    let config = RetrievalConfig {
        request_timeout: Duration::from_millis(200),
        ..RetrievalConfig::default()
    };
    Bob::new(
        SecretKey::random(),
        SecretKey::random(),
        network.clone(),
        network.clone(),
        config,
        evidence,
    )
}

// One expiration for the whole run, so that repeated grants agree on it.
fn expiration() -> u64 {
    static EXPIRATION: OnceLock<u64> = OnceLock::new();
    *EXPIRATION.get_or_init(|| unix_now() + 3600)
}

fn request(bob: &Bob, threshold: usize, shares: usize) -> GrantRequest<'static> {
    GrantRequest {
        label: LABEL,
        bob_verifying_key: bob.verifying_key(),
        bob_encrypting_key: bob.encrypting_key(),
        threshold,
        shares,
        expiration: expiration(),
        value: None,
        handpicked: None,
    }
}

async fn granted(
    network: &Arc<MemoryNetwork>,
    threshold: usize,
    shares: usize,
    evidence: Option<EvidenceQueue>,
) -> (Alice, Bob) {
    let alice = make_alice(network);
    let bob = make_bob(network, evidence);
    let emap = alice.grant(request(&bob, threshold, shares)).await.unwrap();
    bob.join_policy(&emap, &alice.verifying_key()).unwrap();
    (alice, bob)
}

#[tokio::test]
async fn single_holder_round_trip() {
    let network = Arc::new(MemoryNetwork::new());
    network.spawn_ursulas(1, DOMAIN);
    let (alice, bob) = granted(&network, 1, 1, None).await;

    let kit = MessageKit::new(&alice.derive_policy_key(LABEL), b"kettle is on").unwrap();
    let plaintext = bob
        .decrypt(&alice.verifying_key(), LABEL, &kit)
        .await
        .unwrap();
    assert_eq!(&*plaintext, b"kettle is on");
    assert_eq!(
        alice.policy_state(LABEL, &bob.verifying_key()).await,
        Some(PolicyState::Active)
    );
}

#[tokio::test]
async fn data_encrypted_before_the_grant() {
    let network = Arc::new(MemoryNetwork::new());
    network.spawn_ursulas(3, DOMAIN);
    let alice = make_alice(&network);
    let kit = MessageKit::new(&alice.derive_policy_key(LABEL), b"written early").unwrap();

    let bob = make_bob(&network, None);
    let emap = alice.grant(request(&bob, 2, 3)).await.unwrap();
    bob.join_policy(&emap, &alice.verifying_key()).unwrap();

    let plaintext = bob
        .decrypt(&alice.verifying_key(), LABEL, &kit)
        .await
        .unwrap();
    assert_eq!(&*plaintext, b"written early");
}

#[tokio::test]
async fn one_holder_offline() {
    let network = Arc::new(MemoryNetwork::new());
    let ursulas = network.spawn_ursulas(3, DOMAIN);
    let (alice, bob) = granted(&network, 2, 3, None).await;
    network.set_behaviour(&ursulas[1].address(), Behaviour::Offline);

    let kit = MessageKit::new(&alice.derive_policy_key(LABEL), b"one down").unwrap();
    let plaintext = bob
        .decrypt(&alice.verifying_key(), LABEL, &kit)
        .await
        .unwrap();
    assert_eq!(&*plaintext, b"one down");
}

#[tokio::test]
async fn slow_holder_is_timed_out() {
    let network = Arc::new(MemoryNetwork::new());
    let ursulas = network.spawn_ursulas(3, DOMAIN);
    let (alice, bob) = granted(&network, 2, 3, None).await;
    network.set_behaviour(
        &ursulas[0].address(),
        Behaviour::Slow(Duration::from_secs(5)),
    );

    let kit = MessageKit::new(&alice.derive_policy_key(LABEL), b"no waiting").unwrap();
    let plaintext = bob
        .decrypt(&alice.verifying_key(), LABEL, &kit)
        .await
        .unwrap();
    assert_eq!(&*plaintext, b"no waiting");
}

#[tokio::test]
async fn any_threshold_subset_decrypts() {
    let network = Arc::new(MemoryNetwork::new());
    let ursulas = network.spawn_ursulas(3, DOMAIN);
    let (alice, bob) = granted(&network, 2, 3, None).await;
    let kit = MessageKit::new(&alice.derive_policy_key(LABEL), b"any two").unwrap();

    for offline in &ursulas {
        for ursula in &ursulas {
            network.set_behaviour(&ursula.address(), Behaviour::Honest);
        }
        network.set_behaviour(&offline.address(), Behaviour::Offline);

        let plaintext = bob
            .decrypt(&alice.verifying_key(), LABEL, &kit)
            .await
            .unwrap();
        assert_eq!(&*plaintext, b"any two");
    }
}

#[tokio::test]
async fn corrupt_holders_produce_evidence() {
    let network = Arc::new(MemoryNetwork::new());
    let ursulas = network.spawn_ursulas(3, DOMAIN);
    let adjudicator = Arc::new(MemoryAdjudicator::new());
    let (queue, submitter) = EvidenceSubmitter::spawn(adjudicator.clone());
    let (alice, bob) = granted(&network, 2, 3, Some(queue)).await;

    let corrupt = BTreeSet::from([ursulas[0].address(), ursulas[2].address()]);
    for address in &corrupt {
        network.set_behaviour(address, Behaviour::CorruptCFrags);
    }

    let kit = MessageKit::new(&alice.derive_policy_key(LABEL), b"tampered").unwrap();
    let result = bob.decrypt(&alice.verifying_key(), LABEL, &kit).await;
    assert!(matches!(
        result,
        Err(RetrievalError::InsufficientCFrags { threshold: 2, .. })
    ));

    // The submitter stops once the last queue handle is gone.
    drop(bob);
    let report = submitter.await.unwrap();
    assert_eq!(report.submitted, 2);
    assert_eq!(report.already_slashed, 0);

    let accused: BTreeSet<_> = adjudicator
        .accepted()
        .iter()
        .map(|evidence| evidence.precomputed.ursula_address)
        .collect();
    assert_eq!(accused, corrupt);
    for evidence in adjudicator.accepted() {
        assert_eq!(evidence.capsule, *kit.capsule());
        assert_eq!(
            evidence.hrac,
            HRAC::new(&alice.verifying_key(), &evidence.bob_verifying_key, LABEL)
        );
        assert!(evidence.task_signature_v == 27 || evidence.task_signature_v == 28);
        assert!(evidence.cfrag_signature_v == 27 || evidence.cfrag_signature_v == 28);
    }
}

#[tokio::test]
async fn retrieval_needs_a_joined_policy() {
    let network = Arc::new(MemoryNetwork::new());
    network.spawn_ursulas(1, DOMAIN);
    let alice = make_alice(&network);
    let bob = make_bob(&network, None);

    let kit = MessageKit::new(&alice.derive_policy_key(LABEL), b"unseen").unwrap();
    assert!(matches!(
        bob.decrypt(&alice.verifying_key(), LABEL, &kit).await,
        Err(RetrievalError::UnknownPolicy(_))
    ));
}

#[tokio::test]
async fn directory_outage_fails_retrieval() {
    let network = Arc::new(MemoryNetwork::new());
    network.spawn_ursulas(2, DOMAIN);
    let (alice, bob) = granted(&network, 1, 2, None).await;
    network.set_directory_available(false);

    let kit = MessageKit::new(&alice.derive_policy_key(LABEL), b"lost").unwrap();
    assert!(matches!(
        bob.decrypt(&alice.verifying_key(), LABEL, &kit).await,
        Err(RetrievalError::Directory(_))
    ));
}

#[tokio::test]
async fn directory_outage_fails_grant() {
    let network = Arc::new(MemoryNetwork::new());
    network.spawn_ursulas(2, DOMAIN);
    network.set_directory_available(false);
    let alice = make_alice(&network);
    let bob = make_bob(&network, None);

    assert!(matches!(
        alice.grant(request(&bob, 1, 2)).await,
        Err(PolicyError::Directory(_))
    ));
    assert_eq!(
        alice.policy_state(LABEL, &bob.verifying_key()).await,
        Some(PolicyState::Failed)
    );
}

#[tokio::test]
async fn rejected_holders_are_not_asked_again() {
    let network = Arc::new(MemoryNetwork::new());
    let ursulas = network.spawn_ursulas(4, DOMAIN);
    // The two highest stakes decline.
    network.set_behaviour(&ursulas[0].address(), Behaviour::RejectProposals);
    network.set_behaviour(&ursulas[1].address(), Behaviour::RejectProposals);

    let (alice, bob) = granted(&network, 2, 3, None).await;
    assert_eq!(
        alice.policy_state(LABEL, &bob.verifying_key()).await,
        Some(PolicyState::Active)
    );
    for ursula in &ursulas {
        assert_eq!(network.proposals_received(&ursula.address()), 1);
    }
    let hrac = HRAC::new(&alice.verifying_key(), &bob.verifying_key(), LABEL);
    assert!(!ursulas[0].holds_kfrag(&hrac).await);
    assert!(ursulas[3].holds_kfrag(&hrac).await);
}

#[tokio::test]
async fn shares_are_never_reused() {
    let network = Arc::new(MemoryNetwork::new());
    let ursulas = network.spawn_ursulas(5, DOMAIN);
    network.set_behaviour(&ursulas[0].address(), Behaviour::FailEnactment);

    let coordinator = PolicyCoordinator::new(
        Signer::new(SecretKey::random()),
        SecretKeyFactory::random(),
        network.clone(),
        network.clone(),
        grant_config(),
    );
    let bob = SecretKey::random().public_key();
    let mut policy = coordinator
        .draft(LABEL, &bob, &bob, 3, 4, unix_now() + 3600, None)
        .unwrap();
    coordinator.grant(&mut policy, None).await.unwrap();

    let shares: Vec<_> = policy
        .arrangements()
        .iter()
        .filter_map(|arrangement| arrangement.share)
        .collect();
    let unique: BTreeSet<_> = shares.iter().collect();
    assert_eq!(shares.len(), unique.len());

    let burned: Vec<_> = policy
        .arrangements()
        .iter()
        .filter(|arrangement| arrangement.status == ArrangementStatus::EnactmentFailed)
        .collect();
    assert_eq!(burned.len(), 1);
    assert_eq!(burned[0].ursula_address(), ursulas[0].address());
    assert!(policy.enacted().count() >= 3);
}

#[tokio::test]
async fn not_enough_holders() {
    let network = Arc::new(MemoryNetwork::new());
    network.spawn_ursulas(1, DOMAIN);
    let alice = make_alice(&network);
    let bob = make_bob(&network, None);

    assert!(matches!(
        alice.grant(request(&bob, 2, 2)).await,
        Err(PolicyError::InsufficientUrsulas {
            needed: 2,
            available: 1
        })
    ));
    assert_eq!(
        alice.policy_state(LABEL, &bob.verifying_key()).await,
        Some(PolicyState::Failed)
    );
}

#[tokio::test]
async fn regranting_reuses_the_active_policy() {
    let network = Arc::new(MemoryNetwork::new());
    let ursulas = network.spawn_ursulas(3, DOMAIN);
    let (alice, bob) = granted(&network, 2, 3, None).await;

    let emap = alice.grant(request(&bob, 2, 3)).await.unwrap();
    bob.join_policy(&emap, &alice.verifying_key()).unwrap();
    for ursula in &ursulas {
        assert_eq!(network.proposals_received(&ursula.address()), 1);
    }
}

#[tokio::test]
async fn revocation_completes_after_an_outage() {
    let network = Arc::new(MemoryNetwork::new());
    let ursulas = network.spawn_ursulas(3, DOMAIN);
    let (alice, bob) = granted(&network, 2, 3, None).await;
    let hrac = HRAC::new(&alice.verifying_key(), &bob.verifying_key(), LABEL);

    network.set_behaviour(&ursulas[2].address(), Behaviour::Offline);
    let first = alice.revoke(LABEL, &bob.verifying_key()).await.unwrap();
    assert_eq!(first.revoked.len(), 2);
    assert_eq!(first.outstanding, [ursulas[2].address()]);
    assert_eq!(
        alice.policy_state(LABEL, &bob.verifying_key()).await,
        Some(PolicyState::RevocationPending)
    );
    assert!(!ursulas[0].holds_kfrag(&hrac).await);
    assert!(ursulas[2].holds_kfrag(&hrac).await);

    network.set_behaviour(&ursulas[2].address(), Behaviour::Honest);
    let second = alice.revoke(LABEL, &bob.verifying_key()).await.unwrap();
    assert_eq!(second.revoked, [ursulas[2].address()]);
    assert!(second.is_complete());
    assert_eq!(
        alice.policy_state(LABEL, &bob.verifying_key()).await,
        Some(PolicyState::Revoked)
    );

    // Nothing left to do.
    let third = alice.revoke(LABEL, &bob.verifying_key()).await.unwrap();
    assert!(third.revoked.is_empty());
    assert!(third.is_complete());

    let kit = MessageKit::new(&alice.derive_policy_key(LABEL), b"too late").unwrap();
    assert!(matches!(
        bob.decrypt(&alice.verifying_key(), LABEL, &kit).await,
        Err(RetrievalError::InsufficientCFrags { received: 0, .. })
    ));
}

#[tokio::test]
async fn revoking_an_unknown_policy() {
    let network = Arc::new(MemoryNetwork::new());
    let alice = make_alice(&network);
    let bob = SecretKey::random().public_key();
    assert!(matches!(
        alice.revoke(LABEL, &bob).await,
        Err(PolicyError::UnknownPolicy(_))
    ));
}

#[tokio::test]
async fn holders_in_other_domains_are_ignored() {
    let network = Arc::new(MemoryNetwork::new());
    network.spawn_ursulas(3, "tapir");
    let extra = network.add_ursula(Ursula::new(
        SecretKey::random(),
        SecretKey::random(),
        DOMAIN,
        "10.0.0.1",
        9151,
        1,
    ));
    let (_alice, _bob) = granted(&network, 1, 1, None).await;
    assert_eq!(network.proposals_received(&extra.address()), 1);
}

#[tokio::test]
async fn one_corrupt_holder_is_outvoted() {
    let network = Arc::new(MemoryNetwork::new());
    let ursulas = network.spawn_ursulas(3, DOMAIN);
    let adjudicator = Arc::new(MemoryAdjudicator::new());
    let (queue, submitter) = EvidenceSubmitter::spawn(adjudicator.clone());
    let (alice, bob) = granted(&network, 2, 3, Some(queue)).await;

    network.set_behaviour(&ursulas[0].address(), Behaviour::CorruptCFrags);
    // The quorum has to wait for the slow holder, so the corrupt reply is always seen.
    network.set_behaviour(
        &ursulas[1].address(),
        Behaviour::Slow(Duration::from_millis(50)),
    );

    let kit = MessageKit::new(&alice.derive_policy_key(LABEL), b"two of three").unwrap();
    let plaintext = bob.decrypt(&alice.verifying_key(), LABEL, &kit).await.unwrap();
    assert_eq!(plaintext.as_ref(), b"two of three");

    drop(bob);
    let report = submitter.await.unwrap();
    assert_eq!(report.submitted, 1);
    let accepted = adjudicator.accepted();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].precomputed.ursula_address, ursulas[0].address());
}

#[tokio::test]
async fn signed_message_kit_through_the_network() {
    let network = Arc::new(MemoryNetwork::new());
    network.spawn_ursulas(2, DOMAIN);
    let (alice, bob) = granted(&network, 2, 2, None).await;

    let enrico = Signer::new(SecretKey::random());
    let kit =
        MessageKit::new_signed(&alice.derive_policy_key(LABEL), b"signed reading", &enrico)
            .unwrap();
    assert_eq!(kit.sender_verifying_key(), Some(enrico.verifying_key()));
    let plaintext = bob.decrypt(&alice.verifying_key(), LABEL, &kit).await.unwrap();
    assert_eq!(plaintext.as_ref(), b"signed reading");
}

#[tokio::test]
async fn regranting_during_a_revocation_keeps_the_policy() {
    let network = Arc::new(MemoryNetwork::new());
    let ursulas = network.spawn_ursulas(3, DOMAIN);
    let (alice, bob) = granted(&network, 1, 1, None).await;
    let hrac = HRAC::new(&alice.verifying_key(), &bob.verifying_key(), LABEL);
    assert!(ursulas[0].holds_kfrag(&hrac).await);

    network.set_behaviour(&ursulas[0].address(), Behaviour::Offline);
    let report = alice.revoke(LABEL, &bob.verifying_key()).await.unwrap();
    assert_eq!(report.outstanding, [ursulas[0].address()]);

    assert!(matches!(
        alice.grant(request(&bob, 1, 1)).await,
        Err(PolicyError::RevocationIncomplete { outstanding })
            if outstanding == [ursulas[0].address()]
    ));
    assert_eq!(
        alice.policy_state(LABEL, &bob.verifying_key()).await,
        Some(PolicyState::RevocationPending)
    );
    assert_eq!(network.proposals_received(&ursulas[1].address()), 0);
    assert_eq!(network.proposals_received(&ursulas[2].address()), 0);
    assert!(ursulas[0].holds_kfrag(&hrac).await);

    // The holder that missed the revocation is still tracked and gets revoked later.
    network.set_behaviour(&ursulas[0].address(), Behaviour::Honest);
    let report = alice.revoke(LABEL, &bob.verifying_key()).await.unwrap();
    assert_eq!(report.revoked, [ursulas[0].address()]);
    assert!(report.is_complete());
    assert!(!ursulas[0].holds_kfrag(&hrac).await);

    assert!(matches!(
        alice.grant(request(&bob, 1, 1)).await,
        Err(PolicyError::Revoked(_))
    ));
}

#[tokio::test]
async fn concurrent_grants_share_one_policy() {
    let network = Arc::new(MemoryNetwork::new());
    let ursulas = network.spawn_ursulas(3, DOMAIN);
    let alice = make_alice(&network);
    let bob = make_bob(&network, None);

    let (first, second) = tokio::join!(
        alice.grant(request(&bob, 2, 3)),
        alice.grant(request(&bob, 2, 3))
    );
    bob.join_policy(&first.unwrap(), &alice.verifying_key()).unwrap();
    bob.join_policy(&second.unwrap(), &alice.verifying_key()).unwrap();
    for ursula in &ursulas {
        assert_eq!(network.proposals_received(&ursula.address()), 1);
    }

    let kit = MessageKit::new(&alice.derive_policy_key(LABEL), b"once").unwrap();
    let plaintext = bob.decrypt(&alice.verifying_key(), LABEL, &kit).await.unwrap();
    assert_eq!(plaintext.as_ref(), b"once");
}

#[tokio::test]
async fn regranting_with_other_parameters() {
    let network = Arc::new(MemoryNetwork::new());
    network.spawn_ursulas(3, DOMAIN);
    let (alice, bob) = granted(&network, 2, 3, None).await;

    let changed = [
        request(&bob, 1, 3),
        request(&bob, 2, 2),
        GrantRequest {
            expiration: expiration() + 60,
            ..request(&bob, 2, 3)
        },
        GrantRequest {
            value: Some(300),
            ..request(&bob, 2, 3)
        },
    ];
    for request in changed {
        assert!(matches!(
            alice.grant(request).await,
            Err(PolicyError::ParameterMismatch(_))
        ));
    }
    assert_eq!(
        alice.policy_state(LABEL, &bob.verifying_key()).await,
        Some(PolicyState::Active)
    );
}

#[tokio::test]
async fn policies_expire() {
    let network = Arc::new(MemoryNetwork::new());
    network.spawn_ursulas(2, DOMAIN);
    let alice = make_alice(&network);
    let bob = make_bob(&network, None);
    let short = GrantRequest {
        expiration: unix_now() + 2,
        ..request(&bob, 1, 2)
    };

    let emap = alice.grant(short.clone()).await.unwrap();
    bob.join_policy(&emap, &alice.verifying_key()).unwrap();
    assert_eq!(
        alice.policy_state(LABEL, &bob.verifying_key()).await,
        Some(PolicyState::Active)
    );

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(
        alice.policy_state(LABEL, &bob.verifying_key()).await,
        Some(PolicyState::Expired)
    );
    assert!(matches!(
        alice.grant(short).await,
        Err(PolicyError::Expired(_))
    ));

    let kit = MessageKit::new(&alice.derive_policy_key(LABEL), b"stale").unwrap();
    assert!(matches!(
        bob.decrypt(&alice.verifying_key(), LABEL, &kit).await,
        Err(RetrievalError::InsufficientCFrags { received: 0, .. })
    ));
}
