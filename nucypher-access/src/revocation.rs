//! Revocation of a granted policy.

use futures::stream::{self, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use umbral_pre::Signer;

use crate::address::Address;
use crate::arrangement::ArrangementStatus;
use crate::config::GrantConfig;
use crate::error::{HolderFailure, PolicyError};
use crate::middleware::Middleware;
use crate::policy::{Policy, PolicyState};
use crate::revocation_order::RevocationOrder;

/// Outcome of one revocation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RevocationReport {
    /// Holders that confirmed during this pass.
    pub revoked: Vec<Address>,
    /// Holders that have not confirmed yet.
    pub outstanding: Vec<Address>,
}

impl RevocationReport {
    /// Whether every holder has confirmed.
    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Turns an incomplete report into `RevocationIncomplete`.
    pub fn into_result(self) -> Result<Vec<Address>, PolicyError> {
        if self.outstanding.is_empty() {
            Ok(self.revoked)
        } else {
            Err(PolicyError::RevocationIncomplete {
                outstanding: self.outstanding,
            })
        }
    }
}

/// Sends revocation orders to every holder that may still store a key fragment.
///
/// The first call targets every arrangement that received a share.
/// Later calls only target the holders that have not confirmed,
/// so the outstanding set can only shrink.
pub async fn revoke(
    signer: &Signer,
    middleware: &dyn Middleware,
    config: &GrantConfig,
    policy: &mut Policy,
) -> RevocationReport {
    if policy.state != PolicyState::RevocationPending {
        // A failed enactment may still have left the share with the holder.
        policy.outstanding = policy
            .arrangements
            .iter()
            .filter(|arrangement| {
                matches!(
                    arrangement.status,
                    ArrangementStatus::Enacted | ArrangementStatus::EnactmentFailed
                )
            })
            .map(|arrangement| arrangement.ursula_address())
            .collect();
        policy.unassigned.clear();
    }
    policy.state = PolicyState::RevocationPending;

    let targets: Vec<_> = policy
        .arrangements
        .iter()
        .filter(|arrangement| policy.outstanding.contains(&arrangement.ursula_address()))
        .map(|arrangement| arrangement.ursula.clone())
        .collect();
    let hrac = policy.hrac;

    let outcomes: Vec<(Address, Result<(), HolderFailure>)> = stream::iter(targets)
        .map(|ursula| async move {
            let address = ursula.staking_provider_address;
            let order = RevocationOrder::new(signer, &address, &hrac);
            let outcome = timeout(config.revocation_timeout, middleware.revoke(&ursula, &order))
                .await
                .map_err(|_| HolderFailure::NetworkTimeout)
                .and_then(|result| result.map_err(HolderFailure::from))
                .and_then(|ack| {
                    if ack.hrac == hrac
                        && ack.staking_provider_address == address
                        && ack.verify_signature(&ursula.verifying_key)
                    {
                        Ok(())
                    } else {
                        Err(HolderFailure::InvalidSignature)
                    }
                });
            (address, outcome)
        })
        .buffer_unordered(config.max_concurrency.max(1))
        .collect()
        .await;

    let mut report = RevocationReport::default();
    for (address, outcome) in outcomes {
        match outcome {
            Ok(()) => {
                debug!(ursula = %address, %hrac, "revocation confirmed");
                policy.outstanding.remove(&address);
                for arrangement in policy
                    .arrangements
                    .iter_mut()
                    .filter(|arrangement| arrangement.ursula_address() == address)
                {
                    arrangement.status = ArrangementStatus::Revoked;
                }
                report.revoked.push(address);
            }
            Err(failure) => {
                debug!(ursula = %address, %hrac, %failure, "revocation not confirmed")
            }
        }
    }
    report.revoked.sort();
    report.outstanding = policy.outstanding.iter().copied().collect();

    if report.outstanding.is_empty() {
        policy.state = PolicyState::Revoked;
        info!(%hrac, "policy revoked");
    } else {
        warn!(%hrac, outstanding = report.outstanding.len(), "revocation incomplete");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::RevocationReport;
    use crate::address::Address;
    use crate::error::PolicyError;

    #[test]
    fn partial_report_is_an_error() {
        let address = Address::new(&[7; Address::SIZE]);
        let complete = RevocationReport {
            revoked: vec![address],
            outstanding: vec![],
        };
        assert!(complete.is_complete());
        assert_eq!(complete.into_result().unwrap(), [address]);

        let partial = RevocationReport {
            revoked: vec![],
            outstanding: vec![address],
        };
        assert!(matches!(
            partial.into_result(),
            Err(PolicyError::RevocationIncomplete { outstanding }) if outstanding == [address]
        ));
    }
}
