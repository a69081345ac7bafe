//! Lease-based leader election
//!
//! One replica of each role runs its controllers. Every write of the
//! `coordination.k8s.io/v1` Lease carries the `resourceVersion` that was
//! read, so two replicas racing for it get one success and one 409.
//!
//! The holder renews every [`RENEW_INTERVAL`]. Transient API errors are
//! tolerated until [`RENEW_DEADLINE`] has passed since the last successful
//! renewal; seeing another holder ends leadership at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lease name for the hub controller-manager
pub const CONTROLLER_LEASE_NAME: &str = "submariner-addon-controller-leader";

/// Lease name for the spoke agent
pub const AGENT_LEASE_NAME: &str = "submariner-addon-agent-leader";

/// How long a lease stays valid without renewal
pub const LEASE_DURATION: Duration = Duration::from_secs(30);
/// Give up leadership when renewals have failed for this long
pub const RENEW_DEADLINE: Duration = Duration::from_secs(20);
/// Interval between renewals while leading
pub const RENEW_INTERVAL: Duration = Duration::from_secs(10);
/// Interval between attempts while following
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    /// Kubernetes API error
    #[error("lease API error: {0}")]
    Kube(#[from] kube::Error),

    /// Lease returned by the API server has no resourceVersion
    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

/// Storage for one named Lease
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Current lease, `None` when it does not exist yet
    async fn get(&self) -> Result<Option<Lease>, kube::Error>;

    /// Create the lease; 409 when another replica created it first
    async fn create(&self, lease: &Lease) -> Result<(), kube::Error>;

    /// Replace the lease; 409 when its resourceVersion is stale
    async fn replace(&self, lease: &Lease) -> Result<(), kube::Error>;
}

/// [`LeaseStore`] backed by the Kubernetes API
pub struct KubeLeaseStore {
    api: Api<Lease>,
    name: String,
}

impl KubeLeaseStore {
    /// Lease `name` in `namespace`
    pub fn new(client: Client, name: &str, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl LeaseStore for KubeLeaseStore {
    async fn get(&self) -> Result<Option<Lease>, kube::Error> {
        self.api.get_opt(&self.name).await
    }

    async fn create(&self, lease: &Lease) -> Result<(), kube::Error> {
        self.api.create(&PostParams::default(), lease).await.map(|_| ())
    }

    async fn replace(&self, lease: &Lease) -> Result<(), kube::Error> {
        self.api
            .replace(&self.name, &PostParams::default(), lease)
            .await
            .map(|_| ())
    }
}

/// What to do with the current lease
#[derive(Debug, Clone, PartialEq, Eq)]
enum LeaseDecision {
    /// We hold it; bump renewTime
    Renew,
    /// Expired or released; take it over with `transitions + 1`
    TakeOver { transitions: i32 },
    /// Someone else holds a live lease
    Wait,
}

fn decide(spec: Option<&LeaseSpec>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    if holder == Some(identity) {
        return LeaseDecision::Renew;
    }

    let renewed = spec.and_then(|s| s.renew_time.as_ref());
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    let live = match (holder, renewed, duration) {
        (Some(_), Some(at), Some(secs)) => now <= at.0 + chrono::Duration::seconds(secs.into()),
        _ => false,
    };

    if live {
        LeaseDecision::Wait
    } else {
        LeaseDecision::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0),
        }
    }
}

fn is_conflict(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 409)
}

/// Leader elector for one lease
pub struct LeaderElector {
    store: Box<dyn LeaseStore>,
    lease_name: String,
    identity: String,
    is_leader: AtomicBool,
}

impl LeaderElector {
    /// Elector for lease `lease_name` in `namespace`
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        info!(lease = %lease_name, %namespace, %identity, "Leader election configured");
        Self::with_store(
            Box::new(KubeLeaseStore::new(client, lease_name, namespace)),
            lease_name,
            identity,
        )
    }

    /// Elector over an arbitrary lease store
    pub fn with_store(store: Box<dyn LeaseStore>, lease_name: &str, identity: &str) -> Self {
        Self {
            store,
            lease_name: lease_name.to_string(),
            identity: identity.to_string(),
            is_leader: AtomicBool::new(false),
        }
    }

    /// Whether this replica currently holds the lease
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Wait until the lease is ours, then keep renewing it in the background
    pub async fn acquire(self: Arc<Self>) -> Result<LeaderGuard, LeaderElectionError> {
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => break,
                Ok(false) => debug!(lease = %self.lease_name, "Lease held elsewhere"),
                Err(e) => warn!(lease = %self.lease_name, error = %e, "Lease attempt failed"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }

        info!(lease = %self.lease_name, identity = %self.identity, "Became leader");
        self.is_leader.store(true, Ordering::SeqCst);

        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(&self);
        let renewal_task = tokio::spawn(async move { elector.keep_renewing(lost_tx).await });
        Ok(LeaderGuard {
            elector: self,
            renewal_task,
            lost_rx: Some(lost_rx),
        })
    }

    /// One election round; `Ok(true)` when we hold the lease afterwards
    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let now = Utc::now();

        let Some(existing) = self.store.get().await? else {
            let lease = self.lease(None, self.held_spec(now, 0));
            return match self.store.create(&lease).await {
                Ok(()) => Ok(true),
                Err(e) if is_conflict(&e) => Ok(false),
                Err(e) => Err(e.into()),
            };
        };

        let resource_version = existing
            .metadata
            .resource_version
            .clone()
            .ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))?;

        let spec = match decide(existing.spec.as_ref(), &self.identity, now) {
            LeaseDecision::Wait => return Ok(false),
            LeaseDecision::Renew => LeaseSpec {
                renew_time: Some(MicroTime(now)),
                ..existing.spec.clone().unwrap_or_default()
            },
            LeaseDecision::TakeOver { transitions } => {
                debug!(lease = %self.lease_name, "Taking over expired lease");
                self.held_spec(now, transitions + 1)
            }
        };

        match self.store.replace(&self.lease(Some(resource_version), spec)).await {
            Ok(()) => Ok(true),
            Err(e) if is_conflict(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn lease(&self, resource_version: Option<String>, spec: LeaseSpec) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(spec),
        }
    }

    fn held_spec(&self, now: DateTime<Utc>, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    async fn keep_renewing(&self, lost_tx: oneshot::Sender<()>) {
        let mut last_renewed = Instant::now();
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => last_renewed = Instant::now(),
                Ok(false) => {
                    warn!(lease = %self.lease_name, "Lease taken by another replica");
                    break;
                }
                Err(e) if last_renewed.elapsed() < RENEW_DEADLINE => {
                    warn!(lease = %self.lease_name, error = %e, "Lease renewal failed, retrying");
                }
                Err(e) => {
                    warn!(lease = %self.lease_name, error = %e, "Lease renewal deadline exceeded");
                    break;
                }
            }
        }
        self.is_leader.store(false, Ordering::SeqCst);
        let _ = lost_tx.send(());
    }

    /// Clear the holder so a standby can take over without waiting for expiry
    async fn release(&self) -> Result<(), LeaderElectionError> {
        let Some(mut lease) = self.store.get().await? else {
            return Ok(());
        };
        let Some(spec) = lease.spec.as_mut() else {
            return Ok(());
        };
        if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
            return Ok(());
        }
        spec.holder_identity = None;
        spec.renew_time = None;

        self.store.replace(&lease).await?;
        info!(lease = %self.lease_name, "Lease released");
        Ok(())
    }
}

/// Holds leadership while alive; renewal stops on drop
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Resolves once leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Give up the lease during graceful shutdown
    pub async fn release_leadership(&self) -> Result<(), LeaderElectionError> {
        self.renewal_task.abort();
        self.elector.release().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
        self.elector.is_leader.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::api_error;
    use std::sync::Mutex;

    fn spec(holder: Option<&str>, renewed_secs_ago: i64, duration: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: holder.map(str::to_string),
            renew_time: Some(MicroTime(Utc::now() - chrono::Duration::seconds(renewed_secs_ago))),
            lease_duration_seconds: Some(duration),
            lease_transitions: Some(3),
            ..Default::default()
        }
    }

    fn stored(spec: LeaseSpec) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(CONTROLLER_LEASE_NAME.to_string()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            spec: Some(spec),
        }
    }

    fn elector(store: MockLeaseStore, identity: &str) -> Arc<LeaderElector> {
        Arc::new(LeaderElector::with_store(
            Box::new(store),
            CONTROLLER_LEASE_NAME,
            identity,
        ))
    }

    #[test]
    fn holder_renews() {
        let s = spec(Some("pod-a"), 5, 30);
        assert_eq!(decide(Some(&s), "pod-a", Utc::now()), LeaseDecision::Renew);
    }

    #[test]
    fn live_lease_of_another_holder_waits() {
        let s = spec(Some("pod-b"), 5, 30);
        assert_eq!(decide(Some(&s), "pod-a", Utc::now()), LeaseDecision::Wait);
    }

    #[test]
    fn expired_or_released_lease_is_taken_over() {
        let expired = spec(Some("pod-b"), 60, 30);
        assert_eq!(
            decide(Some(&expired), "pod-a", Utc::now()),
            LeaseDecision::TakeOver { transitions: 3 }
        );

        let released = spec(None, 0, 30);
        assert!(matches!(
            decide(Some(&released), "pod-a", Utc::now()),
            LeaseDecision::TakeOver { .. }
        ));

        assert_eq!(
            decide(None, "pod-a", Utc::now()),
            LeaseDecision::TakeOver { transitions: 0 }
        );
    }

    #[tokio::test]
    async fn missing_lease_is_created() {
        let created = Arc::new(Mutex::new(None));
        let mut store = MockLeaseStore::new();
        store.expect_get().returning(|| Ok(None));
        let sink = created.clone();
        store.expect_create().returning(move |lease| {
            *sink.lock().unwrap() = Some(lease.clone());
            Ok(())
        });

        assert!(elector(store, "pod-a").try_acquire_or_renew().await.unwrap());

        let lease = created.lock().unwrap().clone().unwrap();
        let spec = lease.spec.unwrap();
        assert_eq!(spec.holder_identity.as_deref(), Some("pod-a"));
        assert_eq!(spec.lease_transitions, Some(0));
        assert!(lease.metadata.resource_version.is_none());
    }

    #[tokio::test]
    async fn takeover_carries_resource_version_and_bumps_transitions() {
        let replaced = Arc::new(Mutex::new(None));
        let mut store = MockLeaseStore::new();
        store
            .expect_get()
            .returning(|| Ok(Some(stored(spec(Some("pod-b"), 60, 30)))));
        let sink = replaced.clone();
        store.expect_replace().returning(move |lease| {
            *sink.lock().unwrap() = Some(lease.clone());
            Ok(())
        });

        assert!(elector(store, "pod-a").try_acquire_or_renew().await.unwrap());

        let lease = replaced.lock().unwrap().clone().unwrap();
        assert_eq!(lease.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(lease.spec.unwrap().lease_transitions, Some(4));
    }

    #[tokio::test]
    async fn losing_the_write_race_is_not_leadership() {
        let mut store = MockLeaseStore::new();
        store
            .expect_get()
            .returning(|| Ok(Some(stored(spec(Some("pod-b"), 60, 30)))));
        store
            .expect_replace()
            .returning(|_| Err(api_error(409, "Conflict")));

        assert!(!elector(store, "pod-a").try_acquire_or_renew().await.unwrap());
    }

    #[tokio::test]
    async fn live_lease_of_another_is_left_alone() {
        let mut store = MockLeaseStore::new();
        store
            .expect_get()
            .returning(|| Ok(Some(stored(spec(Some("pod-b"), 1, 30)))));
        store.expect_replace().never();

        assert!(!elector(store, "pod-a").try_acquire_or_renew().await.unwrap());
    }

    #[tokio::test]
    async fn release_clears_only_our_own_hold() {
        let mut store = MockLeaseStore::new();
        store
            .expect_get()
            .returning(|| Ok(Some(stored(spec(Some("pod-b"), 1, 30)))));
        store.expect_replace().never();
        elector(store, "pod-a").release().await.unwrap();

        let mut store = MockLeaseStore::new();
        store
            .expect_get()
            .returning(|| Ok(Some(stored(spec(Some("pod-a"), 1, 30)))));
        store
            .expect_replace()
            .withf(|lease| {
                lease
                    .spec
                    .as_ref()
                    .is_some_and(|s| s.holder_identity.is_none())
            })
            .times(1)
            .returning(|_| Ok(()));
        elector(store, "pod-a").release().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transient_renewal_errors_keep_leadership_until_deadline() {
        let calls = Arc::new(Mutex::new(0u32));
        let mut store = MockLeaseStore::new();
        store.expect_get().returning(|| Ok(None));
        let counter = calls.clone();
        store.expect_create().returning(move |_| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            match *n {
                1 => Ok(()),
                _ => Err(api_error(503, "ServiceUnavailable")),
            }
        });

        let elector = elector(store, "pod-a");
        let mut guard = elector.clone().acquire().await.unwrap();
        assert!(elector.is_leader());

        tokio::time::sleep(RENEW_INTERVAL + Duration::from_secs(1)).await;
        assert!(elector.is_leader());

        guard.lost().await;
        assert!(!elector.is_leader());
    }
}
