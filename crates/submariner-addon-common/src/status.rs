//! Optimistic-concurrency status updates
//!
//! Every controller writes status the same way: fetch the latest object,
//! fold a list of pure update functions over a copy of its status, compare,
//! and only write through the status subresource when something changed.
//! A 409 restarts the sequence from the fetch.

use std::fmt::Debug;

use async_trait::async_trait;
use kube::api::PostParams;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::conditions::set_status_condition;
use crate::crd::{
    Condition, ManagedClusterAddOn, ManagedClusterAddOnStatus, SubmarinerConfig,
    SubmarinerConfigStatus, SubmarinerDiagnoseConfig, SubmarinerDiagnoseStatus,
};
use crate::retry::retry_on_conflict;
use crate::Error;

/// Read/write access to one resource type in one scope
///
/// Implemented for `kube::Api<K>`; tests substitute a mock.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ResourceClient<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    /// Fetch by name; `None` when the object does not exist
    async fn get_opt(&self, name: &str) -> Result<Option<K>, Error>;

    /// Replace the whole object (metadata and spec)
    async fn replace(&self, name: &str, obj: &K) -> Result<K, Error>;

    /// Replace the status subresource
    async fn replace_status(&self, name: &str, obj: &K) -> Result<K, Error>;
}

#[async_trait]
impl<K> ResourceClient<K> for Api<K>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get_opt(&self, name: &str) -> Result<Option<K>, Error> {
        Ok(Api::get_opt(self, name).await?)
    }

    async fn replace(&self, name: &str, obj: &K) -> Result<K, Error> {
        Ok(Api::replace(self, name, &PostParams::default(), obj).await?)
    }

    async fn replace_status(&self, name: &str, obj: &K) -> Result<K, Error> {
        let data = serde_json::to_vec(obj)?;
        Ok(Api::replace_status(self, name, &PostParams::default(), data).await?)
    }
}

/// Resources with a status subresource
pub trait HasStatus {
    /// The status type
    type Status: Clone + Default + PartialEq + Send + Sync + 'static;

    /// Current status, if any
    fn status(&self) -> Option<&Self::Status>;

    /// Mutable access to the status field
    fn status_mut(&mut self) -> &mut Option<Self::Status>;
}

/// Status types that carry `conditions`
pub trait HasConditions {
    /// Current conditions
    fn conditions(&self) -> &[Condition];

    /// Mutable conditions
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

macro_rules! impl_status {
    ($($kind:ty => $status:ty),* $(,)?) => {
        $(
            impl HasStatus for $kind {
                type Status = $status;

                fn status(&self) -> Option<&Self::Status> {
                    self.status.as_ref()
                }

                fn status_mut(&mut self) -> &mut Option<Self::Status> {
                    &mut self.status
                }
            }

            impl HasConditions for $status {
                fn conditions(&self) -> &[Condition] {
                    &self.conditions
                }

                fn conditions_mut(&mut self) -> &mut Vec<Condition> {
                    &mut self.conditions
                }
            }
        )*
    };
}

impl_status!(
    SubmarinerConfig => SubmarinerConfigStatus,
    SubmarinerDiagnoseConfig => SubmarinerDiagnoseStatus,
    ManagedClusterAddOn => ManagedClusterAddOnStatus,
);

/// A pure transformation applied to a copy of the current status
pub type UpdateStatusFn<S> = Box<dyn Fn(&mut S) + Send + Sync>;

/// Update function that merges `condition` into `status.conditions`
pub fn update_condition_fn<S>(condition: Condition) -> UpdateStatusFn<S>
where
    S: HasConditions + 'static,
{
    Box::new(move |status: &mut S| {
        set_status_condition(status.conditions_mut(), condition.clone());
    })
}

/// Apply `update_fns` to the status of `name`.
///
/// Returns the status after the functions ran and whether a write happened.
/// A missing object yields `(None, false)`.
pub async fn update_status<K, C>(
    client: &C,
    name: &str,
    update_fns: &[UpdateStatusFn<K::Status>],
) -> Result<(Option<K::Status>, bool), Error>
where
    K: HasStatus + Clone + Send + Sync + 'static,
    C: ResourceClient<K> + ?Sized,
{
    retry_on_conflict("update_status", move || async move {
        let Some(mut obj) = client.get_opt(name).await? else {
            debug!(name, "Object not found, skipping status update");
            return Ok((None, false));
        };

        let old = obj.status().cloned().unwrap_or_default();
        let mut new = old.clone();
        for update in update_fns {
            update(&mut new);
        }

        if new == old {
            return Ok((Some(new), false));
        }

        *obj.status_mut() = Some(new.clone());
        client.replace_status(name, &obj).await?;
        debug!(name, "Status updated");
        Ok((Some(new), true))
    })
    .await
}
