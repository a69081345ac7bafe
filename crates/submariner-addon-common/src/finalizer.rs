//! Idempotent finalizer add/remove under conflict retry

use kube::{Resource, ResourceExt};
use tracing::debug;

use crate::retry::retry_on_conflict;
use crate::status::ResourceClient;
use crate::Error;

/// True when `obj` carries `finalizer`
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// True when `obj` has a deletion timestamp
pub fn is_being_deleted<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// Append `finalizer` to `obj`. Returns whether a write happened.
///
/// No API call is made when the object is being deleted or already carries
/// the finalizer.
pub async fn add_finalizer<K, C>(client: &C, obj: &K, finalizer: &str) -> Result<bool, Error>
where
    K: Resource + Clone + Send + Sync + 'static,
    C: ResourceClient<K> + ?Sized,
{
    if is_being_deleted(obj) || has_finalizer(obj, finalizer) {
        return Ok(false);
    }

    let owned_name = obj.name_any();
    let name = owned_name.as_str();
    retry_on_conflict("add_finalizer", move || async move {
        let Some(mut latest) = client.get_opt(name).await? else {
            return Ok(false);
        };
        if is_being_deleted(&latest) || has_finalizer(&latest, finalizer) {
            return Ok(false);
        }

        latest.finalizers_mut().push(finalizer.to_string());
        client.replace(name, &latest).await?;
        debug!(name, finalizer, "Finalizer added");
        Ok(true)
    })
    .await
}

/// Remove `finalizer` from `obj`, preserving the order of the others.
///
/// No API call is made when the finalizer is absent.
pub async fn remove_finalizer<K, C>(client: &C, obj: &K, finalizer: &str) -> Result<bool, Error>
where
    K: Resource + Clone + Send + Sync + 'static,
    C: ResourceClient<K> + ?Sized,
{
    if !has_finalizer(obj, finalizer) {
        return Ok(false);
    }

    let owned_name = obj.name_any();
    let name = owned_name.as_str();
    retry_on_conflict("remove_finalizer", move || async move {
        let Some(mut latest) = client.get_opt(name).await? else {
            return Ok(false);
        };
        if !has_finalizer(&latest, finalizer) {
            return Ok(false);
        }

        latest.finalizers_mut().retain(|f| f != finalizer);
        client.replace(name, &latest).await?;
        debug!(name, finalizer, "Finalizer removed");
        Ok(true)
    })
    .await
}
