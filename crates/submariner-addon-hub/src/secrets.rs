//! Broker secrets: the IPsec PSK and per-cluster service-account tokens

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client, ResourceExt};
use rand::RngCore;
use submariner_addon_common::Error;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// Secret holding the IPsec pre-shared key in each broker namespace
pub const IPSEC_PSK_SECRET: &str = "submariner-ipsec-psk";
/// Key of the PSK inside [`IPSEC_PSK_SECRET`]
pub const IPSEC_PSK_KEY: &str = "psk";
/// Length of a generated PSK in bytes
pub const IPSEC_PSK_LEN: usize = 64;

/// Service-account token key
pub const TOKEN_KEY: &str = "token";
/// CA bundle key
pub const CA_KEY: &str = "ca.crt";

const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";
const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

/// Hub Secret access
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Fetch a secret; `None` when missing
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a secret. Returns false when it already exists.
    async fn create(&self, secret: &Secret) -> Result<bool, Error>;
}

/// [`SecretClient`] backed by the Kubernetes API
pub struct KubeSecretClient {
    client: Client,
}

impl KubeSecretClient {
    /// Wrap a hub client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretClient for KubeSecretClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create(&self, secret: &Secret) -> Result<bool, Error> {
        let namespace = secret
            .namespace()
            .ok_or_else(|| Error::validation_for("Secret", "namespace is required"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        match api.create(&PostParams::default(), secret).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn random_psk() -> Vec<u8> {
    let mut psk = vec![0u8; IPSEC_PSK_LEN];
    rand::thread_rng().fill_bytes(&mut psk);
    psk
}

/// Create the broker PSK secret unless it already exists. Never overwrites.
pub async fn ensure_ipsec_psk(secrets: &dyn SecretClient, broker_namespace: &str) -> Result<bool, Error> {
    if secrets.get(broker_namespace, IPSEC_PSK_SECRET).await?.is_some() {
        return Ok(false);
    }

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(IPSEC_PSK_SECRET.to_string()),
            namespace: Some(broker_namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            IPSEC_PSK_KEY.to_string(),
            ByteString(random_psk()),
        )])),
        ..Default::default()
    };
    let created = secrets.create(&secret).await?;
    if created {
        info!(namespace = %broker_namespace, "IPsec PSK created");
    }
    Ok(created)
}

/// Name of the token secret of a cluster's broker service account
pub fn cluster_token_secret_name(cluster: &str) -> String {
    format!("cluster-{cluster}-token")
}

/// Create the long-lived token secret for `cluster-<name>` unless present
pub async fn ensure_cluster_token(
    secrets: &dyn SecretClient,
    broker_namespace: &str,
    cluster: &str,
) -> Result<bool, Error> {
    let name = cluster_token_secret_name(cluster);
    if secrets.get(broker_namespace, &name).await?.is_some() {
        return Ok(false);
    }

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(broker_namespace.to_string()),
            annotations: Some(BTreeMap::from([(
                SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(),
                format!("cluster-{cluster}"),
            )])),
            ..Default::default()
        },
        type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
        ..Default::default()
    };
    secrets.create(&secret).await
}

fn data<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.0.as_slice())
        .filter(|v| !v.is_empty())
}

/// Broker PSK as base64, `None` while the secret is missing
pub async fn read_ipsec_psk(
    secrets: &dyn SecretClient,
    broker_namespace: &str,
) -> Result<Option<String>, Error> {
    let secret = secrets.get(broker_namespace, IPSEC_PSK_SECRET).await?;
    Ok(secret
        .as_ref()
        .and_then(|s| data(s, IPSEC_PSK_KEY))
        .map(|psk| STANDARD.encode(psk)))
}

/// Token and base64 CA of a cluster's broker service account.
///
/// `None` until the token controller has populated the secret.
pub async fn read_cluster_token(
    secrets: &dyn SecretClient,
    broker_namespace: &str,
    cluster: &str,
) -> Result<Option<(String, String)>, Error> {
    let Some(secret) = secrets
        .get(broker_namespace, &cluster_token_secret_name(cluster))
        .await?
    else {
        return Ok(None);
    };

    let (Some(token), Some(ca)) = (data(&secret, TOKEN_KEY), data(&secret, CA_KEY)) else {
        debug!(cluster, "Broker token not populated yet");
        return Ok(None);
    };
    let token = String::from_utf8(token.to_vec())
        .map_err(|e| Error::validation_for_field(secret.name_any(), TOKEN_KEY, e.to_string()))?;
    Ok(Some((token, STANDARD.encode(ca))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_with(entries: &[(&str, &[u8])]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("s".to_string()),
                namespace: Some("set1-broker".to_string()),
                ..Default::default()
            },
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn existing_psk_is_never_overwritten() {
        let mut secrets = MockSecretClient::new();
        secrets
            .expect_get()
            .returning(|_, _| Ok(Some(secret_with(&[(IPSEC_PSK_KEY, b"old")]))));
        secrets.expect_create().never();

        assert!(!ensure_ipsec_psk(&secrets, "set1-broker").await.unwrap());
    }

    #[tokio::test]
    async fn missing_psk_is_generated() {
        let mut secrets = MockSecretClient::new();
        secrets.expect_get().returning(|_, _| Ok(None));
        secrets
            .expect_create()
            .withf(|s| {
                s.name_any() == IPSEC_PSK_SECRET
                    && s.namespace().as_deref() == Some("set1-broker")
                    && s.data.as_ref().unwrap()[IPSEC_PSK_KEY].0.len() == IPSEC_PSK_LEN
            })
            .times(1)
            .returning(|_| Ok(true));

        assert!(ensure_ipsec_psk(&secrets, "set1-broker").await.unwrap());
    }

    #[tokio::test]
    async fn psk_is_returned_base64() {
        let mut secrets = MockSecretClient::new();
        secrets
            .expect_get()
            .returning(|_, _| Ok(Some(secret_with(&[(IPSEC_PSK_KEY, b"psk")]))));

        assert_eq!(
            read_ipsec_psk(&secrets, "set1-broker").await.unwrap(),
            Some("cHNr".to_string())
        );
    }

    #[tokio::test]
    async fn unpopulated_token_is_none() {
        let mut secrets = MockSecretClient::new();
        secrets
            .expect_get()
            .withf(|ns, name| ns == "set1-broker" && name == "cluster-cluster1-token")
            .returning(|_, _| Ok(Some(secret_with(&[]))));

        assert!(read_cluster_token(&secrets, "set1-broker", "cluster1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn token_and_ca_are_read() {
        let mut secrets = MockSecretClient::new();
        secrets.expect_get().returning(|_, _| {
            Ok(Some(secret_with(&[(TOKEN_KEY, b"tok"), (CA_KEY, b"ca")])))
        });

        let (token, ca) = read_cluster_token(&secrets, "set1-broker", "cluster1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token, "tok");
        assert_eq!(ca, "Y2E=");
    }

    #[tokio::test]
    async fn token_secret_is_annotated_for_its_service_account() {
        let mut secrets = MockSecretClient::new();
        secrets.expect_get().returning(|_, _| Ok(None));
        secrets
            .expect_create()
            .withf(|s| {
                s.type_.as_deref() == Some(SERVICE_ACCOUNT_TOKEN_TYPE)
                    && s.annotations()[SERVICE_ACCOUNT_NAME_ANNOTATION] == "cluster-cluster1"
            })
            .times(1)
            .returning(|_| Ok(true));

        assert!(ensure_cluster_token(&secrets, "set1-broker", "cluster1")
            .await
            .unwrap());
    }
}
