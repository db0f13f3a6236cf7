//! # Kubernetes Secret Source

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

use crate::store::{SecretSource, StoreError};

/// Reads Secrets through the Kubernetes API and decodes their data as UTF-8
#[derive(Clone)]
pub struct KubeSecretSource {
    client: Client,
}

impl std::fmt::Debug for KubeSecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretSource").finish_non_exhaustive()
    }
}

impl KubeSecretSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretSource for KubeSecretSource {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match api.get_opt(name).await {
            Ok(Some(secret)) => secret,
            Ok(None) => return Ok(None),
            Err(e) => return Err(StoreError::from_kube(e, &format!("Secret {namespace}/{name}"))),
        };

        Ok(Some(decode_secret(&secret)))
    }
}

/// Decode `data` (and `stringData`, which wins) of a Secret into strings
pub(crate) fn decode_secret(secret: &Secret) -> BTreeMap<String, String> {
    let mut decoded: BTreeMap<String, String> = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect();

    if let Some(string_data) = &secret.string_data {
        decoded.extend(string_data.clone());
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn test_decode_secret_prefers_string_data() {
        let secret = Secret {
            data: Some(BTreeMap::from([
                ("token".to_string(), ByteString(b"s.abc".to_vec())),
                ("other".to_string(), ByteString(b"old".to_vec())),
            ])),
            string_data: Some(BTreeMap::from([("other".to_string(), "new".to_string())])),
            ..Secret::default()
        };

        let decoded = decode_secret(&secret);
        assert_eq!(decoded.get("token").map(String::as_str), Some("s.abc"));
        assert_eq!(decoded.get("other").map(String::as_str), Some("new"));
    }
}
