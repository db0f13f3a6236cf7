//! # VaultServer Topology
//!
//! Kubernetes objects making up a Vault server:
//!
//! - TLS Secret `<name>-vault-tls` (self-signed CA + server certificate) unless `spec.tls` is set
//! - ConfigMap `<name>-vault-config` with the rendered Vault HCL
//! - ServiceAccount, Service and Deployment `<name>`
//! - ConfigMap `<name>-connection` with the address and CA bundle for clients
//!
//! Every object carries a controller owner reference to the VaultServer, so the
//! API server garbage-collects them when it is deleted.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    PodSpec, PodTemplateSpec, Secret, SecretVolumeSource, Service, ServiceAccount, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, Issuer,
    KeyPair, KeyUsagePurpose, SanType,
};
use tracing::{debug, info};

use crate::backend::{BackendError, ServerTopology};
use crate::constants::FIELD_MANAGER;
use crate::crd::VaultServer;
use crate::store::decode_secret;

const CONFIG_KEY: &str = "vault.hcl";
const CONFIG_MOUNT: &str = "/etc/vault/config";
const TLS_MOUNT: &str = "/etc/vault/tls";
const CLUSTER_PORT: i32 = 8201;

/// TLS material of a VaultServer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    /// Secret holding `tls.crt` and `tls.key`
    pub secret_name: String,
    /// PEM encoded CA certificate, when known
    pub ca_pem: Option<String>,
}

/// Kubernetes implementation of [`ServerTopology`]
#[derive(Clone)]
pub struct KubeServerTopology {
    client: Client,
}

impl std::fmt::Debug for KubeServerTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeServerTopology").finish_non_exhaustive()
    }
}

impl KubeServerTopology {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<T>(&self, namespace: &str) -> Api<T>
    where
        T: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn apply<T>(&self, namespace: &str, obj: &T) -> Result<(), BackendError>
    where
        T: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + std::fmt::Debug
            + serde::Serialize
            + serde::de::DeserializeOwned,
    {
        let name = obj.meta().name.clone().unwrap_or_default();
        self.api::<T>(namespace)
            .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(obj))
            .await?;
        debug!("Applied {} {namespace}/{name}", T::kind(&()));
        Ok(())
    }
}

/// Name of the generated TLS Secret
pub fn tls_secret_name(server: &VaultServer) -> String {
    server
        .spec
        .tls
        .as_ref()
        .map_or_else(|| format!("{}-vault-tls", server.name_any()), |tls| tls.secret_name.clone())
}

/// In-cluster address of the server
pub fn server_address(server: &VaultServer) -> String {
    format!(
        "https://{}.{}.svc:{}",
        server.name_any(),
        server.namespace().unwrap_or_default(),
        server.spec.port
    )
}

fn labels(server: &VaultServer) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "vault".to_string()),
        ("app.kubernetes.io/instance".to_string(), server.name_any()),
        ("app.kubernetes.io/managed-by".to_string(), FIELD_MANAGER.to_string()),
    ])
}

fn child_meta(server: &VaultServer, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: server.namespace(),
        labels: Some(labels(server)),
        owner_references: server.controller_owner_ref(&()).map(|oref| vec![oref]),
        ..ObjectMeta::default()
    }
}

/// Render the Vault HCL configuration of a server
pub fn render_vault_config(server: &VaultServer) -> String {
    let port = server.spec.port;
    let mut config = format!(
        "listener \"tcp\" {{\n  address = \"0.0.0.0:{port}\"\n  cluster_address = \"0.0.0.0:{CLUSTER_PORT}\"\n  tls_cert_file = \"{TLS_MOUNT}/tls.crt\"\n  tls_key_file = \"{TLS_MOUNT}/tls.key\"\n}}\n\n"
    );
    config.push_str(&server.spec.storage.to_hcl());
    config.push('\n');
    config.push_str(&format!("api_addr = \"{}\"\n", server_address(server)));
    config.push_str(&format!(
        "cluster_addr = \"https://{}.{}.svc:{CLUSTER_PORT}\"\n",
        server.name_any(),
        server.namespace().unwrap_or_default()
    ));
    config.push_str("disable_mlock = true\n");
    config
}

/// Generate a self-signed CA and a server certificate valid for the Service DNS names
///
/// Returns `(ca.crt, tls.crt, tls.key)` as PEM.
pub fn generate_tls(server: &VaultServer) -> Result<(String, String, String), BackendError> {
    let name = server.name_any();
    let namespace = server.namespace().unwrap_or_default();

    let mut ca_params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(format!("{name}-vault-ca")));
    ca_params.distinguished_name = dn;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let ca_key = KeyPair::generate()?;
    let ca_cert = ca_params.self_signed(&ca_key)?;
    let ca_pem = ca_cert.pem();
    let issuer = Issuer::new(ca_params, ca_key);

    let sans = [
        name.clone(),
        format!("{name}.{namespace}"),
        format!("{name}.{namespace}.svc"),
        "localhost".to_string(),
    ];
    let mut server_params = CertificateParams::new(sans.to_vec())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(format!("{name}.{namespace}.svc")));
    server_params.distinguished_name = dn;
    server_params.is_ca = IsCa::NoCa;
    server_params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    server_params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];
    server_params
        .subject_alt_names
        .push(SanType::IpAddress(std::net::IpAddr::from([127, 0, 0, 1])));

    let server_key = KeyPair::generate()?;
    let server_cert = server_params.signed_by(&server_key, &issuer)?;

    Ok((ca_pem, server_cert.pem(), server_key.serialize_pem()))
}

fn deployment(server: &VaultServer, tls: &str) -> Deployment {
    let name = server.name_any();
    let spec = &server.spec;

    let mut volumes = vec![
        Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: format!("{name}-vault-config"),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        },
        Volume {
            name: "tls".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(tls.to_string()),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        },
    ];
    let mut volume_mounts = vec![
        VolumeMount {
            name: "config".to_string(),
            mount_path: CONFIG_MOUNT.to_string(),
            ..VolumeMount::default()
        },
        VolumeMount {
            name: "tls".to_string(),
            mount_path: TLS_MOUNT.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        },
    ];
    if let Some(path) = spec.storage.data_path() {
        volumes.push(Volume {
            name: "data".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Volume::default()
        });
        volume_mounts.push(VolumeMount {
            name: "data".to_string(),
            mount_path: path.to_string(),
            ..VolumeMount::default()
        });
    }

    Deployment {
        metadata: child_meta(server, name.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels(server)),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(server)),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(name),
                    containers: vec![Container {
                        name: "vault".to_string(),
                        image: Some(spec.image.clone()),
                        args: Some(vec![
                            "server".to_string(),
                            format!("-config={CONFIG_MOUNT}/{CONFIG_KEY}"),
                        ]),
                        env: Some(vec![EnvVar {
                            name: "SKIP_SETCAP".to_string(),
                            value: Some("true".to_string()),
                            ..EnvVar::default()
                        }]),
                        ports: Some(vec![
                            ContainerPort {
                                name: Some("api".to_string()),
                                container_port: spec.port,
                                ..ContainerPort::default()
                            },
                            ContainerPort {
                                name: Some("cluster".to_string()),
                                container_port: CLUSTER_PORT,
                                ..ContainerPort::default()
                            },
                        ]),
                        volume_mounts: Some(volume_mounts),
                        ..Container::default()
                    }],
                    volumes: Some(volumes),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

#[async_trait]
impl ServerTopology for KubeServerTopology {
    async fn ensure_tls(&self, server: &VaultServer) -> Result<TlsMaterial, BackendError> {
        let namespace = server.namespace().unwrap_or_default();
        let secret_name = tls_secret_name(server);
        let secrets = self.api::<Secret>(&namespace);

        if let Some(existing) = secrets.get_opt(&secret_name).await? {
            let data = decode_secret(&existing);
            return Ok(TlsMaterial {
                secret_name,
                ca_pem: data.get("ca.crt").cloned(),
            });
        }

        if server.spec.tls.is_some() {
            return Err(BackendError::Config(format!(
                "TLS secret {namespace}/{secret_name} not found"
            )));
        }

        let (ca_pem, cert_pem, key_pem) = generate_tls(server)?;
        let secret = Secret {
            metadata: child_meta(server, secret_name.clone()),
            type_: Some("kubernetes.io/tls".to_string()),
            string_data: Some(BTreeMap::from([
                ("ca.crt".to_string(), ca_pem.clone()),
                ("tls.crt".to_string(), cert_pem),
                ("tls.key".to_string(), key_pem),
            ])),
            ..Secret::default()
        };

        match secrets.create(&PostParams::default(), &secret).await {
            Ok(_) => {
                info!("Created TLS secret {namespace}/{secret_name}");
                Ok(TlsMaterial {
                    secret_name,
                    ca_pem: Some(ca_pem),
                })
            }
            // Lost a race with another writer: use what is stored
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                let stored = secrets.get(&secret_name).await?;
                Ok(TlsMaterial {
                    ca_pem: decode_secret(&stored).get("ca.crt").cloned(),
                    secret_name,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_config(&self, server: &VaultServer) -> Result<(), BackendError> {
        let namespace = server.namespace().unwrap_or_default();
        let config_map = ConfigMap {
            metadata: child_meta(server, format!("{}-vault-config", server.name_any())),
            data: Some(BTreeMap::from([(
                CONFIG_KEY.to_string(),
                render_vault_config(server),
            )])),
            ..ConfigMap::default()
        };
        self.apply(&namespace, &config_map).await
    }

    async fn ensure_deployed(&self, server: &VaultServer) -> Result<(), BackendError> {
        let namespace = server.namespace().unwrap_or_default();
        let name = server.name_any();

        let service_account = ServiceAccount {
            metadata: child_meta(server, name.clone()),
            ..ServiceAccount::default()
        };
        self.apply(&namespace, &service_account).await?;

        let service = Service {
            metadata: child_meta(server, name),
            spec: Some(ServiceSpec {
                type_: Some(server.spec.service_type.clone()),
                selector: Some(labels(server)),
                ports: Some(vec![
                    ServicePort {
                        name: Some("api".to_string()),
                        port: server.spec.port,
                        target_port: Some(IntOrString::Int(server.spec.port)),
                        ..ServicePort::default()
                    },
                    ServicePort {
                        name: Some("cluster".to_string()),
                        port: CLUSTER_PORT,
                        target_port: Some(IntOrString::Int(CLUSTER_PORT)),
                        ..ServicePort::default()
                    },
                ]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        };
        self.apply(&namespace, &service).await?;

        self.apply(&namespace, &deployment(server, &tls_secret_name(server)))
            .await
    }

    async fn ensure_binding(
        &self,
        server: &VaultServer,
        tls: &TlsMaterial,
    ) -> Result<(), BackendError> {
        let namespace = server.namespace().unwrap_or_default();
        let mut data = BTreeMap::from([("address".to_string(), server_address(server))]);
        if let Some(ca) = &tls.ca_pem {
            data.insert("ca.crt".to_string(), ca.clone());
        }

        let binding = ConfigMap {
            metadata: child_meta(server, format!("{}-connection", server.name_any())),
            data: Some(data),
            ..ConfigMap::default()
        };
        self.apply(&namespace, &binding).await
    }
}
