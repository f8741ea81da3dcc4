//! Dynamic Kubernetes client
//!
//! All cluster traffic goes through [`DynamicClient`]: an untyped
//! `Api<DynamicObject>` resolved per kind via discovery, built fresh for
//! every operation from the resource's `cluster_connection`. Nothing here
//! survives across invocations.

use base64::Engine as _;
use futures::Stream;
use kube::{
    Client, Config,
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, WatchEvent, WatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::GroupVersionKind,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use rudder_core::{ClusterConnection, CoreError, GvkRef};
use serde_json::{Value, json};

use crate::error::{KubeError, Result};

/// Field manager identity for Server-Side Apply.
///
/// Fixed and distinct from kubectl and the common controllers; every apply
/// and ownership computation keys on this name (tests may pass their own).
pub const FIELD_MANAGER: &str = "rudder";

/// Untyped client plus discovery for one invocation.
pub struct DynamicClient {
    client: Client,
    discovery: Discovery,
}

impl DynamicClient {
    /// Resolve a connection into a ready client, running discovery once.
    pub async fn connect(connection: &ClusterConnection) -> Result<Self> {
        connection.validate()?;
        let config = client_config(connection).await?;
        let client = Client::try_from(config).map_err(KubeError::Api)?;
        Self::from_client(client).await
    }

    /// Wrap an existing client, running discovery once.
    pub async fn from_client(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .map_err(KubeError::Api)?;
        Ok(Self { client, discovery })
    }

    /// Resolve a manifest GVK to its API resource and capabilities.
    pub fn resolve_gvk(&self, gvk: &GvkRef) -> Result<(ApiResource, ApiCapabilities)> {
        let kube_gvk = GroupVersionKind {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
        };
        self.discovery
            .resolve_gvk(&kube_gvk)
            .ok_or_else(|| KubeError::UnknownResourceType {
                gvk: gvk.to_string(),
            })
    }

    /// Whether objects of this kind are namespaced.
    pub fn is_namespaced(&self, gvk: &GvkRef) -> Result<bool> {
        let (_, capabilities) = self.resolve_gvk(gvk)?;
        Ok(capabilities.scope == Scope::Namespaced)
    }

    fn api_for(&self, gvk: &GvkRef, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let (api_resource, capabilities) = self.resolve_gvk(gvk)?;
        Ok(if capabilities.scope == Scope::Namespaced {
            let ns = namespace.unwrap_or("default");
            Api::namespaced_with(self.client.clone(), ns, &api_resource)
        } else {
            Api::all_with(self.client.clone(), &api_resource)
        })
    }

    /// Fetch an object, mapping 404 to `None`.
    pub async fn get(
        &self,
        gvk: &GvkRef,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let api = self.api_for(gvk, namespace)?;
        api.get_opt(name).await.map_err(KubeError::Api)
    }

    /// Server-Side Apply of the full manifest body under `field_manager`.
    pub async fn apply(
        &self,
        gvk: &GvkRef,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
        field_manager: &str,
        force: bool,
    ) -> Result<DynamicObject> {
        let api = self.api_for(gvk, namespace)?;
        let mut params = PatchParams::apply(field_manager);
        params.force = force;
        api.patch(name, &params, &Patch::Apply(body))
            .await
            .map_err(KubeError::Api)
    }

    /// Delete an object; an already-gone object is success.
    pub async fn delete(&self, gvk: &GvkRef, namespace: Option<&str>, name: &str) -> Result<()> {
        let api = self.api_for(gvk, namespace)?;
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    /// Clear `metadata.finalizers` so a stuck delete can complete.
    pub async fn strip_finalizers(
        &self,
        gvk: &GvkRef,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let api = self.api_for(gvk, namespace)?;
        let patch = json!({"metadata": {"finalizers": []}});
        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    /// Open a watch scoped to one object by name, starting at
    /// `resource_version` so no interleaved event is missed or replayed.
    pub async fn watch_one(
        &self,
        gvk: &GvkRef,
        namespace: Option<&str>,
        name: &str,
        resource_version: &str,
    ) -> Result<impl Stream<Item = kube::Result<WatchEvent<DynamicObject>>>> {
        let api = self.api_for(gvk, namespace)?;
        let params = WatchParams::default().fields(&format!("metadata.name={}", name));
        api.watch(&params, resource_version)
            .await
            .map_err(KubeError::Api)
    }
}

/// Build a `kube::Config` from the connection variants.
async fn client_config(connection: &ClusterConnection) -> Result<Config> {
    let kubeconfig = if let Some(raw) = &connection.kubeconfig {
        Kubeconfig::from_yaml(raw).map_err(|e| connection_error(e.to_string()))?
    } else if let Some(path) = &connection.kubeconfig_path {
        Kubeconfig::read_from(path).map_err(|e| connection_error(e.to_string()))?
    } else {
        let yaml = synthesize_kubeconfig(connection)?;
        Kubeconfig::from_yaml(&yaml).map_err(|e| connection_error(e.to_string()))?
    };

    let options = KubeConfigOptions {
        context: connection.context.clone(),
        ..Default::default()
    };
    Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| connection_error(e.to_string()))
}

/// Render host/CA/token/cert attributes as a kubeconfig document, so every
/// connection style flows through the same loader.
fn synthesize_kubeconfig(connection: &ClusterConnection) -> Result<String> {
    let host = connection
        .host
        .as_deref()
        .ok_or_else(|| connection_error("host is required".to_string()))?;

    let mut cluster = json!({"server": host});
    if let Some(ca) = &connection.cluster_ca_certificate {
        cluster["certificate-authority-data"] = json!(encode_cert_data(ca));
    }
    if connection.insecure {
        cluster["insecure-skip-tls-verify"] = json!(true);
    }

    let mut user = json!({});
    if let Some(token) = &connection.token {
        user["token"] = json!(token);
    }
    if let (Some(cert), Some(key)) = (&connection.client_certificate, &connection.client_key) {
        user["client-certificate-data"] = json!(encode_cert_data(cert));
        user["client-key-data"] = json!(encode_cert_data(key));
    }

    let kubeconfig = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{"name": "rudder", "cluster": cluster}],
        "users": [{"name": "rudder", "user": user}],
        "contexts": [{"name": "rudder", "context": {"cluster": "rudder", "user": "rudder"}}],
        "current-context": "rudder",
    });
    serde_yaml::to_string(&kubeconfig).map_err(|e| KubeError::Serialization(e.to_string()))
}

/// Kubeconfig `*-data` fields carry base64. PEM input is encoded; anything
/// else is assumed to be encoded already and passed through.
fn encode_cert_data(value: &str) -> String {
    if value.contains("-----BEGIN") {
        base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
    } else {
        value.to_string()
    }
}

fn connection_error(message: String) -> KubeError {
    KubeError::Core(CoreError::InvalidConnection { message })
}
