use std::sync::Arc;

use anyhow::Result;
use kset_core::ObjMetadata;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{ApiCapabilities, Discovery, Scope},
    Client,
};
use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{object_id, ApplyParams, ClientError, ClusterClient, DeleteParams, Propagation};

/// [`ClusterClient`] over a kube-rs [`Client`], resolving kinds through API discovery.
pub struct KubeClient {
    client: Client,
    discovery: RwLock<Option<Arc<Discovery>>>,
}

impl KubeClient {
    pub fn new(client: Client) -> Self { Self { client, discovery: RwLock::new(None) } }

    /// Client for the current kubeconfig context / in-cluster config.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    async fn run_discovery(&self) -> Result<Arc<Discovery>, ClientError> {
        let d = Discovery::new(self.client.clone()).run().await.map_err(map_kube_err)?;
        let d = Arc::new(d);
        *self.discovery.write().await = Some(d.clone());
        counter!("kube_discovery_runs", 1u64);
        Ok(d)
    }

    async fn cached_discovery(&self) -> Result<Arc<Discovery>, ClientError> {
        if let Some(d) = self.discovery.read().await.as_ref() { return Ok(d.clone()); }
        self.run_discovery().await
    }

    /// Resolve a group/kind (and optional version) to an API resource. A miss
    /// re-runs discovery once, since earlier applies may have served new kinds.
    async fn resolve(&self, group: &str, version: Option<&str>, kind: &str) -> Result<(ApiResource, ApiCapabilities), ClientError> {
        let lookup = |d: &Discovery| -> Option<(ApiResource, ApiCapabilities)> {
            match version {
                Some(v) => d.resolve_gvk(&GroupVersionKind::gvk(group, v, kind)),
                None => d.get(group).and_then(|g| g.recommended_kind(kind)),
            }
        };
        let d = self.cached_discovery().await?;
        if let Some(hit) = lookup(&d) { return Ok(hit); }
        debug!(group, kind, "kind not in cached discovery; refreshing");
        let d = self.run_discovery().await?;
        lookup(&d).ok_or_else(|| ClientError::Rejected(format!("no matches for kind {:?} in group {:?}", kind, group)))
    }

    fn api_for(&self, ar: &ApiResource, caps: &ApiCapabilities, namespace: &str) -> Result<Api<DynamicObject>, ClientError> {
        match caps.scope {
            Scope::Namespaced if namespace.is_empty() => Err(ClientError::Rejected(format!("namespace required for namespaced kind {}", ar.kind))),
            Scope::Namespaced => Ok(Api::namespaced_with(self.client.clone(), namespace, ar)),
            Scope::Cluster => Ok(Api::all_with(self.client.clone(), ar)),
        }
    }
}

fn map_kube_err(e: kube::Error) -> ClientError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => ClientError::NotFound(ae.message),
        kube::Error::Api(ae) if ae.code == 415 => ClientError::Unsupported(ae.message),
        kube::Error::Api(ae) => ClientError::Rejected(format!("{} ({} {})", ae.message, ae.code, ae.reason)),
        other => ClientError::Transport(other.to_string()),
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeClient {
    async fn get(&self, id: &ObjMetadata) -> Result<Option<DynamicObject>, ClientError> {
        let (ar, caps) = match self.resolve(&id.group, None, &id.kind).await {
            Ok(hit) => hit,
            // An unknown kind has no live objects (e.g. its CRD was already pruned)
            Err(ClientError::Rejected(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let api = self.api_for(&ar, &caps, &id.namespace)?;
        api.get_opt(&id.name).await.map_err(map_kube_err)
    }

    async fn list(&self, group: &str, kind: &str, namespace: &str, label_selector: &str) -> Result<Vec<DynamicObject>, ClientError> {
        let (ar, caps) = self.resolve(group, None, kind).await?;
        let api = self.api_for(&ar, &caps, namespace)?;
        let lp = ListParams::default().labels(label_selector);
        let list = api.list(&lp).await.map_err(map_kube_err)?;
        Ok(list.items)
    }

    async fn apply(&self, obj: &DynamicObject, params: &ApplyParams) -> Result<DynamicObject, ClientError> {
        let id = object_id(obj).map_err(|e| ClientError::Rejected(e.to_string()))?;
        let version = obj.types.as_ref().map(|t| t.api_version.rsplit('/').next().unwrap_or_default().to_string());
        let (ar, caps) = self.resolve(&id.group, version.as_deref(), &id.kind).await?;
        let api = self.api_for(&ar, &caps, &id.namespace)?;

        if params.server_side {
            let mut pp = PatchParams::apply(&params.field_manager);
            if params.force_conflicts { pp = pp.force(); }
            if params.dry_run { pp = pp.dry_run(); }
            return api.patch(&id.name, &pp, &Patch::Apply(obj)).await.map_err(map_kube_err);
        }

        // Client-side: create when absent, replace or JSON merge patch otherwise
        let post = PostParams { dry_run: params.dry_run, field_manager: Some(params.field_manager.clone()) };
        match api.get_opt(&id.name).await.map_err(map_kube_err)? {
            None => {
                info!(object = %id, "creating");
                api.create(&post, obj).await.map_err(map_kube_err)
            }
            Some(live) if params.replace => {
                let mut next = obj.clone();
                next.metadata.resource_version = live.metadata.resource_version;
                debug!(object = %id, "replacing");
                api.replace(&id.name, &post, &next).await.map_err(map_kube_err)
            }
            Some(_) => {
                let mut pp = PatchParams { field_manager: Some(params.field_manager.clone()), ..Default::default() };
                if params.dry_run { pp = pp.dry_run(); }
                api.patch(&id.name, &pp, &Patch::Merge(obj)).await.map_err(map_kube_err)
            }
        }
    }

    async fn delete(&self, id: &ObjMetadata, params: &DeleteParams) -> Result<(), ClientError> {
        let (ar, caps) = match self.resolve(&id.group, None, &id.kind).await {
            Ok(hit) => hit,
            Err(ClientError::Rejected(msg)) => return Err(ClientError::NotFound(msg)),
            Err(e) => return Err(e),
        };
        let api = self.api_for(&ar, &caps, &id.namespace)?;
        let mut dp = kube::api::DeleteParams::default();
        dp.dry_run = params.dry_run;
        dp.propagation_policy = Some(match params.propagation {
            Propagation::Orphan => kube::api::PropagationPolicy::Orphan,
            Propagation::Background => kube::api::PropagationPolicy::Background,
            Propagation::Foreground => kube::api::PropagationPolicy::Foreground,
        });
        api.delete(&id.name, &dp).await.map_err(map_kube_err)?;
        Ok(())
    }
}
