use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Namespace as ApiCoreV1Namespace;
use kube::api::ListParams;
use kube::config::Config as ApiConfig;
use kube::config::KubeConfigOptions as ApiConfigOptions;
use kube::config::Kubeconfig as ApiKubeconfig;
use kube::Api;
use kube::Client as KubeClient;

use crate::kubeconfig::Kubeconfig;

/// Lists namespaces from the cluster behind a context.
pub trait NamespaceLister {
    /// `path` is where `cfg` was loaded from. Relative file references in the
    /// document are relative to its directory.
    fn list_namespaces(&self, cfg: &Kubeconfig, path: &Path, context: &str)
        -> Result<Vec<String>>;
}

/// Talks to the cluster with the kube client, bounded by a timeout.
pub struct ClusterClient {
    timeout: Duration,
}

impl ClusterClient {
    pub fn new(timeout: Duration) -> ClusterClient {
        ClusterClient { timeout }
    }

    fn api_kubeconfig(cfg: &Kubeconfig, path: &Path) -> Result<ApiKubeconfig> {
        let yaml = cfg.to_yaml()?;
        let mut kubeconfig =
            ApiKubeconfig::from_yaml(&yaml).context("read kubeconfig for client")?;
        if let Some(dir) = path.parent() {
            resolve_file_paths(&mut kubeconfig, dir);
        }
        Ok(kubeconfig)
    }

    async fn list(cfg: &Kubeconfig, path: &Path, context: &str) -> Result<Vec<String>> {
        let kubeconfig = Self::api_kubeconfig(cfg, path)?;
        let kubeconfig_opts = ApiConfigOptions {
            context: Some(context.to_string()),
            ..Default::default()
        };
        let kubeconfig = ApiConfig::from_custom_kubeconfig(kubeconfig, &kubeconfig_opts)
            .await
            .context("build kube api config")?;

        let client = KubeClient::try_from(kubeconfig).context("build kube client")?;

        let ns_api: Api<ApiCoreV1Namespace> = Api::all(client);
        let namespaces = ns_api
            .list(&ListParams::default())
            .await
            .context("list kube namespace")?;

        Ok(namespaces
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }
}

impl NamespaceLister for ClusterClient {
    fn list_namespaces(
        &self,
        cfg: &Kubeconfig,
        path: &Path,
        context: &str,
    ) -> Result<Vec<String>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build tokio runtime")?;

        runtime.block_on(async {
            tokio::time::timeout(self.timeout, Self::list(cfg, path, context))
                .await
                .with_context(|| format!("list namespaces timed out after {:?}", self.timeout))?
        })
    }
}

/// Make certificate, key and token file references absolute against `dir`,
/// the same way the client does when it reads a kubeconfig from disk.
fn resolve_file_paths(kubeconfig: &mut ApiKubeconfig, dir: &Path) {
    for named in kubeconfig.clusters.iter_mut() {
        if let Some(cluster) = named.cluster.as_mut() {
            absolute(&mut cluster.certificate_authority, dir);
        }
    }
    for named in kubeconfig.auth_infos.iter_mut() {
        if let Some(auth_info) = named.auth_info.as_mut() {
            absolute(&mut auth_info.client_certificate, dir);
            absolute(&mut auth_info.client_key, dir);
            absolute(&mut auth_info.token_file, dir);
        }
    }
}

fn absolute(file: &mut Option<String>, dir: &Path) {
    let abs = match file.as_deref() {
        Some(path) if !path.is_empty() && Path::new(path).is_relative() => {
            dir.join(path).to_str().map(str::to_owned)
        }
        _ => None,
    };
    if let Some(abs) = abs {
        *file = Some(abs);
    }
}
