use std::collections::BTreeMap;

use log::warn;

use crate::cluster::NamespaceLister;
use crate::errors::Result;
use crate::kubeconfig::{KubeContext, Kubeconfig, KubeconfigStore};

/// Namespaces offered when the cluster cannot be asked.
pub const FALLBACK_NAMESPACES: [&str; 4] =
    ["default", "kube-system", "kube-public", "kube-node-lease"];

/// Namespace listing for a context, telling live data from the offline
/// fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Namespaces {
    Live(Vec<String>),
    Fallback,
}

impl Namespaces {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Namespaces::Fallback)
    }

    pub fn names(&self) -> Vec<String> {
        match self {
            Namespaces::Live(names) => names.clone(),
            Namespaces::Fallback => FALLBACK_NAMESPACES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// User operations over one kubeconfig file.
///
/// Every call loads the file fresh and mutating calls write it back in full,
/// so a failed operation leaves the file as it was. Nothing guards against
/// another process writing the same file in between: the last writer wins.
pub struct ContextRegistry {
    store: KubeconfigStore,
}

impl ContextRegistry {
    pub fn new(store: KubeconfigStore) -> ContextRegistry {
        ContextRegistry { store }
    }

    pub fn list_contexts(&self) -> Result<BTreeMap<String, KubeContext>> {
        Ok(self.store.load()?.context_map())
    }

    pub fn current_context_name(&self) -> Result<String> {
        Ok(self.store.load()?.current_context)
    }

    pub fn switch_context(&self, name: &str) -> Result<()> {
        self.update(|cfg| cfg.switch_context(name))
    }

    pub fn delete_context(&self, name: &str) -> Result<()> {
        self.update(|cfg| cfg.delete_context(name))
    }

    pub fn current_namespace(&self) -> Result<String> {
        let cfg = self.store.load()?;
        cfg.current_namespace().map(String::from)
    }

    pub fn namespace_for_context(&self, name: &str) -> Result<String> {
        let cfg = self.store.load()?;
        cfg.namespace_for_context(name).map(String::from)
    }

    pub fn set_namespace(&self, namespace: &str) -> Result<()> {
        self.set_namespace_for_context("", namespace)
    }

    /// Set the namespace of `name`, the empty name meaning the current
    /// context. An empty namespace is stored as is and reads as `default`.
    pub fn set_namespace_for_context(&self, name: &str, namespace: &str) -> Result<()> {
        self.update(|cfg| cfg.set_namespace_for_context(name, namespace))
    }

    /// List namespaces of `context_name` (empty for the current context).
    ///
    /// Only a missing or unknown context is an error. Any failure talking to
    /// the cluster falls back to [`FALLBACK_NAMESPACES`].
    pub fn available_namespaces(
        &self,
        context_name: &str,
        lister: &dyn NamespaceLister,
    ) -> Result<Namespaces> {
        let cfg = self.store.load()?;
        let name = cfg.resolve_context(context_name)?;

        match lister.list_namespaces(&cfg, self.store.path(), name) {
            Ok(names) => Ok(Namespaces::Live(names)),
            Err(err) => {
                warn!("cannot list namespaces for context '{name}', use fallback: {err:#}");
                Ok(Namespaces::Fallback)
            }
        }
    }

    fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Kubeconfig) -> Result<()>,
    {
        let mut cfg = self.store.load()?;
        mutate(&mut cfg)?;
        self.store.save(&cfg)
    }
}
