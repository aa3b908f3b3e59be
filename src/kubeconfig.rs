use std::collections::{BTreeMap, HashSet};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use tempfile::NamedTempFile;

use crate::errors::{self, Error};

/// The kubeconfig document as it is laid out on disk.
///
/// Cluster and user payloads are opaque to this tool and kept verbatim.
/// Unknown top-level keys and unknown keys inside a context payload are
/// carried through `extra`, so a load followed by a save does not drop data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Value>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub clusters: Vec<NamedCluster>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<NamedUser>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub contexts: Vec<NamedContext>,

    #[serde(rename = "current-context", default, deserialize_with = "null_as_empty")]
    pub current_context: String,

    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub context: KubeContext,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KubeContext {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub cluster: String,

    /// Name of the auth-info entry, stored under `users`.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub user: String,

    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "String::is_empty"
    )]
    pub namespace: String,

    #[serde(flatten)]
    pub extra: Mapping,
}

fn null_as_empty<'de, D, T>(de: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

impl KubeContext {
    /// The namespace with the empty value read as `default`.
    pub fn namespace_or_default(&self) -> &str {
        if self.namespace.is_empty() {
            Kubeconfig::DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }
}

impl Kubeconfig {
    pub const DEFAULT_NAMESPACE: &'static str = "default";

    pub fn parse(data: &[u8]) -> Result<Kubeconfig> {
        let cfg: Kubeconfig = serde_yaml::from_slice(data).context("parse kubeconfig yaml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("encode kubeconfig yaml")
    }

    fn validate(&self) -> Result<()> {
        ensure_unique("clusters", self.clusters.iter().map(|c| c.name.as_str()))?;
        ensure_unique("users", self.users.iter().map(|u| u.name.as_str()))?;
        ensure_unique("contexts", self.contexts.iter().map(|c| c.name.as_str()))?;
        Ok(())
    }

    pub fn context(&self, name: &str) -> Option<&KubeContext> {
        self.contexts
            .iter()
            .find(|ctx| ctx.name == name)
            .map(|ctx| &ctx.context)
    }

    pub fn context_mut(&mut self, name: &str) -> Option<&mut KubeContext> {
        self.contexts
            .iter_mut()
            .find(|ctx| ctx.name == name)
            .map(|ctx| &mut ctx.context)
    }

    pub fn context_map(&self) -> BTreeMap<String, KubeContext> {
        self.contexts
            .iter()
            .map(|ctx| (ctx.name.clone(), ctx.context.clone()))
            .collect()
    }

    #[cfg(test)]
    pub fn context_names(&self) -> Vec<&str> {
        self.contexts.iter().map(|ctx| ctx.name.as_str()).collect()
    }

    #[cfg(test)]
    pub fn has_cluster(&self, name: &str) -> bool {
        self.clusters.iter().any(|c| c.name == name)
    }

    #[cfg(test)]
    pub fn has_user(&self, name: &str) -> bool {
        self.users.iter().any(|u| u.name == name)
    }

    fn cluster_referenced(&self, name: &str) -> bool {
        !name.is_empty() && self.contexts.iter().any(|ctx| ctx.context.cluster == name)
    }

    fn user_referenced(&self, name: &str) -> bool {
        !name.is_empty() && self.contexts.iter().any(|ctx| ctx.context.user == name)
    }

    /// Resolve an optional context name, the empty name meaning the current
    /// context. The returned name is known to exist.
    pub fn resolve_context<'a>(&'a self, name: &'a str) -> errors::Result<&'a str> {
        if name.is_empty() {
            if self.current_context.is_empty() {
                return Err(Error::NoCurrentContext(None));
            }
            let current = self.current_context.as_str();
            if self.context(current).is_none() {
                return Err(Error::NotFound(current.to_string()));
            }
            return Ok(current);
        }
        if self.context(name).is_none() {
            return Err(Error::NotFound(name.to_string()));
        }
        Ok(name)
    }

    pub fn switch_context(&mut self, name: &str) -> errors::Result<()> {
        if self.context(name).is_none() {
            return Err(Error::NotFound(name.to_string()));
        }
        self.current_context = name.to_string();
        Ok(())
    }

    /// Remove a context, unset the current context if it pointed there, and
    /// prune its cluster and user when no remaining context references them.
    ///
    /// References are counted by scanning the remaining contexts every time.
    pub fn delete_context(&mut self, name: &str) -> errors::Result<()> {
        let idx = match self.contexts.iter().position(|ctx| ctx.name == name) {
            Some(idx) => idx,
            None => return Err(Error::NotFound(name.to_string())),
        };
        let removed = self.contexts.remove(idx).context;

        if self.current_context == name {
            self.current_context.clear();
        }

        if !removed.cluster.is_empty() && !self.cluster_referenced(&removed.cluster) {
            debug!("prune unreferenced cluster '{}'", removed.cluster);
            self.clusters.retain(|c| c.name != removed.cluster);
        }
        if !removed.user.is_empty() && !self.user_referenced(&removed.user) {
            debug!("prune unreferenced user '{}'", removed.user);
            self.users.retain(|u| u.name != removed.user);
        }

        Ok(())
    }

    pub fn current_namespace(&self) -> errors::Result<&str> {
        if self.current_context.is_empty() {
            return Err(Error::NoCurrentContext(None));
        }
        match self.context(&self.current_context) {
            Some(ctx) => Ok(ctx.namespace_or_default()),
            None => Err(Error::NoCurrentContext(Some(self.current_context.clone()))),
        }
    }

    pub fn namespace_for_context(&self, name: &str) -> errors::Result<&str> {
        match self.context(name) {
            Some(ctx) => Ok(ctx.namespace_or_default()),
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    pub fn set_namespace_for_context(&mut self, name: &str, namespace: &str) -> errors::Result<()> {
        let name = self.resolve_context(name)?.to_string();
        if let Some(ctx) = self.context_mut(&name) {
            ctx.namespace = namespace.to_string();
        }
        Ok(())
    }
}

fn ensure_unique<'a, I>(kind: &str, names: I) -> Result<()>
where
    I: Iterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            bail!("duplicate name '{name}' in {kind}");
        }
    }
    Ok(())
}

/// Reads and writes one kubeconfig file.
pub struct KubeconfigStore {
    path: PathBuf,
}

impl KubeconfigStore {
    const PATH_ENV: &'static str = "KUBECONFIG";

    pub fn new<P: Into<PathBuf>>(path: P) -> KubeconfigStore {
        KubeconfigStore { path: path.into() }
    }

    /// Store at the location given by `$KUBECONFIG`, or `~/.kube/config`.
    pub fn from_env() -> Result<KubeconfigStore> {
        let path = resolve_location()?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> errors::Result<Kubeconfig> {
        debug!("load kubeconfig from '{}'", self.path.display());
        self.read().map_err(|source| Error::Load {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, cfg: &Kubeconfig) -> errors::Result<()> {
        debug!("save kubeconfig to '{}'", self.path.display());
        self.write(cfg).map_err(|source| Error::Save {
            path: self.path.clone(),
            source,
        })
    }

    fn read(&self) -> Result<Kubeconfig> {
        let data = fs::read(&self.path).context("read kubeconfig file")?;
        Kubeconfig::parse(&data)
    }

    fn write(&self, cfg: &Kubeconfig) -> Result<()> {
        let content = cfg.to_yaml()?;

        // Replace the symlink target rather than the link itself.
        let path = match fs::canonicalize(&self.path) {
            Ok(path) => path,
            Err(err) if err.kind() == io::ErrorKind::NotFound => self.path.clone(),
            Err(err) => {
                return Err(err).with_context(|| format!("resolve path '{}'", self.path.display()))
            }
        };
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("create temp file in '{}'", dir.display()))?;
        tmp.write_all(content.as_bytes())
            .context("write kubeconfig to temp file")?;
        tmp.as_file().sync_all().context("sync temp file")?;

        if let Ok(meta) = fs::metadata(&path) {
            fs::set_permissions(tmp.path(), meta.permissions())
                .context("copy kubeconfig permissions to temp file")?;
        }

        tmp.persist(&path)
            .with_context(|| format!("replace kubeconfig file '{}'", path.display()))?;
        Ok(())
    }
}

/// `$KUBECONFIG` when set and non-empty, otherwise `~/.kube/config`.
pub fn resolve_location() -> Result<PathBuf> {
    let home = env::var_os("HOME").map(PathBuf::from);
    resolve_location_from(env::var_os(KubeconfigStore::PATH_ENV), home)
}

fn resolve_location_from(value: Option<OsString>, home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(value) = value {
        if !value.is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    match home {
        Some(home) => Ok(home.join(".kube").join("config")),
        None => bail!("$HOME env not found in your system, cannot locate kubeconfig"),
    }
}
