use std::borrow::Cow;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "Config::default_cmd")]
    pub cmd: String,

    #[serde(default = "Config::default_picker")]
    pub picker: String,

    #[serde(default = "Config::default_history_file")]
    pub history_file: String,

    #[serde(default = "default_enable")]
    pub confirm_delete: bool,

    #[serde(default = "default_enable")]
    pub prioritize_current: bool,

    /// Seconds allowed for listing namespaces from a live cluster.
    #[serde(default = "Config::default_namespace_timeout")]
    pub namespace_timeout: u64,

    pub ns_alias: Option<Vec<NsAlias>>,

    #[serde(skip)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NsAlias {
    pub regex: Option<String>,

    pub names: Option<HashSet<String>>,

    pub alias: Vec<String>,

    #[serde(skip)]
    parsed_regex: Option<Regex>,
}

impl Config {
    const CONFIG_PATH_ENV: &'static str = "KONTEXT_CONFIG_PATH";

    pub fn load() -> Result<Config> {
        let path = Self::get_path().context("get config path")?;
        let mut cfg = match path.as_ref() {
            Some(path) => Self::read(path)?,
            None => Self::default(),
        };
        cfg.path = path;
        cfg.validate().context("validate config")?;
        Ok(cfg)
    }

    /// Namespaces configured for a context name, used instead of asking the
    /// cluster.
    pub fn match_ns_alias<S: AsRef<str>>(&self, name: S) -> Option<Vec<Cow<'_, str>>> {
        if let Some(alias_list) = self.ns_alias.as_ref() {
            for alias in alias_list.iter() {
                if let Some(alias) = alias.match_alias(name.as_ref()) {
                    return Some(alias);
                }
            }
        }
        None
    }

    pub fn namespace_timeout(&self) -> Duration {
        Duration::from_secs(self.namespace_timeout)
    }

    fn get_path() -> Result<Option<PathBuf>> {
        let path = match env::var_os(Self::CONFIG_PATH_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => {
                let home_dir = get_home_dir()?;
                home_dir.join(".config").join("kontext.toml")
            }
        };
        Self::check_path(path)
    }

    fn check_path(path: PathBuf) -> Result<Option<PathBuf>> {
        match fs::metadata(&path) {
            Ok(meta) => {
                if meta.is_dir() {
                    bail!(
                        "config path '{}' is a directory, require file",
                        path.display()
                    );
                }
                Ok(Some(path))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("stat config file '{}'", path.display())),
        }
    }

    fn read<P: AsRef<Path>>(path: P) -> Result<Config> {
        let data = fs::read(path).context("read config file")?;
        let config = String::from_utf8(data).context("decode config file as utf-8")?;
        toml::from_str(&config).context("parse config toml")
    }

    fn validate(&mut self) -> Result<()> {
        if self.cmd.is_empty() {
            bail!("`cmd` cannot be empty");
        }

        if self.picker.is_empty() {
            bail!("`picker` cannot be empty");
        }
        self.picker = expand_env(&self.picker).context("expand env for `picker`")?;

        if self.history_file.is_empty() {
            bail!("`history_file` cannot be empty");
        }
        self.history_file =
            expand_env(&self.history_file).context("expand env for `history_file`")?;

        if self.namespace_timeout == 0 {
            bail!("`namespace_timeout` must be greater than 0");
        }

        if let Some(ns_alias) = self.ns_alias.as_mut() {
            for (idx, alias) in ns_alias.iter_mut().enumerate() {
                alias
                    .validate()
                    .with_context(|| format!("validate ns_alias index {idx}"))?;
            }
        }

        Ok(())
    }

    pub(crate) fn default() -> Config {
        Config {
            cmd: Self::default_cmd(),
            picker: Self::default_picker(),
            history_file: Self::default_history_file(),
            confirm_delete: default_enable(),
            prioritize_current: default_enable(),
            namespace_timeout: Self::default_namespace_timeout(),
            ns_alias: None,
            path: None,
        }
    }

    fn default_cmd() -> String {
        String::from("kontext")
    }

    fn default_picker() -> String {
        String::from("fzf")
    }

    fn default_history_file() -> String {
        String::from("~/.kontext_history")
    }

    fn default_namespace_timeout() -> u64 {
        5
    }
}

impl NsAlias {
    fn match_alias<S: AsRef<str>>(&self, name: S) -> Option<Vec<Cow<'_, str>>> {
        let mut is_match = false;
        if let Some(regex) = self.parsed_regex.as_ref() {
            is_match = regex.is_match(name.as_ref());
        }
        if let Some(names) = self.names.as_ref() {
            if names.contains(name.as_ref()) {
                is_match = true;
            }
        }

        if is_match {
            Some(
                self.alias
                    .iter()
                    .map(|s| Cow::Borrowed(s.as_str()))
                    .collect(),
            )
        } else {
            None
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.alias.is_empty() {
            bail!("`ns_alias.alias` cannot be empty");
        }

        let mut has_regex = false;
        if let Some(regex) = self.regex.as_ref() {
            let regex =
                Regex::new(regex).with_context(|| format!("parse ns_alias regex '{regex}'"))?;
            self.parsed_regex = Some(regex);
            has_regex = true;
        }

        let mut has_names = false;
        if let Some(names) = self.names.as_ref() {
            has_names = !names.is_empty();
        }

        if !has_regex && !has_names {
            bail!("ns_alias must have at least regex or names");
        }

        Ok(())
    }
}

fn default_enable() -> bool {
    true
}

fn expand_env<S: AsRef<str>>(s: S) -> Result<String> {
    let s = shellexpand::full(s.as_ref())
        .with_context(|| format!("expand env for '{}'", s.as_ref()))?;
    Ok(s.to_string())
}

fn get_home_dir() -> Result<PathBuf> {
    match env::var_os("HOME") {
        Some(home) => Ok(PathBuf::from(home)),
        None => bail!(
            "$HOME env not found in your system, please make sure that you are in an UNIX system"
        ),
    }
}
