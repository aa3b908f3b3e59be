use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the kubeconfig store and the context registry.
#[derive(Debug, Error)]
pub enum Error {
    #[error("load kubeconfig '{}'", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("save kubeconfig '{}'", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("context '{0}' does not exist")]
    NotFound(String),

    /// The current context is unset, or names a context that is gone.
    #[error("{}", no_current_message(.0))]
    NoCurrentContext(Option<String>),

    #[error("selection canceled")]
    SelectionCancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn no_current_message(dangling: &Option<String>) -> String {
    match dangling {
        Some(name) => format!("current context '{name}' does not exist in kubeconfig"),
        None => String::from("no current context set"),
    }
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::SelectionCancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_current_message() {
        assert_eq!(
            Error::NoCurrentContext(None).to_string(),
            "no current context set"
        );
        assert_eq!(
            Error::NoCurrentContext(Some(String::from("gone"))).to_string(),
            "current context 'gone' does not exist in kubeconfig"
        );
    }

    #[test]
    fn test_load_keeps_source() {
        let err = Error::Load {
            path: PathBuf::from("/tmp/config"),
            source: anyhow::anyhow!("read kubeconfig file"),
        };
        assert_eq!(err.to_string(), "load kubeconfig '/tmp/config'");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("read kubeconfig file"));
    }
}
