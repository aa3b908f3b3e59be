use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rev_lines::RevLines;

/// Append-only record of `<time> <context> <namespace>` lines, read newest
/// first.
///
/// Fields are separated by single spaces, so an entry whose context or
/// namespace name contains a space is written but skipped when reading.
pub struct History {
    path: PathBuf,
}

/// Iterates history entries from the most recent one.
pub struct HistoryIter {
    rev_file: Option<RevLines<fs::File>>,
}

impl History {
    pub fn new<P: Into<PathBuf>>(path: P) -> History {
        History { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn iter(&self) -> Result<HistoryIter> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(HistoryIter { rev_file: None })
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("open history file '{}' for reading", self.path.display())
                })
            }
        };
        Ok(HistoryIter {
            rev_file: Some(RevLines::new(file)),
        })
    }

    pub fn write(&self, context: &str, namespace: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("create dir '{}'", dir.display()))?;
            }
        }

        let mut opts = fs::OpenOptions::new();
        opts.create(true).append(true);

        let mut file = opts.open(&self.path).with_context(|| {
            format!("open history file '{}' for writing", self.path.display())
        })?;

        let now = Self::now()?;
        let line = format!("{now} {context} {namespace}\n");

        file.write_all(line.as_bytes())
            .context("write content to history file")?;
        file.flush().context("flush history file")?;

        Ok(())
    }

    /// The most recent context other than `current`.
    pub fn previous_context(&self, current: &str) -> Result<Option<String>> {
        for item in self.iter()? {
            let (name, _) = item?;
            if name != current {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    /// The most recent namespace of `context` other than `current`.
    pub fn previous_namespace(&self, context: &str, current: &str) -> Result<Option<String>> {
        for item in self.iter()? {
            let (name, namespace) = item?;
            if name != context || namespace == current {
                continue;
            }
            return Ok(Some(namespace));
        }
        Ok(None)
    }

    fn now() -> Result<u64> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system time is before unix epoch")?
            .as_secs();
        Ok(timestamp)
    }
}

impl Iterator for HistoryIter {
    type Item = Result<(String, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        let rev_file = self.rev_file.as_mut()?;
        loop {
            let line = match rev_file.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err).context("read history file")),
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<_> = line.split(' ').collect();
            // Ignore the leading timestamp.
            let (name, namespace) = match fields.as_slice() {
                [_, name, namespace] => (*name, *namespace),
                _ => continue,
            };
            if name.is_empty() || namespace.is_empty() {
                continue;
            }

            return Some(Ok((name.to_string(), namespace.to_string())));
        }
    }
}
