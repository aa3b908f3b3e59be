use std::io::{self, Read, Write};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use log::debug;

use crate::errors::Error;

/// Sort names for a picker, optionally moving `current` to the top.
///
/// The input is left untouched and the result is always sorted by plain byte
/// order. A `current` that is not among `names` leaves the sorted list as is.
pub fn order<S: AsRef<str>>(names: &[S], current: &str, prioritize_current: bool) -> Vec<String> {
    if names.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<String> = names.iter().map(|s| s.as_ref().to_string()).collect();
    sorted.sort();

    if prioritize_current && !current.is_empty() {
        match sorted.iter().position(|name| name == current) {
            Some(idx) => {
                let name = sorted.remove(idx);
                sorted.insert(0, name);
            }
            None => debug!("current item '{current}' not found in selection list"),
        }
    }

    sorted
}

/// An interactive chooser over an ordered list of names.
pub trait Selector {
    /// Let the user pick one of `items`. Returns `Error::SelectionCancelled`
    /// when the user aborts.
    fn choose(&self, items: &[String], highlight: &str) -> Result<String>;
}

/// Picker backed by an external fuzzy finder reading items from stdin.
pub struct Fzf {
    cmd: String,
}

impl Fzf {
    pub fn new<S: Into<String>>(cmd: S) -> Fzf {
        Fzf { cmd: cmd.into() }
    }
}

impl Selector for Fzf {
    fn choose(&self, items: &[String], highlight: &str) -> Result<String> {
        if items.is_empty() {
            bail!("nothing to select");
        }

        let mut input = String::with_capacity(items.len());
        for item in items {
            input.push_str(item);
            input.push('\n');
        }

        let mut cmd = Command::new(&self.cmd);
        if !highlight.is_empty() {
            cmd.arg("--header").arg(format!("current: {highlight}"));
        }
        cmd.stdin(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd.stdout(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                bail!(
                    "cannot find {} in your system, please install it first",
                    self.cmd
                );
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to launch {}", self.cmd));
            }
        };

        match child.stdin.take() {
            Some(mut handle) => {
                write!(handle, "{input}").with_context(|| format!("write input to {}", self.cmd))?
            }
            None => bail!("cannot open stdin of {}", self.cmd),
        }

        let mut stdout = child.stdout.take();

        let status = child
            .wait()
            .with_context(|| format!("wait {} done", self.cmd))?;

        match status.code() {
            Some(0) => {
                let result = match stdout.as_mut() {
                    Some(stdout) => {
                        let mut out = String::new();
                        stdout
                            .read_to_string(&mut out)
                            .with_context(|| format!("read {} output", self.cmd))?;
                        out
                    }
                    None => bail!("{} did not output anything", self.cmd),
                };
                let result = result.trim();

                match items.iter().find(|s| s.as_str() == result) {
                    Some(item) => Ok(item.clone()),
                    None => bail!("cannot find item '{result}' from {} output", self.cmd),
                }
            }
            Some(1) | Some(130) => Err(Error::SelectionCancelled.into()),
            Some(2) => bail!("{} returned an error", self.cmd),
            Some(128..=254) | None => bail!("{} was terminated", self.cmd),
            _ => bail!("{} returned an unknown error", self.cmd),
        }
    }
}

/// Ask user to confirm.
pub fn confirm(msg: impl AsRef<str>) -> Result<bool> {
    eprint!("{}? [y/N] ", msg.as_ref());

    let mut answer = String::new();
    scanf::scanf!("{}", answer).context("confirm: scan terminal stdin")?;
    let answer = answer.trim().to_lowercase();

    Ok(answer == "y" || answer == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_order() {
        let cases: &[(&[&str], &str, bool, &[&str])] = &[
            (&["zebra", "alpha", "beta"], "beta", false, &["alpha", "beta", "zebra"]),
            (&["zebra", "alpha", "beta"], "beta", true, &["beta", "alpha", "zebra"]),
            (&[], "", true, &[]),
            (&["alpha", "beta", "gamma"], "delta", true, &["alpha", "beta", "gamma"]),
            (&["single"], "single", true, &["single"]),
            (
                &["alpha", "beta", "gamma", "delta"],
                "delta",
                true,
                &["delta", "alpha", "beta", "gamma"],
            ),
            (
                &["alpha", "beta", "gamma", "delta"],
                "alpha",
                true,
                &["alpha", "beta", "delta", "gamma"],
            ),
            (&["gamma", "alpha", "beta"], "", true, &["alpha", "beta", "gamma"]),
        ];

        for (names, current, prioritize, expect) in cases {
            let got = order(*names, current, *prioritize);
            assert_eq!(got, strings(expect), "order({names:?}, {current:?}, {prioritize})");
        }
    }

    #[test]
    fn test_order_byte_order() {
        let got = order(&["b", "B", "a", "_x", "A"], "", false);
        assert_eq!(got, strings(&["A", "B", "_x", "a", "b"]));
    }

    #[test]
    fn test_order_is_permutation() {
        let names = strings(&["kube-system", "default", "web", "default", "db"]);
        let mut got = order(&names, "", false);
        assert_eq!(got.len(), names.len());
        assert!(got.windows(2).all(|w| w[0] <= w[1]));

        let mut expect = names.clone();
        expect.sort();
        got.sort();
        assert_eq!(got, expect);
    }

    #[test]
    fn test_order_prioritized_rest_sorted() {
        let names = strings(&["prod", "dev", "staging", "qa"]);
        let got = order(&names, "staging", true);
        assert_eq!(got[0], "staging");
        assert_eq!(&got[1..], &strings(&["dev", "prod", "qa"])[..]);
    }

    #[test]
    fn test_order_keeps_input() {
        let names = strings(&["c", "a", "b"]);
        let before = names.clone();
        let _ = order(&names, "b", true);
        assert_eq!(names, before);
    }

    #[test]
    fn test_order_is_deterministic() {
        let names = strings(&["x", "m", "a", "q"]);
        assert_eq!(order(&names, "q", true), order(&names, "q", true));
    }

    #[test]
    fn test_fzf_missing_command() {
        let fzf = Fzf::new("kontext-no-such-picker");
        let err = fzf.choose(&strings(&["a"]), "").unwrap_err();
        assert!(err.to_string().contains("cannot find kontext-no-such-picker"));
    }
}
