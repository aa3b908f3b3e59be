mod cluster;
mod config;
mod context;
mod errors;
mod history;
mod kubeconfig;
mod select;

use std::borrow::Cow;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use colored::Colorize;

use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::context::{ContextRegistry, Namespaces};
use crate::errors::Error;
use crate::history::History;
use crate::kubeconfig::KubeconfigStore;
use crate::select::{confirm, order, Fzf, Selector};

/// Manage kubeconfig contexts and namespaces.
#[derive(Parser, Debug)]
#[command(author, about)]
#[command(disable_version_flag = true)]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    switch: SwitchArgs,

    /// Show build info.
    #[clap(long)]
    build: bool,

    /// Show version
    #[clap(long, short = 'V')]
    version: bool,

    /// Generate completion items. PLEASE DONOT USE DIRECTLY.
    #[clap(long, hide = true)]
    comp: bool,

    /// The completion args. PLEASE DONOT USE DIRECTLY.
    #[clap(last = true, hide = true)]
    comp_args: Option<Vec<String>>,
}

#[derive(clap::Args, Debug)]
struct SwitchArgs {
    /// The context to switch to, `-` for the previous one. Omit to pick
    /// interactively.
    context: Option<String>,

    /// Also set the namespace after switching. Without a value, pick it
    /// interactively.
    #[clap(long = "set-namespace", short = 'n', num_args = 0..=1)]
    namespace: Option<Option<String>>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available contexts.
    List,

    /// Show the current context.
    Current,

    /// Switch to a context.
    Switch(SwitchArgs),

    /// View or change the namespace of the current context.
    #[command(alias = "ns")]
    Namespace {
        /// The namespace to use, `-` for the previous one. Omit to pick
        /// interactively.
        name: Option<String>,

        /// Only show the current namespace.
        #[clap(long, short)]
        show: bool,
    },

    /// Delete a context, and its cluster and user when no other context uses
    /// them.
    #[command(alias = "rm")]
    Delete {
        /// The context to delete. Omit to pick interactively.
        name: Option<String>,

        /// Skip the confirmation.
        #[clap(long, short)]
        yes: bool,
    },
}

struct App {
    cfg: Config,
    registry: ContextRegistry,
    history: History,
    selector: Box<dyn Selector>,
}

impl App {
    fn new(cfg: Config) -> Result<App> {
        let store = KubeconfigStore::from_env().context("resolve kubeconfig path")?;
        let history = History::new(&cfg.history_file);
        let selector = Box::new(Fzf::new(cfg.picker.as_str()));
        Ok(App::with_parts(cfg, store, history, selector))
    }

    fn with_parts(
        cfg: Config,
        store: KubeconfigStore,
        history: History,
        selector: Box<dyn Selector>,
    ) -> App {
        App {
            cfg,
            registry: ContextRegistry::new(store),
            history,
            selector,
        }
    }

    fn run(&self, args: &Args) -> Result<()> {
        if args.comp {
            return self.run_comp(args.comp_args.as_deref().unwrap_or_default());
        }

        match args.command.as_ref() {
            Some(Commands::List) => self.run_list(),
            Some(Commands::Current) => self.run_current(),
            Some(Commands::Switch(switch)) => self.run_switch(switch),
            Some(Commands::Namespace { name, show }) => self.run_namespace(name.as_deref(), *show),
            Some(Commands::Delete { name, yes }) => self.run_delete(name.as_deref(), *yes),
            None => self.run_switch(&args.switch),
        }
    }

    fn run_list(&self) -> Result<()> {
        let contexts = self.registry.list_contexts()?;
        let current = self.registry.current_context_name()?;

        println!("{}", "Available Kubernetes contexts:".bold());
        println!("{}", "───────────────────────────────────".dimmed());

        let names: Vec<_> = contexts.keys().collect();
        for name in order(&names, &current, false) {
            if name == current {
                println!("{} {} {}", "→".green(), name.cyan(), "(current)".green());
            } else {
                println!("  {name}");
            }
        }
        Ok(())
    }

    fn run_current(&self) -> Result<()> {
        let current = self.registry.current_context_name()?;
        if current.is_empty() {
            print_warning("No current context set");
            return Ok(());
        }
        println!(
            "{} {} {}",
            "→".green().bold(),
            "Current context:".bold(),
            current.cyan().bold()
        );
        Ok(())
    }

    fn run_switch(&self, args: &SwitchArgs) -> Result<()> {
        let current = self.registry.current_context_name()?;

        let name = match args.context.as_deref() {
            Some("-") => match self.history.previous_context(&current)? {
                Some(name) => name,
                None => bail!("no history context to switch to"),
            },
            Some(name) => name.to_string(),
            None => {
                let contexts = self.registry.list_contexts()?;
                if contexts.is_empty() {
                    bail!("no context found in kubeconfig");
                }
                let names: Vec<_> = contexts.keys().collect();
                let items = order(&names, &current, self.cfg.prioritize_current);
                self.selector.choose(&items, &current)?
            }
        };

        if name == current {
            print_warning(format!("Context '{name}' is already selected"));
        } else {
            self.registry.switch_context(&name)?;
            print_success(format!("Switched to context {}", name.cyan()));
        }

        let namespace = self
            .registry
            .namespace_for_context(&name)
            .unwrap_or_else(|_| String::from("default"));
        println!("{} Namespace: {}", "→".green().bold(), namespace.cyan());
        if name != current {
            self.write_history(&name, &namespace);
        }

        match args.namespace.as_ref() {
            Some(Some(namespace)) => self.set_namespace_checked(&name, namespace),
            Some(None) => self.run_namespace(None, false),
            None => Ok(()),
        }
    }

    fn run_namespace(&self, name: Option<&str>, show: bool) -> Result<()> {
        let context = self.registry.current_context_name()?;
        let current = self.registry.current_namespace()?;

        if show {
            println!(
                "{} {} {}",
                "→".green().bold(),
                format!("Context: {context}").bold(),
                format!("Namespace: {current}").cyan().bold()
            );
            return Ok(());
        }

        let namespace = match name {
            Some("-") => match self.history.previous_namespace(&context, &current)? {
                Some(namespace) => namespace,
                None => bail!("no history namespace for context '{context}'"),
            },
            Some(namespace) => namespace.to_string(),
            None => {
                let namespaces = self.list_namespaces(&context)?;
                let items = order(&namespaces, &current, self.cfg.prioritize_current);
                if items.is_empty() {
                    bail!("no namespace to select in context '{context}'");
                }
                self.selector.choose(&items, &current)?
            }
        };

        if namespace == current {
            print_warning(format!("Namespace '{namespace}' is already selected"));
            return Ok(());
        }

        self.registry.set_namespace(&namespace)?;
        self.write_history(&context, &namespace);
        print_success(format!(
            "Switched to namespace {} in context {}",
            namespace.cyan(),
            context.cyan()
        ));
        Ok(())
    }

    /// Set a namespace given on the command line, warning when the cluster
    /// does not know it.
    fn set_namespace_checked(&self, context: &str, namespace: &str) -> Result<()> {
        let namespaces = self.list_namespaces(context)?;
        if !namespaces.iter().any(|ns| ns == namespace) {
            print_warning(format!(
                "Namespace '{namespace}' does not exist in context '{context}'"
            ));
        }
        self.run_namespace(Some(namespace), false)
    }

    fn list_namespaces(&self, context: &str) -> Result<Vec<String>> {
        let namespaces = self.namespaces(context)?;
        if namespaces.is_fallback() {
            print_warning("Cannot reach the cluster, showing default namespaces");
        }
        Ok(namespaces.names())
    }

    fn namespaces(&self, context: &str) -> Result<Namespaces> {
        if let Some(alias) = self.cfg.match_ns_alias(context) {
            let names = alias.into_iter().map(Cow::into_owned).collect();
            return Ok(Namespaces::Live(names));
        }

        let client = ClusterClient::new(self.cfg.namespace_timeout());
        Ok(self.registry.available_namespaces(context, &client)?)
    }

    /// Print completion candidates for the word being typed. `args` holds the
    /// words after the command name, the last one being the partial word.
    fn run_comp(&self, args: &[String]) -> Result<()> {
        match self.complete(args) {
            Ok(items) => {
                for item in items {
                    println!("{item}");
                }
            }
            Err(err) => log::debug!("complete {args:?}: {err:#}"),
        }
        Ok(())
    }

    fn complete(&self, args: &[String]) -> Result<Vec<String>> {
        let words = match args.split_last() {
            Some((_, words)) => words,
            None => args,
        };

        if let Some(flag) = words.last() {
            if flag == "-n" || flag == "--set-namespace" {
                let context = words
                    .iter()
                    .find(|w| !w.starts_with('-') && w.as_str() != "switch")
                    .cloned()
                    .unwrap_or_default();
                return self.complete_namespaces(&context);
            }
        }

        let positional: Vec<_> = words
            .iter()
            .map(String::as_str)
            .filter(|w| !w.starts_with('-'))
            .collect();
        match positional.as_slice() {
            [] | ["switch"] | ["delete"] | ["rm"] => {
                let contexts = self.registry.list_contexts()?;
                let names: Vec<_> = contexts.keys().collect();
                Ok(order(&names, "", false))
            }
            ["namespace"] | ["ns"] => self.complete_namespaces(""),
            _ => Ok(Vec::new()),
        }
    }

    fn complete_namespaces(&self, context: &str) -> Result<Vec<String>> {
        let context = match context {
            "" => self.registry.current_context_name()?,
            name => name.to_string(),
        };
        if context.is_empty() {
            return Ok(Vec::new());
        }
        let namespaces = self.namespaces(&context)?;
        Ok(order(&namespaces.names(), "", false))
    }

    fn run_delete(&self, name: Option<&str>, yes: bool) -> Result<()> {
        let contexts = self.registry.list_contexts()?;
        if contexts.is_empty() {
            print_warning("No contexts found in kubeconfig");
            return Ok(());
        }
        let current = self.registry.current_context_name()?;
        let names: Vec<_> = contexts.keys().collect();

        let name = match name {
            Some(name) => {
                if !contexts.contains_key(name) {
                    print_error(format!("Context '{name}' does not exist"));
                    for item in order(&names, &current, false) {
                        let marker = if item == current { " (current)" } else { "" };
                        eprintln!("  {item}{marker}");
                    }
                    bail!("cannot delete unknown context '{name}'");
                }
                name.to_string()
            }
            None => {
                let items = order(&names, &current, self.cfg.prioritize_current);
                self.selector.choose(&items, &current)?
            }
        };

        if name == current {
            print_warning(format!(
                "You are about to delete the current context '{name}' (current context will be unset)"
            ));
        }

        if !yes && self.cfg.confirm_delete {
            let msg = format!("Delete context '{name}' from kubeconfig");
            if !confirm(msg)? {
                print_warning(format!("Context deletion canceled {}", name.cyan()));
                return Ok(());
            }
        }

        self.registry.delete_context(&name)?;
        print_success(format!("Deleted context {}", name.cyan()));
        Ok(())
    }

    fn write_history(&self, context: &str, namespace: &str) {
        if let Err(err) = self.history.write(context, namespace) {
            log::warn!(
                "write history '{}': {err:#}",
                self.history.path().display()
            );
        }
    }
}

fn print_success(msg: impl AsRef<str>) {
    println!("{} {}", "✓".green().bold(), msg.as_ref());
}

fn print_warning(msg: impl AsRef<str>) {
    eprintln!("{} {}", "!".yellow().bold(), msg.as_ref());
}

fn print_error(msg: impl AsRef<str>) {
    eprintln!("{} {}", "✗".red().bold(), msg.as_ref());
}

fn setup_logging() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("KONTEXT_LOG", "warn"))
        .format_timestamp(None)
        .init();
}

fn main() {
    setup_logging();
    if let Err(err) = run() {
        if is_cancelled(&err) {
            print_warning("Selection canceled");
            return;
        }
        print_error(format!("{err:#}"));
        std::process::exit(1);
    }
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<Error>(), Some(e) if e.is_cancelled())
}

fn run() -> Result<()> {
    let cfg = Config::load().context("load config")?;

    let matches = Args::command().name(get_cmd_name(&cfg)).get_matches();
    let args = Args::from_arg_matches(&matches)?;
    if args.version {
        show_version(&cfg);
        return Ok(());
    }

    if args.build {
        show_build_info(&cfg);
        return Ok(());
    }

    let app = App::new(cfg)?;
    app.run(&args)
}

fn get_cmd_name(cfg: &Config) -> &'static str {
    Box::leak(cfg.cmd.clone().into_boxed_str())
}

fn show_version(cfg: &Config) {
    eprintln!("{} {}", cfg.cmd, env!("BUILD_VERSION"));
}

fn show_build_info(cfg: &Config) {
    show_version(cfg);
    eprintln!(
        "rustc {}-{}-{}",
        env!("VERGEN_RUSTC_SEMVER"),
        env!("VERGEN_RUSTC_LLVM_VERSION"),
        env!("VERGEN_RUSTC_CHANNEL")
    );

    eprintln!();
    eprintln!("Build type:   {}", env!("BUILD_TYPE"));
    eprintln!("Build target: {}", env!("BUILD_TARGET"));
    eprintln!("Commit SHA:   {}", env!("BUILD_SHA"));
    eprintln!("Build time:   {}", env!("VERGEN_BUILD_TIMESTAMP"));

    eprintln!();
    let path = match cfg.path.as_ref() {
        Some(path) => Cow::Owned(format!("{}", path.display())),
        None => Cow::Borrowed("N/A"),
    };
    eprintln!("Config path: {path}");

    let kube_path = match KubeconfigStore::from_env() {
        Ok(store) => store.path().to_path_buf(),
        Err(_) => PathBuf::from("N/A"),
    };
    eprintln!("Kubeconfig:  {}", kube_path.display());
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;

    use tempfile::TempDir;

    use super::*;
    use crate::config::NsAlias;
    use crate::kubeconfig::tests::write_sample;

    type Seen = Rc<RefCell<Vec<Vec<String>>>>;

    /// Picks a fixed item, or cancels when there is none.
    struct FakeSelector {
        pick: Option<String>,
        seen: Seen,
    }

    impl Selector for FakeSelector {
        fn choose(&self, items: &[String], _highlight: &str) -> Result<String> {
            self.seen.borrow_mut().push(items.to_vec());
            match self.pick.as_ref() {
                Some(pick) => Ok(pick.clone()),
                None => Err(Error::SelectionCancelled.into()),
            }
        }
    }

    struct Fixture {
        dir: TempDir,
        path: PathBuf,
        app: App,
        seen: Seen,
    }

    impl Fixture {
        fn new(pick: Option<&str>, prioritize_current: bool) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let path = write_sample(dir.path());

            let alias: NsAlias =
                toml::from_str("names = ['alpha', 'beta']\nalias = ['web', 'db']").unwrap();
            let mut cfg = Config::default();
            cfg.history_file = format!("{}", dir.path().join("history").display());
            cfg.prioritize_current = prioritize_current;
            cfg.ns_alias = Some(vec![alias]);

            let seen = Seen::default();
            let selector = FakeSelector {
                pick: pick.map(String::from),
                seen: Rc::clone(&seen),
            };
            let app = App::with_parts(
                cfg,
                KubeconfigStore::new(&path),
                History::new(dir.path().join("history")),
                Box::new(selector),
            );
            Fixture {
                dir,
                path,
                app,
                seen,
            }
        }

        fn bytes(&self) -> Vec<u8> {
            fs::read(&self.path).unwrap()
        }

        fn current(&self) -> String {
            self.app.registry.current_context_name().unwrap()
        }
    }

    fn switch(context: Option<&str>) -> SwitchArgs {
        SwitchArgs {
            context: context.map(String::from),
            namespace: None,
        }
    }

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_args() {
        Args::command().debug_assert();

        let args = Args::try_parse_from(["kontext", "prod", "-n"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.switch.context.as_deref(), Some("prod"));
        assert_eq!(args.switch.namespace, Some(None));

        let args = Args::try_parse_from(["kontext", "-n", "web"]).unwrap();
        assert_eq!(args.switch.context, None);
        assert_eq!(args.switch.namespace, Some(Some(String::from("web"))));

        let args = Args::try_parse_from(["kontext", "ns", "-s"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Commands::Namespace { name: None, show: true })
        ));

        let args = Args::try_parse_from(["kontext", "rm", "old", "-y"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Commands::Delete { name: Some(ref n), yes: true }) if n == "old"
        ));

        let args = Args::try_parse_from(["kontext", "-"]).unwrap();
        assert_eq!(args.switch.context.as_deref(), Some("-"));

        let args = Args::try_parse_from(["kontext", "--comp", "--", "ns", ""]).unwrap();
        assert!(args.comp);
        assert!(args.command.is_none());
        assert_eq!(args.switch.context, None);
        assert_eq!(args.comp_args, Some(words(&["ns", ""])));
    }

    #[test]
    fn test_switch_to_current_keeps_file() {
        let fx = Fixture::new(None, true);
        let before = fx.bytes();

        fx.app.run_switch(&switch(Some("alpha"))).unwrap();
        assert_eq!(fx.bytes(), before);
        assert!(!fx.dir.path().join("history").exists());

        fx.app.run_switch(&switch(Some("gamma"))).unwrap();
        assert_eq!(fx.current(), "gamma");
        assert_ne!(fx.bytes(), before);
    }

    #[test]
    fn test_switch_unknown_keeps_file() {
        let fx = Fixture::new(None, true);
        let before = fx.bytes();

        let err = fx.app.run_switch(&switch(Some("missing"))).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NotFound(_))));
        assert_eq!(fx.bytes(), before);
    }

    #[test]
    fn test_switch_previous() {
        let fx = Fixture::new(None, true);
        assert!(fx.app.run_switch(&switch(Some("-"))).is_err());

        fx.app.run_switch(&switch(Some("gamma"))).unwrap();
        fx.app.run_switch(&switch(Some("beta"))).unwrap();
        fx.app.run_switch(&switch(Some("-"))).unwrap();
        assert_eq!(fx.current(), "gamma");

        fx.app.run_switch(&switch(Some("-"))).unwrap();
        assert_eq!(fx.current(), "beta");
    }

    #[test]
    fn test_switch_picker() {
        let fx = Fixture::new(Some("beta"), true);
        fx.app.run_switch(&switch(None)).unwrap();
        assert_eq!(fx.current(), "beta");
        assert_eq!(*fx.seen.borrow(), vec![words(&["alpha", "beta", "gamma"])]);
    }

    #[test]
    fn test_namespace_current_keeps_file() {
        let fx = Fixture::new(None, true);
        let before = fx.bytes();

        fx.app.run_namespace(Some("default"), false).unwrap();
        assert_eq!(fx.bytes(), before);

        fx.app.run_namespace(None, true).unwrap();
        assert_eq!(fx.bytes(), before);
    }

    #[test]
    fn test_namespace_previous() {
        let fx = Fixture::new(None, true);
        assert!(fx.app.run_namespace(Some("-"), false).is_err());

        fx.app.run_namespace(Some("web"), false).unwrap();
        fx.app.run_namespace(Some("db"), false).unwrap();
        assert_eq!(fx.app.registry.current_namespace().unwrap(), "db");

        fx.app.run_namespace(Some("-"), false).unwrap();
        assert_eq!(fx.app.registry.current_namespace().unwrap(), "web");
    }

    #[test]
    fn test_namespace_picker_uses_alias() {
        let fx = Fixture::new(Some("web"), true);
        fx.app.run_namespace(None, false).unwrap();
        assert_eq!(fx.app.registry.current_namespace().unwrap(), "web");
        assert_eq!(*fx.seen.borrow(), vec![words(&["db", "web"])]);
    }

    #[test]
    fn test_delete_unknown_keeps_file() {
        let fx = Fixture::new(Some("beta"), true);
        let before = fx.bytes();

        assert!(fx.app.run_delete(Some("missing"), true).is_err());
        assert_eq!(fx.bytes(), before);
        assert!(fx.seen.borrow().is_empty());
    }

    #[test]
    fn test_delete_picker_order() {
        let fx = Fixture::new(Some("beta"), false);
        fx.app.registry.switch_context("gamma").unwrap();
        fx.app.run_delete(None, true).unwrap();
        assert_eq!(*fx.seen.borrow(), vec![words(&["alpha", "beta", "gamma"])]);
        assert!(!fx.app.registry.list_contexts().unwrap().contains_key("beta"));

        let fx = Fixture::new(Some("beta"), true);
        fx.app.registry.switch_context("gamma").unwrap();
        fx.app.run_delete(None, true).unwrap();
        assert_eq!(*fx.seen.borrow(), vec![words(&["gamma", "alpha", "beta"])]);
    }

    #[test]
    fn test_cancel_is_benign() {
        let fx = Fixture::new(None, true);
        let before = fx.bytes();

        let err = fx.app.run_switch(&switch(None)).unwrap_err();
        assert!(is_cancelled(&err));

        let err = fx.app.run_delete(None, true).unwrap_err();
        assert!(is_cancelled(&err));
        assert_eq!(fx.bytes(), before);

        let err = fx.app.run_switch(&switch(Some("missing"))).unwrap_err();
        assert!(!is_cancelled(&err));
    }

    #[test]
    fn test_complete() {
        let fx = Fixture::new(None, true);
        let contexts = words(&["alpha", "beta", "gamma"]);
        let namespaces = words(&["db", "web"]);

        assert_eq!(fx.app.complete(&[]).unwrap(), contexts);
        assert_eq!(fx.app.complete(&words(&[""])).unwrap(), contexts);
        assert_eq!(fx.app.complete(&words(&["switch", "b"])).unwrap(), contexts);
        assert_eq!(fx.app.complete(&words(&["rm", "-y", ""])).unwrap(), contexts);

        assert_eq!(fx.app.complete(&words(&["ns", ""])).unwrap(), namespaces);
        assert_eq!(fx.app.complete(&words(&["namespace", "w"])).unwrap(), namespaces);
        assert_eq!(fx.app.complete(&words(&["beta", "-n", ""])).unwrap(), namespaces);
        assert_eq!(fx.app.complete(&words(&["-n", ""])).unwrap(), namespaces);

        assert!(fx.app.complete(&words(&["beta", ""])).unwrap().is_empty());
        assert!(fx.app.complete(&words(&["ns", "web", ""])).unwrap().is_empty());
        assert!(fx.app.complete(&words(&["gamma", "-n", "x", ""])).unwrap().is_empty());
    }
}
