use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "lyst",
    version,
    about = "Lyst: todo lists in your terminal",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "lystrc", global = true)]
    pub lystrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sign in with Google
    Login,
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Print every list with its todos
    Lists,
    /// Create a list
    Create { title: String },
    /// Rename a list
    Rename { list: String, title: String },
    /// Delete a list and all of its todos
    Delete {
        list: String,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
    /// Add a todo to a list
    Add { list: String, text: String },
    /// Flip a todo between open and completed
    Toggle { list: String, todo: String },
    /// Change a todo's text
    Edit {
        list: String,
        todo: String,
        text: String,
    },
    /// Delete a todo
    Remove { list: String, todo: String },
    /// Interactive dashboard (default)
    Shell,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "off"
    } else if quiet == 1 {
        "error"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Splits a positional `rc.key=value` (or `rc.key:value`) argument.
fn positional_override(arg: &str) -> Option<(String, String)> {
    let rest = arg.strip_prefix("rc.")?;
    let (key, value) = rest.split_once(['=', ':'])?;
    if key.is_empty() {
        return None;
    }
    Some((format!("rc.{key}"), value.to_string()))
}

/// Pulls positional config overrides out of the argument list before clap
/// sees it. The binary name is always kept.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut pre = PreprocessedArgs {
        cleaned_args: Vec::with_capacity(raw.len()),
        rc_overrides: Vec::new(),
    };

    for (idx, arg) in raw.iter().enumerate() {
        let captured = (idx > 0)
            .then(|| positional_override(&arg.to_string_lossy()))
            .flatten();
        match captured {
            Some((key, value)) => {
                debug!(key = %key, "captured positional rc override");
                pre.rc_overrides.push((key, value));
            }
            None => pre.cleaned_args.push(arg.clone()),
        }
    }

    Ok(pre)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&os(&[
            "lyst",
            "rc.api.url=http://localhost:4000",
            "lists",
            "rc.color:off",
        ]))
        .expect("preprocess");

        assert_eq!(pre.cleaned_args, os(&["lyst", "lists"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.api.url".to_string(), "http://localhost:4000".to_string()),
                ("rc.color".to_string(), "off".to_string()),
            ]
        );
    }

    #[test]
    fn parses_subcommands_and_global_flags() {
        let cli = GlobalCli::parse_from(os(&[
            "lyst",
            "-vv",
            "--rc",
            "auth.provider=token",
            "delete",
            "2",
            "--yes",
        ]));

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.rc_overrides[0].key, "auth.provider");
        assert_eq!(
            cli.command,
            Some(Command::Delete {
                list: "2".to_string(),
                yes: true
            })
        );
    }

    #[test]
    fn rc_prefix_without_separator_is_a_plain_argument() {
        let pre = preprocess_args(&os(&["lyst", "create", "rc.notes"])).expect("preprocess");
        assert_eq!(pre.cleaned_args, os(&["lyst", "create", "rc.notes"]));
        assert!(pre.rc_overrides.is_empty());
    }

    #[test]
    fn no_subcommand_means_shell() {
        let cli = GlobalCli::parse_from(os(&["lyst"]));
        assert!(cli.command.is_none());
    }

    #[test]
    fn key_val_requires_equals() {
        assert!("nokey".parse::<KeyVal>().is_err());
        let kv: KeyVal = " color = off ".parse().expect("kv");
        assert_eq!((kv.key.as_str(), kv.value.as_str()), ("color", "off"));
    }
}
