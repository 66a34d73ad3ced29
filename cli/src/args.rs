use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use pledge_fetch::Method;

pub const USAGE: &str = "\
Usage: pledge [OPTIONS] <COMMAND>

Commands:
  demo                     Run the deferred ordering demonstration
  fetch [--method M] URL.. Fetch each URL and print its JSON body

Options:
  --config PATH            Read configuration from PATH
  --virtual-clock          Jump straight to timer deadlines instead of sleeping
  -h, --help               Print this help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Demo,
    Fetch { method: Method, urls: Vec<String> },
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub virtual_clock: bool,
    pub command: Command,
}

impl Args {
    /// Parse everything after the program name.
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let mut config = None;
        let mut virtual_clock = false;
        let mut command = None;
        let mut method = Method::GET;
        let mut urls = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => command = Some(Command::Help),
                "--config" => {
                    let path = args.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                    config = Some(PathBuf::from(path));
                }
                "--virtual-clock" => virtual_clock = true,
                "--method" => {
                    let raw = args.next().ok_or_else(|| anyhow!("--method needs a value"))?;
                    method = Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
                        .map_err(|_| anyhow!("invalid HTTP method: {raw}"))?;
                }
                "demo" if command.is_none() => command = Some(Command::Demo),
                "fetch" if command.is_none() => {
                    command = Some(Command::Fetch {
                        method: Method::GET,
                        urls: Vec::new(),
                    });
                }
                flag if flag.starts_with('-') => bail!("unknown option: {flag}"),
                _ if matches!(command, Some(Command::Fetch { .. })) => urls.push(arg),
                other => bail!("unexpected argument: {other}"),
            }
        }

        let command = match command {
            Some(Command::Fetch { .. }) if urls.is_empty() => bail!("fetch needs at least one URL"),
            Some(Command::Fetch { .. }) => Command::Fetch { method, urls },
            Some(command) => command,
            None => Command::Help,
        };

        Ok(Self {
            config,
            virtual_clock,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(raw: &[&str]) -> Result<Args> {
        Args::parse(raw.iter().map(ToString::to_string))
    }

    #[test]
    fn no_arguments_prints_help() {
        assert_eq!(parse(&[]).expect("parse").command, Command::Help);
    }

    #[test]
    fn demo_with_options() {
        let args = parse(&["--virtual-clock", "demo", "--config", "/tmp/p.toml"]).expect("parse");
        assert_eq!(
            args,
            Args {
                config: Some(PathBuf::from("/tmp/p.toml")),
                virtual_clock: true,
                command: Command::Demo,
            }
        );
    }

    #[test]
    fn fetch_collects_urls_and_method() {
        let args = parse(&["fetch", "--method", "post", "http://a", "http://b"]).expect("parse");
        assert_eq!(
            args.command,
            Command::Fetch {
                method: Method::POST,
                urls: vec!["http://a".to_string(), "http://b".to_string()],
            }
        );
    }

    #[test]
    fn fetch_without_urls_is_an_error() {
        assert!(parse(&["fetch"]).is_err());
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let err = parse(&["demo", "--fast"]).expect_err("unknown flag");
        assert_eq!(err.to_string(), "unknown option: --fast");
    }

    #[test]
    fn demo_takes_no_positional_arguments() {
        assert!(parse(&["demo", "extra"]).is_err());
    }
}
