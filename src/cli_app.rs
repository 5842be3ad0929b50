//! Top-level CLI definition and dispatch.

use std::io::{self, BufReader};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::checks::{self, CheckRegistry};
use crate::core::config::{CheckSpec, Config, DEFAULT_MAX_WORKERS, DEFAULT_RPC_TIMEOUT_SECS};
use crate::core::errors::Result;
use crate::daemon::loop_main::{CheckRunner, RunSummary};
use crate::daemon::signals::Shutdown;
use crate::logger::Logger;

/// Health checks for supervisord process groups, run as an event listener.
#[derive(Debug, Parser)]
#[command(name = "svcheck", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the checks described in a TOML configuration file.
    Run {
        /// Path to the configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Restart processes whose heartbeat file went stale.
    File {
        #[command(flatten)]
        target: TargetArgs,
        /// Seconds without a heartbeat after which a process is considered dead.
        #[arg(short, long)]
        timeout: u64,
        /// Fail the check on any error reading the heartbeat file.
        #[arg(short = 'x', long)]
        fail_on_error: bool,
        /// Heartbeat path template ({group}, {name}, {pid} are substituted).
        #[arg(short, long)]
        file: Option<String>,
    },
    /// Restart processes that stop accepting TCP connections.
    Tcp {
        #[command(flatten)]
        target: TargetArgs,
        /// Port number, or a regex whose single group extracts it from the process name.
        #[arg(short, long)]
        port: String,
        /// Host to connect to.
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Connect timeout in seconds.
        #[arg(short, long, default_value_t = 15)]
        timeout: u64,
        /// Connection retries before the check fails.
        #[arg(short = 'r', long, default_value_t = 2)]
        num_retries: u32,
    },
    /// Restart processes whose resident memory exceeds a limit.
    Memory {
        #[command(flatten)]
        target: TargetArgs,
        /// Maximum resident set size in KiB.
        #[arg(short, long)]
        max_rss: u64,
        /// Read retries before the check gives up.
        #[arg(short = 'r', long, default_value_t = 2)]
        num_retries: u32,
    },
    /// Print a shell completion script.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Options shared by the single-check subcommands.
#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Health check name shown in the log.
    #[arg(short = 'n', long)]
    pub check_name: String,
    /// supervisord process group to watch.
    #[arg(short = 'g', long)]
    pub process_group: Option<String>,
    /// Single process to watch; the group is ignored when this is set.
    #[arg(short = 'N', long)]
    pub process_name: Option<String>,
    /// Maximum processes checked in parallel (at most 16).
    #[arg(short = 'w', long, default_value_t = DEFAULT_MAX_WORKERS)]
    pub max_workers: usize,
    /// Seconds allowed for each XML-RPC call to supervisord.
    #[arg(long, default_value_t = DEFAULT_RPC_TIMEOUT_SECS)]
    pub rpc_timeout: u64,
}

impl TargetArgs {
    fn into_config(self, check: CheckSpec) -> Config {
        Config {
            name: self.check_name,
            group: self.process_group,
            process_name: self.process_name,
            max_workers: self.max_workers,
            rpc_timeout: self.rpc_timeout,
            env: None,
            checks: vec![check],
        }
    }
}

/// Translate a single-check subcommand into a runner configuration.
/// Returns `None` for subcommands that do not run the listener.
#[must_use]
pub fn config_for(command: &Command) -> Option<Config> {
    let mut options = toml::Table::new();
    let (target, kind) = match command {
        Command::Run { .. } | Command::Completions { .. } => return None,
        Command::File {
            target,
            timeout,
            fail_on_error,
            file,
        } => {
            options.insert("timeout".into(), to_integer(*timeout));
            options.insert("fail_on_error".into(), toml::Value::Boolean(*fail_on_error));
            if let Some(file) = file {
                options.insert("file".into(), toml::Value::String(file.clone()));
            }
            (target, checks::file::KIND)
        }
        Command::Tcp {
            target,
            port,
            host,
            timeout,
            num_retries,
        } => {
            let port = port.parse::<u16>().map_or_else(
                |_| toml::Value::String(port.clone()),
                |n| toml::Value::Integer(i64::from(n)),
            );
            options.insert("port".into(), port);
            options.insert("host".into(), toml::Value::String(host.clone()));
            options.insert("timeout".into(), to_integer(*timeout));
            options.insert("num_retries".into(), toml::Value::Integer(i64::from(*num_retries)));
            (target, checks::tcp::KIND)
        }
        Command::Memory {
            target,
            max_rss,
            num_retries,
        } => {
            options.insert("max_rss".into(), to_integer(*max_rss));
            options.insert("num_retries".into(), toml::Value::Integer(i64::from(*num_retries)));
            (target, checks::memory::KIND)
        }
    };
    Some(target.clone().into_config(CheckSpec::new(kind, options)))
}

fn to_integer(value: u64) -> toml::Value {
    toml::Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Dispatch CLI commands.
///
/// # Errors
/// Returns an error if configuration is invalid or the listener cannot start.
pub fn run(cli: &Cli) -> std::result::Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Command::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(*shell, &mut command, "svcheck", &mut io::stdout());
            Ok(())
        }
        Command::Run { config } => {
            let config = Config::load(config)?;
            serve(&config)?;
            Ok(())
        }
        other => {
            let config = config_for(other).ok_or("subcommand does not run checks")?;
            config.validate()?;
            serve(&config)?;
            Ok(())
        }
    }
}

/// Run the listener on stdin/stdout until told to stop.
fn serve(config: &Config) -> Result<RunSummary> {
    let log = Logger::stderr(config.name.clone());
    let shutdown = Shutdown::new();
    log.log("Installing signal handlers.");
    shutdown.install_handlers()?;
    let runner = CheckRunner::from_config(config, &CheckRegistry::builtin(), shutdown, log)?;
    runner.run(BufReader::new(io::stdin()), io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Target;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("svcheck").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn tcp_subcommand_builds_numeric_port() {
        let cli = parse(&["tcp", "-n", "web_check", "-g", "web", "-p", "8080"]);
        let config = config_for(&cli.command).expect("config");
        assert_eq!(config.target().expect("target"), Target::Group("web".to_string()));
        assert_eq!(config.checks[0].kind, "tcp");
        assert_eq!(
            config.checks[0].options.get("port"),
            Some(&toml::Value::Integer(8080))
        );
        config.validate().expect("valid");
    }

    #[test]
    fn tcp_subcommand_keeps_port_pattern_as_string() {
        let cli = parse(&["tcp", "-n", "c", "-g", "web", "-p", r"web_(\d+)"]);
        let config = config_for(&cli.command).expect("config");
        assert_eq!(
            config.checks[0].options.get("port"),
            Some(&toml::Value::String(r"web_(\d+)".to_string()))
        );
    }

    #[test]
    fn file_subcommand_targets_single_process() {
        let cli = parse(&["file", "-n", "hb", "-N", "worker_1", "-t", "30", "-x"]);
        let config = config_for(&cli.command).expect("config");
        assert_eq!(
            config.target().expect("target"),
            Target::Process("worker_1".to_string())
        );
        assert_eq!(
            config.checks[0].options.get("fail_on_error"),
            Some(&toml::Value::Boolean(true))
        );
        let (log, _) = Logger::memory("hb");
        CheckRegistry::builtin()
            .build_all(&config.checks, &log)
            .expect("file check builds from CLI options");
    }

    #[test]
    fn single_check_subcommand_requires_a_target() {
        let cli = parse(&["memory", "-n", "mem", "-m", "1024"]);
        let config = config_for(&cli.command).expect("config");
        assert!(config.validate().is_err());
    }

    #[test]
    fn worker_cap_above_sixteen_fails_validation() {
        let cli = parse(&["memory", "-n", "mem", "-g", "web", "-m", "1024", "-w", "17"]);
        let err = config_for(&cli.command).expect("config").validate().expect_err("cap");
        assert_eq!(err.code(), "SCK-1001");

        let cli = parse(&["memory", "-n", "mem", "-g", "web", "-m", "1024", "-w", "16", "--rpc-timeout", "5"]);
        let config = config_for(&cli.command).expect("config");
        assert_eq!(config.rpc_timeout, 5);
        config.validate().expect("valid");
    }

    #[test]
    fn run_and_completions_have_no_inline_config() {
        assert!(config_for(&parse(&["run", "--config", "/etc/svcheck.toml"]).command).is_none());
        assert!(config_for(&parse(&["completions", "bash"]).command).is_none());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
