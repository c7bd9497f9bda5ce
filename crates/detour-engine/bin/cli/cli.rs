use clap::{Parser, Subcommand, ValueEnum};
use detour_telemetry::LogFormat;
use jiff::Timestamp;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const STORAGE_BACKEND_ENV: &str = "DETOUR_STORAGE_BACKEND";
pub const MYSQL_DSN_ENV: &str = "DETOUR_MYSQL_DSN";
pub const DEFAULT_STATUS_CODE_ENV: &str = "DETOUR_DEFAULT_STATUS_CODE";
pub const LOG_FORMAT_ENV: &str = "DETOUR_LOG_FORMAT";
pub const SEED_ENV: &str = "DETOUR_SEED";

pub const DEFAULT_STATUS_CODE: u16 = 301;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "in-memory")]
    InMemory,
    #[value(name = "mysql")]
    Mysql,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::InMemory => write!(f, "in-memory"),
            StorageBackendArg::Mysql => write!(f, "mysql"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Display for LogFormatArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        LogFormat::from(*self).fmt(f)
    }
}

#[derive(Debug, Parser)]
#[command(name = "detour", about = "Manage and resolve URI redirections")]
pub struct CLI {
    #[arg(
        long,
        global = true,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::InMemory
    )]
    pub storage: StorageBackendArg,

    #[arg(long, global = true, env = MYSQL_DSN_ENV, required_if_eq("storage", "mysql"))]
    pub mysql_dsn: Option<String>,

    /// Status code for redirections added without one.
    #[arg(
        long,
        global = true,
        env = DEFAULT_STATUS_CODE_ENV,
        default_value_t = DEFAULT_STATUS_CODE
    )]
    pub default_status_code: u16,

    #[arg(
        long,
        global = true,
        env = LOG_FORMAT_ENV,
        value_enum,
        default_value_t = LogFormatArg::Text
    )]
    pub log_format: LogFormatArg,

    /// JSON-lines file imported before the command runs.
    #[arg(long, global = true, env = SEED_ENV)]
    pub seed: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a redirection and compress the chains it creates.
    Add {
        source: String,
        /// Relative path or absolute URI; empty for gone status codes.
        #[arg(default_value = "")]
        target: String,
        #[arg(long)]
        status_code: Option<u16>,
        /// Host pattern to scope the redirection to; repeatable. Omit for all hosts.
        #[arg(long = "host")]
        hosts: Vec<String>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        creator: Option<String>,
        #[arg(long)]
        start_at: Option<Timestamp>,
        #[arg(long)]
        end_at: Option<Timestamp>,
    },
    /// Print the redirection a request would be answered with.
    Resolve {
        path: String,
        #[arg(long)]
        host: Option<String>,
        /// Count the lookup as a served redirect.
        #[arg(long)]
        count_hit: bool,
    },
    /// Print redirections as JSON lines.
    List {
        /// Host pattern to list; an empty string selects the all-hosts scope.
        #[arg(long)]
        host: Option<String>,
    },
    /// Print every host pattern in use.
    Hosts,
    /// Remove one redirection.
    Remove {
        path: String,
        #[arg(long)]
        host: Option<String>,
        /// Fail if the redirection does not exist.
        #[arg(long)]
        strict: bool,
    },
    /// Remove all redirections, or those of one host pattern.
    RemoveAll {
        #[arg(long)]
        host: Option<String>,
    },
    /// Write redirections as JSON lines to a file or stdout.
    Export {
        #[arg(long)]
        host: Option<String>,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Restore redirections from a JSON-lines export, statistics included.
    Import { input: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        CLI::command().debug_assert();
    }

    #[test]
    fn mysql_requires_a_dsn() {
        let result = CLI::try_parse_from(["detour", "--storage", "mysql", "hosts"]);
        assert!(result.is_err());
    }

    #[test]
    fn add_accepts_repeated_hosts() {
        let cli = CLI::try_parse_from([
            "detour",
            "add",
            "/old",
            "/new",
            "--host",
            "a.example.com",
            "--host",
            "*.example.org",
            "--status-code",
            "308",
        ])
        .unwrap();

        match cli.command {
            Command::Add {
                hosts, status_code, ..
            } => {
                assert_eq!(hosts, ["a.example.com", "*.example.org"]);
                assert_eq!(status_code, Some(308));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
