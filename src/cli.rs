//! Command line for the `farmout` binary, built on clap.
//!
//! [`Cli`] carries the [`Command`] subcommands (demo, status, mode) and the
//! global flags (--verbose, --json-logs, --ttl).

use clap::{Parser, Subcommand};

/// Farm-out dispatch workflow for ground-transportation reservations.
#[derive(Debug, Parser)]
#[command(name = "farmout", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emit logs as JSON lines instead of the human format.
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,

    /// Offer lifetime in seconds, overriding the configured one.
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub ttl: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs an in-memory dispatch scenario end to end.
    Demo,

    /// Canonicalizes raw status values as stored by any client.
    Status {
        /// Raw values, e.g. `farm_out_offered` or "Passenger On-Board".
        #[arg(required = true)]
        raw: Vec<String>,
    },

    /// Canonicalizes raw dispatch-mode values.
    Mode {
        #[arg(required = true)]
        raw: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_status_values() {
        let cli = Cli::parse_from(["farmout", "status", "farm_out_offered", "En Route"]);
        match cli.command {
            Command::Status { raw } => {
                assert_eq!(raw, vec!["farm_out_offered", "En Route"]);
            }
            _ => panic!("expected Status command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["farmout", "--json-logs", "--ttl", "30", "-v", "demo"]);
        assert!(cli.verbose);
        assert!(cli.json_logs);
        assert_eq!(cli.ttl, Some(30));
        assert!(matches!(cli.command, Command::Demo));
    }

    #[test]
    fn cli_rejects_zero_ttl() {
        assert!(Cli::try_parse_from(["farmout", "--ttl", "0", "demo"]).is_err());
    }

    #[test]
    fn cli_requires_values() {
        assert!(Cli::try_parse_from(["farmout", "mode"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
