//! Rolegate CLI Module
//! Command-line interface for running and inspecting a rolegate project

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rolegate")]
#[command(author = "Rolegate Team")]
#[command(version)]
#[command(about = "Role-based access control backend", long_about = None)]
pub struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default config into the project directory
    Init {
        /// Project name, used for the database file
        #[arg(short, long)]
        name: String,
    },

    /// Start the admin API server
    Serve {
        /// Port to listen on (overrides the config)
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to (overrides the config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Show service health and table counts
    Status,

    /// Inspect permission rules
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum PolicyAction {
    /// List rules, optionally for one role keyword
    List {
        #[arg(short, long)]
        subject: Option<String>,
    },

    /// Check whether a role may call a route
    Check {
        /// Role keyword
        subject: String,
        /// Route template, e.g. /user/info
        object: String,
        /// HTTP method
        action: String,
    },
}

impl Cli {
    pub fn get_project_dir(&self) -> PathBuf {
        self.project
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy_check() {
        let cli = Cli::try_parse_from(["rolegate", "policy", "check", "admin", "/user/info", "get"]).unwrap();
        match cli.command {
            Commands::Policy {
                action: PolicyAction::Check { subject, object, action },
            } => {
                assert_eq!(subject, "admin");
                assert_eq!(object, "/user/info");
                assert_eq!(action, "get");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["rolegate", "status", "--format", "json", "-p", "/tmp/x"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.get_project_dir(), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_serve_overrides_are_optional() {
        let cli = Cli::try_parse_from(["rolegate", "serve"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { port: None, host: None }));
    }
}
