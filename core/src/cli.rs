//! Command-line interface for executorch-bridge.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inspect and run serialized programs with the embedded executor.
#[derive(Parser, Debug)]
#[command(name = "executorch-bridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report whether a file carries a compatible program header.
    Check {
        /// Path to the program file.
        #[arg(short, long)]
        program: PathBuf,
    },

    /// Load a program and print the metadata of every method.
    Info {
        /// Path to the program file.
        #[arg(short, long)]
        program: PathBuf,

        /// Output format (json, pretty).
        #[arg(short, long, default_value = "pretty")]
        format: String,
    },

    /// Run one method on inputs read from JSON.
    Run {
        /// Path to the program file. Falls back to `program.path` in the config.
        #[arg(short, long)]
        program: Option<PathBuf>,

        /// Method to run.
        #[arg(short, long, default_value = "forward")]
        method: String,

        /// Path to the input file (`{"inputs": [...]}`).
        #[arg(short, long)]
        input: PathBuf,

        /// Path to a YAML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format (json, pretty).
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Write the profiling dump of the run here.
        #[arg(long)]
        etdump: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "executorch-bridge",
            "run",
            "--program",
            "model.pte",
            "--input",
            "inputs.json",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Run {
                program, method, etdump, ..
            } => {
                assert_eq!(program, Some(PathBuf::from("model.pte")));
                assert_eq!(method, "forward");
                assert!(etdump.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_check_requires_program() {
        assert!(Cli::try_parse_from(["executorch-bridge", "check"]).is_err());
    }
}
