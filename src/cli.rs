use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Smart Timer Lock
///
/// Counts down a fixed duration and locks the device when time is up.
/// A guardian PIN is required to stop the countdown early.
#[derive(Parser, Debug)]
#[command(name = "smart-timer-lock")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (default: user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an example configuration file
    Init {
        /// Where to write the file (default: user config directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Manage the guardian PIN
    Pin {
        #[command(subcommand)]
        command: PinCommands,
    },
    /// Start a countdown in the foreground
    Start(StartArgs),
}

#[derive(Subcommand, Debug)]
pub enum PinCommands {
    /// Set or replace the guardian PIN
    Set,
    /// Check whether a guardian PIN is configured
    Check,
}

#[derive(ClapArgs, Debug)]
#[group(required = true, multiple = false)]
pub struct StartArgs {
    /// Countdown length in minutes
    #[arg(short, long, allow_negative_numbers = true)]
    pub minutes: Option<i64>,

    /// Countdown length in seconds
    #[arg(short, long, allow_negative_numbers = true)]
    pub seconds: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_start_minutes() {
        let args = Args::try_parse_from(["smart-timer-lock", "start", "--minutes", "2"]).unwrap();
        match args.command {
            Commands::Start(start) => {
                assert_eq!(start.minutes, Some(2));
                assert_eq!(start.seconds, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_negative_duration_reaches_validation() {
        let args = Args::try_parse_from(["smart-timer-lock", "start", "--seconds", "-5"]).unwrap();
        assert!(matches!(args.command, Commands::Start(StartArgs { seconds: Some(-5), .. })));
    }

    #[test]
    fn test_start_requires_exactly_one_duration() {
        assert!(Args::try_parse_from(["smart-timer-lock", "start"]).is_err());
        assert!(
            Args::try_parse_from(["smart-timer-lock", "start", "--minutes", "1", "--seconds", "5"])
                .is_err()
        );
    }

    #[test]
    fn test_global_flags() {
        let args = Args::try_parse_from([
            "smart-timer-lock",
            "pin",
            "check",
            "--config",
            "/tmp/lock.yaml",
            "-v",
        ])
        .unwrap();
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/lock.yaml")));
        assert!(matches!(args.command, Commands::Pin { command: PinCommands::Check }));
    }
}
