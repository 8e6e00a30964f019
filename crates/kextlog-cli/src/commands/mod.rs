//! CLI commands and argument parsing.

#[cfg(unix)]
pub mod listen;
pub mod output;
pub mod read;

use clap::{Parser, Subcommand};

/// Read-buffer size; over-commits the producer's 8 KiB receive space.
pub const DEFAULT_BUFFER_SIZE: usize = 24_576;

/// kextlog - security-event log consumer
#[derive(Parser)]
#[command(name = "kextlog")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Receive records on a Unix datagram socket until Ctrl-C
    #[cfg(unix)]
    Listen(listen::ListenArgs),

    /// Decode a captured record stream
    Read(read::ReadArgs),

    /// Print version information
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_read_defaults() {
        let cli = Cli::try_parse_from(["kextlog", "read"]).unwrap();
        let Commands::Read(args) = cli.command else {
            panic!("expected the read command");
        };
        assert!(args.file.is_none());
        assert_eq!(args.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(args.format, output::OutputFormat::Text);
    }

    #[test]
    fn test_read_json_format() {
        let cli =
            Cli::try_parse_from(["kextlog", "read", "capture.bin", "--format", "json"]).unwrap();
        let Commands::Read(args) = cli.command else {
            panic!("expected the read command");
        };
        assert_eq!(args.file.as_deref(), Some(std::path::Path::new("capture.bin")));
        assert_eq!(args.format, output::OutputFormat::Json);
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["kextlog", "read", "--format", "xml"]).is_err());
    }
}
