//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use std::path::PathBuf;

use clap::Parser;

/// CLI arguments for the leecher
#[derive(Debug, Parser)]
#[command(name = "clover")]
#[command(about = "A BitTorrent leecher with UDP tracker support", long_about = None)]
pub struct CliArgs {
    /// Path to the .torrent file
    #[arg(short = 'i', long = "input", value_name = "TORRENT_FILE")]
    pub torrent_file: PathBuf,

    /// Download root directory (default: ~/Downloads)
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from the command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }

    /// Resolve the download root, defaulting to the user's Downloads
    /// directory.
    pub fn download_root(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(default_download_root)
    }
}

fn default_download_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join("Downloads"))
        .unwrap_or_else(|| PathBuf::from("./Downloads"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_output_dir_wins() {
        let args = CliArgs {
            torrent_file: PathBuf::from("test.torrent"),
            output_dir: Some(PathBuf::from("/tmp/dl")),
            verbose: false,
            quiet: false,
        };
        assert_eq!(args.download_root(), PathBuf::from("/tmp/dl"));
    }

    #[test]
    fn test_log_level_flags() {
        let mut args = CliArgs {
            torrent_file: PathBuf::from("test.torrent"),
            output_dir: None,
            verbose: false,
            quiet: false,
        };
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
