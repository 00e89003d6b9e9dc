use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{parse_groups, ConfigOverrides};
use crate::error::{ConfigError, Result};
use crate::upload::UploadMode;

/// Post files to Usenet as yEnc articles and write an NZB
#[derive(Parser, Debug)]
#[command(name = "ul-nzb")]
#[command(version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    Upload a directory (one NZB named after it):
        ul-nzb /data/holiday

    Upload individual files (one NZB per file):
        ul-nzb -f a.bin b.bin

    Post to other groups and verify every article:
        ul-nzb -g alt.binaries.test,alt.binaries.misc -C /data/holiday

    List the contents of an NZB:
        ul-nzb list holiday.nzb

    Show configuration:
        ul-nzb config

    Test connection:
        ul-nzb test

For advanced options, edit ~/.config/ul-nzb/config.toml")]
pub struct Cli {
    /// Directory to upload, or files with -f
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Treat every PATH as a file to upload
    #[arg(short, long)]
    pub files: bool,

    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// STAT every article after posting it
    #[arg(short = 'C', long = "check")]
    pub check: bool,

    /// Comma separated newsgroups
    #[arg(short, long, value_name = "GROUPS")]
    pub groups: Option<String>,

    /// Username
    #[arg(short, long = "user", value_name = "USER")]
    pub username: Option<String>,

    /// Password, `-` reads it from stdin
    #[arg(short, long, value_name = "PASS")]
    pub password: Option<String>,

    /// Number of connections
    #[arg(short = 'n', long, value_name = "N")]
    pub connections: Option<u16>,

    /// Do not write an NZB
    #[arg(long)]
    pub no_nzb: bool,

    /// NZB output directory
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose output (-vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// JSON output for scripting
    #[arg(long)]
    pub json: bool,

    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Append logs to a file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect, authenticate and report the server's capabilities
    Test,

    /// Show configuration
    Config,

    /// List the files and segments of an NZB
    List {
        #[arg(value_name = "NZB")]
        nzb: PathBuf,
    },

    /// Show version information
    Version,
}

impl Cli {
    /// Parse arguments and handle special cases
    pub fn parse_and_validate() -> Self {
        let mut cli = Self::parse();

        if cli.password.as_deref() == Some("-") {
            use std::io::{self, BufRead};
            let stdin = io::stdin();
            if let Some(Ok(password)) = stdin.lock().lines().next() {
                cli.password = Some(password);
            }
        }

        if cli.quiet {
            cli.verbose = 0;
        }

        cli
    }

    /// Get the effective log level
    pub fn get_log_level(&self) -> &str {
        if let Some(ref level) = self.log_level {
            level
        } else {
            match self.verbose {
                0 if self.quiet => "error",
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }

    /// Get configuration overrides from CLI arguments
    pub fn get_config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            username: self.username.clone(),
            password: self.password.clone(),
            connections: self.connections,
            groups: self.groups.as_deref().map(parse_groups),
            header_check: self.check,
            no_nzb: self.no_nzb,
            nzb_dir: self.output.clone(),
            log_level: self.log_level.clone(),
        }
    }

    /// What to upload: a single directory, or the given files with `-f`
    pub fn upload_mode(&self) -> Result<UploadMode> {
        if self.paths.is_empty() {
            return Err(ConfigError::Invalid {
                field: "paths".to_string(),
                reason: messages::NO_PATHS.to_string(),
            }
            .into());
        }

        if self.files {
            return Ok(UploadMode::Files(self.paths.clone()));
        }

        match self.paths.as_slice() {
            [dir] if dir.is_dir() => Ok(UploadMode::Directory(dir.clone())),
            [path] => Err(ConfigError::InvalidPath {
                path: path.clone(),
                reason: "Not a directory, use -f to upload files".to_string(),
            }
            .into()),
            _ => Err(ConfigError::Invalid {
                field: "paths".to_string(),
                reason: "Only one directory can be uploaded, use -f for files".to_string(),
            }
            .into()),
        }
    }
}

/// CLI-specific error messages
pub mod messages {
    pub const NO_PATHS: &str =
        "Nothing to upload. Use 'ul-nzb --help' for usage information.";
}
