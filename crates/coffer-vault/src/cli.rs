use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "coffer", about = "Encrypted object storage and download tokens")]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a freshly generated 256-bit key as hex
    Keygen,
    /// Store a file
    Put {
        /// File to upload
        file: PathBuf,
        /// Storage key for the object
        #[arg(long)]
        key: String,
        /// Declared MIME type
        #[arg(long)]
        mime: Option<String>,
    },
    /// Write an object's content to stdout or a file
    Get {
        /// Storage key of the object
        key: String,
        /// Output file (stdout if omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show the stored size of an object
    Stat {
        /// Storage key of the object
        key: String,
    },
    /// Delete an object
    Delete {
        /// Storage key of the object
        key: String,
    },
    /// Probe the storage backend
    Health,
    /// Issue or check download tokens
    Token {
        #[command(subcommand)]
        action: TokenCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum TokenCommand {
    /// Issue a download token
    Issue {
        /// Entity the token authorizes
        #[arg(long)]
        id: String,
        /// Lifetime in seconds (never expires if omitted)
        #[arg(long)]
        ttl_secs: Option<i64>,
        /// Mark the entity as password protected
        #[arg(long)]
        password: bool,
    },
    /// Verify a token and print its claims
    Verify {
        /// Token as issued
        token: String,
    },
}
