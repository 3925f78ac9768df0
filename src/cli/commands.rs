use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gridlink")]
#[command(about = "Client for a data grid of interchangeable servers")]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Grid server as HOST:PORT; repeat for several. Overrides the config file
    #[arg(short, long = "server", global = true)]
    pub servers: Vec<String>,

    /// Base64 security token sent with operations that carry a user id
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Print per-operation stats as JSON after the command
    #[arg(long, global = true)]
    pub stats: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that a server answers
    Ping,

    /// Show the number of entries in a region
    ///
    /// Example: gridlink --server localhost:40404 size orders
    Size {
        region: String,
    },

    /// Read the value stored under a key
    ///
    /// UTF-8 values are printed as text, anything else as hex.
    Get {
        region: String,
        key: String,
    },

    /// Store a value under a key
    Put {
        region: String,
        key: String,
        value: String,
    },

    /// Delete a key
    Remove {
        region: String,
        key: String,
    },
}
