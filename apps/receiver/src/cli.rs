use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

/// Receive ferry uploads over WebSocket
#[derive(Debug, Parser)]
#[command(name = "ferry-receiverd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Port to listen on (0 picks a free one)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory uploads are written into
    #[arg(short, long)]
    pub dest: Option<PathBuf>,
}

impl Args {
    /// Overrides configured values with the ones given on the command line.
    pub fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dest) = self.dest {
            config.dest_dir = dest;
        }
    }
}
