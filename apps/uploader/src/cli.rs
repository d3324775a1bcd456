use std::path::PathBuf;

use clap::Parser;

/// Upload files to a ferry receiver
#[derive(Debug, Parser)]
#[command(name = "ferry-uploader")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Files to upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Receiver endpoint, overrides the configured url
    #[arg(long)]
    pub url: Option<String>,
}
