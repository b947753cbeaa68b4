//! Writes the stripped `git log` of a repository to stdout, for use as a
//! blame history cache.

use std::io::BufWriter;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use code_search_web::git::write_stripped_log;

#[derive(Debug, Parser)]
#[command(name = "strip-log", about = "Print the stripped git log of a repository")]
struct Args {
    /// Repository to read
    repo_path: PathBuf,

    /// Revision whose history is written
    #[arg(default_value = "HEAD")]
    revision: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let stdout = std::io::stdout().lock();
    write_stripped_log(&args.repo_path, &args.revision, BufWriter::new(stdout))
}
