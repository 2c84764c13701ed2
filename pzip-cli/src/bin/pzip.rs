//! pzip - parallel ZIP archiver.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use pzip_zip::{Archiver, ArchiverOptions};

#[derive(Parser)]
#[command(name = "pzip", version, about = "Parallel ZIP archiver")]
struct Cli {
    /// Output archive
    archive: PathBuf,

    /// Files and directories to add (directories are walked recursively)
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Worker count (default: hardware parallelism)
    #[arg(short, long, default_value_t = 0)]
    concurrency: usize,

    /// Compression level (0-9)
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=9))]
    level: u8,

    /// Show progress
    #[arg(short, long)]
    verbose: bool,

    /// Suppress progress
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("pzip: {}", e);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> pzip_core::Result<()> {
    let show_progress = !cli.quiet;
    let bar = if show_progress {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("progress bar template is valid")
                .progress_chars("█▓▒░ "),
        );
        bar.set_message("files");
        bar
    } else {
        ProgressBar::hidden()
    };

    let progress_bar = bar.clone();
    let options = ArchiverOptions {
        concurrency: cli.concurrency,
        level: cli.level,
        progress: Some(Arc::new(move |done, total| {
            progress_bar.set_length(total as u64);
            progress_bar.set_position(done as u64);
        })),
    };

    let archiver = Archiver::new(&cli.archive, options);
    let archive_result = archiver.archive(&cli.paths);
    let close_result = archiver.close();
    archive_result?;
    close_result?;

    if cli.verbose && !cli.quiet {
        bar.finish_with_message(format!(
            "{} members -> {}",
            archiver.total_files(),
            cli.archive.display()
        ));
    } else {
        bar.finish_and_clear();
    }
    Ok(())
}
