//! punzip - parallel ZIP extractor.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use chrono::{DateTime, Local};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use pzip_zip::{Extractor, ExtractorOptions, ZipReader};

#[derive(Parser)]
#[command(name = "punzip", version, about = "Parallel ZIP extractor")]
struct Cli {
    /// Archive to extract
    archive: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    directory: PathBuf,

    /// Worker count (default: hardware parallelism)
    #[arg(short, long, default_value_t = 0)]
    concurrency: usize,

    /// Overwrite existing files (the default)
    #[arg(short, long, overrides_with = "no_overwrite")]
    overwrite: bool,

    /// Skip existing files
    #[arg(short = 'n', long, overrides_with = "overwrite")]
    no_overwrite: bool,

    /// List members only
    #[arg(short, long)]
    list: bool,

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
        eprintln!("punzip: {}", e);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> pzip_core::Result<()> {
    if cli.list {
        return list_archive(&cli.archive);
    }

    let bar = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("progress bar template is valid")
                .progress_chars("█▓▒░ "),
        );
        bar.set_message("files");
        bar
    };

    let progress_bar = bar.clone();
    let options = ExtractorOptions {
        concurrency: cli.concurrency,
        overwrite: !cli.no_overwrite,
        preserve_permissions: true,
        progress: Some(Arc::new(move |done, total| {
            progress_bar.set_length(total as u64);
            progress_bar.set_position(done as u64);
        })),
    };

    let extractor = Extractor::new(&cli.directory, options);
    extractor.extract(&cli.archive)?;

    if cli.verbose && !cli.quiet {
        bar.finish_with_message(format!("extracted to {}", cli.directory.display()));
    } else {
        bar.finish_and_clear();
    }
    Ok(())
}

/// Print an `unzip -l` style member listing from the central directory.
fn list_archive(archive: &PathBuf) -> pzip_core::Result<()> {
    let reader = ZipReader::open(archive)?;

    println!("  Length      Date    Time    Name");
    println!("---------  ---------- -----   ----");

    let mut total_size = 0u64;
    for entry in reader.entries() {
        let when: DateTime<Local> = DateTime::from(entry.modified());
        println!(
            "{:>9}  {}   {}",
            entry.header.uncompressed_size,
            when.format("%Y-%m-%d %H:%M"),
            entry.header.name
        );
        total_size += entry.header.uncompressed_size;
    }

    println!("---------                     -------");
    println!(
        "{:>9}                     {} files",
        total_size,
        reader.entries().len()
    );
    Ok(())
}
