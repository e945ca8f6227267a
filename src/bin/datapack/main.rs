//! datapack CLI tool
//!
//! Command-line interface for planning DataPack imports with datapack-builder.
//!
//! ## Commands
//!
//! - `plan <path>`: Dry run. Builds batches until the tree is exhausted and prints each one
//!
//! `plan` never deploys anything. Every record of a printed batch is marked `Success` before the
//! next batch is built, so the output is the batch sequence a deploy would see if every deploy
//! succeeded. The process exits non-zero when the session recorded errors.

use clap::{Parser, Subcommand};
use datapack_builder::{BuildOptions, DataPackBuilder, ImportJob, RecordStatus, TypeRegistry};
use std::{path::PathBuf, sync::Arc};

#[derive(Parser)]
#[command(name = "datapack")]
#[command(author, version, about = "A tool for planning DataPack imports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every batch of an import without deploying it
    Plan {
        /// Root of the DataPack tree (`<root>/<Type>/<Name>/`)
        path: PathBuf,

        /// Build options (TOML)
        #[arg(short, long)]
        options: Option<PathBuf>,

        /// DataPack type settings (TOML)
        #[arg(short, long)]
        types: Option<PathBuf>,

        /// Ship header stubs only
        #[arg(long)]
        headers_only: bool,

        /// Print each batch as JSON instead of its keys
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            path,
            options,
            types,
            headers_only,
            json,
        } => {
            let mut options = match options {
                Some(options) => BuildOptions::from_toml_file(options)?,
                None => BuildOptions::default(),
            };
            options.headers_only |= headers_only;
            let types = match types {
                Some(types) => TypeRegistry::from_toml_file(types)?,
                None => TypeRegistry::default(),
            };

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let has_error = runtime.block_on(async {
                let builder = DataPackBuilder::new(Arc::new(types));
                let mut job = ImportJob::new(options);

                let mut batch_count = 0;
                while let Some(batch) = builder.build_import(&path, &mut job).await? {
                    batch_count += 1;
                    println!(
                        "\n=== Batch {batch_count} ({} records, {} bytes) ===",
                        batch.len(),
                        batch.serialized_len()?
                    );
                    if json {
                        println!("{}", serde_json::to_string_pretty(&batch)?);
                    } else {
                        for key in batch.keys() {
                            let label = job
                                .display_labels
                                .get(key)
                                .map_or(key.as_str(), String::as_str);
                            println!("  {label}");
                        }
                    }
                    for key in batch.keys() {
                        job.set_status(key, RecordStatus::Success);
                    }
                }

                println!("\n=== Plan Results ===");
                println!("Batches: {batch_count}");
                println!(
                    "Records: {}",
                    job.current_status.count(RecordStatus::Success)
                );
                println!("Remaining: {}", job.current_status.count(RecordStatus::Ready));
                let errors = job.errors();
                if !errors.is_empty() {
                    println!("\n=== Errors ===");
                    for error in &errors {
                        eprintln!("{error}");
                    }
                }
                Ok::<bool, Box<dyn std::error::Error>>(job.has_error)
            })?;

            if has_error {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
