//! # datapack-builder
//!
//! Assembles an on-disk tree of DataPack records into dependency-ordered, size-bounded import
//! batches.
//!
//! ## Overview
//!
//! A DataPack tree is laid out as `<root>/<Type>/<Name>/`. Each record directory holds a
//! `<Label>_DataPack.json` primary document, optionally a `<Label>_ParentKeys.json` list of the
//! records it depends on, and any number of sibling files its fields refer to by name. The builder
//! re-inlines those sibling files, schedules records so parents ship before their dependents, and
//! packs the result into batches bounded by serialized size and record count.
//!
//! ### Key Features
//!
//! - **Session state**: An [`ImportJob`] carries per-record status across calls, so a caller can
//!   ask for batch after batch and feed deploy outcomes back in
//! - **Dependency gating**: Records wait until every parent has been deployed or is shipping in
//!   the same batch
//! - **Budgets**: Batches respect a maximum serialized size, a maximum record count, per-type
//!   deploy limits and per-type parallelism rules
//! - **Pagination**: Records that hold too many nested records are split into linked pages
//! - **Build-time compilation**: Style sources can be compiled while a batch is assembled; a
//!   failed compile rejects the batch
//!
//! ## Architecture
//!
//! - **[`builder`]**: The import driver ([`DataPackBuilder`]), status initializer and scheduler
//! - **[`codec`]**: Record assembly from sibling files, JSON canonicalization, the compile queue
//!   and build diagnostics
//! - **[`paginate`]**: Splitting oversized records into pages
//! - **[`job`]**: Session state ([`ImportJob`], [`job::StatusTable`])
//! - **[`types`]**: Per-type settings behind the [`DataPackTypes`] trait, loaded from TOML by
//!   [`TypeRegistry`]
//! - **[`config`]**: Build options ([`BuildOptions`])
//! - **[`properties`]**: Keys, statuses and the field names shared with the on-disk format
//! - **[`paths`]** and **[`store`]**: Filesystem lookup and the cached file content
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use datapack_builder::{BuildOptions, DataPackBuilder, ImportJob, RecordStatus, TypeRegistry};
//! use std::{path::Path, sync::Arc};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let types = TypeRegistry::from_toml_file("datapack-types.toml")?;
//!     let options = BuildOptions::from_toml_file("build.toml")?;
//!     let builder = DataPackBuilder::new(Arc::new(types));
//!     let mut job = ImportJob::new(options);
//!
//!     while let Some(batch) = builder.build_import(Path::new("./vlocity"), &mut job).await? {
//!         println!("{} records, {} bytes", batch.len(), batch.serialized_len()?);
//!         for record in &batch.data_packs {
//!             job.set_status(&record.key, RecordStatus::Success);
//!         }
//!     }
//!
//!     for error in job.errors() {
//!         eprintln!("{error}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **default**: The library
//! - **bin**: The `datapack` CLI, which prints the batch plan for a tree without deploying it

pub mod builder;
pub mod codec;
pub mod config;
pub mod error;
pub mod job;
pub mod paginate;
pub mod paths;
pub mod properties;
pub mod record;
pub mod store;
#[cfg(test)]
mod tests;
pub mod types;

pub use builder::DataPackBuilder;
pub use codec::{
    compile_queue::StyleCompiler,
    diagnostic::{BuildDiagnostic, DiagnosticKind},
};
pub use config::BuildOptions;
pub use error::*;
pub use job::ImportJob;
pub use properties::{RecordKey, RecordStatus};
pub use record::{DataPackImport, Record};
pub use types::{DataPackTypes, TypeRegistry};
