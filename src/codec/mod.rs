//! Record content: turning the files of a record directory into deployable JSON.
//!
//! ## Key Components
//!
//! - [`RecordAssembler`] - Re-inlines sibling files into a record's documents
//! - [`canonical`] - Stable, key-sorted serialization of JSON-valued fields
//! - [`CompileQueue`] - Style sources awaiting compilation, drained once per batch
//! - [`BuildDiagnostic`] - Problems found while loading or assembling records
//!
//! A record's primary document names sibling files in its fields. A string field holding a
//! filename is replaced by the file's content (parsed when it is JSON, verbatim otherwise); an
//! array of filenames is replaced by the documents those files hold, each assembled in turn.
//! Missing files are reported and skipped; a file that looks like JSON but does not parse marks
//! the record corrupt.

pub mod assembler;
pub mod canonical;
pub mod compile_queue;
pub mod diagnostic;

pub use assembler::{classify_content, Assembly, ContentKind, RecordAssembler};
pub use canonical::{canonical_json, canonicalize_field};
pub use compile_queue::{
    resolve_include, CompileFailure, CompileJob, CompileOptions, CompileOutcome, CompileQueue,
    CompileStatus, CompiledOutput, StyleCompiler, UnsupportedCompiler,
};
pub use diagnostic::{BuildDiagnostic, DiagnosticKind};
