//! Diagnostic types recorded while building an import.
//!
//! Per-record failures never abort a build. They are recorded on the
//! [`ImportJob`](crate::job::ImportJob) as [`BuildDiagnostic`]s carrying the owning key, and the
//! scheduler decides what happens to that key's status.

use crate::properties::RecordKey;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A referenced file is absent. The field is left unset and processing continues.
    MissingFile,
    /// A referenced file is not valid JSON. The owning record is marked `Error`.
    CorruptDocument,
    /// The style compiler rejected a source. The containing batch is rejected.
    CompileFailure,
    /// An explicit manifest key matched nothing on disk.
    ManifestKeyMissing,
    /// A record directory could not be loaded during initialization.
    LoadFailure,
    /// A record could not be formatted for deploy while scheduling.
    FormatFailure,
}

impl DiagnosticKind {
    /// Whether this kind flags the session as having errors.
    pub fn is_error(&self) -> bool {
        !matches!(self, DiagnosticKind::MissingFile)
    }

    fn label(&self) -> &'static str {
        match self {
            DiagnosticKind::MissingFile => "File Does Not Exist",
            DiagnosticKind::CorruptDocument => "Corrupt File",
            DiagnosticKind::CompileFailure => "Compilation Error",
            DiagnosticKind::ManifestKeyMissing => "Manifest Item Missing",
            DiagnosticKind::LoadFailure => "Error Loading",
            DiagnosticKind::FormatFailure => "Error Formatting Deploy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildDiagnostic {
    pub kind: DiagnosticKind,
    /// Record the diagnostic belongs to. Manifest entries that matched nothing carry the entry.
    pub key: RecordKey,
    pub message: String,
}

impl BuildDiagnostic {
    pub fn new(kind: DiagnosticKind, key: RecordKey, message: impl Into<String>) -> Self {
        BuildDiagnostic {
            kind,
            key,
            message: message.into(),
        }
    }

    pub fn missing_file(key: &RecordKey, path: impl Display) -> Self {
        Self::new(DiagnosticKind::MissingFile, key.clone(), format!("{path}"))
    }

    pub fn corrupt_document(key: &RecordKey, path: impl Display) -> Self {
        Self::new(DiagnosticKind::CorruptDocument, key.clone(), format!("{path}"))
    }

    pub fn is_error(&self) -> bool {
        self.kind.is_error()
    }
}

impl Display for BuildDiagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} >> {} - {}", self.kind.label(), self.key, self.message)
    }
}
