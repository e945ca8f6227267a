use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::read_to_string,
    path::{Path, PathBuf},
};

pub const DEFAULT_MAX_IMPORT_SIZE: usize = 2_000_000;
pub const DEFAULT_MAX_DEPLOY_COUNT: usize = 20;

/// Options recognized by one import session.
///
/// Every field is optional in the TOML form:
///
/// ```toml
/// max_import_size = 1500000
/// max_deploy_count = 10
/// compile_on_build = true
/// manifest_keys = ["DataRaptor/LoadAccounts", "OmniScript"]
///
/// [manifest_objects]
/// VlocityUITemplate = ["cardHeader"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Serialized byte budget for one batch.
    pub max_import_size: usize,
    /// Record budget for one batch.
    pub max_deploy_count: usize,
    /// Emit one record per call without pagination, batching or dependency gating.
    pub single_file: bool,
    /// Ship header stubs only, to break circular references.
    pub headers_only: bool,
    /// Ignore parent readiness entirely.
    pub force_deploy: bool,
    /// With `force_deploy`, drop parent lists from emitted records.
    pub ignore_all_parents: bool,
    /// Explicit keys, or bare type names, admitted into the session.
    pub manifest_keys: Option<Vec<String>>,
    /// Type → names admitted into the session.
    pub manifest_objects: Option<BTreeMap<String, Vec<String>>>,
    /// Type directories to consider at all. `None` admits every type.
    pub allowed_types: Option<BTreeSet<String>>,
    pub compile_on_build: bool,
    pub disable_pagination: bool,
    /// Sub-path appended to the import root.
    pub expansion_path: Option<PathBuf>,
    /// Discard cached file data before the next build.
    pub reset_file_data: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            max_import_size: DEFAULT_MAX_IMPORT_SIZE,
            max_deploy_count: DEFAULT_MAX_DEPLOY_COUNT,
            single_file: false,
            headers_only: false,
            force_deploy: false,
            ignore_all_parents: false,
            manifest_keys: None,
            manifest_objects: None,
            allowed_types: None,
            compile_on_build: false,
            disable_pagination: false,
            expansion_path: None,
            reset_file_data: false,
        }
    }
}

impl BuildOptions {
    pub fn from_toml_str(content: &str) -> Result<Self, BuildError> {
        let options: BuildOptions = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, BuildError> {
        tracing::debug!("Reading build options from: {:?}", path.as_ref());
        Self::from_toml_str(&get_content(path)?)
    }

    /// Count cap for one batch; headers-only passes ship one stub at a time.
    pub fn effective_max_count(&self) -> usize {
        if self.headers_only && !self.force_deploy {
            1
        } else {
            self.max_deploy_count
        }
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.max_import_size == 0 {
            return Err(BuildError::Config(
                "max_import_size must be greater than zero".to_string(),
            ));
        }
        if self.max_deploy_count == 0 {
            return Err(BuildError::Config(
                "max_deploy_count must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn get_content<P: AsRef<Path>>(path: P) -> Result<String, BuildError> {
    tracing::debug!("Reading {:?}", path.as_ref());
    Ok(read_to_string(path)?)
}
