//! Project loading: file discovery, environment, merging and naming

use super::config::ComposeConfig;
use super::env::{load_environment_with, process_environment};
use super::parser::ComposeParser;
use super::plan::{normalize_project_name, ActivationPlan};
use super::validate::{Diagnostics, Validator};
use crate::error::{BerthError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable that names the project
pub const PROJECT_NAME_VAR: &str = "COMPOSE_PROJECT_NAME";

/// How to locate and load a project
#[derive(Debug, Clone, Default)]
pub struct ProjectOptions {
    /// Compose files, merged in order. Empty means discovery.
    pub files: Vec<PathBuf>,
    pub project_name: Option<String>,
    pub project_directory: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// A loaded, interpolated and merged project
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
    pub config: ComposeConfig,
    pub environment: HashMap<String, String>,
}

impl Project {
    pub fn load(options: &ProjectOptions, working_dir: &Path) -> Result<Self> {
        Self::load_with_env(options, working_dir, process_environment())
    }

    /// Load with an explicit process environment, which overrides the env file
    pub fn load_with_env(
        options: &ProjectOptions,
        working_dir: &Path,
        process_env: HashMap<String, String>,
    ) -> Result<Self> {
        let files = resolve_files(options, working_dir)?;

        let directory = match &options.project_directory {
            Some(dir) => working_dir.join(dir),
            None => files
                .first()
                .and_then(|f| f.parent())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| working_dir.to_path_buf()),
        };

        let env_file = options.env_file.as_ref().map(|f| working_dir.join(f));
        let environment = load_environment_with(env_file.as_deref(), &directory, process_env)?;

        let config = ComposeParser::parse_files(&files, Some(&environment))?;

        let raw_name = options
            .project_name
            .clone()
            .or_else(|| environment.get(PROJECT_NAME_VAR).cloned())
            .or_else(|| config.name.clone())
            .or_else(|| {
                directory
                    .file_name()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "default".to_string());
        let name = normalize_project_name(&raw_name)?;

        tracing::info!(
            "Loaded project {} from {} file(s) with {} service(s)",
            name,
            files.len(),
            config.services.len()
        );

        Ok(Self {
            name,
            directory,
            files,
            config,
            environment,
        })
    }

    pub fn validate(&self) -> Diagnostics {
        Validator::validate(&self.config)
    }

    /// Validate, then derive the activation plan
    pub fn plan(&self) -> Result<ActivationPlan> {
        let warnings = self.validate().into_result()?;
        for warning in &warnings {
            tracing::debug!("{}", warning);
        }
        ActivationPlan::build(&self.name, &self.directory, &self.config)
    }
}

fn resolve_files(options: &ProjectOptions, working_dir: &Path) -> Result<Vec<PathBuf>> {
    if !options.files.is_empty() {
        return Ok(options.files.iter().map(|f| working_dir.join(f)).collect());
    }

    let search_dir = options
        .project_directory
        .as_ref()
        .map(|d| working_dir.join(d))
        .unwrap_or_else(|| working_dir.to_path_buf());

    let main = ComposeParser::find_compose_file(&search_dir)
        .ok_or_else(|| BerthError::ComposeFileNotFound(search_dir.display().to_string()))?;

    let mut files = vec![main.clone()];
    if let Some(override_file) = override_file(&main).filter(|p| p.is_file()) {
        tracing::debug!("Including override file {}", override_file.display());
        files.push(override_file);
    }

    Ok(files)
}

/// `compose.yaml` -> `compose.override.yaml`
fn override_file(main: &Path) -> Option<PathBuf> {
    let stem = main.file_stem()?.to_str()?;
    let ext = main.extension()?.to_str()?;
    Some(main.with_file_name(format!("{}.override.{}", stem, ext)))
}
