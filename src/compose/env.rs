//! `.env` file loading

use crate::error::{BerthError, Result};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::Path;

/// Default env file name, looked up in the project directory
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Parse the contents of an env file
pub fn parse_env_str(content: &str) -> Result<IndexMap<String, String>> {
    dotenvy::from_read_iter(content.as_bytes())
        .map(|item| item.map_err(|e| env_file_error("<string>", e)))
        .collect()
}

/// Load an env file from disk, keeping declaration order
pub fn load_env_file(path: &Path) -> Result<IndexMap<String, String>> {
    let source = path.display().to_string();
    dotenvy::from_path_iter(path)
        .map_err(|e| env_file_error(&source, e))?
        .map(|item| item.map_err(|e| env_file_error(&source, e)))
        .collect()
}

/// Process environment as UTF-8 pairs. Variables whose name or value is not
/// valid UTF-8 cannot take part in interpolation and are skipped.
pub fn process_environment() -> HashMap<String, String> {
    let mut env = HashMap::new();
    for (key, value) in std::env::vars_os() {
        match (key.to_str(), value.to_str()) {
            (Some(k), Some(v)) => {
                env.insert(k.to_string(), v.to_string());
            }
            _ => tracing::warn!(
                "Ignoring environment variable {} with a non-UTF-8 name or value",
                key.to_string_lossy()
            ),
        }
    }
    env
}

/// Build the interpolation environment from the env file and the current
/// process environment.
pub fn load_environment(explicit: Option<&Path>, project_dir: &Path) -> Result<HashMap<String, String>> {
    load_environment_with(explicit, project_dir, process_environment())
}

/// Like [`load_environment`], with the process environment supplied by the
/// caller. The env file (explicit, or the default `.env` when present) is
/// overridden by `process`.
pub fn load_environment_with(
    explicit: Option<&Path>,
    project_dir: &Path,
    process: HashMap<String, String>,
) -> Result<HashMap<String, String>> {
    let mut env: HashMap<String, String> = HashMap::new();

    let file_vars = match explicit {
        Some(path) => {
            tracing::debug!("Loading env file {}", path.display());
            load_env_file(path)?
        }
        None => {
            let default = project_dir.join(DEFAULT_ENV_FILE);
            if default.is_file() {
                tracing::debug!("Loading env file {}", default.display());
                load_env_file(&default)?
            } else {
                IndexMap::new()
            }
        }
    };

    env.extend(file_vars);
    env.extend(process);

    Ok(env)
}

fn env_file_error(source: &str, e: dotenvy::Error) -> BerthError {
    BerthError::EnvFile {
        path: source.to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_env_str() {
        let content = r#"
# comment
PLAIN=value
export EXPORTED=yes
COMMENTED=padded   # trailing comment
DOUBLE="line\nbreak \"quoted\""
SINGLE='literal $HOME \n'
EMPTY=
"#;

        let vars = parse_env_str(content).unwrap();
        assert_eq!(vars["PLAIN"], "value");
        assert_eq!(vars["EXPORTED"], "yes");
        assert_eq!(vars["COMMENTED"], "padded");
        assert_eq!(vars["DOUBLE"], "line\nbreak \"quoted\"");
        assert_eq!(vars["SINGLE"], r"literal $HOME \n");
        assert_eq!(vars["EMPTY"], "");

        let keys: Vec<_> = vars.keys().cloned().collect();
        assert_eq!(keys, vec!["PLAIN", "EXPORTED", "COMMENTED", "DOUBLE", "SINGLE", "EMPTY"]);
    }

    #[test]
    fn test_parse_env_errors() {
        assert!(matches!(parse_env_str("NOEQUALS"), Err(BerthError::EnvFile { .. })));
        assert!(parse_env_str("OK=1\nQ=\"open").is_err());
    }

    #[test]
    fn test_load_environment_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join(DEFAULT_ENV_FILE)).unwrap();
        writeln!(f, "BERTH_TEST_ONLY_IN_FILE=from-file").unwrap();

        let env = load_environment(None, dir.path()).unwrap();
        assert_eq!(env.get("BERTH_TEST_ONLY_IN_FILE").map(String::as_str), Some("from-file"));
    }

    #[test]
    fn test_load_environment_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.env");
        assert!(matches!(
            load_environment(Some(&missing), dir.path()),
            Err(BerthError::EnvFile { .. })
        ));
        assert!(load_environment(None, dir.path()).is_ok());
    }

    #[test]
    fn test_process_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_ENV_FILE),
            "BERTH_TEST_SHARED=from-file\nBERTH_TEST_FILE_ONLY=kept\n",
        )
        .unwrap();

        let mut process = HashMap::new();
        process.insert("BERTH_TEST_SHARED".to_string(), "from-process".to_string());

        let env = load_environment_with(None, dir.path(), process).unwrap();
        assert_eq!(env["BERTH_TEST_SHARED"], "from-process");
        assert_eq!(env["BERTH_TEST_FILE_ONLY"], "kept");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_process_variable_is_skipped() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let key = "BERTH_TEST_NON_UTF8_VALUE";
        std::env::set_var(key, OsString::from_vec(vec![0xff, 0xfe]));

        let dir = tempfile::tempdir().unwrap();
        let result = load_environment(None, dir.path());
        std::env::remove_var(key);

        let env = result.unwrap();
        assert!(!env.contains_key(key));
    }
}
