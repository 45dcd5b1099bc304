//! Compose file parser

use super::config::{
    ComposeConfig, DependsOnConfig, EnvironmentConfig, LabelsConfig, NetworksConfig, PortConfig,
    ScalarValue, ServiceConfig, VolumeMount,
};
use super::interpolate::Interpolator;
use super::volumes::VolumeBinding;
use crate::error::{BerthError, Result};
use indexmap::IndexMap;
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default compose file names, in lookup order
pub const DEFAULT_COMPOSE_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Compose file parser
pub struct ComposeParser;

impl ComposeParser {
    /// Find compose file in directory
    pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
        DEFAULT_COMPOSE_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Parse compose file from path, interpolating with `env` when given
    pub fn parse_file_with_env(path: &Path, env: Option<&HashMap<String, String>>) -> Result<ComposeConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BerthError::ComposeParse(format!("Failed to read {}: {}", path.display(), e))
        })?;

        tracing::debug!("Parsing compose file {}", path.display());
        let value = Self::load_value(&content)?;
        Self::decode(value, env).map_err(|e| match e {
            BerthError::ComposeParse(msg) => {
                BerthError::ComposeParse(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Parse compose file from string, without interpolation
    pub fn parse_str(content: &str) -> Result<ComposeConfig> {
        Self::decode(Self::load_value(content)?, None)
    }

    /// Parse compose file from string, interpolating variables from `env`
    pub fn parse_str_with_env(content: &str, env: &HashMap<String, String>) -> Result<ComposeConfig> {
        Self::decode(Self::load_value(content)?, Some(env))
    }

    /// Parse and merge several files; later files override earlier ones
    pub fn parse_files(paths: &[PathBuf], env: Option<&HashMap<String, String>>) -> Result<ComposeConfig> {
        let mut config = ComposeConfig::default();

        for path in paths {
            let file_config = Self::parse_file_with_env(path, env)?;
            config = Self::merge_configs(config, file_config);
        }

        Ok(config)
    }

    fn load_value(content: &str) -> Result<Value> {
        let mut value: Value = serde_yaml::from_str(content)
            .map_err(|e| BerthError::ComposeParse(format!("Failed to parse YAML: {}", e)))?;

        match value {
            Value::Null => Err(BerthError::ComposeParse("document is empty".to_string())),
            Value::Mapping(_) => {
                value
                    .apply_merge()
                    .map_err(|e| BerthError::ComposeParse(format!("Failed to apply merge keys: {}", e)))?;
                Ok(value)
            }
            _ => Err(BerthError::ComposeParse(
                "top-level element must be a mapping".to_string(),
            )),
        }
    }

    fn decode(mut value: Value, env: Option<&HashMap<String, String>>) -> Result<ComposeConfig> {
        if let Some(env) = env {
            Interpolator::new(env)?.interpolate_value(&mut value)?;
        }

        serde_yaml::from_value(value)
            .map_err(|e| BerthError::ComposeParse(format!("Invalid compose document: {}", e)))
    }

    /// Merge two compose configurations
    pub fn merge_configs(base: ComposeConfig, overlay: ComposeConfig) -> ComposeConfig {
        let mut result = base;

        if overlay.version.is_some() {
            result.version = overlay.version;
        }

        if overlay.name.is_some() {
            result.name = overlay.name;
        }

        for (name, service) in overlay.services {
            match result.services.get_mut(&name) {
                Some(existing) => merge_service(existing, service),
                None => {
                    result.services.insert(name, service);
                }
            }
        }

        result.networks.extend(overlay.networks);
        result.volumes.extend(overlay.volumes);
        result.extensions.extend(overlay.extensions);

        result
    }

    /// Serialize back to YAML
    pub fn to_yaml(config: &ComposeConfig) -> Result<String> {
        Ok(serde_yaml::to_string(config)?)
    }

    /// Serialize to pretty JSON
    pub fn to_json(config: &ComposeConfig) -> Result<String> {
        Ok(serde_json::to_string_pretty(config)?)
    }
}

fn merge_service(base: &mut ServiceConfig, overlay: ServiceConfig) {
    macro_rules! replace {
        ($($field:ident),*) => {
            $(if overlay.$field.is_some() {
                base.$field = overlay.$field;
            })*
        };
    }

    replace!(
        image,
        build,
        command,
        entrypoint,
        container_name,
        hostname,
        env_file,
        deploy,
        restart,
        working_dir
    );

    if let Some(env) = overlay.environment {
        let mut merged = base.environment.as_ref().map(EnvironmentConfig::to_map).unwrap_or_default();
        merged.extend(env.to_map());
        base.environment = Some(EnvironmentConfig::Map(
            merged
                .into_iter()
                .map(|(k, v)| (k, v.map(ScalarValue::String)))
                .collect(),
        ));
    }

    if let Some(labels) = overlay.labels {
        let mut merged = base.labels.as_ref().map(LabelsConfig::to_map).unwrap_or_default();
        merged.extend(labels.to_map());
        base.labels = Some(LabelsConfig::Map(
            merged.into_iter().map(|(k, v)| (k, ScalarValue::String(v))).collect(),
        ));
    }

    if let Some(ports) = overlay.ports {
        let merged: &mut Vec<PortConfig> = base.ports.get_or_insert_with(Vec::new);
        for port in ports {
            if !merged.contains(&port) {
                merged.push(port);
            }
        }
    }

    if let Some(volumes) = overlay.volumes {
        let merged: &mut Vec<VolumeMount> = base.volumes.get_or_insert_with(Vec::new);
        for volume in volumes {
            let target = volume_target(&volume);
            let existing = merged
                .iter()
                .position(|v| target.is_some() && volume_target(v) == target);
            match existing {
                Some(idx) => merged[idx] = volume,
                None => merged.push(volume),
            }
        }
    }

    if let Some(depends) = overlay.depends_on {
        base.depends_on = Some(match (base.depends_on.take(), depends) {
            (Some(DependsOnConfig::Map(mut a)), DependsOnConfig::Map(b)) => {
                a.extend(b);
                DependsOnConfig::Map(a)
            }
            (Some(DependsOnConfig::Map(mut a)), DependsOnConfig::Array(b)) => {
                for name in b {
                    a.entry(name).or_default();
                }
                DependsOnConfig::Map(a)
            }
            (Some(DependsOnConfig::Array(a)), DependsOnConfig::Map(b)) => {
                let mut map: IndexMap<_, _> = a.into_iter().map(|n| (n, Default::default())).collect();
                map.extend(b);
                DependsOnConfig::Map(map)
            }
            (Some(DependsOnConfig::Array(a)), DependsOnConfig::Array(b)) => {
                DependsOnConfig::Array(union(a, b))
            }
            (None, overlay) => overlay,
        });
    }

    if let Some(networks) = overlay.networks {
        base.networks = Some(match (base.networks.take(), networks) {
            (Some(NetworksConfig::Array(a)), NetworksConfig::Array(b)) => NetworksConfig::Array(union(a, b)),
            (Some(existing), overlay) => {
                let mut map = match existing {
                    NetworksConfig::Map(map) => map,
                    NetworksConfig::Array(arr) => arr.into_iter().map(|n| (n, None)).collect(),
                };
                match overlay {
                    NetworksConfig::Map(b) => map.extend(b),
                    NetworksConfig::Array(b) => {
                        for name in b {
                            map.entry(name).or_insert(None);
                        }
                    }
                }
                NetworksConfig::Map(map)
            }
            (None, overlay) => overlay,
        });
    }

    if let Some(profiles) = overlay.profiles {
        let existing = base.profiles.take().unwrap_or_default();
        base.profiles = Some(union(existing, profiles));
    }

    base.extra.extend(overlay.extra);
}

fn volume_target(volume: &VolumeMount) -> Option<String> {
    VolumeBinding::from_config(volume).ok().map(|v| v.target)
}

fn union(mut a: Vec<String>, b: Vec<String>) -> Vec<String> {
    for item in b {
        if !a.contains(&item) {
            a.push(item);
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::config::CommandConfig;

    const DESCRIPTOR: &str = r#"
version: "3.3"
services:
  app:
    build:
      context: .
      dockerfile: ./Dockerfile
      target: build-image
      args:
        POETRY_INSTALL_ARGS: "--with=dev,docs,lint"
    ports:
      - "8000:8000"
    volumes:
      - ./src:/workspace/app/src/
    command: app run-all --http --reload
  localmail:
    image: mailhog/mailhog:v1.0.0
    container_name: localmail
    ports:
      - "8025:8025"
"#;

    #[test]
    fn test_parse_simple_compose() {
        let config = ComposeParser::parse_str(DESCRIPTOR).unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.version_str().as_deref(), Some("3.3"));
        let names: Vec<_> = config.services.keys().cloned().collect();
        assert_eq!(names, vec!["app", "localmail"]);
        assert_eq!(
            config.services["localmail"].container_name.as_deref(),
            Some("localmail")
        );
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let config = ComposeParser::parse_str(DESCRIPTOR).unwrap();
        let yaml = ComposeParser::to_yaml(&config).unwrap();
        let reparsed = ComposeParser::parse_str(&yaml).unwrap();
        assert_eq!(config, reparsed);

        let json = ComposeParser::to_json(&config).unwrap();
        let from_json: ComposeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, from_json);
    }

    #[test]
    fn test_extensions_and_merge_keys() {
        let yaml = r#"
x-common: &common
  restart: unless-stopped
services:
  web:
    <<: *common
    image: nginx
"#;
        let config = ComposeParser::parse_str(yaml).unwrap();
        assert!(config.extensions.contains_key("x-common"));
        assert_eq!(config.services["web"].restart.as_deref(), Some("unless-stopped"));
    }

    #[test]
    fn test_rejects_empty_and_non_mapping() {
        assert!(matches!(ComposeParser::parse_str(""), Err(BerthError::ComposeParse(_))));
        assert!(ComposeParser::parse_str("- a\n- b\n").is_err());
        assert!(ComposeParser::parse_str("services: [oops\n").is_err());
        assert!(ComposeParser::parse_str("services:\n  web:\n    ports: 8000\n").is_err());
    }

    #[test]
    fn test_parse_with_env() {
        let mut env = HashMap::new();
        env.insert("MAILHOG_TAG".to_string(), "v1.0.0".to_string());
        let config = ComposeParser::parse_str_with_env(
            "services:\n  localmail:\n    image: mailhog/mailhog:${MAILHOG_TAG}\n",
            &env,
        )
        .unwrap();
        assert_eq!(
            config.services["localmail"].image.as_deref(),
            Some("mailhog/mailhog:v1.0.0")
        );
    }

    #[test]
    fn test_merge_override() {
        let base = ComposeParser::parse_str(DESCRIPTOR).unwrap();
        let overlay = ComposeParser::parse_str(
            r#"
services:
  app:
    command: ["app", "run-all"]
    environment:
      DEBUG: "false"
    ports:
      - "8000:8000"
      - "9000:9000"
    volumes:
      - ./src:/workspace/app/src/:ro
    depends_on:
      - localmail
  worker:
    image: worker:latest
"#,
        )
        .unwrap();

        let merged = ComposeParser::merge_configs(base, overlay);
        let app = &merged.services["app"];
        assert_eq!(
            app.command,
            Some(CommandConfig::Exec(vec!["app".to_string(), "run-all".to_string()]))
        );
        assert!(app.build.is_some());
        assert_eq!(app.ports.as_ref().unwrap().len(), 2);
        let volumes = app.volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0], VolumeMount::Short("./src:/workspace/app/src/:ro".to_string()));
        assert_eq!(app.dependencies(), vec!["localmail"]);
        assert_eq!(app.environment_map()["DEBUG"].as_deref(), Some("false"));

        let names: Vec<_> = merged.services.keys().cloned().collect();
        assert_eq!(names, vec!["app", "localmail", "worker"]);
    }

    #[test]
    fn test_parse_files_and_discovery() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ComposeParser::find_compose_file(dir.path()).is_none());

        let main = dir.path().join("docker-compose.yml");
        let over = dir.path().join("docker-compose.override.yml");
        std::fs::write(&main, DESCRIPTOR).unwrap();
        std::fs::write(&over, "services:\n  localmail:\n    restart: always\n").unwrap();

        assert_eq!(ComposeParser::find_compose_file(dir.path()), Some(main.clone()));

        let config = ComposeParser::parse_files(&[main, over], None).unwrap();
        assert_eq!(config.services["localmail"].restart.as_deref(), Some("always"));
        assert_eq!(
            config.services["localmail"].image.as_deref(),
            Some("mailhog/mailhog:v1.0.0")
        );
    }
}
