//! Consistency checks on a parsed compose descriptor

use super::config::{ComposeConfig, Provisioning, ServiceConfig};
use super::plan::start_waves;
use super::ports::{HostPort, PortBinding};
use super::volumes::VolumeBinding;
use crate::error::{BerthError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Schema versions Berth understands
const SUPPORTED_VERSIONS: &[&str] = &[
    "2", "2.0", "2.1", "2.2", "2.3", "2.4", "3", "3.0", "3.1", "3.2", "3.3", "3.4", "3.5", "3.6",
    "3.7", "3.8", "3.9",
];

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub service: Option<String>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.service {
            Some(service) => write!(f, "{}: service '{}': {}", self.severity, service, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Collected findings, in discovery order
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    fn push(&mut self, severity: Severity, service: Option<&str>, message: impl Into<String>) {
        self.0.push(Diagnostic {
            severity,
            service: service.map(str::to_string),
            message: message.into(),
        });
    }

    fn error(&mut self, service: Option<&str>, message: impl Into<String>) {
        self.push(Severity::Error, service, message);
    }

    fn warning(&mut self, service: Option<&str>, message: impl Into<String>) {
        self.push(Severity::Warning, service, message);
    }

    fn info(&mut self, service: Option<&str>, message: impl Into<String>) {
        self.push(Severity::Info, service, message);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(move |d| d.severity == severity)
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Fail on any error; otherwise hand back the remaining findings
    pub fn into_result(self) -> Result<Vec<Diagnostic>> {
        let (errors, rest): (Vec<_>, Vec<_>) =
            self.0.into_iter().partition(|d| d.severity == Severity::Error);

        if errors.is_empty() {
            Ok(rest)
        } else {
            Err(BerthError::Validation(errors.iter().map(ToString::to_string).collect()))
        }
    }
}

/// Compose descriptor validator
pub struct Validator;

impl Validator {
    pub fn validate(config: &ComposeConfig) -> Diagnostics {
        let mut diags = Diagnostics::default();

        Self::check_version(config, &mut diags);

        if config.services.is_empty() {
            diags.warning(None, "no services are defined");
        }

        let mut claims: Vec<(String, HostPort)> = Vec::new();
        let mut container_names: HashMap<&str, &str> = HashMap::new();

        for (name, service) in &config.services {
            Self::check_name(name, &mut diags);
            Self::check_provisioning(name, service, &mut diags);
            Self::check_command(name, service, &mut diags);
            Self::check_ports(name, service, &mut claims, &mut diags);
            Self::check_volumes(config, name, service, &mut diags);
            Self::check_networks(config, name, service, &mut diags);

            if let Some(container_name) = service.container_name.as_deref() {
                if let Some(other) = container_names.insert(container_name, name) {
                    diags.error(
                        Some(name),
                        format!(
                            "container_name '{}' is already used by service '{}'",
                            container_name, other
                        ),
                    );
                }
                if service.replicas() > 1 {
                    diags.error(
                        Some(name),
                        format!(
                            "container_name '{}' cannot be used with {} replicas",
                            container_name,
                            service.replicas()
                        ),
                    );
                }
            }
        }

        Self::check_port_conflicts(&claims, &mut diags);
        Self::check_dependencies(config, &mut diags);

        diags
    }

    fn check_version(config: &ComposeConfig, diags: &mut Diagnostics) {
        if let Some(version) = config.version_str() {
            if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
                diags.warning(None, format!("unrecognised schema version '{}'", version));
            }
        }
    }

    fn check_name(name: &str, diags: &mut Diagnostics) {
        let mut chars = name.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if !valid {
            diags.error(
                Some(name),
                "service name must match [a-zA-Z0-9][a-zA-Z0-9_.-]*",
            );
        }
    }

    fn check_provisioning(name: &str, service: &ServiceConfig, diags: &mut Diagnostics) {
        match service.provisioning(name) {
            Ok(Provisioning::Image(image)) => {
                if image.trim().is_empty() {
                    diags.error(Some(name), "image reference is empty");
                }
            }
            Ok(Provisioning::Build(spec)) => {
                if spec.context.trim().is_empty() {
                    diags.error(Some(name), "build context is empty");
                }
                if spec.dockerfile.trim().is_empty() {
                    diags.error(Some(name), "dockerfile path is empty");
                }
                if spec.args.keys().any(|k| k.trim().is_empty()) {
                    diags.error(Some(name), "build argument with an empty name");
                }
            }
            Err(e) => diags.error(Some(name), e.to_string()),
        }
    }

    fn check_command(name: &str, service: &ServiceConfig, diags: &mut Diagnostics) {
        match service.command_tokens() {
            Ok(Some(tokens)) if tokens.is_empty() => {
                diags.warning(Some(name), "command override is empty");
            }
            Ok(_) => {}
            Err(e) => diags.error(Some(name), e.to_string()),
        }
    }

    fn check_ports(
        name: &str,
        service: &ServiceConfig,
        claims: &mut Vec<(String, HostPort)>,
        diags: &mut Diagnostics,
    ) {
        let replicas = service.replicas();

        for port in service.ports.iter().flatten() {
            let binding = match PortBinding::from_config(port) {
                Ok(binding) => binding,
                Err(e) => {
                    diags.error(Some(name), e.to_string());
                    continue;
                }
            };

            let host_ports = binding.host_ports();
            if replicas > 1 && !host_ports.is_empty() {
                diags.error(
                    Some(name),
                    format!(
                        "publishes fixed host port(s) {} but runs {} replicas",
                        binding, replicas
                    ),
                );
            }

            for hp in host_ports {
                claims.push((name.to_string(), hp));
            }
        }
    }

    fn check_port_conflicts(claims: &[(String, HostPort)], diags: &mut Diagnostics) {
        for (i, (svc_a, a)) in claims.iter().enumerate() {
            for (svc_b, b) in &claims[i + 1..] {
                if a.conflicts_with(b) {
                    let message = if svc_a == svc_b {
                        format!("host port {} is published twice", b)
                    } else {
                        format!("host port {} is already published by service '{}'", b, svc_a)
                    };
                    diags.error(Some(svc_b), message);
                }
            }
        }
    }

    fn check_volumes(config: &ComposeConfig, name: &str, service: &ServiceConfig, diags: &mut Diagnostics) {
        for volume in service.volumes.iter().flatten() {
            let binding = match VolumeBinding::from_config(volume) {
                Ok(binding) => binding,
                Err(e) => {
                    diags.error(Some(name), e.to_string());
                    continue;
                }
            };

            if let Some(volume_name) = binding.volume_name() {
                if !config.volumes.contains_key(volume_name) {
                    diags.warning(
                        Some(name),
                        format!("references undefined volume '{}'", volume_name),
                    );
                }
            }

            if binding.is_bind() && !binding.read_only {
                diags.info(
                    Some(name),
                    format!(
                        "bind mount {} -> {} is read-write; the container can modify host files",
                        binding.source.as_deref().unwrap_or_default(),
                        binding.target
                    ),
                );
            }
        }
    }

    fn check_networks(config: &ComposeConfig, name: &str, service: &ServiceConfig, diags: &mut Diagnostics) {
        if let Some(networks) = &service.networks {
            for net in networks.names() {
                if net != "default" && !config.networks.contains_key(&net) {
                    diags.warning(Some(name), format!("references undefined network '{}'", net));
                }
            }
        }
    }

    fn check_dependencies(config: &ComposeConfig, diags: &mut Diagnostics) {
        let mut resolvable = true;

        for (name, service) in &config.services {
            for dep in service.dependencies() {
                if &dep == name {
                    diags.error(Some(name), "depends on itself");
                    resolvable = false;
                } else if !config.services.contains_key(&dep) {
                    diags.error(Some(name), format!("depends on unknown service '{}'", dep));
                    resolvable = false;
                }
            }
        }

        if !resolvable {
            return;
        }

        match start_waves(config) {
            Ok(waves) => {
                for wave in waves.iter().filter(|w| w.len() > 1) {
                    diags.info(
                        None,
                        format!(
                            "services {} declare no ordering between them and will be activated concurrently",
                            wave.join(", ")
                        ),
                    );
                }
            }
            Err(e) => diags.error(None, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::parser::ComposeParser;

    fn validate(yaml: &str) -> Diagnostics {
        Validator::validate(&ComposeParser::parse_str(yaml).unwrap())
    }

    fn messages(diags: &Diagnostics, severity: Severity) -> Vec<String> {
        diags.with_severity(severity).map(ToString::to_string).collect()
    }

    #[test]
    fn test_validate_missing_image() {
        let diags = validate("services:\n  web:\n    ports:\n      - \"80:80\"\n");
        assert!(diags.has_errors());
        assert!(diags.into_result().is_err());
    }

    #[test]
    fn test_validate_both_image_and_build() {
        let diags = validate("services:\n  web:\n    image: nginx\n    build: .\n");
        let errors = messages(&diags, Severity::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("both are declared"));
    }

    #[test]
    fn test_validate_host_port_conflict() {
        let diags = validate(
            r#"
services:
  app:
    image: app
    ports: ["8000:8000"]
  other:
    image: other
    ports: ["127.0.0.1:8000:80"]
  udp:
    image: udp
    ports: ["8000:8000/udp"]
"#,
        );
        let errors = messages(&diags, Severity::Error);
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert!(errors[0].contains("service 'other'"));
        assert!(errors[0].contains("'app'"));
    }

    #[test]
    fn test_validate_ranges_overlap() {
        let diags = validate(
            "services:\n  a:\n    image: a\n    ports: [\"9000-9005:9000-9005\"]\n  b:\n    image: b\n    ports: [\"9003:80\"]\n",
        );
        assert!(diags.has_errors());
    }

    #[test]
    fn test_validate_replicas_with_fixed_port() {
        let diags = validate(
            "services:\n  web:\n    image: nginx\n    ports: [\"80:80\"]\n    deploy:\n      replicas: 2\n",
        );
        assert!(diags.has_errors());

        let ephemeral = validate(
            "services:\n  web:\n    image: nginx\n    ports: [\"80\"]\n    deploy:\n      replicas: 2\n",
        );
        assert!(!ephemeral.has_errors());
    }

    #[test]
    fn test_validate_dependencies() {
        let unknown = validate("services:\n  web:\n    image: nginx\n    depends_on: [db]\n");
        assert!(messages(&unknown, Severity::Error)[0].contains("unknown service 'db'"));

        let cycle = validate(
            "services:\n  a:\n    image: x\n    depends_on: [b]\n  b:\n    image: x\n    depends_on: [a]\n",
        );
        assert!(messages(&cycle, Severity::Error)[0].contains("Circular dependency"));

        let own = validate("services:\n  a:\n    image: x\n    depends_on: [a]\n");
        assert!(messages(&own, Severity::Error)[0].contains("depends on itself"));
    }

    #[test]
    fn test_validate_concurrent_activation_note() {
        let diags = validate("services:\n  app:\n    image: a\n  localmail:\n    image: b\n");
        let infos = messages(&diags, Severity::Info);
        assert_eq!(infos.len(), 1);
        assert!(infos[0].contains("app, localmail"));
        assert!(!diags.has_errors());
    }

    #[test]
    fn test_validate_volumes() {
        let diags = validate(
            r#"
services:
  db:
    image: postgres
    volumes:
      - pgdata:/var/lib/postgresql/data
      - undeclared:/backup
      - ./init:/docker-entrypoint-initdb.d:ro
      - ./conf:/etc/postgresql
      - ./bad:relative
volumes:
  pgdata:
"#,
        );
        let warnings = messages(&diags, Severity::Warning);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("undeclared"));

        let infos = messages(&diags, Severity::Info);
        assert_eq!(infos.len(), 1);
        assert!(infos[0].contains("./conf"));

        assert_eq!(messages(&diags, Severity::Error).len(), 1);
    }

    #[test]
    fn test_validate_names_and_container_names() {
        let diags = validate(
            r#"
services:
  "-bad":
    image: x
  a:
    image: x
    container_name: shared
  b:
    image: x
    container_name: shared
"#,
        );
        let errors = messages(&diags, Severity::Error);
        assert_eq!(errors.len(), 2, "{:?}", errors);
    }

    #[test]
    fn test_validate_version_and_networks() {
        let diags = validate(
            "version: \"9.9\"\nservices:\n  web:\n    image: x\n    networks: [default, backend]\n",
        );
        let warnings = messages(&diags, Severity::Warning);
        assert_eq!(warnings.len(), 2);

        let ok = validate("version: \"3.3\"\nservices:\n  web:\n    image: x\n");
        assert!(ok.is_empty());
    }

    #[test]
    fn test_into_result_returns_non_errors() {
        let diags = validate("services:\n  web:\n    image: x\n    networks: [backend]\n");
        let rest = diags.into_result().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].severity, Severity::Warning);
    }
}
