//! Activation plan: what an external runtime would build, create and start

use super::config::{ComposeConfig, Provisioning, ServiceConfig};
use super::ports::{PortBinding, Protocol};
use super::volumes::{MountKind, VolumeBinding};
use crate::error::{BerthError, Result};
use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

pub const LABEL_PROJECT: &str = "com.docker.compose.project";
pub const LABEL_SERVICE: &str = "com.docker.compose.service";
pub const LABEL_CONTAINER_NUMBER: &str = "com.docker.compose.container-number";
pub const LABEL_CONFIG_HASH: &str = "com.docker.compose.config-hash";

/// Port mapping for one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    pub host_ip: Option<IpAddr>,
    /// `None` lets the runtime pick an ephemeral port
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
}

/// Filesystem mount for one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub kind: MountKind,
    /// Resolved host path for binds, volume name for named volumes
    pub source: Option<String>,
    pub target: String,
    pub read_only: bool,
    pub create_host_path: bool,
}

/// Container to create
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Replaces the image's default command when set
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub environment: IndexMap<String, String>,
    pub working_dir: Option<String>,
    pub hostname: Option<String>,
    pub restart: Option<String>,
    pub ports: Vec<PortMapping>,
    pub mounts: Vec<Mount>,
    pub labels: IndexMap<String, String>,
}

/// Image build to run before containers are created
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildPlan {
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    pub target: Option<String>,
    /// Arguments with a value; unset ones are left to the builder
    pub args: IndexMap<String, String>,
    /// Tag given to the built image
    pub tag: String,
}

/// Everything the runtime needs for one service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServicePlan {
    pub name: String,
    pub image: String,
    pub build: Option<BuildPlan>,
    pub depends_on: Vec<String>,
    pub config_hash: String,
    pub containers: Vec<ContainerSpec>,
}

/// Activation plan for a whole project
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationPlan {
    pub project: String,
    pub project_dir: PathBuf,
    pub services: Vec<ServicePlan>,
    /// Services grouped into start waves; members of one wave start concurrently
    pub waves: Vec<Vec<String>>,
}

impl ActivationPlan {
    /// Derive the plan. The configuration is expected to have passed validation.
    pub fn build(project_name: &str, project_dir: &Path, config: &ComposeConfig) -> Result<Self> {
        let project = normalize_project_name(project_name)?;
        let waves = start_waves(config)?;

        let services = config
            .services
            .iter()
            .map(|(name, service)| plan_service(&project, project_dir, name, service))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            "Planned project {} with {} services in {} waves",
            project,
            services.len(),
            waves.len()
        );

        Ok(Self {
            project,
            project_dir: project_dir.to_path_buf(),
            services,
            waves,
        })
    }

    pub fn service(&self, name: &str) -> Option<&ServicePlan> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Order in which services are stopped
    pub fn teardown_order(&self) -> Vec<String> {
        self.waves.iter().rev().flat_map(|w| w.iter().rev().cloned()).collect()
    }

    pub fn containers(&self) -> impl Iterator<Item = &ContainerSpec> {
        self.services.iter().flat_map(|s| s.containers.iter())
    }
}

/// Group services into dependency layers. Ties keep declaration order.
pub fn start_waves(config: &ComposeConfig) -> Result<Vec<Vec<String>>> {
    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<(&str, Vec<String>)> = Vec::new();

    for (name, service) in &config.services {
        let deps = service.dependencies();
        if let Some(missing) = deps.iter().find(|d| !config.services.contains_key(*d)) {
            return Err(BerthError::ServiceNotFound(format!(
                "{} (required by {})",
                missing, name
            )));
        }
        remaining.push((name.as_str(), deps));
    }

    let mut waves = Vec::new();
    while !remaining.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|(_, deps)| deps.iter().all(|d| placed.contains(d.as_str())));

        if ready.is_empty() {
            let stuck = blocked.first().map(|(n, _)| n.to_string()).unwrap_or_default();
            return Err(BerthError::CircularDependency(stuck));
        }

        let wave: Vec<String> = ready.iter().map(|(n, _)| n.to_string()).collect();
        placed.extend(ready.iter().map(|(n, _)| *n));
        waves.push(wave);
        remaining = blocked;
    }

    Ok(waves)
}

/// Lowercase, keep `[a-z0-9_-]`, and start with a letter or digit
pub fn normalize_project_name(name: &str) -> Result<String> {
    let normalized: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        .collect();
    let normalized = normalized
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string();

    if normalized.is_empty() {
        return Err(BerthError::InvalidConfig(format!(
            "project name '{}' has no usable characters",
            name
        )));
    }
    Ok(normalized)
}

/// SHA-256 over the service's canonical JSON form
pub fn config_hash(service: &ServiceConfig) -> Result<String> {
    let bytes = serde_json::to_vec(service)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn plan_service(project: &str, project_dir: &Path, name: &str, service: &ServiceConfig) -> Result<ServicePlan> {
    let (image, build) = match service.provisioning(name)? {
        Provisioning::Image(image) => (image.to_string(), None),
        Provisioning::Build(spec) => {
            let tag = format!("{}-{}", project, name);
            let context = resolve(project_dir, &spec.context);
            let dockerfile = resolve(&context, &spec.dockerfile);
            let args = spec
                .args
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect();
            (
                tag.clone(),
                Some(BuildPlan {
                    context,
                    dockerfile,
                    target: spec.target,
                    args,
                    tag,
                }),
            )
        }
    };

    let config_hash = config_hash(service)?;
    let command = service.command_tokens()?;
    let entrypoint = service.entrypoint.as_ref().map(|e| e.tokens()).transpose()?;
    let environment: IndexMap<String, String> = service
        .environment_map()
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect();

    let mut ports = Vec::new();
    for port in service.ports.iter().flatten() {
        let binding = PortBinding::from_config(port)?;
        for (host_port, container_port) in binding.mappings() {
            ports.push(PortMapping {
                host_ip: binding.host_ip,
                host_port,
                container_port,
                protocol: binding.protocol,
            });
        }
    }

    let mut mounts = Vec::new();
    for volume in service.volumes.iter().flatten() {
        let binding = VolumeBinding::from_config(volume)?;
        let source = match binding.resolve_host_path(project_dir)? {
            Some(path) => Some(path.display().to_string()),
            None => binding.source.clone(),
        };
        mounts.push(Mount {
            kind: binding.kind,
            source,
            target: binding.target.clone(),
            read_only: binding.read_only,
            create_host_path: binding.create_host_path,
        });
    }

    let base_labels = service
        .labels
        .as_ref()
        .map(|l| l.to_map())
        .unwrap_or_default();

    let replicas = service.replicas();
    let containers = (1..=replicas)
        .map(|number| {
            let container_name = match &service.container_name {
                Some(explicit) => explicit.clone(),
                None => format!("{}-{}-{}", project, name, number),
            };

            let mut labels = base_labels.clone();
            labels.insert(LABEL_PROJECT.to_string(), project.to_string());
            labels.insert(LABEL_SERVICE.to_string(), name.to_string());
            labels.insert(LABEL_CONTAINER_NUMBER.to_string(), number.to_string());
            labels.insert(LABEL_CONFIG_HASH.to_string(), config_hash.clone());

            ContainerSpec {
                name: container_name,
                image: image.clone(),
                command: command.clone(),
                entrypoint: entrypoint.clone(),
                environment: environment.clone(),
                working_dir: service.working_dir.clone(),
                hostname: service.hostname.clone(),
                restart: service.restart.clone(),
                ports: ports.clone(),
                mounts: mounts.clone(),
                labels,
            }
        })
        .collect();

    Ok(ServicePlan {
        name: name.to_string(),
        image,
        build,
        depends_on: service.dependencies(),
        config_hash,
        containers,
    })
}

fn resolve(base: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    let joined = if p.is_absolute() { p.to_path_buf() } else { base.join(p) };
    joined
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::parser::ComposeParser;

    fn plan(yaml: &str) -> Result<ActivationPlan> {
        let config = ComposeParser::parse_str(yaml).unwrap();
        ActivationPlan::build("My Project", Path::new("/srv/project"), &config)
    }

    #[test]
    fn test_get_start_order() {
        let p = plan(
            r#"
services:
  web:
    image: nginx
    depends_on:
      - api
  api:
    image: node
    depends_on:
      - db
  db:
    image: postgres
  cache:
    image: redis
"#,
        )
        .unwrap();

        assert_eq!(
            p.waves,
            vec![
                vec!["db".to_string(), "cache".to_string()],
                vec!["api".to_string()],
                vec!["web".to_string()],
            ]
        );
        assert_eq!(p.teardown_order(), vec!["web", "api", "cache", "db"]);
    }

    #[test]
    fn test_circular_dependency_detection() {
        let result = plan(
            r#"
services:
  a:
    image: nginx
    depends_on:
      - b
  b:
    image: nginx
    depends_on:
      - a
"#,
        );
        assert!(matches!(result, Err(BerthError::CircularDependency(_))));
    }

    #[test]
    fn test_build_service_plan() {
        let p = plan(
            r#"
services:
  app:
    build:
      context: .
      dockerfile: ./Dockerfile
      target: build-image
      args:
        POETRY_INSTALL_ARGS: "--with=dev,docs,lint"
        FROM_ENV:
    ports:
      - "8000:8000"
    volumes:
      - ./src:/workspace/app/src/
    environment:
      - UNSET
      - MODE=dev
    command: app run-all --http --reload
"#,
        )
        .unwrap();

        assert_eq!(p.project, "myproject");
        let app = p.service("app").unwrap();
        assert_eq!(app.image, "myproject-app");

        let build = app.build.as_ref().unwrap();
        assert_eq!(build.context, PathBuf::from("/srv/project"));
        assert_eq!(build.dockerfile, PathBuf::from("/srv/project/Dockerfile"));
        assert_eq!(build.target.as_deref(), Some("build-image"));
        assert_eq!(build.args.len(), 1);
        assert_eq!(build.tag, "myproject-app");

        let container = &app.containers[0];
        assert_eq!(container.name, "myproject-app-1");
        assert_eq!(
            container.command.as_deref(),
            Some(&["app", "run-all", "--http", "--reload"].map(String::from)[..])
        );
        assert_eq!(container.environment.len(), 1);
        assert_eq!(
            container.ports,
            vec![PortMapping {
                host_ip: None,
                host_port: Some(8000),
                container_port: 8000,
                protocol: Protocol::Tcp,
            }]
        );
        assert_eq!(container.mounts[0].source.as_deref(), Some("/srv/project/src"));
        assert!(!container.mounts[0].read_only);
        assert_eq!(container.labels[LABEL_PROJECT], "myproject");
        assert_eq!(container.labels[LABEL_CONFIG_HASH], app.config_hash);
        assert_eq!(app.config_hash.len(), 64);
    }

    #[test]
    fn test_container_names_and_replicas() {
        let p = plan(
            r#"
services:
  localmail:
    image: mailhog/mailhog:v1.0.0
    container_name: localmail
  worker:
    image: worker
    deploy:
      replicas: 3
"#,
        )
        .unwrap();

        let mail = p.service("localmail").unwrap();
        assert_eq!(mail.image, "mailhog/mailhog:v1.0.0");
        assert!(mail.build.is_none());
        assert_eq!(mail.containers[0].name, "localmail");

        let names: Vec<_> = p.service("worker").unwrap().containers.iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["myproject-worker-1", "myproject-worker-2", "myproject-worker-3"]);
        assert_eq!(p.containers().count(), 4);
    }

    #[test]
    fn test_config_hash_tracks_changes() {
        let a = ComposeParser::parse_str("services:\n  web:\n    image: nginx:1\n").unwrap();
        let b = ComposeParser::parse_str("services:\n  web:\n    image: nginx:2\n").unwrap();
        let a2 = ComposeParser::parse_str("services:\n  web:\n    image: nginx:1\n").unwrap();

        let hash = |c: &ComposeConfig| config_hash(&c.services["web"]).unwrap();
        assert_eq!(hash(&a), hash(&a2));
        assert_ne!(hash(&a), hash(&b));
    }

    #[test]
    fn test_normalize_project_name() {
        assert_eq!(normalize_project_name("My_App-2").unwrap(), "my_app-2");
        assert_eq!(normalize_project_name("__.app").unwrap(), "app");
        assert_eq!(normalize_project_name("litestar fullstack").unwrap(), "litestarfullstack");
        assert!(normalize_project_name("...").is_err());
    }
}
