//! Activation-time host checks
//!
//! These mirror the conditions an external runtime fails on when it
//! activates a project: missing bind-mount sources, host ports that are
//! already taken, and broken build inputs. Checks run concurrently.

use super::dockerfile::Dockerfile;
use super::plan::{ActivationPlan, BuildPlan};
use super::ports::Protocol;
use super::validate::Severity;
use super::volumes::MountKind;
use crate::error::{BerthError, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tokio::task::JoinSet;

/// Which check produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
    BindPath,
    HostPort,
    BuildContext,
    Dockerfile,
    BuildTarget,
    BuildArg,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::BindPath => write!(f, "bind-path"),
            CheckKind::HostPort => write!(f, "host-port"),
            CheckKind::BuildContext => write!(f, "build-context"),
            CheckKind::Dockerfile => write!(f, "dockerfile"),
            CheckKind::BuildTarget => write!(f, "build-target"),
            CheckKind::BuildArg => write!(f, "build-arg"),
        }
    }
}

/// A failed or suspicious check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub service: String,
    pub check: CheckKind,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: service '{}': [{}] {}",
            self.severity, self.service, self.check, self.message
        )
    }
}

/// Outcome of a preflight run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreflightReport {
    /// Number of checks that passed
    pub passed: usize,
    pub findings: Vec<Finding>,
}

impl PreflightReport {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn into_result(self) -> Result<Self> {
        if self.has_errors() {
            Err(BerthError::Preflight(
                self.findings
                    .iter()
                    .filter(|f| f.severity == Severity::Error)
                    .map(ToString::to_string)
                    .collect(),
            ))
        } else {
            Ok(self)
        }
    }
}

/// Outcome of a single check task
type Outcome = std::result::Result<(), Finding>;

/// Run every host check for the plan
pub async fn run(plan: &ActivationPlan) -> Result<PreflightReport> {
    let mut tasks: JoinSet<Vec<Outcome>> = JoinSet::new();
    // Keyed per service so every claimant of a path gets its own finding.
    let mut seen_paths: HashSet<(String, PathBuf, bool)> = HashSet::new();
    let mut seen_ports: HashSet<(IpAddr, u16, Protocol)> = HashSet::new();

    for service in &plan.services {
        if let Some(build) = &service.build {
            let name = service.name.clone();
            let build = build.clone();
            tasks.spawn(async move { check_build(name, build).await });
        }

        // Replicas share mounts and ports; the first container is representative.
        let Some(container) = service.containers.first() else {
            continue;
        };

        for mount in &container.mounts {
            if mount.kind != MountKind::Bind {
                continue;
            }
            let Some(source) = mount.source.as_ref().map(PathBuf::from) else {
                continue;
            };
            let create = mount.create_host_path;
            if !seen_paths.insert((service.name.clone(), source.clone(), create)) {
                continue;
            }
            let name = service.name.clone();
            tasks.spawn(async move { vec![check_bind_path(name, source, create).await] });
        }

        for port in &container.ports {
            let Some(host_port) = port.host_port else {
                continue;
            };
            let ip = port.host_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
            if !seen_ports.insert((ip, host_port, port.protocol)) {
                continue;
            }
            let name = service.name.clone();
            let protocol = port.protocol;
            tasks.spawn(async move {
                vec![check_host_port(name, SocketAddr::new(ip, host_port), protocol).await]
            });
        }
    }

    let mut report = PreflightReport::default();
    while let Some(joined) = tasks.join_next().await {
        let outcomes = joined.map_err(|e| BerthError::Internal(format!("preflight task failed: {}", e)))?;
        for outcome in outcomes {
            match outcome {
                Ok(()) => report.passed += 1,
                Err(finding) => {
                    tracing::debug!("Preflight finding: {}", finding);
                    report.findings.push(finding);
                }
            }
        }
    }

    report
        .findings
        .sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.service.cmp(&b.service)));

    tracing::info!(
        "Preflight finished: {} passed, {} finding(s)",
        report.passed,
        report.findings.len()
    );

    Ok(report)
}

fn finding(severity: Severity, service: &str, check: CheckKind, message: String) -> Finding {
    Finding {
        severity,
        service: service.to_string(),
        check,
        message,
    }
}

async fn check_bind_path(service: String, path: PathBuf, create_host_path: bool) -> Outcome {
    match tokio::fs::metadata(&path).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let severity = if create_host_path { Severity::Warning } else { Severity::Error };
            let suffix = if create_host_path { " (it will be created)" } else { "" };
            Err(finding(
                severity,
                &service,
                CheckKind::BindPath,
                format!("host path {} does not exist{}", path.display(), suffix),
            ))
        }
        Err(e) => Err(finding(
            Severity::Error,
            &service,
            CheckKind::BindPath,
            format!("host path {} is not accessible: {}", path.display(), e),
        )),
    }
}

async fn check_host_port(service: String, addr: SocketAddr, protocol: Protocol) -> Outcome {
    let probe = match protocol {
        Protocol::Tcp => tokio::net::TcpListener::bind(addr).await.map(drop),
        Protocol::Udp => tokio::net::UdpSocket::bind(addr).await.map(drop),
        Protocol::Sctp => {
            return Err(finding(
                Severity::Info,
                &service,
                CheckKind::HostPort,
                format!("cannot probe sctp port {}", addr),
            ))
        }
    };

    probe.map_err(|e| {
        finding(
            Severity::Error,
            &service,
            CheckKind::HostPort,
            format!("host port {}/{} is not available: {}", addr, protocol, e),
        )
    })
}

async fn check_build(service: String, build: BuildPlan) -> Vec<Outcome> {
    let mut outcomes = Vec::new();

    let context_ok = tokio::fs::metadata(&build.context)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !context_ok {
        outcomes.push(Err(finding(
            Severity::Error,
            &service,
            CheckKind::BuildContext,
            format!("build context {} is not a directory", build.context.display()),
        )));
        return outcomes;
    }
    outcomes.push(Ok(()));

    let content = match tokio::fs::read_to_string(&build.dockerfile).await {
        Ok(content) => content,
        Err(e) => {
            outcomes.push(Err(finding(
                Severity::Error,
                &service,
                CheckKind::Dockerfile,
                format!("cannot read {}: {}", build.dockerfile.display(), e),
            )));
            return outcomes;
        }
    };

    let dockerfile = match Dockerfile::parse(&content) {
        Ok(dockerfile) => dockerfile,
        Err(e) => {
            outcomes.push(Err(finding(
                Severity::Error,
                &service,
                CheckKind::Dockerfile,
                format!("{}: {}", build.dockerfile.display(), e),
            )));
            return outcomes;
        }
    };
    outcomes.push(Ok(()));

    if let Some(target) = &build.target {
        if dockerfile.has_stage(target) {
            outcomes.push(Ok(()));
        } else {
            outcomes.push(Err(finding(
                Severity::Error,
                &service,
                CheckKind::BuildTarget,
                format!(
                    "target stage '{}' not found in {} (stages: {})",
                    target,
                    build.dockerfile.display(),
                    dockerfile.stage_names().join(", ")
                ),
            )));
        }
    }

    for arg in build.args.keys() {
        if dockerfile.declares_arg(arg) {
            outcomes.push(Ok(()));
        } else {
            outcomes.push(Err(finding(
                Severity::Warning,
                &service,
                CheckKind::BuildArg,
                format!("build argument '{}' is not declared by any ARG", arg),
            )));
        }
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::parser::ComposeParser;
    use std::fs;

    const DOCKERFILE: &str = "FROM python:3.11 AS build-image\nARG POETRY_INSTALL_ARGS\nWORKDIR /workspace/app\n";

    fn plan_for(dir: &std::path::Path, yaml: &str) -> ActivationPlan {
        let config = ComposeParser::parse_str(yaml).unwrap();
        ActivationPlan::build("preflight", dir, &config).unwrap()
    }

    #[tokio::test]
    async fn test_preflight_passes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), DOCKERFILE).unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();

        let plan = plan_for(
            dir.path(),
            r#"
services:
  app:
    build:
      context: .
      target: build-image
      args:
        POETRY_INSTALL_ARGS: "--with=dev"
    volumes:
      - ./src:/workspace/app/src
"#,
        );

        let report = run(&plan).await.unwrap();
        assert!(report.findings.is_empty(), "{:?}", report.findings);
        assert_eq!(report.passed, 5);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_preflight_reports_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), DOCKERFILE).unwrap();

        let plan = plan_for(
            dir.path(),
            r#"
services:
  app:
    build:
      context: .
      target: production
      args:
        UNDECLARED: "1"
    volumes:
      - ./missing:/data
      - type: bind
        source: ./created
        target: /created
        bind:
          create_host_path: true
"#,
        );

        let report = run(&plan).await.unwrap();
        let checks: Vec<_> = report.findings.iter().map(|f| (f.severity, f.check)).collect();
        assert!(checks.contains(&(Severity::Error, CheckKind::BuildTarget)));
        assert!(checks.contains(&(Severity::Error, CheckKind::BindPath)));
        assert!(checks.contains(&(Severity::Warning, CheckKind::BindPath)));
        assert!(checks.contains(&(Severity::Warning, CheckKind::BuildArg)));
        assert_eq!(report.findings[0].severity, Severity::Error);
        assert!(matches!(report.into_result(), Err(BerthError::Preflight(errors)) if errors.len() == 2));
    }

    #[tokio::test]
    async fn test_preflight_detects_taken_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();

        let plan = plan_for(
            dir.path(),
            &format!(
                "services:\n  web:\n    image: nginx\n    ports:\n      - \"127.0.0.1:{}:80\"\n",
                port
            ),
        );

        let report = run(&plan).await.unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].check, CheckKind::HostPort);
        drop(listener);
    }

    #[tokio::test]
    async fn test_preflight_shared_bind_path_reported_per_service() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_for(
            dir.path(),
            r#"
services:
  a:
    image: busybox
    volumes:
      - ./shared:/data
      - ./shared:/data-again
  b:
    image: busybox
    volumes:
      - type: bind
        source: ./shared
        target: /data
        bind:
          create_host_path: true
"#,
        );

        let report = run(&plan).await.unwrap();
        let found: Vec<_> = report
            .findings
            .iter()
            .map(|f| (f.severity, f.service.as_str(), f.check))
            .collect();
        assert_eq!(
            found,
            vec![
                (Severity::Error, "a", CheckKind::BindPath),
                (Severity::Warning, "b", CheckKind::BindPath),
            ]
        );
    }

    #[tokio::test]
    async fn test_preflight_missing_context() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_for(dir.path(), "services:\n  app:\n    build: ./nowhere\n");
        let report = run(&plan).await.unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].check, CheckKind::BuildContext);
    }
}
