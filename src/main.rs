//! Berth - compose descriptor toolkit
//!
//! This is the main CLI entry point for Berth.

use berth::compose::plan::ActivationPlan;
use berth::compose::{preflight, ComposeParser, Project, ProjectOptions, Severity};
use berth::error::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Berth - inspect, validate and plan compose projects
#[derive(Parser)]
#[command(name = "berth")]
#[command(version)]
#[command(about = "Validate compose descriptors and plan their activation", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Compose file(s), merged in order
    #[arg(short, long, global = true, env = "COMPOSE_FILE", value_delimiter = ':')]
    file: Vec<PathBuf>,

    /// Project name
    #[arg(short, long, global = true, env = "COMPOSE_PROJECT_NAME")]
    project_name: Option<String>,

    /// Project directory (defaults to the first compose file's directory)
    #[arg(long, global = true)]
    project_directory: Option<PathBuf>,

    /// Environment file (defaults to .env in the project directory)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved, merged descriptor
    Config {
        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,
        /// Print service names only
        #[arg(long)]
        services: bool,
        /// Only validate, print nothing
        #[arg(short, long)]
        quiet: bool,
    },

    /// Check the descriptor for errors
    Validate,

    /// Show the activation plan
    Plan {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: PlanFormat,
    },

    /// List published host ports
    Ports,

    /// Check the host for bind paths, free ports and build inputs
    Preflight,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConfigFormat {
    Yaml,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlanFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = ProjectOptions {
        files: cli.file,
        project_name: cli.project_name,
        project_directory: cli.project_directory,
        env_file: cli.env_file,
    };
    let working_dir = std::env::current_dir()?;
    let project = Project::load(&options, &working_dir)?;

    match cli.command {
        Commands::Config {
            format,
            services,
            quiet,
        } => {
            let diagnostics = project.validate();
            for diagnostic in diagnostics.iter().filter(|d| d.severity > Severity::Info) {
                eprintln!("{}", diagnostic);
            }
            diagnostics.into_result()?;

            if quiet {
                return Ok(());
            }

            if services {
                for name in project.config.services.keys() {
                    println!("{}", name);
                }
            } else {
                let rendered = match format {
                    ConfigFormat::Yaml => ComposeParser::to_yaml(&project.config)?,
                    ConfigFormat::Json => ComposeParser::to_json(&project.config)?,
                };
                println!("{}", rendered.trim_end());
            }
        }

        Commands::Validate => {
            let diagnostics = project.validate();
            for diagnostic in diagnostics.iter() {
                println!("{}", diagnostic);
            }
            diagnostics.into_result()?;
            println!("{} is valid", project.name);
        }

        Commands::Plan { format } => {
            let plan = project.plan()?;
            match format {
                PlanFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
                PlanFormat::Text => print_plan(&plan),
            }
        }

        Commands::Ports => {
            let plan = project.plan()?;
            println!(
                "{:<20} {:<16} {:<10} {:<15} {:<8}",
                "SERVICE", "HOST IP", "HOST PORT", "CONTAINER PORT", "PROTOCOL"
            );
            for service in &plan.services {
                for container in &service.containers {
                    for port in &container.ports {
                        println!(
                            "{:<20} {:<16} {:<10} {:<15} {:<8}",
                            service.name,
                            port.host_ip.map(|ip| ip.to_string()).unwrap_or_else(|| "*".to_string()),
                            port.host_port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                            port.container_port,
                            port.protocol
                        );
                    }
                }
            }
        }

        Commands::Preflight => {
            let plan = project.plan()?;
            let report = preflight::run(&plan).await?;
            for finding in &report.findings {
                println!("{}", finding);
            }
            let report = report.into_result()?;
            println!(
                "Preflight passed for {} ({} checks, {} finding(s))",
                plan.project,
                report.passed,
                report.findings.len()
            );
        }
    }

    Ok(())
}

fn print_plan(plan: &ActivationPlan) {
    println!("Project {} ({})", plan.project, plan.project_dir.display());

    for (idx, wave) in plan.waves.iter().enumerate() {
        println!("Wave {}: {}", idx + 1, wave.join(", "));
    }

    for service in &plan.services {
        println!();
        println!("Service {}", service.name);
        match &service.build {
            Some(build) => {
                println!("  build: {} ({})", build.context.display(), build.dockerfile.display());
                if let Some(target) = &build.target {
                    println!("  target: {}", target);
                }
                for (key, value) in &build.args {
                    println!("  arg: {}={}", key, value);
                }
                println!("  tag: {}", build.tag);
            }
            None => println!("  image: {}", service.image),
        }
        if !service.depends_on.is_empty() {
            println!("  depends on: {}", service.depends_on.join(", "));
        }

        for container in &service.containers {
            println!("  container {}", container.name);
            if let Some(command) = &container.command {
                println!("    command: {}", command.join(" "));
            }
            for port in &container.ports {
                let host = match (port.host_ip, port.host_port) {
                    (Some(ip), Some(p)) => format!("{}:{}", ip, p),
                    (None, Some(p)) => p.to_string(),
                    (_, None) => "ephemeral".to_string(),
                };
                println!("    port {} -> {}/{}", host, port.container_port, port.protocol);
            }
            for mount in &container.mounts {
                println!(
                    "    {} {} -> {} ({})",
                    mount.kind,
                    mount.source.as_deref().unwrap_or("<anonymous>"),
                    mount.target,
                    if mount.read_only { "ro" } else { "rw" }
                );
            }
        }
    }
}
