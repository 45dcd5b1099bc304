//! Minimal Dockerfile reader for build-stage and build-arg discovery

use crate::error::{BerthError, Result};

/// Build stage (for multi-stage builds)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStage {
    /// Stage name from `FROM ... AS name`
    pub name: Option<String>,
    /// Base image
    pub base_image: String,
    /// Base image tag
    pub base_tag: Option<String>,
    /// `ARG` names declared inside this stage
    pub args: Vec<String>,
}

/// The parts of a Dockerfile the preflight checks care about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dockerfile {
    /// `ARG` names declared before the first `FROM`
    pub global_args: Vec<String>,
    pub stages: Vec<BuildStage>,
}

impl Dockerfile {
    pub fn parse(content: &str) -> Result<Self> {
        let mut dockerfile = Dockerfile::default();
        let mut continued_line = String::new();
        let mut start_line = 0;

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if continued_line.is_empty() {
                start_line = idx + 1;
            }

            if let Some(without_backslash) = line.strip_suffix('\\') {
                continued_line.push_str(without_backslash);
                continued_line.push(' ');
                continue;
            }

            let full_line = if continued_line.is_empty() {
                line.to_string()
            } else {
                let joined = format!("{}{}", continued_line, line);
                continued_line.clear();
                joined
            };

            dockerfile.apply(&full_line, start_line)?;
        }

        if dockerfile.stages.is_empty() {
            return Err(BerthError::DockerfileParse {
                line: 0,
                message: "No FROM instruction found".to_string(),
            });
        }

        Ok(dockerfile)
    }

    fn apply(&mut self, line: &str, line_num: usize) -> Result<()> {
        let (instruction, args) = match line.split_once(char::is_whitespace) {
            Some((i, a)) => (i.to_uppercase(), a.trim()),
            None => (line.to_uppercase(), ""),
        };

        match instruction.as_str() {
            "FROM" => {
                let stage = parse_from(args, line_num)?;
                self.stages.push(stage);
            }
            "ARG" => {
                let name = args
                    .split('=')
                    .next()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| BerthError::DockerfileParse {
                        line: line_num,
                        message: "ARG requires a name".to_string(),
                    })?
                    .to_string();
                match self.stages.last_mut() {
                    Some(stage) => stage.args.push(name),
                    None => self.global_args.push(name),
                }
            }
            _ => {
                if self.stages.is_empty() {
                    return Err(BerthError::DockerfileParse {
                        line: line_num,
                        message: format!("{} before FROM", instruction),
                    });
                }
            }
        }

        Ok(())
    }

    /// Whether a stage with this name exists (case-insensitive, like the builder)
    pub fn has_stage(&self, name: &str) -> bool {
        self.stages
            .iter()
            .filter_map(|s| s.name.as_deref())
            .any(|n| n.eq_ignore_ascii_case(name))
    }

    /// Whether `name` is declared as an `ARG` anywhere
    pub fn declares_arg(&self, name: &str) -> bool {
        self.global_args.iter().any(|a| a == name)
            || self.stages.iter().any(|s| s.args.iter().any(|a| a == name))
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().filter_map(|s| s.name.as_deref()).collect()
    }
}

fn parse_from(args: &str, line_num: usize) -> Result<BuildStage> {
    let parts: Vec<&str> = args
        .split_whitespace()
        .filter(|p| !p.starts_with("--"))
        .collect();

    let Some(reference) = parts.first() else {
        return Err(BerthError::DockerfileParse {
            line: line_num,
            message: "FROM requires an image".to_string(),
        });
    };

    // A ':' after the last '/' separates the tag; earlier ones belong to a registry port.
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (base_image, base_tag) = match reference[name_start..].split_once(':') {
        Some((_, tag)) => (
            reference[..reference.len() - tag.len() - 1].to_string(),
            Some(tag.to_string()),
        ),
        None => (reference.to_string(), None),
    };

    let name = match parts.as_slice() {
        [_, kw, alias, ..] if kw.eq_ignore_ascii_case("AS") => Some(alias.to_string()),
        [_, _, ..] => {
            return Err(BerthError::DockerfileParse {
                line: line_num,
                message: format!("unexpected FROM arguments: {}", args),
            })
        }
        _ => None,
    };

    Ok(BuildStage {
        name,
        base_image,
        base_tag,
        args: Vec::new(),
    })
}
