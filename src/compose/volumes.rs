//! Volume binding parsing and host path resolution

use super::config::{VolumeMount, VolumeMountLong};
use crate::error::{BerthError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Access modes accepted after the container path
pub const VOLUME_MODES: &[&str] = &["ro", "rw", "z", "Z", "cached", "delegated", "consistent", "nocopy"];

/// Mount type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// Host path bound into the container
    Bind,
    /// Named or anonymous volume managed by the runtime
    Volume,
    /// In-memory filesystem
    Tmpfs,
}

impl fmt::Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountKind::Bind => write!(f, "bind"),
            MountKind::Volume => write!(f, "volume"),
            MountKind::Tmpfs => write!(f, "tmpfs"),
        }
    }
}

/// A parsed volume binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBinding {
    pub kind: MountKind,
    /// Host path or volume name; `None` for anonymous volumes and tmpfs
    pub source: Option<String>,
    /// Absolute path inside the container
    pub target: String,
    /// Bind mounts and volumes are read-write unless `ro` is given
    pub read_only: bool,
    /// Extra modes (`z`, `cached`, ...) excluding `ro`/`rw`
    pub modes: Vec<String>,
    /// The runtime may create a missing host path
    pub create_host_path: bool,
}

impl VolumeBinding {
    /// Parse the short syntax `SOURCE:TARGET[:MODE]` or a bare `TARGET`
    pub fn parse(spec: &str) -> Result<Self> {
        if spec.is_empty() {
            return Err(volume_error(spec, "empty specification"));
        }
        if spec.contains('\0') {
            return Err(volume_error(spec, "contains a NUL byte"));
        }

        let parts = split_volume_spec(spec);
        let (source, target, mode) = match parts.as_slice() {
            [target] => (None, target.clone(), None),
            [source, target] => (Some(source.clone()), target.clone(), None),
            [source, target, mode] => (Some(source.clone()), target.clone(), Some(mode.clone())),
            _ => return Err(volume_error(spec, "too many ':' separators")),
        };

        if let Some(source) = &source {
            if source.is_empty() {
                return Err(volume_error(spec, "source is empty"));
            }
        }
        check_target(spec, &target)?;

        let kind = match &source {
            Some(s) if looks_like_path(s) => MountKind::Bind,
            Some(s) => {
                check_volume_name(spec, s)?;
                MountKind::Volume
            }
            None => MountKind::Volume,
        };

        let (read_only, modes) = match mode {
            Some(mode) => parse_modes(spec, &mode)?,
            None => (false, Vec::new()),
        };

        Ok(Self {
            kind,
            source,
            target,
            read_only,
            modes,
            create_host_path: false,
        })
    }

    /// Build from either compose volume syntax
    pub fn from_config(config: &VolumeMount) -> Result<Self> {
        match config {
            VolumeMount::Short(s) => Self::parse(s),
            VolumeMount::Long(long) => Self::from_long(long),
        }
    }

    fn from_long(long: &VolumeMountLong) -> Result<Self> {
        let spec = format!("target={}", long.target);
        check_target(&spec, &long.target)?;

        let source = long.source.clone().filter(|s| !s.is_empty());
        if let Some(s) = &source {
            if s.contains('\0') {
                return Err(volume_error(&spec, "source contains a NUL byte"));
            }
        }

        let kind = match long.mount_type.as_deref() {
            Some("bind") => MountKind::Bind,
            Some("volume") => MountKind::Volume,
            Some("tmpfs") => MountKind::Tmpfs,
            Some(other) => return Err(volume_error(&spec, format!("unsupported mount type '{}'", other))),
            None => match &source {
                Some(s) if looks_like_path(s) => MountKind::Bind,
                _ => MountKind::Volume,
            },
        };

        match (kind, &source) {
            (MountKind::Bind, None) => return Err(volume_error(&spec, "bind mount requires a source")),
            (MountKind::Tmpfs, Some(_)) => return Err(volume_error(&spec, "tmpfs mount takes no source")),
            (MountKind::Volume, Some(s)) => check_volume_name(&spec, s)?,
            _ => {}
        }

        let mut modes = Vec::new();
        if long.volume.as_ref().and_then(|v| v.nocopy).unwrap_or(false) {
            modes.push("nocopy".to_string());
        }

        let create_host_path = long
            .bind
            .as_ref()
            .and_then(|b| b.create_host_path)
            .unwrap_or(false);

        Ok(Self {
            kind,
            source,
            target: long.target.clone(),
            read_only: long.read_only.unwrap_or(false),
            modes,
            create_host_path,
        })
    }

    pub fn is_bind(&self) -> bool {
        self.kind == MountKind::Bind
    }

    /// Name of the named volume this binding uses, if any
    pub fn volume_name(&self) -> Option<&str> {
        match self.kind {
            MountKind::Volume => self.source.as_deref(),
            _ => None,
        }
    }

    /// Host path of a bind mount, resolved against the project directory
    pub fn resolve_host_path(&self, project_dir: &Path) -> Result<Option<PathBuf>> {
        if !self.is_bind() {
            return Ok(None);
        }
        let Some(source) = self.source.as_deref() else {
            return Ok(None);
        };

        let path = if source == "~" || source.starts_with("~/") {
            let home = dirs::home_dir().ok_or_else(|| {
                BerthError::InvalidConfig(format!("cannot expand '{}': no home directory", source))
            })?;
            home.join(source.trim_start_matches('~').trim_start_matches('/'))
        } else {
            let p = Path::new(source);
            if p.is_absolute() || is_windows_drive(source) {
                p.to_path_buf()
            } else {
                project_dir.join(p)
            }
        };

        Ok(Some(normalize(&path)))
    }
}

impl fmt::Display for VolumeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "{}:", source)?;
        }
        write!(f, "{}", self.target)?;
        let mut modes = vec![if self.read_only { "ro" } else { "rw" }.to_string()];
        modes.extend(self.modes.iter().cloned());
        write!(f, ":{}", modes.join(","))
    }
}

fn split_volume_spec(spec: &str) -> Vec<String> {
    let (prefix, rest) = if is_windows_drive(spec) {
        spec.split_at(2)
    } else {
        ("", spec)
    };

    let mut parts: Vec<String> = rest.split(':').map(str::to_string).collect();
    if !prefix.is_empty() {
        parts[0] = format!("{}{}", prefix, parts[0]);
    }
    parts
}

fn is_windows_drive(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

fn looks_like_path(s: &str) -> bool {
    s.starts_with('.') || s.starts_with('/') || s.starts_with('~') || is_windows_drive(s)
}

fn check_target(spec: &str, target: &str) -> Result<()> {
    if target.is_empty() {
        return Err(volume_error(spec, "container path is empty"));
    }
    if target.contains('\0') {
        return Err(volume_error(spec, "container path contains a NUL byte"));
    }
    if !target.starts_with('/') && !is_windows_drive(target) {
        return Err(volume_error(spec, format!("container path '{}' is not absolute", target)));
    }
    Ok(())
}

fn check_volume_name(spec: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(volume_error(spec, format!("'{}' is neither a path nor a valid volume name", name)))
    }
}

fn parse_modes(spec: &str, mode: &str) -> Result<(bool, Vec<String>)> {
    let mut read_only = None;
    let mut modes = Vec::new();

    for m in mode.split(',') {
        if !VOLUME_MODES.contains(&m) {
            return Err(volume_error(spec, format!("unknown mode '{}'", m)));
        }
        match m {
            "ro" | "rw" => {
                let ro = m == "ro";
                if read_only.is_some_and(|prev| prev != ro) {
                    return Err(volume_error(spec, "both 'ro' and 'rw' given"));
                }
                read_only = Some(ro);
            }
            other => modes.push(other.to_string()),
        }
    }

    Ok((read_only.unwrap_or(false), modes))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn volume_error(spec: &str, reason: impl Into<String>) -> BerthError {
    BerthError::Volume {
        spec: spec.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bind_defaults_read_write() {
        let v = VolumeBinding::parse("./src:/workspace/app/src/").unwrap();
        assert_eq!(v.kind, MountKind::Bind);
        assert_eq!(v.source.as_deref(), Some("./src"));
        assert_eq!(v.target, "/workspace/app/src/");
        assert!(!v.read_only);
        assert_eq!(v.to_string(), "./src:/workspace/app/src/:rw");
    }

    #[test]
    fn test_parse_modes() {
        let v = VolumeBinding::parse("/etc/hosts:/etc/hosts:ro,z").unwrap();
        assert!(v.read_only);
        assert_eq!(v.modes, vec!["z"]);

        assert!(VolumeBinding::parse("./a:/a:ro,rw").is_err());
        assert!(VolumeBinding::parse("./a:/a:bogus").is_err());
    }

    #[test]
    fn test_parse_named_and_anonymous() {
        let named = VolumeBinding::parse("pgdata:/var/lib/postgresql/data").unwrap();
        assert_eq!(named.kind, MountKind::Volume);
        assert_eq!(named.volume_name(), Some("pgdata"));

        let anon = VolumeBinding::parse("/var/cache").unwrap();
        assert_eq!(anon.kind, MountKind::Volume);
        assert!(anon.source.is_none());
        assert!(anon.volume_name().is_none());
    }

    #[test]
    fn test_parse_windows_drive() {
        let v = VolumeBinding::parse(r"C:\Users\me\src:/src").unwrap();
        assert_eq!(v.kind, MountKind::Bind);
        assert_eq!(v.source.as_deref(), Some(r"C:\Users\me\src"));
        assert_eq!(v.target, "/src");
    }

    #[test]
    fn test_parse_rejects_invalid_paths() {
        for spec in ["", ":/data", "./data:relative", "./a:/b:ro:extra", "bad name!:/data", "./a\0:/a"] {
            assert!(VolumeBinding::parse(spec).is_err(), "accepted {:?}", spec);
        }
    }

    #[test]
    fn test_long_syntax() {
        let mount: VolumeMount = serde_yaml::from_str(
            "type: bind\nsource: ./static\ntarget: /opt/static\nread_only: true\nbind:\n  create_host_path: true\n",
        )
        .unwrap();
        let v = VolumeBinding::from_config(&mount).unwrap();
        assert!(v.is_bind());
        assert!(v.read_only);
        assert!(v.create_host_path);

        let tmpfs: VolumeMount = serde_yaml::from_str("type: tmpfs\ntarget: /tmp\n").unwrap();
        assert_eq!(VolumeBinding::from_config(&tmpfs).unwrap().kind, MountKind::Tmpfs);

        let bad: VolumeMount = serde_yaml::from_str("type: bind\ntarget: /x\n").unwrap();
        assert!(VolumeBinding::from_config(&bad).is_err());
    }

    #[test]
    fn test_resolve_host_path() {
        let project = Path::new("/home/dev/project");
        let v = VolumeBinding::parse("./docs:/workspace/app/docs/").unwrap();
        assert_eq!(
            v.resolve_host_path(project).unwrap(),
            Some(PathBuf::from("/home/dev/project/docs"))
        );

        let up = VolumeBinding::parse("../shared:/shared").unwrap();
        assert_eq!(
            up.resolve_host_path(project).unwrap(),
            Some(PathBuf::from("/home/dev/shared"))
        );

        let abs = VolumeBinding::parse("/var/log:/logs").unwrap();
        assert_eq!(abs.resolve_host_path(project).unwrap(), Some(PathBuf::from("/var/log")));

        let named = VolumeBinding::parse("data:/data").unwrap();
        assert_eq!(named.resolve_host_path(project).unwrap(), None);
    }
}
