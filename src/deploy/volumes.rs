//! Volume remapping: local `host:container` mounts are mirrored under the
//! working directory and rewritten to point at the mirrored copy.

use serde_yaml::Value;
use std::path::{Path, PathBuf};

use crate::compose::{string_list, ComposeError, OptionSet};
use crate::utils::paths;

/// A parsed `local:container[:mode]` volume spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub local: String,
    pub container: String,
    pub mode: Option<String>,
}

impl VolumeSpec {
    pub fn parse(spec: &str) -> Result<Self, ComposeError> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (local, container, mode) = match parts.as_slice() {
            [local, container] => (*local, *container, None),
            [local, container, mode] => (*local, *container, Some(mode.to_string())),
            _ => {
                return Err(ComposeError::invalid(
                    "volumes",
                    format!(
                        "'{}' must have the form local_path:container_path[:mode]",
                        spec
                    ),
                ))
            }
        };
        if local.is_empty() || container.is_empty() {
            return Err(ComposeError::invalid(
                "volumes",
                format!("'{}' has an empty path", spec),
            ));
        }
        Ok(Self {
            local: local.to_string(),
            container: container.to_string(),
            mode,
        })
    }

    fn render(&self, host: &str) -> String {
        match &self.mode {
            Some(mode) => format!("{}:{}:{}", host, self.container, mode),
            None => format!("{}:{}", host, self.container),
        }
    }
}

/// Outcome of remapping one volume onto the working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemappedVolume {
    /// Local directory to mirror; `None` when the mount already points at
    /// the working directory and passes through unchanged
    pub source: Option<PathBuf>,
    /// Destination of the mirrored copy on the target
    pub target: String,
    /// Rewritten `target:container[:mode]` spec
    pub spec: String,
}

impl RemappedVolume {
    pub fn is_passthrough(&self) -> bool {
        self.source.is_none()
    }
}

/// Rewrite `local:container` to `<workdir>/<local-name>:container`.
pub fn remap(spec: &str, workdir: &str) -> Result<RemappedVolume, ComposeError> {
    let volume = VolumeSpec::parse(spec)?;
    let workdir = trim_dir(workdir);

    if trim_dir(&volume.local) == workdir {
        return Ok(RemappedVolume {
            source: None,
            target: workdir.to_string(),
            spec: spec.to_string(),
        });
    }

    let name = Path::new(trim_dir(&volume.local))
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| *n != "..")
        .ok_or_else(|| {
            ComposeError::invalid(
                "volumes",
                format!("cannot derive a directory name from '{}'", volume.local),
            )
        })?;

    let target = format!("{}/{}", workdir, name);
    Ok(RemappedVolume {
        source: Some(paths::expand_home(&volume.local)),
        spec: volume.render(&target),
        target,
    })
}

/// Remap every configured volume; empty when `volumes` is absent.
pub fn remap_all(container: &OptionSet, workdir: &str) -> Result<Vec<RemappedVolume>, ComposeError> {
    match container.get("volumes") {
        Some(value) => string_list("volumes", value)?
            .iter()
            .map(|spec| remap(spec, workdir))
            .collect(),
        None => Ok(Vec::new()),
    }
}

/// Rewrite relative local paths to absolute ones for `docker run`, which
/// treats a relative source as a named volume.
pub fn resolve_local(container: &OptionSet, base: &Path) -> Result<Option<Value>, ComposeError> {
    let Some(value) = container.get("volumes") else {
        return Ok(None);
    };

    let resolved = string_list("volumes", value)?
        .iter()
        .map(|spec| {
            let volume = VolumeSpec::parse(spec)?;
            let host = paths::absolutize(&volume.local, base);
            Ok(Value::String(volume.render(&host.to_string_lossy())))
        })
        .collect::<Result<Vec<_>, ComposeError>>()?;

    Ok(Some(Value::Sequence(resolved)))
}

fn trim_dir(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        path
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::tests::options;

    #[test]
    fn local_dir_is_moved_under_workdir() {
        let out = remap("./data:/data", "/scratch/run1").unwrap();
        assert_eq!(out.spec, "/scratch/run1/data:/data");
        assert_eq!(out.target, "/scratch/run1/data");
        assert_eq!(out.source, Some(PathBuf::from("./data")));
    }

    #[test]
    fn mode_suffix_is_preserved() {
        let out = remap("/home/alice/inputs/:/in:ro", "/scratch/run1/").unwrap();
        assert_eq!(out.spec, "/scratch/run1/inputs:/in:ro");
    }

    #[test]
    fn workdir_mount_passes_through() {
        let out = remap("/scratch/run1:/work", "/scratch/run1/").unwrap();
        assert_eq!(out.spec, "/scratch/run1:/work");
        assert!(out.is_passthrough());
    }

    #[test]
    fn every_spec_yields_one_mapping() {
        let set = options("volumes: ['a:/a', '/x/b:/b', 'run1:/w']\n");
        let out = remap_all(&set, "run1").unwrap();
        let specs: Vec<&str> = out.iter().map(|v| v.spec.as_str()).collect();
        assert_eq!(specs, vec!["run1/a:/a", "run1/b:/b", "run1:/w"]);
    }

    #[test]
    fn malformed_specs_are_rejected() {
        assert!(remap("/data", "run1").is_err());
        assert!(remap(":/data", "run1").is_err());
        assert!(remap("a:b:c:d", "run1").is_err());
        assert!(remap("..:/up", "run1").is_err());
    }

    #[test]
    fn absent_volumes_remap_to_nothing() {
        assert!(remap_all(&options("image: app:v1\n"), "run1").unwrap().is_empty());
        assert_eq!(resolve_local(&options("image: app:v1\n"), Path::new("/")).unwrap(), None);
    }

    #[test]
    fn local_volumes_become_absolute() {
        let set = options("volumes: ['./data:/data', '/abs:/abs:ro']\n");
        let resolved = resolve_local(&set, Path::new("/home/alice/project")).unwrap();
        assert_eq!(
            resolved,
            Some(Value::Sequence(vec![
                Value::String("/home/alice/project/data:/data".into()),
                Value::String("/abs:/abs:ro".into()),
            ]))
        );
    }
}
