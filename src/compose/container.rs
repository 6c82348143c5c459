use serde_yaml::{Mapping, Value};

use super::{option_name, scalar, shell_escape, string_list, ComposeError, OptionSet};

/// Container runtime a run command is composed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    /// `docker run`, used for local execution
    Docker,
    /// `singularity run`, used inside a batch job
    Singularity,
}

impl Runtime {
    fn base_command(self) -> &'static str {
        match self {
            Self::Docker => "docker run",
            Self::Singularity => "singularity run",
        }
    }

    fn volume_flag(self) -> &'static str {
        match self {
            Self::Docker => "--volume",
            Self::Singularity => "--bind",
        }
    }
}

type Renderer = fn(&str, &Value, Runtime) -> Result<Vec<String>, ComposeError>;

struct RunOption {
    name: &'static str,
    render: Renderer,
}

/// The closed set of recognized container options.
const RUN_OPTIONS: &[RunOption] = &[
    RunOption { name: "environment", render: render_environment },
    RunOption { name: "volumes", render: render_volumes },
    RunOption { name: "ports", render: render_ports },
    RunOption { name: "working_dir", render: render_working_dir },
    RunOption { name: "container_name", render: render_container_name },
    RunOption { name: "image", render: positional },
    RunOption { name: "commands", render: positional },
];

fn renderer(name: &str) -> Option<Renderer> {
    RUN_OPTIONS
        .iter()
        .find(|option| option.name == name)
        .map(|option| option.render)
}

/// Compose the `docker run` / `singularity run` prefix with one flag per
/// configured option, in configuration order.
pub fn run_flags(options: &OptionSet, runtime: Runtime) -> Result<Vec<String>, ComposeError> {
    let mut cmd = vec![runtime.base_command().to_string()];

    for (key, value) in options.iter() {
        let key = option_name(key)?;
        let render =
            renderer(key).ok_or_else(|| ComposeError::UnsupportedOption(key.to_string()))?;
        cmd.extend(render(key, value, runtime)?);
    }

    Ok(cmd)
}

/// Positional arguments of the run command: the image, then the configured
/// commands joined into a single argument string.
pub fn container_args(options: &OptionSet) -> Result<Vec<String>, ComposeError> {
    let image = options
        .get("image")
        .ok_or_else(|| ComposeError::MissingOption("image".to_string()))?;
    let image = scalar("image", image)?;
    if image.is_empty() {
        return Err(ComposeError::MissingOption("image".to_string()));
    }

    let mut cmd = vec![shell_escape(&image)];

    if let Some(commands) = options.get("commands") {
        let commands = string_list("commands", commands)?;
        if !commands.is_empty() {
            cmd.push(commands.join(" "));
        }
    }

    Ok(cmd)
}

fn positional(_key: &str, _value: &Value, _runtime: Runtime) -> Result<Vec<String>, ComposeError> {
    Ok(Vec::new())
}

fn render_environment(
    key: &str,
    value: &Value,
    _runtime: Runtime,
) -> Result<Vec<String>, ComposeError> {
    merge_environment(key, value)?
        .iter()
        .map(|(name, val)| {
            let name = name
                .as_str()
                .ok_or_else(|| ComposeError::invalid(key, "variable names must be strings"))?;
            Ok(format!("--env {}", shell_escape(&format!("{}={}", name, scalar(name, val)?))))
        })
        .collect()
}

/// `environment` is either a mapping or a list of single-entry mappings.
/// Later entries win.
fn merge_environment(key: &str, value: &Value) -> Result<Mapping, ComposeError> {
    match value {
        Value::Mapping(map) => Ok(map.clone()),
        Value::Sequence(items) => {
            let mut merged = Mapping::new();
            for item in items {
                let entry = item.as_mapping().ok_or_else(|| {
                    ComposeError::invalid(key, "list entries must be NAME: value mappings")
                })?;
                for (name, val) in entry {
                    merged.insert(name.clone(), val.clone());
                }
            }
            Ok(merged)
        }
        Value::Null => Ok(Mapping::new()),
        _ => Err(ComposeError::invalid(key, "expected a mapping or a list of mappings")),
    }
}

fn render_volumes(key: &str, value: &Value, runtime: Runtime) -> Result<Vec<String>, ComposeError> {
    Ok(string_list(key, value)?
        .iter()
        .map(|volume| format!("{} {}", runtime.volume_flag(), shell_escape(volume)))
        .collect())
}

fn render_ports(key: &str, value: &Value, _runtime: Runtime) -> Result<Vec<String>, ComposeError> {
    Ok(string_list(key, value)?
        .iter()
        .map(|port| format!("-p {}", shell_escape(port)))
        .collect())
}

fn render_working_dir(
    key: &str,
    value: &Value,
    _runtime: Runtime,
) -> Result<Vec<String>, ComposeError> {
    Ok(vec![format!("--workdir {}", shell_escape(&scalar(key, value)?))])
}

fn render_container_name(
    key: &str,
    value: &Value,
    runtime: Runtime,
) -> Result<Vec<String>, ComposeError> {
    match runtime {
        Runtime::Docker => Ok(vec![format!("--name {}", shell_escape(&scalar(key, value)?))]),
        // job names come from the scheduler
        Runtime::Singularity => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::tests::options;

    fn docker(yaml: &str) -> Result<String, ComposeError> {
        let set = options(yaml);
        let mut cmd = run_flags(&set, Runtime::Docker)?;
        cmd.extend(container_args(&set)?);
        Ok(cmd.join(" "))
    }

    #[test]
    fn docker_run_with_env_and_ports() {
        let cmd = docker(
            "image: app:v1\nenvironment:\n  FOO: bar\nports:\n  - \"8080:8080\"\n",
        )
        .unwrap();
        assert_eq!(cmd, "docker run --env FOO=bar -p 8080:8080 app:v1");
    }

    #[test]
    fn missing_image_names_the_key() {
        let set = options("commands: [echo, hi]\n");
        assert_eq!(
            container_args(&set).unwrap_err(),
            ComposeError::MissingOption("image".into())
        );
    }

    #[test]
    fn commands_are_joined_into_one_argument() {
        let set = options("image: app:v1\ncommands: [python, main.py, --epochs, 3]\n");
        assert_eq!(
            container_args(&set).unwrap(),
            vec!["app:v1".to_string(), "python main.py --epochs 3".to_string()]
        );
    }

    #[test]
    fn commands_must_be_a_list() {
        let set = options("image: app:v1\ncommands: python main.py\n");
        assert!(matches!(
            container_args(&set),
            Err(ComposeError::InvalidValue { key, .. }) if key == "commands"
        ));
    }

    #[test]
    fn unknown_option_is_rejected_by_name() {
        let set = options("image: app:v1\nrestart: always\n");
        assert_eq!(
            run_flags(&set, Runtime::Docker).unwrap_err(),
            ComposeError::UnsupportedOption("restart".into())
        );
        assert_eq!(
            run_flags(&set, Runtime::Singularity).unwrap_err(),
            ComposeError::UnsupportedOption("restart".into())
        );
    }

    #[test]
    fn environment_list_is_merged_and_later_entries_win() {
        let set = options(
            "environment:\n  - A: '1'\n  - B: two\n  - A: three\nimage: app:v1\n",
        );
        let flags = run_flags(&set, Runtime::Docker).unwrap();
        assert_eq!(flags, vec!["docker run", "--env A=three", "--env B=two"]);
    }

    #[test]
    fn environment_values_with_spaces_are_quoted() {
        let set = options("environment:\n  MSG: hello world\n");
        let flags = run_flags(&set, Runtime::Docker).unwrap();
        assert_eq!(flags[1], "--env 'MSG=hello world'");
    }

    #[test]
    fn non_string_variable_names_are_invalid_environment() {
        let set = options("environment:\n  3: three\n");
        assert!(matches!(
            run_flags(&set, Runtime::Docker).unwrap_err(),
            ComposeError::InvalidValue { key, .. } if key == "environment"
        ));
    }

    #[test]
    fn volume_flag_depends_on_runtime() {
        let set = options("volumes: ['/data:/data', '/out:/out:ro']\n");
        assert_eq!(
            run_flags(&set, Runtime::Docker).unwrap()[1..],
            ["--volume /data:/data", "--volume /out:/out:ro"]
        );
        assert_eq!(
            run_flags(&set, Runtime::Singularity).unwrap()[1..],
            ["--bind /data:/data", "--bind /out:/out:ro"]
        );
    }

    #[test]
    fn container_name_only_for_docker() {
        let set = options("container_name: trainer\nworking_dir: /app\n");
        assert_eq!(
            run_flags(&set, Runtime::Docker).unwrap(),
            vec!["docker run", "--name trainer", "--workdir /app"]
        );
        assert_eq!(
            run_flags(&set, Runtime::Singularity).unwrap(),
            vec!["singularity run", "--workdir /app"]
        );
    }

    #[test]
    fn flags_follow_configuration_order() {
        let a = options("ports: ['1:1']\nenvironment: {X: y}\nvolumes: ['/a:/b']\n");
        let b = options("volumes: ['/a:/b']\nports: ['1:1']\nenvironment: {X: y}\n");

        let flags_a = run_flags(&a, Runtime::Docker).unwrap();
        assert_eq!(flags_a, vec!["docker run", "-p 1:1", "--env X=y", "--volume /a:/b"]);
        assert_eq!(flags_a, run_flags(&a, Runtime::Docker).unwrap());
        assert_eq!(
            run_flags(&b, Runtime::Docker).unwrap(),
            vec!["docker run", "--volume /a:/b", "-p 1:1", "--env X=y"]
        );
    }

    #[test]
    fn numeric_values_are_rendered() {
        let set = options("environment:\n  WORKERS: 4\nports: [8080]\n");
        assert_eq!(
            run_flags(&set, Runtime::Docker).unwrap(),
            vec!["docker run", "--env WORKERS=4", "-p 8080"]
        );
    }
}
