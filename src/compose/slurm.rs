use super::{option_name, scalar, shell_escape, ComposeError, OptionSet};

/// Compose `srun` followed by one `--key=value` flag per batch option.
/// Option names are passed through verbatim; the scheduler validates them.
pub fn batch_flags(options: &OptionSet) -> Result<Vec<String>, ComposeError> {
    let mut cmd = vec!["srun".to_string()];
    for (key, value) in options.iter() {
        let key = option_name(key)?;
        cmd.push(format!("--{}={}", key, shell_escape(&scalar(key, value)?)));
    }
    Ok(cmd)
}

/// Compose the remote build of `<digest>.sif` from the transferred
/// `<digest>.tar` archive, run from inside the working directory.
pub fn build_command(digest: &str) -> Vec<String> {
    vec![
        "srun".to_string(),
        "singularity build".to_string(),
        format!("{}.sif", digest),
        format!("docker-archive://{}.tar", digest),
    ]
}
