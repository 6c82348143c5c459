use anyhow::{Context, Result};
use dialoguer::Password;

use super::remote::SshTarget;

/// Environment variable consulted before prompting
pub const PASSWORD_ENV: &str = "DOCKSING_PASSWORD";

/// Supplies the password used to authenticate an SSH session
pub trait CredentialProvider {
    fn password(&self, target: &SshTarget) -> Result<String>;
}

/// Read the password from an environment variable
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn is_set(&self) -> bool {
        std::env::var_os(&self.var).is_some()
    }
}

impl CredentialProvider for EnvCredentials {
    fn password(&self, _target: &SshTarget) -> Result<String> {
        std::env::var(&self.var).with_context(|| format!("{} is not set", self.var))
    }
}

/// Ask for the password on the terminal without echoing it
pub struct PromptCredentials;

impl CredentialProvider for PromptCredentials {
    fn password(&self, target: &SshTarget) -> Result<String> {
        Password::new()
            .with_prompt(format!("Password for {}", target))
            .interact()
            .context("Failed to read password")
    }
}

/// `DOCKSING_PASSWORD` when set, otherwise an interactive prompt
pub fn default_provider() -> Box<dyn CredentialProvider> {
    let env = EnvCredentials::new(PASSWORD_ENV);
    if env.is_set() {
        tracing::debug!("Using password from {}", PASSWORD_ENV);
        Box::new(env)
    } else {
        Box::new(PromptCredentials)
    }
}
