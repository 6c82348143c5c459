use anyhow::Result;
use serde::Deserialize;

/// What the setup stage does when the working directory already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SetupPolicy {
    /// Create the directory; abort if it already exists
    #[default]
    FailIfExists,
    /// Create the directory and any missing parents; reuse it if present
    CreateIfMissing,
    /// Reuse the directory if present, otherwise create it
    SkipIfPresent,
}

/// Directory action decided by a [`SetupPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupAction {
    Create { parents: bool },
    Reuse,
}

impl SetupPolicy {
    pub fn decide(self, workdir: &str, exists: bool) -> Result<SetupAction> {
        match (self, exists) {
            (Self::FailIfExists, true) => anyhow::bail!(
                "Working directory '{}' already exists. Remove it, pick another `remotedir`, \
                 or pass --setup create-if-missing to reuse it.",
                workdir
            ),
            (Self::FailIfExists, false) | (Self::SkipIfPresent, false) => {
                Ok(SetupAction::Create { parents: false })
            }
            (Self::CreateIfMissing, false) => Ok(SetupAction::Create { parents: true }),
            (Self::CreateIfMissing, true) | (Self::SkipIfPresent, true) => Ok(SetupAction::Reuse),
        }
    }
}

impl std::fmt::Display for SetupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::FailIfExists => "fail-if-exists",
            Self::CreateIfMissing => "create-if-missing",
            Self::SkipIfPresent => "skip-if-present",
        };
        f.write_str(name)
    }
}
