//! Command building for process targets.

use std::path::PathBuf;

use mcp_bridge_core::TransportError;
use thiserror::Error;

use crate::shell::resolve_executable_path;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    NotFound(String),
}

impl From<CommandBuildError> for TransportError {
    fn from(e: CommandBuildError) -> Self {
        match e {
            CommandBuildError::NotFound(program) => Self::ExecutableNotFound(program),
            other => Self::CommandBuild(other.to_string()),
        }
    }
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create new command parts.
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::NotFound(program))?;
        Ok((executable, args))
    }
}

/// Builder for the command line of a process target.
///
/// The target string is split shell-style, so `"npx -y server"` works as a
/// target; explicit arguments are appended after it verbatim.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base command line.
    pub base: String,
    /// Parameters appended after the base.
    pub params: Vec<String>,
}

impl CommandBuilder {
    /// Create a new command builder.
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: Vec::new(),
        }
    }

    /// Append parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// Build the program and its arguments.
    ///
    /// # Errors
    /// Returns error if the base cannot be split or yields no program.
    pub fn build(&self) -> Result<CommandParts, CommandBuildError> {
        let mut parts = shlex::split(&self.base)
            .ok_or_else(|| CommandBuildError::InvalidBase(self.base.clone()))?;
        parts.extend(self.params.iter().cloned());

        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }

        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_base_and_appends_params() {
        let parts = CommandBuilder::new("npx -y '@scope/server everything'")
            .params(["--port", "0"])
            .build()
            .unwrap();
        assert_eq!(parts.program, "npx");
        assert_eq!(parts.args, vec!["-y", "@scope/server everything", "--port", "0"]);
    }

    #[test]
    fn test_params_are_not_resplit() {
        let parts = CommandBuilder::new("server").params(["a b"]).build().unwrap();
        assert_eq!(parts.args, vec!["a b"]);
    }

    #[test]
    fn test_empty_and_unbalanced_bases_fail() {
        assert!(matches!(
            CommandBuilder::new("   ").build(),
            Err(CommandBuildError::EmptyCommand)
        ));
        assert!(matches!(
            CommandBuilder::new("server \"unterminated").build(),
            Err(CommandBuildError::InvalidBase(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_executable_maps_to_not_found() {
        let parts = CommandBuilder::new("definitely-not-a-real-binary-4242")
            .build()
            .unwrap();
        let err = parts.into_resolved().await.unwrap_err();
        assert!(matches!(
            TransportError::from(err),
            TransportError::ExecutableNotFound(_)
        ));
    }
}
