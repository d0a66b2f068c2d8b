//! Command descriptions handed to a [`CommandRunner`](super::CommandRunner).

use std::fmt;
use std::path::PathBuf;

/// What to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// A program with a fixed argv, no shell involved
    Program { program: String, args: Vec<String> },
    /// A shell command string (globs, redirections)
    Shell(String),
}

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub kind: CommandKind,
    /// Working directory; inherits the driver's when unset
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn program<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: CommandKind::Program {
                program: program.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
            cwd: None,
        }
    }

    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Shell(script.into()),
            cwd: None,
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Short name used in logs and errors.
    pub fn program_name(&self) -> &str {
        match &self.kind {
            CommandKind::Program { program, .. } => program,
            CommandKind::Shell(script) => script.split_whitespace().next().unwrap_or("sh"),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CommandKind::Program { program, args } => {
                write!(f, "{program}")?;
                for arg in args {
                    if arg.is_empty() || arg.contains(char::is_whitespace) {
                        write!(f, " {arg:?}")?;
                    } else {
                        write!(f, " {arg}")?;
                    }
                }
                Ok(())
            }
            CommandKind::Shell(script) => write!(f, "sh -c {script:?}"),
        }
    }
}
