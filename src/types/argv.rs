// ABOUTME: Non-empty argument vectors for external commands.
// ABOUTME: Accepts either a YAML list or a whitespace-separated string.

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgvError {
    #[error("command cannot be empty")]
    Empty,

    #[error("command program cannot be blank")]
    BlankProgram,
}

/// A command line with at least a program name. Never run through a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ArgvEntry", into = "Vec<String>")]
pub struct Argv(NonEmpty<String>);

impl Argv {
    pub fn new(program: impl Into<String>) -> Self {
        Self(NonEmpty::new(program.into()))
    }

    pub fn from_vec(parts: Vec<String>) -> Result<Self, ArgvError> {
        let parts = NonEmpty::from_vec(parts).ok_or(ArgvError::Empty)?;
        if parts.head.trim().is_empty() {
            return Err(ArgvError::BlankProgram);
        }
        Ok(Self(parts))
    }

    /// Split on whitespace. Quoting is not interpreted; use the list form for
    /// arguments containing spaces.
    pub fn parse(line: &str) -> Result<Self, ArgvError> {
        Self::from_vec(line.split_whitespace().map(str::to_string).collect())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.0.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        for arg in args {
            self.0.push(arg.into());
        }
        self
    }

    pub fn program(&self) -> &str {
        &self.0.head
    }

    pub fn rest(&self) -> &[String] {
        &self.0.tail
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }

    /// Prepend another command, e.g. a privilege escalation prefix.
    pub fn prefixed(&self, prefix: &Argv) -> Argv {
        let mut parts = prefix.to_vec();
        parts.extend(self.0.iter().cloned());
        // prefix is non-empty, so parts is too
        Argv(NonEmpty::from_vec(parts).unwrap_or_else(|| self.0.clone()))
    }
}

impl fmt::Display for Argv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in self.0.iter() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            if part.is_empty() || part.chars().any(char::is_whitespace) {
                write!(f, "'{}'", part.replace('\'', "'\\''"))?;
            } else {
                f.write_str(part)?;
            }
        }
        Ok(())
    }
}

impl From<Argv> for Vec<String> {
    fn from(argv: Argv) -> Self {
        argv.0.into()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArgvEntry {
    Line(String),
    Parts(Vec<String>),
}

impl TryFrom<ArgvEntry> for Argv {
    type Error = ArgvError;

    fn try_from(entry: ArgvEntry) -> Result<Self, Self::Error> {
        match entry {
            ArgvEntry::Line(line) => Argv::parse(&line),
            ArgvEntry::Parts(parts) => Argv::from_vec(parts),
        }
    }
}
