// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Repository sandbox for API-backend tools.
//!
//! Two checks guard every tool call:
//!
//! - **Paths** are joined onto the canonical repository root and normalised
//!   lexically. Anything that does not stay under the root is rejected before
//!   the filesystem is touched. Existing paths are additionally canonicalised
//!   so a symlink inside the repository cannot point the agent elsewhere.
//! - **Commands** are tokenised and the program must be exactly one of the
//!   allowed executable names. The program is run directly, never through a
//!   shell, so metacharacters in the remaining arguments are inert.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use crate::error::ToolError;

/// Executables `run_command` accepts when no override is configured.
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "git", "npm", "npx", "node", "yarn", "pnpm", "python", "python3", "pip", "cargo", "rustc",
    "go", "make", "ls", "cat", "head", "tail", "grep", "find", "wc", "echo", "mkdir", "touch",
    "diff", "pwd",
];

/// Confines file and command access to one repository.
#[derive(Debug, Clone)]
pub struct RepoSandbox {
    root: PathBuf,
    allowed: BTreeSet<String>,
}

impl RepoSandbox {
    /// Sandbox rooted at `root` with the default allow-list.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        Self::with_allowed_commands(root, DEFAULT_ALLOWED_COMMANDS.iter().copied())
    }

    pub fn with_allowed_commands<I, S>(root: impl AsRef<Path>, allowed: I) -> Result<Self, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root).map_err(|e| {
            ToolError::FileNotFound(format!("Repository root {}: {e}", root.display()))
        })?;
        Ok(Self {
            root,
            allowed: allowed.into_iter().map(Into::into).collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allowed_commands(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    /// Resolve a tool path argument to an absolute path inside the root.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, ToolError> {
        let resolved = normalize(&self.root.join(requested));
        if !resolved.starts_with(&self.root) {
            return Err(ToolError::SecurityViolation(format!(
                "Path '{requested}' resolves outside the repository"
            )));
        }

        if let Some(real) = canonical_ancestor(&resolved) {
            if !real.starts_with(&self.root) {
                return Err(ToolError::SecurityViolation(format!(
                    "Path '{requested}' escapes the repository through a link"
                )));
            }
        }

        Ok(resolved)
    }

    /// Path relative to the root, for display.
    pub fn display_path<'a>(&self, path: &'a Path) -> std::borrow::Cow<'a, str> {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".into(),
            Ok(rel) => rel.to_string_lossy(),
            Err(_) => path.to_string_lossy(),
        }
    }

    /// Tokenise `command` and check its program against the allow-list.
    ///
    /// Returns the program followed by its arguments.
    pub fn check_command(&self, command: &str) -> Result<Vec<String>, ToolError> {
        let tokens = tokenize(command)?;
        let Some(program) = tokens.first() else {
            return Err(ToolError::InvalidInput("command must not be empty".to_string()));
        };

        if !self.allowed.contains(program_name(program)) {
            let allowed: Vec<&str> = self.allowed_commands().collect();
            return Err(ToolError::SecurityViolation(format!(
                "Command '{program}' is not allowed. Allowed commands: {}",
                allowed.join(", ")
            )));
        }
        Ok(tokens)
    }
}

/// Program name as compared against the allow-list.
fn program_name(program: &str) -> &str {
    if cfg!(windows) {
        for ext in [".exe", ".cmd", ".bat"] {
            if let Some(stem) = program.strip_suffix(ext) {
                return stem;
            }
        }
    }
    program
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Canonical form of the deepest existing ancestor of `path`.
fn canonical_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors().find_map(|p| std::fs::canonicalize(p).ok())
}

/// Split a command line into words, honouring single and double quotes and
/// backslash escapes.
pub fn tokenize(command: &str) -> Result<Vec<String>, ToolError> {
    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote = Quote::None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => current.push('\\'),
                },
                _ => current.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_token = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_token = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if quote != Quote::None {
        return Err(ToolError::InvalidInput("unterminated quote in command".to_string()));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
