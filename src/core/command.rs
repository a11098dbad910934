//! Command descriptors
//!
//! External tools are described as an executable plus a list of arguments,
//! never as a single command-line string. Variable substitution happens
//! inside individual arguments, so a value can never split into extra
//! arguments or be re-parsed by a shell.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Placeholder printed in place of secret arguments
const MASK: &str = "***";

/// A subprocess invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    /// Executable name or path
    pub program: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory (inherits the current one when unset)
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Additional environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Timeout in seconds (no timeout when unset)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Whether a non-zero exit code is tolerated
    #[serde(default)]
    pub allow_failure: bool,

    /// Indices of arguments masked when the command is displayed
    #[serde(skip)]
    pub secret_args: Vec<usize>,
}

impl CommandDescriptor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            timeout_secs: None,
            allow_failure: false,
            secret_args: Vec::new(),
        }
    }

    /// Build a descriptor from an argv-style list (`["black", "--check", "src"]`)
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an argument that is masked in logs
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Add an argument only when `condition` holds
    pub fn arg_if(self, condition: bool, arg: impl Into<String>) -> Self {
        if condition {
            self.arg(arg)
        } else {
            self
        }
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    /// Substitute `{{ name }}` placeholders inside the program, arguments,
    /// working directory and environment values
    pub fn render(&self, variables: &HashMap<String, String>) -> Self {
        let mut rendered = self.clone();
        rendered.program = render_template(&self.program, variables);
        rendered.args = self
            .args
            .iter()
            .map(|arg| render_template(arg, variables))
            .collect();
        rendered.cwd = self
            .cwd
            .as_ref()
            .map(|cwd| PathBuf::from(render_template(&cwd.to_string_lossy(), variables)));
        rendered.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), render_template(v, variables)))
            .collect();
        rendered
    }

    /// Human-readable rendering for logs, with secrets masked
    pub fn display(&self) -> String {
        let mut parts = vec![quote(&self.program)];
        for (index, arg) in self.args.iter().enumerate() {
            if self.secret_args.contains(&index) {
                parts.push(MASK.to_string());
            } else {
                parts.push(quote(arg));
            }
        }
        parts.join(" ")
    }
}

impl std::fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display())
    }
}

fn placeholder_regex() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").ok())
        .as_ref()
}

/// Replace `{{ name }}` (and `{{name}}`) placeholders with known values.
///
/// Rendering is a single pass over the template: substituted values are
/// never scanned for placeholders themselves. Unknown placeholders are left
/// untouched.
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    let Some(placeholder) = placeholder_regex() else {
        return template.to_string();
    };
    placeholder
        .replace_all(template, |caps: &Captures| match variables.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn quote(value: &str) -> String {
    if value.is_empty() {
        "\"\"".to_string()
    } else if value.chars().any(|c| c.is_whitespace() || c == '"') {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}
