//! Shell conventions derived from an operating system identifier
//!
//! Every job starts by deriving how scripts are named and invoked on the
//! runner it was scheduled on. The derivation is a pure function of the
//! operating system string (`ubuntu-latest`, `windows-2022`, `macos-14`, ...).

use crate::core::command::CommandDescriptor;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Prefix that marks a Windows runner
const WINDOWS_MARKER: &str = "windows";

/// Conventions for invoking scripts on a given operating system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConventions {
    /// The operating system identifier these conventions were derived from
    pub os: String,

    /// Whether this is a Windows runner
    pub is_windows: bool,

    /// Shell used to run scripts (`cmd` or `bash`)
    pub shell_name: String,

    /// Prefix needed to run a script from the current directory
    pub script_prefix: String,

    /// Extension of shell scripts
    pub script_extension: String,

    /// Extension of compressed archives
    pub compressed_extension: String,

    /// Extension of executables
    pub executable_extension: String,

    /// Command used to source a script into the current shell
    pub source_command: String,

    /// Privilege escalation prefix (empty when not applicable)
    pub sudo_command: String,

    /// Separator that chains commands unconditionally
    pub command_separator: String,
}

impl ShellConventions {
    /// Derive the conventions for an operating system identifier
    pub fn from_os(os: &str) -> Self {
        let is_windows = os
            .get(..WINDOWS_MARKER.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(WINDOWS_MARKER));

        if is_windows {
            Self {
                os: os.to_string(),
                is_windows,
                shell_name: "cmd".to_string(),
                script_prefix: String::new(),
                script_extension: ".cmd".to_string(),
                compressed_extension: ".zip".to_string(),
                executable_extension: ".exe".to_string(),
                source_command: "call".to_string(),
                sudo_command: String::new(),
                command_separator: "&".to_string(),
            }
        } else {
            Self {
                os: os.to_string(),
                is_windows,
                shell_name: "bash".to_string(),
                script_prefix: "./".to_string(),
                script_extension: ".sh".to_string(),
                compressed_extension: ".gz".to_string(),
                executable_extension: String::new(),
                source_command: "source".to_string(),
                sudo_command: "sudo".to_string(),
                command_separator: ";".to_string(),
            }
        }
    }

    /// Conventions for the machine this process runs on
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::from_os("windows")
        } else {
            Self::from_os(std::env::consts::OS)
        }
    }

    /// Named outputs as `(key, value)` pairs, in a stable order
    pub fn outputs(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("shell_name", self.shell_name.as_str()),
            ("script_prefix", self.script_prefix.as_str()),
            ("script_extension", self.script_extension.as_str()),
            ("compressed_extension", self.compressed_extension.as_str()),
            ("executable_extension", self.executable_extension.as_str()),
            ("source_command", self.source_command.as_str()),
            ("sudo_command", self.sudo_command.as_str()),
            ("command_separator", self.command_separator.as_str()),
        ]
    }

    /// Render the outputs as `key=value` lines
    pub fn to_outputs(&self) -> String {
        self.outputs()
            .into_iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }

    /// Append the outputs to a file (for example the file named by `$GITHUB_OUTPUT`)
    pub fn write_outputs(&self, path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(self.to_outputs().as_bytes())
    }

    /// File name of a script with the platform extension (`Bootstrap` -> `Bootstrap.sh`)
    pub fn script_name(&self, stem: &str) -> String {
        format!("{}{}", stem, self.script_extension)
    }

    /// Build a command that runs a script located in `dir`
    pub fn script_command(&self, dir: &Path, stem: &str, args: &[String]) -> CommandDescriptor {
        let script = self.script_name(stem);

        if self.is_windows {
            CommandDescriptor::new("cmd")
                .arg("/c")
                .arg(script)
                .args(args.iter().cloned())
                .current_dir(dir)
        } else {
            CommandDescriptor::new(format!("{}{}", self.script_prefix, script))
                .args(args.iter().cloned())
                .current_dir(dir)
        }
    }

    /// Wrap a command so that it runs after sourcing an activation script.
    ///
    /// Relative script paths are resolved against the command's working
    /// directory. On POSIX the original program and its arguments are passed as
    /// positional parameters to `bash -c`, so they are never re-parsed by the
    /// shell.
    pub fn activated(&self, command: CommandDescriptor, activate_script: &str) -> CommandDescriptor {
        let CommandDescriptor {
            program,
            args,
            cwd,
            env,
            timeout_secs,
            allow_failure,
            secret_args,
        } = command;
        let original_len = args.len();
        let script = if Path::new(activate_script).is_absolute() {
            activate_script.to_string()
        } else {
            format!("{}{}", self.script_prefix, activate_script)
        };

        let wrapped = if self.is_windows {
            CommandDescriptor::new("cmd")
                .arg("/c")
                .arg(self.source_command.clone())
                .arg(script)
                .arg("&&")
                .arg(program)
                .args(args)
        } else {
            CommandDescriptor::new(self.shell_name.clone())
                .arg("-c")
                .arg(format!(
                    "{} {} && exec \"$0\" \"$@\"",
                    self.source_command,
                    sh_quote(&script)
                ))
                .arg(program)
                .args(args)
        };

        // Secret positions shift by the wrapper prefix
        let offset = wrapped.args.len() - original_len;
        CommandDescriptor {
            cwd,
            env,
            timeout_secs,
            allow_failure,
            secret_args: secret_args.into_iter().map(|i| i + offset).collect(),
            ..wrapped
        }
    }

    /// Wrap a command so that its stderr is redirected into its stdout.
    ///
    /// Both streams then reach the runner through one pipe, in the order the
    /// program wrote them.
    pub fn with_merged_stderr(&self, command: CommandDescriptor) -> CommandDescriptor {
        let CommandDescriptor {
            program,
            args,
            cwd,
            env,
            timeout_secs,
            allow_failure,
            secret_args,
        } = command;
        let original_len = args.len();

        let wrapped = if self.is_windows {
            CommandDescriptor::new("cmd")
                .arg("/c")
                .arg(program)
                .args(args)
                .arg("2>&1")
        } else {
            CommandDescriptor::new(self.shell_name.clone())
                .arg("-c")
                .arg("exec \"$0\" \"$@\" 2>&1")
                .arg(program)
                .args(args)
        };

        let offset = if self.is_windows {
            wrapped.args.len() - original_len - 1
        } else {
            wrapped.args.len() - original_len
        };
        CommandDescriptor {
            cwd,
            env,
            timeout_secs,
            allow_failure,
            secret_args: secret_args.into_iter().map(|i| i + offset).collect(),
            ..wrapped
        }
    }
}

/// Single-quote a word for `sh` unless it is made of safe characters only
fn sh_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-' | ':'));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}
