//! Command building and representation.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

/// How the program to run is expressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Command text handed to `/bin/sh -c` as-is.
    Shell(String),
    /// Program and arguments, executed directly.
    Argv(Vec<String>),
}

impl CommandLine {
    /// Text form used for masking and logging.
    pub fn display_text(&self) -> String {
        match self {
            Self::Shell(text) => text.clone(),
            Self::Argv(args) => args.join(" "),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_text())
    }
}

/// A command to be executed, together with its per-call options.
#[derive(Debug, Clone)]
pub struct Command {
    /// The program to execute.
    pub line: CommandLine,
    /// Log streamed output at INFO instead of DEBUG.
    pub verbose: bool,
    /// Maximum execution time; `None` falls back to the runner default.
    pub timeout: Option<Duration>,
    /// Capture stdout (otherwise it goes to the null device).
    pub open_stdout: bool,
    /// Capture stderr (otherwise it goes to the null device).
    pub open_stderr: bool,
    /// Data written to the child's stdin before it is closed.
    pub stdin: Option<Vec<u8>>,
    /// Extra masking pattern for this call, applied after the runner's.
    pub mask: Option<Regex>,
    /// Working directory override (if any).
    pub cwd: Option<PathBuf>,
    /// Environment variables added to the inherited environment.
    pub env: HashMap<String, String>,
}

impl Command {
    /// Create a shell command with the given command line.
    pub fn new(command_line: impl Into<String>) -> Self {
        Self::from_line(CommandLine::Shell(command_line.into()))
    }

    /// Create a command executed directly from its argument vector.
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_line(CommandLine::Argv(args.into_iter().map(Into::into).collect()))
    }

    fn from_line(line: CommandLine) -> Self {
        Self {
            line,
            verbose: false,
            timeout: None,
            open_stdout: true,
            open_stderr: true,
            stdin: None,
            mask: None,
            cwd: None,
            env: HashMap::new(),
        }
    }

    /// Log at INFO instead of DEBUG.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Set whether to capture stdout.
    pub fn open_stdout(mut self, open: bool) -> Self {
        self.open_stdout = open;
        self
    }

    /// Set whether to capture stderr.
    pub fn open_stderr(mut self, open: bool) -> Self {
        self.open_stderr = open;
        self
    }

    /// Feed data to the child's stdin.
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Add a masking pattern for this call only.
    pub fn mask(mut self, pattern: Regex) -> Self {
        self.mask = Some(pattern);
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }
}

impl From<&str> for Command {
    fn from(command_line: &str) -> Self {
        Self::new(command_line)
    }
}

impl From<String> for Command {
    fn from(command_line: String) -> Self {
        Self::new(command_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_new() {
        let cmd = Command::new("ls -la");
        assert_eq!(cmd.line, CommandLine::Shell("ls -la".into()));
        assert!(!cmd.verbose);
        assert!(cmd.timeout.is_none());
        assert!(cmd.open_stdout);
        assert!(cmd.open_stderr);
        assert!(cmd.stdin.is_none());
        assert!(cmd.mask.is_none());
        assert!(cmd.cwd.is_none());
        assert!(cmd.env.is_empty());
    }

    #[test]
    fn test_command_builder_chain() {
        let cmd = Command::new("cargo build")
            .cwd("/project")
            .env("RUST_LOG", "debug")
            .timeout(Duration::from_secs(60))
            .verbose(true)
            .open_stderr(false)
            .stdin("input");

        assert_eq!(cmd.cwd, Some(PathBuf::from("/project")));
        assert_eq!(cmd.env.get("RUST_LOG"), Some(&"debug".to_string()));
        assert_eq!(cmd.timeout, Some(Duration::from_secs(60)));
        assert!(cmd.verbose);
        assert!(!cmd.open_stderr);
        assert_eq!(cmd.stdin.as_deref(), Some(&b"input"[..]));
    }

    #[test]
    fn test_command_envs() {
        let vars = [("KEY1", "val1"), ("KEY2", "val2")];
        let cmd = Command::new("echo").envs(vars);

        assert_eq!(cmd.env.len(), 2);
        assert_eq!(cmd.env.get("KEY1"), Some(&"val1".to_string()));
        assert_eq!(cmd.env.get("KEY2"), Some(&"val2".to_string()));
    }

    #[test]
    fn test_argv_display() {
        let cmd = Command::argv(["printf", "%s", "hi"]);
        assert_eq!(cmd.line.display_text(), "printf %s hi");
        assert!(matches!(cmd.line, CommandLine::Argv(ref args) if args.len() == 3));
    }

    #[test]
    fn test_from_str() {
        let cmd: Command = "pwd".into();
        assert_eq!(cmd.line.to_string(), "pwd");
    }
}
