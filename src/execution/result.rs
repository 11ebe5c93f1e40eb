//! Execution result types.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::ExecError;
use crate::Result;

/// Maximum number of lines kept by the brief views.
const BRIEF_MAX_LINES: usize = 7;
/// Lines kept from each end when a brief view is elided.
const BRIEF_EDGE_LINES: usize = 3;

/// Result of one command execution.
///
/// Captured streams are `None` when the stream was not opened for the call,
/// and an empty vector when it was opened but the child wrote nothing.
/// Equality and hashing cover the command, stdin echo, both streams and the
/// exit code; the run duration is informational only.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    command: String,
    stdin: Option<String>,
    stdout: Option<Vec<Vec<u8>>>,
    stderr: Option<Vec<Vec<u8>>>,
    exit_code: Option<i32>,
    duration: Duration,
}

impl ExecResult {
    /// Create an empty result for the given (already masked) command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Set the stdin echo. Bytes are decoded lossily and trimmed.
    pub fn with_stdin(mut self, stdin: impl AsRef<[u8]>) -> Self {
        self.stdin = Some(decode_trimmed(stdin.as_ref()));
        self
    }

    /// Set the captured stdout lines.
    pub fn with_stdout(mut self, stdout: Option<Vec<Vec<u8>>>) -> Self {
        self.stdout = stdout;
        self
    }

    /// Set the captured stderr lines.
    pub fn with_stderr(mut self, stderr: Option<Vec<Vec<u8>>>) -> Self {
        self.stderr = stderr;
        self
    }

    /// Set the exit code.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Set the run duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Executed command, with secrets masked.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Data fed to the child's stdin, if any.
    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    /// Captured stdout lines, or `None` if stdout was not opened.
    pub fn stdout(&self) -> Option<&[Vec<u8>]> {
        self.stdout.as_deref()
    }

    /// Captured stderr lines, or `None` if stderr was not opened.
    pub fn stderr(&self) -> Option<&[Vec<u8>]> {
        self.stderr.as_deref()
    }

    /// Exit code of the command.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Wall-clock run time.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Check if command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Whether anything was written to stderr.
    pub fn has_stderr(&self) -> bool {
        self.stderr.as_ref().is_some_and(|lines| !lines.is_empty())
    }

    /// Stdout lines joined with `\n`.
    pub fn stdout_bin(&self) -> Vec<u8> {
        join_lines(self.stdout())
    }

    /// Stderr lines joined with `\n`.
    pub fn stderr_bin(&self) -> Vec<u8> {
        join_lines(self.stderr())
    }

    /// Stdout as trimmed text.
    pub fn stdout_str(&self) -> String {
        decode_trimmed(&self.stdout_bin())
    }

    /// Stderr as trimmed text.
    pub fn stderr_str(&self) -> String {
        decode_trimmed(&self.stderr_bin())
    }

    /// Stdout lines decoded as text.
    pub fn stdout_lines(&self) -> impl Iterator<Item = Cow<'_, str>> {
        self.stdout()
            .unwrap_or_default()
            .iter()
            .map(|line| String::from_utf8_lossy(line))
    }

    /// Stderr lines decoded as text.
    pub fn stderr_lines(&self) -> impl Iterator<Item = Cow<'_, str>> {
        self.stderr()
            .unwrap_or_default()
            .iter()
            .map(|line| String::from_utf8_lossy(line))
    }

    /// Short stdout view: at most 7 lines (3 first, `...`, 3 last).
    pub fn stdout_brief(&self) -> String {
        brief(self.stdout())
    }

    /// Short stderr view: at most 7 lines (3 first, `...`, 3 last).
    pub fn stderr_brief(&self) -> String {
        brief(self.stderr())
    }

    /// Deserialize stdout as JSON.
    pub fn stdout_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.stdout_str()).map_err(|e| self.deserialize_error("json", e))
    }

    /// Deserialize stdout as YAML.
    pub fn stdout_yaml<T: DeserializeOwned>(&self) -> Result<T> {
        serde_yaml::from_str(&self.stdout_str()).map_err(|e| self.deserialize_error("yaml", e))
    }

    fn deserialize_error(&self, format: &'static str, err: impl fmt::Display) -> ExecError {
        tracing::error!(command = %self.command, format, "stdout is not valid {}: {}", format, err);
        ExecError::Deserialize {
            command: self.command.clone(),
            format,
            details: format!("{err}\n{}", self.stdout_brief()),
        }
    }
}

impl PartialEq for ExecResult {
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command
            && self.stdin == other.stdin
            && self.stdout == other.stdout
            && self.stderr == other.stderr
            && self.exit_code == other.exit_code
    }
}

impl Eq for ExecResult {}

impl Hash for ExecResult {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.command.hash(state);
        self.stdin.hash(state);
        self.stdout.hash(state);
        self.stderr.hash(state);
        self.exit_code.hash(state);
    }
}

impl fmt::Display for ExecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExecResult(\n\tcmd={:?},\n\tstdout=\n'{}',\n\tstderr=\n'{}',\n\texit_code={}\n)",
            self.command,
            self.stdout_brief(),
            self.stderr_brief(),
            self.exit_code
                .map_or_else(|| "<none>".to_string(), |c| c.to_string()),
        )
    }
}

fn join_lines(lines: Option<&[Vec<u8>]>) -> Vec<u8> {
    lines.map(|lines| lines.join(&b'\n')).unwrap_or_default()
}

fn decode_trimmed(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

fn brief(lines: Option<&[Vec<u8>]>) -> String {
    let lines = lines.unwrap_or_default();
    if lines.len() <= BRIEF_MAX_LINES {
        return decode_trimmed(&lines.join(&b'\n'));
    }
    let mut kept: Vec<&[u8]> = Vec::with_capacity(BRIEF_EDGE_LINES * 2 + 1);
    kept.extend(lines[..BRIEF_EDGE_LINES].iter().map(Vec::as_slice));
    kept.push(b"...");
    kept.extend(
        lines[lines.len() - BRIEF_EDGE_LINES..]
            .iter()
            .map(Vec::as_slice),
    );
    decode_trimmed(&kept.join(&b'\n'))
}

/// A single output line delivered while the command is still running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Raw line bytes, newline stripped.
    pub raw: Vec<u8>,
    /// Stream source.
    pub source: OutputSource,
}

/// Source of output data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSource {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputLine {
    /// Create a new output line.
    pub fn new(raw: Vec<u8>, source: OutputSource) -> Self {
        Self { raw, source }
    }

    /// Decoded text (best effort).
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }
}

impl fmt::Display for OutputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}
