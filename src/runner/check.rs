//! Exit code and stderr checks layered over plain execution.

use crate::error::ExecError;
use crate::execution::ExecResult;
use crate::Result;

/// Options for [`Runner::check_call`](super::Runner::check_call) and
/// [`Runner::check_stderr`](super::Runner::check_stderr).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOptions {
    /// Exit codes counted as success.
    pub expected: Vec<i32>,
    /// Context prepended to the logged error message.
    pub error_info: Option<String>,
    /// Return an error on a failed check; otherwise only log it.
    pub raise_on_err: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            expected: vec![0],
            error_info: None,
            raise_on_err: true,
        }
    }
}

impl CheckOptions {
    /// Create options accepting only exit code 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the accepted exit codes.
    pub fn expected(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.expected = codes.into_iter().collect();
        self
    }

    /// Set the context logged ahead of a failure.
    pub fn error_info(mut self, info: impl Into<String>) -> Self {
        self.error_info = Some(info.into());
        self
    }

    /// Choose between failing and logging on a failed check.
    pub fn raise_on_err(mut self, raise: bool) -> Self {
        self.raise_on_err = raise;
        self
    }
}

/// Fail unless the exit code is one of `options.expected`.
pub(crate) fn exit_code(result: ExecResult, options: &CheckOptions) -> Result<ExecResult> {
    if result
        .exit_code()
        .is_some_and(|code| options.expected.contains(&code))
    {
        return Ok(result);
    }
    report(
        ExecError::CalledProcess {
            result: Box::new(result),
            expected: options.expected.clone(),
        },
        options,
    )
}

/// Fail if anything was written to stderr.
pub(crate) fn no_stderr(result: ExecResult, options: &CheckOptions) -> Result<ExecResult> {
    if !result.has_stderr() {
        return Ok(result);
    }
    report(
        ExecError::UnexpectedStderr {
            result: Box::new(result),
        },
        options,
    )
}

fn report(error: ExecError, options: &CheckOptions) -> Result<ExecResult> {
    match &options.error_info {
        Some(info) => tracing::error!("{}\n{}", info, error),
        None => tracing::error!("{}", error),
    }
    if options.raise_on_err {
        return Err(error);
    }
    match error {
        ExecError::CalledProcess { result, .. } | ExecError::UnexpectedStderr { result } => {
            Ok(*result)
        }
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(code: i32, stderr: &[&str]) -> ExecResult {
        ExecResult::new("make")
            .with_stdout(Some(vec![b"ok".to_vec()]))
            .with_stderr(Some(stderr.iter().map(|s| s.as_bytes().to_vec()).collect()))
            .with_exit_code(code)
    }

    #[test]
    fn test_defaults() {
        let options = CheckOptions::default();
        assert_eq!(options.expected, vec![0]);
        assert!(options.error_info.is_none());
        assert!(options.raise_on_err);
    }

    #[test]
    fn test_expected_code_passes() {
        let checked = exit_code(result(0, &[]), &CheckOptions::new()).unwrap();
        assert_eq!(checked, result(0, &[]));

        let options = CheckOptions::new().expected([0, 75]);
        assert!(exit_code(result(75, &[]), &options).is_ok());
    }

    #[test]
    fn test_unexpected_code_fails() {
        let err = exit_code(result(75, &[]), &CheckOptions::new()).unwrap_err();
        match &err {
            ExecError::CalledProcess { result, expected } => {
                assert_eq!(result.exit_code(), Some(75));
                assert_eq!(expected, &vec![0]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("returned exit code 75 while expected [0]"));
    }

    #[test]
    fn test_missing_exit_code_fails() {
        let bare = ExecResult::new("make");
        assert!(exit_code(bare, &CheckOptions::new()).is_err());
    }

    #[test]
    fn test_no_raise_returns_result() {
        let options = CheckOptions::new()
            .raise_on_err(false)
            .error_info("while building");
        let checked = exit_code(result(2, &["boom"]), &options).unwrap();
        assert_eq!(checked.exit_code(), Some(2));

        let checked = no_stderr(result(0, &["warn"]), &options).unwrap();
        assert!(checked.has_stderr());
    }

    #[test]
    fn test_stderr_fails() {
        let err = no_stderr(result(0, &["warning: x"]), &CheckOptions::new()).unwrap_err();
        assert!(matches!(err, ExecError::UnexpectedStderr { .. }));
        assert_eq!(err.exit_code(), Some(0));
    }

    #[test]
    fn test_empty_stderr_passes() {
        assert!(no_stderr(result(0, &[]), &CheckOptions::new()).is_ok());

        let closed = ExecResult::new("make").with_exit_code(0);
        assert!(no_stderr(closed, &CheckOptions::new()).is_ok());
    }
}
