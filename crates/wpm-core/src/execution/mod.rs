pub mod operation_log_store;
mod tokio_process;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use crate::models::{CoreError, CoreErrorKind, CoreResult, ManagerAction, ManagerId, TaskType};

pub use operation_log_store::OperationLogStore;
pub use tokio_process::TokioProcessExecutor;

pub type ExecutionResult<T> = CoreResult<T>;

pub type ProcessWaitFuture = Pin<Box<dyn Future<Output = ExecutionResult<ProcessOutput>> + Send>>;

pub type StdoutLineFuture<'a> =
    Pin<Box<dyn Future<Output = ExecutionResult<Option<String>>> + Send + 'a>>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    pub fn validate(
        &self,
        manager: ManagerId,
        task_type: TaskType,
        action: ManagerAction,
    ) -> ExecutionResult<()> {
        if self.program.as_os_str().is_empty() {
            return Err(invalid_input(
                manager,
                task_type,
                action,
                "command program path must not be empty",
            ));
        }

        if self
            .args
            .iter()
            .any(|arg| arg.is_empty() || arg.contains('\0'))
        {
            return Err(invalid_input(
                manager,
                task_type,
                action,
                "command args must be non-empty and must not contain NUL bytes",
            ));
        }

        if self
            .env
            .iter()
            .any(|(key, value)| key.is_empty() || key.contains('\0') || value.contains('\0'))
        {
            return Err(invalid_input(
                manager,
                task_type,
                action,
                "environment keys must be non-empty and no key or value may contain NUL bytes",
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessSpawnRequest {
    pub manager: ManagerId,
    pub task_type: TaskType,
    pub action: ManagerAction,
    pub command: CommandSpec,
    pub timeout: Option<Duration>,
    pub requested_at: SystemTime,
}

impl ProcessSpawnRequest {
    pub fn new(
        manager: ManagerId,
        task_type: TaskType,
        action: ManagerAction,
        command: CommandSpec,
    ) -> Self {
        Self {
            manager,
            task_type,
            action,
            command,
            timeout: None,
            requested_at: SystemTime::now(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> ExecutionResult<()> {
        self.command
            .validate(self.manager, self.task_type, self.action)?;

        if let Some(timeout) = self.timeout
            && timeout.is_zero()
        {
            return Err(invalid_input(
                self.manager,
                self.task_type,
                self.action,
                "timeout must be greater than zero when provided",
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessTerminationMode {
    Graceful { grace_period: Duration },
    Immediate,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessExitStatus {
    ExitCode(i32),
    Terminated,
}

impl ProcessExitStatus {
    pub fn code(self) -> Option<i32> {
        match self {
            Self::ExitCode(code) => Some(code),
            Self::Terminated => None,
        }
    }
}

/// What is left once a process exits. `stdout` only holds the bytes that were
/// not already consumed through [`RunningProcess::next_stdout_line`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessOutput {
    pub status: ProcessExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

pub trait RunningProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Next line of standard output as the process produces it, without the
    /// trailing line break. `None` once stdout is closed.
    fn next_stdout_line(&mut self) -> StdoutLineFuture<'_>;

    fn terminate(&self, mode: ProcessTerminationMode) -> ExecutionResult<()>;

    fn wait(self: Box<Self>) -> ProcessWaitFuture;
}

pub trait ProcessExecutor: Send + Sync {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>>;
}

pub fn spawn_validated(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<Box<dyn RunningProcess>> {
    request.validate()?;
    executor.spawn(request)
}

/// Decodes one raw stdout line. Invalid UTF-8 is replaced rather than
/// rejected, and `\r\n` or `\n` endings are stripped.
pub fn decode_line(raw: &[u8]) -> String {
    let mut line = String::from_utf8_lossy(raw).into_owned();
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}

fn invalid_input(
    manager: ManagerId,
    task_type: TaskType,
    action: ManagerAction,
    message: &str,
) -> CoreError {
    CoreError::new(CoreErrorKind::InvalidInput, message)
        .manager(manager)
        .task(task_type)
        .action(action)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CommandSpec, ProcessSpawnRequest, decode_line};
    use crate::models::{CoreErrorKind, ManagerAction, ManagerId, TaskType};

    fn request(command: CommandSpec) -> ProcessSpawnRequest {
        ProcessSpawnRequest::new(
            ManagerId::WinGet,
            TaskType::FindPackages,
            ManagerAction::Search,
            command,
        )
    }

    #[test]
    fn empty_program_is_rejected() {
        let error = request(CommandSpec::new(""))
            .validate()
            .expect_err("empty program must fail");
        assert_eq!(error.kind, CoreErrorKind::InvalidInput);
        assert_eq!(error.action, Some(ManagerAction::Search));
    }

    #[test]
    fn empty_argument_is_rejected() {
        let error = request(CommandSpec::new("winget").arg("search").arg(""))
            .validate()
            .expect_err("empty arg must fail");
        assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let error = request(CommandSpec::new("winget"))
            .timeout(Duration::ZERO)
            .validate()
            .expect_err("zero timeout must fail");
        assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    }

    #[test]
    fn decode_line_strips_crlf_and_replaces_invalid_bytes() {
        assert_eq!(decode_line(b"Git  Git.Git\r\n"), "Git  Git.Git");
        assert_eq!(decode_line(b"a\xffb\n"), "a\u{fffd}b");
    }
}
