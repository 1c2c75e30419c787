use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::execution::{
    ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    ProcessTerminationMode, ProcessWaitFuture, RunningProcess, StdoutLineFuture, decode_line,
};
use crate::models::{CoreError, CoreErrorKind, ManagerAction, ManagerId, TaskType};

pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let mut cmd = tokio::process::Command::new(&request.command.program);
        cmd.args(&request.command.args);

        for (key, value) in &request.command.env {
            cmd.env(key, value);
        }

        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|error| {
            process_failure(
                request.manager,
                request.task_type,
                request.action,
                format!(
                    "failed to spawn {}: {error}",
                    request.command.program.display()
                ),
            )
        })?;

        let pid = child.id();
        let started_at = SystemTime::now();
        let stdout = child.stdout.take().map(BufReader::new);

        // stderr is drained from the start so a chatty process cannot block
        // on a full pipe while stdout is still being read line by line.
        let stderr_reader = {
            let stderr = child.stderr.take();
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                if let Some(mut handle) = stderr {
                    let _ = handle.read_to_end(&mut buffer).await;
                }
                buffer
            })
        };

        Ok(Box::new(TokioRunningProcess {
            child: Mutex::new(Some(child)),
            stdout,
            stderr_reader,
            pid,
            started_at,
            timeout: request.timeout,
            deadline: request.timeout.map(|timeout| Instant::now() + timeout),
            manager: request.manager,
            task_type: request.task_type,
            action: request.action,
        }))
    }
}

struct TokioRunningProcess {
    child: Mutex<Option<Child>>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr_reader: JoinHandle<Vec<u8>>,
    pid: Option<u32>,
    started_at: SystemTime,
    timeout: Option<Duration>,
    /// The timeout runs from spawn, so time spent reading stdout counts too.
    deadline: Option<Instant>,
    manager: ManagerId,
    task_type: TaskType,
    action: ManagerAction,
}

impl RunningProcess for TokioRunningProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn next_stdout_line(&mut self) -> StdoutLineFuture<'_> {
        let manager = self.manager;
        let task_type = self.task_type;
        let action = self.action;

        Box::pin(async move {
            let Some(stdout) = self.stdout.as_mut() else {
                return Ok(None);
            };

            let mut raw = Vec::new();
            let read = stdout.read_until(b'\n', &mut raw).await.map_err(|error| {
                process_failure(
                    manager,
                    task_type,
                    action,
                    format!("failed to read process stdout: {error}"),
                )
            })?;

            if read == 0 {
                return Ok(None);
            }
            Ok(Some(decode_line(&raw)))
        })
    }

    #[cfg(unix)]
    fn terminate(&self, mode: ProcessTerminationMode) -> ExecutionResult<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };

        let signal = match mode {
            ProcessTerminationMode::Immediate => libc::SIGKILL,
            ProcessTerminationMode::Graceful { .. } => libc::SIGTERM,
        };

        let pgid = -(pid as libc::pid_t);
        let result = unsafe { libc::kill(pgid, signal) };

        if result != 0 {
            let os_error = std::io::Error::last_os_error();
            if os_error.raw_os_error() != Some(libc::ESRCH) {
                return Err(process_failure(
                    self.manager,
                    self.task_type,
                    self.action,
                    format!("failed to send signal {signal} to process group {pid}: {os_error}"),
                ));
            }
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&self, _mode: ProcessTerminationMode) -> ExecutionResult<()> {
        let Ok(mut guard) = self.child.lock() else {
            return Ok(());
        };
        let Some(child) = guard.as_mut() else {
            return Ok(());
        };

        match child.start_kill() {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(error) => Err(process_failure(
                self.manager,
                self.task_type,
                self.action,
                format!("failed to kill process: {error}"),
            )),
        }
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let this = *self;
        let child = this.child.into_inner().ok().flatten();
        let timeout = this.timeout;
        let deadline = this.deadline;
        let started_at = this.started_at;
        let manager = this.manager;
        let task_type = this.task_type;
        let action = this.action;
        let stderr_reader = this.stderr_reader;
        let stdout = this.stdout;
        let pid = this.pid;

        Box::pin(async move {
            let mut child = child.ok_or_else(|| {
                process_failure(
                    manager,
                    task_type,
                    action,
                    "child process already consumed".to_string(),
                )
            })?;

            let stdout_reader = tokio::spawn(async move {
                let mut buffer = Vec::new();
                if let Some(mut handle) = stdout {
                    let _ = handle.read_to_end(&mut buffer).await;
                }
                buffer
            });

            let wait_err = |error: std::io::Error| {
                process_failure(
                    manager,
                    task_type,
                    action,
                    format!("failed to wait for process: {error}"),
                )
            };

            // Output is collected after exit within a short window; descendants
            // that inherited the pipes would otherwise keep them open forever.
            let status = if let (Some(timeout_duration), Some(deadline)) = (timeout, deadline) {
                match tokio::time::timeout_at(deadline, child.wait()).await {
                    Ok(result) => result.map_err(wait_err)?,
                    Err(_) => {
                        kill_process_tree(pid);
                        let _ = child.start_kill();
                        let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
                        stdout_reader.abort();
                        stderr_reader.abort();
                        return Err(CoreError::new(
                            CoreErrorKind::Timeout,
                            format!("process timed out after {}ms", timeout_duration.as_millis()),
                        )
                        .manager(manager)
                        .task(task_type)
                        .action(action));
                    }
                }
            } else {
                child.wait().await.map_err(wait_err)?
            };

            let read_deadline = Duration::from_millis(250);
            let stdout = match tokio::time::timeout(read_deadline, stdout_reader).await {
                Ok(Ok(buffer)) => buffer,
                _ => Vec::new(),
            };
            let stderr = match tokio::time::timeout(read_deadline, stderr_reader).await {
                Ok(Ok(buffer)) => buffer,
                _ => Vec::new(),
            };

            let status = match status.code() {
                Some(code) => ProcessExitStatus::ExitCode(code),
                None => ProcessExitStatus::Terminated,
            };

            Ok(ProcessOutput {
                status,
                stdout,
                stderr,
                started_at,
                finished_at: SystemTime::now(),
            })
        })
    }
}

#[cfg(unix)]
fn kill_process_tree(pid: Option<u32>) {
    if let Some(pid) = pid {
        let pgid = -(pid as libc::pid_t);
        unsafe {
            libc::kill(pgid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_tree(_pid: Option<u32>) {}

fn process_failure(
    manager: ManagerId,
    task_type: TaskType,
    action: ManagerAction,
    message: String,
) -> CoreError {
    CoreError::new(CoreErrorKind::ProcessFailure, message)
        .manager(manager)
        .task(task_type)
        .action(action)
}
