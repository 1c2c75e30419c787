#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use wpm_core::config::DiscoveryConfig;
use wpm_core::engine::{CommandRunner, LineControl};
use wpm_core::execution::{
    CommandSpec, ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessSpawnRequest,
    ProcessTerminationMode, ProcessWaitFuture, RunningProcess, StdoutLineFuture,
    TokioProcessExecutor, spawn_validated,
};
use wpm_core::models::{
    CoreErrorKind, ManagerAction, ManagerId, OperationLog, TaskLogLevel, TaskType,
};

fn request(command: CommandSpec) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        ManagerId::WinGet,
        TaskType::Detection,
        ManagerAction::Detect,
        command,
    )
}

fn sleep_request() -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        ManagerId::WinGet,
        TaskType::ListInstalledPackages,
        ManagerAction::ListInstalled,
        CommandSpec::new("/bin/sleep").arg("30"),
    )
}

#[tokio::test]
async fn spawns_echo_and_captures_stdout() {
    let executor = TokioProcessExecutor;
    let handle = spawn_validated(&executor, request(CommandSpec::new("/bin/echo").arg("hello")))
        .expect("spawn should succeed");

    assert!(handle.pid().is_some());

    let output = handle.wait().await.expect("wait should succeed");
    assert_eq!(output.status, ProcessExitStatus::ExitCode(0));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    assert!(output.started_at <= output.finished_at);
}

#[tokio::test]
async fn stdout_is_read_line_by_line_before_exit() {
    let executor = TokioProcessExecutor;
    let command = CommandSpec::new("/bin/sh")
        .arg("-c")
        .arg("printf 'Name  Id\\r\\n----\\nGit  Git.Git'");
    let mut handle = spawn_validated(&executor, request(command)).expect("spawn should succeed");

    let mut lines = Vec::new();
    while let Some(line) = handle.next_stdout_line().await.expect("read should succeed") {
        lines.push(line);
    }
    assert_eq!(lines, vec!["Name  Id", "----", "Git  Git.Git"]);

    let output = handle.wait().await.expect("wait should succeed");
    assert!(output.stdout.is_empty());
}

#[tokio::test]
async fn captures_nonzero_exit_code_and_stderr() {
    let executor = TokioProcessExecutor;
    let command = CommandSpec::new("/bin/sh")
        .arg("-c")
        .arg("echo 'source agreement missing' >&2; exit 3");

    let handle = spawn_validated(&executor, request(command)).expect("spawn should succeed");
    let output = handle.wait().await.expect("wait should succeed");

    assert_eq!(output.status, ProcessExitStatus::ExitCode(3));
    assert_eq!(
        String::from_utf8_lossy(&output.stderr).trim(),
        "source agreement missing"
    );
}

#[tokio::test]
async fn timeout_kills_long_running_process() {
    let executor = TokioProcessExecutor;
    let request = sleep_request().timeout(Duration::from_millis(100));

    let handle = spawn_validated(&executor, request).expect("spawn should succeed");
    let error = handle.wait().await.expect_err("should timeout");

    assert_eq!(error.kind, CoreErrorKind::Timeout);
    assert_eq!(error.manager, Some(ManagerId::WinGet));
    assert_eq!(error.task, Some(TaskType::ListInstalledPackages));
    assert_eq!(error.action, Some(ManagerAction::ListInstalled));
}

#[tokio::test]
async fn immediate_terminate_kills_process() {
    let executor = TokioProcessExecutor;
    let handle = spawn_validated(&executor, sleep_request()).expect("spawn should succeed");

    handle
        .terminate(ProcessTerminationMode::Immediate)
        .expect("terminate should succeed");

    let output = handle.wait().await.expect("wait should succeed");
    assert_eq!(output.status, ProcessExitStatus::Terminated);
}

#[tokio::test]
async fn spawn_nonexistent_program_returns_process_failure() {
    let executor = TokioProcessExecutor;
    let request = ProcessSpawnRequest::new(
        ManagerId::WinGet,
        TaskType::FindPackages,
        ManagerAction::Search,
        CommandSpec::new("/nonexistent/winget"),
    );

    let error = match spawn_validated(&executor, request) {
        Err(e) => e,
        Ok(_) => panic!("expected spawn to fail for nonexistent binary"),
    };

    assert_eq!(error.kind, CoreErrorKind::ProcessFailure);
    assert_eq!(error.manager, Some(ManagerId::WinGet));
    assert_eq!(error.task, Some(TaskType::FindPackages));
    assert_eq!(error.action, Some(ManagerAction::Search));
}

#[tokio::test]
async fn runner_redirects_temp_when_elevated() {
    let config = DiscoveryConfig {
        elevated: true,
        ..DiscoveryConfig::default()
    };
    let runner = CommandRunner::new(Arc::new(TokioProcessExecutor), "/usr/bin/env", &config);
    let mut log = OperationLog::new(ManagerId::WinGet, TaskType::OtherTask);

    let request = runner.local_request(
        TaskType::OtherTask,
        ManagerAction::Detect,
        Vec::<String>::new(),
        Duration::from_secs(10),
    );
    let (lines, exit_code) = runner
        .capture(request, &mut log)
        .await
        .expect("env should run");

    assert_eq!(exit_code, Some(0));
    let temp = lines
        .iter()
        .find_map(|line| line.strip_prefix("TEMP="))
        .expect("TEMP should be set");
    assert!(temp.ends_with("ElevatedWinGetTemp"), "unexpected TEMP: {temp}");

    let record = log.finish(exit_code);
    assert!(
        record
            .notes
            .iter()
            .any(|note| note.level == TaskLogLevel::Warn && note.message.contains("TEMP"))
    );
}

#[tokio::test]
async fn runner_stops_process_when_asked() {
    let runner = CommandRunner::new(
        Arc::new(TokioProcessExecutor),
        "/bin/sh",
        &DiscoveryConfig::default(),
    );
    let mut log = OperationLog::new(ManagerId::WinGet, TaskType::LoadPackageDetails);
    let request = runner.local_request(
        TaskType::LoadPackageDetails,
        ManagerAction::FetchDetails,
        ["-c", "echo first; echo stop; sleep 30; echo never"],
        Duration::from_secs(10),
    );

    let mut seen = Vec::new();
    let exit_code = runner
        .stream(request, &mut log, |line| {
            seen.push(line.to_string());
            if line == "stop" {
                LineControl::Stop
            } else {
                LineControl::Continue
            }
        })
        .await
        .expect("stream should succeed");

    assert_eq!(exit_code, None);
    assert_eq!(seen, vec!["first", "stop"]);
}

#[tokio::test]
async fn runner_timeout_covers_output_and_exit_together() {
    let runner = CommandRunner::new(
        Arc::new(TokioProcessExecutor),
        "/bin/sh",
        &DiscoveryConfig::default(),
    );
    let mut log = OperationLog::new(ManagerId::WinGet, TaskType::ListInstalledPackages);
    let request = runner.local_request(
        TaskType::ListInstalledPackages,
        ManagerAction::ListInstalled,
        ["-c", "echo started; sleep 0.7; exec 1>&-; sleep 30"],
        Duration::from_secs(1),
    );

    let started = Instant::now();
    let error = runner
        .capture(request, &mut log)
        .await
        .expect_err("process outlives its budget");

    assert_eq!(error.kind, CoreErrorKind::Timeout);
    assert!(
        started.elapsed() < Duration::from_millis(1600),
        "took {:?}",
        started.elapsed()
    );
}

/// Closes stdout at once but never reports an exit.
struct HangingExecutor;

struct HangingProcess;

impl RunningProcess for HangingProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn next_stdout_line(&mut self) -> StdoutLineFuture<'_> {
        Box::pin(async { Ok(None) })
    }

    fn terminate(&self, _mode: ProcessTerminationMode) -> ExecutionResult<()> {
        Ok(())
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        Box::pin(std::future::pending())
    }
}

impl ProcessExecutor for HangingExecutor {
    fn spawn(&self, _request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        Ok(Box::new(HangingProcess))
    }
}

#[tokio::test]
async fn runner_bounds_the_wait_even_if_the_executor_does_not() {
    let runner = CommandRunner::new(
        Arc::new(HangingExecutor),
        "winget",
        &DiscoveryConfig::default(),
    );
    let mut log = OperationLog::new(ManagerId::WinGet, TaskType::FindPackages);
    let request = runner.request(
        TaskType::FindPackages,
        ManagerAction::Search,
        ["search", "git"],
        Duration::from_millis(200),
    );

    let error = tokio::time::timeout(Duration::from_secs(5), runner.capture(request, &mut log))
        .await
        .expect("runner should give up on its own")
        .expect_err("wait never finishes");

    assert_eq!(error.kind, CoreErrorKind::Timeout);
    assert_eq!(error.task, Some(TaskType::FindPackages));
    assert_eq!(error.action, Some(ManagerAction::Search));
}
