use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{DiscoveryConfig, ProxyConfig};
use crate::execution::{
    CommandSpec, ProcessExecutor, ProcessSpawnRequest, ProcessTerminationMode, RunningProcess,
    spawn_validated,
};
use crate::models::{
    CoreError, CoreErrorKind, CoreResult, ManagerAction, ManagerId, OperationLog, Package, TaskType,
};

pub const DETECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(120);
pub const LIST_TIMEOUT: Duration = Duration::from_secs(300);
pub const SHOW_TIMEOUT: Duration = Duration::from_secs(60);
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(300);

const ACCEPT_AGREEMENTS: &str = "--accept-source-agreements";
const DISABLE_INTERACTIVITY: &str = "--disable-interactivity";
const ELLIPSIS: char = '…';

/// Returned by a line callback to keep reading or to stop the process early.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineControl {
    Continue,
    Stop,
}

/// Spawns the `winget` executable with the flags every call shares and
/// streams its stdout into an [`OperationLog`].
pub struct CommandRunner {
    executor: Arc<dyn ProcessExecutor>,
    executable: PathBuf,
    proxy: Option<ProxyConfig>,
    elevated_temp: Option<PathBuf>,
}

impl CommandRunner {
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        executable: impl Into<PathBuf>,
        config: &DiscoveryConfig,
    ) -> Self {
        let elevated_temp = config
            .elevated
            .then(|| std::env::temp_dir().join("wpm").join("ElevatedWinGetTemp"));

        Self {
            executor,
            executable: executable.into(),
            proxy: config.proxy.clone(),
            elevated_temp,
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Builds a request without the proxy flag, for calls like `--version`
    /// that do not reach any source.
    pub fn local_request(
        &self,
        task_type: TaskType,
        action: ManagerAction,
        args: impl IntoIterator<Item = impl Into<String>>,
        timeout: Duration,
    ) -> ProcessSpawnRequest {
        let mut command = CommandSpec::new(&self.executable).args(args);
        if let Some(temp) = &self.elevated_temp {
            let temp = temp.to_string_lossy().into_owned();
            command = command.env("TEMP", temp.clone()).env("TMP", temp);
        }
        ProcessSpawnRequest::new(ManagerId::WinGet, task_type, action, command).timeout(timeout)
    }

    pub fn request(
        &self,
        task_type: TaskType,
        action: ManagerAction,
        args: impl IntoIterator<Item = impl Into<String>>,
        timeout: Duration,
    ) -> ProcessSpawnRequest {
        let mut request = self.local_request(task_type, action, args, timeout);
        if let Some(proxy) = &self.proxy {
            request.command = request.command.arg("--proxy").arg(proxy.url.clone());
        }
        request
    }

    /// Runs `request` and hands every stdout line to `on_line` as soon as it
    /// is read. Lines are also recorded in `log`, stderr becomes a warning
    /// note. Returns the exit code, `None` when the process was stopped.
    pub async fn stream<F>(
        &self,
        request: ProcessSpawnRequest,
        log: &mut OperationLog,
        mut on_line: F,
    ) -> CoreResult<Option<i32>>
    where
        F: FnMut(&str) -> LineControl + Send,
    {
        let manager = request.manager;
        let task_type = request.task_type;
        let action = request.action;
        let timeout = request.timeout;

        log.command(&request.command.program_name(), &request.command.args);
        if let Some(temp) = &self.elevated_temp {
            log.warn(format!(
                "redirecting TEMP to {} since the process runs elevated",
                temp.display()
            ));
        }
        if self.proxy.as_ref().is_some_and(|proxy| proxy.requires_auth) {
            log.warn("winget does not support proxy authentication, credentials are ignored");
        }

        let mut process = spawn_validated(self.executor.as_ref(), request)?;
        // One budget covers reading stdout and waiting for the exit.
        let deadline = timeout.map(|limit| (Instant::now() + limit, limit));
        let timed_out = |limit: Duration| {
            CoreError::new(
                CoreErrorKind::Timeout,
                format!("winget did not finish within {}s", limit.as_secs()),
            )
            .attribute(manager, task_type, action)
        };

        let drained = match deadline {
            Some((at, limit)) => {
                let outcome =
                    tokio::time::timeout_at(at, drain(process.as_mut(), log, &mut on_line)).await;
                match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        let _ = process.terminate(ProcessTerminationMode::Immediate);
                        return Err(timed_out(limit));
                    }
                }
            }
            None => drain(process.as_mut(), log, &mut on_line).await,
        };

        let stopped = match drained {
            Ok(stopped) => stopped,
            Err(error) => {
                let _ = process.terminate(ProcessTerminationMode::Immediate);
                return Err(error);
            }
        };
        if stopped {
            process.terminate(ProcessTerminationMode::Immediate)?;
        }

        let output = match deadline {
            Some((at, limit)) => tokio::time::timeout_at(at, process.wait())
                .await
                .map_err(|_| timed_out(limit))??,
            None => process.wait().await?,
        };
        log.stderr(&String::from_utf8_lossy(&output.stderr));

        let exit_code = output.status.code();
        if !stopped && exit_code != Some(0) {
            log.info(format!("winget exited with {exit_code:?}"));
        }
        Ok(if stopped { None } else { exit_code })
    }

    /// Runs `request` to completion and returns every stdout line.
    pub async fn capture(
        &self,
        request: ProcessSpawnRequest,
        log: &mut OperationLog,
    ) -> CoreResult<(Vec<String>, Option<i32>)> {
        let mut lines = Vec::new();
        let exit_code = self
            .stream(request, log, |line| {
                lines.push(line.to_string());
                LineControl::Continue
            })
            .await?;
        Ok((lines, exit_code))
    }
}

/// Returns whether `on_line` asked to stop.
async fn drain<F>(
    process: &mut dyn RunningProcess,
    log: &mut OperationLog,
    on_line: &mut F,
) -> CoreResult<bool>
where
    F: FnMut(&str) -> LineControl + Send,
{
    while let Some(line) = process.next_stdout_line().await? {
        let control = on_line(&line);
        log.stdout(line);
        if control == LineControl::Stop {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `--id <id> --exact`, unless the listing truncated the id with `…`; then
/// the name is tried the same way, and a truncated name falls back to a
/// non-exact id prefix.
pub fn package_selector(package: &Package) -> Vec<String> {
    let id = package.id();
    let name = package.name();

    if !id.ends_with(ELLIPSIS) {
        vec!["--id".to_string(), id.to_string(), "--exact".to_string()]
    } else if !name.ends_with(ELLIPSIS) {
        vec!["--name".to_string(), name.to_string(), "--exact".to_string()]
    } else {
        vec![
            "--id".to_string(),
            id.trim_end_matches(ELLIPSIS).to_string(),
        ]
    }
}

pub fn search_args(query: &str) -> Vec<String> {
    vec![
        "search".to_string(),
        query.to_string(),
        ACCEPT_AGREEMENTS.to_string(),
    ]
}

pub fn list_args() -> Vec<String> {
    vec!["list".to_string(), ACCEPT_AGREEMENTS.to_string()]
}

pub fn update_args() -> Vec<String> {
    vec![
        "update".to_string(),
        "--include-unknown".to_string(),
        ACCEPT_AGREEMENTS.to_string(),
    ]
}

pub fn source_list_args() -> Vec<String> {
    vec!["source".to_string(), "list".to_string()]
}

pub fn source_update_args() -> Vec<String> {
    vec![
        "source".to_string(),
        "update".to_string(),
        DISABLE_INTERACTIVITY.to_string(),
    ]
}

pub fn versions_args(package: &Package) -> Vec<String> {
    let mut args = vec!["show".to_string()];
    args.extend(package_selector(package));
    args.push("--versions".to_string());
    args.push(ACCEPT_AGREEMENTS.to_string());
    args
}

/// `show` for one package; `locale` of `None` leaves the choice to winget.
pub fn show_args(package: &Package, locale: Option<&str>) -> Vec<String> {
    let mut args = vec!["show".to_string()];
    args.extend(package_selector(package));
    args.push(DISABLE_INTERACTIVITY.to_string());
    args.push(ACCEPT_AGREEMENTS.to_string());
    if let Some(locale) = locale {
        args.push("--locale".to_string());
        args.push(locale.to_string());
    }
    args
}

/// `show` pinned to the package's own source, for the installer fields the
/// native catalog does not expose.
pub fn show_in_source_args(package: &Package) -> Vec<String> {
    let mut args = vec!["show".to_string()];
    args.extend(package_selector(package));
    args.push(DISABLE_INTERACTIVITY.to_string());
    args.push(ACCEPT_AGREEMENTS.to_string());
    args.push("--source".to_string());
    args.push(package.source().name.clone());
    args
}
