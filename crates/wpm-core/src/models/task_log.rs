use std::collections::VecDeque;
use std::time::SystemTime;

use serde::Serialize;

use crate::models::{ManagerId, TaskType};

/// Most bytes of stdout or stderr kept per operation; older output is dropped.
pub const MAX_STREAM_BYTES: usize = 128 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TaskLogNote {
    pub level: TaskLogLevel,
    pub message: String,
    pub created_at: SystemTime,
}

/// A closed operation log, as kept by the manager's log ring.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct OperationLogRecord {
    pub id: u64,
    pub manager: ManagerId,
    pub task_type: TaskType,
    pub command_line: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub notes: Vec<TaskLogNote>,
    pub exit_code: Option<i32>,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

impl OperationLogRecord {
    pub fn has_warnings(&self) -> bool {
        self.notes
            .iter()
            .any(|note| note.level != TaskLogLevel::Info)
    }
}

/// Per-call logger. Every discovery call opens one, feeds it while the call
/// runs and closes it with [`OperationLog::finish`].
#[derive(Debug)]
pub struct OperationLog {
    manager: ManagerId,
    task_type: TaskType,
    command_line: Option<String>,
    stdout: StreamTail,
    stderr: StreamTail,
    notes: Vec<TaskLogNote>,
    started_at: SystemTime,
}

/// Newest lines of one output stream, bounded by [`MAX_STREAM_BYTES`] as
/// they arrive.
#[derive(Debug, Default)]
struct StreamTail {
    lines: VecDeque<String>,
    bytes: usize,
    seen: usize,
}

impl StreamTail {
    fn push(&mut self, line: String) {
        self.seen += 1;
        self.bytes += line.len() + 1;
        self.lines.push_back(line);
        // The newest line always stays; the log store trims it if oversized.
        while self.bytes > MAX_STREAM_BYTES && self.lines.len() > 1 {
            if let Some(dropped) = self.lines.pop_front() {
                self.bytes -= dropped.len() + 1;
            }
        }
    }

    fn join(&self) -> String {
        let mut text = String::with_capacity(self.bytes);
        for (index, line) in self.lines.iter().enumerate() {
            if index > 0 {
                text.push('\n');
            }
            text.push_str(line);
        }
        text
    }
}

impl OperationLog {
    pub fn new(manager: ManagerId, task_type: TaskType) -> Self {
        Self {
            manager,
            task_type,
            command_line: None,
            stdout: StreamTail::default(),
            stderr: StreamTail::default(),
            notes: Vec::new(),
            started_at: SystemTime::now(),
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn command<'a>(&mut self, program: &str, args: impl IntoIterator<Item = &'a String>) {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.command_line = Some(line);
    }

    pub fn stdout(&mut self, line: impl Into<String>) {
        self.stdout.push(line.into());
    }

    /// Standard error never fails an operation on its own; it is kept and
    /// flagged as a warning.
    pub fn stderr(&mut self, text: &str) {
        let text = text.trim_end();
        if text.trim().is_empty() {
            return;
        }
        self.stderr.push(text.to_string());
        self.warn(format!("process wrote to stderr: {text}"));
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.note(TaskLogLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(
            manager = self.manager.name(),
            task_type = self.task_type.as_str(),
            "{message}"
        );
        self.note(TaskLogLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(
            manager = self.manager.name(),
            task_type = self.task_type.as_str(),
            "{message}"
        );
        self.note(TaskLogLevel::Error, message);
    }

    pub fn finish(self, exit_code: Option<i32>) -> OperationLogRecord {
        tracing::debug!(
            manager = self.manager.name(),
            task_type = self.task_type.as_str(),
            exit_code,
            stdout_lines = self.stdout.seen,
            "operation finished"
        );

        OperationLogRecord {
            id: 0,
            manager: self.manager,
            task_type: self.task_type,
            command_line: self.command_line,
            stdout: self.stdout.join(),
            stderr: self.stderr.join(),
            notes: self.notes,
            exit_code,
            started_at: self.started_at,
            finished_at: SystemTime::now(),
        }
    }

    fn note(&mut self, level: TaskLogLevel, message: String) {
        self.notes.push(TaskLogNote {
            level,
            message,
            created_at: SystemTime::now(),
        });
    }
}
