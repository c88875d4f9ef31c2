//! Spawn an external process and stream its output line by line.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::debug;

use super::tracker::ProcessHandle;

// CSI, OSC (BEL or ST terminated) and two-byte escapes
static ANSI_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)|[@-Z\x5C-_])").unwrap()
});

/// Receives each cleaned output line, from either stream.
pub type LineSink = Arc<dyn Fn(String) + Send + Sync>;

/// Remove terminal escape sequences and carriage returns.
pub fn strip_ansi(line: &str) -> String {
    ANSI_REGEX.replace_all(line, "").replace('\r', "")
}

/// Splits a byte stream into lines, holding a trailing partial line until the next chunk.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    /// Feed a chunk and return every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            lines.push(strip_ansi(&String::from_utf8_lossy(&raw[..raw.len() - 1])));
        }
        lines
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(strip_ansi(&String::from_utf8_lossy(&self.partial)))
        }
    }
}

/// A command to run, with its working directory and environment overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-style rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, sink: LineSink) {
    let mut buffer = LineBuffer::default();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in buffer.push(&chunk[..n]) {
                    sink(line);
                }
            }
            Err(e) => {
                debug!("output stream read failed: {}", e);
                break;
            }
        }
    }
    if let Some(line) = buffer.finish() {
        sink(line);
    }
}

/// Spawn `spec`, forwarding stdout and stderr lines to `sink`.
///
/// Returns the cancellation handle and a future resolving to the exit code once
/// the process has exited and both streams are drained. The code is `None` when
/// the process was killed or ended by a signal.
pub fn spawn(
    spec: &CommandSpec,
    sink: LineSink,
) -> std::io::Result<(
    ProcessHandle,
    impl Future<Output = std::io::Result<Option<i32>>> + Send + 'static,
)> {
    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let pid = child.id();
    debug!(pid = ?pid, command = %spec.display(), "process spawned");

    let stdout = child.stdout.take().map(|s| tokio::spawn(pump(s, sink.clone())));
    let stderr = child.stderr.take().map(|s| tokio::spawn(pump(s, sink)));
    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

    let exit = async move {
        let (status, killed) = tokio::select! {
            status = child.wait() => (status?, false),
            Ok(()) = &mut kill_rx => {
                child.start_kill()?;
                (child.wait().await?, true)
            }
        };

        for pump in [stdout, stderr].into_iter().flatten() {
            if killed {
                pump.abort();
            } else {
                let _ = pump.await;
            }
        }

        debug!(pid = ?pid, ?status, killed, "process exited");
        Ok::<_, std::io::Error>(if killed { None } else { status.code() })
    };

    Ok((ProcessHandle::new(pid, kill_tx), exit))
}
