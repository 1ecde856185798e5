use std::fmt;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

/// How long a killed tool may take to exit and close its output.
const DRAIN_LIMIT: Duration = Duration::from_secs(2);

/// Signal used to stop a tool's process group.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StopSignal {
    /// Lets the tool clean up, e.g. switch adapter scanning back off.
    Interrupt,
    /// Reclaims a stalled invocation.
    Kill,
}

impl From<StopSignal> for Signal {
    fn from(value: StopSignal) -> Self {
        match value {
            StopSignal::Interrupt => Signal::SIGINT,
            StopSignal::Kill => Signal::SIGKILL,
        }
    }
}

/// A running tool invocation.
#[async_trait]
pub trait ToolProcess: Send {
    /// Waits up to `limit` for the tool to exit and returns its stdout, or `None` if it is
    /// still running.
    async fn communicate(&mut self, limit: Duration) -> io::Result<Option<String>>;

    /// Sends `signal` to every process in the tool's process group.
    fn kill_group(&mut self, signal: StopSignal) -> io::Result<()>;

    /// Waits a bounded time for a killed tool to exit and returns whatever stdout it
    /// produced.
    async fn drain(&mut self) -> io::Result<String>;
}

/// Starts tool invocations. Each invocation leads its own process group.
pub trait ToolLauncher: Send + Sync + fmt::Debug {
    fn spawn(&self, program: &str, args: &[String]) -> io::Result<Box<dyn ToolProcess>>;
}

/// Launches real processes through `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ToolLauncher for SystemLauncher {
    fn spawn(&self, program: &str, args: &[String]) -> io::Result<Box<dyn ToolProcess>> {
        trace!(program, ?args, "spawning tool");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()?;

        let pgid = child
            .id()
            .map(|pid| i32::try_from(pid).map(Pid::from_raw))
            .transpose()
            .map_err(io::Error::other)?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("tool stdout was not captured"))?;
        let reader = tokio::spawn(async move {
            let mut captured = Vec::new();
            stdout.read_to_end(&mut captured).await.map(|_| captured)
        });

        Ok(Box::new(SystemProcess {
            child,
            pgid,
            reader: Some(reader),
            exited: false,
        }))
    }
}

#[derive(Debug)]
struct SystemProcess {
    child: Child,
    pgid: Option<Pid>,
    reader: Option<JoinHandle<io::Result<Vec<u8>>>>,
    exited: bool,
}

impl SystemProcess {
    /// Waits for the tool to exit and for its stdout to close.
    ///
    /// Cancel safe: an interrupted call can be repeated without losing output.
    async fn finish(&mut self) -> io::Result<String> {
        if !self.exited {
            let status = self.child.wait().await?;
            self.exited = true;
            debug!(%status, "tool exited");
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(String::new());
        };
        let joined = reader.await;
        self.reader = None;
        let captured = joined.map_err(io::Error::other)??;
        Ok(String::from_utf8_lossy(&captured).into_owned())
    }
}

#[async_trait]
impl ToolProcess for SystemProcess {
    async fn communicate(&mut self, limit: Duration) -> io::Result<Option<String>> {
        match timeout(limit, self.finish()).await {
            Ok(stdout) => stdout.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    fn kill_group(&mut self, signal: StopSignal) -> io::Result<()> {
        let Some(pgid) = self.pgid else {
            return Ok(());
        };
        killpg(pgid, Signal::from(signal))?;
        Ok(())
    }

    async fn drain(&mut self) -> io::Result<String> {
        match timeout(DRAIN_LIMIT, self.finish()).await {
            Ok(stdout) => stdout,
            Err(_elapsed) => {
                debug!("tool output stayed open after its group was killed");
                Ok(String::new())
            }
        }
    }
}

impl Drop for SystemProcess {
    fn drop(&mut self) {
        // A reaped leader can still leave group members holding stdout.
        if (!self.exited || self.reader.is_some())
            && let Err(error) = self.kill_group(StopSignal::Kill)
        {
            debug!(?error, "failed to reclaim abandoned tool process group");
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use pretty_assertions::assert_eq;

    use super::*;

    fn shell(script: &str) -> Box<dyn ToolProcess> {
        SystemLauncher
            .spawn("sh", &["-c".to_string(), script.to_string()])
            .expect("sh should be available")
    }

    #[tokio::test]
    async fn exited_tool_returns_its_output() {
        let mut process = shell("echo LE Scan ...");

        let stdout = process
            .communicate(Duration::from_secs(5))
            .await
            .expect("communicate should succeed");

        assert_eq!(Some("LE Scan ...\n".to_string()), stdout);
    }

    #[tokio::test]
    async fn group_ignoring_interrupt_is_reclaimed_by_kill() {
        let mut process = shell("trap '' INT; echo ready; sleep 30");
        let started = Instant::now();

        let first = process
            .communicate(Duration::from_millis(300))
            .await
            .expect("communicate should succeed");
        assert_eq!(None, first);

        process
            .kill_group(StopSignal::Interrupt)
            .expect("interrupt should be delivered");
        let after_interrupt = process
            .communicate(Duration::from_millis(300))
            .await
            .expect("communicate should succeed");
        assert_eq!(None, after_interrupt);

        process
            .kill_group(StopSignal::Kill)
            .expect("kill should be delivered");
        let stdout = process.drain().await.expect("drain should succeed");

        assert_eq!("ready\n", stdout);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
