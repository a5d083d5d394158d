// Process execution primitives for the counting backends.

use log::debug;

use std::io;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ExecStatus {
    Exited(i32),
    /// The deadline expired and the child was killed.
    TimedOut { after: Duration },
}

/// Captured streams and exit condition of one backend invocation.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub status: ExecStatus,
}

/// The capability through which adapters reach an external counting tool.
///
/// Adapters never spawn processes themselves; they go through this trait so
/// that tests can substitute a scripted oracle for the real binary.
pub trait BackendRunner {
    fn execute(
        &self,
        workdir: &Path,
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> io::Result<ExecOutcome>;
}

/// Runs backends as real subprocesses, blocking until exit or until the
/// configured deadline expires.
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> SystemRunner {
        SystemRunner { timeout }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf: Vec<u8> = Vec::new();
        if let Some(mut r) = pipe {
            let _ = r.read_to_end(&mut buf);
        }
        buf
    })
}

impl BackendRunner for SystemRunner {
    fn execute(
        &self,
        workdir: &Path,
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> io::Result<ExecOutcome> {
        debug!("execute: {} {:?} (workdir {:?})", program, args, workdir);
        let mut child = Command::new(program)
            .args(args)
            .current_dir(workdir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // The pipes are drained concurrently so a chatty backend cannot fill
        // a pipe buffer and deadlock against our wait.
        let stdout_handle = drain(child.stdout.take());
        let stderr_handle = drain(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            match child.try_wait()? {
                Some(st) => break ExecStatus::Exited(st.code().unwrap_or(-1)),
                None if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    break ExecStatus::TimedOut {
                        after: self.timeout,
                    };
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_handle.join().unwrap_or_default()).to_string();
        let stderr = String::from_utf8_lossy(&stderr_handle.join().unwrap_or_default()).to_string();
        debug!("execute: {} -> {:?}", program, status);
        Ok(ExecOutcome {
            stdout,
            stderr,
            status,
        })
    }
}

/// Creates the private scratch working area for one adapter invocation.
///
/// The directory and everything under it are removed when the returned value
/// is dropped, on success and on every failure path alike.
pub fn scratch_dir() -> io::Result<TempDir> {
    tempfile::tempdir()
}
