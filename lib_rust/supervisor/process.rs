// Worker process handle
// Each worker leads its own process group so signals reach everything it spawned

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use tracing::debug;

use crate::error::ProcessError;

/// How a worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Code(i32),
    Signaled(i32),
}

impl WorkerExit {
    fn from_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => WorkerExit::Code(code),
            (None, Some(sig)) => WorkerExit::Signaled(sig),
            (None, None) => WorkerExit::Code(-1),
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Code(code) => write!(f, "exit code {}", code),
            WorkerExit::Signaled(sig) => write!(f, "signal {}", sig),
        }
    }
}

/// A spawned worker and its process group
pub struct WorkerProcess {
    child: Child,
    pub pid: u32,
    pub pgid: u32,
}

impl WorkerProcess {
    /// Spawn `argv` as a new session leader
    ///
    /// stdin and stdout are detached (stdout belongs to the status table);
    /// stderr is inherited so worker diagnostics reach the operator.
    pub fn spawn(argv: &[String]) -> Result<Self, ProcessError> {
        let (program, args) = argv.split_first().ok_or(ProcessError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // SAFETY: setsid is async-signal-safe and touches no parent state
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        let pid = child.id();
        // setsid makes the child its own group leader
        let pgid = pid;

        debug!(pid = pid, pgid = pgid, program = %program, "Spawned worker");

        Ok(Self { child, pid, pgid })
    }

    fn signal_group(&self, sig: Signal) -> Result<(), ProcessError> {
        // Negative pid addresses the whole group
        let group = Pid::from_raw(-(self.pgid as i32));

        match signal::kill(group, sig) {
            Ok(()) => {
                debug!(pgid = self.pgid, signal = sig.as_str(), "Signalled process group");
                Ok(())
            }
            // Already gone
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(source) => Err(ProcessError::Signal {
                signal: sig.as_str(),
                pgid: self.pgid,
                source,
            }),
        }
    }

    /// Ask the group to stop (SIGTERM)
    pub fn terminate(&self) -> Result<(), ProcessError> {
        self.signal_group(Signal::SIGTERM)
    }

    /// Force the group down (SIGKILL)
    pub fn kill(&self) -> Result<(), ProcessError> {
        self.signal_group(Signal::SIGKILL)
    }

    /// Non-blocking liveness check; `Some` once the worker has exited
    pub fn try_wait(&mut self) -> Result<Option<WorkerExit>, ProcessError> {
        self.child
            .try_wait()
            .map(|status| status.map(WorkerExit::from_status))
            .map_err(|source| ProcessError::Wait {
                pid: self.pid,
                source,
            })
    }

    /// Block until the worker exits
    pub fn wait(&mut self) -> Result<WorkerExit, ProcessError> {
        self.child
            .wait()
            .map(WorkerExit::from_status)
            .map_err(|source| ProcessError::Wait {
                pid: self.pid,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn spawn_empty_argv_fails() {
        assert!(matches!(
            WorkerProcess::spawn(&[]),
            Err(ProcessError::EmptyCommand)
        ));
    }

    #[test]
    fn spawn_missing_program_fails() {
        let argv = vec!["/nonexistent/honeypot-worker".to_string()];
        assert!(matches!(
            WorkerProcess::spawn(&argv),
            Err(ProcessError::Spawn { .. })
        ));
    }

    #[test]
    fn worker_leads_its_own_group() {
        let mut proc = WorkerProcess::spawn(&sh("sleep 30")).unwrap();
        let pgid = nix::unistd::getpgid(Some(Pid::from_raw(proc.pid as i32))).unwrap();
        assert_eq!(pgid.as_raw() as u32, proc.pid);

        proc.kill().unwrap();
        assert_eq!(proc.wait().unwrap(), WorkerExit::Signaled(9));
    }

    #[test]
    fn terminate_stops_sleeping_worker() {
        let mut proc = WorkerProcess::spawn(&sh("sleep 30")).unwrap();
        assert_eq!(proc.try_wait().unwrap(), None);

        proc.terminate().unwrap();
        let exit = proc.wait().unwrap();
        assert_eq!(exit, WorkerExit::Signaled(15));

        // Signalling a reaped group is not an error
        proc.terminate().unwrap();
    }

    #[test]
    fn exit_code_is_reported() {
        let mut proc = WorkerProcess::spawn(&sh("exit 3")).unwrap();
        let mut exit = None;
        for _ in 0..100 {
            exit = proc.try_wait().unwrap();
            if exit.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(exit, Some(WorkerExit::Code(3)));
        assert_eq!(WorkerExit::Code(3).to_string(), "exit code 3");
    }
}
