//! Subprocess plumbing shared by the capture, playback, and adapter paths.
//!
//! Every external binary is described by a [`CommandLine`] parsed once from
//! configuration, and every spawned child is held in a [`ChildGuard`] so it is
//! killed and reaped no matter how the owning call returns.

use crate::log_debug;
use anyhow::{bail, Context, Result};
use std::os::unix::process::CommandExt;
use std::io;
use std::process::{Child, Command, ExitStatus};

/// Program plus leading arguments, split with shell quoting rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Split a configured command such as `sh -c 'exec cat'` into program and args.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut words = shell_words::split(raw)
            .with_context(|| format!("invalid command line: {raw:?}"))?;
        if words.is_empty() {
            bail!("command line is empty");
        }
        let program = words.remove(0);
        if program.trim().is_empty() {
            bail!("command line has an empty program name");
        }
        Ok(Self {
            program,
            args: words,
        })
    }

    /// Build a `Command` for this line. The child gets its own process group so a
    /// terminal Ctrl-C only reaches us and we decide when the child dies.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.process_group(0);
        cmd
    }

    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.as_str());
        parts.extend(self.args.iter().map(String::as_str));
        shell_words::join(parts)
    }
}

/// Owns a spawned child and guarantees kill + wait on drop.
pub(crate) struct ChildGuard {
    child: Option<Child>,
    label: &'static str,
}

impl ChildGuard {
    pub(crate) fn new(child: Child, label: &'static str) -> Self {
        Self {
            child: Some(child),
            label,
        }
    }

    pub(crate) fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Non-blocking exit check. Once the child has exited it is released from the guard.
    pub(crate) fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        let status = child.try_wait()?;
        if status.is_some() {
            self.child = None;
        }
        Ok(status)
    }

    /// Block until the child exits on its own.
    pub(crate) fn wait(&mut self) -> io::Result<Option<ExitStatus>> {
        match self.child.take() {
            Some(mut child) => child.wait().map(Some),
            None => Ok(None),
        }
    }

    /// Forcefully stop the child and everything in its process group, then
    /// reap the child. Safe to call repeatedly.
    pub(crate) fn kill_and_reap(&mut self) -> Option<ExitStatus> {
        let mut child = self.child.take()?;
        if let Err(err) = kill_process_group(&child) {
            log_debug(&format!(
                "{}: killpg {} failed ({err}), killing the child only",
                self.label,
                child.id()
            ));
            if let Err(err) = child.kill() {
                // Already exited; wait() below still reaps the zombie.
                log_debug(&format!("{}: kill pid {} failed: {err}", self.label, child.id()));
            }
        }
        match child.wait() {
            Ok(status) => {
                log_debug(&format!(
                    "{}: pid {} reaped with {status}",
                    self.label,
                    child.id()
                ));
                Some(status)
            }
            Err(err) => {
                log_debug(&format!(
                    "{}: wait on pid {} failed: {err}",
                    self.label,
                    child.id()
                ));
                None
            }
        }
    }
}

/// SIGKILL the group led by `child`. Wrapper shells (`sh -c '... | pacat'`)
/// leave the real recorder or player as a grandchild in that group.
fn kill_process_group(child: &Child) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(child.id())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: killpg only sends a signal; the group id comes from a child we
    // spawned as its own group leader and have not reaped yet.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill_and_reap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_quoted_arguments() {
        let line = CommandLine::parse("sh -c 'exec cat > /dev/null'").expect("parse");
        assert_eq!(line.program, "sh");
        assert_eq!(line.args, vec!["-c", "exec cat > /dev/null"]);
    }

    #[test]
    fn parse_rejects_empty_and_unbalanced_input() {
        assert!(CommandLine::parse("   ").is_err());
        assert!(CommandLine::parse("parec 'unterminated").is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let line = CommandLine::parse("whisper-cli --model 'my model.bin'").expect("parse");
        let again = CommandLine::parse(&line.display()).expect("reparse");
        assert_eq!(line, again);
    }

    #[test]
    fn guard_kills_long_running_child_on_drop() {
        let mut cmd = CommandLine::parse("sleep 30").expect("parse").command();
        let child = cmd.spawn().expect("spawn sleep");
        let pid = child.id();
        let mut guard = ChildGuard::new(child, "test");
        assert_eq!(guard.id(), Some(pid));
        let status = guard.kill_and_reap().expect("reaped");
        assert!(!status.success());
        assert!(guard.kill_and_reap().is_none(), "second kill is a no-op");
    }

    #[test]
    fn try_wait_releases_exited_child() {
        let child = CommandLine::parse("true")
            .expect("parse")
            .command()
            .spawn()
            .expect("spawn true");
        let mut guard = ChildGuard::new(child, "test");
        let status = guard.wait().expect("wait").expect("status");
        assert!(status.success());
        assert!(guard.try_wait().expect("try_wait").is_none());
        assert!(guard.id().is_none());
        assert!(guard.kill_and_reap().is_none());
    }

    /// True while `pid` exists and is not a zombie awaiting its new parent.
    fn running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map_or(false, |(_, rest)| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[test]
    fn kill_reaches_grandchildren_of_a_wrapper_shell() {
        use std::io::{BufRead, BufReader};
        use std::process::Stdio;

        let mut cmd = CommandLine::parse("sh -c 'sleep 30 & echo $!; wait; true'")
            .expect("parse")
            .command();
        let mut child = cmd.stdout(Stdio::piped()).spawn().expect("spawn sh");
        let stdout = child.stdout.take().expect("stdout");
        let mut line = String::new();
        BufReader::new(stdout).read_line(&mut line).expect("read pid");
        let grandchild: i32 = line.trim().parse().expect("grandchild pid");
        assert!(running(grandchild));

        let mut guard = ChildGuard::new(child, "test");
        guard.kill_and_reap().expect("reaped");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while running(grandchild) && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(!running(grandchild), "grandchild {grandchild} survived the kill");
    }
}
