//! Turns a [`Pipeline`] into running processes.
//!
//! Everything that allocates (argv and envp pointer arrays, program lookup,
//! error messages) happens before `fork`; the child only rewires
//! descriptors, resets signal dispositions and calls `execve`.

use std::ffi::{CString, OsString};
use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::raw::c_char;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::OpenOptionsExt;
use std::{env, fmt, iter, ptr};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use tracing::{debug, info, warn};

use crate::error::ExecError;
use crate::job::JobTable;
use crate::search::SearchCache;
use crate::signal::{self as router, Terminal};
use crate::types::Pipeline;

/// Exit status of a child whose program could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit status of a child whose program was found but could not be run.
pub const EXIT_CANNOT_EXEC: i32 = 126;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StageStatus {
	Exited(i32),
	Signaled(Signal),
	Stopped(Signal),
	/// `fork` (or the pipe feeding the stage) failed.
	SpawnFailed(Errno),
	/// An earlier stage could not be started.
	NotSpawned,
	/// The stage ran but its status could not be collected.
	Lost(Errno),
}

impl StageStatus {
	pub fn success(&self) -> bool {
		*self == StageStatus::Exited(0)
	}

	/// Shell-style status code.
	pub fn code(&self) -> i32 {
		match *self {
			StageStatus::Exited(code) => code,
			StageStatus::Signaled(sig) | StageStatus::Stopped(sig) => 128 + sig as i32,
			StageStatus::SpawnFailed(_) | StageStatus::NotSpawned | StageStatus::Lost(_) => EXIT_CANNOT_EXEC,
		}
	}
}

impl fmt::Display for StageStatus {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			StageStatus::Exited(code) => write!(f, "exited with status {}", code),
			StageStatus::Signaled(sig) => write!(f, "terminated by signal {}", sig),
			StageStatus::Stopped(sig) => write!(f, "stopped by signal {}", sig),
			StageStatus::SpawnFailed(e) => write!(f, "could not be started: {}", e),
			StageStatus::NotSpawned => f.write_str("not started"),
			StageStatus::Lost(e) => write!(f, "status unavailable: {}", e),
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Outcome {
	/// One status per stage, in stage order.
	/// `stopped` lists stages left behind stopped; they are reaped later.
	Foreground { statuses: Vec<StageStatus>, pipes: usize, stopped: Vec<Pid> },
	Background { index: usize, pid: Pid },
}

impl Outcome {
	/// Status of the pipeline as a whole: that of its last stage.
	pub fn code(&self) -> i32 {
		match *self {
			Outcome::Foreground { ref statuses, .. } => statuses.last().map_or(0, |s| s.code()),
			Outcome::Background { .. } => 0,
		}
	}
}

pub struct ExecContext<'a> {
	pub search: &'a SearchCache,
	/// Present only when the shell owns a terminal.
	pub terminal: Option<&'a Terminal>,
}

/// A null-terminated pointer array for `execve`, built before `fork` so the
/// child does not allocate.
struct ExecArray {
	_strings: Vec<CString>,
	ptrs: Vec<*const c_char>,
}

impl ExecArray {
	fn new(strings: Vec<CString>) -> ExecArray {
		// Moving the Vec<CString> does not move the bytes the pointers refer to.
		let ptrs = strings.iter().map(|s| s.as_ptr()).chain(iter::once(ptr::null())).collect();
		ExecArray { _strings: strings, ptrs }
	}

	fn as_ptr(&self) -> *const *const c_char {
		self.ptrs.as_ptr()
	}
}

struct PreparedStage {
	path: Option<CString>,
	argv: ExecArray,
	not_found: Vec<u8>,
	cannot_exec: Vec<u8>,
}

fn prepare(search: &SearchCache, pipeline: &Pipeline) -> Result<Vec<PreparedStage>, ExecError> {
	pipeline.stages.iter().map(|stage| {
		let argv = stage.argv.iter().map(|a| CString::new(a.as_str())).collect::<Result<Vec<CString>, _>>()?;
		Ok(PreparedStage {
			path: search.lookup(stage.name()),
			argv: ExecArray::new(argv),
			not_found: format!("{}: command not found\n", stage.name()).into_bytes(),
			cannot_exec: format!("{}: cannot execute\n", stage.name()).into_bytes(),
		})
	}).collect()
}

fn environment() -> Result<ExecArray, ExecError> {
	let envp = env::vars_os().map(|(mut k, v)| CString::new({
		k.push(OsString::from("="));
		k.push(v);
		k.into_vec()
	})).collect::<Result<Vec<CString>, _>>()?;
	Ok(ExecArray::new(envp))
}

fn open_redirections(pipeline: &Pipeline) -> Result<(Option<OwnedFd>, Option<OwnedFd>), ExecError> {
	let input = match pipeline.input {
		Some(ref path) => {
			let file = OpenOptions::new().read(true).open(path)
				.map_err(|e| ExecError::InputFileNotFound { path: path.clone(), source: e })?;
			Some(OwnedFd::from(file))
		},
		None => None,
	};
	let output = match pipeline.output {
		Some(ref path) => {
			let file = OpenOptions::new().write(true).create(true).truncate(true).mode(0o666).open(path)
				.map_err(|e| ExecError::OutputFileUnwritable { path: path.clone(), source: e })?;
			Some(OwnedFd::from(file))
		},
		None => None,
	};
	Ok((input, output))
}

fn die(msg: &[u8], code: i32) -> ! {
	unsafe {
		libc::write(libc::STDERR_FILENO, msg.as_ptr() as *const libc::c_void, msg.len());
		libc::_exit(code)
	}
}

fn redirect(fd: Option<&OwnedFd>, target: RawFd) -> nix::Result<()> {
	if let Some(fd) = fd {
		let raw = fd.as_raw_fd();
		if raw != target {
			unistd::dup2(raw, target)?;
			unistd::close(raw)?;
		}
	}
	Ok(())
}

fn reset_signals() {
	let dfl = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
	for &sig in router::RESET_IN_CHILD.iter() {
		let _ = unsafe { sigaction(sig, &dfl) };
	}
	let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);
}

/// Runs in the forked child; never returns.
fn exec_command(stage: &PreparedStage, envp: &ExecArray, stdin: Option<&OwnedFd>, stdout: Option<&OwnedFd>,
                pending: Option<&OwnedFd>, pgid: Option<Pid>, take_terminal: bool) -> ! {
	let _ = unistd::setpgid(Pid::from_raw(0), pgid.unwrap_or(Pid::from_raw(0)));
	if take_terminal {
		unsafe { libc::tcsetpgrp(libc::STDIN_FILENO, libc::getpgrp()); }
	}

	if redirect(stdin, libc::STDIN_FILENO).is_err() || redirect(stdout, libc::STDOUT_FILENO).is_err() {
		die(&stage.cannot_exec, EXIT_CANNOT_EXEC);
	}
	// The read end meant for the next stage.
	if let Some(fd) = pending {
		let _ = unistd::close(fd.as_raw_fd());
	}
	reset_signals();

	match stage.path {
		Some(ref path) => {
			unsafe { libc::execve(path.as_ptr(), stage.argv.as_ptr(), envp.as_ptr()); }
			die(&stage.cannot_exec, EXIT_CANNOT_EXEC)
		},
		None => die(&stage.not_found, EXIT_NOT_FOUND),
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpawnFailure {
	Pipe(Errno),
	Fork(Errno),
}

impl SpawnFailure {
	fn errno(self) -> Errno {
		match self {
			SpawnFailure::Pipe(e) | SpawnFailure::Fork(e) => e,
		}
	}
}

impl From<SpawnFailure> for ExecError {
	fn from(failure: SpawnFailure) -> ExecError {
		match failure {
			SpawnFailure::Pipe(e) => ExecError::Pipe(e),
			SpawnFailure::Fork(e) => ExecError::Fork(e),
		}
	}
}

struct Spawned {
	pids: Vec<Pid>,
	pgid: Option<Pid>,
	pipes: usize,
	failure: Option<SpawnFailure>,
}

fn spawn_commands(ctx: &ExecContext, pipeline: &Pipeline, stages: &[PreparedStage], envp: &ExecArray,
                  input: Option<OwnedFd>, mut output: Option<OwnedFd>) -> Spawned {
	let n = stages.len();
	let take_terminal = ctx.terminal.is_some() && !pipeline.is_background;
	let mut spawned = Spawned { pids: Vec::with_capacity(n), pgid: None, pipes: 0, failure: None };
	let mut stdin = input;

	for (i, stage) in stages.iter().enumerate() {
		let is_last = i == n - 1;
		let (next, stdout) = if is_last {
			(None, output.take())
		} else {
			match unistd::pipe2(OFlag::O_CLOEXEC) {
				Ok((read, write)) => {
					spawned.pipes += 1;
					(Some(read), Some(write))
				},
				Err(e) => {
					spawned.failure = Some(SpawnFailure::Pipe(e));
					break;
				},
			}
		};

		match unsafe { unistd::fork() } {
			Ok(ForkResult::Child) => {
				exec_command(stage, envp, stdin.as_ref(), stdout.as_ref(), next.as_ref(), spawned.pgid, take_terminal);
			},
			Ok(ForkResult::Parent { child }) => {
				let pgid = *spawned.pgid.get_or_insert(child);
				// The child does the same; whichever runs first wins.
				let _ = unistd::setpgid(child, pgid);
				// Interrupts reach the group from here on, even mid-spawn.
				if i == 0 && !pipeline.is_background {
					router::set_foreground(pgid);
				}
				if i == 0 && take_terminal {
					if let Some(terminal) = ctx.terminal {
						if let Err(e) = terminal.hand_to(pgid) {
							warn!(%pgid, error = %e, "cannot hand the terminal to the pipeline");
						}
					}
				}
				debug!(pid = %child, %pgid, stage = i, program = %pipeline.stages[i].name(), "spawned");
				spawned.pids.push(child);
			},
			Err(e) => {
				spawned.failure = Some(SpawnFailure::Fork(e));
				break;
			},
		}

		// This stage's ends belong to the child now.
		drop(stdin);
		drop(stdout);
		stdin = next;
	}
	spawned
}

fn wait_stage(pid: Pid) -> StageStatus {
	loop {
		match waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
			Ok(WaitStatus::Exited(_, code)) => { return StageStatus::Exited(code); },
			Ok(WaitStatus::Signaled(_, sig, _)) => { return StageStatus::Signaled(sig); },
			Ok(WaitStatus::Stopped(_, sig)) => { return StageStatus::Stopped(sig); },
			Ok(_) | Err(Errno::EINTR) => {},
			Err(e) => { return StageStatus::Lost(e); },
		}
	}
}

fn wait_foreground(ctx: &ExecContext, spawned: &Spawned, n: usize) -> (Vec<StageStatus>, Vec<Pid>) {
	let mut statuses = Vec::with_capacity(n);
	let mut stopped = vec![];
	if let Some(pgid) = spawned.pgid {
		for &pid in &spawned.pids {
			let status = wait_stage(pid);
			match status {
				StageStatus::Signaled(sig) => warn!(%pid, %sig, "child terminated by signal"),
				StageStatus::Stopped(sig) => {
					warn!(%pid, %sig, "child stopped, no longer waiting for it");
					if router::watch(pid) {
						stopped.push(pid);
					} else {
						warn!(%pid, "no free slot to reap the stopped child later");
					}
				},
				StageStatus::Lost(e) => warn!(%pid, error = %e, "cannot collect child status"),
				_ => {},
			}
			statuses.push(status);
		}
		router::clear_foreground(pgid);
		if let Some(terminal) = ctx.terminal {
			if let Err(e) = terminal.reclaim() {
				warn!(error = %e, "cannot take the terminal back");
			}
		}
	}
	if let Some(failure) = spawned.failure {
		statuses.push(StageStatus::SpawnFailed(failure.errno()));
	}
	while statuses.len() < n {
		statuses.push(StageStatus::NotSpawned);
	}
	(statuses, stopped)
}

/// Runs `pipeline`. Foreground pipelines are waited for; background ones are
/// registered in `jobs` and left running.
pub fn execute(ctx: &ExecContext, jobs: &mut JobTable, pipeline: &Pipeline) -> Result<Outcome, ExecError> {
	assert!(!pipeline.is_empty());
	let n = pipeline.len();

	let stages = prepare(ctx.search, pipeline)?;
	let envp = environment()?;
	if pipeline.is_background {
		let available = router::free_slots();
		if available < n {
			return Err(ExecError::CapacityExceeded { needed: n, available });
		}
	}
	let (input, output) = open_redirections(pipeline)?;

	let spawned = spawn_commands(ctx, pipeline, &stages, &envp, input, output);
	if spawned.pids.is_empty() {
		let failure = spawned.failure.unwrap_or(SpawnFailure::Fork(Errno::EAGAIN));
		return Err(failure.into());
	}
	if let Some(failure) = spawned.failure {
		warn!(stage = spawned.pids.len(), error = %failure.errno(), "pipeline only partially started");
	}

	if !pipeline.is_background {
		let (statuses, stopped) = wait_foreground(ctx, &spawned, n);
		return Ok(Outcome::Foreground { statuses, pipes: spawned.pipes, stopped });
	}

	for &pid in &spawned.pids {
		router::watch(pid);
	}
	// Children that exited before they were watched raised SIGCHLD too early.
	router::reap();

	let pid = spawned.pids[spawned.pids.len() - 1];
	let pgid = spawned.pgid.unwrap_or(pid);
	let index = jobs.add(pgid, spawned.pids, &pipeline.text);
	info!(index, %pid, %pgid, command = %pipeline.text, "started background job");
	Ok(Outcome::Background { index, pid })
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::ffi::CStr;

	#[test]
	fn exec_arrays_are_null_terminated() {
		let strings = vec![CString::new("ls").unwrap(), CString::new("-l").unwrap()];
		let array = ExecArray::new(strings);
		assert_eq!(array.ptrs.len(), 3);
		assert!(array.ptrs[2].is_null());
		let first = unsafe { CStr::from_ptr(array.ptrs[0]) };
		assert_eq!(first.to_bytes(), b"ls");
	}

	#[test]
	fn failures_before_any_stage_name_their_cause() {
		match ExecError::from(SpawnFailure::Pipe(Errno::EMFILE)) {
			ExecError::Pipe(Errno::EMFILE) => {},
			other => panic!("expected a pipe error, got {:?}", other),
		}
		match ExecError::from(SpawnFailure::Fork(Errno::EAGAIN)) {
			ExecError::Fork(Errno::EAGAIN) => {},
			other => panic!("expected a fork error, got {:?}", other),
		}
		assert_eq!(SpawnFailure::Pipe(Errno::EMFILE).errno(), Errno::EMFILE);
	}
}
