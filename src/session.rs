//! The shell session: owns the job table and terminal state and decides how
//! each command line is run.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use nix::unistd::{self, Pid};
use tracing::{debug, warn};

use crate::builtin;
use crate::error::{self, ExecError, JobError, ShellError, StartupError};
use crate::eval::{self, ExecContext, Outcome, StageStatus};
use crate::history::History;
use crate::job::{Job, JobState, JobTable, JobTarget};
use crate::parser;
use crate::search::SearchCache;
use crate::signal::{self, SignalRouter, Terminal};
use crate::types::Pipeline;

/// How long `signal_job` waits for a signalled job to die.
const SIGNAL_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// Take control of the terminal when standard input is one.
	pub job_control: bool,
	pub history_file: Option<PathBuf>,
}

impl Default for SessionConfig {
	fn default() -> SessionConfig {
		SessionConfig { job_control: true, history_file: None }
	}
}

/// What happened in the background since the last poll.
#[derive(Debug, Default)]
pub struct Notifications {
	pub finished: Vec<Job>,
	pub interrupted: Option<Pid>,
}

pub struct Session {
	pub shell_pid: Pid,
	pub shell_pgid: Pid,
	terminal: Option<Terminal>,
	_router: SignalRouter,
	pub search_cache: SearchCache,
	jobs: JobTable,
	/// Background processes whose exit has not been collected yet.
	unreaped: Vec<Pid>,
	pub history: Option<History>,
	pub last_status: i32,
	pub should_exit: bool,
}

impl Session {
	pub fn start(config: &SessionConfig) -> Result<Session, StartupError> {
		let terminal = if config.job_control && io::stdin().is_terminal() {
			Some(Terminal::seize()?)
		} else {
			debug!("standard input is not a terminal, running without job control");
			None
		};
		let router = SignalRouter::install()?;
		let (shell_pid, shell_pgid) = (unistd::getpid(), unistd::getpgrp());
		debug!(pid = %shell_pid, pgid = %shell_pgid, interactive = terminal.is_some(), "session started");
		Ok(Session {
			shell_pid,
			shell_pgid,
			terminal,
			_router: router,
			search_cache: SearchCache::new(),
			jobs: JobTable::new(),
			unreaped: vec![],
			history: config.history_file.clone().map(History::new),
			last_status: 0,
			should_exit: false,
		})
	}

	pub fn is_interactive(&self) -> bool {
		self.terminal.is_some()
	}

	pub fn jobs(&self) -> &JobTable {
		&self.jobs
	}

	pub fn execute(&mut self, pipeline: &Pipeline) -> Result<Outcome, ExecError> {
		let ctx = ExecContext { search: &self.search_cache, terminal: self.terminal.as_ref() };
		let outcome = eval::execute(&ctx, &mut self.jobs, pipeline)?;
		match outcome {
			Outcome::Background { index, .. } => {
				if let Some(job) = self.jobs.get(index) {
					self.unreaped.extend(job.pids.iter().cloned());
				}
			},
			Outcome::Foreground { ref stopped, .. } => {
				self.unreaped.extend(stopped.iter().cloned());
			},
		}
		Ok(outcome)
	}

	/// Moves exit statuses collected by the reap cycle into the job table.
	fn refresh(&mut self) {
		signal::reap();
		let jobs = &mut self.jobs;
		self.unreaped.retain(|&pid| match signal::take_reaped(pid) {
			Some(code) => {
				if let Some(index) = jobs.mark_done(pid, code) {
					debug!(index, %pid, code, "background job finished");
				}
				false
			},
			None => true,
		});
	}

	/// Called once per iteration of the read loop.
	pub fn poll(&mut self) -> Notifications {
		self.refresh();
		Notifications {
			finished: self.jobs.remove_done(),
			interrupted: signal::take_interrupted(),
		}
	}

	/// Current jobs in start order. Finished jobs appear once, then are dropped.
	pub fn list_jobs(&mut self) -> Vec<Job> {
		self.refresh();
		let jobs = self.jobs.list().to_vec();
		self.jobs.remove_done();
		jobs
	}

	/// Number of background jobs that have not finished yet.
	pub fn running_jobs(&mut self) -> usize {
		self.refresh();
		self.jobs.running()
	}

	/// Sends `sig` to a job or process. When the signal normally terminates
	/// and the target is a job, waits briefly for it to be reaped, so the next
	/// listing shows it Done rather than Running.
	pub fn signal_job(&mut self, target: JobTarget, sig: Signal) -> Result<(), JobError> {
		self.refresh();
		let r = self.jobs.resolve_and_signal(target, sig);
		self.jobs.remove_done();
		r?;
		if terminates_by_default(sig) {
			if let Some(index) = self.jobs.find(target) {
				self.settle(index);
			}
		}
		Ok(())
	}

	fn settle(&mut self, index: usize) {
		let deadline = Instant::now() + SIGNAL_SETTLE;
		loop {
			self.refresh();
			match self.jobs.get(index) {
				Some(job) if job.state == JobState::Running => {},
				_ => { return; },
			}
			if Instant::now() >= deadline {
				debug!(index, "job still running after being signalled");
				return;
			}
			thread::sleep(Duration::from_millis(5));
		}
	}

	/// Runs one input line: a built-in when the line is a lone built-in
	/// command, a pipeline otherwise. Errors are printed and end up in
	/// `last_status`.
	pub fn run(&mut self, line: &str) {
		if let Err(e) = self.try_run(line) {
			eprintln!("pipesh: {}", e);
			self.last_status = match e {
				ShellError::Parse(_) => 2,
				_ => eval::EXIT_CANNOT_EXEC,
			};
		}
	}

	fn try_run(&mut self, line: &str) -> error::Result<()> {
		let pipeline = match parser::parse(line)? {
			Some(p) => p,
			None => { return Ok(()); },
		};
		if let Some(ref history) = self.history {
			if let Err(e) = history.append(&pipeline.text) {
				warn!(path = %history.path().display(), error = %e, "cannot append to history");
			}
		}

		if pipeline.is_simple() {
			if let Some(func) = builtin::match_builtin(pipeline.stages[0].name()) {
				self.last_status = func(self, pipeline.stages[0].arguments());
				return Ok(());
			}
		}

		let outcome = self.execute(&pipeline)?;
		report(&pipeline, &outcome);
		self.last_status = outcome.code();
		Ok(())
	}
}

fn terminates_by_default(sig: Signal) -> bool {
	!matches!(sig, Signal::SIGCHLD | Signal::SIGCONT | Signal::SIGSTOP | Signal::SIGTSTP
		| Signal::SIGTTIN | Signal::SIGTTOU | Signal::SIGURG | Signal::SIGWINCH)
}

fn report(pipeline: &Pipeline, outcome: &Outcome) {
	match *outcome {
		Outcome::Background { index, pid } => println!("[{}] {}", index, pid),
		Outcome::Foreground { ref statuses, .. } => {
			for (stage, status) in pipeline.stages.iter().zip(statuses) {
				match *status {
					StageStatus::Exited(_) | StageStatus::Signaled(Signal::SIGPIPE) => {},
					_ => eprintln!("pipesh: {}: {}", stage.name(), status),
				}
			}
		},
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		if let Some(ref terminal) = self.terminal {
			if let Err(e) = terminal.restore() {
				warn!(error = %e, "cannot restore terminal modes");
			}
		}
	}
}
