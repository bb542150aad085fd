use std::fmt;

use nix::sys::signal::{self, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use crate::error::JobError;

/// Exit code reported for a child whose status could not be collected.
pub const UNKNOWN_STATUS: i32 = -1;

pub trait WaitStatusExt {
	/// Shell-style code: the exit status, or 128 plus the terminating signal.
	fn code(self) -> Option<i32>;
}

impl WaitStatusExt for WaitStatus {
	fn code(self) -> Option<i32> {
		match self {
			WaitStatus::Exited(_, code) => Some(code),
			WaitStatus::Signaled(_, sig, _) => Some(128 + sig as i32),
			_ => None,
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum JobState { Running, Done }

impl fmt::Display for JobState {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			JobState::Running => f.write_str("Running"),
			JobState::Done => f.write_str("Done"),
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Job {
	pub index: usize,
	/// Last stage of the pipeline.
	pub pid: Pid,
	pub pgid: Pid,
	pub pids: Vec<Pid>,
	pub command: String,
	pub state: JobState,
	pub exit_code: Option<i32>,
}

impl fmt::Display for Job {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "[{}] {} {:<8} {}", self.index, self.pid, self.state, self.command)
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum JobTarget {
	Index(usize),
	Pid(Pid),
}

impl JobTarget {
	/// `%N` names a job, a bare number a process id.
	pub fn parse(s: &str) -> Option<JobTarget> {
		if let Some(rest) = s.strip_prefix('%') {
			rest.parse().ok().filter(|&n| n > 0).map(JobTarget::Index)
		} else {
			s.parse().ok().filter(|&n| n > 0).map(|n| JobTarget::Pid(Pid::from_raw(n)))
		}
	}
}

/// Background pipelines of one session, in the order they were started.
#[derive(Debug)]
pub struct JobTable {
	jobs: Vec<Job>,
	next_index: usize,
}

impl JobTable {
	pub fn new() -> JobTable {
		JobTable { jobs: vec![], next_index: 1 }
	}

	/// Records a running pipeline and returns its job index. `pids` are in
	/// stage order and must not be empty.
	pub fn add(&mut self, pgid: Pid, pids: Vec<Pid>, command: &str) -> usize {
		assert!(!pids.is_empty());
		let index = self.next_index;
		self.next_index += 1;
		let pid = pids[pids.len() - 1];
		self.jobs.push(Job {
			index,
			pid,
			pgid,
			pids,
			command: command.to_string(),
			state: JobState::Running,
			exit_code: None,
		});
		index
	}

	pub fn list(&self) -> &[Job] {
		&self.jobs
	}

	pub fn get(&self, index: usize) -> Option<&Job> {
		self.jobs.iter().find(|job| job.index == index)
	}

	pub fn running(&self) -> usize {
		self.jobs.iter().filter(|job| job.state == JobState::Running).count()
	}

	pub fn is_empty(&self) -> bool {
		self.jobs.is_empty()
	}

	/// Moves the job represented by `pid` to Done. Returns its index when the
	/// pid belonged to a running job.
	pub fn mark_done(&mut self, pid: Pid, exit_code: i32) -> Option<usize> {
		let job = self.jobs.iter_mut().find(|job| job.pid == pid && job.state == JobState::Running)?;
		job.state = JobState::Done;
		job.exit_code = Some(exit_code);
		Some(job.index)
	}

	/// Index of the job `target` names, when it names one. A pid names a job
	/// only if it is the job's representative process.
	pub fn find(&self, target: JobTarget) -> Option<usize> {
		match target {
			JobTarget::Index(index) => self.get(index).map(|job| job.index),
			JobTarget::Pid(pid) => self.jobs.iter().find(|job| job.pid == pid).map(|job| job.index),
		}
	}

	pub fn resolve_and_signal(&self, target: JobTarget, sig: Signal) -> Result<(), JobError> {
		match target {
			JobTarget::Index(index) => {
				let job = self.get(index).ok_or(JobError::UnknownJob(index))?;
				if job.state == JobState::Done {
					return Err(JobError::NotRunning(index));
				}
				signal::killpg(job.pgid, sig).map_err(|e| JobError::Signal { pid: job.pgid, source: e })
			},
			JobTarget::Pid(pid) => {
				if let Some(job) = self.jobs.iter().find(|job| job.pid == pid && job.state == JobState::Done) {
					return Err(JobError::NotRunning(job.index));
				}
				signal::kill(pid, sig).map_err(|e| JobError::Signal { pid, source: e })
			},
		}
	}

	/// Drops finished jobs and hands them back for reporting.
	pub fn remove_done(&mut self) -> Vec<Job> {
		let (done, running): (Vec<Job>, Vec<Job>) = self.jobs.drain(..).partition(|job| job.state == JobState::Done);
		self.jobs = running;
		done
	}
}

impl Default for JobTable {
	fn default() -> JobTable {
		JobTable::new()
	}
}
