//! Error taxonomy of the shell core.
//!
//! Parse and resource errors abort only the command being run; a
//! `StartupError` is the one condition that terminates the shell.

use std::{ffi, io};

use nix::unistd::Pid;
use thiserror::Error;

use crate::types::RedirectType;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
	#[error("too many arguments (limit is {limit})")]
	TooManyArguments { limit: usize },

	#[error("missing file name after '{0}'")]
	DanglingRedirection(RedirectType),

	#[error("'{0}' may appear only once per command line")]
	DuplicateRedirection(RedirectType),

	#[error("'{0}' is not allowed here")]
	MisplacedRedirection(RedirectType),

	#[error("'&' is only allowed at the end of a command line")]
	MisplacedBackgroundMarker,

	#[error("empty command in pipeline")]
	EmptyPipeline,
}

#[derive(Error, Debug)]
pub enum ExecError {
	#[error("{path}: cannot open for reading: {source}")]
	InputFileNotFound { path: String, #[source] source: io::Error },

	#[error("{path}: cannot open for writing: {source}")]
	OutputFileUnwritable { path: String, #[source] source: io::Error },

	#[error("cannot create pipe: {0}")]
	Pipe(#[source] nix::Error),

	#[error("cannot start process: {0}")]
	Fork(#[source] nix::Error),

	#[error("argument contains a nul byte: {0}")]
	InvalidArgument(#[from] ffi::NulError),

	#[error("too many background processes: {needed} requested, {available} slots free")]
	CapacityExceeded { needed: usize, available: usize },
}

#[derive(Error, Debug)]
pub enum JobError {
	#[error("no such job: %{0}")]
	UnknownJob(usize),

	#[error("job %{0} has already finished")]
	NotRunning(usize),

	#[error("cannot signal process {pid}: {source}")]
	Signal { pid: Pid, #[source] source: nix::Error },
}

#[derive(Error, Debug)]
pub enum StartupError {
	#[error("cannot take control of the terminal: {0}")]
	Terminal(#[source] nix::Error),

	#[error("shell is not the leader of its process group (pid {pid}, pgid {pgid})")]
	NotGroupLeader { pid: Pid, pgid: Pid },

	#[error("cannot install signal handlers: {0}")]
	Signals(#[source] nix::Error),
}

#[derive(Error, Debug)]
pub enum ShellError {
	#[error(transparent)]
	Parse(#[from] ParseError),

	#[error(transparent)]
	Exec(#[from] ExecError),

	#[error(transparent)]
	Job(#[from] JobError),

	#[error(transparent)]
	Startup(#[from] StartupError),

	#[error("IO error: {0}")]
	Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ShellError>;
