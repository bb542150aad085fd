//! Execution core of a small job-control shell: parses a command line into
//! a pipeline, runs it as a group of processes wired together with pipes and
//! tracks background pipelines until they are reaped.

pub mod builtin;
pub mod cli;
pub mod error;
pub mod eval;
pub mod history;
pub mod job;
pub mod logging;
pub mod parser;
pub mod search;
pub mod session;
pub mod signal;
pub mod types;

pub use error::{ExecError, JobError, ParseError, ShellError, StartupError};
pub use eval::{Outcome, StageStatus};
pub use job::{Job, JobState, JobTarget};
pub use parser::parse;
pub use session::{Session, SessionConfig};
pub use types::{Pipeline, Stage};
