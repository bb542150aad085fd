//! Command-line arguments.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use crate::session::SessionConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "pipesh", version, about = "A small job-control shell.", long_about = None)]
pub struct CliArgs {
	/// Logging level. Falls back to `PIPESH_LOG`, then `warn`.
	#[arg(long, value_enum, value_name = "LEVEL")]
	pub log_level: Option<LogLevel>,

	/// Prompt printed before each line, after the working directory, when
	/// standard input is a terminal.
	#[arg(long, default_value = "pipesh> ")]
	pub prompt: String,

	/// File every command line is appended to.
	#[arg(long, value_name = "PATH", default_value = "history.txt")]
	pub history_file: PathBuf,

	/// Do not record command lines.
	#[arg(long)]
	pub no_history: bool,

	/// Never take control of the terminal, even when attached to one.
	#[arg(long)]
	pub no_job_control: bool,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
	Error,
	Warn,
	Info,
	Debug,
	Trace,
}

impl CliArgs {
	pub fn session_config(&self) -> SessionConfig {
		SessionConfig {
			job_control: !self.no_job_control,
			history_file: if self.no_history { None } else { Some(self.history_file.clone()) },
		}
	}

	pub fn render_prompt(&self, cwd: Option<&Path>) -> String {
		match cwd {
			Some(dir) => format!("{} {}", dir.display(), self.prompt),
			None => self.prompt.clone(),
		}
	}
}

pub fn parse() -> CliArgs {
	CliArgs::parse()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let args = CliArgs::try_parse_from(["pipesh"]).unwrap();
		assert_eq!(args.prompt, "pipesh> ");
		let config = args.session_config();
		assert!(config.job_control);
		assert_eq!(config.history_file, Some(PathBuf::from("history.txt")));
	}

	#[test]
	fn history_and_job_control_can_be_disabled() {
		let args = CliArgs::try_parse_from(["pipesh", "--no-history", "--no-job-control", "--log-level", "debug"]).unwrap();
		let config = args.session_config();
		assert!(!config.job_control);
		assert_eq!(config.history_file, None);
		assert!(matches!(args.log_level, Some(LogLevel::Debug)));
	}

	#[test]
	fn prompt_shows_the_working_directory() {
		let args = CliArgs::try_parse_from(["pipesh", "--prompt", "$ "]).unwrap();
		assert_eq!(args.render_prompt(Some(Path::new("/tmp"))), "/tmp $ ");
		assert_eq!(args.render_prompt(None), "$ ");
	}
}
