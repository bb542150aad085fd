use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only log of the lines typed into the shell.
#[derive(Debug, Clone)]
pub struct History {
	path: PathBuf,
}

impl History {
	pub fn new<P: Into<PathBuf>>(path: P) -> History {
		History { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn append(&self, line: &str) -> io::Result<()> {
		let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
		writeln!(file, "{}", line)
	}

	/// Every recorded line, oldest first. A missing log is an empty history.
	pub fn entries(&self) -> io::Result<Vec<String>> {
		match fs::read_to_string(&self.path) {
			Ok(content) => Ok(content.lines().map(|l| l.to_string()).collect()),
			Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(vec![]),
			Err(e) => Err(e),
		}
	}
}
