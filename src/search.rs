use std::collections::HashMap;
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::{env, fs, io};

/// Program name to executable path, built from `$PATH`.
///
/// Lookups happen in the shell before forking so that the child does
/// nothing but descriptor plumbing and `execve`.
pub struct SearchCache {
	imp: HashMap<Vec<u8>, CString>,
}

const PATH_KEY: &str = "PATH";

fn is_executable(path: &Path) -> bool {
	fs::metadata(path).map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}

impl SearchCache {
	pub fn new() -> SearchCache {
		let mut this = SearchCache { imp: HashMap::new() };
		this.rehash();
		this
	}

	fn add_entry(&mut self, entry: io::Result<fs::DirEntry>) -> io::Result<()> {
		let e = entry?;
		let path = e.path();
		if !is_executable(&path) {
			return Ok(());
		}
		let file_name = e.file_name().as_bytes().to_vec();
		let path = CString::new(path.as_os_str().as_bytes())?;
		self.imp.entry(file_name).or_insert(path);
		Ok(())
	}

	pub fn rehash(&mut self) {
		self.imp.clear();
		let paths = match env::var_os(PATH_KEY) {
			Some(p) => p,
			None => { return; },
		};
		for dir in env::split_paths(&paths) {
			if let Ok(entries) = fs::read_dir(dir) {
				for entry in entries {
					let _ = self.add_entry(entry);
				}
			}
		}
		tracing::debug!(commands = self.imp.len(), "rehashed command search cache");
	}

	pub fn len(&self) -> usize {
		self.imp.len()
	}

	pub fn is_empty(&self) -> bool {
		self.imp.is_empty()
	}

	/// Resolves a program name. Names containing a slash are used as-is;
	/// anything else must be found in `$PATH`.
	pub fn lookup(&self, name: &str) -> Option<CString> {
		if name.contains('/') {
			return CString::new(name).ok();
		}
		if let Some(path) = self.imp.get(name.as_bytes()) {
			return Some(path.clone());
		}
		// Installed since the last rehash.
		let paths = env::var_os(PATH_KEY)?;
		env::split_paths(&paths)
			.map(|dir| dir.join(OsStr::new(name)))
			.find(|candidate| is_executable(candidate))
			.and_then(|found| CString::new(found.as_os_str().as_bytes()).ok())
	}
}

impl Default for SearchCache {
	fn default() -> SearchCache {
		SearchCache::new()
	}
}
