use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RedirectType { Input, Output }

impl RedirectType {
	pub fn operator(self) -> &'static str {
		match self {
			RedirectType::Input => "<",
			RedirectType::Output => ">",
		}
	}
}

impl fmt::Display for RedirectType {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.operator())
	}
}

/// One program invocation; `argv[0]` is the program name.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Stage {
	pub argv: Vec<String>,
}

impl Stage {
	pub fn name(&self) -> &str {
		&self.argv[0]
	}

	pub fn arguments(&self) -> &[String] {
		&self.argv[1..]
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Pipeline {
	pub stages: Vec<Stage>,
	/// Applies to the first stage only.
	pub input: Option<String>,
	/// Applies to the last stage only.
	pub output: Option<String>,
	pub is_background: bool,
	/// The command as typed, for job listings.
	pub text: String,
}

impl Pipeline {
	pub fn len(&self) -> usize {
		self.stages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.stages.is_empty()
	}

	/// Whether a built-in may run this pipeline in the shell process itself.
	pub fn is_simple(&self) -> bool {
		self.stages.len() == 1 && self.input.is_none() && self.output.is_none() && !self.is_background
	}
}
