use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;

use nix::sys::signal::Signal;

use crate::job::JobTarget;
use crate::session::Session;

pub type Builtin = fn(&mut Session, &[String]) -> i32;

const HELP: &str = "\
cd [DIR]          change the working directory (default: $HOME)
pwd               print the working directory
clear             clear the screen
jobs              list background jobs
kill [-SIG] TARGET  send SIG (default INT) to a pid or to a job given as %N
history           print the command history
rehash            rebuild the command search cache
exit              leave the shell, unless background jobs are still running
help              print this text

CMD [ARGS] [< IN] [| CMD [ARGS]]... [> OUT] [&]
";

pub fn builtin_exit(session: &mut Session, _: &[String]) -> i32 {
	let running = session.running_jobs();
	if running > 0 {
		eprintln!("pipesh: {} background job(s) still running", running);
		return 1;
	}
	session.should_exit = true;
	0
}

pub fn builtin_cd(_: &mut Session, args: &[String]) -> i32 {
	let dir = match args.len() {
		0 => match env::var_os("HOME") {
			Some(home) => PathBuf::from(home),
			None => {
				eprintln!("pipesh: cd: HOME is not set");
				return 1;
			},
		},
		1 => PathBuf::from(&args[0]),
		_ => {
			eprintln!("pipesh: cd: too many arguments");
			return 1;
		},
	};
	if let Err(e) = env::set_current_dir(&dir) {
		eprintln!("pipesh: cd: {}: {}", dir.display(), e);
		return 1;
	}
	if let Ok(cwd) = env::current_dir() {
		env::set_var("PWD", cwd);
	}
	0
}

pub fn builtin_pwd(_: &mut Session, _: &[String]) -> i32 {
	match env::current_dir() {
		Ok(cwd) => {
			println!("{}", cwd.display());
			0
		},
		Err(e) => {
			eprintln!("pipesh: pwd: {}", e);
			1
		},
	}
}

/// Moves the cursor home and erases the display.
const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J";

pub fn builtin_clear(_: &mut Session, _: &[String]) -> i32 {
	let mut stdout = io::stdout();
	match stdout.write_all(CLEAR_SCREEN.as_bytes()).and_then(|_| stdout.flush()) {
		Ok(()) => 0,
		Err(e) => {
			eprintln!("pipesh: clear: {}", e);
			1
		},
	}
}

pub fn builtin_jobs(session: &mut Session, _: &[String]) -> i32 {
	for job in session.list_jobs() {
		println!("{}", job);
	}
	0
}

fn parse_signal(arg: &str) -> Option<Signal> {
	if let Ok(n) = arg.parse::<i32>() {
		return Signal::try_from(n).ok();
	}
	let name = arg.to_uppercase();
	if name.starts_with("SIG") {
		Signal::from_str(&name).ok()
	} else {
		Signal::from_str(&format!("SIG{}", name)).ok()
	}
}

pub fn builtin_kill(session: &mut Session, args: &[String]) -> i32 {
	let (sig, rest) = match args.first() {
		Some(first) if first.starts_with('-') => match parse_signal(&first[1..]) {
			Some(sig) => (sig, &args[1..]),
			None => {
				eprintln!("pipesh: kill: {}: invalid signal", first);
				return 1;
			},
		},
		_ => (Signal::SIGINT, args),
	};
	if rest.len() != 1 {
		eprintln!("pipesh: kill: usage: kill [-SIG] PID|%JOB");
		return 1;
	}
	let target = match JobTarget::parse(&rest[0]) {
		Some(t) => t,
		None => {
			eprintln!("pipesh: kill: {}: not a pid or job", rest[0]);
			return 1;
		},
	};
	match session.signal_job(target, sig) {
		Ok(()) => 0,
		Err(e) => {
			eprintln!("pipesh: kill: {}", e);
			1
		},
	}
}

pub fn builtin_history(session: &mut Session, _: &[String]) -> i32 {
	let history = match session.history {
		Some(ref h) => h,
		None => {
			eprintln!("pipesh: history: no history file");
			return 1;
		},
	};
	match history.entries() {
		Ok(entries) => {
			for (i, line) in entries.iter().enumerate() {
				println!("{:5}  {}", i + 1, line);
			}
			0
		},
		Err(e) => {
			eprintln!("pipesh: history: {}", e);
			1
		},
	}
}

pub fn builtin_rehash(session: &mut Session, _: &[String]) -> i32 {
	session.search_cache.rehash();
	0
}

pub fn builtin_help(_: &mut Session, _: &[String]) -> i32 {
	print!("{}", HELP);
	0
}

pub fn match_builtin(name: &str) -> Option<Builtin> {
	match name {
		"exit" => Some(builtin_exit),
		"cd" => Some(builtin_cd),
		"pwd" => Some(builtin_pwd),
		"clear" => Some(builtin_clear),
		"jobs" => Some(builtin_jobs),
		"kill" => Some(builtin_kill),
		"history" => Some(builtin_history),
		"rehash" => Some(builtin_rehash),
		"help" => Some(builtin_help),
		_ => None,
	}
}
