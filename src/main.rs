use std::env;
use std::io::{self, BufRead, IsTerminal, Write};

use pipesh::session::{Notifications, Session};
use pipesh::{cli, logging};

fn report(notifications: Notifications) {
	for job in notifications.finished {
		println!("[{}] Done {}", job.index, job.command);
	}
	if let Some(pgid) = notifications.interrupted {
		println!("interrupted process group {}", pgid);
	}
}

fn run_main() -> anyhow::Result<i32> {
	let args = cli::parse();
	logging::init_logging(args.log_level)?;
	let mut session = Session::start(&args.session_config())?;

	let show_prompt = io::stdin().is_terminal();
	let mut stdout = io::stdout();
	let stdin = io::stdin();
	let mut stdin_locked = stdin.lock();
	loop {
		report(session.poll());
		if show_prompt {
			let prompt = args.render_prompt(env::current_dir().ok().as_deref());
			let _ = stdout.write_all(prompt.as_bytes());
			let _ = stdout.flush();
		}
		let mut line: Vec<u8> = vec![];
		match stdin_locked.read_until(b'\n', &mut line) {
			Ok(0) => { break; },
			Ok(_) => {},
			Err(ref e) if e.kind() == io::ErrorKind::Interrupted => { continue; },
			Err(e) => { return Err(e.into()); },
		}
		match String::from_utf8(line) {
			Ok(text) => session.run(&text),
			Err(_) => {
				eprintln!("pipesh: input is not valid UTF-8, line ignored");
				session.last_status = 1;
			},
		}
		if session.should_exit {
			break;
		}
	}
	let status = session.last_status;
	drop(session);
	Ok(status)
}

fn main() {
	match run_main() {
		Ok(status) => std::process::exit(status),
		Err(err) => {
			eprintln!("pipesh: {:#}", err);
			std::process::exit(1);
		},
	}
}
