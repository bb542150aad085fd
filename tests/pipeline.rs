use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use pipesh::eval::EXIT_NOT_FOUND;
use pipesh::signal;
use pipesh::{parse, ExecError, Outcome, Session, SessionConfig, StageStatus};

fn session() -> Session {
	let config = SessionConfig { job_control: false, history_file: None };
	Session::start(&config).unwrap()
}

fn run(session: &mut Session, line: &str) -> Result<Outcome, ExecError> {
	let pipeline = parse(line).unwrap().expect("line should not be blank");
	session.execute(&pipeline)
}

fn foreground(outcome: Outcome) -> (Vec<StageStatus>, usize) {
	match outcome {
		Outcome::Foreground { statuses, pipes, .. } => (statuses, pipes),
		other => panic!("expected a foreground outcome, got {:?}", other),
	}
}

fn path_str(p: &Path) -> &str {
	p.to_str().unwrap()
}

#[test]
fn output_redirection_writes_the_file() {
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("out.txt");
	let mut session = session();

	let (statuses, pipes) = foreground(run(&mut session, &format!("echo foo > {}", path_str(&out))).unwrap());
	assert_eq!(statuses, vec![StageStatus::Exited(0)]);
	assert_eq!(pipes, 0);
	assert_eq!(fs::read_to_string(&out).unwrap(), "foo\n");
}

#[test]
fn output_redirection_truncates() {
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("out.txt");
	fs::write(&out, "a much longer previous content\n").unwrap();
	let mut session = session();

	run(&mut session, &format!("echo new > {}", path_str(&out))).unwrap();
	assert_eq!(fs::read_to_string(&out).unwrap(), "new\n");
}

#[test]
fn two_stage_pipeline_passes_bytes_through() {
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("out.txt");
	let mut session = session();

	let (statuses, pipes) = foreground(run(&mut session, &format!("echo hello | cat > {}", path_str(&out))).unwrap());
	assert_eq!(statuses, vec![StageStatus::Exited(0), StageStatus::Exited(0)]);
	assert_eq!(pipes, 1);
	assert_eq!(fs::read_to_string(&out).unwrap(), "hello\n");
}

#[test]
fn k_stages_use_k_minus_one_pipes() {
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("count.txt");
	let mut session = session();

	let line = format!("seq 1 10 | grep 1 | wc -l > {}", path_str(&out));
	let (statuses, pipes) = foreground(run(&mut session, &line).unwrap());
	assert_eq!(pipes, 2);
	assert!(statuses.iter().all(|s| s.success()), "{:?}", statuses);
	assert_eq!(fs::read_to_string(&out).unwrap().trim(), "2");
}

#[test]
fn input_redirection_feeds_the_first_stage() {
	let dir = tempfile::tempdir().unwrap();
	let input = dir.path().join("in.txt");
	let out = dir.path().join("out.txt");
	fs::write(&input, "pear\napple\nfig\n").unwrap();
	let mut session = session();

	let line = format!("sort < {} | head -n 2 > {}", path_str(&input), path_str(&out));
	let (statuses, _) = foreground(run(&mut session, &line).unwrap());
	assert_eq!(statuses, vec![StageStatus::Exited(0), StageStatus::Exited(0)]);
	assert_eq!(fs::read_to_string(&out).unwrap(), "apple\nfig\n");
}

#[test]
fn missing_input_aborts_before_anything_runs() {
	let dir = tempfile::tempdir().unwrap();
	let input = dir.path().join("missing.txt");
	let out = dir.path().join("out.txt");
	let mut session = session();

	let line = format!("cat < {} > {}", path_str(&input), path_str(&out));
	match run(&mut session, &line) {
		Err(ExecError::InputFileNotFound { path, .. }) => assert_eq!(path, path_str(&input)),
		other => panic!("expected InputFileNotFound, got {:?}", other),
	}
	assert!(!out.exists());
}

#[test]
fn unwritable_output_aborts_the_command() {
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("no-such-dir").join("out.txt");
	let mut session = session();

	match run(&mut session, &format!("echo foo > {}", path_str(&out))) {
		Err(ExecError::OutputFileUnwritable { .. }) => {},
		other => panic!("expected OutputFileUnwritable, got {:?}", other),
	}
}

#[test]
fn unknown_program_fails_only_its_own_stage() {
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("out.txt");
	let mut session = session();

	let line = format!("pipesh-no-such-command-x9 | echo still-here > {}", path_str(&out));
	let (statuses, _) = foreground(run(&mut session, &line).unwrap());
	assert_eq!(statuses, vec![StageStatus::Exited(EXIT_NOT_FOUND), StageStatus::Exited(0)]);
	assert_eq!(fs::read_to_string(&out).unwrap(), "still-here\n");
}

#[test]
fn exit_codes_are_reported_per_stage() {
	let mut session = session();
	let (statuses, _) = foreground(run(&mut session, "false | true").unwrap());
	assert_eq!(statuses, vec![StageStatus::Exited(1), StageStatus::Exited(0)]);
	let outcome = run(&mut session, "true | false").unwrap();
	assert_eq!(outcome.code(), 1);
}

#[test]
fn signal_terminations_are_reported() {
	let dir = tempfile::tempdir().unwrap();
	let script = dir.path().join("suicide.sh");
	fs::write(&script, "#!/bin/sh\nkill -TERM $$\n").unwrap();
	fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
	let mut session = session();

	let (statuses, _) = foreground(run(&mut session, path_str(&script)).unwrap());
	assert_eq!(statuses, vec![StageStatus::Signaled(Signal::SIGTERM)]);
	assert_eq!(statuses[0].code(), 143);
}

#[test]
fn foreground_pipelines_leave_no_jobs_behind() {
	let mut session = session();
	run(&mut session, "echo quiet | true").unwrap();
	assert!(session.list_jobs().is_empty());
}

#[test]
fn stopped_stages_are_reaped_later() {
	let dir = tempfile::tempdir().unwrap();
	let script = dir.path().join("stop.sh");
	fs::write(&script, "#!/bin/sh\nkill -STOP $$\n").unwrap();
	fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
	let mut session = session();

	let pid = match run(&mut session, path_str(&script)).unwrap() {
		Outcome::Foreground { statuses, stopped, .. } => {
			assert_eq!(statuses, vec![StageStatus::Stopped(Signal::SIGSTOP)]);
			assert_eq!(stopped.len(), 1);
			stopped[0]
		},
		other => panic!("expected a foreground outcome, got {:?}", other),
	};

	kill(pid, Signal::SIGKILL).unwrap();
	let deadline = Instant::now() + Duration::from_secs(5);
	let code = loop {
		signal::reap();
		if let Some(code) = signal::take_reaped(pid) {
			break code;
		}
		assert!(Instant::now() < deadline, "stopped child {} was never reaped", pid);
		thread::sleep(Duration::from_millis(10));
	};
	assert_eq!(code, 128 + Signal::SIGKILL as i32);
}
