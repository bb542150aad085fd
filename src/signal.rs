//! Signal handling and terminal ownership.
//!
//! Handlers only touch the atomics below. Anything the user should see is
//! picked up later by the main loop through [`take_reaped`] and
//! [`take_interrupted`].

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use libc::c_int;
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::termios::{self, SetArg, Termios};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};
use tracing::{debug, info};

use crate::error::StartupError;
use crate::job::{WaitStatusExt, UNKNOWN_STATUS};

/// Number of background processes that can be tracked at once.
pub const WATCH_SLOTS: usize = 256;

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY: AtomicI32 = AtomicI32::new(0);

// A positive entry is a pid waiting to be reaped, a negative one is a pid
// some reap cycle is currently collecting.
static WATCHED: [AtomicI32; WATCH_SLOTS] = [EMPTY; WATCH_SLOTS];
// Slot i holds the outcome for the pid that was in WATCHED[i].
static REAPED_PID: [AtomicI32; WATCH_SLOTS] = [EMPTY; WATCH_SLOTS];
static REAPED_CODE: [AtomicI32; WATCH_SLOTS] = [EMPTY; WATCH_SLOTS];

static FOREGROUND: AtomicI32 = AtomicI32::new(0);
static INTERRUPTED: AtomicI32 = AtomicI32::new(0);
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Signals the shell ignores so that only its children react to them.
const IGNORED: [Signal; 4] = [Signal::SIGQUIT, Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU];

/// Signals whose disposition a child gets back before `execve`.
pub const RESET_IN_CHILD: [Signal; 6] = [
	Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU, Signal::SIGCHLD,
];

fn record(slot: usize, pid: i32, code: i32) {
	REAPED_CODE[slot].store(code, Ordering::SeqCst);
	REAPED_PID[slot].store(pid, Ordering::SeqCst);
	WATCHED[slot].store(0, Ordering::SeqCst);
}

/// One reap cycle: collects every watched child that has terminated without
/// blocking. Async-signal-safe; also called from the main loop.
pub fn reap() -> usize {
	let mut reaped = 0;
	for (slot, watched) in WATCHED.iter().enumerate() {
		let pid = watched.load(Ordering::SeqCst);
		if pid <= 0 {
			continue;
		}
		if watched.compare_exchange(pid, -pid, Ordering::SeqCst, Ordering::SeqCst).is_err() {
			continue;
		}
		match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
			Ok(status @ WaitStatus::Exited(..)) | Ok(status @ WaitStatus::Signaled(..)) => {
				record(slot, pid, status.code().unwrap_or(UNKNOWN_STATUS));
				reaped += 1;
			},
			Err(Errno::ECHILD) => {
				record(slot, pid, UNKNOWN_STATUS);
				reaped += 1;
			},
			_ => watched.store(pid, Ordering::SeqCst),
		}
	}
	reaped
}

/// Number of processes that can still be handed to [`watch`].
pub fn free_slots() -> usize {
	(0 .. WATCH_SLOTS).filter(|&i| {
		WATCHED[i].load(Ordering::SeqCst) == 0 && REAPED_PID[i].load(Ordering::SeqCst) == 0
	}).count()
}

/// Registers a child for reaping by the reap cycle. Returns false when every
/// slot is taken.
pub fn watch(pid: Pid) -> bool {
	for i in 0 .. WATCH_SLOTS {
		if REAPED_PID[i].load(Ordering::SeqCst) != 0 {
			continue;
		}
		if WATCHED[i].compare_exchange(0, pid.as_raw(), Ordering::SeqCst, Ordering::SeqCst).is_ok() {
			return true;
		}
	}
	false
}

/// Takes the recorded exit code of a reaped child, if the reap cycle has
/// collected it.
pub fn take_reaped(pid: Pid) -> Option<i32> {
	let raw = pid.as_raw();
	for i in 0 .. WATCH_SLOTS {
		if REAPED_PID[i].load(Ordering::SeqCst) != raw {
			continue;
		}
		let code = REAPED_CODE[i].load(Ordering::SeqCst);
		if REAPED_PID[i].compare_exchange(raw, 0, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
			return Some(code);
		}
	}
	None
}

/// Marks `pgid` as the group interrupt requests are forwarded to.
pub fn set_foreground(pgid: Pid) {
	FOREGROUND.store(pgid.as_raw(), Ordering::SeqCst);
}

pub fn clear_foreground(pgid: Pid) {
	let _ = FOREGROUND.compare_exchange(pgid.as_raw(), 0, Ordering::SeqCst, Ordering::SeqCst);
}

pub fn foreground() -> Option<Pid> {
	match FOREGROUND.load(Ordering::SeqCst) {
		0 => None,
		pgid => Some(Pid::from_raw(pgid)),
	}
}

/// The foreground group the interrupt handler terminated since the last call.
pub fn take_interrupted() -> Option<Pid> {
	match INTERRUPTED.swap(0, Ordering::SeqCst) {
		0 => None,
		pgid => Some(Pid::from_raw(pgid)),
	}
}

extern "C" fn on_sigchld(_: c_int) {
	let saved = Errno::last_raw();
	reap();
	Errno::set_raw(saved);
}

extern "C" fn on_sigint(_: c_int) {
	let saved = Errno::last_raw();
	let pgid = FOREGROUND.swap(0, Ordering::SeqCst);
	if pgid > 0 && signal::killpg(Pid::from_raw(pgid), Signal::SIGTERM).is_ok() {
		INTERRUPTED.store(pgid, Ordering::SeqCst);
	}
	Errno::set_raw(saved);
}

/// Proof that the shell's handlers are in place. Handlers are process-wide,
/// so installing twice is a no-op.
#[derive(Debug, Clone, Copy)]
pub struct SignalRouter {
	_installed: (),
}

impl SignalRouter {
	pub fn install() -> Result<SignalRouter, StartupError> {
		if INSTALLED.swap(true, Ordering::SeqCst) {
			return Ok(SignalRouter { _installed: () });
		}
		let chld = SigAction::new(SigHandler::Handler(on_sigchld), SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP, SigSet::empty());
		let int = SigAction::new(SigHandler::Handler(on_sigint), SaFlags::SA_RESTART, SigSet::empty());
		let ign = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
		let r = unsafe {
			signal::sigaction(Signal::SIGCHLD, &chld)
				.and_then(|_| signal::sigaction(Signal::SIGINT, &int))
				.and_then(|_| IGNORED.iter().try_for_each(|&sig| signal::sigaction(sig, &ign).map(|_| ())))
		};
		if let Err(e) = r {
			INSTALLED.store(false, Ordering::SeqCst);
			return Err(StartupError::Signals(e));
		}
		debug!("signal handlers installed");
		Ok(SignalRouter { _installed: () })
	}
}

/// The controlling terminal as the shell found it at startup.
pub struct Terminal {
	pub pgid: Pid,
	modes: Termios,
}

impl Terminal {
	/// Waits until the shell is in the foreground, makes it a process group
	/// leader and takes the terminal.
	pub fn seize() -> Result<Terminal, StartupError> {
		let stdin = io::stdin();
		let shell_pid = unistd::getpid();
		loop {
			let fg = unistd::tcgetpgrp(&stdin).map_err(StartupError::Terminal)?;
			let own = unistd::getpgrp();
			if fg == own {
				break;
			}
			debug!(%fg, %own, "not in the foreground yet, stopping until we are");
			signal::killpg(own, Signal::SIGTTIN).map_err(StartupError::Terminal)?;
		}

		// tcsetpgrp from a group that just left the foreground raises SIGTTOU.
		let ign = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
		unsafe { signal::sigaction(Signal::SIGTTOU, &ign) }.map_err(StartupError::Signals)?;

		// A session leader cannot change its group but already leads one.
		let _ = unistd::setpgid(shell_pid, shell_pid);
		let pgid = unistd::getpgrp();
		if pgid != shell_pid {
			return Err(StartupError::NotGroupLeader { pid: shell_pid, pgid });
		}
		unistd::tcsetpgrp(&stdin, pgid).map_err(StartupError::Terminal)?;
		let modes = termios::tcgetattr(&stdin).map_err(StartupError::Terminal)?;
		info!(%pgid, "took control of the terminal");
		Ok(Terminal { pgid, modes })
	}

	/// Gives the terminal to a foreground pipeline.
	pub fn hand_to(&self, pgid: Pid) -> nix::Result<()> {
		unistd::tcsetpgrp(io::stdin(), pgid)
	}

	/// Takes the terminal back and restores the modes saved at startup.
	pub fn reclaim(&self) -> nix::Result<()> {
		let stdin = io::stdin();
		unistd::tcsetpgrp(&stdin, self.pgid)?;
		termios::tcsetattr(&stdin, SetArg::TCSADRAIN, &self.modes)
	}

	pub fn restore(&self) -> nix::Result<()> {
		termios::tcsetattr(io::stdin(), SetArg::TCSADRAIN, &self.modes)
	}
}
