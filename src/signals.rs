//! Process-wide interrupt flag, written from signal context and polled by
//! the control loop once per iteration.
//!
//! Handlers only perform single atomic stores: no allocation, no locks,
//! no I/O. The status report is therefore emitted by the loop itself at
//! its next iteration boundary.

use std::{
    io, mem, ptr,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
};

use libc::c_int;

use crate::error::SignalError;

/// Interrupt requests, ordered so the more severe one wins when several
/// arrive before the loop gets to look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Interrupt {
    ReportStatus = 1,
    Reload = 2,
    Terminate = 3,
    Fault = 4,
}

impl Interrupt {
    pub fn from_signum(signum: c_int) -> Option<Interrupt> {
        match signum {
            libc::SIGINT | libc::SIGTERM => Some(Interrupt::Terminate),
            libc::SIGHUP => Some(Interrupt::Reload),
            libc::SIGUSR1 => Some(Interrupt::ReportStatus),
            libc::SIGSEGV => Some(Interrupt::Fault),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Option<Interrupt> {
        match value {
            1 => Some(Interrupt::ReportStatus),
            2 => Some(Interrupt::Reload),
            3 => Some(Interrupt::Terminate),
            4 => Some(Interrupt::Fault),
            _ => None,
        }
    }
}

static INTERRUPTED: AtomicU8 = AtomicU8::new(0);
static REPORT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Records an interrupt. Safe to call from a signal handler.
pub fn raise(interrupt: Interrupt) {
    match interrupt {
        Interrupt::ReportStatus => REPORT_REQUESTED.store(true, Ordering::SeqCst),
        _ => {
            INTERRUPTED.fetch_max(interrupt as u8, Ordering::SeqCst);
        }
    }
}

/// The pending loop-ending interrupt, if any.
pub fn pending() -> Option<Interrupt> {
    Interrupt::from_u8(INTERRUPTED.load(Ordering::SeqCst))
}

/// Returns and clears the pending interrupt.
pub fn take() -> Option<Interrupt> {
    Interrupt::from_u8(INTERRUPTED.swap(0, Ordering::SeqCst))
}

pub fn take_report_request() -> bool {
    REPORT_REQUESTED.swap(false, Ordering::SeqCst)
}

extern "C" fn handle_signal(signum: c_int) {
    if let Some(interrupt) = Interrupt::from_signum(signum) {
        raise(interrupt);
    }
}

fn install_sigaction(signal: c_int) -> Result<(), SignalError> {
    // SAFETY: the handler only touches atomics; the struct is fully
    // initialised before being passed to the kernel.
    let rc = unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handle_signal as extern "C" fn(c_int) as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signal, &action, ptr::null_mut())
    };
    if rc != 0 {
        return Err(SignalError::Sigaction {
            signal,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Installs handlers for SIGINT, SIGTERM, SIGHUP and SIGUSR1.
///
/// SIGSEGV is deliberately left alone: there is no way to recover from it
/// inside the process, panics are reported through the panic hook instead.
pub fn install() -> Result<(), SignalError> {
    ctrlc::set_handler(|| raise(Interrupt::Terminate))?;
    for signal in [libc::SIGTERM, libc::SIGHUP, libc::SIGUSR1] {
        install_sigaction(signal)?;
    }
    Ok(())
}
