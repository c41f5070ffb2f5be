#![forbid(unsafe_code)]

//! Signal surface of the proxy.
//!
//! `SIGHUP` and `SIGUSR1` are advisory and only logged. The first `SIGINT`
//! or `SIGTERM` requests an orderly exit at the next inspection point; a
//! second fatal signal before the process has finished winding down aborts
//! outright, so a wedged script or a stuck restart can always be killed from
//! the keyboard.
//!
//! Delivery is via the runtime's signal streams: the loop polls [`Signals::recv`]
//! ahead of socket readiness, which is where the original design's
//! "blocked outside the wait, counted in handlers, inspected at well-defined
//! points" contract lives in an async world.

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};

/// A signal observed at an inspection point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Advisory; log and keep going.
    Hangup,
    /// Advisory; log and keep going.
    User1,
    /// Orderly-exit request, carrying the signal's name for the log.
    Shutdown(&'static str),
}

#[derive(Debug)]
pub struct Signals {
    hangup: Signal,
    interrupt: Signal,
    user1: Signal,
    terminate: Signal,
    shutdown_pending: bool,
}

impl Signals {
    /// Installs the four watchers. Must run inside the runtime.
    pub fn new() -> io::Result<Self> {
        Ok(Signals {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            user1: signal(SignalKind::user_defined1())?,
            terminate: signal(SignalKind::terminate())?,
            shutdown_pending: false,
        })
    }

    /// Waits for the next signal. Never resolves if all streams close.
    pub async fn recv(&mut self) -> SignalEvent {
        let event = tokio::select! {
            Some(()) = self.hangup.recv() => SignalEvent::Hangup,
            Some(()) = self.user1.recv() => SignalEvent::User1,
            Some(()) = self.interrupt.recv() => SignalEvent::Shutdown("SIGINT"),
            Some(()) = self.terminate.recv() => SignalEvent::Shutdown("SIGTERM"),
            else => std::future::pending().await,
        };

        if let SignalEvent::Shutdown(_) = event {
            if self.shutdown_pending {
                // Second fatal signal before the first finished the exit path.
                std::process::abort();
            }
            self.shutdown_pending = true;
        }
        event
    }
}
