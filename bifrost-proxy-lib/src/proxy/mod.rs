#![forbid(unsafe_code)]

//! The proxy event loop.
//!
//! One frame is in flight at a time: wait for a capture socket to become
//! readable (signals are inspected first), receive and decode the frame, run
//! the ingress policy, then walk every other interface in configuration
//! order applying its egress policy and writing the rebuilt frame. Frame
//! ordering per ingress interface is therefore strict, and the shared frame
//! arena is never aliased.
//!
//! Infrastructure errors (receive/send failures, a socket invalidated
//! mid-run) tear the sockets down and bring everything back up after a
//! 10-second back-off; in one-shot mode they end the process instead. Data
//! errors (runt and giant frames) only drop the frame.

pub mod signals;

use std::future::poll_fn;
use std::io;
use std::task::Poll;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use crate::error::{ProxyError, Result};
use crate::iface::socket::RawCapture;
use crate::iface::{self, netdev, Iface};
use crate::packet::buffer::FrameArena;
use crate::packet::{codec, decode, Timestamp};
use crate::process::{self, FrameEndpoints, Phase};
use signals::{SignalEvent, Signals};

/// Back-off before reopening sockets after an infrastructure error.
const RESTART_DELAY: Duration = Duration::from_secs(10);

/// Why the inner loop stopped.
enum LoopExit {
    /// Fatal signal; exit cleanly.
    Shutdown,
    /// Sockets need to be rebuilt. `expected` marks the benign restart that
    /// follows a deliberate MAC change, which must not trip one-shot mode.
    Restart { expected: bool },
}

/// What woke the loop up.
enum Wake {
    Signal(SignalEvent),
    Capture { idx: usize, result: io::Result<RawCapture> },
}

/// The proxy: an interface table plus the restart policy around the loop.
#[derive(Debug)]
pub struct Proxy {
    ifaces: Vec<Iface>,
    oneshot: bool,
}

impl Proxy {
    pub fn new(ifaces: Vec<Iface>, oneshot: bool) -> Self {
        Proxy { ifaces, oneshot }
    }

    pub fn interfaces(&self) -> &[Iface] {
        &self.ifaces
    }

    /// Runs forever, restarting on infrastructure errors, until a fatal
    /// signal (Ok) or an unrecoverable condition (Err).
    pub async fn run(mut self) -> Result<()> {
        let mut signals = Signals::new()?;
        let mut arena: Option<FrameArena> = None;

        loop {
            let total = self.ifaces.len();
            let ready = iface::bring_up_all(&mut self.ifaces);
            if ready != total {
                error!(ready, total, "some interfaces are not ready");
                return Err(ProxyError::InterfacesNotReady { ready, total });
            }
            info!(count = ready, "interfaces are ready");

            // Sized once, after every MTU is known; restarts reuse it.
            let arena =
                arena.get_or_insert_with(|| FrameArena::new(iface::max_mtu(&self.ifaces)));

            info!("starting proxy");
            match event_loop(&mut self.ifaces, arena, &mut signals).await {
                LoopExit::Shutdown => return Ok(()),
                LoopExit::Restart { expected } => {
                    if self.oneshot && !expected {
                        info!("exiting on error, goodbye");
                        return Err(ProxyError::OneShot);
                    }
                    for iface in &mut self.ifaces {
                        iface.socket = None;
                    }
                    info!("restarting proxy in 10 seconds");
                    if !sleep_through_signals(&mut signals, RESTART_DELAY).await {
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn event_loop(
    ifaces: &mut Vec<Iface>,
    arena: &mut FrameArena,
    signals: &mut Signals,
) -> LoopExit {
    // Set when a MAC change deliberately bounced an interface: the next
    // socket error on the table is the bounce surfacing, not a fault.
    let mut expect_down = false;

    loop {
        let wake = tokio::select! {
            biased;
            ev = signals.recv() => Wake::Signal(ev),
            (idx, result) = next_capture(ifaces, arena) => Wake::Capture { idx, result },
        };

        let (idx, result) = match wake {
            Wake::Signal(SignalEvent::Hangup) => {
                info!("received SIGHUP");
                continue;
            }
            Wake::Signal(SignalEvent::User1) => {
                info!("received SIGUSR1");
                continue;
            }
            Wake::Signal(SignalEvent::Shutdown(name)) => {
                warn!("exiting on {name}");
                return LoopExit::Shutdown;
            }
            Wake::Capture { idx, result } => (idx, result),
        };

        let raw = match result {
            Ok(raw) => raw,
            Err(e) if expect_down => {
                debug!(iface = %ifaces[idx].name, error = %e, "socket invalidated by MAC change");
                info!("restarting after MAC change");
                return LoopExit::Restart { expected: true };
            }
            Err(e) => {
                error!(iface = %ifaces[idx].name, error = %e, "cannot receive");
                return LoopExit::Restart { expected: false };
            }
        };

        let ts = rx_timestamp(&ifaces[idx]);
        let packet = match codec::assemble(raw, arena, idx, ts) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(iface = %ifaces[idx].name, "dropping {e}");
                continue;
            }
        };

        ifaces[idx].recv_ctr = ifaces[idx].recv_ctr.wrapping_add(1);
        decode::log_frame(&packet, &ifaces[idx].name);
        decode::dump_frame(arena.frame(&packet, true));

        // The first frame on an interface may carry the station address some
        // peer is waiting to impersonate. One attempt per peer, ever.
        if ifaces[idx].recv_ctr == 1 {
            for peer in 0..ifaces.len() {
                if peer == idx || !wants_mac_from(&ifaces[peer], idx) {
                    continue;
                }
                if let Some(policy) = ifaces[peer].ingress.as_mut() {
                    policy.set_mac_from = None;
                }
                match netdev::set_mac(&ifaces[peer].name, packet.source) {
                    Err(e) => {
                        warn!(iface = %ifaces[peer].name, error = %e, "cannot set MAC, won't try again");
                    }
                    Ok(()) => {
                        expect_down = true;
                        info!(iface = %ifaces[peer].name, "set MAC, restarting");
                    }
                }
            }
        }

        if let Some(actions) = ifaces[idx].ingress.as_ref().and_then(|p| p.actions.as_ref()) {
            let endpoints = FrameEndpoints {
                orig_name: &ifaces[idx].name,
                orig_mtu: ifaces[idx].mtu,
                name: &ifaces[idx].name,
                mtu: ifaces[idx].mtu,
            };
            process::run_action(&packet, actions, Phase::Ingress, arena, endpoints);
        }

        if let Some(mask) = ifaces[idx].ingress_filter() {
            if process::should_drop(&packet, mask, &ifaces[idx].name, None) {
                continue;
            }
        }

        // Fan out in configuration order.
        for peer in 0..ifaces.len() {
            if peer == idx {
                continue;
            }

            if let Some(mask) = ifaces[peer].egress_filter() {
                if process::should_drop(&packet, mask, &ifaces[peer].name, Some(&ifaces[idx].name))
                {
                    continue;
                }
            }

            let mut out = packet;
            codec::retarget(&mut out, peer, ifaces[peer].egress.as_ref().and_then(|p| p.vlan));

            // The VLAN edit runs first so the script's PKT variable matches
            // the bytes that hit the wire.
            if let Some(actions) = ifaces[peer].egress.as_ref().and_then(|p| p.actions.as_ref()) {
                let endpoints = FrameEndpoints {
                    orig_name: &ifaces[idx].name,
                    orig_mtu: ifaces[idx].mtu,
                    name: &ifaces[peer].name,
                    mtu: ifaces[peer].mtu,
                };
                process::run_action(&out, actions, Phase::Egress, arena, endpoints);
            }

            let sent = {
                let Some(socket) = ifaces[peer].socket.as_ref() else {
                    continue;
                };
                let frame = arena.frame(&out, false);
                match socket.send(frame).await {
                    Ok(n) if n == out.len => {
                        decode::log_frame(&out, &ifaces[peer].name);
                        decode::dump_frame(frame);
                        true
                    }
                    Ok(n) => {
                        error!(
                            iface = %ifaces[peer].name,
                            sent = n,
                            expected = out.len,
                            "short send; did this enter on a higher-MTU interface?"
                        );
                        return LoopExit::Restart { expected: false };
                    }
                    Err(e) => {
                        error!(iface = %ifaces[peer].name, error = %e, "cannot send");
                        return LoopExit::Restart { expected: false };
                    }
                }
            };
            if sent {
                ifaces[peer].send_ctr = ifaces[peer].send_ctr.wrapping_add(1);
            }
        }
    }
}

fn wants_mac_from(iface: &Iface, source_idx: usize) -> bool {
    iface.ingress.as_ref().and_then(|p| p.set_mac_from) == Some(source_idx)
}

/// Resolves in configuration order: the first interface with a frame queued
/// wins this wake-up; relative order across interfaces is the kernel's.
async fn next_capture(
    ifaces: &[Iface],
    arena: &mut FrameArena,
) -> (usize, io::Result<RawCapture>) {
    poll_fn(|cx| {
        for (idx, iface) in ifaces.iter().enumerate() {
            let Some(socket) = iface.socket.as_ref() else {
                continue;
            };
            match socket.poll_recv(cx, arena) {
                Poll::Pending => continue,
                Poll::Ready(result) => return Poll::Ready((idx, result)),
            }
        }
        Poll::Pending
    })
    .await
}

fn rx_timestamp(iface: &Iface) -> Timestamp {
    if let Some(socket) = iface.socket.as_ref() {
        match socket.rx_timestamp() {
            Ok(ts) => return ts,
            Err(e) => {
                warn!(iface = %iface.name, error = %e, "cannot read packet timestamp, using wall clock");
            }
        }
    }
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    Timestamp { sec: now.as_secs() as i64, usec: i64::from(now.subsec_micros()) }
}

/// Sleeps out the restart delay while still honoring signals. Returns false
/// when a fatal signal arrived and the caller should exit.
async fn sleep_through_signals(signals: &mut Signals, delay: Duration) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            ev = signals.recv() => match ev {
                SignalEvent::Hangup => info!("received SIGHUP"),
                SignalEvent::User1 => info!("received SIGUSR1"),
                SignalEvent::Shutdown(name) => {
                    warn!("exiting on {name}");
                    return false;
                }
            },
        }
    }
}
