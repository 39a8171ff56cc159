//! Operating system signal adapter
//!
//! SIGHUP disconnects every call, SIGUSR2 toggles debug mode and SIGUSR1
//! schedules a safe restart.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::services::registry::CallMap;
use crate::Result;

/// Operations reachable through signals
pub trait AdminControl: Send + Sync {
    fn disconnect_all(&self, reason: &str);
    fn toggle_debug(&self) -> bool;
    fn schedule_safe_restart(&self);
}

impl AdminControl for CallMap {
    fn disconnect_all(&self, reason: &str) {
        CallMap::disconnect_all(self, reason)
    }

    fn toggle_debug(&self) -> bool {
        CallMap::toggle_debug(self)
    }

    fn schedule_safe_restart(&self) {
        CallMap::schedule_safe_restart(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Hangup,
    User1,
    User2,
}

pub fn dispatch(target: &dyn AdminControl, sig: ControlSignal) {
    match sig {
        ControlSignal::Hangup => {
            info!("SIGHUP received, disconnecting all calls");
            target.disconnect_all("SIGHUP");
        }
        ControlSignal::User2 => {
            target.toggle_debug();
        }
        ControlSignal::User1 => {
            info!("SIGUSR1 received, scheduling safe restart");
            target.schedule_safe_restart();
        }
    }
}

/// Install the handlers. Fails when a handler cannot be registered.
pub fn spawn_signal_handlers(
    target: Arc<dyn AdminControl>,
    shutdown: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let mut hup = signal(SignalKind::hangup())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;

    Ok(tokio::spawn(async move {
        loop {
            let sig = tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(()) = hup.recv() => ControlSignal::Hangup,
                Some(()) = usr1.recv() => ControlSignal::User1,
                Some(()) = usr2.recv() => ControlSignal::User2,
                else => break,
            };
            dispatch(target.as_ref(), sig);
        }
    }))
}
