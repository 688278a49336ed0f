//! Long-lived watcher on the runtime's event feed.
//!
//! The watcher connects, forwards every decoded event onto the delivery
//! queue, and reconnects whenever the stream ends or breaks.  It stops for
//! good when it cannot connect, when the queue's consumer goes away, or when
//! a termination signal arrives.  Returning drops the stream and the queue
//! sender, which closes both.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::runtime::ContainerRuntime;
use crate::types::LifecycleEvent;

/// Capacity of the delivery queue.  A full queue blocks the watcher until
/// the consumer catches up or a termination signal arrives.
pub const QUEUE_CAPACITY: usize = 100;

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchExit {
    /// A termination signal arrived; carries the signal's name.
    Signal(&'static str),
    /// The runtime's event endpoint could not be reached.
    ConnectFailed,
    /// The consumer dropped the receiving end of the queue.
    QueueClosed,
}

pub struct EventWatcher<R: ?Sized> {
    runtime: Arc<R>,
    reconnect_delay: Duration,
}

impl<R: ContainerRuntime + ?Sized> EventWatcher<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self {
            runtime,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    #[cfg(test)]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub async fn run<S>(self, tx: mpsc::Sender<LifecycleEvent>, shutdown: S) -> WatchExit
    where
        S: Future<Output = &'static str>,
    {
        tokio::pin!(shutdown);

        loop {
            let mut stream = tokio::select! {
                name = &mut shutdown => return terminated(name),
                opened = self.runtime.open_events() => match opened {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("cannot connect to container runtime events: {}", e);
                        return WatchExit::ConnectFailed;
                    }
                },
            };
            info!("Listening for container events...");

            loop {
                let next = tokio::select! {
                    name = &mut shutdown => return terminated(name),
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(event)) => {
                        debug!("Queueing event {} for {}", event.status, event.container_id);
                        let sent = tokio::select! {
                            name = &mut shutdown => return terminated(name),
                            sent = tx.send(event) => sent,
                        };
                        if sent.is_err() {
                            warn!("event queue closed, stopping watcher");
                            return WatchExit::QueueClosed;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("cannot decode event stream: {}. Reconnecting...", e);
                        break;
                    }
                    None => {
                        info!("Event stream ended. Reconnecting...");
                        break;
                    }
                }
            }
            drop(stream);

            if !self.reconnect_delay.is_zero() {
                tokio::select! {
                    name = &mut shutdown => return terminated(name),
                    _ = sleep(self.reconnect_delay) => {}
                }
            }
        }
    }
}

fn terminated(name: &'static str) -> WatchExit {
    debug!("Closing event stream and queue on {}", name);
    WatchExit::Signal(name)
}

/// Handlers for interrupt, terminate and quit.
pub struct TerminationSignals {
    interrupt: Signal,
    terminate: Signal,
    quit: Signal,
}

impl TerminationSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    /// Resolves with the name of the first signal received.
    pub async fn recv(mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "interrupt",
            _ = self.terminate.recv() => "terminate",
            _ = self.quit.recv() => "quit",
        }
    }
}
