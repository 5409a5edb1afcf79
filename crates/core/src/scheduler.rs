//! Background refresh scheduler
//!
//! A supervised thread calls [`Engine::refresh_now`] immediately and then
//! once per interval until cancelled. Each pass runs under `catch_unwind`,
//! so a panicking pass is reported on the event channel and the loop carries
//! on. Events go to a bounded channel; when it is full or the receiver is
//! gone, new events are dropped.

use crate::engine::{Engine, RefreshReport};
use crate::error::EngineError;
use std::any::Any;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Undrained events kept before new ones are dropped
pub const EVENT_BACKLOG: usize = 16;

/// Cancellation signal shared between a worker and its owner
#[derive(Clone, Debug, Default)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deref for Context {
    type Target = ContextInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Default)]
pub struct ContextInner {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

impl ContextInner {
    pub fn cancel(&self) {
        let mut g = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        *g = true;
        self.cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until `duration` elapses or the context is cancelled.
    /// Returns true if cancelled.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let g = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        let (g, _) = self
            .cv
            .wait_timeout_while(g, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *g
    }
}

/// One scheduler pass
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshEvent {
    Completed(RefreshReport),
    /// The pass panicked; carries the panic message
    Panicked(String),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run one refresh pass, converting a panic into an event.
pub fn run_pass<F>(pass: F) -> RefreshEvent
where
    F: FnOnce() -> RefreshReport,
{
    match panic::catch_unwind(AssertUnwindSafe(pass)) {
        Ok(report) => RefreshEvent::Completed(report),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "refresh pass panicked; scheduler continues");
            RefreshEvent::Panicked(message)
        }
    }
}

fn run_loop<F>(ctx: &Context, interval: Duration, events: &SyncSender<RefreshEvent>, mut pass: F)
where
    F: FnMut() -> RefreshReport,
{
    let mut ticks = 0u64;
    loop {
        ticks += 1;
        let event = run_pass(&mut pass);
        debug!(tick = ticks, ?event, "refresh pass finished");
        match events.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => debug!(tick = ticks, "event backlog full; dropping event"),
        }
        if ctx.wait_timeout(interval) {
            break;
        }
    }
    info!(ticks, "refresh scheduler stopped");
}

pub struct RefreshScheduler {
    ctx: Context,
    handle: Option<JoinHandle<()>>,
    events: Receiver<RefreshEvent>,
}

impl RefreshScheduler {
    /// Start refreshing `engine` every `interval`.
    pub fn spawn(engine: Arc<Engine>, interval: Duration) -> Result<Self, EngineError> {
        Self::spawn_with(interval, move || engine.refresh_now())
    }

    /// Start the loop around an arbitrary pass.
    pub fn spawn_with<F>(interval: Duration, pass: F) -> Result<Self, EngineError>
    where
        F: FnMut() -> RefreshReport + Send + 'static,
    {
        let ctx = Context::new();
        let (tx, rx) = mpsc::sync_channel(EVENT_BACKLOG);
        let worker_ctx = ctx.clone();
        let handle = thread::Builder::new()
            .name("airtwin-refresh".into())
            .spawn(move || run_loop(&worker_ctx, interval, &tx, pass))
            .map_err(|e| EngineError::Config(format!("cannot start refresh thread: {e}")))?;
        info!(interval_secs = interval.as_secs(), "refresh scheduler started");
        Ok(Self {
            ctx,
            handle: Some(handle),
            events: rx,
        })
    }

    pub fn events(&self) -> &Receiver<RefreshEvent> {
        &self.events
    }

    /// Cancellation handle, e.g. for a signal handler
    pub fn context(&self) -> Context {
        self.ctx.clone()
    }

    /// Cancel and wait for the worker to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.ctx.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("refresh thread exited abnormally");
            }
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
