//! Background worker: a single thread owning the sync engine, ticking once a
//! second and polling every `poll_ticks` ticks. Commands reach it through a
//! request queue and run between ticks, never during a poll.

use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::dispatch::Command;
use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::registry::Host;

pub const TICK: Duration = Duration::from_secs(1);
const HEARTBEAT_TICKS: u64 = 12;
/// The first poll fires this many ticks after start.
const FIRST_POLL_TICKS: u64 = 5;

enum Request {
    Command(Command, mpsc::Sender<Result<(), SyncError>>),
    PushToken(String),
    Shutdown,
}

pub struct WorkerHandle {
    requests: mpsc::Sender<Request>,
    heartbeat: Arc<AtomicI64>,
    thread: Option<thread::JoinHandle<()>>,
}

fn stopped() -> SyncError {
    SyncError::NotReady("sync worker is not running".to_string())
}

impl WorkerHandle {
    /// Queue a command and wait for its outcome.
    pub fn submit(&self, command: Command) -> Result<(), SyncError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.requests
            .send(Request::Command(command, reply_tx))
            .map_err(|_| stopped())?;
        reply_rx.recv().map_err(|_| stopped())?
    }

    pub fn push_token(&self, token: String) -> Result<(), SyncError> {
        self.requests.send(Request::PushToken(token)).map_err(|_| stopped())
    }

    /// Refreshed every few ticks while the loop is alive.
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.heartbeat.load(Ordering::Relaxed))
    }

    /// Block until the worker exits on its own.
    pub fn join(mut self) {
        if let Some(t) = self.thread.take()
            && t.join().is_err()
        {
            warn!("Worker thread panicked");
        }
    }

    /// Stop before the next cycle and wait for the one in flight.
    pub fn shutdown(mut self) {
        let _ = self.requests.send(Request::Shutdown);
        if let Some(t) = self.thread.take()
            && t.join().is_err()
        {
            warn!("Worker thread panicked");
        }
    }
}

pub fn spawn<H>(engine: SyncEngine<H>, poll_ticks: u64, tick: Duration) -> std::io::Result<WorkerHandle>
where
    H: Host + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let heartbeat = Arc::new(AtomicI64::new(Utc::now().timestamp_millis()));
    let beat = Arc::clone(&heartbeat);
    let thread = thread::Builder::new()
        .name("nest-sync".to_string())
        .spawn(move || run(engine, rx, poll_ticks.max(1), tick, &beat))?;
    Ok(WorkerHandle {
        requests: tx,
        heartbeat,
        thread: Some(thread),
    })
}

fn run<H: Host>(
    mut engine: SyncEngine<H>,
    requests: mpsc::Receiver<Request>,
    poll_ticks: u64,
    tick: Duration,
    heartbeat: &AtomicI64,
) {
    info!("Worker started (poll every {} tick(s) of {:?})", poll_ticks, tick);
    let mut ticks = poll_ticks.saturating_sub(FIRST_POLL_TICKS);
    let mut next_tick = Instant::now() + tick;

    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match requests.recv_timeout(wait) {
            Ok(Request::Command(command, reply)) => {
                let result = engine.execute(command);
                if let Err(e) = &result {
                    warn!("Command {:?} failed: {}", command, e);
                }
                let _ = reply.send(result);
            }
            Ok(Request::PushToken(token)) => engine.push_token(token),
            Ok(Request::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                ticks += 1;
                next_tick += tick;
                if ticks % HEARTBEAT_TICKS == 0 {
                    heartbeat.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                }
                if ticks % poll_ticks == 0
                    && let Err(e) = engine.poll()
                {
                    warn!("Poll failed: {}", e);
                }
                // no burst of catch-up ticks after a slow poll
                let now = Instant::now();
                if next_tick < now {
                    next_tick = now + tick;
                }
            }
        }
    }
    info!("Worker stopped");
}
