//! Background keepalive loop.
//!
//! Many intermediaries (reverse proxies, load balancers) tear down an HTTP
//! response that stays silent for too long. The keepalive loop defeats that
//! by periodically broadcasting a comment-only frame, which conforming SSE
//! clients ignore.

use crate::encoder;
use crate::registry::Registry;
use log::{debug, info, warn};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 15;

/// Text of the comment frame sent on each tick.
pub const KEEPALIVE_COMMENT: &str = "KEEPALIVE";

/// When the keepalive loop should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveMode {
    /// Always run the loop.
    Always,
    /// Run only when the host reports a reverse-proxy manager in front of
    /// the process (detection is the host's job).
    BehindProxy,
    /// Never run the loop.
    Never,
}

impl KeepaliveMode {
    pub fn should_run(&self, behind_proxy: bool) -> bool {
        match self {
            KeepaliveMode::Always => true,
            KeepaliveMode::BehindProxy => behind_proxy,
            KeepaliveMode::Never => false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct KeepaliveModeParseError;

impl FromStr for KeepaliveMode {
    type Err = KeepaliveModeParseError;
    fn from_str(mode: &str) -> std::result::Result<KeepaliveMode, Self::Err> {
        match mode.to_lowercase().as_str() {
            "always" => Ok(KeepaliveMode::Always),
            "behind-proxy" | "behind_proxy" => Ok(KeepaliveMode::BehindProxy),
            "never" => Ok(KeepaliveMode::Never),
            _ => Err(KeepaliveModeParseError),
        }
    }
}

impl fmt::Display for KeepaliveMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeepaliveMode::Always => write!(f, "always"),
            KeepaliveMode::BehindProxy => write!(f, "behind-proxy"),
            KeepaliveMode::Never => write!(f, "never"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Stopped,
    Running,
    Stopping,
}

struct Inner {
    state: LoopState,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// One background task per registry instance broadcasting a comment frame
/// at a fixed interval whenever at least one connection is attached.
pub struct Keepalive {
    registry: Arc<Registry>,
    interval: Duration,
    inner: Mutex<Inner>,
}

impl Keepalive {
    pub fn new(registry: Arc<Registry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            inner: Mutex::new(Inner {
                state: LoopState::Stopped,
                cancel: CancellationToken::new(),
                handle: None,
            }),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.lock_inner().state == LoopState::Running
    }

    /// Starts the loop. Idempotent: returns false without side effects when
    /// the loop is already running (or still stopping).
    pub fn start(&self) -> bool {
        let mut inner = self.lock_inner();
        if inner.state != LoopState::Stopped {
            debug!("Keepalive loop already running; start is a no-op");
            return false;
        }

        let cancel = CancellationToken::new();
        inner.cancel = cancel.clone();
        inner.handle = Some(tokio::spawn(run_loop(
            self.registry.clone(),
            self.interval,
            cancel,
        )));
        inner.state = LoopState::Running;
        info!("Keepalive loop started (interval: {:?})", self.interval);
        true
    }

    /// Signals the loop to stop and waits for the current tick's in-flight
    /// broadcast, up to `deadline`. On deadline expiry the task is aborted
    /// and shutdown proceeds; this never blocks indefinitely.
    ///
    /// Returns true when the loop wound down within the deadline (or was
    /// already stopped). A call that finds another stop still in progress
    /// returns false: the caller cannot claim a clean stop it did not
    /// observe.
    pub async fn stop(&self, deadline: Duration) -> bool {
        let handle = {
            let mut inner = self.lock_inner();
            match inner.state {
                LoopState::Stopped => return true,
                LoopState::Stopping => {
                    debug!("Keepalive loop is already stopping");
                    return false;
                }
                LoopState::Running => {}
            }
            inner.state = LoopState::Stopping;
            inner.cancel.cancel();
            inner.handle.take()
        };

        let mut clean = true;
        if let Some(mut handle) = handle {
            match tokio::time::timeout(deadline, &mut handle).await {
                Ok(_) => debug!("Keepalive loop stopped"),
                Err(_) => {
                    warn!("Keepalive loop did not stop within {deadline:?}; aborting");
                    handle.abort();
                    clean = false;
                }
            }
        }

        self.lock_inner().state = LoopState::Stopped;
        clean
    }
}

async fn run_loop(registry: Arc<Registry>, interval: Duration, cancel: CancellationToken) {
    // first tick one full interval after start
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if registry.connection_count() == 0 {
            continue;
        }
        match registry
            .broadcast_frame(&encoder::encode_comment(KEEPALIVE_COMMENT), &cancel)
            .await
        {
            Ok(attempted) => debug!("Keepalive sent to {attempted} connection(s)"),
            Err(e) => debug!("Keepalive broadcast aborted: {e}"),
        }
    }
    debug!("Keepalive loop exited");
}
