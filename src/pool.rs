// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection pool for client sessions.

use std::{
    collections::VecDeque,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use tokio::{sync::Notify, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::{Client, ClientOptions, ConnectionState},
    error::{Error, Result},
    metrics::PoolMetrics,
};

/// Configuration of a [`Pool`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub(crate) size: usize,
    pub(crate) max_idle_time: Duration,
    pub(crate) health_check_freq: Duration,
    pub(crate) client_options: ClientOptions,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            size: 5,
            max_idle_time: Duration::from_secs(300),
            health_check_freq: Duration::from_secs(60),
            client_options: ClientOptions::default(),
        }
    }
}

impl PoolOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the upper bound on managed clients. Values below 1 are
    /// normalized to 1. Default: 5.
    #[must_use]
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Sets the maximum idle age; older sessions are discarded on
    /// acquire or by the health checker. Zero disables the check.
    /// Default: 5 min.
    #[must_use]
    pub fn max_idle_time(mut self, max_idle_time: Duration) -> Self {
        self.max_idle_time = max_idle_time;
        self
    }

    /// Sets the period of background health sweeps. Zero disables the
    /// checker. Default: 1 min.
    #[must_use]
    pub fn health_check_freq(mut self, health_check_freq: Duration) -> Self {
        self.health_check_freq = health_check_freq;
        self
    }

    /// Sets the options applied to each client the pool creates.
    #[must_use]
    pub fn client_options(mut self, client_options: ClientOptions) -> Self {
        self.client_options = client_options;
        self
    }
}

struct IdleClient {
    client: Arc<Client>,
    last_used: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleClient>,
    created: usize,
}

struct PoolShared {
    addr: String,
    opts: PoolOptions,
    state: Mutex<PoolState>,
    notify: Notify,
    closed: AtomicBool,
    cancel: CancellationToken,
    metrics: PoolMetrics,
}

/// A snapshot of the pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub created: usize,
    pub available: usize,
    pub gets: u64,
    pub puts: u64,
    pub hits: u64,
    pub misses: u64,
    pub timeouts: u64,
}

/// A bounded pool of live client sessions.
///
/// Sessions are loaned exclusively to one caller at a time and reused
/// across calls. At most `size` sessions exist at any moment; callers
/// beyond that bound wait until a session is returned.
pub struct Pool {
    shared: Arc<PoolShared>,
    health_checker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("addr", &self.shared.addr)
            .field("opts", &self.shared.opts)
            .finish_non_exhaustive()
    }
}

impl Pool {
    /// Creates a new pool for the given server address.
    ///
    /// Clients are created lazily on demand. Must be called from within
    /// a tokio runtime when the health checker is enabled.
    pub fn new(addr: impl Into<String>, options: PoolOptions) -> Result<Self> {
        let addr = addr.into();
        if addr.is_empty() {
            return Err(Error::Config("pool address cannot be empty".into()));
        }
        let mut options = options;
        if options.size < 1 {
            options.size = 1;
        }

        let health_check_freq = options.health_check_freq;
        let shared = Arc::new(PoolShared {
            addr,
            opts: options,
            state: Mutex::new(PoolState::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            metrics: PoolMetrics::default(),
        });

        let health_checker = if health_check_freq.is_zero() {
            None
        } else {
            Some(tokio::spawn(run_health_checker(
                Arc::clone(&shared),
                health_check_freq,
            )))
        };

        Ok(Self {
            shared,
            health_checker: Mutex::new(health_checker),
        })
    }

    /// Acquires a session, waiting without bound for one to become
    /// available.
    pub async fn get(&self) -> Result<PooledClient> {
        self.acquire(None).await
    }

    /// Acquires a session, failing with [`Error::Timeout`] if none
    /// becomes available within the deadline.
    pub async fn get_timeout(&self, deadline: Duration) -> Result<PooledClient> {
        self.acquire(Some(deadline)).await
    }

    async fn acquire(&self, deadline: Option<Duration>) -> Result<PooledClient> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }
        shared.metrics.gets.inc();

        let acquire = shared.acquire_client();
        let client = match deadline {
            None => {
                tokio::select! {
                    () = shared.cancel.cancelled() => Err(Error::PoolClosed),
                    res = acquire => res,
                }
            }
            Some(deadline) => {
                tokio::select! {
                    () = shared.cancel.cancelled() => Err(Error::PoolClosed),
                    res = timeout(deadline, acquire) => match res {
                        Ok(res) => res,
                        Err(_) => {
                            shared.metrics.timeouts.inc();
                            Err(Error::Timeout)
                        }
                    },
                }
            }
        }?;

        Ok(PooledClient {
            shared: Arc::clone(shared),
            client,
            returned: AtomicBool::new(false),
        })
    }

    /// Returns a snapshot of the pool state.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let (created, available) = {
            let state = self.shared.state.lock().expect("pool lock");
            (state.created, state.idle.len())
        };
        let metrics = &self.shared.metrics;
        PoolStats {
            size: self.shared.opts.size,
            created,
            available,
            gets: metrics.gets.value(),
            puts: metrics.puts.value(),
            hits: metrics.hits.value(),
            misses: metrics.misses.value(),
            timeouts: metrics.timeouts.value(),
        }
    }

    /// Returns the embedded metrics.
    #[must_use]
    pub fn metrics(&self) -> &PoolMetrics {
        &self.shared.metrics
    }

    /// Closes the pool and every idle session.
    ///
    /// Terminal and idempotent: subsequent acquires fail with
    /// [`Error::PoolClosed`]. Waits for the health checker to finish.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.cancel.cancel();
        self.shared.notify.notify_waiters();

        let drained: Vec<IdleClient> = {
            let mut state = self.shared.state.lock().expect("pool lock");
            state.created -= state.idle.len();
            state.idle.drain(..).collect()
        };
        for entry in drained {
            self.shared.metrics.available.add(-1);
            self.shared.metrics.closed.inc();
            entry.client.close().await;
        }

        let checker = self.health_checker.lock().expect("health checker lock").take();
        if let Some(checker) = checker {
            let _ = checker.await;
        }
        debug!(addr = %self.shared.addr, "pool closed");
    }
}

impl PoolShared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Pops an idle entry, keeping its slot in `created` reserved for
    /// the caller.
    fn pop_idle(&self) -> Option<IdleClient> {
        let entry = self.state.lock().expect("pool lock").idle.pop_front();
        if entry.is_some() {
            self.metrics.available.add(-1);
        }
        entry
    }

    /// Tries to reserve a slot for a new client.
    fn try_reserve(&self) -> bool {
        let mut state = self.state.lock().expect("pool lock");
        if state.created < self.opts.size {
            state.created += 1;
            true
        } else {
            false
        }
    }

    /// Releases a reserved or occupied slot.
    fn release_slot(&self) {
        let mut state = self.state.lock().expect("pool lock");
        debug_assert!(state.created > 0);
        state.created = state.created.saturating_sub(1);
        drop(state);
        self.notify.notify_one();
    }

    /// Validates a popped idle entry.
    ///
    /// A stale or disconnected session is disposed of while its slot
    /// stays reserved so the caller can create a replacement.
    fn check_entry(&self, entry: IdleClient) -> Option<Arc<Client>> {
        let connected = entry.client.state() == ConnectionState::Connected;
        let fresh = self.opts.max_idle_time.is_zero()
            || entry.last_used.elapsed() <= self.opts.max_idle_time;
        if connected && fresh {
            return Some(entry.client);
        }
        debug!(addr = %self.addr, connected, fresh, "dropping stale pooled session");
        spawn_close(entry.client);
        None
    }

    async fn acquire_client(&self) -> Result<Arc<Client>> {
        // Fast path: reuse an idle session.
        if let Some(entry) = self.pop_idle() {
            self.metrics.hits.inc();
            if let Some(client) = self.check_entry(entry) {
                return Ok(client);
            }
            return self.create_client().await;
        }
        self.metrics.misses.inc();

        // Create a new session while below the bound.
        if self.try_reserve() {
            return self.create_client().await;
        }

        // Block until a session is returned or capacity frees up.
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                return Err(Error::PoolClosed);
            }
            if let Some(entry) = self.pop_idle() {
                // Several sessions may have been returned while we were
                // not yet registered; pass the wakeup on.
                if !self.state.lock().expect("pool lock").idle.is_empty() {
                    self.notify.notify_one();
                }
                if let Some(client) = self.check_entry(entry) {
                    return Ok(client);
                }
                return self.create_client().await;
            }
            if self.try_reserve() {
                return self.create_client().await;
            }
            notified.await;
        }
    }

    /// Creates and connects a new client for an already reserved slot.
    async fn create_client(&self) -> Result<Arc<Client>> {
        let mut slot = SlotGuard {
            shared: self,
            armed: true,
        };
        let client = Client::new(&self.addr, self.opts.client_options.clone())?;
        client.connect().await?;

        slot.armed = false;
        self.metrics.created.inc();
        debug!(addr = %self.addr, "pooled session created");
        Ok(Arc::new(client))
    }

    /// Returns a session to the pool.
    fn put(&self, client: Arc<Client>) {
        self.metrics.puts.inc();

        if self.is_closed() || client.state() != ConnectionState::Connected {
            self.dispose(client);
            return;
        }

        let mut state = self.state.lock().expect("pool lock");
        if state.idle.len() < self.opts.size {
            state.idle.push_back(IdleClient {
                client,
                last_used: Instant::now(),
            });
            drop(state);
            self.metrics.available.add(1);
            self.notify.notify_one();
        } else {
            // Cannot happen while the accounting is correct.
            drop(state);
            warn!(addr = %self.addr, "idle queue full, closing returned session");
            self.dispose(client);
        }
    }

    /// Closes a session and gives up its slot.
    fn dispose(&self, client: Arc<Client>) {
        self.release_slot();
        self.metrics.closed.inc();
        spawn_close(client);
    }
}

/// Releases a reserved slot unless the creation succeeded.
struct SlotGuard<'a> {
    shared: &'a PoolShared,
    armed: bool,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.release_slot();
        }
    }
}

/// Gracefully closes a client in the background.
///
/// Dropping the last reference closes the socket either way; the spawn
/// merely keeps the close path non-blocking for synchronous callers.
fn spawn_close(client: Arc<Client>) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move { client.close().await });
    }
}

async fn run_health_checker(shared: Arc<PoolShared>, freq: Duration) {
    let mut interval = tokio::time::interval(freq);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        if shared.is_closed() {
            return;
        }
        sweep_idle(&shared);
    }
}

/// One bounded sweep over the idle queue.
///
/// Disconnected and over-idle sessions are disposed of; survivors are
/// requeued in order. Entries checked out concurrently are simply not
/// seen by the sweep.
fn sweep_idle(shared: &PoolShared) {
    let stale: Vec<Arc<Client>> = {
        let mut state = shared.state.lock().expect("pool lock");
        let mut keep = VecDeque::with_capacity(state.idle.len());
        let mut stale = Vec::new();
        while let Some(entry) = state.idle.pop_front() {
            let connected = entry.client.state() == ConnectionState::Connected;
            let fresh = shared.opts.max_idle_time.is_zero()
                || entry.last_used.elapsed() <= shared.opts.max_idle_time;
            if connected && fresh {
                keep.push_back(entry);
            } else {
                stale.push(entry.client);
            }
        }
        state.idle = keep;
        state.created -= stale.len();
        stale
    };

    if !stale.is_empty() {
        debug!(addr = %shared.addr, count = stale.len(), "health check evicted idle sessions");
    }
    for client in stale {
        shared.metrics.available.add(-1);
        shared.metrics.closed.inc();
        spawn_close(client);
        shared.notify.notify_one();
    }
}

/// A pooled session handle that returns itself on close or drop.
///
/// Dereferences to [`Client`], so all request methods are available
/// directly on the handle.
pub struct PooledClient {
    shared: Arc<PoolShared>,
    client: Arc<Client>,
    returned: AtomicBool,
}

impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient")
            .field("client", &self.client)
            .field("returned", &self.returned)
            .finish_non_exhaustive()
    }
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl PooledClient {
    /// Returns the session to the pool.
    ///
    /// Idempotent, so callers may close defensively. The handle must
    /// not be used afterwards.
    pub fn close(&self) {
        if self.returned.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.put(Arc::clone(&self.client));
    }

    /// Destroys the underlying session instead of returning it.
    ///
    /// Use this when the session is known to be in a bad state.
    pub fn discard(&self) {
        if self.returned.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.dispose(Arc::clone(&self.client));
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_address_is_rejected() {
        assert!(matches!(
            Pool::new("", PoolOptions::default()),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn size_is_normalized_to_at_least_one() {
        let pool = Pool::new("127.0.0.1:502", PoolOptions::new().size(0)).unwrap();
        assert_eq!(pool.stats().size, 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn closed_pool_rejects_get() {
        let pool = Pool::new("127.0.0.1:502", PoolOptions::default()).unwrap();
        pool.close().await;
        assert!(matches!(pool.get().await, Err(Error::PoolClosed)));
    }
}
