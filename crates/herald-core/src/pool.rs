//! Bounded pool of expensive, stateful fetch resources.
//!
//! One pool exists per resource kind (HTTP sessions, browser sessions).
//! Resources are created lazily up to capacity, probed on checkout and on
//! return, and handed out through an RAII guard that must be given back with
//! [`PooledResource::release`]. A guard dropped without release (cancelled
//! future, timeout, panic) discards its resource in a background task.
//!
//! Capacity is enforced by a semaphore. A slot stays taken until its resource
//! is idle again or fully torn down, so discarded resources still count
//! against capacity while they close. All other bookkeeping lives behind a
//! single mutex that is never held across an await point.

use std::collections::HashMap;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::util::available_memory_mb;

/// Creates, health-checks and tears down one kind of pooled resource.
pub trait ResourceManager: Send + Sync + Clone + 'static {
    type Resource: Send + 'static;

    /// Short label for logs, e.g. `"http"` or `"browser"`.
    fn kind(&self) -> &'static str;

    fn create(&self) -> impl Future<Output = Result<Self::Resource, AppError>> + Send;

    /// Returns false when the resource is no longer usable.
    fn probe(&self, resource: &mut Self::Resource) -> impl Future<Output = bool> + Send;

    /// Graceful shutdown.
    fn destroy(&self, resource: Self::Resource)
    -> impl Future<Output = Result<(), AppError>> + Send;

    /// OS process backing the resource, if any.
    fn process_id(&self, resource: &Self::Resource) -> Option<u32> {
        let _ = resource;
        None
    }

    /// Forcefully terminate a process left behind by a resource.
    fn kill_process(&self, pid: u32) -> impl Future<Output = Result<(), AppError>> + Send {
        let _ = pid;
        async { Ok(()) }
    }
}

/// Pool sizing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on live resources.
    pub max_size: usize,
    /// When set, capacity is derived from available memory.
    pub memory_per_resource_mb: Option<u64>,
    /// Bounded wait for a graceful destroy before the process is killed.
    pub destroy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            memory_per_resource_mb: None,
            destroy_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Config for browser sessions, budgeted at 500 MB each.
    pub fn browser() -> Self {
        Self {
            memory_per_resource_mb: Some(500),
            ..Self::default()
        }
    }

    /// `available_mb / memory_per_resource_mb`, clamped to `1..=max_size`.
    /// Falls back to `max_size` when memory is unknown or unbudgeted.
    pub fn size_for_memory(&self, available_mb: Option<u64>) -> usize {
        let max = self.max_size.max(1);
        match (available_mb, self.memory_per_resource_mb) {
            (Some(available), Some(per)) if per > 0 => {
                let fits = usize::try_from(available / per).unwrap_or(usize::MAX);
                fits.clamp(1, max)
            }
            _ => max,
        }
    }

    /// Capacity for this host.
    pub fn capacity(&self) -> usize {
        self.size_for_memory(available_memory_mb())
    }
}

/// Point-in-time view of a pool's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub kind: &'static str,
    pub capacity: usize,
    pub idle: usize,
    pub live: usize,
    pub created_total: u64,
    pub tracked_processes: usize,
    pub generation: u64,
}

struct Entry<R> {
    id: u64,
    generation: u64,
    resource: R,
}

struct PoolState<R> {
    idle: Vec<Entry<R>>,
    live: usize,
    created_total: u64,
    generation: u64,
    processes: HashMap<u64, u32>,
    closed: bool,
}

type SharedState<R> = Arc<Mutex<PoolState<R>>>;

fn lock<R>(state: &Mutex<PoolState<R>>) -> MutexGuard<'_, PoolState<R>> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Bounded pool of resources produced by a [`ResourceManager`].
pub struct ResourcePool<M: ResourceManager> {
    manager: M,
    capacity: usize,
    destroy_timeout: Duration,
    slots: Arc<Semaphore>,
    state: SharedState<M::Resource>,
}

impl<M: ResourceManager> ResourcePool<M> {
    /// Build a pool sized for this host from `config`.
    pub fn new(manager: M, config: &PoolConfig) -> Self {
        Self::with_capacity(manager, config.capacity(), config.destroy_timeout)
    }

    pub fn with_capacity(manager: M, capacity: usize, destroy_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        tracing::info!(kind = manager.kind(), capacity, "Resource pool ready");
        Self {
            manager,
            capacity,
            destroy_timeout,
            slots: Arc::new(Semaphore::new(capacity)),
            state: Arc::new(Mutex::new(PoolState {
                idle: Vec::new(),
                live: 0,
                created_total: 0,
                generation: 0,
                processes: HashMap::new(),
                closed: false,
            })),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn kind(&self) -> &'static str {
        self.manager.kind()
    }

    /// Check out a resource, waiting for a free slot.
    ///
    /// Idle resources are checked first; dead ones are destroyed and the next
    /// candidate (or a fresh resource) is used instead. Creation errors are
    /// returned and the slot is freed. Cancelling the returned future at any
    /// point leaves the bookkeeping intact.
    pub async fn acquire(&self) -> Result<PooledResource<'_, M>, AppError> {
        let kind = self.manager.kind();
        loop {
            let permit = Arc::clone(&self.slots)
                .acquire_owned()
                .await
                .map_err(|_| AppError::PoolError(format!("{kind} pool is closed")))?;

            let candidate = lock(&self.state).idle.pop();
            let Some(entry) = candidate else {
                return self.create(permit).await;
            };
            let id = entry.id;
            let mut guard = PooledResource::new(self, entry, permit);
            if self.manager.probe(&mut *guard).await {
                tracing::debug!(kind, id, "Reusing pooled resource");
                return Ok(guard);
            }
            tracing::warn!(kind, id, "Idle resource failed health check, replacing");
            guard.discard_and_wait().await;
        }
    }

    async fn create(&self, permit: OwnedSemaphorePermit) -> Result<PooledResource<'_, M>, AppError> {
        let kind = self.manager.kind();
        let resource = self.manager.create().await.map_err(|e| {
            tracing::error!(kind, error = %e, "Failed to create pooled resource");
            e
        })?;
        let pid = self.manager.process_id(&resource);

        let (entry, closed) = {
            let mut state = lock(&self.state);
            state.created_total += 1;
            state.live += 1;
            let id = state.created_total;
            if let Some(pid) = pid {
                state.processes.insert(id, pid);
            }
            let entry = Entry {
                id,
                generation: state.generation,
                resource,
            };
            (entry, state.closed)
        };
        let id = entry.id;
        let guard = PooledResource::new(self, entry, permit);

        if closed {
            guard.discard_and_wait().await;
            return Err(AppError::PoolError(format!("{kind} pool is closed")));
        }

        tracing::info!(kind, id, ?pid, "Created pooled resource");
        Ok(guard)
    }

    /// Bump the generation and destroy idle resources. Checked-out resources
    /// from the old generation are destroyed when returned.
    pub async fn refresh(&self) {
        let (stale, generation) = {
            let mut state = lock(&self.state);
            state.generation += 1;
            let stale = std::mem::take(&mut state.idle);
            state.live -= stale.len();
            (stale, state.generation)
        };
        tracing::info!(
            kind = self.manager.kind(),
            generation,
            destroyed = stale.len(),
            "Refreshed resource pool"
        );
        for entry in stale {
            self.destroy_entry(entry).await;
        }
    }

    /// Close the pool, destroy idle resources, then kill every process still
    /// tracked. Errors are logged, never returned.
    pub async fn cleanup(&self) {
        let kind = self.manager.kind();
        self.slots.close();
        let idle = {
            let mut state = lock(&self.state);
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.live -= idle.len();
            idle
        };
        tracing::info!(kind, idle = idle.len(), "Cleaning up resource pool");
        for entry in idle {
            self.destroy_entry(entry).await;
        }

        let leftover: Vec<u32> = lock(&self.state).processes.drain().map(|(_, pid)| pid).collect();
        for pid in leftover {
            tracing::warn!(kind, pid, "Killing leftover process");
            if let Err(e) = self.manager.kill_process(pid).await {
                tracing::error!(kind, pid, error = %e, "Failed to kill process");
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = lock(&self.state);
        PoolStats {
            kind: self.manager.kind(),
            capacity: self.capacity,
            idle: state.idle.len(),
            live: state.live,
            created_total: state.created_total,
            tracked_processes: state.processes.len(),
            generation: state.generation,
        }
    }

    async fn destroy_entry(&self, entry: Entry<M::Resource>) {
        teardown(&self.manager, &self.state, entry, self.destroy_timeout).await;
    }
}

/// Gracefully destroy a resource within `timeout`, killing its process if
/// that fails. The caller has already removed it from the live count.
async fn teardown<M: ResourceManager>(
    manager: &M,
    state: &Mutex<PoolState<M::Resource>>,
    entry: Entry<M::Resource>,
    timeout: Duration,
) {
    let kind = manager.kind();
    let id = entry.id;
    let graceful = match tokio::time::timeout(timeout, manager.destroy(entry.resource)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(kind, id, error = %e, "Resource did not close cleanly");
            false
        }
        Err(_) => {
            tracing::warn!(kind, id, timeout_secs = timeout.as_secs(), "Resource close timed out");
            false
        }
    };

    let pid = lock(state).processes.remove(&id);
    if let Some(pid) = pid
        && !graceful
    {
        tracing::warn!(kind, id, pid, "Force killing resource process");
        if let Err(e) = manager.kill_process(pid).await {
            tracing::error!(kind, pid, error = %e, "Failed to kill process");
        }
    }
}

/// Exclusive handle on a pooled resource.
///
/// Give it back with [`release`](Self::release). Dropping it instead
/// discards the resource. The slot it holds is freed only once the resource
/// is idle again or torn down.
pub struct PooledResource<'a, M: ResourceManager> {
    pool: &'a ResourcePool<M>,
    entry: Option<Entry<M::Resource>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<'a, M: ResourceManager> PooledResource<'a, M> {
    fn new(pool: &'a ResourcePool<M>, entry: Entry<M::Resource>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            pool,
            entry: Some(entry),
            permit: Some(permit),
        }
    }

    /// Return the resource to the pool. It is health-checked and either kept
    /// idle or destroyed. The slot frees once this completes.
    pub async fn release(mut self) {
        let pool = self.pool;
        let (id, healthy) = match self.entry.as_mut() {
            Some(entry) => (entry.id, pool.manager.probe(&mut entry.resource).await),
            None => return,
        };

        let kept = {
            let mut state = lock(&pool.state);
            let reusable = healthy
                && !state.closed
                && self
                    .entry
                    .as_ref()
                    .is_some_and(|e| e.generation == state.generation)
                && state.idle.len() < pool.capacity;
            if reusable && let Some(entry) = self.entry.take() {
                state.idle.push(entry);
            }
            reusable
        };

        if !kept {
            tracing::debug!(kind = pool.manager.kind(), id, healthy, "Discarding returned resource");
            self.discard_and_wait().await;
        }
    }

    /// Tear the resource down and wait for it. If this future is cancelled
    /// the teardown still finishes in the background.
    async fn discard_and_wait(mut self) {
        if let Some(task) = self.discard()
            && let Err(e) = task.await
        {
            tracing::error!(kind = self.pool.manager.kind(), error = %e, "Resource teardown failed");
        }
    }

    /// Remove the resource from the live count and tear it down on a spawned
    /// task that owns the slot until the process is gone.
    fn discard(&mut self) -> Option<JoinHandle<()>> {
        let entry = self.entry.take()?;
        let permit = self.permit.take();
        lock(&self.pool.state).live -= 1;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = self.pool.manager.clone();
                let state = Arc::clone(&self.pool.state);
                let timeout = self.pool.destroy_timeout;
                Some(handle.spawn(async move {
                    teardown(&manager, &state, entry, timeout).await;
                    drop(permit);
                }))
            }
            // No runtime: the process stays tracked and is killed by cleanup().
            Err(_) => {
                drop(entry);
                None
            }
        }
    }
}

impl<M: ResourceManager> Deref for PooledResource<'_, M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        match &self.entry {
            Some(entry) => &entry.resource,
            None => unreachable!("pooled resource accessed after release"),
        }
    }
}

impl<M: ResourceManager> DerefMut for PooledResource<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.entry {
            Some(entry) => &mut entry.resource,
            None => unreachable!("pooled resource accessed after release"),
        }
    }
}

impl<M: ResourceManager> Drop for PooledResource<'_, M> {
    fn drop(&mut self) {
        if let Some(entry) = &self.entry {
            tracing::warn!(
                kind = self.pool.manager.kind(),
                id = entry.id,
                "Resource dropped without release, discarding"
            );
            self.discard();
        }
    }
}

/// A pool that can be recycled by the batch runner, independent of its
/// resource type.
pub trait Recyclable: Send + Sync {
    fn kind(&self) -> &'static str;

    fn capacity(&self) -> usize;

    fn recycle(&self) -> BoxFuture<'_, ()>;

    fn shutdown(&self) -> BoxFuture<'_, ()>;
}

impl<M: ResourceManager> Recyclable for ResourcePool<M> {
    fn kind(&self) -> &'static str {
        self.manager.kind()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn recycle(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.refresh())
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.cleanup())
    }
}
