use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::{ContextFactory, RenderContext};
use crate::config::PoolConfig;
use crate::utils::error::{PoolError, RenderError};

/// How a checked-out context should be treated when it comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotHealth {
    Healthy,
    /// Crashed, hung, or left in an unknown state. Never handed out again.
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub busy: usize,
    pub idle: usize,
    /// Free slots whose context was discarded and not yet rebuilt.
    pub vacant: usize,
}

struct Slot {
    id: usize,
    context: Option<Box<dyn RenderContext>>,
}

struct SlotState {
    // FIFO: the slot released longest ago is lent out next.
    free: VecDeque<Slot>,
    busy: usize,
}

/// Fixed set of long-lived render contexts lent out one request at a time.
///
/// A semaphore with `size` permits bounds checkouts; the free list is only
/// touched while holding a permit, so a slot is never handed to two callers.
pub struct RenderPool {
    factory: Arc<dyn ContextFactory>,
    size: usize,
    acquire_timeout: Duration,
    shutdown_timeout: Duration,
    permits: Arc<Semaphore>,
    state: Mutex<SlotState>,
    released: Notify,
    shutting_down: AtomicBool,
}

impl RenderPool {
    /// Launch every context up front. Failing to build any of them is fatal.
    pub async fn init(config: &PoolConfig, factory: Arc<dyn ContextFactory>) -> Result<Arc<Self>, PoolError> {
        let mut free = VecDeque::with_capacity(config.size);

        for id in 0..config.size {
            match factory.create().await {
                Ok(context) => free.push_back(Slot { id, context: Some(context) }),
                Err(e) => {
                    warn!("Failed to launch render context {} of {}: {}", id + 1, config.size, e);
                    for slot in free {
                        if let Some(context) = slot.context {
                            context.close().await;
                        }
                    }
                    return Err(PoolError::Launch(e));
                }
            }
        }

        info!(
            "Render pool ready: {} {} context(s), acquire timeout {}ms",
            config.size,
            factory.name(),
            config.acquire_timeout_ms
        );

        Ok(Arc::new(Self {
            factory,
            size: config.size,
            acquire_timeout: config.acquire_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            permits: Arc::new(Semaphore::new(config.size)),
            state: Mutex::new(SlotState { free, busy: 0 }),
            released: Notify::new(),
            shutting_down: AtomicBool::new(false),
        }))
    }

    /// Check out a context, waiting up to the configured acquire timeout.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledContext, PoolError> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }

        let permit = match timeout(self.acquire_timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            // The semaphore is only closed by shutdown.
            Ok(Err(_)) => return Err(PoolError::ShuttingDown),
            Err(_) => {
                warn!("Render pool exhausted: all {} contexts busy", self.size);
                return Err(PoolError::Exhausted {
                    timeout_ms: self.acquire_timeout.as_millis() as u64,
                });
            }
        };

        let slot = {
            let mut state = self.lock_state();
            let slot = state.free.pop_front();
            if slot.is_some() {
                state.busy += 1;
            }
            slot
        };
        let Some(slot) = slot else {
            // Every permit has a slot behind it, so an empty list means the pool is being torn down.
            return Err(PoolError::ShuttingDown);
        };

        let mut guard = PooledContext {
            pool: Arc::clone(self),
            slot_id: slot.id,
            context: slot.context,
            permit: Some(permit),
        };

        if self.is_shutting_down() {
            guard.discard_on_drop();
            return Err(PoolError::ShuttingDown);
        }

        if guard.context.is_none() {
            debug!("Rebuilding vacant render slot {}", guard.slot_id);
            // On failure the guard drops and the slot goes back vacant.
            let context = self.factory.create().await.map_err(PoolError::Launch)?;
            guard.context = Some(context);
        }

        debug!("Checked out render slot {}", guard.slot_id);
        Ok(guard)
    }

    /// Close idle contexts, fail pending and future acquires, and wait (bounded)
    /// for outstanding contexts to come back. Those are closed on release.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();

        let idle: Vec<_> = {
            let mut state = self.lock_state();
            state.free.iter_mut().filter_map(|slot| slot.context.take()).collect()
        };
        let idle_count = idle.len();
        for context in idle {
            context.close().await;
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let busy = self.lock_state().busy;
            if busy == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!("Render pool shutdown timed out with {} context(s) still checked out", busy);
                break;
            }
        }

        info!("Render pool shut down ({} idle context(s) closed)", idle_count);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock_state();
        let idle = state.free.iter().filter(|slot| slot.context.is_some()).count();
        PoolStats {
            size: self.size,
            busy: state.busy,
            idle,
            vacant: state.free.len() - idle,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn return_slot(&self, slot_id: usize, context: Option<Box<dyn RenderContext>>, permit: OwnedSemaphorePermit) {
        let to_close = {
            let mut state = self.lock_state();
            state.busy -= 1;
            if self.is_shutting_down() {
                state.free.push_back(Slot { id: slot_id, context: None });
                context
            } else {
                state.free.push_back(Slot { id: slot_id, context });
                None
            }
        };

        drop(permit);
        self.released.notify_waiters();

        if let Some(context) = to_close {
            close_in_background(context);
        }
    }
}

fn close_in_background(context: Box<dyn RenderContext>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { context.close().await });
        }
        Err(_) => drop(context),
    }
}

/// A context on loan from the pool.
///
/// Give it back with [`PooledContext::release`]. Dropping it without release
/// (e.g. the request was cancelled mid-navigation) discards the context and
/// returns its slot vacant, to be rebuilt on next checkout.
pub struct PooledContext {
    pool: Arc<RenderPool>,
    slot_id: usize,
    context: Option<Box<dyn RenderContext>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledContext {
    pub fn slot_id(&self) -> usize {
        self.slot_id
    }

    pub fn context_mut(&mut self) -> Result<&mut (dyn RenderContext + 'static), RenderError> {
        self.context.as_deref_mut().ok_or(RenderError::Closed)
    }

    pub async fn release(mut self, health: SlotHealth) {
        let shutting_down = self.pool.is_shutting_down();

        if health == SlotHealth::Healthy && !shutting_down {
            debug!("Returned render slot {}", self.slot_id);
            self.finish();
            return;
        }

        // If this future is dropped part way, Drop still hands the slot back.
        if let Some(context) = self.context.take() {
            context.close().await;
        }

        if !shutting_down {
            match self.pool.factory.create().await {
                Ok(context) => {
                    debug!("Replaced poisoned render slot {}", self.slot_id);
                    self.context = Some(context);
                }
                Err(e) => {
                    warn!("Could not rebuild render slot {}, leaving it vacant: {}", self.slot_id, e);
                }
            }
        }

        self.finish();
    }

    fn finish(mut self) {
        if let Some(permit) = self.permit.take() {
            self.pool.return_slot(self.slot_id, self.context.take(), permit);
        }
    }

    fn discard_on_drop(&mut self) {
        if let Some(context) = self.context.take() {
            close_in_background(context);
        }
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };

        if self.context.is_some() {
            warn!("Render slot {} dropped without release, discarding its context", self.slot_id);
            self.discard_on_drop();
        }
        self.pool.return_slot(self.slot_id, None, permit);
    }
}
