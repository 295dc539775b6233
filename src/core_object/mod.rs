//! Dual-Representation Objects
//!
//! Every GPU-bound entity is split in two:
//!
//! - a **sim-side** handle ([`CoreObject`]) with a stable id, owned by
//!   application code and usable while the core thread is mid-frame;
//! - a **core-side** counterpart (`C: CoreObjectCore`) holding the hardware
//!   resources, created lazily and only ever by the core thread.
//!
//! # Lifecycle
//!
//! ```text
//!  Uninitialized ──(creation command drained)──▶ CoreCreated ──(destroy)──▶ Destroyed
//!        │                                                                    ▲
//!        └──────────────────────(destroy, never consumed)─────────────────────┘
//! ```
//!
//! Creation and destruction are commands on the [`CoreQueue`]; the sim side
//! never runs either directly. Destruction of a counterpart that is still
//! referenced (for example by a draw in flight) is deferred by the
//! [`CoreContext`] until the last reference drops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::core_thread::{CoreContext, CoreQueue, with_context};
use crate::errors::{GpuError, Result};
use crate::hardware::RenderBackend;

static NEXT_CORE_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a dual object.
pub type CoreObjectId = u64;

fn next_id() -> CoreObjectId {
    NEXT_CORE_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Core-thread counterpart of a dual object.
pub trait CoreObjectCore: Send + Sync + 'static {
    /// Frees backend resources not covered by `Drop` (pipeline objects, ...).
    ///
    /// Runs on the core thread once no other reference to the counterpart remains.
    fn release(&self, _backend: &mut dyn RenderBackend) {}
}

/// Builds a counterpart on the core thread.
pub type CoreFactory<C> = Box<dyn FnOnce(&mut CoreContext) -> Result<C> + Send + 'static>;

/// Public view of the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreObjectState {
    Uninitialized,
    CoreCreated,
    Destroyed,
}

enum SlotState<C> {
    Uninitialized,
    Realized(Arc<C>),
    Failed(String),
    Destroyed,
}

struct CoreSlot<C> {
    id: CoreObjectId,
    state: RwLock<SlotState<C>>,
    init_requested: AtomicBool,
    destroy_requested: AtomicBool,
}

impl<C: CoreObjectCore> CoreSlot<C> {
    /// Core thread: runs the factory unless the counterpart already exists.
    fn realize(&self, factory: CoreFactory<C>) {
        if !matches!(*self.state.read(), SlotState::Uninitialized) {
            log::debug!("Core object {} already initialized, ignoring request", self.id);
            return;
        }
        let created = with_context("CoreObject::create_core", factory);
        let mut state = self.state.write();
        match created {
            Ok(core) => {
                log::debug!("Core object {} created", self.id);
                *state = SlotState::Realized(Arc::new(core));
            }
            Err(e) => {
                log::error!("Core object {} failed to initialize: {e}", self.id);
                *state = SlotState::Failed(e.to_string());
            }
        }
    }

    /// Core thread: drops the slot's reference and hands the counterpart to
    /// the context for (possibly deferred) release.
    fn release(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), SlotState::Destroyed);
        if let SlotState::Realized(core) = previous {
            let id = self.id;
            let scheduled = with_context("CoreObject::destroy", move |ctx| {
                ctx.schedule_release(id, core);
                Ok(())
            });
            if let Err(e) = scheduled {
                log::error!("Core object {id} could not be released: {e}");
            }
        }
    }
}

/// Thread-safe reference to a (possibly not yet realized) counterpart.
pub struct CoreRef<C> {
    slot: Arc<CoreSlot<C>>,
}

impl<C> Clone for CoreRef<C> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<C: CoreObjectCore> CoreRef<C> {
    #[inline]
    pub fn id(&self) -> CoreObjectId {
        self.slot.id
    }

    /// Resolves the counterpart.
    ///
    /// Meant for core-thread commands queued after the creation request;
    /// before the creation command has drained this fails with
    /// [`GpuError::CoreNotInitialized`].
    pub fn get(&self) -> Result<Arc<C>> {
        match &*self.slot.state.read() {
            SlotState::Realized(core) => Ok(Arc::clone(core)),
            SlotState::Uninitialized => Err(GpuError::CoreNotInitialized(self.slot.id)),
            SlotState::Failed(reason) => Err(GpuError::CoreCreationFailed {
                id: self.slot.id,
                reason: reason.clone(),
            }),
            SlotState::Destroyed => Err(GpuError::ObjectDestroyed(self.slot.id)),
        }
    }

    pub fn is_realized(&self) -> bool {
        matches!(*self.slot.state.read(), SlotState::Realized(_))
    }

    pub fn state(&self) -> CoreObjectState {
        slot_state(&self.slot)
    }
}

impl<C> std::fmt::Debug for CoreRef<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreRef").field("id", &self.slot.id).finish()
    }
}

fn slot_state<C>(slot: &CoreSlot<C>) -> CoreObjectState {
    match *slot.state.read() {
        SlotState::Realized(_) => CoreObjectState::CoreCreated,
        SlotState::Destroyed => CoreObjectState::Destroyed,
        SlotState::Uninitialized | SlotState::Failed(_) => CoreObjectState::Uninitialized,
    }
}

/// Sim-side half of a dual object.
///
/// Owns the lifetime decision: dropping it (or calling [`destroy`](Self::destroy))
/// queues the release of the counterpart.
pub struct CoreObject<C: CoreObjectCore> {
    slot: Arc<CoreSlot<C>>,
    queue: CoreQueue,
}

impl<C: CoreObjectCore> CoreObject<C> {
    #[must_use]
    pub fn new(queue: &CoreQueue) -> Self {
        Self {
            slot: Arc::new(CoreSlot {
                id: next_id(),
                state: RwLock::new(SlotState::Uninitialized),
                init_requested: AtomicBool::new(false),
                destroy_requested: AtomicBool::new(false),
            }),
            queue: queue.clone(),
        }
    }

    #[inline]
    pub fn id(&self) -> CoreObjectId {
        self.slot.id
    }

    #[inline]
    pub fn queue(&self) -> &CoreQueue {
        &self.queue
    }

    pub fn state(&self) -> CoreObjectState {
        slot_state(&self.slot)
    }

    /// Whether creation of the counterpart has been queued.
    pub fn is_initialize_requested(&self) -> bool {
        self.slot.init_requested.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.slot.destroy_requested.load(Ordering::Acquire)
    }

    /// Reference to the counterpart without requesting its creation.
    pub fn core_ref(&self) -> CoreRef<C> {
        CoreRef {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Queues creation of the counterpart, at most once. `factory` is only
    /// invoked when the request is the first one.
    pub fn initialize_with(&self, factory: impl FnOnce() -> CoreFactory<C>) -> Result<()> {
        if self.is_destroyed() {
            return Err(GpuError::ObjectDestroyed(self.slot.id));
        }
        if self.slot.init_requested.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let slot = Arc::clone(&self.slot);
        let factory = factory();
        self.queue.queue_command(move || slot.realize(factory));
        Ok(())
    }

    /// Returns a reference to the counterpart, queueing its creation first if needed.
    pub fn get_core_with(&self, factory: impl FnOnce() -> CoreFactory<C>) -> Result<CoreRef<C>> {
        self.initialize_with(factory)?;
        Ok(self.core_ref())
    }

    /// Queues destruction. Not cancellable; later calls are no-ops.
    ///
    /// An object whose creation was never requested goes straight to
    /// `Destroyed` without touching the core thread.
    pub fn destroy(&self) {
        if self.slot.destroy_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.slot.init_requested.load(Ordering::Acquire) {
            *self.slot.state.write() = SlotState::Destroyed;
            log::debug!("Core object {} destroyed before initialization", self.slot.id);
            return;
        }
        let slot = Arc::clone(&self.slot);
        self.queue.queue_command(move || slot.release());
    }
}

impl<C: CoreObjectCore> Drop for CoreObject<C> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<C: CoreObjectCore> std::fmt::Debug for CoreObject<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreObject")
            .field("id", &self.slot.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Implemented by sim-side types backed by a [`CoreObject`].
pub trait CoreBacked {
    type Core: CoreObjectCore;

    fn core_object(&self) -> &CoreObject<Self::Core>;

    /// Captures what the core thread needs to build the counterpart.
    fn create_core(&self) -> CoreFactory<Self::Core>;

    /// Queues creation of the counterpart if that has not happened yet.
    fn initialize(&self) -> Result<()> {
        self.core_object().initialize_with(|| self.create_core())
    }

    /// Thread-safe reference to the counterpart; valid once the creation
    /// command has drained.
    fn get_core(&self) -> Result<CoreRef<Self::Core>> {
        self.core_object().get_core_with(|| self.create_core())
    }

    fn destroy(&self) {
        self.core_object().destroy();
    }
}
