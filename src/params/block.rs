use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::core_object::{
    CoreBacked, CoreFactory, CoreObject, CoreObjectCore, CoreObjectId, CoreObjectState,
};
use crate::core_thread::CoreQueue;
use crate::errors::{GpuError, Result};
use crate::hardware::{BufferLock, BufferUsage, HardwareBufferPtr, LockMode};

/// Parameter block storage: CPU shadow bytes on the sim side, a uniform
/// hardware buffer on the core side.
///
/// Every write bumps the version; the core side uploads only when the
/// version it last uploaded is older. Several parameter sets may share one
/// block buffer through an `Arc`.
pub struct GpuParamBlockBuffer {
    object: CoreObject<GpuParamBlockBufferCore>,
    shadow: RwLock<Vec<u8>>,
    version: AtomicU64,
    /// Last version written to the hardware buffer, shared with the core side.
    uploaded_version: Arc<AtomicU64>,
    usage: BufferUsage,
}

impl GpuParamBlockBuffer {
    #[must_use]
    pub fn new(queue: &CoreQueue, size: usize, usage: BufferUsage) -> Self {
        Self {
            object: CoreObject::new(queue),
            shadow: RwLock::new(vec![0u8; size]),
            version: AtomicU64::new(0),
            uploaded_version: Arc::new(AtomicU64::new(0)),
            usage,
        }
    }

    #[inline]
    pub fn id(&self) -> CoreObjectId {
        self.object.id()
    }

    pub fn state(&self) -> CoreObjectState {
        self.object.state()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.shadow.read().len()
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Write access to the shadow bytes; the version is bumped when the guard drops.
    pub fn modify(&self) -> ShadowWriteGuard<'_> {
        ShadowWriteGuard {
            bytes: self.shadow.write(),
            version: &self.version,
        }
    }

    /// Copies `data` to `offset`, zero-filling up to `reserved` bytes.
    pub fn write_padded(&self, offset: usize, data: &[u8], reserved: usize) -> Result<()> {
        let len = reserved.max(data.len());
        self.check_range(offset, len)?;
        let mut shadow = self.modify();
        shadow[offset..offset + data.len()].copy_from_slice(data);
        shadow[offset + data.len()..offset + len].fill(0);
        Ok(())
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.write_padded(offset, data, data.len())
    }

    pub fn zero_out(&self, offset: usize, len: usize) -> Result<()> {
        self.check_range(offset, len)?;
        self.modify()[offset..offset + len].fill(0);
        Ok(())
    }

    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.check_range(offset, out.len())?;
        out.copy_from_slice(&self.shadow.read()[offset..offset + out.len()]);
        Ok(())
    }

    /// Copy of the whole shadow storage.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.shadow.read().clone()
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        let size = self.size();
        if offset.checked_add(len).is_none_or(|end| end > size) {
            return Err(GpuError::LockOutOfBounds { offset, len, size });
        }
        Ok(())
    }

    /// Version currently held by the hardware buffer.
    #[inline]
    pub fn uploaded_version(&self) -> u64 {
        self.uploaded_version.load(Ordering::Acquire)
    }

    /// Snapshot of the shadow bytes if they are newer than the last upload.
    ///
    /// Every caller sees the block as stale until an upload lands, so sets
    /// sharing the block and snapshots that are never flushed cannot hide a
    /// write from the next flush.
    pub(crate) fn snapshot_if_stale(&self) -> Option<(u64, Vec<u8>)> {
        let shadow = self.shadow.read();
        let version = self.version();
        (version > self.uploaded_version()).then(|| (version, shadow.clone()))
    }
}

impl CoreBacked for GpuParamBlockBuffer {
    type Core = GpuParamBlockBufferCore;

    fn core_object(&self) -> &CoreObject<GpuParamBlockBufferCore> {
        &self.object
    }

    fn create_core(&self) -> CoreFactory<GpuParamBlockBufferCore> {
        let size = self.size();
        let usage = self.usage;
        let uploaded_version = Arc::clone(&self.uploaded_version);
        Box::new(move |ctx| {
            let buffer = ctx.create_param_block_buffer(size, usage)?;
            log::debug!("Created parameter block buffer of {size} bytes");
            Ok(GpuParamBlockBufferCore {
                buffer,
                uploaded_version,
                upload_count: AtomicU64::new(0),
            })
        })
    }
}

impl std::fmt::Debug for GpuParamBlockBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuParamBlockBuffer")
            .field("id", &self.id())
            .field("size", &self.size())
            .field("version", &self.version())
            .field("uploaded_version", &self.uploaded_version())
            .finish()
    }
}

/// Write guard over shadow bytes. Bumps the version on drop.
pub struct ShadowWriteGuard<'a> {
    bytes: RwLockWriteGuard<'a, Vec<u8>>,
    version: &'a AtomicU64,
}

impl std::ops::Deref for ShadowWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::ops::DerefMut for ShadowWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for ShadowWriteGuard<'_> {
    fn drop(&mut self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

/// Core-thread counterpart of a [`GpuParamBlockBuffer`].
#[derive(Debug)]
pub struct GpuParamBlockBufferCore {
    buffer: HardwareBufferPtr,
    uploaded_version: Arc<AtomicU64>,
    upload_count: AtomicU64,
}

impl CoreObjectCore for GpuParamBlockBufferCore {}

impl GpuParamBlockBufferCore {
    #[must_use]
    pub fn buffer(&self) -> &HardwareBufferPtr {
        &self.buffer
    }

    /// Number of uploads performed so far.
    pub fn upload_count(&self) -> u64 {
        self.upload_count.load(Ordering::Acquire)
    }

    pub fn uploaded_version(&self) -> u64 {
        self.uploaded_version.load(Ordering::Acquire)
    }

    /// Writes `bytes` into the hardware buffer unless `version` is not newer
    /// than the last upload. Returns whether an upload happened.
    pub fn upload(&self, version: u64, bytes: &[u8]) -> Result<bool> {
        if version <= self.uploaded_version() {
            return Ok(false);
        }
        BufferLock::new(self.buffer.as_ref(), LockMode::WriteOnlyDiscard)?.write(0, bytes)?;
        self.uploaded_version.store(version, Ordering::Release);
        self.upload_count.fetch_add(1, Ordering::AcqRel);
        Ok(true)
    }
}
