//! Core Thread & Dual Object Tests
//!
//! Tests for:
//! - CoreQueue: FIFO order within and across batches, empty submits, AsyncOp
//! - with_context: thread-affinity guard
//! - CoreObject lifecycle: lazy creation, single creation, destroy before init
//! - Deferred release of counterparts still referenced after destroy
//! - Shutdown behavior

use std::sync::Arc;

use parking_lot::Mutex;
use wgpu::{IndexFormat, PrimitiveTopology, VertexFormat};

use myth_gpu::core_object::{CoreBacked, CoreObjectState};
use myth_gpu::core_thread::{CoreThread, ensure_core_thread, is_core_thread, with_context};
use myth_gpu::errors::GpuError;
use myth_gpu::hardware::{BackendStats, BufferUsage, SystemBackend};
use myth_gpu::mesh::{Mesh, MeshData, VertexSemantic};
use myth_gpu::params::GpuParamBlockBuffer;
use myth_gpu::settings::CoreThreadSettings;

fn spawn_core() -> (CoreThread, Arc<BackendStats>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = SystemBackend::new();
    let stats = backend.stats();
    let core = CoreThread::spawn(backend, CoreThreadSettings::default()).expect("spawn core thread");
    (core, stats)
}

fn triangle_data() -> MeshData {
    let mut data = MeshData::builder(3, IndexFormat::Uint16)
        .element(0, VertexFormat::Float32x3, VertexSemantic::Position, 0)
        .sub_mesh(3, PrimitiveTopology::TriangleList)
        .build()
        .unwrap();
    data.set_vertex_data(
        VertexSemantic::Position,
        0,
        &[[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
    )
    .unwrap();
    data.set_indices(0, &[0u16, 1, 2]).unwrap();
    data
}

/// Runs one empty batch so the previous batch's end-of-frame pass has finished.
fn flush_frame(core: &CoreThread) {
    core.queue().execute_sync(|| ()).unwrap();
}

// ============================================================================
// Command Queue
// ============================================================================

#[test]
fn commands_run_in_fifo_order_across_batches() {
    let (core, _) = spawn_core();
    let queue = core.queue().clone();
    let log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let log = Arc::clone(&log);
        queue.queue_command(move || log.lock().push(i));
    }
    queue.submit().unwrap();
    for i in 3..6 {
        let log = Arc::clone(&log);
        queue.queue_command(move || log.lock().push(i));
    }
    flush_frame(&core);

    assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn commands_wait_for_submit() {
    let (core, _) = spawn_core();
    let queue = core.queue().clone();

    let mut op = queue.queue_return(|| 42);
    assert_eq!(queue.pending_commands(), 1);
    assert!(!op.has_completed());
    assert_eq!(op.try_take(), None);

    assert_eq!(op.wait().unwrap(), 42);
    assert_eq!(queue.pending_commands(), 0);
}

#[test]
fn empty_submit_is_a_no_op() {
    let (core, _) = spawn_core();
    let queue = core.queue();

    let before = queue
        .execute_sync(|| with_context("frame", |ctx| Ok(ctx.frame_index())))
        .unwrap()
        .unwrap();
    queue.submit().unwrap();
    queue.submit().unwrap();
    let after = queue
        .execute_sync(|| with_context("frame", |ctx| Ok(ctx.frame_index())))
        .unwrap()
        .unwrap();

    assert_eq!(after, before + 1, "empty submits must not count as frames");
}

#[test]
fn async_op_completes_after_execution() {
    let (core, _) = spawn_core();
    let queue = core.queue().clone();

    let mut op = queue.queue_return(|| "done");
    queue.submit().unwrap();
    flush_frame(&core);

    assert!(op.has_completed());
    assert_eq!(op.try_take(), Some("done"));
}

// ============================================================================
// Thread Affinity
// ============================================================================

#[test]
fn with_context_fails_off_core_thread() {
    let (_core, _) = spawn_core();

    assert!(!is_core_thread());
    let result = with_context("test_op", |_| Ok(()));
    assert_eq!(result, Err(GpuError::WrongThread("test_op")));
    assert_eq!(ensure_core_thread("x"), Err(GpuError::WrongThread("x")));
}

#[test]
fn with_context_succeeds_on_core_thread() {
    let (core, _) = spawn_core();

    let on_core = core
        .queue()
        .execute_sync(|| (is_core_thread(), with_context("test_op", |_| Ok(7))))
        .unwrap();

    assert_eq!(on_core, (true, Ok(7)));
}

#[test]
fn waiting_on_core_thread_is_rejected() {
    let (core, _) = spawn_core();
    let queue = core.queue().clone();

    let inner_queue = queue.clone();
    let result = queue
        .execute_sync(move || inner_queue.queue_return(|| 1).wait())
        .unwrap();

    assert_eq!(result, Err(GpuError::WrongThread("AsyncOp::wait")));
}

// ============================================================================
// Dual Object Lifecycle
// ============================================================================

#[test]
fn core_is_created_lazily_after_submit() {
    let (core, _) = spawn_core();
    let queue = core.queue().clone();
    let mesh = Mesh::new(&queue);

    assert_eq!(mesh.state(), CoreObjectState::Uninitialized);
    let core_ref = mesh.get_core().unwrap();
    assert_eq!(core_ref.get().unwrap_err(), GpuError::CoreNotInitialized(mesh.id()));
    assert_eq!(mesh.state(), CoreObjectState::Uninitialized);

    flush_frame(&core);

    assert_eq!(mesh.state(), CoreObjectState::CoreCreated);
    assert!(core_ref.is_realized());
    assert!(core_ref.get().is_ok());
}

#[test]
fn creation_is_requested_only_once() {
    let (core, _) = spawn_core();
    let queue = core.queue().clone();
    let mesh = Mesh::new(&queue);

    mesh.initialize().unwrap();
    mesh.initialize().unwrap();
    let _ = mesh.get_core().unwrap();

    assert_eq!(queue.pending_commands(), 1);
    flush_frame(&core);
    assert_eq!(mesh.state(), CoreObjectState::CoreCreated);
}

#[test]
fn destroy_before_initialize_skips_core_thread() {
    let (core, stats) = spawn_core();
    let queue = core.queue().clone();
    let mesh = Mesh::with_data(&queue, triangle_data());

    mesh.destroy();

    assert_eq!(mesh.state(), CoreObjectState::Destroyed);
    assert_eq!(queue.pending_commands(), 0);
    flush_frame(&core);
    assert_eq!(stats.buffers_created(), 0);
}

#[test]
fn destroyed_object_cannot_be_recreated() {
    let (core, _) = spawn_core();
    let mesh = Mesh::new(core.queue());

    mesh.initialize().unwrap();
    flush_frame(&core);
    mesh.destroy();
    mesh.destroy();
    flush_frame(&core);

    assert_eq!(mesh.state(), CoreObjectState::Destroyed);
    assert_eq!(mesh.initialize(), Err(GpuError::ObjectDestroyed(mesh.id())));
    assert!(mesh.get_core().is_err());
}

#[test]
fn dropping_the_handle_releases_hardware_buffers() {
    let (core, stats) = spawn_core();
    let mesh = Mesh::with_data(core.queue(), triangle_data());

    mesh.initialize().unwrap();
    flush_frame(&core);
    assert_eq!(stats.live_buffers(), 2);

    drop(mesh);
    flush_frame(&core);

    assert_eq!(stats.live_buffers(), 0);
    assert_eq!(stats.live_bytes(), 0);
}

#[test]
fn failed_creation_is_reported_on_resolve() {
    let (core, _) = spawn_core();
    // Zero-sized buffers are rejected by the backend.
    let block = GpuParamBlockBuffer::new(core.queue(), 0, BufferUsage::Dynamic);

    let core_ref = block.get_core().unwrap();
    flush_frame(&core);

    assert!(matches!(
        core_ref.get(),
        Err(GpuError::CoreCreationFailed { id, .. }) if id == block.id()
    ));
    assert_eq!(block.state(), CoreObjectState::Uninitialized);
}

// ============================================================================
// Deferred Release
// ============================================================================

#[test]
fn release_waits_for_outstanding_references() {
    let (core, stats) = spawn_core();
    let queue = core.queue().clone();
    let mesh = Mesh::with_data(&queue, triangle_data());
    let core_ref = mesh.get_core().unwrap();

    // Simulates a draw holding the mesh across frames.
    let in_flight = queue.execute_sync(move || core_ref.get()).unwrap().unwrap();

    drop(mesh);
    flush_frame(&core);
    flush_frame(&core);

    let pending = queue
        .execute_sync(|| with_context("pending", |ctx| Ok(ctx.pending_release_count())))
        .unwrap()
        .unwrap();
    assert_eq!(pending, 1);
    assert_eq!(stats.live_buffers(), 2, "buffers must survive while referenced");

    drop(in_flight);
    flush_frame(&core);
    flush_frame(&core);

    assert_eq!(stats.live_buffers(), 0);
    let pending = queue
        .execute_sync(|| with_context("pending", |ctx| Ok(ctx.pending_release_count())))
        .unwrap()
        .unwrap();
    assert_eq!(pending, 0);
}

#[test]
fn shutdown_releases_pending_objects() {
    let (core, stats) = spawn_core();
    let queue = core.queue().clone();
    let mesh = Mesh::with_data(&queue, triangle_data());
    let core_ref = mesh.get_core().unwrap();
    let in_flight = queue.execute_sync(move || core_ref.get()).unwrap().unwrap();

    drop(mesh);
    core.shutdown().unwrap();

    drop(in_flight);
    assert_eq!(stats.live_buffers(), 0);
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn queue_reports_stopped_core_thread() {
    let (core, _) = spawn_core();
    let queue = core.queue().clone();

    core.shutdown().unwrap();

    queue.queue_command(|| ());
    assert_eq!(queue.submit(), Err(GpuError::CoreThreadStopped));
    assert_eq!(queue.execute_sync(|| 1), Err(GpuError::CoreThreadStopped));
}

#[test]
fn core_thread_uses_configured_name() {
    let _ = env_logger::builder().is_test(true).try_init();
    let settings = CoreThreadSettings {
        thread_name: "render-core".to_string(),
        max_batches_in_flight: Some(2),
        ..Default::default()
    };
    let core = CoreThread::spawn(SystemBackend::new(), settings).unwrap();

    let name = core
        .queue()
        .execute_sync(|| std::thread::current().name().map(str::to_string))
        .unwrap();

    assert_eq!(name.as_deref(), Some("render-core"));
    assert_ne!(core.thread_id(), std::thread::current().id());
}
