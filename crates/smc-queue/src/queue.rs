//! # Command Queue
//!
//! Out-of-order command queue executing tasks and memory migrations on the
//! device's compute units.
//!
//! ## Execution Model
//!
//! ```text
//!  enqueue ──► Command { remaining = deps + 1 }
//!                 │
//!                 │  each dependency's completion callback: remaining -= 1
//!                 │  batch flush:                            remaining -= 1
//!                 ▼
//!             remaining == 0 ──► ready list ──► worker (one per compute unit)
//!                                                   │
//!                                   Event::complete / Event::fail (callbacks)
//! ```
//!
//! Readiness is driven entirely by completion callbacks; nothing polls.
//! Without `OUT_OF_ORDER_EXEC_MODE` every command also depends on the one
//! enqueued before it.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex, MutexGuard};
use smc_core::{status, CommandKind, Error, Event, ExecStatus, Result};
use smc_mem::DeviceRegion;

use crate::context::Context;
use crate::kernel::{Invocation, Launch};
use crate::ring::{CommandRing, RingStats};

// =============================================================================
// CONFIGURATION
// =============================================================================

bitflags! {
    /// Command queue properties
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueProperties: u32 {
        /// Commands may execute in any order their dependencies allow
        const OUT_OF_ORDER_EXEC_MODE = 1 << 0;
        /// Record lifecycle timestamps on every event
        const PROFILING_ENABLE = 1 << 1;
    }
}

/// Command queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue properties
    pub properties: QueueProperties,
    /// Maximum operations in flight
    pub max_pending: usize,
    /// Worker threads; defaults to the device's compute units
    pub workers: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            properties: QueueProperties::OUT_OF_ORDER_EXEC_MODE | QueueProperties::PROFILING_ENABLE,
            max_pending: 1024,
            workers: None,
        }
    }
}

impl QueueConfig {
    /// Set properties
    pub fn with_properties(mut self, properties: QueueProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Set in-flight capacity
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Set worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }
}

/// Direction of a memory migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationTarget {
    /// Copy written device data back into host buffers
    Host,
    /// Refresh device regions from host buffers
    Device,
}

// =============================================================================
// COMMANDS
// =============================================================================

enum Operation {
    Task(Invocation),
    Migrate {
        regions: Vec<DeviceRegion>,
        target: MigrationTarget,
    },
}

impl Operation {
    fn run(self) -> Result<()> {
        match self {
            Self::Task(invocation) => {
                match catch_unwind(AssertUnwindSafe(|| invocation.run())) {
                    Ok(result) => result,
                    Err(_) => {
                        log::error!("work unit '{}' panicked", invocation.name());
                        Err(Error::OperationFailed(status::OUT_OF_RESOURCES))
                    }
                }
            }
            Self::Migrate {
                regions,
                target: MigrationTarget::Host,
            } => regions.iter().try_for_each(|r| r.sync_to_host().map(drop)),
            Self::Migrate {
                regions,
                target: MigrationTarget::Device,
            } => regions.iter().try_for_each(DeviceRegion::sync_from_host),
        }
    }
}

struct Command {
    event: Event,
    op: Mutex<Option<Operation>>,
    /// Unresolved dependencies plus the staging guard
    remaining: AtomicUsize,
    /// Status of the first failed dependency, zero if none
    dep_error: AtomicI32,
}

struct ReadyList {
    commands: VecDeque<Arc<Command>>,
    shutdown: bool,
}

struct Shared {
    ring: Mutex<CommandRing>,
    idle: Condvar,
    ready: Mutex<ReadyList>,
    work: Condvar,
    profiling: bool,
}

impl Shared {
    /// Drop one hold on `command`; the last one makes it ready
    fn release(&self, command: Arc<Command>) {
        if command.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        command.event.mark_submitted();
        self.ready.lock().commands.push_back(command);
        self.work.notify_one();
    }

    fn next_ready(&self) -> Option<Arc<Command>> {
        let mut ready = self.ready.lock();
        loop {
            if let Some(command) = ready.commands.pop_front() {
                return Some(command);
            }
            if ready.shutdown {
                return None;
            }
            self.work.wait(&mut ready);
        }
    }

    fn execute(&self, command: &Command) {
        let op = command.op.lock().take();
        let dep_error = command.dep_error.load(Ordering::Acquire);

        // The operation, and the regions it holds, is gone before the event
        // signals.
        let status = match (dep_error, op) {
            (0, Some(op)) => {
                command.event.mark_running();
                match op.run() {
                    Ok(()) => ExecStatus::Complete,
                    Err(e) => {
                        log::debug!("event {} failed: {}", command.event.id(), e);
                        ExecStatus::Error(e.status_code())
                    }
                }
            }
            (0, None) => ExecStatus::Error(status::OUT_OF_RESOURCES),
            (code, _) => ExecStatus::Error(code),
        };

        match status {
            ExecStatus::Error(code) => command.event.fail(code),
            _ => command.event.complete(),
        };

        let mut ring = self.ring.lock();
        ring.retire(command.event.id(), status);
        if ring.is_idle() {
            self.idle.notify_all();
        }
    }

    fn worker_loop(&self, unit: usize) {
        log::trace!("compute unit {} online", unit);
        while let Some(command) = self.next_ready() {
            self.execute(&command);
        }
        log::trace!("compute unit {} offline", unit);
    }

    fn shutdown(&self) {
        self.ready.lock().shutdown = true;
        self.work.notify_all();
    }
}

// =============================================================================
// COMMAND QUEUE
// =============================================================================

#[derive(Default)]
struct SubmitState {
    /// Last enqueued event, for in-order chaining
    last: Option<Event>,
}

/// Command queue on one device
pub struct CommandQueue {
    context: Context,
    config: QueueConfig,
    shared: Arc<Shared>,
    submit: Mutex<SubmitState>,
    workers: Vec<JoinHandle<()>>,
}

impl CommandQueue {
    /// Create a queue and start its workers
    pub fn new(context: &Context, config: QueueConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            ring: Mutex::new(CommandRing::new(config.max_pending)),
            idle: Condvar::new(),
            ready: Mutex::new(ReadyList {
                commands: VecDeque::new(),
                shutdown: false,
            }),
            work: Condvar::new(),
            profiling: config.properties.contains(QueueProperties::PROFILING_ENABLE),
        });

        let count = config.workers.unwrap_or_else(|| context.device().compute_units());
        let mut workers = Vec::with_capacity(count);
        for unit in 0..count {
            let worker_shared = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name(format!("smc-cu{}", unit))
                .spawn(move || worker_shared.worker_loop(unit));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    log::error!("failed to start compute unit {}: {}", unit, e);
                    shared.shutdown();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(Error::WorkerSpawnFailed);
                }
            }
        }

        log::debug!(
            "command queue on device {}: {} workers, {:?}",
            context.device().id(),
            count,
            config.properties
        );

        Ok(Self {
            context: context.clone(),
            config,
            shared,
            submit: Mutex::new(SubmitState::default()),
            workers,
        })
    }

    /// Get context
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Get properties
    pub fn properties(&self) -> QueueProperties {
        self.config.properties
    }

    /// Whether commands may run out of enqueue order
    pub fn is_out_of_order(&self) -> bool {
        self.config
            .properties
            .contains(QueueProperties::OUT_OF_ORDER_EXEC_MODE)
    }

    /// Whether events record profiling timestamps
    pub fn is_profiling(&self) -> bool {
        self.shared.profiling
    }

    /// Operations in flight
    pub fn pending(&self) -> usize {
        self.shared.ring.lock().pending_count()
    }

    /// Ring statistics snapshot
    pub fn stats(&self) -> RingStats {
        self.shared.ring.lock().stats().clone()
    }

    /// Start a batch of up to `slots` commands
    ///
    /// All slots are reserved up front, so a batch either fits entirely or
    /// fails with `CapacityExceeded` before anything is enqueued. The batch
    /// holds the queue's submit lock: commands of different batches are never
    /// interleaved at enqueue time.
    pub fn batch(&self, slots: usize) -> Result<SubmitBatch<'_>> {
        let state = self.submit.lock();
        if self.shared.ready.lock().shutdown {
            return Err(Error::QueueShutdown);
        }
        self.shared.ring.lock().reserve(slots)?;
        let chain_start = state.last.clone();
        Ok(SubmitBatch {
            queue: self,
            state,
            chain_start,
            reserved: slots,
            staged: Vec::new(),
        })
    }

    /// Enqueue one task
    pub fn enqueue_task(&self, launch: Launch, wait_list: &[Event]) -> Result<Event> {
        let mut batch = self.batch(1)?;
        let event = batch.enqueue_task(launch, wait_list)?;
        batch.flush();
        Ok(event)
    }

    /// Enqueue one migration
    pub fn enqueue_migrate(
        &self,
        regions: &[DeviceRegion],
        target: MigrationTarget,
        wait_list: &[Event],
    ) -> Result<Event> {
        let mut batch = self.batch(1)?;
        let event = batch.enqueue_migrate(regions, target, wait_list)?;
        batch.flush();
        Ok(event)
    }

    /// Block until every enqueued operation has finished
    ///
    /// Must not be called from a completion callback: callbacks run on the
    /// queue's own workers.
    pub fn finish(&self) {
        let mut ring = self.shared.ring.lock();
        while !ring.is_idle() {
            self.shared.idle.wait(&mut ring);
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.finish();
        self.shared.shutdown();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("compute unit worker panicked");
            }
        }
        log::trace!("command queue on device {} drained", self.context.device().id());
    }
}

impl core::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("device", &self.context.device().id())
            .field("properties", &self.config.properties)
            .field("workers", &self.workers.len())
            .field("pending", &self.pending())
            .finish()
    }
}

// =============================================================================
// SUBMIT BATCH
// =============================================================================

/// Group of commands enqueued under one reservation
///
/// Staged commands become eligible to run when the batch is flushed, so
/// callbacks can be attached to their events first. Dropping a batch without
/// flushing cancels its staged commands: their events fail with
/// `OUT_OF_RESOURCES` and nothing runs. Unused reserved slots are returned on
/// drop.
pub struct SubmitBatch<'q> {
    queue: &'q CommandQueue,
    state: MutexGuard<'q, SubmitState>,
    /// In-order chain tail before this batch
    chain_start: Option<Event>,
    reserved: usize,
    staged: Vec<Arc<Command>>,
}

impl SubmitBatch<'_> {
    /// Stage a task
    pub fn enqueue_task(&mut self, launch: Launch, wait_list: &[Event]) -> Result<Event> {
        let invocation = launch.finalize()?;
        self.stage(CommandKind::Task, Operation::Task(invocation), wait_list)
    }

    /// Stage a migration of `regions`
    pub fn enqueue_migrate(
        &mut self,
        regions: &[DeviceRegion],
        target: MigrationTarget,
        wait_list: &[Event],
    ) -> Result<Event> {
        if regions.is_empty() {
            return Err(Error::InvalidRegion);
        }
        let kind = match target {
            MigrationTarget::Host => CommandKind::MigrateToHost,
            MigrationTarget::Device => CommandKind::MigrateToDevice,
        };
        let op = Operation::Migrate {
            regions: regions.to_vec(),
            target,
        };
        self.stage(kind, op, wait_list)
    }

    fn stage(&mut self, kind: CommandKind, op: Operation, wait_list: &[Event]) -> Result<Event> {
        if self.reserved == 0 {
            return Err(Error::CapacityExceeded);
        }

        let shared = &self.queue.shared;
        let id = shared.ring.lock().push(kind);
        self.reserved -= 1;

        let event = Event::new(id, kind, shared.profiling);

        let mut deps = wait_list.to_vec();
        if !self.queue.is_out_of_order() {
            deps.extend(self.state.last.take());
        }

        let command = Arc::new(Command {
            event: event.clone(),
            op: Mutex::new(Some(op)),
            remaining: AtomicUsize::new(deps.len() + 1),
            dep_error: AtomicI32::new(0),
        });

        for dep in &deps {
            let command = Arc::clone(&command);
            let shared = Arc::clone(shared);
            dep.on_complete(move |_, dep_status| {
                if !dep_status.is_success() {
                    let _ = command.dep_error.compare_exchange(
                        0,
                        status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
                shared.release(command);
            });
        }

        log::trace!("event {} staged ({:?}, {} deps)", id, kind, deps.len());

        self.state.last = Some(event.clone());
        self.staged.push(command);
        Ok(event)
    }

    /// Slots still available in this batch
    pub fn remaining(&self) -> usize {
        self.reserved
    }

    /// Release staged commands to the queue
    pub fn flush(mut self) {
        self.release_staged();
    }

    fn release_staged(&mut self) {
        for command in self.staged.drain(..) {
            self.queue.shared.release(command);
        }
    }

    /// Fail and retire staged commands without running them
    ///
    /// The staging guard is never released, so a late dependency callback
    /// cannot make a cancelled command ready.
    fn cancel_staged(&mut self) {
        if self.staged.is_empty() {
            return;
        }
        self.state.last = self.chain_start.take();

        let staged: Vec<Arc<Command>> = self.staged.drain(..).collect();
        for command in &staged {
            drop(command.op.lock().take());
        }
        for command in &staged {
            command.event.fail(status::OUT_OF_RESOURCES);
        }

        let shared = &self.queue.shared;
        let mut ring = shared.ring.lock();
        for command in &staged {
            ring.retire(command.event.id(), ExecStatus::Error(status::OUT_OF_RESOURCES));
        }
        log::debug!("cancelled {} unflushed commands", staged.len());
    }
}

impl Drop for SubmitBatch<'_> {
    fn drop(&mut self) {
        self.cancel_staged();
        let mut ring = self.queue.shared.ring.lock();
        ring.unreserve(self.reserved);
        if ring.is_idle() {
            self.queue.shared.idle.notify_all();
        }
    }
}

impl core::fmt::Debug for SubmitBatch<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubmitBatch")
            .field("staged", &self.staged.len())
            .field("reserved", &self.reserved)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceConfig};
    use crate::kernel::{ArgKind, Kernel, KernelArgs, WorkUnit};
    use crate::program::{Program, ProgramImage};
    use smc_core::wait_for_events;
    use smc_mem::{HostBuffer, MemFlags};
    use std::sync::mpsc;
    use std::time::Duration;

    /// Adds its scalar to every element of its region
    struct Add;

    impl WorkUnit for Add {
        fn name(&self) -> &str {
            "add"
        }

        fn signature(&self) -> &[ArgKind] {
            &[ArgKind::Region, ArgKind::I32]
        }

        fn execute(&self, args: &KernelArgs) -> Result<()> {
            let value = args.i32(1)?;
            let region = args.region(0)?;
            let len = region.len();
            for v in region.map_mut::<i32>(0..len)?.iter_mut() {
                *v += value;
            }
            Ok(())
        }
    }

    /// Blocks until released through its gate
    struct Gated {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl WorkUnit for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        fn signature(&self) -> &[ArgKind] {
            &[]
        }

        fn execute(&self, _args: &KernelArgs) -> Result<()> {
            let _ = self.gate.lock().recv_timeout(Duration::from_secs(10));
            Ok(())
        }
    }

    /// Always fails with a fixed status
    struct Failing;

    impl WorkUnit for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn signature(&self) -> &[ArgKind] {
            &[]
        }

        fn execute(&self, _args: &KernelArgs) -> Result<()> {
            Err(Error::OperationFailed(-9999))
        }
    }

    struct Panicking;

    impl WorkUnit for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn signature(&self) -> &[ArgKind] {
            &[]
        }

        fn execute(&self, _args: &KernelArgs) -> Result<()> {
            panic!("work unit fault");
        }
    }

    fn setup(units: usize) -> (Program, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let device = Device::new(DeviceConfig::default().with_compute_units(units))
            .with_kernel(Arc::new(Add))
            .with_kernel(Arc::new(Gated { gate: Mutex::new(rx) }))
            .with_kernel(Arc::new(Failing))
            .with_kernel(Arc::new(Panicking));
        let context = Context::new(&device);
        let program = Program::build(&context, &ProgramImage::from_bytes(vec![0u8; 4])).unwrap();
        (program, tx)
    }

    fn queue(program: &Program, config: QueueConfig) -> CommandQueue {
        CommandQueue::new(program.context(), config).unwrap()
    }

    fn add_launch(program: &Program, region: &DeviceRegion, value: i32) -> Launch {
        let mut launch = Kernel::new(program, "add").unwrap().launch();
        launch.set_arg(0, region).unwrap();
        launch.set_arg(1, value).unwrap();
        launch
    }

    fn plain_launch(program: &Program, name: &str) -> Launch {
        Kernel::new(program, name).unwrap().launch()
    }

    #[test]
    fn test_task_then_migrate() {
        let (program, _gate) = setup(2);
        let q = queue(&program, QueueConfig::default());
        let host = HostBuffer::from_vec(vec![1i32, 2, 3]);
        let region = program
            .context()
            .create_region(MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR, &host, 0..3)
            .unwrap();

        let task = q.enqueue_task(add_launch(&program, &region, 10), &[]).unwrap();
        let migrate = q
            .enqueue_migrate(&[region], MigrationTarget::Host, &[task.clone()])
            .unwrap();
        migrate.wait().unwrap();

        assert!(task.is_complete());
        assert_eq!(migrate.kind(), CommandKind::MigrateToHost);
        assert_eq!(host.to_vec(), vec![11, 12, 13]);
    }

    #[test]
    fn test_out_of_order_independent_commands_overlap() {
        let (program, gate) = setup(2);
        let q = queue(&program, QueueConfig::default());
        let host = HostBuffer::from_vec(vec![0i32]);
        let region = program
            .context()
            .create_region(MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR, &host, 0..1)
            .unwrap();

        let slow = q.enqueue_task(plain_launch(&program, "gated"), &[]).unwrap();
        let fast = q.enqueue_task(add_launch(&program, &region, 1), &[]).unwrap();

        fast.wait().unwrap();
        assert!(!slow.is_complete());

        gate.send(()).unwrap();
        slow.wait().unwrap();
    }

    #[test]
    fn test_in_order_queue_chains_commands() {
        let (program, gate) = setup(2);
        let q = queue(
            &program,
            QueueConfig::default().with_properties(QueueProperties::empty()),
        );
        assert!(!q.is_out_of_order());
        assert!(!q.is_profiling());

        let host = HostBuffer::from_vec(vec![0i32]);
        let region = program
            .context()
            .create_region(MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR, &host, 0..1)
            .unwrap();

        let slow = q.enqueue_task(plain_launch(&program, "gated"), &[]).unwrap();
        let next = q.enqueue_task(add_launch(&program, &region, 1), &[]).unwrap();

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(next.status(), ExecStatus::Queued);

        gate.send(()).unwrap();
        next.wait().unwrap();
        assert!(slow.is_complete());
        assert_eq!(next.profiling_info(), Err(Error::ProfilingUnavailable));
    }

    #[test]
    fn test_failed_dependency_propagates() {
        let (program, _gate) = setup(2);
        let q = queue(&program, QueueConfig::default());
        let host = HostBuffer::from_vec(vec![5i32]);
        let region = program
            .context()
            .create_region(MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR, &host, 0..1)
            .unwrap();

        let failing = q.enqueue_task(plain_launch(&program, "failing"), &[]).unwrap();
        let dependent = q.enqueue_task(add_launch(&program, &region, 1), &[failing.clone()]).unwrap();
        let migrate = q
            .enqueue_migrate(&[region.clone()], MigrationTarget::Host, &[dependent.clone()])
            .unwrap();

        assert_eq!(failing.wait(), Err(Error::OperationFailed(-9999)));
        let chained = Error::OperationFailed(status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
        assert_eq!(dependent.wait(), Err(chained));
        assert_eq!(migrate.wait(), Err(chained));

        assert_eq!(&*region.map::<i32>().unwrap(), &[5]);
        assert_eq!(host.to_vec(), vec![5]);
        assert_eq!(q.stats().total_failures, 3);
    }

    #[test]
    fn test_panicking_work_unit_fails_event() {
        let (program, _gate) = setup(1);
        let q = queue(&program, QueueConfig::default());
        let event = q.enqueue_task(plain_launch(&program, "panicking"), &[]).unwrap();
        assert_eq!(event.wait(), Err(Error::OperationFailed(status::OUT_OF_RESOURCES)));

        let after = q.enqueue_task(plain_launch(&program, "failing"), &[]).unwrap();
        assert!(after.wait().is_err(), "worker survives a panicking work unit");
    }

    #[test]
    fn test_capacity_reservation() {
        let (program, gate) = setup(1);
        let q = queue(&program, QueueConfig::default().with_max_pending(2));

        let held = q.enqueue_task(plain_launch(&program, "gated"), &[]).unwrap();
        assert_eq!(q.batch(2).unwrap_err(), Error::CapacityExceeded);
        assert_eq!(q.pending(), 1);

        {
            let mut batch = q.batch(1).unwrap();
            assert_eq!(batch.remaining(), 1);
            batch.enqueue_task(plain_launch(&program, "failing"), &[]).unwrap();
            assert_eq!(
                batch.enqueue_task(plain_launch(&program, "failing"), &[]).unwrap_err(),
                Error::CapacityExceeded
            );
        }

        gate.send(()).unwrap();
        q.finish();
        assert!(held.is_complete());
        assert_eq!(q.pending(), 0);
        assert_eq!(q.stats().stalls, 1);
    }

    #[test]
    fn test_unflushed_batch_runs_nothing() {
        let (program, _gate) = setup(1);
        let q = queue(
            &program,
            QueueConfig::default().with_properties(QueueProperties::PROFILING_ENABLE),
        );
        let host = HostBuffer::from_vec(vec![2i32]);
        let region = program
            .context()
            .create_region(MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR, &host, 0..1)
            .unwrap();

        let (task, migrate) = {
            let mut batch = q.batch(3).unwrap();
            let task = batch.enqueue_task(add_launch(&program, &region, 5), &[]).unwrap();
            let migrate = batch
                .enqueue_migrate(&[region.clone()], MigrationTarget::Host, &[task.clone()])
                .unwrap();
            (task, migrate)
        };

        let cancelled = Error::OperationFailed(status::OUT_OF_RESOURCES);
        assert_eq!(task.wait(), Err(cancelled));
        assert_eq!(migrate.wait(), Err(cancelled));
        q.finish();
        assert_eq!(q.pending(), 0);
        assert_eq!(&*region.map::<i32>().unwrap(), &[2]);
        assert_eq!(host.to_vec(), vec![2]);

        // The in-order chain does not pick up the cancelled commands.
        let next = q.enqueue_task(add_launch(&program, &region, 1), &[]).unwrap();
        assert_eq!(next.wait(), Ok(()));
        assert_eq!(&*region.map::<i32>().unwrap(), &[3]);
    }

    #[test]
    fn test_unbound_launch_enqueues_nothing() {
        let (program, _gate) = setup(1);
        let q = queue(&program, QueueConfig::default());
        let launch = Kernel::new(&program, "add").unwrap().launch();
        assert_eq!(q.enqueue_task(launch, &[]).unwrap_err(), Error::UnboundArg(0));
        assert_eq!(q.stats().total_submissions, 0);
        assert!(q.batch(1024).is_ok(), "reservation returned");
    }

    #[test]
    fn test_callbacks_attached_before_flush_see_completion() {
        let (program, _gate) = setup(2);
        let q = queue(&program, QueueConfig::default());
        let (tx, rx) = mpsc::channel();

        let mut batch = q.batch(1).unwrap();
        let event = batch.enqueue_task(plain_launch(&program, "failing"), &[]).unwrap();
        event.on_complete(move |id, status| {
            let _ = tx.send((id, status));
        });
        assert_eq!(event.status(), ExecStatus::Queued);
        batch.flush();

        let (id, status) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(id, event.id());
        assert_eq!(status, ExecStatus::Error(-9999));
    }

    #[test]
    fn test_profiling_timestamps() {
        let (program, _gate) = setup(1);
        let q = queue(&program, QueueConfig::default());
        let host = HostBuffer::from_vec(vec![0i32; 2]);
        let region = program.context().create_region(MemFlags::READ_WRITE, &host, 0..2).unwrap();
        let event = q.enqueue_task(add_launch(&program, &region, 3), &[]).unwrap();
        event.wait().unwrap();

        let info = event.profiling_info().unwrap();
        assert!(info.queued <= info.submitted);
        assert!(info.submitted <= info.started);
        assert!(info.started <= info.ended);
    }

    #[test]
    fn test_drop_drains_outstanding_work() {
        let (program, _gate) = setup(2);
        let host = HostBuffer::from_vec(vec![0i32; 1]);
        let events = {
            let q = queue(&program, QueueConfig::default());
            let region = program
                .context()
                .create_region(MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR, &host, 0..1)
                .unwrap();
            let task = q.enqueue_task(add_launch(&program, &region, 7), &[]).unwrap();
            let migrate = q
                .enqueue_migrate(&[region], MigrationTarget::Host, &[task.clone()])
                .unwrap();
            vec![task, migrate]
        };
        assert!(events.iter().all(Event::is_complete));
        assert_eq!(wait_for_events(&events), Ok(()));
        assert_eq!(host.to_vec(), vec![7]);
        assert_eq!(program.device().memory().active_count(), 0);
    }

    #[test]
    fn test_migrate_to_device_refreshes_region() {
        let (program, _gate) = setup(1);
        let q = queue(&program, QueueConfig::default());
        let host = HostBuffer::from_vec(vec![1i32, 1]);
        let region = program
            .context()
            .create_region(MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR, &host, 0..2)
            .unwrap();

        host.write()[1] = 4;
        q.enqueue_migrate(&[region.clone()], MigrationTarget::Device, &[])
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(&*region.map::<i32>().unwrap(), &[1, 4]);
        assert_eq!(
            q.enqueue_migrate(&[], MigrationTarget::Host, &[]).unwrap_err(),
            Error::InvalidRegion
        );
    }
}
