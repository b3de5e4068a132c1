//! # Dispatcher
//!
//! Turns a Monte-Carlo request into an execute step followed by a
//! transfer-out step on a shared out-of-order queue.
//!
//! The dispatcher keeps no per-submission state: regions and events live
//! with the queued operations and the returned [`CompletionHandle`].

use std::sync::Arc;

use parking_lot::Mutex;
use smc_core::{Error, ProgramFault, Result, SubmissionFault, SubmissionId};
use smc_mem::{DeviceRegion, HostBuffer, MemFlags};
use smc_queue::{CommandQueue, Context, Kernel, Launch, MigrationTarget, Program, QueueConfig};

use crate::handle::CompletionHandle;
use crate::kernel::{MonteCarloKernel, KERNEL_NAME};
use crate::sink::{LogSink, NotificationSink};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Dispatcher configuration
#[derive(Clone)]
pub struct DispatcherConfig {
    /// Work unit to bind
    pub kernel_name: String,
    /// Configuration of the queue the dispatcher creates
    pub queue: QueueConfig,
    /// Receiver of execution-step completions
    pub sink: Arc<dyn NotificationSink>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            kernel_name: String::from(KERNEL_NAME),
            queue: QueueConfig::default(),
            sink: Arc::new(LogSink),
        }
    }
}

impl DispatcherConfig {
    /// Set work unit name
    pub fn with_kernel_name(mut self, name: impl Into<String>) -> Self {
        self.kernel_name = name.into();
        self
    }

    /// Set queue configuration
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set notification sink
    pub fn with_sink(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }
}

impl core::fmt::Debug for DispatcherConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("kernel_name", &self.kernel_name)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// Asynchronous submitter of Monte-Carlo requests
pub struct Dispatcher {
    queue: CommandQueue,
    kernel: Kernel,
    sink: Arc<dyn NotificationSink>,
    /// Last issued submission id
    counter: Mutex<u64>,
}

impl Dispatcher {
    /// Create a dispatcher with its own queue on `context`
    pub fn new(context: &Context, program: &Program, config: DispatcherConfig) -> Result<Self> {
        let queue = CommandQueue::new(context, config.queue.clone())?;
        Self::with_queue(queue, program, config)
    }

    /// Create a dispatcher on an existing queue
    ///
    /// `config.queue` is ignored.
    pub fn with_queue(queue: CommandQueue, program: &Program, config: DispatcherConfig) -> Result<Self> {
        if queue.context().device().id() != program.device().id() {
            return Err(ProgramFault::WrongDevice.into());
        }

        let kernel = Kernel::new(program, &config.kernel_name)?;
        if kernel.signature() != MonteCarloKernel::SIGNATURE {
            log::warn!(
                "kernel '{}' has signature {:?}, expected {:?}",
                kernel.name(),
                kernel.signature(),
                MonteCarloKernel::SIGNATURE
            );
            return Err(ProgramFault::SignatureMismatch.into());
        }

        log::debug!(
            "dispatcher ready: kernel '{}' on device {}",
            kernel.name(),
            program.device().id()
        );

        Ok(Self {
            queue,
            kernel,
            sink: config.sink,
            counter: Mutex::new(0),
        })
    }

    /// Submit one request
    ///
    /// Samples `element_count` points into `input_a` / `input_b` and adds
    /// the hit count to `output[slot]`. Returns once both steps are
    /// enqueued; the buffers must not be touched until the returned handle
    /// resolves.
    ///
    /// Fails synchronously, with nothing enqueued and no id consumed, with
    /// `InvalidSubmission` for bad parameters and `CapacityExceeded` when
    /// the queue or device memory is full.
    pub fn submit(
        &self,
        element_count: usize,
        slot: usize,
        input_a: &HostBuffer<f64>,
        input_b: &HostBuffer<f64>,
        output: &HostBuffer<i32>,
    ) -> Result<CompletionHandle> {
        let (elements, index) = validate(element_count, slot, input_a, input_b, output)
            .inspect_err(|e| log::debug!("submission rejected: {}", e))?;

        let context = self.queue.context();
        let sample_flags = MemFlags::WRITE_ONLY | MemFlags::USE_HOST_PTR;
        let regions = [
            context.create_region(sample_flags, input_a, 0..element_count),
            context.create_region(sample_flags, input_b, 0..element_count),
            context.create_region(MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR, output, 0..output.len()),
        ];
        let regions: Vec<DeviceRegion> = regions
            .into_iter()
            .collect::<Result<_>>()
            .map_err(|e| match e {
                Error::OutOfDeviceMemory => Error::CapacityExceeded,
                other => other,
            })?;

        let mut launch = self.kernel.launch();
        if let Err(e) = bind(&mut launch, &regions, elements, index) {
            log::debug!("parameter binding failed: {}", e);
            return Err(SubmissionFault::Binding.into());
        }

        // Ids are issued in enqueue order and only once both steps are in.
        let mut counter = self.counter.lock();
        let id = SubmissionId::new(*counter + 1);

        let mut batch = self.queue.batch(2)?;
        let execution = batch.enqueue_task(launch, &[])?;
        let transfer = batch.enqueue_migrate(&regions, MigrationTarget::Host, &[execution.clone()])?;

        let sink = Arc::clone(&self.sink);
        execution.on_complete(move |_, status| sink.notify(id, status));
        batch.flush();

        *counter = id.id();
        drop(counter);

        log::debug!(
            "request {}: {} elements into slot {} (events {}, {})",
            id,
            element_count,
            slot,
            execution.id(),
            transfer.id()
        );
        Ok(CompletionHandle::new(id, execution, transfer))
    }

    /// Number of ids issued so far
    pub fn submitted(&self) -> u64 {
        *self.counter.lock()
    }

    /// Get queue
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Get bound kernel
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Block until every submission on the queue has finished
    pub fn finish(&self) {
        self.queue.finish();
    }
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kernel", &self.kernel.name())
            .field("queue", &self.queue)
            .field("submitted", &self.submitted())
            .finish()
    }
}

fn bind(launch: &mut Launch, regions: &[DeviceRegion], elements: i32, index: i32) -> Result<()> {
    launch.set_arg(MonteCarloKernel::ARG_X, &regions[0])?;
    launch.set_arg(MonteCarloKernel::ARG_Y, &regions[1])?;
    launch.set_arg(MonteCarloKernel::ARG_OUT, &regions[2])?;
    launch.set_arg(MonteCarloKernel::ARG_ELEMENTS, elements)?;
    launch.set_arg(MonteCarloKernel::ARG_INDEX, index)?;
    launch.validate()
}

/// Check a request and convert its scalars to the work unit's types
fn validate(
    element_count: usize,
    slot: usize,
    input_a: &HostBuffer<f64>,
    input_b: &HostBuffer<f64>,
    output: &HostBuffer<i32>,
) -> Result<(i32, i32)> {
    if element_count == 0 {
        return Err(SubmissionFault::ZeroElements.into());
    }
    if input_a.same_buffer(input_b) {
        return Err(SubmissionFault::AliasedInputs.into());
    }
    if input_a.len() < element_count || input_b.len() < element_count {
        return Err(SubmissionFault::InputTooShort.into());
    }
    if slot >= output.len() {
        return Err(SubmissionFault::SlotOutOfRange.into());
    }
    let elements = i32::try_from(element_count).map_err(|_| SubmissionFault::ScalarOutOfRange)?;
    let index = i32::try_from(slot).map_err(|_| SubmissionFault::ScalarOutOfRange)?;
    Ok((elements, index))
}
