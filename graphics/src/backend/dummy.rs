//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU. Each queue is simulated by a worker
//! thread that consumes submissions from a channel in order, so work on
//! different queues really runs concurrently and only fence waits order it.
//! Command lists record [`DummyCommand`]s; executing a list appends its
//! markers and barriers to a shared [`ExecutionLog`] that tests can inspect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use strata_core::set_thread_name;

use super::{BackendError, BackendResult, GpuBackend};
use crate::compiler::BarrierConfig;
use crate::types::{PerQueue, QueueType};

/// Poll interval for queue-side waits, so shutdown can interrupt them.
const QUEUE_WAIT_POLL: Duration = Duration::from_millis(5);

/// A command recorded into a [`DummyCommandList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DummyCommand {
    /// A resource barrier.
    Barrier(BarrierConfig),
    /// A labelled point, logged when the queue reaches it.
    Marker(String),
    /// Simulated GPU work taking the given time.
    Delay(Duration),
}

/// An event observed while a simulated queue executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    Marker { queue: QueueType, label: String },
    Barrier { queue: QueueType, barrier: BarrierConfig },
    Signal { queue: QueueType, value: u64 },
    Wait { queue: QueueType, value: u64 },
}

/// Events of every queue in the order they happened.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl ExecutionLog {
    fn push(&self, event: ExecutionEvent) {
        self.events.lock().push(event);
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    /// Marker labels in execution order.
    pub fn markers(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::Marker { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    /// Position of a marker in execution order.
    pub fn marker_position(&self, label: &str) -> Option<usize> {
        self.markers().iter().position(|marker| marker == label)
    }

    /// Number of barriers executed on `queue`.
    pub fn barrier_count(&self, queue: QueueType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, ExecutionEvent::Barrier { queue: q, .. } if *q == queue))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[derive(Debug, Default)]
struct FenceState {
    value: Mutex<u64>,
    signaled: Condvar,
}

/// Shared timeline fence.
#[derive(Debug, Clone, Default)]
pub struct DummyFence {
    state: Arc<FenceState>,
}

impl DummyFence {
    fn new(initial_value: u64) -> Self {
        Self {
            state: Arc::new(FenceState {
                value: Mutex::new(initial_value),
                signaled: Condvar::new(),
            }),
        }
    }

    /// Current value.
    pub fn value(&self) -> u64 {
        *self.state.value.lock()
    }

    /// Set the value, as the GPU would. Values never decrease.
    pub fn signal(&self, value: u64) {
        let mut current = self.state.value.lock();
        if value > *current {
            *current = value;
        }
        self.state.signaled.notify_all();
    }

    /// Block until the value reaches `value` or `deadline` passes.
    fn wait_until(&self, value: u64, deadline: Option<Instant>) -> bool {
        let mut current = self.state.value.lock();
        while *current < value {
            match deadline {
                Some(deadline) => {
                    if self.state.signaled.wait_until(&mut current, deadline).timed_out() {
                        return *current >= value;
                    }
                }
                None => self.state.signaled.wait(&mut current),
            }
        }
        true
    }
}

/// Dummy command allocator.
#[derive(Debug)]
pub struct DummyCommandAllocator {
    queue: QueueType,
    resets: u64,
}

impl DummyCommandAllocator {
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Number of times the allocator was reset.
    pub fn reset_count(&self) -> u64 {
        self.resets
    }
}

/// Dummy command list.
#[derive(Debug)]
pub struct DummyCommandList {
    queue: QueueType,
    commands: Vec<DummyCommand>,
    recording: bool,
}

impl DummyCommandList {
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Record a marker logged when the queue executes it.
    pub fn marker(&mut self, label: impl Into<String>) {
        self.commands.push(DummyCommand::Marker(label.into()));
    }

    /// Record simulated GPU work.
    pub fn delay(&mut self, duration: Duration) {
        self.commands.push(DummyCommand::Delay(duration));
    }

    /// Commands recorded since the list was last opened.
    pub fn commands(&self) -> &[DummyCommand] {
        &self.commands
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }
}

enum QueueOp {
    Execute(Vec<DummyCommand>),
    Signal(DummyFence, u64),
    Wait(DummyFence, u64),
}

/// Simulated multi-queue GPU.
#[derive(Debug)]
pub struct DummyBackend {
    senders: Option<PerQueue<Sender<QueueOp>>>,
    workers: Vec<JoinHandle<()>>,
    closed: Arc<AtomicBool>,
    log: ExecutionLog,
}

impl DummyBackend {
    /// Create a new dummy backend with one worker thread per queue.
    pub fn new() -> BackendResult<Self> {
        let closed = Arc::new(AtomicBool::new(false));
        let log = ExecutionLog::default();

        let mut senders: Vec<Sender<QueueOp>> = Vec::with_capacity(QueueType::COUNT);
        let mut workers = Vec::with_capacity(QueueType::COUNT);
        for queue in QueueType::ALL {
            let (sender, receiver) = crossbeam_channel::unbounded();
            let worker = {
                let closed = Arc::clone(&closed);
                let log = log.clone();
                thread::Builder::new()
                    .name(format!("dummy-{}-queue", queue.as_str()))
                    .spawn(move || queue_thread(queue, receiver, closed, log))
                    .map_err(|err| {
                        BackendError::ObjectCreationFailed(format!(
                            "{queue} queue thread: {err}"
                        ))
                    })?
            };
            senders.push(sender);
            workers.push(worker);
        }

        let [graphics, compute, transfer]: [Sender<QueueOp>; QueueType::COUNT] = senders
            .try_into()
            .map_err(|_| BackendError::Internal("queue sender count".into()))?;

        log::debug!("DummyBackend: started {} queue threads", workers.len());
        Ok(Self {
            senders: Some(PerQueue([graphics, compute, transfer])),
            workers,
            closed,
            log,
        })
    }

    /// Log of everything the simulated queues executed.
    pub fn execution_log(&self) -> &ExecutionLog {
        &self.log
    }

    fn send(&self, queue: QueueType, op: QueueOp) -> BackendResult<()> {
        let senders = self.senders.as_ref().ok_or(BackendError::DeviceLost)?;
        senders[queue].send(op).map_err(|_| BackendError::DeviceLost)
    }
}

fn queue_thread(
    queue: QueueType,
    receiver: Receiver<QueueOp>,
    closed: Arc<AtomicBool>,
    log: ExecutionLog,
) {
    set_thread_name!("dummy queue");
    for op in receiver.iter() {
        match op {
            QueueOp::Execute(commands) => {
                for command in commands {
                    match command {
                        DummyCommand::Barrier(barrier) => {
                            log.push(ExecutionEvent::Barrier { queue, barrier })
                        }
                        DummyCommand::Marker(label) => {
                            log.push(ExecutionEvent::Marker { queue, label })
                        }
                        DummyCommand::Delay(duration) => thread::sleep(duration),
                    }
                }
            }
            QueueOp::Signal(fence, value) => {
                log.push(ExecutionEvent::Signal { queue, value });
                fence.signal(value);
            }
            QueueOp::Wait(fence, value) => {
                while !fence.wait_until(value, Some(Instant::now() + QUEUE_WAIT_POLL)) {
                    if closed.load(Ordering::Acquire) {
                        log::warn!("DummyBackend: {queue} queue abandoned wait for {value}");
                        return;
                    }
                }
                log.push(ExecutionEvent::Wait { queue, value });
            }
        }
    }
    log::trace!("DummyBackend: {queue} queue thread exiting");
}

impl GpuBackend for DummyBackend {
    type CommandAllocator = DummyCommandAllocator;
    type CommandList = DummyCommandList;
    type Fence = DummyFence;

    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn create_command_allocator(&self, queue: QueueType) -> BackendResult<DummyCommandAllocator> {
        log::trace!("DummyBackend: creating {queue} command allocator");
        Ok(DummyCommandAllocator { queue, resets: 0 })
    }

    fn reset_command_allocator(&self, allocator: &mut DummyCommandAllocator) -> BackendResult<()> {
        allocator.resets += 1;
        Ok(())
    }

    fn create_command_list(&self, queue: QueueType) -> BackendResult<DummyCommandList> {
        log::trace!("DummyBackend: creating {queue} command list");
        Ok(DummyCommandList {
            queue,
            commands: Vec::new(),
            recording: false,
        })
    }

    fn begin_command_list(
        &self,
        list: &mut DummyCommandList,
        allocator: &mut DummyCommandAllocator,
    ) -> BackendResult<()> {
        if list.recording {
            return Err(BackendError::InvalidParameter(
                "command list is already recording".into(),
            ));
        }
        if list.queue != allocator.queue {
            return Err(BackendError::InvalidParameter(format!(
                "{} command list with {} allocator",
                list.queue, allocator.queue
            )));
        }
        list.commands.clear();
        list.recording = true;
        Ok(())
    }

    fn close_command_list(&self, list: &mut DummyCommandList) -> BackendResult<()> {
        if !list.recording {
            return Err(BackendError::InvalidParameter(
                "command list is not recording".into(),
            ));
        }
        list.recording = false;
        Ok(())
    }

    fn record_barriers(&self, list: &mut DummyCommandList, barriers: &[BarrierConfig]) {
        list.commands
            .extend(barriers.iter().copied().map(DummyCommand::Barrier));
    }

    fn create_fence(&self, initial_value: u64) -> BackendResult<DummyFence> {
        Ok(DummyFence::new(initial_value))
    }

    fn execute(&self, queue: QueueType, lists: &[&DummyCommandList]) -> BackendResult<()> {
        for list in lists {
            if list.recording {
                return Err(BackendError::SubmissionFailed(
                    "command list was not closed".into(),
                ));
            }
            if list.queue != queue {
                return Err(BackendError::SubmissionFailed(format!(
                    "{} command list submitted to {queue} queue",
                    list.queue
                )));
            }
        }
        for list in lists {
            self.send(queue, QueueOp::Execute(list.commands.clone()))?;
        }
        Ok(())
    }

    fn queue_signal(&self, queue: QueueType, fence: &DummyFence, value: u64) -> BackendResult<()> {
        self.send(queue, QueueOp::Signal(fence.clone(), value))
    }

    fn queue_wait(&self, queue: QueueType, fence: &DummyFence, value: u64) -> BackendResult<()> {
        self.send(queue, QueueOp::Wait(fence.clone(), value))
    }

    fn fence_completed_value(&self, fence: &DummyFence) -> u64 {
        fence.value()
    }

    fn wait_fences(
        &self,
        waits: &[(&DummyFence, u64)],
        timeout: Option<Duration>,
    ) -> BackendResult<bool> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        for &(fence, value) in waits {
            if !fence.wait_until(value, deadline) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Drop for DummyBackend {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the senders ends each worker's receive loop.
        self.senders = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("DummyBackend: queue thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded(backend: &DummyBackend, queue: QueueType, label: &str) -> DummyCommandList {
        let mut allocator = backend.create_command_allocator(queue).unwrap();
        let mut list = backend.create_command_list(queue).unwrap();
        backend.begin_command_list(&mut list, &mut allocator).unwrap();
        list.marker(label);
        backend.close_command_list(&mut list).unwrap();
        list
    }

    #[test]
    fn test_backend_name() {
        let backend = DummyBackend::new().unwrap();
        assert_eq!(backend.name(), "Dummy");
    }

    #[test]
    fn test_execute_then_signal_orders_work() {
        let backend = DummyBackend::new().unwrap();
        let fence = backend.create_fence(0).unwrap();
        let list = recorded(&backend, QueueType::Graphics, "draw");

        backend.execute(QueueType::Graphics, &[&list]).unwrap();
        backend.queue_signal(QueueType::Graphics, &fence, 1).unwrap();
        assert!(backend.wait_fence(&fence, 1, Some(Duration::from_secs(5))).unwrap());
        assert_eq!(backend.fence_completed_value(&fence), 1);
        assert_eq!(backend.execution_log().markers(), vec!["draw".to_string()]);
    }

    #[test]
    fn test_queue_wait_blocks_until_signal() {
        let backend = DummyBackend::new().unwrap();
        let fence = backend.create_fence(0).unwrap();
        let done = backend.create_fence(0).unwrap();

        let mut slow = recorded(&backend, QueueType::Compute, "produce");
        slow.commands.insert(0, DummyCommand::Delay(Duration::from_millis(30)));
        let consume = recorded(&backend, QueueType::Graphics, "consume");

        backend.queue_wait(QueueType::Graphics, &fence, 1).unwrap();
        backend.execute(QueueType::Graphics, &[&consume]).unwrap();
        backend.queue_signal(QueueType::Graphics, &done, 1).unwrap();
        backend.execute(QueueType::Compute, &[&slow]).unwrap();
        backend.queue_signal(QueueType::Compute, &fence, 1).unwrap();

        assert!(backend.wait_fence(&done, 1, Some(Duration::from_secs(5))).unwrap());
        let log = backend.execution_log();
        assert!(log.marker_position("produce") < log.marker_position("consume"));
    }

    #[test]
    fn test_wait_fence_times_out() {
        let backend = DummyBackend::new().unwrap();
        let fence = backend.create_fence(0).unwrap();
        assert!(!backend.wait_fence(&fence, 1, Some(Duration::from_millis(10))).unwrap());
    }

    #[test]
    fn test_fence_value_never_decreases() {
        let fence = DummyFence::new(5);
        fence.signal(3);
        assert_eq!(fence.value(), 5);
        fence.signal(9);
        assert_eq!(fence.value(), 9);
    }

    #[test]
    fn test_list_state_validation() {
        let backend = DummyBackend::new().unwrap();
        let mut allocator = backend.create_command_allocator(QueueType::Compute).unwrap();
        let mut list = backend.create_command_list(QueueType::Graphics).unwrap();
        assert!(backend.begin_command_list(&mut list, &mut allocator).is_err());
        assert!(backend.close_command_list(&mut list).is_err());

        let list = recorded(&backend, QueueType::Graphics, "x");
        assert!(matches!(
            backend.execute(QueueType::Compute, &[&list]),
            Err(BackendError::SubmissionFailed(_))
        ));
    }

    #[test]
    fn test_drop_interrupts_pending_wait() {
        let backend = DummyBackend::new().unwrap();
        let fence = backend.create_fence(0).unwrap();
        backend.queue_wait(QueueType::Transfer, &fence, 1).unwrap();
        drop(backend);
    }
}
