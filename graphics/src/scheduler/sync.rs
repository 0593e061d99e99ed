//! Queue and fence synchronization.
//!
//! [`QueueSync`] owns one timeline fence per queue together with the last
//! value signalled on it. Cross-queue ordering is expressed as GPU-side waits
//! on another queue's fence; the CPU only blocks in
//! [`QueueSync::wait_on_cpu`] and [`QueueSync::wait_all`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use strata_core::profile_function;

use crate::backend::GpuBackend;
use crate::error::SyncError;
use crate::types::{PerQueue, QueueType};

/// Per-queue fences and signal counters.
pub struct QueueSync<B: GpuBackend> {
    backend: Arc<B>,
    fences: PerQueue<B::Fence>,
    last_signaled: PerQueue<u64>,
    timeout: Option<Duration>,
    terminated: bool,
}

impl<B: GpuBackend> QueueSync<B> {
    /// Create a fence for every queue, starting at zero.
    ///
    /// `timeout` bounds every CPU wait; `None` waits forever.
    pub fn new(backend: Arc<B>, timeout: Option<Duration>) -> Result<Self, SyncError> {
        let fences = PerQueue([
            backend.create_fence(0)?,
            backend.create_fence(0)?,
            backend.create_fence(0)?,
        ]);
        Ok(Self {
            backend,
            fences,
            last_signaled: PerQueue::default(),
            timeout,
            terminated: false,
        })
    }

    /// Signal `queue`'s fence to `value` after its submitted work.
    pub fn signal(&mut self, queue: QueueType, value: u64) -> Result<(), SyncError> {
        if self.terminated {
            return Err(SyncError::Terminated);
        }
        let last = self.last_signaled[queue];
        if value <= last {
            return Err(SyncError::NonMonotonicSignal { queue, value, last });
        }
        self.backend.queue_signal(queue, &self.fences[queue], value)?;
        self.last_signaled[queue] = value;
        log::trace!("QueueSync: {queue} signal {value}");
        Ok(())
    }

    /// Signal the next value on `queue` and return it.
    pub fn signal_next(&mut self, queue: QueueType) -> Result<u64, SyncError> {
        let value = self.last_signaled[queue].saturating_add(1);
        self.signal(queue, value)?;
        Ok(value)
    }

    /// Make `waiting_queue` wait on the GPU until `signal_queue` reaches
    /// `value`.
    pub fn wait_on_queue_gpu(
        &self,
        signal_queue: QueueType,
        value: u64,
        waiting_queue: QueueType,
    ) -> Result<(), SyncError> {
        if self.terminated {
            return Err(SyncError::Terminated);
        }
        if signal_queue == waiting_queue {
            return Err(SyncError::SelfWait(signal_queue));
        }
        log::trace!("QueueSync: {waiting_queue} waits for {signal_queue} {value}");
        self.backend
            .queue_wait(waiting_queue, &self.fences[signal_queue], value)?;
        Ok(())
    }

    /// Block the CPU until every queue in `waits` reaches its value.
    ///
    /// Waits already satisfied are skipped; a single remaining wait uses a
    /// single-fence wait and several use one joint wait.
    pub fn wait_on_cpu(&self, waits: &HashMap<QueueType, u64>) -> Result<(), SyncError> {
        profile_function!();

        let pending: Vec<(&B::Fence, u64)> = QueueType::ALL
            .into_iter()
            .filter_map(|queue| waits.get(&queue).map(|&value| (queue, value)))
            .filter(|&(queue, value)| self.completed_value(queue) < value)
            .map(|(queue, value)| (&self.fences[queue], value))
            .collect();

        let reached = match pending.as_slice() {
            [] => return Ok(()),
            [(fence, value)] => self.backend.wait_fence(fence, *value, self.timeout)?,
            _ => self.backend.wait_fences(&pending, self.timeout)?,
        };
        if reached {
            Ok(())
        } else {
            log::warn!("QueueSync: CPU wait timed out on {} fences", pending.len());
            Err(SyncError::Timeout)
        }
    }

    /// Drain every queue and shut synchronization down.
    ///
    /// Each queue signals `u64::MAX` once its outstanding work completes and
    /// the CPU waits for all of them. Further signals fail with
    /// [`SyncError::Terminated`].
    pub fn wait_all(&mut self) -> Result<(), SyncError> {
        if self.terminated {
            return Ok(());
        }
        for queue in QueueType::ALL {
            self.signal(queue, u64::MAX)?;
        }
        let waits: HashMap<QueueType, u64> =
            QueueType::ALL.into_iter().map(|queue| (queue, u64::MAX)).collect();
        self.wait_on_cpu(&waits)?;
        self.terminated = true;
        log::debug!("QueueSync: all queues drained");
        Ok(())
    }

    /// Value the GPU has completed on `queue`.
    pub fn completed_value(&self, queue: QueueType) -> u64 {
        self.backend.fence_completed_value(&self.fences[queue])
    }

    /// Last value signalled on `queue`.
    pub fn last_signaled(&self, queue: QueueType) -> u64 {
        self.last_signaled[queue]
    }

    /// Fence backing `queue`.
    pub fn fence(&self, queue: QueueType) -> &B::Fence {
        &self.fences[queue]
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<B: GpuBackend> fmt::Debug for QueueSync<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSync")
            .field("last_signaled", &self.last_signaled)
            .field("timeout", &self.timeout)
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    fn sync() -> (Arc<DummyBackend>, QueueSync<DummyBackend>) {
        let backend = Arc::new(DummyBackend::new().unwrap());
        let sync = QueueSync::new(Arc::clone(&backend), Some(Duration::from_secs(5))).unwrap();
        (backend, sync)
    }

    #[test]
    fn test_signal_must_increase() {
        let (_backend, mut sync) = sync();
        sync.signal(QueueType::Graphics, 3).unwrap();
        assert_eq!(
            sync.signal(QueueType::Graphics, 3),
            Err(SyncError::NonMonotonicSignal {
                queue: QueueType::Graphics,
                value: 3,
                last: 3
            })
        );
        sync.signal(QueueType::Compute, 1).unwrap();
        assert_eq!(sync.last_signaled(QueueType::Graphics), 3);
    }

    #[test]
    fn test_signal_next_counts_up() {
        let (_backend, mut sync) = sync();
        assert_eq!(sync.signal_next(QueueType::Transfer).unwrap(), 1);
        assert_eq!(sync.signal_next(QueueType::Transfer).unwrap(), 2);
        assert_eq!(sync.signal_next(QueueType::Graphics).unwrap(), 1);
    }

    #[test]
    fn test_wait_on_own_queue_rejected() {
        let (_backend, sync) = sync();
        assert_eq!(
            sync.wait_on_queue_gpu(QueueType::Compute, 1, QueueType::Compute),
            Err(SyncError::SelfWait(QueueType::Compute))
        );
    }

    #[test]
    fn test_empty_cpu_wait_returns_immediately() {
        let (_backend, sync) = sync();
        sync.wait_on_cpu(&HashMap::new()).unwrap();
    }

    #[test]
    fn test_cpu_wait_single_and_joint() {
        let (_backend, mut sync) = sync();
        let g = sync.signal_next(QueueType::Graphics).unwrap();
        let c = sync.signal_next(QueueType::Compute).unwrap();

        sync.wait_on_cpu(&HashMap::from([(QueueType::Graphics, g)])).unwrap();
        assert!(sync.completed_value(QueueType::Graphics) >= g);

        sync.wait_on_cpu(&HashMap::from([(QueueType::Graphics, g), (QueueType::Compute, c)]))
            .unwrap();
        assert!(sync.completed_value(QueueType::Compute) >= c);
    }

    #[test]
    fn test_cpu_wait_times_out() {
        let backend = Arc::new(DummyBackend::new().unwrap());
        let sync = QueueSync::new(backend, Some(Duration::from_millis(10))).unwrap();
        let waits = HashMap::from([(QueueType::Compute, 1)]);
        assert_eq!(sync.wait_on_cpu(&waits), Err(SyncError::Timeout));
    }

    #[test]
    fn test_gpu_wait_orders_queues() {
        let (_backend, mut sync) = sync();
        let value = sync.signal_next(QueueType::Compute).unwrap();
        sync.wait_on_queue_gpu(QueueType::Compute, value, QueueType::Graphics)
            .unwrap();
        let done = sync.signal_next(QueueType::Graphics).unwrap();
        sync.wait_on_cpu(&HashMap::from([(QueueType::Graphics, done)]))
            .unwrap();
        assert!(sync.completed_value(QueueType::Compute) >= value);
    }

    #[test]
    fn test_wait_all_terminates() {
        let (_backend, mut sync) = sync();
        sync.signal_next(QueueType::Graphics).unwrap();
        sync.wait_all().unwrap();
        assert!(sync.is_terminated());
        assert_eq!(sync.completed_value(QueueType::Transfer), u64::MAX);
        assert_eq!(sync.signal_next(QueueType::Graphics), Err(SyncError::Terminated));
        sync.wait_all().unwrap();
    }
}
