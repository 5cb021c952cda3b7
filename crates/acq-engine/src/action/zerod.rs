//! 0D acquisition.
//!
//! 0D channels have no notion of integration time: they are read over and
//! over while the counter/timer acquisition they accompany runs, and each
//! sample is folded into the channel's accumulated value. The loop ends when
//! the action is stopped, usually by the counter/timer action it is a slave
//! of.

use super::readout::{group_by_controller, raw_read_state_info, raw_read_values, ControllerChannels};
use super::{mark_operations, ActionCore, ActionPhase, ActiveGuard, SlaveAction};
use crate::worker::{TaskHandle, WorkerPool};
use acq_core::channel::{Channel, ChannelKind};
use acq_core::error::AcqResult;
use acq_core::state::{ChannelState, Propagate};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, Instrument};

/// Free-running 0D acquisition action.
pub struct ZeroDAcquisition {
    core: Arc<ActionCore>,
    stop_requested: AtomicBool,
    wake: Notify,
    active: Mutex<Vec<ControllerChannels>>,
}

impl ZeroDAcquisition {
    /// Idle action.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            core: ActionCore::new(name),
            stop_requested: AtomicBool::new(false),
            wake: Notify::new(),
            active: Mutex::new(Vec::new()),
        })
    }

    /// Name.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Shared action state.
    pub fn core(&self) -> &Arc<ActionCore> {
        &self.core
    }

    /// Whether the action is busy.
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// Track a channel.
    pub fn add_element(&self, channel: Arc<Channel>) {
        self.core.add_element(channel);
    }

    /// Stop tracking `name`; returns whether it was known.
    pub fn remove_element(&self, name: &str) -> bool {
        self.core.remove_element(name)
    }

    /// Tracked channels.
    pub fn elements(&self) -> Vec<Arc<Channel>> {
        self.core.elements()
    }

    /// Mark the action busy.
    pub fn begin(&self) -> AcqResult<ActiveGuard> {
        self.core.try_begin()
    }

    /// Clear buffers and mark the 0D channels among `channels` as moving.
    pub fn start_action(&self, channels: &[Arc<Channel>]) -> AcqResult<()> {
        let channels: Vec<Arc<Channel>> = channels
            .iter()
            .filter(|c| c.kind() == ChannelKind::ZeroD)
            .cloned()
            .collect();
        self.stop_requested.store(false, Ordering::Release);
        mark_operations(&channels, self.name())?;
        for channel in &channels {
            channel.clear_value_buffer();
            channel.set_state(ChannelState::Moving, Propagate::Priority);
        }
        *self.active.lock() = group_by_controller(&channels);
        self.core.set_phase(ActionPhase::Acquiring);
        info!(action = %self.name(), channels = channels.len(), "0D acquisition started");
        Ok(())
    }

    /// Read and accumulate every `sleep` until stopped.
    pub async fn action_loop(&self, sleep: Duration) -> AcqResult<()> {
        let groups = self.active.lock().clone();
        let mut reads: u64 = 0;
        loop {
            for (channel, reading) in raw_read_values(&groups, false).await {
                channel.put_current_value(reading, Propagate::Changed);
            }
            reads += 1;
            if self.stop_requested.load(Ordering::Acquire) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.wake.notified() => {}
            }
        }

        self.core.set_phase(ActionPhase::Finishing);
        for (channel, state) in raw_read_state_info(&groups).await {
            channel.set_state_info(state, Propagate::None);
            channel.clear_operation();
            channel.set_state_info(channel.translated_state_info(), Propagate::Priority);
        }
        self.active.lock().clear();
        debug!(action = %self.name(), reads, "0D acquisition finished");
        Ok(())
    }

    /// Start on the current task, then read outside the pool bound: the
    /// loop only ends when its master asks it to.
    pub fn run<F>(
        self: &Arc<Self>,
        pool: &WorkerPool,
        guard: ActiveGuard,
        channels: &[Arc<Channel>],
        sleep: Duration,
        on_finish: F,
    ) -> AcqResult<TaskHandle<AcqResult<()>>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.start_action(channels)?;
        let action = self.clone();
        let task = async move {
            let result = action.action_loop(sleep).await;
            drop(guard);
            on_finish();
            result
        };
        Ok(pool.spawn_unbounded(self.name(), task.in_current_span()))
    }

    /// Ask the loop to finish after its current read.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}

#[async_trait]
impl SlaveAction for ZeroDAcquisition {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn is_running(&self) -> bool {
        self.core.is_running()
    }

    async fn stop_action(&self) -> AcqResult<()> {
        self.request_stop();
        Ok(())
    }
}

impl std::fmt::Debug for ZeroDAcquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroDAcquisition")
            .field("core", &self.core)
            .field("stop_requested", &self.stop_requested.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::NullDriver;
    use acq_core::controller::Controller;
    use acq_core::driver::ControllerCapabilities;

    fn zerod_channels() -> Vec<Arc<Channel>> {
        let ctrl = Arc::new(Controller::new(
            "zerodctrl",
            Arc::new(NullDriver::new(ControllerCapabilities::zero_d())),
        ));
        (1..=2)
            .map(|axis| {
                Arc::new(Channel::new(
                    format!("zerod{}", axis),
                    axis,
                    ChannelKind::ZeroD,
                    ctrl.clone(),
                ))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_runs_until_stopped() {
        let pool = WorkerPool::new(2).unwrap();
        let action = ZeroDAcquisition::new("zerod");
        let channels = zerod_channels();

        let guard = action.begin().unwrap();
        let task = action
            .run(&pool, guard, &channels, Duration::from_millis(5), || {})
            .unwrap();
        assert!(channels.iter().all(|c| c.state() == ChannelState::Moving));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(action.is_running());
        SlaveAction::stop_action(action.as_ref()).await.unwrap();
        task.join().await.unwrap().unwrap();

        assert!(!action.is_running());
        for channel in &channels {
            assert_eq!(channel.state(), ChannelState::On);
            assert!(channel.operation().is_none());
        }
    }

    #[test]
    fn test_start_ignores_other_kinds() {
        let action = ZeroDAcquisition::new("zerod");
        let ct = crate::testing::ct_controller("ct", &["ct1"]);
        let ct1 = ct.channels["ct1"].channel.clone();
        action.start_action(&[ct1.clone()]).unwrap();
        assert!(ct1.operation().is_none());
    }
}
