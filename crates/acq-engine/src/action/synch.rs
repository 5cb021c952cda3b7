//! Trigger/gate generation.
//!
//! Programs every trigger/gate element referenced by a synchronized
//! acquisition with the edges it has to produce, starts them and polls them
//! until the last repetition has been generated. Software generators also
//! get the edge listener registered for the duration of the generation.

use super::readout::{any_busy, raw_read_state_info, ControllerChannels};
use super::{clear_operations, mark_operations, ActionCore, ActionPhase, ActiveGuard};
use crate::worker::{TaskHandle, WorkerPool};
use acq_core::channel::Channel;
use acq_core::driver::{EdgeListener, SynchDescription};
use acq_core::error::{AcqError, AcqResult};
use acq_core::state::{ChannelState, Propagate};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Trigger/gate generation action.
pub struct TriggerGateGeneration {
    core: Arc<ActionCore>,
    listener: RwLock<Option<Arc<dyn EdgeListener>>>,
    active: Mutex<Vec<ControllerChannels>>,
}

impl TriggerGateGeneration {
    /// Idle action.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            core: ActionCore::new(name),
            listener: RwLock::new(None),
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

    /// Listener registered on software generators at the next start.
    pub fn set_listener(&self, listener: Option<Arc<dyn EdgeListener>>) {
        *self.listener.write() = listener;
    }

    /// Program and start the trigger/gate elements of `groups`.
    ///
    /// # Errors
    /// `AcqError::DriverRejected` if an element is not ready to start,
    /// `AcqError::Driver` for any other driver failure. Listeners already
    /// registered are removed again.
    pub async fn start_action(
        &self,
        groups: &[ControllerChannels],
        description: &SynchDescription,
    ) -> AcqResult<()> {
        let channels: Vec<Arc<Channel>> = groups
            .iter()
            .flat_map(|g| g.channels.iter().cloned())
            .collect();
        mark_operations(&channels, self.name())?;
        *self.active.lock() = groups.to_vec();

        if let Err(err) = self.start_generators(groups, description).await {
            warn!(action = %self.name(), error = %err, "Start failed");
            self.remove_listeners(groups);
            self.active.lock().clear();
            clear_operations(&channels);
            return Err(err);
        }
        self.core.set_phase(ActionPhase::Acquiring);
        info!(
            action = %self.name(),
            elements = channels.len(),
            repetitions = description.repetitions,
            "Generation started"
        );
        Ok(())
    }

    async fn start_generators(
        &self,
        groups: &[ControllerChannels],
        description: &SynchDescription,
    ) -> AcqResult<()> {
        let listener = self.listener.read().clone();

        for group in groups {
            let driver = group.controller.driver();
            for channel in &group.channels {
                debug!(element = %channel.name(), ?description, "Programming");
                driver.synch_one(channel.axis(), description).await?;
            }
            if let Some(listener) = &listener {
                if group.controller.supports_listener_registration() {
                    driver.add_listener(listener.clone())?;
                }
            }
        }

        for group in groups {
            group.controller.driver().pre_start_all().await?;
        }
        for group in groups {
            let driver = group.controller.driver();
            for channel in &group.channels {
                let axis = channel.axis();
                if !driver.pre_start_one(axis, 0.0).await? {
                    return Err(AcqError::DriverRejected {
                        controller: group.name().to_string(),
                        operation: "PreStartOne",
                        axis,
                    });
                }
                driver.start_one(axis, 0.0).await?;
            }
        }
        for channel in groups.iter().flat_map(|g| g.channels.iter()) {
            channel.set_state(ChannelState::Moving, Propagate::Priority);
        }
        for group in groups {
            group.controller.driver().start_all().await?;
        }
        Ok(())
    }

    fn remove_listeners(&self, groups: &[ControllerChannels]) {
        for group in groups {
            if !group.controller.supports_listener_registration() {
                continue;
            }
            if let Err(err) = group.controller.driver().remove_listeners() {
                warn!(controller = %group.name(), error = %err, "Unable to remove edge listeners");
            }
        }
    }

    /// Poll the elements every `sleep` until none is generating.
    pub async fn action_loop(&self, sleep: Duration) -> AcqResult<()> {
        let groups = self.active.lock().clone();
        loop {
            let states = raw_read_state_info(&groups).await;
            if !any_busy(&states) {
                break;
            }
            tokio::time::sleep(sleep).await;
        }

        self.core.set_phase(ActionPhase::Finishing);
        for (channel, state) in raw_read_state_info(&groups).await {
            channel.set_state_info(state, Propagate::None);
            channel.clear_operation();
            channel.set_state_info(channel.translated_state_info(), Propagate::Priority);
        }
        self.remove_listeners(&groups);
        self.active.lock().clear();
        debug!(action = %self.name(), "Generation finished");
        Ok(())
    }

    /// Start on the current task, then poll on a pool worker.
    pub async fn run<F>(
        self: &Arc<Self>,
        pool: &WorkerPool,
        guard: ActiveGuard,
        groups: &[ControllerChannels],
        description: &SynchDescription,
        sleep: Duration,
        on_finish: F,
    ) -> AcqResult<TaskHandle<AcqResult<()>>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.start_action(groups, description).await?;
        let action = self.clone();
        let task = async move {
            let result = action.action_loop(sleep).await;
            drop(guard);
            on_finish();
            result
        };
        Ok(pool.spawn(self.name(), task.in_current_span()))
    }

    /// Stop every generating element.
    pub async fn stop_action(&self) -> AcqResult<()> {
        self.halt(false).await
    }

    /// Abort every generating element.
    pub async fn abort_action(&self) -> AcqResult<()> {
        self.halt(true).await
    }

    async fn halt(&self, abort: bool) -> AcqResult<()> {
        let groups = self.active.lock().clone();
        let mut first_error = None;
        for group in &groups {
            let driver = group.controller.driver();
            for channel in &group.channels {
                let result = if abort {
                    driver.abort_one(channel.axis()).await
                } else {
                    driver.stop_one(channel.axis()).await
                };
                if let Err(err) = result {
                    warn!(element = %channel.name(), abort, error = %err, "Halt failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for TriggerGateGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerGateGeneration")
            .field("core", &self.core)
            .field("listener", &self.listener.read().is_some())
            .finish()
    }
}
