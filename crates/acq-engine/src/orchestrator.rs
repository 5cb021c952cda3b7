//! Acquisition orchestrator.
//!
//! [`Acquisition`] owns one instance of every action and decides, per
//! request, which of them run:
//!
//! ```text
//!                      ┌─────────────────────────────┐
//!   run(request) ────▶ │ multiple > 1 ?              │──▶ N sequential counter/timer runs
//!                      │ synchronized ?              │──▶ hardware run (hardware half)
//!                      │                             │    + software runs, one per Active edge
//!                      │                             │    + trigger/gate generation
//!                      │ otherwise                   │──▶ 0D run + counter/timer run
//!                      └─────────────────────────────┘
//! ```
//!
//! Controllers taking part in a run are claimed with the orchestrator's
//! [`OperatorId`] and released once no action is running anymore.
//!
//! # Software-triggered acquisition
//!
//! The orchestrator registers a weak [`EdgeRelay`] as listener of the
//! software trigger/gate generators. Each Active edge starts one
//! continuous-software run tagged with the edge index. If the previous run
//! is still in flight the edge is dropped and a warning is logged; dropped
//! edges are counted in [`AcquisitionStats`].

use crate::action::counter_timer::{AcquisitionRun, RunFlavor};
use crate::action::readout::{group_by_controller, raw_read_values};
use crate::action::synch::TriggerGateGeneration;
use crate::action::zerod::ZeroDAcquisition;
use crate::context::{AcquisitionParams, AcquisitionRequest, RunContext};
use crate::partition::{split_configurations, trigger_gate_configuration};
use crate::settings::EngineSettings;
use crate::worker::{TaskHandle, WorkerPool};
use acq_core::channel::{Channel, ChannelKind, TriggerType};
use acq_core::config::AcquisitionConfig;
use acq_core::controller::{Controller, OperatorId};
use acq_core::driver::{EdgeEvent, EdgeKind, EdgeListener};
use acq_core::error::{AcqError, AcqResult};
use acq_core::value::ValueReading;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Counters of the software-triggered path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AcquisitionStats {
    /// Edges delivered by software generators (Active and Passive).
    pub edges_received: u64,
    /// Per-edge runs dispatched.
    pub runs_started: u64,
    /// Active edges skipped because the previous run was still in flight.
    pub edges_dropped: u64,
}

/// What a per-edge software run needs, captured when the synchronized run
/// starts.
struct SoftwareRunTemplate {
    config: Arc<AcquisitionConfig>,
    params: AcquisitionParams,
    ctx: RunContext,
}

struct Inner {
    name: String,
    operator: OperatorId,
    settings: EngineSettings,
    pool: WorkerPool,
    ct: Arc<AcquisitionRun>,
    hw: Arc<AcquisitionRun>,
    sw: Arc<AcquisitionRun>,
    zerod: Arc<ZeroDAcquisition>,
    synch: Arc<TriggerGateGeneration>,
    sw_template: Mutex<Option<SoftwareRunTemplate>>,
    claimed: Mutex<Vec<Arc<Controller>>>,
    sequence: AtomicU64,
    batch: AtomicBool,
    edges_received: AtomicU64,
    runs_started: AtomicU64,
    edges_dropped: AtomicU64,
}

/// Orchestrates counter/timer, 0D and trigger/gate actions.
///
/// Cheap to clone; clones share the same actions.
#[derive(Clone)]
pub struct Acquisition {
    inner: Arc<Inner>,
}

/// Forwards trigger edges to an orchestrator without keeping it alive.
struct EdgeRelay(Weak<Inner>);

impl EdgeListener for EdgeRelay {
    fn edge_received(&self, event: EdgeEvent) {
        if let Some(inner) = self.0.upgrade() {
            Acquisition { inner }.edge_received(event);
        }
    }
}

impl Acquisition {
    /// Orchestrator with a worker pool on the current tokio runtime.
    ///
    /// # Errors
    /// `AcqError::Worker` when called outside a runtime.
    pub fn new(name: impl Into<String>, settings: EngineSettings) -> AcqResult<Self> {
        let pool = WorkerPool::new(settings.max_workers)?;
        Ok(Self::with_pool(name, settings, pool))
    }

    /// Orchestrator running on `pool`.
    pub fn with_pool(name: impl Into<String>, settings: EngineSettings, pool: WorkerPool) -> Self {
        let ct = AcquisitionRun::new("ct_acquisition", RunFlavor::SINGLE_SHOT);
        let zerod = ZeroDAcquisition::new("zerod_acquisition");
        ct.add_slave(zerod.clone());
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                operator: OperatorId::new(),
                settings,
                pool,
                ct,
                hw: AcquisitionRun::new("cont_hw_acquisition", RunFlavor::CONTINUOUS_HARDWARE),
                sw: AcquisitionRun::new("cont_sw_acquisition", RunFlavor::CONTINUOUS_SOFTWARE),
                zerod,
                synch: TriggerGateGeneration::new("synchronization"),
                sw_template: Mutex::new(None),
                claimed: Mutex::new(Vec::new()),
                sequence: AtomicU64::new(0),
                batch: AtomicBool::new(false),
                edges_received: AtomicU64::new(0),
                runs_started: AtomicU64::new(0),
                edges_dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Operator used to claim controllers.
    pub fn operator(&self) -> OperatorId {
        self.inner.operator
    }

    /// Engine settings.
    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Whether any action of this orchestrator is in flight.
    pub fn is_running(&self) -> bool {
        let inner = &self.inner;
        inner.batch.load(Ordering::Acquire)
            || inner.ct.is_running()
            || inner.hw.is_running()
            || inner.sw.is_running()
            || inner.zerod.is_running()
            || inner.synch.is_running()
    }

    /// Whether a software-synchronized generation is currently dispatching
    /// per-edge runs.
    pub fn is_software_synch_in_progress(&self) -> bool {
        self.inner.sw_template.lock().is_some() && self.inner.synch.is_running()
    }

    /// Counters of the software-triggered path.
    pub fn stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            edges_received: self.inner.edges_received.load(Ordering::Relaxed),
            runs_started: self.inner.runs_started.load(Ordering::Relaxed),
            edges_dropped: self.inner.edges_dropped.load(Ordering::Relaxed),
        }
    }

    // -------------------------------------------------------------------------
    // Elements
    // -------------------------------------------------------------------------

    /// Route a channel to the actions that acquire it.
    ///
    /// Counter/timer channels always go to the single-shot action, and to
    /// the continuous action matching their trigger type.
    ///
    /// # Errors
    /// `AcqError::ActionBusy` while an acquisition runs.
    pub fn add_element(&self, channel: Arc<Channel>) -> AcqResult<()> {
        if self.is_running() {
            return Err(AcqError::ActionBusy(self.name().to_string()));
        }
        let inner = &self.inner;
        match channel.kind() {
            ChannelKind::ZeroD => inner.zerod.add_element(channel),
            ChannelKind::TriggerGate => inner.synch.add_element(channel),
            ChannelKind::CounterTimer => {
                inner.hw.remove_element(channel.name());
                inner.sw.remove_element(channel.name());
                match channel.trigger_type() {
                    TriggerType::Software | TriggerType::Unknown => {
                        inner.sw.add_element(channel.clone())
                    }
                    TriggerType::HardwareTrigger | TriggerType::HardwareGate => {
                        inner.hw.add_element(channel.clone())
                    }
                }
                inner.ct.add_element(channel);
            }
        }
        Ok(())
    }

    /// Remove a channel from every action.
    ///
    /// # Errors
    /// `AcqError::ActionBusy` while an acquisition runs,
    /// `AcqError::UnknownElement` if no action knew the channel.
    pub fn remove_element(&self, name: &str) -> AcqResult<()> {
        if self.is_running() {
            return Err(AcqError::ActionBusy(self.name().to_string()));
        }
        let inner = &self.inner;
        let removed = [
            inner.ct.remove_element(name),
            inner.hw.remove_element(name),
            inner.sw.remove_element(name),
            inner.zerod.remove_element(name),
            inner.synch.remove_element(name),
        ];
        if removed.iter().any(|r| *r) {
            Ok(())
        } else {
            Err(AcqError::UnknownElement(name.to_string()))
        }
    }

    /// Every element known to any action, deduplicated.
    pub fn elements(&self) -> Vec<Arc<Channel>> {
        let inner = &self.inner;
        let mut by_name: IndexMap<String, Arc<Channel>> = IndexMap::new();
        for channel in inner
            .ct
            .elements()
            .into_iter()
            .chain(inner.hw.elements())
            .chain(inner.sw.elements())
            .chain(inner.zerod.elements())
            .chain(inner.synch.elements())
        {
            by_name.entry(channel.name().to_string()).or_insert(channel);
        }
        by_name.into_values().collect()
    }

    /// Controllers owning any element, deduplicated.
    pub fn controllers(&self) -> Vec<Arc<Controller>> {
        let mut by_name: IndexMap<String, Arc<Controller>> = IndexMap::new();
        for channel in self.elements() {
            by_name
                .entry(channel.controller().name().to_string())
                .or_insert_with(|| channel.controller().clone());
        }
        by_name.into_values().collect()
    }

    /// Read the counter/timer and 0D elements without committing anything.
    ///
    /// Controllers are read concurrently unless `serial` is set.
    pub async fn read_value(&self, serial: bool) -> IndexMap<String, ValueReading> {
        let mut channels: IndexMap<String, Arc<Channel>> = IndexMap::new();
        for channel in self
            .inner
            .ct
            .elements()
            .into_iter()
            .chain(self.inner.zerod.elements())
        {
            channels.entry(channel.name().to_string()).or_insert(channel);
        }
        let channels: Vec<Arc<Channel>> = channels.into_values().collect();
        let groups = group_by_controller(&channels);
        raw_read_values(&groups, serial)
            .await
            .into_iter()
            .map(|(channel, reading)| (channel.name().to_string(), reading))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Controller claims
    // -------------------------------------------------------------------------

    fn claim(&self, config: &AcquisitionConfig, extra: &[Arc<Controller>]) -> AcqResult<()> {
        let operator = self.inner.operator;
        let mut newly: Vec<Arc<Controller>> = Vec::new();
        let controllers = config
            .controllers()
            .map(|c| &c.controller)
            .chain(extra.iter());
        for controller in controllers {
            if controller.operator() == Some(operator) {
                continue;
            }
            if let Err(err) = controller.set_operator(operator) {
                for claimed in &newly {
                    claimed.clear_operator(operator);
                }
                return Err(err);
            }
            newly.push(controller.clone());
        }
        self.inner.claimed.lock().extend(newly);
        Ok(())
    }

    fn release_claims(&self) {
        let claimed: Vec<Arc<Controller>> = std::mem::take(&mut *self.inner.claimed.lock());
        for controller in &claimed {
            controller.clear_operator(self.inner.operator);
        }
        if !claimed.is_empty() {
            debug!(controllers = claimed.len(), "Released controllers");
        }
    }

    fn on_sub_action_finished(&self) {
        if !self.is_running() {
            self.release_claims();
        }
    }

    // -------------------------------------------------------------------------
    // Runs
    // -------------------------------------------------------------------------

    /// Start an acquisition.
    ///
    /// Returns once every action of the run has started; the returned handle
    /// waits for completion.
    ///
    /// # Errors
    /// Configuration errors before any hardware call, `ActionBusy` /
    /// `ControllerBusy` on contention, driver errors while starting.
    pub async fn run(&self, request: AcquisitionRequest) -> AcqResult<RunHandle> {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let ctx = RunContext::new(sequence);
        let span = info_span!("acquisition", run_id = %ctx.run_id, seq = sequence);
        self.dispatch(request, ctx).instrument(span).await
    }

    async fn dispatch(&self, request: AcquisitionRequest, ctx: RunContext) -> AcqResult<RunHandle> {
        let params = AcquisitionParams::from_request(&request, &self.inner.settings)?;
        if request.synchronized && request.multiple > 1 {
            return Err(AcqError::Configuration(
                "multiple and synchronized acquisitions are mutually exclusive".to_string(),
            ));
        }
        info!(
            master = ?params.master,
            synchronized = request.synchronized,
            multiple = request.multiple,
            "Acquisition requested"
        );
        if request.multiple > 1 {
            self.run_multiple(request, params, ctx)
        } else if request.synchronized {
            self.run_synchronized(request, params, ctx).await
        } else {
            self.run_single(request, params, ctx).await
        }
    }

    fn handle(&self, ctx: RunContext, tasks: Vec<TaskHandle<AcqResult<()>>>) -> RunHandle {
        RunHandle {
            ctx,
            tasks,
            acquisition: self.clone(),
        }
    }

    fn finisher(&self) -> impl FnOnce() + Send + 'static {
        let this = self.clone();
        move || this.on_sub_action_finished()
    }

    async fn run_single(
        &self,
        request: AcquisitionRequest,
        params: AcquisitionParams,
        ctx: RunContext,
    ) -> AcqResult<RunHandle> {
        let inner = &self.inner;
        let config = request.config.clone();
        let ct_guard = inner.ct.begin()?;
        self.claim(&config, &[])?;

        let mut tasks = Vec::new();
        let zerod_channels: Vec<Arc<Channel>> = config
            .channels()
            .filter(|c| c.enabled && c.channel.kind() == ChannelKind::ZeroD)
            .map(|c| c.channel.clone())
            .collect();
        if !request.inline && !zerod_channels.is_empty() {
            let started = inner.zerod.begin().and_then(|guard| {
                inner.zerod.run(
                    &inner.pool,
                    guard,
                    &zerod_channels,
                    inner.settings.zerod_sleep(),
                    self.finisher(),
                )
            });
            match started {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    drop(ct_guard);
                    self.on_sub_action_finished();
                    return Err(err);
                }
            }
        }

        if request.inline {
            let result = inner.ct.clone().execute(ct_guard, config, params).await;
            self.on_sub_action_finished();
            result?;
            return Ok(self.handle(ctx, tasks));
        }

        match inner
            .ct
            .run(&inner.pool, ct_guard, &config, params, self.finisher())
            .await
        {
            Ok(task) => tasks.push(task),
            Err(err) => {
                inner.zerod.request_stop();
                self.on_sub_action_finished();
                return Err(err);
            }
        }
        Ok(self.handle(ctx, tasks))
    }

    fn run_multiple(
        &self,
        request: AcquisitionRequest,
        params: AcquisitionParams,
        ctx: RunContext,
    ) -> AcqResult<RunHandle> {
        let inner = &self.inner;
        if inner.ct.is_running() {
            return Err(AcqError::ActionBusy(inner.ct.name().to_string()));
        }
        inner
            .batch
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AcqError::ActionBusy(inner.ct.name().to_string()))?;
        if let Err(err) = self.claim(&request.config, &[]) {
            inner.batch.store(false, Ordering::Release);
            return Err(err);
        }

        let this = self.clone();
        let count = request.multiple;
        let config = request.config;
        let task = async move {
            let mut result = Ok(());
            for iteration in 0..count {
                let run = this.inner.ct.clone();
                let outcome = match run.begin() {
                    Ok(guard) => run.execute(guard, config.clone(), params.clone()).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = outcome {
                    warn!(iteration, error = %err, "Multiple acquisition interrupted");
                    result = Err(err);
                    break;
                }
                debug!(iteration, "Acquisition done");
            }
            this.inner.batch.store(false, Ordering::Release);
            this.on_sub_action_finished();
            result
        };
        let task = inner.pool.spawn("multiple_acquisition", task.in_current_span());
        Ok(self.handle(ctx, vec![task]))
    }

    async fn run_synchronized(
        &self,
        request: AcquisitionRequest,
        params: AcquisitionParams,
        ctx: RunContext,
    ) -> AcqResult<RunHandle> {
        let inner = &self.inner;
        let description = params.synch_description(&request)?;
        let params = AcquisitionParams {
            repetitions: description.repetitions,
            ..params
        };
        let config = request.config;
        let tg_groups = trigger_gate_configuration(&config);
        if tg_groups.is_empty() {
            return Err(AcqError::Configuration(
                "synchronized acquisition needs at least one trigger/gate element".to_string(),
            ));
        }
        let split = split_configurations(&config);

        let synch_guard = inner.synch.begin()?;
        let hw_guard = if split.hardware.is_empty() {
            None
        } else {
            Some(inner.hw.begin()?)
        };
        if !split.software.is_empty() && inner.sw.is_running() {
            return Err(AcqError::ActionBusy(inner.sw.name().to_string()));
        }
        let tg_controllers: Vec<Arc<Controller>> =
            tg_groups.iter().map(|g| g.controller.clone()).collect();
        self.claim(&config, &tg_controllers)?;

        for channel in config.channels() {
            if channel.channel.kind() == ChannelKind::CounterTimer {
                channel.channel.clear_value_buffer();
            }
        }

        let mut tasks = Vec::new();
        if let Some(guard) = hw_guard {
            match inner
                .hw
                .run(&inner.pool, guard, &split.hardware, params.clone(), self.finisher())
                .await
            {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    drop(synch_guard);
                    self.on_sub_action_finished();
                    return Err(err);
                }
            }
        }

        if split.software.is_empty() {
            inner.synch.set_listener(None);
        } else {
            *inner.sw_template.lock() = Some(SoftwareRunTemplate {
                config: Arc::new(split.software),
                params,
                ctx,
            });
            let relay: Arc<dyn EdgeListener> = Arc::new(EdgeRelay(Arc::downgrade(&self.inner)));
            inner.synch.set_listener(Some(relay));
        }

        let this = self.clone();
        let on_generation_done = move || {
            *this.inner.sw_template.lock() = None;
            this.on_sub_action_finished();
        };
        match inner
            .synch
            .run(
                &inner.pool,
                synch_guard,
                &tg_groups,
                &description,
                inner.settings.synch_sleep(),
                on_generation_done,
            )
            .await
        {
            Ok(task) => tasks.push(task),
            Err(err) => {
                *inner.sw_template.lock() = None;
                if let Err(stop_err) = inner.hw.stop_action().await {
                    warn!(error = %stop_err, "Unable to stop hardware acquisition");
                }
                self.on_sub_action_finished();
                return Err(err);
            }
        }
        Ok(self.handle(ctx, tasks))
    }

    /// Dispatch a per-edge software run for an Active edge.
    ///
    /// Never blocks: the run is spawned on the worker pool. Edges arriving
    /// while the previous run is in flight are dropped.
    pub fn edge_received(&self, event: EdgeEvent) {
        let inner = &self.inner;
        inner.edges_received.fetch_add(1, Ordering::Relaxed);
        if event.kind != EdgeKind::Active {
            return;
        }
        let idx = event.index;
        let (config, params, ctx) = {
            let template = inner.sw_template.lock();
            match template.as_ref() {
                Some(t) => (t.config.clone(), t.params.with_idx(idx), t.ctx),
                None => {
                    debug!(idx, "Edge received without software acquisition");
                    return;
                }
            }
        };
        let guard = match inner.sw.begin() {
            Ok(guard) => guard,
            Err(_) => {
                inner.edges_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(idx, "Skipping trigger: software acquisition is still in progress");
                return;
            }
        };
        inner.runs_started.fetch_add(1, Ordering::Relaxed);

        let this = self.clone();
        let span = info_span!("acquisition", run_id = %ctx.run_id, seq = ctx.sequence, idx);
        let task = async move {
            let result = this.inner.sw.clone().execute(guard, config, params).await;
            if let Err(err) = &result {
                warn!(idx, error = %err, "Software triggered acquisition failed");
            }
            this.on_sub_action_finished();
            result
        };
        // detached; completion is observed through is_running()
        let _ = inner.pool.spawn_unbounded("cont_sw_acquisition", task.instrument(span));
    }

    // -------------------------------------------------------------------------
    // Stop / abort
    // -------------------------------------------------------------------------

    /// Stop every running action. Every action is asked; the first failure
    /// is returned.
    pub async fn stop(&self) -> AcqResult<()> {
        self.halt(false).await
    }

    /// Abort every running action.
    pub async fn abort(&self) -> AcqResult<()> {
        self.halt(true).await
    }

    async fn halt(&self, abort: bool) -> AcqResult<()> {
        let inner = &self.inner;
        inner.zerod.request_stop();
        let results = if abort {
            [
                inner.synch.abort_action().await,
                inner.hw.abort_action().await,
                inner.sw.abort_action().await,
                inner.ct.abort_action().await,
            ]
        } else {
            [
                inner.synch.stop_action().await,
                inner.hw.stop_action().await,
                inner.sw.stop_action().await,
                inner.ct.stop_action().await,
            ]
        };
        info!(abort, "Acquisition halted");
        results.into_iter().collect::<AcqResult<Vec<()>>>().map(|_| ())
    }
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("name", &self.inner.name)
            .field("operator", &self.inner.operator)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Handle to a started acquisition.
#[derive(Debug)]
pub struct RunHandle {
    ctx: RunContext,
    tasks: Vec<TaskHandle<AcqResult<()>>>,
    acquisition: Acquisition,
}

impl RunHandle {
    /// Id of the run.
    pub fn run_id(&self) -> Uuid {
        self.ctx.run_id
    }

    /// Per-run context.
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Whether the orchestrator is still busy.
    pub fn is_running(&self) -> bool {
        self.acquisition.is_running()
    }

    /// Wait until every action of the orchestrator is idle.
    ///
    /// # Errors
    /// The first error returned by a task of this run.
    pub async fn wait(self) -> AcqResult<()> {
        let mut first_error = None;
        for task in self.tasks {
            match task.join().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) | Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        let poll = self.acquisition.settings().acq_sleep();
        while self.acquisition.is_running() {
            tokio::time::sleep(poll).await;
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
