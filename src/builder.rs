//! Assembling a [`LeakWatcher`]
//!
//! Every collaborator can be set explicitly; whatever is left unset comes from
//! a [`BuilderDefaults`] implementation. [`NoopDefaults`] (the default) makes a
//! watcher that tracks keys but never captures anything. [`PlatformDefaults`]
//! wires up the full stack from a [`WatchConfig`].

use crate::analyzer::{HeapSnapshotAnalyzer, LeakAnalyzer};
use crate::capture::{HeapSnapshotCapture, NoopSnapshotCapture, SnapshotCapture, SnapshotDirectory};
use crate::config::{AnalysisMode, WatchConfig};
use crate::debugger::{DebuggerControl, NoDebugger, ProcStatusDebuggerControl};
use crate::error::{LeakWatchError, Result};
use crate::exclusion::ExclusionPolicy;
use crate::executor::{IdleWatchExecutor, MainLoop, MainLoopHandle, NoopWatchExecutor, WatchExecutor};
use crate::gc::{DefaultGcTrigger, GcTrigger, NoopGcTrigger};
use crate::handoff::{
    is_in_analyzer_process, DiscardSnapshotListener, ProcessAnalysisListener,
    ResultHandlerRegistry, SnapshotListener, ThreadAnalysisListener,
};
use crate::watcher::{LeakWatcher, ReferenceQueue, WatcherParts};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Name of the main loop thread spawned when no loop is supplied
pub const MAIN_LOOP_THREAD_NAME: &str = "LeakWatch-Main";

/// Supplies collaborators the builder was not given explicitly
pub trait BuilderDefaults: Send + Sync {
    fn is_disabled(&self) -> bool {
        false
    }

    /// Primary loop the idle executor waits on
    fn main_loop(&self) -> Result<MainLoopHandle> {
        Ok(MainLoop::spawn(MAIN_LOOP_THREAD_NAME)?)
    }

    fn watch_executor(&self) -> Result<Arc<dyn WatchExecutor>>;

    /// `max_stored` is set when the builder overrode the snapshot limit
    fn snapshot_capture(
        &self,
        queue: &Arc<ReferenceQueue>,
        max_stored: Option<usize>,
    ) -> Result<Arc<dyn SnapshotCapture>>;

    fn gc_trigger(&self) -> Arc<dyn GcTrigger>;

    fn debugger_control(&self) -> Arc<dyn DebuggerControl>;

    fn snapshot_listener(&self) -> Result<Arc<dyn SnapshotListener>>;

    fn exclusion_policy(&self) -> Result<ExclusionPolicy>;
}

/// Everything no-op
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDefaults;

impl BuilderDefaults for NoopDefaults {
    fn watch_executor(&self) -> Result<Arc<dyn WatchExecutor>> {
        Ok(Arc::new(NoopWatchExecutor))
    }

    fn snapshot_capture(
        &self,
        _queue: &Arc<ReferenceQueue>,
        _max_stored: Option<usize>,
    ) -> Result<Arc<dyn SnapshotCapture>> {
        Ok(Arc::new(NoopSnapshotCapture))
    }

    fn gc_trigger(&self) -> Arc<dyn GcTrigger> {
        Arc::new(NoopGcTrigger)
    }

    fn debugger_control(&self) -> Arc<dyn DebuggerControl> {
        Arc::new(NoDebugger)
    }

    fn snapshot_listener(&self) -> Result<Arc<dyn SnapshotListener>> {
        Ok(Arc::new(DiscardSnapshotListener))
    }

    fn exclusion_policy(&self) -> Result<ExclusionPolicy> {
        Ok(ExclusionPolicy::default())
    }
}

/// Full stack driven by a [`WatchConfig`]
pub struct PlatformDefaults {
    config: WatchConfig,
    registry: ResultHandlerRegistry,
    analyzer: Arc<dyn LeakAnalyzer>,
    main_loop: Option<MainLoopHandle>,
}

impl PlatformDefaults {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            registry: ResultHandlerRegistry::with_builtins(),
            analyzer: Arc::new(HeapSnapshotAnalyzer),
            main_loop: None,
        }
    }

    /// Handlers the in-process analysis worker can deliver to
    pub fn result_handlers(mut self, registry: ResultHandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn analyzer(mut self, analyzer: Arc<dyn LeakAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Wait for idleness of an existing loop instead of spawning one
    pub fn with_main_loop(mut self, handle: MainLoopHandle) -> Self {
        self.main_loop = Some(handle);
        self
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }
}

impl BuilderDefaults for PlatformDefaults {
    fn is_disabled(&self) -> bool {
        !self.config.enabled || is_in_analyzer_process()
    }

    fn main_loop(&self) -> Result<MainLoopHandle> {
        match &self.main_loop {
            Some(handle) => Ok(handle.clone()),
            None => Ok(MainLoop::spawn(MAIN_LOOP_THREAD_NAME)?),
        }
    }

    fn watch_executor(&self) -> Result<Arc<dyn WatchExecutor>> {
        let executor = IdleWatchExecutor::new(self.main_loop()?, self.config.watch_delay)?;
        Ok(Arc::new(executor))
    }

    fn snapshot_capture(
        &self,
        queue: &Arc<ReferenceQueue>,
        max_stored: Option<usize>,
    ) -> Result<Arc<dyn SnapshotCapture>> {
        let directory = SnapshotDirectory::new(
            self.config.snapshot_dir(),
            max_stored.unwrap_or(self.config.max_stored_snapshots),
        )?;
        debug!("Snapshots go to {}", directory.path().display());
        Ok(Arc::new(HeapSnapshotCapture::new(directory, queue.clone())))
    }

    fn gc_trigger(&self) -> Arc<dyn GcTrigger> {
        Arc::new(DefaultGcTrigger::new())
    }

    fn debugger_control(&self) -> Arc<dyn DebuggerControl> {
        Arc::new(ProcStatusDebuggerControl)
    }

    fn snapshot_listener(&self) -> Result<Arc<dyn SnapshotListener>> {
        let handler = self.config.result_handler.as_str();
        match self.config.analysis_mode {
            AnalysisMode::Thread => Ok(Arc::new(ThreadAnalysisListener::new(
                handler,
                self.registry.clone(),
                self.analyzer.clone(),
            )?)),
            AnalysisMode::Process => {
                let program = match &self.config.worker_program {
                    Some(program) => program.clone(),
                    None => std::env::current_exe().map_err(|e| {
                        LeakWatchError::WorkerUnavailable(format!(
                            "cannot locate current executable: {}",
                            e
                        ))
                    })?,
                };
                Ok(Arc::new(ProcessAnalysisListener::leakwatch_binary(
                    program, handler,
                )?))
            }
        }
    }

    fn exclusion_policy(&self) -> Result<ExclusionPolicy> {
        self.config.exclusion_policy()
    }
}

/// Builder for [`LeakWatcher`]
/// Executor setting; `watch_executor` and `watch_delay` replace each other
enum ExecutorChoice {
    Explicit(Arc<dyn WatchExecutor>),
    IdleWithDelay(Duration),
}

/// Capture setting; `snapshot_capture` and `max_stored_snapshots` replace
/// each other
enum CaptureChoice {
    Explicit(Arc<dyn SnapshotCapture>),
    DefaultWithLimit(usize),
}

pub struct LeakWatcherBuilder {
    defaults: Box<dyn BuilderDefaults>,
    queue: Arc<ReferenceQueue>,
    disabled: bool,
    executor: Option<ExecutorChoice>,
    capture: Option<CaptureChoice>,
    gc: Option<Arc<dyn GcTrigger>>,
    debugger: Option<Arc<dyn DebuggerControl>>,
    listener: Option<Arc<dyn SnapshotListener>>,
    exclusion_policy: Option<ExclusionPolicy>,
}

impl Default for LeakWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LeakWatcherBuilder {
    pub fn new() -> Self {
        Self {
            defaults: Box::new(NoopDefaults),
            queue: Arc::new(ReferenceQueue::new()),
            disabled: false,
            executor: None,
            capture: None,
            gc: None,
            debugger: None,
            listener: None,
            exclusion_policy: None,
        }
    }

    /// Builder with [`PlatformDefaults`] for `config`
    pub fn from_config(config: WatchConfig) -> Self {
        Self::new().platform_defaults(config)
    }

    pub fn defaults<D>(mut self, defaults: D) -> Self
    where
        D: BuilderDefaults + 'static,
    {
        self.defaults = Box::new(defaults);
        self
    }

    pub fn platform_defaults(self, config: WatchConfig) -> Self {
        self.defaults(PlatformDefaults::new(config))
    }

    /// Queue the watcher registers probes with. Custom captures that want to
    /// describe the watched objects should read from this queue.
    pub fn reference_queue(&self) -> Arc<ReferenceQueue> {
        self.queue.clone()
    }

    pub fn snapshot_capture<C>(mut self, capture: C) -> Self
    where
        C: SnapshotCapture + 'static,
    {
        self.capture = Some(CaptureChoice::Explicit(Arc::new(capture)));
        self
    }

    pub fn gc_trigger<G>(mut self, gc: G) -> Self
    where
        G: GcTrigger + 'static,
    {
        self.gc = Some(Arc::new(gc));
        self
    }

    pub fn debugger_control<D>(mut self, debugger: D) -> Self
    where
        D: DebuggerControl + 'static,
    {
        self.debugger = Some(Arc::new(debugger));
        self
    }

    pub fn exclusion_policy(mut self, policy: ExclusionPolicy) -> Self {
        self.exclusion_policy = Some(policy);
        self
    }

    pub fn watch_executor<E>(mut self, executor: E) -> Self
    where
        E: WatchExecutor + 'static,
    {
        self.executor = Some(ExecutorChoice::Explicit(Arc::new(executor)));
        self
    }

    pub fn snapshot_listener<L>(mut self, listener: L) -> Self
    where
        L: SnapshotListener + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Replace the executor with an idle executor using this initial delay.
    /// Overrides an earlier `watch_executor` call and is overridden by a
    /// later one.
    pub fn watch_delay(mut self, delay: Duration) -> Self {
        self.executor = Some(ExecutorChoice::IdleWithDelay(delay));
        self
    }

    /// Replace the capture with the default one keeping at most `max_stored`
    /// snapshots. Overrides an earlier `snapshot_capture` call and is
    /// overridden by a later one.
    pub fn max_stored_snapshots(mut self, max_stored: usize) -> Self {
        self.capture = Some(CaptureChoice::DefaultWithLimit(max_stored));
        self
    }

    /// A disabled builder returns the disabled watcher without looking at
    /// any other setting.
    pub fn build(self) -> Result<LeakWatcher> {
        if self.disabled || self.defaults.is_disabled() {
            info!("Leak watcher disabled");
            return Ok(LeakWatcher::disabled());
        }

        let defaults = self.defaults.as_ref();
        let executor: Arc<dyn WatchExecutor> = match self.executor {
            Some(ExecutorChoice::Explicit(executor)) => executor,
            Some(ExecutorChoice::IdleWithDelay(delay)) => {
                if delay.is_zero() {
                    return Err(LeakWatchError::InvalidArgument(
                        "watch_delay must be greater than zero".to_string(),
                    ));
                }
                Arc::new(IdleWatchExecutor::new(defaults.main_loop()?, delay)?)
            }
            None => defaults.watch_executor()?,
        };
        let capture = match self.capture {
            Some(CaptureChoice::Explicit(capture)) => capture,
            Some(CaptureChoice::DefaultWithLimit(0)) => {
                return Err(LeakWatchError::InvalidArgument(
                    "max_stored_snapshots must be at least 1".to_string(),
                ));
            }
            Some(CaptureChoice::DefaultWithLimit(max_stored)) => {
                defaults.snapshot_capture(&self.queue, Some(max_stored))?
            }
            None => defaults.snapshot_capture(&self.queue, None)?,
        };
        let listener = match self.listener {
            Some(listener) => listener,
            None => defaults.snapshot_listener()?,
        };
        let exclusion_policy = match self.exclusion_policy {
            Some(policy) => {
                policy.validate()?;
                policy
            }
            None => defaults.exclusion_policy()?,
        };

        let watcher = LeakWatcher::from_parts(WatcherParts {
            queue: self.queue,
            executor,
            capture,
            gc: self.gc.unwrap_or_else(|| defaults.gc_trigger()),
            debugger: self.debugger.unwrap_or_else(|| defaults.debugger_control()),
            listener,
            exclusion_policy,
        });
        info!(
            exclusions = watcher.exclusion_policy().map_or(0, |p| p.rules().len()),
            "Leak watcher ready"
        );
        Ok(watcher)
    }
}
