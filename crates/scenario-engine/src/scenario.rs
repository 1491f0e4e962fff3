//! Scenario controller
//!
//! A [`Scenario`] owns the runtime state of one run: lifecycle state,
//! counters, named events, branch handles, open records, running sensors
//! and the metadata document. Branches are tokio tasks sharing an
//! `Arc<Scenario>`; the runtime sits behind a single mutex that is never
//! held across an await point.
//!
//! ```text
//!   start ──► Running ──pause──► Paused ──resume──► Running
//!                │                  │
//!                └──── stop ────────┴──────────► Stopped
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use sensor_log::{FileLogger, RecordWriter, Scalar, TEXT_EXTENSION};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::ScenarioConfig;
use crate::devices::{merge_config, DeviceData, NullSensorBackend, SensorBackend, SensorDevice};
use crate::engine;
use crate::error::{Result, ScenarioError};
use crate::events::{EventSink, NullEventSink, ScenarioEvent};
use crate::metadata::{now_millis, save_scenario_snapshot, AbortInfo, ScenarioMetadata};
use crate::nodes::frame_id_for_sensor;
use crate::signal::Signal;
use crate::types::{ExecutionPoint, NodeDef, ProfileData, ScenarioDefinition, ScenarioState};

/// Name of the branch started at the entry node
pub const MAIN_BRANCH: &str = "main";

/// File receiving `log_info` messages
pub const ACQUISITION_LOG: &str = "acquisition";

static TEXT_PLACEHOLDER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\$\{txt:(.*?)\}").ok());
static RESOURCE_PLACEHOLDER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\$\{rsr:(.*?)\}").ok());

type PromptAnswer = std::result::Result<i32, String>;

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// The main branch reached its end, or the host stopped the run
    Completed,
    Aborted(AbortInfo),
    Failed(String),
}

impl StopReason {
    /// Completed and aborted runs keep their data directory
    pub fn keeps_data(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// One listener callback
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    /// Sensor timestamp in nanoseconds
    pub timestamp: u64,
    pub values: Vec<f32>,
}

/// Mutable state of a run
struct Runtime {
    state: ScenarioState,
    /// Cancelled on pause and stop; a new one is created on start and resume
    token: CancellationToken,
    current: Option<ExecutionPoint>,
    counters: HashMap<String, i64>,
    events: HashMap<String, Signal>,
    branches: HashMap<String, Signal>,
    metadata: ScenarioMetadata,
    selected_devices: BTreeMap<String, DeviceData>,
    prompts: HashMap<u64, oneshot::Sender<PromptAnswer>>,
    writers: HashMap<String, RecordWriter<FileLogger>>,
    /// Sensor type to the records receiving its samples
    sensor_routes: HashMap<String, Vec<String>>,
    log_info: Option<FileLogger>,
    /// (device role, sensor type)
    running_sensors: HashSet<(String, String)>,
    running_mics: HashSet<String>,
}

impl Runtime {
    fn new(metadata: ScenarioMetadata, selected_devices: BTreeMap<String, DeviceData>) -> Self {
        Self {
            state: ScenarioState::Stopped,
            token: CancellationToken::new(),
            current: None,
            counters: HashMap::new(),
            events: HashMap::new(),
            branches: HashMap::new(),
            metadata,
            selected_devices,
            prompts: HashMap::new(),
            writers: HashMap::new(),
            sensor_routes: HashMap::new(),
            log_info: None,
            running_sensors: HashSet::new(),
            running_mics: HashSet::new(),
        }
    }
}

/// Builder for [`Scenario`]
pub struct ScenarioBuilder {
    definition: ScenarioDefinition,
    data_path: PathBuf,
    profile: ProfileData,
    config: ScenarioConfig,
    available_devices: Vec<SensorDevice>,
    selected_devices: Vec<SensorDevice>,
    event_sink: Arc<dyn EventSink>,
    backend: Arc<dyn SensorBackend>,
}

impl ScenarioBuilder {
    pub fn new(definition: ScenarioDefinition, data_path: impl Into<PathBuf>) -> Self {
        Self {
            definition,
            data_path: data_path.into(),
            profile: ProfileData::default(),
            config: ScenarioConfig::default(),
            available_devices: Vec::new(),
            selected_devices: Vec::new(),
            event_sink: Arc::new(NullEventSink),
            backend: Arc::new(NullSensorBackend),
        }
    }

    pub fn profile(mut self, profile: ProfileData) -> Self {
        self.profile = profile;
        self
    }

    pub fn config(mut self, config: ScenarioConfig) -> Self {
        self.config = config;
        self
    }

    /// Devices `sensor_device_select` chooses from
    pub fn available_devices(mut self, devices: Vec<SensorDevice>) -> Self {
        self.available_devices = devices;
        self
    }

    /// Devices selected before the run, keyed by their device type name
    pub fn selected_devices(mut self, devices: Vec<SensorDevice>) -> Self {
        self.selected_devices = devices;
        self
    }

    pub fn event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn SensorBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn build(self) -> Arc<Scenario> {
        let initial_metadata = ScenarioMetadata::new(&self.definition, &self.profile, &self.config);
        let initial_devices: BTreeMap<String, DeviceData> = self
            .selected_devices
            .into_iter()
            .map(|device| {
                let name = device.sensor_device_type.as_str().to_string();
                (name.clone(), DeviceData::new(name, device))
            })
            .collect();
        let (finished, _) = watch::channel(None);

        Arc::new(Scenario {
            run_id: uuid::Uuid::new_v4().to_string(),
            runtime: Mutex::new(Runtime::new(initial_metadata.clone(), initial_devices.clone())),
            definition: self.definition,
            data_path: self.data_path,
            config: self.config,
            available_devices: self.available_devices,
            initial_devices,
            initial_metadata,
            event_sink: self.event_sink,
            backend: self.backend,
            next_prompt_id: AtomicU64::new(0),
            finished,
        })
    }
}

/// A running (or runnable) scenario
pub struct Scenario {
    run_id: String,
    definition: ScenarioDefinition,
    data_path: PathBuf,
    config: ScenarioConfig,
    available_devices: Vec<SensorDevice>,
    initial_devices: BTreeMap<String, DeviceData>,
    initial_metadata: ScenarioMetadata,
    event_sink: Arc<dyn EventSink>,
    backend: Arc<dyn SensorBackend>,
    runtime: Mutex<Runtime>,
    next_prompt_id: AtomicU64,
    finished: watch::Sender<Option<StopReason>>,
}

impl Scenario {
    pub fn builder(definition: ScenarioDefinition, data_path: impl Into<PathBuf>) -> ScenarioBuilder {
        ScenarioBuilder::new(definition, data_path)
    }

    // --- lifecycle ---

    /// Start the run at the entry node
    ///
    /// Resets counters, events, branches and metadata. Does nothing unless
    /// the scenario is stopped.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let (metadata, token) = {
            let mut rt = self.runtime.lock();
            if rt.state != ScenarioState::Stopped {
                log::debug!("Scenario {} already started", self.run_id);
                return Ok(());
            }
            *rt = Runtime::new(self.initial_metadata.clone(), self.initial_devices.clone());
            rt.metadata.mark_start(now_millis());
            rt.state = ScenarioState::Running;
            (rt.metadata.clone(), rt.token.clone())
        };

        let persisted = std::fs::create_dir_all(&self.data_path)
            .map_err(ScenarioError::from)
            .and_then(|_| metadata.save(&self.data_path))
            .and_then(|_| save_scenario_snapshot(&self.data_path, &self.definition));
        if let Err(e) = persisted {
            self.runtime.lock().state = ScenarioState::Stopped;
            token.cancel();
            return Err(e);
        }

        log::info!(
            "Starting scenario {} (run {}) in {:?}",
            self.definition.scenario_id,
            self.run_id,
            self.data_path
        );
        self.finished.send_replace(None);
        self.emit(ScenarioEvent::State {
            state: ScenarioState::Running,
        });

        let entry = ExecutionPoint::entry(self.definition.scenario_content.entry_node.clone());
        engine::spawn_branch(self, MAIN_BRANCH, entry, token);
        Ok(())
    }

    /// Suspend every branch; the last recorded execution point is kept
    pub fn pause(&self) {
        let metadata = {
            let mut rt = self.runtime.lock();
            if rt.state != ScenarioState::Running {
                return;
            }
            rt.state = ScenarioState::Paused;
            rt.token.cancel();
            rt.metadata.clone()
        };
        if let Err(e) = metadata.save(&self.data_path) {
            log::warn!("Failed to save metadata on pause: {}", e);
        }
        log::info!("Scenario {} paused", self.run_id);
        self.emit(ScenarioEvent::State {
            state: ScenarioState::Paused,
        });
    }

    /// Continue from the last recorded execution point on the main branch
    ///
    /// Other branches are not resumed.
    pub fn resume(self: &Arc<Self>) {
        let (point, token) = {
            let mut rt = self.runtime.lock();
            if rt.state != ScenarioState::Paused {
                return;
            }
            rt.state = ScenarioState::Running;
            rt.token = CancellationToken::new();
            (rt.current.clone(), rt.token.clone())
        };
        log::info!("Scenario {} resumed", self.run_id);
        self.emit(ScenarioEvent::State {
            state: ScenarioState::Running,
        });

        let point = point.unwrap_or_else(|| {
            ExecutionPoint::entry(self.definition.scenario_content.entry_node.clone())
        });
        engine::resume_branch(self, MAIN_BRANCH, point, token);
    }

    /// Stop the run and release its resources
    ///
    /// `error` is `None` for a normal end. Does nothing when already stopped.
    pub async fn stop(&self, error: Option<ScenarioError>) {
        let (metadata, writers, log_info, sensors, mics) = {
            let mut guard = self.runtime.lock();
            let rt = &mut *guard;
            if rt.state == ScenarioState::Stopped {
                return;
            }
            rt.state = ScenarioState::Stopped;
            rt.token.cancel();
            rt.prompts.clear();
            rt.sensor_routes.clear();
            rt.metadata.mark_end(now_millis());

            let sensors: Vec<(DeviceData, String)> = rt
                .running_sensors
                .drain()
                .filter_map(|(device, sensor)| {
                    rt.selected_devices.get(&device).cloned().map(|d| (d, sensor))
                })
                .collect();
            let mics: Vec<DeviceData> = rt
                .running_mics
                .drain()
                .filter_map(|device| rt.selected_devices.get(&device).cloned())
                .collect();
            (
                rt.metadata.clone(),
                std::mem::take(&mut rt.writers),
                rt.log_info.take(),
                sensors,
                mics,
            )
        };

        for (name, mut writer) in writers {
            if let Err(e) = writer.close() {
                log::warn!("Failed to close record '{}': {}", name, e);
            }
        }
        if let Some(mut logger) = log_info {
            if let Err(e) = logger.close() {
                log::warn!("Failed to close {:?}: {}", logger.path(), e);
            }
        }
        for (device, sensor) in sensors {
            match self.backend.stop_listening(&device, &sensor).await {
                Ok(true) => {}
                Ok(false) => log::warn!("Could not stop {} on '{}'", sensor, device.name),
                Err(e) => log::warn!("Could not stop {} on '{}': {}", sensor, device.name, e),
            }
        }
        for device in mics {
            if let Err(e) = self.backend.stop_recording(&device).await {
                log::warn!("Could not stop microphone on '{}': {}", device.name, e);
            }
            self.emit(ScenarioEvent::MicRecording { recording: false });
        }
        if let Err(e) = metadata.save(&self.data_path) {
            log::error!("Failed to save metadata on stop: {}", e);
        }

        let reason = match error {
            None | Some(ScenarioError::Cancelled) => StopReason::Completed,
            Some(ScenarioError::Aborted { reason, message }) => {
                StopReason::Aborted(AbortInfo { reason, message })
            }
            Some(e) => StopReason::Failed(e.to_string()),
        };
        log::info!("Scenario {} stopped: {:?}", self.run_id, reason);

        self.emit(ScenarioEvent::State {
            state: ScenarioState::Stopped,
        });
        self.emit(ScenarioEvent::Finished {
            error: match &reason {
                StopReason::Completed => None,
                StopReason::Aborted(info) => Some(info.reason.clone()),
                StopReason::Failed(message) => Some(message.clone()),
            },
            abort: metadata.abort.clone(),
        });
        self.finished.send_replace(Some(reason));
    }

    /// Wait until the current run stops
    pub async fn finished(&self) -> StopReason {
        let mut rx = self.finished.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).clone().unwrap_or(StopReason::Completed),
            // The sender lives as long as `self`
            Err(_) => StopReason::Completed,
        };
        reason
    }

    pub fn state(&self) -> ScenarioState {
        self.runtime.lock().state
    }

    /// Last node entered by any branch
    pub fn execution_point(&self) -> Option<ExecutionPoint> {
        self.runtime.lock().current.clone()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn definition(&self) -> &ScenarioDefinition {
        &self.definition
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub(crate) fn backend(&self) -> &Arc<dyn SensorBackend> {
        &self.backend
    }

    pub(crate) fn node(&self, node_id: &str) -> Option<&NodeDef> {
        self.definition.scenario_content.nodes.get(node_id)
    }

    pub(crate) fn emit(&self, event: ScenarioEvent) {
        if let Err(e) = self.event_sink.send(event) {
            log::debug!("Dropped scenario event: {}", e);
        }
    }

    /// Record the point a branch is about to execute
    ///
    /// Returns `false` when the branch must not continue.
    pub(crate) fn enter(&self, point: &ExecutionPoint, token: &CancellationToken) -> bool {
        let mut rt = self.runtime.lock();
        rt.current = Some(point.clone());
        !token.is_cancelled() && rt.state == ScenarioState::Running
    }

    // --- prompts ---

    pub(crate) fn open_prompt(&self) -> (u64, oneshot::Receiver<PromptAnswer>) {
        let prompt_id = self.next_prompt_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.runtime.lock().prompts.insert(prompt_id, tx);
        (prompt_id, rx)
    }

    pub(crate) fn discard_prompt(&self, prompt_id: u64) {
        self.runtime.lock().prompts.remove(&prompt_id);
    }

    fn answer_prompt(&self, prompt_id: u64, answer: PromptAnswer) -> bool {
        let tx = self.runtime.lock().prompts.remove(&prompt_id);
        match tx {
            Some(tx) => tx.send(answer).is_ok(),
            None => {
                log::debug!("Prompt {} is not pending", prompt_id);
                false
            }
        }
    }

    /// Answer a prompt; `false` when it is no longer pending
    pub fn resolve_prompt(&self, prompt_id: u64, value: i32) -> bool {
        self.answer_prompt(prompt_id, Ok(value))
    }

    /// Fail a prompt, which stops the run with an error
    pub fn reject_prompt(&self, prompt_id: u64, reason: impl Into<String>) -> bool {
        self.answer_prompt(prompt_id, Err(reason.into()))
    }

    pub fn pending_prompts(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.runtime.lock().prompts.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // --- counters, events, branches ---

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.runtime.lock().counters.get(name).copied()
    }

    pub(crate) fn set_counter(&self, name: &str, value: i64) {
        self.runtime.lock().counters.insert(name.to_string(), value);
    }

    /// Absent counters start at zero
    pub(crate) fn add_to_counter(&self, name: &str, delta: i64) -> i64 {
        let mut rt = self.runtime.lock();
        let counter = rt.counters.entry(name.to_string()).or_insert(0);
        *counter = counter.saturating_add(delta);
        *counter
    }

    /// Create a named event unless it exists
    pub(crate) fn create_event(&self, name: &str) {
        self.runtime
            .lock()
            .events
            .entry(name.to_string())
            .or_default();
    }

    /// Replace a named event by a fresh one
    ///
    /// Branches still waiting on the old event are never woken. Unknown
    /// names are ignored and `false` is returned.
    pub(crate) fn reset_event(&self, name: &str) -> bool {
        match self.runtime.lock().events.get_mut(name) {
            Some(event) => {
                *event = Signal::new();
                true
            }
            None => false,
        }
    }

    /// `false` when the event is unknown or already set
    pub(crate) fn set_event(&self, name: &str) -> bool {
        self.event(name).is_some_and(|event| event.resolve(0))
    }

    pub fn event(&self, name: &str) -> Option<Signal> {
        self.runtime.lock().events.get(name).cloned()
    }

    pub(crate) fn register_branch(&self, name: &str, done: Signal) {
        let previous = self.runtime.lock().branches.insert(name.to_string(), done);
        if previous.is_some_and(|p| !p.is_resolved()) {
            log::warn!("Branch '{}' forked again while still running", name);
        }
    }

    /// Completion handle of a forked branch
    pub fn branch(&self, name: &str) -> Option<Signal> {
        self.runtime.lock().branches.get(name).cloned()
    }

    // --- metadata ---

    /// Snapshot of the metadata document
    pub fn metadata(&self) -> ScenarioMetadata {
        self.runtime.lock().metadata.clone()
    }

    pub(crate) fn update_metadata<R>(&self, f: impl FnOnce(&mut ScenarioMetadata) -> R) -> R {
        f(&mut self.runtime.lock().metadata)
    }

    pub fn save_metadata(&self) -> Result<()> {
        self.metadata().save(&self.data_path)
    }

    /// Replace `${txt:key}` and `${rsr:key}` placeholders
    ///
    /// Unknown keys are left as written.
    pub fn formatted_text(&self, text: &str) -> String {
        let content = &self.definition.scenario_content;
        let text = substitute((*TEXT_PLACEHOLDER).as_ref(), text, &content.texts);
        substitute((*RESOURCE_PLACEHOLDER).as_ref(), &text, &content.resources)
    }

    // --- devices ---

    pub fn available_devices(&self) -> &[SensorDevice] {
        &self.available_devices
    }

    pub fn selected_devices(&self) -> Vec<DeviceData> {
        self.runtime.lock().selected_devices.values().cloned().collect()
    }

    /// Selected devices with the given roles, or all of them
    pub(crate) fn devices_for(&self, names: Option<&[String]>) -> Vec<DeviceData> {
        self.runtime
            .lock()
            .selected_devices
            .values()
            .filter(|device| names.map_or(true, |names| names.contains(&device.name)))
            .cloned()
            .collect()
    }

    pub(crate) fn select_device(&self, device: DeviceData) {
        self.runtime
            .lock()
            .selected_devices
            .insert(device.name.clone(), device);
    }

    /// Merge into the config of each targeted device and mirror it into the metadata
    pub(crate) fn merge_device_config(&self, names: Option<&[String]>, values: &Map<String, Value>) {
        let mut guard = self.runtime.lock();
        let rt = &mut *guard;
        for device in rt.selected_devices.values_mut() {
            if names.is_some_and(|names| !names.contains(&device.name)) {
                continue;
            }
            merge_config(&mut device.config, values);
            rt.metadata.merge_device_config(&device.name, values);
        }
    }

    pub(crate) fn is_sensor_running(&self, device: &str, sensor: &str) -> bool {
        self.runtime
            .lock()
            .running_sensors
            .contains(&(device.to_string(), sensor.to_string()))
    }

    pub(crate) fn sensor_started(&self, device: &str, sensor: &str) {
        self.runtime
            .lock()
            .running_sensors
            .insert((device.to_string(), sensor.to_string()));
    }

    pub(crate) fn sensor_stopped(&self, device: &str, sensor: &str) {
        self.runtime
            .lock()
            .running_sensors
            .remove(&(device.to_string(), sensor.to_string()));
    }

    pub(crate) fn is_mic_running(&self, device: &str) -> bool {
        self.runtime.lock().running_mics.contains(device)
    }

    pub(crate) fn mic_started(&self, device: &str) {
        self.runtime.lock().running_mics.insert(device.to_string());
    }

    /// `true` when the microphone was running
    pub(crate) fn mic_stopped(&self, device: &str) -> bool {
        self.runtime.lock().running_mics.remove(device)
    }

    // --- records ---

    pub(crate) fn has_writer(&self, name: &str) -> bool {
        self.runtime.lock().writers.contains_key(name)
    }

    /// Register a record and route the sensors' samples to it
    pub(crate) fn add_writer(&self, name: &str, writer: RecordWriter<FileLogger>, sensors: &[String]) {
        let mut guard = self.runtime.lock();
        let rt = &mut *guard;
        if let Some(mut previous) = rt.writers.insert(name.to_string(), writer) {
            if let Err(e) = previous.close() {
                log::warn!("Failed to close replaced record '{}': {}", name, e);
            }
        }
        for sensor in sensors {
            let routes = rt.sensor_routes.entry(sensor.clone()).or_default();
            if !routes.iter().any(|r| r == name) {
                routes.push(name.to_string());
            }
        }
    }

    /// Close a record and remove its routes; `false` when it was not open
    pub(crate) fn close_writer(&self, name: &str) -> Result<bool> {
        let writer = {
            let mut guard = self.runtime.lock();
            let rt = &mut *guard;
            for routes in rt.sensor_routes.values_mut() {
                routes.retain(|r| r != name);
            }
            rt.writers.remove(name)
        };
        match writer {
            Some(mut writer) => {
                writer.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn set_writer_paused(&self, name: &str, paused: bool) -> bool {
        match self.runtime.lock().writers.get_mut(name) {
            Some(writer) => {
                writer.set_paused(paused);
                true
            }
            None => false,
        }
    }

    /// Append a line to the acquisition log, creating it on first use
    pub(crate) fn write_log_info(&self, message: &str) -> Result<()> {
        let mut rt = self.runtime.lock();
        let logger = rt.log_info.get_or_insert_with(|| {
            FileLogger::new(&self.data_path, ACQUISITION_LOG, TEXT_EXTENSION)
                .with_buffer_count(self.config.logger_buffer_count)
        });
        logger.write_line(message)?;
        Ok(())
    }

    /// Feed one listener callback into the records routed for `sensor`
    ///
    /// Samples of paused devices and unrouted sensors are dropped.
    pub fn on_sensor_sample(&self, device_name: &str, sensor: &str, sample: &SensorSample) {
        let Some(frame_id) = frame_id_for_sensor(sensor) else {
            log::debug!("No record frame for sensor '{}'", sensor);
            return;
        };

        let mut guard = self.runtime.lock();
        let rt = &mut *guard;
        if rt
            .selected_devices
            .get(device_name)
            .is_some_and(DeviceData::is_paused)
        {
            return;
        }
        let Some(records) = rt.sensor_routes.get(sensor) else {
            return;
        };

        let values: Vec<Scalar> = sample.values.iter().map(|v| Scalar::from(*v)).collect();
        for name in records {
            if let Some(writer) = rt.writers.get_mut(name) {
                if let Err(e) = writer.write(frame_id, sample.timestamp, &values) {
                    log::warn!("Failed to write {} sample to '{}': {}", sensor, name, e);
                }
            }
        }
    }
}

fn substitute(pattern: Option<&Regex>, text: &str, table: &HashMap<String, String>) -> String {
    let Some(re) = pattern else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures| {
        table
            .get(&caps[1])
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}
