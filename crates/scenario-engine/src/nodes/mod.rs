//! Primitive node execution.
//!
//! Each [`NodeDef`] is parsed into a [`NodeKind`] (validating its
//! `primitive_kwargs`) and then executed against a [`NodeContext`]. A node
//! returns an integer result code that selects the successor in
//! `next_nodes`.
//!
//! Primitives that wait (delays, prompts, events, joins) go through
//! [`NodeContext::suspend`] so that pausing or stopping the scenario
//! interrupts them.

mod control;
mod counter;
mod display;
mod record;
mod sensor;
mod sync;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ScenarioError};
use crate::events::ScenarioEvent;
use crate::scenario::Scenario;
use crate::types::{NodeDef, PrimitiveName};

pub use control::{AbortArgs, DelayArgs, ForkArgs, JoinArgs, ScreenSleepArgs, WaitOptionArgs};
pub use counter::{CounterArgs, CounterOp};
pub use display::{DisplayArgs, ProgressArgs};
pub use record::{LogInfoArgs, MetadataSetArgs, RecordArgs, RecordOp};
pub(crate) use record::frame_id_for_sensor;
pub use sensor::{DeviceArgs, DumpConfigArgs, SelectArgs, SensorArgs, SetConfigArgs};
pub use sync::{EventArgs, EventOp};

/// A parsed, executable node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Nop,
    Fork(ForkArgs),
    Join(JoinArgs),
    Abort(AbortArgs),
    WaitDelay(DelayArgs),
    WaitNext,
    WaitOption(WaitOptionArgs),
    ScreenSleep(ScreenSleepArgs),
    /// `display_msg`, `display_page` or `display_clear`
    Display(PrimitiveName, DisplayArgs),
    DisplayProgress(ProgressArgs),
    Event(EventOp, EventArgs),
    Counter(CounterOp, CounterArgs),
    MetadataSet(MetadataSetArgs),
    LogInfo(LogInfoArgs),
    /// `record_*` and its `log_*` aliases
    Record(RecordOp, RecordArgs),
    SensorSelect(SelectArgs),
    SensorSetConfig(SetConfigArgs),
    SensorDumpConfig(DumpConfigArgs),
    SensorPause { paused: bool, args: DeviceArgs },
    SensorStart(SensorArgs),
    SensorStop(SensorArgs),
    /// Device-side recording, handled by dedicated loggers only
    DeviceRecord(PrimitiveName),
}

impl NodeKind {
    /// Parse a node definition, validating its arguments
    pub fn from_def(def: &NodeDef) -> Result<Self> {
        use PrimitiveName as P;

        let primitive = def.primitive_name;
        let kind = match primitive {
            P::Nop => Self::Nop,
            P::Fork => Self::Fork(parse_args(def)?),
            P::Join => Self::Join(parse_args(def)?),
            P::Abort => Self::Abort(parse_args(def)?),
            P::WaitDelay => Self::WaitDelay(parse_args(def)?),
            P::WaitNext => Self::WaitNext,
            P::WaitOption => Self::WaitOption(parse_args(def)?),
            P::DisableScreenSleep => Self::ScreenSleep(parse_args(def)?),
            P::DisplayMsg | P::DisplayPage | P::DisplayClear => {
                Self::Display(primitive, parse_args(def)?)
            }
            P::DisplayProgress => Self::DisplayProgress(parse_args(def)?),
            P::EventCreate => Self::Event(EventOp::Create, parse_args(def)?),
            P::EventReset => Self::Event(EventOp::Reset, parse_args(def)?),
            P::EventSet => Self::Event(EventOp::Set, parse_args(def)?),
            P::EventWait => Self::Event(EventOp::Wait, parse_args(def)?),
            P::EventWaitAll => Self::Event(EventOp::WaitAll, parse_args(def)?),
            P::CounterSet => Self::Counter(CounterOp::Set, parse_args(def)?),
            P::CounterInc => Self::Counter(CounterOp::Inc, parse_args(def)?),
            P::CounterDec => Self::Counter(CounterOp::Dec, parse_args(def)?),
            P::CounterEqu => Self::Counter(CounterOp::Equ, parse_args(def)?),
            P::CounterCmp => Self::Counter(CounterOp::Cmp, parse_args(def)?),
            P::MetadataSet => Self::MetadataSet(parse_args(def)?),
            P::LogInfo => Self::LogInfo(parse_args(def)?),
            P::RecordCreate | P::LogCreate => Self::Record(RecordOp::Create, parse_args(def)?),
            P::RecordClose | P::LogClose => Self::Record(RecordOp::Close, parse_args(def)?),
            P::RecordPause | P::LogPause => Self::Record(RecordOp::Pause, parse_args(def)?),
            P::RecordUnpause | P::LogUnpause => Self::Record(RecordOp::Unpause, parse_args(def)?),
            P::RecordAnnotate | P::LogAnnotate => Self::Record(RecordOp::Annotate, parse_args(def)?),
            P::SensorDeviceSelect => Self::SensorSelect(parse_args(def)?),
            P::SensorDeviceSetConfig => Self::SensorSetConfig(parse_args(def)?),
            P::SensorDeviceDumpConfig => Self::SensorDumpConfig(parse_args(def)?),
            P::SensorDevicePauseSensor => Self::SensorPause {
                paused: true,
                args: parse_args(def)?,
            },
            P::SensorDeviceUnpauseSensor => Self::SensorPause {
                paused: false,
                args: parse_args(def)?,
            },
            P::SensorDeviceStartSensor => Self::SensorStart(parse_args(def)?),
            P::SensorDeviceStopSensor => Self::SensorStop(parse_args(def)?),
            P::SensorDeviceStartRecord
            | P::SensorDeviceStopRecord
            | P::SensorDeviceTagRecord
            | P::SensorDeviceDownloadRecord => Self::DeviceRecord(primitive),
        };
        Ok(kind)
    }

    /// Run the node and return its result code
    pub async fn execute(&self, ctx: &NodeContext<'_>) -> Result<i32> {
        match self {
            Self::Nop => Ok(0),
            Self::Fork(args) => control::fork(ctx, args),
            Self::Join(args) => control::join(ctx, args).await,
            Self::Abort(args) => control::abort(ctx, args).await,
            Self::WaitDelay(args) => control::wait_delay(ctx, args).await,
            Self::WaitNext => control::wait_next(ctx).await,
            Self::WaitOption(args) => control::wait_option(ctx, args).await,
            Self::ScreenSleep(args) => control::screen_sleep(ctx, args).await,
            Self::Display(primitive, args) => display::display(ctx, *primitive, args).await,
            Self::DisplayProgress(args) => display::progress(ctx, args),
            Self::Event(op, args) => sync::execute(ctx, *op, args).await,
            Self::Counter(op, args) => Ok(counter::execute(ctx, *op, args)),
            Self::MetadataSet(args) => record::metadata_set(ctx, args),
            Self::LogInfo(args) => record::log_info(ctx, args),
            Self::Record(op, args) => record::execute(ctx, *op, args),
            Self::SensorSelect(args) => sensor::select(ctx, args).await,
            Self::SensorSetConfig(args) => sensor::set_config(ctx, args),
            Self::SensorDumpConfig(args) => sensor::dump_config(ctx, args),
            Self::SensorPause { paused, args } => sensor::set_paused(ctx, args, *paused),
            Self::SensorStart(args) => sensor::start(ctx, args).await,
            Self::SensorStop(args) => sensor::stop(ctx, args).await,
            Self::DeviceRecord(primitive) => {
                log::info!("{} is not supported by this backend", primitive);
                Ok(0)
            }
        }
    }

    /// A join targeting the executing branch terminates that branch
    pub fn ends_branch(&self, branch: &str) -> bool {
        matches!(self, Self::Join(args) if args.target() == Some(branch))
    }
}

/// Everything a node needs while it executes
pub struct NodeContext<'a> {
    pub scenario: &'a Arc<Scenario>,
    pub branch: &'a str,
    pub node_id: &'a str,
    pub def: &'a NodeDef,
    /// Cancelled when the run is paused or stopped
    pub token: &'a CancellationToken,
}

impl NodeContext<'_> {
    /// Await `fut` unless the run is paused or stopped first
    pub async fn suspend<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ScenarioError::Cancelled),
            output = fut => Ok(output),
        }
    }

    /// Sleep for `secs` seconds; non-positive durations return immediately
    pub async fn sleep_secs(&self, secs: f64) -> Result<()> {
        if !secs.is_finite() || secs <= 0.0 {
            return Ok(());
        }
        self.suspend(tokio::time::sleep(seconds(secs))).await
    }

    /// Emit a prompt event and wait for the host to answer it
    pub async fn prompt(&self, event: impl FnOnce(u64) -> ScenarioEvent) -> Result<i32> {
        let (prompt_id, answer) = self.scenario.open_prompt();
        self.scenario.emit(event(prompt_id));

        let answer = self.suspend(answer).await;
        self.scenario.discard_prompt(prompt_id);

        match answer? {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(reason)) => Err(ScenarioError::Prompt(reason)),
            // Prompts are dropped when the run stops
            Err(_) => Err(ScenarioError::Cancelled),
        }
    }

    /// Substitute text and resource placeholders
    pub fn format(&self, text: Option<&str>) -> Option<String> {
        text.map(|t| self.scenario.formatted_text(t))
    }
}

pub(crate) fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Deserialize `primitive_kwargs`, `null` standing for no arguments
fn parse_args<T: DeserializeOwned>(def: &NodeDef) -> Result<T> {
    let kwargs = match &def.primitive_kwargs {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(kwargs)
        .map_err(|e| ScenarioError::invalid_arguments(def.primitive_name.as_str(), e.to_string()))
}

/// Accept either `"generic.acc"` or `["generic.acc", "generic.gyr"]`
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(value)) => Some(vec![value]),
        Some(OneOrMany::Many(values)) => Some(values),
        None => None,
    })
}
