//! Scenario Engine - Graph interpreter for sensor data-collection scenarios
//!
//! A scenario is a graph of primitive nodes (display a message, wait for
//! the user, start a sensor, open a record file, ...) delivered as JSON.
//! The engine walks that graph, possibly on several concurrent branches,
//! and produces an acquisition directory:
//!
//! - `metadata.json`: run description, record list, annotations
//! - `scenario.json`: snapshot of the executed definition
//! - `<record>.bin`: binary sensor records (see the `sensor-log` crate)
//! - `acquisition.log`: free-form `log_info` messages
//!
//! # Architecture
//!
//! - `Scenario`: lifecycle (start, pause, resume, stop) and shared runtime state
//! - `engine`: one tokio task per branch, following `next_nodes[result]`
//! - `nodes`: one handler per primitive
//! - `EventSink`: UI events, prompts are answered through `Scenario::resolve_prompt`
//! - `SensorBackend`: platform sensors, samples come back through
//!   `Scenario::on_sensor_sample`
//!
//! # Example
//!
//! ```no_run
//! use scenario_engine::{NodeDef, PrimitiveName, Scenario, ScenarioContent, ScenarioDefinition};
//! use serde_json::json;
//!
//! # async fn run() -> scenario_engine::Result<()> {
//! let content = ScenarioContent::new("hello")
//!     .with_node(
//!         "hello",
//!         NodeDef::new(PrimitiveName::DisplayMsg).with_kwargs(json!({"msg": "Hello"})),
//!     );
//! let scenario = Scenario::builder(ScenarioDefinition::new(1, content), "/tmp/run").build();
//! scenario.start()?;
//! let reason = scenario.finished().await;
//! println!("{:?}", reason);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod devices;
mod engine;
pub mod error;
pub mod events;
pub mod metadata;
pub mod nodes;
pub mod scenario;
pub mod session;
pub mod signal;
pub mod types;

// Re-export key types
pub use config::ScenarioConfig;
pub use devices::{
    filter_required_devices, sensor_types, DeviceData, DeviceFilter, NullSensorBackend,
    SensorBackend, SensorDevice, SensorDeviceType, SensorInfo,
};
pub use error::{Result, ScenarioError};
pub use events::{ChannelEventSink, EventError, EventSink, NullEventSink, ScenarioEvent, VecEventSink};
pub use metadata::{AbortInfo, Annotation, RecordEvent, RecordInfo, ScenarioMetadata};
pub use nodes::NodeKind;
pub use scenario::{Scenario, ScenarioBuilder, SensorSample, StopReason, MAIN_BRANCH};
pub use session::{Acquisition, ScenarioSession};
pub use signal::Signal;
pub use types::{
    ExecutionPoint, NodeDef, NodeId, PrimitiveName, ProfileData, RequiredSensorDevice,
    ScenarioContent, ScenarioDefinition, ScenarioInfo, ScenarioState,
};
