//! Host-facing session.
//!
//! A [`ScenarioSession`] creates one data directory per run, filters the
//! available devices against the scenario's requirements and decides on
//! stop whether the acquisition is kept.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ScenarioConfig;
use crate::devices::{filter_required_devices, NullSensorBackend, SensorBackend, SensorDevice};
use crate::error::{Result, ScenarioError};
use crate::events::{EventSink, NullEventSink};
use crate::metadata::now_millis;
use crate::scenario::{Scenario, StopReason};
use crate::types::{ProfileData, ScenarioDefinition};

/// Outcome of a stopped run
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub data_path: PathBuf,
    pub reason: StopReason,
    /// Whether the host should upload the data directory
    pub keep_data: bool,
}

pub struct ScenarioSession {
    config: ScenarioConfig,
    event_sink: Arc<dyn EventSink>,
    backend: Arc<dyn SensorBackend>,
    current: Option<Arc<Scenario>>,
}

impl ScenarioSession {
    pub fn new(config: ScenarioConfig) -> Self {
        Self {
            config,
            event_sink: Arc::new(NullEventSink),
            backend: Arc::new(NullSensorBackend),
            current: None,
        }
    }

    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn SensorBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn current(&self) -> Option<&Arc<Scenario>> {
        self.current.as_ref()
    }

    /// Start a scenario in a new `data_root/<timestamp>` directory
    ///
    /// Fails when no available device satisfies the scenario's
    /// `required_sensor_devices`.
    pub fn start_scenario(
        &mut self,
        definition: ScenarioDefinition,
        profile: ProfileData,
        available_devices: Vec<SensorDevice>,
    ) -> Result<Arc<Scenario>> {
        if let Some(current) = &self.current {
            if current.state() != crate::types::ScenarioState::Stopped {
                return Err(ScenarioError::definition(format!(
                    "scenario {} is still running",
                    current.definition().scenario_id
                )));
            }
        }

        let required = &definition.scenario_info.required_sensor_devices;
        let selected = filter_required_devices(&available_devices, required);
        if selected.is_empty() {
            return Err(ScenarioError::capability(
                "no available sensor device satisfies the scenario requirements",
            ));
        }

        let data_path = self.config.data_root.join(now_millis().to_string());
        std::fs::create_dir_all(&data_path)?;

        let scenario = Scenario::builder(definition, data_path)
            .profile(profile)
            .config(self.config.clone())
            .available_devices(available_devices)
            .selected_devices(selected)
            .event_sink(self.event_sink.clone())
            .backend(self.backend.clone())
            .build();
        scenario.start()?;
        self.current = Some(scenario.clone());
        Ok(scenario)
    }

    pub fn pause_scenario(&self) {
        if let Some(scenario) = &self.current {
            scenario.pause();
        }
    }

    pub fn resume_scenario(&self) {
        if let Some(scenario) = &self.current {
            scenario.resume();
        }
    }

    /// Stop the current run and report whether its data is kept
    pub async fn stop_scenario(&mut self) -> Option<Acquisition> {
        let scenario = self.current.take()?;
        scenario.stop(None).await;
        let reason = scenario.finished().await;
        Some(Acquisition {
            data_path: scenario.data_path().to_path_buf(),
            keep_data: reason.keeps_data(),
            reason,
        })
    }

    /// Stop the current run and delete its data directory
    pub async fn cancel_scenario(&mut self) -> Result<()> {
        let Some(scenario) = self.current.take() else {
            return Ok(());
        };
        scenario.stop(None).await;
        if scenario.data_path().exists() {
            std::fs::remove_dir_all(scenario.data_path())?;
            log::info!("Removed cancelled acquisition {:?}", scenario.data_path());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{sensor_types, SensorDeviceType};
    use crate::types::{NodeDef, PrimitiveName, RequiredSensorDevice, ScenarioContent};
    use tempfile::tempdir;

    fn definition() -> ScenarioDefinition {
        let content = ScenarioContent::new("a").with_node("a", NodeDef::new(PrimitiveName::Nop));
        let mut definition = ScenarioDefinition::new(3, content);
        definition.scenario_info.required_sensor_devices = vec![RequiredSensorDevice {
            sensor_device_type: SensorDeviceType::MobilePhone,
            required_sensors: vec![sensor_types::ACC.to_string()],
        }];
        definition
    }

    #[tokio::test]
    async fn test_missing_device_is_refused() {
        let dir = tempdir().unwrap();
        let mut session = ScenarioSession::new(ScenarioConfig::default().with_data_root(dir.path()));

        let Err(err) = session.start_scenario(
            definition(),
            ProfileData::new(1),
            vec![SensorDevice::mobile_phone(&[sensor_types::GYR])],
        ) else {
            panic!("a device without the required sensor was accepted");
        };
        assert!(matches!(err, ScenarioError::Capability(_)));
        assert!(session.current().is_none());
    }

    #[tokio::test]
    async fn test_completed_run_is_kept() {
        let dir = tempdir().unwrap();
        let mut session = ScenarioSession::new(ScenarioConfig::default().with_data_root(dir.path()));

        let scenario = session
            .start_scenario(
                definition(),
                ProfileData::new(1),
                vec![SensorDevice::mobile_phone(&[sensor_types::ACC])],
            )
            .unwrap();
        assert_eq!(scenario.finished().await, StopReason::Completed);

        let acquisition = session.stop_scenario().await.unwrap();
        assert!(acquisition.keep_data);
        assert!(acquisition.data_path.join("metadata.json").exists());
    }

    #[tokio::test]
    async fn test_matching_devices_are_preselected() {
        let dir = tempdir().unwrap();
        let mut session = ScenarioSession::new(ScenarioConfig::default().with_data_root(dir.path()));
        let phone = SensorDevice::mobile_phone(&[sensor_types::ACC]);
        let logger = SensorDevice::new(SensorDeviceType::Esp32Logger, &[sensor_types::GYR]);

        let scenario = session
            .start_scenario(definition(), ProfileData::new(1), vec![phone.clone(), logger])
            .unwrap();

        assert_eq!(scenario.available_devices().len(), 2);
        let selected = scenario.selected_devices();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].device, phone);
        assert_eq!(selected[0].name, SensorDeviceType::MobilePhone.as_str());
    }

    #[tokio::test]
    async fn test_cancel_removes_data() {
        let dir = tempdir().unwrap();
        let mut session = ScenarioSession::new(ScenarioConfig::default().with_data_root(dir.path()));

        let scenario = session
            .start_scenario(
                definition(),
                ProfileData::new(1),
                vec![SensorDevice::mobile_phone(&[sensor_types::ACC])],
            )
            .unwrap();
        let data_path = scenario.data_path().to_path_buf();
        assert!(data_path.exists());

        session.cancel_scenario().await.unwrap();
        assert!(!data_path.exists());
    }
}
