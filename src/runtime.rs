//! Controller assembly.
//!
//! Builds the backend registry and the I/O tables from a validated config,
//! resolving every (backend, channel-name) reference to a concrete address.
//! After `from_config` returns, the registry is frozen: the only mutation
//! left is lifecycle state.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::alarms::AlarmSink;
use crate::backend::hw_p1::{HwP1Backend, SimBus};
use crate::backend::sim::SimBackend;
use crate::backend::{BackendRegistry, HwBackend, InputKind};
use crate::clock::Ticks;
use crate::config::{BackendKind, Config};
use crate::inputs::switch::{SwitchInput, SwitchSpec};
use crate::inputs::temperature::{TemperatureInput, TemperatureSpec};
use crate::inputs::Inputs;
use crate::logsink::LogSource;
use crate::outputs::relay::{RelayOutput, RelaySpec};
use crate::outputs::Outputs;
use crate::temp::Temp;

/// The assembled I/O core: registry plus consumer-facing tables.
pub struct Controller {
    registry: Arc<BackendRegistry>,
    inputs: Arc<Inputs>,
    outputs: Arc<Outputs>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

impl Controller {
    pub fn from_config(cfg: &Config, alarms: Arc<dyn AlarmSink>) -> Result<Self> {
        let mut registry = BackendRegistry::new(Arc::clone(&alarms));

        for (name, backend_cfg) in &cfg.backends {
            let driver: Box<dyn HwBackend> = match backend_cfg.kind {
                BackendKind::HwP1 => {
                    if backend_cfg.device.is_some() {
                        // The SPI transport is a collaborator; until one is
                        // linked in, the board runs over the simulated bus.
                        warn!(backend = %name, "no SPI transport linked, using simulated bus");
                    }
                    Box::new(HwP1Backend::from_config(
                        name,
                        backend_cfg,
                        Box::new(SimBus::new()),
                    ))
                }
                BackendKind::Sim => Box::new(SimBackend::from_config(name, backend_cfg)),
            };
            registry
                .register(name, driver)
                .map_err(|e| anyhow::anyhow!("backend '{name}': {e}"))?;
        }
        let registry = Arc::new(registry);

        let mut inputs = Inputs::new();
        for t in &cfg.temperatures {
            let sources = t
                .sources
                .iter()
                .map(|s| {
                    registry
                        .resolve_input(&s.backend, InputKind::Temperature, &s.name)
                        .with_context(|| {
                            format!(
                                "temperature '{}': unknown source {}/{}",
                                t.name, s.backend, s.name
                            )
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            let input = TemperatureInput::new(
                TemperatureSpec {
                    name: t.name.clone(),
                    sources,
                    op: t.op,
                    missing: t.missing,
                    igntemp: Temp::from_celsius(t.igntemp.unwrap_or_default()),
                    period: Ticks::from_duration(t.period),
                },
                Arc::clone(&registry),
                Arc::clone(&alarms),
            );
            inputs
                .add_temperature(input)
                .map_err(|e| anyhow::anyhow!("temperature '{}': {e}", t.name))?;
        }

        for s in &cfg.switches {
            let sources = s
                .sources
                .iter()
                .map(|src| {
                    registry
                        .resolve_input(&src.backend, InputKind::Switch, &src.name)
                        .with_context(|| {
                            format!(
                                "switch '{}': unknown source {}/{}",
                                s.name, src.backend, src.name
                            )
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            let input = SwitchInput::new(
                SwitchSpec {
                    name: s.name.clone(),
                    sources,
                    op: s.op,
                    missing: s.missing,
                    ignstate: s.ignstate,
                    period: Ticks::from_duration(s.period),
                },
                Arc::clone(&registry),
                Arc::clone(&alarms),
            );
            inputs
                .add_switch(input)
                .map_err(|e| anyhow::anyhow!("switch '{}': {e}", s.name))?;
        }

        let mut outputs = Outputs::new();
        for r in &cfg.relays {
            let targets = r
                .targets
                .iter()
                .map(|t| {
                    registry.resolve_output(&t.backend, &t.name).with_context(|| {
                        format!("relay '{}': unknown target {}/{}", r.name, t.backend, t.name)
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let relay = RelayOutput::new(
                RelaySpec {
                    name: r.name.clone(),
                    targets,
                    op: r.op,
                    missing: r.missing,
                },
                Arc::clone(&registry),
            );
            outputs
                .add_relay(relay)
                .map_err(|e| anyhow::anyhow!("relay '{}': {e}", r.name))?;
        }

        Ok(Self {
            registry,
            inputs: Arc::new(inputs),
            outputs: Arc::new(outputs),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        registry: Arc<BackendRegistry>,
        inputs: Inputs,
        outputs: Outputs,
    ) -> Self {
        Self {
            registry,
            inputs: Arc::new(inputs),
            outputs: Arc::new(outputs),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn inputs(&self) -> &Arc<Inputs> {
        &self.inputs
    }

    pub fn outputs(&self) -> &Arc<Outputs> {
        &self.outputs
    }

    /// The log sources this core contributes.
    pub fn log_sources(&self) -> Vec<LogSource> {
        vec![self.inputs.log_source(), self.outputs.log_source()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::testing::CollectingAlarms;
    use crate::error::Error;

    fn demo_config() -> Config {
        serde_yaml_ng::from_str(
            r#"
backends:
  board:
    type: sim
    sensors:
      - { name: boiler, id: 1, type: PT1000 }
    relays:
      - { name: burner, id: 1 }
    switches:
      - { name: door, id: 1 }
temperatures:
  - name: boiler_temp
    sources: [ { backend: board, name: boiler } ]
switches:
  - name: door_open
    sources: [ { backend: board, name: door } ]
relays:
  - name: burner_relay
    targets: [ { backend: board, name: burner } ]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_build_and_bring_up() {
        let cfg = demo_config();
        let ctrl =
            Controller::from_config(&cfg, Arc::new(CollectingAlarms::default())).unwrap();

        assert_eq!(ctrl.registry().len(), 1);
        assert_eq!(ctrl.inputs().temperature_count(), 1);
        assert_eq!(ctrl.inputs().switch_count(), 1);
        assert_eq!(ctrl.outputs().relay_count(), 1);

        ctrl.registry().setup().unwrap();
        ctrl.registry().online().unwrap();

        // Sensor never scripted: the read surfaces a sensor fault, not a
        // resolution failure.
        let h = ctrl.inputs().temperature_fbn("boiler_temp").unwrap();
        assert_eq!(
            ctrl.inputs().temperature_get(h),
            Err(Error::SensorInvalid)
        );

        // Relay command flows through to the sim board staging.
        let r = ctrl.outputs().relay_fbn("burner_relay").unwrap();
        ctrl.outputs().relay_set(r, true).unwrap();
        assert_eq!(ctrl.outputs().relay_get(r), Ok(true));

        ctrl.registry().offline().unwrap();
        ctrl.registry().exit();
    }

    #[test]
    fn test_unknown_source_fails_build() {
        let mut cfg = demo_config();
        cfg.temperatures[0].sources[0].name = "ghost".into();
        let err = Controller::from_config(&cfg, Arc::new(CollectingAlarms::default()))
            .unwrap_err();
        assert!(err.to_string().contains("unknown source"));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_unknown_target_fails_build() {
        let mut cfg = demo_config();
        cfg.relays[0].targets[0].backend = "nowhere".into();
        let err = Controller::from_config(&cfg, Arc::new(CollectingAlarms::default()))
            .unwrap_err();
        assert!(err.to_string().contains("unknown target"));
    }

    #[test]
    fn test_log_sources_cover_inputs_and_outputs() {
        let cfg = demo_config();
        let ctrl =
            Controller::from_config(&cfg, Arc::new(CollectingAlarms::default())).unwrap();
        let sources = ctrl.log_sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].identifier, "temperatures");
        assert_eq!(sources[1].identifier, "relays");
    }
}
