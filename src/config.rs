//! YAML configuration of the simulated device.
//!
//! Every field has a default, so an empty document describes the stock
//! 20-register device.

use std::{
    fs, io,
    net::{Ipv4Addr, SocketAddr},
    path::Path,
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    frame::{Address, Quantity, UnitId, Word, MAX_READ_QUANTITY},
    server::{fault::FaultPolicy, Dispatcher, FaultPolicyError},
    store::{Pattern, RegisterStore, StoreError, Table, MAX_CAPACITY},
};

/// Initial holding register values of the stock device.
pub const DEFAULT_HOLDING_VALUES: [Word; 11] =
    [123, 456, 789, 234, 567, 890, 100, 200, 300, 400, 500];

const DEFAULT_CAPACITY: usize = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse YAML configuration: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fault(#[from] FaultPolicyError),
}

/// A dynamic pattern applied to `count` consecutive addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    pub start: Address,
    #[serde(default = "default_count")]
    pub count: usize,
    pub pattern: Pattern,
}

fn default_count() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegisterTableConfig {
    pub capacity: usize,
    /// Static values starting at address 0.
    pub values: Vec<Word>,
    pub bindings: Vec<BindingConfig>,
}

impl Default for RegisterTableConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            values: Vec::new(),
            bindings: Vec::new(),
        }
    }
}

impl RegisterTableConfig {
    fn validate(&self, table: Table) -> Result<(), ConfigError> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "{table} capacity must be between 1 and {MAX_CAPACITY}, got {}",
                self.capacity
            )));
        }
        if self.values.len() > self.capacity {
            return Err(ConfigError::Invalid(format!(
                "{} initial {table} values do not fit capacity {}",
                self.values.len(),
                self.capacity
            )));
        }
        for binding in &self.bindings {
            let end = usize::from(binding.start).checked_add(binding.count);
            if binding.count == 0 || end.map_or(true, |end| end > self.capacity) {
                return Err(ConfigError::Invalid(format!(
                    "{table} binding {}+{} does not fit capacity {}",
                    binding.start, binding.count, self.capacity
                )));
            }
            binding.pattern.validate().map_err(|err| {
                ConfigError::Invalid(format!(
                    "{table} binding at address {}: {err}",
                    binding.start
                ))
            })?;
        }
        Ok(())
    }

    fn apply(&self, store: &RegisterStore, table: Table) -> Result<(), StoreError> {
        if !self.values.is_empty() {
            store.write(table, 0, &self.values)?;
        }
        for binding in &self.bindings {
            store.bind_dynamic(table, binding.start, binding.count, binding.pattern)?;
            log::info!(
                "{table} registers {}..{}: {}",
                crate::store::register_number(table, binding.start),
                crate::store::register_number(table, binding.start) + binding.count as u32,
                binding.pattern.name()
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultConfig {
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub response_delay_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatorConfig {
    pub listen: SocketAddr,
    /// `None` answers every unit id.
    pub unit_id: Option<UnitId>,
    pub max_read_quantity: Quantity,
    pub holding_registers: RegisterTableConfig,
    pub input_registers: RegisterTableConfig,
    pub fault: Option<FaultConfig>,
    pub status_interval_secs: Option<f64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 502)),
            unit_id: Some(1),
            max_read_quantity: MAX_READ_QUANTITY,
            holding_registers: RegisterTableConfig {
                values: DEFAULT_HOLDING_VALUES.to_vec(),
                ..RegisterTableConfig::default()
            },
            input_registers: RegisterTableConfig::default(),
            fault: None,
            status_interval_secs: None,
        }
    }
}

impl SimulatorConfig {
    /// Loads and validates a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::debug!("Loading configuration from {path:?}");
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        // 空文档等价于默认配置
        let config: Self = if contents.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(contents)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_read_quantity == 0 || self.max_read_quantity > MAX_READ_QUANTITY {
            return Err(ConfigError::Invalid(format!(
                "max_read_quantity must be between 1 and {MAX_READ_QUANTITY}, got {}",
                self.max_read_quantity
            )));
        }
        self.holding_registers.validate(Table::Holding)?;
        self.input_registers.validate(Table::Input)?;
        if let Some(fault) = &self.fault {
            FaultPolicy::new(fault.error_rate, fault.response_delay_secs)?;
        }
        self.status_interval()?;
        Ok(())
    }

    /// Interval of the periodic status log, if enabled.
    pub fn status_interval(&self) -> Result<Option<Duration>, ConfigError> {
        let Some(secs) = self.status_interval_secs else {
            return Ok(None);
        };
        match Duration::try_from_secs_f64(secs) {
            Ok(interval) if !interval.is_zero() => Ok(Some(interval)),
            _ => Err(ConfigError::Invalid(format!(
                "status_interval_secs must be a positive number of seconds, got {secs}"
            ))),
        }
    }

    /// Creates the register store with initial values and bindings applied.
    pub fn build_store(&self) -> Result<RegisterStore, ConfigError> {
        let store = RegisterStore::new(
            self.holding_registers.capacity,
            self.input_registers.capacity,
        )?;
        self.holding_registers.apply(&store, Table::Holding)?;
        self.input_registers.apply(&store, Table::Input)?;
        Ok(store)
    }

    pub fn build_dispatcher(&self, store: Arc<RegisterStore>) -> Result<Dispatcher, ConfigError> {
        let mut dispatcher = Dispatcher::new(store).with_max_read_quantity(self.max_read_quantity);
        if let Some(unit_id) = self.unit_id {
            dispatcher = dispatcher.with_unit_id(unit_id);
        }
        if let Some(fault) = &self.fault {
            dispatcher.set_fault_policy(fault.error_rate, fault.response_delay_secs)?;
        }
        Ok(dispatcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_the_stock_device() {
        let config = SimulatorConfig::from_yaml_str("").unwrap();
        assert_eq!(config, SimulatorConfig::default());
        assert_eq!(config.listen, "127.0.0.1:502".parse().unwrap());

        let store = config.build_store().unwrap();
        assert_eq!(store.capacity(Table::Holding), 20);
        assert_eq!(
            store.read(Table::Holding, 0, 12).unwrap(),
            vec![123, 456, 789, 234, 567, 890, 100, 200, 300, 400, 500, 0]
        );
        assert_eq!(store.read(Table::Input, 0, 20).unwrap(), vec![0; 20]);
    }

    #[test]
    fn parses_full_document() {
        let yaml = r"
listen: 0.0.0.0:5020
unit_id: null
max_read_quantity: 64
holding_registers:
  capacity: 100
  values: [1, 2, 3]
  bindings:
    - start: 10
      count: 5
      pattern:
        kind: random_walk
        base: 750
        step: 30
input_registers:
  capacity: 10
  bindings:
    - start: 0
      pattern:
        kind: sine_wave
        amplitude: 50
fault:
  error_rate: 0.1
  response_delay_secs: 0.5
status_interval_secs: 5
";
        let config = SimulatorConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.listen.port(), 5020);
        assert_eq!(config.unit_id, None);
        assert_eq!(config.max_read_quantity, 64);
        assert_eq!(config.holding_registers.bindings[0].count, 5);
        assert_eq!(
            config.input_registers.bindings[0].pattern,
            Pattern::SineWave {
                amplitude: 50.0,
                period: 60.0
            }
        );
        assert_eq!(config.status_interval().unwrap(), Some(Duration::from_secs(5)));

        let store = Arc::new(config.build_store().unwrap());
        assert_eq!(store.read(Table::Holding, 0, 4).unwrap(), vec![1, 2, 3, 0]);
        assert!(matches!(
            store.source(Table::Holding, 14),
            Some(crate::store::ValueSource::Dynamic(_))
        ));

        let dispatcher = config.build_dispatcher(store).unwrap();
        let policy = dispatcher.fault_policy().unwrap();
        assert_eq!(policy.error_rate(), 0.1);
        assert_eq!(policy.response_delay(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_invalid_documents() {
        let cases = [
            "max_read_quantity: 0",
            "max_read_quantity: 126",
            "holding_registers: {capacity: 0}",
            "holding_registers: {capacity: 65537}",
            "input_registers: {capacity: 2, values: [1, 2, 3]}",
            "holding_registers: {capacity: 10, bindings: [{start: 8, count: 3, pattern: {kind: linear_ramp}}]}",
            "holding_registers: {bindings: [{start: 0, count: 0, pattern: {kind: linear_ramp}}]}",
            "holding_registers: {bindings: [{start: 0, pattern: {kind: step_function, period: 0}}]}",
            "holding_registers: {bindings: [{start: 0, pattern: {kind: random_walk, step: -1}}]}",
            "fault: {error_rate: 1.5}",
            "fault: {response_delay_secs: -1}",
            "status_interval_secs: 0",
            "status_interval_secs: -2.5",
            "status_interval_secs: 1.0e30",
            "holding_registers: {bindings: [{start: 1, count: 18446744073709551615, pattern: {kind: sine_wave}}]}",
            "holding_registers: {bindings: [{start: 0, pattern: {kind: random_walk, base: 0, step: 1.0e308}}]}",
        ];
        for yaml in cases {
            assert!(
                matches!(
                    SimulatorConfig::from_yaml_str(yaml),
                    Err(ConfigError::Invalid(_) | ConfigError::Fault(_))
                ),
                "accepted: {yaml}"
            );
        }
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(matches!(
            SimulatorConfig::from_yaml_str("unit_id: [1"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SimulatorConfig::from_yaml_str("holding_registers: {bindings: [{start: 0, pattern: {kind: square}}]}"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SimulatorConfig::from_yaml_str("no_such_field: 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            SimulatorConfig::from_file("/nonexistent/plcsim.yaml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn sample_configuration_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/mock-plc.yaml");
        let config = SimulatorConfig::from_file(path).unwrap();
        assert_eq!(config.holding_registers.bindings.len(), 4);
        let store = config.build_store().unwrap();
        assert_eq!(store.read(Table::Holding, 0, 40).unwrap().len(), 40);
    }
}
