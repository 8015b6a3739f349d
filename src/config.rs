//! Configuration management for hydra
//!
//! Holds the service topology and the mode currently selected for each service.

use crate::error::{HydraError, Result};
use crate::topology::{Mode, ServiceDefinition};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Topology plus per-service mode selection
pub struct Configuration {
    /// Services in declaration order
    topology: Vec<ServiceDefinition>,
    /// Selected mode name per service
    selected: RwLock<HashMap<String, String>>,
}

impl Configuration {
    /// Load a JSON topology file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            HydraError::Config(format!("Could not read topology {}: {}", path.display(), e))
        })?;
        let topology: Vec<ServiceDefinition> = serde_json::from_str(&content)?;
        Self::from_topology(topology)
    }

    /// Build a configuration from services, selecting each service's first mode
    pub fn from_topology(topology: Vec<ServiceDefinition>) -> Result<Self> {
        let mut names = HashSet::new();
        let mut selected = HashMap::new();

        for service in &topology {
            if !names.insert(service.name.as_str()) {
                return Err(HydraError::Config(format!(
                    "Service '{}' is declared twice",
                    service.name
                )));
            }

            let mut modes = HashSet::new();
            for mode in &service.modes {
                if !modes.insert(mode.name.as_str()) {
                    return Err(HydraError::Config(format!(
                        "Mode '{}' is declared twice in service '{}'",
                        mode.name, service.name
                    )));
                }
            }

            let first = service.modes.first().ok_or_else(|| {
                HydraError::Config(format!("Service '{}' declares no modes", service.name))
            })?;
            selected.insert(service.name.clone(), first.name.clone());
        }

        Ok(Self {
            topology,
            selected: RwLock::new(selected),
        })
    }

    /// Services in declaration order
    pub fn topology(&self) -> &[ServiceDefinition] {
        &self.topology
    }

    /// Names of all services in declaration order
    pub fn service_names(&self) -> Vec<String> {
        self.topology.iter().map(|s| s.name.clone()).collect()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.topology.iter().find(|s| s.name == name)
    }

    /// Name of the mode currently selected for a service
    pub fn service_config(&self, name: &str) -> Option<String> {
        self.read().get(name).cloned()
    }

    /// Select a mode for a service
    pub fn set_service_config(&self, name: &str, mode: &str) -> Result<()> {
        let service = self
            .service(name)
            .ok_or_else(|| HydraError::ServiceNotFound(name.to_string()))?;

        if service.mode(mode).is_none() {
            return Err(HydraError::ModeNotFound {
                service: name.to_string(),
                mode: mode.to_string(),
            });
        }

        self.write().insert(name.to_string(), mode.to_string());
        Ok(())
    }

    /// Move the selection `offset` modes forward (or backward), wrapping around
    pub fn cycle_mode(&self, name: &str, offset: isize) -> Result<String> {
        let service = self
            .service(name)
            .ok_or_else(|| HydraError::ServiceNotFound(name.to_string()))?;

        let mut selected = self.write();
        let current = selected
            .get(name)
            .and_then(|mode| service.modes.iter().position(|m| &m.name == mode))
            .unwrap_or(0);

        let count = service.modes.len() as isize;
        let index = (current as isize + offset).rem_euclid(count) as usize;
        let mode = service.modes[index].name.clone();

        selected.insert(name.to_string(), mode.clone());
        Ok(mode)
    }

    /// The mode currently selected for a service
    pub fn selected_mode(&self, name: &str) -> Result<Mode> {
        let service = self
            .service(name)
            .ok_or_else(|| HydraError::ServiceNotFound(name.to_string()))?;
        let mode = self
            .service_config(name)
            .ok_or_else(|| HydraError::ServiceNotFound(name.to_string()))?;

        service
            .mode(&mode)
            .cloned()
            .ok_or(HydraError::ModeNotFound {
                service: name.to_string(),
                mode,
            })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.selected.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.selected.write().unwrap_or_else(|e| e.into_inner())
    }
}
