//! Cross-service dependency resolution
//!
//! A mode may pull settings out of another service's currently selected mode
//! with references shaped `service.setting`.

use crate::config::Configuration;
use crate::error::{HydraError, Result};
use crate::template::TemplateResolver;
use serde_json::Value;
use std::collections::BTreeMap;

/// Resolves `variable -> "service.setting"` maps into values
pub struct DependencyResolver<'a> {
    config: &'a Configuration,
    templates: TemplateResolver<'a>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(config: &'a Configuration, templates: TemplateResolver<'a>) -> Self {
        Self { config, templates }
    }

    /// Resolve every reference of `dependencies`; an absent map resolves to nothing
    pub fn resolve(
        &self,
        dependencies: Option<&BTreeMap<String, String>>,
    ) -> Result<BTreeMap<String, Value>> {
        let Some(dependencies) = dependencies else {
            return Ok(BTreeMap::new());
        };

        let mut resolved = BTreeMap::new();
        for (name, reference) in dependencies {
            resolved.insert(name.clone(), self.resolve_reference(reference)?);
        }
        Ok(resolved)
    }

    /// Resolve a single `service.setting` reference
    pub fn resolve_reference(&self, reference: &str) -> Result<Value> {
        let (service, setting) = parse_reference(reference)?;
        let mode = self.config.selected_mode(service)?;

        let value = mode
            .config
            .get(setting)
            .ok_or_else(|| HydraError::Configuration {
                service: service.to_string(),
                mode: mode.name.clone(),
                setting: setting.to_string(),
            })?;

        self.templates.resolve(value)
    }
}

fn parse_reference(reference: &str) -> Result<(&str, &str)> {
    match reference.split_once('.') {
        Some((service, setting)) if !service.is_empty() && !setting.is_empty() => {
            Ok((service, setting))
        }
        _ => Err(HydraError::InvalidReference(reference.to_string())),
    }
}
