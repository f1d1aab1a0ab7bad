//! The mapping registry and per-event evaluator.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use pulsebridge_core::{ActionPayload, Condition, Mapping};
use pulsebridge_template::{check, parse_expr};
use serde_json::Value;
use tracing::{debug, info};

use crate::conditions;
use crate::error::GatewayError;

/// A mapping that fired for an event: the rendered action plus its dispatch
/// parameters. Produced by [`MappingEngine::on_event`]; the bridge turns
/// triggers into queue items.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub mapping_id: String,
    pub payload: ActionPayload,
    pub priority: i32,
    pub delay: Duration,
}

/// Registry of event-to-action mappings.
///
/// Registration validates templates and predicates synchronously so a bad
/// mapping is rejected up front instead of failing silently per event.
#[derive(Default)]
pub struct MappingEngine {
    mappings: DashMap<String, Mapping>,
}

impl MappingEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mapping, validating its context template and predicate
    /// conditions. Returns the mapping id.
    pub fn register(&self, mapping: Mapping) -> Result<String, GatewayError> {
        let issues = pulsebridge_template::validate(&mapping.context_template);
        if let Some(issue) = issues.first() {
            return Err(GatewayError::Configuration(format!(
                "invalid context template at {}: {}",
                issue.path, issue.message
            )));
        }
        for condition in &mapping.conditions {
            if let Condition::Predicate { expr } = condition {
                let parsed = parse_expr(expr)
                    .map_err(|e| GatewayError::Configuration(format!("invalid predicate: {e}")))?;
                check(&parsed)
                    .map_err(|e| GatewayError::Configuration(format!("invalid predicate: {e}")))?;
            }
        }
        let id = mapping.id.clone();
        info!(
            mapping_id = %id,
            name = %mapping.name,
            source = %mapping.source_event_type,
            "mapping registered"
        );
        self.mappings.insert(id.clone(), mapping);
        Ok(id)
    }

    /// Remove a mapping. Returns `false` when the id is unknown.
    pub fn remove(&self, id: &str) -> bool {
        self.mappings.remove(id).is_some()
    }

    /// Enable or disable a mapping in place.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), GatewayError> {
        let mut mapping = self
            .mappings
            .get_mut(id)
            .ok_or_else(|| GatewayError::UnknownMapping(id.to_string()))?;
        mapping.enabled = enabled;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Mapping> {
        self.mappings.get(id).map(|m| m.clone())
    }

    #[must_use]
    pub fn list(&self) -> Vec<Mapping> {
        self.mappings.iter().map(|m| m.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Evaluate all mappings against one incoming event.
    ///
    /// For each enabled mapping with a matching source event type: all
    /// conditions must pass (an evaluation failure skips only that
    /// mapping), the cooldown window must have elapsed, and then
    /// `last_triggered_at` is consumed immediately, before the action
    /// outcome is known. Returns the triggers to enqueue.
    pub fn on_event(&self, event_type: &str, payload: &Value) -> Vec<Trigger> {
        let now = Utc::now();
        let mut fired = Vec::new();
        for mut entry in self.mappings.iter_mut() {
            let mapping = entry.value_mut();
            if !mapping.enabled || mapping.source_event_type != event_type {
                continue;
            }

            let mut pass = true;
            for condition in &mapping.conditions {
                match conditions::matches(condition, payload) {
                    Ok(true) => {}
                    Ok(false) => {
                        pass = false;
                        break;
                    }
                    Err(err) => {
                        debug!(
                            mapping_id = %mapping.id,
                            error = %err,
                            "condition evaluation failed, skipping mapping"
                        );
                        pass = false;
                        break;
                    }
                }
            }
            if !pass {
                continue;
            }

            if mapping.cooldown_ms > 0 {
                if let Some(last) = mapping.last_triggered_at {
                    let window =
                        chrono::Duration::milliseconds(i64::try_from(mapping.cooldown_ms).unwrap_or(i64::MAX));
                    if now.signed_duration_since(last) < window {
                        debug!(mapping_id = %mapping.id, "cooldown active, skipping mapping");
                        continue;
                    }
                }
            }
            mapping.last_triggered_at = Some(now);

            let context = pulsebridge_template::render(&mapping.context_template, payload);
            debug!(mapping_id = %mapping.id, "mapping fired");
            fired.push(Trigger {
                mapping_id: mapping.id.clone(),
                payload: ActionPayload::new(
                    mapping.target_category.clone(),
                    mapping.target_action.clone(),
                    context,
                ),
                priority: mapping.priority,
                delay: Duration::from_millis(mapping.delay_ms),
            });
        }
        fired
    }
}
