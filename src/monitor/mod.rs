//! Critical parameter monitor.
//!
//! Holds a static table of safety rules keyed by parameter name and
//! evaluates a version's parameters against them, forwarding a combined
//! alert to the configured sink when anything trips.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::StoreResult;
use crate::notify::AlertSink;
use crate::store::Storage;

/// A named safety predicate over a parameter's numeric value.
#[derive(Debug, Clone)]
pub struct CriticalRule {
    /// Parameter name the rule applies to.
    pub parameter: String,
    /// Inclusive lower bound of the safe range.
    pub min: f64,
    /// Inclusive upper bound of the safe range.
    pub max: f64,
    /// Human-readable message emitted when the rule trips.
    pub message: String,
}

impl CriticalRule {
    /// Create a new range rule.
    pub fn new(
        parameter: impl Into<String>,
        min: f64,
        max: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            parameter: parameter.into(),
            min,
            max,
            message: message.into(),
        }
    }

    /// Whether a value falls outside the safe range.
    pub fn is_violated(&self, value: f64) -> bool {
        value < self.min || value > self.max
    }
}

/// An alert produced by the monitor; ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Name of the offending parameter.
    pub parameter: String,
    /// The value with its unit appended, e.g. `50°C`.
    pub value: String,
    /// The rule's message.
    pub message: String,
}

/// Monitor evaluating versions against the critical rule table.
pub struct CriticalParametersMonitor {
    storage: Arc<dyn Storage>,
    sink: Option<Arc<dyn AlertSink>>,
    rules: Vec<CriticalRule>,
}

impl CriticalParametersMonitor {
    /// Create a monitor with the default rule table.
    pub fn new(storage: Arc<dyn Storage>, sink: Option<Arc<dyn AlertSink>>) -> Self {
        Self {
            storage,
            sink,
            rules: default_rules(),
        }
    }

    /// Replace the rule table.
    pub fn with_rules(mut self, rules: Vec<CriticalRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Evaluate every rule against the version's current parameters.
    ///
    /// Parameters whose value does not parse numerically are skipped with a
    /// warning. Returns all triggered alerts regardless of sink
    /// availability; when any exist and a sink is configured, one combined
    /// message listing every alert is forwarded.
    pub async fn check_version(&self, version_id: &str) -> StoreResult<Vec<Alert>> {
        let version = self.storage.get_version(version_id).await?.ok_or_else(|| {
            crate::error::StoreError::VersionNotFound {
                version_id: version_id.to_string(),
            }
        })?;

        let mut alerts = Vec::new();
        for param in &version.parameters {
            let Some(rule) = self.rules.iter().find(|r| r.parameter == param.name) else {
                continue;
            };
            let Some(value) = param.numeric_value() else {
                warn!(
                    parameter = %param.name,
                    value = %param.value,
                    "Skipping unparseable parameter value"
                );
                continue;
            };
            if rule.is_violated(value) {
                alerts.push(Alert {
                    parameter: param.name.clone(),
                    value: format!("{}{}", param.value, param.unit),
                    message: rule.message.clone(),
                });
            }
        }

        if !alerts.is_empty() {
            info!(
                version_id = %version_id,
                alerts = alerts.len(),
                "Critical parameter rules triggered"
            );
            if let Some(sink) = &self.sink {
                let message = format_alert_message(&alerts);
                if let Err(e) = sink.send_notification(&message).await {
                    error!(error = %e, "Failed to forward critical parameter alert");
                }
            }
        }

        Ok(alerts)
    }
}

/// One combined Markdown message listing every alert.
pub fn format_alert_message(alerts: &[Alert]) -> String {
    let mut message = String::from("⚠️ *Critical Parameters Alert*");
    for alert in alerts {
        message.push_str(&format!(
            "\n• {}: {} - {}",
            alert.parameter, alert.value, alert.message
        ));
    }
    message
}

/// The default safety rule table.
pub fn default_rules() -> Vec<CriticalRule> {
    vec![
        CriticalRule::new(
            "Temperature",
            10.0,
            40.0,
            "Temperature out of safe range (10-40°C)",
        ),
        CriticalRule::new(
            "Pressure",
            900.0,
            1100.0,
            "Pressure out of safe range (900-1100 hPa)",
        ),
        CriticalRule::new("pH", 5.0, 9.0, "pH out of safe range (5-9)"),
        CriticalRule::new(
            "Sequence Length",
            50.0,
            5000.0,
            "Sequence length out of safe range (50-5000)",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_boundaries() {
        let rule = CriticalRule::new("Temperature", 10.0, 40.0, "out of range");

        assert!(!rule.is_violated(10.0));
        assert!(!rule.is_violated(25.0));
        assert!(!rule.is_violated(40.0));
        assert!(rule.is_violated(9.9));
        assert!(rule.is_violated(40.1));
    }

    #[test]
    fn test_default_rules_cover_known_parameters() {
        let rules = default_rules();
        for name in ["Temperature", "Pressure", "pH", "Sequence Length"] {
            assert!(
                rules.iter().any(|r| r.parameter == name),
                "missing rule for {}",
                name
            );
        }
    }

    #[test]
    fn test_format_alert_message() {
        let alerts = vec![
            Alert {
                parameter: "Temperature".to_string(),
                value: "50°C".to_string(),
                message: "Temperature out of safe range (10-40°C)".to_string(),
            },
            Alert {
                parameter: "pH".to_string(),
                value: "12".to_string(),
                message: "pH out of safe range (5-9)".to_string(),
            },
        ];

        let message = format_alert_message(&alerts);
        assert!(message.starts_with("⚠️ *Critical Parameters Alert*"));
        assert!(message.contains("• Temperature: 50°C - Temperature out of safe range (10-40°C)"));
        assert!(message.contains("• pH: 12 - pH out of safe range (5-9)"));
        assert_eq!(message.lines().count(), 3);
    }
}
