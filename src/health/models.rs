use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::fmt;

/// The fixed set of dependency checks that make up stamp health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProbeIdentity {
    Storage,
    Producer,
    Database,
    Telemetry,
}

impl ProbeIdentity {
    /// All identities in the order they are reported.
    pub const ALL: [ProbeIdentity; 4] = [
        ProbeIdentity::Storage,
        ProbeIdentity::Producer,
        ProbeIdentity::Database,
        ProbeIdentity::Telemetry,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Storage => 0,
            Self::Producer => 1,
            Self::Database => 2,
            Self::Telemetry => 3,
        }
    }

    /// Key under which the result cache holds this check.
    pub fn cache_key(self) -> &'static str {
        match self {
            Self::Storage => "stateBlobHealth",
            Self::Producer => "stateMessageProducerHealth",
            Self::Database => "stateDatabaseHealth",
            Self::Telemetry => "stateAzMonitorHealth",
        }
    }

    /// Key used in the health response payload.
    pub fn detail_key(self) -> &'static str {
        match self {
            Self::Storage => "StateBlobHealthy",
            Self::Producer => "MessageProducerServiceHealthy",
            Self::Database => "DatabaseServiceHealthy",
            Self::Telemetry => "StampHealthScoreOk",
        }
    }
}

impl fmt::Display for ProbeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cache_key())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// A single row of the stamp health score table.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthScoreSample {
    pub time_generated: DateTime<Utc>,
    pub health_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOutcome {
    pub identity: ProbeIdentity,
    pub healthy: bool,
}

/// Outcome of one aggregation cycle.
///
/// The overall status is healthy only when every individual check is healthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateResult {
    status: HealthStatus,
    checks: Vec<CheckOutcome>,
}

impl AggregateResult {
    pub fn from_outcomes(checks: Vec<CheckOutcome>) -> Self {
        let status = if checks.iter().all(|check| check.healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        Self { status, checks }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn checks(&self) -> &[CheckOutcome] {
        &self.checks
    }

    pub fn outcome(&self, identity: ProbeIdentity) -> Option<bool> {
        self.checks
            .iter()
            .find(|check| check.identity == identity)
            .map(|check| check.healthy)
    }
}

struct Detail<'a>(&'a [CheckOutcome]);

impl Serialize for Detail<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for check in self.0 {
            map.serialize_entry(check.identity.detail_key(), &check.healthy)?;
        }
        map.end()
    }
}

impl Serialize for AggregateResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AggregateResult", 2)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field("data", &Detail(&self.checks))?;
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthError {
    #[error("health check was cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes(values: [bool; 4]) -> Vec<CheckOutcome> {
        ProbeIdentity::ALL
            .iter()
            .zip(values)
            .map(|(identity, healthy)| CheckOutcome {
                identity: *identity,
                healthy,
            })
            .collect()
    }

    #[test]
    fn test_overall_status_is_and_of_all_checks() {
        for mask in 0u8..16 {
            let values = [mask & 1 != 0, mask & 2 != 0, mask & 4 != 0, mask & 8 != 0];
            let result = AggregateResult::from_outcomes(outcomes(values));

            assert_eq!(
                result.is_healthy(),
                values.iter().all(|v| *v),
                "combination {:?}",
                values
            );
        }
    }

    #[test]
    fn test_serializes_detail_keys_in_order() {
        let result = AggregateResult::from_outcomes(outcomes([true, false, true, true]));
        let json = serde_json::to_string(&result).unwrap();

        assert_eq!(
            json,
            r#"{"status":"Unhealthy","data":{"StateBlobHealthy":true,"MessageProducerServiceHealthy":false,"DatabaseServiceHealthy":true,"StampHealthScoreOk":true}}"#
        );
    }

    #[test]
    fn test_outcome_lookup() {
        let result = AggregateResult::from_outcomes(outcomes([true, true, false, true]));

        assert_eq!(result.outcome(ProbeIdentity::Database), Some(false));
        assert_eq!(result.outcome(ProbeIdentity::Telemetry), Some(true));
        assert_eq!(result.status(), HealthStatus::Unhealthy);
    }
}
