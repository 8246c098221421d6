use std::collections::BTreeMap;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::runtime::AppState;

pub const SERVICE_NAME: &str = "storefront-gateway";

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub status: CheckStatus,
    pub timestamp: String,
    pub service: &'static str,
    pub version: &'static str,
    pub checks: BTreeMap<&'static str, CheckResult>,
}

impl ReadinessReport {
    fn from_checks(checks: BTreeMap<&'static str, CheckResult>) -> Self {
        let status = checks
            .values()
            .map(|c| c.status)
            .max_by_key(|s| match s {
                CheckStatus::Healthy => 0,
                CheckStatus::Degraded => 1,
                CheckStatus::Unhealthy => 2,
            })
            .unwrap_or(CheckStatus::Healthy);

        Self {
            status,
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            service: SERVICE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            checks,
        }
    }
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Ready once a supergraph is active. A failing reload keeps the gateway
/// ready on the last good supergraph but reports it as degraded.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.source.status();
    let supergraph = match (state.source.current().is_some(), status.last_error) {
        (false, error) => CheckResult {
            status: CheckStatus::Unhealthy,
            message: Some(error.unwrap_or_else(|| "supergraph not loaded".into())),
        },
        (true, Some(error)) => CheckResult {
            status: CheckStatus::Degraded,
            message: Some(error),
        },
        (true, None) => CheckResult {
            status: CheckStatus::Healthy,
            message: None,
        },
    };

    let report = ReadinessReport::from_checks(BTreeMap::from([("supergraph", supergraph)]));
    let code = if report.status == CheckStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(status: CheckStatus) -> CheckResult {
        CheckResult {
            status,
            message: None,
        }
    }

    #[test]
    fn test_overall_status_is_worst_check() {
        let report = ReadinessReport::from_checks(BTreeMap::from([
            ("a", check(CheckStatus::Healthy)),
            ("b", check(CheckStatus::Degraded)),
        ]));
        assert_eq!(report.status, CheckStatus::Degraded);

        let report = ReadinessReport::from_checks(BTreeMap::from([
            ("a", check(CheckStatus::Unhealthy)),
            ("b", check(CheckStatus::Degraded)),
        ]));
        assert_eq!(report.status, CheckStatus::Unhealthy);

        assert_eq!(
            ReadinessReport::from_checks(BTreeMap::new()).status,
            CheckStatus::Healthy
        );
    }

    #[test]
    fn test_report_serialization() {
        let report =
            ReadinessReport::from_checks(BTreeMap::from([("supergraph", check(CheckStatus::Healthy))]));
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["status"], "healthy");
        assert_eq!(value["service"], "storefront-gateway");
        assert_eq!(value["checks"]["supergraph"], serde_json::json!({"status": "healthy"}));
    }
}
