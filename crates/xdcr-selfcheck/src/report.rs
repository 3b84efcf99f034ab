//! JSON run report.

use std::path::Path;

use serde::Serialize;
use xdcr_error::{Result, SelfCheckError};
use xdcr_types::hex::hex;

use crate::client::ScenarioRun;
use crate::scenario::ScenarioOutcome;
use crate::taxonomy::ConflictCategory;
use crate::verifier::VerificationReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub class: String,
    pub exit_code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
}

impl From<&SelfCheckError> for ErrorReport {
    fn from(err: &SelfCheckError) -> Self {
        Self {
            class: format!("{:?}", err.failure_class()),
            exit_code: err.exit_code(),
            message: err.to_string(),
            suggestion: err.suggestion(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadReport {
    pub name: &'static str,
    pub key_hex: String,
    pub value_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub round: u32,
    pub category: ConflictCategory,
    pub table: String,
    pub cid: u8,
    pub rid: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ScenarioOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_error: Option<ErrorReport>,
    pub payloads: Vec<PayloadReport>,
    pub elapsed_ms: u64,
}

impl ScenarioReport {
    pub fn from_run(round: u32, run: &ScenarioRun) -> Self {
        let (outcome, error) = match &run.result {
            Ok(outcome) => (Some(outcome.clone()), None),
            Err(err) => (None, Some(ErrorReport::from(err))),
        };
        Self {
            round,
            category: run.category,
            table: run.table.name().to_owned(),
            cid: run.cid,
            rid: run.rid,
            outcome,
            error,
            reset_error: run.reset_error.as_ref().map(ErrorReport::from),
            payloads: run
                .payloads
                .iter()
                .map(|named| PayloadReport {
                    name: named.name,
                    key_hex: hex(named.payload.key()),
                    value_len: named.payload.value().len(),
                })
                .collect(),
            elapsed_ms: u64::try_from(run.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub const fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub scenarios: usize,
    pub conflicts_provoked: usize,
    pub no_conflict: usize,
    pub failed: usize,
    /// Scenarios whose partition could not be reset, whatever their outcome.
    pub reset_failures: usize,
    pub records_verified: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelfCheckReport {
    pub seed: u64,
    pub cid: u8,
    pub rounds: u32,
    pub scenarios: Vec<ScenarioReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_error: Option<ErrorReport>,
    pub summary: Summary,
}

impl SelfCheckReport {
    pub fn new(seed: u64, cid: u8, rounds: u32, scenarios: Vec<ScenarioReport>) -> Self {
        let mut report = Self {
            seed,
            cid,
            rounds,
            scenarios,
            verification: None,
            verification_error: None,
            summary: Summary::default(),
        };
        report.summarize();
        report
    }

    pub fn set_verification(&mut self, result: Result<VerificationReport>) {
        match result {
            Ok(verification) => self.verification = Some(verification),
            Err(err) => self.verification_error = Some(ErrorReport::from(&err)),
        }
        self.summarize();
    }

    fn summarize(&mut self) {
        let mut summary = Summary {
            scenarios: self.scenarios.len(),
            ..Summary::default()
        };
        for scenario in &self.scenarios {
            match &scenario.outcome {
                Some(ScenarioOutcome::ConflictProvoked { .. }) => summary.conflicts_provoked += 1,
                Some(ScenarioOutcome::NoConflict { .. }) => summary.no_conflict += 1,
                None => summary.failed += 1,
            }
            if scenario.reset_error.is_some() {
                summary.reset_failures += 1;
            }
        }
        summary.records_verified = self
            .verification
            .as_ref()
            .map_or(0, VerificationReport::records_verified);
        self.summary = summary;
    }

    pub fn passed(&self) -> bool {
        self.summary.failed == 0
            && self.summary.reset_failures == 0
            && self.verification_error.is_none()
    }

    /// Zero on success, otherwise the exit code of the first failure.
    /// Scenario failures rank ahead of reset failures.
    pub fn exit_code(&self) -> i32 {
        self.scenarios
            .iter()
            .filter_map(|s| s.error.as_ref())
            .chain(self.scenarios.iter().filter_map(|s| s.reset_error.as_ref()))
            .chain(self.verification_error.as_ref())
            .map(|e| e.exit_code)
            .next()
            .unwrap_or(0)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
