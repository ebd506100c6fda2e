//! Deployment dictionary
//!
//! Provides the default approval organization, the optional-approval workflow
//! flags and the map of known assessment definitions with the authorization
//! groups granting access to each.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Payload field that must echo the declared recurrence of an assessment
pub const RECURRENCE_FIELD: &str = "__recurrence";

/// Deployment dictionary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dictionary {
    /// Organization whose chain applies when the author has no position
    #[serde(default)]
    pub default_approval_organization: Option<Uuid>,

    /// Optional-approval flags
    #[serde(default)]
    pub workflow: WorkflowFlags,

    /// Known assessment definitions by key
    #[serde(default)]
    pub assessments: BTreeMap<String, AssessmentDefinition>,
}

/// Whether an empty approval chain auto-approves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFlags {
    /// Empty report-approval chain auto-approves (default: false)
    #[serde(default)]
    pub report_approval_optional: bool,

    /// Empty planning-approval chain auto-approves (default: true)
    #[serde(default = "default_true")]
    pub planning_approval_optional: bool,
}

impl Default for WorkflowFlags {
    fn default() -> Self {
        Self {
            report_approval_optional: false,
            planning_approval_optional: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One assessment definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentDefinition {
    /// Recurrence code (`once`, `ondemand` or a periodic code)
    pub recurrence: String,

    /// Groups granting read access; absent means readable by anyone
    #[serde(default)]
    pub read: Option<Vec<Uuid>>,

    /// Groups granting write (and read) access; absent means writable by anyone
    #[serde(default)]
    pub write: Option<Vec<Uuid>>,
}

/// Periodic recurrence codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Biweekly,
    Semimonthly,
    Monthly,
    Quarterly,
    Semiannually,
    Annually,
}

impl Period {
    pub const ALL: [Period; 8] = [
        Period::Daily,
        Period::Weekly,
        Period::Biweekly,
        Period::Semimonthly,
        Period::Monthly,
        Period::Quarterly,
        Period::Semiannually,
        Period::Annually,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Biweekly => "biweekly",
            Period::Semimonthly => "semimonthly",
            Period::Monthly => "monthly",
            Period::Quarterly => "quarterly",
            Period::Semiannually => "semiannually",
            Period::Annually => "annually",
        }
    }
}

/// Declared cadence policy of an assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recurrence {
    /// Instant assessment attached to a report
    Once,
    /// Ad-hoc assessment of a person or organization
    OnDemand,
    /// Recurring assessment of a person, organization or task
    Periodic(Period),
}

impl Recurrence {
    /// Parse a recurrence code; `None` for unknown codes
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "once" => Some(Recurrence::Once),
            "ondemand" => Some(Recurrence::OnDemand),
            other => Period::ALL
                .into_iter()
                .find(|p| p.code() == other)
                .map(Recurrence::Periodic),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Recurrence::Once => "once",
            Recurrence::OnDemand => "ondemand",
            Recurrence::Periodic(period) => period.code(),
        }
    }
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Dictionary {
    /// Parse a dictionary from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let dictionary: Dictionary = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse dictionary: {}", e)))?;
        dictionary.validate()?;
        Ok(dictionary)
    }

    /// Load a dictionary from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject definitions whose recurrence code is unknown
    pub fn validate(&self) -> Result<()> {
        for (key, definition) in &self.assessments {
            if Recurrence::parse(&definition.recurrence).is_none() {
                return Err(Error::Config(format!(
                    "Assessment '{}' declares unknown recurrence '{}'",
                    key, definition.recurrence
                )));
            }
        }
        Ok(())
    }

    /// Look up an assessment definition
    pub fn assessment(&self, key: &str) -> Option<&AssessmentDefinition> {
        self.assessments.get(key)
    }

    /// Whether an empty chain of the given kind auto-approves
    pub fn approval_optional(&self, planned: bool) -> bool {
        if planned {
            self.workflow.planning_approval_optional
        } else {
            self.workflow.report_approval_optional
        }
    }
}
