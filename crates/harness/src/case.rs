//! Declarative YAML role test cases

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::lifecycle::TestParams;
use sysapi_common::{Params, Result, RoleInvocation};

/// A role test parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleTestCase {
    /// Unique name for this test
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering tests
    #[serde(default)]
    pub tags: Vec<String>,

    /// Dotted role name, e.g. `com.redhat.tuned`
    pub role: String,

    /// Machines to run against; the local host when empty
    #[serde(default = "default_targets")]
    pub targets: Vec<TargetSpec>,

    /// Configurations applied in order
    pub steps: Vec<ApplyStep>,
}

fn default_targets() -> Vec<TargetSpec> {
    vec![TargetSpec::local()]
}

/// One machine variant a case runs against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,

    #[serde(flatten)]
    pub params: TestParams,
}

impl TargetSpec {
    pub fn local() -> Self {
        Self {
            name: "local".to_string(),
            params: TestParams::default(),
        }
    }
}

/// A single role application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyStep {
    #[serde(default)]
    pub params: Params,

    /// Task file under the role's `test/` directory run after the role
    #[serde(default)]
    pub test_tasks_file: Option<String>,
}

impl RoleTestCase {
    /// Parse a test case from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut case: Self = serde_yaml::from_str(yaml)?;
        if case.targets.is_empty() {
            case.targets = default_targets();
        }
        Ok(case)
    }

    /// Parse a test case from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load all test cases from a directory, ordered by path
    pub fn load_all(dir: &Path) -> Result<Vec<Self>> {
        let mut cases = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            cases.push(Self::from_file(entry.path())?);
        }

        Ok(cases)
    }

    /// The role invocation for `step`
    pub fn invocation(&self, step: &ApplyStep) -> RoleInvocation {
        RoleInvocation {
            role_name: self.role.clone(),
            params: step.params.clone(),
            test_tasks_file: step.test_tasks_file.clone(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
