//! Suite runner: every case against every target variant, one at a time

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::case::{RoleTestCase, TargetSpec};
use crate::lifecycle::{TestLifecycle, TestParams};
use crate::playbook::ConfigurationApplier;
use sysapi_common::{Result, RoleInvocation, TargetKind};

/// Result of running a case against one target variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub case: String,
    pub target: String,
    pub kind: TargetKind,
    pub success: bool,
    pub duration_ms: u64,
    pub steps_completed: usize,
    pub error: Option<String>,
}

/// Result of running all cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub started_at: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<CaseResult>,
}

/// Runs role test cases through a [`TestLifecycle`]
pub struct SuiteRunner {
    lifecycle: TestLifecycle,
    applier: ConfigurationApplier,
}

impl SuiteRunner {
    pub fn new(lifecycle: TestLifecycle, applier: ConfigurationApplier) -> Self {
        Self { lifecycle, applier }
    }

    /// Run `cases` in order; failures are recorded, not returned
    pub async fn run_cases(&self, cases: &[RoleTestCase]) -> SuiteResult {
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();
        let mut results = Vec::new();

        info!("Running {} case(s)...", cases.len());

        for case in cases {
            for target in &case.targets {
                let result = self.run_case(case, target).await;
                if result.success {
                    info!("✓ {} [{}] ({} ms)", result.case, result.target, result.duration_ms);
                } else {
                    error!(
                        "✗ {} [{}] - {}",
                        result.case,
                        result.target,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
                results.push(result);
            }
        }

        let passed = results.iter().filter(|r| r.success).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Test Results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        SuiteResult {
            started_at,
            total: results.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    /// Run one case against one target; teardown runs whatever happens
    pub async fn run_case(&self, case: &RoleTestCase, spec: &TargetSpec) -> CaseResult {
        let start = Instant::now();
        let kind = if spec.params.source.is_some() {
            TargetKind::Virtual
        } else {
            TargetKind::Local
        };
        let mut result = CaseResult {
            case: case.name.clone(),
            target: spec.name.clone(),
            kind,
            success: false,
            duration_ms: 0,
            steps_completed: 0,
            error: None,
        };

        let name = format!("{}-{}", case.name, spec.name);
        match self.lifecycle.set_up(&name, &spec.params).await {
            Ok(mut target) => {
                for (idx, step) in case.steps.iter().enumerate() {
                    debug!("{}: step {}/{}", name, idx + 1, case.steps.len());
                    match self.applier.apply(&target, &case.invocation(step)).await {
                        Ok(_) => result.steps_completed += 1,
                        Err(e) => {
                            result.error = Some(format!("step {}: {}", idx + 1, e));
                            break;
                        }
                    }
                }

                if let Err(e) = self.lifecycle.tear_down(&mut target) {
                    warn!("Teardown of {} failed: {}", name, e);
                    result.error.get_or_insert_with(|| format!("teardown: {}", e));
                }
            }
            Err(e) => result.error = Some(format!("setup: {}", e)),
        }

        result.success = result.error.is_none();
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    /// Set up a target, apply `invocation` once and tear the target down.
    ///
    /// A failed apply is returned even when teardown fails too; the teardown
    /// error is then only logged.
    pub async fn apply_once(
        &self,
        invocation: &RoleInvocation,
        params: &TestParams,
    ) -> Result<String> {
        let name = invocation.role_dir_name();
        let mut target = self.lifecycle.set_up(&name, params).await?;

        let outcome = self.applier.apply(&target, invocation).await;
        match (outcome, self.lifecycle.tear_down(&mut target)) {
            (Err(e), Err(teardown_err)) => {
                warn!("Teardown of {} failed: {}", name, teardown_err);
                Err(e)
            }
            (Ok(_), Err(teardown_err)) => Err(teardown_err),
            (outcome, Ok(())) => outcome,
        }
    }

    /// Write suite results as JSON into `dir`
    pub fn write_results(&self, results: &SuiteResult, dir: &std::path::Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join("results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use std::sync::Arc;
    use sysapi_common::testing::RecordingRunner;
    use sysapi_common::CommandLine;

    fn runner_for(root: &std::path::Path, commands: &RecordingRunner) -> SuiteRunner {
        let mut config = HarnessConfig::default();
        config.paths.workdir_root = root.to_path_buf();
        config.paths.roles_dir = root.join("roles");
        let ansible = config.ansible.clone();
        SuiteRunner::new(
            TestLifecycle::new(config, Arc::new(commands.clone())),
            ConfigurationApplier::new(Arc::new(commands.clone()), ansible),
        )
    }

    fn tuned_case() -> RoleTestCase {
        RoleTestCase::from_yaml(
            r#"
name: tuned
role: com.redhat.tuned
steps:
  - params: {profile: balanced}
  - params: {profile: powersave}
  - params: {use_recommended_profile: true}
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_all_steps_run_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let commands = RecordingRunner::succeeding();
        let suite = runner_for(dir.path(), &commands);

        let results = suite.run_cases(&[tuned_case()]).await;

        assert_eq!(results.total, 1);
        assert_eq!(results.passed, 1);
        assert_eq!(results.results[0].steps_completed, 3);
        assert_eq!(results.results[0].kind, TargetKind::Local);
        assert_eq!(commands.calls_to("ansible-playbook").len(), 3);
    }

    #[tokio::test]
    async fn test_first_failing_step_stops_the_case() {
        let dir = tempfile::tempdir().unwrap();
        let commands = RecordingRunner::with_responder(|command: &CommandLine| {
            if command.program() == Some("ansible-playbook") {
                Err(sysapi_common::testing::failure(command, 2))
            } else {
                Ok(String::new())
            }
        });
        let suite = runner_for(dir.path(), &commands);

        let results = suite.run_cases(&[tuned_case()]).await;

        assert_eq!(results.failed, 1);
        let result = &results.results[0];
        assert_eq!(result.steps_completed, 0);
        assert!(result.error.as_deref().unwrap().starts_with("step 1:"));
        assert_eq!(commands.calls_to("ansible-playbook").len(), 1);
    }

    #[tokio::test]
    async fn test_setup_failure_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let commands = RecordingRunner::succeeding();
        let suite = runner_for(dir.path(), &commands);

        let mut case = tuned_case();
        case.targets = vec![TargetSpec {
            name: "missing".to_string(),
            params: crate::lifecycle::TestParams {
                source: Some("/nonexistent/disk.qcow2".to_string()),
                setup: None,
            },
        }];

        let results = suite.run_cases(&[case]).await;
        let result = &results.results[0];
        assert!(!result.success);
        assert_eq!(result.kind, TargetKind::Virtual);
        assert!(result.error.as_deref().unwrap().starts_with("setup:"));
        assert!(commands.calls().is_empty());
    }

    fn discarding_runner_for(root: &std::path::Path, commands: &RecordingRunner) -> SuiteRunner {
        let mut config = HarnessConfig::default();
        config.paths.workdir_root = root.to_path_buf();
        config.paths.roles_dir = root.join("roles");
        config.paths.keep_workdirs = false;
        let ansible = config.ansible.clone();
        SuiteRunner::new(
            TestLifecycle::new(config, Arc::new(commands.clone())),
            ConfigurationApplier::new(Arc::new(commands.clone()), ansible),
        )
    }

    /// ansible-playbook fails after replacing its workdir with a plain file,
    /// so removing the workdir afterwards fails as well.
    fn playbook_failing_with_broken_workdir() -> RecordingRunner {
        RecordingRunner::with_responder(|command: &CommandLine| {
            if let CommandLine::Argv(args) = command {
                if command.program() == Some("ansible-playbook") {
                    let inventory = args.iter().skip_while(|a| *a != "-i").nth(1).unwrap();
                    let workdir = std::path::Path::new(inventory).parent().unwrap();
                    std::fs::remove_dir_all(workdir).unwrap();
                    std::fs::write(workdir, b"not a directory").unwrap();
                    return Err(sysapi_common::testing::failure(command, 2));
                }
            }
            Ok(String::new())
        })
    }

    #[tokio::test]
    async fn test_apply_once_returns_playbook_output() {
        let dir = tempfile::tempdir().unwrap();
        let commands = RecordingRunner::with_responder(|_: &CommandLine| Ok("ok=1\n".to_string()));
        let suite = discarding_runner_for(dir.path(), &commands);

        let stdout = suite
            .apply_once(
                &RoleInvocation::new("com.redhat.tuned").with_param("profile", "balanced"),
                &TestParams::default(),
            )
            .await
            .unwrap();

        assert_eq!(stdout, "ok=1\n");
        assert_eq!(commands.calls_to("ansible-playbook").len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_apply_once_reports_playbook_failure_over_teardown_failure() {
        let dir = tempfile::tempdir().unwrap();
        let commands = playbook_failing_with_broken_workdir();
        let suite = discarding_runner_for(dir.path(), &commands);

        let err = suite
            .apply_once(
                &RoleInvocation::new("com.redhat.tuned").with_param("profile", "powersave"),
                &TestParams::default(),
            )
            .await
            .unwrap_err();

        match err {
            sysapi_common::Error::Command(err) => assert_eq!(err.result.exit_code, 2),
            other => panic!("expected the playbook failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let suite = runner_for(dir.path(), &RecordingRunner::succeeding());
        let results = suite.run_cases(&[]).await;

        let path = suite
            .write_results(&results, &dir.path().join("out"))
            .unwrap();
        let written: SuiteResult =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written.total, 0);
    }
}
