//! sysapi-test
//!
//! Applies Ansible roles to the local host or to a throwaway QEMU machine and
//! runs the roles' verification tasks.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sysapi_common::{parse_param, CommandRunner, RoleInvocation, ShellRunner, TracingSink};
use sysapi_harness::{
    ConfigurationApplier, HarnessConfig, RoleTestCase, SuiteRunner, TestLifecycle, TestParams,
};

#[derive(Parser)]
#[command(name = "sysapi-test")]
#[command(about = "Role integration tests against the local host or a throwaway VM")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "sysapi-test.toml", global = true)]
    config: PathBuf,

    /// Shared roles directory
    #[arg(long, env = "SYSAPI_ROLES_DIR", global = true)]
    roles_dir: Option<PathBuf>,

    /// Root for per-test working directories
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply one role once
    Apply {
        /// Dotted role name, e.g. com.redhat.tuned
        #[arg(short, long)]
        role: String,

        /// Role parameter as key=value (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Task file in the role's test/ directory to run afterwards
        #[arg(short, long)]
        test_tasks_file: Option<String>,

        /// Disk image path or URL; runs against a VM when given
        #[arg(short, long)]
        source: Option<String>,

        /// Command run on the VM once it is up
        #[arg(long)]
        setup: Option<String>,
    },

    /// Write the effective configuration to the --config path
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run YAML test cases
    Run {
        /// Directory containing test cases
        #[arg(long, default_value = "tests/cases")]
        cases: PathBuf,

        /// Run only cases with this tag
        #[arg(short, long)]
        tag: Option<String>,

        /// Run only the case with this name
        #[arg(short, long)]
        name: Option<String>,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("sysapi-test v{}", sysapi_common::VERSION);

    let mut config = HarnessConfig::load(&cli.config)?;
    if let Some(roles_dir) = cli.roles_dir {
        config.paths.roles_dir = roles_dir;
    }
    if let Some(workdir) = cli.workdir {
        config.paths.workdir_root = workdir;
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::with_sink(Arc::new(TracingSink)));
    let applier = ConfigurationApplier::new(runner.clone(), config.ansible.clone());
    let results_dir = config.paths.results_dir.clone();

    match cli.command {
        Commands::Init { force } => {
            if cli.config.exists() && !force {
                anyhow::bail!(
                    "{} already exists, pass --force to overwrite it",
                    cli.config.display()
                );
            }
            config.save(&cli.config)?;
            info!("Configuration written to {}", cli.config.display());
        }
        Commands::Apply {
            role,
            params,
            test_tasks_file,
            source,
            setup,
        } => {
            let mut invocation = RoleInvocation::new(role);
            for assignment in &params {
                let (key, value) = parse_param(assignment)?;
                invocation.params.insert(key, value);
            }
            invocation.test_tasks_file = test_tasks_file;

            let suite = SuiteRunner::new(TestLifecycle::new(config, runner), applier);
            let stdout = suite
                .apply_once(&invocation, &TestParams { source, setup })
                .await?;
            print!("{}", stdout);
            info!("Role {} applied", invocation.role_name);
        }
        Commands::Run {
            cases,
            tag,
            name,
            output,
        } => {
            let mut selected = RoleTestCase::load_all(&cases)?;
            if let Some(tag) = &tag {
                selected.retain(|c| c.has_tag(tag));
            }
            if let Some(name) = &name {
                selected.retain(|c| &c.name == name);
                if selected.is_empty() {
                    anyhow::bail!("Test case not found: {}", name);
                }
            }

            let output = output.unwrap_or(results_dir);
            let suite = SuiteRunner::new(TestLifecycle::new(config, runner), applier);
            let results = suite.run_cases(&selected).await;
            suite.write_results(&results, &output)?;

            if results.failed > 0 {
                error!("{} of {} case run(s) failed", results.failed, results.total);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
