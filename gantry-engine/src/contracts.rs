//! Collaborator contracts
//!
//! Typed interfaces for the external systems a CI pipeline calls into, and
//! adapter stages binding each of them to the generic [`Collaborator`]
//! trait. Each adapter reads its input from the working context and hands
//! its typed result on to later stages.
//!
//! The adapters stop waiting on the external call as soon as the run is
//! cancelled.

use async_trait::async_trait;
use gantry_core::domain::run::PipelineRun;
use tokio_util::sync::CancellationToken;

use crate::collaborator::{Collaborator, interruptible};
use crate::context::{
    Artifact, Produced, RunningInstance, StageOutput, TestReport, WorkingContext, WorkingTree,
};
use crate::error::StageError;

/// Submission metadata key naming the revision to check out
pub const REF_KEY: &str = "ref";

/// Version control client
#[async_trait]
pub trait VcsClient: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<WorkingTree, StageError>;
}

/// Compilation and packaging toolchain
#[async_trait]
pub trait BuildTool: Send + Sync {
    async fn build(&self, tree: &WorkingTree) -> Result<Artifact, StageError>;
}

/// Test runner
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn test(&self, artifact: &Artifact) -> Result<TestReport, StageError>;
}

/// Deploys an artifact and starts it
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, artifact: &Artifact) -> Result<RunningInstance, StageError>;
}

/// Expected content of one element of a deployed page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub selector: String,
    pub expected: String,
}

impl Assertion {
    pub fn new(selector: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            expected: expected.into(),
        }
    }
}

/// Verdict of a browser validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail { reason: String },
}

/// Headless browser check against a deployed instance
///
/// May be slow and occasionally flaky; stage retries are the mitigation.
#[async_trait]
pub trait BrowserValidator: Send + Sync {
    async fn validate(&self, url: &str, assertions: &[Assertion]) -> Verdict;
}

/// Publishes the final snapshot of a run
///
/// Publishing is fire-and-forget: failures are logged, never fatal.
#[async_trait]
pub trait ReportPublisher: Send + Sync {
    async fn publish(&self, run: &PipelineRun) -> Result<(), StageError>;
}

fn require<'a, T>(value: Option<&'a T>, what: &str) -> Result<&'a T, StageError> {
    value.ok_or_else(|| {
        StageError::other(format!(
            "no {} available; an earlier stage must produce one",
            what
        ))
    })
}

/// Checks out the submission's revision
pub struct CheckoutStage<V> {
    vcs: V,
}

impl<V: VcsClient> CheckoutStage<V> {
    pub fn new(vcs: V) -> Self {
        Self { vcs }
    }
}

#[async_trait]
impl<V: VcsClient> Collaborator for CheckoutStage<V> {
    async fn run(
        &self,
        ctx: &WorkingContext,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError> {
        let submission = ctx.submission();
        let reference = submission
            .metadata
            .get(REF_KEY)
            .map(String::as_str)
            .unwrap_or(&submission.id);

        let tree = interruptible(cancel, self.vcs.fetch(reference)).await?;
        let line = format!("Checked out {} into {}", reference, tree.root.display());
        Ok(StageOutput::produced(Produced::Tree(tree)).with_log(line))
    }
}

/// Builds the checked-out tree
pub struct BuildStage<B> {
    tool: B,
}

impl<B: BuildTool> BuildStage<B> {
    pub fn new(tool: B) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl<B: BuildTool> Collaborator for BuildStage<B> {
    async fn run(
        &self,
        ctx: &WorkingContext,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError> {
        let tree = require(ctx.tree(), "working tree")?;
        let artifact = interruptible(cancel, self.tool.build(tree)).await?;
        let line = format!("Built artifact {}", artifact.name);
        Ok(StageOutput::produced(Produced::Artifact(artifact)).with_log(line))
    }
}

/// Runs the test suite against the built artifact
///
/// Any failed test fails the stage.
pub struct TestStage<T> {
    runner: T,
}

impl<T: TestRunner> TestStage<T> {
    pub fn new(runner: T) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl<T: TestRunner> Collaborator for TestStage<T> {
    async fn run(
        &self,
        ctx: &WorkingContext,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError> {
        let artifact = require(ctx.artifact(), "artifact")?;
        let report = interruptible(cancel, self.runner.test(artifact)).await?;

        if report.failed > 0 {
            let mut message = format!(
                "{} of {} tests failed",
                report.failed,
                report.passed + report.failed
            );
            if !report.details.is_empty() {
                message.push_str(": ");
                message.push_str(&report.details.join("; "));
            }
            return Err(StageError::Test(message));
        }

        let line = format!("{} tests passed", report.passed);
        Ok(StageOutput::produced(Produced::Report(report)).with_log(line))
    }
}

/// Deploys the built artifact
pub struct DeployStage<D> {
    deployer: D,
}

impl<D: Deployer> DeployStage<D> {
    pub fn new(deployer: D) -> Self {
        Self { deployer }
    }
}

#[async_trait]
impl<D: Deployer> Collaborator for DeployStage<D> {
    async fn run(
        &self,
        ctx: &WorkingContext,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError> {
        let artifact = require(ctx.artifact(), "artifact")?;
        let instance = interruptible(cancel, self.deployer.deploy(artifact)).await?;
        let line = format!("Deployed {} to {}", artifact.name, instance.url);
        Ok(StageOutput::produced(Produced::Instance(instance)).with_log(line))
    }
}

/// Validates the deployed instance in a browser
pub struct ValidateStage<V> {
    validator: V,
    assertions: Vec<Assertion>,
}

impl<V: BrowserValidator> ValidateStage<V> {
    pub fn new(validator: V, assertions: Vec<Assertion>) -> Self {
        Self {
            validator,
            assertions,
        }
    }
}

#[async_trait]
impl<V: BrowserValidator> Collaborator for ValidateStage<V> {
    async fn run(
        &self,
        ctx: &WorkingContext,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError> {
        let instance = require(ctx.instance(), "running instance")?;
        let verdict = interruptible(cancel, async {
            Ok::<_, StageError>(self.validator.validate(&instance.url, &self.assertions).await)
        })
        .await?;

        match verdict {
            Verdict::Pass => Ok(StageOutput::empty().with_log(format!(
                "Validated {} ({} assertions)",
                instance.url,
                self.assertions.len()
            ))),
            Verdict::Fail { reason } => Err(StageError::Validation { reason }),
        }
    }
}
