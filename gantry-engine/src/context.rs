//! Working context threaded through the stages of a run
//!
//! Each stage reads what earlier stages produced (checked-out tree, built
//! artifact, deployed instance) from the context. The scheduler applies a
//! stage's output only after the stage succeeds, so a stage never observes
//! partial results from a failed predecessor.

use gantry_core::domain::submission::Submission;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Source tree produced by a checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingTree {
    pub root: PathBuf,
    pub revision: Option<String>,
}

/// Build output consumed by test, package and deploy stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub location: PathBuf,
}

/// Outcome of a test run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestReport {
    pub passed: u32,
    pub failed: u32,
    pub details: Vec<String>,
}

/// A deployed, reachable instance of the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningInstance {
    pub url: String,
}

/// Typed value a stage hands to the stages after it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Produced {
    #[default]
    Nothing,
    Tree(WorkingTree),
    Artifact(Artifact),
    Report(TestReport),
    Instance(RunningInstance),
}

/// Successful result of one collaborator call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    pub produced: Produced,
    pub log_lines: Vec<String>,
}

impl StageOutput {
    /// Output that produces nothing for later stages
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn produced(produced: Produced) -> Self {
        Self {
            produced,
            log_lines: Vec::new(),
        }
    }

    /// Adds a line to be narrated in the run log
    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.log_lines.push(line.into());
        self
    }
}

/// Data handed from one stage to the next
#[derive(Debug, Clone)]
pub struct WorkingContext {
    run_id: Uuid,
    submission: Arc<Submission>,
    tree: Option<WorkingTree>,
    artifact: Option<Artifact>,
    report: Option<TestReport>,
    instance: Option<RunningInstance>,
}

impl WorkingContext {
    pub fn new(run_id: Uuid, submission: Submission) -> Self {
        Self {
            run_id,
            submission: Arc::new(submission),
            tree: None,
            artifact: None,
            report: None,
            instance: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn submission(&self) -> &Submission {
        &self.submission
    }

    pub fn tree(&self) -> Option<&WorkingTree> {
        self.tree.as_ref()
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    pub fn report(&self) -> Option<&TestReport> {
        self.report.as_ref()
    }

    pub fn instance(&self) -> Option<&RunningInstance> {
        self.instance.as_ref()
    }

    /// Records what a successful stage produced
    pub fn apply(&mut self, produced: Produced) {
        match produced {
            Produced::Nothing => {}
            Produced::Tree(tree) => self.tree = Some(tree),
            Produced::Artifact(artifact) => self.artifact = Some(artifact),
            Produced::Report(report) => self.report = Some(report),
            Produced::Instance(instance) => self.instance = Some(instance),
        }
    }
}
