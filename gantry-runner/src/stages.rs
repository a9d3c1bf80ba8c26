//! Local stage collaborators
//!
//! Pipeline file stages run as child processes inside a per-run workspace
//! directory. The workspace stage always runs first and writes the submitted
//! source into that directory.

use async_trait::async_trait;
use gantry_core::domain::submission::Submission;
use gantry_engine::collaborator::interruptible;
use gantry_engine::{
    CancellationToken, Collaborator, Produced, StageError, StageOutput, WorkingContext,
    WorkingTree,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Name of the implicit first stage of every pipeline file
pub const WORKSPACE_STAGE: &str = "Workspace";

/// File name used when a submission carries none
const DEFAULT_SOURCE_NAME: &str = "source";

/// Directory holding the workspace of one run
pub fn run_dir(root: &Path, run_id: Uuid) -> PathBuf {
    root.join(run_id.to_string())
}

/// Name the submitted source is written under
///
/// Rejects names that would escape the run workspace.
fn source_filename(submission: &Submission) -> Result<&str, StageError> {
    let Some(name) = submission.filename() else {
        return Ok(DEFAULT_SOURCE_NAME);
    };

    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| *n == name)
        .ok_or_else(|| StageError::Vcs(format!("invalid filename '{}'", name)))
}

/// Writes the submitted payload into a fresh run workspace
pub struct PrepareWorkspace {
    root: PathBuf,
}

impl PrepareWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Collaborator for PrepareWorkspace {
    async fn run(
        &self,
        ctx: &WorkingContext,
        _cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError> {
        let submission = ctx.submission();
        let filename = source_filename(submission)?;
        let dir = run_dir(&self.root, ctx.run_id());

        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StageError::Vcs(format!("failed to create workspace {}: {}", dir.display(), e))
        })?;

        let path = dir.join(filename);
        tokio::fs::write(&path, &submission.payload)
            .await
            .map_err(|e| StageError::Vcs(format!("failed to write {}: {}", path.display(), e)))?;

        let line = format!(
            "Wrote {} ({} bytes) to {}",
            filename,
            submission.payload.len(),
            dir.display()
        );
        let tree = WorkingTree {
            root: dir,
            revision: Some(submission.id.clone()),
        };
        Ok(StageOutput::produced(Produced::Tree(tree)).with_log(line))
    }
}

/// Runs a command in the run workspace
///
/// Arguments may reference `{file}`, `{workspace}` and `{run_id}`. A
/// non-zero exit fails the stage with the command's stderr as the detail.
/// The child is killed when the stage is cancelled or times out.
pub struct CommandStage {
    program: String,
    args: Vec<String>,
}

impl CommandStage {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn expand_args(&self, file: &str, workspace: &Path, run_id: Uuid) -> Vec<String> {
        let workspace = workspace.display().to_string();
        let run_id = run_id.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{file}", file)
                    .replace("{workspace}", &workspace)
                    .replace("{run_id}", &run_id)
            })
            .collect()
    }
}

#[async_trait]
impl Collaborator for CommandStage {
    async fn run(
        &self,
        ctx: &WorkingContext,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError> {
        let tree = ctx.tree().ok_or_else(|| {
            StageError::other(format!(
                "no workspace available; the {} stage must run first",
                WORKSPACE_STAGE
            ))
        })?;
        let file = source_filename(ctx.submission())?;
        let args = self.expand_args(file, &tree.root, ctx.run_id());

        debug!(
            "Run {}: executing {} {:?} in {}",
            ctx.run_id(),
            self.program,
            args,
            tree.root.display()
        );

        let output = interruptible(cancel, async {
            Command::new(&self.program)
                .args(&args)
                .current_dir(&tree.root)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| StageError::other(format!("failed to run '{}': {}", self.program, e)))
        })
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                format!("'{}' exited with {}", self.program, output.status)
            } else {
                stderr
            };
            return Err(StageError::other(detail));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let out = stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .fold(StageOutput::empty(), |out, line| out.with_log(line));
        Ok(out)
    }
}
