//! Asset actions: what materializing an asset actually does.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use snafu::ResultExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use floe_ingest::{
    CollectionConfig, CollectionKey, IngestError, TableLocks, WarehouseClient, ingest_collection,
};

use crate::error::{AssetError, IngestSnafu, SpawnSnafu};
use crate::graph::AssetKey;

/// Lines of stderr kept in a command failure.
const STDERR_TAIL_LINES: usize = 20;

/// Per-materialization context handed to an action.
#[derive(Debug, Clone)]
pub struct AssetContext {
    pub asset: AssetKey,
    pub run_id: String,
    pub shutdown: CancellationToken,
}

/// What a successful materialization produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeOutput {
    pub rows_written: usize,
    pub records_skipped: usize,
    pub batch_rows: Vec<usize>,
    pub message: Option<String>,
}

/// Materializes one asset.
#[async_trait]
pub trait AssetAction: Send + Sync {
    async fn materialize(&self, ctx: &AssetContext) -> Result<MaterializeOutput, AssetError>;
}

/// Loads one collection into its table.
pub struct IngestAction {
    key: CollectionKey,
    config: CollectionConfig,
    client: Arc<dyn WarehouseClient>,
    locks: TableLocks,
}

impl IngestAction {
    pub fn new(
        key: CollectionKey,
        config: CollectionConfig,
        client: Arc<dyn WarehouseClient>,
        locks: TableLocks,
    ) -> Self {
        Self {
            key,
            config,
            client,
            locks,
        }
    }
}

#[async_trait]
impl AssetAction for IngestAction {
    async fn materialize(&self, ctx: &AssetContext) -> Result<MaterializeOutput, AssetError> {
        let report = match ingest_collection(
            &self.key,
            &self.config,
            self.client.clone(),
            &self.locks,
            &ctx.shutdown,
        )
        .await
        {
            Err(IngestError::Cancelled { .. }) => return Err(AssetError::RunCancelled),
            result => result.context(IngestSnafu)?,
        };

        Ok(MaterializeOutput {
            rows_written: report.rows_written,
            records_skipped: report.records_skipped,
            message: Some(format!(
                "{} rows in {} batches from {} files into '{}'",
                report.rows_written, report.batches, report.files_read, report.table
            )),
            batch_rows: report.batch_rows,
        })
    }
}

/// Runs an external command, e.g. the transformation build.
///
/// The command is killed if the run is cancelled.
#[derive(Debug, Clone)]
pub struct CommandAction {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: IndexMap<String, String>,
}

impl CommandAction {
    /// `command` is the program followed by its arguments.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            working_dir: None,
            env: IndexMap::new(),
        })
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_env(mut self, env: IndexMap<String, String>) -> Self {
        self.env = env;
        self
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl AssetAction for CommandAction {
    async fn materialize(&self, ctx: &AssetContext) -> Result<MaterializeOutput, AssetError> {
        let command = self.display();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        info!(target = %ctx.asset, run_id = %ctx.run_id, command = %command, "Running command");
        let child = cmd.spawn().context(SpawnSnafu {
            command: command.clone(),
        })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            _ = ctx.shutdown.cancelled() => return Err(AssetError::RunCancelled),
            output = child.wait_with_output() => output.context(SpawnSnafu { command: command.clone() })?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            debug!(target = %ctx.asset, "{line}");
        }

        if !output.status.success() {
            return Err(AssetError::Command {
                command,
                status: output.status.to_string(),
                stderr: tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_LINES),
            });
        }

        Ok(MaterializeOutput {
            message: Some(format!("'{command}' succeeded")),
            ..MaterializeOutput::default()
        })
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AssetContext {
        AssetContext {
            asset: AssetKey::new("transform"),
            run_id: "test".to_string(),
            shutdown: CancellationToken::new(),
        }
    }

    fn command(parts: &[&str]) -> CommandAction {
        let parts: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
        CommandAction::new(&parts).unwrap()
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandAction::new(&[]).is_none());
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_success_and_failure() {
        let output = command(&["sh", "-c", "echo built"])
            .materialize(&ctx())
            .await
            .unwrap();
        assert!(output.message.unwrap().contains("succeeded"));

        let err = command(&["sh", "-c", "echo boom >&2; exit 3"])
            .materialize(&ctx())
            .await
            .unwrap_err();
        match err {
            AssetError::Command { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_env_and_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut env = IndexMap::new();
        env.insert("FLOE_TARGET".to_string(), "marker".to_string());

        command(&["sh", "-c", "echo $FLOE_TARGET > out.txt"])
            .with_working_dir(Some(dir.path().to_path_buf()))
            .with_env(env)
            .materialize(&ctx())
            .await
            .unwrap();

        let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(written.trim(), "marker");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_cancelled() {
        let context = ctx();
        let token = context.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            token.cancel();
        });

        let err = command(&["sleep", "30"]).materialize(&context).await.unwrap_err();
        assert!(matches!(err, AssetError::RunCancelled));
    }
}
