//! External command handler: one process per event.
//!
//! The payload is written to the child's stdin; identity goes in the
//! environment. A zero exit status means success.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, bail};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::EventHandler;
use crate::model::ClaimedEvent;

#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandHandler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    // Relative paths with a directory component resolve against the process
    // CWD; bare names are left for PATH lookup.
    fn resolved_program(&self) -> std::io::Result<PathBuf> {
        if self.program.is_relative() && self.program.components().count() > 1 {
            Ok(std::env::current_dir()?.join(&self.program))
        } else {
            Ok(self.program.clone())
        }
    }
}

#[async_trait]
impl EventHandler for CommandHandler {
    async fn handle(&self, event: &ClaimedEvent) -> anyhow::Result<()> {
        let program = self.resolved_program()?;
        debug!(
            id = %event.id,
            command = %program.display(),
            "running handler command"
        );

        let mut child = Command::new(&program)
            .args(&self.args)
            .env("EVENTQ_EVENT_ID", event.id.to_string())
            .env("EVENTQ_EVENT_TYPE", &event.event_type)
            .env("EVENTQ_IDEMPOTENCY_KEY", &event.idempotency_key)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn {}", program.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits without reading stdin is judged by its status.
            if let Err(e) = stdin.write_all(event.payload.as_bytes()).await {
                debug!(id = %event.id, error = %e, "payload not fully written");
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            bail!(
                "{} exited with status {}",
                program.display(),
                status.code().unwrap_or(-1)
            );
        }
        Ok(())
    }
}
