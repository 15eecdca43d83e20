//! Streaming of differential volume state between hosts.
//!
//! Replicating a volume's history is a caller obligation: send one diff per snapshot in creation
//! order, each relative to the previous snapshot, then a final one for the live volume. Diffs
//! applied out of order leave the destination inconsistent and are not detected here.

use std::{process::Stdio, sync::Arc};

use monoutils::{check_status, spawn_piped, CommandRunner, ProgressTracker, ProgressWriter};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    process::ChildStderr,
    sync::oneshot,
};

use crate::{backend::Rbd, MonoblockError, MonoblockResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A type-erased writer feeding the import process.
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Wraps the writer feeding the import process, for example to track progress.
pub type StreamWrapper = Box<dyn FnOnce(BoxedWriter) -> BoxedWriter + Send>;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<R> Rbd<R>
where
    R: CommandRunner,
{
    /// Streams the differential export of `volume_name` into `conn`.
    ///
    /// `volume_name` is pool-qualified and may carry a snapshot. With `from_snapshot` only the
    /// changes since that snapshot are sent. The connection is shut down on return, whatever
    /// the outcome.
    pub async fn send_volume<W>(
        &self,
        mut conn: W,
        volume_name: &str,
        from_snapshot: Option<&str>,
        tracker: Option<Arc<dyn ProgressTracker>>,
    ) -> MonoblockResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let result = self
            .export_diff(&mut conn, volume_name, from_snapshot, tracker)
            .await;

        if let Err(e) = conn.shutdown().await {
            tracing::debug!("failed to close connection after export-diff: {}", e);
        }

        result
    }

    /// Applies a differential export read from `conn` to `volume_name`.
    ///
    /// The connection is copied into the import process on a separate task while this one waits
    /// for the process. Both outcomes are collected; any failure is reported together with the
    /// diagnostics of the process.
    pub async fn receive_volume<C>(
        &self,
        volume_name: &str,
        conn: C,
        wrapper: Option<StreamWrapper>,
    ) -> MonoblockResult<()>
    where
        C: AsyncRead + Unpin + Send + 'static,
    {
        let mut args = vec!["import-diff".to_string()];
        args.extend(self.client_args());
        args.extend(["-".to_string(), volume_name.to_string()]);

        let rbd_bin = self.get_config().get_rbd_bin();
        let mut child = spawn_piped(rbd_bin, &args, Stdio::piped(), Stdio::null())?;
        let stdin = take_pipe(child.stdin.take(), "stdin")?;
        let stderr = take_pipe(child.stderr.take(), "stderr")?;

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let mut conn = conn;
            let mut writer: BoxedWriter = Box::new(stdin);
            if let Some(wrap) = wrapper {
                writer = wrap(writer);
            }

            let result = async {
                let copied = tokio::io::copy(&mut conn, &mut writer).await?;
                writer.shutdown().await?;
                Ok::<_, std::io::Error>(copied)
            }
            .await;

            let _ = done_tx.send(result);
        });

        let diagnostics = read_diagnostics(stderr).await;
        let status = child.wait().await;

        let mut errors = Vec::new();
        match status {
            Ok(status) => {
                if let Err(e) = check_status(rbd_bin, &args, status, diagnostics.as_str()) {
                    errors.push(e.to_string());
                }
            }
            Err(e) => errors.push(format!("waiting for import-diff: {}", e)),
        }

        match done_rx.await {
            Ok(Ok(copied)) => {
                tracing::debug!("received {} bytes into {}", copied, volume_name);
            }
            Ok(Err(e)) => errors.push(format!("copying from connection: {}", e)),
            Err(_) => errors.push("copy task ended without reporting".to_string()),
        }

        if !errors.is_empty() {
            return Err(MonoblockError::Transfer {
                operation: "import-diff",
                errors,
                stderr: diagnostics,
            });
        }

        tracing::info!("imported diff into {}", volume_name);
        Ok(())
    }

    /// Copies `source` into `target` on this cluster by piping an export into an import.
    ///
    /// The target must exist. Unlike a clone, the copy does not depend on the source afterwards.
    pub async fn copy_with_snapshots(
        &self,
        source: &str,
        target: &str,
        from_snapshot: Option<&str>,
    ) -> MonoblockResult<()> {
        let args = self.export_args(source, from_snapshot);
        let rbd_bin = self.get_config().get_rbd_bin();

        let mut export = spawn_piped(rbd_bin, &args, Stdio::null(), Stdio::piped())?;
        let stdout = take_pipe(export.stdout.take(), "stdout")?;
        let stderr = take_pipe(export.stderr.take(), "stderr")?;

        let (imported, diagnostics) = tokio::join!(
            self.receive_volume(target, stdout, None),
            read_diagnostics(stderr)
        );

        let mut errors = Vec::new();
        match export.wait().await {
            Ok(status) => {
                if let Err(e) = check_status(rbd_bin, &args, status, diagnostics.as_str()) {
                    errors.push(e.to_string());
                }
            }
            Err(e) => errors.push(format!("waiting for export-diff: {}", e)),
        }

        if let Err(e) = imported {
            errors.push(e.to_string());
        }

        if !errors.is_empty() {
            return Err(MonoblockError::Transfer {
                operation: "copy",
                errors,
                stderr: diagnostics,
            });
        }

        tracing::debug!("copied {} to {}", source, target);
        Ok(())
    }

    async fn export_diff<W>(
        &self,
        conn: &mut W,
        volume_name: &str,
        from_snapshot: Option<&str>,
        tracker: Option<Arc<dyn ProgressTracker>>,
    ) -> MonoblockResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let args = self.export_args(volume_name, from_snapshot);
        let rbd_bin = self.get_config().get_rbd_bin();

        let mut child = spawn_piped(rbd_bin, &args, Stdio::null(), Stdio::piped())?;
        let mut stdout = take_pipe(child.stdout.take(), "stdout")?;
        let stderr = take_pipe(child.stderr.take(), "stderr")?;

        // The copy owns stdout so a dead peer closes the pipe and the export stops.
        let copy = async move {
            match tracker {
                Some(tracker) => {
                    let mut writer = ProgressWriter::new(conn, tracker);
                    tokio::io::copy(&mut stdout, &mut writer).await
                }
                None => tokio::io::copy(&mut stdout, conn).await,
            }
        };

        let (copied, diagnostics) = tokio::join!(copy, read_diagnostics(stderr));

        let mut errors = Vec::new();
        if let Err(e) = &copied {
            errors.push(format!("copying to connection: {}", e));
        }

        match child.wait().await {
            Ok(status) => {
                if let Err(e) = check_status(rbd_bin, &args, status, diagnostics.as_str()) {
                    errors.push(e.to_string());
                }
            }
            Err(e) => errors.push(format!("waiting for export-diff: {}", e)),
        }

        if !errors.is_empty() {
            return Err(MonoblockError::Transfer {
                operation: "export-diff",
                errors,
                stderr: diagnostics,
            });
        }

        tracing::info!(
            "sent {} bytes of {}",
            copied.unwrap_or_default(),
            volume_name
        );
        Ok(())
    }

    fn export_args(&self, volume_name: &str, from_snapshot: Option<&str>) -> Vec<String> {
        let mut args = vec!["export-diff".to_string()];
        args.extend(self.client_args());
        args.push(volume_name.to_string());

        if let Some(from) = from_snapshot {
            args.extend(["--from-snap".to_string(), from.to_string()]);
        }

        args.push("-".to_string());
        args
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn take_pipe<T>(pipe: Option<T>, name: &str) -> MonoblockResult<T> {
    pipe.ok_or_else(|| MonoblockError::custom(anyhow::anyhow!("rbd {} was not captured", name)))
}

/// Drains the diagnostics of a backend process. Unreadable output is reported as empty.
async fn read_diagnostics(mut stderr: ChildStderr) -> String {
    let mut buf = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut buf).await {
        tracing::debug!("failed to read rbd diagnostics: {}", e);
    }

    String::from_utf8_lossy(&buf).into_owned()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
