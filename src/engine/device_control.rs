//! Device control collaborator: power cycling the device under test.
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::ControlError;

/// Opaque control over the device under test.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Power the device off and on again; returns once it is powered.
    async fn power_cycle(&self) -> Result<(), ControlError>;
}

/// Operator-driven power cycling through the console.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePowerControl;

#[async_trait]
impl DeviceControl for ConsolePowerControl {
    async fn power_cycle(&self) -> Result<(), ControlError> {
        let mut stdout = tokio::io::stdout();
        let mut stdin = BufReader::new(tokio::io::stdin());
        prompt(&mut stdout, "Power-Off the DUT\nPress Enter to continue...\n").await?;

        let mut line = String::new();
        if stdin.read_line(&mut line).await? == 0 {
            return Err(ControlError::InputClosed);
        }
        prompt(&mut stdout, "Power-On the DUT\n").await
    }
}

async fn prompt<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> Result<(), ControlError> {
    out.write_all(text.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}
