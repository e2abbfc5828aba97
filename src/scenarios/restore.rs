//! Network restoration after scenarios that forged claims or moved the device.
use tokio::time::sleep;
use tracing::{debug, info};

use crate::engine::event::CapturedEvent;
use crate::engine::scenario::ScenarioContext;
use crate::error::ScenarioError;
use crate::protocol::managment::iso_name::IsoName;
use crate::protocol::transport::ADDRESS_NULL;

/// What a scenario changed on the network, and how to undo it.
#[derive(Debug, Default)]
pub struct Restoration {
    device: Option<IsoName>,
    original_address: Option<u8>,
    current_address: Option<u8>,
    forged: Vec<IsoName>,
}

impl Restoration {
    /// Record the device claim seen before any stimulus.
    pub fn remember(&mut self, claim: &CapturedEvent) {
        if self.device.is_none() {
            self.device = claim.name;
            self.original_address = Some(claim.source);
        }
        self.current_address = Some(claim.source);
    }

    /// Track a later claim of the device.
    pub fn observe(&mut self, claim: &CapturedEvent) {
        self.current_address = Some(claim.source);
    }

    /// Claim `address` with a forged `identity`; it is withdrawn by [`Restoration::apply`].
    pub async fn forge(
        &mut self,
        ctx: &ScenarioContext,
        identity: IsoName,
        address: u8,
    ) -> Result<(), ScenarioError> {
        if !self.forged.contains(&identity) {
            self.forged.push(identity);
        }
        debug!(identity = %identity, address, "forging address claim");
        ctx.ca.send_identity_claim(identity, address).await?;
        Ok(())
    }

    pub fn original_address(&self) -> Option<u8> {
        self.original_address
    }

    /// Withdraw forged claims, re-assert the device identity at its original
    /// address, command the device back there if it may have moved, then let
    /// the network settle.
    pub async fn apply(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        let forged = std::mem::take(&mut self.forged);
        for identity in &forged {
            info!(identity = %identity, "withdrawing forged claim");
            ctx.ca.send_identity_claim(*identity, ADDRESS_NULL).await?;
        }

        let mut touched = !forged.is_empty();
        if let (Some(device), Some(original)) = (self.device, self.original_address) {
            // After a forged contest the last known address is not trustworthy.
            if touched || self.current_address != Some(original) {
                info!(device = %device, address = original, "re-claiming device address");
                ctx.ca.send_identity_claim(device, original).await?;
                ctx.ca.send_commanded_address(device, original).await?;
                self.current_address = Some(original);
                touched = true;
            }
        }

        if touched {
            sleep(ctx.timing.settle()).await;
        }
        Ok(())
    }
}
