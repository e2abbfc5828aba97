//! nm-4: Commanded Address handling.
use async_trait::async_trait;
use tracing::debug;

use crate::engine::assertions::{assert_same_device, ensure};
use crate::engine::scenario::{Located, Scenario, ScenarioContext};
use crate::error::ScenarioError;
use crate::protocol::transport::{ADDRESS_GLOBAL, ADDRESS_NULL};
use crate::scenarios::restore::Restoration;

/// The device answers a Commanded Address with a claim of the new address,
/// or with Cannot Claim when it is not command configurable.
#[derive(Debug, Default)]
pub struct CommandedAddress {
    restore: Restoration,
}

#[async_trait]
impl Scenario for CommandedAddress {
    fn name(&self) -> &str {
        "4: Commanded Addresses"
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        ctx.ca.send_claim_request(ADDRESS_GLOBAL).await?;
        let claim = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        let name = assert_same_device(&claim, ctx.dut)?;
        self.restore.remember(&claim);

        let mut target = ctx.restore_address;
        if target == claim.source {
            target = target.wrapping_add(1);
        }
        debug!(from = claim.source, to = target, "commanding new address");
        ctx.ca.send_commanded_address(name, target).await?;

        let answer = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        assert_same_device(&answer, ctx.dut)?;
        self.restore.observe(&answer);
        ensure(answer.source == target || answer.source == ADDRESS_NULL, || {
            format!(
                "commanded address: expected {target:#04X} or {ADDRESS_NULL:#04X}, captured {:#04X}",
                answer.source
            )
        })
    }

    async fn teardown(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        self.restore.apply(ctx).await
    }
}
