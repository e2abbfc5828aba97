//! Identity and request scenarios: the device answers requests for address
//! claimed with a NAME matching the expected device.
use async_trait::async_trait;

use crate::engine::assertions::{assert_same_device, ensure, ensure_eq, ensure_ne};
use crate::engine::scenario::{Located, Scenario, ScenarioContext};
use crate::error::ScenarioError;
use crate::protocol::transport::{ADDRESS_GLOBAL, ADDRESS_NULL};

/// nm-1: the NAME announced by the device carries the expected fields.
pub struct CaName;

#[async_trait]
impl Scenario for CaName {
    fn name(&self) -> &str {
        "1: CA Name"
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        ctx.ca.send_claim_request(ADDRESS_GLOBAL).await?;
        let claim = ctx.claims.pop(ctx.timing.name_query_timeout()).await.located()?;
        assert_same_device(&claim, ctx.dut)?;
        Ok(())
    }
}

/// nm-2: the device claims an address at power-up.
pub struct SystemInitialization;

#[async_trait]
impl Scenario for SystemInitialization {
    fn name(&self) -> &str {
        "2: System Initialization"
    }

    async fn setup(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        ctx.power_cycle().await
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        let claim = ctx.claims.pop(ctx.timing.power_up_timeout()).await.located()?;
        assert_same_device(&claim, ctx.dut)?;
        ensure(claim.source < ADDRESS_NULL, || {
            format!("power-up claim from {:#04X}, expected a usable address", claim.source)
        })
    }
}

/// nm-7: a global request is answered with an Address Claimed.
pub struct GlobalRequest;

#[async_trait]
impl Scenario for GlobalRequest {
    fn name(&self) -> &str {
        "7: Request for Address Claimed (Global)"
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        ctx.ca.send_claim_request(ADDRESS_GLOBAL).await?;
        let claim = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        assert_same_device(&claim, ctx.dut)?;
        ensure_ne("claim source", ADDRESS_NULL, claim.source)
    }
}

/// nm-8: a request sent to the device address is answered from that address.
pub struct SpecificRequest;

#[async_trait]
impl Scenario for SpecificRequest {
    fn name(&self) -> &str {
        "8: Request for Address Claimed (Specific)"
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        ctx.ca.send_claim_request(ADDRESS_GLOBAL).await?;
        let claim = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        assert_same_device(&claim, ctx.dut)?;
        ensure_ne("claim source", ADDRESS_NULL, claim.source)?;

        let address = claim.source;
        ctx.ca.send_claim_request(address).await?;
        let answer = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        assert_same_device(&answer, ctx.dut)?;
        ensure_eq("answering address", address, answer.source)
    }
}
