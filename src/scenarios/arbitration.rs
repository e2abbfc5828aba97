//! Arbitration scenarios: forged contending claims at the device address.
use async_trait::async_trait;

use crate::engine::assertions::{
    assert_defended, assert_lost_arbitration, assert_same_device, ensure, ensure_eq, ensure_ne,
};
use crate::engine::scenario::{Located, Scenario, ScenarioContext};
use crate::error::ScenarioError;
use crate::protocol::transport::{ADDRESS_GLOBAL, ADDRESS_NULL};
use crate::scenarios::restore::Restoration;

/// Upper bound on forged contests in nm-12; a device has at most 254 addresses to try.
const MAX_CONTESTS: usize = 256;

/// nm-3: a device that cannot pick another address gives up with Cannot Claim.
#[derive(Debug, Default)]
pub struct NonConfigurableAddress {
    restore: Restoration,
}

#[async_trait]
impl Scenario for NonConfigurableAddress {
    fn name(&self) -> &str {
        "3: Non-Configurable Address CA"
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        if ctx.dut_is_arbitrary_capable() {
            return Err(ScenarioError::skip("Configurable Address CA"));
        }
        ctx.ca.send_claim_request(ADDRESS_GLOBAL).await?;
        let claim = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        let name = assert_same_device(&claim, ctx.dut)?;
        ensure(claim.source < ADDRESS_NULL, || {
            format!("device claims {:#04X}, expected a usable address", claim.source)
        })?;
        self.restore.remember(&claim);

        self.restore.forge(ctx, name.perturbed(-1), claim.source).await?;
        let answer = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        self.restore.observe(&answer);
        assert_lost_arbitration(&answer, claim.source, false)?;
        assert_same_device(&answer, ctx.dut)?;
        Ok(())
    }

    async fn teardown(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        self.restore.apply(ctx).await
    }
}

/// nm-5: an arbitrary address capable device moves to another address.
#[derive(Debug, Default)]
pub struct SelfConfigurableAddress {
    restore: Restoration,
}

#[async_trait]
impl Scenario for SelfConfigurableAddress {
    fn name(&self) -> &str {
        "5: Self-Configurable Address CA"
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        if !ctx.dut_is_arbitrary_capable() {
            return Err(ScenarioError::skip("Non-Configurable Address CA"));
        }
        ctx.ca.send_claim_request(ADDRESS_GLOBAL).await?;
        let claim = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        let name = assert_same_device(&claim, ctx.dut)?;
        ensure_ne("claim source", ADDRESS_NULL, claim.source)?;
        self.restore.remember(&claim);

        self.restore.forge(ctx, name.perturbed(-1), claim.source).await?;
        let answer = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        self.restore.observe(&answer);
        assert_same_device(&answer, ctx.dut)?;
        ensure_ne("new claim source", ADDRESS_NULL, answer.source)?;
        ensure_ne("new claim source", claim.source, answer.source)
    }

    async fn teardown(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        self.restore.apply(ctx).await
    }
}

/// nm-10: a contending claim with a higher NAME is answered by a re-claim.
#[derive(Debug, Default)]
pub struct AddressDefense {
    restore: Restoration,
}

#[async_trait]
impl Scenario for AddressDefense {
    fn name(&self) -> &str {
        "10: Address Defense"
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        ctx.ca.send_claim_request(ADDRESS_GLOBAL).await?;
        let claim = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        let name = assert_same_device(&claim, ctx.dut)?;
        self.restore.remember(&claim);

        self.restore.forge(ctx, name.perturbed(1), claim.source).await?;
        let answer = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        self.restore.observe(&answer);
        assert_same_device(&answer, ctx.dut)?;
        assert_defended(&answer, claim.source)
    }

    async fn teardown(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        self.restore.apply(ctx).await
    }
}

/// nm-11: a contending claim with a lower NAME makes the device give way.
#[derive(Debug, Default)]
pub struct ArbitrationLoss {
    restore: Restoration,
}

#[async_trait]
impl Scenario for ArbitrationLoss {
    fn name(&self) -> &str {
        "11: Arbitration Loss"
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        ctx.ca.send_claim_request(ADDRESS_GLOBAL).await?;
        let claim = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        let name = assert_same_device(&claim, ctx.dut)?;
        self.restore.remember(&claim);

        self.restore.forge(ctx, name.perturbed(-1), claim.source).await?;
        let answer = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        self.restore.observe(&answer);
        assert_same_device(&answer, ctx.dut)?;
        assert_lost_arbitration(&answer, claim.source, name.is_arbitrary_address_capable())
    }

    async fn teardown(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        self.restore.apply(ctx).await
    }
}

/// nm-12: contest every address the device tries until it reports Cannot
/// Claim, then check it keeps answering requests from the null address.
#[derive(Debug, Default)]
pub struct AddressNotClaimed {
    restore: Restoration,
}

#[async_trait]
impl Scenario for AddressNotClaimed {
    fn name(&self) -> &str {
        "12: Address Not Claimed"
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        ctx.ca.send_claim_request(ADDRESS_GLOBAL).await?;
        let claim = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        let name = assert_same_device(&claim, ctx.dut)?;
        self.restore.remember(&claim);

        let forged = name.perturbed(-1);
        let mut address = claim.source;
        let mut contests = 0;
        while address < ADDRESS_NULL {
            contests += 1;
            ensure(contests <= MAX_CONTESTS, || {
                format!("device still claiming after {MAX_CONTESTS} contests")
            })?;
            self.restore.forge(ctx, forged, address).await?;
            let answer = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
            self.restore.observe(&answer);
            assert_same_device(&answer, ctx.dut)?;
            ensure_ne("claim source after contest", address, answer.source)?;
            ensure_ne("claim source after contest", ADDRESS_GLOBAL, answer.source)?;
            address = answer.source;
        }

        ctx.ca.send_claim_request(ADDRESS_GLOBAL).await?;
        let answer = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        assert_same_device(&answer, ctx.dut)?;
        ensure_eq("answer to request", ADDRESS_NULL, answer.source)
    }

    async fn teardown(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        self.restore.apply(ctx).await
    }
}
