//! Timing scenarios: settling delay before normal traffic, and rate-limited
//! answers to address violations.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::debug;

use crate::engine::assertions::{
    assert_claim_gap, assert_defended, assert_lost_arbitration, assert_min_interval,
    assert_same_device, assert_silence, ensure_ne, TIMING_TOLERANCE,
};
use crate::engine::event::CapturedEvent;
use crate::engine::queue::CorrelationQueue;
use crate::engine::scenario::{Located, Scenario, ScenarioContext};
use crate::error::ScenarioError;
use crate::protocol::transport::{ADDRESS_GLOBAL, ADDRESS_NULL, NM_PRIORITY};
use crate::scenarios::restore::Restoration;

/// Proprietary A, sent to global from the device address to provoke a violation.
const VIOLATION_PGN: u32 = 0xC000 | ADDRESS_GLOBAL as u32;

/// nm-9: after claiming, the device waits the settling delay of its address
/// range before normal traffic, at power-up and after moving.
#[derive(Default)]
pub struct ClaimTiming {
    traffic: Option<Arc<CorrelationQueue>>,
    restore: Restoration,
}

impl ClaimTiming {
    async fn first_traffic_after(
        &self,
        ctx: &ScenarioContext,
        claim: &CapturedEvent,
    ) -> Result<CapturedEvent, ScenarioError> {
        let Some(traffic) = &self.traffic else {
            return Err(ScenarioError::mismatch("traffic queue not subscribed"));
        };
        let event = traffic
            .pop_where(ctx.timing.response_timeout(), |event| {
                event.source == claim.source && event.timestamp >= claim.timestamp
            })
            .await
            .located()?;
        debug!(
            source = event.source,
            gap = ?event.elapsed_since(claim),
            "first traffic after claim"
        );
        Ok(event)
    }
}

#[async_trait]
impl Scenario for ClaimTiming {
    fn name(&self) -> &str {
        "9: Address Claim Timing"
    }

    async fn setup(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        self.traffic = Some(ctx.subscribe(ctx.normal_traffic.clone()));
        ctx.power_cycle().await
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        let claim = ctx.claims.pop(ctx.timing.power_up_timeout()).await.located()?;
        let name = assert_same_device(&claim, ctx.dut)?;
        ensure_ne("power-up claim source", ADDRESS_NULL, claim.source)?;
        self.restore.remember(&claim);
        let traffic = self.first_traffic_after(ctx, &claim).await?;
        assert_claim_gap(&claim, &traffic)?;

        if !name.is_arbitrary_address_capable() {
            return Ok(());
        }
        self.restore.forge(ctx, name.perturbed(-1), claim.source).await?;
        let moved = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        self.restore.observe(&moved);
        assert_same_device(&moved, ctx.dut)?;
        assert_lost_arbitration(&moved, claim.source, true)?;
        let traffic = self.first_traffic_after(ctx, &moved).await?;
        assert_claim_gap(&moved, &traffic)
    }

    async fn teardown(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        self.traffic = None;
        self.restore.apply(ctx).await
    }
}

/// nm-16: traffic from another node using the device address is answered
/// with a re-claim, at most once per re-claim interval. Violations repeated
/// every response window until the interval elapses must stay unanswered.
pub struct AddressViolation;

impl AddressViolation {
    async fn violate(ctx: &ScenarioContext, address: u8) -> Result<(), ScenarioError> {
        debug!(address, "address violation");
        ctx.ca
            .send_raw_frame(NM_PRIORITY, VIOLATION_PGN, address, &[0; 8])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Scenario for AddressViolation {
    fn name(&self) -> &str {
        "16: Address Violation Response"
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        ctx.ca.send_claim_request(ADDRESS_GLOBAL).await?;
        let claim = ctx.claims.pop(ctx.timing.response_timeout()).await.located()?;
        assert_same_device(&claim, ctx.dut)?;
        ensure_ne("claim source", ADDRESS_NULL, claim.source)?;
        let address = claim.source;
        sleep(ctx.timing.violation_settle()).await;

        Self::violate(ctx, address).await?;
        let first = ctx.claims.pop(ctx.timing.violation_response()).await.located()?;
        assert_same_device(&first, ctx.dut)?;
        assert_defended(&first, address)?;

        // Keep violating until the interval elapses; none may be answered.
        let allowed_at = first.timestamp + ctx.timing.reclaim_interval();
        let quiet_until = allowed_at - TIMING_TOLERANCE;
        loop {
            let now = Instant::now();
            if now >= quiet_until {
                break;
            }
            Self::violate(ctx, address).await?;
            let window = ctx.timing.violation_response().min(quiet_until - now);
            assert_silence(
                ctx.claims.expect_silence(window).await,
                "re-claim inside the rate-limit interval",
            )?;
        }

        sleep_until(allowed_at).await;
        Self::violate(ctx, address).await?;
        let second = ctx.claims.pop(ctx.timing.violation_response()).await.located()?;
        assert_same_device(&second, ctx.dut)?;
        assert_defended(&second, address)?;
        assert_min_interval(&first, &second, ctx.timing.reclaim_interval())
    }
}
