//! Gas estimation and fee arithmetic for the dispatch pipeline

use crate::chain::ChainRpc;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::debug;

/// Intrinsic cost of a batch call: base transaction + calldata + router
/// entry overhead, with buffer.
const BATCH_INTRINSIC_GAS: u64 = 40_000;
/// Per-unit cost: action call + event + storage writes, with buffer.
const BATCH_PER_UNIT_GAS: u64 = 120_000;
/// Plain value transfer.
const BASE_TX_GAS: u64 = 21_000;

/// Gas estimator for dispatch transactions
pub struct GasEstimator;

impl GasEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Gas limit for a batch of `unit_count` units.
    ///
    /// Precise simulation is unreliable for the batched call shape (the
    /// router checks exact value matching), so estimation failure falls
    /// back to the fixed formula and is never fatal.
    pub async fn batch_gas(
        &self,
        rpc: &dyn ChainRpc,
        tx: &TypedTransaction,
        unit_count: u32,
    ) -> U256 {
        match rpc.estimate_gas(tx).await {
            Ok(gas) => gas,
            Err(e) => {
                debug!(
                    unit_count,
                    "gas estimation failed, using fixed formula: {}", e
                );
                self.fallback_batch_gas(unit_count)
            }
        }
    }

    /// Conservative fixed-formula gas limit for a batch.
    pub fn fallback_batch_gas(&self, unit_count: u32) -> U256 {
        U256::from(BATCH_INTRINSIC_GAS) + U256::from(BATCH_PER_UNIT_GAS) * U256::from(unit_count)
    }

    /// Gas limit for a single action, falling back to a plain transfer.
    pub async fn action_gas(&self, rpc: &dyn ChainRpc, tx: &TypedTransaction) -> U256 {
        match rpc.estimate_gas(tx).await {
            Ok(gas) => gas,
            Err(e) => {
                debug!("gas estimation failed, using base transfer gas: {}", e);
                U256::from(BASE_TX_GAS)
            }
        }
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Locally computed unit price, mirroring what the target contract charges:
/// `21_000 * base_fee * (10_000 + fee_multiplier_bps) / 10_000`.
pub fn fallback_unit_price(base_fee: U256, fee_multiplier_bps: u64) -> U256 {
    U256::from(BASE_TX_GAS) * base_fee * (U256::from(10_000u64) + U256::from(fee_multiplier_bps))
        / U256::from(10_000u64)
}

/// Replace-by-fee bump: +20%, plus 1 wei so small fees still move.
pub fn escalate_fee(fee: U256) -> U256 {
    fee * U256::from(120u64) / U256::from(100u64) + U256::one()
}

/// Total value owed for a batch: unit price times unit count.
pub fn batch_value(unit_price: U256, unit_count: u32) -> U256 {
    unit_price * U256::from(unit_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_gas_scales_with_unit_count() {
        let est = GasEstimator::new();
        assert_eq!(est.fallback_batch_gas(1), U256::from(160_000u64));
        assert_eq!(est.fallback_batch_gas(64), U256::from(7_720_000u64));
    }

    #[test]
    fn fallback_unit_price_matches_contract_formula() {
        // 21_000 * 100 * (10_000 + 10_000) / 10_000 = 4_200_000
        let price = fallback_unit_price(U256::from(100u64), 10_000);
        assert_eq!(price, U256::from(4_200_000u64));

        // 1.0x multiplier of zero bps leaves the raw cost
        let price = fallback_unit_price(U256::from(100u64), 0);
        assert_eq!(price, U256::from(2_100_000u64));
    }

    #[test]
    fn escalation_strictly_increases() {
        let mut fee = U256::zero();
        for _ in 0..5 {
            let bumped = escalate_fee(fee);
            assert!(bumped > fee);
            fee = bumped;
        }

        assert_eq!(escalate_fee(U256::from(100u64)), U256::from(121u64));
    }

    #[test]
    fn batch_value_is_price_times_count() {
        assert_eq!(
            batch_value(U256::from(1_000u64), 64),
            U256::from(64_000u64)
        );
    }
}
