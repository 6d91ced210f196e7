//! Utility functions for identifiers and monetary rounding

use crate::error::{LedgerError, Result};
use bech32::Bech32m;
use rust_decimal::{Decimal, RoundingStrategy};
use uuid7::uuid7;

// construct a unique record id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String> {
    let hrp = bech32::Hrp::parse(hrp)
        .map_err(|e| LedgerError::Validation(format!("bad id prefix {hrp:?}: {e}")))?;
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| LedgerError::Computation(format!("failed to encode id: {e}")))
}

/// Currency values are stored at two decimal places, midpoints away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
