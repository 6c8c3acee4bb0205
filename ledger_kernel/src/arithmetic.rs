/// Amount arithmetic.
///
/// Balances and supplies are non-negative `U256` values in the asset's
/// smallest unit. Fees are `u64`. No float anywhere.

use primitive_types::U256;

/// Checked amount addition. Panics on overflow.
pub fn checked_add(a: U256, b: U256) -> U256 {
    match a.checked_add(b) {
        Some(result) => result,
        None => panic!("Overflow: {} + {} overflows U256", a, b),
    }
}

/// Checked amount subtraction. Panics on underflow.
///
/// A negative balance means an invalid transaction reached the ledger.
pub fn checked_sub(a: U256, b: U256) -> U256 {
    match a.checked_sub(b) {
        Some(result) => result,
        None => panic!(
            "Invariant violation: [INVARIANT:amount_underflow] {} - {} underflows",
            a, b
        ),
    }
}

/// `system_fee + network_fee` widened to `U256`.
pub fn fee_total(system_fee: u64, network_fee: u64) -> U256 {
    U256::from(system_fee) + U256::from(network_fee)
}

/// Minimal little-endian bytes of an amount (empty for zero).
pub fn amount_to_le_bytes(amount: U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    amount.to_little_endian(&mut buf);
    let len = buf.iter().rposition(|b| *b != 0).map(|i| i + 1).unwrap_or(0);
    buf[..len].to_vec()
}

/// Inverse of [`amount_to_le_bytes`]. Returns `None` for more than 32 bytes.
pub fn amount_from_le_bytes(bytes: &[u8]) -> Option<U256> {
    if bytes.len() > 32 {
        return None;
    }
    Some(U256::from_little_endian(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_add_ok() {
        assert_eq!(checked_add(U256::from(3), U256::from(4)), U256::from(7));
    }

    #[test]
    #[should_panic(expected = "Overflow")]
    fn test_checked_add_overflow() {
        checked_add(U256::MAX, U256::one());
    }

    #[test]
    #[should_panic(expected = "amount_underflow")]
    fn test_checked_sub_underflow() {
        checked_sub(U256::from(1), U256::from(2));
    }

    #[test]
    fn test_fee_total_does_not_wrap() {
        let total = fee_total(u64::MAX, u64::MAX);
        assert_eq!(total, U256::from(u64::MAX) * U256::from(2));
    }

    #[test]
    fn test_amount_bytes_are_minimal() {
        assert!(amount_to_le_bytes(U256::zero()).is_empty());
        assert_eq!(amount_to_le_bytes(U256::from(0x0102)), vec![0x02, 0x01]);
        let v = U256::from(52_000_000u64) * U256::from(100_000_000u64);
        assert_eq!(amount_from_le_bytes(&amount_to_le_bytes(v)), Some(v));
        assert_eq!(amount_from_le_bytes(&[0u8; 33]), None);
    }
}
