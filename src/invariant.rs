//! Pure rebalancing of the pool counts against a target total.

use crate::state::PoolState;

/// Restore `player + arbiter == target_total`.
///
/// The difference is applied to the player pool first, clamped at zero; any
/// remaining shortfall or excess lands on the arbiter pool. Counts never go
/// negative and the result always sums exactly to `target_total`.
pub fn rebalance(current: &PoolState, target_total: u32) -> PoolState {
    if current.total() == target_total {
        return current.clone();
    }

    let shift = target_total as i64 - current.total() as i64;
    let player = (current.player_pool_count as i64 + shift).max(0) as u32;
    // player <= target_total here: player = max(0, target - arbiter)
    PoolState {
        player_pool_count: player,
        arbiter_pool_count: target_total - player,
        ..current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(player: u32, arbiter: u32) -> PoolState {
        PoolState {
            player_pool_count: player,
            arbiter_pool_count: arbiter,
            ..Default::default()
        }
    }

    #[test]
    fn test_matching_total_is_untouched() {
        let state = pool(2, 1);
        let out = rebalance(&state, 3);
        assert_eq!(out, state);
    }

    #[test]
    fn test_shortfall_goes_to_player_pool() {
        let out = rebalance(&pool(1, 1), 5);
        assert_eq!((out.player_pool_count, out.arbiter_pool_count), (4, 1));
    }

    #[test]
    fn test_excess_comes_from_player_pool_first() {
        let out = rebalance(&pool(3, 2), 4);
        assert_eq!((out.player_pool_count, out.arbiter_pool_count), (2, 2));
    }

    #[test]
    fn test_player_pool_clamps_at_zero() {
        // removing 4 from a player pool of 1 must not go negative
        let out = rebalance(&pool(1, 5), 2);
        assert_eq!((out.player_pool_count, out.arbiter_pool_count), (0, 2));
    }

    #[test]
    fn test_sums_exactly_for_all_small_inputs() {
        for p in 0..6u32 {
            for a in 0..6u32 {
                for target in 0..10u32 {
                    let out = rebalance(&pool(p, a), target);
                    assert_eq!(
                        out.total(),
                        target,
                        "rebalance({p},{a} -> {target}) summed to {}",
                        out.total()
                    );
                }
            }
        }
    }

    #[test]
    fn test_other_fields_pass_through() {
        let mut state = pool(0, 0);
        state.override_enabled = true;
        let out = rebalance(&state, 2);
        assert!(out.override_enabled);
    }
}
