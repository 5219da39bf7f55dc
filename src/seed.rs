/// Computes the bracket-optimal seed permutation for a bracket of `2^num_rounds` slots.
///
/// Slot `i` (0-based) holds the seed `t(L, i + 1)` where `L = 2^num_rounds`,
/// `t(L, 1) = 1` and `t(L, k) = 1 + L / m - t(L, k - m)` with `m` the lowest set bit of `k - 1`.
/// Adjacent slots `2j` and `2j + 1` form the first-round pairings, and the top `2^p` seeds
/// cannot meet before round `num_rounds - p + 1`.
///
/// `num_rounds == 0` yields the trivial bracket `[1]`.
pub fn seed_order(num_rounds: u32) -> Vec<usize> {
    let size = 1usize << num_rounds;
    // 1-indexed so the recurrence reads the same as its definition
    let mut seeds = vec![0usize; size + 1];
    seeds[1] = 1;
    for k in 2..=size {
        let m = 1usize << (k - 1).trailing_zeros();
        seeds[k] = 1 + size / m - seeds[k - m];
    }
    seeds.split_off(1)
}
