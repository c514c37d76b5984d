//! Epidemic broadcast sizing

/// Number of gossip periods an event should be retransmitted so that it
/// reaches every member with high probability.
///
/// `multiplier * ceil(log2(cluster_size + 1))`
pub fn gossip_periods_to_spread(retransmission_multiplier: u32, cluster_size: usize) -> u32 {
    retransmission_multiplier * ceil_log2(cluster_size as u64 + 1)
}

/// Smallest `k` with `2^k >= n`; zero for `n <= 1`.
pub fn ceil_log2(n: u64) -> u32 {
    if n <= 1 {
        0
    } else {
        64 - (n - 1).leading_zeros()
    }
}
