use num_bigint::BigUint;

/// The easiest allowed target, difficulty 1
pub const BASE_TARGET: [u8; 32] = base_target();

/// Seconds the network aims to spend on one retarget window
pub const EXPECTED_10_BLOCKS_TIME: i64 = 600;

/// Number of blocks between two difficulty adjustments
pub const RETARGET_INTERVAL: u64 = 10;

const fn base_target() -> [u8; 32] {
    let mut target = [0xFFu8; 32];
    target[0] = 0;
    target[1] = 0;
    target[2] = 0;
    target
}

/// Difficulty of a target, the ratio base target / target.
/// All arithmetic is done on full 256 bit integers.
pub fn difficulty(target: &[u8; 32]) -> BigUint {
    BigUint::from_bytes_be(&BASE_TARGET) / BigUint::from_bytes_be(target)
}

/// New target after a retarget window mined in `elapsed` seconds.
/// `target` is the target the window was mined against. A non-positive
/// elapsed counts as maximal speed-up; the adjustment is clamped to a factor
/// of 4 in either direction and the difficulty never drops below 1.
pub fn retarget(target: &[u8; 32], elapsed: i64) -> [u8; 32] {
    let old_diff = difficulty(target);

    let new_diff = if elapsed <= 0 {
        &old_diff * 4u32
    } else {
        &old_diff * BigUint::from(EXPECTED_10_BLOCKS_TIME as u64) / BigUint::from(elapsed as u64)
    };

    target_for(&clamp_diff(new_diff, &old_diff))
}

/// Projected difficulty of the next retarget, for display between
/// boundaries. `header_count` is the current length of the header list.
pub fn next_difficulty(
    target: &[u8; 32],
    header_count: usize,
    tip_timestamp: i64,
    now: i64,
) -> BigUint {
    let old_diff = difficulty(target);

    let time_passed = now - tip_timestamp;
    if time_passed <= 0 {
        return old_diff;
    }

    let mut nb_blocks = ((header_count - 1) % RETARGET_INTERVAL as usize) as i64;
    if nb_blocks == 0 {
        nb_blocks = 1;
    }

    let mut projected = time_passed / nb_blocks * RETARGET_INTERVAL as i64;
    if projected == 0 {
        projected = 1;
    }

    let new_diff = &old_diff * BigUint::from(EXPECTED_10_BLOCKS_TIME as u64)
        / BigUint::from(projected as u64);

    clamp_diff(new_diff, &old_diff)
}

fn clamp_diff(new_diff: BigUint, old_diff: &BigUint) -> BigUint {
    let upper = old_diff * 4u32;
    let lower = old_diff / 4u32;

    let clamped = if new_diff > upper {
        upper
    } else if new_diff < lower {
        lower
    } else {
        new_diff
    };

    clamped.max(BigUint::from(1u32))
}

/// Target encoding of a difficulty, left padded with zeroes to 32 bytes
pub(crate) fn target_for(diff: &BigUint) -> [u8; 32] {
    let quotient = (BigUint::from_bytes_be(&BASE_TARGET) / diff).to_bytes_be();

    let mut target = [0u8; 32];
    target[32 - quotient.len()..].copy_from_slice(&quotient);
    target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_target_difficulty_is_one() {
        assert_eq!(difficulty(&BASE_TARGET), BigUint::from(1u32));
    }

    #[test]
    fn test_on_schedule_window_keeps_target() {
        let target = target_for(&BigUint::from(8u32));
        let adjusted = retarget(&target, EXPECTED_10_BLOCKS_TIME);
        assert_eq!(difficulty(&adjusted), BigUint::from(8u32));
    }

    #[test]
    fn test_fast_window_doubles_difficulty() {
        let target = target_for(&BigUint::from(4u32));
        let adjusted = retarget(&target, EXPECTED_10_BLOCKS_TIME / 2);
        assert_eq!(difficulty(&adjusted), BigUint::from(8u32));
    }

    #[test]
    fn test_slow_window_halves_difficulty() {
        let target = target_for(&BigUint::from(8u32));
        let adjusted = retarget(&target, EXPECTED_10_BLOCKS_TIME * 2);
        assert_eq!(difficulty(&adjusted), BigUint::from(4u32));
    }

    #[test]
    fn test_speed_up_is_clamped_to_four() {
        let target = target_for(&BigUint::from(2u32));
        let adjusted = retarget(&target, 1);
        assert_eq!(difficulty(&adjusted), BigUint::from(8u32));
    }

    #[test]
    fn test_slow_down_is_clamped_to_a_quarter() {
        let target = target_for(&BigUint::from(16u32));
        let adjusted = retarget(&target, EXPECTED_10_BLOCKS_TIME * 100);
        assert_eq!(difficulty(&adjusted), BigUint::from(4u32));
    }

    #[test]
    fn test_zero_elapsed_counts_as_maximal_speed_up() {
        let target = target_for(&BigUint::from(2u32));
        let adjusted = retarget(&target, 0);
        assert_eq!(difficulty(&adjusted), BigUint::from(8u32));
    }

    #[test]
    fn test_difficulty_never_drops_below_one() {
        let adjusted = retarget(&BASE_TARGET, EXPECTED_10_BLOCKS_TIME * 1000);
        assert_eq!(difficulty(&adjusted), BigUint::from(1u32));
    }

    #[test]
    fn test_target_padding() {
        let target = target_for(&BigUint::from(1u32 << 24));
        assert_eq!(target.len(), 32);
        assert_eq!(&target[..6], &[0, 0, 0, 0, 0, 0]);
        assert_eq!(difficulty(&target), BigUint::from(1u32 << 24));
    }

    #[test]
    fn test_next_difficulty_projection() {
        // 5 blocks into a window, 150s since the tip: projected window is
        // 300s, twice as fast as expected.
        let target = target_for(&BigUint::from(4u32));
        let projected = next_difficulty(&target, 6, 1000, 1150);
        assert_eq!(projected, BigUint::from(8u32));
    }

    #[test]
    fn test_next_difficulty_degrades_without_elapsed_time() {
        let target = target_for(&BigUint::from(4u32));
        assert_eq!(next_difficulty(&target, 6, 1000, 1000), BigUint::from(4u32));
    }
}
