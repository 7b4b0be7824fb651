/// Value of the single coinbase output of every block
pub const BLOCK_REWARD: u64 = 100;

/// Mining reward at a given height. Flat schedule.
pub fn get_block_reward(_height: u64) -> u64 {
    BLOCK_REWARD
}
