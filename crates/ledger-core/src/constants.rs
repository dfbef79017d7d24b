pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const ADDRESS_SIZE: usize = 20;
/// SEC1 uncompressed point: 0x04 || X || Y.
pub const PUBLIC_KEY_SIZE: usize = 65;
pub const BLOCK_VERSION: i32 = 1;
pub const GENESIS_DIFFICULTY: u32 = 1;
/// version(4) + prev(32) + merkle(32) + timestamp(8) + difficulty(4) + nonce(4)
pub const HEADER_HASH_BYTES: usize = 4 + HASH_SIZE + HASH_SIZE + 8 + 4 + 4;
