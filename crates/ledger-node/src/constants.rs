pub(crate) const DEFAULT_DATA_DIR: &str = "./data";
pub(crate) const DEFAULT_PORT: u16 = 8333;
pub(crate) const DEFAULT_DIFFICULTY: u32 = 1;
