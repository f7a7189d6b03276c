/// Endianness-aware number types
pub mod number;
/// Endianness markers and conversions
pub mod endian;
