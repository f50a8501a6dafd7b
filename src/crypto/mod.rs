/// Hashing and secret handling.
pub mod hash;
pub mod sensitive;
