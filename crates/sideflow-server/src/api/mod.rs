pub mod error;
pub mod sessions;
pub mod sides;
