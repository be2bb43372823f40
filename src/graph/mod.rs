pub mod idset;
pub mod info;
