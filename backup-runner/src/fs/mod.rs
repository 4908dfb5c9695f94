//! File system access: traversal, fingerprints and inventories.

pub mod fingerprint;
pub mod listing;
pub mod walker;
