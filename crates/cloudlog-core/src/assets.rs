//! Embedded schema assets
//!
//! Schema descriptors under `schemas/` are compiled into the binary by
//! `build.rs` and exposed here as read-only named byte spans.
//! A file at `schemas/foxglove/PointCloud.fbs` is available as
//! `foxglove.PointCloud`.

include!(concat!(env!("OUT_DIR"), "/schema_assets.rs"));

/// A named, immutable byte span embedded at build time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asset {
    /// Dotted asset name
    pub name: &'static str,
    /// Raw file contents
    pub bytes: &'static [u8],
}

/// Look up an embedded asset by name
pub fn get(name: &str) -> Option<Asset> {
    ASSETS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(name, bytes)| Asset { name, bytes })
}

/// Iterate over every embedded asset, sorted by source path
pub fn all() -> impl Iterator<Item = Asset> {
    ASSETS.iter().map(|&(name, bytes)| Asset { name, bytes })
}
