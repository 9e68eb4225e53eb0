// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tier selection.
//!
//! Decides which tiers a request may touch. The plan is always in
//! memory → disk → cloud order and always ends with the cloud.
//!
//! ```
//! use tier_access::{resolve_tiers, TierKind, TypeBinding, TypeRegistry};
//!
//! let mut registry = TypeRegistry::new();
//! registry.register("user", TypeBinding::new().memory(true).disk(true)).unwrap();
//!
//! // cache_enabled, disk_enabled, should_cache, persist
//! let plan = resolve_tiers(&registry, &"user".into(), true, true, true, false).unwrap();
//! assert_eq!(plan.tiers(), &[TierKind::Memory, TierKind::Cloud]);
//! ```

use crate::error::Result;
use crate::item::TypeKey;
use crate::registry::TypeRegistry;
use crate::storage::TierKind;

/// Ordered, non-empty list of eligible tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPlan {
    tiers: Vec<TierKind>,
}

impl TierPlan {
    #[must_use]
    pub fn tiers(&self) -> &[TierKind] {
        &self.tiers
    }

    #[must_use]
    pub fn memory(&self) -> bool {
        self.tiers.contains(&TierKind::Memory)
    }

    #[must_use]
    pub fn disk(&self) -> bool {
        self.tiers.contains(&TierKind::Disk)
    }
}

/// Eligible tiers for a request against `type_key`.
///
/// Memory needs `should_cache`, the global cache switch and a memory binding.
/// Disk needs `persist`, the global disk switch and a disk binding. Fails
/// with `Configuration` when the type was never registered.
pub fn resolve_tiers(
    registry: &TypeRegistry,
    type_key: &TypeKey,
    cache_enabled: bool,
    disk_enabled: bool,
    should_cache: bool,
    persist: bool,
) -> Result<TierPlan> {
    let binding = registry.require(type_key)?;

    let mut tiers = Vec::with_capacity(3);
    if should_cache && cache_enabled && binding.memory {
        tiers.push(TierKind::Memory);
    }
    if persist && disk_enabled && binding.disk {
        tiers.push(TierKind::Disk);
    }
    tiers.push(TierKind::Cloud);

    Ok(TierPlan { tiers })
}
