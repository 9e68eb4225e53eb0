// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage tiers: memory, SQLite disk and the remote cloud.

pub mod traits;
pub mod memory;
pub mod disk;
pub mod cloud;
pub mod sqlite;

pub use traits::{Target, Tier, TierKind, TierResult, WriteMode};
pub use memory::MemoryTier;
pub use disk::DiskTier;
pub use cloud::CloudTier;
