// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process memory tier.
//!
//! A `DashMap` keyed by `(type, id)`. Values are kept in the domain shape so a
//! hit needs no mapping. An optional TTL turns stale entries into misses; they
//! are dropped lazily on the read that notices them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use super::traits::{merge_patch, Target, Tier, TierKind, WriteMode};
use crate::error::{AccessError, Result};
use crate::item::{extract_id, ItemId, TypeKey};

#[derive(Debug, Clone)]
struct Entry {
    item: Value,
    inserted_at: Instant,
    /// Insertion order, so list reads are stable
    seq: u64,
}

pub struct MemoryTier {
    data: DashMap<(TypeKey, String), Entry>,
    ttl: Option<Duration>,
    next_seq: AtomicU64,
}

impl MemoryTier {
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            data: DashMap::new(),
            ttl,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Get current item count (all types)
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn is_fresh(&self, entry: &Entry) -> bool {
        self.ttl.map_or(true, |ttl| entry.inserted_at.elapsed() < ttl)
    }

    fn store(&self, type_key: &TypeKey, id: &ItemId, value: Value) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.data.insert(
            (type_key.clone(), id.key()),
            Entry {
                item: value,
                inserted_at: Instant::now(),
                seq,
            },
        );
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Tier for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    async fn read_one(&self, target: &Target, id: &ItemId) -> Result<Value> {
        let key = (target.type_key.clone(), id.key());
        let hit = self.data.get(&key).map(|e| (self.is_fresh(e.value()), e.value().item.clone()));
        match hit {
            Some((true, value)) => Ok(value),
            Some((false, _)) => {
                self.data.remove(&key);
                debug!(type_key = %target.type_key, id = %id, "Memory entry expired");
                Err(AccessError::miss(TierKind::Memory, format!("{} {id} expired", target.type_key)))
            }
            None => Err(AccessError::miss(TierKind::Memory, format!("{} {id} not cached", target.type_key))),
        }
    }

    async fn read_many(&self, target: &Target) -> Result<Vec<Value>> {
        let mut entries: Vec<(u64, Value)> = Vec::new();
        let mut stale = Vec::new();
        for entry in self.data.iter().filter(|e| e.key().0 == target.type_key) {
            if self.is_fresh(entry.value()) {
                entries.push((entry.value().seq, entry.value().item.clone()));
            } else {
                stale.push(entry.key().clone());
            }
        }
        for key in stale {
            self.data.remove(&key);
        }

        if entries.is_empty() {
            return Err(AccessError::miss(TierKind::Memory, format!("no {} cached", target.type_key)));
        }
        entries.sort_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().map(|(_, v)| v).collect())
    }

    async fn write_one(&self, target: &Target, value: &Value, mode: WriteMode) -> Result<Value> {
        let id = extract_id(value, &target.id_field).ok_or_else(|| {
            AccessError::Configuration(format!(
                "{} value has no '{}' field",
                target.type_key, target.id_field
            ))
        })?;

        let stored = match mode {
            WriteMode::Patch => {
                let existing = self
                    .data
                    .get(&(target.type_key.clone(), id.key()))
                    .map(|e| e.value().item.clone());
                match existing {
                    Some(base) => merge_patch(&base, value),
                    None => value.clone(),
                }
            }
            WriteMode::Create | WriteMode::Update => value.clone(),
        };

        self.store(&target.type_key, &id, stored.clone());
        Ok(stored)
    }

    async fn delete_many(&self, target: &Target, ids: &[ItemId]) -> Result<()> {
        for id in ids {
            self.data.remove(&(target.type_key.clone(), id.key()));
        }
        Ok(())
    }

    async fn clear(&self, type_key: &TypeKey) -> Result<bool> {
        self.data.retain(|(t, _), _| t != type_key);
        Ok(true)
    }
}
