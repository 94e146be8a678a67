use std::collections::HashSet;
use std::str::FromStr;

use anyhow::anyhow;
use uuid::Uuid;

pub trait IdGenerator {
    fn next_id(&mut self) -> String;

    /// Called for every id already present when a store is opened, so
    /// generators with internal state can skip past them.
    fn observe(&mut self, _existing: &str) {}

    /// Counter position to persist, for generators that would otherwise
    /// restart from the beginning in a new process.
    fn high_water(&self) -> Option<u64> {
        None
    }

    fn resume_from(&mut self, _next: u64) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&mut self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// `prefix-1`, `prefix-2`, ... Never repeats within one generator.
#[derive(Debug, Clone)]
pub struct SequentialIds {
    prefix: String,
    next: u64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&mut self) -> String {
        let id = format!("{}-{}", self.prefix, self.next);
        self.next += 1;
        id
    }

    fn observe(&mut self, existing: &str) {
        let Some(rest) = existing
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
        else {
            return;
        };
        if let Ok(n) = rest.parse::<u64>() {
            self.next = self.next.max(n.saturating_add(1));
        }
    }

    fn high_water(&self) -> Option<u64> {
        Some(self.next)
    }

    fn resume_from(&mut self, next: u64) {
        self.next = self.next.max(next);
    }
}

/// Draws ids until one is not already taken.
pub fn fresh_id(ids: &mut dyn IdGenerator, taken: &HashSet<String>) -> String {
    loop {
        let id = ids.next_id();
        if !taken.contains(&id) {
            return id;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    Uuid,
    Sequential,
}

impl IdStrategy {
    pub fn build(self) -> Box<dyn IdGenerator> {
        match self {
            IdStrategy::Uuid => Box::new(UuidIds),
            IdStrategy::Sequential => Box::new(SequentialIds::new("id")),
        }
    }
}

impl FromStr for IdStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uuid" => Ok(IdStrategy::Uuid),
            "sequential" | "counter" => Ok(IdStrategy::Sequential),
            other => Err(anyhow!("invalid id strategy: {other}")),
        }
    }
}
