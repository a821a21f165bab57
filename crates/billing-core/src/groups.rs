//! Organisation-id groups.
//!
//! Some customers bill under several organisation ids. A group folds all of
//! them onto one canonical id so their usage is aggregated together.

use std::collections::HashMap;

use tracing::warn;

use crate::models::{normalize_company_id, UsageRecord};

/// Maps member organisation ids onto their group's canonical id.
#[derive(Debug, Clone, Default)]
pub struct OrgGroups {
    /// member id → canonical id (both normalised).
    canonical: HashMap<String, String>,
    /// canonical id → every member, in configuration order.
    members: HashMap<String, Vec<String>>,
}

impl OrgGroups {
    /// Build from explicit groups. The first member of each group becomes its
    /// canonical id. An id listed in more than one group stays with the first.
    pub fn new<G, S>(groups: impl IntoIterator<Item = G>) -> Self
    where
        G: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Self::default();

        for group in groups {
            let ids: Vec<String> = group
                .into_iter()
                .map(|id| normalize_company_id(id.as_ref()))
                .filter(|id| !id.is_empty())
                .collect();
            let Some(head) = ids.first().cloned() else {
                continue;
            };

            for id in ids {
                if let Some(existing) = out.canonical.get(&id) {
                    if *existing != head {
                        warn!(
                            "Org ID {} already belongs to group {}; ignoring its entry in group {}",
                            id, existing, head
                        );
                    }
                    continue;
                }
                out.canonical.insert(id.clone(), head.clone());
                out.members.entry(head.clone()).or_default().push(id);
            }
        }

        out
    }

    /// Parse `--org-group` values, each a comma-separated list of ids.
    pub fn parse(specs: &[String]) -> Self {
        Self::new(specs.iter().map(|spec| spec.split(',')))
    }

    /// Canonical id for `id` (normalised). Ids outside any group map to themselves.
    pub fn canonical(&self, id: &str) -> String {
        let id = normalize_company_id(id);
        self.canonical.get(&id).cloned().unwrap_or(id)
    }

    /// All ids sharing `id`'s group, or just `id` itself when ungrouped.
    pub fn members_of(&self, id: &str) -> Vec<String> {
        let canonical = self.canonical(id);
        self.members
            .get(&canonical)
            .cloned()
            .unwrap_or_else(|| vec![canonical])
    }

    /// Whether `id` belongs to a group with more than one member.
    pub fn is_grouped(&self, id: &str) -> bool {
        self.members
            .get(&self.canonical(id))
            .is_some_and(|m| m.len() > 1)
    }

    /// Number of configured groups.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Rewrite each record's company id to its canonical id.
    pub fn canonicalize(&self, records: Vec<UsageRecord>) -> Vec<UsageRecord> {
        if self.is_empty() {
            return records;
        }
        records
            .into_iter()
            .map(|mut record| {
                record.company_id = self.canonical(&record.company_id);
                record
            })
            .collect()
    }
}
