//! Partition of online users into chat groups.
//!
//! Every online user belongs to exactly one group. A fresh login starts as a
//! singleton group; `connect` merges two groups and `disconnect` splits one
//! user back out into a singleton.

use std::collections::HashMap;

type GroupId = u32;

#[derive(Debug, Default)]
pub struct GroupCoordinator {
    /// Members of each group in insertion order
    groups: HashMap<GroupId, Vec<String>>,
    membership: HashMap<String, GroupId>,
    next_group_id: GroupId,
}

impl GroupCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `name` is online, whatever group it is in
    pub fn is_member(&self, name: &str) -> bool {
        self.membership.contains_key(name)
    }

    /// Adds `name` as a new singleton group. Returns false if already online.
    pub fn join(&mut self, name: &str) -> bool {
        if self.is_member(name) {
            return false;
        }
        self.new_singleton(name);
        true
    }

    /// Members of `name`'s group, with `name` itself first
    ///
    /// Empty when `name` is not online.
    pub fn members_of(&self, name: &str) -> Vec<String> {
        let Some(members) = self.group_of(name) else {
            return Vec::new();
        };
        let mut listing = Vec::with_capacity(members.len());
        listing.push(name.to_string());
        listing.extend(members.iter().filter(|m| *m != name).cloned());
        listing
    }

    /// Merges the initiator's group into the target's group
    ///
    /// Callers reject self-connects and offline targets before getting here;
    /// both are no-ops if they slip through.
    pub fn connect(&mut self, initiator: &str, target: &str) {
        let (Some(&from), Some(&into)) = (
            self.membership.get(initiator),
            self.membership.get(target),
        ) else {
            return;
        };
        if from == into {
            return;
        }

        let moved = self.groups.remove(&from).unwrap_or_default();
        for member in &moved {
            self.membership.insert(member.clone(), into);
        }
        self.groups.entry(into).or_default().extend(moved);
    }

    /// Splits `name` out of its group into a new singleton group
    ///
    /// Returns the members left behind, in group order. An empty result means
    /// `name` was already alone (or offline).
    pub fn disconnect(&mut self, name: &str) -> Vec<String> {
        if !self.is_member(name) {
            return Vec::new();
        }
        let remaining = self.remove(name);
        self.new_singleton(name);
        remaining
    }

    /// Takes `name` out of the partition entirely, on logout
    ///
    /// Returns the former groupmates. Notifying them is up to the caller.
    pub fn leave(&mut self, name: &str) -> Vec<String> {
        self.remove(name)
    }

    /// Number of groups, singletons included
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn group_of(&self, name: &str) -> Option<&Vec<String>> {
        self.membership
            .get(name)
            .and_then(|id| self.groups.get(id))
    }

    fn new_singleton(&mut self, name: &str) {
        let id = self.next_group_id;
        self.next_group_id += 1;
        self.groups.insert(id, vec![name.to_string()]);
        self.membership.insert(name.to_string(), id);
    }

    fn remove(&mut self, name: &str) -> Vec<String> {
        let Some(id) = self.membership.remove(name) else {
            return Vec::new();
        };
        let Some(members) = self.groups.get_mut(&id) else {
            return Vec::new();
        };
        members.retain(|m| m != name);
        let remaining = members.clone();
        if remaining.is_empty() {
            self.groups.remove(&id);
        }
        remaining
    }
}
