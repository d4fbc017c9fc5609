//! Route lookup.
//!
//! The engine only consults routes; it never computes them. [`RouteTable`] is
//! the seam, [`Fib`] a plain longest-prefix-match table for hosts that
//! populate routes statically (and for the simulator).

use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::name::{Identifier, Name};
use crate::types::{LinkId, NextHop};

/// Longest-prefix-match route lookup.
pub trait RouteTable {
    /// Best next hop for the longest registered prefix of `name`.
    fn lookup_name(&self, name: &Name) -> Option<NextHop>;

    /// Next hop toward the producer of `id`.
    fn lookup(&self, id: Identifier) -> Option<NextHop> {
        self.lookup_name(&Name::identifier(id))
    }
}

/// Forwarding information base: prefix → candidate next hops.
#[derive(Default, Debug, Clone)]
pub struct Fib {
    routes: HashMap<Name, Vec<NextHop>>,
}

impl Fib {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a next hop for `prefix`.
    pub fn add_route(&mut self, prefix: Name, link: LinkId, cost: u32) {
        let hops = self.routes.entry(prefix).or_default();
        match hops.iter_mut().find(|h| h.link == link) {
            Some(hop) => hop.cost = cost,
            None => hops.push(NextHop { link, cost }),
        }
    }

    /// Remove one next hop. Returns true if it existed.
    pub fn remove_route(&mut self, prefix: &Name, link: LinkId) -> bool {
        let Some(hops) = self.routes.get_mut(prefix) else {
            return false;
        };
        let before = hops.len();
        hops.retain(|h| h.link != link);
        let removed = hops.len() != before;
        if hops.is_empty() {
            self.routes.remove(prefix);
        }
        removed
    }

    /// Next hops registered for exactly `prefix`.
    pub fn next_hops(&self, prefix: &Name) -> &[NextHop] {
        self.routes.get(prefix).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of prefixes with at least one next hop.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteTable for Fib {
    fn lookup_name(&self, name: &Name) -> Option<NextHop> {
        (0..=name.len()).rev().find_map(|n| {
            self.routes
                .get(&name.prefix(n))
                .and_then(|hops| hops.iter().min_by_key(|h| (h.cost, h.link)).copied())
        })
    }
}
