//! Hierarchical names and identifier sets.
//!
//! An aggregation request is named `/aggregate/<id>/<id>/.../[seq=N]`. Identifiers
//! are generic components holding a non-negative integer in network byte order,
//! always written in ascending order, so two requests naming the same set under
//! the same generation produce byte-identical names. Dedup and overlap checks
//! rely on that.

use alloc::collections::BTreeSet;
use alloc::vec::Vec;
use core::fmt;

use crate::types::{AGGREGATE_LABEL, TLV_GENERIC_COMPONENT, TLV_SEQUENCE_NUM_COMPONENT};

/// Numeric key naming one atomic value held by one producer.
pub type Identifier = u64;

/// Sorted, deduplicated identifier set.
pub type IdSet = BTreeSet<Identifier>;

/// Textual generation marker some producers emit instead of a typed component.
const TEXT_SEQ_PREFIX: &[u8] = b"seq=";

/// One typed name component.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Component {
    typ: u32,
    value: Vec<u8>,
}

impl Component {
    /// Component with an explicit TLV type.
    pub fn new(typ: u32, value: Vec<u8>) -> Self {
        Self { typ, value }
    }

    /// Generic component with raw bytes.
    pub fn generic(bytes: &[u8]) -> Self {
        Self::new(TLV_GENERIC_COMPONENT, bytes.to_vec())
    }

    /// Generic component holding `n` as a minimal-width non-negative integer.
    pub fn number(n: u64) -> Self {
        Self::new(TLV_GENERIC_COMPONENT, encode_nonneg(n))
    }

    /// Sequence-number component (the generation marker).
    pub fn sequence(n: u64) -> Self {
        Self::new(TLV_SEQUENCE_NUM_COMPONENT, encode_nonneg(n))
    }

    pub fn typ(&self) -> u32 {
        self.typ
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn is_generic(&self) -> bool {
        self.typ == TLV_GENERIC_COMPONENT
    }

    pub fn is_sequence(&self) -> bool {
        self.typ == TLV_SEQUENCE_NUM_COMPONENT
    }

    /// Parse a generic component as an identifier.
    ///
    /// Accepts 1, 2, 4 or 8 value bytes. Anything else is not a number.
    pub fn to_number(&self) -> Option<u64> {
        if !self.is_generic() {
            return None;
        }
        decode_nonneg(&self.value)
    }

    /// Parse the generation marker carried by this component.
    ///
    /// Typed sequence components are preferred; a generic `seq=<decimal>`
    /// component is accepted as well.
    pub fn to_sequence(&self) -> Option<u64> {
        if self.is_sequence() {
            return decode_nonneg(&self.value);
        }
        if self.is_generic() {
            return self
                .value
                .strip_prefix(TEXT_SEQ_PREFIX)
                .and_then(parse_decimal);
        }
        None
    }

    /// True for any form of generation marker, parsable or not.
    fn is_marker(&self) -> bool {
        self.is_sequence() || (self.is_generic() && self.value.starts_with(TEXT_SEQ_PREFIX))
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sequence() {
            if let Some(seq) = self.to_sequence() {
                return write!(f, "seq={}", seq);
            }
        } else if !self.is_generic() {
            write!(f, "{}=", self.typ)?;
        }
        for &byte in &self.value {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "%{:02X}", byte)?;
            }
        }
        Ok(())
    }
}

/// Ordered sequence of components.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name {
    components: Vec<Component>,
}

impl Name {
    /// The empty name `/`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_components(components: Vec<Component>) -> Self {
        Self { components }
    }

    /// Canonical aggregation name for `ids` under an optional generation.
    pub fn aggregate(ids: &IdSet, generation: Option<u64>) -> Self {
        let mut components = Vec::with_capacity(ids.len() + 2);
        components.push(Component::generic(AGGREGATE_LABEL));
        // BTreeSet iterates in ascending order
        components.extend(ids.iter().map(|&id| Component::number(id)));
        if let Some(seq) = generation {
            components.push(Component::sequence(seq));
        }
        Self { components }
    }

    /// Route key for a single identifier: `/aggregate/<id>`.
    pub fn identifier(id: Identifier) -> Self {
        Self {
            components: alloc::vec![Component::generic(AGGREGATE_LABEL), Component::number(id)],
        }
    }

    /// Append a component.
    pub fn push(&mut self, component: Component) {
        self.components.push(component);
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Starts with the `aggregate` label and carries at least one more component.
    pub fn is_aggregate(&self) -> bool {
        self.components.len() >= 2
            && self.components[0].is_generic()
            && self.components[0].value() == AGGREGATE_LABEL
    }

    /// Identifiers named by this request.
    ///
    /// The label and generation marker are skipped, and so is any component
    /// that does not parse as a number. A malformed component therefore
    /// narrows the request instead of rejecting it.
    pub fn parse_ids(&self) -> IdSet {
        let mut ids = IdSet::new();
        for component in self.components.iter().skip(1) {
            if component.is_marker() {
                continue;
            }
            match component.to_number() {
                Some(id) => {
                    ids.insert(id);
                }
                None => {
                    tracing::trace!(component = %component, "skipping non-numeric name component");
                }
            }
        }
        ids
    }

    /// Generation marker, if any. The last marker wins.
    pub fn generation(&self) -> Option<u64> {
        self.components
            .iter()
            .rev()
            .find(|c| c.is_marker())
            .and_then(Component::to_sequence)
    }

    /// First `n` components (the whole name if shorter).
    pub fn prefix(&self, n: usize) -> Name {
        let n = n.min(self.components.len());
        Self {
            components: self.components[..n].to_vec(),
        }
    }

    /// True if `self` is a (non-strict) prefix of `other`.
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.components.len() <= other.components.len()
            && self.components[..] == other.components[..self.components.len()]
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

/// Minimal NonNegativeInteger encoding: 1, 2, 4 or 8 bytes.
fn encode_nonneg(n: u64) -> Vec<u8> {
    if n <= u8::MAX as u64 {
        alloc::vec![n as u8]
    } else if n <= u16::MAX as u64 {
        (n as u16).to_be_bytes().to_vec()
    } else if n <= u32::MAX as u64 {
        (n as u32).to_be_bytes().to_vec()
    } else {
        n.to_be_bytes().to_vec()
    }
}

fn decode_nonneg(bytes: &[u8]) -> Option<u64> {
    match bytes.len() {
        1 | 2 | 4 | 8 => Some(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)),
        _ => None,
    }
}

/// Parse ASCII decimal digits. Empty input and overflow are rejected.
pub(crate) fn parse_decimal(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    bytes.iter().try_fold(0u64, |acc, &b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add((b - b'0') as u64)
    })
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::*;

    fn ids(list: &[u64]) -> IdSet {
        list.iter().copied().collect()
    }

    #[test]
    fn test_same_set_same_name() {
        let a = Name::aggregate(&ids(&[3, 1, 2]), Some(4));
        let b = Name::aggregate(&ids(&[2, 3, 1, 3]), Some(4));
        assert_eq!(a, b);
        assert_ne!(a, Name::aggregate(&ids(&[1, 2, 3]), Some(5)));
        assert_ne!(a, Name::aggregate(&ids(&[1, 2, 3]), None));
    }

    #[test]
    fn test_number_component_widths() {
        assert_eq!(Component::number(7).value(), &[7]);
        assert_eq!(Component::number(300).value(), &[0x01, 0x2C]);
        assert_eq!(Component::number(70_000).value().len(), 4);
        assert_eq!(Component::number(u64::MAX).value().len(), 8);
        assert_eq!(Component::number(70_000).to_number(), Some(70_000));
    }

    #[test]
    fn test_parse_ids_and_generation() {
        let name = Name::aggregate(&ids(&[5, 1, 300]), Some(9));
        assert!(name.is_aggregate());
        assert_eq!(name.parse_ids(), ids(&[1, 5, 300]));
        assert_eq!(name.generation(), Some(9));
    }

    #[test]
    fn test_malformed_component_is_skipped() {
        let mut name = Name::from_components(alloc::vec![
            Component::generic(AGGREGATE_LABEL),
            Component::number(1),
            Component::generic(b"abc"),
            Component::number(3),
        ]);
        name.push(Component::sequence(2));

        assert_eq!(name.parse_ids(), ids(&[1, 3]));
        assert_eq!(name.generation(), Some(2));
    }

    #[test]
    fn test_text_sequence_marker() {
        // 8 bytes long, would otherwise parse as a number
        let name = Name::from_components(alloc::vec![
            Component::generic(AGGREGATE_LABEL),
            Component::number(4),
            Component::generic(b"seq=1234"),
        ]);
        assert_eq!(name.parse_ids(), ids(&[4]));
        assert_eq!(name.generation(), Some(1234));
    }

    #[test]
    fn test_is_aggregate() {
        assert!(!Name::new().is_aggregate());
        assert!(!Name::from_components(alloc::vec![Component::generic(AGGREGATE_LABEL)])
            .is_aggregate());
        assert!(!Name::from_components(alloc::vec![
            Component::generic(b"video"),
            Component::number(1)
        ])
        .is_aggregate());
        assert!(Name::identifier(9).is_aggregate());
    }

    #[test]
    fn test_prefix_relationships() {
        let full = Name::aggregate(&ids(&[1, 2]), Some(1));
        let route = Name::identifier(1);
        assert!(route.is_prefix_of(&full));
        assert!(!Name::identifier(2).is_prefix_of(&full));
        assert_eq!(full.prefix(2), route);
        assert_eq!(full.prefix(10), full);
        assert!(Name::new().is_prefix_of(&full));
    }

    #[test]
    fn test_uri_display() {
        let name = Name::aggregate(&ids(&[1, 2]), Some(7));
        assert_eq!(name.to_string(), "/aggregate/%01/%02/seq=7");
        assert_eq!(Name::new().to_string(), "/");
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal(b"42"), Some(42));
        assert_eq!(parse_decimal(b""), None);
        assert_eq!(parse_decimal(b"4x"), None);
        assert_eq!(parse_decimal(b"99999999999999999999999"), None);
    }
}
