//! Immutable, hash-consed attributes (§3.2).

use crate::error::{CompilationError, Status};
use std::cmp::Ordering;

/// A named entry in a [`Attribute::Dictionary`], prior to sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedAttr {
    pub name: String,
    pub value: Attribute,
}

/// One of the five attribute kinds. Value-semantic and hash-consed: two
/// structurally equal `Attribute`s always resolve to the same
/// `Handle<Attribute>` within a context (§8 property 1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attribute {
    Boolean(bool),
    Integer(i64),
    String(String),
    Array(Vec<Attribute>),
    /// Sorted by key, unique keys, binary-searchable.
    Dictionary(Vec<NamedAttr>),
}

/// Well-known dictionary keys consulted by the analyses and passes (§3.2).
pub mod keys {
    pub const SUBGROUP_SIZE: &str = "subgroup_size";
    pub const WORK_GROUP_SIZE: &str = "work_group_size";
    pub const ALIGNMENT: &str = "alignment";
    pub const SHAPE_GCD: &str = "shape_gcd";
    pub const STRIDE_GCD: &str = "stride_gcd";
    pub const ALIGN: &str = "align";
    /// Byte offset `set-stack-ptr` (§4.7 step 3) assigns to an `alloca`.
    pub const STACK_PTR: &str = "stack_ptr";
}

impl Attribute {
    /// Sorts `entries` by key in place and builds a `Dictionary`, rejecting
    /// duplicate keys. Mirrors `tinytc_dictionary_attr_sort` followed by
    /// `dictionary_attr::get`.
    pub fn dictionary(mut entries: Vec<NamedAttr>) -> Result<Attribute, CompilationError> {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in entries.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(CompilationError::new(Status::IrDuplicateKeyInDictionary));
            }
        }
        Ok(Attribute::Dictionary(entries))
    }

    /// Binary-search lookup by key; `None` if `self` is not a dictionary or
    /// the key is absent.
    pub fn find(&self, name: &str) -> Option<&Attribute> {
        match self {
            Attribute::Dictionary(entries) => entries
                .binary_search_by(|e| e.name.as_str().cmp(name))
                .ok()
                .map(|i| &entries[i].value),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Attribute::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Attribute::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Attribute]> {
        match self {
            Attribute::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Convenience accessor for an array-of-integer attribute (used for
    /// `work_group_size`, `shape_gcd`, `stride_gcd`).
    pub fn as_integer_array(&self) -> Option<Vec<i64>> {
        self.as_array()?.iter().map(Attribute::as_integer).collect()
    }
}

/// Convenience wrapper combining a dictionary attribute's binary-search
/// `find` with the uniquing layer, mirroring `get_attr(dict, name)` in the
/// source (which first calls `string_attr::get`, then delegates).
pub fn get_attr<'a>(dict: Option<&'a Attribute>, name: &str) -> Option<&'a Attribute> {
    dict?.find(name)
}

impl PartialOrd for NamedAttr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.name.cmp(&other.name))
    }
}
impl Ord for NamedAttr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerContext;

    #[test]
    fn dictionary_rejects_duplicate_keys() {
        let entries = vec![
            NamedAttr {
                name: "alignment".into(),
                value: Attribute::Integer(8),
            },
            NamedAttr {
                name: "alignment".into(),
                value: Attribute::Integer(16),
            },
        ];
        let err = Attribute::dictionary(entries).unwrap_err();
        assert_eq!(err.status, Status::IrDuplicateKeyInDictionary);
    }

    #[test]
    fn dictionary_find_is_order_independent() {
        let entries = vec![
            NamedAttr {
                name: "subgroup_size".into(),
                value: Attribute::Integer(16),
            },
            NamedAttr {
                name: "alignment".into(),
                value: Attribute::Integer(64),
            },
        ];
        let dict = Attribute::dictionary(entries).unwrap();
        assert_eq!(dict.find("alignment"), Some(&Attribute::Integer(64)));
        assert_eq!(dict.find("subgroup_size"), Some(&Attribute::Integer(16)));
        assert_eq!(dict.find("missing"), None);
    }

    #[test]
    fn hash_consing_returns_same_handle_for_equal_payloads() {
        let ctx = CompilerContext::new();
        let a = ctx.get_attr(Attribute::Integer(7));
        let b = ctx.get_attr(Attribute::Integer(7));
        let c = ctx.get_attr(Attribute::Integer(8));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
