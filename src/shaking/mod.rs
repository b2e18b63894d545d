// Tree shaking: keep rules, root-set computation, the liveness fixpoint and
// the pruning that applies its result.

pub mod discard;
pub mod enqueuer;
pub mod parser;
pub mod pruner;
pub mod root_set;
pub mod rules;

pub use discard::DiscardedChecker;
pub use enqueuer::{Enqueuer, Liveness};
pub use parser::ConfigurationParser;
pub use pruner::{TreePruner, UsageInfo};
pub use root_set::{RootSet, RootSetBuilder};
pub use rules::{Configuration, Rule, RuleId};

use crate::graph::{FieldId, ItemFactory, MethodId, TypeId};

/// A program item as classified by keep rules: exhaustively a class, a
/// method or a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Item {
    Class(TypeId),
    Method(MethodId),
    Field(FieldId),
}

impl Item {
    pub fn describe(&self, factory: &ItemFactory) -> String {
        match self {
            Item::Class(ty) => factory.java_name(*ty),
            Item::Method(method) => factory.method_to_string(*method),
            Item::Field(field) => factory.field_to_string(*field),
        }
    }

    /// Content ordering; classes before fields before methods, each group
    /// by its slow compare.
    pub fn slow_cmp(&self, other: &Item, factory: &ItemFactory) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Item::Class(a), Item::Class(b)) => factory.cmp_types(*a, *b),
            (Item::Field(a), Item::Field(b)) => factory.cmp_fields(*a, *b),
            (Item::Method(a), Item::Method(b)) => factory.cmp_methods(*a, *b),
            (Item::Class(_), _) => Ordering::Less,
            (_, Item::Class(_)) => Ordering::Greater,
            (Item::Field(_), _) => Ordering::Less,
            (_, Item::Field(_)) => Ordering::Greater,
        }
    }
}

/// Why an item was marked: carried on every work-list event so that
/// `-whyareyoukeeping` can print retention chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    DueToKeepRule(RuleId),
    InstantiatedIn(MethodId),
    InvokedFrom(MethodId),
    InvokedViaSuperFrom(MethodId),
    FieldReferencedIn(MethodId),
    ReachableFromLiveType(TypeId),
    ReferencedInAnnotation(TypeId),
    IsLibraryMethod,
    MainDexRoot,
}

impl KeepReason {
    pub fn describe(&self, factory: &ItemFactory) -> String {
        match self {
            KeepReason::DueToKeepRule(rule) => format!("referenced by keep rule #{rule}"),
            KeepReason::InstantiatedIn(m) => {
                format!("instantiated in {}", factory.method_to_string(*m))
            }
            KeepReason::InvokedFrom(m) => format!("invoked from {}", factory.method_to_string(*m)),
            KeepReason::InvokedViaSuperFrom(m) => {
                format!("invoked via super from {}", factory.method_to_string(*m))
            }
            KeepReason::FieldReferencedIn(m) => {
                format!("referenced in {}", factory.method_to_string(*m))
            }
            KeepReason::ReachableFromLiveType(ty) => {
                format!("reachable from live type {}", factory.java_name(*ty))
            }
            KeepReason::ReferencedInAnnotation(ty) => {
                format!("referenced in annotation of type {}", factory.java_name(*ty))
            }
            KeepReason::IsLibraryMethod => "defined in a library class".to_string(),
            KeepReason::MainDexRoot => "main dex root".to_string(),
        }
    }
}

/// Insertion-ordered set with a reason per item. Insertion order is the
/// processing order of the single-threaded fixpoint, so iteration is
/// deterministic.
#[derive(Debug, Clone)]
pub struct SetWithReason<T> {
    items: Vec<T>,
    reasons: std::collections::HashMap<T, KeepReason>,
}

impl<T: Copy + Eq + std::hash::Hash> SetWithReason<T> {
    pub fn new() -> Self {
        SetWithReason {
            items: Vec::new(),
            reasons: std::collections::HashMap::new(),
        }
    }

    pub fn add(&mut self, item: T, reason: KeepReason) -> bool {
        if self.reasons.contains_key(&item) {
            return false;
        }
        self.reasons.insert(item, reason);
        self.items.push(item);
        true
    }

    pub fn contains(&self, item: &T) -> bool {
        self.reasons.contains_key(item)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn reason(&self, item: &T) -> Option<&KeepReason> {
        self.reasons.get(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Copy + Eq + std::hash::Hash> Default for SetWithReason<T> {
    fn default() -> Self {
        Self::new()
    }
}
