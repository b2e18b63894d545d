// Naming states for method renaming.
//
// A state models the method-name scope of one class or interface. States
// chain to their parent (the super-class scope); within a state, bookkeeping
// is split per proto because Dalvik dispatch distinguishes methods by full
// signature, so the same short name can be reused across different protos.
//
// States and their per-proto internal states live in one arena; ids are
// cheap to copy and hash, which phase 3 of the method minifier relies on
// when it collects sets of reachable states.

use std::collections::{HashMap, HashSet};

use crate::graph::{ItemFactory, ProtoId, StringId};
use crate::naming::number_to_identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamingStateId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct InternalId(usize);

struct StateData {
    parent: Option<NamingStateId>,
    by_proto: HashMap<ProtoId, InternalId>,
}

struct InternalData {
    parent: Option<InternalId>,
    reserved: HashSet<StringId>,
    renamings: HashMap<StringId, StringId>,
    renamed_values: HashSet<StringId>,
    name_count: usize,
    /// Index into `dictionary_cursors`; shared down the internal chain so a
    /// dictionary word is handed out once per chain.
    cursor_slot: usize,
}

pub struct NamingStatePool<'f> {
    factory: &'f ItemFactory,
    dictionary: Vec<String>,
    states: Vec<StateData>,
    internals: Vec<InternalData>,
    dictionary_cursors: Vec<usize>,
}

impl<'f> NamingStatePool<'f> {
    pub fn new(factory: &'f ItemFactory, dictionary: Vec<String>) -> Self {
        NamingStatePool {
            factory,
            dictionary,
            states: Vec::new(),
            internals: Vec::new(),
            dictionary_cursors: Vec::new(),
        }
    }

    pub fn create_root(&mut self) -> NamingStateId {
        self.states.push(StateData {
            parent: None,
            by_proto: HashMap::new(),
        });
        NamingStateId(self.states.len() - 1)
    }

    pub fn create_child(&mut self, parent: NamingStateId) -> NamingStateId {
        self.states.push(StateData {
            parent: Some(parent),
            by_proto: HashMap::new(),
        });
        NamingStateId(self.states.len() - 1)
    }

    fn find_internal(&self, state: NamingStateId, proto: ProtoId) -> Option<InternalId> {
        let mut current = Some(state);
        while let Some(id) = current {
            let data = &self.states[id.0];
            if let Some(&internal) = data.by_proto.get(&proto) {
                return Some(internal);
            }
            current = data.parent;
        }
        None
    }

    fn get_or_create_internal(&mut self, state: NamingStateId, proto: ProtoId) -> InternalId {
        if let Some(&internal) = self.states[state.0].by_proto.get(&proto) {
            return internal;
        }
        let internal = match self.states[state.0].parent {
            Some(parent) => {
                let parent_internal = self.get_or_create_internal(parent, proto);
                let parent_data = &self.internals[parent_internal.0];
                let data = InternalData {
                    parent: Some(parent_internal),
                    reserved: HashSet::new(),
                    renamings: HashMap::new(),
                    renamed_values: HashSet::new(),
                    name_count: parent_data.name_count,
                    cursor_slot: parent_data.cursor_slot,
                };
                self.internals.push(data);
                InternalId(self.internals.len() - 1)
            }
            None => {
                self.dictionary_cursors.push(0);
                self.internals.push(InternalData {
                    parent: None,
                    reserved: HashSet::new(),
                    renamings: HashMap::new(),
                    renamed_values: HashSet::new(),
                    name_count: 1,
                    cursor_slot: self.dictionary_cursors.len() - 1,
                });
                InternalId(self.internals.len() - 1)
            }
        };
        self.states[state.0].by_proto.insert(proto, internal);
        internal
    }

    fn internal_is_reserved(&self, internal: InternalId, name: StringId) -> bool {
        let mut current = Some(internal);
        while let Some(id) = current {
            let data = &self.internals[id.0];
            if data.reserved.contains(&name) {
                return true;
            }
            current = data.parent;
        }
        false
    }

    fn internal_is_available(&self, internal: InternalId, name: StringId) -> bool {
        let mut current = Some(internal);
        while let Some(id) = current {
            let data = &self.internals[id.0];
            if data.renamed_values.contains(&name) || data.reserved.contains(&name) {
                return false;
            }
            current = data.parent;
        }
        true
    }

    fn internal_assigned_name(&self, internal: InternalId, original: StringId) -> Option<StringId> {
        let mut current = Some(internal);
        while let Some(id) = current {
            let data = &self.internals[id.0];
            if let Some(&renamed) = data.renamings.get(&original) {
                return Some(renamed);
            }
            current = data.parent;
        }
        None
    }

    pub fn reserve_name(&mut self, state: NamingStateId, name: StringId, proto: ProtoId) {
        let internal = self.get_or_create_internal(state, proto);
        self.internals[internal.0].reserved.insert(name);
    }

    pub fn is_reserved(&self, state: NamingStateId, name: StringId, proto: ProtoId) -> bool {
        match self.find_internal(state, proto) {
            Some(internal) => self.internal_is_reserved(internal, name),
            None => false,
        }
    }

    pub fn is_available(&self, state: NamingStateId, proto: ProtoId, candidate: StringId) -> bool {
        match self.find_internal(state, proto) {
            Some(internal) => self.internal_is_available(internal, candidate),
            None => true,
        }
    }

    pub fn assigned_name(
        &self,
        state: NamingStateId,
        original: StringId,
        proto: ProtoId,
    ) -> Option<StringId> {
        self.find_internal(state, proto)
            .and_then(|internal| self.internal_assigned_name(internal, original))
    }

    pub fn add_renaming(
        &mut self,
        state: NamingStateId,
        original: StringId,
        proto: ProtoId,
        new_name: StringId,
    ) {
        let internal = self.get_or_create_internal(state, proto);
        let data = &mut self.internals[internal.0];
        data.renamings.insert(original, new_name);
        data.renamed_values.insert(new_name);
    }

    /// Returns the existing renaming for `original`, or generates the next
    /// free candidate. With `mark_as_used` the candidate is recorded as this
    /// state's renaming; phase 3 passes false to probe candidates without
    /// committing them.
    pub fn assign_new_name_for(
        &mut self,
        state: NamingStateId,
        original: StringId,
        proto: ProtoId,
        mark_as_used: bool,
    ) -> StringId {
        if let Some(existing) = self.assigned_name(state, original, proto) {
            return existing;
        }
        let internal = self.get_or_create_internal(state, proto);
        let name = loop {
            let candidate = self.next_suggested_name(internal);
            let candidate = self.factory.create_string(&candidate);
            if self.internal_is_available(internal, candidate) {
                break candidate;
            }
        };
        if mark_as_used {
            let data = &mut self.internals[internal.0];
            data.renamings.insert(original, name);
            data.renamed_values.insert(name);
        }
        name
    }

    fn next_suggested_name(&mut self, internal: InternalId) -> String {
        let slot = self.internals[internal.0].cursor_slot;
        let cursor = self.dictionary_cursors[slot];
        if cursor < self.dictionary.len() {
            self.dictionary_cursors[slot] += 1;
            self.dictionary[cursor].clone()
        } else {
            let data = &mut self.internals[internal.0];
            let number = data.name_count;
            data.name_count += 1;
            number_to_identifier(number)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_distinct_within_one_proto() {
        let factory = ItemFactory::new();
        let mut pool = NamingStatePool::new(&factory, Vec::new());
        let state = pool.create_root();
        let proto = factory.create_proto(factory.void_type, &[]);
        let a = factory.create_string("first");
        let b = factory.create_string("second");
        let name_a = pool.assign_new_name_for(state, a, proto, true);
        let name_b = pool.assign_new_name_for(state, b, proto, true);
        assert_ne!(name_a, name_b);
        // The same original gets its assigned name back.
        assert_eq!(pool.assign_new_name_for(state, a, proto, true), name_a);
    }

    #[test]
    fn different_protos_reuse_short_names() {
        let factory = ItemFactory::new();
        let mut pool = NamingStatePool::new(&factory, Vec::new());
        let state = pool.create_root();
        let int_ty = factory.create_type("I");
        let proto_v = factory.create_proto(factory.void_type, &[]);
        let proto_i = factory.create_proto(int_ty, &[]);
        let a = factory.create_string("first");
        let name_v = pool.assign_new_name_for(state, a, proto_v, true);
        let name_i = pool.assign_new_name_for(state, a, proto_i, true);
        // Dispatch is proto-indexed, so both can take the first identifier.
        assert_eq!(name_v, name_i);
    }

    #[test]
    fn reservation_blocks_child_states() {
        let factory = ItemFactory::new();
        let mut pool = NamingStatePool::new(&factory, Vec::new());
        let parent = pool.create_root();
        let child = pool.create_child(parent);
        let proto = factory.create_proto(factory.void_type, &[]);
        let reserved = factory.create_string("a");
        pool.reserve_name(parent, reserved, proto);
        assert!(pool.is_reserved(child, reserved, proto));
        assert!(!pool.is_available(child, proto, reserved));
        // The generator skips over the reserved "a".
        let original = factory.create_string("orig");
        let name = pool.assign_new_name_for(child, original, proto, true);
        assert_eq!(&*factory.string(name), "b");
    }

    #[test]
    fn dictionary_words_come_first() {
        let factory = ItemFactory::new();
        let mut pool =
            NamingStatePool::new(&factory, vec!["alpha".to_string(), "beta".to_string()]);
        let state = pool.create_root();
        let proto = factory.create_proto(factory.void_type, &[]);
        let m1 = factory.create_string("m1");
        let m2 = factory.create_string("m2");
        let m3 = factory.create_string("m3");
        assert_eq!(
            &*factory.string(pool.assign_new_name_for(state, m1, proto, true)),
            "alpha"
        );
        assert_eq!(
            &*factory.string(pool.assign_new_name_for(state, m2, proto, true)),
            "beta"
        );
        assert_eq!(
            &*factory.string(pool.assign_new_name_for(state, m3, proto, true)),
            "a"
        );
    }
}
