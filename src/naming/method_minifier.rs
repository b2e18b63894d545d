// Method-name minification.
//
// Naming scopes follow the subtype tree: a class state chains to its
// super-class state, and names are tracked per proto since Dalvik dispatch
// includes the full signature. Reservation happens at frontier states, the
// naming scope of the nearest library ancestor, so program renamings can
// never collide with library overrides.
//
// Interfaces do not form a tree; for them the set of related states is
// computed per signature (super- and sub-interfaces plus frontiers of
// implementing classes) and a name is chosen that is free in all of them.
// Interface methods sharing name and proto across unrelated interfaces are
// merged and renamed together, because a class may implement both.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::graph::{Application, Class, MethodId, ProtoId, StringId, TypeId};
use crate::naming::state::{NamingStateId, NamingStatePool};
use crate::shaking::rules::Configuration;
use crate::shaking::{Item, RootSet};

type Signature = (StringId, ProtoId);

pub struct MethodNameMinifier<'a> {
    app: &'a Application,
    root_set: &'a RootSet,
    pool: NamingStatePool<'a>,
    states: HashMap<TypeId, NamingStateId>,
    frontier: HashMap<TypeId, TypeId>,
    global_state: NamingStateId,
}

impl<'a> MethodNameMinifier<'a> {
    pub fn new(app: &'a Application, root_set: &'a RootSet, config: &'a Configuration) -> Self {
        let mut pool =
            NamingStatePool::new(&app.factory, config.obfuscation_dictionary.clone());
        let global_state = pool.create_root();
        MethodNameMinifier {
            app,
            root_set,
            pool,
            states: HashMap::new(),
            frontier: HashMap::new(),
            global_state,
        }
    }

    pub fn compute_renaming(mut self) -> HashMap<MethodId, StringId> {
        let object = self.app.factory.object_type;
        // Phase 1: reserve names in classes, walking down from Object and
        // allocating linked states at the library frontiers.
        self.reserve_names_in_classes(object, object, None);
        // Phase 2: reserve names in interfaces; every interface is its own
        // frontier.
        let mut interfaces = Vec::new();
        self.app.for_all_interfaces(|iface| interfaces.push(iface));
        for &iface in &interfaces {
            self.reserve_names_in_interfaces(iface);
        }
        // Phase 3: assign names to interface methods across all reachable
        // states.
        let mut renaming = HashMap::new();
        self.assign_names_to_interface_methods(&interfaces, &mut renaming);
        // Phases 4 and 5: assign class methods top-down, then privates.
        self.assign_names_to_class_methods(object, false, &mut renaming);
        self.assign_names_to_class_methods(object, true, &mut renaming);
        renaming
    }

    fn reserve_names_in_classes(
        &mut self,
        ty: TypeId,
        library_frontier: TypeId,
        parent: Option<NamingStateId>,
    ) {
        let holder = self.app.definition_for(ty);
        let holder_is_library = match holder {
            Some(class) => class.is_library_class(),
            None => true,
        };
        let state = self.allocate_naming_state_and_reserve(ty, library_frontier, parent);
        let subtypes: Vec<TypeId> = self
            .app
            .extends_subtypes(ty)
            .iter()
            .copied()
            .filter(|&subtype| !self.app.factory.is_interface(subtype))
            .collect();
        for subtype in subtypes {
            let next_frontier = if holder_is_library { subtype } else { library_frontier };
            self.reserve_names_in_classes(subtype, next_frontier, Some(state));
        }
    }

    fn reserve_names_in_interfaces(&mut self, iface: TypeId) {
        self.allocate_naming_state_and_reserve(iface, iface, None);
    }

    fn allocate_naming_state_and_reserve(
        &mut self,
        ty: TypeId,
        library_frontier: TypeId,
        parent: Option<NamingStateId>,
    ) -> NamingStateId {
        self.frontier.insert(ty, library_frontier);
        let state = match self.states.get(&library_frontier) {
            Some(&state) => state,
            None => {
                let state = match parent {
                    Some(parent) => self.pool.create_child(parent),
                    None => self.pool.create_root(),
                };
                self.states.insert(library_frontier, state);
                state
            }
        };
        if let Some(holder) = self.app.definition_for(ty) {
            // Library and annotation-interface methods keep their names
            // unconditionally; kept program methods reserve theirs at the
            // frontier.
            let keep_all =
                holder.is_library_class() || holder.access_flags.is_annotation();
            let factory = &self.app.factory;
            let mut reservations: Vec<Signature> = Vec::new();
            holder.for_each_method(|method| {
                if keep_all || self.root_set.no_obfuscation.contains(&Item::Method(method.method))
                {
                    reservations.push((
                        factory.method_name(method.method),
                        factory.method_proto(method.method),
                    ));
                }
            });
            for (name, proto) in reservations {
                self.pool.reserve_name(state, name, proto);
                self.pool.reserve_name(self.global_state, name, proto);
            }
        }
        state
    }

    fn collect_super_interfaces(&self, iface: TypeId, interfaces: &mut HashSet<TypeId>) {
        if let Some(class) = self.app.definition_for(iface) {
            for &super_iface in &class.interfaces {
                if interfaces.insert(super_iface) {
                    self.collect_super_interfaces(super_iface, interfaces);
                }
            }
        }
    }

    fn collect_sub_interfaces(&self, iface: TypeId, interfaces: &mut HashSet<TypeId>) {
        for &subtype in self.app.extends_subtypes(iface) {
            if interfaces.insert(subtype) {
                self.collect_sub_interfaces(subtype, interfaces);
            }
        }
    }

    /// The states a signature on `iface` is visible in: the interface
    /// itself, all related interfaces, and the frontier states of every
    /// class implementing any of them.
    fn reachable_states(&self, iface: TypeId) -> HashSet<NamingStateId> {
        let mut interfaces = HashSet::new();
        interfaces.insert(iface);
        self.collect_super_interfaces(iface, &mut interfaces);
        self.collect_sub_interfaces(iface, &mut interfaces);
        let mut states = HashSet::new();
        for &related in &interfaces {
            if let Some(&state) = self.states.get(&related) {
                states.insert(state);
            }
            for &implementor in self.app.implements_subtypes(related) {
                if let Some(frontier) = self.frontier.get(&implementor) {
                    if let Some(&state) = self.states.get(frontier) {
                        states.insert(state);
                    }
                }
            }
        }
        states
    }

    fn assign_names_to_interface_methods(
        &mut self,
        interfaces: &[TypeId],
        renaming: &mut HashMap<MethodId, StringId>,
    ) {
        let factory = &self.app.factory;
        let mut global_state_map: HashMap<Signature, HashSet<NamingStateId>> = HashMap::new();
        let mut source_methods_map: HashMap<Signature, Vec<MethodId>> = HashMap::new();
        let mut origin_states: HashMap<Signature, NamingStateId> = HashMap::new();

        for &iface in interfaces {
            let Some(class) = self.app.definition_for(iface) else {
                continue;
            };
            let collected = self.reachable_states(iface);
            class.for_each_method(|method| {
                let signature = (
                    factory.method_name(method.method),
                    factory.method_proto(method.method),
                );
                global_state_map
                    .entry(signature)
                    .or_default()
                    .extend(collected.iter().copied());
                source_methods_map
                    .entry(signature)
                    .or_default()
                    .push(method.method);
                if let Some(&state) = self.states.get(&iface) {
                    origin_states.entry(signature).or_insert(state);
                }
            });
        }

        // Most-constrained signatures first so the shortest names go to the
        // methods visible in the most scopes; ties broken by content for
        // run-to-run stability.
        let mut signatures: Vec<Signature> = global_state_map.keys().copied().collect();
        signatures.sort_by(|&a, &b| {
            let constraint = global_state_map[&b]
                .len()
                .cmp(&global_state_map[&a].len());
            constraint
                .then_with(|| factory.cmp_strings(a.0, b.0))
                .then_with(|| factory.cmp_protos(a.1, b.1))
        });

        for signature in signatures {
            let states = &global_state_map[&signature];
            let sources = &source_methods_map[&signature];
            let Some(&origin) = origin_states.get(&signature) else {
                continue;
            };
            self.assign_name_for_interface_method(
                signature, states, sources, origin, renaming,
            );
        }
    }

    fn assign_name_for_interface_method(
        &mut self,
        (name, proto): Signature,
        states: &HashSet<NamingStateId>,
        sources: &[MethodId],
        origin: NamingStateId,
        renaming: &mut HashMap<MethodId, StringId>,
    ) {
        if self.pool.is_reserved(self.global_state, name, proto) {
            let reserved_somewhere = states
                .iter()
                .any(|&state| self.pool.is_reserved(state, name, proto));
            if reserved_somewhere {
                // Reserved in one scope means reserved in all of them; the
                // original name survives everywhere.
                for &state in states {
                    self.pool.reserve_name(state, name, proto);
                }
                return;
            }
        }
        // Propose from the origin state so unrelated interfaces can reuse
        // names; skipped candidates are not burned in the class states.
        let candidate = loop {
            let candidate = self.pool.assign_new_name_for(origin, name, proto, false);
            if states
                .iter()
                .all(|&state| self.pool.is_available(state, proto, candidate))
            {
                break candidate;
            }
        };
        for &state in states {
            self.pool.add_renaming(state, name, proto, candidate);
        }
        for &source in sources {
            debug!(
                "interface method `{}` renamed to `{}`",
                self.app.factory.method_to_string(source),
                self.app.factory.string(candidate)
            );
            renaming.insert(source, candidate);
        }
    }

    fn assign_names_to_class_methods(
        &mut self,
        ty: TypeId,
        do_privates: bool,
        renaming: &mut HashMap<MethodId, StringId>,
    ) {
        if let Some(holder) = self.app.definition_for(ty) {
            if !holder.is_library_class() {
                let state = self.state_for_class(ty, holder);
                let methods: Vec<(MethodId, bool, bool)> = holder
                    .all_methods()
                    .map(|m| {
                        (
                            m.method,
                            m.access_flags.is_private(),
                            m.access_flags.is_constructor(),
                        )
                    })
                    .collect();
                for (method, is_private, is_constructor) in methods {
                    if is_private != do_privates || is_constructor {
                        continue;
                    }
                    let name = self.app.factory.method_name(method);
                    let proto = self.app.factory.method_proto(method);
                    if !self.pool.is_reserved(state, name, proto) {
                        // Private names need not propagate down the tree:
                        // subclass publics may shadow them freely.
                        let new_name =
                            self.pool
                                .assign_new_name_for(state, name, proto, !do_privates);
                        renaming.insert(method, new_name);
                    }
                }
            }
        }
        let subtypes: Vec<TypeId> = self
            .app
            .extends_subtypes(ty)
            .iter()
            .copied()
            .filter(|&subtype| !self.app.factory.is_interface(subtype))
            .collect();
        for subtype in subtypes {
            self.assign_names_to_class_methods(subtype, do_privates, renaming);
        }
    }

    fn state_for_class(&mut self, ty: TypeId, holder: &Class) -> NamingStateId {
        if let Some(&state) = self.states.get(&ty) {
            return state;
        }
        let parent_state = holder
            .super_type
            .and_then(|super_type| self.states.get(&super_type).copied())
            .unwrap_or_else(|| {
                self.states
                    .get(&self.app.factory.object_type)
                    .copied()
                    .expect("root naming state exists")
            });
        let state = self.pool.create_child(parent_state);
        self.states.insert(ty, state);
        state
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::{ApplicationBuilder, ClassBuilder, ItemFactory};
    use crate::shaking::{ConfigurationParser, RootSetBuilder};

    fn minify(
        factory: &Arc<ItemFactory>,
        app: &Application,
        rules: &str,
    ) -> HashMap<MethodId, StringId> {
        let mut parser = ConfigurationParser::new(factory.clone());
        parser.parse_string("test.pro", rules).unwrap();
        let config = parser.finish();
        let root_set = RootSetBuilder::new(app, &config).run().unwrap();
        MethodNameMinifier::new(app, &root_set, &config).compute_renaming()
    }

    #[test]
    fn override_and_base_share_renamed_name() {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder
            .add_class(
                ClassBuilder::new(&factory, "Lcom/example/Foo;")
                    .virtual_method("a", &[], "V")
                    .virtual_method("b", &[], "V")
                    .build(),
            )
            .add_class(
                ClassBuilder::new(&factory, "Lcom/example/Bar;")
                    .extends("Lcom/example/Foo;")
                    .virtual_method("a", &[], "V")
                    .build(),
            );
        let app = builder.build().unwrap();
        let renaming = minify(&factory, &app, "");

        let foo = factory.create_type("Lcom/example/Foo;");
        let bar = factory.create_type("Lcom/example/Bar;");
        let proto = factory.create_proto(factory.void_type, &[]);
        let a = factory.create_string("a");
        let foo_a = factory.create_method(foo, a, proto);
        let bar_a = factory.create_method(bar, a, proto);

        // Same original name at both levels: the subclass state answers the
        // renaming recorded in the super state, so the names agree.
        assert_eq!(renaming[&foo_a], renaming[&bar_a]);
    }

    #[test]
    fn kept_method_name_is_reserved_for_subtree() {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder.add_class(
            ClassBuilder::new(&factory, "Lcom/example/Foo;")
                .virtual_method("keepMe", &[], "V")
                .virtual_method("other", &[], "V")
                .build(),
        );
        let app = builder.build().unwrap();
        let renaming = minify(
            &factory,
            &app,
            "-keep class com.example.Foo { void keepMe(); }",
        );

        let foo = factory.create_type("Lcom/example/Foo;");
        let proto = factory.create_proto(factory.void_type, &[]);
        let keep_me = factory.create_method(foo, factory.create_string("keepMe"), proto);
        let other = factory.create_method(foo, factory.create_string("other"), proto);
        assert!(!renaming.contains_key(&keep_me));
        assert!(renaming.contains_key(&other));
    }

    #[test]
    fn merged_interface_signatures_rename_together() {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder
            .add_class(
                ClassBuilder::new(&factory, "Lcom/example/I1;")
                    .interface()
                    .abstract_method("m", &[], "V")
                    .build(),
            )
            .add_class(
                ClassBuilder::new(&factory, "Lcom/example/I2;")
                    .interface()
                    .abstract_method("m", &[], "V")
                    .build(),
            )
            .add_class(
                ClassBuilder::new(&factory, "Lcom/example/C1;")
                    .implements("Lcom/example/I1;")
                    .virtual_method("m", &[], "V")
                    .build(),
            )
            .add_class(
                ClassBuilder::new(&factory, "Lcom/example/C2;")
                    .implements("Lcom/example/I2;")
                    .virtual_method("m", &[], "V")
                    .build(),
            );
        let app = builder.build().unwrap();
        let renaming = minify(&factory, &app, "-keep class com.example.C1");

        let proto = factory.create_proto(factory.void_type, &[]);
        let m = factory.create_string("m");
        let i1_m = factory.create_method(factory.create_type("Lcom/example/I1;"), m, proto);
        let i2_m = factory.create_method(factory.create_type("Lcom/example/I2;"), m, proto);
        // Same name and proto on two interfaces: a class may implement
        // both, so the merged signature renames as one.
        assert_eq!(renaming[&i1_m], renaming[&i2_m]);
    }

    #[test]
    fn library_method_names_are_never_taken() {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder
            .add_class(
                ClassBuilder::new(&factory, "Llib/Base;")
                    .library()
                    .virtual_method("a", &[], "V")
                    .build(),
            )
            .add_class(
                ClassBuilder::new(&factory, "Lcom/example/Child;")
                    .extends("Llib/Base;")
                    .virtual_method("mine", &[], "V")
                    .build(),
            );
        let app = builder.build().unwrap();
        let renaming = minify(&factory, &app, "");

        let child = factory.create_type("Lcom/example/Child;");
        let proto = factory.create_proto(factory.void_type, &[]);
        let mine = factory.create_method(child, factory.create_string("mine"), proto);
        // "a" is reserved by the library method, so the first free name for
        // the same proto is "b".
        assert_eq!(&*factory.string(renaming[&mine]), "b");
    }
}
