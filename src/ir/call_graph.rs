// Call graph over program methods.
//
// Nodes are methods; an edge caller -> callee exists once no matter how many
// call sites the caller has. Virtual and interface calls contribute every
// potential target found through the subtype index. Self-recursion is a node
// flag, not an edge. After construction the graph is made acyclic by a DFS
// that removes back edges; removed edges are remembered so later passes can
// recognize them. Leaf extraction then yields layers of methods with no
// remaining callees, which callers process in parallel.

use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use tracing::debug;

use crate::graph::{Application, FieldId, MethodId, TypeId, UseRegistry};
use crate::shaking::enqueuer::Liveness;
use crate::shaking::Item;

pub struct CallGraph<'a> {
    app: &'a Application,
    graph: StableDiGraph<MethodId, ()>,
    node_map: HashMap<MethodId, NodeIndex>,
    invoke_counts: HashMap<MethodId, usize>,
    self_recursive: HashSet<MethodId>,
    breakers: HashMap<MethodId, HashSet<MethodId>>,
    single_call_site: HashSet<MethodId>,
    double_call_site: HashSet<MethodId>,
    /// Test hook: permutes each extracted leaf layer.
    shuffle: Option<fn(Vec<MethodId>) -> Vec<MethodId>>,
}

impl<'a> CallGraph<'a> {
    pub fn build(app: &'a Application, liveness: &Liveness) -> CallGraph<'a> {
        Self::build_with_shuffle(app, liveness, None)
    }

    pub fn build_with_shuffle(
        app: &'a Application,
        liveness: &Liveness,
        shuffle: Option<fn(Vec<MethodId>) -> Vec<MethodId>>,
    ) -> CallGraph<'a> {
        let mut graph = CallGraph {
            app,
            graph: StableDiGraph::new(),
            node_map: HashMap::new(),
            invoke_counts: HashMap::new(),
            self_recursive: HashSet::new(),
            breakers: HashMap::new(),
            single_call_site: HashSet::new(),
            double_call_site: HashSet::new(),
            shuffle,
        };
        for class in app.program_classes_sorted() {
            for method in class.all_methods_sorted(&app.factory) {
                let caller = graph.ensure_node(method.method);
                if let Some(code) = &method.code {
                    let mut extractor = InvokeExtractor {
                        graph: &mut graph,
                        caller,
                    };
                    code.register_references(&mut extractor);
                }
            }
        }
        let removed = graph.break_cycles();
        debug_assert_eq!(graph.break_cycles(), 0);
        debug!(
            nodes = graph.graph.node_count(),
            removed_edges = removed,
            "call graph built"
        );
        graph.fill_call_site_sets(liveness);
        graph
    }

    fn ensure_node(&mut self, method: MethodId) -> NodeIndex {
        match self.node_map.get(&method) {
            Some(&index) => index,
            None => {
                let index = self.graph.add_node(method);
                self.node_map.insert(method, index);
                index
            }
        }
    }

    fn add_call(&mut self, caller: NodeIndex, callee: NodeIndex) {
        if caller == callee {
            let method = self.graph[caller];
            self.self_recursive.insert(method);
        } else if self.graph.find_edge(caller, callee).is_none() {
            self.graph.add_edge(caller, callee, ());
        }
        let callee_method = self.graph[callee];
        *self.invoke_counts.entry(callee_method).or_insert(0) += 1;
    }

    /// DFS with an explicit on-stack set; a callee already on the stack
    /// closes a cycle, so that edge is removed and recorded. Callees are
    /// visited in slow-compare order, which pins down which edge of a cycle
    /// gets broken across runs.
    fn break_cycles(&mut self) -> usize {
        let mut removed = 0;
        let mut marked: HashSet<NodeIndex> = HashSet::new();
        let mut on_stack: HashSet<NodeIndex> = HashSet::new();
        let mut roots: Vec<NodeIndex> = self.graph.node_indices().collect();
        roots.sort_by(|&a, &b| {
            self.app
                .factory
                .cmp_methods(self.graph[a], self.graph[b])
        });
        for root in roots {
            removed += self.traverse(root, &mut on_stack, &mut marked);
        }
        removed
    }

    fn traverse(
        &mut self,
        node: NodeIndex,
        on_stack: &mut HashSet<NodeIndex>,
        marked: &mut HashSet<NodeIndex>,
    ) -> usize {
        if marked.contains(&node) {
            return 0;
        }
        let mut removed = 0;
        on_stack.insert(node);
        let mut callees: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        callees.sort_by(|&a, &b| {
            self.app
                .factory
                .cmp_methods(self.graph[a], self.graph[b])
        });
        for callee in callees {
            if on_stack.contains(&callee) {
                if let Some(edge) = self.graph.find_edge(node, callee) {
                    self.graph.remove_edge(edge);
                    let caller_method = self.graph[node];
                    let callee_method = self.graph[callee];
                    self.breakers
                        .entry(caller_method)
                        .or_default()
                        .insert(callee_method);
                    removed += 1;
                }
            } else {
                removed += self.traverse(callee, on_stack, marked);
            }
        }
        on_stack.remove(&node);
        marked.insert(node);
        removed
    }

    fn fill_call_site_sets(&mut self, liveness: &Liveness) {
        for (&method, &count) in &self.invoke_counts {
            // Keep rules may add call sites the graph cannot see, so pinned
            // methods never qualify.
            if liveness.pinned_items.contains(&Item::Method(method)) {
                continue;
            }
            if count == 1 {
                self.single_call_site.insert(method);
            } else if count == 2 {
                self.double_call_site.insert(method);
            }
        }
    }

    pub fn is_breaker(&self, caller: MethodId, callee: MethodId) -> bool {
        self.breakers
            .get(&caller)
            .is_some_and(|callees| callees.contains(&callee))
    }

    pub fn breaker_count(&self) -> usize {
        self.breakers.values().map(HashSet::len).sum()
    }

    pub fn has_single_call_site(&self, method: MethodId) -> bool {
        self.single_call_site.contains(&method)
    }

    pub fn has_double_call_site(&self, method: MethodId) -> bool {
        self.double_call_site.contains(&method)
    }

    pub fn is_self_recursive(&self, method: MethodId) -> bool {
        self.self_recursive.contains(&method)
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Removes and returns the current leaves (out-degree zero) in
    /// slow-compare order. Repeated calls drain the whole graph.
    pub fn extract_leaves(&mut self) -> Vec<MethodId> {
        if self.is_empty() {
            return Vec::new();
        }
        let leaf_indices: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&node| {
                self.graph
                    .neighbors_directed(node, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .collect();
        let mut leaves: Vec<MethodId> = leaf_indices.iter().map(|&n| self.graph[n]).collect();
        for index in leaf_indices {
            let method = self.graph[index];
            self.graph.remove_node(index);
            self.node_map.remove(&method);
        }
        leaves.sort_by(|&a, &b| self.app.factory.cmp_methods(a, b));
        match self.shuffle {
            Some(shuffle) => shuffle(leaves),
            None => leaves,
        }
    }

    /// Drains the graph layer by layer, handing each layer to `process`.
    /// Methods within a layer have no remaining mutual dependencies, so the
    /// callback is free to fan the layer out over worker threads.
    pub fn for_each_layer(&mut self, mut process: impl FnMut(Vec<MethodId>)) {
        while !self.is_empty() {
            let layer = self.extract_leaves();
            debug_assert!(!layer.is_empty(), "acyclic graph always has leaves");
            process(layer);
        }
    }
}

struct InvokeExtractor<'g, 'a> {
    graph: &'g mut CallGraph<'a>,
    caller: NodeIndex,
}

impl InvokeExtractor<'_, '_> {
    fn add_class_initializer_target(&mut self, ty: TypeId) {
        let app = self.graph.app;
        let base = app.factory.base_type(ty);
        let Some(class) = app.definition_for(base) else {
            return;
        };
        if class.is_library_class() {
            return;
        }
        if let Some(clinit) = class.class_initializer(&app.factory) {
            let callee = self.graph.ensure_node(clinit.method);
            self.graph.add_call(self.caller, callee);
        }
    }

    fn add_target(&mut self, target: MethodId) {
        let callee = self.graph.ensure_node(target);
        self.graph.add_call(self.caller, callee);
    }

    fn add_program_target(&mut self, target: MethodId) {
        let holder = self.graph.app.factory.method_holder(target);
        let is_program = self
            .graph
            .app
            .definition_for(holder)
            .is_some_and(|c| !c.is_library_class());
        if is_program {
            self.add_target(target);
        }
    }

    fn process_invoke(&mut self, method: MethodId, virtual_dispatch: bool) {
        let app = self.graph.app;
        let holder = app.factory.method_holder(method);
        let definition = if virtual_dispatch {
            app.lookup_virtual_definition(holder, method)
        } else {
            app.lookup_direct_target(method)
        };
        let Some(definition) = definition else {
            return;
        };
        let definition_holder = app.factory.method_holder(definition);
        let Some(holder_class) = app.definition_for(definition_holder) else {
            return;
        };
        if holder_class.is_library_class() {
            return;
        }
        self.add_class_initializer_target(definition_holder);
        self.add_target(definition);
        if virtual_dispatch {
            let targets = if holder_class.is_interface() {
                app.lookup_interface_targets(definition)
            } else {
                app.lookup_virtual_targets(definition)
            };
            for target in targets {
                if target != definition {
                    self.add_program_target(target);
                }
            }
        }
    }

    fn process_field_access(&mut self, field: FieldId) {
        // Touching a field loads its class.
        let holder = self.graph.app.factory.field_holder(field);
        self.add_class_initializer_target(holder);
    }
}

impl UseRegistry for InvokeExtractor<'_, '_> {
    fn register_invoke_virtual(&mut self, method: MethodId) {
        self.process_invoke(method, true);
    }

    fn register_invoke_super(&mut self, method: MethodId) {
        self.process_invoke(method, false);
    }

    fn register_invoke_direct(&mut self, method: MethodId) {
        self.process_invoke(method, false);
    }

    fn register_invoke_static(&mut self, method: MethodId) {
        self.process_invoke(method, false);
    }

    fn register_invoke_interface(&mut self, method: MethodId) {
        self.process_invoke(method, true);
    }

    fn register_instance_field_read(&mut self, field: FieldId) {
        self.process_field_access(field);
    }

    fn register_instance_field_write(&mut self, field: FieldId) {
        self.process_field_access(field);
    }

    fn register_static_field_read(&mut self, field: FieldId) {
        self.process_field_access(field);
    }

    fn register_static_field_write(&mut self, field: FieldId) {
        self.process_field_access(field);
    }

    fn register_new_instance(&mut self, ty: TypeId) {
        self.add_class_initializer_target(ty);
    }

    fn register_type_reference(&mut self, _ty: TypeId) {}
}
