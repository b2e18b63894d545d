// The application: class table, definition map, subtype index and Dalvik
// resolution.
//
// Classes reference each other through interned type ids only; the
// application owns the classes, the factory owns the ids. Lookup failures
// are recoverable (`None`), the caller decides whether a missing definition
// is a warning or an error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::CompileError;
use crate::graph::class::{Class, ClassOrigin, EncodedMethod};
use crate::graph::factory::{FieldId, ItemFactory, MethodId, ProtoId, StringId, TypeId};

pub struct Application {
    pub factory: Arc<ItemFactory>,
    classes: Vec<Class>,
    definitions: HashMap<TypeId, usize>,
    extends_subtypes: HashMap<TypeId, Vec<TypeId>>,
    implements_subtypes: HashMap<TypeId, Vec<TypeId>>,
    pub main_dex_list: Vec<TypeId>,
}

pub struct ApplicationBuilder {
    factory: Arc<ItemFactory>,
    classes: Vec<Class>,
    main_dex_list: Vec<TypeId>,
}

impl ApplicationBuilder {
    pub fn new(factory: Arc<ItemFactory>) -> Self {
        ApplicationBuilder {
            factory,
            classes: Vec::new(),
            main_dex_list: Vec::new(),
        }
    }

    pub fn factory(&self) -> &Arc<ItemFactory> {
        &self.factory
    }

    pub fn add_class(&mut self, class: Class) -> &mut Self {
        self.classes.push(class);
        self
    }

    pub fn add_main_dex_type(&mut self, ty: TypeId) -> &mut Self {
        self.main_dex_list.push(ty);
        self
    }

    pub fn build(self) -> Result<Application, CompileError> {
        let mut app = Application {
            factory: self.factory,
            classes: self.classes,
            definitions: HashMap::new(),
            extends_subtypes: HashMap::new(),
            implements_subtypes: HashMap::new(),
            main_dex_list: self.main_dex_list,
        };
        app.index()?;
        Ok(app)
    }
}

impl Application {
    fn index(&mut self) -> Result<(), CompileError> {
        self.definitions.clear();
        self.extends_subtypes.clear();
        self.implements_subtypes.clear();
        for (i, class) in self.classes.iter().enumerate() {
            if let Some(previous) = self.definitions.insert(class.ty, i) {
                // Program classes shadow classpath/library duplicates; a
                // duplicate program definition is an input error.
                let prev_origin = self.classes[previous].origin;
                if prev_origin == ClassOrigin::Program && class.origin == ClassOrigin::Program {
                    return Err(CompileError::input(
                        &*self.factory.descriptor(class.ty),
                        "duplicate program class definition",
                    ));
                }
                if prev_origin == ClassOrigin::Program {
                    self.definitions.insert(class.ty, previous);
                }
            }
            if class.is_interface() {
                self.factory.set_interface(class.ty);
            }
        }
        // Interfaces hang off their super-interfaces as extends-subtypes;
        // classes implementing an interface are its implements-subtypes.
        // An interface's nominal java.lang.Object super edge is not a
        // subtype edge for dispatch purposes.
        for class in &self.classes {
            if class.is_interface() {
                for &iface in &class.interfaces {
                    self.extends_subtypes
                        .entry(iface)
                        .or_default()
                        .push(class.ty);
                }
            } else {
                if let Some(super_type) = class.super_type {
                    self.extends_subtypes
                        .entry(super_type)
                        .or_default()
                        .push(class.ty);
                }
                for &iface in &class.interfaces {
                    self.implements_subtypes
                        .entry(iface)
                        .or_default()
                        .push(class.ty);
                }
            }
        }
        // Deterministic traversal order regardless of input order.
        for subtypes in self.extends_subtypes.values_mut() {
            subtypes.sort_by(|&a, &b| self.factory.cmp_types(a, b));
        }
        for subtypes in self.implements_subtypes.values_mut() {
            subtypes.sort_by(|&a, &b| self.factory.cmp_types(a, b));
        }
        debug!(classes = self.classes.len(), "indexed application");
        Ok(())
    }

    /// Replaces the class table (after pruning) and rebuilds the indices.
    pub fn replace_classes(&mut self, classes: Vec<Class>) -> Result<(), CompileError> {
        self.classes = classes;
        self.index()
    }

    pub fn definition_for(&self, ty: TypeId) -> Option<&Class> {
        self.definitions.get(&ty).map(|&i| &self.classes[i])
    }

    pub fn definition_for_mut(&mut self, ty: TypeId) -> Option<&mut Class> {
        match self.definitions.get(&ty) {
            Some(&i) => Some(&mut self.classes[i]),
            None => None,
        }
    }

    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.iter()
    }

    pub fn program_classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.iter().filter(|c| c.is_program_class())
    }

    pub fn library_classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.iter().filter(|c| c.is_library_class())
    }

    /// Program classes in slow-compare order; the deterministic iteration
    /// order used by every phase that must produce stable output.
    pub fn program_classes_sorted(&self) -> Vec<&Class> {
        let mut classes: Vec<&Class> = self.program_classes().collect();
        classes.sort_by(|a, b| self.factory.cmp_types(a.ty, b.ty));
        classes
    }

    pub fn for_all_interfaces(&self, mut consumer: impl FnMut(TypeId)) {
        let mut interfaces: Vec<TypeId> = self
            .classes
            .iter()
            .filter(|c| c.is_interface())
            .map(|c| c.ty)
            .collect();
        interfaces.sort_by(|&a, &b| self.factory.cmp_types(a, b));
        for iface in interfaces {
            consumer(iface);
        }
    }

    pub fn extends_subtypes(&self, ty: TypeId) -> &[TypeId] {
        self.extends_subtypes.get(&ty).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn implements_subtypes(&self, ty: TypeId) -> &[TypeId] {
        self.implements_subtypes
            .get(&ty)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn for_all_extends_subtypes(&self, ty: TypeId, mut consumer: impl FnMut(TypeId)) {
        for &subtype in self.extends_subtypes(ty) {
            consumer(subtype);
        }
    }

    pub fn for_all_implements_subtypes(&self, ty: TypeId, mut consumer: impl FnMut(TypeId)) {
        for &subtype in self.implements_subtypes(ty) {
            consumer(subtype);
        }
    }

    /// All transitive subtypes, following both extends and implements edges.
    pub fn subtypes(&self, ty: TypeId) -> Vec<TypeId> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut worklist = vec![ty];
        while let Some(current) = worklist.pop() {
            for &subtype in self
                .extends_subtypes(current)
                .iter()
                .chain(self.implements_subtypes(current))
            {
                if seen.insert(subtype) {
                    result.push(subtype);
                    worklist.push(subtype);
                }
            }
        }
        result
    }

    fn signature_of(&self, method: MethodId) -> (StringId, ProtoId) {
        (
            self.factory.method_name(method),
            self.factory.method_proto(method),
        )
    }

    /// Standard virtual lookup: walk the super chain from `holder` for a
    /// virtual method matching name and proto. Returns the defining method.
    pub fn lookup_virtual_target(&self, holder: TypeId, method: MethodId) -> Option<MethodId> {
        let (name, proto) = self.signature_of(method);
        let mut current = Some(holder);
        while let Some(ty) = current {
            let class = self.definition_for(ty)?;
            for candidate in &class.virtual_methods {
                if self.factory.method_name(candidate.method) == name
                    && self.factory.method_proto(candidate.method) == proto
                {
                    return Some(candidate.method);
                }
            }
            current = class.super_type;
        }
        None
    }

    /// Virtual lookup that also searches interfaces for a default target,
    /// used when the resolution start is an interface type.
    pub fn lookup_virtual_definition(&self, holder: TypeId, method: MethodId) -> Option<MethodId> {
        if let Some(found) = self.lookup_virtual_target(holder, method) {
            return Some(found);
        }
        let (name, proto) = self.signature_of(method);
        let class = self.definition_for(holder)?;
        for &iface in &class.interfaces {
            if let Some(iface_class) = self.definition_for(iface) {
                for candidate in &iface_class.virtual_methods {
                    if self.factory.method_name(candidate.method) == name
                        && self.factory.method_proto(candidate.method) == proto
                    {
                        return Some(candidate.method);
                    }
                }
            }
        }
        None
    }

    pub fn lookup_direct_target(&self, method: MethodId) -> Option<MethodId> {
        let (name, proto) = self.signature_of(method);
        let mut current = Some(self.factory.method_holder(method));
        while let Some(ty) = current {
            let class = self.definition_for(ty)?;
            for candidate in &class.direct_methods {
                if self.factory.method_name(candidate.method) == name
                    && self.factory.method_proto(candidate.method) == proto
                {
                    return Some(candidate.method);
                }
            }
            current = class.super_type;
        }
        None
    }

    pub fn lookup_static_target(&self, method: MethodId) -> Option<MethodId> {
        // Static methods live in the direct pool; resolution walks the same
        // chain.
        self.lookup_direct_target(method)
    }

    pub fn lookup_static_field_target(&self, field: FieldId) -> Option<FieldId> {
        let name = self.factory.field_name(field);
        let field_type = self.factory.field_type(field);
        let mut current = Some(self.factory.field_holder(field));
        while let Some(ty) = current {
            let class = self.definition_for(ty)?;
            for candidate in &class.static_fields {
                if self.factory.field_name(candidate.field) == name
                    && self.factory.field_type(candidate.field) == field_type
                {
                    return Some(candidate.field);
                }
            }
            current = class.super_type;
        }
        None
    }

    pub fn lookup_instance_field_target(&self, field: FieldId) -> Option<FieldId> {
        let name = self.factory.field_name(field);
        let field_type = self.factory.field_type(field);
        let mut current = Some(self.factory.field_holder(field));
        while let Some(ty) = current {
            let class = self.definition_for(ty)?;
            for candidate in &class.instance_fields {
                if self.factory.field_name(candidate.field) == name
                    && self.factory.field_type(candidate.field) == field_type
                {
                    return Some(candidate.field);
                }
            }
            current = class.super_type;
        }
        None
    }

    /// All concrete targets an invoke-virtual on `method` may dispatch to:
    /// the resolved definition plus every override in a subtype of the
    /// holder.
    pub fn lookup_virtual_targets(&self, method: MethodId) -> Vec<MethodId> {
        let holder = self.factory.method_holder(method);
        let mut targets = Vec::new();
        let mut seen = HashSet::new();
        if let Some(definition) = self.lookup_virtual_target(holder, method) {
            if seen.insert(definition) {
                targets.push(definition);
            }
        }
        for subtype in self.subtypes(holder) {
            if let Some(class) = self.definition_for(subtype) {
                if let Some(target) =
                    class.find_virtual_target_by_signature(&self.factory, method)
                {
                    if seen.insert(target.method) {
                        targets.push(target.method);
                    }
                }
            }
        }
        targets.sort_by(|&a, &b| self.factory.cmp_methods(a, b));
        targets
    }

    /// All concrete targets an invoke-interface on `method` may dispatch
    /// to: for every class implementing the interface (transitively),
    /// resolve the signature up that class's super chain.
    pub fn lookup_interface_targets(&self, method: MethodId) -> Vec<MethodId> {
        let iface = self.factory.method_holder(method);
        let mut targets = Vec::new();
        let mut seen = HashSet::new();
        // Default method on the interface itself or a sub-interface.
        for ty in std::iter::once(iface).chain(self.subtypes(iface)) {
            let Some(class) = self.definition_for(ty) else {
                continue;
            };
            if class.is_interface() {
                if let Some(target) =
                    class.find_virtual_target_by_signature(&self.factory, method)
                {
                    if seen.insert(target.method) {
                        targets.push(target.method);
                    }
                }
            } else if let Some(target) = self.lookup_virtual_target(ty, method) {
                if seen.insert(target) {
                    targets.push(target);
                }
            }
        }
        targets.sort_by(|&a, &b| self.factory.cmp_methods(a, b));
        targets
    }

    /// Finds the encoded method for a resolved definition.
    pub fn encoded_method(&self, method: MethodId) -> Option<&EncodedMethod> {
        let holder = self.factory.method_holder(method);
        let class = self.definition_for(holder)?;
        class
            .find_virtual_target(method)
            .or_else(|| class.find_direct_target(method))
    }
}
