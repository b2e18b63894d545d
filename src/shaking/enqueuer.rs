// Liveness fixpoint.
//
// Approximates the runtime dependencies of the root set under a
// closed-world assumption. Virtual methods are split into "reachable"
// (some invoke could dispatch here) and "live" (an instantiated receiver
// actually exists); a reachable method only becomes live once a
// non-shadowing subtype of its holder is instantiated. Library classes are
// opaque: all their virtual methods are reachable and they count as
// instantiated.
//
// The fixpoint is an explicit event work-list, not recursion, so the
// processing order is bounded and deterministic. Every transition grows at
// least one monotone set, so the loop terminates.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, info};

use crate::error::{CompileError, Result};
use crate::graph::{
    Annotation, Application, Class, EncodedValue, FieldId, ItemFactory, MethodId, TypeId,
    UseRegistry,
};
use crate::shaking::root_set::RootSet;
use crate::shaking::rules::{Configuration, MemberRule, RuleId};
use crate::shaking::{Item, KeepReason, SetWithReason};

#[derive(Debug)]
enum Action {
    MarkInstantiated(TypeId, KeepReason),
    MarkReachableVirtual(MethodId, KeepReason),
    MarkReachableInterface(MethodId, KeepReason),
    MarkReachableSuper(MethodId, MethodId),
    MarkReachableField(FieldId, KeepReason),
    MarkMethodLive(MethodId, KeepReason),
    MarkMethodKept(MethodId, KeepReason),
    MarkFieldKept(FieldId, KeepReason),
}

pub struct Enqueuer<'a> {
    app: &'a Application,
    root_set: &'a RootSet,
    config: &'a Configuration,

    work_list: VecDeque<Action>,

    live_types: HashSet<TypeId>,
    live_types_order: Vec<TypeId>,
    instantiated_types: SetWithReason<TypeId>,
    targeted_methods: SetWithReason<MethodId>,
    live_methods: SetWithReason<MethodId>,
    live_fields: SetWithReason<FieldId>,

    reachable_virtual_methods: HashMap<TypeId, SetWithReason<MethodId>>,
    reachable_instance_fields: HashMap<TypeId, SetWithReason<FieldId>>,
    super_invoke_dependencies: HashMap<MethodId, Vec<MethodId>>,
    deferred_annotations: HashMap<TypeId, Vec<Annotation>>,

    virtual_invokes: HashMap<TypeId, HashSet<MethodId>>,
    super_invokes: HashMap<TypeId, HashSet<MethodId>>,
    direct_invokes: HashMap<TypeId, HashSet<MethodId>>,
    static_invokes: HashMap<TypeId, HashSet<MethodId>>,
    instance_fields_read: HashMap<TypeId, HashSet<FieldId>>,
    instance_fields_written: HashMap<TypeId, HashSet<FieldId>>,
    static_fields_read: HashMap<TypeId, HashSet<FieldId>>,
    static_fields_written: HashMap<TypeId, HashSet<FieldId>>,

    virtual_targets_marked_reachable: HashSet<MethodId>,
    reported_missing: HashSet<Item>,
    missing_messages: Vec<String>,
    pinned_items: HashSet<Item>,
    ignore_missing: bool,
}

impl<'a> Enqueuer<'a> {
    pub fn new(app: &'a Application, root_set: &'a RootSet, config: &'a Configuration) -> Self {
        Enqueuer {
            app,
            root_set,
            config,
            work_list: VecDeque::new(),
            live_types: HashSet::new(),
            live_types_order: Vec::new(),
            instantiated_types: SetWithReason::new(),
            targeted_methods: SetWithReason::new(),
            live_methods: SetWithReason::new(),
            live_fields: SetWithReason::new(),
            reachable_virtual_methods: HashMap::new(),
            reachable_instance_fields: HashMap::new(),
            super_invoke_dependencies: HashMap::new(),
            deferred_annotations: HashMap::new(),
            virtual_invokes: HashMap::new(),
            super_invokes: HashMap::new(),
            direct_invokes: HashMap::new(),
            static_invokes: HashMap::new(),
            instance_fields_read: HashMap::new(),
            instance_fields_written: HashMap::new(),
            static_fields_read: HashMap::new(),
            static_fields_written: HashMap::new(),
            virtual_targets_marked_reachable: HashSet::new(),
            reported_missing: HashSet::new(),
            missing_messages: Vec::new(),
            pinned_items: HashSet::new(),
            ignore_missing: config.ignore_warnings,
        }
    }

    /// The --ignore-missing-classes flag; `-ignorewarnings` in the
    /// configuration has the same effect.
    pub fn ignore_missing_classes(mut self, ignore: bool) -> Self {
        self.ignore_missing = self.ignore_missing || ignore;
        self
    }

    /// Traces the whole application: root items plus the open library
    /// surface.
    pub fn trace_application(mut self) -> Result<Liveness> {
        self.enqueue_root_items();
        let app = self.app;
        let mut library_classes: Vec<&Class> = app.library_classes().collect();
        library_classes.sort_by(|a, b| app.factory.cmp_types(a.ty, b.ty));
        for class in library_classes {
            self.mark_all_virtual_methods_reachable(class)?;
        }
        self.trace()?;
        self.check_missing()?;
        Ok(self.freeze())
    }

    /// Traces only the root set; the resulting live types are the main-dex
    /// class set.
    pub fn trace_main_dex(mut self) -> Result<Vec<TypeId>> {
        self.enqueue_root_items();
        self.trace()?;
        let mut types: Vec<TypeId> = self
            .live_types_order
            .iter()
            .copied()
            .filter(|&ty| {
                self.app
                    .definition_for(ty)
                    .is_some_and(|c| c.is_program_class())
            })
            .collect();
        types.sort_by(|&a, &b| self.app.factory.cmp_types(a, b));
        Ok(types)
    }

    fn enqueue_root_items(&mut self) {
        let factory = &self.app.factory;
        let mut roots: Vec<(Item, RuleId)> = self
            .root_set
            .no_shrinking
            .iter()
            .map(|(&item, &rule)| (item, rule))
            .collect();
        roots.sort_by(|(a, _), (b, _)| a.slow_cmp(b, factory));
        for (item, rule) in roots {
            self.enqueue_root_item(item, rule);
        }
    }

    fn enqueue_root_item(&mut self, item: Item, rule: RuleId) {
        let reason = KeepReason::DueToKeepRule(rule);
        self.pinned_items.insert(item);
        match item {
            Item::Class(ty) => self
                .work_list
                .push_back(Action::MarkInstantiated(ty, reason)),
            Item::Method(method) => self
                .work_list
                .push_back(Action::MarkMethodKept(method, reason)),
            Item::Field(field) => self
                .work_list
                .push_back(Action::MarkFieldKept(field, reason)),
        }
    }

    fn enqueue_dependent_items(&mut self, item: Item) {
        let Some(dependents) = self.root_set.dependent_items(item) else {
            return;
        };
        let factory = &self.app.factory;
        let mut dependents: Vec<(Item, RuleId)> =
            dependents.iter().map(|(&i, &r)| (i, r)).collect();
        dependents.sort_by(|(a, _), (b, _)| a.slow_cmp(b, factory));
        for (dependent, rule) in dependents {
            self.enqueue_root_item(dependent, rule);
        }
    }

    fn trace(&mut self) -> Result<()> {
        info!("tracing {} root items", self.work_list.len());
        while let Some(action) = self.work_list.pop_front() {
            match action {
                Action::MarkInstantiated(ty, reason) => {
                    self.process_newly_instantiated_class(ty, reason)?;
                }
                Action::MarkReachableVirtual(method, reason) => {
                    self.mark_virtual_method_as_reachable(method, false, reason)?;
                }
                Action::MarkReachableInterface(method, reason) => {
                    self.mark_virtual_method_as_reachable(method, true, reason)?;
                }
                Action::MarkReachableSuper(method, from) => {
                    self.mark_super_method_as_reachable(method, from);
                }
                Action::MarkReachableField(field, reason) => {
                    self.mark_field_as_reachable(field, reason);
                }
                Action::MarkMethodLive(method, reason) => {
                    self.process_newly_live_method(method, reason)?;
                }
                Action::MarkMethodKept(method, reason) => {
                    self.mark_method_as_kept(method, reason)?;
                }
                Action::MarkFieldKept(field, reason) => {
                    self.mark_field_as_kept(field, reason);
                }
            }
        }
        debug!(
            live_types = self.live_types.len(),
            live_methods = self.live_methods.len(),
            targeted = self.targeted_methods.len(),
            "fixpoint reached"
        );
        Ok(())
    }

    fn check_missing(&self) -> Result<()> {
        if self.missing_messages.is_empty() {
            return Ok(());
        }
        if self.ignore_missing {
            for message in &self.missing_messages {
                tracing::warn!("{message}");
            }
            return Ok(());
        }
        Err(CompileError::MissingReferences(
            self.missing_messages.clone(),
        ))
    }

    // Transitions.

    fn mark_type_as_live(&mut self, ty: TypeId) {
        let app = self.app;
        if !app.factory.is_class_type(ty) || !self.live_types.insert(ty) {
            return;
        }
        self.live_types_order.push(ty);
        debug!("type `{}` has become live", app.factory.java_name(ty));
        let Some(class) = app.definition_for(ty) else {
            self.report_missing_class(ty);
            return;
        };
        for &iface in &class.interfaces {
            self.mark_type_as_live(iface);
        }
        if let Some(super_type) = class.super_type {
            self.mark_type_as_live(super_type);
        }
        self.process_annotations(&class.annotations.annotations);
        // Static initialization runs when the class is loaded; its side
        // effects must survive.
        if class.has_non_trivial_class_initializer(&app.factory) {
            if let Some(clinit) = class.class_initializer(&app.factory) {
                self.mark_direct_method_as_live(
                    clinit.method,
                    KeepReason::ReachableFromLiveType(ty),
                );
            }
        }
        if let Some(deferred) = self.deferred_annotations.remove(&ty) {
            for annotation in deferred {
                self.handle_annotation_of_live_type(&annotation);
            }
        }
        self.enqueue_dependent_items(Item::Class(ty));
    }

    fn process_annotations(&mut self, annotations: &[Annotation]) {
        for annotation in annotations {
            let ty = annotation.annotation_type;
            if self.live_types.contains(&ty) {
                self.handle_annotation_of_live_type(annotation);
            } else {
                // The annotation type is not live yet; replay when (if) it
                // becomes live.
                self.deferred_annotations
                    .entry(ty)
                    .or_default()
                    .push(annotation.clone());
            }
        }
    }

    fn handle_annotation_of_live_type(&mut self, annotation: &Annotation) {
        let holder = annotation.annotation_type;
        self.mark_annotation_value_types(holder, annotation);
    }

    fn mark_annotation_value_types(&mut self, holder: TypeId, annotation: &Annotation) {
        self.mark_type_if_class(annotation.annotation_type);
        for element in &annotation.elements {
            self.mark_encoded_value(holder, &element.value);
        }
    }

    fn mark_type_if_class(&mut self, ty: TypeId) {
        let base = self.app.factory.base_type(ty);
        if self.app.factory.is_class_type(base) {
            self.mark_type_as_live(base);
        }
    }

    fn mark_encoded_value(&mut self, holder: TypeId, value: &EncodedValue) {
        match value {
            EncodedValue::Type(ty) => self.mark_type_if_class(*ty),
            EncodedValue::Field(field) | EncodedValue::EnumValue(field) => {
                // There is no dispatch on annotations, so only directly
                // referenced definitions are kept.
                let reason = KeepReason::ReferencedInAnnotation(holder);
                let field_holder = self.app.factory.field_holder(*field);
                let Some(class) = self.app.definition_for(field_holder) else {
                    return;
                };
                if class.find_static_target(*field).is_some() {
                    self.mark_static_field_as_live(*field, reason);
                } else if class.find_instance_target(*field).is_some() {
                    self.mark_field_as_reachable(*field, reason);
                }
            }
            EncodedValue::Method(method) => {
                let reason = KeepReason::ReferencedInAnnotation(holder);
                let method_holder = self.app.factory.method_holder(*method);
                let Some(class) = self.app.definition_for(method_holder) else {
                    return;
                };
                if class.find_direct_target(*method).is_some() {
                    self.mark_direct_method_as_live(*method, reason);
                } else if class.find_virtual_target(*method).is_some() {
                    self.mark_method_as_targeted(*method, reason);
                }
            }
            EncodedValue::Array(values) => {
                for value in values {
                    self.mark_encoded_value(holder, value);
                }
            }
            EncodedValue::Annotation(nested) => {
                self.mark_annotation_value_types(holder, nested);
            }
            EncodedValue::Boolean(_)
            | EncodedValue::Int(_)
            | EncodedValue::Double(_)
            | EncodedValue::String(_)
            | EncodedValue::Null => {}
        }
    }

    fn report_missing_class(&mut self, ty: TypeId) {
        if self.reported_missing.insert(Item::Class(ty)) {
            if self.config.is_dont_warn(ty, &self.app.factory) {
                return;
            }
            self.missing_messages
                .push(format!("missing class {}", self.app.factory.java_name(ty)));
        }
    }

    fn report_missing_method(&mut self, method: MethodId) {
        if self.reported_missing.insert(Item::Method(method)) {
            let holder = self.app.factory.method_holder(method);
            if self.config.is_dont_warn(holder, &self.app.factory) {
                return;
            }
            self.missing_messages.push(format!(
                "missing method {}",
                self.app.factory.method_to_string(method)
            ));
        }
    }

    fn report_missing_field(&mut self, field: FieldId) {
        if self.reported_missing.insert(Item::Field(field)) {
            let holder = self.app.factory.field_holder(field);
            if self.config.is_dont_warn(holder, &self.app.factory) {
                return;
            }
            self.missing_messages.push(format!(
                "missing field {}",
                self.app.factory.field_to_string(field)
            ));
        }
    }

    fn mark_method_as_targeted(&mut self, method: MethodId, reason: KeepReason) {
        self.mark_type_as_live(self.app.factory.method_holder(method));
        self.targeted_methods.add(method, reason);
    }

    fn process_newly_instantiated_class(&mut self, ty: TypeId, reason: KeepReason) -> Result<()> {
        if self.app.definition_for(ty).is_none() {
            self.report_missing_class(ty);
            return Ok(());
        }
        if !self.instantiated_types.add(ty, reason) {
            return Ok(());
        }
        debug!(
            "class `{}` is instantiated, processing",
            self.app.factory.java_name(ty)
        );
        self.mark_type_as_live(ty);
        self.transition_methods_for_instantiated_class(ty);
        self.transition_fields_for_instantiated_class(ty);
        self.enqueue_dependent_items(Item::Class(ty));
        Ok(())
    }

    /// Replays the virtual invokes seen so far against a newly instantiated
    /// class: every reachable method that is visible (not shadowed by a
    /// more-derived definition already seen) becomes live.
    fn transition_methods_for_instantiated_class(&mut self, ty: TypeId) {
        let app = self.app;
        let factory = &app.factory;
        let mut seen: HashSet<(crate::graph::StringId, crate::graph::ProtoId)> = HashSet::new();
        let mut current = Some(ty);
        while let Some(holder) = current {
            let Some(class) = app.definition_for(holder) else {
                self.report_missing_class(holder);
                break;
            };
            if let Some(reachable) = self.reachable_virtual_methods.get(&holder) {
                let methods: Vec<MethodId> = reachable.items().to_vec();
                for method in methods {
                    let signature = (factory.method_name(method), factory.method_proto(method));
                    if !seen.contains(&signature) {
                        self.mark_virtual_method_as_live(
                            method,
                            KeepReason::ReachableFromLiveType(holder),
                        );
                    }
                }
            }
            // Every definition of this class shadows the same signature
            // further up the chain, reachable or not.
            for method in &class.virtual_methods {
                seen.insert((
                    factory.method_name(method.method),
                    factory.method_proto(method.method),
                ));
            }
            current = class.super_type;
            if let Some(next) = current {
                if self.instantiated_types.contains(&next) {
                    break;
                }
            }
        }
    }

    fn transition_fields_for_instantiated_class(&mut self, ty: TypeId) {
        let app = self.app;
        let mut current = Some(ty);
        while let Some(holder) = current {
            let Some(class) = app.definition_for(holder) else {
                self.report_missing_class(holder);
                break;
            };
            if let Some(reachable) = self.reachable_instance_fields.get(&holder) {
                let fields: Vec<FieldId> = reachable.items().to_vec();
                for field in fields {
                    self.mark_instance_field_as_live(
                        field,
                        KeepReason::ReachableFromLiveType(holder),
                    );
                }
            }
            current = class.super_type;
            if let Some(next) = current {
                if self.instantiated_types.contains(&next) {
                    break;
                }
            }
        }
    }

    fn mark_static_field_as_live(&mut self, field: FieldId, reason: KeepReason) {
        // The holder has to exist at runtime even when the definition sits
        // on a super type.
        self.mark_type_as_live(self.app.factory.field_holder(field));
        let Some(target) = self.app.lookup_static_field_target(field) else {
            self.report_missing_field(field);
            return;
        };
        debug!(
            "adding static field `{}` to live set",
            self.app.factory.field_to_string(target)
        );
        self.live_fields.add(target, reason);
        self.enqueue_dependent_items(Item::Field(target));
    }

    fn mark_instance_field_as_live(&mut self, field: FieldId, reason: KeepReason) {
        self.mark_type_as_live(self.app.factory.field_holder(field));
        debug!(
            "adding instance field `{}` to live set",
            self.app.factory.field_to_string(field)
        );
        self.live_fields.add(field, reason);
        self.enqueue_dependent_items(Item::Field(field));
    }

    fn mark_direct_method_as_live(&mut self, method: MethodId, reason: KeepReason) {
        if !self.live_methods.contains(&method) {
            self.mark_method_as_targeted(method, reason);
            self.work_list
                .push_back(Action::MarkMethodLive(method, reason));
        }
    }

    fn mark_virtual_method_as_live(&mut self, method: MethodId, reason: KeepReason) {
        if !self.live_methods.contains(&method) {
            self.work_list
                .push_back(Action::MarkMethodLive(method, reason));
        }
    }

    fn is_effectively_instantiated(&self, ty: TypeId) -> bool {
        // Library classes count as instantiated: nothing is known about
        // allocation sites outside the program.
        if self.instantiated_types.contains(&ty) {
            return true;
        }
        self.app
            .definition_for(ty)
            .is_some_and(|c| c.is_library_class())
    }

    fn is_instantiated_or_has_instantiated_subtype(&self, ty: TypeId) -> bool {
        self.is_effectively_instantiated(ty)
            || self
                .app
                .subtypes(ty)
                .iter()
                .any(|&subtype| self.is_effectively_instantiated(subtype))
    }

    fn mark_field_as_reachable(&mut self, field: FieldId, reason: KeepReason) {
        let Some(target) = self.app.lookup_instance_field_target(field) else {
            self.report_missing_field(field);
            return;
        };
        let holder = self.app.factory.field_holder(target);
        let added = self
            .reachable_instance_fields
            .entry(holder)
            .or_default()
            .add(target, reason);
        if added && self.is_instantiated_or_has_instantiated_subtype(holder) {
            self.mark_instance_field_as_live(target, reason);
        }
    }

    fn mark_virtual_method_as_reachable(
        &mut self,
        method: MethodId,
        interface_invoke: bool,
        reason: KeepReason,
    ) -> Result<()> {
        if !self.virtual_targets_marked_reachable.insert(method) {
            return Ok(());
        }
        let factory = &self.app.factory;
        let holder = factory.method_holder(method);
        if factory.is_array_type(holder) {
            // Methods on arrays dispatch to java.lang.Object; only the
            // element type matters for liveness.
            let base = factory.base_type(holder);
            if factory.is_class_type(base) {
                self.mark_type_as_live(base);
            }
            return Ok(());
        }
        let Some(holder_class) = self.app.definition_for(holder) else {
            self.report_missing_class(holder);
            return Ok(());
        };
        let holder_is_interface = holder_class.is_interface();
        if interface_invoke && !holder_is_interface {
            return Err(CompileError::AmbiguousDispatch {
                invoke: "invoke-interface",
                method: factory.method_to_string(method),
                interface_holder: false,
            });
        }
        if !interface_invoke && holder_is_interface {
            return Err(CompileError::AmbiguousDispatch {
                invoke: "invoke-virtual",
                method: factory.method_to_string(method),
                interface_holder: true,
            });
        }
        let Some(top_target) = self.app.lookup_virtual_definition(holder, method) else {
            self.report_missing_method(method);
            return Ok(());
        };
        // Even if no instantiated receiver ever shows up, the invoke needs
        // a resolution target; an abstract stub is enough.
        self.mark_method_as_targeted(top_target, reason);

        let targets = if interface_invoke {
            self.app.lookup_interface_targets(method)
        } else {
            self.app.lookup_virtual_targets(method)
        };
        for target in targets {
            let target_holder = self.app.factory.method_holder(target);
            let added = self
                .reachable_virtual_methods
                .entry(target_holder)
                .or_default()
                .add(target, reason);
            if !added {
                continue;
            }
            if !self.is_instantiated_or_has_instantiated_subtype(target_holder) {
                continue;
            }
            if self.is_effectively_instantiated(target_holder) {
                self.mark_virtual_method_as_live(
                    target,
                    KeepReason::ReachableFromLiveType(target_holder),
                );
            } else {
                // Walk down the subtype tree, stopping at any class that
                // shadows the method; the first instantiated type on an
                // unshadowed path makes the target live.
                let mut worklist: VecDeque<TypeId> = VecDeque::new();
                self.fill_subtype_worklist(&mut worklist, target_holder);
                while let Some(current) = worklist.pop_front() {
                    let Some(current_class) = self.app.definition_for(current) else {
                        continue;
                    };
                    if current_class
                        .find_virtual_target_by_signature(&self.app.factory, target)
                        .is_some()
                    {
                        continue;
                    }
                    if self.is_effectively_instantiated(current) {
                        self.mark_virtual_method_as_live(
                            target,
                            KeepReason::ReachableFromLiveType(current),
                        );
                        break;
                    }
                    self.fill_subtype_worklist(&mut worklist, current);
                }
            }
        }
        Ok(())
    }

    fn fill_subtype_worklist(&self, worklist: &mut VecDeque<TypeId>, ty: TypeId) {
        if self.app.factory.is_interface(ty) {
            // Classes implementing the interface are reached both directly
            // and through sub-interfaces.
            self.app
                .for_all_implements_subtypes(ty, |subtype| worklist.push_back(subtype));
            self.app
                .for_all_extends_subtypes(ty, |subtype| worklist.push_back(subtype));
        } else {
            self.app
                .for_all_extends_subtypes(ty, |subtype| worklist.push_back(subtype));
        }
    }

    fn mark_super_method_as_reachable(&mut self, method: MethodId, from: MethodId) {
        let holder = self.app.factory.method_holder(method);
        let Some(target) = self.app.lookup_virtual_target(holder, method) else {
            self.report_missing_method(method);
            return;
        };
        debug!(
            "super constraint from `{}` to `{}`",
            self.app.factory.method_to_string(from),
            self.app.factory.method_to_string(target)
        );
        self.super_invoke_dependencies
            .entry(from)
            .or_default()
            .push(target);
        if self.live_methods.contains(&from) {
            let reason = KeepReason::InvokedViaSuperFrom(from);
            self.mark_method_as_targeted(target, reason);
            self.mark_virtual_method_as_live(target, reason);
        }
    }

    fn mark_method_as_kept(&mut self, method: MethodId, reason: KeepReason) -> Result<()> {
        let holder = self.app.factory.method_holder(method);
        let Some(class) = self.app.definition_for(holder) else {
            return Ok(());
        };
        let Some(encoded) = class
            .find_virtual_target(method)
            .or_else(|| class.find_direct_target(method))
        else {
            return Ok(());
        };
        let flags = encoded.access_flags;
        if !flags.is_static() && !flags.is_constructor() && !flags.is_private() {
            // Keep overrides alive in any instantiated subtype; the holder
            // itself stays only reachable, a keep rule does not imply the
            // class is live.
            let is_interface = class.is_interface();
            self.mark_virtual_method_as_reachable(method, is_interface, reason)?;
        } else {
            self.mark_direct_method_as_live(method, reason);
        }
        Ok(())
    }

    fn mark_field_as_kept(&mut self, field: FieldId, reason: KeepReason) {
        let holder = self.app.factory.field_holder(field);
        if self.app.definition_for(holder).is_none() {
            return;
        }
        let is_static = self
            .app
            .definition_for(holder)
            .and_then(|c| c.find_static_target(field))
            .is_some();
        if is_static {
            self.mark_static_field_as_live(field, reason);
        } else {
            self.mark_field_as_reachable(field, reason);
        }
    }

    fn mark_all_virtual_methods_reachable(&mut self, class: &Class) -> Result<()> {
        for method in &class.virtual_methods {
            self.mark_method_as_targeted(method.method, KeepReason::IsLibraryMethod);
            self.mark_virtual_method_as_reachable(
                method.method,
                class.is_interface(),
                KeepReason::IsLibraryMethod,
            )?;
        }
        Ok(())
    }

    fn process_newly_live_method(&mut self, method: MethodId, reason: KeepReason) -> Result<()> {
        if !self.live_methods.add(method, reason) {
            return Ok(());
        }
        let app = self.app;
        let holder = app.factory.method_holder(method);
        let Some(class) = app.definition_for(holder) else {
            return Ok(());
        };
        if class.is_library_class() {
            // Library bodies are not traced.
            return Ok(());
        }
        debug!(
            "method `{}` has become live",
            app.factory.method_to_string(method)
        );
        if let Some(super_targets) = self.super_invoke_dependencies.get(&method) {
            let targets = super_targets.clone();
            for target in targets {
                let reason = KeepReason::InvokedViaSuperFrom(method);
                self.mark_method_as_targeted(target, reason);
                self.mark_virtual_method_as_live(target, reason);
            }
        }
        let Some(encoded) = app.encoded_method(method) else {
            return Ok(());
        };
        self.process_annotations(&encoded.annotations.annotations);
        for parameter_annotations in &encoded.parameter_annotations {
            self.process_annotations(&parameter_annotations.annotations);
        }
        if let Some(code) = &encoded.code {
            let mut registry = TraceRegistry {
                enqueuer: self,
                current: method,
            };
            code.register_references(&mut registry);
        }
        self.enqueue_dependent_items(Item::Method(method));
        Ok(())
    }

    // Invoke/field-access registration, driven by the code walk of each
    // newly live method.

    fn register_seen(
        map: &mut HashMap<TypeId, HashSet<MethodId>>,
        holder: TypeId,
        method: MethodId,
    ) -> bool {
        map.entry(holder).or_default().insert(method)
    }

    fn registered_holder(&mut self, holder: TypeId) -> Option<TypeId> {
        let factory = &self.app.factory;
        let base = if factory.is_array_type(holder) {
            factory.base_type(holder)
        } else {
            holder
        };
        if !factory.is_class_type(base) {
            return None;
        }
        self.mark_type_as_live(base);
        Some(base)
    }

    fn handle_invoke_of_static_target(&mut self, method: MethodId, reason: KeepReason) {
        match self.app.lookup_static_target(method) {
            Some(target) => self.mark_direct_method_as_live(target, reason),
            None => self.report_missing_method(method),
        }
    }

    fn handle_invoke_of_direct_target(&mut self, method: MethodId, reason: KeepReason) {
        match self.app.lookup_direct_target(method) {
            Some(target) => self.mark_direct_method_as_live(target, reason),
            None => self.report_missing_method(method),
        }
    }

    fn freeze(self) -> Liveness {
        let factory = &self.app.factory;

        let sort_types = |mut types: Vec<TypeId>| {
            types.sort_by(|&a, &b| factory.cmp_types(a, b));
            types
        };
        let sort_methods = |mut methods: Vec<MethodId>| {
            methods.sort_by(|&a, &b| factory.cmp_methods(a, b));
            methods
        };
        let sort_fields = |mut fields: Vec<FieldId>| {
            fields.sort_by(|&a, &b| factory.cmp_fields(a, b));
            fields
        };
        let join_methods = |map: &HashMap<TypeId, HashSet<MethodId>>| {
            sort_methods(map.values().flatten().copied().collect())
        };
        let join_fields = |map: &HashMap<TypeId, HashSet<FieldId>>| {
            sort_fields(map.values().flatten().copied().collect())
        };

        let mut reachability: HashMap<Item, KeepReason> = HashMap::new();
        for set in self.reachable_virtual_methods.values() {
            for &method in set.items() {
                if let Some(&reason) = set.reason(&method) {
                    reachability.insert(Item::Method(method), reason);
                }
            }
        }
        for set in self.reachable_instance_fields.values() {
            for &field in set.items() {
                if let Some(&reason) = set.reason(&field) {
                    reachability.insert(Item::Field(field), reason);
                }
            }
        }
        for &method in self.live_methods.items() {
            if let Some(&reason) = self.live_methods.reason(&method) {
                reachability.insert(Item::Method(method), reason);
            }
        }
        for &field in self.live_fields.items() {
            if let Some(&reason) = self.live_fields.reason(&field) {
                reachability.insert(Item::Field(field), reason);
            }
        }
        for &ty in self.instantiated_types.items() {
            if let Some(&reason) = self.instantiated_types.reason(&ty) {
                reachability.insert(Item::Class(ty), reason);
            }
        }

        let lookup_instance = |field: FieldId| {
            self.app.lookup_instance_field_target(field).unwrap_or(field)
        };
        let lookup_static = |field: FieldId| {
            self.app.lookup_static_field_target(field).unwrap_or(field)
        };
        let fields_read = sort_fields(
            self.instance_fields_read
                .values()
                .flatten()
                .map(|&f| lookup_instance(f))
                .chain(
                    self.static_fields_read
                        .values()
                        .flatten()
                        .map(|&f| lookup_static(f)),
                )
                .collect::<HashSet<_>>()
                .into_iter()
                .collect(),
        );
        let fields_written = sort_fields(
            self.instance_fields_written
                .values()
                .flatten()
                .map(|&f| lookup_instance(f))
                .chain(
                    self.static_fields_written
                        .values()
                        .flatten()
                        .map(|&f| lookup_static(f)),
                )
                .collect::<HashSet<_>>()
                .into_iter()
                .collect(),
        );

        Liveness {
            live_types: SortedSet::new(sort_types(self.live_types.iter().copied().collect())),
            instantiated_types: SortedSet::new(sort_types(
                self.instantiated_types.items().to_vec(),
            )),
            targeted_methods: SortedSet::new(sort_methods(self.targeted_methods.items().to_vec())),
            live_methods: SortedSet::new(sort_methods(self.live_methods.items().to_vec())),
            live_fields: SortedSet::new(sort_fields(self.live_fields.items().to_vec())),
            fields_read,
            fields_written,
            instance_field_reads: join_fields(&self.instance_fields_read),
            instance_field_writes: join_fields(&self.instance_fields_written),
            static_field_reads: join_fields(&self.static_fields_read),
            static_field_writes: join_fields(&self.static_fields_written),
            virtual_invokes: join_methods(&self.virtual_invokes),
            super_invokes: join_methods(&self.super_invokes),
            direct_invokes: join_methods(&self.direct_invokes),
            static_invokes: join_methods(&self.static_invokes),
            pinned_items: self.pinned_items,
            no_side_effects: self.root_set.no_side_effects.clone(),
            assumed_values: self.root_set.assumed_values.clone(),
            always_inline: self.root_set.always_inline.clone(),
            reachability,
        }
    }

    /// Prints retention chains for `-whyareyoukeeping` queries.
    pub fn print_reasons(liveness: &Liveness, queried: &[Item], factory: &ItemFactory) -> String {
        let mut out = String::new();
        let mut queried: Vec<Item> = queried.to_vec();
        queried.sort_by(|a, b| a.slow_cmp(b, factory));
        for item in queried {
            match liveness.reachability.get(&item) {
                Some(reason) => {
                    out.push_str(&format!(
                        "{} is kept: {}\n",
                        item.describe(factory),
                        reason.describe(factory)
                    ));
                }
                None => {
                    out.push_str(&format!("{} is removed\n", item.describe(factory)));
                }
            }
        }
        out
    }
}

struct TraceRegistry<'e, 'a> {
    enqueuer: &'e mut Enqueuer<'a>,
    current: MethodId,
}

impl UseRegistry for TraceRegistry<'_, '_> {
    fn register_invoke_virtual(&mut self, method: MethodId) {
        let holder = self.enqueuer.app.factory.method_holder(method);
        let Some(base) = self.enqueuer.registered_holder(holder) else {
            return;
        };
        if Enqueuer::register_seen(&mut self.enqueuer.virtual_invokes, base, method) {
            self.enqueuer.work_list.push_back(Action::MarkReachableVirtual(
                method,
                KeepReason::InvokedFrom(self.current),
            ));
        }
    }

    fn register_invoke_super(&mut self, method: MethodId) {
        let holder = self.enqueuer.app.factory.method_holder(method);
        let Some(base) = self.enqueuer.registered_holder(holder) else {
            return;
        };
        if Enqueuer::register_seen(&mut self.enqueuer.super_invokes, base, method) {
            self.enqueuer
                .work_list
                .push_back(Action::MarkReachableSuper(method, self.current));
        }
    }

    fn register_invoke_direct(&mut self, method: MethodId) {
        let holder = self.enqueuer.app.factory.method_holder(method);
        let Some(base) = self.enqueuer.registered_holder(holder) else {
            return;
        };
        if Enqueuer::register_seen(&mut self.enqueuer.direct_invokes, base, method) {
            self.enqueuer
                .handle_invoke_of_direct_target(method, KeepReason::InvokedFrom(self.current));
        }
    }

    fn register_invoke_static(&mut self, method: MethodId) {
        let holder = self.enqueuer.app.factory.method_holder(method);
        let Some(base) = self.enqueuer.registered_holder(holder) else {
            return;
        };
        if Enqueuer::register_seen(&mut self.enqueuer.static_invokes, base, method) {
            self.enqueuer
                .handle_invoke_of_static_target(method, KeepReason::InvokedFrom(self.current));
        }
    }

    fn register_invoke_interface(&mut self, method: MethodId) {
        let holder = self.enqueuer.app.factory.method_holder(method);
        let Some(base) = self.enqueuer.registered_holder(holder) else {
            return;
        };
        if Enqueuer::register_seen(&mut self.enqueuer.virtual_invokes, base, method) {
            self.enqueuer.work_list.push_back(Action::MarkReachableInterface(
                method,
                KeepReason::InvokedFrom(self.current),
            ));
        }
    }

    fn register_instance_field_read(&mut self, field: FieldId) {
        let holder = self.enqueuer.app.factory.field_holder(field);
        if self.enqueuer.registered_holder(holder).is_none() {
            return;
        }
        if self
            .enqueuer
            .instance_fields_read
            .entry(holder)
            .or_default()
            .insert(field)
        {
            self.enqueuer.work_list.push_back(Action::MarkReachableField(
                field,
                KeepReason::FieldReferencedIn(self.current),
            ));
        }
    }

    fn register_instance_field_write(&mut self, field: FieldId) {
        let holder = self.enqueuer.app.factory.field_holder(field);
        if self.enqueuer.registered_holder(holder).is_none() {
            return;
        }
        if self
            .enqueuer
            .instance_fields_written
            .entry(holder)
            .or_default()
            .insert(field)
        {
            self.enqueuer.work_list.push_back(Action::MarkReachableField(
                field,
                KeepReason::FieldReferencedIn(self.current),
            ));
        }
    }

    fn register_static_field_read(&mut self, field: FieldId) {
        let holder = self.enqueuer.app.factory.field_holder(field);
        if self.enqueuer.registered_holder(holder).is_none() {
            return;
        }
        if self
            .enqueuer
            .static_fields_read
            .entry(holder)
            .or_default()
            .insert(field)
        {
            self.enqueuer
                .mark_static_field_as_live(field, KeepReason::FieldReferencedIn(self.current));
        }
    }

    fn register_static_field_write(&mut self, field: FieldId) {
        let holder = self.enqueuer.app.factory.field_holder(field);
        if self.enqueuer.registered_holder(holder).is_none() {
            return;
        }
        if self
            .enqueuer
            .static_fields_written
            .entry(holder)
            .or_default()
            .insert(field)
        {
            self.enqueuer
                .mark_static_field_as_live(field, KeepReason::FieldReferencedIn(self.current));
        }
    }

    fn register_new_instance(&mut self, ty: TypeId) {
        if self.enqueuer.instantiated_types.contains(&ty) {
            return;
        }
        if self.enqueuer.app.definition_for(ty).is_none() {
            self.enqueuer.report_missing_class(ty);
            return;
        }
        self.enqueuer.work_list.push_back(Action::MarkInstantiated(
            ty,
            KeepReason::InstantiatedIn(self.current),
        ));
    }

    fn register_type_reference(&mut self, ty: TypeId) {
        let base = self.enqueuer.app.factory.base_type(ty);
        if self.enqueuer.app.factory.is_class_type(base) {
            self.enqueuer.mark_type_as_live(base);
        }
    }
}

/// Sorted frozen set: deterministic iteration plus O(1) membership.
#[derive(Debug, Clone)]
pub struct SortedSet<T> {
    sorted: Vec<T>,
    set: HashSet<T>,
}

impl<T: Copy + Eq + std::hash::Hash> SortedSet<T> {
    fn new(sorted: Vec<T>) -> Self {
        let set = sorted.iter().copied().collect();
        SortedSet { sorted, set }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.set.contains(item)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.sorted.iter()
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.sorted
    }
}

/// The frozen result of the fixpoint. All sets are sorted by content, so two
/// runs over identical inputs produce identical iteration orders.
pub struct Liveness {
    pub live_types: SortedSet<TypeId>,
    pub instantiated_types: SortedSet<TypeId>,
    pub targeted_methods: SortedSet<MethodId>,
    pub live_methods: SortedSet<MethodId>,
    pub live_fields: SortedSet<FieldId>,
    pub fields_read: Vec<FieldId>,
    pub fields_written: Vec<FieldId>,
    pub instance_field_reads: Vec<FieldId>,
    pub instance_field_writes: Vec<FieldId>,
    pub static_field_reads: Vec<FieldId>,
    pub static_field_writes: Vec<FieldId>,
    pub virtual_invokes: Vec<MethodId>,
    pub super_invokes: Vec<MethodId>,
    pub direct_invokes: Vec<MethodId>,
    pub static_invokes: Vec<MethodId>,
    pub pinned_items: HashSet<Item>,
    pub no_side_effects: HashMap<Item, MemberRule>,
    pub assumed_values: HashMap<Item, MemberRule>,
    pub always_inline: HashSet<Item>,
    reachability: HashMap<Item, KeepReason>,
}

impl Liveness {
    pub fn reason_for(&self, item: Item) -> Option<&KeepReason> {
        self.reachability.get(&item)
    }
}
