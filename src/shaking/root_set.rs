// Root-set computation: every configuration rule is applied to every
// matching class, producing the seed sets the enqueuer starts from.
//
// Rules that name only specific classes visit just those; all other rules
// sweep the full program in parallel. All mutation funnels through
// `add_item_to_sets`, which locks the shared sets.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::CompileError;
use crate::graph::{Application, Class, ProtoId, StringId, TypeId};
use crate::shaking::rules::{
    ClassSpecification, Configuration, KeepRuleType, MemberRule, Rule, RuleId, TypeMatcher,
};
use crate::shaking::Item;

type MethodSignature = (StringId, ProtoId);

#[derive(Default)]
struct Sets {
    no_shrinking: HashMap<Item, RuleId>,
    no_optimization: HashSet<Item>,
    no_obfuscation: HashSet<Item>,
    reason_asked: HashSet<Item>,
    keep_package_name: HashSet<Item>,
    check_discarded: HashSet<Item>,
    always_inline: HashSet<Item>,
    no_side_effects: HashMap<Item, MemberRule>,
    assumed_values: HashMap<Item, MemberRule>,
    dependent_no_shrinking: HashMap<Item, HashMap<Item, RuleId>>,
}

pub struct RootSetBuilder<'a> {
    app: &'a Application,
    config: &'a Configuration,
    sets: Mutex<Sets>,
    mismatch_warned: Mutex<HashSet<RuleId>>,
}

impl<'a> RootSetBuilder<'a> {
    pub fn new(app: &'a Application, config: &'a Configuration) -> Self {
        RootSetBuilder {
            app,
            config,
            sets: Mutex::new(Sets::default()),
            mismatch_warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn run(self) -> Result<RootSet, CompileError> {
        for (rule_id, rule) in self.config.rules.iter().enumerate() {
            match rule.spec().specific_types() {
                Some(types) => {
                    // Specific names only; no need to sweep the program.
                    for ty in types {
                        if let Some(class) = self.app.definition_for(ty) {
                            self.process(class, rule, rule_id);
                        }
                    }
                }
                None => {
                    let classes: Vec<&Class> = if rule.applies_to_library_classes() {
                        self.app.classes().collect()
                    } else {
                        self.app.program_classes().collect()
                    };
                    classes
                        .par_iter()
                        .for_each(|class| self.process(class, rule, rule_id));
                }
            }
        }
        let sets = self.sets.into_inner().unwrap();
        debug!(
            no_shrinking = sets.no_shrinking.len(),
            no_obfuscation = sets.no_obfuscation.len(),
            "root set built"
        );
        Ok(RootSet {
            no_shrinking: sets.no_shrinking,
            no_optimization: sets.no_optimization,
            no_obfuscation: sets.no_obfuscation,
            reason_asked: sets.reason_asked,
            keep_package_name: sets.keep_package_name,
            check_discarded: sets.check_discarded,
            always_inline: sets.always_inline,
            no_side_effects: sets.no_side_effects,
            assumed_values: sets.assumed_values,
            dependent_no_shrinking: sets.dependent_no_shrinking,
        })
    }

    fn any_super_type_matches(
        &self,
        mut ty: Option<TypeId>,
        name: &TypeMatcher,
        annotation: Option<&TypeMatcher>,
    ) -> bool {
        let factory = &self.app.factory;
        while let Some(current) = ty {
            let Some(class) = self.app.definition_for(current) else {
                return false;
            };
            if name.matches(current, factory)
                && contains_annotation(annotation, &class.annotations, self.app)
            {
                return true;
            }
            ty = class.super_type;
        }
        false
    }

    fn any_implemented_interface_matches(
        &self,
        class: Option<&Class>,
        name: &TypeMatcher,
        annotation: Option<&TypeMatcher>,
    ) -> bool {
        let Some(class) = class else {
            return false;
        };
        let factory = &self.app.factory;
        for &iface in &class.interfaces {
            let iface_class = self.app.definition_for(iface);
            if name.matches(iface, factory) {
                let annotations_match = match iface_class {
                    Some(c) => contains_annotation(annotation, &c.annotations, self.app),
                    None => annotation.is_none(),
                };
                if annotations_match {
                    return true;
                }
            }
            if self.any_implemented_interface_matches(iface_class, name, annotation) {
                return true;
            }
        }
        let super_class = class
            .super_type
            .and_then(|ty| self.app.definition_for(ty));
        self.any_implemented_interface_matches(super_class, name, annotation)
    }

    fn process(&self, class: &Class, rule: &Rule, rule_id: RuleId) {
        let factory = &self.app.factory;
        let spec = rule.spec();
        if !class.access_flags.contains_all_of(spec.class_access_flags)
            || !class
                .access_flags
                .contains_none_of(spec.negated_class_access_flags)
        {
            return;
        }
        if !spec.class_type.matches(class) {
            return;
        }
        if !contains_annotation(spec.class_annotation.as_ref(), &class.annotations, self.app) {
            return;
        }

        // Proguard never distinguished extends from implements here, so
        // users write them interchangeably. Accept both, tell them once.
        if let Some(inheritance_name) = &spec.inheritance_class_name {
            let annotation = spec.inheritance_annotation.as_ref();
            let extends_expected =
                self.any_super_type_matches(class.super_type, inheritance_name, annotation);
            let implements_expected = !extends_expected
                && self.any_implemented_interface_matches(Some(class), inheritance_name, annotation);
            if !extends_expected && !implements_expected {
                return;
            }
            let wrong_keyword = (extends_expected && !spec.inheritance_is_extends)
                || (implements_expected && spec.inheritance_is_extends);
            if wrong_keyword && self.mismatch_warned.lock().unwrap().insert(rule_id) {
                warn!(
                    "rule `{}` uses {} but actually matches {}",
                    rule.kind_name(),
                    if spec.inheritance_is_extends { "extends" } else { "implements" },
                    if spec.inheritance_is_extends { "implements" } else { "extends" },
                );
            }
        }

        for class_name in &spec.class_names {
            if !class_name.matches(class.ty, factory) {
                continue;
            }
            match rule {
                Rule::Keep { keep_type, spec, .. } => match keep_type {
                    KeepRuleType::KeepClassMembers => {
                        self.mark_matching_visible_methods(class, spec, rule, rule_id, Some(class.ty));
                        self.mark_matching_fields(class, spec, rule, rule_id, Some(class.ty));
                    }
                    KeepRuleType::KeepClassesWithMembers => {
                        if self.all_rules_satisfied(&spec.member_rules, class) {
                            self.mark_class(class, rule, rule_id);
                            self.mark_matching_visible_methods(class, spec, rule, rule_id, None);
                            self.mark_matching_fields(class, spec, rule, rule_id, None);
                        }
                    }
                    KeepRuleType::Keep => {
                        self.mark_class(class, rule, rule_id);
                        self.mark_matching_visible_methods(class, spec, rule, rule_id, None);
                        self.mark_matching_fields(class, spec, rule, rule_id, None);
                    }
                },
                Rule::CheckDiscard(spec) => {
                    if spec.member_rules.is_empty() {
                        self.mark_class(class, rule, rule_id);
                    } else {
                        self.mark_matching_fields(class, spec, rule, rule_id, Some(class.ty));
                        self.mark_matching_methods(class, spec, rule, rule_id, Some(class.ty));
                    }
                }
                Rule::WhyAreYouKeeping(spec) | Rule::KeepPackageNames(spec) => {
                    self.mark_class(class, rule, rule_id);
                    self.mark_matching_visible_methods(class, spec, rule, rule_id, None);
                    self.mark_matching_fields(class, spec, rule, rule_id, None);
                }
                Rule::AssumeNoSideEffects(spec) | Rule::AssumeValues(spec) => {
                    self.mark_matching_visible_methods(class, spec, rule, rule_id, None);
                    self.mark_matching_fields(class, spec, rule, rule_id, None);
                }
                Rule::AlwaysInline(spec) => {
                    self.mark_matching_methods(class, spec, rule, rule_id, None);
                }
            }
        }
    }

    /// Direct methods of the class itself, plus virtual methods of the
    /// whole super chain (those are visible through this class).
    fn mark_matching_visible_methods(
        &self,
        class: &Class,
        spec: &ClassSpecification,
        rule: &Rule,
        rule_id: RuleId,
        only_if_class_kept: Option<TypeId>,
    ) {
        let mut marked: HashSet<MethodSignature> = HashSet::new();
        for method in &class.direct_methods {
            self.mark_method(method, spec, rule, rule_id, Some(&mut marked), only_if_class_kept);
        }
        let mut current = Some(class.ty);
        while let Some(ty) = current {
            let Some(holder) = self.app.definition_for(ty) else {
                break;
            };
            for method in &holder.virtual_methods {
                self.mark_method(method, spec, rule, rule_id, Some(&mut marked), only_if_class_kept);
            }
            current = holder.super_type;
        }
    }

    fn mark_matching_methods(
        &self,
        class: &Class,
        spec: &ClassSpecification,
        rule: &Rule,
        rule_id: RuleId,
        only_if_class_kept: Option<TypeId>,
    ) {
        for method in class.all_methods() {
            self.mark_method(method, spec, rule, rule_id, None, only_if_class_kept);
        }
    }

    fn mark_matching_fields(
        &self,
        class: &Class,
        spec: &ClassSpecification,
        rule: &Rule,
        rule_id: RuleId,
        only_if_class_kept: Option<TypeId>,
    ) {
        for field in class.all_fields() {
            for member_rule in &spec.member_rules {
                if member_rule.matches_field(field, self.app) {
                    debug!(
                        "marking field `{}` due to `{}`",
                        self.app.factory.field_to_string(field.field),
                        rule.kind_name()
                    );
                    self.add_item_to_sets(
                        Item::Field(field.field),
                        rule,
                        rule_id,
                        Some(member_rule),
                        only_if_class_kept,
                    );
                }
            }
        }
    }

    fn mark_method(
        &self,
        method: &crate::graph::EncodedMethod,
        spec: &ClassSpecification,
        rule: &Rule,
        rule_id: RuleId,
        mut marked: Option<&mut HashSet<MethodSignature>>,
        only_if_class_kept: Option<TypeId>,
    ) {
        let factory = &self.app.factory;
        let signature = (
            factory.method_name(method.method),
            factory.method_proto(method.method),
        );
        if let Some(marked) = marked.as_deref() {
            if marked.contains(&signature) {
                return;
            }
        }
        for member_rule in &spec.member_rules {
            if member_rule.matches_method(method, self.app) {
                debug!(
                    "marking method `{}` due to `{}`",
                    factory.method_to_string(method.method),
                    rule.kind_name()
                );
                if let Some(marked) = marked.as_deref_mut() {
                    marked.insert(signature);
                }
                self.add_item_to_sets(
                    Item::Method(method.method),
                    rule,
                    rule_id,
                    Some(member_rule),
                    only_if_class_kept,
                );
            }
        }
    }

    fn mark_class(&self, class: &Class, rule: &Rule, rule_id: RuleId) {
        debug!(
            "marking class `{}` due to `{}`",
            self.app.factory.java_name(class.ty),
            rule.kind_name()
        );
        self.add_item_to_sets(Item::Class(class.ty), rule, rule_id, None, None);
    }

    fn all_rules_satisfied(&self, member_rules: &[MemberRule], class: &Class) -> bool {
        member_rules.iter().all(|rule| {
            (rule.rule_type.includes_methods()
                && class.all_methods().any(|m| rule.matches_method(m, self.app)))
                || (rule.rule_type.includes_fields()
                    && class.all_fields().any(|f| rule.matches_field(f, self.app)))
        })
    }

    fn include_descriptor(&self, item: Item, ty: TypeId, rule_id: RuleId, sets: &mut Sets) {
        let factory = &self.app.factory;
        let base = factory.base_type(ty);
        if factory.is_primitive_type(base) {
            return;
        }
        let Some(definition) = self.app.definition_for(base) else {
            return;
        };
        if definition.is_library_class() {
            return;
        }
        let class_item = Item::Class(base);
        sets.dependent_no_shrinking
            .entry(item)
            .or_default()
            .insert(class_item, rule_id);
        // No-obfuscation is only consulted for surviving items, so adding
        // unconditionally is safe.
        sets.no_obfuscation.insert(class_item);
    }

    fn include_descriptor_classes(&self, item: Item, rule_id: RuleId, sets: &mut Sets) {
        let factory = &self.app.factory;
        match item {
            Item::Method(method) => {
                let proto = factory.method_proto(method);
                self.include_descriptor(item, factory.proto_return_type(proto), rule_id, sets);
                for &param in factory.proto_parameters(proto).iter() {
                    self.include_descriptor(item, param, rule_id, sets);
                }
            }
            Item::Field(field) => {
                self.include_descriptor(item, factory.field_type(field), rule_id, sets);
            }
            Item::Class(_) => {}
        }
    }

    fn add_item_to_sets(
        &self,
        item: Item,
        rule: &Rule,
        rule_id: RuleId,
        member_rule: Option<&MemberRule>,
        only_if_class_kept: Option<TypeId>,
    ) {
        let mut sets = self.sets.lock().unwrap();
        match rule {
            Rule::Keep { modifiers, .. } => {
                if !modifiers.allows_shrinking {
                    match only_if_class_kept {
                        Some(class_ty) => {
                            sets.dependent_no_shrinking
                                .entry(Item::Class(class_ty))
                                .or_default()
                                .insert(item, rule_id);
                        }
                        None => {
                            sets.no_shrinking.insert(item, rule_id);
                        }
                    }
                }
                if !modifiers.allows_optimization {
                    sets.no_optimization.insert(item);
                }
                if !modifiers.allows_obfuscation {
                    sets.no_obfuscation.insert(item);
                }
                if modifiers.include_descriptor_classes {
                    self.include_descriptor_classes(item, rule_id, &mut sets);
                }
            }
            Rule::AssumeNoSideEffects(_) => {
                if let Some(member_rule) = member_rule {
                    sets.no_side_effects.insert(item, member_rule.clone());
                }
            }
            Rule::WhyAreYouKeeping(_) => {
                sets.reason_asked.insert(item);
            }
            Rule::KeepPackageNames(_) => {
                sets.keep_package_name.insert(item);
            }
            Rule::AssumeValues(_) => {
                if let Some(member_rule) = member_rule {
                    sets.assumed_values.insert(item, member_rule.clone());
                }
            }
            Rule::CheckDiscard(_) => {
                sets.check_discarded.insert(item);
            }
            Rule::AlwaysInline(_) => {
                sets.always_inline.insert(item);
            }
        }
    }
}

fn contains_annotation(
    matcher: Option<&TypeMatcher>,
    annotations: &crate::graph::AnnotationSet,
    app: &Application,
) -> bool {
    match matcher {
        None => true,
        Some(matcher) => annotations
            .annotations
            .iter()
            .any(|a| matcher.matches(a.annotation_type, &app.factory)),
    }
}

pub struct RootSet {
    pub no_shrinking: HashMap<Item, RuleId>,
    pub no_optimization: HashSet<Item>,
    pub no_obfuscation: HashSet<Item>,
    pub reason_asked: HashSet<Item>,
    pub keep_package_name: HashSet<Item>,
    pub check_discarded: HashSet<Item>,
    pub always_inline: HashSet<Item>,
    pub no_side_effects: HashMap<Item, MemberRule>,
    pub assumed_values: HashMap<Item, MemberRule>,
    dependent_no_shrinking: HashMap<Item, HashMap<Item, RuleId>>,
}

impl RootSet {
    pub fn dependent_items(&self, item: Item) -> Option<&HashMap<Item, RuleId>> {
        self.dependent_no_shrinking.get(&item)
    }

    /// Proguard seeds format: one line per kept item.
    pub fn write_seeds(
        &self,
        app: &Application,
        out: &mut impl Write,
    ) -> std::io::Result<()> {
        let factory = &app.factory;
        let mut seeds: Vec<Item> = self.no_shrinking.keys().copied().collect();
        seeds.sort_by(|a, b| a.slow_cmp(b, factory));
        for item in seeds {
            match item {
                Item::Class(ty) => writeln!(out, "{}", factory.java_name(ty))?,
                Item::Field(field) => writeln!(
                    out,
                    "{}: {} {}",
                    factory.java_name(factory.field_holder(field)),
                    factory.java_name(factory.field_type(field)),
                    factory.string(factory.field_name(field))
                )?,
                Item::Method(method) => {
                    let holder = factory.java_name(factory.method_holder(method));
                    let name = factory.string(factory.method_name(method));
                    let proto = factory.method_proto(method);
                    let params: Vec<String> = factory
                        .proto_parameters(proto)
                        .iter()
                        .map(|&p| factory.java_name(p))
                        .collect();
                    let encoded = app.encoded_method(method);
                    let is_constructor =
                        encoded.is_some_and(|m| m.access_flags.is_constructor());
                    if is_constructor {
                        let simple = if &*name == "<clinit>" {
                            "<clinit>".to_string()
                        } else {
                            holder.rsplit('.').next().unwrap_or(&holder).to_string()
                        };
                        writeln!(out, "{}: {}({})", holder, simple, params.join(","))?;
                    } else {
                        writeln!(
                            out,
                            "{}: {} {}({})",
                            holder,
                            factory.java_name(factory.proto_return_type(proto)),
                            name,
                            params.join(",")
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::graph::{ApplicationBuilder, ClassBuilder, ItemFactory};
    use crate::shaking::ConfigurationParser;

    fn build_app(factory: &Arc<ItemFactory>) -> Application {
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder
            .add_class(
                ClassBuilder::new(factory, "Lcom/example/Foo;")
                    .virtual_method("a", &[], "V")
                    .virtual_method("b", &[], "V")
                    .build(),
            )
            .add_class(
                ClassBuilder::new(factory, "Lcom/example/Bar;")
                    .extends("Lcom/example/Foo;")
                    .virtual_method("a", &[], "V")
                    .build(),
            );
        builder.build().unwrap()
    }

    fn run_rules(app: &Application, factory: &Arc<ItemFactory>, source: &str) -> RootSet {
        let mut parser = ConfigurationParser::new(factory.clone());
        parser.parse_string("test.pro", source).unwrap();
        let config = parser.finish();
        RootSetBuilder::new(app, &config).run().unwrap()
    }

    #[test]
    fn keep_marks_class_and_members() {
        let factory = Arc::new(ItemFactory::new());
        let app = build_app(&factory);
        let root_set = run_rules(&app, &factory, "-keep class com.example.Bar { *; }");

        let bar = factory.create_type("Lcom/example/Bar;");
        assert!(root_set.no_shrinking.contains_key(&Item::Class(bar)));
        // Bar.a and the visible, unshadowed Foo.b are marked; Foo.a is
        // shadowed by Bar.a and therefore not visible through Bar.
        let marked_methods = root_set
            .no_shrinking
            .keys()
            .filter(|i| matches!(i, Item::Method(_)))
            .count();
        assert_eq!(marked_methods, 2);
    }

    #[test]
    fn keep_class_members_is_conditional_on_class() {
        let factory = Arc::new(ItemFactory::new());
        let app = build_app(&factory);
        let root_set = run_rules(
            &app,
            &factory,
            "-keepclassmembers class com.example.Foo { void a(); }",
        );
        let foo = factory.create_type("Lcom/example/Foo;");
        assert!(!root_set.no_shrinking.contains_key(&Item::Class(foo)));
        let dependents = root_set.dependent_items(Item::Class(foo)).unwrap();
        assert_eq!(dependents.len(), 1);
    }

    #[test]
    fn keep_classes_with_members_requires_satisfaction() {
        let factory = Arc::new(ItemFactory::new());
        let app = build_app(&factory);
        // Bar has no method b, so the rule must not mark Bar.
        let root_set = run_rules(
            &app,
            &factory,
            "-keepclasseswithmembers class com.example.* { void b(); }",
        );
        let foo = factory.create_type("Lcom/example/Foo;");
        let bar = factory.create_type("Lcom/example/Bar;");
        assert!(root_set.no_shrinking.contains_key(&Item::Class(foo)));
        assert!(!root_set.no_shrinking.contains_key(&Item::Class(bar)));
    }

    #[test]
    fn inheritance_clause_matches_subclasses() {
        let factory = Arc::new(ItemFactory::new());
        let app = build_app(&factory);
        let root_set = run_rules(&app, &factory, "-keep class * extends com.example.Foo");
        let foo = factory.create_type("Lcom/example/Foo;");
        let bar = factory.create_type("Lcom/example/Bar;");
        assert!(root_set.no_shrinking.contains_key(&Item::Class(bar)));
        assert!(!root_set.no_shrinking.contains_key(&Item::Class(foo)));
    }

    #[test]
    fn assume_values_records_member_rule() {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder.add_class(
            ClassBuilder::new(&factory, "Lcom/example/Config;")
                .virtual_method("value", &[], "I")
                .build(),
        );
        let app = builder.build().unwrap();
        let root_set = run_rules(
            &app,
            &factory,
            "-assumevalues class com.example.Config { int value() return 1..5; }",
        );
        assert_eq!(root_set.assumed_values.len(), 1);
    }

    #[test]
    fn seeds_output_format() {
        let factory = Arc::new(ItemFactory::new());
        let app = build_app(&factory);
        let root_set = run_rules(&app, &factory, "-keep class com.example.Bar { void a(); }");
        let mut out = Vec::new();
        root_set.write_seeds(&app, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("com.example.Bar"));
        assert!(text.contains("com.example.Bar: void a()"));
    }
}
