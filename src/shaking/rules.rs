// Keep-rule model: the configuration AST and the matchers that decide
// whether a class or member is covered by a rule.

use std::path::PathBuf;

use crate::graph::{
    AccessFlags, Application, Class, EncodedField, EncodedMethod, FieldId, ItemFactory, TypeId,
};

/// Index of a rule in `Configuration::rules`; used as a compact keep reason.
pub type RuleId = usize;

/// Wildcard pattern over java names. `?` matches one non-separator
/// character, `*` a run of non-separator characters, `**` any run of
/// characters including package separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePattern {
    pattern: String,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Self {
        NamePattern {
            pattern: pattern.to_string(),
        }
    }

    pub fn is_specific(&self) -> bool {
        !self.pattern.contains(['*', '?', '%'])
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, name: &str) -> bool {
        Self::matches_at(self.pattern.as_bytes(), name.as_bytes())
    }

    fn matches_at(pattern: &[u8], name: &[u8]) -> bool {
        match pattern.first() {
            None => name.is_empty(),
            Some(b'*') => {
                let double = pattern.get(1) == Some(&b'*');
                let rest = if double { &pattern[2..] } else { &pattern[1..] };
                // Try every split point, longest first keeps `**` greedy.
                for split in (0..=name.len()).rev() {
                    let (eaten, remainder) = name.split_at(split);
                    if !double && eaten.contains(&b'.') {
                        continue;
                    }
                    if Self::matches_at(rest, remainder) {
                        return true;
                    }
                }
                false
            }
            Some(b'?') => match name.first() {
                Some(&c) if c != b'.' => Self::matches_at(&pattern[1..], &name[1..]),
                _ => false,
            },
            Some(&p) => match name.first() {
                Some(&c) if c == p => Self::matches_at(&pattern[1..], &name[1..]),
                _ => false,
            },
        }
    }
}

/// Matcher over types, as written in class specifications and member
/// signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeMatcher {
    /// An exact type; enables the specific-classes fast path.
    Specific(TypeId),
    /// Name with wildcards, matched against the java source name.
    Pattern(NamePattern),
    /// `***` — any type, including primitives and arrays.
    AnyType,
    /// `%` — any primitive type.
    AnyPrimitive,
}

impl TypeMatcher {
    /// `name` is in java syntax (`com.example.Foo`, `int[]`).
    pub fn create(name: &str, factory: &ItemFactory) -> TypeMatcher {
        match name {
            "***" => TypeMatcher::AnyType,
            "%" => TypeMatcher::AnyPrimitive,
            _ => {
                let pattern = NamePattern::new(name);
                if pattern.is_specific() {
                    let descriptor = crate::graph::java_to_descriptor(name);
                    TypeMatcher::Specific(factory.create_type(&descriptor))
                } else {
                    TypeMatcher::Pattern(pattern)
                }
            }
        }
    }

    pub fn matches(&self, ty: TypeId, factory: &ItemFactory) -> bool {
        match self {
            TypeMatcher::Specific(specific) => *specific == ty,
            TypeMatcher::Pattern(pattern) => pattern.matches(&factory.java_name(ty)),
            TypeMatcher::AnyType => true,
            TypeMatcher::AnyPrimitive => factory.is_primitive_type(ty),
        }
    }

    pub fn specific_type(&self) -> Option<TypeId> {
        match self {
            TypeMatcher::Specific(ty) => Some(*ty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassType {
    Class,
    Interface,
    AnnotationInterface,
    Enum,
}

impl ClassType {
    pub fn matches(&self, class: &Class) -> bool {
        match self {
            ClassType::Class => true,
            ClassType::Interface => class.access_flags.is_interface(),
            ClassType::AnnotationInterface => class.access_flags.is_annotation(),
            ClassType::Enum => class.access_flags.is_enum(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRuleType {
    AllMethods,
    AllFields,
    All,
    /// `<init>(...)`.
    Init,
    /// Constructor named by its class name.
    Constructor,
    Method,
    Field,
}

impl MemberRuleType {
    pub fn includes_methods(&self) -> bool {
        matches!(
            self,
            MemberRuleType::AllMethods
                | MemberRuleType::All
                | MemberRuleType::Init
                | MemberRuleType::Constructor
                | MemberRuleType::Method
        )
    }

    pub fn includes_fields(&self) -> bool {
        matches!(
            self,
            MemberRuleType::AllFields | MemberRuleType::All | MemberRuleType::Field
        )
    }
}

/// `return` specification on assume rules.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnValue {
    Boolean(bool),
    Field(FieldId),
    /// Inclusive interval; a single value is `[n, n]`.
    Interval(i64, i64),
}

#[derive(Debug, Clone)]
pub struct MemberRule {
    pub annotation: Option<TypeMatcher>,
    pub access_flags: AccessFlags,
    pub negated_access_flags: AccessFlags,
    pub rule_type: MemberRuleType,
    pub name: Option<NamePattern>,
    pub type_matcher: Option<TypeMatcher>,
    /// `None` stands for `...` (any argument list).
    pub arguments: Option<Vec<TypeMatcher>>,
    pub return_value: Option<ReturnValue>,
}

impl MemberRule {
    fn flags_match(&self, flags: AccessFlags) -> bool {
        flags.contains_all_of(self.access_flags) && flags.contains_none_of(self.negated_access_flags)
    }

    fn annotation_matches(
        &self,
        annotations: &crate::graph::AnnotationSet,
        factory: &ItemFactory,
    ) -> bool {
        match &self.annotation {
            None => true,
            Some(matcher) => annotations
                .annotations
                .iter()
                .any(|a| matcher.matches(a.annotation_type, factory)),
        }
    }

    fn arguments_match(&self, parameters: &[TypeId], factory: &ItemFactory) -> bool {
        match &self.arguments {
            None => true,
            Some(matchers) => {
                matchers.len() == parameters.len()
                    && matchers
                        .iter()
                        .zip(parameters)
                        .all(|(m, &p)| m.matches(p, factory))
            }
        }
    }

    pub fn matches_method(&self, method: &EncodedMethod, app: &Application) -> bool {
        let factory = &app.factory;
        if !self.rule_type.includes_methods() || !self.flags_match(method.access_flags) {
            return false;
        }
        if !self.annotation_matches(&method.annotations, factory) {
            return false;
        }
        let name = factory.string(factory.method_name(method.method));
        let proto = factory.method_proto(method.method);
        let parameters = factory.proto_parameters(proto);
        match self.rule_type {
            MemberRuleType::AllMethods | MemberRuleType::All => true,
            MemberRuleType::Init => {
                method.access_flags.is_constructor()
                    && !method.access_flags.is_static()
                    && self.arguments_match(&parameters, factory)
            }
            MemberRuleType::Constructor => {
                let holder = factory.java_name(factory.method_holder(method.method));
                let simple = holder.rsplit('.').next().unwrap_or(&holder);
                method.access_flags.is_constructor()
                    && self.name.as_ref().is_some_and(|n| n.matches(simple))
                    && self.arguments_match(&parameters, factory)
            }
            MemberRuleType::Method => {
                self.name.as_ref().is_some_and(|n| n.matches(&name))
                    && self
                        .type_matcher
                        .as_ref()
                        .is_none_or(|m| m.matches(factory.proto_return_type(proto), factory))
                    && self.arguments_match(&parameters, factory)
            }
            MemberRuleType::AllFields | MemberRuleType::Field => false,
        }
    }

    pub fn matches_field(&self, field: &EncodedField, app: &Application) -> bool {
        let factory = &app.factory;
        if !self.rule_type.includes_fields() || !self.flags_match(field.access_flags) {
            return false;
        }
        if !self.annotation_matches(&field.annotations, factory) {
            return false;
        }
        match self.rule_type {
            MemberRuleType::AllFields | MemberRuleType::All => true,
            MemberRuleType::Field => {
                let name = factory.string(factory.field_name(field.field));
                self.name.as_ref().is_some_and(|n| n.matches(&name))
                    && self
                        .type_matcher
                        .as_ref()
                        .is_none_or(|m| m.matches(factory.field_type(field.field), factory))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepModifiers {
    pub allows_shrinking: bool,
    pub allows_optimization: bool,
    pub allows_obfuscation: bool,
    pub include_descriptor_classes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepRuleType {
    Keep,
    KeepClassMembers,
    KeepClassesWithMembers,
}

/// The class half of every rule: flags, annotation, names, inheritance and
/// member rules.
#[derive(Debug, Clone)]
pub struct ClassSpecification {
    pub class_annotation: Option<TypeMatcher>,
    pub class_access_flags: AccessFlags,
    pub negated_class_access_flags: AccessFlags,
    pub class_type: ClassType,
    pub class_names: Vec<TypeMatcher>,
    pub inheritance_is_extends: bool,
    pub inheritance_annotation: Option<TypeMatcher>,
    pub inheritance_class_name: Option<TypeMatcher>,
    pub member_rules: Vec<MemberRule>,
}

impl ClassSpecification {
    pub fn new(class_type: ClassType) -> Self {
        ClassSpecification {
            class_annotation: None,
            class_access_flags: AccessFlags::default(),
            negated_class_access_flags: AccessFlags::default(),
            class_type,
            class_names: Vec::new(),
            inheritance_is_extends: false,
            inheritance_annotation: None,
            inheritance_class_name: None,
            member_rules: Vec::new(),
        }
    }

    /// The specific types listed by the rule, or `None` if any name is a
    /// pattern and all classes must be visited.
    pub fn specific_types(&self) -> Option<Vec<TypeId>> {
        self.class_names.iter().map(TypeMatcher::specific_type).collect()
    }

    pub fn has_inheritance_clause(&self) -> bool {
        self.inheritance_class_name.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum Rule {
    Keep {
        keep_type: KeepRuleType,
        modifiers: KeepModifiers,
        spec: ClassSpecification,
    },
    WhyAreYouKeeping(ClassSpecification),
    KeepPackageNames(ClassSpecification),
    CheckDiscard(ClassSpecification),
    AssumeNoSideEffects(ClassSpecification),
    AssumeValues(ClassSpecification),
    AlwaysInline(ClassSpecification),
}

impl Rule {
    pub fn spec(&self) -> &ClassSpecification {
        match self {
            Rule::Keep { spec, .. } => spec,
            Rule::WhyAreYouKeeping(spec)
            | Rule::KeepPackageNames(spec)
            | Rule::CheckDiscard(spec)
            | Rule::AssumeNoSideEffects(spec)
            | Rule::AssumeValues(spec)
            | Rule::AlwaysInline(spec) => spec,
        }
    }

    pub fn applies_to_library_classes(&self) -> bool {
        // Assume rules model library behavior, so they match library
        // definitions too.
        matches!(self, Rule::AssumeNoSideEffects(_) | Rule::AssumeValues(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Rule::Keep {
                keep_type: KeepRuleType::Keep,
                ..
            } => "-keep",
            Rule::Keep {
                keep_type: KeepRuleType::KeepClassMembers,
                ..
            } => "-keepclassmembers",
            Rule::Keep {
                keep_type: KeepRuleType::KeepClassesWithMembers,
                ..
            } => "-keepclasseswithmembers",
            Rule::WhyAreYouKeeping(_) => "-whyareyoukeeping",
            Rule::KeepPackageNames(_) => "-keeppackagenames",
            Rule::CheckDiscard(_) => "-checkdiscard",
            Rule::AssumeNoSideEffects(_) => "-assumenosideeffects",
            Rule::AssumeValues(_) => "-assumevalues",
            Rule::AlwaysInline(_) => "-alwaysinline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageObfuscationMode {
    #[default]
    None,
    Repackage,
    Flatten,
}

/// The parsed, immutable configuration.
#[derive(Debug, Default)]
pub struct Configuration {
    pub rules: Vec<Rule>,
    pub shrink: bool,
    pub obfuscate: bool,
    pub optimize: bool,
    pub ignore_warnings: bool,
    pub verbose: bool,
    pub allow_access_modification: bool,
    pub package_obfuscation_mode: PackageObfuscationMode,
    pub package_prefix: String,
    pub keep_attribute_patterns: Vec<String>,
    pub dont_warn_patterns: Vec<TypeMatcher>,
    pub obfuscation_dictionary: Vec<String>,
    pub class_obfuscation_dictionary: Vec<String>,
    pub package_obfuscation_dictionary: Vec<String>,
    pub injars: Vec<PathBuf>,
    pub library_jars: Vec<PathBuf>,
    pub print_mapping: bool,
    pub print_mapping_file: Option<PathBuf>,
    pub print_seeds: bool,
    pub print_seeds_file: Option<PathBuf>,
    pub print_usage: bool,
    pub print_usage_file: Option<PathBuf>,
}

impl Configuration {
    pub fn new() -> Self {
        Configuration {
            shrink: true,
            obfuscate: true,
            optimize: true,
            ..Configuration::default()
        }
    }

    /// `-keepattributes` decides whether inner-class structure survives
    /// renaming; patterns may be negated with `!`.
    pub fn keeps_attribute(&self, attribute: &str) -> bool {
        let mut kept = false;
        for pattern in &self.keep_attribute_patterns {
            let (negated, pattern) = match pattern.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, pattern.as_str()),
            };
            if NamePattern::new(pattern).matches(attribute) {
                kept = !negated;
            }
        }
        kept
    }

    pub fn is_dont_warn(&self, ty: TypeId, factory: &ItemFactory) -> bool {
        self.dont_warn_patterns.iter().any(|m| m.matches(ty, factory))
    }
}
