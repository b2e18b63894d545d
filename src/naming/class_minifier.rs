// Class-name minification.
//
// Fresh names are drawn from per-package namespaces. Depending on the
// package obfuscation mode, namespaces mirror the original package tree,
// collapse into one flat package, or collapse per source package into
// renamed subpackages. Classes whose names are kept reserve both their type
// name and all enclosing package prefixes.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::graph::{Application, Class, EncodedValue, ItemFactory, TypeId};
use crate::naming::number_to_identifier;
use crate::naming::signature::{SignatureAction, SignatureParser};
use crate::shaking::rules::{Configuration, PackageObfuscationMode};
use crate::shaking::{Item, RootSet};

/// The class minifier's output: type renaming plus the rewritten generic
/// signature strings, keyed by the original signature.
#[derive(Debug, Default)]
pub struct ClassRenaming {
    pub types: HashMap<TypeId, String>,
    pub signatures: HashMap<String, String>,
}

pub struct ClassNameMinifier<'a> {
    app: &'a Application,
    root_set: &'a RootSet,
    config: &'a Configuration,
    keep_inner_class_structure: bool,
    used_type_names: HashSet<String>,
    used_package_prefixes: HashSet<String>,
    states: HashMap<String, Namespace>,
    renaming: HashMap<TypeId, String>,
    signature_renaming: HashMap<String, String>,
}

impl<'a> ClassNameMinifier<'a> {
    pub fn new(app: &'a Application, root_set: &'a RootSet, config: &'a Configuration) -> Self {
        let mut states = HashMap::new();
        // The top-level namespace carries the -repackageclasses /
        // -flattenpackagehierarchy prefix.
        states.insert(
            String::new(),
            Namespace::new(&config.package_prefix.replace('.', "/"), "/"),
        );
        ClassNameMinifier {
            app,
            root_set,
            config,
            keep_inner_class_structure: config.keeps_attribute("Signature")
                || config.keeps_attribute("InnerClasses"),
            used_type_names: HashSet::new(),
            used_package_prefixes: HashSet::new(),
            states,
            renaming: HashMap::new(),
            signature_renaming: HashMap::new(),
        }
    }

    pub fn compute_renaming(mut self) -> ClassRenaming {
        let classes = self.app.program_classes_sorted();

        for class in &classes {
            if self.root_set.no_obfuscation.contains(&Item::Class(class.ty)) {
                self.register_class_as_used(class.ty);
            }
        }
        for class in &classes {
            if !self.renaming.contains_key(&class.ty) {
                let renamed = self.compute_name(class);
                self.renaming.insert(class.ty, renamed);
            }
        }

        self.rename_types_in_generic_signatures();

        for ty in self.app.factory.all_types() {
            self.rename_array_type_if_needed(ty);
        }

        ClassRenaming {
            types: self.renaming,
            signatures: self.signature_renaming,
        }
    }

    fn register_class_as_used(&mut self, ty: TypeId) {
        let factory = &self.app.factory;
        let descriptor = factory.descriptor(ty).to_string();
        self.renaming.insert(ty, descriptor.clone());
        self.used_type_names.insert(descriptor.clone());
        self.register_package_prefixes_as_used(&parent_package_prefix(&binary_name(&descriptor)));
        if self.keep_inner_class_structure {
            // Keeping an inner name only helps if the enclosing name stays
            // stable too.
            if let Some(outer) = self.outer_class_for_type(ty) {
                if !self.renaming.contains_key(&outer) {
                    self.register_class_as_used(outer);
                }
            }
        }
    }

    fn register_package_prefixes_as_used(&mut self, package_prefix: &str) {
        let mut prefix = package_prefix.to_string();
        while !prefix.is_empty() {
            self.used_package_prefixes.insert(prefix.clone());
            prefix = parent_package_prefix(&prefix);
        }
    }

    fn outer_class_for_type(&self, ty: TypeId) -> Option<TypeId> {
        let class = self.app.definition_for(ty)?;
        let annotation = class
            .annotations
            .first_matching(self.app.factory.enclosing_class_annotation_type)?;
        match annotation.elements.first().map(|e| &e.value) {
            Some(EncodedValue::Type(outer)) => Some(*outer),
            // Local and anonymous classes carry no member-type declaration
            // and need no stable nesting.
            _ => None,
        }
    }

    fn compute_name(&mut self, class: &Class) -> String {
        if self.keep_inner_class_structure {
            if let Some(outer) = self.outer_class_for_type(class.ty) {
                let key = self.ensure_state_for_outer_class(outer);
                return self.next_type_name_in(&key);
            }
        }
        let key = self.state_key_for_class(class);
        self.next_type_name_in(&key)
    }

    /// Namespace key for a regular (non-inner) class, creating states on
    /// demand according to the package obfuscation mode.
    fn state_key_for_class(&mut self, class: &Class) -> String {
        let package = self.app.factory.package_name(class.ty);
        if self
            .root_set
            .keep_package_name
            .contains(&Item::Class(class.ty))
        {
            if !self.states.contains_key(&package) {
                self.states
                    .insert(package.clone(), Namespace::new(&package, "/"));
            }
            return package;
        }
        match self.config.package_obfuscation_mode {
            PackageObfuscationMode::Repackage => String::new(),
            PackageObfuscationMode::Flatten => {
                if !self.states.contains_key(&package) {
                    let renamed = self.next_package_prefix_in("");
                    self.states
                        .insert(package.clone(), Namespace::new(&renamed, "/"));
                }
                package
            }
            PackageObfuscationMode::None => {
                self.ensure_state_for_package_prefix(&package);
                package
            }
        }
    }

    /// Recursively allocates renamed prefixes: the state for `a/b/c` draws
    /// its prefix from the state for `a/b`.
    fn ensure_state_for_package_prefix(&mut self, prefix: &str) {
        if self.states.contains_key(prefix) {
            return;
        }
        let parent = parent_package_prefix(prefix);
        self.ensure_state_for_package_prefix(&parent);
        let renamed = self.next_package_prefix_in(&parent);
        self.states
            .insert(prefix.to_string(), Namespace::new(&renamed, "/"));
    }

    fn ensure_state_for_outer_class(&mut self, outer: TypeId) -> String {
        let factory = self.app.factory.clone();
        let key = binary_name(&factory.descriptor(outer));
        if !self.states.contains_key(&key) {
            let renamed_outer = match self.renaming.get(&outer) {
                Some(renamed) => renamed.clone(),
                None => {
                    // Outer not yet named; name it first so the `$` prefix
                    // is final.
                    match self.app.definition_for(outer) {
                        Some(outer_class) if outer_class.is_program_class() => {
                            let renamed = self.compute_name(outer_class);
                            self.renaming.insert(outer, renamed.clone());
                            renamed
                        }
                        _ => factory.descriptor(outer).to_string(),
                    }
                }
            };
            self.states.insert(
                key.clone(),
                Namespace::new(&binary_name(&renamed_outer), "$"),
            );
        }
        key
    }

    fn next_type_name_in(&mut self, key: &str) -> String {
        let state = self.states.get_mut(key).expect("namespace exists");
        state.next_type_name(&self.used_type_names, &self.config.class_obfuscation_dictionary)
    }

    fn next_package_prefix_in(&mut self, key: &str) -> String {
        let state = self.states.get_mut(key).expect("namespace exists");
        state.next_package_prefix(
            &self.used_package_prefixes,
            &self.config.package_obfuscation_dictionary,
        )
    }

    fn rename_array_type_if_needed(&mut self, ty: TypeId) {
        let factory = &self.app.factory;
        if !factory.is_array_type(ty) {
            return;
        }
        let base = factory.base_type(ty);
        if let Some(renamed_base) = self.renaming.get(&base) {
            let dimensions = factory.array_dimensions(ty);
            let renamed = format!("{}{}", "[".repeat(dimensions), renamed_base);
            self.renaming.insert(ty, renamed);
        }
    }

    fn rename_types_in_generic_signatures(&mut self) {
        let factory = self.app.factory.clone();
        let signature_type = factory.signature_annotation_type;
        let mut pending: Vec<(String, SignatureKind)> = Vec::new();
        for class in self.app.program_classes() {
            for annotation in &class.annotations.annotations {
                if annotation.annotation_type != signature_type {
                    continue;
                }
                if let Some(signature) = signature_from_annotation(&factory, annotation) {
                    pending.push((signature, SignatureKind::Class));
                }
            }
            class.for_each_field(|field| {
                for annotation in &field.annotations.annotations {
                    if annotation.annotation_type == signature_type {
                        if let Some(signature) = signature_from_annotation(&factory, annotation) {
                            pending.push((signature, SignatureKind::Field));
                        }
                    }
                }
            });
            class.for_each_method(|method| {
                for annotation in &method.annotations.annotations {
                    if annotation.annotation_type == signature_type {
                        if let Some(signature) = signature_from_annotation(&factory, annotation) {
                            pending.push((signature, SignatureKind::Method));
                        }
                    }
                }
            });
        }
        for (signature, kind) in pending {
            if self.signature_renaming.contains_key(&signature) {
                continue;
            }
            if let Some(rewritten) = self.rewrite_signature(&signature, kind) {
                self.signature_renaming.insert(signature, rewritten);
            }
        }
    }

    fn rewrite_signature(&mut self, signature: &str, kind: SignatureKind) -> Option<String> {
        let mut rewriter = SignatureRewriter {
            factory: &self.app.factory,
            renaming: &self.renaming,
            out: String::new(),
        };
        let mut parser = SignatureParser::new(&mut rewriter);
        let result = match kind {
            SignatureKind::Class => parser.parse_class_signature(signature),
            SignatureKind::Method => parser.parse_method_signature(signature),
            SignatureKind::Field => parser.parse_field_signature(signature),
        };
        match result {
            Ok(()) => Some(rewriter.out),
            Err(error) => {
                warn!("invalid generic signature `{signature}`: {error}; kept as is");
                None
            }
        }
    }
}

enum SignatureKind {
    Class,
    Method,
    Field,
}

/// The dalvik Signature annotation splits the string into chunks; the
/// logical signature is their concatenation.
fn signature_from_annotation(
    factory: &ItemFactory,
    annotation: &crate::graph::Annotation,
) -> Option<String> {
    match annotation.elements.first().map(|e| &e.value)? {
        EncodedValue::Array(parts) => {
            let mut signature = String::new();
            for part in parts {
                match part {
                    EncodedValue::String(chunk) => signature.push_str(&factory.string(*chunk)),
                    _ => return None,
                }
            }
            Some(signature)
        }
        EncodedValue::String(chunk) => Some(factory.string(*chunk).to_string()),
        _ => None,
    }
}

/// Rebuilds a generic signature, substituting renamed class names.
struct SignatureRewriter<'a> {
    factory: &'a ItemFactory,
    renaming: &'a HashMap<TypeId, String>,
    out: String,
}

impl SignatureAction for SignatureRewriter<'_> {
    fn parsed_symbol(&mut self, symbol: char) {
        self.out.push(symbol);
    }

    fn parsed_identifier(&mut self, identifier: &str) {
        self.out.push_str(identifier);
    }

    fn parsed_type_name(&mut self, name: &str) -> TypeId {
        let descriptor = format!("L{};", name);
        let ty = self.factory.create_type(&descriptor);
        let renamed = self
            .renaming
            .get(&ty)
            .cloned()
            .unwrap_or_else(|| descriptor.clone());
        self.out.push_str(&binary_name(&renamed));
        ty
    }

    fn parsed_inner_type_name(&mut self, enclosing: TypeId, name: &str) -> TypeId {
        let enclosing_descriptor = self.factory.descriptor(enclosing);
        let descriptor = format!("L{}${};", binary_name(&enclosing_descriptor), name);
        let ty = self.factory.create_type(&descriptor);
        let renamed_enclosing = binary_name(
            self.renaming
                .get(&enclosing)
                .cloned()
                .unwrap_or_else(|| enclosing_descriptor.to_string())
                .as_str(),
        );
        let renamed = binary_name(
            self.renaming
                .get(&ty)
                .cloned()
                .unwrap_or_else(|| descriptor.clone())
                .as_str(),
        );
        let prefix = format!("{renamed_enclosing}$");
        match renamed.strip_prefix(&prefix) {
            Some(suffix) => self.out.push_str(suffix),
            // The inner class was renamed without preserving nesting; fall
            // back to its simple renamed name.
            None => self
                .out
                .push_str(renamed.rsplit('$').next().unwrap_or(&renamed)),
        }
        ty
    }
}

/// One name space: a renamed package prefix plus counters and dictionary
/// positions for type and subpackage names.
struct Namespace {
    /// `L` + package + separator, e.g. `La/b/` or `La/b/C$`.
    package_prefix: String,
    type_counter: usize,
    package_counter: usize,
    class_dictionary_position: usize,
    package_dictionary_position: usize,
}

impl Namespace {
    fn new(package_name: &str, separator: &str) -> Self {
        let package_prefix = if package_name.is_empty() {
            "L".to_string()
        } else {
            format!("L{}{}", package_name, separator)
        };
        Namespace {
            package_prefix,
            type_counter: 1,
            package_counter: 1,
            class_dictionary_position: 0,
            package_dictionary_position: 0,
        }
    }

    fn next_suggested_type_name(&mut self, dictionary: &[String]) -> String {
        if self.class_dictionary_position < dictionary.len() {
            let word = &dictionary[self.class_dictionary_position];
            self.class_dictionary_position += 1;
            format!("{}{};", self.package_prefix, word)
        } else {
            let number = self.type_counter;
            self.type_counter += 1;
            format!("{}{};", self.package_prefix, number_to_identifier(number))
        }
    }

    fn next_type_name(&mut self, used: &HashSet<String>, dictionary: &[String]) -> String {
        loop {
            let candidate = self.next_suggested_type_name(dictionary);
            if !used.contains(&candidate) {
                debug!("allocated type name `{candidate}`");
                return candidate;
            }
        }
    }

    fn next_suggested_package_prefix(&mut self, dictionary: &[String]) -> String {
        let raw = if self.package_dictionary_position < dictionary.len() {
            let word = &dictionary[self.package_dictionary_position];
            self.package_dictionary_position += 1;
            format!("{}{}", self.package_prefix, word)
        } else {
            let number = self.package_counter;
            self.package_counter += 1;
            format!("{}{}", self.package_prefix, number_to_identifier(number))
        };
        // Binary form: no leading L.
        raw[1..].to_string()
    }

    fn next_package_prefix(&mut self, used: &HashSet<String>, dictionary: &[String]) -> String {
        loop {
            let candidate = self.next_suggested_package_prefix(dictionary);
            if !used.contains(&candidate) {
                return candidate;
            }
        }
    }
}

/// `La/b/C;` -> `a/b/C`.
fn binary_name(descriptor: &str) -> String {
    descriptor
        .trim_start_matches('L')
        .trim_end_matches(';')
        .to_string()
}

/// `a/b/c` -> `a/b`, `a` -> ``.
fn parent_package_prefix(package_prefix: &str) -> String {
    match package_prefix.rfind('/') {
        Some(i) => package_prefix[..i].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::{ApplicationBuilder, ClassBuilder, ItemFactory};
    use crate::shaking::{ConfigurationParser, RootSetBuilder};

    fn minify(source_rules: &str, classes: Vec<&str>) -> (Arc<ItemFactory>, HashMap<TypeId, String>) {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        for descriptor in classes {
            builder.add_class(ClassBuilder::new(&factory, descriptor).build());
        }
        let app = builder.build().unwrap();
        let mut parser = ConfigurationParser::new(factory.clone());
        parser.parse_string("test.pro", source_rules).unwrap();
        let config = parser.finish();
        let root_set = RootSetBuilder::new(&app, &config).run().unwrap();
        let renaming = ClassNameMinifier::new(&app, &root_set, &config)
            .compute_renaming()
            .types;
        (factory, renaming)
    }

    #[test]
    fn renamed_names_are_distinct() {
        let (factory, renaming) = minify(
            "-keep class com.example.Nothing",
            vec![
                "Lcom/example/A;",
                "Lcom/example/B;",
                "Lcom/example/C;",
            ],
        );
        let names: HashSet<&String> = renaming.values().collect();
        assert_eq!(names.len(), 3);
        let a = factory.create_type("Lcom/example/A;");
        assert!(renaming[&a].starts_with('L'));
        assert!(renaming[&a].ends_with(';'));
    }

    #[test]
    fn kept_class_retains_name() {
        let (factory, renaming) = minify(
            "-keep class com.example.Main",
            vec!["Lcom/example/Main;", "Lcom/example/Other;"],
        );
        let main = factory.create_type("Lcom/example/Main;");
        let other = factory.create_type("Lcom/example/Other;");
        assert_eq!(renaming[&main], "Lcom/example/Main;");
        assert_ne!(renaming[&other], "Lcom/example/Other;");
    }

    #[test]
    fn generated_name_never_collides_with_kept_name() {
        let (_, renaming) = minify(
            "-keep class com.example.A",
            vec!["Lcom/example/A;", "Lcom/example/B;", "Lcom/example/C;"],
        );
        let names: HashSet<&String> = renaming.values().collect();
        assert_eq!(names.len(), renaming.len());
    }

    #[test]
    fn repackage_mode_collapses_packages() {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder
            .add_class(ClassBuilder::new(&factory, "Lcom/a/First;").build())
            .add_class(ClassBuilder::new(&factory, "Lcom/b/Second;").build());
        let app = builder.build().unwrap();
        let mut parser = ConfigurationParser::new(factory.clone());
        parser
            .parse_string("test.pro", "-repackageclasses 'p'")
            .unwrap();
        let config = parser.finish();
        let root_set = RootSetBuilder::new(&app, &config).run().unwrap();
        let renaming = ClassNameMinifier::new(&app, &root_set, &config)
            .compute_renaming()
            .types;
        for renamed in renaming.values() {
            assert!(
                renamed.starts_with("Lp/"),
                "expected repackaged name, got {renamed}"
            );
        }
    }

    #[test]
    fn arrays_are_renamed_with_base() {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder.add_class(ClassBuilder::new(&factory, "Lcom/example/Elem;").build());
        let arr = factory.create_type("[[Lcom/example/Elem;");
        let app = builder.build().unwrap();
        let mut parser = ConfigurationParser::new(factory.clone());
        parser.parse_string("test.pro", "").unwrap();
        let config = parser.finish();
        let root_set = RootSetBuilder::new(&app, &config).run().unwrap();
        let renaming = ClassNameMinifier::new(&app, &root_set, &config)
            .compute_renaming()
            .types;
        let elem = factory.create_type("Lcom/example/Elem;");
        let renamed_elem = &renaming[&elem];
        assert_eq!(renaming[&arr], format!("[[{}", renamed_elem));
    }
}
