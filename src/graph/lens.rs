// Naming lens: the renaming computed by the minifier, applied lazily.
//
// Classes and members are never renamed in place. Every consumer that needs
// output names (map printer, dex writer, main-dex-list writer) looks them up
// through the lens; absent entries answer with the original name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::graph::factory::{ItemFactory, MethodId, TypeId};

#[derive(Debug, Default)]
pub struct NamingLens {
    type_renaming: HashMap<TypeId, Arc<str>>,
    method_renaming: HashMap<MethodId, Arc<str>>,
    signature_renaming: HashMap<String, String>,
}

impl NamingLens {
    pub fn identity() -> Self {
        NamingLens::default()
    }

    pub fn new(
        type_renaming: HashMap<TypeId, Arc<str>>,
        method_renaming: HashMap<MethodId, Arc<str>>,
    ) -> Self {
        NamingLens {
            type_renaming,
            method_renaming,
            signature_renaming: HashMap::new(),
        }
    }

    pub fn with_signature_renaming(mut self, signatures: HashMap<String, String>) -> Self {
        self.signature_renaming = signatures;
        self
    }

    /// Rewritten generic signature for an original one, if the minifier
    /// touched it.
    pub fn lookup_signature(&self, original: &str) -> Option<&str> {
        self.signature_renaming.get(original).map(String::as_str)
    }

    pub fn is_identity(&self) -> bool {
        self.type_renaming.is_empty() && self.method_renaming.is_empty()
    }

    /// Renamed descriptor for a type, or the original one.
    pub fn lookup_descriptor(&self, factory: &ItemFactory, ty: TypeId) -> Arc<str> {
        self.type_renaming
            .get(&ty)
            .cloned()
            .unwrap_or_else(|| factory.descriptor(ty))
    }

    /// Renamed simple name for a method, or the original one.
    pub fn lookup_method_name(&self, factory: &ItemFactory, method: MethodId) -> Arc<str> {
        self.method_renaming
            .get(&method)
            .cloned()
            .unwrap_or_else(|| {
                let name = factory.method_name(method);
                factory.string(name)
            })
    }

    pub fn renamed_types(&self) -> impl Iterator<Item = (TypeId, &Arc<str>)> {
        self.type_renaming.iter().map(|(&ty, name)| (ty, name))
    }

    pub fn renamed_methods(&self) -> impl Iterator<Item = (MethodId, &Arc<str>)> {
        self.method_renaming.iter().map(|(&m, name)| (m, name))
    }
}

/// Output ordering of the interned pools after renaming. Stable indices are
/// assigned only from this ordering; the codec consumes it when laying out
/// the constant pools.
pub struct ItemOrdering {
    pub types: Vec<TypeId>,
    pub methods: Vec<MethodId>,
}

impl ItemOrdering {
    /// Sorts the factory's pools by their renamed content so that output
    /// ordering matches the final names.
    pub fn compute(factory: &ItemFactory, lens: &NamingLens) -> ItemOrdering {
        let mut types = factory.all_types();
        types.sort_by(|&a, &b| {
            lens.lookup_descriptor(factory, a)
                .as_bytes()
                .cmp(lens.lookup_descriptor(factory, b).as_bytes())
        });
        let mut methods = factory.all_methods();
        methods.sort_by(|&a, &b| {
            let holder = lens
                .lookup_descriptor(factory, factory.method_holder(a))
                .as_bytes()
                .cmp(lens.lookup_descriptor(factory, factory.method_holder(b)).as_bytes());
            holder
                .then_with(|| {
                    lens.lookup_method_name(factory, a)
                        .as_bytes()
                        .cmp(lens.lookup_method_name(factory, b).as_bytes())
                })
                .then_with(|| factory.cmp_protos(factory.method_proto(a), factory.method_proto(b)))
        });
        ItemOrdering { types, methods }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_lens_answers_original_names() {
        let factory = ItemFactory::new();
        let ty = factory.create_type("Lcom/example/Foo;");
        let lens = NamingLens::identity();
        assert!(lens.is_identity());
        assert_eq!(&*lens.lookup_descriptor(&factory, ty), "Lcom/example/Foo;");
    }

    #[test]
    fn renamed_types_sort_by_new_name() {
        let factory = ItemFactory::new();
        let a = factory.create_type("Lcom/example/Zebra;");
        let _b = factory.create_type("Lcom/example/Aardvark;");
        let mut renaming = HashMap::new();
        renaming.insert(a, Arc::from("La;"));
        let lens = NamingLens::new(renaming, HashMap::new());
        let ordering = ItemOrdering::compute(&factory, &lens);
        // The renamed Zebra ("La;") now sorts before Aardvark.
        let pos_a = ordering.types.iter().position(|&t| t == a).unwrap();
        assert_eq!(pos_a, 0);
    }
}
