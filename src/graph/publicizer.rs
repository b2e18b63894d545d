// Access modification (-allowaccessmodification): package-private and
// protected classes and members are promoted to public, so repackaging and
// minification are free to move classes across package boundaries.

use tracing::info;

use crate::graph::Application;

/// Destructively updates every program class: classes and fields become
/// public, non-private methods become public. Private methods keep their
/// flags; promoting them would move them into the virtual dispatch pool.
pub fn publicize(app: &mut Application) {
    let types: Vec<_> = app.program_classes().map(|c| c.ty).collect();
    for ty in &types {
        let Some(class) = app.definition_for_mut(*ty) else {
            continue;
        };
        class.access_flags.promote_to_public();
        for method in class
            .direct_methods
            .iter_mut()
            .chain(class.virtual_methods.iter_mut())
        {
            method.access_flags.promote_non_private_to_public();
        }
        for field in class
            .static_fields
            .iter_mut()
            .chain(class.instance_fields.iter_mut())
        {
            field.access_flags.promote_to_public();
        }
    }
    info!(classes = types.len(), "promoted access to public");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::{AccessFlags, ApplicationBuilder, ClassBuilder, ItemFactory};

    #[test]
    fn members_are_promoted_but_privates_stay() {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder.add_class(
            ClassBuilder::new(&factory, "Lapp/Sealed;")
                // Package-private class.
                .access_flags(AccessFlags::default())
                .method_with_flags("packagePrivate", &[], "V", 0, None)
                .method_with_flags("guarded", &[], "V", AccessFlags::PROTECTED, None)
                .method_with_flags("hidden", &[], "V", AccessFlags::PRIVATE, None)
                .instance_field("state", "I")
                .build(),
        );
        let mut app = builder.build().unwrap();
        publicize(&mut app);

        let ty = factory.create_type("Lapp/Sealed;");
        let class = app.definition_for(ty).unwrap();
        assert!(class.access_flags.is_public());
        for name in ["packagePrivate", "guarded"] {
            let name = factory.create_string(name);
            let method = class
                .virtual_methods
                .iter()
                .find(|m| factory.method_name(m.method) == name)
                .unwrap();
            assert!(method.access_flags.is_public());
            assert!(!method.access_flags.is_protected());
        }
        let hidden = factory.create_string("hidden");
        let hidden = class
            .direct_methods
            .iter()
            .find(|m| factory.method_name(m.method) == hidden)
            .unwrap();
        assert!(hidden.access_flags.is_private());
        assert!(!hidden.access_flags.is_public());
        assert!(class.instance_fields[0].access_flags.is_public());
    }
}
