// Applies the fixpoint result: dead classes and members are dropped from
// the application in place. Methods that are targeted but never live keep
// an abstract stub so invokes still resolve.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::CompileError;
use crate::graph::{AccessFlags, Application, Class};
use crate::shaking::enqueuer::Liveness;
use crate::shaking::Item;

/// What the pruner removed, in the shape the usage report wants: per class,
/// either the whole class or a list of member lines.
#[derive(Debug, Default)]
pub struct UsageInfo {
    pub removed_classes: Vec<String>,
    pub removed_members: HashMap<String, Vec<String>>,
    pub classes_kept: usize,
    pub methods_removed: usize,
    pub fields_removed: usize,
}

impl UsageInfo {
    /// Proguard usage format: class line, indented member lines.
    pub fn write(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        let mut classes: Vec<&String> = self
            .removed_classes
            .iter()
            .chain(self.removed_members.keys())
            .collect();
        classes.sort();
        classes.dedup();
        for class in classes {
            writeln!(out, "{class}")?;
            if let Some(members) = self.removed_members.get(class) {
                let mut members = members.clone();
                members.sort();
                for member in members {
                    writeln!(out, "    {member}")?;
                }
            }
        }
        Ok(())
    }
}

pub struct TreePruner<'a> {
    liveness: &'a Liveness,
}

impl<'a> TreePruner<'a> {
    pub fn new(liveness: &'a Liveness) -> Self {
        TreePruner { liveness }
    }

    pub fn prune(&self, app: &mut Application) -> Result<UsageInfo, CompileError> {
        let factory = app.factory.clone();
        let mut usage = UsageInfo::default();
        let mut retained: Vec<Class> = Vec::new();

        let classes: Vec<Class> = app.classes().cloned().collect();
        for class in classes {
            if !class.is_program_class() {
                retained.push(class);
                continue;
            }
            if !self.liveness.live_types.contains(&class.ty)
                && !self.liveness.pinned_items.contains(&Item::Class(class.ty))
            {
                debug!("removing class `{}`", factory.java_name(class.ty));
                usage.removed_classes.push(factory.java_name(class.ty));
                continue;
            }
            retained.push(self.prune_members(class, &mut usage, &factory));
        }
        usage.classes_kept = retained.iter().filter(|c| c.is_program_class()).count();
        info!(
            kept = usage.classes_kept,
            removed = usage.removed_classes.len(),
            "pruned application"
        );
        app.replace_classes(retained)?;
        Ok(usage)
    }

    fn prune_members(
        &self,
        mut class: Class,
        usage: &mut UsageInfo,
        factory: &crate::graph::ItemFactory,
    ) -> Class {
        let class_name = factory.java_name(class.ty);

        let keep_method = |method: &crate::graph::EncodedMethod| {
            self.liveness.live_methods.contains(&method.method)
                || self.liveness.targeted_methods.contains(&method.method)
                || self.liveness.pinned_items.contains(&Item::Method(method.method))
        };
        let keep_field = |field: &crate::graph::EncodedField| {
            self.liveness.live_fields.contains(&field.field)
                || self.liveness.pinned_items.contains(&Item::Field(field.field))
        };

        for pool in [&mut class.direct_methods, &mut class.virtual_methods] {
            pool.retain(|method| {
                if keep_method(method) {
                    return true;
                }
                usage.methods_removed += 1;
                usage
                    .removed_members
                    .entry(class_name.clone())
                    .or_default()
                    .push(member_line_for_method(factory, method));
                false
            });
        }
        // Reachable-but-not-live targets lose their body; an abstract stub
        // is all an invoke needs to resolve.
        for method in &mut class.virtual_methods {
            if !self.liveness.live_methods.contains(&method.method)
                && self.liveness.targeted_methods.contains(&method.method)
                && method.code.is_some()
            {
                debug!(
                    "stripping body of targeted-only method `{}`",
                    factory.method_to_string(method.method)
                );
                method.code = None;
                method.access_flags.set(AccessFlags::ABSTRACT);
            }
        }

        for pool in [&mut class.static_fields, &mut class.instance_fields] {
            pool.retain(|field| {
                if keep_field(field) {
                    return true;
                }
                usage.fields_removed += 1;
                usage
                    .removed_members
                    .entry(class_name.clone())
                    .or_default()
                    .push(format!(
                        "{} {}",
                        factory.java_name(factory.field_type(field.field)),
                        factory.string(factory.field_name(field.field))
                    ));
                false
            });
        }
        class
    }
}

fn member_line_for_method(
    factory: &crate::graph::ItemFactory,
    method: &crate::graph::EncodedMethod,
) -> String {
    let proto = factory.method_proto(method.method);
    let params: Vec<String> = factory
        .proto_parameters(proto)
        .iter()
        .map(|&p| factory.java_name(p))
        .collect();
    let name = factory.string(factory.method_name(method.method));
    if method.access_flags.is_constructor() {
        format!("{}({})", name, params.join(","))
    } else {
        format!(
            "{} {}({})",
            factory.java_name(factory.proto_return_type(proto)),
            name,
            params.join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::{ApplicationBuilder, ClassBuilder, ItemFactory};
    use crate::shaking::{ConfigurationParser, Enqueuer, RootSetBuilder};

    #[test]
    fn unreferenced_class_is_removed() {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder
            .add_class(
                ClassBuilder::new(&factory, "Lcom/example/Kept;")
                    .virtual_method("m", &[], "V")
                    .build(),
            )
            .add_class(
                ClassBuilder::new(&factory, "Lcom/example/Dead;")
                    .virtual_method("gone", &[], "V")
                    .build(),
            );
        let mut app = builder.build().unwrap();

        let mut parser = ConfigurationParser::new(factory.clone());
        parser
            .parse_string("test.pro", "-keep class com.example.Kept { *; }")
            .unwrap();
        let config = parser.finish();
        let root_set = RootSetBuilder::new(&app, &config).run().unwrap();
        let liveness = Enqueuer::new(&app, &root_set, &config)
            .trace_application()
            .unwrap();

        let usage = TreePruner::new(&liveness).prune(&mut app).unwrap();
        assert_eq!(usage.removed_classes, vec!["com.example.Dead"]);
        let dead = factory.create_type("Lcom/example/Dead;");
        assert!(app.definition_for(dead).is_none());
        let kept = factory.create_type("Lcom/example/Kept;");
        assert!(app.definition_for(kept).is_some());
    }
}
