// -checkdiscard verification: after shrinking, every matched item must be
// gone. All surviving offenders are collected before failing so the user
// sees the full list at once.

use crate::error::{CompileError, Result};
use crate::graph::Application;
use crate::shaking::root_set::RootSet;
use crate::shaking::Item;

pub struct DiscardedChecker<'a> {
    root_set: &'a RootSet,
}

impl<'a> DiscardedChecker<'a> {
    pub fn new(root_set: &'a RootSet) -> Self {
        DiscardedChecker { root_set }
    }

    pub fn run(&self, app: &Application) -> Result<()> {
        if self.root_set.check_discarded.is_empty() {
            return Ok(());
        }
        let factory = &app.factory;
        let mut offenders = Vec::new();
        for class in app.program_classes() {
            if self.root_set.check_discarded.contains(&Item::Class(class.ty)) {
                offenders.push(format!("{} was not discarded", factory.java_name(class.ty)));
            }
            class.for_each_method(|method| {
                if self
                    .root_set
                    .check_discarded
                    .contains(&Item::Method(method.method))
                {
                    offenders.push(format!(
                        "{} was not discarded",
                        factory.method_to_string(method.method)
                    ));
                }
            });
            class.for_each_field(|field| {
                if self
                    .root_set
                    .check_discarded
                    .contains(&Item::Field(field.field))
                {
                    offenders.push(format!(
                        "{} was not discarded",
                        factory.field_to_string(field.field)
                    ));
                }
            });
        }
        if offenders.is_empty() {
            Ok(())
        } else {
            offenders.sort();
            Err(CompileError::DiscardChecksFailed(offenders))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::{ApplicationBuilder, ClassBuilder, ItemFactory};
    use crate::shaking::{ConfigurationParser, RootSetBuilder};

    #[test]
    fn surviving_checkdiscard_item_fails() {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder.add_class(ClassBuilder::new(&factory, "Lcom/example/Gone;").build());
        let app = builder.build().unwrap();

        let mut parser = ConfigurationParser::new(factory.clone());
        parser
            .parse_string("test.pro", "-checkdiscard class com.example.Gone")
            .unwrap();
        let config = parser.finish();
        let root_set = RootSetBuilder::new(&app, &config).run().unwrap();

        // The class is still present, so the check must fail.
        let result = DiscardedChecker::new(&root_set).run(&app);
        assert!(matches!(
            result,
            Err(CompileError::DiscardChecksFailed(_))
        ));
    }
}
