//! Minifier tests: dispatch-coupled method naming, class renaming, mapping
//! round trips.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use slimdex::graph::{Application, ApplicationBuilder, ClassBuilder, ItemFactory, NamingLens};
use slimdex::naming::{map, Minifier, ProguardMap};
use slimdex::shaking::rules::Configuration;
use slimdex::shaking::{ConfigurationParser, RootSetBuilder};

fn parse_config(factory: &Arc<ItemFactory>, rules: &str) -> Configuration {
    let mut parser = ConfigurationParser::new(factory.clone());
    parser.parse_string("test.pro", rules).unwrap();
    parser.finish()
}

fn minify(app: &Application, factory: &Arc<ItemFactory>, rules: &str) -> NamingLens {
    let config = parse_config(factory, rules);
    let root_set = RootSetBuilder::new(app, &config).run().unwrap();
    Minifier::new(app, &root_set, &config).run()
}

/// Scenario: Foo { a, b }, Bar extends Foo { a }, `-keep class Bar { *; }`.
/// Foo.a and Bar.a must end up with the same name; Bar keeps its class name.
#[test]
fn override_pairs_share_names_under_keep_rule() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Foo;")
                .virtual_method("a", &[], "V")
                .virtual_method("b", &[], "V")
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Bar;")
                .extends("Lapp/Foo;")
                .constructor(&[])
                .virtual_method("a", &[], "V")
                .build(),
        );
    let app = builder.build().unwrap();
    let lens = minify(&app, &factory, "-keep class app.Bar { *; }");

    let foo = factory.create_type("Lapp/Foo;");
    let bar = factory.create_type("Lapp/Bar;");
    let proto = factory.create_proto(factory.void_type, &[]);
    let foo_a = factory.create_method(foo, factory.create_string("a"), proto);
    let bar_a = factory.create_method(bar, factory.create_string("a"), proto);

    // Bar's class name is untouched by the keep rule.
    assert_eq!(&*lens.lookup_descriptor(&factory, bar), "Lapp/Bar;");
    assert_ne!(&*lens.lookup_descriptor(&factory, foo), "Lapp/Foo;");
    // Same dispatch chain, same output name.
    assert_eq!(
        lens.lookup_method_name(&factory, foo_a),
        lens.lookup_method_name(&factory, bar_a)
    );
}

/// Scenario: unrelated interfaces with the same signature are joined: a
/// class could implement both, so one shared name is assigned.
#[test]
fn unrelated_interfaces_with_same_signature_join() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(
            ClassBuilder::new(&factory, "Lapp/I1;")
                .interface()
                .abstract_method("m", &[], "V")
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/I2;")
                .interface()
                .abstract_method("m", &[], "V")
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/C1;")
                .implements("Lapp/I1;")
                .constructor(&[])
                .virtual_method("m", &[], "V")
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/C2;")
                .implements("Lapp/I2;")
                .constructor(&[])
                .virtual_method("m", &[], "V")
                .build(),
        );
    let app = builder.build().unwrap();
    let lens = minify(&app, &factory, "-keep class app.C1");

    let proto = factory.create_proto(factory.void_type, &[]);
    let m = factory.create_string("m");
    let i1_m = factory.create_method(factory.create_type("Lapp/I1;"), m, proto);
    let i2_m = factory.create_method(factory.create_type("Lapp/I2;"), m, proto);
    let c1_m = factory.create_method(factory.create_type("Lapp/C1;"), m, proto);
    let c2_m = factory.create_method(factory.create_type("Lapp/C2;"), m, proto);

    let i1_name = lens.lookup_method_name(&factory, i1_m);
    assert_eq!(i1_name, lens.lookup_method_name(&factory, i2_m));
    // Implementations pick up the interface renaming through their states.
    assert_eq!(i1_name, lens.lookup_method_name(&factory, c1_m));
    assert_eq!(i1_name, lens.lookup_method_name(&factory, c2_m));
}

/// Invariant: renaming is injective over surviving types.
#[test]
fn renamed_type_names_are_pairwise_distinct() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    for package in ["a", "b"] {
        for name in ["One", "Two", "Three", "Four"] {
            builder.add_class(
                ClassBuilder::new(&factory, &format!("Lcom/{package}/{name};")).build(),
            );
        }
    }
    let app = builder.build().unwrap();
    let lens = minify(&app, &factory, "");

    let mut seen = HashSet::new();
    for class in app.program_classes() {
        let renamed = lens.lookup_descriptor(&factory, class.ty);
        assert!(
            seen.insert(renamed.to_string()),
            "duplicate renamed descriptor {renamed}"
        );
    }
}

#[test]
fn constructors_and_annotation_members_keep_their_names() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(
            ClassBuilder::new(&factory, "Lapp/WithCtor;")
                .constructor(&[])
                .virtual_method("renameMe", &[], "V")
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Marker;")
                .annotation_interface()
                .abstract_method("value", &[], "Ljava/lang/String;")
                .build(),
        );
    let app = builder.build().unwrap();
    let lens = minify(&app, &factory, "");

    let ctor = factory.create_method(
        factory.create_type("Lapp/WithCtor;"),
        factory.create_string("<init>"),
        factory.create_proto(factory.void_type, &[]),
    );
    let value = factory.create_method(
        factory.create_type("Lapp/Marker;"),
        factory.create_string("value"),
        factory.create_proto(factory.create_type("Ljava/lang/String;"), &[]),
    );
    assert_eq!(&*lens.lookup_method_name(&factory, ctor), "<init>");
    assert_eq!(&*lens.lookup_method_name(&factory, value), "value");
}

/// Round trip: parse the emitted map and recover the original classes of
/// every renamed survivor.
#[test]
fn mapping_file_round_trips() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(
            ClassBuilder::new(&factory, "Lapp/First;")
                .instance_field("count", "I")
                .virtual_method("run", &["I"], "V")
                .build(),
        )
        .add_class(ClassBuilder::new(&factory, "Lapp/Second;").build());
    let app = builder.build().unwrap();
    let lens = minify(&app, &factory, "");

    let mut bytes = Vec::new();
    map::write_map(&app, &lens, &mut bytes).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    let parsed = ProguardMap::parse(&text).unwrap();

    let originals: HashSet<String> = app
        .program_classes()
        .map(|c| factory.java_name(c.ty))
        .collect();
    assert_eq!(parsed.len(), originals.len());
    let mut recovered = HashSet::new();
    for class in app.program_classes() {
        let renamed =
            slimdex::graph::descriptor_to_java(&lens.lookup_descriptor(&factory, class.ty));
        let original = parsed.original_for(&renamed).unwrap();
        recovered.insert(original.to_string());
    }
    assert_eq!(recovered, originals);
}

/// Determinism: two independent runs over the same input, interned in
/// different orders, produce the identical mapping file.
#[test]
fn renaming_is_deterministic_across_runs() {
    fn build_and_map(reverse: bool) -> String {
        let factory = Arc::new(ItemFactory::new());
        let mut descriptors = vec![
            "Lapp/Alpha;".to_string(),
            "Lapp/Beta;".to_string(),
            "Lapp/Gamma;".to_string(),
            "Lapp/Delta;".to_string(),
        ];
        if reverse {
            descriptors.reverse();
        }
        let mut builder = ApplicationBuilder::new(factory.clone());
        for descriptor in &descriptors {
            builder.add_class(
                ClassBuilder::new(&factory, descriptor)
                    .virtual_method("one", &[], "V")
                    .virtual_method("two", &[], "V")
                    .build(),
            );
        }
        let app = builder.build().unwrap();
        let lens = minify(&app, &factory, "-keep class app.Alpha { void one(); }");
        let mut bytes = Vec::new();
        map::write_map(&app, &lens, &mut bytes).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    assert_eq!(build_and_map(false), build_and_map(true));
}

#[test]
fn package_name_can_be_pinned() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(ClassBuilder::new(&factory, "Lkeep/me/Stable;").build())
        .add_class(ClassBuilder::new(&factory, "Lother/Movable;").build());
    let app = builder.build().unwrap();
    let lens = minify(&app, &factory, "-keeppackagenames keep.me.**");

    let stable = factory.create_type("Lkeep/me/Stable;");
    let renamed = lens.lookup_descriptor(&factory, stable);
    assert!(
        renamed.starts_with("Lkeep/me/"),
        "package should survive, got {renamed}"
    );
}

/// Verifying the lens application path used by the writer: renamed
/// descriptors resolve through the lens while untouched items fall back to
/// their original names.
#[test]
fn lens_answers_original_names_for_untouched_items() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder.add_class(
        ClassBuilder::new(&factory, "Lapp/Kept;")
            .virtual_method("stay", &[], "V")
            .build(),
    );
    let app = builder.build().unwrap();
    let lens = minify(
        &app,
        &factory,
        "-keep class app.Kept { *; }",
    );
    let kept = factory.create_type("Lapp/Kept;");
    assert_eq!(&*lens.lookup_descriptor(&factory, kept), "Lapp/Kept;");
    let stay = factory.create_method(
        kept,
        factory.create_string("stay"),
        factory.create_proto(factory.void_type, &[]),
    );
    assert_eq!(&*lens.lookup_method_name(&factory, stay), "stay");

    let mut renamed_types: HashMap<_, _> = HashMap::new();
    for (ty, name) in lens.renamed_types() {
        renamed_types.insert(ty, name.clone());
    }
    assert!(renamed_types.is_empty());
}
