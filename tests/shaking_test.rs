//! End-to-end tree-shaking tests: root set, liveness fixpoint, pruning.

use std::sync::Arc;

use slimdex::graph::{
    Application, ApplicationBuilder, ClassBuilder, Code, Instruction, ItemFactory,
};
use slimdex::shaking::{
    ConfigurationParser, Enqueuer, Item, Liveness, RootSet, RootSetBuilder, TreePruner,
};
use slimdex::shaking::rules::{Configuration, ReturnValue};
use slimdex::CompileError;

fn parse_config(factory: &Arc<ItemFactory>, rules: &str) -> Configuration {
    let mut parser = ConfigurationParser::new(factory.clone());
    parser.parse_string("test.pro", rules).unwrap();
    parser.finish()
}

fn trace(
    app: &Application,
    config: &Configuration,
) -> (RootSet, slimdex::Result<Liveness>) {
    let root_set = RootSetBuilder::new(app, config).run().unwrap();
    let liveness = Enqueuer::new(app, &root_set, config).trace_application();
    (root_set, liveness)
}

fn new_instance_code(factory: &ItemFactory, target: &str) -> Code {
    let ty = factory.create_type(target);
    let init = factory.create_method(
        ty,
        factory.create_string("<init>"),
        factory.create_proto(factory.void_type, &[]),
    );
    Code::new(
        1,
        vec![
            Instruction::NewInstance { dest: 0, ty },
            Instruction::InvokeDirect {
                method: init,
                args: vec![0],
            },
            Instruction::ReturnVoid,
        ],
    )
}

fn invoke_virtual_code(factory: &ItemFactory, holder: &str, name: &str) -> Code {
    let ty = factory.create_type(holder);
    let method = factory.create_method(
        ty,
        factory.create_string(name),
        factory.create_proto(factory.void_type, &[]),
    );
    Code::new(
        1,
        vec![
            Instruction::InvokeVirtual {
                method,
                args: vec![0],
            },
            Instruction::ReturnVoid,
        ],
    )
}

#[test]
fn unreachable_classes_and_members_are_pruned() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Main;")
                .constructor(&[])
                .static_method_with_code(
                    "main",
                    &[],
                    "V",
                    new_instance_code(&factory, "Lapp/Used;"),
                )
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Used;")
                .constructor(&[])
                .virtual_method("neverCalled", &[], "V")
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Unused;")
                .constructor(&[])
                .build(),
        );
    let mut app = builder.build().unwrap();
    let config = parse_config(&factory, "-keep class app.Main { *; }");
    let (_, liveness) = trace(&app, &config);
    let liveness = liveness.unwrap();

    let used = factory.create_type("Lapp/Used;");
    let unused = factory.create_type("Lapp/Unused;");
    assert!(liveness.live_types.contains(&used));
    assert!(!liveness.live_types.contains(&unused));

    TreePruner::new(&liveness).prune(&mut app).unwrap();
    assert!(app.definition_for(unused).is_none());
    let used_class = app.definition_for(used).unwrap();
    // The constructor is live through the new-instance; the never-invoked
    // virtual method is gone.
    assert_eq!(used_class.direct_methods.len(), 1);
    assert!(used_class.virtual_methods.is_empty());
}

/// Invariant: every type referenced from retained members is surviving, a
/// library type, or primitive.
#[test]
fn retained_members_only_reference_surviving_types() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Root;")
                .constructor(&[])
                .virtual_method("use", &["Lapp/Param;"], "Lapp/Ret;")
                .build(),
        )
        .add_class(ClassBuilder::new(&factory, "Lapp/Param;").constructor(&[]).build())
        .add_class(ClassBuilder::new(&factory, "Lapp/Ret;").constructor(&[]).build())
        .add_class(ClassBuilder::new(&factory, "Llib/External;").library().build());
    let mut app = builder.build().unwrap();
    let config = parse_config(
        &factory,
        "-keep,includedescriptorclasses class app.Root { *; }",
    );
    let (_, liveness) = trace(&app, &config);
    let liveness = liveness.unwrap();
    TreePruner::new(&liveness).prune(&mut app).unwrap();

    for class in app.program_classes() {
        class.for_each_method(|method| {
            let proto = factory.method_proto(method.method);
            let mut mentioned = vec![factory.proto_return_type(proto)];
            mentioned.extend(factory.proto_parameters(proto).iter().copied());
            for ty in mentioned {
                let base = factory.base_type(ty);
                if factory.is_primitive_type(base) {
                    continue;
                }
                let definition = app.definition_for(base);
                assert!(
                    definition.is_some(),
                    "{} references missing type {}",
                    factory.method_to_string(method.method),
                    factory.java_name(base)
                );
            }
        });
    }
}

/// Invariant: an instantiated subtype that does not shadow a live virtual
/// method inherits it as live.
#[test]
fn virtual_dispatch_reaches_instantiated_subtypes() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Base;")
                .constructor(&[])
                .virtual_method("m", &[], "V")
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Child;")
                .extends("Lapp/Base;")
                .constructor(&[])
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Caller;")
                .constructor(&[])
                .static_method_with_code(
                    "call",
                    &[],
                    "V",
                    {
                        let mut code = new_instance_code(&factory, "Lapp/Child;");
                        code.instructions.pop(); // drop the trailing return
                        code.instructions
                            .extend(invoke_virtual_code(&factory, "Lapp/Base;", "m").instructions);
                        code
                    },
                )
                .build(),
        );
    let app = builder.build().unwrap();
    let config = parse_config(&factory, "-keep class app.Caller { *; }");
    let (_, liveness) = trace(&app, &config);
    let liveness = liveness.unwrap();

    let base = factory.create_type("Lapp/Base;");
    let m = factory.create_method(
        base,
        factory.create_string("m"),
        factory.create_proto(factory.void_type, &[]),
    );
    // Child is instantiated and does not shadow m, so Base.m is live.
    assert!(liveness.live_methods.contains(&m));
}

/// A reachable-but-never-instantiated target is kept as a resolution target
/// but loses its body.
#[test]
fn targeted_only_methods_become_abstract_stubs() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Never;")
                .virtual_method_with_code(
                    "m",
                    &[],
                    "V",
                    Code::new(0, vec![Instruction::Const { dest: 0, value: 3 }, Instruction::ReturnVoid]),
                )
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Caller;")
                .constructor(&[])
                .static_method_with_code(
                    "call",
                    &[],
                    "V",
                    invoke_virtual_code(&factory, "Lapp/Never;", "m"),
                )
                .build(),
        );
    let mut app = builder.build().unwrap();
    let config = parse_config(&factory, "-keep class app.Caller { *; }");
    let (_, liveness) = trace(&app, &config);
    let liveness = liveness.unwrap();
    TreePruner::new(&liveness).prune(&mut app).unwrap();

    let never = factory.create_type("Lapp/Never;");
    let class = app.definition_for(never).unwrap();
    let m = &class.virtual_methods[0];
    assert!(m.code.is_none());
    assert!(m.access_flags.is_abstract());
}

/// Scenario: library class L with method m, program P extends L without
/// overriding. A call through L resolves into the library; P gains no m.
#[test]
fn library_method_is_not_materialized_in_program_subclass() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(
            ClassBuilder::new(&factory, "Llib/L;")
                .library()
                .constructor(&[])
                .virtual_method("m", &[], "V")
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/P;")
                .extends("Llib/L;")
                .constructor(&[])
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Caller;")
                .constructor(&[])
                .static_method_with_code("call", &[], "V", {
                    let mut code = new_instance_code(&factory, "Lapp/P;");
                    code.instructions.pop();
                    code.instructions
                        .extend(invoke_virtual_code(&factory, "Llib/L;", "m").instructions);
                    code
                })
                .build(),
        );
    let mut app = builder.build().unwrap();
    let config = parse_config(&factory, "-keep class app.Caller { *; }");
    let (_, liveness) = trace(&app, &config);
    let liveness = liveness.unwrap();

    let p = factory.create_type("Lapp/P;");
    assert!(liveness.live_types.contains(&p));
    TreePruner::new(&liveness).prune(&mut app).unwrap();
    let p_class = app.definition_for(p).unwrap();
    assert!(p_class.virtual_methods.is_empty());
    // The call resolves to the library definition.
    let l = factory.create_type("Llib/L;");
    let m_ref = factory.create_method(
        l,
        factory.create_string("m"),
        factory.create_proto(factory.void_type, &[]),
    );
    let resolved = app.lookup_virtual_target(p, m_ref).unwrap();
    assert_eq!(factory.method_holder(resolved), l);
}

/// Scenario: `-keep class Foo { int value() return 1..5; }` records the
/// interval in the assume-values table.
#[test]
fn assume_values_interval_is_recorded() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder.add_class(
        ClassBuilder::new(&factory, "Lapp/Foo;")
            .constructor(&[])
            .virtual_method("value", &[], "I")
            .build(),
    );
    let app = builder.build().unwrap();
    let config = parse_config(
        &factory,
        "-keep class app.Foo { *; }\n-assumevalues class app.Foo { int value() return 1..5; }",
    );
    let (_, liveness) = trace(&app, &config);
    let liveness = liveness.unwrap();

    let foo = factory.create_type("Lapp/Foo;");
    let value = factory.create_method(
        foo,
        factory.create_string("value"),
        factory.create_proto(factory.create_type("I"), &[]),
    );
    let rule = liveness.assumed_values.get(&Item::Method(value)).unwrap();
    assert_eq!(rule.return_value, Some(ReturnValue::Interval(1, 5)));
}

#[test]
fn missing_references_are_fatal_unless_ignored() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder.add_class(
        ClassBuilder::new(&factory, "Lapp/Main;")
            .constructor(&[])
            .static_method_with_code(
                "main",
                &[],
                "V",
                new_instance_code(&factory, "Lmissing/Gone;"),
            )
            .build(),
    );
    let app = builder.build().unwrap();

    let config = parse_config(&factory, "-keep class app.Main { *; }");
    let (_, result) = trace(&app, &config);
    assert!(matches!(result, Err(CompileError::MissingReferences(_))));

    let config = parse_config(&factory, "-keep class app.Main { *; }\n-ignorewarnings");
    let (_, result) = trace(&app, &config);
    assert!(result.is_ok());
}

#[test]
fn invoke_interface_on_class_method_is_ambiguous_dispatch() {
    let factory = Arc::new(ItemFactory::new());
    let holder = "Lapp/Plain;";
    let ty_holder = factory.create_type(holder);
    let target = factory.create_method(
        ty_holder,
        factory.create_string("m"),
        factory.create_proto(factory.void_type, &[]),
    );
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(
            ClassBuilder::new(&factory, holder)
                .constructor(&[])
                .virtual_method("m", &[], "V")
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Caller;")
                .constructor(&[])
                .static_method_with_code(
                    "call",
                    &[],
                    "V",
                    Code::new(
                        1,
                        vec![
                            Instruction::InvokeInterface {
                                method: target,
                                args: vec![0],
                            },
                            Instruction::ReturnVoid,
                        ],
                    ),
                )
                .build(),
        );
    let app = builder.build().unwrap();
    let config = parse_config(&factory, "-keep class app.Caller { *; }");
    let (_, result) = trace(&app, &config);
    assert!(matches!(
        result,
        Err(CompileError::AmbiguousDispatch { .. })
    ));
}

#[test]
fn keep_class_members_survival_is_conditional() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder.add_class(
        ClassBuilder::new(&factory, "Lapp/Cond;")
            .constructor(&[])
            .virtual_method("helper", &[], "V")
            .build(),
    );
    let mut app = builder.build().unwrap();
    // Only a keepclassmembers rule: nothing keeps the class itself, so both
    // the class and its conditional member disappear.
    let config = parse_config(&factory, "-keepclassmembers class app.Cond { void helper(); }");
    let (_, liveness) = trace(&app, &config);
    let liveness = liveness.unwrap();
    TreePruner::new(&liveness).prune(&mut app).unwrap();
    let cond = factory.create_type("Lapp/Cond;");
    assert!(app.definition_for(cond).is_none());
}

#[test]
fn static_initializer_side_effects_survive() {
    let factory = Arc::new(ItemFactory::new());
    let helper_call = {
        let ty = factory.create_type("Lapp/Helper;");
        let method = factory.create_method(
            ty,
            factory.create_string("setup"),
            factory.create_proto(factory.void_type, &[]),
        );
        Code::new(
            0,
            vec![
                Instruction::InvokeStatic {
                    method,
                    args: vec![],
                },
                Instruction::ReturnVoid,
            ],
        )
    };
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(
            ClassBuilder::new(&factory, "Lapp/WithInit;")
                .constructor(&[])
                .class_initializer(helper_call)
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Helper;")
                .static_method_with_code(
                    "setup",
                    &[],
                    "V",
                    Code::new(0, vec![Instruction::ReturnVoid]),
                )
                .build(),
        );
    let app = builder.build().unwrap();
    let config = parse_config(&factory, "-keep class app.WithInit");
    let (_, liveness) = trace(&app, &config);
    let liveness = liveness.unwrap();

    let helper = factory.create_type("Lapp/Helper;");
    let setup = factory.create_method(
        helper,
        factory.create_string("setup"),
        factory.create_proto(factory.void_type, &[]),
    );
    assert!(liveness.live_methods.contains(&setup));
}
