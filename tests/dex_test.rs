//! Distribution and writer tests: capacity limits, multidex packing, and
//! whole-pipeline determinism.

use std::collections::HashMap;
use std::sync::Arc;

use slimdex::compiler::Compiler;
use slimdex::config::CompilerOptions;
use slimdex::dex::{
    distributor, ApplicationWriter, DexCodec, DistributionMode, OutputSink, VirtualFile,
};
use slimdex::error::{CompileError, Result};
use slimdex::graph::{
    Application, ApplicationBuilder, ClassBuilder, Code, Instruction, ItemFactory, ItemOrdering,
    NamingLens,
};
use slimdex::shaking::ConfigurationParser;

/// A class whose single method references `count` distinct methods spread
/// over synthetic holder types.
fn class_with_method_refs(
    factory: &Arc<ItemFactory>,
    descriptor: &str,
    count: usize,
    salt: usize,
) -> slimdex::graph::Class {
    let proto = factory.create_proto(factory.void_type, &[]);
    let mut instructions = Vec::with_capacity(count + 1);
    for i in 0..count {
        let holder = factory.create_type(&format!("Lrefs/H{}_{};", salt, i / 64));
        let method = factory.create_method(
            holder,
            factory.create_string(&format!("m{salt}_{i}")),
            proto,
        );
        instructions.push(Instruction::InvokeStatic {
            method,
            args: vec![],
        });
    }
    instructions.push(Instruction::ReturnVoid);
    ClassBuilder::new(factory, descriptor)
        .static_method_with_code("refs", &[], "V", Code::new(0, instructions))
        .build()
}

/// Scenario: 70 000 method references over 3 classes cannot fit one dex.
#[test]
fn mono_dex_over_capacity_is_a_fatal_error() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    for i in 0..3 {
        builder.add_class(class_with_method_refs(
            &factory,
            &format!("Lapp/Big{i};"),
            24_000,
            i,
        ));
    }
    let app = builder.build().unwrap();
    let result = distributor::distribute(&app, &DistributionMode::MonoDex, &[]);
    match result {
        Err(CompileError::Capacity {
            dex,
            class,
            method_count,
            limit,
            ..
        }) => {
            assert_eq!(dex, 0);
            assert!(class.starts_with("app.Big"));
            assert!(method_count > limit);
        }
        other => panic!("expected capacity error, got {other:?}"),
    }
}

#[test]
fn fill_files_splits_over_capacity_input_into_two_files() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    for i in 0..3 {
        builder.add_class(class_with_method_refs(
            &factory,
            &format!("Lapp/Big{i};"),
            24_000,
            i,
        ));
    }
    let app = builder.build().unwrap();
    let files = distributor::distribute(
        &app,
        &DistributionMode::FillFiles {
            minimal_main_dex: false,
        },
        &[],
    )
    .unwrap();
    assert_eq!(files.len(), 2);
    // Ids are contiguous and every file respects the cap.
    for (index, file) in files.iter().enumerate() {
        assert_eq!(file.id(), index);
        assert!(file.method_count() <= distributor::MAX_ENTRIES);
        assert!(file.field_count() <= distributor::MAX_ENTRIES);
    }
    let total: usize = files.iter().map(|f| f.classes().len()).sum();
    assert_eq!(total, 3);
}

struct RecordingCodec;

impl DexCodec for RecordingCodec {
    fn write_file(
        &self,
        file: &VirtualFile,
        app: &Application,
        lens: &NamingLens,
        _ordering: &ItemOrdering,
        version: slimdex::dex::DexVersion,
    ) -> Result<Vec<u8>> {
        // Deterministic textual stand-in for the binary format: renamed
        // descriptors of all classes in the file, in file order.
        let mut out = Vec::new();
        out.extend_from_slice(b"dex-");
        out.extend_from_slice(version.magic_bytes());
        out.push(b'\n');
        for &ty in file.classes() {
            out.extend_from_slice(lens.lookup_descriptor(&app.factory, ty).as_bytes());
            out.push(b'\n');
        }
        Ok(out)
    }
}

#[derive(Default)]
struct MemorySink {
    dex_files: HashMap<usize, Vec<u8>>,
    map: Option<String>,
    main_dex_list: Option<String>,
}

impl OutputSink for MemorySink {
    fn write_dex_file(&mut self, index: usize, bytes: &[u8]) -> Result<()> {
        self.dex_files.insert(index, bytes.to_vec());
        Ok(())
    }
    fn write_rename_map(&mut self, contents: &str) -> Result<()> {
        self.map = Some(contents.to_string());
        Ok(())
    }
    fn write_main_dex_list(&mut self, contents: &str) -> Result<()> {
        self.main_dex_list = Some(contents.to_string());
        Ok(())
    }
}

fn demo_app(factory: &Arc<ItemFactory>, order: &[usize]) -> Application {
    let descriptors = [
        "Lapp/Main;",
        "Lapp/Service;",
        "Lapp/Dead;",
        "Lapp/Helper;",
    ];
    let mut builder = ApplicationBuilder::new(factory.clone());
    for &i in order {
        let descriptor = descriptors[i];
        let class = match descriptor {
            "Lapp/Main;" => {
                let helper = factory.create_type("Lapp/Service;");
                let init = factory.create_method(
                    helper,
                    factory.create_string("<init>"),
                    factory.create_proto(factory.void_type, &[]),
                );
                ClassBuilder::new(factory, descriptor)
                    .constructor(&[])
                    .static_method_with_code(
                        "main",
                        &[],
                        "V",
                        Code::new(
                            1,
                            vec![
                                Instruction::NewInstance {
                                    dest: 0,
                                    ty: helper,
                                },
                                Instruction::InvokeDirect {
                                    method: init,
                                    args: vec![0],
                                },
                                Instruction::ReturnVoid,
                            ],
                        ),
                    )
                    .build()
            }
            "Lapp/Service;" => ClassBuilder::new(factory, descriptor)
                .constructor(&[])
                .virtual_method("serve", &[], "V")
                .build(),
            _ => ClassBuilder::new(factory, descriptor).constructor(&[]).build(),
        };
        builder.add_class(class);
    }
    builder.build().unwrap()
}

fn compile_demo(order: &[usize]) -> (MemorySink, slimdex::ShrinkReport) {
    let factory = Arc::new(ItemFactory::new());
    let mut app = demo_app(&factory, order);
    let mut parser = ConfigurationParser::new(factory.clone());
    parser
        .parse_string("demo.pro", "-keep class app.Main { *; }")
        .unwrap();
    let config = parser.finish();
    let options = CompilerOptions {
        min_api: 21,
        ..CompilerOptions::default()
    };
    let mut sink = MemorySink::default();
    let report = Compiler::new(&options, &config)
        .run(&mut app, &RecordingCodec, &mut sink)
        .unwrap();
    (sink, report)
}

/// Whole pipeline over the compiler driver: shrink, minify, distribute,
/// write, report.
#[test]
fn compiler_pipeline_end_to_end() {
    let (sink, report) = compile_demo(&[0, 1, 2, 3]);
    assert_eq!(report.classes_in, 4);
    // Dead and Helper are unreferenced; Main and Service survive.
    assert_eq!(report.classes_out, 2);
    assert_eq!(report.classes_removed, 2);
    assert_eq!(report.dex_files, 1);

    let dex = String::from_utf8(sink.dex_files[&0].clone()).unwrap();
    assert!(dex.contains("Lapp/Main;"));
    assert!(!dex.contains("Lapp/Dead;"));
    // Service was renamed; the map records the renaming.
    let map = sink.map.expect("mapping written");
    assert!(map.contains("app.Service -> "));
}

#[test]
fn dontoptimize_disables_method_pass_scheduling() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn passes_run_with(rules: &str) -> usize {
        let factory = Arc::new(ItemFactory::new());
        let mut app = demo_app(&factory, &[0, 1, 2, 3]);
        let mut parser = ConfigurationParser::new(factory.clone());
        parser.parse_string("demo.pro", rules).unwrap();
        let config = parser.finish();
        let options = CompilerOptions {
            min_api: 21,
            ..CompilerOptions::default()
        };
        let count = AtomicUsize::new(0);
        let pass = |_method: slimdex::graph::MethodId| {
            count.fetch_add(1, Ordering::SeqCst);
        };
        let mut sink = MemorySink::default();
        Compiler::new(&options, &config)
            .with_method_pass(&pass)
            .run(&mut app, &RecordingCodec, &mut sink)
            .unwrap();
        count.load(Ordering::SeqCst)
    }

    assert!(passes_run_with("-keep class app.Main { *; }") > 0);
    assert_eq!(
        passes_run_with("-keep class app.Main { *; }\n-dontoptimize"),
        0
    );
}

#[test]
fn allowaccessmodification_publicizes_surviving_classes() {
    let factory = Arc::new(ItemFactory::new());
    let scoped = factory.create_type("Lapp/Scoped;");
    let init = factory.create_method(
        scoped,
        factory.create_string("<init>"),
        factory.create_proto(factory.void_type, &[]),
    );
    let mut builder = ApplicationBuilder::new(factory.clone());
    builder
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Scoped;")
                // Package-private class with a package-private method.
                .access_flags(slimdex::graph::AccessFlags::default())
                .constructor(&[])
                .method_with_flags("helper", &[], "V", 0, Some(Code::default()))
                .build(),
        )
        .add_class(
            ClassBuilder::new(&factory, "Lapp/Main;")
                .constructor(&[])
                .static_method_with_code(
                    "main",
                    &[],
                    "V",
                    Code::new(
                        1,
                        vec![
                            Instruction::NewInstance { dest: 0, ty: scoped },
                            Instruction::InvokeDirect {
                                method: init,
                                args: vec![0],
                            },
                            Instruction::ReturnVoid,
                        ],
                    ),
                )
                .build(),
        );
    let mut app = builder.build().unwrap();
    let mut parser = ConfigurationParser::new(factory.clone());
    parser
        .parse_string(
            "demo.pro",
            "-keep class app.Main { *; }\n-allowaccessmodification",
        )
        .unwrap();
    let config = parser.finish();
    let options = CompilerOptions {
        min_api: 21,
        ..CompilerOptions::default()
    };
    let mut sink = MemorySink::default();
    Compiler::new(&options, &config)
        .run(&mut app, &RecordingCodec, &mut sink)
        .unwrap();

    let class = app.definition_for(scoped).unwrap();
    assert!(class.access_flags.is_public());
    assert!(class.direct_methods[0].access_flags.is_public());
}

/// Invariant: identical inputs and configuration yield bit-identical
/// output, independent of input interning order.
#[test]
fn pipeline_output_is_bit_identical_across_runs() {
    let (sink_a, _) = compile_demo(&[0, 1, 2, 3]);
    let (sink_b, _) = compile_demo(&[3, 2, 1, 0]);
    assert_eq!(sink_a.dex_files, sink_b.dex_files);
    assert_eq!(sink_a.map, sink_b.map);
}

#[test]
fn directory_sink_writes_expected_file_names() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = slimdex::DirectorySink::new(dir.path().join("out")).unwrap();
    sink.write_dex_file(0, b"aa").unwrap();
    sink.write_dex_file(1, b"bb").unwrap();
    sink.write_rename_map("a.A -> b.a:\n").unwrap();
    assert!(dir.path().join("out/classes.dex").exists());
    assert!(dir.path().join("out/classes2.dex").exists());
    assert!(dir.path().join("out/mapping.txt").exists());
}

#[test]
fn writer_honors_main_dex_invariant() {
    let factory = Arc::new(ItemFactory::new());
    let mut builder = ApplicationBuilder::new(factory.clone());
    for i in 0..4 {
        builder.add_class(ClassBuilder::new(&factory, &format!("Lapp/C{i};")).build());
    }
    let main = factory.create_type("Lapp/C2;");
    builder.add_main_dex_type(main);
    let mut app = builder.build().unwrap();
    let options = CompilerOptions {
        min_api: 19,
        ..CompilerOptions::default()
    };
    let lens = NamingLens::identity();
    let mut sink = MemorySink::default();
    let files = ApplicationWriter::new(&mut app, &options, &lens)
        .write(
            &DistributionMode::FillFiles {
                minimal_main_dex: true,
            },
            &RecordingCodec,
            &mut sink,
        )
        .unwrap();
    // The primary file holds exactly the main dex list; the list itself is
    // emitted as pkg/Name.class lines.
    assert!(files[0].classes().contains(&main));
    assert_eq!(files[0].classes().len(), 1);
    assert_eq!(sink.main_dex_list.as_deref(), Some("app/C2.class\n"));
}
