// The compilation pipeline: root set -> liveness -> prune -> main dex ->
// call-graph scheduling -> minify -> distribute -> write. Each phase runs to
// completion before the next starts; worker errors surface at the phase
// boundary.

use std::path::Path;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::{CompilationMode, CompilerOptions};
use crate::dex::writer::{select_distribution_mode, DexCodec, OutputSink};
use crate::dex::ApplicationWriter;
use crate::error::{CompileError, Result};
use crate::graph::{publicize, Application, MethodId, NamingLens, TypeId};
use crate::ir::CallGraph;
use crate::naming::Minifier;
use crate::report::ShrinkReport;
use crate::shaking::rules::Configuration;
use crate::shaking::{
    ConfigurationParser, DiscardedChecker, Enqueuer, Item, RootSetBuilder, TreePruner, UsageInfo,
};

/// A per-method pass scheduled bottom-up over the call graph. The concrete
/// optimizer is external; the pipeline owns only its schedule.
pub type MethodPass<'p> = &'p (dyn Fn(MethodId) + Sync);

pub struct Compiler<'a> {
    options: &'a CompilerOptions,
    config: &'a Configuration,
    method_pass: Option<MethodPass<'a>>,
}

impl<'a> Compiler<'a> {
    pub fn new(options: &'a CompilerOptions, config: &'a Configuration) -> Self {
        Compiler {
            options,
            config,
            method_pass: None,
        }
    }

    /// Installs the optimizer callback run over each call-graph layer.
    pub fn with_method_pass(mut self, pass: MethodPass<'a>) -> Self {
        self.method_pass = Some(pass);
        self
    }

    pub fn run(
        &self,
        app: &mut Application,
        codec: &dyn DexCodec,
        sink: &mut dyn OutputSink,
    ) -> Result<ShrinkReport> {
        self.options.validate()?;
        let classes_in = app.program_classes().count();

        info!("building root set");
        let root_set = RootSetBuilder::new(app, self.config).run()?;
        if self.config.print_seeds {
            let mut out = Vec::new();
            root_set
                .write_seeds(app, &mut out)
                .map_err(|e| CompileError::io("seeds", e))?;
            self.emit(self.config.print_seeds_file.as_deref(), &out)?;
        }

        let shrinking = self.options.tree_shaking && self.config.shrink;
        let mut usage = UsageInfo::default();
        if shrinking {
            info!("tracing application liveness");
            let liveness = Enqueuer::new(app, &root_set, self.config)
                .ignore_missing_classes(self.options.ignore_missing_classes)
                .trace_application()?;

            if !root_set.reason_asked.is_empty() {
                let queried: Vec<Item> = root_set.reason_asked.iter().copied().collect();
                let reasons = Enqueuer::print_reasons(&liveness, &queried, &app.factory);
                print!("{reasons}");
            }

            usage = TreePruner::new(&liveness).prune(app)?;
            DiscardedChecker::new(&root_set).run(app)?;

            if self.config.print_usage {
                let mut out = Vec::new();
                usage
                    .write(&mut out)
                    .map_err(|e| CompileError::io("usage", e))?;
                self.emit(self.config.print_usage_file.as_deref(), &out)?;
            }

            // Bottom-up method scheduling; within a layer methods are
            // independent and run in parallel. Inlining-style passes stay
            // off in debug builds and under -dontoptimize.
            if self.options.mode == CompilationMode::Release && self.config.optimize {
                if let Some(pass) = self.method_pass {
                    let mut call_graph = CallGraph::build(app, &liveness);
                    call_graph.for_each_layer(|layer| {
                        layer.par_iter().for_each(|&method| pass(method));
                    });
                }
            }
        } else {
            usage.classes_kept = classes_in;
        }

        self.compute_main_dex(app)?;

        if self.config.allow_access_modification {
            publicize(app);
        }

        let lens = if self.options.minification && self.config.obfuscate {
            info!("minifying names");
            Minifier::new(app, &root_set, self.config).run()
        } else {
            NamingLens::identity()
        };

        let mode = select_distribution_mode(self.options, !app.main_dex_list.is_empty())?;
        let files = ApplicationWriter::new(app, self.options, &lens).write(&mode, codec, sink)?;

        Ok(ShrinkReport::from_usage(&usage, classes_in, files.len()))
    }

    /// Main-dex computation: explicit list entries plus the liveness closure
    /// of the main-dex keep rules.
    fn compute_main_dex(&self, app: &mut Application) -> Result<()> {
        let mut main_dex: Vec<TypeId> = Vec::new();
        if let Some(path) = &self.options.main_dex_list {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| CompileError::io(path.display().to_string(), e))?;
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Some(binary) = line.strip_suffix(".class") else {
                    return Err(CompileError::input(line, "main dex list entries end in .class"));
                };
                main_dex.push(app.factory.create_type(&format!("L{binary};")));
            }
        }
        if let Some(path) = &self.options.main_dex_rules {
            let mut parser = ConfigurationParser::new(app.factory.clone());
            parser.parse_file(path)?;
            let main_dex_config = parser.finish();
            let main_dex_roots = RootSetBuilder::new(app, &main_dex_config).run()?;
            let traced = Enqueuer::new(app, &main_dex_roots, self.config).trace_main_dex()?;
            main_dex.extend(traced);
        }
        main_dex.sort_by(|&a, &b| app.factory.cmp_types(a, b));
        main_dex.dedup();
        // Entries may refer to classes that were shaken away; those are
        // dropped with a note.
        main_dex.retain(|&ty| {
            let present = app.definition_for(ty).is_some();
            if !present {
                warn!(
                    "main dex entry `{}` is not in the output",
                    app.factory.java_name(ty)
                );
            }
            present
        });
        if !main_dex.is_empty() && !self.options.can_use_multidex() {
            info!(classes = main_dex.len(), "computed main dex list");
        }
        if let Some(path) = &self.options.main_dex_list_output {
            let mut contents = String::new();
            for &ty in &main_dex {
                let descriptor = app.factory.descriptor(ty);
                contents.push_str(descriptor.trim_start_matches('L').trim_end_matches(';'));
                contents.push_str(".class\n");
            }
            std::fs::write(path, contents)
                .map_err(|e| CompileError::io(path.display().to_string(), e))?;
        }
        app.main_dex_list = main_dex;
        Ok(())
    }

    fn emit(&self, path: Option<&Path>, contents: &[u8]) -> Result<()> {
        match path {
            Some(path) => std::fs::write(path, contents)
                .map_err(|e| CompileError::io(path.display().to_string(), e)),
            None => {
                print!("{}", String::from_utf8_lossy(contents));
                Ok(())
            }
        }
    }
}
