// Application writer driver.
//
// Sorts the pools by their final (renamed) content, normalizes annotation
// ordering, distributes classes into virtual files and emits each file
// through the codec, one task per file. The rename map and the main dex
// list are written after dex emission; both read class state the codec may
// consume destructively.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::info;

use crate::config::CompilerOptions;
use crate::dex::distributor::{distribute, DistributionMode, VirtualFile};
use crate::dex::DexVersion;
use crate::error::{CompileError, Result};
use crate::graph::{
    Annotation, Application, EncodedValue, ItemFactory, ItemOrdering, NamingLens,
};

/// The external dex binary codec. Implementations serialize one virtual
/// file worth of classes, applying the lens for all emitted names.
pub trait DexCodec: Sync {
    fn write_file(
        &self,
        file: &VirtualFile,
        app: &Application,
        lens: &NamingLens,
        ordering: &ItemOrdering,
        version: DexVersion,
    ) -> Result<Vec<u8>>;
}

/// Where the produced artifacts go.
pub trait OutputSink {
    fn write_dex_file(&mut self, index: usize, bytes: &[u8]) -> Result<()>;
    fn write_rename_map(&mut self, contents: &str) -> Result<()>;
    fn write_main_dex_list(&mut self, contents: &str) -> Result<()>;
}

/// Plain directory output: classes.dex, classes2.dex, ...
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Result<DirectorySink> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| CompileError::io(root.display().to_string(), e))?;
        Ok(DirectorySink { root })
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.root.join(name);
        std::fs::write(&path, bytes).map_err(|e| CompileError::io(path.display().to_string(), e))
    }

    pub fn dex_file_name(index: usize) -> String {
        if index == 0 {
            "classes.dex".to_string()
        } else {
            format!("classes{}.dex", index + 1)
        }
    }
}

impl OutputSink for DirectorySink {
    fn write_dex_file(&mut self, index: usize, bytes: &[u8]) -> Result<()> {
        self.write(&Self::dex_file_name(index), bytes)
    }

    fn write_rename_map(&mut self, contents: &str) -> Result<()> {
        self.write("mapping.txt", contents.as_bytes())
    }

    fn write_main_dex_list(&mut self, contents: &str) -> Result<()> {
        self.write("main-dex-list.txt", contents.as_bytes())
    }
}

pub struct ApplicationWriter<'a> {
    app: &'a mut Application,
    options: &'a CompilerOptions,
    lens: &'a NamingLens,
}

impl<'a> ApplicationWriter<'a> {
    pub fn new(
        app: &'a mut Application,
        options: &'a CompilerOptions,
        lens: &'a NamingLens,
    ) -> Self {
        ApplicationWriter { app, options, lens }
    }

    pub fn write(
        &mut self,
        mode: &DistributionMode,
        codec: &dyn DexCodec,
        sink: &mut dyn OutputSink,
    ) -> Result<Vec<VirtualFile>> {
        let factory = self.app.factory.clone();
        // Stable output indices exist only after this sort.
        let ordering = ItemOrdering::compute(&factory, self.lens);
        sort_annotations(self.app);

        let main_dex_list = self.app.main_dex_list.clone();
        let files = distribute(self.app, mode, &main_dex_list)?;

        info!(files = files.len(), "writing dex files");
        let app = &*self.app;
        let lens = self.lens;
        let version = DexVersion::for_api(self.options.min_api);
        let payloads: Vec<(usize, Result<Vec<u8>>)> = files
            .par_iter()
            .map(|file| {
                (
                    file.id(),
                    codec.write_file(file, app, lens, &ordering, version),
                )
            })
            .collect();
        let mut by_index: Vec<(usize, Vec<u8>)> = Vec::with_capacity(payloads.len());
        for (index, payload) in payloads {
            by_index.push((index, payload?));
        }
        by_index.sort_by_key(|(index, _)| *index);
        for (index, bytes) in by_index {
            sink.write_dex_file(index, &bytes)?;
        }

        // Auxiliary outputs read class state only after all codec tasks
        // joined.
        if !self.lens.is_identity() {
            let mut map = Vec::new();
            crate::naming::map::write_map(self.app, self.lens, &mut map)
                .map_err(|e| CompileError::io("mapping.txt", e))?;
            sink.write_rename_map(&String::from_utf8_lossy(&map))?;
        }
        if !self.app.main_dex_list.is_empty() {
            let contents = self.main_dex_list_contents(&factory);
            sink.write_main_dex_list(&contents)?;
        }
        Ok(files)
    }

    /// `pkg/Name.class` lines, using output names.
    fn main_dex_list_contents(&self, factory: &ItemFactory) -> String {
        let mut lines = String::new();
        for &ty in &self.app.main_dex_list {
            let descriptor = self.lens.lookup_descriptor(factory, ty);
            let binary = descriptor.trim_start_matches('L').trim_end_matches(';');
            lines.push_str(binary);
            lines.push_str(".class\n");
        }
        lines
    }
}

/// Deterministic annotation ordering: sets by annotation type, encoded
/// annotations by element name, arrays recursively.
pub fn sort_annotations(app: &mut Application) {
    let factory = app.factory.clone();
    let types: Vec<_> = app.program_classes().map(|c| c.ty).collect();
    for ty in types {
        let Some(class) = app.definition_for_mut(ty) else {
            continue;
        };
        sort_annotation_list(&factory, &mut class.annotations.annotations);
        for field in class
            .static_fields
            .iter_mut()
            .chain(class.instance_fields.iter_mut())
        {
            sort_annotation_list(&factory, &mut field.annotations.annotations);
            if let Some(value) = &mut field.static_value {
                sort_value(&factory, value);
            }
        }
        for method in class
            .direct_methods
            .iter_mut()
            .chain(class.virtual_methods.iter_mut())
        {
            sort_annotation_list(&factory, &mut method.annotations.annotations);
            for parameter in &mut method.parameter_annotations {
                sort_annotation_list(&factory, &mut parameter.annotations);
            }
        }
    }
}

fn sort_annotation_list(factory: &ItemFactory, annotations: &mut [Annotation]) {
    annotations.sort_by(|a, b| factory.cmp_types(a.annotation_type, b.annotation_type));
    for annotation in annotations {
        sort_annotation(factory, annotation);
    }
}

fn sort_annotation(factory: &ItemFactory, annotation: &mut Annotation) {
    annotation
        .elements
        .sort_by(|a, b| factory.cmp_strings(a.name, b.name));
    for element in &mut annotation.elements {
        sort_value(factory, &mut element.value);
    }
}

fn sort_value(factory: &ItemFactory, value: &mut EncodedValue) {
    match value {
        EncodedValue::Array(values) => {
            for value in values.iter_mut() {
                sort_value(factory, value);
            }
        }
        EncodedValue::Annotation(annotation) => sort_annotation(factory, annotation),
        _ => {}
    }
}

/// Picks the distribution mode the way the compiler front end does: explicit
/// file-per-class, a package map when provided, mono-dex below the multidex
/// API level without main-dex configuration, fill-files otherwise.
pub fn select_distribution_mode(
    options: &CompilerOptions,
    has_main_dex: bool,
) -> Result<DistributionMode> {
    if options.file_per_class {
        if options.package_distribution.is_some() {
            return Err(CompileError::input(
                "--package-map",
                "cannot combine package distribution with file-per-class output",
            ));
        }
        return Ok(DistributionMode::FilePerClass);
    }
    if !options.can_use_multidex() && !has_main_dex {
        if options.package_distribution.is_some() {
            return Err(CompileError::input(
                "--package-map",
                format!(
                    "cannot apply package distribution: multidex is not supported with min-api {}",
                    options.min_api
                ),
            ));
        }
        return Ok(DistributionMode::MonoDex);
    }
    if let Some(path) = &options.package_distribution {
        if options.minimal_main_dex {
            return Err(CompileError::input(
                "--package-map",
                "cannot combine package distribution with minimal-main-dex",
            ));
        }
        let distribution = crate::dex::distributor::PackageDistribution::load(Path::new(path))?;
        return Ok(DistributionMode::PackageMap(distribution));
    }
    Ok(DistributionMode::FillFiles {
        minimal_main_dex: options.minimal_main_dex,
    })
}
