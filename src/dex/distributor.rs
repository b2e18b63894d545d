// Virtual-file distribution: packing classes into dex files under the
// 16-bit constant-pool limits.
//
// Every insertion is transactional: the class's reference delta is computed
// first and the class only commits if methods, fields and types all stay
// within capacity. Class order is the deterministic slow-compare order, so
// the same input always produces the same packing.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{CompileError, Result};
use crate::graph::{
    Application, Class, EncodedValue, FieldId, ItemFactory, MethodId, StringId, TypeId,
    UseRegistry,
};

/// Per-file cap on method, field and type references.
pub const MAX_ENTRIES: usize = 1 << 16;

/// The pool references a single class contributes.
#[derive(Debug, Default)]
pub struct ClassReferences {
    pub methods: HashSet<MethodId>,
    pub fields: HashSet<FieldId>,
    pub types: HashSet<TypeId>,
    pub strings: HashSet<StringId>,
}

impl ClassReferences {
    pub fn collect(app: &Application, class: &Class) -> ClassReferences {
        let factory = &app.factory;
        let mut refs = ClassReferences::default();
        refs.add_type(factory, class.ty);
        if let Some(super_type) = class.super_type {
            refs.add_type(factory, super_type);
        }
        for &iface in &class.interfaces {
            refs.add_type(factory, iface);
        }
        if let Some(source_file) = class.source_file {
            refs.strings.insert(source_file);
        }
        for annotation in &class.annotations.annotations {
            refs.add_annotation(factory, annotation);
        }
        class.for_each_field(|field| {
            refs.add_field(factory, field.field);
            if let Some(value) = &field.static_value {
                refs.add_value(factory, value);
            }
            for annotation in &field.annotations.annotations {
                refs.add_annotation(factory, annotation);
            }
        });
        class.for_each_method(|method| {
            refs.add_method(factory, method.method);
            for annotation in &method.annotations.annotations {
                refs.add_annotation(factory, annotation);
            }
            if let Some(code) = &method.code {
                code.register_references(&mut RefCollector {
                    refs: &mut refs,
                    factory,
                });
            }
        });
        refs
    }

    fn add_type(&mut self, factory: &ItemFactory, ty: TypeId) {
        if self.types.insert(ty) {
            self.strings.insert({
                let descriptor = factory.descriptor(ty);
                factory.create_string(&descriptor)
            });
        }
    }

    fn add_method(&mut self, factory: &ItemFactory, method: MethodId) {
        if self.methods.insert(method) {
            self.add_type(factory, factory.method_holder(method));
            self.strings.insert(factory.method_name(method));
            let proto = factory.method_proto(method);
            self.add_type(factory, factory.proto_return_type(proto));
            for &param in factory.proto_parameters(proto).iter() {
                self.add_type(factory, param);
            }
        }
    }

    fn add_field(&mut self, factory: &ItemFactory, field: FieldId) {
        if self.fields.insert(field) {
            self.add_type(factory, factory.field_holder(field));
            self.add_type(factory, factory.field_type(field));
            self.strings.insert(factory.field_name(field));
        }
    }

    fn add_annotation(&mut self, factory: &ItemFactory, annotation: &crate::graph::Annotation) {
        self.add_type(factory, annotation.annotation_type);
        for element in &annotation.elements {
            self.strings.insert(element.name);
            self.add_value(factory, &element.value);
        }
    }

    fn add_value(&mut self, factory: &ItemFactory, value: &EncodedValue) {
        match value {
            EncodedValue::String(s) => {
                self.strings.insert(*s);
            }
            EncodedValue::Type(ty) => self.add_type(factory, *ty),
            EncodedValue::Field(field) | EncodedValue::EnumValue(field) => {
                self.add_field(factory, *field)
            }
            EncodedValue::Method(method) => self.add_method(factory, *method),
            EncodedValue::Array(values) => {
                for value in values {
                    self.add_value(factory, value);
                }
            }
            EncodedValue::Annotation(annotation) => self.add_annotation(factory, annotation),
            EncodedValue::Boolean(_)
            | EncodedValue::Int(_)
            | EncodedValue::Double(_)
            | EncodedValue::Null => {}
        }
    }
}

struct RefCollector<'a> {
    refs: &'a mut ClassReferences,
    factory: &'a ItemFactory,
}

impl UseRegistry for RefCollector<'_> {
    fn register_invoke_virtual(&mut self, method: MethodId) {
        self.refs.add_method(self.factory, method);
    }
    fn register_invoke_super(&mut self, method: MethodId) {
        self.refs.add_method(self.factory, method);
    }
    fn register_invoke_direct(&mut self, method: MethodId) {
        self.refs.add_method(self.factory, method);
    }
    fn register_invoke_static(&mut self, method: MethodId) {
        self.refs.add_method(self.factory, method);
    }
    fn register_invoke_interface(&mut self, method: MethodId) {
        self.refs.add_method(self.factory, method);
    }
    fn register_instance_field_read(&mut self, field: FieldId) {
        self.refs.add_field(self.factory, field);
    }
    fn register_instance_field_write(&mut self, field: FieldId) {
        self.refs.add_field(self.factory, field);
    }
    fn register_static_field_read(&mut self, field: FieldId) {
        self.refs.add_field(self.factory, field);
    }
    fn register_static_field_write(&mut self, field: FieldId) {
        self.refs.add_field(self.factory, field);
    }
    fn register_new_instance(&mut self, ty: TypeId) {
        self.refs.add_type(self.factory, ty);
    }
    fn register_type_reference(&mut self, ty: TypeId) {
        self.refs.add_type(self.factory, ty);
    }
    fn register_string_reference(&mut self, string: StringId) {
        self.refs.strings.insert(string);
    }
}

#[derive(Debug)]
pub struct VirtualFile {
    id: usize,
    classes: Vec<TypeId>,
    methods: HashSet<MethodId>,
    fields: HashSet<FieldId>,
    types: HashSet<TypeId>,
    strings: HashSet<StringId>,
}

impl VirtualFile {
    fn new(id: usize) -> Self {
        VirtualFile {
            id,
            classes: Vec::new(),
            methods: HashSet::new(),
            fields: HashSet::new(),
            types: HashSet::new(),
            strings: HashSet::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn classes(&self) -> &[TypeId] {
        &self.classes
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    fn fits(&self, refs: &ClassReferences) -> bool {
        self.methods.union(&refs.methods).count() <= MAX_ENTRIES
            && self.fields.union(&refs.fields).count() <= MAX_ENTRIES
            && self.types.union(&refs.types).count() <= MAX_ENTRIES
    }

    fn commit(&mut self, ty: TypeId, refs: &ClassReferences) {
        self.classes.push(ty);
        self.methods.extend(&refs.methods);
        self.fields.extend(&refs.fields);
        self.types.extend(&refs.types);
        self.strings.extend(&refs.strings);
    }

    /// Adds the class if its delta fits all pools.
    fn try_add(&mut self, ty: TypeId, refs: &ClassReferences) -> bool {
        if self.fits(refs) {
            self.commit(ty, refs);
            true
        } else {
            false
        }
    }
}

/// `package-binary-prefix -> file index` mapping, longest prefix wins.
#[derive(Debug, Default)]
pub struct PackageDistribution {
    entries: HashMap<String, usize>,
}

impl PackageDistribution {
    pub fn parse(contents: &str) -> Result<PackageDistribution> {
        let mut entries = HashMap::new();
        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((package, index)) = line.rsplit_once(':') else {
                return Err(CompileError::input(
                    format!("package map line {}", number + 1),
                    "expected `package:file-index`",
                ));
            };
            let index: usize = index.trim().parse().map_err(|_| {
                CompileError::input(
                    format!("package map line {}", number + 1),
                    "file index is not a number",
                )
            })?;
            entries.insert(package.trim().replace('.', "/"), index);
        }
        Ok(PackageDistribution { entries })
    }

    pub fn load(path: &Path) -> Result<PackageDistribution> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CompileError::io(path.display().to_string(), e))?;
        Self::parse(&contents)
    }

    pub fn max_file_index(&self) -> usize {
        self.entries.values().copied().max().unwrap_or(0)
    }

    fn lookup(&self, package: &str) -> Option<usize> {
        let mut prefix = package.to_string();
        loop {
            if let Some(&index) = self.entries.get(&prefix) {
                return Some(index);
            }
            match prefix.rfind('/') {
                Some(i) => prefix.truncate(i),
                None => return self.entries.get("").copied(),
            }
        }
    }
}

#[derive(Debug)]
pub enum DistributionMode {
    /// One file per class; incremental builds.
    FilePerClass,
    /// Everything in classes.dex or fail.
    MonoDex,
    /// Greedy first-fit bin packing.
    FillFiles { minimal_main_dex: bool },
    /// Placement dictated by a package map.
    PackageMap(PackageDistribution),
}

pub fn distribute(
    app: &Application,
    mode: &DistributionMode,
    main_dex_list: &[TypeId],
) -> Result<Vec<VirtualFile>> {
    let main_dex: HashSet<TypeId> = main_dex_list.iter().copied().collect();
    let classes = app.program_classes_sorted();
    let mut files = match mode {
        DistributionMode::FilePerClass => distribute_file_per_class(app, &classes, &main_dex),
        DistributionMode::MonoDex => distribute_mono_dex(app, &classes)?,
        DistributionMode::FillFiles { minimal_main_dex } => {
            distribute_fill_files(app, &classes, &main_dex, *minimal_main_dex)?
        }
        DistributionMode::PackageMap(distribution) => {
            distribute_package_map(app, &classes, &main_dex, distribution)?
        }
    };
    // Contiguous ids over non-empty files only.
    files.retain(|file| !file.is_empty());
    for (index, file) in files.iter_mut().enumerate() {
        file.id = index;
    }
    info!(files = files.len(), "distributed classes");
    Ok(files)
}

fn capacity_error(app: &Application, file: &VirtualFile, ty: TypeId, refs: &ClassReferences) -> CompileError {
    CompileError::Capacity {
        dex: file.id,
        class: app.factory.java_name(ty),
        method_count: file.methods.union(&refs.methods).count(),
        field_count: file.fields.union(&refs.fields).count(),
        limit: MAX_ENTRIES,
    }
}

/// Primary-dex classes go first, in list order, into file 0.
fn fill_main_dex(
    app: &Application,
    file: &mut VirtualFile,
    classes: &[&Class],
    main_dex: &HashSet<TypeId>,
) -> Result<()> {
    for class in classes {
        if !main_dex.contains(&class.ty) {
            continue;
        }
        let refs = ClassReferences::collect(app, class);
        if !file.try_add(class.ty, &refs) {
            return Err(capacity_error(app, file, class.ty, &refs));
        }
    }
    Ok(())
}

fn distribute_file_per_class(
    app: &Application,
    classes: &[&Class],
    main_dex: &HashSet<TypeId>,
) -> Vec<VirtualFile> {
    let mut ordered: Vec<&&Class> = classes
        .iter()
        .filter(|c| main_dex.contains(&c.ty))
        .chain(classes.iter().filter(|c| !main_dex.contains(&c.ty)))
        .collect();
    let mut files = Vec::new();
    for class in ordered.drain(..) {
        let refs = ClassReferences::collect(app, class);
        let mut file = VirtualFile::new(files.len());
        file.commit(class.ty, &refs);
        files.push(file);
    }
    files
}

fn distribute_mono_dex(app: &Application, classes: &[&Class]) -> Result<Vec<VirtualFile>> {
    let mut file = VirtualFile::new(0);
    for class in classes {
        let refs = ClassReferences::collect(app, class);
        if !file.try_add(class.ty, &refs) {
            return Err(capacity_error(app, &file, class.ty, &refs));
        }
    }
    Ok(vec![file])
}

fn distribute_fill_files(
    app: &Application,
    classes: &[&Class],
    main_dex: &HashSet<TypeId>,
    minimal_main_dex: bool,
) -> Result<Vec<VirtualFile>> {
    let mut files = vec![VirtualFile::new(0)];
    fill_main_dex(app, &mut files[0], classes, main_dex)?;
    // With minimal-main-dex the primary file holds only the main dex
    // closure; everything else starts at classes2.dex.
    let first_fill = if minimal_main_dex && !main_dex.is_empty() {
        1
    } else {
        0
    };
    for class in classes {
        if main_dex.contains(&class.ty) {
            continue;
        }
        let refs = ClassReferences::collect(app, class);
        let mut placed = false;
        for file in files.iter_mut().skip(first_fill) {
            if file.try_add(class.ty, &refs) {
                placed = true;
                break;
            }
        }
        if !placed {
            let mut file = VirtualFile::new(files.len());
            if !file.try_add(class.ty, &refs) {
                return Err(capacity_error(app, &file, class.ty, &refs));
            }
            debug!(file = file.id, "opened new dex file");
            files.push(file);
        }
    }
    Ok(files)
}

fn distribute_package_map(
    app: &Application,
    classes: &[&Class],
    main_dex: &HashSet<TypeId>,
    distribution: &PackageDistribution,
) -> Result<Vec<VirtualFile>> {
    let file_count = distribution.max_file_index() + 1;
    let mut files: Vec<VirtualFile> = (0..file_count).map(VirtualFile::new).collect();
    fill_main_dex(app, &mut files[0], classes, main_dex)?;
    let mut overflow: Vec<VirtualFile> = Vec::new();
    for class in classes {
        if main_dex.contains(&class.ty) {
            continue;
        }
        let refs = ClassReferences::collect(app, class);
        let package = app.factory.package_name(class.ty);
        match distribution.lookup(&package) {
            Some(index) => {
                let file = &mut files[index];
                if !file.try_add(class.ty, &refs) {
                    return Err(capacity_error(app, file, class.ty, &refs));
                }
            }
            None => {
                // Unmapped packages spill into fresh files after the
                // declared range.
                let mut placed = false;
                for file in overflow.iter_mut() {
                    if file.try_add(class.ty, &refs) {
                        placed = true;
                        break;
                    }
                }
                if !placed {
                    let mut file = VirtualFile::new(file_count + overflow.len());
                    if !file.try_add(class.ty, &refs) {
                        return Err(capacity_error(app, &file, class.ty, &refs));
                    }
                    overflow.push(file);
                }
            }
        }
    }
    files.extend(overflow);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::{ApplicationBuilder, ClassBuilder, ItemFactory};

    fn app_with_classes(factory: &Arc<ItemFactory>, count: usize) -> Application {
        let mut builder = ApplicationBuilder::new(factory.clone());
        for i in 0..count {
            builder.add_class(
                ClassBuilder::new(factory, &format!("Lcom/example/C{i};"))
                    .virtual_method("m", &[], "V")
                    .build(),
            );
        }
        builder.build().unwrap()
    }

    #[test]
    fn mono_dex_keeps_everything_in_one_file() {
        let factory = Arc::new(ItemFactory::new());
        let app = app_with_classes(&factory, 10);
        let files = distribute(&app, &DistributionMode::MonoDex, &[]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].classes().len(), 10);
    }

    #[test]
    fn file_per_class_gives_each_class_its_own_file() {
        let factory = Arc::new(ItemFactory::new());
        let app = app_with_classes(&factory, 4);
        let files = distribute(&app, &DistributionMode::FilePerClass, &[]).unwrap();
        assert_eq!(files.len(), 4);
        let ids: Vec<usize> = files.iter().map(VirtualFile::id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn main_dex_classes_land_in_primary_file() {
        let factory = Arc::new(ItemFactory::new());
        let app = app_with_classes(&factory, 6);
        let main = factory.create_type("Lcom/example/C3;");
        let files = distribute(
            &app,
            &DistributionMode::FillFiles {
                minimal_main_dex: true,
            },
            &[main],
        )
        .unwrap();
        assert!(files[0].classes().contains(&main));
        assert_eq!(files[0].classes().len(), 1);
        // The remaining classes all fit into the second file.
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].classes().len(), 5);
    }

    #[test]
    fn package_map_places_by_prefix() {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder
            .add_class(ClassBuilder::new(&factory, "Lcom/a/First;").build())
            .add_class(ClassBuilder::new(&factory, "Lcom/b/Second;").build())
            .add_class(ClassBuilder::new(&factory, "Lorg/other/Third;").build());
        let app = builder.build().unwrap();
        let distribution = PackageDistribution::parse("com/a:0\ncom/b:1\n").unwrap();
        let files = distribute(&app, &DistributionMode::PackageMap(distribution), &[]).unwrap();
        let first = factory.create_type("Lcom/a/First;");
        let second = factory.create_type("Lcom/b/Second;");
        let third = factory.create_type("Lorg/other/Third;");
        assert!(files[0].classes().contains(&first));
        assert!(files[1].classes().contains(&second));
        // Unmapped package overflows past the declared range.
        assert!(files[2].classes().contains(&third));
    }

    #[test]
    fn reference_collection_counts_pool_entries() {
        let factory = Arc::new(ItemFactory::new());
        let mut builder = ApplicationBuilder::new(factory.clone());
        builder.add_class(
            ClassBuilder::new(&factory, "Lcom/example/Foo;")
                .instance_field("f", "I")
                .virtual_method("m", &["Ljava/lang/String;"], "V")
                .build(),
        );
        let app = builder.build().unwrap();
        let class = app.program_classes().next().unwrap();
        let refs = ClassReferences::collect(&app, class);
        assert_eq!(refs.methods.len(), 1);
        assert_eq!(refs.fields.len(), 1);
        // Foo itself, Object (super), String, I, V.
        assert!(refs.types.len() >= 4);
    }
}
