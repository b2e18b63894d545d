// Item factory - the single interning point for strings, types, protos,
// method references and field references.
//
// Handles are 32-bit arena indices. Equal inputs always return the same
// handle, so handle equality is item equality. Ordering, however, must never
// come from the arena index: index assignment depends on creation order,
// which depends on input read order. All ordering goes through the slow
// compares below, which compare content.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::CompileError;

/// Interned UTF-8 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringId(u32);

/// Interned type descriptor (`Lpkg/Name;`, `[I`, `Z`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

/// Interned (return type, parameter types) pair. Identity defines method
/// overloading in Dalvik dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtoId(u32);

/// Interned method reference (holder, name, proto).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(u32);

/// Interned field reference (holder, name, field type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Class,
    Array,
    Primitive,
}

#[derive(Debug, Clone)]
struct TypeData {
    descriptor: Arc<str>,
    kind: TypeKind,
    /// Set by the application once a definition with the interface access
    /// flag is loaded for this type.
    interface: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProtoData {
    return_type: TypeId,
    parameters: Arc<[TypeId]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MethodData {
    holder: TypeId,
    name: StringId,
    proto: ProtoId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FieldData {
    holder: TypeId,
    name: StringId,
    field_type: TypeId,
}

#[derive(Default)]
struct Interner {
    strings: Vec<Arc<str>>,
    string_map: HashMap<Arc<str>, StringId>,
    types: Vec<TypeData>,
    type_map: HashMap<Arc<str>, TypeId>,
    protos: Vec<ProtoData>,
    proto_map: HashMap<ProtoData, ProtoId>,
    methods: Vec<MethodData>,
    method_map: HashMap<MethodData, MethodId>,
    fields: Vec<FieldData>,
    field_map: HashMap<FieldData, FieldId>,
}

/// The interning factory. One per compilation; passed explicitly, never
/// process-wide, so tests stay isolated.
pub struct ItemFactory {
    inner: RwLock<Interner>,
    pub object_type: TypeId,
    pub void_type: TypeId,
    pub init_name: StringId,
    pub clinit_name: StringId,
    pub signature_annotation_type: TypeId,
    pub enclosing_class_annotation_type: TypeId,
}

impl ItemFactory {
    pub fn new() -> Self {
        let mut interner = Interner::default();
        let object_type = interner.intern_type("Ljava/lang/Object;");
        let void_type = interner.intern_type("V");
        let init_name = interner.intern_string("<init>");
        let clinit_name = interner.intern_string("<clinit>");
        let signature_annotation_type = interner.intern_type("Ldalvik/annotation/Signature;");
        let enclosing_class_annotation_type =
            interner.intern_type("Ldalvik/annotation/EnclosingClass;");
        ItemFactory {
            inner: RwLock::new(interner),
            object_type,
            void_type,
            init_name,
            clinit_name,
            signature_annotation_type,
            enclosing_class_annotation_type,
        }
    }

    pub fn create_string(&self, value: &str) -> StringId {
        if let Some(&id) = self.inner.read().unwrap().string_map.get(value) {
            return id;
        }
        self.inner.write().unwrap().intern_string(value)
    }

    pub fn create_type(&self, descriptor: &str) -> TypeId {
        if let Some(&id) = self.inner.read().unwrap().type_map.get(descriptor) {
            return id;
        }
        self.inner.write().unwrap().intern_type(descriptor)
    }

    pub fn create_proto(&self, return_type: TypeId, parameters: &[TypeId]) -> ProtoId {
        let data = ProtoData {
            return_type,
            parameters: parameters.into(),
        };
        if let Some(&id) = self.inner.read().unwrap().proto_map.get(&data) {
            return id;
        }
        let mut inner = self.inner.write().unwrap();
        if let Some(&id) = inner.proto_map.get(&data) {
            return id;
        }
        let id = ProtoId(inner.protos.len() as u32);
        inner.protos.push(data.clone());
        inner.proto_map.insert(data, id);
        id
    }

    pub fn create_method(&self, holder: TypeId, name: StringId, proto: ProtoId) -> MethodId {
        let data = MethodData {
            holder,
            name,
            proto,
        };
        if let Some(&id) = self.inner.read().unwrap().method_map.get(&data) {
            return id;
        }
        let mut inner = self.inner.write().unwrap();
        if let Some(&id) = inner.method_map.get(&data) {
            return id;
        }
        let id = MethodId(inner.methods.len() as u32);
        inner.methods.push(data);
        inner.method_map.insert(data, id);
        id
    }

    pub fn create_field(&self, holder: TypeId, name: StringId, field_type: TypeId) -> FieldId {
        let data = FieldData {
            holder,
            name,
            field_type,
        };
        if let Some(&id) = self.inner.read().unwrap().field_map.get(&data) {
            return id;
        }
        let mut inner = self.inner.write().unwrap();
        if let Some(&id) = inner.field_map.get(&data) {
            return id;
        }
        let id = FieldId(inner.fields.len() as u32);
        inner.fields.push(data);
        inner.field_map.insert(data, id);
        id
    }

    pub fn string(&self, id: StringId) -> Arc<str> {
        self.inner.read().unwrap().strings[id.0 as usize].clone()
    }

    pub fn descriptor(&self, ty: TypeId) -> Arc<str> {
        self.inner.read().unwrap().types[ty.0 as usize].descriptor.clone()
    }

    pub fn type_kind(&self, ty: TypeId) -> TypeKind {
        self.inner.read().unwrap().types[ty.0 as usize].kind
    }

    pub fn is_class_type(&self, ty: TypeId) -> bool {
        self.type_kind(ty) == TypeKind::Class
    }

    pub fn is_array_type(&self, ty: TypeId) -> bool {
        self.type_kind(ty) == TypeKind::Array
    }

    pub fn is_primitive_type(&self, ty: TypeId) -> bool {
        self.type_kind(ty) == TypeKind::Primitive
    }

    pub fn is_interface(&self, ty: TypeId) -> bool {
        self.inner.read().unwrap().types[ty.0 as usize].interface
    }

    pub(crate) fn set_interface(&self, ty: TypeId) {
        self.inner.write().unwrap().types[ty.0 as usize].interface = true;
    }

    /// Strips array dimensions: `[[Lfoo;` -> `Lfoo;`, `[I` -> `I`.
    /// Non-array types are returned unchanged.
    pub fn base_type(&self, ty: TypeId) -> TypeId {
        let descriptor = self.descriptor(ty);
        let base = descriptor.trim_start_matches('[');
        if base.len() == descriptor.len() {
            ty
        } else {
            let base = base.to_string();
            self.create_type(&base)
        }
    }

    pub fn array_dimensions(&self, ty: TypeId) -> usize {
        let descriptor = self.descriptor(ty);
        descriptor.len() - descriptor.trim_start_matches('[').len()
    }

    pub fn proto_return_type(&self, proto: ProtoId) -> TypeId {
        self.inner.read().unwrap().protos[proto.0 as usize].return_type
    }

    pub fn proto_parameters(&self, proto: ProtoId) -> Arc<[TypeId]> {
        self.inner.read().unwrap().protos[proto.0 as usize].parameters.clone()
    }

    pub fn method_holder(&self, method: MethodId) -> TypeId {
        self.inner.read().unwrap().methods[method.0 as usize].holder
    }

    pub fn method_name(&self, method: MethodId) -> StringId {
        self.inner.read().unwrap().methods[method.0 as usize].name
    }

    pub fn method_proto(&self, method: MethodId) -> ProtoId {
        self.inner.read().unwrap().methods[method.0 as usize].proto
    }

    pub fn field_holder(&self, field: FieldId) -> TypeId {
        self.inner.read().unwrap().fields[field.0 as usize].holder
    }

    pub fn field_name(&self, field: FieldId) -> StringId {
        self.inner.read().unwrap().fields[field.0 as usize].name
    }

    pub fn field_type(&self, field: FieldId) -> TypeId {
        self.inner.read().unwrap().fields[field.0 as usize].field_type
    }

    /// Re-associates a method reference with the same name/proto on another
    /// holder, interning it if it does not exist yet.
    pub fn method_on_holder(&self, method: MethodId, holder: TypeId) -> MethodId {
        let name = self.method_name(method);
        let proto = self.method_proto(method);
        self.create_method(holder, name, proto)
    }

    /// Package part of the descriptor in binary form: `La/b/C;` -> `a/b`.
    pub fn package_name(&self, ty: TypeId) -> String {
        let descriptor = self.descriptor(ty);
        let binary = descriptor
            .trim_start_matches('L')
            .trim_end_matches(';');
        match binary.rfind('/') {
            Some(i) => binary[..i].to_string(),
            None => String::new(),
        }
    }

    /// Java source name: `La/b/C;` -> `a.b.C`, `[I` -> `int[]`.
    pub fn java_name(&self, ty: TypeId) -> String {
        descriptor_to_java(&self.descriptor(ty))
    }

    // Slow compares: content ordering, stable across runs regardless of
    // interning order.

    pub fn cmp_strings(&self, a: StringId, b: StringId) -> std::cmp::Ordering {
        if a == b {
            return std::cmp::Ordering::Equal;
        }
        self.string(a).as_bytes().cmp(self.string(b).as_bytes())
    }

    pub fn cmp_types(&self, a: TypeId, b: TypeId) -> std::cmp::Ordering {
        if a == b {
            return std::cmp::Ordering::Equal;
        }
        self.descriptor(a).as_bytes().cmp(self.descriptor(b).as_bytes())
    }

    pub fn cmp_protos(&self, a: ProtoId, b: ProtoId) -> std::cmp::Ordering {
        if a == b {
            return std::cmp::Ordering::Equal;
        }
        let (ar, br) = (self.proto_return_type(a), self.proto_return_type(b));
        self.cmp_types(ar, br).then_with(|| {
            let ap = self.proto_parameters(a);
            let bp = self.proto_parameters(b);
            for (&x, &y) in ap.iter().zip(bp.iter()) {
                let ord = self.cmp_types(x, y);
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            ap.len().cmp(&bp.len())
        })
    }

    pub fn cmp_methods(&self, a: MethodId, b: MethodId) -> std::cmp::Ordering {
        if a == b {
            return std::cmp::Ordering::Equal;
        }
        self.cmp_types(self.method_holder(a), self.method_holder(b))
            .then_with(|| self.cmp_strings(self.method_name(a), self.method_name(b)))
            .then_with(|| self.cmp_protos(self.method_proto(a), self.method_proto(b)))
    }

    pub fn cmp_fields(&self, a: FieldId, b: FieldId) -> std::cmp::Ordering {
        if a == b {
            return std::cmp::Ordering::Equal;
        }
        self.cmp_types(self.field_holder(a), self.field_holder(b))
            .then_with(|| self.cmp_strings(self.field_name(a), self.field_name(b)))
            .then_with(|| self.cmp_types(self.field_type(a), self.field_type(b)))
    }

    pub fn method_to_string(&self, method: MethodId) -> String {
        let holder = self.java_name(self.method_holder(method));
        let name = self.string(self.method_name(method));
        let proto = self.method_proto(method);
        let params: Vec<String> = self
            .proto_parameters(proto)
            .iter()
            .map(|&p| self.java_name(p))
            .collect();
        format!(
            "{} {}.{}({})",
            self.java_name(self.proto_return_type(proto)),
            holder,
            name,
            params.join(", ")
        )
    }

    pub fn field_to_string(&self, field: FieldId) -> String {
        format!(
            "{} {}.{}",
            self.java_name(self.field_type(field)),
            self.java_name(self.field_holder(field)),
            self.string(self.field_name(field))
        )
    }

    pub fn all_types(&self) -> Vec<TypeId> {
        let inner = self.inner.read().unwrap();
        (0..inner.types.len() as u32).map(TypeId).collect()
    }

    pub fn all_methods(&self) -> Vec<MethodId> {
        let inner = self.inner.read().unwrap();
        (0..inner.methods.len() as u32).map(MethodId).collect()
    }

    pub fn validate_class_descriptor(&self, descriptor: &str) -> Result<(), CompileError> {
        if is_valid_class_descriptor(descriptor) {
            Ok(())
        } else {
            Err(CompileError::input(
                descriptor,
                "class descriptor cannot be represented in dex format",
            ))
        }
    }
}

impl Default for ItemFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl Interner {
    fn intern_string(&mut self, value: &str) -> StringId {
        if let Some(&id) = self.string_map.get(value) {
            return id;
        }
        let arc: Arc<str> = Arc::from(value);
        let id = StringId(self.strings.len() as u32);
        self.strings.push(arc.clone());
        self.string_map.insert(arc, id);
        id
    }

    fn intern_type(&mut self, descriptor: &str) -> TypeId {
        if let Some(&id) = self.type_map.get(descriptor) {
            return id;
        }
        let kind = match descriptor.as_bytes().first() {
            Some(b'[') => TypeKind::Array,
            Some(b'L') => TypeKind::Class,
            _ => TypeKind::Primitive,
        };
        let arc: Arc<str> = Arc::from(descriptor);
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeData {
            descriptor: arc.clone(),
            kind,
            interface: false,
        });
        self.type_map.insert(arc, id);
        id
    }
}

pub fn is_valid_class_descriptor(descriptor: &str) -> bool {
    let Some(binary) = descriptor
        .strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
    else {
        return false;
    };
    !binary.is_empty()
        && binary.split('/').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '-')
        })
}

/// `La/b/C;` -> `a.b.C`, `[[I` -> `int[][]`, `I` -> `int`.
pub fn descriptor_to_java(descriptor: &str) -> String {
    let dims = descriptor.len() - descriptor.trim_start_matches('[').len();
    let base = &descriptor[dims..];
    let name = match base.as_bytes().first() {
        Some(b'L') => base
            .trim_start_matches('L')
            .trim_end_matches(';')
            .replace('/', "."),
        Some(b'V') => "void".to_string(),
        Some(b'Z') => "boolean".to_string(),
        Some(b'B') => "byte".to_string(),
        Some(b'S') => "short".to_string(),
        Some(b'C') => "char".to_string(),
        Some(b'I') => "int".to_string(),
        Some(b'J') => "long".to_string(),
        Some(b'F') => "float".to_string(),
        Some(b'D') => "double".to_string(),
        _ => base.to_string(),
    };
    format!("{}{}", name, "[]".repeat(dims))
}

/// `a.b.C` -> `La/b/C;`, `int` -> `I`.
pub fn java_to_descriptor(java: &str) -> String {
    let dims = java.matches("[]").count();
    let base = java.trim_end_matches("[]");
    let descriptor = match base {
        "void" => "V".to_string(),
        "boolean" => "Z".to_string(),
        "byte" => "B".to_string(),
        "short" => "S".to_string(),
        "char" => "C".to_string(),
        "int" => "I".to_string(),
        "long" => "J".to_string(),
        "float" => "F".to_string(),
        "double" => "D".to_string(),
        _ => format!("L{};", base.replace('.', "/")),
    };
    format!("{}{}", "[".repeat(dims), descriptor)
}
