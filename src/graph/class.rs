// Class items and their encoded members.

use crate::error::CompileError;
use crate::graph::code::Code;
use crate::graph::factory::{FieldId, ItemFactory, MethodId, StringId, TypeId};

/// Dalvik access flags, stored as the raw bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessFlags(u32);

impl AccessFlags {
    pub const PUBLIC: u32 = 0x1;
    pub const PRIVATE: u32 = 0x2;
    pub const PROTECTED: u32 = 0x4;
    pub const STATIC: u32 = 0x8;
    pub const FINAL: u32 = 0x10;
    pub const SYNCHRONIZED: u32 = 0x20;
    pub const VOLATILE: u32 = 0x40;
    pub const TRANSIENT: u32 = 0x80;
    pub const NATIVE: u32 = 0x100;
    pub const INTERFACE: u32 = 0x200;
    pub const ABSTRACT: u32 = 0x400;
    pub const STRICT: u32 = 0x800;
    pub const SYNTHETIC: u32 = 0x1000;
    pub const ANNOTATION: u32 = 0x2000;
    pub const ENUM: u32 = 0x4000;
    pub const CONSTRUCTOR: u32 = 0x10000;
    pub const BRIDGE: u32 = 0x40;

    pub fn new(bits: u32) -> Self {
        AccessFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn set(&mut self, flag: u32) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u32) {
        self.0 &= !flag;
    }

    pub fn is(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn is_public(self) -> bool {
        self.is(Self::PUBLIC)
    }

    pub fn is_private(self) -> bool {
        self.is(Self::PRIVATE)
    }

    pub fn is_protected(self) -> bool {
        self.is(Self::PROTECTED)
    }

    pub fn is_static(self) -> bool {
        self.is(Self::STATIC)
    }

    pub fn is_final(self) -> bool {
        self.is(Self::FINAL)
    }

    pub fn is_abstract(self) -> bool {
        self.is(Self::ABSTRACT)
    }

    pub fn is_interface(self) -> bool {
        self.is(Self::INTERFACE)
    }

    pub fn is_annotation(self) -> bool {
        self.is(Self::ANNOTATION)
    }

    pub fn is_enum(self) -> bool {
        self.is(Self::ENUM)
    }

    pub fn is_constructor(self) -> bool {
        self.is(Self::CONSTRUCTOR)
    }

    pub fn is_native(self) -> bool {
        self.is(Self::NATIVE)
    }

    pub fn is_bridge(self) -> bool {
        self.is(Self::BRIDGE)
    }

    /// Drops private/protected and makes the item public. Used for classes
    /// and fields, where visibility does not affect dispatch.
    pub fn promote_to_public(&mut self) {
        self.clear(Self::PRIVATE | Self::PROTECTED);
        self.set(Self::PUBLIC);
    }

    /// Makes package-private and protected items public; private items are
    /// left alone. Used for methods, where promoting a private method would
    /// move it into the virtual dispatch pool.
    pub fn promote_non_private_to_public(&mut self) {
        if !self.is_private() {
            self.clear(Self::PROTECTED);
            self.set(Self::PUBLIC);
        }
    }

    pub fn contains_all_of(self, other: AccessFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn contains_none_of(self, other: AccessFlags) -> bool {
        self.0 & other.0 == 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// An annotation instance: type plus named element values.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub annotation_type: TypeId,
    pub elements: Vec<AnnotationElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationElement {
    pub name: StringId,
    pub value: EncodedValue,
}

/// Constant payload of annotations and static field initializers.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValue {
    Boolean(bool),
    Int(i64),
    Double(f64),
    String(StringId),
    Type(TypeId),
    Field(FieldId),
    EnumValue(FieldId),
    Method(MethodId),
    Array(Vec<EncodedValue>),
    Annotation(Annotation),
    Null,
}

impl EncodedValue {
    /// Default values (zero, null) never force class initialization; anything
    /// else does.
    pub fn may_trigger_allocation(&self) -> bool {
        !matches!(
            self,
            EncodedValue::Boolean(false) | EncodedValue::Int(0) | EncodedValue::Null
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationSet {
    pub annotations: Vec<Annotation>,
}

impl AnnotationSet {
    pub fn empty() -> Self {
        AnnotationSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn first_matching(&self, annotation_type: TypeId) -> Option<&Annotation> {
        self.annotations
            .iter()
            .find(|a| a.annotation_type == annotation_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassOrigin {
    Program,
    Classpath,
    Library,
}

#[derive(Debug, Clone)]
pub struct EncodedMethod {
    pub method: MethodId,
    pub access_flags: AccessFlags,
    pub code: Option<Code>,
    pub annotations: AnnotationSet,
    pub parameter_annotations: Vec<AnnotationSet>,
}

impl EncodedMethod {
    pub fn new(method: MethodId, access_flags: AccessFlags, code: Option<Code>) -> Self {
        EncodedMethod {
            method,
            access_flags,
            code,
            annotations: AnnotationSet::empty(),
            parameter_annotations: Vec::new(),
        }
    }

    pub fn is_class_initializer(&self, factory: &ItemFactory) -> bool {
        self.access_flags.is_static()
            && self.access_flags.is_constructor()
            && factory.method_name(self.method) == factory.clinit_name
    }

    /// Direct methods hold constructors, statics and privates; everything
    /// else dispatches virtually.
    pub fn belongs_to_direct_pool(&self) -> bool {
        self.access_flags.is_static()
            || self.access_flags.is_private()
            || self.access_flags.is_constructor()
    }
}

#[derive(Debug, Clone)]
pub struct EncodedField {
    pub field: FieldId,
    pub access_flags: AccessFlags,
    pub static_value: Option<EncodedValue>,
    pub annotations: AnnotationSet,
}

impl EncodedField {
    pub fn new(field: FieldId, access_flags: AccessFlags) -> Self {
        EncodedField {
            field,
            access_flags,
            static_value: None,
            annotations: AnnotationSet::empty(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub origin: ClassOrigin,
    pub ty: TypeId,
    pub access_flags: AccessFlags,
    pub super_type: Option<TypeId>,
    pub interfaces: Vec<TypeId>,
    pub source_file: Option<StringId>,
    pub annotations: AnnotationSet,
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

impl Class {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: &ItemFactory,
        origin: ClassOrigin,
        ty: TypeId,
        access_flags: AccessFlags,
        super_type: Option<TypeId>,
        interfaces: Vec<TypeId>,
        static_fields: Vec<EncodedField>,
        instance_fields: Vec<EncodedField>,
        direct_methods: Vec<EncodedMethod>,
        virtual_methods: Vec<EncodedMethod>,
    ) -> Result<Self, CompileError> {
        let descriptor = factory.descriptor(ty);
        factory.validate_class_descriptor(&descriptor)?;
        if super_type == Some(ty) {
            return Err(CompileError::input(
                &*descriptor,
                "class cannot extend itself",
            ));
        }
        if interfaces.contains(&ty) {
            return Err(CompileError::input(
                &*descriptor,
                "interface cannot implement itself",
            ));
        }
        for method in &direct_methods {
            if !method.belongs_to_direct_pool() {
                return Err(CompileError::input(
                    factory.method_to_string(method.method),
                    "virtual method in direct method pool",
                ));
            }
        }
        for method in &virtual_methods {
            if method.belongs_to_direct_pool() {
                return Err(CompileError::input(
                    factory.method_to_string(method.method),
                    "direct method in virtual method pool",
                ));
            }
        }
        Ok(Class {
            origin,
            ty,
            access_flags,
            super_type,
            interfaces,
            source_file: None,
            annotations: AnnotationSet::empty(),
            static_fields,
            instance_fields,
            direct_methods,
            virtual_methods,
        })
    }

    pub fn is_program_class(&self) -> bool {
        self.origin == ClassOrigin::Program
    }

    pub fn is_library_class(&self) -> bool {
        self.origin == ClassOrigin::Library
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.is_interface()
    }

    pub fn for_each_method(&self, mut consumer: impl FnMut(&EncodedMethod)) {
        for method in &self.direct_methods {
            consumer(method);
        }
        for method in &self.virtual_methods {
            consumer(method);
        }
    }

    pub fn for_each_field(&self, mut consumer: impl FnMut(&EncodedField)) {
        for field in &self.static_fields {
            consumer(field);
        }
        for field in &self.instance_fields {
            consumer(field);
        }
    }

    pub fn all_methods(&self) -> impl Iterator<Item = &EncodedMethod> {
        self.direct_methods.iter().chain(self.virtual_methods.iter())
    }

    pub fn all_fields(&self) -> impl Iterator<Item = &EncodedField> {
        self.static_fields.iter().chain(self.instance_fields.iter())
    }

    pub fn all_methods_sorted(&self, factory: &ItemFactory) -> Vec<&EncodedMethod> {
        let mut methods: Vec<&EncodedMethod> = self.all_methods().collect();
        methods.sort_by(|a, b| factory.cmp_methods(a.method, b.method));
        methods
    }

    pub fn find_direct_target(&self, method: MethodId) -> Option<&EncodedMethod> {
        self.direct_methods.iter().find(|m| m.method == method)
    }

    pub fn find_virtual_target(&self, method: MethodId) -> Option<&EncodedMethod> {
        self.virtual_methods.iter().find(|m| m.method == method)
    }

    /// Matches by name and proto, ignoring the holder. Used when walking a
    /// hierarchy with re-based method references.
    pub fn find_virtual_target_by_signature(
        &self,
        factory: &ItemFactory,
        method: MethodId,
    ) -> Option<&EncodedMethod> {
        let name = factory.method_name(method);
        let proto = factory.method_proto(method);
        self.virtual_methods.iter().find(|m| {
            factory.method_name(m.method) == name && factory.method_proto(m.method) == proto
        })
    }

    pub fn find_static_target(&self, field: FieldId) -> Option<&EncodedField> {
        self.static_fields.iter().find(|f| f.field == field)
    }

    pub fn find_instance_target(&self, field: FieldId) -> Option<&EncodedField> {
        self.instance_fields.iter().find(|f| f.field == field)
    }

    pub fn class_initializer(&self, factory: &ItemFactory) -> Option<&EncodedMethod> {
        self.direct_methods
            .iter()
            .find(|m| m.is_class_initializer(factory))
    }

    pub fn has_non_trivial_class_initializer(&self, factory: &ItemFactory) -> bool {
        match self.class_initializer(factory) {
            Some(clinit) => match &clinit.code {
                Some(code) => !code.is_empty_void_method(),
                None => false,
            },
            None => false,
        }
    }
}
