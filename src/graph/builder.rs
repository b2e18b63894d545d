// Fluent construction of class items, used by the input codecs and
// throughout the test suite.

use crate::error::CompileError;
use crate::graph::class::{
    AccessFlags, Annotation, AnnotationSet, Class, ClassOrigin, EncodedField, EncodedMethod,
    EncodedValue,
};
use crate::graph::code::Code;
use crate::graph::factory::{ItemFactory, TypeId};

pub struct ClassBuilder<'a> {
    factory: &'a ItemFactory,
    origin: ClassOrigin,
    ty: TypeId,
    access_flags: AccessFlags,
    super_type: Option<TypeId>,
    interfaces: Vec<TypeId>,
    annotations: AnnotationSet,
    static_fields: Vec<EncodedField>,
    instance_fields: Vec<EncodedField>,
    direct_methods: Vec<EncodedMethod>,
    virtual_methods: Vec<EncodedMethod>,
}

impl<'a> ClassBuilder<'a> {
    pub fn new(factory: &'a ItemFactory, descriptor: &str) -> Self {
        let ty = factory.create_type(descriptor);
        ClassBuilder {
            factory,
            origin: ClassOrigin::Program,
            ty,
            access_flags: AccessFlags::new(AccessFlags::PUBLIC),
            super_type: Some(factory.object_type),
            interfaces: Vec::new(),
            annotations: AnnotationSet::empty(),
            static_fields: Vec::new(),
            instance_fields: Vec::new(),
            direct_methods: Vec::new(),
            virtual_methods: Vec::new(),
        }
    }

    pub fn library(mut self) -> Self {
        self.origin = ClassOrigin::Library;
        self
    }

    pub fn classpath(mut self) -> Self {
        self.origin = ClassOrigin::Classpath;
        self
    }

    pub fn interface(mut self) -> Self {
        self.access_flags.set(AccessFlags::INTERFACE | AccessFlags::ABSTRACT);
        self
    }

    pub fn annotation_interface(mut self) -> Self {
        self.access_flags
            .set(AccessFlags::INTERFACE | AccessFlags::ABSTRACT | AccessFlags::ANNOTATION);
        self
    }

    pub fn enum_class(mut self) -> Self {
        self.access_flags.set(AccessFlags::ENUM);
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.access_flags.set(AccessFlags::ABSTRACT);
        self
    }

    pub fn access_flags(mut self, flags: AccessFlags) -> Self {
        self.access_flags = flags;
        self
    }

    /// Root classes (`java.lang.Object` itself) have no super type.
    pub fn no_super_type(mut self) -> Self {
        self.super_type = None;
        self
    }

    pub fn extends(mut self, descriptor: &str) -> Self {
        self.super_type = Some(self.factory.create_type(descriptor));
        self
    }

    pub fn implements(mut self, descriptor: &str) -> Self {
        self.interfaces.push(self.factory.create_type(descriptor));
        self
    }

    pub fn class_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.annotations.push(annotation);
        self
    }

    fn method(
        &mut self,
        name: &str,
        parameters: &[&str],
        return_type: &str,
        flags: u32,
        code: Option<Code>,
    ) -> &mut EncodedMethod {
        let name = self.factory.create_string(name);
        let params: Vec<TypeId> = parameters
            .iter()
            .map(|p| self.factory.create_type(p))
            .collect();
        let ret = self.factory.create_type(return_type);
        let proto = self.factory.create_proto(ret, &params);
        let method = self.factory.create_method(self.ty, name, proto);
        let encoded = EncodedMethod::new(method, AccessFlags::new(flags), code);
        if encoded.belongs_to_direct_pool() {
            self.direct_methods.push(encoded);
            self.direct_methods.last_mut().unwrap()
        } else {
            self.virtual_methods.push(encoded);
            self.virtual_methods.last_mut().unwrap()
        }
    }

    pub fn virtual_method(mut self, name: &str, parameters: &[&str], return_type: &str) -> Self {
        self.method(name, parameters, return_type, AccessFlags::PUBLIC, None);
        self
    }

    pub fn virtual_method_with_code(
        mut self,
        name: &str,
        parameters: &[&str],
        return_type: &str,
        code: Code,
    ) -> Self {
        self.method(name, parameters, return_type, AccessFlags::PUBLIC, Some(code));
        self
    }

    pub fn private_method_with_code(
        mut self,
        name: &str,
        parameters: &[&str],
        return_type: &str,
        code: Code,
    ) -> Self {
        self.method(name, parameters, return_type, AccessFlags::PRIVATE, Some(code));
        self
    }

    pub fn static_method_with_code(
        mut self,
        name: &str,
        parameters: &[&str],
        return_type: &str,
        code: Code,
    ) -> Self {
        self.method(
            name,
            parameters,
            return_type,
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            Some(code),
        );
        self
    }

    pub fn abstract_method(mut self, name: &str, parameters: &[&str], return_type: &str) -> Self {
        self.method(
            name,
            parameters,
            return_type,
            AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
            None,
        );
        self
    }

    pub fn constructor(mut self, parameters: &[&str]) -> Self {
        self.method(
            "<init>",
            parameters,
            "V",
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
            Some(Code::default()),
        );
        self
    }

    pub fn constructor_with_code(mut self, parameters: &[&str], code: Code) -> Self {
        self.method(
            "<init>",
            parameters,
            "V",
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
            Some(code),
        );
        self
    }

    pub fn class_initializer(mut self, code: Code) -> Self {
        self.method(
            "<clinit>",
            &[],
            "V",
            AccessFlags::STATIC | AccessFlags::CONSTRUCTOR,
            Some(code),
        );
        self
    }

    pub fn method_with_flags(
        mut self,
        name: &str,
        parameters: &[&str],
        return_type: &str,
        flags: u32,
        code: Option<Code>,
    ) -> Self {
        self.method(name, parameters, return_type, flags, code);
        self
    }

    pub fn instance_field(mut self, name: &str, type_descriptor: &str) -> Self {
        let name = self.factory.create_string(name);
        let field_type = self.factory.create_type(type_descriptor);
        let field = self.factory.create_field(self.ty, name, field_type);
        self.instance_fields.push(EncodedField::new(
            field,
            AccessFlags::new(AccessFlags::PUBLIC),
        ));
        self
    }

    pub fn static_field(mut self, name: &str, type_descriptor: &str) -> Self {
        let name = self.factory.create_string(name);
        let field_type = self.factory.create_type(type_descriptor);
        let field = self.factory.create_field(self.ty, name, field_type);
        self.static_fields.push(EncodedField::new(
            field,
            AccessFlags::new(AccessFlags::PUBLIC | AccessFlags::STATIC),
        ));
        self
    }

    pub fn static_field_with_value(
        mut self,
        name: &str,
        type_descriptor: &str,
        value: EncodedValue,
    ) -> Self {
        let name = self.factory.create_string(name);
        let field_type = self.factory.create_type(type_descriptor);
        let field = self.factory.create_field(self.ty, name, field_type);
        let mut encoded = EncodedField::new(
            field,
            AccessFlags::new(AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL),
        );
        encoded.static_value = Some(value);
        self.static_fields.push(encoded);
        self
    }

    pub fn ty(&self) -> TypeId {
        self.ty
    }

    pub fn try_build(self) -> Result<Class, CompileError> {
        let mut class = Class::new(
            self.factory,
            self.origin,
            self.ty,
            self.access_flags,
            self.super_type,
            self.interfaces,
            self.static_fields,
            self.instance_fields,
            self.direct_methods,
            self.virtual_methods,
        )?;
        class.annotations = self.annotations;
        Ok(class)
    }

    pub fn build(self) -> Class {
        self.try_build().expect("invalid class construction")
    }
}
