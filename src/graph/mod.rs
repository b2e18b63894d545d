// Program graph: interned items, classes, code, and the application-level
// indices the whole-program phases operate on.

mod application;
pub mod builder;
mod class;
mod code;
mod factory;
mod lens;
mod publicizer;

pub use application::{Application, ApplicationBuilder};
pub use builder::ClassBuilder;
pub use class::{
    AccessFlags, Annotation, AnnotationElement, AnnotationSet, Class, ClassOrigin, EncodedField,
    EncodedMethod, EncodedValue,
};
pub use code::{Code, Instruction, MoveKind, UseRegistry};
pub use factory::{
    descriptor_to_java, is_valid_class_descriptor, java_to_descriptor, FieldId, ItemFactory,
    MethodId, ProtoId, StringId, TypeId, TypeKind,
};
pub use lens::{ItemOrdering, NamingLens};
pub use publicizer::publicize;
