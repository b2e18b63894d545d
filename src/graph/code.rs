// Register-based method bodies.
//
// The dex instruction set is represented as one tagged enum instead of one
// type per opcode; only the operands that carry pool references matter to
// the whole-program phases, so formats are collapsed to their reference
// payload plus enough shape for the codec to re-emit them.

use crate::graph::factory::{FieldId, MethodId, StringId, TypeId};

/// Width/kind tag for moves over untyped registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Single,
    Wide,
    Object,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Nop,
    Move { kind: MoveKind, dest: u16, src: u16 },
    Const { dest: u16, value: i64 },
    ConstString { dest: u16, value: StringId },
    ConstClass { dest: u16, ty: TypeId },
    CheckCast { reg: u16, ty: TypeId },
    InstanceOf { dest: u16, reg: u16, ty: TypeId },
    NewInstance { dest: u16, ty: TypeId },
    NewArray { dest: u16, size: u16, ty: TypeId },
    InvokeVirtual { method: MethodId, args: Vec<u16> },
    InvokeSuper { method: MethodId, args: Vec<u16> },
    InvokeDirect { method: MethodId, args: Vec<u16> },
    InvokeStatic { method: MethodId, args: Vec<u16> },
    InvokeInterface { method: MethodId, args: Vec<u16> },
    InstanceGet { dest: u16, object: u16, field: FieldId },
    InstancePut { src: u16, object: u16, field: FieldId },
    StaticGet { dest: u16, field: FieldId },
    StaticPut { src: u16, field: FieldId },
    Goto { offset: i32 },
    IfEqz { reg: u16, offset: i32 },
    Throw { reg: u16 },
    ReturnVoid,
    Return { reg: u16 },
}

/// Receiver for the pool references a piece of code mentions. The enqueuer
/// and the call-graph builder both traverse code through this interface.
pub trait UseRegistry {
    fn register_invoke_virtual(&mut self, method: MethodId);
    fn register_invoke_super(&mut self, method: MethodId);
    fn register_invoke_direct(&mut self, method: MethodId);
    fn register_invoke_static(&mut self, method: MethodId);
    fn register_invoke_interface(&mut self, method: MethodId);
    fn register_instance_field_read(&mut self, field: FieldId);
    fn register_instance_field_write(&mut self, field: FieldId);
    fn register_static_field_read(&mut self, field: FieldId);
    fn register_static_field_write(&mut self, field: FieldId);
    fn register_new_instance(&mut self, ty: TypeId);
    fn register_type_reference(&mut self, ty: TypeId);
    fn register_string_reference(&mut self, _string: StringId) {}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Code {
    pub register_count: u16,
    pub instructions: Vec<Instruction>,
}

impl Code {
    pub fn new(register_count: u16, instructions: Vec<Instruction>) -> Self {
        Code {
            register_count,
            instructions,
        }
    }

    pub fn is_empty_void_method(&self) -> bool {
        self.instructions.iter().all(|insn| {
            matches!(insn, Instruction::Nop | Instruction::ReturnVoid)
        })
    }

    pub fn register_references(&self, registry: &mut dyn UseRegistry) {
        for insn in &self.instructions {
            match insn {
                Instruction::ConstString { value, .. } => {
                    registry.register_string_reference(*value);
                }
                Instruction::ConstClass { ty, .. }
                | Instruction::CheckCast { ty, .. }
                | Instruction::InstanceOf { ty, .. }
                | Instruction::NewArray { ty, .. } => {
                    registry.register_type_reference(*ty);
                }
                Instruction::NewInstance { ty, .. } => {
                    registry.register_new_instance(*ty);
                }
                Instruction::InvokeVirtual { method, .. } => {
                    registry.register_invoke_virtual(*method);
                }
                Instruction::InvokeSuper { method, .. } => {
                    registry.register_invoke_super(*method);
                }
                Instruction::InvokeDirect { method, .. } => {
                    registry.register_invoke_direct(*method);
                }
                Instruction::InvokeStatic { method, .. } => {
                    registry.register_invoke_static(*method);
                }
                Instruction::InvokeInterface { method, .. } => {
                    registry.register_invoke_interface(*method);
                }
                Instruction::InstanceGet { field, .. } => {
                    registry.register_instance_field_read(*field);
                }
                Instruction::InstancePut { field, .. } => {
                    registry.register_instance_field_write(*field);
                }
                Instruction::StaticGet { field, .. } => {
                    registry.register_static_field_read(*field);
                }
                Instruction::StaticPut { field, .. } => {
                    registry.register_static_field_write(*field);
                }
                Instruction::Nop
                | Instruction::Move { .. }
                | Instruction::Const { .. }
                | Instruction::Goto { .. }
                | Instruction::IfEqz { .. }
                | Instruction::Throw { .. }
                | Instruction::ReturnVoid
                | Instruction::Return { .. } => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::factory::ItemFactory;

    #[derive(Default)]
    struct CountingRegistry {
        invokes: usize,
        field_ops: usize,
        new_instances: usize,
    }

    impl UseRegistry for CountingRegistry {
        fn register_invoke_virtual(&mut self, _: MethodId) {
            self.invokes += 1;
        }
        fn register_invoke_super(&mut self, _: MethodId) {
            self.invokes += 1;
        }
        fn register_invoke_direct(&mut self, _: MethodId) {
            self.invokes += 1;
        }
        fn register_invoke_static(&mut self, _: MethodId) {
            self.invokes += 1;
        }
        fn register_invoke_interface(&mut self, _: MethodId) {
            self.invokes += 1;
        }
        fn register_instance_field_read(&mut self, _: FieldId) {
            self.field_ops += 1;
        }
        fn register_instance_field_write(&mut self, _: FieldId) {
            self.field_ops += 1;
        }
        fn register_static_field_read(&mut self, _: FieldId) {
            self.field_ops += 1;
        }
        fn register_static_field_write(&mut self, _: FieldId) {
            self.field_ops += 1;
        }
        fn register_new_instance(&mut self, _: TypeId) {
            self.new_instances += 1;
        }
        fn register_type_reference(&mut self, _: TypeId) {}
    }

    #[test]
    fn code_walk_reports_references() {
        let factory = ItemFactory::new();
        let ty = factory.create_type("Lcom/example/Foo;");
        let name = factory.create_string("m");
        let proto = factory.create_proto(factory.void_type, &[]);
        let method = factory.create_method(ty, name, proto);
        let field = factory.create_field(ty, factory.create_string("f"), factory.void_type);

        let code = Code::new(
            2,
            vec![
                Instruction::NewInstance { dest: 0, ty },
                Instruction::InvokeVirtual {
                    method,
                    args: vec![0],
                },
                Instruction::StaticGet { dest: 1, field },
                Instruction::ReturnVoid,
            ],
        );
        let mut registry = CountingRegistry::default();
        code.register_references(&mut registry);
        assert_eq!(registry.invokes, 1);
        assert_eq!(registry.field_ops, 1);
        assert_eq!(registry.new_instances, 1);
    }

    #[test]
    fn empty_void_method_detection() {
        let code = Code::new(0, vec![Instruction::ReturnVoid]);
        assert!(code.is_empty_void_method());
        let code = Code::new(
            0,
            vec![Instruction::Const { dest: 0, value: 1 }, Instruction::ReturnVoid],
        );
        assert!(!code.is_empty_void_method());
    }
}
