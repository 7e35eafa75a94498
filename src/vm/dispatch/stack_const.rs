use super::Flow;
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::error::VMError;
use crate::vm::VirtualMachine;

pub fn dispatch(vm: &mut VirtualMachine, op: OpCode) -> Result<Flow, VMError> {
    match op {
        OpCode::Pop => {
            vm.pop();
        }
        OpCode::PopN => {
            let n = vm.read_byte() as usize;
            vm.pop_n(n);
        }
        OpCode::Const => {
            let idx = vm.read_byte() as usize;
            vm.push(vm.read_constant(idx));
        }
        OpCode::ConstL => {
            let idx = vm.read_u24() as usize;
            vm.push(vm.read_constant(idx));
        }
        OpCode::Nil => vm.push(Value::Nil),
        OpCode::NilN => {
            let n = vm.read_byte() as usize;
            for _ in 0..n {
                vm.push(Value::Nil);
            }
        }
        OpCode::True => vm.push(Value::Bool(true)),
        OpCode::False => vm.push(Value::Bool(false)),
        _ => unreachable!("stack_const::dispatch called with {:?}", op),
    }
    Ok(Flow::Continue)
}
