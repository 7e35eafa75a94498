use super::Flow;
use crate::opcode::OpCode;
use crate::vm::error::VMError;
use crate::vm::VirtualMachine;

pub fn dispatch(vm: &mut VirtualMachine, op: OpCode) -> Result<Flow, VMError> {
    match op {
        OpCode::Jmp => {
            let offset = vm.read_u24() as usize;
            vm.current_frame_mut().ip += offset;
        }
        OpCode::JmpAndPop => {
            let offset = vm.read_u24() as usize;
            vm.pop();
            vm.current_frame_mut().ip += offset;
        }
        OpCode::JmpIfFalse => {
            let offset = vm.read_u24() as usize;
            if vm.peek(0).is_falsey() {
                vm.current_frame_mut().ip += offset;
            }
        }
        OpCode::JmpIfFalsePop => {
            let offset = vm.read_u24() as usize;
            let falsey = vm.pop().is_falsey();
            if falsey {
                vm.current_frame_mut().ip += offset;
            }
        }
        // `or`: truthy short-circuits (jump, keep value); falsey pops and
        // falls through to evaluate the right-hand side.
        OpCode::JmpIfFalseOrPop => {
            let offset = vm.read_u24() as usize;
            if vm.peek(0).is_falsey() {
                vm.pop();
            } else {
                vm.current_frame_mut().ip += offset;
            }
        }
        // `and`: falsey short-circuits (jump, keep value); truthy pops and
        // falls through.
        OpCode::JmpIfFalseAndPop => {
            let offset = vm.read_u24() as usize;
            if vm.peek(0).is_falsey() {
                vm.current_frame_mut().ip += offset;
            } else {
                vm.pop();
            }
        }
        OpCode::Loop => {
            let offset = vm.read_u24() as usize;
            vm.current_frame_mut().ip -= offset;
        }
        _ => unreachable!("control::dispatch called with {:?}", op),
    }
    Ok(Flow::Continue)
}
