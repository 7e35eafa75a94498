use super::Flow;
use crate::opcode::OpCode;
use crate::vm::error::VMError;
use crate::vm::VirtualMachine;

/// Size in bytes of the `JMP offset` instruction `for_statement` places
/// between `FOREACH_PREP` and `FOREACH` (1 opcode byte + a 24-bit operand) --
/// `FOREACH_PREP` skips straight over it when the iterator isn't exhausted.
const JMP_INSTRUCTION_LEN: usize = 4;

pub fn dispatch(vm: &mut VirtualMachine, op: OpCode) -> Result<Flow, VMError> {
    match op {
        OpCode::ForeachPrep => foreach_prep(vm)?,
        OpCode::Foreach => foreach_commit(vm),
        _ => unreachable!("foreach::dispatch called with {:?}", op),
    }
    Ok(Flow::Continue)
}

/// Calls the loop's iterator with the control variable's previous value,
/// requesting `vars` return values. A `Nil` first result means the iterator
/// is exhausted: the scratch results are discarded and execution falls
/// through into the `JMP` that exits the loop. Otherwise the scratch values
/// are left in place and `FOREACH_PREP` jumps over that `JMP`, landing on
/// `FOREACH`, which commits them into the loop-variable slots.
fn foreach_prep(vm: &mut VirtualMachine) -> Result<(), VMError> {
    let vars = vm.read_byte() as usize;
    let sp0 = vm.sp();
    let key_slot = sp0 - vars;
    let iter_value = vm.stack[key_slot - 1];
    let key_value = vm.stack[key_slot];
    let callee_slot = sp0;
    vm.push(iter_value);
    vm.push(key_value);
    vm.call_value(callee_slot, 1, vars as u32)?;
    let exhausted = vm.stack[callee_slot].is_nil();
    if exhausted {
        vm.pop_n(vars);
    } else {
        vm.current_frame_mut().ip += JMP_INSTRUCTION_LEN;
    }
    Ok(())
}

fn foreach_commit(vm: &mut VirtualMachine) {
    let vars = vm.read_byte() as usize;
    let scratch_start = vm.sp() - vars;
    let key_slot = scratch_start - vars;
    for i in 0..vars {
        vm.stack[key_slot + i] = vm.stack[scratch_start + i];
    }
    vm.pop_n(vars);
}
