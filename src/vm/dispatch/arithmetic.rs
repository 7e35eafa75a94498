use super::Flow;
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::error::{ErrorKind, VMError};
use crate::vm::VirtualMachine;

pub fn dispatch(vm: &mut VirtualMachine, op: OpCode) -> Result<Flow, VMError> {
    match op {
        OpCode::Neg => {
            let v = vm.pop();
            match v {
                Value::Number(n) => vm.push(Value::Number(-n)),
                _ => return Err(vm.error(ErrorKind::BadBinop { op: "-" })),
            }
        }
        OpCode::Not => {
            let v = vm.pop();
            vm.push(Value::Bool(v.is_falsey()));
        }
        OpCode::Add => add(vm)?,
        OpCode::Sub => numeric_binop(vm, "-", |a, b| a - b)?,
        OpCode::Mul => numeric_binop(vm, "*", |a, b| a * b)?,
        OpCode::Div => numeric_binop(vm, "/", |a, b| a / b)?,
        OpCode::Mod => modulo(vm)?,
        OpCode::Pow => numeric_binop(vm, "^", f64::powf)?,
        OpCode::Equal => {
            let b = vm.pop();
            let a = vm.pop();
            vm.push(Value::Bool(a == b));
        }
        OpCode::NotEqual => {
            let b = vm.pop();
            let a = vm.pop();
            vm.push(Value::Bool(a != b));
        }
        // Peek-equality: a fast-path variant this compiler never emits
        // (every `==` goes through `EQUAL`); implemented identically so the
        // opcode is still correct if something else emits it.
        OpCode::Eq => {
            let b = vm.pop();
            let a = vm.pop();
            vm.push(Value::Bool(a == b));
        }
        OpCode::Less => compare(vm, "<", |o| o == std::cmp::Ordering::Less)?,
        OpCode::LessEqual => compare(vm, "<=", |o| o != std::cmp::Ordering::Greater)?,
        OpCode::Greater => compare(vm, ">", |o| o == std::cmp::Ordering::Greater)?,
        OpCode::GreaterEqual => compare(vm, ">=", |o| o != std::cmp::Ordering::Less)?,
        _ => unreachable!("arithmetic::dispatch called with {:?}", op),
    }
    Ok(Flow::Continue)
}

fn numeric_binop(vm: &mut VirtualMachine, op: &'static str, f: impl Fn(f64, f64) -> f64) -> Result<(), VMError> {
    let b = vm.pop();
    let a = vm.pop();
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            vm.push(Value::Number(f(x, y)));
            Ok(())
        }
        _ => Err(vm.error(ErrorKind::BadBinop { op })),
    }
}

fn modulo(vm: &mut VirtualMachine) -> Result<(), VMError> {
    let b = vm.pop();
    let a = vm.pop();
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let yi = y.trunc() as i64;
            if yi == 0 {
                return Err(vm.error(ErrorKind::BadArg("division by zero in '%'".to_string())));
            }
            let xi = x.trunc() as i64;
            vm.push(Value::Number(xi.rem_euclid(yi) as f64));
            Ok(())
        }
        _ => Err(vm.error(ErrorKind::BadBinop { op: "%" })),
    }
}

fn add(vm: &mut VirtualMachine) -> Result<(), VMError> {
    let b = vm.pop();
    let a = vm.pop();
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => vm.push(Value::Number(x + y)),
        (Value::Object(_), Value::Object(_)) if a.is_string() && b.is_string() => {
            let sa = crate::object::string_contents(match a {
                Value::Object(p) => p,
                _ => unreachable!(),
            });
            let sb = crate::object::string_contents(match b {
                Value::Object(p) => p,
                _ => unreachable!(),
            });
            let concatenated = format!("{sa}{sb}");
            let ptr = vm.heap.alloc_string(concatenated);
            vm.push(Value::Object(ptr));
        }
        _ => return Err(vm.error(ErrorKind::BadBinop { op: "+" })),
    }
    Ok(())
}

fn compare(vm: &mut VirtualMachine, op: &'static str, accept: impl Fn(std::cmp::Ordering) -> bool) -> Result<(), VMError> {
    let b = vm.pop();
    let a = vm.pop();
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let ord = x.partial_cmp(&y).ok_or_else(|| vm.error(ErrorKind::BadCompare))?;
            vm.push(Value::Bool(accept(ord)));
            Ok(())
        }
        _ => Err(vm.error(ErrorKind::BadBinop { op })),
    }
}
