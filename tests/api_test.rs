//! Exercises `skooma::api::Api` directly, as a host embedding the
//! interpreter would: no script source, just stack pushes/pops and global
//! table access.

use skooma::api::{Api, ValueTag};
use skooma::vm::{LogLevel, VirtualMachine};

#[test]
fn push_and_inspect_scalars() {
    let mut vm = VirtualMachine::new(LogLevel::Release);
    let mut api = Api::new(&mut vm);
    api.push_nil();
    api.push_bool(true);
    api.push_number(3.5);
    api.push_string("hi");

    assert_eq!(api.get_top(), 4);
    assert!(api.is_nil(-4));
    assert_eq!(api.get_bool(-3), Some(true));
    assert_eq!(api.get_number(-2), Some(3.5));
    assert_eq!(api.get_string(-1), Some("hi"));
    assert_eq!(api.type_of(-1), Some(ValueTag::String));
    assert_eq!(api.typename(-2), "number");
}

#[test]
fn set_and_get_global() {
    let mut vm = VirtualMachine::new(LogLevel::Release);
    let mut api = Api::new(&mut vm);
    api.push_number(42.0);
    let status = api.set_global("answer", false);
    assert_eq!(status, skooma::vm::error::Status::Ok);

    assert_eq!(api.get_global("answer"), Some(ValueTag::Number));
    assert_eq!(api.get_number(-1), Some(42.0));

    assert_eq!(api.get_global("missing"), None);
}

#[test]
fn redefining_a_global_reports_status() {
    let mut vm = VirtualMachine::new(LogLevel::Release);
    let mut api = Api::new(&mut vm);
    api.push_number(1.0);
    assert_eq!(api.set_global("x", false), skooma::vm::error::Status::Ok);
    api.push_number(2.0);
    assert_eq!(api.set_global("x", false), skooma::vm::error::Status::GlobalRedef);
}

#[test]
fn calling_a_script_defined_function_through_the_api() {
    let mut vm = VirtualMachine::new(LogLevel::Release);
    skooma::std_lib::install(&mut vm);
    vm.interpret("fn add(a, b) { return a + b; }").unwrap();

    let mut api = Api::new(&mut vm);
    assert!(api.push_global("add"));
    api.push_number(10.0);
    api.push_number(32.0);
    api.call(2, Some(1)).expect("call should succeed");
    assert_eq!(api.get_number(-1), Some(42.0));
}

#[test]
fn pcall_converts_a_runtime_error_into_a_status() {
    let mut vm = VirtualMachine::new(LogLevel::Release);
    skooma::std_lib::install(&mut vm);
    vm.interpret("fn boom() { return 1 + nil; }").unwrap();

    let mut api = Api::new(&mut vm);
    assert!(api.push_global("boom"));
    let status = api.pcall(0, Some(1));
    assert_eq!(status, skooma::vm::error::Status::BadBinop);
    assert!(api.is_string(-1));
}

#[test]
fn fields_on_a_script_instance_are_readable_and_writable() {
    let mut vm = VirtualMachine::new(LogLevel::Release);
    skooma::std_lib::install(&mut vm);
    vm.interpret(
        r#"
        class Point {
            __init__(x, y) {
                self.x = x;
                self.y = y;
            }
        }
        var p = Point(1, 2);
        "#,
    )
    .unwrap();

    let mut api = Api::new(&mut vm);
    assert!(api.push_global("p"));
    assert_eq!(api.get_field(-1, "x"), Some(ValueTag::Number));
    assert_eq!(api.get_number(-1), Some(1.0));
    api.set_top(1); // drop the fetched field value, keep just the instance

    api.push_number(99.0);
    assert_eq!(api.set_field(-2, "x"), skooma::vm::error::Status::Ok);
    assert_eq!(api.get_field(-1, "x"), Some(ValueTag::Number));
    assert_eq!(api.get_number(-1), Some(99.0));
}

#[test]
fn native_function_registered_through_push_cfn_is_callable_from_the_stack() {
    fn double(vm: &mut VirtualMachine, _argc: usize) -> Result<usize, skooma::vm::error::VMError> {
        let mut api = Api::new(vm);
        let n = api.get_number(-1).unwrap_or(0.0);
        api.push_number(n * 2.0);
        Ok(1)
    }

    let mut vm = VirtualMachine::new(LogLevel::Release);
    let mut api = Api::new(&mut vm);
    api.push_cfn("double", double, 1, false);
    api.push_number(21.0);
    api.call(1, Some(1)).expect("native call should succeed");
    assert_eq!(api.get_number(-1), Some(42.0));
}
