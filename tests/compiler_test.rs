//! Compile-time diagnostics: panic-mode recovery, one error per real
//! mistake, and the specific messages this grammar raises.

use skooma::vm::{LogLevel, VirtualMachine};

fn compile_errors(source: &str) -> Vec<String> {
    let mut vm = VirtualMachine::new(LogLevel::Release);
    match vm.compile(source) {
        Ok(_) => Vec::new(),
        Err(errors) => errors.iter().map(|e| e.message.clone()).collect(),
    }
}

#[test]
fn well_formed_source_compiles_without_errors() {
    assert!(compile_errors("var x = 1 + 2;").is_empty());
}

#[test]
fn class_cannot_inherit_from_itself() {
    let errors = compile_errors("class A : A {}");
    assert!(errors.iter().any(|m| m.contains("can't inherit from itself")));
}

#[test]
fn return_outside_a_function_is_rejected() {
    let errors = compile_errors("return 1;");
    assert!(errors.iter().any(|m| m.contains("Can't return from top-level code")));
}

#[test]
fn initializer_cannot_return_a_value() {
    let errors = compile_errors(
        r#"
        class A {
            __init__() {
                return 1;
            }
        }
        "#,
    );
    assert!(errors.iter().any(|m| m.contains("Can't return a value from an initializer")));
}

#[test]
fn self_outside_a_method_is_rejected() {
    let errors = compile_errors("fn f() { return self; }");
    assert!(errors.iter().any(|m| m.contains("Can't use 'self' outside of a class method")));
}

#[test]
fn super_without_a_superclass_is_rejected() {
    let errors = compile_errors(
        r#"
        class A {
            m() {
                return super.m();
            }
        }
        "#,
    );
    assert!(errors.iter().any(|m| m.contains("Can't use 'super' in a class with no superclass")));
}

#[test]
fn panic_mode_recovers_and_reports_more_than_one_error() {
    let errors = compile_errors("var = ; var = ;");
    assert!(errors.len() >= 2, "panic-mode recovery should resynchronize past the first error: {errors:?}");
}

#[test]
fn redeclaring_a_local_in_the_same_scope_is_rejected() {
    let errors = compile_errors(
        r#"
        fn f() {
            var x = 1;
            var x = 2;
        }
        "#,
    );
    assert!(errors.iter().any(|m| m.contains("Already a variable with this name in this scope")));
}
