use std::rc::Rc;

use hostscript::{
    interpreter::RuntimeErrorKind, CompiledExpression, HostRegistry, Script, ScriptType,
    TypeSystem, Value,
};
use proptest::prelude::*;

fn types() -> Rc<dyn TypeSystem> {
    Rc::new(HostRegistry::new())
}

proptest! {
    /// Arbitrary text must come back as Ok or Err, never as a panic.
    #[test]
    fn compiler_does_not_panic(s in "\\PC*") {
        let result = std::panic::catch_unwind(|| {
            let _ = Script::compile(&s, types());
        });
        prop_assert!(result.is_ok());
    }

    #[test]
    fn function_bodies_do_not_panic(s in "\\PC*") {
        let source = format!("void Main() {{ {} }}", s);
        let result = std::panic::catch_unwind(|| {
            let _ = Script::compile(&source, types());
        });
        prop_assert!(result.is_ok());
    }

    #[test]
    fn int_addition_is_checked(a in any::<i32>(), b in any::<i32>()) {
        let expression = CompiledExpression::compile(
            "a + b",
            types(),
            &[("a", ScriptType::Int), ("b", ScriptType::Int)],
        )
        .unwrap();
        let mut context = expression.new_context();
        context.define_global("a", ScriptType::Int, Value::Int(a)).unwrap();
        context.define_global("b", ScriptType::Int, Value::Int(b)).unwrap();

        match (a.checked_add(b), expression.evaluate(&mut context)) {
            (Some(sum), Ok(Value::Int(value))) => prop_assert_eq!(sum, value),
            (None, Err(error)) => {
                prop_assert!(matches!(error.kind, RuntimeErrorKind::Overflow(_)))
            }
            (expected, found) => prop_assert!(false, "expected {:?}, found {:?}", expected, found),
        }
    }
}
