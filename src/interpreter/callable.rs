use std::fmt::Display;

use crate::{
    ast::Function,
    registry::HostMember,
    span::Position,
    types::ScriptType,
    value::Value,
};

use super::{At, Flow, Interpreter, RuntimeError, RuntimeErrorKind};

/// Anything a call expression can land on.
#[derive(Debug, Clone, Copy)]
pub enum Callable<'f> {
    Script(&'f Function),
    Host(&'f HostMember),
}

impl Callable<'_> {
    pub fn arity(&self) -> usize {
        match self {
            Callable::Script(function) => function.signature.parameters.len(),
            Callable::Host(member) => member.params.len(),
        }
    }

    /// Invokes the callable with already evaluated arguments. Script
    /// functions run in a fresh frame that can only see members and globals.
    pub fn call(
        &self,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
        position: Position,
    ) -> Result<Value, RuntimeError> {
        match self {
            Callable::Script(function) => call_script(function, interpreter, arguments, position),
            Callable::Host(member) => (member.call)(&*interpreter.context, &arguments).at(position),
        }
    }
}

fn call_script(
    function: &Function,
    interpreter: &mut Interpreter,
    arguments: Vec<Value>,
    position: Position,
) -> Result<Value, RuntimeError> {
    let signature = &function.signature;
    if arguments.len() != signature.parameters.len() {
        return Err(RuntimeError::new(
            RuntimeErrorKind::ArgumentCount {
                name: signature.name.clone(),
                expected: signature.parameters.len(),
                found: arguments.len(),
            },
            position,
        ));
    }

    interpreter.context.enter_call().at(position)?;
    tracing::trace!(function = %signature, "enter");

    let result = (|| {
        for (index, (parameter, value)) in signature.parameters.iter().zip(arguments).enumerate() {
            let found = value.runtime_type();
            if !interpreter
                .context
                .types()
                .is_assignable_or_convertible(&parameter.ty, &found)
            {
                return Err(RuntimeError::new(
                    RuntimeErrorKind::ArgumentType {
                        name: signature.name.clone(),
                        index,
                        expected: parameter.ty.clone(),
                        found,
                    },
                    position,
                ));
            }
            interpreter
                .context
                .declare(&parameter.name, parameter.ty.clone(), value.coerce(&parameter.ty));
        }

        match interpreter.execute_all(&function.body)? {
            Flow::Return(Some(value)) => Ok(value.coerce(&signature.returns)),
            _ if signature.returns == ScriptType::Void => Ok(Value::Null),
            _ => Err(RuntimeError::new(
                RuntimeErrorKind::MissingReturn(signature.name.clone()),
                function.position,
            )),
        }
    })();

    interpreter.context.exit_call();
    result
}

impl Display for Callable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Script(function) => write!(f, "<function {}>", function.signature),
            Callable::Host(member) => write!(f, "<host {}>", member.signature()),
        }
    }
}
