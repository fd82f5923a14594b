//! Compiled units: whole scripts with declarations and functions, and
//! single expressions.

use std::rc::Rc;

use tracing::debug;

use crate::{
    ast::{Declaration, Expression, FunctionSignature, Program, Storage},
    compilation::{CompileError, CompileErrorKind},
    interpreter::{
        context::{GlobalContext, RuntimeContext},
        At, Interpreter, RuntimeError, RuntimeErrorKind,
    },
    parser,
    span::Position,
    tokenizer,
    types::{self, ScriptType, TypeSystem},
    value::{ScriptValue, Value},
};

/// A global a script defines or requires.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub name: String,
    pub ty: ScriptType,
}

/// A compiled script. Immutable; prepare and call it against any number of
/// runtime contexts.
pub struct Script {
    program: Program,
    types: Rc<dyn TypeSystem>,
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script").field("program", &self.program).finish()
    }
}

impl Script {
    pub fn compile(source: &str, types: Rc<dyn TypeSystem>) -> Result<Self, CompileError> {
        debug!(bytes = source.len(), "compiling script");
        let tokens = tokenizer::tokenize(source, types.as_ref())?;
        let program = parser::program(&tokens, types.as_ref())?;
        debug!(
            declarations = program.declarations.len(),
            functions = program.functions.len(),
            "compiled script"
        );
        Ok(Self { program, types })
    }

    /// Compiles and checks that a function matching each signature exists.
    /// Parameter names are not compared.
    pub fn compile_with_entry_points(
        source: &str,
        types: Rc<dyn TypeSystem>,
        entry_points: &[FunctionSignature],
    ) -> Result<Self, CompileError> {
        let script = Self::compile(source, types)?;
        if let Some(missing) = entry_points
            .iter()
            .find(|entry| !script.functions().any(|signature| signature.matches(entry)))
        {
            return Err(CompileError::new(
                CompileErrorKind::MissingFunction(missing.to_string()),
                Position::default(),
            ));
        }
        Ok(script)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionSignature> {
        self.program.functions.iter().map(|function| &function.signature)
    }

    /// The first function declared with `name`.
    pub fn function(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions().find(|signature| signature.name == name)
    }

    /// Every overload of `name`, in declaration order.
    pub fn overloads<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'s FunctionSignature> {
        self.functions().filter(move |signature| signature.name == name)
    }

    fn keys(&self, storage: Storage) -> impl Iterator<Item = Key> + '_ {
        self.program
            .declarations
            .iter()
            .filter(move |declaration| declaration.storage == storage)
            .map(|declaration| Key {
                name: declaration.name.clone(),
                ty: declaration.ty.clone(),
            })
    }

    /// Globals the script makes visible to the host.
    pub fn declarations(&self) -> impl Iterator<Item = Key> + '_ {
        self.keys(Storage::Global)
    }

    /// Externs the host has to provide.
    pub fn dependencies(&self) -> impl Iterator<Item = Key> + '_ {
        self.keys(Storage::Extern)
    }

    /// A fresh context over the types the script was compiled against.
    pub fn new_context(&self) -> RuntimeContext {
        RuntimeContext::new(self.types.clone())
    }

    /// A context whose globals are shared with other scripts' contexts.
    pub fn new_context_in(&self, globals: &Rc<GlobalContext>) -> RuntimeContext {
        RuntimeContext::with_globals(Rc::clone(globals))
    }

    /// Runs the top-level declarations in source order. Members are
    /// (re)initialized; globals that already exist with the same type keep
    /// their value.
    pub fn prepare(&self, context: &mut RuntimeContext) -> Result<(), RuntimeError> {
        debug!(
            declarations = self.program.declarations.len(),
            "preparing script"
        );
        if context.is_idle() {
            context.reset_limits();
        }

        let mut interpreter = Interpreter::new(&self.program.functions, context);
        for declaration in &self.program.declarations {
            prepare_declaration(&mut interpreter, declaration)?;
        }
        Ok(())
    }

    /// Calls a function by name. Returns `None` for `void` functions.
    ///
    /// An overloaded name is resolved against the runtime types of
    /// `arguments`, the way calls inside a script are.
    pub fn call(
        &self,
        name: &str,
        context: &mut RuntimeContext,
        arguments: &[Value],
    ) -> Result<Option<Value>, RuntimeError> {
        let index = self.resolve_call(name, context, arguments)?;
        let function = &self.program.functions[index];

        debug!(function = %function.signature, "calling script function");
        if context.is_idle() {
            context.reset_limits();
        }

        let mut interpreter = Interpreter::new(&self.program.functions, context);
        let value = interpreter.call(index, arguments.to_vec(), function.position)?;
        Ok((function.signature.returns != ScriptType::Void).then_some(value))
    }

    fn resolve_call(
        &self,
        name: &str,
        context: &RuntimeContext,
        arguments: &[Value],
    ) -> Result<usize, RuntimeError> {
        let candidates: Vec<usize> = self
            .program
            .functions
            .iter()
            .enumerate()
            .filter(|(_, function)| function.signature.name == name)
            .map(|(index, _)| index)
            .collect();

        match candidates.as_slice() {
            [] => Err(RuntimeError::new(
                RuntimeErrorKind::UnknownFunction(name.to_string()),
                Position::default(),
            )),
            [only] => Ok(*only),
            many => {
                let signatures: Vec<&FunctionSignature> = many
                    .iter()
                    .map(|index| &self.program.functions[*index].signature)
                    .collect();
                let argument_types: Vec<ScriptType> =
                    arguments.iter().map(Value::runtime_type).collect();
                types::select_overload(context.types(), &signatures, &argument_types)
                    .map(|chosen| many[chosen])
                    .map_err(|error| {
                        RuntimeError::new(
                            RuntimeErrorKind::Overload {
                                name: name.to_string(),
                                error,
                            },
                            Position::default(),
                        )
                    })
            }
        }
    }

    /// Calls a function and reads its result as `T`.
    pub fn call_as<T: ScriptValue>(
        &self,
        name: &str,
        context: &mut RuntimeContext,
        arguments: &[Value],
    ) -> Result<T, RuntimeError> {
        let value = self.call(name, context, arguments)?.unwrap_or(Value::Null);
        convert(value, Position::default())
    }
}

fn initial_value(
    interpreter: &mut Interpreter,
    declaration: &Declaration,
) -> Result<Value, RuntimeError> {
    Ok(match &declaration.initializer {
        Some(initializer) => interpreter.evaluate(initializer)?.coerce(&declaration.ty),
        None => Value::default_for(&declaration.ty),
    })
}

fn prepare_declaration(
    interpreter: &mut Interpreter,
    declaration: &Declaration,
) -> Result<(), RuntimeError> {
    let (name, ty, position) = (&declaration.name, &declaration.ty, declaration.position);
    let existing = interpreter
        .context()
        .global(name)
        .map(|binding| binding.ty);

    match (declaration.storage, existing) {
        (Storage::Member, _) => {
            let value = initial_value(interpreter, declaration)?;
            interpreter.context().define_member(name, ty.clone(), value);
        }
        (Storage::Global | Storage::Extern, Some(existing)) if existing == *ty => {}
        (Storage::Global, Some(existing)) => {
            return Err(RuntimeError::new(
                RuntimeErrorKind::GlobalTypeConflict {
                    name: name.clone(),
                    existing,
                    declared: ty.clone(),
                },
                position,
            ))
        }
        (Storage::Extern, Some(found)) => {
            return Err(RuntimeError::new(
                RuntimeErrorKind::ExternTypeMismatch {
                    name: name.clone(),
                    expected: ty.clone(),
                    found,
                },
                position,
            ))
        }
        (Storage::Extern, None) if declaration.initializer.is_none() => {
            return Err(RuntimeError::new(
                RuntimeErrorKind::ExternMissing {
                    name: name.clone(),
                    ty: ty.clone(),
                },
                position,
            ))
        }
        (Storage::Global | Storage::Extern, None) => {
            let value = initial_value(interpreter, declaration)?;
            interpreter
                .context()
                .define_global(name, ty.clone(), value)
                .at(position)?;
        }
    }
    Ok(())
}

fn convert<T: ScriptValue>(value: Value, position: Position) -> Result<T, RuntimeError> {
    let requested = T::script_type();
    let found = value.runtime_type();
    T::from_value(value.coerce(&requested)).ok_or_else(|| {
        let kind = match found {
            ScriptType::Null => RuntimeErrorKind::NullValue("result".to_string()),
            found => RuntimeErrorKind::UnexpectedValue {
                expected: requested,
                found,
            },
        };
        RuntimeError::new(kind, position)
    })
}

/// A single expression over named inputs, such as a host-configured
/// condition. Inputs are read from the context's globals.
pub struct CompiledExpression {
    expression: Expression,
    types: Rc<dyn TypeSystem>,
}

impl std::fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CompiledExpression({})", self.expression)
    }
}

impl CompiledExpression {
    pub fn compile(
        source: &str,
        types: Rc<dyn TypeSystem>,
        parameters: &[(&str, ScriptType)],
    ) -> Result<Self, CompileError> {
        debug!(bytes = source.len(), "compiling expression");
        let tokens = tokenizer::tokenize(source, types.as_ref())?;
        let expression = parser::standalone_expression(&tokens, types.as_ref(), parameters)?;
        Ok(Self { expression, types })
    }

    /// The static type of the expression.
    pub fn ty(&self) -> &ScriptType {
        &self.expression.ty
    }

    pub fn new_context(&self) -> RuntimeContext {
        RuntimeContext::new(self.types.clone())
    }

    pub fn evaluate(&self, context: &mut RuntimeContext) -> Result<Value, RuntimeError> {
        if context.is_idle() {
            context.reset_limits();
        }
        Interpreter::new(&[], context).evaluate(&self.expression)
    }

    /// Evaluates and reads the result as `T`, which the expression's type
    /// must convert to.
    pub fn evaluate_as<T: ScriptValue>(&self, context: &mut RuntimeContext) -> Result<T, RuntimeError> {
        let requested = T::script_type();
        if !self
            .types
            .is_assignable_or_convertible(&requested, &self.expression.ty)
        {
            return Err(RuntimeError::new(
                RuntimeErrorKind::UnexpectedValue {
                    expected: requested,
                    found: self.expression.ty.clone(),
                },
                self.expression.position,
            ));
        }
        let value = self.evaluate(context)?;
        convert(value, self.expression.position)
    }
}
