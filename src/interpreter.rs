pub mod callable;
pub mod context;
pub mod monitor;

use std::fmt::Display;

#[cfg(feature = "trace")]
use tracing::trace;

use crate::{
    ast::{
        AssignTarget, CompoundOperator, ExprKind, Expression, Function, IdentifierExpression,
        InfixOperator, LogicalOperator, Statement, StatementKind, UnaryOperator,
    },
    format::FormatError,
    span::Position,
    types::{MemberError, ScriptType, SequenceKind},
    value::{DictionaryRef, ListRef, ScriptValue, Value},
};

use self::{callable::Callable, context::RuntimeContext, monitor::Checkpoint};

#[derive(Debug, thiserror::Error)]
#[error("{kind} at {position}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub position: Position,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, position: Position) -> Self {
        Self { kind, position }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("Cannot {access} \"{identifier}\" (declared {declared}) as {attempted}")]
    TypeMismatch {
        identifier: String,
        declared: ScriptType,
        attempted: ScriptType,
        access: Access,
    },
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("Division by zero")]
    DivideByZero,
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),
    #[error("Negative integer exponent: {0}")]
    NegativeExponent(i64),
    #[error("Index {index} out of range for length {length}")]
    IndexOutOfRange { index: i64, length: usize },
    #[error("Cannot cast {from} to {to}")]
    InvalidCast { from: ScriptType, to: ScriptType },
    #[error("Null value: {0}")]
    NullValue(String),
    #[error("Expected a value of type {expected}, found {found}")]
    UnexpectedValue {
        expected: ScriptType,
        found: ScriptType,
    },
    #[error("Extern \"{name}\" of type {ty} was not provided")]
    ExternMissing { name: String, ty: ScriptType },
    #[error("Extern \"{name}\" is declared {expected} but the host provided {found}")]
    ExternTypeMismatch {
        name: String,
        expected: ScriptType,
        found: ScriptType,
    },
    #[error("Global \"{name}\" already exists as {existing}, cannot redeclare as {declared}")]
    GlobalTypeConflict {
        name: String,
        existing: ScriptType,
        declared: ScriptType,
    },
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Function \"{name}\" takes {expected} argument(s), {found} given")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Argument {index} of \"{name}\" expects {expected}, found {found}")]
    ArgumentType {
        name: String,
        index: usize,
        expected: ScriptType,
        found: ScriptType,
    },
    #[error("Function \"{0}\" ended without returning a value")]
    MissingReturn(String),
    #[error("Step limit of {0} exceeded")]
    StepLimitExceeded(u64),
    #[error("Execution deadline exceeded")]
    DeadlineExceeded,
    #[error("Call depth limit of {0} exceeded")]
    CallDepthExceeded(usize),
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    #[error("An entry with key {0} already exists")]
    DuplicateKey(String),
    #[error("{0} called on an empty collection")]
    EmptyCollection(String),
    #[error("Array length cannot be negative: {0}")]
    NegativeLength(i32),
    #[error("{name}: {error}")]
    Overload { name: String, error: MemberError },
    #[error("{0}")]
    Host(String),
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Attaches a position to errors raised below the tree level.
pub(crate) trait At<T> {
    fn at(self, position: Position) -> Result<T, RuntimeError>;
}

impl<T> At<T> for Result<T, RuntimeErrorKind> {
    fn at(self, position: Position) -> Result<T, RuntimeError> {
        self.map_err(|kind| RuntimeError::new(kind, position))
    }
}

/// How control leaves a statement.
#[derive(Debug, Clone)]
pub enum Flow {
    Normal,
    Break,
    Continue,
    Return(Option<Value>),
}

/// Something that can be read and then written back, for assignments and
/// increments.
enum Place<'e> {
    Variable(&'e IdentifierExpression),
    Element(ListRef, i32),
    Entry(DictionaryRef, Value),
}

impl Place<'_> {
    fn read(&self, context: &RuntimeContext, position: Position) -> Result<Value, RuntimeError> {
        match self {
            Place::Variable(identifier) => identifier.get(context),
            Place::Element(list, index) => list.get(*index).at(position),
            Place::Entry(map, key) => map.get(key).at(position),
        }
    }

    fn write(
        &self,
        context: &mut RuntimeContext,
        value: Value,
        position: Position,
    ) -> Result<Value, RuntimeError> {
        match self {
            Place::Variable(identifier) => {
                let value = value.coerce(&identifier.declared);
                identifier.set(context, value.clone())?;
                Ok(value)
            }
            Place::Element(list, index) => {
                let value = checked_store(context, &list.element, value, position)?;
                list.set(*index, value.clone()).at(position)?;
                Ok(value)
            }
            Place::Entry(map, key) => {
                let value = checked_store(context, &map.value, value, position)?;
                map.set(key.clone(), value.clone()).at(position)?;
                Ok(value)
            }
        }
    }
}

/// Widens `value` for storage in an `element` slot, rejecting values whose
/// runtime type does not fit.
fn checked_store(
    context: &RuntimeContext,
    element: &ScriptType,
    value: Value,
    position: Position,
) -> Result<Value, RuntimeError> {
    let found = value.runtime_type();
    if !context.types().is_assignable_or_convertible(element, &found) {
        return Err(RuntimeError::new(
            RuntimeErrorKind::UnexpectedValue {
                expected: element.clone(),
                found,
            },
            position,
        ));
    }
    Ok(value.coerce(element))
}

/// A collection value an index expression applies to.
enum Indexed {
    Sequence(ListRef),
    Dictionary(DictionaryRef),
}

/// Remaining stack below which evaluation continues on a fresh segment.
const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROW_SIZE: usize = 1024 * 1024;

/// Walks a compiled tree against one runtime context.
pub struct Interpreter<'a> {
    functions: &'a [Function],
    context: &'a mut RuntimeContext,
}

impl<'a> Interpreter<'a> {
    pub fn new(functions: &'a [Function], context: &'a mut RuntimeContext) -> Self {
        Self { functions, context }
    }

    pub fn context(&mut self) -> &mut RuntimeContext {
        self.context
    }

    /// Calls the script function at `index` in the function table.
    pub fn call(
        &mut self,
        index: usize,
        arguments: Vec<Value>,
        position: Position,
    ) -> Result<Value, RuntimeError> {
        let functions = self.functions;
        let function = functions.get(index).ok_or_else(|| {
            RuntimeError::new(
                RuntimeErrorKind::UnknownFunction(format!("#{}", index)),
                position,
            )
        })?;
        Callable::Script(function).call(self, arguments, position)
    }

    pub fn execute(&mut self, statement: &Statement) -> Result<Flow, RuntimeError> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.execute_inner(statement))
    }

    fn execute_inner(&mut self, statement: &Statement) -> Result<Flow, RuntimeError> {
        #[cfg(feature = "trace")]
        trace!(at = %statement.position, "execute");

        let position = statement.position;
        match &statement.kind {
            StatementKind::Expression(expression) => {
                self.evaluate(expression)?;
                Ok(Flow::Normal)
            }
            StatementKind::Declaration {
                name,
                ty,
                initializer,
            } => {
                let value = match initializer {
                    Some(initializer) => self.evaluate(initializer)?.coerce(ty),
                    None => Value::default_for(ty),
                };
                self.context.declare(name, ty.clone(), value);
                Ok(Flow::Normal)
            }
            StatementKind::Block(statements) => {
                self.execute_in_scope(|interpreter| interpreter.execute_all(statements))
            }
            StatementKind::If(condition, then, otherwise) => {
                let (mut condition, mut then, mut otherwise) = (condition, then, otherwise);
                loop {
                    if self.condition(condition)? {
                        return self.execute(then);
                    }
                    match otherwise.as_deref() {
                        Some(Statement {
                            kind: StatementKind::If(next, next_then, next_otherwise),
                            ..
                        }) => {
                            condition = next;
                            then = next_then;
                            otherwise = next_otherwise;
                        }
                        Some(otherwise) => return self.execute(otherwise),
                        None => return Ok(Flow::Normal),
                    }
                }
            }
            StatementKind::While(condition, body) => {
                while self.condition(condition)? {
                    self.checkpoint(position)?;
                    match self.execute(body)? {
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StatementKind::For {
                initializer,
                condition,
                increments,
                body,
            } => self.execute_in_scope(|interpreter| {
                for statement in initializer {
                    interpreter.execute(statement)?;
                }
                loop {
                    if let Some(condition) = condition {
                        if !interpreter.condition(condition)? {
                            break;
                        }
                    }
                    interpreter.checkpoint(position)?;
                    match interpreter.execute(body)? {
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                        Flow::Normal | Flow::Continue => {}
                    }
                    for increment in increments {
                        interpreter.evaluate(increment)?;
                    }
                }
                Ok(Flow::Normal)
            }),
            StatementKind::ForEach {
                name,
                ty,
                collection,
                body,
            } => {
                // Iterates over the items present when the loop starts.
                let items = match self.indexed(collection)? {
                    Indexed::Sequence(list) => list.snapshot(),
                    Indexed::Dictionary(map) => map
                        .entries
                        .borrow()
                        .iter()
                        .map(|(key, _)| key.clone())
                        .collect(),
                };
                for item in items {
                    self.checkpoint(position)?;
                    let flow = self.execute_in_scope(|interpreter| {
                        interpreter.context.declare(name, ty.clone(), item.coerce(ty));
                        interpreter.execute(body)
                    })?;
                    match flow {
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StatementKind::Switch {
                value,
                cases,
                default,
            } => {
                let value = self.evaluate(value)?;
                let section = cases
                    .iter()
                    .find(|case| case.labels.iter().any(|label| label.script_equals(&value)))
                    .map(|case| &case.body)
                    .or(default.as_ref());
                let Some(section) = section else {
                    return Ok(Flow::Normal);
                };
                match self.execute_in_scope(|interpreter| interpreter.execute_all(section))? {
                    Flow::Break => Ok(Flow::Normal),
                    flow => Ok(flow),
                }
            }
            StatementKind::Break => Ok(Flow::Break),
            StatementKind::Continue => Ok(Flow::Continue),
            StatementKind::Return(value) => Ok(Flow::Return(match value {
                Some(value) => Some(self.evaluate(value)?),
                None => None,
            })),
        }
    }

    /// Runs statements in order until one leaves abnormally.
    pub fn execute_all(&mut self, statements: &[Statement]) -> Result<Flow, RuntimeError> {
        for statement in statements {
            match self.execute(statement)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// The scope is popped whether or not `f` succeeds.
    fn execute_in_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        self.context.push_scope();
        let result = f(self);
        self.context.pop_scope();
        result
    }

    fn checkpoint(&mut self, position: Position) -> Result<(), RuntimeError> {
        self.context.checkpoint(Checkpoint::LoopIteration).at(position)
    }

    fn condition(&mut self, condition: &Expression) -> Result<bool, RuntimeError> {
        self.evaluate(condition)?.as_bool().at(condition.position)
    }

    fn indexed(&mut self, expression: &Expression) -> Result<Indexed, RuntimeError> {
        match self.evaluate(expression)? {
            Value::List(list) => Ok(Indexed::Sequence(list)),
            Value::Dictionary(map) => Ok(Indexed::Dictionary(map)),
            Value::Null => Err(RuntimeError::new(
                RuntimeErrorKind::NullValue(expression.to_string()),
                expression.position,
            )),
            other => Err(RuntimeError::new(
                RuntimeErrorKind::UnexpectedValue {
                    expected: expression.ty.clone(),
                    found: other.runtime_type(),
                },
                expression.position,
            )),
        }
    }

    fn index(&mut self, index: &Expression) -> Result<i32, RuntimeError> {
        self.evaluate(index)?.as_int().at(index.position)
    }

    fn place<'e>(&mut self, target: &'e AssignTarget) -> Result<Place<'e>, RuntimeError> {
        match target {
            AssignTarget::Identifier(identifier) => Ok(Place::Variable(identifier)),
            AssignTarget::Index { collection, index } => match self.indexed(collection)? {
                Indexed::Sequence(list) => Ok(Place::Element(list, self.index(index)?)),
                Indexed::Dictionary(map) => Ok(Place::Entry(map, self.evaluate(index)?)),
            },
        }
    }

    pub fn evaluate(&mut self, expression: &Expression) -> Result<Value, RuntimeError> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.evaluate_inner(expression))
    }

    fn evaluate_inner(&mut self, expression: &Expression) -> Result<Value, RuntimeError> {
        let position = expression.position;
        match &expression.kind {
            ExprKind::Literal(value) => Ok(value.clone()),
            ExprKind::Identifier(identifier) => identifier.get(self.context),
            ExprKind::Unary(operator, operand) => {
                let value = self.evaluate(operand)?;
                unary(*operator, value).at(position)
            }
            ExprKind::Binary {
                left,
                operator,
                right,
                operand,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                binary(*operator, operand, left, right).at(position)
            }
            ExprKind::Logical(left, operator, right) => {
                let decided = self.condition(left)?;
                match (operator, decided) {
                    (LogicalOperator::And, false) => Ok(Value::Bool(false)),
                    (LogicalOperator::Or, true) => Ok(Value::Bool(true)),
                    _ => Ok(Value::Bool(self.condition(right)?)),
                }
            }
            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => {
                let branch = if self.condition(condition)? {
                    then
                } else {
                    otherwise
                };
                Ok(self.evaluate(branch)?.coerce(&expression.ty))
            }
            ExprKind::Assign {
                target,
                operator,
                value,
                operand,
            } => {
                let place = self.place(target)?;
                let value = match operator {
                    None => self.evaluate(value)?,
                    Some(operator) => {
                        let current = place.read(self.context, position)?;
                        let value = self.evaluate(value)?;
                        compound(*operator, operand, current, value).at(position)?
                    }
                };
                place.write(self.context, value, position)
            }
            ExprKind::Increment {
                target,
                decrement,
                prefix,
            } => {
                let place = self.place(target)?;
                let current = place.read(self.context, position)?;
                let operator = if *decrement {
                    InfixOperator::Minus
                } else {
                    InfixOperator::Plus
                };
                let updated = binary(operator, &expression.ty, current.clone(), Value::Int(1))
                    .at(position)?;
                let updated = place.write(self.context, updated, position)?;
                Ok(if *prefix { updated } else { current })
            }
            ExprKind::Cast(operand) => {
                let value = self.evaluate(operand)?;
                value.cast(&expression.ty, self.context.types()).at(position)
            }
            ExprKind::Call {
                function,
                arguments,
            } => {
                let arguments = self.evaluate_all(arguments)?;
                self.call(*function, arguments, position)
            }
            ExprKind::Host {
                member,
                receiver,
                arguments,
            } => {
                let mut values = Vec::with_capacity(arguments.len() + 1);
                if let Some(receiver) = receiver {
                    let value = self.evaluate(receiver)?;
                    if value.is_null() {
                        return Err(RuntimeError::new(
                            RuntimeErrorKind::NullValue(format!("{}.{}", receiver, member.name)),
                            receiver.position,
                        ));
                    }
                    values.push(value);
                }
                for (i, argument) in arguments.iter().enumerate() {
                    let value = self.evaluate(argument)?;
                    values.push(match member.parameter_type(i) {
                        Some(ty) => value.coerce(ty),
                        None => value,
                    });
                }
                Callable::Host(member.as_ref()).call(self, values, position)
            }
            ExprKind::Index { collection, index } => match self.indexed(collection)? {
                Indexed::Sequence(list) => {
                    let index = self.index(index)?;
                    list.get(index).at(position)
                }
                Indexed::Dictionary(map) => {
                    let key = self.evaluate(index)?;
                    map.get(&key).at(position)
                }
            },
            ExprKind::NewSequence {
                kind,
                element,
                items,
            } => {
                let items = items
                    .iter()
                    .map(|item| Ok(self.evaluate(item)?.coerce(element)))
                    .collect::<Result<Vec<_>, RuntimeError>>()?;
                Ok(Value::List(ListRef::with_kind(*kind, element.clone(), items)))
            }
            ExprKind::NewArray { element, length } => {
                let length = self.index(length)?;
                let length = usize::try_from(length)
                    .map_err(|_| RuntimeError::new(RuntimeErrorKind::NegativeLength(length), position))?;
                let mut items = Vec::new();
                items.try_reserve_exact(length).map_err(|error| {
                    RuntimeError::new(RuntimeErrorKind::Host(error.to_string()), position)
                })?;
                items.resize(length, Value::default_for(element));
                Ok(Value::List(ListRef::with_kind(
                    SequenceKind::Array,
                    element.clone(),
                    items,
                )))
            }
            ExprKind::NewDictionary {
                key,
                value,
                entries,
            } => {
                let map = DictionaryRef::new(key.clone(), value.clone());
                for (key, value) in entries {
                    let key_value = self.evaluate(key)?;
                    let value = self.evaluate(value)?;
                    map.add(key_value, value).at(key.position)?;
                }
                Ok(Value::Dictionary(map))
            }
        }
    }

    fn evaluate_all(&mut self, expressions: &[Expression]) -> Result<Vec<Value>, RuntimeError> {
        expressions
            .iter()
            .map(|expression| self.evaluate(expression))
            .collect()
    }
}

fn unary(operator: UnaryOperator, value: Value) -> Result<Value, RuntimeErrorKind> {
    match (operator, value) {
        (UnaryOperator::Not, value) => Ok(Value::Bool(!value.as_bool()?)),
        (UnaryOperator::Negate, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| RuntimeErrorKind::Overflow(format!("-({})", i))),
        (UnaryOperator::Negate, Value::Long(l)) => l
            .checked_neg()
            .map(Value::Long)
            .ok_or_else(|| RuntimeErrorKind::Overflow(format!("-({})", l))),
        (UnaryOperator::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOperator::Negate, Value::Double(d)) => Ok(Value::Double(-d)),
        (UnaryOperator::Negate, other) => Err(RuntimeErrorKind::UnexpectedValue {
            expected: ScriptType::Double,
            found: other.runtime_type(),
        }),
    }
}

fn compare<T: PartialOrd>(operator: InfixOperator, a: T, b: T) -> Option<bool> {
    Some(match operator {
        InfixOperator::LessThan => a < b,
        InfixOperator::LessThanOrEqual => a <= b,
        InfixOperator::GreaterThan => a > b,
        InfixOperator::GreaterThanOrEqual => a >= b,
        _ => return None,
    })
}

macro_rules! integral {
    ($name:ident, $t:ty) => {
        fn $name(operator: InfixOperator, a: $t, b: $t) -> Result<Value, RuntimeErrorKind> {
            if let Some(result) = compare(operator, a, b) {
                return Ok(Value::Bool(result));
            }
            let result = match operator {
                InfixOperator::Plus => a.checked_add(b),
                InfixOperator::Minus => a.checked_sub(b),
                InfixOperator::Multiply => a.checked_mul(b),
                InfixOperator::Divide | InfixOperator::Remainder if b == 0 => {
                    return Err(RuntimeErrorKind::DivideByZero)
                }
                InfixOperator::Divide => a.checked_div(b),
                InfixOperator::Remainder => a.checked_rem(b),
                InfixOperator::Power if b < 0 => {
                    return Err(RuntimeErrorKind::NegativeExponent(b as i64))
                }
                InfixOperator::Power => u32::try_from(b).ok().and_then(|b| a.checked_pow(b)),
                other => {
                    return Err(RuntimeErrorKind::Host(format!(
                        "operator {} is not arithmetic",
                        other
                    )))
                }
            };
            result
                .map(ScriptValue::into_value)
                .ok_or_else(|| RuntimeErrorKind::Overflow(format!("{} {} {}", a, operator, b)))
        }
    };
}

macro_rules! floating {
    ($name:ident, $t:ty) => {
        fn $name(operator: InfixOperator, a: $t, b: $t) -> Result<Value, RuntimeErrorKind> {
            if let Some(result) = compare(operator, a, b) {
                return Ok(Value::Bool(result));
            }
            let result = match operator {
                InfixOperator::Plus => a + b,
                InfixOperator::Minus => a - b,
                InfixOperator::Multiply => a * b,
                InfixOperator::Divide => a / b,
                InfixOperator::Remainder => a % b,
                InfixOperator::Power => a.powf(b),
                other => {
                    return Err(RuntimeErrorKind::Host(format!(
                        "operator {} is not arithmetic",
                        other
                    )))
                }
            };
            Ok(result.into_value())
        }
    };
}

integral!(int_arithmetic, i32);
integral!(long_arithmetic, i64);
floating!(float_arithmetic, f32);
floating!(double_arithmetic, f64);

/// `left operator right`, with both sides widened to `operand` first.
pub(crate) fn binary(
    operator: InfixOperator,
    operand: &ScriptType,
    left: Value,
    right: Value,
) -> Result<Value, RuntimeErrorKind> {
    let (left, right) = (left.coerce(operand), right.coerce(operand));
    if operator.is_equality() {
        let equal = left.script_equals(&right);
        return Ok(Value::Bool(equal == (operator == InfixOperator::Equal)));
    }
    if *operand == ScriptType::String {
        return Ok(Value::string(format!(
            "{}{}",
            left.to_script_string(),
            right.to_script_string()
        )));
    }

    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_arithmetic(operator, a, b),
        (Value::Long(a), Value::Long(b)) => long_arithmetic(operator, a, b),
        (Value::Float(a), Value::Float(b)) => float_arithmetic(operator, a, b),
        (Value::Double(a), Value::Double(b)) => double_arithmetic(operator, a, b),
        (Value::Null, _) | (_, Value::Null) => Err(RuntimeErrorKind::NullValue(format!(
            "operand of {}",
            operator
        ))),
        (left, _) => Err(RuntimeErrorKind::UnexpectedValue {
            expected: operand.clone(),
            found: left.runtime_type(),
        }),
    }
}

fn compound(
    operator: CompoundOperator,
    operand: &ScriptType,
    current: Value,
    value: Value,
) -> Result<Value, RuntimeErrorKind> {
    match operator {
        CompoundOperator::Arithmetic(operator) => binary(operator, operand, current, value),
        CompoundOperator::And => Ok(Value::Bool(current.as_bool()? & value.as_bool()?)),
        CompoundOperator::Or => Ok(Value::Bool(current.as_bool()? | value.as_bool()?)),
    }
}
