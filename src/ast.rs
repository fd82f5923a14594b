use std::{fmt::Display, rc::Rc};

use crate::{
    compilation::{CompilationContext, CompileError},
    interpreter::{context::RuntimeContext, Access, RuntimeError, RuntimeErrorKind},
    registry::{HostMember, MemberKind},
    span::Position,
    types::{Overload, ScriptType, SequenceKind, TypeSystem},
    value::{ScriptValue, Value},
};

/// A compiled script: top-level declarations in source order, then the
/// functions they may call.
#[derive(Debug, Default)]
pub struct Program {
    pub declarations: Vec<Declaration>,
    pub functions: Vec<Function>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Visible to the host; reused if the host already defines it.
    Global,
    /// Must be supplied by the host.
    Extern,
    /// Private to one runtime context.
    Member,
}

#[derive(Debug)]
pub struct Declaration {
    pub storage: Storage,
    pub name: String,
    pub ty: ScriptType,
    pub initializer: Option<Expression>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: ScriptType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub name: String,
    pub returns: ScriptType,
    pub parameters: Vec<Parameter>,
}

impl FunctionSignature {
    pub fn new(name: &str, returns: ScriptType, parameters: &[(&str, ScriptType)]) -> Self {
        Self {
            name: name.to_string(),
            returns,
            parameters: parameters
                .iter()
                .map(|(name, ty)| Parameter {
                    name: name.to_string(),
                    ty: ty.clone(),
                })
                .collect(),
        }
    }
}

impl FunctionSignature {
    pub fn parameter_types(&self) -> impl Iterator<Item = &ScriptType> {
        self.parameters.iter().map(|parameter| &parameter.ty)
    }

    /// Same name, return type and parameter types. Parameter names are
    /// ignored.
    pub fn matches(&self, other: &FunctionSignature) -> bool {
        self.name == other.name && self.returns == other.returns && self.same_parameters(other)
    }

    pub fn same_parameters(&self, other: &FunctionSignature) -> bool {
        self.parameters.len() == other.parameters.len()
            && self.parameter_types().eq(other.parameter_types())
    }
}

impl Overload for FunctionSignature {
    fn accepts(&self, arguments: &[ScriptType], exact: bool, types: &dyn TypeSystem) -> bool {
        arguments.len() == self.parameters.len()
            && self.parameter_types().zip(arguments).all(|(param, argument)| {
                if exact {
                    param == argument
                } else {
                    types.is_assignable_or_convertible(param, argument)
                }
            })
    }
}

impl Display for FunctionSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}(", self.returns, self.name)?;
        for (i, parameter) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", parameter.ty, parameter.name)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug)]
pub struct Function {
    pub signature: FunctionSignature,
    pub body: Vec<Statement>,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Expression(Expression),
    Declaration {
        name: String,
        ty: ScriptType,
        initializer: Option<Expression>,
    },
    Block(Vec<Statement>),
    If(Expression, Box<Statement>, Option<Box<Statement>>),
    While(Expression, Box<Statement>),
    For {
        initializer: Vec<Statement>,
        condition: Option<Expression>,
        increments: Vec<Expression>,
        body: Box<Statement>,
    },
    ForEach {
        name: String,
        ty: ScriptType,
        collection: Expression,
        body: Box<Statement>,
    },
    Switch {
        value: Expression,
        cases: Vec<SwitchCase>,
        default: Option<Vec<Statement>>,
    },
    Break,
    Continue,
    Return(Option<Expression>),
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub labels: Vec<Value>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExprKind,
    pub ty: ScriptType,
    pub position: Position,
    /// Longest path to a leaf, counting this node.
    pub height: usize,
}

impl Expression {
    pub fn new(kind: ExprKind, ty: ScriptType, position: Position) -> Self {
        let height = 1 + kind.children().iter().map(|child| child.height).max().unwrap_or(0);
        Self {
            kind,
            ty,
            position,
            height,
        }
    }

    /// Whether the expression may stand alone as a statement.
    pub fn is_executable(&self) -> bool {
        match &self.kind {
            ExprKind::Assign { .. } | ExprKind::Increment { .. } | ExprKind::Call { .. } => true,
            ExprKind::Host { member, .. } => member.kind == MemberKind::Method,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Value),
    Identifier(IdentifierExpression),
    Unary(UnaryOperator, Box<Expression>),
    Binary {
        left: Box<Expression>,
        operator: InfixOperator,
        right: Box<Expression>,
        /// Common type both operands are widened to.
        operand: ScriptType,
    },
    Logical(Box<Expression>, LogicalOperator, Box<Expression>),
    Ternary {
        condition: Box<Expression>,
        then: Box<Expression>,
        otherwise: Box<Expression>,
    },
    Assign {
        target: AssignTarget,
        operator: Option<CompoundOperator>,
        value: Box<Expression>,
        /// Type a compound operation is computed in.
        operand: ScriptType,
    },
    Increment {
        target: AssignTarget,
        decrement: bool,
        prefix: bool,
    },
    /// Explicit conversion to the expression's type.
    Cast(Box<Expression>),
    /// Script function, by index into `Program::functions`.
    Call {
        function: usize,
        arguments: Vec<Expression>,
    },
    /// Host member; `receiver` is set for instance members.
    Host {
        member: Rc<HostMember>,
        receiver: Option<Box<Expression>>,
        arguments: Vec<Expression>,
    },
    Index {
        collection: Box<Expression>,
        index: Box<Expression>,
    },
    /// A list, queue, stack or array built from its items.
    NewSequence {
        kind: SequenceKind,
        element: ScriptType,
        items: Vec<Expression>,
    },
    /// `new T[length]`, filled with the element default.
    NewArray {
        element: ScriptType,
        length: Box<Expression>,
    },
    NewDictionary {
        key: ScriptType,
        value: ScriptType,
        entries: Vec<(Expression, Expression)>,
    },
}

impl ExprKind {
    /// Direct subexpressions.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            ExprKind::Literal(_) | ExprKind::Identifier(_) => vec![],
            ExprKind::Unary(_, operand) | ExprKind::Cast(operand) => vec![operand.as_ref()],
            ExprKind::Binary { left, right, .. } | ExprKind::Logical(left, _, right) => {
                vec![left.as_ref(), right.as_ref()]
            }
            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => vec![condition.as_ref(), then.as_ref(), otherwise.as_ref()],
            ExprKind::Assign { target, value, .. } => {
                let mut children = target.children();
                children.push(value.as_ref());
                children
            }
            ExprKind::Increment { target, .. } => target.children(),
            ExprKind::Call { arguments, .. } => arguments.iter().collect(),
            ExprKind::Host {
                receiver,
                arguments,
                ..
            } => receiver
                .as_deref()
                .into_iter()
                .chain(arguments.iter())
                .collect(),
            ExprKind::Index { collection, index } => vec![collection.as_ref(), index.as_ref()],
            ExprKind::NewSequence { items, .. } => items.iter().collect(),
            ExprKind::NewArray { length, .. } => vec![length.as_ref()],
            ExprKind::NewDictionary { entries, .. } => entries
                .iter()
                .flat_map(|(key, value)| [key, value])
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Identifier(IdentifierExpression),
    Index {
        collection: Box<Expression>,
        index: Box<Expression>,
    },
}

impl AssignTarget {
    fn children(&self) -> Vec<&Expression> {
        match self {
            AssignTarget::Identifier(_) => vec![],
            AssignTarget::Index { collection, index } => vec![collection.as_ref(), index.as_ref()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Plus,
    Minus,
    Multiply,
    Divide,
    Remainder,
    Power,
}

impl InfixOperator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            InfixOperator::LessThan
                | InfixOperator::LessThanOrEqual
                | InfixOperator::GreaterThan
                | InfixOperator::GreaterThanOrEqual
        )
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, InfixOperator::Equal | InfixOperator::NotEqual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

/// `x op= value`. `&=` and `|=` evaluate both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOperator {
    Arithmetic(InfixOperator),
    And,
    Or,
}

/// A variable reference resolved against the compilation scope. Reads and
/// writes are checked against the declared type at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierExpression {
    pub name: Rc<str>,
    pub declared: ScriptType,
    pub position: Position,
}

impl IdentifierExpression {
    /// Fails when `name` is not declared in a scope visible from here.
    pub fn new(
        name: &str,
        position: Position,
        context: &CompilationContext,
    ) -> Result<Self, CompileError> {
        let declared = context.get_value_type(name, position)?;
        Ok(Self {
            name: Rc::from(name),
            declared,
            position,
        })
    }

    fn error(&self, kind: RuntimeErrorKind) -> RuntimeError {
        RuntimeError::new(kind, self.position)
    }

    fn mismatch(&self, attempted: ScriptType, access: Access) -> RuntimeError {
        self.error(RuntimeErrorKind::TypeMismatch {
            identifier: self.name.to_string(),
            declared: self.declared.clone(),
            attempted,
            access,
        })
    }

    /// The current value, as stored.
    pub fn get(&self, context: &RuntimeContext) -> Result<Value, RuntimeError> {
        context
            .lookup(&self.name)
            .ok_or_else(|| self.error(RuntimeErrorKind::UndefinedVariable(self.name.to_string())))
    }

    /// Reads the value as `T`, which the declared type must convert to.
    pub fn get_as<T: ScriptValue>(&self, context: &RuntimeContext) -> Result<T, RuntimeError> {
        let requested = T::script_type();
        if !context
            .types()
            .is_assignable_or_convertible(&requested, &self.declared)
        {
            return Err(self.mismatch(requested, Access::Read));
        }

        let value = self.get(context)?;
        let found = value.runtime_type();
        T::from_value(value.coerce(&requested)).ok_or_else(|| match found {
            ScriptType::Null => self.error(RuntimeErrorKind::NullValue(self.name.to_string())),
            found => self.mismatch(found, Access::Read),
        })
    }

    /// Stores `value` if its runtime type fits the declared type. The
    /// binding is left untouched on failure.
    pub fn set(&self, context: &mut RuntimeContext, value: Value) -> Result<(), RuntimeError> {
        let attempted = value.runtime_type();
        if !context
            .types()
            .is_assignable_or_convertible(&self.declared, &attempted)
        {
            return Err(self.mismatch(attempted, Access::Write));
        }

        let value = value.coerce(&self.declared);
        if context.assign(&self.name, value) {
            Ok(())
        } else {
            Err(self.error(RuntimeErrorKind::UndefinedVariable(self.name.to_string())))
        }
    }

    pub fn set_as<T: ScriptValue>(
        &self,
        context: &mut RuntimeContext,
        value: T,
    ) -> Result<(), RuntimeError> {
        self.set(context, value.into_value())
    }
}

impl Display for IdentifierExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Display for UnaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOperator::Negate => write!(f, "-"),
            UnaryOperator::Not => write!(f, "!"),
        }
    }
}

impl Display for InfixOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfixOperator::Equal => write!(f, "=="),
            InfixOperator::NotEqual => write!(f, "!="),
            InfixOperator::LessThan => write!(f, "<"),
            InfixOperator::LessThanOrEqual => write!(f, "<="),
            InfixOperator::GreaterThan => write!(f, ">"),
            InfixOperator::GreaterThanOrEqual => write!(f, ">="),
            InfixOperator::Plus => write!(f, "+"),
            InfixOperator::Minus => write!(f, "-"),
            InfixOperator::Multiply => write!(f, "*"),
            InfixOperator::Divide => write!(f, "/"),
            InfixOperator::Remainder => write!(f, "%"),
            InfixOperator::Power => write!(f, "^"),
        }
    }
}

impl Display for LogicalOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalOperator::And => write!(f, "&&"),
            LogicalOperator::Or => write!(f, "||"),
        }
    }
}

impl Display for CompoundOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompoundOperator::Arithmetic(op) => write!(f, "{}=", op),
            CompoundOperator::And => write!(f, "&="),
            CompoundOperator::Or => write!(f, "|="),
        }
    }
}

impl Display for AssignTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignTarget::Identifier(identifier) => write!(f, "{}", identifier),
            AssignTarget::Index { collection, index } => write!(f, "{}[{}]", collection, index),
        }
    }
}

fn comma_separated(f: &mut std::fmt::Formatter<'_>, items: &[Expression]) -> std::fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExprKind::Literal(Value::String(s)) => write!(f, "{:?}", s),
            ExprKind::Literal(value) => write!(f, "{}", value),
            ExprKind::Identifier(identifier) => write!(f, "{}", identifier),
            ExprKind::Unary(op, operand) => write!(f, "{}{}", op, operand),
            ExprKind::Binary {
                left,
                operator,
                right,
                ..
            } => write!(f, "({} {} {})", left, operator, right),
            ExprKind::Logical(left, op, right) => write!(f, "({} {} {})", left, op, right),
            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => write!(f, "({} ? {} : {})", condition, then, otherwise),
            ExprKind::Assign {
                target,
                operator,
                value,
                ..
            } => match operator {
                Some(op) => write!(f, "{} {} {}", target, op, value),
                None => write!(f, "{} = {}", target, value),
            },
            ExprKind::Increment {
                target,
                decrement,
                prefix,
            } => {
                let op = if *decrement { "--" } else { "++" };
                if *prefix {
                    write!(f, "{}{}", op, target)
                } else {
                    write!(f, "{}{}", target, op)
                }
            }
            ExprKind::Cast(operand) => write!(f, "({}){}", self.ty, operand),
            ExprKind::Call {
                function,
                arguments,
            } => {
                write!(f, "<function {}>(", function)?;
                comma_separated(f, arguments)?;
                write!(f, ")")
            }
            ExprKind::Host {
                member,
                receiver,
                arguments,
            } => {
                if let Some(receiver) = receiver {
                    write!(f, "{}.", receiver)?;
                }
                write!(f, "{}", member.name)?;
                if member.kind == MemberKind::Method {
                    write!(f, "(")?;
                    comma_separated(f, arguments)?;
                    write!(f, ")")?;
                }
                Ok(())
            }
            ExprKind::Index { collection, index } => write!(f, "{}[{}]", collection, index),
            ExprKind::NewSequence { items, .. } => {
                write!(f, "new {} {{ ", self.ty)?;
                comma_separated(f, items)?;
                write!(f, " }}")
            }
            ExprKind::NewArray { element, length } => write!(f, "new {}[{}]", element, length),
            ExprKind::NewDictionary { entries, .. } => {
                write!(f, "new {} {{ ", self.ty)?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{{{}, {}}}", key, value)?;
                }
                write!(f, " }}")
            }
        }
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            StatementKind::Expression(expression) => write!(f, "{};", expression),
            StatementKind::Declaration {
                name,
                ty,
                initializer,
            } => match initializer {
                Some(initializer) => write!(f, "{} {} = {};", ty, name, initializer),
                None => write!(f, "{} {};", ty, name),
            },
            StatementKind::Block(statements) => {
                write!(f, "{{ ")?;
                for statement in statements {
                    write!(f, "{} ", statement)?;
                }
                write!(f, "}}")
            }
            StatementKind::If(condition, then_branch, else_branch) => {
                write!(f, "if ({}) {}", condition, then_branch)?;
                if let Some(else_branch) = else_branch {
                    write!(f, " else {}", else_branch)?;
                }
                Ok(())
            }
            StatementKind::While(condition, body) => write!(f, "while ({}) {}", condition, body),
            StatementKind::For {
                condition, body, ..
            } => match condition {
                Some(condition) => write!(f, "for (...; {}; ...) {}", condition, body),
                None => write!(f, "for (...; ; ...) {}", body),
            },
            StatementKind::ForEach {
                name,
                ty,
                collection,
                body,
            } => write!(f, "foreach ({} {} in {}) {}", ty, name, collection, body),
            StatementKind::Switch { value, cases, .. } => {
                write!(f, "switch ({}) {{ {} case(s) }}", value, cases.len())
            }
            StatementKind::Break => write!(f, "break;"),
            StatementKind::Continue => write!(f, "continue;"),
            StatementKind::Return(Some(value)) => write!(f, "return {};", value),
            StatementKind::Return(None) => write!(f, "return;"),
        }
    }
}
