use rustc_hash::FxHashMap;

use crate::{
    span::Position,
    token::TokenKind,
    tokenizer::{TokenizeError, TokenizeErrorKind},
    types::{MemberError, ScriptType},
    value::Value,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} at {position}{}", breadcrumbs(.context))]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub position: Position,
    /// Parser rules active when the error was raised, outermost first.
    pub context: Vec<&'static str>,
}

fn breadcrumbs(context: &[&'static str]) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(" (while parsing {})", context.join(" > "))
    }
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, position: Position) -> Self {
        Self {
            kind,
            position,
            context: vec![],
        }
    }
}

impl From<TokenizeError> for CompileError {
    fn from(error: TokenizeError) -> Self {
        Self::new(CompileErrorKind::Lexical(error.kind), error.position)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileErrorKind {
    #[error("{0}")]
    Lexical(TokenizeErrorKind),
    #[error("Expected {expected} but found \"{found}\"")]
    Expected { expected: String, found: TokenKind },
    #[error("Unexpected \"{0}\"")]
    Unexpected(TokenKind),
    #[error("\"{0}\" is already declared")]
    DuplicateDeclaration(String),
    #[error("\"{0}\" used without declaring")]
    UndeclaredIdentifier(String),
    #[error("Unknown type \"{0}\"")]
    UnknownType(String),
    #[error("Generic type \"{0}\" needs type arguments")]
    UnappliedGeneric(String),
    #[error("\"{name}\" takes {expected} type argument(s), found {found}")]
    GenericArity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Cannot declare \"{0}\" as void")]
    VoidDeclaration(String),
    #[error("Expected {expected} but found {found} in {context}")]
    TypeMismatch {
        expected: ScriptType,
        found: ScriptType,
        context: &'static str,
    },
    #[error("Operator \"{operator}\" cannot be applied to {left} and {right}")]
    InvalidOperands {
        operator: String,
        left: ScriptType,
        right: ScriptType,
    },
    #[error("Operator \"{operator}\" cannot be applied to {operand}")]
    InvalidOperand {
        operator: String,
        operand: ScriptType,
    },
    #[error("Cannot cast {from} to {to}")]
    InvalidCast { from: ScriptType, to: ScriptType },
    #[error("Left side of assignment is not assignable")]
    NotAssignable,
    #[error("Only assignments, increments, calls and constructions may be used as statements")]
    NotAStatement,
    #[error("\"break\" outside of a loop or switch")]
    BreakOutsideLoop,
    #[error("\"continue\" outside of a loop")]
    ContinueOutsideLoop,
    #[error("Function returning {0} must return a value")]
    MissingReturnValue(ScriptType),
    #[error("Void function cannot return a value")]
    UnexpectedReturnValue,
    #[error("Duplicate case label {0}")]
    DuplicateCase(String),
    #[error("Switch has more than one default section")]
    MultipleDefaults,
    #[error("{owner}.{name}: {error}")]
    Member {
        owner: String,
        name: String,
        error: MemberError,
    },
    #[error("Invalid arguments to {member}: {reason}")]
    InvalidArguments { member: String, reason: String },
    #[error("Unknown function \"{0}\"")]
    UnknownFunction(String),
    #[error("Function \"{name}\" takes {expected} argument(s), found {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Constant \"{0}\" must be initialized with a literal")]
    ConstantNotLiteral(String),
    #[error("Function \"{0}\" is not a value")]
    FunctionAsValue(String),
    #[error("Entry point \"{0}\" is not defined")]
    MissingFunction(String),
    #[error("{0} cannot be indexed")]
    NotIndexable(ScriptType),
    #[error("{0} cannot be iterated")]
    NotIterable(ScriptType),
    #[error("{0} is not callable")]
    NotCallable(String),
    #[error("Source nests too deeply (limit {0})")]
    NestingTooDeep(usize),
    #[error("{name}: {error}")]
    Overload { name: String, error: MemberError },
}

#[derive(Debug, Clone)]
pub enum Symbol {
    Variable(ScriptType),
    /// Folded into the tree wherever it is read.
    Constant(Value, ScriptType),
    /// Indices into the program's function table, one per overload.
    Function(Vec<usize>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Breakable {
    Loop,
    Switch,
}

/// Compile-time view of what is declared where. Lives only while one unit
/// is being compiled.
#[derive(Debug)]
pub struct CompilationContext {
    scopes: Vec<FxHashMap<String, Symbol>>,
    breakables: Vec<Breakable>,
    return_type: Option<ScriptType>,
}

impl Default for CompilationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilationContext {
    pub fn new() -> Self {
        Self {
            scopes: vec![FxHashMap::default()],
            breakables: vec![],
            return_type: None,
        }
    }

    /// Declares `name` in the innermost scope. Names still visible from an
    /// enclosing scope cannot be redeclared.
    pub fn declare(
        &mut self,
        name: &str,
        symbol: Symbol,
        position: Position,
    ) -> Result<(), CompileError> {
        if self.lookup(name).is_some() {
            return Err(CompileError::new(
                CompileErrorKind::DuplicateDeclaration(name.to_string()),
                position,
            ));
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), symbol);
        }
        Ok(())
    }

    /// Adds an overload to the function `name` declared at the outermost
    /// scope, declaring it if this is the first.
    pub fn declare_function(
        &mut self,
        name: &str,
        index: usize,
        position: Position,
    ) -> Result<(), CompileError> {
        let outermost = self.scopes.first_mut().and_then(|scope| scope.get_mut(name));
        if let Some(Symbol::Function(overloads)) = outermost {
            overloads.push(index);
            return Ok(());
        }
        self.declare(name, Symbol::Function(vec![index]), position)
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// The declared type of a variable or constant.
    pub fn get_value_type(&self, name: &str, position: Position) -> Result<ScriptType, CompileError> {
        match self.lookup(name) {
            Some(Symbol::Variable(ty)) | Some(Symbol::Constant(_, ty)) => Ok(ty.clone()),
            Some(Symbol::Function(_)) => Err(CompileError::new(
                CompileErrorKind::FunctionAsValue(name.to_string()),
                position,
            )),
            None => Err(CompileError::new(
                CompileErrorKind::UndeclaredIdentifier(name.to_string()),
                position,
            )),
        }
    }

    pub fn begin_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    pub fn end_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn begin_loop(&mut self) {
        self.breakables.push(Breakable::Loop);
    }

    pub fn begin_switch(&mut self) {
        self.breakables.push(Breakable::Switch);
    }

    pub fn end_breakable(&mut self) {
        self.breakables.pop();
    }

    pub fn can_break(&self) -> bool {
        !self.breakables.is_empty()
    }

    pub fn can_continue(&self) -> bool {
        self.breakables.contains(&Breakable::Loop)
    }

    /// Enters a function body; returns the enclosing function's return type.
    pub fn begin_function(&mut self, returns: ScriptType) -> Option<ScriptType> {
        self.return_type.replace(returns)
    }

    pub fn end_function(&mut self, enclosing: Option<ScriptType>) {
        self.return_type = enclosing;
    }

    pub fn return_type(&self) -> Option<&ScriptType> {
        self.return_type.as_ref()
    }
}
