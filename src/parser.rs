use std::{cell::RefCell, rc::Rc};

use crate::{
    ast::{
        AssignTarget, CompoundOperator, Declaration, ExprKind, Expression, Function,
        FunctionSignature, IdentifierExpression, InfixOperator, LogicalOperator, Parameter,
        Program, Statement, StatementKind, Storage, SwitchCase, UnaryOperator,
    },
    compilation::{CompilationContext, CompileError, CompileErrorKind, Symbol},
    registry::HostMember,
    span::Position,
    token::{Keyword, Literal, Operator, Separator, Token, TokenKind},
    types::{self, MemberError, MemberOwner, ScriptType, SequenceKind, TypeRef, TypeSystem},
    value::Value,
};

type Parsed<'a, T> = Result<(T, &'a [Token]), CompileError>;

/// Active rule limit. One level of parentheses costs about a dozen rules.
pub const MAX_RULE_DEPTH: usize = 256;

/// Tallest expression tree accepted. Bounds left-leaning chains such as
/// `a + b + c + ...`, which parse in a loop but evaluate recursively.
pub const MAX_EXPRESSION_HEIGHT: usize = 256;

struct ParseContext<'t> {
    stack: RefCell<Vec<&'static str>>,
    compilation: RefCell<CompilationContext>,
    types: &'t dyn TypeSystem,
    signatures: Vec<FunctionSignature>,
}

impl<'t> ParseContext<'t> {
    fn new(types: &'t dyn TypeSystem) -> Self {
        Self {
            stack: RefCell::new(vec![]),
            compilation: RefCell::new(CompilationContext::new()),
            types,
            signatures: vec![],
        }
    }

    /// Enters a rule. Fails once more than `MAX_RULE_DEPTH` rules are
    /// active, which bounds how deeply the source may nest.
    fn push(&self, name: &'static str) -> Result<ParseContextGuard<'_, 't>, CompileError> {
        if self.stack.borrow().len() >= MAX_RULE_DEPTH {
            return Err(self.error(
                CompileErrorKind::NestingTooDeep(MAX_RULE_DEPTH),
                Position::default(),
            ));
        }
        self.stack.borrow_mut().push(name);
        Ok(ParseContextGuard::new(self, |context| {
            context.stack.borrow_mut().pop();
        }))
    }

    /// Opens a block scope for as long as the guard lives.
    fn scope(&self) -> ParseContextGuard<'_, 't> {
        self.compilation.borrow_mut().begin_scope();
        ParseContextGuard::new(self, |context| context.compilation.borrow_mut().end_scope())
    }

    fn enter_loop(&self) -> ParseContextGuard<'_, 't> {
        self.compilation.borrow_mut().begin_loop();
        ParseContextGuard::new(self, |context| {
            context.compilation.borrow_mut().end_breakable()
        })
    }

    fn enter_switch(&self) -> ParseContextGuard<'_, 't> {
        self.compilation.borrow_mut().begin_switch();
        ParseContextGuard::new(self, |context| {
            context.compilation.borrow_mut().end_breakable()
        })
    }

    fn error(&self, kind: CompileErrorKind, position: Position) -> CompileError {
        CompileError {
            kind,
            position,
            context: self.stack.borrow().clone(),
        }
    }

    /// Attaches the breadcrumbs to errors raised outside the parser.
    fn locate(&self, mut error: CompileError) -> CompileError {
        if error.context.is_empty() {
            error.context = self.stack.borrow().clone();
        }
        error
    }

    fn unexpected(&self, tokens: &[Token]) -> CompileError {
        let (kind, position) = describe(tokens);
        self.error(CompileErrorKind::Unexpected(kind), position)
    }

    fn expected(&self, expected: impl Into<String>, tokens: &[Token]) -> CompileError {
        let (found, position) = describe(tokens);
        self.error(
            CompileErrorKind::Expected {
                expected: expected.into(),
                found,
            },
            position,
        )
    }

    fn declare(&self, name: &str, symbol: Symbol, position: Position) -> Result<(), CompileError> {
        self.compilation
            .borrow_mut()
            .declare(name, symbol, position)
            .map_err(|error| self.locate(error))
    }

    fn lookup(&self, name: &str) -> Option<Symbol> {
        self.compilation.borrow().lookup(name).cloned()
    }

    fn expect_assignable(
        &self,
        target: &ScriptType,
        expression: &Expression,
        what: &'static str,
    ) -> Result<(), CompileError> {
        if self
            .types
            .is_assignable_or_convertible(target, &expression.ty)
        {
            Ok(())
        } else {
            Err(self.error(
                CompileErrorKind::TypeMismatch {
                    expected: target.clone(),
                    found: expression.ty.clone(),
                    context: what,
                },
                expression.position,
            ))
        }
    }

    fn resolve_member(
        &self,
        owner: MemberOwner<'_>,
        name: &str,
        arguments: Option<&[Expression]>,
        position: Position,
    ) -> Result<Rc<HostMember>, CompileError> {
        let argument_types: Option<Vec<ScriptType>> =
            arguments.map(|arguments| arguments.iter().map(|a| a.ty.clone()).collect());
        let member = self
            .types
            .resolve_member(owner, name, argument_types.as_deref())
            .map_err(|error| self.member_error(owner, name, error, position))?;

        if let (Some(check), Some(arguments)) = (member.check, arguments) {
            check(arguments).map_err(|reason| {
                self.error(
                    CompileErrorKind::InvalidArguments {
                        member: format!("{}.{}", owner, member.name),
                        reason,
                    },
                    position,
                )
            })?;
        }
        Ok(member)
    }

    fn member_error(
        &self,
        owner: MemberOwner<'_>,
        name: &str,
        error: MemberError,
        position: Position,
    ) -> CompileError {
        self.error(
            CompileErrorKind::Member {
                owner: owner.to_string(),
                name: name.to_string(),
                error,
            },
            position,
        )
    }
}

struct ParseContextGuard<'c, 't> {
    context: &'c ParseContext<'t>,
    exit: fn(&ParseContext<'t>),
}

impl<'c, 't> ParseContextGuard<'c, 't> {
    fn new(context: &'c ParseContext<'t>, exit: fn(&ParseContext<'t>)) -> Self {
        Self { context, exit }
    }
}

impl<'c, 't> Drop for ParseContextGuard<'c, 't> {
    fn drop(&mut self) {
        (self.exit)(self.context);
    }
}

fn describe(tokens: &[Token]) -> (TokenKind, Position) {
    match tokens.first() {
        Some(token) => (token.kind.clone(), token.position),
        None => (TokenKind::Eof, Position::default()),
    }
}

fn position_of(tokens: &[Token]) -> Position {
    tokens.first().map(|token| token.position).unwrap_or_default()
}

fn first_kind(tokens: &[Token]) -> Option<&TokenKind> {
    tokens.first().map(Token::kind)
}

fn is(tokens: &[Token], kind: impl Into<TokenKind>) -> bool {
    first_kind(tokens) == Some(&kind.into())
}

/// Replaces every interpolated string with its `string.Format` call,
/// including interpolations nested inside arguments.
pub fn expand_interpolations(tokens: impl IntoIterator<Item = Token>) -> Vec<Token> {
    let mut expanded = Vec::new();
    for token in tokens {
        if let TokenKind::Interpolated(string) = &token.kind {
            expanded.extend(expand_interpolations(string.rewrite_token(token.position)));
            continue;
        }
        expanded.push(token);
    }
    expanded
}

/// Compiles a whole script. Function signatures are collected first so
/// bodies may call functions declared later; top-level declarations are then
/// compiled in order, and finally the bodies, which see every declaration.
pub fn program(tokens: &[Token], types: &dyn TypeSystem) -> Result<Program, CompileError> {
    let tokens = expand_interpolations(tokens.iter().cloned());
    let mut context = ParseContext::new(types);

    let items = {
        let _guard = context.push("program")?;
        scan_items(&context, &tokens)?
    };

    let mut bodies = Vec::new();
    let mut declarations = Vec::new();
    for item in &items {
        match item {
            Item::Function {
                signature,
                body,
                position,
            } => {
                let clash = context.signatures.iter().any(|existing| {
                    existing.name == signature.name && existing.same_parameters(signature)
                });
                if clash {
                    return Err(context.error(
                        CompileErrorKind::DuplicateDeclaration(signature.name.clone()),
                        *position,
                    ));
                }
                let index = context.signatures.len();
                context
                    .compilation
                    .borrow_mut()
                    .declare_function(&signature.name, index, *position)
                    .map_err(|error| context.locate(error))?;
                context.signatures.push(signature.clone());
                bodies.push((*body, *position));
            }
            Item::Declaration(_) => {}
        }
    }

    for item in &items {
        if let Item::Declaration(tokens) = item {
            let _guard = context.push("program")?;
            if let Some(declaration) = top_level_declaration(&context, tokens)? {
                declarations.push(declaration);
            }
        }
    }

    let mut functions = Vec::new();
    for (signature, (body, position)) in context.signatures.iter().zip(bodies) {
        let _guard = context.push("function")?;
        let body = function_body(&context, signature, body)?;
        functions.push(Function {
            signature: signature.clone(),
            body,
            position,
        });
    }

    Ok(Program {
        declarations,
        functions,
    })
}

/// Compiles a single expression whose free variables are `parameters`.
pub fn standalone_expression(
    tokens: &[Token],
    types: &dyn TypeSystem,
    parameters: &[(&str, ScriptType)],
) -> Result<Expression, CompileError> {
    let tokens = expand_interpolations(tokens.iter().cloned());
    let context = ParseContext::new(types);
    let _guard = context.push("expression script")?;

    for (name, ty) in parameters {
        context.declare(name, Symbol::Variable(ty.clone()), Position::default())?;
    }

    let (expr, rest) = expression(&context, &tokens)?;
    let rest = match first_kind(rest) {
        Some(TokenKind::Separator(Separator::Semicolon)) => &rest[1..],
        _ => rest,
    };
    match first_kind(rest) {
        Some(TokenKind::Eof) | None => Ok(expr),
        _ => Err(context.expected("end of expression", rest)),
    }
}

enum Item<'a> {
    Function {
        signature: FunctionSignature,
        /// Starts at the opening brace.
        body: &'a [Token],
        position: Position,
    },
    Declaration(&'a [Token]),
}

fn scan_items<'a>(context: &ParseContext, tokens: &'a [Token]) -> Result<Vec<Item<'a>>, CompileError> {
    let mut items = Vec::new();
    let mut tokens = tokens;

    loop {
        match first_kind(tokens) {
            Some(TokenKind::Eof) | None => break,
            Some(TokenKind::Keyword(Keyword::Global | Keyword::Extern | Keyword::Const)) => {
                items.push(Item::Declaration(tokens));
                tokens = skip_past_semicolon(tokens);
            }
            Some(TokenKind::Type(_)) => {
                let position = position_of(tokens);
                let (returns, rest) = type_expression(context, tokens)?;
                let (name, rest) = match_identifier(context, rest)?;
                if is(rest, Separator::OpenParen) {
                    let _guard = context.push("function")?;
                    let (parameters, rest) = parameters(context, &rest[1..])?;
                    if !is(rest, Separator::OpenBrace) {
                        return Err(context.expected("\"{\"", rest));
                    }
                    items.push(Item::Function {
                        signature: FunctionSignature {
                            name,
                            returns,
                            parameters,
                        },
                        body: rest,
                        position,
                    });
                    tokens = skip_group(rest);
                } else {
                    items.push(Item::Declaration(tokens));
                    tokens = skip_past_semicolon(tokens);
                }
            }
            Some(TokenKind::Identifier(name)) if matches!(first_kind(&tokens[1..]), Some(TokenKind::Identifier(_))) => {
                return Err(context.error(
                    CompileErrorKind::UnknownType(name.clone()),
                    position_of(tokens),
                ));
            }
            _ => return Err(context.expected("a declaration or function", tokens)),
        }
    }

    Ok(items)
}

/// Skips to just after the next `;` outside of brackets.
fn skip_past_semicolon(tokens: &[Token]) -> &[Token] {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::Separator(Separator::Semicolon) if depth == 0 => return &tokens[i + 1..],
            TokenKind::Separator(separator) if separator.closing().is_some() => depth += 1,
            TokenKind::Separator(separator) if separator.is_closing() => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::Eof => return &tokens[i..],
            _ => {}
        }
    }
    &tokens[tokens.len()..]
}

/// Skips a bracketed group starting at its opening separator.
fn skip_group(tokens: &[Token]) -> &[Token] {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::Separator(separator) if separator.closing().is_some() => depth += 1,
            TokenKind::Separator(separator) if separator.is_closing() => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &tokens[i + 1..];
                }
            }
            TokenKind::Eof => return &tokens[i..],
            _ => {}
        }
    }
    &tokens[tokens.len()..]
}

fn parameters<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Vec<Parameter>> {
    let _guard = context.push("parameters")?;
    let mut parameters = Vec::new();
    let mut tokens = tokens;

    if is(tokens, Separator::CloseParen) {
        return Ok((parameters, &tokens[1..]));
    }

    loop {
        let position = position_of(tokens);
        let (ty, rest) = type_expression(context, tokens)?;
        let (name, rest) = match_identifier(context, rest)?;
        if ty == ScriptType::Void {
            return Err(context.error(CompileErrorKind::VoidDeclaration(name), position));
        }
        parameters.push(Parameter { name, ty });
        tokens = rest;

        match first_kind(tokens) {
            Some(TokenKind::Separator(Separator::Comma)) => tokens = &tokens[1..],
            Some(TokenKind::Separator(Separator::CloseParen)) => return Ok((parameters, &tokens[1..])),
            _ => return Err(context.expected("\",\" or \")\"", tokens)),
        }
    }
}

fn function_body(
    context: &ParseContext,
    signature: &FunctionSignature,
    tokens: &[Token],
) -> Result<Vec<Statement>, CompileError> {
    let _scope = context.scope();
    let enclosing = context
        .compilation
        .borrow_mut()
        .begin_function(signature.returns.clone());

    let result = (|| {
        let tokens = consume(context, tokens, Separator::OpenBrace)?;
        for parameter in &signature.parameters {
            context.declare(
                &parameter.name,
                Symbol::Variable(parameter.ty.clone()),
                position_of(tokens),
            )?;
        }
        block_statements(context, tokens).map(|(statements, _)| statements)
    })();

    context.compilation.borrow_mut().end_function(enclosing);
    result
}

fn top_level_declaration(
    context: &ParseContext,
    tokens: &[Token],
) -> Result<Option<Declaration>, CompileError> {
    let _guard = context.push("declaration")?;
    let position = position_of(tokens);
    let (storage, tokens) = match first_kind(tokens) {
        Some(TokenKind::Keyword(Keyword::Global)) => (Storage::Global, &tokens[1..]),
        Some(TokenKind::Keyword(Keyword::Extern)) => (Storage::Extern, &tokens[1..]),
        Some(TokenKind::Keyword(Keyword::Const)) => {
            constant(context, &tokens[1..])?;
            return Ok(None);
        }
        _ => (Storage::Member, tokens),
    };

    let ((name, ty, initializer), _) = variable(context, tokens)?;
    Ok(Some(Declaration {
        storage,
        name,
        ty,
        initializer,
        position,
    }))
}

/// `T name [= initializer];`, declared in the innermost scope once the
/// initializer has been compiled.
fn variable<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Parsed<'a, (String, ScriptType, Option<Expression>)> {
    let _guard = context.push("variable")?;
    let position = position_of(tokens);
    let (ty, tokens) = type_expression(context, tokens)?;
    let (name, tokens) = match_identifier(context, tokens)?;
    if ty == ScriptType::Void {
        return Err(context.error(CompileErrorKind::VoidDeclaration(name), position));
    }

    let (initializer, tokens) = if is(tokens, Operator::Assign) {
        let (initializer, rest) = expression(context, &tokens[1..])?;
        context.expect_assignable(&ty, &initializer, "initializer")?;
        (Some(initializer), rest)
    } else {
        (None, tokens)
    };
    let tokens = consume(context, tokens, Separator::Semicolon)?;

    context.declare(&name, Symbol::Variable(ty.clone()), position)?;
    Ok(((name, ty, initializer), tokens))
}

/// `const T name = literal;`, after the `const` keyword.
fn constant<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, ()> {
    let _guard = context.push("constant")?;
    let position = position_of(tokens);
    let (ty, tokens) = type_expression(context, tokens)?;
    let (name, tokens) = match_identifier(context, tokens)?;
    let tokens = consume(context, tokens, Operator::Assign)?;
    let (initializer, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, Separator::Semicolon)?;

    let ExprKind::Literal(value) = &initializer.kind else {
        return Err(context.error(CompileErrorKind::ConstantNotLiteral(name), initializer.position));
    };
    context.expect_assignable(&ty, &initializer, "constant")?;
    let value = value.clone().coerce(&ty);
    context.declare(&name, Symbol::Constant(value, ty), position)?;
    Ok(((), tokens))
}

/// A type name, with type arguments if it is generic, followed by any
/// number of `[]`.
fn type_expression<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, ScriptType> {
    let _guard = context.push("type")?;
    let (mut ty, mut tokens) = named_type(context, tokens)?;
    while is(tokens, Separator::OpenBracket) && is(&tokens[1..], Separator::CloseBracket) {
        ty = ScriptType::array(ty);
        tokens = &tokens[2..];
    }
    Ok((ty, tokens))
}

fn named_type<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, ScriptType> {
    let position = position_of(tokens);
    let (alias, target) = match first_kind(tokens) {
        Some(TokenKind::Type(token)) => (token.alias.clone(), token.target.clone()),
        Some(TokenKind::Identifier(name)) => {
            return Err(context.error(CompileErrorKind::UnknownType(name.clone()), position))
        }
        _ => return Err(context.expected("a type", tokens)),
    };
    let tokens = &tokens[1..];

    let constructor = match target {
        TypeRef::Concrete(ty) => return Ok((ty, tokens)),
        TypeRef::Generic(constructor) => constructor,
    };
    if !is(tokens, Operator::Less) {
        return Err(context.error(CompileErrorKind::UnappliedGeneric(alias), position));
    }

    let mut arguments = Vec::new();
    let mut tokens = &tokens[1..];
    loop {
        let (argument, rest) = type_expression(context, tokens)?;
        arguments.push(argument);
        match first_kind(rest) {
            Some(TokenKind::Separator(Separator::Comma)) => tokens = &rest[1..],
            Some(TokenKind::Operator(Operator::Greater)) => {
                tokens = &rest[1..];
                break;
            }
            _ => return Err(context.expected("\",\" or \">\"", rest)),
        }
    }

    let found = arguments.len();
    match constructor.apply(arguments) {
        Some(ty) => Ok((ty, tokens)),
        None => Err(context.error(
            CompileErrorKind::GenericArity {
                name: alias,
                expected: constructor.arity(),
                found,
            },
            position,
        )),
    }
}

fn starts_declaration(tokens: &[Token]) -> bool {
    matches!(first_kind(tokens), Some(TokenKind::Type(_)))
        && !matches!(first_kind(&tokens[1..]), Some(TokenKind::Operator(Operator::Dot)))
}

fn statement<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Statement> {
    let _guard = context.push("statement")?;
    let position = position_of(tokens);
    let at = |kind| Statement { kind, position };

    match first_kind(tokens) {
        Some(TokenKind::Separator(Separator::OpenBrace)) => {
            let _scope = context.scope();
            let (statements, rest) = block_statements(context, &tokens[1..])?;
            Ok((at(StatementKind::Block(statements)), rest))
        }
        Some(TokenKind::Separator(Separator::Semicolon)) => {
            Ok((at(StatementKind::Block(vec![])), &tokens[1..]))
        }
        Some(TokenKind::Keyword(Keyword::If)) => if_statement(context, &tokens[1..], position),
        Some(TokenKind::Keyword(Keyword::While)) => while_statement(context, &tokens[1..], position),
        Some(TokenKind::Keyword(Keyword::For)) => for_statement(context, &tokens[1..], position),
        Some(TokenKind::Keyword(Keyword::ForEach)) => {
            foreach_statement(context, &tokens[1..], position)
        }
        Some(TokenKind::Keyword(Keyword::Switch)) => {
            switch_statement(context, &tokens[1..], position)
        }
        Some(TokenKind::Keyword(Keyword::Break)) => {
            if !context.compilation.borrow().can_break() {
                return Err(context.error(CompileErrorKind::BreakOutsideLoop, position));
            }
            let rest = consume(context, &tokens[1..], Separator::Semicolon)?;
            Ok((at(StatementKind::Break), rest))
        }
        Some(TokenKind::Keyword(Keyword::Continue)) => {
            if !context.compilation.borrow().can_continue() {
                return Err(context.error(CompileErrorKind::ContinueOutsideLoop, position));
            }
            let rest = consume(context, &tokens[1..], Separator::Semicolon)?;
            Ok((at(StatementKind::Continue), rest))
        }
        Some(TokenKind::Keyword(Keyword::Return)) => {
            return_statement(context, &tokens[1..], position)
        }
        Some(TokenKind::Keyword(Keyword::Const)) => {
            let ((), rest) = constant(context, &tokens[1..])?;
            Ok((at(StatementKind::Block(vec![])), rest))
        }
        Some(TokenKind::Identifier(name))
            if matches!(first_kind(&tokens[1..]), Some(TokenKind::Identifier(_))) =>
        {
            Err(context.error(CompileErrorKind::UnknownType(name.clone()), position))
        }
        _ if starts_declaration(tokens) => {
            let ((name, ty, initializer), rest) = variable(context, tokens)?;
            Ok((
                at(StatementKind::Declaration {
                    name,
                    ty,
                    initializer,
                }),
                rest,
            ))
        }
        _ => expression_statement(context, tokens),
    }
}

/// A loop or branch body, in a scope of its own.
fn body<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Box<Statement>> {
    let _scope = context.scope();
    let (body, rest) = statement(context, tokens)?;
    Ok((Box::new(body), rest))
}

/// Statements up to and including the closing brace.
fn block_statements<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Vec<Statement>> {
    let _guard = context.push("block")?;
    let mut statements = Vec::new();
    let mut tokens = tokens;

    loop {
        match first_kind(tokens) {
            Some(TokenKind::Separator(Separator::CloseBrace)) => {
                return Ok((statements, &tokens[1..]))
            }
            Some(TokenKind::Eof) | None => return Err(context.expected("\"}\"", tokens)),
            _ => {
                let (statement, rest) = statement(context, tokens)?;
                statements.push(statement);
                tokens = rest;
            }
        }
    }
}

fn condition<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let tokens = consume(context, tokens, Separator::OpenParen)?;
    let (condition, tokens) = expression(context, tokens)?;
    context.expect_assignable(&ScriptType::Bool, &condition, "condition")?;
    let tokens = consume(context, tokens, Separator::CloseParen)?;
    Ok((condition, tokens))
}

/// `if` with its `else if` chain, which nests into the else branches
/// without recursing through this rule.
fn if_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    position: Position,
) -> Parsed<'a, Statement> {
    let _guard = context.push("if_statement")?;
    let (condition, tokens) = self::condition(context, tokens)?;
    let (then_branch, mut tokens) = body(context, tokens)?;

    let mut chained = Vec::new();
    let mut else_branch = None;
    loop {
        match first_kind(tokens) {
            Some(TokenKind::Keyword(Keyword::ElseIf)) => {
                let position = position_of(tokens);
                let (condition, rest) = self::condition(context, &tokens[1..])?;
                let (then_branch, rest) = body(context, rest)?;
                chained.push((condition, then_branch, position));
                tokens = rest;
            }
            Some(TokenKind::Keyword(Keyword::Else)) => {
                let (otherwise, rest) = body(context, &tokens[1..])?;
                else_branch = Some(otherwise);
                tokens = rest;
                break;
            }
            _ => break,
        }
    }

    let else_branch = chained
        .into_iter()
        .rev()
        .fold(else_branch, |otherwise, (condition, then_branch, position)| {
            Some(Box::new(Statement {
                kind: StatementKind::If(condition, then_branch, otherwise),
                position,
            }))
        });

    Ok((
        Statement {
            kind: StatementKind::If(condition, then_branch, else_branch),
            position,
        },
        tokens,
    ))
}

fn while_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    position: Position,
) -> Parsed<'a, Statement> {
    let _guard = context.push("while_statement")?;
    let (condition, tokens) = self::condition(context, tokens)?;
    let _loop = context.enter_loop();
    let (body, tokens) = body(context, tokens)?;
    Ok((
        Statement {
            kind: StatementKind::While(condition, body),
            position,
        },
        tokens,
    ))
}

/// Comma-separated expressions that may stand alone as statements.
fn executable_list<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    terminator: Separator,
) -> Parsed<'a, Vec<Expression>> {
    let mut expressions = Vec::new();
    let mut tokens = tokens;
    if is(tokens, terminator) {
        return Ok((expressions, &tokens[1..]));
    }

    loop {
        let (expr, rest) = expression(context, tokens)?;
        if !expr.is_executable() {
            return Err(context.error(CompileErrorKind::NotAStatement, expr.position));
        }
        expressions.push(expr);
        match first_kind(rest) {
            Some(TokenKind::Separator(Separator::Comma)) => tokens = &rest[1..],
            Some(TokenKind::Separator(separator)) if *separator == terminator => {
                return Ok((expressions, &rest[1..]))
            }
            _ => return Err(context.expected(format!("\",\" or \"{}\"", terminator), rest)),
        }
    }
}

fn for_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    position: Position,
) -> Parsed<'a, Statement> {
    let _guard = context.push("for_statement")?;
    let _scope = context.scope();
    let tokens = consume(context, tokens, Separator::OpenParen)?;

    let (initializer, tokens) = if starts_declaration(tokens) {
        let init_position = position_of(tokens);
        let ((name, ty, initializer), rest) = variable(context, tokens)?;
        (
            vec![Statement {
                kind: StatementKind::Declaration {
                    name,
                    ty,
                    initializer,
                },
                position: init_position,
            }],
            rest,
        )
    } else {
        let (expressions, rest) = executable_list(context, tokens, Separator::Semicolon)?;
        (
            expressions
                .into_iter()
                .map(|expr| Statement {
                    position: expr.position,
                    kind: StatementKind::Expression(expr),
                })
                .collect(),
            rest,
        )
    };

    let (condition, tokens) = if is(tokens, Separator::Semicolon) {
        (None, tokens)
    } else {
        let (condition, rest) = expression(context, tokens)?;
        context.expect_assignable(&ScriptType::Bool, &condition, "condition")?;
        (Some(condition), rest)
    };
    let tokens = consume(context, tokens, Separator::Semicolon)?;

    let (increments, tokens) = executable_list(context, tokens, Separator::CloseParen)?;

    let _loop = context.enter_loop();
    let (body, tokens) = body(context, tokens)?;

    Ok((
        Statement {
            kind: StatementKind::For {
                initializer,
                condition,
                increments,
                body,
            },
            position,
        },
        tokens,
    ))
}

fn foreach_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    position: Position,
) -> Parsed<'a, Statement> {
    let _guard = context.push("foreach_statement")?;
    let _scope = context.scope();
    let tokens = consume(context, tokens, Separator::OpenParen)?;
    let variable_position = position_of(tokens);
    let (ty, tokens) = type_expression(context, tokens)?;
    let (name, tokens) = match_identifier(context, tokens)?;
    let tokens = consume(context, tokens, Keyword::In)?;
    let (collection, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, Separator::CloseParen)?;

    // Dictionaries iterate over their keys.
    let element = match &collection.ty {
        ScriptType::Dictionary(key, _) => key.as_ref(),
        other => match other.sequence() {
            Some((_, element)) => element,
            None => {
                return Err(context.error(
                    CompileErrorKind::NotIterable(collection.ty.clone()),
                    collection.position,
                ))
            }
        },
    };
    if !context.types.is_assignable_or_convertible(&ty, element) {
        return Err(context.error(
            CompileErrorKind::TypeMismatch {
                expected: ty,
                found: element.clone(),
                context: "foreach variable",
            },
            variable_position,
        ));
    }
    context.declare(&name, Symbol::Variable(ty.clone()), variable_position)?;

    let _loop = context.enter_loop();
    let (body, tokens) = body(context, tokens)?;

    Ok((
        Statement {
            kind: StatementKind::ForEach {
                name,
                ty,
                collection,
                body,
            },
            position,
        },
        tokens,
    ))
}

fn switch_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    position: Position,
) -> Parsed<'a, Statement> {
    let _guard = context.push("switch_statement")?;
    let tokens = consume(context, tokens, Separator::OpenParen)?;
    let (value, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, Separator::CloseParen)?;
    let mut tokens = consume(context, tokens, Separator::OpenBrace)?;

    let _switch = context.enter_switch();
    let mut cases: Vec<SwitchCase> = Vec::new();
    let mut default = None;

    while !is(tokens, Separator::CloseBrace) {
        let mut labels = Vec::new();
        let mut is_default = false;

        loop {
            match first_kind(tokens) {
                Some(TokenKind::Keyword(Keyword::Case)) => {
                    let (label, rest) = expression(context, &tokens[1..])?;
                    let ExprKind::Literal(label_value) = &label.kind else {
                        return Err(context.expected("a literal case label", &tokens[1..]));
                    };
                    context.expect_assignable(&value.ty, &label, "case label")?;
                    let label_value = label_value.clone().coerce(&value.ty);
                    let duplicate = cases
                        .iter()
                        .flat_map(|case| case.labels.iter())
                        .chain(labels.iter())
                        .any(|seen: &Value| seen.script_equals(&label_value));
                    if duplicate {
                        return Err(context.error(
                            CompileErrorKind::DuplicateCase(label.to_string()),
                            label.position,
                        ));
                    }
                    labels.push(label_value);
                    tokens = consume(context, rest, Separator::Colon)?;
                }
                Some(TokenKind::Keyword(Keyword::Default)) => {
                    if default.is_some() || is_default {
                        return Err(context.error(
                            CompileErrorKind::MultipleDefaults,
                            position_of(tokens),
                        ));
                    }
                    is_default = true;
                    tokens = consume(context, &tokens[1..], Separator::Colon)?;
                }
                _ if labels.is_empty() && !is_default => {
                    return Err(context.expected("\"case\" or \"default\"", tokens))
                }
                _ => break,
            }
        }

        let _scope = context.scope();
        let mut section = Vec::new();
        while !matches!(
            first_kind(tokens),
            Some(
                TokenKind::Keyword(Keyword::Case | Keyword::Default)
                    | TokenKind::Separator(Separator::CloseBrace)
                    | TokenKind::Eof
            ) | None
        ) {
            let (statement, rest) = statement(context, tokens)?;
            section.push(statement);
            tokens = rest;
        }

        if is_default {
            default = Some(section.clone());
        }
        if !labels.is_empty() {
            cases.push(SwitchCase {
                labels,
                body: section,
            });
        }
    }

    Ok((
        Statement {
            kind: StatementKind::Switch {
                value,
                cases,
                default,
            },
            position,
        },
        &tokens[1..],
    ))
}

fn return_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    position: Position,
) -> Parsed<'a, Statement> {
    let _guard = context.push("return_statement")?;
    let returns = context
        .compilation
        .borrow()
        .return_type()
        .cloned()
        .unwrap_or(ScriptType::Void);

    if is(tokens, Separator::Semicolon) {
        if returns != ScriptType::Void {
            return Err(context.error(CompileErrorKind::MissingReturnValue(returns), position));
        }
        return Ok((
            Statement {
                kind: StatementKind::Return(None),
                position,
            },
            &tokens[1..],
        ));
    }

    let (value, tokens) = expression(context, tokens)?;
    if returns == ScriptType::Void {
        return Err(context.error(CompileErrorKind::UnexpectedReturnValue, value.position));
    }
    context.expect_assignable(&returns, &value, "return")?;
    let tokens = consume(context, tokens, Separator::Semicolon)?;
    Ok((
        Statement {
            kind: StatementKind::Return(Some(value)),
            position,
        },
        tokens,
    ))
}

fn expression_statement<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Statement> {
    let _guard = context.push("expression_statement")?;
    let (expr, tokens) = expression(context, tokens)?;
    if !expr.is_executable() {
        return Err(context.error(CompileErrorKind::NotAStatement, expr.position));
    }
    let tokens = consume(context, tokens, Separator::Semicolon)?;
    Ok((
        Statement {
            position: expr.position,
            kind: StatementKind::Expression(expr),
        },
        tokens,
    ))
}

fn expression<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("expression")?;
    let (expr, rest) = assignment(context, tokens)?;
    Ok((bounded(context, expr)?, rest))
}

/// Rejects trees taller than `MAX_EXPRESSION_HEIGHT`.
fn bounded(context: &ParseContext, expr: Expression) -> Result<Expression, CompileError> {
    if expr.height > MAX_EXPRESSION_HEIGHT {
        return Err(context.error(
            CompileErrorKind::NestingTooDeep(MAX_EXPRESSION_HEIGHT),
            expr.position,
        ));
    }
    Ok(expr)
}

fn assignment_target(context: &ParseContext, expr: Expression) -> Result<AssignTarget, CompileError> {
    match expr.kind {
        ExprKind::Identifier(identifier) => Ok(AssignTarget::Identifier(identifier)),
        ExprKind::Index { collection, index } => Ok(AssignTarget::Index { collection, index }),
        _ => Err(context.error(CompileErrorKind::NotAssignable, expr.position)),
    }
}

fn compound_operator(operator: &Operator) -> Option<Option<CompoundOperator>> {
    Some(match operator {
        Operator::Assign => None,
        Operator::PlusAssign => Some(CompoundOperator::Arithmetic(InfixOperator::Plus)),
        Operator::MinusAssign => Some(CompoundOperator::Arithmetic(InfixOperator::Minus)),
        Operator::StarAssign => Some(CompoundOperator::Arithmetic(InfixOperator::Multiply)),
        Operator::SlashAssign => Some(CompoundOperator::Arithmetic(InfixOperator::Divide)),
        Operator::PercentAssign => Some(CompoundOperator::Arithmetic(InfixOperator::Remainder)),
        Operator::CaretAssign => Some(CompoundOperator::Arithmetic(InfixOperator::Power)),
        Operator::AndAssign => Some(CompoundOperator::And),
        Operator::OrAssign => Some(CompoundOperator::Or),
        _ => return None,
    })
}

fn assignment<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("assignment")?;
    let (expr, rest) = ternary(context, tokens)?;

    let Some(TokenKind::Operator(operator)) = first_kind(rest) else {
        return Ok((expr, rest));
    };
    let Some(operator) = compound_operator(operator) else {
        return Ok((expr, rest));
    };

    let position = expr.position;
    let target_type = expr.ty.clone();
    let target = assignment_target(context, expr)?;
    let (value, rest) = assignment(context, &rest[1..])?;

    let operand = match operator {
        None => {
            context.expect_assignable(&target_type, &value, "assignment")?;
            target_type.clone()
        }
        Some(CompoundOperator::Arithmetic(op)) => {
            let (result, operand) = infix_type(op, &target_type, &value.ty).ok_or_else(|| {
                context.error(
                    CompileErrorKind::InvalidOperands {
                        operator: op.to_string(),
                        left: target_type.clone(),
                        right: value.ty.clone(),
                    },
                    position,
                )
            })?;
            if !context
                .types
                .is_assignable_or_convertible(&target_type, &result)
            {
                return Err(context.error(
                    CompileErrorKind::TypeMismatch {
                        expected: target_type,
                        found: result,
                        context: "compound assignment",
                    },
                    value.position,
                ));
            }
            operand
        }
        Some(compound @ (CompoundOperator::And | CompoundOperator::Or)) => {
            if target_type != ScriptType::Bool || value.ty != ScriptType::Bool {
                return Err(context.error(
                    CompileErrorKind::InvalidOperands {
                        operator: compound.to_string(),
                        left: target_type,
                        right: value.ty.clone(),
                    },
                    position,
                ));
            }
            ScriptType::Bool
        }
    };

    Ok((
        Expression::new(
            ExprKind::Assign {
                target,
                operator,
                value: Box::new(value),
                operand,
            },
            target_type,
            position,
        ),
        rest,
    ))
}

fn ternary<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("ternary")?;
    let (condition, rest) = logical_or(context, tokens)?;
    if !is(rest, Operator::Question) {
        return Ok((condition, rest));
    }
    context.expect_assignable(&ScriptType::Bool, &condition, "condition")?;

    let (then, rest) = expression(context, &rest[1..])?;
    let rest = consume(context, rest, Separator::Colon)?;
    let (otherwise, rest) = ternary(context, rest)?;

    let ty = if context.types.is_assignable_or_convertible(&then.ty, &otherwise.ty) {
        then.ty.clone()
    } else if context.types.is_assignable_or_convertible(&otherwise.ty, &then.ty) {
        otherwise.ty.clone()
    } else {
        return Err(context.error(
            CompileErrorKind::TypeMismatch {
                expected: then.ty.clone(),
                found: otherwise.ty.clone(),
                context: "conditional expression",
            },
            otherwise.position,
        ));
    };

    let position = condition.position;
    Ok((
        Expression::new(
            ExprKind::Ternary {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            ty,
            position,
        ),
        rest,
    ))
}

fn binary<'a, O: Copy>(
    context: &ParseContext,
    precedence: impl Fn(&ParseContext, &'a [Token]) -> Parsed<'a, Expression>,
    operator: impl Fn(&Token) -> Option<O>,
    combine: impl Fn(&ParseContext, Expression, O, Expression) -> Result<Expression, CompileError>,
    tokens: &'a [Token],
) -> Parsed<'a, Expression> {
    let (mut expr, mut tokens) = precedence(context, tokens)?;

    while let Some(token) = tokens.first() {
        let op = match operator(token) {
            Some(op) => op,
            None => break,
        };
        tokens = &tokens[1..];
        let (right, rest) = precedence(context, tokens)?;
        expr = bounded(context, combine(context, expr, op, right)?)?;
        tokens = rest;
    }

    Ok((expr, tokens))
}

fn logical(
    context: &ParseContext,
    left: Expression,
    op: LogicalOperator,
    right: Expression,
) -> Result<Expression, CompileError> {
    if left.ty != ScriptType::Bool || right.ty != ScriptType::Bool {
        return Err(context.error(
            CompileErrorKind::InvalidOperands {
                operator: op.to_string(),
                left: left.ty,
                right: right.ty,
            },
            left.position,
        ));
    }
    let position = left.position;
    Ok(Expression::new(
        ExprKind::Logical(Box::new(left), op, Box::new(right)),
        ScriptType::Bool,
        position,
    ))
}

/// Result type and operand type of `left op right`, if the operator applies.
fn infix_type(
    op: InfixOperator,
    left: &ScriptType,
    right: &ScriptType,
) -> Option<(ScriptType, ScriptType)> {
    if *left == ScriptType::Void || *right == ScriptType::Void {
        return None;
    }
    match op {
        InfixOperator::Plus if *left == ScriptType::String || *right == ScriptType::String => {
            Some((ScriptType::String, ScriptType::String))
        }
        InfixOperator::Plus
        | InfixOperator::Minus
        | InfixOperator::Multiply
        | InfixOperator::Divide
        | InfixOperator::Remainder
        | InfixOperator::Power => {
            let operand = ScriptType::promote(left, right)?;
            Some((operand.clone(), operand))
        }
        comparison if comparison.is_comparison() => {
            ScriptType::promote(left, right).map(|operand| (ScriptType::Bool, operand))
        }
        _ => None,
    }
}

fn infix(
    context: &ParseContext,
    left: Expression,
    op: InfixOperator,
    right: Expression,
) -> Result<Expression, CompileError> {
    let typed = if op.is_equality() {
        equality_type(context.types, &left.ty, &right.ty).map(|operand| (ScriptType::Bool, operand))
    } else {
        infix_type(op, &left.ty, &right.ty)
    };
    let Some((ty, operand)) = typed else {
        return Err(context.error(
            CompileErrorKind::InvalidOperands {
                operator: op.to_string(),
                left: left.ty,
                right: right.ty,
            },
            left.position,
        ));
    };

    let position = left.position;
    Ok(Expression::new(
        ExprKind::Binary {
            left: Box::new(left),
            operator: op,
            right: Box::new(right),
            operand,
        },
        ty,
        position,
    ))
}

/// Numeric operands compare after promotion; anything else must be related
/// by the assignability predicate in one direction.
fn equality_type(types: &dyn TypeSystem, left: &ScriptType, right: &ScriptType) -> Option<ScriptType> {
    if *left == ScriptType::Void || *right == ScriptType::Void {
        return None;
    }
    if let Some(operand) = ScriptType::promote(left, right) {
        return Some(operand);
    }
    if types.is_assignable_or_convertible(left, right) {
        Some(left.clone())
    } else if types.is_assignable_or_convertible(right, left) {
        Some(right.clone())
    } else {
        None
    }
}

fn operator_of(token: &Token) -> Option<Operator> {
    match token.kind() {
        TokenKind::Operator(op) => Some(*op),
        _ => None,
    }
}

fn logical_or<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("logical_or")?;
    binary(
        context,
        logical_and,
        |token| match operator_of(token) {
            Some(Operator::Or) => Some(LogicalOperator::Or),
            _ => None,
        },
        logical,
        tokens,
    )
}

fn logical_and<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("logical_and")?;
    binary(
        context,
        equality,
        |token| match operator_of(token) {
            Some(Operator::And) => Some(LogicalOperator::And),
            _ => None,
        },
        logical,
        tokens,
    )
}

fn equality<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("equality")?;
    binary(
        context,
        comparison,
        |token| match operator_of(token) {
            Some(Operator::Equal) => Some(InfixOperator::Equal),
            Some(Operator::NotEqual) => Some(InfixOperator::NotEqual),
            _ => None,
        },
        infix,
        tokens,
    )
}

fn comparison<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("comparison")?;
    binary(
        context,
        term,
        |token| match operator_of(token) {
            Some(Operator::Less) => Some(InfixOperator::LessThan),
            Some(Operator::LessEqual) => Some(InfixOperator::LessThanOrEqual),
            Some(Operator::Greater) => Some(InfixOperator::GreaterThan),
            Some(Operator::GreaterEqual) => Some(InfixOperator::GreaterThanOrEqual),
            _ => None,
        },
        infix,
        tokens,
    )
}

fn term<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("term")?;
    binary(
        context,
        factor,
        |token| match operator_of(token) {
            Some(Operator::Plus) => Some(InfixOperator::Plus),
            Some(Operator::Minus) => Some(InfixOperator::Minus),
            _ => None,
        },
        infix,
        tokens,
    )
}

fn factor<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("factor")?;
    binary(
        context,
        power,
        |token| match operator_of(token) {
            Some(Operator::Star) => Some(InfixOperator::Multiply),
            Some(Operator::Slash) => Some(InfixOperator::Divide),
            Some(Operator::Percent) => Some(InfixOperator::Remainder),
            _ => None,
        },
        infix,
        tokens,
    )
}

/// `^` binds right to left.
fn power<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("power")?;
    let (base, rest) = unary(context, tokens)?;
    if !is(rest, Operator::Caret) {
        return Ok((base, rest));
    }
    let (exponent, rest) = power(context, &rest[1..])?;
    Ok((infix(context, base, InfixOperator::Power, exponent)?, rest))
}

fn increment(
    context: &ParseContext,
    operand: Expression,
    decrement: bool,
    prefix: bool,
) -> Result<Expression, CompileError> {
    if !operand.ty.is_numeric() {
        return Err(context.error(
            CompileErrorKind::InvalidOperand {
                operator: if decrement { "--" } else { "++" }.to_string(),
                operand: operand.ty,
            },
            operand.position,
        ));
    }
    let (ty, position) = (operand.ty.clone(), operand.position);
    let target = assignment_target(context, operand)?;
    Ok(Expression::new(
        ExprKind::Increment {
            target,
            decrement,
            prefix,
        },
        ty,
        position,
    ))
}

/// `(T)` at the start of `tokens`, if it is a cast rather than a grouping.
fn cast_type<'a>(context: &ParseContext, tokens: &'a [Token]) -> Option<(ScriptType, &'a [Token])> {
    if !is(tokens, Separator::OpenParen) || !starts_declaration(&tokens[1..]) {
        return None;
    }
    let (ty, rest) = type_expression(context, &tokens[1..]).ok()?;
    is(rest, Separator::CloseParen).then(|| (ty, &rest[1..]))
}

fn unary<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("unary")?;
    let position = position_of(tokens);

    if let Some((target, rest)) = cast_type(context, tokens) {
        let (operand, rest) = unary(context, rest)?;
        if !types::is_castable(context.types, &target, &operand.ty) {
            return Err(context.error(
                CompileErrorKind::InvalidCast {
                    from: operand.ty,
                    to: target,
                },
                position,
            ));
        }
        return Ok((
            Expression::new(ExprKind::Cast(Box::new(operand)), target, position),
            rest,
        ));
    }

    let op = match first_kind(tokens) {
        Some(TokenKind::Operator(op @ (Operator::Minus | Operator::Not))) => *op,
        Some(TokenKind::Operator(op @ (Operator::Increment | Operator::Decrement))) => {
            let decrement = *op == Operator::Decrement;
            let (operand, rest) = unary(context, &tokens[1..])?;
            return Ok((increment(context, operand, decrement, true)?, rest));
        }
        _ => return postfix(context, tokens),
    };

    if op == Operator::Minus {
        if let Some(rest) = int_min_literal(&tokens[1..]) {
            let value = Value::Int(i32::MIN);
            return Ok((Expression::new(ExprKind::Literal(value), ScriptType::Int, position), rest));
        }
    }

    let (operand, rest) = unary(context, &tokens[1..])?;
    let expr = match op {
        Operator::Not if operand.ty == ScriptType::Bool => Expression::new(
            ExprKind::Unary(UnaryOperator::Not, Box::new(operand)),
            ScriptType::Bool,
            position,
        ),
        Operator::Minus if operand.ty.is_numeric() => {
            let folded = match &operand.kind {
                ExprKind::Literal(value) => negate_literal(value),
                _ => None,
            };
            match folded {
                Some(value) => Expression::new(ExprKind::Literal(value), operand.ty, position),
                None => negation(operand, position),
            }
        }
        _ => {
            return Err(context.error(
                CompileErrorKind::InvalidOperand {
                    operator: op.to_string(),
                    operand: operand.ty,
                },
                position,
            ))
        }
    };
    Ok((expr, rest))
}

/// The tokens after `2147483648` when it directly follows a unary minus and
/// no postfix operator binds to it first.
fn int_min_literal(tokens: &[Token]) -> Option<&[Token]> {
    if !matches!(first_kind(tokens), Some(TokenKind::Literal(Literal::IntMinMagnitude))) {
        return None;
    }
    let rest = &tokens[1..];
    match first_kind(rest) {
        Some(TokenKind::Operator(Operator::Dot | Operator::Increment | Operator::Decrement))
        | Some(TokenKind::Separator(Separator::OpenBracket)) => None,
        _ => Some(rest),
    }
}

fn negation(operand: Expression, position: Position) -> Expression {
    let ty = operand.ty.clone();
    Expression::new(
        ExprKind::Unary(UnaryOperator::Negate, Box::new(operand)),
        ty,
        position,
    )
}

fn negate_literal(value: &Value) -> Option<Value> {
    match value {
        Value::Int(i) => i.checked_neg().map(Value::Int),
        Value::Long(l) => l.checked_neg().map(Value::Long),
        Value::Float(f) => Some(Value::Float(-f)),
        Value::Double(d) => Some(Value::Double(-d)),
        _ => None,
    }
}

fn postfix<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("postfix")?;
    let (mut expr, mut tokens) = primary(context, tokens)?;

    loop {
        expr = bounded(context, expr)?;
        match first_kind(tokens) {
            Some(TokenKind::Operator(Operator::Dot)) => {
                let position = position_of(&tokens[1..]);
                let (name, rest) = match_identifier(context, &tokens[1..])?;
                let receiver_type = expr.ty.clone();
                let owner = MemberOwner::Instance(&receiver_type);
                let (member, arguments, rest) = member_access(context, owner, &name, rest, position)?;
                let ty = member.returns.clone();
                let start = expr.position;
                expr = Expression::new(
                    ExprKind::Host {
                        member,
                        receiver: Some(Box::new(expr)),
                        arguments,
                    },
                    ty,
                    start,
                );
                tokens = rest;
            }
            Some(TokenKind::Separator(Separator::OpenBracket)) => {
                let (key, element) = match &expr.ty {
                    ScriptType::List(element) | ScriptType::Array(element) => {
                        (ScriptType::Int, element.as_ref().clone())
                    }
                    ScriptType::Dictionary(key, value) => {
                        (key.as_ref().clone(), value.as_ref().clone())
                    }
                    other => {
                        return Err(context.error(
                            CompileErrorKind::NotIndexable(other.clone()),
                            position_of(tokens),
                        ))
                    }
                };
                let (index, rest) = expression(context, &tokens[1..])?;
                context.expect_assignable(&key, &index, "index")?;
                let rest = consume(context, rest, Separator::CloseBracket)?;
                let start = expr.position;
                expr = Expression::new(
                    ExprKind::Index {
                        collection: Box::new(expr),
                        index: Box::new(index),
                    },
                    element,
                    start,
                );
                tokens = rest;
            }
            Some(TokenKind::Operator(op @ (Operator::Increment | Operator::Decrement))) => {
                let decrement = *op == Operator::Decrement;
                expr = increment(context, expr, decrement, false)?;
                tokens = &tokens[1..];
            }
            _ => return Ok((expr, tokens)),
        }
    }
}

/// `Name` or `Name(args)` after a `.`, resolved against `owner`.
fn member_access<'a>(
    context: &ParseContext,
    owner: MemberOwner<'_>,
    name: &str,
    tokens: &'a [Token],
    position: Position,
) -> Result<(Rc<HostMember>, Vec<Expression>, &'a [Token]), CompileError> {
    if is(tokens, Separator::OpenParen) {
        let (arguments, rest) = arguments(context, &tokens[1..])?;
        let member = context.resolve_member(owner, name, Some(&arguments), position)?;
        Ok((member, arguments, rest))
    } else {
        let member = context.resolve_member(owner, name, None, position)?;
        Ok((member, vec![], tokens))
    }
}

/// Arguments after an opening parenthesis, through the closing one.
fn arguments<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Vec<Expression>> {
    let _guard = context.push("arguments")?;
    let mut arguments = Vec::new();
    let mut tokens = tokens;

    if is(tokens, Separator::CloseParen) {
        return Ok((arguments, &tokens[1..]));
    }

    loop {
        let (argument, rest) = expression(context, tokens)?;
        arguments.push(argument);
        tokens = rest;
        match first_kind(tokens) {
            Some(TokenKind::Separator(Separator::Comma)) => tokens = &tokens[1..],
            Some(TokenKind::Separator(Separator::CloseParen)) => return Ok((arguments, &tokens[1..])),
            _ => return Err(context.expected("\",\" or \")\"", tokens)),
        }
    }
}

fn function_call<'a>(
    context: &ParseContext,
    name: &str,
    tokens: &'a [Token],
    position: Position,
) -> Parsed<'a, Expression> {
    let _guard = context.push("call")?;
    let overloads = match context.lookup(name) {
        Some(Symbol::Function(overloads)) => overloads,
        Some(_) => {
            return Err(context.error(CompileErrorKind::NotCallable(name.to_string()), position))
        }
        None => {
            return Err(context.error(CompileErrorKind::UnknownFunction(name.to_string()), position))
        }
    };

    let (arguments, rest) = arguments(context, tokens)?;
    let function = match overloads.as_slice() {
        [only] => {
            let signature = &context.signatures[*only];
            if arguments.len() != signature.parameters.len() {
                return Err(context.error(
                    CompileErrorKind::ArgumentCount {
                        name: name.to_string(),
                        expected: signature.parameters.len(),
                        found: arguments.len(),
                    },
                    position,
                ));
            }
            for (argument, parameter) in arguments.iter().zip(&signature.parameters) {
                context.expect_assignable(&parameter.ty, argument, "argument")?;
            }
            *only
        }
        many => {
            let candidates: Vec<&FunctionSignature> =
                many.iter().map(|index| &context.signatures[*index]).collect();
            let argument_types: Vec<ScriptType> =
                arguments.iter().map(|argument| argument.ty.clone()).collect();
            let chosen = types::select_overload(context.types, &candidates, &argument_types)
                .map_err(|error| {
                    context.error(
                        CompileErrorKind::Overload {
                            name: name.to_string(),
                            error,
                        },
                        position,
                    )
                })?;
            many[chosen]
        }
    };

    Ok((
        Expression::new(
            ExprKind::Call {
                function,
                arguments,
            },
            context.signatures[function].returns.clone(),
            position,
        ),
        rest,
    ))
}

fn construction<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    position: Position,
) -> Parsed<'a, Expression> {
    let _guard = context.push("new")?;
    let (ty, tokens) = type_expression(context, tokens)?;

    if is(tokens, Separator::OpenBracket) {
        if ty == ScriptType::Void {
            return Err(context.error(CompileErrorKind::VoidDeclaration("array".to_string()), position));
        }
        let (length, rest) = expression(context, &tokens[1..])?;
        context.expect_assignable(&ScriptType::Int, &length, "array length")?;
        let rest = consume(context, rest, Separator::CloseBracket)?;
        let mut array = ScriptType::array(ty.clone());
        let mut rest = rest;
        while is(rest, Separator::OpenBracket) && is(&rest[1..], Separator::CloseBracket) {
            array = ScriptType::array(array);
            rest = &rest[2..];
        }
        let element = match &array {
            ScriptType::Array(element) => element.as_ref().clone(),
            _ => ty,
        };
        return Ok((
            Expression::new(
                ExprKind::NewArray {
                    element,
                    length: Box::new(length),
                },
                array,
                position,
            ),
            rest,
        ));
    }

    if let ScriptType::Array(element) = &ty {
        let element = element.as_ref().clone();
        if !is(tokens, Separator::OpenBrace) {
            return Err(context.expected("\"[\" or \"{\"", tokens));
        }
        let (items, rest) = initializer_items(context, &tokens[1..], &element)?;
        return Ok((
            Expression::new(
                ExprKind::NewSequence {
                    kind: SequenceKind::Array,
                    element,
                    items,
                },
                ty,
                position,
            ),
            rest,
        ));
    }

    if let ScriptType::Dictionary(key, value) = &ty {
        let (key, value) = (key.as_ref().clone(), value.as_ref().clone());
        let mut tokens = optional_empty_arguments(context, tokens)?;
        let mut entries = Vec::new();
        if is(tokens, Separator::OpenBrace) {
            tokens = &tokens[1..];
            while !is(tokens, Separator::CloseBrace) {
                let rest = consume(context, tokens, Separator::OpenBrace)?;
                let (entry_key, rest) = expression(context, rest)?;
                context.expect_assignable(&key, &entry_key, "dictionary key")?;
                let rest = consume(context, rest, Separator::Comma)?;
                let (entry_value, rest) = expression(context, rest)?;
                context.expect_assignable(&value, &entry_value, "dictionary value")?;
                let rest = consume(context, rest, Separator::CloseBrace)?;
                entries.push((entry_key, entry_value));
                tokens = match first_kind(rest) {
                    Some(TokenKind::Separator(Separator::Comma)) => &rest[1..],
                    Some(TokenKind::Separator(Separator::CloseBrace)) => rest,
                    _ => return Err(context.expected("\",\" or \"}\"", rest)),
                };
            }
            tokens = &tokens[1..];
        }
        return Ok((
            Expression::new(ExprKind::NewDictionary { key, value, entries }, ty, position),
            tokens,
        ));
    }

    if let Some((kind, element)) = ty.sequence() {
        let element = element.clone();
        let tokens = optional_empty_arguments(context, tokens)?;

        // Only lists take an initializer.
        let (items, tokens) = if kind == SequenceKind::List && is(tokens, Separator::OpenBrace) {
            initializer_items(context, &tokens[1..], &element)?
        } else {
            (Vec::new(), tokens)
        };

        return Ok((
            Expression::new(
                ExprKind::NewSequence {
                    kind,
                    element,
                    items,
                },
                ty,
                position,
            ),
            tokens,
        ));
    }

    let tokens = consume(context, tokens, Separator::OpenParen)?;
    let (arguments, rest) = arguments(context, tokens)?;
    let member = context.resolve_member(MemberOwner::Type(&ty), "new", Some(&arguments), position)?;
    Ok((
        Expression::new(
            ExprKind::Host {
                member,
                receiver: None,
                arguments,
            },
            ty,
            position,
        ),
        rest,
    ))
}

/// Skips a `()` after a collection type.
fn optional_empty_arguments<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<&'a [Token], CompileError> {
    if is(tokens, Separator::OpenParen) {
        consume(context, &tokens[1..], Separator::CloseParen)
    } else {
        Ok(tokens)
    }
}

/// `item, item, ... }` after the opening brace of a collection initializer.
fn initializer_items<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    element: &ScriptType,
) -> Parsed<'a, Vec<Expression>> {
    let mut items = Vec::new();
    let mut tokens = tokens;
    while !is(tokens, Separator::CloseBrace) {
        let (item, rest) = expression(context, tokens)?;
        context.expect_assignable(element, &item, "collection item")?;
        items.push(item);
        tokens = match first_kind(rest) {
            Some(TokenKind::Separator(Separator::Comma)) => &rest[1..],
            Some(TokenKind::Separator(Separator::CloseBrace)) => rest,
            _ => return Err(context.expected("\",\" or \"}\"", rest)),
        };
    }
    Ok((items, &tokens[1..]))
}

fn static_access<'a>(
    context: &ParseContext,
    owner: MemberOwner<'_>,
    tokens: &'a [Token],
    position: Position,
) -> Parsed<'a, Expression> {
    let tokens = consume(context, tokens, Operator::Dot)?;
    let name_position = position_of(tokens);
    let (name, tokens) = match_identifier(context, tokens)?;
    let (member, arguments, rest) = member_access(context, owner, &name, tokens, name_position)?;
    let ty = member.returns.clone();
    Ok((
        Expression::new(
            ExprKind::Host {
                member,
                receiver: None,
                arguments,
            },
            ty,
            position,
        ),
        rest,
    ))
}

fn primary<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, Expression> {
    let _guard = context.push("primary")?;
    let Some(token) = tokens.first() else {
        return Err(context.unexpected(tokens));
    };
    let position = token.position;

    match token.kind() {
        TokenKind::Literal(literal) => Ok((
            Expression::new(
                ExprKind::Literal(literal.to_value()),
                literal.script_type(),
                position,
            ),
            &tokens[1..],
        )),
        TokenKind::Identifier(name) => {
            let rest = &tokens[1..];
            if is(rest, Separator::OpenParen) {
                return function_call(context, name, &rest[1..], position);
            }
            match context.lookup(name) {
                Some(Symbol::Constant(value, ty)) => {
                    Ok((Expression::new(ExprKind::Literal(value), ty, position), rest))
                }
                _ => {
                    let identifier = IdentifierExpression::new(
                        name,
                        position,
                        &context.compilation.borrow(),
                    )
                    .map_err(|error| context.locate(error))?;
                    let ty = identifier.declared.clone();
                    Ok((
                        Expression::new(ExprKind::Identifier(identifier), ty, position),
                        rest,
                    ))
                }
            }
        }
        TokenKind::Type(type_token) => match &type_token.target {
            TypeRef::Concrete(ty) => {
                static_access(context, MemberOwner::Type(ty), &tokens[1..], position)
            }
            TypeRef::Generic(_) => Err(context.error(
                CompileErrorKind::UnappliedGeneric(type_token.alias.clone()),
                position,
            )),
        },
        TokenKind::Keyword(keyword) if keyword.is_facility() => {
            static_access(context, MemberOwner::Facility(keyword.as_str()), &tokens[1..], position)
        }
        TokenKind::Keyword(Keyword::New) => construction(context, &tokens[1..], position),
        TokenKind::Separator(Separator::OpenParen) => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            let rest = consume(context, rest, Separator::CloseParen)?;
            Ok((expr, rest))
        }
        _ => Err(context.unexpected(tokens)),
    }
}

fn consume<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    expected: impl Into<TokenKind>,
) -> Result<&'a [Token], CompileError> {
    let expected = expected.into();
    match first_kind(tokens) {
        Some(kind) if *kind == expected => Ok(&tokens[1..]),
        _ => Err(context.expected(format!("\"{}\"", expected), tokens)),
    }
}

fn match_identifier<'a>(context: &ParseContext, tokens: &'a [Token]) -> Parsed<'a, String> {
    match first_kind(tokens) {
        Some(TokenKind::Identifier(name)) => Ok((name.clone(), &tokens[1..])),
        _ => Err(context.expected("an identifier", tokens)),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{registry::HostRegistry, tokenizer::tokenize};

    fn compile(source: &str) -> Result<Program, CompileError> {
        let types = HostRegistry::new();
        let tokens = tokenize(source, &types)?;
        program(&tokens, &types)
    }

    fn error(source: &str) -> CompileErrorKind {
        compile(source).expect_err("compilation should fail").kind
    }

    fn expr(source: &str, parameters: &[(&str, ScriptType)]) -> Result<Expression, CompileError> {
        let types = HostRegistry::new();
        let tokens = tokenize(source, &types)?;
        standalone_expression(&tokens, &types, parameters)
    }

    #[test]
    fn test_declarations_and_functions() {
        let program = compile(
            "global int counter = 1;
             extern string name;
             const double Rate = 0.5;
             List<int> values = new List<int>() { 1, 2 };
             int Twice(int x) { return x * 2; }
             void Main() { counter = Twice(counter); }",
        )
        .unwrap();

        let storages: Vec<_> = program
            .declarations
            .iter()
            .map(|d| (d.storage, d.name.as_str(), d.ty.clone()))
            .collect();
        assert_eq!(
            storages,
            vec![
                (Storage::Global, "counter", ScriptType::Int),
                (Storage::Extern, "name", ScriptType::String),
                (Storage::Member, "values", ScriptType::list(ScriptType::Int)),
            ]
        );
        let names: Vec<_> = program.functions.iter().map(|f| f.signature.to_string()).collect();
        assert_eq!(names, vec!["int Twice(int x)", "void Main()"]);
    }

    #[test]
    fn test_functions_may_be_called_before_their_definition() {
        let program = compile("void Main() { Helper(); } void Helper() { }").unwrap();
        assert_eq!(program.functions.len(), 2);
    }

    #[test]
    fn test_bodies_see_later_declarations() {
        assert!(compile("void Main() { total = 3; } int total;").is_ok());
    }

    #[test]
    fn test_precedence() {
        let parsed = expr("1 + 2 * 3 ^ 2 ^ 2 - 4 / 2", &[]).unwrap();
        assert_eq!(parsed.to_string(), "((1 + (2 * (3 ^ (2 ^ 2)))) - (4 / 2))");

        let parsed = expr("a || b && !c ? 1 : 2", &[
            ("a", ScriptType::Bool),
            ("b", ScriptType::Bool),
            ("c", ScriptType::Bool),
        ])
        .unwrap();
        assert_eq!(parsed.to_string(), "((a || (b && !c)) ? 1 : 2)");
    }

    #[test]
    fn test_numeric_promotion() {
        let parsed = expr("1 + 2.5", &[]).unwrap();
        assert_eq!(parsed.ty, ScriptType::Double);
        let parsed = expr("1 + 2L", &[]).unwrap();
        assert_eq!(parsed.ty, ScriptType::Long);
        let parsed = expr("\"n = \" + 1", &[]).unwrap();
        assert_eq!(parsed.ty, ScriptType::String);
        let parsed = expr("1 < 2.0", &[]).unwrap();
        assert_eq!(parsed.ty, ScriptType::Bool);
    }

    #[test]
    fn test_negative_literals_fold() {
        let parsed = expr("-5", &[]).unwrap();
        assert!(matches!(parsed.kind, ExprKind::Literal(Value::Int(-5))));
    }

    #[test]
    fn test_int_min_literal_is_an_int() {
        let parsed = expr("-2147483648", &[]).unwrap();
        assert_eq!(parsed.ty, ScriptType::Int);
        assert!(matches!(parsed.kind, ExprKind::Literal(Value::Int(i32::MIN))));

        assert_eq!(expr("2147483648", &[]).unwrap().ty, ScriptType::Long);
        assert_eq!(expr("-2147483648L", &[]).unwrap().ty, ScriptType::Long);
        assert_eq!(expr("-(2147483648)", &[]).unwrap().ty, ScriptType::Long);
        assert!(compile("void Main() { int x = -2147483648; }").is_ok());
    }

    #[test]
    fn test_casts_and_groupings() {
        let parsed = expr("(int)2.7 + (1)", &[]).unwrap();
        assert_eq!(parsed.ty, ScriptType::Int);
        assert_eq!(parsed.to_string(), "((int)2.7 + 1)");

        assert_eq!(
            expr("(bool)1", &[]).unwrap_err().kind,
            CompileErrorKind::InvalidCast {
                from: ScriptType::Int,
                to: ScriptType::Bool
            }
        );
    }

    #[test]
    fn test_interpolation_expands_to_format() {
        let parsed = expr("$\"x = {x}\"", &[("x", ScriptType::Int)]).unwrap();
        assert_eq!(parsed.ty, ScriptType::String);
        assert_eq!(parsed.to_string(), "Format(\"x = {0}\", x)");
    }

    #[test]
    fn test_nested_interpolation() {
        let parsed = expr("$\"a{$'b{x}'}\"", &[("x", ScriptType::Int)]).unwrap();
        assert_eq!(
            parsed.to_string(),
            "Format(\"a{0}\", Format(\"b{0}\", x))"
        );
    }

    #[test]
    fn test_format_placeholders_are_checked() {
        assert!(matches!(
            expr("string.Format(\"{0} {1}\", 1)", &[]).unwrap_err().kind,
            CompileErrorKind::InvalidArguments { .. }
        ));
    }

    #[test]
    fn test_undeclared_and_duplicate_names() {
        assert_eq!(
            error("void Main() { x = 1; }"),
            CompileErrorKind::UndeclaredIdentifier("x".to_string())
        );
        assert_eq!(
            error("void Main() { int x = 1; int x = 2; }"),
            CompileErrorKind::DuplicateDeclaration("x".to_string())
        );
        assert_eq!(
            error("void Main() { int x = 1; { int x = 2; } }"),
            CompileErrorKind::DuplicateDeclaration("x".to_string())
        );
        assert!(compile("void Main() { { int x = 1; } { int x = 2; } }").is_ok());
        assert_eq!(
            error("void Main() { int x = x; }"),
            CompileErrorKind::UndeclaredIdentifier("x".to_string())
        );
    }

    #[test]
    fn test_type_errors() {
        assert_eq!(
            error("void Main() { int x = \"hello\"; }"),
            CompileErrorKind::TypeMismatch {
                expected: ScriptType::Int,
                found: ScriptType::String,
                context: "initializer"
            }
        );
        assert_eq!(
            error("void Main() { int x = null; }"),
            CompileErrorKind::TypeMismatch {
                expected: ScriptType::Int,
                found: ScriptType::Null,
                context: "initializer"
            }
        );
        assert!(compile("void Main() { string s = null; double d = 1; }").is_ok());
        assert_eq!(
            error("void Main() { int i = 0; i += 1.5; }"),
            CompileErrorKind::TypeMismatch {
                expected: ScriptType::Int,
                found: ScriptType::Double,
                context: "compound assignment"
            }
        );
        assert!(matches!(
            error("void Main() { if (1) { } }"),
            CompileErrorKind::TypeMismatch { context: "condition", .. }
        ));
    }

    #[test]
    fn test_unknown_types() {
        assert_eq!(
            error("void Main() { Foo x = 1; }"),
            CompileErrorKind::UnknownType("Foo".to_string())
        );
        assert_eq!(
            error("void Main() { List x; }"),
            CompileErrorKind::UnappliedGeneric("List".to_string())
        );
        assert_eq!(
            error("void Main() { void x; }"),
            CompileErrorKind::VoidDeclaration("x".to_string())
        );
    }

    #[test]
    fn test_control_flow_placement() {
        assert_eq!(error("void Main() { break; }"), CompileErrorKind::BreakOutsideLoop);
        assert_eq!(
            error("void Main() { switch (1) { case 1: continue; } }"),
            CompileErrorKind::ContinueOutsideLoop
        );
        assert!(compile("void Main() { while (true) { switch (1) { case 1: continue; } } }").is_ok());
        assert_eq!(
            error("int Main() { return; }"),
            CompileErrorKind::MissingReturnValue(ScriptType::Int)
        );
        assert_eq!(error("void Main() { return 1; }"), CompileErrorKind::UnexpectedReturnValue);
    }

    #[test]
    fn test_switch_labels() {
        assert!(matches!(
            error("void Main() { switch (1) { case 1: break; case 1: break; } }"),
            CompileErrorKind::DuplicateCase(_)
        ));
        assert_eq!(
            error("void Main() { switch (1) { default: break; default: break; } }"),
            CompileErrorKind::MultipleDefaults
        );
    }

    #[test]
    fn test_statements_must_do_something() {
        assert_eq!(error("void Main() { 1 + 2; }"), CompileErrorKind::NotAStatement);
        assert_eq!(error("void Main() { 1 = 2; }"), CompileErrorKind::NotAssignable);
        assert!(compile("void Main() { Debug.Log(\"hi\"); }").is_ok());
    }

    #[test]
    fn test_constants_fold_and_cannot_be_assigned() {
        let parsed = compile("const int Limit = 3; int Main() { return Limit; }").unwrap();
        let StatementKind::Return(Some(value)) = &parsed.functions[0].body[0].kind else {
            panic!("expected a return statement");
        };
        assert!(matches!(value.kind, ExprKind::Literal(Value::Int(3))));

        assert_eq!(
            error("const int Limit = 3; void Main() { Limit = 4; }"),
            CompileErrorKind::NotAssignable
        );
        assert_eq!(
            error("int seed = 1; const int Limit = seed;"),
            CompileErrorKind::ConstantNotLiteral("Limit".to_string())
        );
    }

    #[test]
    fn test_function_call_checks() {
        assert_eq!(
            error("void Main() { Nope(); }"),
            CompileErrorKind::UnknownFunction("Nope".to_string())
        );
        assert_eq!(
            error("void F(int a) { } void Main() { F(); }"),
            CompileErrorKind::ArgumentCount {
                name: "F".to_string(),
                expected: 1,
                found: 0
            }
        );
        assert_eq!(
            error("void F() { } void F() { }"),
            CompileErrorKind::DuplicateDeclaration("F".to_string())
        );
    }

    #[test]
    fn test_overloads_resolve_by_argument_types() {
        let program = compile(
            "int F(int a) { return a; }
             int F(string s) { return s.Length; }
             double G(long a) { return a; }
             double G(double d) { return d; }
             void Main() { int a = F(1); int b = F(\"xy\"); double c = G(2.5); }",
        )
        .unwrap();
        let main = &program.functions[4];
        let called: Vec<usize> = main
            .body
            .iter()
            .filter_map(|statement| match &statement.kind {
                StatementKind::Declaration {
                    initializer: Some(Expression {
                        kind: ExprKind::Call { function, .. },
                        ..
                    }),
                    ..
                } => Some(*function),
                _ => None,
            })
            .collect();
        assert_eq!(called, vec![0, 1, 3]);

        assert_eq!(
            error("int F(int a) { return a; } long F(int b) { return b; }"),
            CompileErrorKind::DuplicateDeclaration("F".to_string())
        );
        assert_eq!(
            error("void G(long a) { } void G(double d) { } void Main() { G(1); }"),
            CompileErrorKind::Overload {
                name: "G".to_string(),
                error: MemberError::Ambiguous(2)
            }
        );
        assert!(matches!(
            error("void H(int a) { } void H(string s) { } void Main() { H(true); }"),
            CompileErrorKind::Overload {
                error: MemberError::NoMatchingOverload(_),
                ..
            }
        ));
    }

    #[test]
    fn test_arrays_and_dictionaries() {
        let program = compile(
            "int[] squares = new int[4];
             string[] names = new string[] { \"a\", \"b\" };
             int[][] grid = new int[2][];
             Dictionary<string, int> ages = new Dictionary<string, int>() { { \"ann\", 30 } };
             Queue<int> pending = new Queue<int>();
             void Main() {
                 squares[1] = squares.Length;
                 ages[\"bob\"] = ages[\"ann\"] + 1;
                 foreach (string name in ages) { Debug.Log(name); }
                 foreach (int n in pending) { }
             }",
        )
        .unwrap();
        let types: Vec<String> = program
            .declarations
            .iter()
            .map(|declaration| declaration.ty.to_string())
            .collect();
        assert_eq!(
            types,
            vec![
                "int[]",
                "string[]",
                "int[][]",
                "Dictionary<string, int>",
                "Queue<int>"
            ]
        );

        assert!(matches!(
            error(
                "void Main() {
                     Dictionary<string, int> d = new Dictionary<string, int>();
                     int x = d[1];
                 }"
            ),
            CompileErrorKind::TypeMismatch { context: "index", .. }
        ));
        assert!(matches!(
            error("void Main() { int[] xs = new int[\"3\"]; }"),
            CompileErrorKind::TypeMismatch { context: "array length", .. }
        ));
        assert!(matches!(
            error("void Main() { Dictionary<int> d; }"),
            CompileErrorKind::GenericArity { expected: 2, found: 1, .. }
        ));
        assert_eq!(
            error("void Main() { Queue<int> q = new Queue<int>(); int x = q[0]; }"),
            CompileErrorKind::NotIndexable(SequenceKind::Queue.of(ScriptType::Int))
        );
    }

    #[test]
    fn test_members_and_lists() {
        assert!(compile(
            "void Main() {
                List<string> names = new List<string>() { \"a\" };
                names.Add(\"b\");
                int n = names.Count + names[0].Length;
                foreach (string name in names) { Debug.Log(name.ToUpper()); }
             }"
        )
        .is_ok());
        assert!(matches!(
            error("void Main() { int x = 1; x.Nope(); }"),
            CompileErrorKind::Member { .. }
        ));
        assert_eq!(
            error("void Main() { int x = 1; foreach (int y in x) { } }"),
            CompileErrorKind::NotIterable(ScriptType::Int)
        );
    }

    #[test]
    fn test_deep_nesting_is_a_compile_error() {
        let source = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(
            expr(&source, &[]).unwrap_err().kind,
            CompileErrorKind::NestingTooDeep(MAX_RULE_DEPTH)
        );

        let blocks = format!("void Main() {{ {}{} }}", "{".repeat(5_000), "}".repeat(5_000));
        assert_eq!(error(&blocks), CompileErrorKind::NestingTooDeep(MAX_RULE_DEPTH));

        let negations = format!("void Main() {{ int x = {}1; }}", "- ".repeat(5_000));
        assert_eq!(error(&negations), CompileErrorKind::NestingTooDeep(MAX_RULE_DEPTH));

        let nested = format!("void Main() {{ int x = {}1{}; }}", "(".repeat(12), ")".repeat(12));
        assert!(compile(&nested).is_ok());
    }

    #[test]
    fn test_long_operator_chains_are_bounded() {
        let chain = vec!["1"; 1_000].join(" + ");
        assert_eq!(
            expr(&chain, &[]).unwrap_err().kind,
            CompileErrorKind::NestingTooDeep(MAX_EXPRESSION_HEIGHT)
        );
        let calls = format!("s{}", ".ToString()".repeat(1_000));
        assert_eq!(
            expr(&calls, &[("s", ScriptType::String)]).unwrap_err().kind,
            CompileErrorKind::NestingTooDeep(MAX_EXPRESSION_HEIGHT)
        );
        let short = vec!["1"; 100].join(" + ");
        assert_eq!(expr(&short, &[]).unwrap().height, 100);
    }

    #[test]
    fn test_long_else_if_chains_do_not_nest() {
        let branches: String = (0..500)
            .map(|i| format!(" else if (x == {}) {{ x = {}; }}", i, i + 1))
            .collect();
        let source = format!("void Main() {{ int x = 0; if (x < 0) {{ }}{} else {{ }} }}", branches);
        let program = compile(&source).unwrap();
        let StatementKind::If(_, _, Some(chained)) = &program.functions[0].body[1].kind else {
            panic!("expected an if statement with an else branch");
        };
        assert!(matches!(chained.kind, StatementKind::If(..)));
    }

    #[test]
    fn test_errors_carry_breadcrumbs() {
        let error = compile("void Main() { int x = ; }").unwrap_err();
        assert!(error.context.contains(&"statement"));
        assert!(error.context.contains(&"primary"));
    }
}
