use std::fmt::Display;

use crate::{
    span::Position,
    types::{ScriptType, TypeRef},
    value::Value,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, position: Position) -> Self {
        Self { kind, position }
    }

    pub fn kind(&self) -> &TokenKind {
        &self.kind
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Type(TypeToken),
    Identifier(String),
    Operator(Operator),
    Separator(Separator),
    Literal(Literal),
    Interpolated(InterpolatedString),
    Eof,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Keyword(keyword) => write!(f, "{}", keyword),
            TokenKind::Type(ty) => write!(f, "{}", ty.alias),
            TokenKind::Identifier(name) => write!(f, "{}", name),
            TokenKind::Operator(op) => write!(f, "{}", op),
            TokenKind::Separator(sep) => write!(f, "{}", sep),
            TokenKind::Literal(literal) => write!(f, "{}", literal),
            TokenKind::Interpolated(s) => write!(f, "$\"{}\"", s.format),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

macro_rules! spelled_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),*
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),*
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl From<$name> for TokenKind {
            fn from(value: $name) -> Self {
                TokenKind::$name(value)
            }
        }
    };
}

spelled_enum! {
    /// Reserved words. `ElseIf` has no spelling of its own; the tokenizer
    /// merges `else if`.
    Keyword {
        If => "if",
        ElseIf => "else if",
        Else => "else",
        Switch => "switch",
        While => "while",
        For => "for",
        ForEach => "foreach",
        In => "in",
        Continue => "continue",
        Break => "break",
        Return => "return",
        Case => "case",
        Default => "default",
        Global => "global",
        Extern => "extern",
        Const => "const",
        System => "System",
        Debug => "Debug",
        Math => "Math",
        New => "new",
    }
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Keyword> {
        Some(match word {
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "switch" => Keyword::Switch,
            "while" => Keyword::While,
            "for" => Keyword::For,
            "foreach" => Keyword::ForEach,
            "in" => Keyword::In,
            "continue" => Keyword::Continue,
            "break" => Keyword::Break,
            "return" => Keyword::Return,
            "case" => Keyword::Case,
            "default" => Keyword::Default,
            "global" => Keyword::Global,
            "extern" => Keyword::Extern,
            "const" => Keyword::Const,
            "System" => Keyword::System,
            "Debug" => Keyword::Debug,
            "Math" => Keyword::Math,
            "new" => Keyword::New,
            _ => return None,
        })
    }

    /// Keywords naming a static facility (`Math.Max(...)`).
    pub fn is_facility(&self) -> bool {
        matches!(self, Keyword::System | Keyword::Debug | Keyword::Math)
    }
}

spelled_enum! {
    Operator {
        Assign => "=",
        PlusAssign => "+=",
        MinusAssign => "-=",
        StarAssign => "*=",
        SlashAssign => "/=",
        PercentAssign => "%=",
        CaretAssign => "^=",
        AndAssign => "&=",
        OrAssign => "|=",
        Equal => "==",
        NotEqual => "!=",
        Less => "<",
        LessEqual => "<=",
        Greater => ">",
        GreaterEqual => ">=",
        Not => "!",
        Plus => "+",
        Minus => "-",
        Star => "*",
        Slash => "/",
        Percent => "%",
        Caret => "^",
        Increment => "++",
        Decrement => "--",
        And => "&&",
        Or => "||",
        Question => "?",
        Dot => ".",
    }
}

spelled_enum! {
    Separator {
        OpenParen => "(",
        CloseParen => ")",
        OpenBrace => "{",
        CloseBrace => "}",
        OpenBracket => "[",
        CloseBracket => "]",
        Semicolon => ";",
        Colon => ":",
        Comma => ",",
    }
}

impl Separator {
    /// The separator that closes this one, for opening brackets.
    pub fn closing(&self) -> Option<Separator> {
        match self {
            Separator::OpenParen => Some(Separator::CloseParen),
            Separator::OpenBrace => Some(Separator::CloseBrace),
            Separator::OpenBracket => Some(Separator::CloseBracket),
            _ => None,
        }
    }

    pub fn is_closing(&self) -> bool {
        matches!(
            self,
            Separator::CloseParen | Separator::CloseBrace | Separator::CloseBracket
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i32),
    Long(i64),
    /// `2147483648` without a suffix. A long, except directly after a unary
    /// minus, where the pair is `int.MinValue`.
    IntMinMagnitude,
    Float(f32),
    Double(f64),
    String(String),
    Null,
}

impl Literal {
    pub fn script_type(&self) -> ScriptType {
        match self {
            Literal::Bool(_) => ScriptType::Bool,
            Literal::Int(_) => ScriptType::Int,
            Literal::Long(_) | Literal::IntMinMagnitude => ScriptType::Long,
            Literal::Float(_) => ScriptType::Float,
            Literal::Double(_) => ScriptType::Double,
            Literal::String(_) => ScriptType::String,
            Literal::Null => ScriptType::Null,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Long(l) => Value::Long(*l),
            Literal::IntMinMagnitude => Value::Long(-(i32::MIN as i64)),
            Literal::Float(f) => Value::Float(*f),
            Literal::Double(d) => Value::Double(*d),
            Literal::String(s) => Value::string(s),
            Literal::Null => Value::Null,
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::Float(x) => write!(f, "{}f", x),
            Literal::Long(l) => write!(f, "{}L", l),
            other => write!(f, "{}", other.to_value()),
        }
    }
}

/// A source alias bound to a host type, possibly still generic.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeToken {
    pub alias: String,
    pub target: TypeRef,
}

impl TypeToken {
    pub fn new(alias: impl Into<String>, target: TypeRef) -> Self {
        Self {
            alias: alias.into(),
            target,
        }
    }

    pub fn concrete(alias: impl Into<String>, ty: ScriptType) -> Self {
        Self::new(alias, TypeRef::Concrete(ty))
    }

    /// True for type constructors such as `List` that need type arguments
    /// before they can declare anything.
    pub fn is_generic_type(&self) -> bool {
        matches!(self.target, TypeRef::Generic(_))
    }
}

/// `$"..."` before expansion: a composite format string and the tokens of
/// each embedded argument in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedString {
    pub format: String,
    pub arguments: Vec<Vec<Token>>,
}

impl InterpolatedString {
    /// The equivalent `string.Format(format, arg0, arg1, ...)` token sequence.
    ///
    /// Pure: every call yields the same tokens, all positioned at `position`
    /// except the argument tokens, which keep their own.
    pub fn rewrite_token(&self, position: Position) -> impl Iterator<Item = Token> + '_ {
        let at = move |kind| Token::new(kind, position);
        let head = [
            at(TokenKind::Type(TypeToken::concrete("string", ScriptType::String))),
            at(TokenKind::Operator(Operator::Dot)),
            at(TokenKind::Identifier("Format".to_string())),
            at(TokenKind::Separator(Separator::OpenParen)),
            at(TokenKind::Literal(Literal::String(self.format.clone()))),
        ];

        head.into_iter()
            .chain(self.arguments.iter().flat_map(move |group| {
                std::iter::once(at(TokenKind::Separator(Separator::Comma)))
                    .chain(group.iter().cloned())
            }))
            .chain(std::iter::once(at(TokenKind::Separator(
                Separator::CloseParen,
            ))))
    }
}
