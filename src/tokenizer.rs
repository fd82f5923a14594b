use crate::{
    span::Position,
    token::{InterpolatedString, Keyword, Literal, Operator, Separator, Token, TokenKind, TypeToken},
    types::{ScriptType, TypeSystem},
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} at {position}")]
pub struct TokenizeError {
    pub kind: TokenizeErrorKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeErrorKind {
    #[error("Unexpected character '{0}'")]
    UnexpectedCharacter(char),
    #[error("Single '{0}' is not an operator, did you mean '{0}{0}'?")]
    SingleLogicalOperator(char),
    #[error("Unterminated string literal")]
    UnterminatedString,
    #[error("Unterminated interpolated string")]
    UnterminatedInterpolation,
    #[error("Unterminated block comment")]
    UnterminatedComment,
    #[error("Invalid escape sequence '\\{0}'")]
    InvalidEscape(char),
    #[error("Malformed numeric literal \"{0}\"")]
    MalformedNumber(String),
    #[error("Empty interpolation argument")]
    EmptyInterpolation,
    #[error("Unmatched '{0}' in interpolated string, use '{0}{0}' for a literal brace")]
    UnmatchedInterpolationBrace(char),
    #[error("Unmatched \"{0}\"")]
    UnmatchedSeparator(Separator),
    #[error("Expected \"{expected}\" but found \"{found}\"")]
    MismatchedSeparator {
        expected: Separator,
        found: Separator,
    },
    #[error("Unclosed \"{0}\"")]
    UnclosedSeparator(Separator),
}

/// Lexes source into tokens, merges `else if` and checks bracket balance.
/// The result always ends with `TokenKind::Eof`.
pub fn tokenize(source: &str, types: &dyn TypeSystem) -> Result<Vec<Token>, TokenizeError> {
    let tokens = Tokenizer::new(source, types).tokens()?;
    let tokens = merge_else_if(tokens);
    check_separators(&tokens)?;
    Ok(tokens)
}

pub struct Tokenizer<'s, 't> {
    rest: &'s str,
    position: Position,
    types: &'t dyn TypeSystem,
}

impl<'s, 't> Tokenizer<'s, 't> {
    pub fn new(source: &'s str, types: &'t dyn TypeSystem) -> Self {
        Self::at(source, Position::default(), types)
    }

    fn at(source: &'s str, position: Position, types: &'t dyn TypeSystem) -> Self {
        Self {
            rest: source,
            position,
            types,
        }
    }

    /// Every remaining token, including the final `Eof`.
    pub fn tokens(mut self) -> Result<Vec<Token>, TokenizeError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.token()?;
            if matches!(token.kind, TokenKind::Eof) {
                tokens.push(token);
                break;
            }
            tokens.push(token);
        }
        Ok(tokens)
    }

    pub fn token(&mut self) -> Result<Token, TokenizeError> {
        self.skip_trivia()?;

        let position = self.position;
        let Some(first) = self.rest.chars().next() else {
            return Ok(Token::new(TokenKind::Eof, position));
        };

        let kind = if first.is_ascii_digit() {
            self.number()?
        } else if first.is_ascii_alphabetic() || first == '_' {
            self.word()
        } else if first == '"' || first == '\'' {
            self.string(first)?
        } else if first == '$' && matches!(self.rest[1..].chars().next(), Some('"' | '\'')) {
            self.interpolated()?
        } else if let Some((kind, rest)) = maximal(SYMBOLS, self.rest) {
            self.consume(self.rest.len() - rest.len());
            kind
        } else if first == '&' || first == '|' {
            return Err(self.error(TokenizeErrorKind::SingleLogicalOperator(first)));
        } else {
            return Err(self.error(TokenizeErrorKind::UnexpectedCharacter(first)));
        };

        Ok(Token::new(kind, position))
    }

    fn consume(&mut self, len: usize) -> &'s str {
        let (taken, rest) = self.rest.split_at(len);
        self.position = self.position.advance(taken);
        self.rest = rest;
        taken
    }

    fn error(&self, kind: TokenizeErrorKind) -> TokenizeError {
        self.error_at(kind, 0)
    }

    fn error_at(&self, kind: TokenizeErrorKind, offset: usize) -> TokenizeError {
        TokenizeError {
            kind,
            position: self.position.advance(&self.rest[..offset]),
        }
    }

    fn skip_trivia(&mut self) -> Result<(), TokenizeError> {
        loop {
            if let Some((_, rest)) = maximal(&[whitespace, line_comment], self.rest) {
                self.consume(self.rest.len() - rest.len());
            } else if self.rest.starts_with("/*") {
                let end = self.rest[2..]
                    .find("*/")
                    .ok_or_else(|| self.error(TokenizeErrorKind::UnterminatedComment))?;
                self.consume(end + 4);
            } else {
                return Ok(());
            }
        }
    }

    fn word(&mut self) -> TokenKind {
        let len = self
            .rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .count();
        let word = self.consume(len);

        if let Some(keyword) = Keyword::from_word(word) {
            return TokenKind::Keyword(keyword);
        }

        match word {
            "true" => TokenKind::Literal(Literal::Bool(true)),
            "false" => TokenKind::Literal(Literal::Bool(false)),
            "null" => TokenKind::Literal(Literal::Null),
            "void" => TokenKind::Type(TypeToken::concrete("void", ScriptType::Void)),
            _ => match self.types.resolve_alias(word) {
                Some(target) => TokenKind::Type(TypeToken::new(word, target)),
                None => TokenKind::Identifier(word.to_string()),
            },
        }
    }

    fn number(&mut self) -> Result<TokenKind, TokenizeError> {
        let text = self.rest;
        let bytes = text.as_bytes();
        let malformed = |end: usize| {
            self.error(TokenizeErrorKind::MalformedNumber(text[..end].to_string()))
        };

        let mut len = digits(bytes, 0);
        let mut floating = false;
        if bytes.get(len) == Some(&b'.') && bytes.get(len + 1).is_some_and(u8::is_ascii_digit) {
            floating = true;
            len = digits(bytes, len + 1);
        }
        if matches!(bytes.get(len), Some(b'e' | b'E')) {
            let mut exponent = len + 1;
            if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
                exponent += 1;
            }
            if !bytes.get(exponent).is_some_and(u8::is_ascii_digit) {
                return Err(malformed(exponent.min(text.len())));
            }
            floating = true;
            len = digits(bytes, exponent);
        }

        let body = &text[..len];
        let suffix = match bytes.get(len) {
            Some(b'f' | b'F') => Some('f'),
            Some(b'd' | b'D') => Some('d'),
            Some(b'L' | b'l') => Some('L'),
            _ => None,
        };
        if suffix.is_some() {
            len += 1;
        }

        if bytes
            .get(len)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            let end = len
                + bytes[len..]
                    .iter()
                    .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_' || **b == b'.')
                    .count();
            return Err(malformed(end));
        }

        let literal = match suffix {
            Some('f') => body.parse().ok().map(Literal::Float),
            Some('d') => body.parse().ok().map(Literal::Double),
            Some(_) if floating => None,
            Some(_) => body.parse().ok().map(Literal::Long),
            None if floating => body.parse().ok().map(Literal::Double),
            None => match body.parse::<i64>() {
                Ok(i) if i == -(i32::MIN as i64) => Some(Literal::IntMinMagnitude),
                Ok(i) => Some(i32::try_from(i).map_or(Literal::Long(i), Literal::Int)),
                Err(_) => None,
            },
        }
        .ok_or_else(|| malformed(len))?;

        self.consume(len);
        Ok(TokenKind::Literal(literal))
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, TokenizeError> {
        let (value, len) =
            quoted(self.rest, quote).map_err(|(kind, offset)| self.error_at(kind, offset))?;
        self.consume(len);
        Ok(TokenKind::Literal(Literal::String(value)))
    }

    /// `$"text {expr} {expr,align:spec}"`. Each argument is lexed with a
    /// nested tokenizer positioned where the argument starts.
    fn interpolated(&mut self) -> Result<TokenKind, TokenizeError> {
        let source = self.rest;
        let quote = if source[1..].starts_with('"') { '"' } else { '\'' };
        let unterminated = || self.error(TokenizeErrorKind::UnterminatedInterpolation);

        let mut format = String::new();
        let mut arguments = Vec::new();
        let mut i = 2;

        loop {
            let c = source[i..].chars().next().ok_or_else(unterminated)?;
            match c {
                c if c == quote => {
                    i += 1;
                    break;
                }
                '\n' => return Err(unterminated()),
                '\\' => {
                    let e = source[i + 1..].chars().next().ok_or_else(unterminated)?;
                    let unescaped = escape(e)
                        .ok_or_else(|| self.error_at(TokenizeErrorKind::InvalidEscape(e), i))?;
                    format.push(unescaped);
                    i += 1 + e.len_utf8();
                }
                '{' if source[i + 1..].starts_with('{') => {
                    format.push_str("{{");
                    i += 2;
                }
                '}' if source[i + 1..].starts_with('}') => {
                    format.push_str("}}");
                    i += 2;
                }
                '}' => {
                    return Err(
                        self.error_at(TokenizeErrorKind::UnmatchedInterpolationBrace('}'), i)
                    )
                }
                '{' => {
                    let start = i + 1;
                    let (len, terminator) =
                        argument_extent(&source[start..], quote).ok_or_else(unterminated)?;
                    let text = &source[start..start + len];
                    if text.trim().is_empty() {
                        return Err(self.error_at(TokenizeErrorKind::EmptyInterpolation, i));
                    }

                    let position = self.position.advance(&source[..start]);
                    let mut tokens = Tokenizer::at(text, position, self.types).tokens()?;
                    tokens.pop();
                    check_separators(&tokens)?;

                    format.push('{');
                    format.push_str(&arguments.len().to_string());
                    arguments.push(tokens);

                    i = start + len;
                    if terminator == '}' {
                        format.push('}');
                        i += 1;
                    } else {
                        let spec = source[i..]
                            .find(|c: char| c == '}' || c == quote || c == '\n')
                            .filter(|n| source[i + n..].starts_with('}'))
                            .ok_or_else(unterminated)?;
                        format.push_str(&source[i..=i + spec]);
                        i += spec + 1;
                    }
                }
                c => {
                    format.push(c);
                    i += c.len_utf8();
                }
            }
        }

        self.consume(i);
        Ok(TokenKind::Interpolated(InterpolatedString { format, arguments }))
    }
}

fn digits(bytes: &[u8], from: usize) -> usize {
    from + bytes[from.min(bytes.len())..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count()
}

fn escape(c: char) -> Option<char> {
    match c {
        '\\' => Some('\\'),
        '\'' => Some('\''),
        '"' => Some('"'),
        'n' => Some('\n'),
        'r' => Some('\r'),
        't' => Some('\t'),
        _ => None,
    }
}

/// Unescaped contents and byte length (quotes included) of the literal
/// opening at `source[0]`. Errors carry a byte offset into `source`.
fn quoted(source: &str, quote: char) -> Result<(String, usize), (TokenizeErrorKind, usize)> {
    let mut value = String::new();
    let mut chars = source.char_indices().skip(1);

    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((value, i + c.len_utf8())),
            '\n' => break,
            '\\' => {
                let (_, e) = chars
                    .next()
                    .ok_or((TokenizeErrorKind::UnterminatedString, 0))?;
                value.push(escape(e).ok_or((TokenizeErrorKind::InvalidEscape(e), i))?);
            }
            c => value.push(c),
        }
    }

    Err((TokenizeErrorKind::UnterminatedString, 0))
}

/// Length of an interpolation argument and the character ending it: `}`,
/// or `,`/`:` introducing alignment or a format specifier.
fn argument_extent(source: &str, outer_quote: char) -> Option<(usize, char)> {
    let mut depth = 0usize;
    let mut chars = source.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '\n' => return None,
            c if c == outer_quote => return None,
            '"' | '\'' => {
                // Skip over a literal using the other quote character.
                let mut escaped = false;
                loop {
                    let (_, inner) = chars.next()?;
                    match inner {
                        '\n' => return None,
                        _ if escaped => escaped = false,
                        '\\' => escaped = true,
                        inner if inner == c => break,
                        _ => {}
                    }
                }
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth > 0 => depth -= 1,
            '}' | ',' | ':' if depth == 0 => return Some((i, c)),
            _ => {}
        }
    }

    None
}

fn merge_else_if(tokens: Vec<Token>) -> Vec<Token> {
    let mut merged = Vec::with_capacity(tokens.len());
    let mut tokens = tokens.into_iter().peekable();

    while let Some(token) = tokens.next() {
        if token.kind == TokenKind::Keyword(Keyword::Else)
            && tokens
                .peek()
                .is_some_and(|next| next.kind == TokenKind::Keyword(Keyword::If))
        {
            tokens.next();
            merged.push(Token::new(TokenKind::Keyword(Keyword::ElseIf), token.position));
        } else {
            merged.push(token);
        }
    }

    merged
}

fn check_separators(tokens: &[Token]) -> Result<(), TokenizeError> {
    let mut open: Vec<(Separator, Position)> = Vec::new();

    for token in tokens {
        let TokenKind::Separator(separator) = token.kind else {
            continue;
        };
        if let Some(closing) = separator.closing() {
            open.push((closing, token.position));
        } else if separator.is_closing() {
            match open.pop() {
                Some((expected, _)) if expected == separator => {}
                Some((expected, _)) => {
                    return Err(TokenizeError {
                        kind: TokenizeErrorKind::MismatchedSeparator {
                            expected,
                            found: separator,
                        },
                        position: token.position,
                    })
                }
                None => {
                    return Err(TokenizeError {
                        kind: TokenizeErrorKind::UnmatchedSeparator(separator),
                        position: token.position,
                    })
                }
            }
        }
    }

    match open.pop() {
        Some((closing, position)) => Err(TokenizeError {
            kind: TokenizeErrorKind::UnclosedSeparator(match closing {
                Separator::CloseParen => Separator::OpenParen,
                Separator::CloseBracket => Separator::OpenBracket,
                _ => Separator::OpenBrace,
            }),
            position,
        }),
        None => Ok(()),
    }
}

fn maximal<'a, T: std::fmt::Debug>(
    parsers: &[fn(&str) -> Option<(T, &str)>],
    source: &'a str,
) -> Option<(T, &'a str)> {
    let mut min_left = source.len() + 1;
    let mut max_match = None;

    let matching_parsers = parsers.iter().filter_map(|parser| parser(source));
    for (m, rest) in matching_parsers {
        let left = rest.len();
        if left < min_left {
            min_left = left;
            max_match = Some((m, rest));
        }
    }

    max_match
}

fn whitespace(source: &str) -> Option<((), &str)> {
    let len = source
        .chars()
        .take_while(|c| c.is_whitespace())
        .map(char::len_utf8)
        .sum();
    if len > 0 {
        Some(((), &source[len..]))
    } else {
        None
    }
}

fn line_comment(source: &str) -> Option<((), &str)> {
    if source.starts_with("//") {
        let len = source
            .chars()
            .take_while(|c| *c != '\n')
            .map(char::len_utf8)
            .sum();
        Some(((), &source[len..]))
    } else {
        None
    }
}

macro_rules! match_literal {
    ($name:ident, $word:literal, $token:expr) => {
        fn $name(source: &str) -> Option<(TokenKind, &str)> {
            if source.starts_with($word) {
                Some(($token, &source[$word.len()..]))
            } else {
                None
            }
        }
    };
}

macro_rules! operator {
    ($name:ident, $word:literal, $op:ident) => {
        match_literal! { $name, $word, TokenKind::Operator(Operator::$op) }
    };
}

macro_rules! separator {
    ($name:ident, $word:literal, $sep:ident) => {
        match_literal! { $name, $word, TokenKind::Separator(Separator::$sep) }
    };
}

separator! { open_paren, "(", OpenParen }
separator! { close_paren, ")", CloseParen }
separator! { open_brace, "{", OpenBrace }
separator! { close_brace, "}", CloseBrace }
separator! { open_bracket, "[", OpenBracket }
separator! { close_bracket, "]", CloseBracket }
separator! { semicolon, ";", Semicolon }
separator! { colon, ":", Colon }
separator! { comma, ",", Comma }
operator! { assign, "=", Assign }
operator! { plus_assign, "+=", PlusAssign }
operator! { minus_assign, "-=", MinusAssign }
operator! { star_assign, "*=", StarAssign }
operator! { slash_assign, "/=", SlashAssign }
operator! { percent_assign, "%=", PercentAssign }
operator! { caret_assign, "^=", CaretAssign }
operator! { and_assign, "&=", AndAssign }
operator! { or_assign, "|=", OrAssign }
operator! { equal, "==", Equal }
operator! { not_equal, "!=", NotEqual }
operator! { less, "<", Less }
operator! { less_equal, "<=", LessEqual }
operator! { greater, ">", Greater }
operator! { greater_equal, ">=", GreaterEqual }
operator! { not, "!", Not }
operator! { plus, "+", Plus }
operator! { minus, "-", Minus }
operator! { star, "*", Star }
operator! { slash, "/", Slash }
operator! { percent, "%", Percent }
operator! { caret, "^", Caret }
operator! { increment, "++", Increment }
operator! { decrement, "--", Decrement }
operator! { and, "&&", And }
operator! { or, "||", Or }
operator! { question, "?", Question }
operator! { dot, ".", Dot }

const SYMBOLS: &[fn(&str) -> Option<(TokenKind, &str)>] = &[
    open_paren,
    close_paren,
    open_brace,
    close_brace,
    open_bracket,
    close_bracket,
    semicolon,
    colon,
    comma,
    assign,
    plus_assign,
    minus_assign,
    star_assign,
    slash_assign,
    percent_assign,
    caret_assign,
    and_assign,
    or_assign,
    equal,
    not_equal,
    less,
    less_equal,
    greater,
    greater_equal,
    not,
    plus,
    minus,
    star,
    slash,
    percent,
    caret,
    increment,
    decrement,
    and,
    or,
    question,
    dot,
];

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{registry::HostRegistry, types::GenericConstructor};

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, &HostRegistry::new())
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    fn error(source: &str) -> TokenizeError {
        tokenize(source, &HostRegistry::new()).unwrap_err()
    }

    fn ident(name: &str) -> TokenKind {
        TokenKind::Identifier(name.to_string())
    }

    #[test]
    fn test_tokens() {
        assert_eq!(
            kinds("int x = 1;"),
            vec![
                TokenKind::Type(TypeToken::concrete("int", ScriptType::Int)),
                ident("x"),
                TokenKind::Operator(Operator::Assign),
                TokenKind::Literal(Literal::Int(1)),
                TokenKind::Separator(Separator::Semicolon),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokens_with_comments() {
        assert_eq!(
            kinds("x = 1; // comment\n/* block\n comment */ y"),
            vec![
                ident("x"),
                TokenKind::Operator(Operator::Assign),
                TokenKind::Literal(Literal::Int(1)),
                TokenKind::Separator(Separator::Semicolon),
                ident("y"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("a\n  bb = 3;", &HostRegistry::new()).unwrap();
        let positions: Vec<_> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(
            positions,
            vec![
                Position::new(1, 1),
                Position::new(2, 3),
                Position::new(2, 6),
                Position::new(2, 8),
                Position::new(2, 9),
                Position::new(2, 10),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 3f 4L 5000000000 1e3 7.ToString"),
            vec![
                TokenKind::Literal(Literal::Int(1)),
                TokenKind::Literal(Literal::Double(2.5)),
                TokenKind::Literal(Literal::Float(3.0)),
                TokenKind::Literal(Literal::Long(4)),
                TokenKind::Literal(Literal::Long(5_000_000_000)),
                TokenKind::Literal(Literal::Double(1000.0)),
                TokenKind::Literal(Literal::Int(7)),
                TokenKind::Operator(Operator::Dot),
                ident("ToString"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_int_min_magnitude_is_kept_apart() {
        assert_eq!(
            kinds("2147483648 2147483648L 2147483647"),
            vec![
                TokenKind::Literal(Literal::IntMinMagnitude),
                TokenKind::Literal(Literal::Long(2_147_483_648)),
                TokenKind::Literal(Literal::Int(i32::MAX)),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_malformed_numbers() {
        assert_eq!(
            error("x = 12abc;").kind,
            TokenizeErrorKind::MalformedNumber("12abc".to_string())
        );
        assert_eq!(
            error("1e+").kind,
            TokenizeErrorKind::MalformedNumber("1e+".to_string())
        );
        assert_eq!(
            error("2.5L").kind,
            TokenizeErrorKind::MalformedNumber("2.5L".to_string())
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            kinds(r#""a\"b" 'c\n'"#),
            vec![
                TokenKind::Literal(Literal::String("a\"b".to_string())),
                TokenKind::Literal(Literal::String("c\n".to_string())),
                TokenKind::Eof,
            ]
        );
        assert_eq!(error("\"abc").kind, TokenizeErrorKind::UnterminatedString);
        assert_eq!(error("\"a\nb\"").kind, TokenizeErrorKind::UnterminatedString);
        let invalid = error("x = \"a\\q\";");
        assert_eq!(invalid.kind, TokenizeErrorKind::InvalidEscape('q'));
        assert_eq!(invalid.position, Position::new(1, 7));
    }

    #[test]
    fn test_keywords_and_words() {
        assert_eq!(
            kinds("while null true Math List void foo"),
            vec![
                TokenKind::Keyword(Keyword::While),
                TokenKind::Literal(Literal::Null),
                TokenKind::Literal(Literal::Bool(true)),
                TokenKind::Keyword(Keyword::Math),
                TokenKind::Type(TypeToken::new(
                    "List",
                    crate::types::TypeRef::Generic(GenericConstructor::List)
                )),
                TokenKind::Type(TypeToken::concrete("void", ScriptType::Void)),
                ident("foo"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_else_if_is_merged() {
        assert_eq!(
            kinds("else if else x"),
            vec![
                TokenKind::Keyword(Keyword::ElseIf),
                TokenKind::Keyword(Keyword::Else),
                ident("x"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_maximal_munch_operators() {
        assert_eq!(
            kinds("a+=b++&&c<=d"),
            vec![
                ident("a"),
                TokenKind::Operator(Operator::PlusAssign),
                ident("b"),
                TokenKind::Operator(Operator::Increment),
                TokenKind::Operator(Operator::And),
                ident("c"),
                TokenKind::Operator(Operator::LessEqual),
                ident("d"),
                TokenKind::Eof,
            ]
        );
        assert_eq!(error("a & b").kind, TokenizeErrorKind::SingleLogicalOperator('&'));
        assert_eq!(error("a # b").kind, TokenizeErrorKind::UnexpectedCharacter('#'));
    }

    #[test]
    fn test_interpolated_string() {
        let tokens = tokenize(r#"$"Hi {name}, {x + 1:F2}!""#, &HostRegistry::new()).unwrap();
        let TokenKind::Interpolated(s) = &tokens[0].kind else {
            panic!("expected an interpolated string, got {:?}", tokens[0]);
        };
        assert_eq!(s.format, "Hi {0}, {1:F2}!");
        assert_eq!(s.arguments.len(), 2);
        assert_eq!(
            s.arguments[0],
            vec![Token::new(ident("name"), Position::new(1, 7))]
        );
        let second: Vec<_> = s.arguments[1].iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            second,
            vec![
                ident("x"),
                TokenKind::Operator(Operator::Plus),
                TokenKind::Literal(Literal::Int(1)),
            ]
        );
    }

    #[test]
    fn test_interpolation_escapes_and_nesting() {
        let tokens = tokenize(r#"$"{{{a}}} {f(b, c)}""#, &HostRegistry::new()).unwrap();
        let TokenKind::Interpolated(s) = &tokens[0].kind else {
            panic!("expected an interpolated string");
        };
        assert_eq!(s.format, "{{{0}}} {1}");
        assert_eq!(s.arguments[1].len(), 6);
    }

    #[test]
    fn test_interpolation_errors() {
        assert_eq!(
            error(r#"$"abc"#).kind,
            TokenizeErrorKind::UnterminatedInterpolation
        );
        assert_eq!(
            error(r#"$"a {x"#).kind,
            TokenizeErrorKind::UnterminatedInterpolation
        );
        assert_eq!(error(r#"$"a { }""#).kind, TokenizeErrorKind::EmptyInterpolation);
        assert_eq!(
            error(r#"$"a } b""#).kind,
            TokenizeErrorKind::UnmatchedInterpolationBrace('}')
        );
    }

    #[test]
    fn test_separator_balance() {
        assert_eq!(
            error("f(a];").kind,
            TokenizeErrorKind::MismatchedSeparator {
                expected: Separator::CloseParen,
                found: Separator::CloseBracket
            }
        );
        assert_eq!(
            error("a)").kind,
            TokenizeErrorKind::UnmatchedSeparator(Separator::CloseParen)
        );
        let unclosed = error("{ a;");
        assert_eq!(
            unclosed.kind,
            TokenizeErrorKind::UnclosedSeparator(Separator::OpenBrace)
        );
        assert_eq!(unclosed.position, Position::new(1, 1));
        assert_eq!(error("/* never closed").kind, TokenizeErrorKind::UnterminatedComment);
    }
}
