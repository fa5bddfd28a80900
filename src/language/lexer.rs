use crate::language::{
    span::Span,
    token::{Token, TokenKind},
};
use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, one_of},
    combinator::{opt, recognize},
    sequence::{pair, tuple},
    IResult,
};

#[derive(Debug)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

/// A `//` or `/* */` comment with its delimiters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Comment {
    pub text: String,
    pub span: Span,
}

impl Comment {
    /// `//go:` and `//export` lines, which the Go toolchain reads.
    pub fn is_directive(&self) -> bool {
        self.text.starts_with("//go:") || self.text.starts_with("//export ")
    }

    pub fn is_build_constraint(&self) -> bool {
        self.text.starts_with("//go:build") || self.text.starts_with("// +build")
    }
}

pub fn lex(source: &str) -> Result<Vec<Token>, Vec<LexError>> {
    lex_with_comments(source).map(|(tokens, _)| tokens)
}

/// Tokens plus every comment, in source order.
pub fn lex_with_comments(source: &str) -> Result<(Vec<Token>, Vec<Comment>), Vec<LexError>> {
    let lexer = Lexer::new(source);
    lexer.run()
}

const OPERATORS: &[(&str, TokenKind)] = &[
    ("<<=", TokenKind::ShlEq),
    (">>=", TokenKind::ShrEq),
    ("&^=", TokenKind::AndNotEq),
    ("...", TokenKind::Ellipsis),
    ("&&", TokenKind::AmpersandAmpersand),
    ("||", TokenKind::PipePipe),
    ("<-", TokenKind::Arrow),
    ("++", TokenKind::PlusPlus),
    ("--", TokenKind::MinusMinus),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::BangEq),
    ("<=", TokenKind::LtEq),
    (">=", TokenKind::GtEq),
    (":=", TokenKind::ColonEq),
    ("+=", TokenKind::PlusEq),
    ("-=", TokenKind::MinusEq),
    ("*=", TokenKind::StarEq),
    ("/=", TokenKind::SlashEq),
    ("%=", TokenKind::PercentEq),
    ("&=", TokenKind::AmpersandEq),
    ("|=", TokenKind::PipeEq),
    ("^=", TokenKind::CaretEq),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("&^", TokenKind::AndNot),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("&", TokenKind::Ampersand),
    ("|", TokenKind::Pipe),
    ("^", TokenKind::Caret),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("=", TokenKind::Eq),
    ("!", TokenKind::Bang),
    ("~", TokenKind::Tilde),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    (",", TokenKind::Comma),
    (".", TokenKind::Dot),
    (";", TokenKind::Semi),
    (":", TokenKind::Colon),
];

struct Lexer<'a> {
    src: &'a str,
    chars: std::str::Chars<'a>,
    current: Option<char>,
    offset: usize,
    tokens: Vec<Token>,
    comments: Vec<Comment>,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        let mut chars = src.chars();
        let current = chars.next();
        Self {
            src,
            chars,
            current,
            offset: 0,
            tokens: Vec::new(),
            comments: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn run(mut self) -> Result<(Vec<Token>, Vec<Comment>), Vec<LexError>> {
        while let Some(ch) = self.current {
            match ch {
                '\n' => {
                    self.newline();
                    self.bump();
                }
                '/' if self.peek() == Some('/') => self.eat_line_comment(),
                '/' if self.peek() == Some('*') => self.eat_block_comment(),
                ch if ch.is_whitespace() => {
                    self.bump();
                }
                ch if ch.is_alphabetic() || ch == '_' => self.lex_identifier(),
                ch if ch.is_ascii_digit() => self.lex_number(),
                '.' if self.peek().is_some_and(|next| next.is_ascii_digit()) => {
                    self.lex_number()
                }
                '"' => self.lex_quoted('"', "string"),
                '\'' => self.lex_quoted('\'', "rune"),
                '`' => self.lex_raw_string(),
                _ => self.lex_operator(),
            }
        }
        self.newline();
        self.push_token(TokenKind::Eof, self.offset, self.offset);

        if self.errors.is_empty() {
            Ok((self.tokens, self.comments))
        } else {
            Err(self.errors)
        }
    }

    fn bump(&mut self) -> Option<char> {
        if let Some(ch) = self.current {
            self.offset += ch.len_utf8();
        }
        self.current = self.chars.next();
        self.current
    }

    fn peek(&self) -> Option<char> {
        self.chars.clone().next()
    }

    fn push_token(&mut self, kind: TokenKind, start: usize, end: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::new(start, end),
        });
    }

    fn error(&mut self, start: usize, end: usize, message: impl Into<String>) {
        self.errors.push(LexError {
            message: message.into(),
            span: Span::new(start, end),
        });
    }

    /// Automatic semicolon insertion.
    fn newline(&mut self) {
        let insert = self
            .tokens
            .last()
            .map(|token| token.kind.ends_statement())
            .unwrap_or(false);
        if insert {
            self.push_token(TokenKind::Semi, self.offset, self.offset);
        }
    }

    fn eat_line_comment(&mut self) {
        let start = self.offset;
        while let Some(ch) = self.current {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
        self.push_comment(start);
    }

    fn push_comment(&mut self, start: usize) {
        self.comments.push(Comment {
            text: self.src[start..self.offset].trim_end().to_string(),
            span: Span::new(start, self.offset),
        });
    }

    fn eat_block_comment(&mut self) {
        let start = self.offset;
        let mut saw_newline = false;
        self.bump();
        self.bump();
        while let Some(ch) = self.current {
            if ch == '*' && self.peek() == Some('/') {
                self.bump();
                self.bump();
                self.push_comment(start);
                if saw_newline {
                    self.newline();
                }
                return;
            }
            if ch == '\n' {
                saw_newline = true;
            }
            self.bump();
        }
        self.error(start, self.offset, "Unterminated block comment");
    }

    fn lex_identifier(&mut self) {
        let start = self.offset;
        while let Some(ch) = self.current {
            if ch.is_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let end = self.offset;
        let word = &self.src[start..end];
        let kind =
            TokenKind::keyword(word).unwrap_or_else(|| TokenKind::Identifier(word.to_string()));
        self.push_token(kind, start, end);
    }

    fn lex_number(&mut self) {
        let start = self.offset;
        let text = match number_literal(&self.src[start..]) {
            Ok((_, text)) => text,
            Err(_) => {
                self.bump();
                self.error(start, self.offset, "Invalid number literal");
                return;
            }
        };
        let end = start + text.len();
        while self.offset < end {
            self.bump();
        }
        if self
            .current
            .is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
        {
            while self
                .current
                .is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
            {
                self.bump();
            }
            self.error(start, self.offset, format!("Invalid digit in literal `{}`", &self.src[start..self.offset]));
            return;
        }
        let kind = classify_number(text);
        self.push_token(kind, start, end);
    }

    fn lex_quoted(&mut self, quote: char, what: &str) {
        let start = self.offset;
        self.bump();
        while let Some(ch) = self.current {
            match ch {
                '\\' => {
                    self.bump();
                    if self.current.is_some() {
                        self.bump();
                    }
                }
                '\n' => break,
                ch if ch == quote => {
                    self.bump();
                    let text = self.src[start..self.offset].to_string();
                    let kind = if quote == '"' {
                        TokenKind::String(text)
                    } else {
                        TokenKind::Char(text)
                    };
                    self.push_token(kind, start, self.offset);
                    return;
                }
                _ => {
                    self.bump();
                }
            }
        }
        self.error(start, self.offset, format!("Unterminated {what} literal"));
    }

    fn lex_raw_string(&mut self) {
        let start = self.offset;
        self.bump();
        while let Some(ch) = self.current {
            self.bump();
            if ch == '`' {
                let text = self.src[start..self.offset].to_string();
                self.push_token(TokenKind::String(text), start, self.offset);
                return;
            }
        }
        self.error(start, self.offset, "Unterminated raw string literal");
    }

    fn lex_operator(&mut self) {
        let start = self.offset;
        let rest = &self.src[start..];
        for (symbol, kind) in OPERATORS {
            if rest.starts_with(symbol) {
                for _ in 0..symbol.len() {
                    self.bump();
                }
                self.push_token(kind.clone(), start, self.offset);
                return;
            }
        }
        let ch = self.current.unwrap_or('\0');
        self.bump();
        self.error(start, self.offset, format!("Unexpected character '{}'", ch));
    }
}

fn decimal_digits(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_digit() || c == '_')(input)
}

fn hex_digits(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_hexdigit() || c == '_')(input)
}

fn exponent(input: &str) -> IResult<&str, &str> {
    recognize(tuple((one_of("eE"), opt(one_of("+-")), decimal_digits)))(input)
}

fn hex_exponent(input: &str) -> IResult<&str, &str> {
    recognize(tuple((one_of("pP"), opt(one_of("+-")), decimal_digits)))(input)
}

fn hex_number(input: &str) -> IResult<&str, &str> {
    let mantissa = alt((
        recognize(tuple((opt(hex_digits), char('.'), opt(hex_digits)))),
        hex_digits,
    ));
    recognize(tuple((tag_no_case("0x"), mantissa, opt(hex_exponent))))(input)
}

fn binary_number(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        tag_no_case("0b"),
        take_while1(|c: char| matches!(c, '0' | '1' | '_')),
    ))(input)
}

fn octal_number(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        tag_no_case("0o"),
        take_while1(|c: char| matches!(c, '0'..='7' | '_')),
    ))(input)
}

fn decimal_number(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(tuple((
            decimal_digits,
            opt(pair(char('.'), opt(decimal_digits))),
            opt(exponent),
        ))),
        recognize(tuple((char('.'), decimal_digits, opt(exponent)))),
    ))(input)
}

/// Recognizes one Go number literal at the start of `input`.
fn number_literal(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((hex_number, binary_number, octal_number, decimal_number)),
        opt(char('i')),
    ))(input)
}

fn classify_number(text: &str) -> TokenKind {
    if text.ends_with('i') {
        return TokenKind::Imag(text.to_string());
    }
    let lower = text.to_ascii_lowercase();
    let is_float = if lower.starts_with("0x") {
        lower.contains('.') || lower.contains('p')
    } else if lower.starts_with("0b") || lower.starts_with("0o") {
        false
    } else {
        lower.contains('.') || lower.contains('e')
    };
    if is_float {
        TokenKind::Float(text.to_string())
    } else {
        TokenKind::Int(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source)
            .expect("lex")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn inserts_semicolons_at_line_ends() {
        let tokens = kinds("x := 1\nreturn\n}");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Identifier("x".into()),
                TokenKind::ColonEq,
                TokenKind::Int("1".into()),
                TokenKind::Semi,
                TokenKind::Return,
                TokenKind::Semi,
                TokenKind::RBrace,
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn no_semicolon_after_operator_at_line_end() {
        let tokens = kinds("a +\nb");
        assert!(!tokens[..3].contains(&TokenKind::Semi));
    }

    #[test]
    fn lexes_number_forms() {
        let tokens = kinds("0x1F 1_000 3.14 1e9 .5 0b101 0o17 2i 0x1p-2");
        assert_eq!(
            &tokens[..9],
            &[
                TokenKind::Int("0x1F".into()),
                TokenKind::Int("1_000".into()),
                TokenKind::Float("3.14".into()),
                TokenKind::Float("1e9".into()),
                TokenKind::Float(".5".into()),
                TokenKind::Int("0b101".into()),
                TokenKind::Int("0o17".into()),
                TokenKind::Imag("2i".into()),
                TokenKind::Float("0x1p-2".into()),
            ]
        );
    }

    #[test]
    fn keeps_literal_text_verbatim() {
        let tokens = kinds(r#""a\"b" 'x' `raw
text`"#);
        assert_eq!(tokens[0], TokenKind::String(r#""a\"b""#.into()));
        assert_eq!(tokens[1], TokenKind::Char("'x'".into()));
        assert_eq!(tokens[2], TokenKind::String("`raw\ntext`".into()));
    }

    #[test]
    fn longest_operator_wins() {
        let tokens = kinds("ch <- v; x &^= y; a...");
        assert!(tokens.contains(&TokenKind::Arrow));
        assert!(tokens.contains(&TokenKind::AndNotEq));
        assert!(tokens.contains(&TokenKind::Ellipsis));
    }

    #[test]
    fn reports_unterminated_string() {
        let errors = lex("x := \"oops\n").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Unterminated string"));
    }

    #[test]
    fn collects_comments_and_recognizes_directives() {
        let (tokens, comments) =
            lex_with_comments("//go:build linux\n\n// doc\n//go:embed a.txt\nvar a /* x */ string\n")
                .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Var);
        let texts: Vec<_> = comments.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["//go:build linux", "// doc", "//go:embed a.txt", "/* x */"]);
        assert!(comments[0].is_build_constraint());
        assert!(!comments[1].is_directive());
        assert!(comments[2].is_directive());
        assert_eq!(comments[2].span, Span::new(25, 41));
    }

    #[test]
    fn multi_line_block_comment_acts_as_newline() {
        let tokens = kinds("x /* a\nb */ y");
        assert_eq!(tokens[1], TokenKind::Semi);
    }
}
