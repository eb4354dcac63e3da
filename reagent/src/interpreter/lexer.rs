//! Tokenizer for the sandbox language.
//!
//! Newlines are statement separators except inside parentheses, brackets,
//! or braces, where they are ignored. `#` starts a line comment.

use super::InterpreterError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifier or keyword candidate.
    Ident(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal (quotes stripped, escapes resolved).
    Str(String),
    /// Statement separator (newline or `;`).
    Newline,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `.`
    Dot,
    /// `=`
    Assign,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `!`
    Bang,
    /// End of input.
    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "{name}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(_) => f.write_str("string literal"),
            Self::Newline => f.write_str("end of line"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::LBracket => f.write_str("["),
            Self::RBracket => f.write_str("]"),
            Self::LBrace => f.write_str("{"),
            Self::RBrace => f.write_str("}"),
            Self::Comma => f.write_str(","),
            Self::Colon => f.write_str(":"),
            Self::Dot => f.write_str("."),
            Self::Assign => f.write_str("="),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Star => f.write_str("*"),
            Self::Slash => f.write_str("/"),
            Self::Percent => f.write_str("%"),
            Self::Eq => f.write_str("=="),
            Self::NotEq => f.write_str("!="),
            Self::Lt => f.write_str("<"),
            Self::LtEq => f.write_str("<="),
            Self::Gt => f.write_str(">"),
            Self::GtEq => f.write_str(">="),
            Self::AndAnd => f.write_str("&&"),
            Self::OrOr => f.write_str("||"),
            Self::Bang => f.write_str("!"),
            Self::Eof => f.write_str("end of input"),
        }
    }
}

/// Tokenize a source snippet.
///
/// # Errors
///
/// [`InterpreterError::Syntax`] on unterminated strings, malformed numbers,
/// or unexpected characters.
pub fn tokenize(source: &str) -> Result<Vec<Token>, InterpreterError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut nesting: i32 = 0;
    let mut line = 1usize;

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' => {
                chars.next();
            }
            '\n' => {
                chars.next();
                line += 1;
                // Newlines are separators only at the top nesting level, and
                // consecutive separators collapse.
                if nesting == 0 && !matches!(tokens.last(), None | Some(Token::Newline)) {
                    tokens.push(Token::Newline);
                }
            }
            ';' => {
                chars.next();
                if !matches!(tokens.last(), None | Some(Token::Newline)) {
                    tokens.push(Token::Newline);
                }
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    if c == '\\' {
                        match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some('r') => text.push('\r'),
                            Some('\\') => text.push('\\'),
                            Some(other) if other == quote => text.push(quote),
                            Some(other) => {
                                text.push('\\');
                                text.push(other);
                            }
                            None => break,
                        }
                    } else {
                        if c == '\n' {
                            line += 1;
                        }
                        text.push(c);
                    }
                }
                if !closed {
                    return Err(InterpreterError::syntax(format!(
                        "unterminated string literal starting on line {line}"
                    )));
                }
                tokens.push(Token::Str(text));
            }
            '0'..='9' => {
                let mut number = String::new();
                let mut is_float = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '_' {
                        if c != '_' {
                            number.push(c);
                        }
                        chars.next();
                    } else if c == '.' && !is_float {
                        // Lookahead: `1.method` is not a float.
                        let mut ahead = chars.clone();
                        ahead.next();
                        if ahead.peek().is_some_and(|c| c.is_ascii_digit()) {
                            is_float = true;
                            number.push('.');
                            chars.next();
                        } else {
                            break;
                        }
                    } else {
                        break;
                    }
                }
                let token = if is_float {
                    Token::Float(number.parse().map_err(|_| {
                        InterpreterError::syntax(format!("invalid number '{number}' on line {line}"))
                    })?)
                } else {
                    Token::Int(number.parse().map_err(|_| {
                        InterpreterError::syntax(format!("invalid number '{number}' on line {line}"))
                    })?)
                };
                tokens.push(token);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(name));
            }
            '(' => {
                nesting += 1;
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                nesting -= 1;
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                nesting += 1;
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                nesting -= 1;
                chars.next();
                tokens.push(Token::RBracket);
            }
            '{' => {
                chars.next();
                tokens.push(Token::LBrace);
            }
            '}' => {
                chars.next();
                tokens.push(Token::RBrace);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Eq);
                } else {
                    tokens.push(Token::Assign);
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::LtEq);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::GtEq);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::AndAnd);
                } else {
                    return Err(InterpreterError::syntax(format!(
                        "unexpected character '&' on line {line}"
                    )));
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::OrOr);
                } else {
                    return Err(InterpreterError::syntax(format!(
                        "unexpected character '|' on line {line}"
                    )));
                }
            }
            other => {
                return Err(InterpreterError::syntax(format!(
                    "unexpected character '{other}' on line {line}"
                )));
            }
        }
    }

    if matches!(tokens.last(), Some(Token::Newline)) {
        tokens.pop();
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_call() {
        let tokens = tokenize("final_answer(2+2)").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("final_answer".to_owned()),
                Token::LParen,
                Token::Int(2),
                Token::Plus,
                Token::Int(2),
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_newlines_collapse_and_nest() {
        let tokens = tokenize("a = 1\n\n\nb = f(\n  1,\n  2\n)").unwrap();
        let newlines = tokens.iter().filter(|t| **t == Token::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize(r#"x = "a\nb""#).unwrap();
        assert!(tokens.contains(&Token::Str("a\nb".to_owned())));
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = tokenize("x = 1 # the count\ny = 2").unwrap();
        assert!(!tokens.iter().any(|t| matches!(t, Token::Str(_))));
        assert!(tokens.contains(&Token::Ident("y".to_owned())));
    }

    #[test]
    fn test_floats_and_attribute_access() {
        let tokens = tokenize("math.pi + 1.5").unwrap();
        assert!(tokens.contains(&Token::Float(1.5)));
        assert!(tokens.contains(&Token::Dot));
    }

    #[test]
    fn test_unterminated_string_errors() {
        assert!(tokenize("x = \"oops").is_err());
    }
}
