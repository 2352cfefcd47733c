use std::{fmt, io::BufRead};

use log::trace;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Eof,
    Def,
    Extern,
    Ident(String),
    Number(f64),
    Operator(char),
}

impl Token {
    pub fn is_operator(&self, op: char) -> bool {
        *self == Token::Operator(op)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Eof => write!(f, "end of input"),
            Token::Def => write!(f, "`def`"),
            Token::Extern => write!(f, "`extern`"),
            Token::Ident(name) => write!(f, "identifier `{}`", name),
            Token::Number(value) => write!(f, "number `{}`", value),
            Token::Operator(op) => write!(f, "`{}`", op),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("invalid number literal `{0}`")]
    InvalidNumber(String),
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),
}

/// A sequential supplier of characters. `Ok(None)` signals the source is
/// exhausted, and must keep being returned on later calls.
pub trait CharSource {
    fn next_char(&mut self) -> Result<Option<char>, LexError>;
}

impl CharSource for std::str::Chars<'_> {
    fn next_char(&mut self) -> Result<Option<char>, LexError> {
        Ok(self.next())
    }
}

/// Reads characters from a buffered reader one line at a time, so that
/// interactive input is tokenized as it arrives.
pub struct ReaderSource<R> {
    reader: R,
    line: String,
    pos: usize,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            pos: 0,
        }
    }
}

impl<R: BufRead> CharSource for ReaderSource<R> {
    fn next_char(&mut self) -> Result<Option<char>, LexError> {
        if self.pos >= self.line.len() {
            self.line.clear();
            self.pos = 0;
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
        }
        let c = self.line[self.pos..].chars().next();
        if let Some(c) = c {
            self.pos += c.len_utf8();
        }
        Ok(c)
    }
}

/// Pull-based tokenizer holding a single pending character.
pub struct Lexer<S> {
    source: S,
    last_char: Option<char>,
    done: bool,
}

impl<'a> Lexer<std::str::Chars<'a>> {
    pub fn from_text(input: &'a str) -> Self {
        Lexer::new(input.chars())
    }
}

impl<S: CharSource> Lexer<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            // seeded with a space so the first call goes through the whitespace skip
            last_char: Some(' '),
            done: false,
        }
    }

    fn bump(&mut self) -> Result<(), LexError> {
        self.last_char = self.source.next_char()?;
        Ok(())
    }

    fn read_while<P>(&mut self, predicate: P) -> Result<String, LexError>
    where
        P: Fn(char) -> bool,
    {
        let mut text = String::new();
        while let Some(c) = self.last_char.filter(|&c| predicate(c)) {
            text.push(c);
            self.bump()?;
        }
        Ok(text)
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let mut text = self.read_while(|c| c.is_ascii_digit())?;
        // only the first `.` belongs to the literal; a second one starts a new token
        if self.last_char == Some('.') {
            text.push('.');
            self.bump()?;
            text.push_str(&self.read_while(|c| c.is_ascii_digit())?);
        }
        text.parse()
            .map(Token::Number)
            .map_err(|_| LexError::InvalidNumber(text))
    }

    /// Returns the next token. Once the source is exhausted every call
    /// returns `Token::Eof`.
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        loop {
            self.read_while(char::is_whitespace)?;

            let c = match self.last_char {
                Some(c) => c,
                None => return Ok(Token::Eof),
            };

            let token = if c.is_alphabetic() {
                let word = self.read_while(char::is_alphanumeric)?;
                match word.as_str() {
                    "def" => Token::Def,
                    "extern" => Token::Extern,
                    _ => Token::Ident(word),
                }
            } else if c.is_ascii_digit() || c == '.' {
                self.read_number()?
            } else if c == '#' {
                self.read_while(|c| c != '\n' && c != '\r')?;
                if self.last_char.is_some() {
                    self.bump()?;
                }
                continue;
            } else {
                self.bump()?;
                Token::Operator(c)
            };

            trace!("token {:?}", token);
            return Ok(token);
        }
    }
}

/// Yields tokens up to, but not including, `Token::Eof`. Iteration also
/// stops after the first error.
impl<S: CharSource> Iterator for Lexer<S> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_token() {
            Ok(Token::Eof) => {
                self.done = true;
                None
            }
            Ok(token) => Some(Ok(token)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// lex an entire string, stopping at the first error
pub fn lex(input: &str) -> Result<Vec<Token>, LexError> {
    Lexer::from_text(input).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ident(name: &str) -> Token {
        Token::Ident(name.to_string())
    }

    #[test]
    fn lex_number() {
        assert_eq!(lex("3.14").unwrap(), [Token::Number(3.14)]);
        assert_eq!(lex(".5").unwrap(), [Token::Number(0.5)]);
        assert_eq!(lex("7.").unwrap(), [Token::Number(7.0)]);
    }

    #[test]
    fn lex_identifier_with_digits() {
        assert_eq!(lex("foo123").unwrap(), [ident("foo123")]);
    }

    #[test]
    fn keywords_are_exact_matches() {
        assert_eq!(lex("def").unwrap(), [Token::Def]);
        assert_eq!(lex("extern").unwrap(), [Token::Extern]);
        assert_eq!(lex("define externs").unwrap(), [ident("define"), ident("externs")]);
    }

    #[test]
    fn comment_produces_no_token() {
        assert_eq!(lex("# comment\n3").unwrap(), [Token::Number(3.0)]);
        assert_eq!(lex("1 # trailing").unwrap(), [Token::Number(1.0)]);
        assert!(lex("# one\r# two\n").unwrap().is_empty());
    }

    #[test]
    fn second_dot_starts_new_number() {
        assert_eq!(
            lex("1.2.3").unwrap(),
            [Token::Number(1.2), Token::Number(0.3)]
        );
    }

    #[test]
    fn lone_dot_is_invalid_number() {
        match lex("1 + .") {
            Err(LexError::InvalidNumber(text)) => assert_eq!(text, "."),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn lex_works() {
        let input = "def add(x y): x+1.0;";
        let tokenized = [
            Token::Def,
            ident("add"),
            Token::Operator('('),
            ident("x"),
            ident("y"),
            Token::Operator(')'),
            Token::Operator(':'),
            ident("x"),
            Token::Operator('+'),
            Token::Number(1.0),
            Token::Operator(';'),
        ];
        assert_eq!(lex(input).unwrap(), tokenized);
    }

    #[test]
    fn eof_is_sticky() {
        let mut lexer = Lexer::from_text("x");
        assert_eq!(lexer.next_token().unwrap(), ident("x"));
        for _ in 0..3 {
            assert_eq!(lexer.next_token().unwrap(), Token::Eof);
        }
    }

    #[test]
    fn reader_source_spans_lines() {
        let input: &[u8] = b"extern sin(x)\n  sin(1) # done\n";
        let tokens: Result<Vec<_>, _> = Lexer::new(ReaderSource::new(input)).collect();
        assert_eq!(
            tokens.unwrap(),
            [
                Token::Extern,
                ident("sin"),
                Token::Operator('('),
                ident("x"),
                Token::Operator(')'),
                ident("sin"),
                Token::Operator('('),
                Token::Number(1.0),
                Token::Operator(')'),
            ]
        );
    }

    /// Counts how often it is asked for a character after running dry.
    struct Exhaustible<'a> {
        chars: std::str::Chars<'a>,
        reads_past_end: usize,
    }

    impl CharSource for Exhaustible<'_> {
        fn next_char(&mut self) -> Result<Option<char>, LexError> {
            let c = self.chars.next();
            if c.is_none() {
                self.reads_past_end += 1;
            }
            Ok(c)
        }
    }

    #[test]
    fn comment_at_end_of_input_stops_reading() {
        let mut lexer = Lexer::new(Exhaustible {
            chars: "1 # trailing".chars(),
            reads_past_end: 0,
        });
        assert_eq!(lexer.next_token().unwrap(), Token::Number(1.0));
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
        assert_eq!(lexer.source.reads_past_end, 1);
    }
}
