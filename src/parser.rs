use log::debug;

use crate::ast::{ASTNode, BinaryOperator, Expression, Function, Prototype, ANON_PREFIX};
use crate::lexer::{CharSource, LexError, Lexer, Token};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("expected {expected}, found {found}")]
    Unexpected { expected: &'static str, found: Token },
}

pub type PartialParseResult = Result<Expression, ParseError>;

/// Hands out `_anon0`, `_anon1`, ... for the lifetime of a compilation session.
#[derive(Debug, Default)]
pub struct AnonNames {
    next: usize,
}

impl AnonNames {
    pub fn fresh(&mut self) -> String {
        let name = format!("{}{}", ANON_PREFIX, self.next);
        self.next += 1;
        name
    }
}

/// Recursive descent parser with a single token of lookahead.
///
/// Every `parse_*` method expects `current` to be the first token of the
/// construct it parses, and leaves `current` on the token right after it.
pub struct Parser<S> {
    lexer: Lexer<S>,
    current: Token,
}

impl<'a> Parser<std::str::Chars<'a>> {
    /// parse every top-level construct in `input`
    pub fn parse_str(input: &'a str) -> Result<Vec<ASTNode>, ParseError> {
        let mut parser = Parser::new(Lexer::from_text(input))?;
        let mut names = AnonNames::default();
        let mut ast = Vec::new();
        while let Some(node) = parser.parse_top_level(&mut names)? {
            ast.push(node);
        }
        Ok(ast)
    }
}

impl<S: CharSource> Parser<S> {
    pub fn new(mut lexer: Lexer<S>) -> Result<Self, ParseError> {
        let current = lexer.next_token()?;
        Ok(Self { lexer, current })
    }

    pub fn current(&self) -> &Token {
        &self.current
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn unexpected<T>(&self, expected: &'static str) -> Result<T, ParseError> {
        Err(ParseError::Unexpected {
            expected,
            found: self.current.clone(),
        })
    }

    fn expect_operator(&mut self, op: char, expected: &'static str) -> Result<(), ParseError> {
        if !self.current.is_operator(op) {
            return self.unexpected(expected);
        }
        self.advance()
    }

    fn current_binary_op(&self) -> Option<BinaryOperator> {
        match self.current {
            Token::Operator(c) => BinaryOperator::from_char(c),
            _ => None,
        }
    }

    /// precedence of the pending token, -1 when it is not a binary operator
    fn current_precedence(&self) -> i32 {
        self.current_binary_op().map_or(-1, BinaryOperator::precedence)
    }

    fn parse_number(&mut self) -> PartialParseResult {
        match self.current {
            Token::Number(num) => {
                self.advance()?;
                Ok(Expression::Literal(num))
            }
            _ => self.unexpected("number"),
        }
    }

    fn parse_identifier(&mut self) -> PartialParseResult {
        let ident = match &self.current {
            Token::Ident(ident) => ident.clone(),
            _ => return self.unexpected("identifier"),
        };
        self.advance()?;

        if !self.current.is_operator('(') {
            return Ok(Expression::Variable(ident));
        }
        self.advance()?;

        let mut args = Vec::new();
        if !self.current.is_operator(')') {
            loop {
                args.push(self.parse_expr()?);
                if self.current.is_operator(')') {
                    break;
                }
                self.expect_operator(',', "`,` or `)` in argument list")?;
            }
        }
        self.advance()?;

        Ok(Expression::Call(ident, args))
    }

    fn parse_nested(&mut self) -> PartialParseResult {
        self.expect_operator('(', "`(`")?;
        let res = self.parse_expr()?;
        self.expect_operator(')', "`)`")?;
        Ok(res)
    }

    fn parse_primary(&mut self) -> PartialParseResult {
        match self.current {
            Token::Number(_) => self.parse_number(),
            Token::Ident(_) => self.parse_identifier(),
            Token::Operator('(') => self.parse_nested(),
            _ => self.unexpected("expression"),
        }
    }

    /// Precedence climbing: fold `(op primary)*` onto `lhs` while the pending
    /// operator binds at least as tightly as `expr_precedence`.
    fn parse_rhs(&mut self, expr_precedence: i32, lhs: Expression) -> PartialParseResult {
        let mut result = lhs;

        loop {
            let operator = match self.current_binary_op() {
                Some(op) if op.precedence() >= expr_precedence => op,
                _ => return Ok(result),
            };
            self.advance()?;

            let mut rhs = self.parse_primary()?;

            if operator.precedence() < self.current_precedence() {
                rhs = self.parse_rhs(operator.precedence() + 1, rhs)?;
            }

            result = Expression::Binary(operator, Box::new(result), Box::new(rhs));
        }
    }

    pub fn parse_expr(&mut self) -> PartialParseResult {
        let lhs = self.parse_primary()?;
        self.parse_rhs(0, lhs)
    }

    /// `name ( arg* )`, parameters are not comma separated
    fn parse_prototype(&mut self) -> Result<Prototype, ParseError> {
        let name = match &self.current {
            Token::Ident(name) => name.clone(),
            _ => return self.unexpected("function name in prototype"),
        };
        self.advance()?;
        self.expect_operator('(', "`(` in prototype")?;

        let mut args = Vec::new();
        while let Token::Ident(arg) = &self.current {
            args.push(arg.clone());
            self.advance()?;
        }
        self.expect_operator(')', "parameter name or `)` in prototype")?;

        Ok(Prototype { name, args })
    }

    fn parse_definition(&mut self) -> Result<Function, ParseError> {
        self.advance()?;
        let prototype = self.parse_prototype()?;
        self.expect_operator(':', "`:` before function body")?;
        let body = self.parse_expr()?;
        Ok(Function { prototype, body })
    }

    fn parse_extern(&mut self) -> Result<Prototype, ParseError> {
        self.advance()?;
        self.parse_prototype()
    }

    fn parse_top_level_expr(&mut self, names: &mut AnonNames) -> Result<Function, ParseError> {
        let body = self.parse_expr()?;
        let prototype = Prototype {
            name: names.fresh(),
            args: Vec::new(),
        };
        Ok(Function { prototype, body })
    }

    /// Parse the next top-level construct, skipping stray `;`.
    /// Returns `None` at end of input.
    pub fn parse_top_level(
        &mut self,
        names: &mut AnonNames,
    ) -> Result<Option<ASTNode>, ParseError> {
        loop {
            let node = match self.current {
                Token::Eof => return Ok(None),
                Token::Def => ASTNode::Function(self.parse_definition()?),
                Token::Extern => ASTNode::Extern(self.parse_extern()?),
                Token::Operator(';') => {
                    self.advance()?;
                    continue;
                }
                _ => ASTNode::Function(self.parse_top_level_expr(names)?),
            };
            debug!("parsed {}", node);
            return Ok(Some(node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn var(name: &str) -> Box<Expression> {
        Box::new(Expression::Variable(name.to_string()))
    }

    fn num(value: f64) -> Box<Expression> {
        Box::new(Expression::Literal(value))
    }

    fn bin(op: char, lhs: Box<Expression>, rhs: Box<Expression>) -> Box<Expression> {
        Box::new(Expression::Binary(
            BinaryOperator::from_char(op).unwrap(),
            lhs,
            rhs,
        ))
    }

    fn parse_expr(input: &str) -> Expression {
        let mut parser = Parser::new(Lexer::from_text(input)).unwrap();
        let expr = parser.parse_expr().unwrap();
        assert_eq!(parser.current(), &Token::Eof);
        expr
    }

    fn parse_err(input: &str) -> (&'static str, Token) {
        match Parser::parse_str(input) {
            Err(ParseError::Unexpected { expected, found }) => (expected, found),
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn parse_expr_works() {
        let target = bin(
            '+',
            var("x"),
            bin('*', num(1.0), bin('-', num(2.0), num(3.0))),
        );
        assert_eq!(parse_expr("x + 1 * (2 - 3)"), *target);
    }

    #[test]
    fn equal_precedence_is_left_associative() {
        assert_eq!(
            parse_expr("a-b-c"),
            *bin('-', bin('-', var("a"), var("b")), var("c"))
        );
        assert_eq!(
            parse_expr("a*b*c*d"),
            *bin('*', bin('*', bin('*', var("a"), var("b")), var("c")), var("d"))
        );
    }

    #[test]
    fn higher_precedence_binds_tighter() {
        assert_eq!(
            parse_expr("a+b*c"),
            *bin('+', var("a"), bin('*', var("b"), var("c")))
        );
        assert_eq!(
            parse_expr("a*b+c"),
            *bin('+', bin('*', var("a"), var("b")), var("c"))
        );
        assert_eq!(
            parse_expr("a < b + c"),
            *bin('<', var("a"), bin('+', var("b"), var("c")))
        );
        // `-` sits above `+` in the table
        assert_eq!(
            parse_expr("a+b-c"),
            *bin('+', var("a"), bin('-', var("b"), var("c")))
        );
    }

    #[test]
    fn parentheses_win() {
        assert_eq!(
            parse_expr("(a+b)*c"),
            *bin('*', bin('+', var("a"), var("b")), var("c"))
        );
    }

    #[test]
    fn unknown_operator_ends_expression() {
        let mut parser = Parser::new(Lexer::from_text("a + b / c")).unwrap();
        let expr = parser.parse_expr().unwrap();
        assert_eq!(expr, *bin('+', var("a"), var("b")));
        assert_eq!(parser.current(), &Token::Operator('/'));
    }

    #[test]
    fn parse_calls() {
        assert_eq!(
            parse_expr("f()"),
            Expression::Call("f".to_string(), Vec::new())
        );
        assert_eq!(
            parse_expr("f(x, 2*y, g(1))"),
            Expression::Call(
                "f".to_string(),
                vec![
                    *var("x"),
                    *bin('*', num(2.0), var("y")),
                    Expression::Call("g".to_string(), vec![*num(1.0)]),
                ]
            )
        );
    }

    #[test]
    fn malformed_calls() {
        assert_eq!(parse_err("f(a,)"), ("expression", Token::Operator(')')));
        assert_eq!(
            parse_err("f(a b)"),
            ("`,` or `)` in argument list", Token::Ident("b".to_string()))
        );
        assert_eq!(parse_err("f(a"), ("`,` or `)` in argument list", Token::Eof));
    }

    #[test]
    fn parse_definition() {
        let ast = Parser::parse_str("def foo(x): x+1").unwrap();
        assert_eq!(
            ast,
            vec![ASTNode::Function(Function {
                prototype: Prototype {
                    name: "foo".to_string(),
                    args: vec!["x".to_string()],
                },
                body: *bin('+', var("x"), num(1.0)),
            })]
        );
    }

    #[test]
    fn prototype_params_have_no_commas() {
        let ast = Parser::parse_str("extern atan2(y x)").unwrap();
        assert_eq!(
            ast,
            vec![ASTNode::Extern(Prototype {
                name: "atan2".to_string(),
                args: vec!["y".to_string(), "x".to_string()],
            })]
        );
        assert_eq!(
            parse_err("extern atan2(y, x)"),
            ("parameter name or `)` in prototype", Token::Operator(','))
        );
    }

    #[test]
    fn malformed_definitions() {
        assert_eq!(
            parse_err("def (x): x"),
            ("function name in prototype", Token::Operator('('))
        );
        assert_eq!(
            parse_err("def f x: x"),
            ("`(` in prototype", Token::Ident("x".to_string()))
        );
        assert_eq!(
            parse_err("def f(x) x"),
            ("`:` before function body", Token::Ident("x".to_string()))
        );
        assert_eq!(parse_err("(1 + 2"), ("`)`", Token::Eof));
    }

    #[test]
    fn top_level_expressions_are_anonymous() {
        let ast = Parser::parse_str("; 1; def f(): 2 ;; f()").unwrap();
        let names: Vec<&str> = ast.iter().map(|n| n.prototype().name.as_str()).collect();
        assert_eq!(names, vec!["_anon0", "f", "_anon1"]);
        for node in &ast {
            assert!(node.prototype().args.is_empty());
        }
    }

    #[test]
    fn lex_errors_surface_through_parser() {
        match Parser::parse_str("def f(): 1 + .") {
            Err(ParseError::Lex(LexError::InvalidNumber(text))) => assert_eq!(text, "."),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
