use std::collections::HashMap;

use crate::ast::{ASTNode, Expression, Function, Prototype};
use crate::lexer::{Lexer, Token};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ParserError {
    #[error("expected function name in prototype, found {0}")]
    ExpectedFunctionName(Token),
    #[error("expected '(' in prototype, found {0}")]
    ExpectedPrototypeOpen(Token),
    #[error("expected ')' in prototype, found {0}")]
    ExpectedPrototypeClose(Token),
    #[error("expected ')', found {0}")]
    ExpectedCloseParen(Token),
    #[error("expected ')' or ',' in argument list, found {0}")]
    ExpectedArgumentSeparator(Token),
    #[error("unknown token {0} when expecting an expression")]
    UnknownPrimary(Token),
    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
}

pub type PartialParseResult = Result<Expression, ParserError>;

/// Bound on both parenthesis/call nesting and the height of an expression
/// tree. Lowering recurses once per level.
pub const MAX_NESTING_DEPTH: usize = 256;

fn within_nesting_limit(depth: usize) -> Result<usize, ParserError> {
    if depth > MAX_NESTING_DEPTH {
        Err(ParserError::TooDeep(MAX_NESTING_DEPTH))
    } else {
        Ok(depth)
    }
}

/// `<` binds loosest, then `+ -`, then `* /`.
pub fn default_precedence() -> HashMap<char, i32> {
    let mut operator_precedence = HashMap::new();
    operator_precedence.insert('<', 10);
    operator_precedence.insert('+', 20);
    operator_precedence.insert('-', 20);
    operator_precedence.insert('*', 40);
    operator_precedence.insert('/', 40);
    operator_precedence
}

/// Recursive descent parser with one token of lookahead.
#[derive(Debug, Clone)]
pub struct Parser {
    lexer: Lexer,
    current: Token,
    nesting: usize,
    pub operator_precedence: HashMap<char, i32>,
}

impl Parser {
    pub fn new(input: &str) -> Self {
        Self::with_precedence(input, default_precedence())
    }

    pub fn with_precedence(input: &str, operator_precedence: HashMap<char, i32>) -> Self {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            nesting: 0,
            operator_precedence,
        }
    }

    fn advance(&mut self) {
        self.current = self.lexer.next_token();
    }

    /// Discards the current token. Used to resynchronize after a failed
    /// top-level unit.
    pub fn skip_token(&mut self) {
        self.advance();
    }

    fn current_operator(&self) -> Option<(char, i32)> {
        match self.current {
            Token::Char(op) => match self.operator_precedence.get(&op) {
                Some(&precedence) if precedence > 0 => Some((op, precedence)),
                _ => None,
            },
            _ => None,
        }
    }

    fn token_precedence(&self) -> i32 {
        self.current_operator().map_or(-1, |(_, precedence)| precedence)
    }

    fn parse_identifier(&mut self) -> PartialParseResult {
        let name = match &self.current {
            Token::Identifier(name) => name.clone(),
            other => return Err(ParserError::UnknownPrimary(other.clone())),
        };
        self.advance();

        if self.current != Token::Char('(') {
            return Ok(Expression::Variable(name));
        }
        self.advance();

        let mut args = Vec::new();
        if self.current != Token::Char(')') {
            loop {
                args.push(self.parse_expr()?);
                match self.current {
                    Token::Char(')') => break,
                    Token::Char(',') => self.advance(),
                    _ => {
                        return Err(ParserError::ExpectedArgumentSeparator(
                            self.current.clone(),
                        ))
                    }
                }
            }
        }
        self.advance();

        Ok(Expression::Call(name, args))
    }

    fn parse_nested(&mut self) -> PartialParseResult {
        self.advance();
        let res = self.parse_expr()?;
        if self.current != Token::Char(')') {
            return Err(ParserError::ExpectedCloseParen(self.current.clone()));
        }
        self.advance();
        Ok(res)
    }

    fn parse_primary(&mut self) -> PartialParseResult {
        match self.current {
            Token::Identifier(_) => self.parse_identifier(),
            Token::Number(value) => {
                self.advance();
                Ok(Expression::Number(value))
            }
            Token::Char('(') => self.parse_nested(),
            _ => Err(ParserError::UnknownPrimary(self.current.clone())),
        }
    }

    fn parse_rhs(&mut self, expr_precedence: i32, lhs: Expression) -> PartialParseResult {
        let mut result = lhs;
        let mut height = within_nesting_limit(result.depth())?;

        loop {
            let (operator, precedence) = match self.current_operator() {
                Some((op, pr)) if pr >= expr_precedence => (op, pr),
                _ => return Ok(result),
            };
            self.advance();

            let mut rhs = self.parse_primary()?;

            if precedence < self.token_precedence() {
                rhs = self.parse_rhs(precedence + 1, rhs)?;
            }

            height = within_nesting_limit(height.max(rhs.depth()) + 1)?;
            result = Expression::Binary(operator, Box::new(result), Box::new(rhs));
        }
    }

    pub fn parse_expr(&mut self) -> PartialParseResult {
        self.nesting = within_nesting_limit(self.nesting + 1)?;
        let res = self
            .parse_primary()
            .and_then(|lhs| self.parse_rhs(0, lhs));
        self.nesting -= 1;
        res
    }

    fn parse_prototype(&mut self) -> Result<Prototype, ParserError> {
        let name = match &self.current {
            Token::Identifier(name) => name.clone(),
            other => return Err(ParserError::ExpectedFunctionName(other.clone())),
        };
        self.advance();

        if self.current != Token::Char('(') {
            return Err(ParserError::ExpectedPrototypeOpen(self.current.clone()));
        }
        self.advance();

        let mut args = Vec::new();
        while let Token::Identifier(arg) = &self.current {
            args.push(arg.clone());
            self.advance();
        }

        if self.current != Token::Char(')') {
            return Err(ParserError::ExpectedPrototypeClose(self.current.clone()));
        }
        self.advance();

        Ok(Prototype { name, args })
    }

    fn parse_definition(&mut self) -> Result<Function, ParserError> {
        self.advance();
        let prototype = self.parse_prototype()?;
        let body = self.parse_expr()?;
        Ok(Function { prototype, body })
    }

    fn parse_extern(&mut self) -> Result<Prototype, ParserError> {
        self.advance();
        self.parse_prototype()
    }

    /// Parses the next top-level unit, skipping stray `;`. Returns `Ok(None)`
    /// at end of input.
    pub fn parse_top_level(&mut self) -> Result<Option<ASTNode>, ParserError> {
        loop {
            return match self.current {
                Token::Eof => Ok(None),
                Token::Char(';') => {
                    self.advance();
                    continue;
                }
                Token::Def => self.parse_definition().map(|f| Some(ASTNode::Function(f))),
                Token::Extern => self.parse_extern().map(|p| Some(ASTNode::Extern(p))),
                _ => self
                    .parse_expr()
                    .map(|body| Some(ASTNode::Expression(Function::anonymous(body)))),
            };
        }
    }
}

/// Yields every top-level unit. A failed unit is yielded as an error and the
/// offending token is discarded before parsing resumes.
impl Iterator for Parser {
    type Item = Result<ASTNode, ParserError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.parse_top_level() {
            Ok(node) => node.map(Ok),
            Err(err) => {
                self.skip_token();
                Some(Err(err))
            }
        }
    }
}

/// parse every unit of `input`, stopping at the first syntax error
pub fn parse_str(input: &str) -> Result<Vec<ASTNode>, ParserError> {
    Parser::new(input).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn num(value: f64) -> Box<Expression> {
        Box::new(Expression::Number(value))
    }

    fn var(name: &str) -> Box<Expression> {
        Box::new(Expression::Variable(name.to_string()))
    }

    fn bin(op: char, lhs: Box<Expression>, rhs: Box<Expression>) -> Box<Expression> {
        Box::new(Expression::Binary(op, lhs, rhs))
    }

    fn expr(input: &str) -> Expression {
        Parser::new(input).parse_expr().unwrap()
    }

    #[test]
    fn parse_expr_works() {
        let target = bin('+', var("x"), bin('*', num(1.0), bin('-', num(2.0), num(3.0))));
        assert_eq!(expr("x + 1 * (2 - 3)"), *target);
    }

    #[test]
    fn multiplication_binds_tighter() {
        assert_eq!(expr("1+2*3"), *bin('+', num(1.0), bin('*', num(2.0), num(3.0))));
        assert_eq!(expr("1*2+3"), *bin('+', bin('*', num(1.0), num(2.0)), num(3.0)));
    }

    #[test]
    fn equal_precedence_is_left_associative() {
        assert_eq!(expr("1-2-3"), *bin('-', bin('-', num(1.0), num(2.0)), num(3.0)));
        assert_eq!(expr("8/4/2"), *bin('/', bin('/', num(8.0), num(4.0)), num(2.0)));
    }

    #[test]
    fn parentheses_override_precedence() {
        assert_eq!(expr("(1+2)*3"), *bin('*', bin('+', num(1.0), num(2.0)), num(3.0)));
    }

    #[test]
    fn higher_precedence_suffix_nests() {
        // a + b * c - d  =>  (a + (b * c)) - d
        assert_eq!(
            expr("a + b * c - d"),
            *bin('-', bin('+', var("a"), bin('*', var("b"), var("c"))), var("d"))
        );
        // a < b + c * d  =>  a < (b + (c * d))
        assert_eq!(
            expr("a < b + c * d"),
            *bin('<', var("a"), bin('+', var("b"), bin('*', var("c"), var("d"))))
        );
    }

    #[test]
    fn calls_take_full_expressions() {
        assert_eq!(
            expr("foo(x + 1, bar(), 2)"),
            Expression::Call(
                "foo".to_string(),
                vec![
                    *bin('+', var("x"), num(1.0)),
                    Expression::Call("bar".to_string(), vec![]),
                    Expression::Number(2.0),
                ]
            )
        );
    }

    #[test]
    fn missing_argument_separator() {
        assert_eq!(
            Parser::new("foo(1 2)").parse_expr(),
            Err(ParserError::ExpectedArgumentSeparator(Token::Number(2.0)))
        );
        assert_eq!(
            Parser::new("foo(1,").parse_expr(),
            Err(ParserError::UnknownPrimary(Token::Eof))
        );
    }

    #[test]
    fn unclosed_parenthesis() {
        assert_eq!(
            Parser::new("(1 + 2").parse_expr(),
            Err(ParserError::ExpectedCloseParen(Token::Eof))
        );
    }

    #[test]
    fn top_level_units() {
        let ast = parse_str("extern sin(x); def thing(x y) sin(x) * y; thing(1, 2)").unwrap();
        assert_eq!(
            ast,
            vec![
                ASTNode::Extern(Prototype {
                    name: "sin".to_string(),
                    args: vec!["x".to_string()],
                }),
                ASTNode::Function(Function {
                    prototype: Prototype {
                        name: "thing".to_string(),
                        args: vec!["x".to_string(), "y".to_string()],
                    },
                    body: *bin(
                        '*',
                        Box::new(Expression::Call("sin".to_string(), vec![*var("x")])),
                        var("y"),
                    ),
                }),
                ASTNode::Expression(Function::anonymous(Expression::Call(
                    "thing".to_string(),
                    vec![Expression::Number(1.0), Expression::Number(2.0)],
                ))),
            ]
        );
    }

    #[test]
    fn duplicate_parameters_are_kept() {
        let ast = parse_str("def f(x x) x").unwrap();
        match &ast[0] {
            ASTNode::Function(func) => assert_eq!(func.prototype.args, vec!["x", "x"]),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn malformed_prototypes() {
        assert_eq!(
            parse_str("def 1(x) x"),
            Err(ParserError::ExpectedFunctionName(Token::Number(1.0)))
        );
        assert_eq!(
            parse_str("extern foo x"),
            Err(ParserError::ExpectedPrototypeOpen(Token::Identifier("x".to_string())))
        );
        assert_eq!(
            parse_str("extern foo(x, y)"),
            Err(ParserError::ExpectedPrototypeClose(Token::Char(',')))
        );
    }

    #[test]
    fn recovers_at_next_unit() {
        let results: Vec<_> = Parser::new("def f(x x; def g(y) y").collect();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0],
            Err(ParserError::ExpectedPrototypeClose(Token::Char(';')))
        );
        assert_eq!(
            results[1],
            Ok(ASTNode::Function(Function {
                prototype: Prototype {
                    name: "g".to_string(),
                    args: vec!["y".to_string()],
                },
                body: Expression::Variable("y".to_string()),
            }))
        );
    }

    #[test]
    fn recovery_discards_one_token_at_a_time() {
        let results: Vec<_> = Parser::new("foo(1 2); 3").collect();
        assert_eq!(
            results,
            vec![
                Err(ParserError::ExpectedArgumentSeparator(Token::Number(2.0))),
                Err(ParserError::UnknownPrimary(Token::Char(')'))),
                Ok(ASTNode::Expression(Function::anonymous(Expression::Number(3.0)))),
            ]
        );
    }

    #[test]
    fn error_at_end_of_input_terminates() {
        let results: Vec<_> = Parser::new("def f(").collect();
        assert_eq!(
            results,
            vec![Err(ParserError::ExpectedPrototypeClose(Token::Eof))]
        );
    }

    #[test]
    fn unknown_operator_ends_expression() {
        let results: Vec<_> = Parser::new("1 ^ 2").collect();
        assert_eq!(
            results,
            vec![
                Ok(ASTNode::Expression(Function::anonymous(Expression::Number(1.0)))),
                Err(ParserError::UnknownPrimary(Token::Char('^'))),
                Ok(ASTNode::Expression(Function::anonymous(Expression::Number(2.0)))),
            ]
        );
    }

    #[test]
    fn long_chains_hit_the_nesting_limit() {
        let fits = vec!["1"; MAX_NESTING_DEPTH].join("+");
        assert_eq!(expr(&fits).depth(), MAX_NESTING_DEPTH);

        let chain = vec!["1"; 5000].join("+");
        assert_eq!(
            Parser::new(&chain).parse_expr(),
            Err(ParserError::TooDeep(MAX_NESTING_DEPTH))
        );
    }

    #[test]
    fn deep_parentheses_hit_the_nesting_limit() {
        let source = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
        let mut parser = Parser::new(&source);
        assert_eq!(
            parser.parse_top_level(),
            Err(ParserError::TooDeep(MAX_NESTING_DEPTH))
        );

        let calls = format!("{}x{}", "f(".repeat(200), ")".repeat(200));
        assert_eq!(expr(&calls).depth(), 201);
    }

    #[test]
    fn nesting_is_released_after_an_error() {
        let source = format!("{}1; 2 + 3", "(".repeat(MAX_NESTING_DEPTH + 1));
        let results: Vec<_> = Parser::new(&source).collect();
        assert_eq!(results[0], Err(ParserError::TooDeep(MAX_NESTING_DEPTH)));
        assert_eq!(
            results.last(),
            Some(&Ok(ASTNode::Expression(Function::anonymous(*bin(
                '+',
                num(2.0),
                num(3.0)
            )))))
        );
    }

    #[test]
    fn parsing_is_repeatable() {
        let source = "def f(a b) a * (b + 1) - a / 2; extern g(); f(g(), 3)";
        assert_eq!(parse_str(source), parse_str(source));
    }

    #[test]
    fn custom_precedence_table() {
        let mut table = default_precedence();
        table.insert('^', 60);
        table.insert('+', 0);
        let mut parser = Parser::with_precedence("a * b ^ c", table.clone());
        assert_eq!(
            parser.parse_expr().unwrap(),
            *bin('*', var("a"), bin('^', var("b"), var("c")))
        );

        // non-positive precedence disables an operator
        let mut parser = Parser::with_precedence("a + b", table);
        assert_eq!(parser.parse_expr().unwrap(), *var("a"));
    }
}
