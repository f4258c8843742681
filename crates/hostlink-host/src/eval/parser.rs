//! Recursive-descent parser for the host expression language
//!
//! Precedence, loosest first: `lambda`, conditional, `or`, `and`, `not`,
//! comparisons (not chained), `+ -`, `* / // %`, unary `- +`, `**`, then
//! postfix calls, attributes and subscripts.

use std::rc::Rc;

use super::ast::{BinOp, CmpOp, Expr, Stmt, Target, UnaryOp};
use super::lexer::{tokenize, Token};

pub fn parse_expression(source: &str) -> Result<Expr, String> {
    let mut parser = Parser::new(source)?;
    parser.skip_newlines();
    let expr = parser.expression()?;
    parser.skip_newlines();
    parser.expect_eof()?;
    Ok(expr)
}

pub fn parse_statements(source: &str) -> Result<Vec<Stmt>, String> {
    let mut parser = Parser::new(source)?;
    let mut stmts = Vec::new();
    loop {
        while parser.eat_op(";") || parser.peek() == &Token::Newline {
            parser.advance();
        }
        if parser.peek() == &Token::Eof {
            break;
        }
        stmts.push(parser.statement()?);
        match parser.peek() {
            Token::Newline | Token::Eof => {}
            Token::Op(";") => {}
            other => return Err(format!("invalid syntax near {other:?}")),
        }
    }
    Ok(stmts)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self, String> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
        })
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn skip_newlines(&mut self) {
        while self.peek() == &Token::Newline {
            self.advance();
        }
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Token::Op(o) if *o == op)
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Name(n) if n == word)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), String> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(format!("expected '{op}', found {:?}", self.peek()))
        }
    }

    fn expect_eof(&self) -> Result<(), String> {
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(format!("invalid syntax near {other:?}")),
        }
    }

    fn statement(&mut self) -> Result<Stmt, String> {
        if self.eat_keyword("pass") {
            return Ok(Stmt::Pass);
        }
        let expr = self.expression()?;
        if self.eat_op("=") {
            let target = match expr {
                Expr::Name(name) => Target::Name(name),
                Expr::Attr(obj, name) => Target::Attr(*obj, name),
                Expr::Subscript(obj, key) => Target::Subscript(*obj, *key),
                _ => return Err("cannot assign to expression".to_string()),
            };
            let value = self.expression()?;
            return Ok(Stmt::Assign(target, value));
        }
        Ok(Stmt::Expr(expr))
    }

    fn expression(&mut self) -> Result<Expr, String> {
        if self.eat_keyword("lambda") {
            let mut params = Vec::new();
            while !self.is_op(":") {
                match self.advance() {
                    Token::Name(name) => params.push(name),
                    other => return Err(format!("invalid lambda parameter {other:?}")),
                }
                if !self.eat_op(",") {
                    break;
                }
            }
            self.expect_op(":")?;
            let body = self.expression()?;
            return Ok(Expr::Lambda {
                params,
                body: Rc::new(body),
            });
        }
        let then = self.or_expr()?;
        if self.eat_keyword("if") {
            let cond = self.or_expr()?;
            if !self.eat_keyword("else") {
                return Err("expected 'else' in conditional expression".to_string());
            }
            let otherwise = self.expression()?;
            return Ok(Expr::IfElse {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(then)
    }

    fn or_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and_expr()?;
        while self.eat_keyword("or") {
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.not_expr()?;
        while self.eat_keyword("and") {
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, String> {
        if self.eat_keyword("not") {
            let operand = self.not_expr()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Token::Op("==") => CmpOp::Eq,
            Token::Op("!=") => CmpOp::Ne,
            Token::Op("<") => CmpOp::Lt,
            Token::Op("<=") => CmpOp::Le,
            Token::Op(">") => CmpOp::Gt,
            Token::Op(">=") => CmpOp::Ge,
            Token::Name(n) if n == "in" => CmpOp::In,
            Token::Name(n) if n == "not" => {
                self.advance();
                if !self.is_keyword("in") {
                    return Err("expected 'in' after 'not'".to_string());
                }
                CmpOp::NotIn
            }
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.additive()?;
        Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)))
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                return Ok(lhs);
            };
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat_op("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        if self.eat_op("+") {
            return Ok(Expr::Unary(UnaryOp::Pos, Box::new(self.unary()?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, String> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op(".") {
                match self.advance() {
                    Token::Name(name) => expr = Expr::Attr(Box::new(expr), name),
                    other => return Err(format!("invalid attribute name {other:?}")),
                }
            } else if self.eat_op("(") {
                let (args, kwargs) = self.call_arguments()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_op("[") {
                let key = self.expression()?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(key));
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), String> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.is_op(")") {
            let is_keyword_arg = matches!(self.peek(), Token::Name(_))
                && matches!(self.tokens.get(self.pos + 1), Some(Token::Op("=")));
            if is_keyword_arg {
                let name = match self.advance() {
                    Token::Name(name) => name,
                    _ => unreachable!("checked above"),
                };
                self.advance();
                kwargs.push((name, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err("positional argument follows keyword argument".to_string());
                }
                args.push(self.expression()?);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, kwargs))
    }

    fn atom(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::Int(value) => Ok(Expr::Int(value)),
            Token::Float(value) => Ok(Expr::Float(value)),
            Token::Str(mut text) => {
                while let Token::Str(next) = self.peek() {
                    text.push_str(next);
                    self.advance();
                }
                Ok(Expr::Str(text))
            }
            Token::Name(name) => match name.as_str() {
                "None" => Ok(Expr::None),
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                "lambda" | "and" | "or" | "not" | "in" | "if" | "else" | "pass" => {
                    Err(format!("invalid syntax at '{name}'"))
                }
                _ => Ok(Expr::Name(name)),
            },
            Token::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expression()?;
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op(")") {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Token::Op("[") => {
                let mut items = Vec::new();
                while !self.is_op("]") {
                    items.push(self.expression()?);
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Token::Op("{") => {
                let mut entries = Vec::new();
                while !self.is_op("}") {
                    let key = self.expression()?;
                    self.expect_op(":")?;
                    let value = self.expression()?;
                    entries.push((key, value));
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(entries))
            }
            Token::Eof => Err("unexpected end of input".to_string()),
            other => Err(format!("invalid syntax near {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Int(1)),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(Expr::Int(2)),
                    Box::new(Expr::Int(3))
                ))
            )
        );
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let expr = parse_expression("-2 ** 2").unwrap();
        assert!(matches!(expr, Expr::Unary(UnaryOp::Neg, _)));
    }

    #[test]
    fn test_lambda_and_call() {
        let expr = parse_expression("(lambda x, y: x * y)(3, y=4)").unwrap();
        match expr {
            Expr::Call { func, args, kwargs } => {
                assert!(matches!(*func, Expr::Lambda { ref params, .. } if params.len() == 2));
                assert_eq!(args.len(), 1);
                assert_eq!(kwargs[0].0, "y");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_displays() {
        assert_eq!(parse_expression("()").unwrap(), Expr::Tuple(vec![]));
        assert_eq!(
            parse_expression("(1,)").unwrap(),
            Expr::Tuple(vec![Expr::Int(1)])
        );
        assert!(matches!(parse_expression("{'a': [1, 2]}").unwrap(), Expr::Dict(e) if e.len() == 1));
    }

    #[test]
    fn test_statements() {
        let stmts = parse_statements("x = 1; y = x + 1\nd['k'] = y\npass").unwrap();
        assert_eq!(stmts.len(), 4);
        assert!(matches!(stmts[2], Stmt::Assign(Target::Subscript(_, _), _)));
        assert_eq!(stmts[3], Stmt::Pass);
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_expression("1 +").is_err());
        assert!(parse_expression("f(a=1, 2)").is_err());
        assert!(parse_statements("1 = x").is_err());
        assert!(parse_expression("x y").is_err());
    }
}
