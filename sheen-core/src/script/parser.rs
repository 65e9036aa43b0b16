//! Lexer and recursive descent parser for embedded script source.

use super::ScriptError;
use serde_json::Value;

/// Maximum expression nesting accepted by the parser.
const MAX_DEPTH: usize = 96;

/// Multi-character punctuation, longest first.
const PUNCT: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "+=", "-=", "(", ")", "[", "]", "{", "}",
    ",", ";", ":", ".", "?", "=", "<", ">", "+", "-", "*", "/", "%", "!",
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// An assignable location: a root name followed by member/index steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub root: String,
    pub path: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
}

/// Statement tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let(String, Option<Expr>),
    Assign {
        target: Expr,
        place: Place,
        op: AssignOp,
        value: Expr,
    },
    Delete(Place),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    Return(Option<Expr>),
    Block(Vec<Stmt>),
    Expr(Expr),
}

/// Parses a sequence of statements.
pub fn parse_program(source: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser::new(source)?;
    let mut stmts = Vec::new();
    while parser.peek() != &Token::Eof {
        stmts.push(parser.parse_stmt()?);
    }
    Ok(stmts)
}

/// Parses a single expression, optionally followed by `;`.
pub fn parse_expression(source: &str) -> Result<Expr, ScriptError> {
    let mut parser = Parser::new(source)?;
    if parser.peek() == &Token::Eof {
        return Err(parser.error("empty expression"));
    }
    let expr = parser.parse_expr()?;
    parser.eat(";");
    if parser.peek() != &Token::Eof {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ScriptError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Comments
        if c == '/' && i + 1 < chars.len() {
            match chars[i + 1].1 {
                '/' => {
                    while i < chars.len() && chars[i].1 != '\n' {
                        i += 1;
                    }
                    continue;
                }
                '*' => {
                    i += 2;
                    loop {
                        if i + 1 >= chars.len() {
                            return Err(ScriptError::Syntax {
                                pos,
                                reason: "unterminated comment".to_string(),
                            });
                        }
                        if chars[i].1 == '*' && chars[i + 1].1 == '/' {
                            i += 2;
                            break;
                        }
                        i += 1;
                    }
                    continue;
                }
                _ => {}
            }
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].1.is_ascii_digit() {
                i += 1;
            }
            if i + 1 < chars.len() && chars[i].1 == '.' && chars[i + 1].1.is_ascii_digit() {
                i += 1;
                while i < chars.len() && chars[i].1.is_ascii_digit() {
                    i += 1;
                }
            }
            if i < chars.len() && (chars[i].1 == 'e' || chars[i].1 == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j].1 == '+' || chars[j].1 == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].1.is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].1.is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
            let num = text.parse::<f64>().map_err(|_| ScriptError::Syntax {
                pos,
                reason: format!("invalid number: '{}'", text),
            })?;
            tokens.push((pos, Token::Num(num)));
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                let Some(&(_, c)) = chars.get(i) else {
                    return Err(ScriptError::Syntax {
                        pos,
                        reason: "unterminated string".to_string(),
                    });
                };
                i += 1;
                if c == quote {
                    break;
                }
                if c != '\\' {
                    s.push(c);
                    continue;
                }
                let Some(&(_, escaped)) = chars.get(i) else {
                    continue;
                };
                i += 1;
                match escaped {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    '0' => s.push('\0'),
                    'u' => {
                        let hex: String = chars.iter().skip(i).take(4).map(|(_, c)| c).collect();
                        let decoded = u32::from_str_radix(&hex, 16)
                            .ok()
                            .filter(|_| hex.len() == 4)
                            .and_then(char::from_u32)
                            .ok_or_else(|| ScriptError::Syntax {
                                pos,
                                reason: format!("bad unicode escape: '\\u{}'", hex),
                            })?;
                        s.push(decoded);
                        i += 4;
                    }
                    other => s.push(other),
                }
            }
            tokens.push((pos, Token::Str(s)));
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '$')
            {
                i += 1;
            }
            let ident: String = chars[start..i].iter().map(|(_, c)| c).collect();
            tokens.push((pos, Token::Ident(ident)));
            continue;
        }

        let rest = &input[pos..];
        match PUNCT.iter().find(|p| rest.starts_with(**p)) {
            Some(p) => {
                tokens.push((pos, Token::Punct(*p)));
                i += p.len();
            }
            None => {
                return Err(ScriptError::Syntax {
                    pos,
                    reason: format!("unexpected character '{}'", c),
                })
            }
        }
    }

    tokens.push((input.len(), Token::Eof));
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self, ScriptError> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            depth: 0,
        })
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].1
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].0
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].1.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, reason: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            pos: self.offset(),
            reason: reason.into(),
        }
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Token::Punct(q) if *q == p)
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(w) if w == word)
    }

    fn eat(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, p: &str) -> Result<(), ScriptError> {
        if self.eat(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", p)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ScriptError> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            _ => Err(self.error("expected identifier")),
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_stmt(&mut self) -> Result<Stmt, ScriptError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("statement nested too deeply"));
        }
        let result = self.parse_simple_stmt();
        self.depth -= 1;
        result
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt, ScriptError> {
        if self.eat(";") {
            return Ok(Stmt::Block(Vec::new()));
        }

        if self.is_punct("{") {
            return Ok(Stmt::Block(self.parse_block()?));
        }

        if self.is_keyword("let") || self.is_keyword("var") || self.is_keyword("const") {
            self.advance();
            let name = self.expect_ident()?;
            if name == "bindings" || name == "_" {
                return Err(self.error(format!("cannot redeclare '{}'", name)));
            }
            let init = if self.eat("=") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.eat(";");
            return Ok(Stmt::Let(name, init));
        }

        if self.is_keyword("if") {
            self.advance();
            self.expect("(")?;
            let cond = self.parse_expr()?;
            self.expect(")")?;
            let then = self.parse_body()?;
            let otherwise = if self.is_keyword("else") {
                self.advance();
                self.parse_body()?
            } else {
                Vec::new()
            };
            return Ok(Stmt::If(cond, then, otherwise));
        }

        if self.is_keyword("return") {
            self.advance();
            let value = if self.is_punct(";") || self.is_punct("}") || self.peek() == &Token::Eof
            {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.eat(";");
            return Ok(Stmt::Return(value));
        }

        if self.is_keyword("delete") {
            self.advance();
            let target = self.parse_expr()?;
            let place = self.to_place(target)?;
            self.eat(";");
            return Ok(Stmt::Delete(place));
        }

        let expr = self.parse_expr()?;
        let op = if self.eat("=") {
            Some(AssignOp::Set)
        } else if self.eat("+=") {
            Some(AssignOp::Add)
        } else if self.eat("-=") {
            Some(AssignOp::Sub)
        } else {
            None
        };

        let stmt = match op {
            Some(op) => {
                let value = self.parse_expr()?;
                let place = self.to_place(expr.clone())?;
                Stmt::Assign {
                    target: expr,
                    place,
                    op,
                    value,
                }
            }
            None => Stmt::Expr(expr),
        };
        self.eat(";");
        Ok(stmt)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect("{")?;
        let mut stmts = Vec::new();
        while !self.is_punct("}") {
            if self.peek() == &Token::Eof {
                return Err(self.error("expected '}'"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.advance();
        Ok(stmts)
    }

    /// Body of an `if`/`else`: a block or a single statement.
    fn parse_body(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        if self.is_punct("{") {
            self.parse_block()
        } else {
            Ok(vec![self.parse_stmt()?])
        }
    }

    fn to_place(&self, expr: Expr) -> Result<Place, ScriptError> {
        let mut path = Vec::new();
        let mut current = expr;
        loop {
            match current {
                Expr::Ident(root) => {
                    path.reverse();
                    return Ok(Place { root, path });
                }
                Expr::Member(base, name) => {
                    path.push(Expr::Literal(Value::String(name)));
                    current = *base;
                }
                Expr::Index(base, index) => {
                    path.push(*index);
                    current = *base;
                }
                _ => return Err(self.error("invalid assignment target")),
            }
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn parse_expr(&mut self) -> Result<Expr, ScriptError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        let result = self.parse_conditional();
        self.depth -= 1;
        result
    }

    fn parse_conditional(&mut self) -> Result<Expr, ScriptError> {
        let cond = self.parse_or()?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.parse_expr()?;
        self.expect(":")?;
        let otherwise = self.parse_expr()?;
        Ok(Expr::Conditional(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn parse_or(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.parse_and()?;
        while self.eat("||") {
            let right = self.parse_and()?;
            left = Expr::Logical(LogicalOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.parse_equality()?;
        while self.eat("&&") {
            let right = self.parse_equality()?;
            left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = if self.eat("===") || self.eat("==") {
                BinaryOp::Eq
            } else if self.eat("!==") || self.eat("!=") {
                BinaryOp::Ne
            } else {
                return Ok(left);
            };
            let right = self.parse_comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = if self.eat("<=") {
                BinaryOp::Le
            } else if self.eat(">=") {
                BinaryOp::Ge
            } else if self.eat("<") {
                BinaryOp::Lt
            } else if self.eat(">") {
                BinaryOp::Gt
            } else {
                return Ok(left);
            };
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat("+") {
                BinaryOp::Add
            } else if self.eat("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat("*") {
                BinaryOp::Mul
            } else if self.eat("/") {
                BinaryOp::Div
            } else if self.eat("%") {
                BinaryOp::Rem
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ScriptError> {
        let op = if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("+") {
            UnaryOp::Plus
        } else {
            return self.parse_postfix();
        };

        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        let inner = self.parse_unary();
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(inner?)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                let name = self.expect_ident()?;
                expr = Expr::Member(Box::new(expr), name);
            } else if self.eat("[") {
                let index = self.parse_expr()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat("(") {
                let args = self.parse_list(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_list(&mut self, close: &str) -> Result<Vec<Expr>, ScriptError> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.parse_expr()?);
            if !self.eat(",") {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr, ScriptError> {
        let offset = self.offset();
        match self.advance() {
            Token::Num(n) => crate::value::number_value(n)
                .map(Expr::Literal)
                .ok_or_else(|| ScriptError::Syntax {
                    pos: offset,
                    reason: "number out of range".to_string(),
                }),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(word) => Ok(match word.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Ident(word),
            }),
            Token::Punct("(") => {
                let expr = self.parse_expr()?;
                self.expect(")")?;
                Ok(expr)
            }
            Token::Punct("[") => Ok(Expr::Array(self.parse_list("]")?)),
            Token::Punct("{") => {
                let mut fields = Vec::new();
                while !self.eat("}") {
                    let key = match self.advance() {
                        Token::Ident(name) => name,
                        Token::Str(s) => s,
                        Token::Num(n) => crate::value::display(
                            &crate::value::number_value(n).unwrap_or(Value::Null),
                        ),
                        _ => return Err(self.error("expected property name")),
                    };
                    self.expect(":")?;
                    fields.push((key, self.parse_expr()?));
                    if !self.eat(",") {
                        self.expect("}")?;
                        break;
                    }
                }
                Ok(Expr::Object(fields))
            }
            Token::Eof => Err(ScriptError::Syntax {
                pos: offset,
                reason: "unexpected end of input".to_string(),
            }),
            Token::Punct(p) => Err(ScriptError::Syntax {
                pos: offset,
                reason: format!("unexpected '{}'", p),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Literal(json!(1))),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(Expr::Literal(json!(2))),
                    Box::new(Expr::Literal(json!(3)))
                ))
            )
        );
    }

    #[test]
    fn test_member_and_index_chain() {
        let expr = parse_expression("bindings.a[\"b\"].c").unwrap();
        assert!(matches!(expr, Expr::Member(_, ref name) if name == "c"));
    }

    #[test]
    fn test_assignment_place() {
        let program = parse_program("bindings.order.total += 5;").unwrap();
        match &program[0] {
            Stmt::Assign { place, op, .. } => {
                assert_eq!(place.root, "bindings");
                assert_eq!(
                    place.path,
                    vec![Expr::Literal(json!("order")), Expr::Literal(json!("total"))]
                );
                assert_eq!(*op, AssignOp::Add);
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_if_else_and_return() {
        let program =
            parse_program("if (bindings.x > 1) { return bindings; } else bindings.x = 2; return null")
                .unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(program[0], Stmt::If(_, ref t, ref e) if t.len() == 1 && e.len() == 1));
        assert_eq!(program[1], Stmt::Return(Some(Expr::Literal(Value::Null))));
    }

    #[test]
    fn test_literals() {
        let expr = parse_expression("{a: [1, 'two', true], \"b c\": null, }").unwrap();
        match expr {
            Expr::Object(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[1].0, "b c");
            }
            other => panic!("unexpected expression {:?}", other),
        }
    }

    #[test]
    fn test_comments_and_escapes() {
        let program = parse_program("// note\nlet s = \"a\\n\\u0041\"; /* block */").unwrap();
        assert_eq!(
            program,
            vec![Stmt::Let(
                "s".to_string(),
                Some(Expr::Literal(json!("a\nA")))
            )]
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("1 +").is_err());
        assert!(parse_expression("(1").is_err());
        assert!(parse_expression("'open").is_err());
        assert!(parse_expression("a b").is_err());
        assert!(parse_expression("1 # 2").is_err());
        assert!(parse_program("1 = 2;").is_err());
        assert!(parse_program("let bindings = 1;").is_err());
        assert!(parse_program("if (x) { y = 1;").is_err());
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(parse_expression(&deep).is_err());

        let negations = format!("{}true", "!".repeat(200));
        assert!(parse_expression(&negations).is_err());

        let blocks = format!("{}{}", "{".repeat(5000), "}".repeat(5000));
        assert!(matches!(parse_program(&blocks), Err(ScriptError::Syntax { .. })));

        let ifs = format!("{}x = 1;", "if (1) ".repeat(5000));
        assert!(matches!(parse_program(&ifs), Err(ScriptError::Syntax { .. })));

        let shallow = format!("{}x = 1;{}", "{".repeat(20), "}".repeat(20));
        assert!(parse_program(&shallow).is_ok());
    }
}
