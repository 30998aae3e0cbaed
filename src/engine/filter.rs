//! Filter expressions over media records.
//!
//! `Filter` is built either programmatically (`Filter::eq("format", "JPEG")`)
//! or parsed from a small SQL-like language:
//!
//! ```text
//! format = 'JPEG' AND size > 1000000
//! "EXIF:Make" IN ('Canon', 'Nikon') OR NOT mime LIKE 'video/%'
//! IFD0:Model IS NOT NULL
//! ```
//!
//! On the right-hand side of a comparison a bare word is a text literal, so
//! `format = JPEG` works too. Filters compile to a parameterised WHERE clause
//! against one generation; a tag key that generation has no column for reads
//! as NULL.

use crate::error::{EngineError, Result};
use crate::storage::Generation;
use rusqlite::types::Value;

/// Record attribute a filter, grouping or ordering refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Path,
    Name,
    Size,
    Mtime,
    Format,
    Mime,
    Fingerprint,
    Tag(String),
}

impl Field {
    /// Built-in attribute names map to columns, anything else is a tag key.
    pub fn named(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "path" => Field::Path,
            "name" => Field::Name,
            "size" => Field::Size,
            "mtime" => Field::Mtime,
            "format" => Field::Format,
            "mime" => Field::Mime,
            "fingerprint" => Field::Fingerprint,
            _ => Field::Tag(name.to_string()),
        }
    }

    pub fn tag(key: impl Into<String>) -> Self {
        Field::Tag(key.into())
    }

    /// SQL expression for this field in `generation`.
    pub(crate) fn sql(&self, generation: &Generation) -> String {
        match self {
            Field::Path => "path".into(),
            Field::Name => "name".into(),
            Field::Size => "size".into(),
            Field::Mtime => "mtime".into(),
            Field::Format => "format".into(),
            Field::Mime => "mime".into(),
            Field::Fingerprint => "fingerprint".into(),
            Field::Tag(key) => match generation.column_for(key) {
                Some(column) => format!("\"{}\"", column),
                None => "NULL".into(),
            },
        }
    }
}

impl From<&str> for Field {
    fn from(name: &str) -> Self {
        Field::named(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Literal {
    fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Integer(i64::from(*b)),
            Literal::Integer(i) => Value::Integer(*i),
            Literal::Real(r) => Value::Real(*r),
            Literal::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Text(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Text(s)
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Integer(i)
    }
}

impl From<f64> for Literal {
    fn from(r: f64) -> Self {
        Literal::Real(r)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every record
    All,
    Compare { field: Field, op: CompareOp, value: Literal },
    Like { field: Field, pattern: String, negated: bool },
    /// Case-insensitive regular expression match
    Regexp { field: Field, pattern: String, negated: bool },
    In { field: Field, values: Vec<Literal>, negated: bool },
    Between { field: Field, low: Literal, high: Literal, negated: bool },
    IsNull { field: Field, negated: bool },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All
    }
}

impl Filter {
    pub fn compare(field: impl Into<Field>, op: CompareOp, value: impl Into<Literal>) -> Self {
        Filter::Compare { field: field.into(), op, value: value.into() }
    }

    pub fn eq(field: impl Into<Field>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<Field>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn gt(field: impl Into<Field>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn lt(field: impl Into<Field>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn like(field: impl Into<Field>, pattern: impl Into<String>) -> Self {
        Filter::Like { field: field.into(), pattern: pattern.into(), negated: false }
    }

    pub fn regexp(field: impl Into<Field>, pattern: impl Into<String>) -> Self {
        Filter::Regexp { field: field.into(), pattern: pattern.into(), negated: false }
    }

    pub fn in_list<L: Into<Literal>>(field: impl Into<Field>, values: impl IntoIterator<Item = L>) -> Self {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn between(field: impl Into<Field>, low: impl Into<Literal>, high: impl Into<Literal>) -> Self {
        Filter::Between { field: field.into(), low: low.into(), high: high.into(), negated: false }
    }

    pub fn is_null(field: impl Into<Field>) -> Self {
        Filter::IsNull { field: field.into(), negated: false }
    }

    pub fn is_not_null(field: impl Into<Field>) -> Self {
        Filter::IsNull { field: field.into(), negated: true }
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (a, b) => Filter::And(Box::new(a), Box::new(b)),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        Filter::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Parse the textual filter language. Empty input matches everything.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Ok(Filter::All);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let filter = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(invalid(format!("unexpected {} after expression", tok)));
        }
        Ok(filter)
    }

    /// Compile into a WHERE clause for `generation`, appending bound values to `params`.
    pub(crate) fn to_sql(&self, generation: &Generation, params: &mut Vec<Value>) -> String {
        match self {
            Filter::All => "1".into(),
            Filter::Compare { field, op, value: Literal::Null } => {
                let negated = match op {
                    CompareOp::Eq => "",
                    CompareOp::Ne => " NOT",
                    // Ordering against NULL is never true
                    _ => return "0".into(),
                };
                format!("({} IS{} NULL)", field.sql(generation), negated)
            }
            Filter::Compare { field, op, value } => {
                params.push(value.to_value());
                format!("({} {} ?{})", field.sql(generation), op.sql(), params.len())
            }
            Filter::Like { field, pattern, negated } => {
                params.push(Value::Text(pattern.clone()));
                format!("({} {}LIKE ?{})", field.sql(generation), not(*negated), params.len())
            }
            Filter::Regexp { field, pattern, negated } => {
                params.push(Value::Text(pattern.clone()));
                format!("({} {}REGEXP ?{})", field.sql(generation), not(*negated), params.len())
            }
            Filter::In { field, values, negated } => {
                if values.is_empty() {
                    return if *negated { "1".into() } else { "0".into() };
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| {
                        params.push(v.to_value());
                        format!("?{}", params.len())
                    })
                    .collect();
                format!("({} {}IN ({}))", field.sql(generation), not(*negated), placeholders.join(", "))
            }
            Filter::Between { field, low, high, negated } => {
                params.push(low.to_value());
                let lo = params.len();
                params.push(high.to_value());
                let hi = params.len();
                format!("({} {}BETWEEN ?{} AND ?{})", field.sql(generation), not(*negated), lo, hi)
            }
            Filter::IsNull { field, negated } => {
                format!("({} IS {}NULL)", field.sql(generation), not(*negated))
            }
            Filter::And(a, b) => {
                let left = a.to_sql(generation, params);
                let right = b.to_sql(generation, params);
                format!("({} AND {})", left, right)
            }
            Filter::Or(a, b) => {
                let left = a.to_sql(generation, params);
                let right = b.to_sql(generation, params);
                format!("({} OR {})", left, right)
            }
            Filter::Not(inner) => format!("(NOT {})", inner.to_sql(generation, params)),
        }
    }
}

fn not(negated: bool) -> &'static str {
    if negated { "NOT " } else { "" }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidQuery(msg.into())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    QuotedName(String),
    Str(String),
    Int(i64),
    Real(f64),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Word(w) => write!(f, "'{}'", w),
            Token::QuotedName(n) => write!(f, "\"{}\"", n),
            Token::Str(s) => write!(f, "string '{}'", s),
            Token::Int(i) => write!(f, "{}", i),
            Token::Real(r) => write!(f, "{}", r),
            Token::Op(op) => write!(f, "'{}'", op),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == ':'
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        match c {
            '(' => { out.push(Token::LParen); i += 1; }
            ')' => { out.push(Token::RParen); i += 1; }
            ',' => { out.push(Token::Comma); i += 1; }
            '\'' | '"' => {
                // Doubled quote inside a quoted run is an escaped quote
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(invalid(format!("unterminated {} at end of input", quote))),
                        Some(&ch) if ch == quote => {
                            if chars.get(i + 1) == Some(&quote) {
                                text.push(quote);
                                i += 2;
                            } else {
                                i += 1;
                                break;
                            }
                        }
                        Some(&ch) => { text.push(ch); i += 1; }
                    }
                }
                out.push(if quote == '\'' { Token::Str(text) } else { Token::QuotedName(text) });
            }
            '=' => {
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
                out.push(Token::Op("="));
            }
            '!' if chars.get(i + 1) == Some(&'=') => { out.push(Token::Op("!=")); i += 2; }
            '<' => match chars.get(i + 1) {
                Some('=') => { out.push(Token::Op("<=")); i += 2; }
                Some('>') => { out.push(Token::Op("!=")); i += 2; }
                _ => { out.push(Token::Op("<")); i += 1; }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    out.push(Token::Op(">="));
                    i += 2;
                } else {
                    out.push(Token::Op(">"));
                    i += 1;
                }
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.contains('.') {
                    let r = text.parse().map_err(|_| invalid(format!("bad number '{}'", text)))?;
                    out.push(Token::Real(r));
                } else {
                    let n = text.parse().map_err(|_| invalid(format!("bad number '{}'", text)))?;
                    out.push(Token::Int(n));
                }
            }
            c if is_word_char(c) => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                out.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => return Err(invalid(format!("unexpected character '{}' at {}", other, i))),
        }
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.expected(keyword))
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.expected(&token.to_string()))
        }
    }

    fn expected(&self, what: &str) -> EngineError {
        match self.peek() {
            Some(tok) => invalid(format!("expected {}, found {}", what, tok)),
            None => invalid(format!("expected {}, found end of input", what)),
        }
    }

    fn parse_or(&mut self) -> Result<Filter> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") {
            let right = self.parse_and()?;
            left = Filter::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Filter> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword("AND") {
            let right = self.parse_unary()?;
            left = Filter::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Filter> {
        if self.eat_keyword("NOT") {
            return Ok(Filter::Not(Box::new(self.parse_unary()?)));
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        self.parse_predicate()
    }

    fn parse_field(&mut self) -> Result<Field> {
        match self.next() {
            Some(Token::Word(w)) => Ok(Field::named(&w)),
            Some(Token::QuotedName(n)) => Ok(Field::Tag(n)),
            Some(other) => Err(invalid(format!("expected a field name, found {}", other))),
            None => Err(invalid("expected a field name, found end of input")),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Literal::Text(s)),
            Some(Token::Int(i)) => Ok(Literal::Integer(i)),
            Some(Token::Real(r)) => Ok(Literal::Real(r)),
            Some(Token::Word(w)) => Ok(match w.to_ascii_uppercase().as_str() {
                "NULL" => Literal::Null,
                "TRUE" => Literal::Bool(true),
                "FALSE" => Literal::Bool(false),
                _ => Literal::Text(w),
            }),
            Some(other) => Err(invalid(format!("expected a value, found {}", other))),
            None => Err(invalid("expected a value, found end of input")),
        }
    }

    fn parse_predicate(&mut self) -> Result<Filter> {
        let field = self.parse_field()?;

        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            let op = match op {
                "=" => CompareOp::Eq,
                "!=" => CompareOp::Ne,
                "<" => CompareOp::Lt,
                "<=" => CompareOp::Le,
                ">" => CompareOp::Gt,
                _ => CompareOp::Ge,
            };
            let value = self.parse_literal()?;
            return Ok(Filter::Compare { field, op, value });
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Filter::IsNull { field, negated });
        }

        let negated = self.eat_keyword("NOT");
        if self.eat_keyword("LIKE") {
            return match self.next() {
                Some(Token::Str(pattern)) => Ok(Filter::Like { field, pattern, negated }),
                _ => Err(invalid("LIKE expects a quoted pattern")),
            };
        }
        if self.eat_keyword("REGEXP") {
            return match self.next() {
                Some(Token::Str(pattern)) => {
                    regex::RegexBuilder::new(&pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| invalid(format!("bad REGEXP pattern: {}", e)))?;
                    Ok(Filter::Regexp { field, pattern, negated })
                }
                _ => Err(invalid("REGEXP expects a quoted pattern")),
            };
        }
        if self.eat_keyword("IN") {
            self.expect(Token::LParen)?;
            let mut values = Vec::new();
            if self.peek() != Some(&Token::RParen) {
                loop {
                    values.push(self.parse_literal()?);
                    if self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
            }
            self.expect(Token::RParen)?;
            return Ok(Filter::In { field, values, negated });
        }
        if self.eat_keyword("BETWEEN") {
            let low = self.parse_literal()?;
            self.expect_keyword("AND")?;
            let high = self.parse_literal()?;
            return Ok(Filter::Between { field, low, high, negated });
        }

        Err(self.expected("a comparison operator, LIKE, REGEXP, IN, BETWEEN or IS"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GenerationId;
    use crate::storage::TagColumn;
    use std::path::PathBuf;

    fn generation() -> Generation {
        Generation::new(
            GenerationId(1),
            PathBuf::from("/nonexistent/gen-000001.db"),
            0,
            vec![TagColumn { tag_key: "EXIF:Make".into(), column: "tag_1".into() }],
        )
    }

    #[test]
    fn test_parse_precedence() {
        let f = Filter::parse("format = 'JPEG' OR format = 'PNG' AND size > 10").unwrap();
        let expected = Filter::Or(
            Box::new(Filter::eq("format", "JPEG")),
            Box::new(Filter::And(
                Box::new(Filter::eq("format", "PNG")),
                Box::new(Filter::gt("size", 10i64)),
            )),
        );
        assert_eq!(f, expected);
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(Filter::parse("").unwrap(), Filter::All);
        assert_eq!(Filter::parse("format == JPEG").unwrap(), Filter::eq("format", "JPEG"));
        assert_eq!(Filter::parse("EXIF:Make <> 'Canon'").unwrap(), Filter::ne("EXIF:Make", "Canon"));
        assert_eq!(Filter::parse("\"Make\" is not null").unwrap(), Filter::is_not_null(Field::tag("Make")));
        assert_eq!(
            Filter::parse("size NOT BETWEEN 1 AND 2.5").unwrap(),
            Filter::Between {
                field: Field::Size,
                low: Literal::Integer(1),
                high: Literal::Real(2.5),
                negated: true,
            }
        );
        assert_eq!(
            Filter::parse("mime in ('image/jpeg', 'image/png')").unwrap(),
            Filter::in_list("mime", ["image/jpeg", "image/png"])
        );
        assert_eq!(
            Filter::parse("NOT (name LIKE 'IMG%')").unwrap(),
            Filter::like("name", "IMG%").negate()
        );
        assert_eq!(Filter::parse("name = 'it''s'").unwrap(), Filter::eq("name", "it's"));
        assert_eq!(Filter::parse("mtime > -5").unwrap(), Filter::gt("mtime", -5i64));
    }

    #[test]
    fn test_parse_regexp() {
        assert_eq!(
            Filter::parse("name REGEXP '^img_[0-9]+'").unwrap(),
            Filter::regexp("name", "^img_[0-9]+")
        );
        let gen = generation();
        let mut params = Vec::new();
        let sql = Filter::parse("EXIF:Make NOT REGEXP 'can.n'").unwrap().to_sql(&gen, &mut params);
        assert_eq!(sql, "(\"tag_1\" NOT REGEXP ?1)");
        assert_eq!(params, vec![Value::Text("can.n".into())]);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["format =", "format 'JPEG'", "(size > 1", "name LIKE foo", "name REGEXP '('", "size > 1 garbage", "name = 'open", "a ; b"] {
            assert!(
                matches!(Filter::parse(bad), Err(EngineError::InvalidQuery(_))),
                "expected parse error for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_compile_binds_params() {
        let gen = generation();
        let mut params = Vec::new();
        let sql = Filter::parse("EXIF:Make = 'Canon' AND size BETWEEN 1 AND 9")
            .unwrap()
            .to_sql(&gen, &mut params);
        assert_eq!(sql, "((\"tag_1\" = ?1) AND (size BETWEEN ?2 AND ?3))");
        assert_eq!(params, vec![Value::Text("Canon".into()), Value::Integer(1), Value::Integer(9)]);
    }

    #[test]
    fn test_unknown_tag_is_null() {
        let gen = generation();
        let mut params = Vec::new();
        let sql = Filter::is_null(Field::tag("XMP:Rating")).to_sql(&gen, &mut params);
        assert_eq!(sql, "(NULL IS NULL)");
        let sql = Filter::eq("format", Literal::Null).to_sql(&gen, &mut params);
        assert_eq!(sql, "(format IS NULL)");
        assert!(params.is_empty());
    }

    #[test]
    fn test_and_with_all_collapses() {
        let f = Filter::All.and(Filter::eq("format", "JPEG"));
        assert_eq!(f, Filter::eq("format", "JPEG"));
    }
}
