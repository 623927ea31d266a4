//! Rule condition expression language
//!
//! Conditions look like `A.NetClass == 'Power' && B.Type != 'Via'`.
//! Tokens are lexed with nom; the grammar is small enough for a
//! hand-written recursive-descent parser over the token stream:
//!
//! ```text
//! or      := and ('||' and)*
//! and     := unary ('&&' unary)*
//! unary   := '!' unary | primary
//! primary := '(' or ')' | 'true' | 'false' | call | operand cmp operand
//! call    := side '.' func '(' [string (',' string)*] ')'
//! operand := side '.' property | string | number
//! ```
//!
//! String `==`/`!=` are case-insensitive and accept `*`/`?` wildcards on
//! either side. Any comparison touching a missing item (e.g. `B.` in a
//! single-item query) is false.

use crate::board::{BoardItem, LayerSet};
use nom::{
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    number::complete::double,
    sequence::delimited,
    IResult, Parser,
};

use super::condition::{is_coupled_pair, CompiledCondition, EvalContext, EvalQuery};
use super::error::ConditionError;

type LexResult<'a, T> = IResult<&'a str, T, nom::error::Error<&'a str>>;

/// Multi-character operators first so `<=` isn't lexed as `<`
const SYMBOLS: &[&str] = &[
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "!", "(", ")", ",", ".",
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Symbol(&'static str),
    Ident(String),
    Str(String),
    /// Lengths are normalised to nanometres
    Num(f64),
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    offset: usize,
}

fn symbol(input: &str) -> LexResult<'_, &'static str> {
    for sym in SYMBOLS {
        let attempt: LexResult<'_, &str> = tag(*sym).parse(input);
        if let Ok((rest, _)) = attempt {
            return Ok((rest, sym));
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Tag,
    )))
}

fn identifier(input: &str) -> LexResult<'_, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_').parse(input)
}

fn quoted(input: &str) -> LexResult<'_, &str> {
    if input.starts_with('"') {
        delimited(char('"'), take_while(|c: char| c != '"'), char('"')).parse(input)
    } else {
        delimited(char('\''), take_while(|c: char| c != '\''), char('\'')).parse(input)
    }
}

/// Number with an optional length unit
fn number(input: &str) -> LexResult<'_, f64> {
    let (rest, value) = double(input)?;
    match identifier(rest) {
        Ok((after, unit)) => {
            let scale = match unit.to_ascii_lowercase().as_str() {
                "mm" => 1_000_000.0,
                "um" => 1_000.0,
                "mil" | "mils" => 25_400.0,
                "in" => 25_400_000.0,
                _ => {
                    return Err(nom::Err::Error(nom::error::Error::new(
                        rest,
                        nom::error::ErrorKind::Alpha,
                    )))
                }
            };
            Ok((after, value * scale))
        }
        Err(_) => Ok((rest, value)),
    }
}

fn starts_number(input: &str) -> bool {
    let mut chars = input.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('.') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

fn tokenize(text: &str) -> Result<Vec<Spanned>, ConditionError> {
    let mut tokens = Vec::new();
    let mut rest = text;

    loop {
        let skipped: LexResult<'_, &str> = multispace0(rest);
        if let Ok((after, _)) = skipped {
            rest = after;
        }
        if rest.is_empty() {
            break;
        }
        let offset = text.len() - rest.len();

        let lexed = if starts_number(rest) {
            number(rest).map(|(r, n)| (r, Token::Num(n)))
        } else if rest.starts_with('\'') || rest.starts_with('"') {
            quoted(rest).map(|(r, s)| (r, Token::Str(s.to_string())))
        } else if let Ok((r, sym)) = symbol(rest) {
            Ok((r, Token::Symbol(sym)))
        } else {
            identifier(rest).map(|(r, id)| (r, Token::Ident(id.to_string())))
        };

        match lexed {
            Ok((after, token)) => {
                tokens.push(Spanned { token, offset });
                rest = after;
            }
            Err(_) => {
                let found = rest.chars().next().unwrap_or(' ');
                let message = if found == '\'' || found == '"' {
                    "unterminated string".to_string()
                } else {
                    format!("unexpected character '{}'", found)
                };
                return Err(ConditionError::new(message, offset));
            }
        }
    }
    Ok(tokens)
}

/// Which item an operand refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Property {
    NetClass,
    NetName,
    Type,
    ViaType,
    PadType,
    Layer,
    Reference,
    PadNumber,
}

impl Property {
    fn from_name(name: &str) -> Option<Property> {
        let property = match name.to_ascii_lowercase().as_str() {
            "netclass" => Property::NetClass,
            "netname" => Property::NetName,
            "type" => Property::Type,
            "via_type" => Property::ViaType,
            "pad_type" => Property::PadType,
            "layer" => Property::Layer,
            "reference" => Property::Reference,
            "pad_number" => Property::PadNumber,
            _ => return None,
        };
        Some(property)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Function {
    IntersectsArea(String),
    InDiffPair(String),
    IsCoupledDiffPair,
    MemberOfFootprint(String),
    ExistsOnLayer(LayerSet),
    HasNetclass(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Property(Side, Property),
    /// `L`, the layer being queried
    QueryLayer,
    Str(String),
    Num(f64),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Bool(bool),
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    Compare(Operand, CmpOp, Operand),
    Call(Side, Function),
}

/// A compiled condition expression
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    text: String,
    root: Expr,
}

impl CompiledExpr {
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Compile condition text
pub fn compile(text: &str) -> Result<CompiledExpr, ConditionError> {
    let tokens = tokenize(text)?;
    let mut parser = ExprParser {
        tokens: &tokens,
        pos: 0,
        end: text.len(),
        depth: 0,
    };
    if tokens.is_empty() {
        return Err(ConditionError::new("empty condition", 0));
    }
    let root = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(ConditionError::new(
            format!("unexpected {}", describe(&extra.token)),
            extra.offset,
        ));
    }
    Ok(CompiledExpr {
        text: text.to_string(),
        root,
    })
}

fn describe(token: &Token) -> String {
    match token {
        Token::Symbol(s) => format!("'{}'", s),
        Token::Ident(id) => format!("identifier '{}'", id),
        Token::Str(s) => format!("string '{}'", s),
        Token::Num(n) => format!("number {}", n),
    }
}

/// Deepest `(` / `!` nesting a condition may use
pub const MAX_NESTING: usize = 256;

struct ExprParser<'t> {
    tokens: &'t [Spanned],
    pos: usize,
    end: usize,
    depth: usize,
}

impl<'t> ExprParser<'t> {
    fn peek(&self) -> Option<&'t Spanned> {
        self.tokens.get(self.pos)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |t| t.offset)
    }

    fn next(&mut self) -> Option<&'t Spanned> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_symbol(&mut self, sym: &str) -> bool {
        match self.peek() {
            Some(Spanned {
                token: Token::Symbol(s),
                ..
            }) if *s == sym => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_symbol(&mut self, sym: &str) -> Result<(), ConditionError> {
        if self.eat_symbol(sym) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", sym)))
        }
    }

    fn error(&self, message: String) -> ConditionError {
        let found = match self.peek() {
            Some(t) => format!("{}, found {}", message, describe(&t.token)),
            None => format!("{}, found end of condition", message),
        };
        ConditionError::new(found, self.offset())
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut terms = vec![self.parse_and()?];
        while self.eat_symbol("||") {
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut terms = vec![self.parse_unary()?];
        while self.eat_symbol("&&") {
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    /// Every nesting level passes through here, so the depth check bounds
    /// both the parser's recursion and the tree it builds
    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.depth >= MAX_NESTING {
            return Err(ConditionError::new(
                format!("condition nested deeper than {} levels", MAX_NESTING),
                self.offset(),
            ));
        }
        self.depth += 1;
        let expr = self.parse_negation();
        self.depth -= 1;
        expr
    }

    fn parse_negation(&mut self) -> Result<Expr, ConditionError> {
        if self.eat_symbol("!") {
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        if self.eat_symbol("(") {
            let inner = self.parse_or()?;
            self.expect_symbol(")")?;
            return Ok(inner);
        }

        if let Some(Spanned {
            token: Token::Ident(id),
            ..
        }) = self.peek()
        {
            if id.eq_ignore_ascii_case("true") || id.eq_ignore_ascii_case("false") {
                self.pos += 1;
                return Ok(Expr::Bool(id.eq_ignore_ascii_case("true")));
            }
        }

        // Function call: side '.' name '('
        if let Some(call) = self.try_call()? {
            return Ok(call);
        }

        let lhs = self.parse_operand()?;
        let op = self.parse_cmp_op()?;
        let rhs = self.parse_operand()?;
        Ok(Expr::Compare(lhs, op, rhs))
    }

    fn parse_side(&self, id: &str) -> Option<Side> {
        match id {
            "A" | "a" => Some(Side::A),
            "B" | "b" => Some(Side::B),
            _ => None,
        }
    }

    fn try_call(&mut self) -> Result<Option<Expr>, ConditionError> {
        let start = self.pos;
        let side = match self.tokens.get(start).map(|t| &t.token) {
            Some(Token::Ident(id)) => self.parse_side(id),
            _ => None,
        };
        let is_call = matches!(
            (
                self.tokens.get(start + 1).map(|t| &t.token),
                self.tokens.get(start + 2).map(|t| &t.token),
                self.tokens.get(start + 3).map(|t| &t.token),
            ),
            (Some(Token::Symbol(".")), Some(Token::Ident(_)), Some(Token::Symbol("(")))
        );
        let Some(side) = side.filter(|_| is_call) else {
            return Ok(None);
        };

        self.pos = start + 2;
        let name_token = self.next();
        let name_offset = name_token.map_or(self.end, |t| t.offset);
        let name = match name_token.map(|t| &t.token) {
            Some(Token::Ident(name)) => name.clone(),
            _ => return Err(ConditionError::new("expected function name", name_offset)),
        };
        self.expect_symbol("(")?;

        let mut args = Vec::new();
        if !self.eat_symbol(")") {
            loop {
                match self.peek().map(|t| &t.token) {
                    Some(Token::Str(s)) => {
                        args.push(s.clone());
                        self.pos += 1;
                    }
                    _ => return Err(self.error("expected string argument".to_string())),
                }
                if self.eat_symbol(")") {
                    break;
                }
                self.expect_symbol(",")?;
            }
        }

        let function = build_function(&name, args, name_offset)?;
        Ok(Some(Expr::Call(side, function)))
    }

    fn parse_operand(&mut self) -> Result<Operand, ConditionError> {
        let offset = self.offset();
        let operand = match self.peek().map(|t| &t.token) {
            Some(Token::Str(_) | Token::Num(_) | Token::Ident(_)) => self.next(),
            _ => return Err(self.error("expected operand".to_string())),
        };
        match operand.map(|t| &t.token) {
            Some(Token::Str(s)) => Ok(Operand::Str(s.clone())),
            Some(Token::Num(n)) => Ok(Operand::Num(*n)),
            Some(Token::Ident(id)) if id == "L" => Ok(Operand::QueryLayer),
            Some(Token::Ident(id)) => {
                let side = self
                    .parse_side(id)
                    .ok_or_else(|| ConditionError::new(format!("unknown item '{}'", id), offset))?;
                self.expect_symbol(".")?;
                let prop_offset = self.offset();
                match self.next().map(|t| &t.token) {
                    Some(Token::Ident(name)) => Property::from_name(name)
                        .map(|p| Operand::Property(side, p))
                        .ok_or_else(|| {
                            ConditionError::new(format!("unknown property '{}'", name), prop_offset)
                        }),
                    _ => Err(ConditionError::new("expected property name", prop_offset)),
                }
            }
            _ => Err(ConditionError::new("expected operand", offset)),
        }
    }

    fn parse_cmp_op(&mut self) -> Result<CmpOp, ConditionError> {
        let op = match self.peek().map(|t| &t.token) {
            Some(Token::Symbol("==")) => CmpOp::Eq,
            Some(Token::Symbol("!=")) => CmpOp::Ne,
            Some(Token::Symbol("<")) => CmpOp::Lt,
            Some(Token::Symbol("<=")) => CmpOp::Le,
            Some(Token::Symbol(">")) => CmpOp::Gt,
            Some(Token::Symbol(">=")) => CmpOp::Ge,
            _ => return Err(self.error("expected comparison operator".to_string())),
        };
        self.pos += 1;
        Ok(op)
    }
}

fn build_function(name: &str, args: Vec<String>, offset: usize) -> Result<Function, ConditionError> {
    let arity = |expected: usize| -> Result<(), ConditionError> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(ConditionError::new(
                format!("{}() takes {} argument(s), got {}", name, expected, args.len()),
                offset,
            ))
        }
    };

    let first = || args.first().cloned().unwrap_or_default();
    let function = match name {
        "intersectsArea" | "insideArea" | "enclosedByArea" => {
            arity(1)?;
            Function::IntersectsArea(first())
        }
        "inDiffPair" => {
            arity(1)?;
            Function::InDiffPair(first())
        }
        "isCoupledDiffPair" => {
            arity(0)?;
            Function::IsCoupledDiffPair
        }
        "memberOfFootprint" => {
            arity(1)?;
            Function::MemberOfFootprint(first())
        }
        "existsOnLayer" => {
            arity(1)?;
            let layers = LayerSet::parse_token(&first()).ok_or_else(|| {
                ConditionError::new(format!("unknown layer '{}'", first()), offset)
            })?;
            Function::ExistsOnLayer(layers)
        }
        "hasNetclass" | "hasExactNetclass" => {
            arity(1)?;
            Function::HasNetclass(first())
        }
        _ => {
            return Err(ConditionError::new(
                format!("unknown function '{}'", name),
                offset,
            ))
        }
    };
    Ok(function)
}

/// Case-insensitive match with `*` and `?` wildcards in either string
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();
    let v: Vec<char> = value.chars().flat_map(char::to_lowercase).collect();
    glob(&p, &v) || (value.contains(['*', '?']) && glob(&v, &p))
}

/// Iterative glob: on a mismatch, retry from the last `*` with one more
/// value character consumed. O(pattern * value).
fn glob(p: &[char], v: &[char]) -> bool {
    let (mut pi, mut vi) = (0, 0);
    // (pattern index after the last '*', value index it resumes from)
    let mut star: Option<(usize, usize)> = None;

    while vi < v.len() {
        match p.get(pi) {
            Some('*') => {
                pi += 1;
                star = Some((pi, vi));
            }
            Some('?') => {
                pi += 1;
                vi += 1;
            }
            Some(c) if *c == v[vi] => {
                pi += 1;
                vi += 1;
            }
            _ => match star {
                Some((star_pi, star_vi)) => {
                    pi = star_pi;
                    vi = star_vi + 1;
                    star = Some((star_pi, star_vi + 1));
                }
                None => return false,
            },
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

enum Value {
    Str(String),
    Num(f64),
    Missing,
}

fn side_item<'a>(side: Side, q: &EvalQuery<'a>) -> Option<&'a BoardItem> {
    match side {
        Side::A => Some(q.a),
        Side::B => q.b,
    }
}

fn property_value(side: Side, property: Property, q: &EvalQuery<'_>) -> Value {
    let Some(item) = side_item(side, q) else {
        return Value::Missing;
    };
    let text = match property {
        Property::NetClass => item.effective_netclass().map(str::to_string),
        Property::NetName => item.net.clone(),
        Property::Type => Some(item.kind.type_name().to_string()),
        Property::ViaType => item.kind.via_type_name().map(str::to_string),
        Property::PadType => item.kind.pad_type_name().map(str::to_string),
        Property::Layer => q.layer.map(|l| l.name()),
        Property::Reference => item.footprint_reference().map(str::to_string),
        Property::PadNumber => item.pad_number.clone(),
    };
    text.map_or(Value::Missing, Value::Str)
}

fn operand_value(operand: &Operand, q: &EvalQuery<'_>) -> Value {
    match operand {
        Operand::Property(side, property) => property_value(*side, *property, q),
        Operand::QueryLayer => q.layer.map_or(Value::Missing, |l| Value::Str(l.name())),
        Operand::Str(s) => Value::Str(s.clone()),
        Operand::Num(n) => Value::Num(*n),
    }
}

fn compare(lhs: Value, op: CmpOp, rhs: Value) -> bool {
    match (lhs, rhs) {
        (Value::Missing, _) | (_, Value::Missing) => false,
        (Value::Str(l), Value::Str(r)) => match op {
            CmpOp::Eq => wildcard_match(&r, &l),
            CmpOp::Ne => !wildcard_match(&r, &l),
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
        },
        (l, r) => {
            let as_num = |v: Value| match v {
                Value::Num(n) => Some(n),
                Value::Str(s) => s.trim().parse::<f64>().ok(),
                Value::Missing => None,
            };
            match (as_num(l), as_num(r)) {
                (Some(l), Some(r)) => match op {
                    CmpOp::Eq => (l - r).abs() < 0.5,
                    CmpOp::Ne => (l - r).abs() >= 0.5,
                    CmpOp::Lt => l < r,
                    CmpOp::Le => l <= r,
                    CmpOp::Gt => l > r,
                    CmpOp::Ge => l >= r,
                },
                _ => false,
            }
        }
    }
}

fn call(side: Side, function: &Function, ctx: &EvalContext<'_>, q: &EvalQuery<'_>) -> bool {
    let Some(item) = side_item(side, q) else {
        return false;
    };
    match function {
        Function::IntersectsArea(key) => ctx.regions.item_intersects(key, item),
        Function::InDiffPair(pattern) => item
            .diff_pair
            .as_deref()
            .is_some_and(|pair| wildcard_match(pattern, pair)),
        Function::IsCoupledDiffPair => {
            let other = match side {
                Side::A => q.b,
                Side::B => Some(q.a),
            };
            other.is_some_and(|o| is_coupled_pair(item, o))
        }
        Function::MemberOfFootprint(pattern) => item
            .footprint_reference()
            .is_some_and(|r| wildcard_match(pattern, r)),
        Function::ExistsOnLayer(layers) => item.layers.intersects(*layers),
        Function::HasNetclass(class) => item
            .effective_netclass()
            .is_some_and(|nc| nc.eq_ignore_ascii_case(class)),
    }
}

fn eval(expr: &Expr, ctx: &EvalContext<'_>, q: &EvalQuery<'_>) -> bool {
    match expr {
        Expr::Bool(b) => *b,
        Expr::Or(terms) => terms.iter().any(|t| eval(t, ctx, q)),
        Expr::And(terms) => terms.iter().all(|t| eval(t, ctx, q)),
        Expr::Not(inner) => !eval(inner, ctx, q),
        Expr::Compare(l, op, r) => compare(operand_value(l, q), *op, operand_value(r, q)),
        Expr::Call(side, function) => call(*side, function, ctx, q),
    }
}

impl CompiledCondition for CompiledExpr {
    fn evaluate(&self, ctx: &EvalContext<'_>, query: &EvalQuery<'_>) -> bool {
        eval(&self.root, ctx, query)
    }
}
