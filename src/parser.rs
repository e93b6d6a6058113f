//! Recursive-descent parser for Lua 5.4.
//!
//! chunk ::= block
//! block ::= {stat} [retstat]
//!
//! stat ::=  ';' |
//! varlist '=' explist |
//! functioncall |
//! label |
//! break |
//! goto Name |
//! do block end |
//! while exp do block end |
//! repeat block until exp |
//! if exp then block {elseif exp then block} [else block] end |
//! for Name '=' exp ',' exp [',' exp] do block end |
//! for namelist in explist do block end |
//! function funcname funcbody |
//! local function Name funcbody |
//! local attnamelist ['=' explist]
//!
//! attnamelist ::= Name attrib {',' Name attrib}
//! attrib ::= ['<' Name '>']
//!
//! The grammar runs over a token slice (`nom::Input` impl) so productions
//! compose with nom combinators. Goto/label validity is checked here, at
//! load time, before any evaluation happens.

use nom::{
    branch::alt,
    combinator::{map, opt},
    multi::many0,
    sequence::pair,
    IResult, Input, Needed, Parser,
};

use crate::ast::{
    Attrib, BinaryOp, Block, Expression, Field, FieldKey, FunctionBody, FunctionName,
    ReturnStatement, Statement, UnaryOp,
};
use crate::error::{LuaError, LuaResult};
use crate::lexer::{Token, TokenKind};
use std::rc::Rc;

#[derive(Debug, Clone, Copy)]
pub struct TokenSlice<'a>(pub &'a [Token]);

impl<'a> From<&'a [Token]> for TokenSlice<'a> {
    fn from(slice: &'a [Token]) -> Self {
        TokenSlice(slice)
    }
}

impl<'a> Input for TokenSlice<'a> {
    type Item = &'a Token;
    type Iter = std::slice::Iter<'a, Token>;
    type IterIndices = std::iter::Enumerate<std::slice::Iter<'a, Token>>;

    fn input_len(&self) -> usize {
        self.0.len()
    }

    fn take(&self, index: usize) -> Self {
        TokenSlice(&self.0[..index.min(self.0.len())])
    }

    fn take_from(&self, index: usize) -> Self {
        TokenSlice(&self.0[index.min(self.0.len())..])
    }

    fn take_split(&self, index: usize) -> (Self, Self) {
        let index = index.min(self.0.len());
        (TokenSlice(&self.0[index..]), TokenSlice(&self.0[..index]))
    }

    fn position<P>(&self, predicate: P) -> Option<usize>
    where
        P: Fn(Self::Item) -> bool,
    {
        self.0.iter().position(predicate)
    }

    fn iter_elements(&self) -> Self::Iter {
        self.0.iter()
    }

    fn iter_indices(&self) -> Self::IterIndices {
        self.0.iter().enumerate()
    }

    fn slice_index(&self, count: usize) -> Result<usize, Needed> {
        if count > self.0.len() {
            Err(Needed::Size(
                std::num::NonZeroUsize::new(count - self.0.len()).unwrap(),
            ))
        } else {
            Ok(count)
        }
    }
}

type PResult<'a, T> = IResult<TokenSlice<'a>, T>;

fn parse_err<T>(t: TokenSlice) -> PResult<T> {
    Err(nom::Err::Error(nom::error::Error::new(
        t,
        nom::error::ErrorKind::Tag,
    )))
}

/// Matches one token by kind (content-carrying kinds never match here).
fn token_tag(kind: TokenKind) -> impl Fn(TokenSlice) -> PResult<&Token> {
    move |t: TokenSlice| match t.0.first() {
        Some(tok) if tok.kind == kind => Ok((TokenSlice(&t.0[1..]), tok)),
        _ => parse_err(t),
    }
}

/// Matches an identifier token, yielding its name and line.
fn name(t: TokenSlice) -> PResult<(String, u32)> {
    match t.0.first() {
        Some(Token {
            kind: TokenKind::Identifier(n),
            line,
        }) => Ok((TokenSlice(&t.0[1..]), (n.clone(), *line))),
        _ => parse_err(t),
    }
}

fn current_line(t: TokenSlice) -> u32 {
    t.0.first().map(|tok| tok.line).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Blocks and statements
// ---------------------------------------------------------------------------

pub fn parse_block(t: TokenSlice) -> PResult<Block> {
    let (rest, statements) = many0(parse_statement).parse(t)?;
    let (rest, return_statement) = opt(parse_return).parse(rest)?;
    Ok((
        rest,
        Block {
            statements,
            return_statement,
        },
    ))
}

fn parse_return(t: TokenSlice) -> PResult<ReturnStatement> {
    let line = current_line(t);
    let (rest, _) = token_tag(TokenKind::Return)(t)?;
    let (rest, exprs) = opt(parse_expression_list).parse(rest)?;
    let (rest, _) = opt(token_tag(TokenKind::Semicolon)).parse(rest)?;
    Ok((
        rest,
        ReturnStatement {
            expression_list: exprs.unwrap_or_default(),
            line,
        },
    ))
}

fn parse_statement(t: TokenSlice) -> PResult<Statement> {
    alt((
        parse_empty_statement,
        parse_break_statement,
        parse_label_statement,
        parse_goto_statement,
        parse_do_block,
        parse_while_loop,
        parse_repeat_until,
        parse_if_statement,
        parse_for_loop,
        parse_function_decl,
        parse_local_statement,
        parse_assignment_or_call,
    ))
    .parse(t)
}

fn parse_empty_statement(t: TokenSlice) -> PResult<Statement> {
    let (rest, _) = token_tag(TokenKind::Semicolon)(t)?;
    Ok((rest, Statement::Empty))
}

fn parse_break_statement(t: TokenSlice) -> PResult<Statement> {
    let line = current_line(t);
    let (rest, _) = token_tag(TokenKind::Break)(t)?;
    Ok((rest, Statement::Break { line }))
}

fn parse_label_statement(t: TokenSlice) -> PResult<Statement> {
    let (rest, _) = token_tag(TokenKind::DoubleColon)(t)?;
    let (rest, (label, _)) = name(rest)?;
    let (rest, _) = token_tag(TokenKind::DoubleColon)(rest)?;
    Ok((rest, Statement::Label(label)))
}

fn parse_goto_statement(t: TokenSlice) -> PResult<Statement> {
    let line = current_line(t);
    let (rest, _) = token_tag(TokenKind::Goto)(t)?;
    let (rest, (label, _)) = name(rest)?;
    Ok((rest, Statement::Goto { label, line }))
}

fn parse_do_block(t: TokenSlice) -> PResult<Statement> {
    let (rest, _) = token_tag(TokenKind::Do)(t)?;
    let (rest, block) = parse_block(rest)?;
    let (rest, _) = token_tag(TokenKind::End)(rest)?;
    Ok((rest, Statement::Do(Box::new(block))))
}

fn parse_while_loop(t: TokenSlice) -> PResult<Statement> {
    let (rest, _) = token_tag(TokenKind::While)(t)?;
    let (rest, condition) = parse_expression(rest)?;
    let (rest, _) = token_tag(TokenKind::Do)(rest)?;
    let (rest, body) = parse_block(rest)?;
    let (rest, _) = token_tag(TokenKind::End)(rest)?;
    Ok((
        rest,
        Statement::While {
            condition,
            body: Box::new(body),
        },
    ))
}

fn parse_repeat_until(t: TokenSlice) -> PResult<Statement> {
    let (rest, _) = token_tag(TokenKind::Repeat)(t)?;
    let (rest, body) = parse_block(rest)?;
    let (rest, _) = token_tag(TokenKind::Until)(rest)?;
    let (rest, condition) = parse_expression(rest)?;
    Ok((
        rest,
        Statement::Repeat {
            body: Box::new(body),
            condition,
        },
    ))
}

fn parse_if_statement(t: TokenSlice) -> PResult<Statement> {
    let (rest, _) = token_tag(TokenKind::If)(t)?;
    let (rest, condition) = parse_expression(rest)?;
    let (rest, _) = token_tag(TokenKind::Then)(rest)?;
    let (rest, then_block) = parse_block(rest)?;

    let (rest, elseif_parts) = many0(|input| {
        let (r, _) = token_tag(TokenKind::Elseif)(input)?;
        let (r, cond) = parse_expression(r)?;
        let (r, _) = token_tag(TokenKind::Then)(r)?;
        let (r, blk) = parse_block(r)?;
        Ok((r, (cond, blk)))
    })
    .parse(rest)?;

    let (rest, else_block) = opt(|input| {
        let (r, _) = token_tag(TokenKind::Else)(input)?;
        parse_block(r).map(|(r, b)| (r, Box::new(b)))
    })
    .parse(rest)?;

    let (rest, _) = token_tag(TokenKind::End)(rest)?;

    Ok((
        rest,
        Statement::If {
            condition,
            then_block: Box::new(then_block),
            elseif_parts,
            else_block,
        },
    ))
}

fn parse_for_loop(t: TokenSlice) -> PResult<Statement> {
    let line = current_line(t);
    let (rest, _) = token_tag(TokenKind::For)(t)?;
    let (rest, (first_name, _)) = name(rest)?;

    // Numeric form: for i = start, stop [, step] do ... end
    if let Ok((r, _)) = token_tag(TokenKind::Assign)(rest) {
        let (r, start) = parse_expression(r)?;
        let (r, _) = token_tag(TokenKind::Comma)(r)?;
        let (r, end) = parse_expression(r)?;
        let (r, step) = opt(|input| {
            let (r, _) = token_tag(TokenKind::Comma)(input)?;
            parse_expression(r)
        })
        .parse(r)?;
        let (r, _) = token_tag(TokenKind::Do)(r)?;
        let (r, body) = parse_block(r)?;
        let (r, _) = token_tag(TokenKind::End)(r)?;
        return Ok((
            r,
            Statement::NumericFor {
                var: first_name,
                start,
                end,
                step,
                body: Box::new(body),
                line,
            },
        ));
    }

    // Generic form: for a, b, ... in explist do ... end
    let mut names = vec![first_name];
    let (rest, more) = many0(|input| {
        let (r, _) = token_tag(TokenKind::Comma)(input)?;
        let (r, (n, _)) = name(r)?;
        Ok((r, n))
    })
    .parse(rest)?;
    names.extend(more);

    let (rest, _) = token_tag(TokenKind::In)(rest)?;
    let (rest, exprs) = parse_expression_list(rest)?;
    let (rest, _) = token_tag(TokenKind::Do)(rest)?;
    let (rest, body) = parse_block(rest)?;
    let (rest, _) = token_tag(TokenKind::End)(rest)?;

    Ok((
        rest,
        Statement::GenericFor {
            names,
            exprs,
            body: Box::new(body),
            line,
        },
    ))
}

fn parse_function_decl(t: TokenSlice) -> PResult<Statement> {
    let line = current_line(t);
    let (rest, _) = token_tag(TokenKind::Function)(t)?;
    let (rest, (base, _)) = name(rest)?;

    let (rest, path) = many0(|input| {
        let (r, _) = token_tag(TokenKind::Dot)(input)?;
        let (r, (n, _)) = name(r)?;
        Ok((r, n))
    })
    .parse(rest)?;

    let (rest, method) = opt(|input| {
        let (r, _) = token_tag(TokenKind::Colon)(input)?;
        let (r, (n, _)) = name(r)?;
        Ok((r, n))
    })
    .parse(rest)?;

    let is_method = method.is_some();
    let (rest, mut body) = parse_funcbody(rest)?;
    if is_method {
        body.params.insert(0, "self".to_string());
        body.implicit_self = true;
    }

    Ok((
        rest,
        Statement::FunctionDecl {
            name: FunctionName { base, path, method },
            body: Rc::new(body),
            line,
        },
    ))
}

fn parse_local_statement(t: TokenSlice) -> PResult<Statement> {
    let line = current_line(t);
    let (rest, _) = token_tag(TokenKind::Local)(t)?;

    if let Ok((r, _)) = token_tag(TokenKind::Function)(rest) {
        let (r, (fname, _)) = name(r)?;
        let (r, body) = parse_funcbody(r)?;
        return Ok((
            r,
            Statement::LocalFunction {
                name: fname,
                body: Rc::new(body),
                line,
            },
        ));
    }

    let (rest, first) = parse_attrib_name(rest)?;
    let mut names = vec![first];
    let (rest, more) = many0(|input| {
        let (r, _) = token_tag(TokenKind::Comma)(input)?;
        parse_attrib_name(r)
    })
    .parse(rest)?;
    names.extend(more);

    let (rest, values) = opt(|input| {
        let (r, _) = token_tag(TokenKind::Assign)(input)?;
        parse_expression_list(r)
    })
    .parse(rest)?;

    Ok((
        rest,
        Statement::LocalVars {
            names,
            values: values.unwrap_or_default(),
            line,
        },
    ))
}

fn parse_attrib(input: TokenSlice) -> PResult<Attrib> {
    let (r, _) = token_tag(TokenKind::Lt)(input)?;
    let (r, (attr, _)) = name(r)?;
    let (r, _) = token_tag(TokenKind::Gt)(r)?;
    match attr.as_str() {
        "const" => Ok((r, Attrib::Const)),
        "close" => Ok((r, Attrib::Close)),
        _ => parse_err(input),
    }
}

/// `Name ['<' ('const'|'close') '>']`
fn parse_attrib_name(t: TokenSlice) -> PResult<(String, Attrib)> {
    let (rest, (n, _)) = name(t)?;
    let (rest, attrib) = opt(parse_attrib).parse(rest)?;
    Ok((rest, (n, attrib.unwrap_or(Attrib::None))))
}

fn parse_assignment_or_call(t: TokenSlice) -> PResult<Statement> {
    let line = current_line(t);
    let (rest, first) = parse_prefix_exp(t)?;

    // varlist '=' explist
    if matches!(
        rest.0.first().map(|tok| &tok.kind),
        Some(TokenKind::Comma) | Some(TokenKind::Assign)
    ) {
        let mut targets = vec![first];
        let (rest, more) = many0(|input| {
            let (r, _) = token_tag(TokenKind::Comma)(input)?;
            parse_prefix_exp(r)
        })
        .parse(rest)?;
        targets.extend(more);

        for target in &targets {
            if !matches!(
                target,
                Expression::Identifier { .. } | Expression::Index { .. } | Expression::Field { .. }
            ) {
                return parse_err(t);
            }
        }

        let (rest, _) = token_tag(TokenKind::Assign)(rest)?;
        let (rest, values) = parse_expression_list(rest)?;
        return Ok((
            rest,
            Statement::Assignment {
                targets,
                values,
                line,
            },
        ));
    }

    // Bare expression statements must be calls.
    match &first {
        Expression::Call { .. } | Expression::MethodCall { .. } => {
            Ok((rest, Statement::FunctionCall(first)))
        }
        _ => parse_err(t),
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

pub fn parse_expression_list(t: TokenSlice) -> PResult<Vec<Expression>> {
    let (rest, first) = parse_expression(t)?;
    let (rest, more) = many0(|input| {
        let (r, _) = token_tag(TokenKind::Comma)(input)?;
        parse_expression(r)
    })
    .parse(rest)?;
    let mut exprs = vec![first];
    exprs.extend(more);
    Ok((rest, exprs))
}

pub fn parse_expression(t: TokenSlice) -> PResult<Expression> {
    parse_or_expr(t)
}

fn binary(left: Expression, op: BinaryOp, right: Expression, line: u32) -> Expression {
    Expression::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
        line,
    }
}

/// Left-associative level driver: `next (op next)*`.
fn binop_level<'a>(
    t: TokenSlice<'a>,
    next: fn(TokenSlice<'a>) -> PResult<'a, Expression>,
    table: &[(TokenKind, BinaryOp)],
) -> PResult<'a, Expression> {
    let (mut rest, mut left) = next(t)?;
    'outer: loop {
        for (kind, op) in table {
            if rest.0.first().map(|tok| &tok.kind) == Some(kind) {
                let line = current_line(rest);
                let r = TokenSlice(&rest.0[1..]);
                let (r, right) = next(r)?;
                left = binary(left, *op, right, line);
                rest = r;
                continue 'outer;
            }
        }
        return Ok((rest, left));
    }
}

fn parse_or_expr(t: TokenSlice) -> PResult<Expression> {
    binop_level(t, parse_and_expr, &[(TokenKind::Or, BinaryOp::Or)])
}

fn parse_and_expr(t: TokenSlice) -> PResult<Expression> {
    binop_level(t, parse_cmp_expr, &[(TokenKind::And, BinaryOp::And)])
}

fn parse_cmp_expr(t: TokenSlice) -> PResult<Expression> {
    binop_level(
        t,
        parse_bitor_expr,
        &[
            (TokenKind::Lt, BinaryOp::Lt),
            (TokenKind::Gt, BinaryOp::Gt),
            (TokenKind::Lte, BinaryOp::Lte),
            (TokenKind::Gte, BinaryOp::Gte),
            (TokenKind::Eq, BinaryOp::Eq),
            (TokenKind::Neq, BinaryOp::Neq),
        ],
    )
}

fn parse_bitor_expr(t: TokenSlice) -> PResult<Expression> {
    binop_level(t, parse_bitxor_expr, &[(TokenKind::Pipe, BinaryOp::BitOr)])
}

fn parse_bitxor_expr(t: TokenSlice) -> PResult<Expression> {
    binop_level(t, parse_bitand_expr, &[(TokenKind::Tilde, BinaryOp::BitXor)])
}

fn parse_bitand_expr(t: TokenSlice) -> PResult<Expression> {
    binop_level(
        t,
        parse_shift_expr,
        &[(TokenKind::Ampersand, BinaryOp::BitAnd)],
    )
}

fn parse_shift_expr(t: TokenSlice) -> PResult<Expression> {
    binop_level(
        t,
        parse_concat_expr,
        &[
            (TokenKind::Shl, BinaryOp::LeftShift),
            (TokenKind::Shr, BinaryOp::RightShift),
        ],
    )
}

/// `..` is right-associative.
fn parse_concat_expr(t: TokenSlice) -> PResult<Expression> {
    let (rest, left) = parse_add_expr(t)?;
    if rest.0.first().map(|tok| &tok.kind) == Some(&TokenKind::Concat) {
        let line = current_line(rest);
        let r = TokenSlice(&rest.0[1..]);
        let (r, right) = parse_concat_expr(r)?;
        return Ok((r, binary(left, BinaryOp::Concat, right, line)));
    }
    Ok((rest, left))
}

fn parse_add_expr(t: TokenSlice) -> PResult<Expression> {
    binop_level(
        t,
        parse_mul_expr,
        &[
            (TokenKind::Plus, BinaryOp::Add),
            (TokenKind::Minus, BinaryOp::Subtract),
        ],
    )
}

fn parse_mul_expr(t: TokenSlice) -> PResult<Expression> {
    binop_level(
        t,
        parse_unary_expr,
        &[
            (TokenKind::Star, BinaryOp::Multiply),
            (TokenKind::Slash, BinaryOp::Divide),
            (TokenKind::DoubleSlash, BinaryOp::FloorDivide),
            (TokenKind::Percent, BinaryOp::Modulo),
        ],
    )
}

fn parse_unary_op(t: TokenSlice) -> PResult<UnaryOp> {
    alt((
        map(token_tag(TokenKind::Minus), |_| UnaryOp::Minus),
        map(token_tag(TokenKind::Not), |_| UnaryOp::Not),
        map(token_tag(TokenKind::Hash), |_| UnaryOp::Length),
        map(token_tag(TokenKind::Tilde), |_| UnaryOp::BitNot),
    ))
    .parse(t)
}

fn parse_unary_expr(t: TokenSlice) -> PResult<Expression> {
    let line = current_line(t);
    alt((
        map(
            pair(parse_unary_op, parse_unary_expr),
            move |(op, operand)| Expression::Unary {
                op,
                operand: Box::new(operand),
                line,
            },
        ),
        parse_pow_expr,
    ))
    .parse(t)
}

/// `^` is right-associative and binds tighter than unary operators on its
/// left (`-x^2` is `-(x^2)`), while allowing unary on its right (`x^-y`).
fn parse_pow_expr(t: TokenSlice) -> PResult<Expression> {
    let (rest, base) = parse_prefix_exp(t)?;
    if rest.0.first().map(|tok| &tok.kind) == Some(&TokenKind::Caret) {
        let line = current_line(rest);
        let r = TokenSlice(&rest.0[1..]);
        let (r, exp) = parse_unary_expr(r)?;
        return Ok((r, binary(base, BinaryOp::Power, exp, line)));
    }
    Ok((rest, base))
}

// ---------------------------------------------------------------------------
// Prefix expressions, calls, table constructors, function bodies
// ---------------------------------------------------------------------------

fn parse_atom(t: TokenSlice) -> PResult<Expression> {
    let line = current_line(t);
    match t.0.first().map(|tok| &tok.kind) {
        Some(TokenKind::Nil) => Ok((TokenSlice(&t.0[1..]), Expression::Nil)),
        Some(TokenKind::True) => Ok((TokenSlice(&t.0[1..]), Expression::Boolean(true))),
        Some(TokenKind::False) => Ok((TokenSlice(&t.0[1..]), Expression::Boolean(false))),
        Some(TokenKind::Int(i)) => Ok((TokenSlice(&t.0[1..]), Expression::Integer(*i))),
        Some(TokenKind::Number(f)) => Ok((TokenSlice(&t.0[1..]), Expression::Float(*f))),
        Some(TokenKind::Str(s)) => Ok((TokenSlice(&t.0[1..]), Expression::Str(s.clone()))),
        Some(TokenKind::Ellipsis) => Ok((TokenSlice(&t.0[1..]), Expression::Varargs { line })),
        Some(TokenKind::Function) => {
            let r = TokenSlice(&t.0[1..]);
            let (r, body) = parse_funcbody(r)?;
            Ok((r, Expression::Function(Rc::new(body))))
        }
        Some(TokenKind::LBrace) => parse_table_constructor(t),
        Some(TokenKind::LParen) => {
            let r = TokenSlice(&t.0[1..]);
            let (r, inner) = parse_expression(r)?;
            let (r, _) = token_tag(TokenKind::RParen)(r)?;
            Ok((r, Expression::Paren(Box::new(inner))))
        }
        Some(TokenKind::Identifier(_)) => {
            let (r, (n, l)) = name(t)?;
            Ok((r, Expression::Identifier { name: n, line: l }))
        }
        _ => parse_err(t),
    }
}

/// Parses an atom and then applies call/index/method suffixes.
pub fn parse_prefix_exp(t: TokenSlice) -> PResult<Expression> {
    let (mut rest, mut expr) = parse_atom(t)?;
    loop {
        let line = current_line(rest);
        match rest.0.first().map(|tok| &tok.kind) {
            Some(TokenKind::LBracket) => {
                let r = TokenSlice(&rest.0[1..]);
                let (r, index) = parse_expression(r)?;
                let (r, _) = token_tag(TokenKind::RBracket)(r)?;
                expr = Expression::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    line,
                };
                rest = r;
            }
            Some(TokenKind::Dot) => {
                let r = TokenSlice(&rest.0[1..]);
                let (r, (field, _)) = name(r)?;
                expr = Expression::Field {
                    object: Box::new(expr),
                    name: field,
                    line,
                };
                rest = r;
            }
            Some(TokenKind::Colon) => {
                let r = TokenSlice(&rest.0[1..]);
                let (r, (method, _)) = name(r)?;
                let (r, args) = parse_args(r)?;
                expr = Expression::MethodCall {
                    object: Box::new(expr),
                    method,
                    args,
                    line,
                };
                rest = r;
            }
            Some(TokenKind::LParen) | Some(TokenKind::LBrace) | Some(TokenKind::Str(_)) => {
                let (r, args) = parse_args(rest)?;
                expr = Expression::Call {
                    function: Box::new(expr),
                    args,
                    line,
                };
                rest = r;
            }
            _ => break,
        }
    }
    Ok((rest, expr))
}

/// Call arguments: `(explist)`, a table constructor, or a string literal.
fn parse_args(t: TokenSlice) -> PResult<Vec<Expression>> {
    match t.0.first().map(|tok| &tok.kind) {
        Some(TokenKind::LParen) => {
            let r = TokenSlice(&t.0[1..]);
            let (r, exprs) = opt(parse_expression_list).parse(r)?;
            let (r, _) = token_tag(TokenKind::RParen)(r)?;
            Ok((r, exprs.unwrap_or_default()))
        }
        Some(TokenKind::LBrace) => {
            let (r, ctor) = parse_table_constructor(t)?;
            Ok((r, vec![ctor]))
        }
        Some(TokenKind::Str(s)) => Ok((TokenSlice(&t.0[1..]), vec![Expression::Str(s.clone())])),
        _ => parse_err(t),
    }
}

fn parse_table_constructor(t: TokenSlice) -> PResult<Expression> {
    let line = current_line(t);
    let (rest, _) = token_tag(TokenKind::LBrace)(t)?;
    let mut fields = Vec::new();
    let mut rest = rest;
    loop {
        if rest.0.first().map(|tok| &tok.kind) == Some(&TokenKind::RBrace) {
            rest = TokenSlice(&rest.0[1..]);
            break;
        }
        let (r, field) = parse_field(rest)?;
        fields.push(field);
        rest = r;
        match rest.0.first().map(|tok| &tok.kind) {
            Some(TokenKind::Comma) | Some(TokenKind::Semicolon) => {
                rest = TokenSlice(&rest.0[1..]);
            }
            Some(TokenKind::RBrace) => {
                rest = TokenSlice(&rest.0[1..]);
                break;
            }
            _ => return parse_err(rest),
        }
    }
    Ok((rest, Expression::TableConstructor { fields, line }))
}

fn parse_field(t: TokenSlice) -> PResult<Field> {
    // [exp] = exp
    if t.0.first().map(|tok| &tok.kind) == Some(&TokenKind::LBracket) {
        let r = TokenSlice(&t.0[1..]);
        let (r, key_expr) = parse_expression(r)?;
        let (r, _) = token_tag(TokenKind::RBracket)(r)?;
        let (r, _) = token_tag(TokenKind::Assign)(r)?;
        let (r, value) = parse_expression(r)?;
        return Ok((
            r,
            Field {
                key: FieldKey::Bracket(Box::new(key_expr)),
                value,
            },
        ));
    }
    // name = exp (only when followed by '=')
    if let Ok((r, (n, _))) = name(t) {
        if let Ok((r, _)) = token_tag(TokenKind::Assign)(r) {
            let (r, value) = parse_expression(r)?;
            return Ok((
                r,
                Field {
                    key: FieldKey::Identifier(n),
                    value,
                },
            ));
        }
    }
    // positional
    let (r, value) = parse_expression(t)?;
    Ok((
        r,
        Field {
            key: FieldKey::Positional,
            value,
        },
    ))
}

pub fn parse_funcbody(t: TokenSlice) -> PResult<FunctionBody> {
    let line = current_line(t);
    let (rest, _) = token_tag(TokenKind::LParen)(t)?;
    let (rest, (params, is_variadic)) = parse_parlist(rest)?;
    let (rest, _) = token_tag(TokenKind::RParen)(rest)?;
    let (rest, block) = parse_block(rest)?;
    let (rest, _) = token_tag(TokenKind::End)(rest)?;
    Ok((
        rest,
        FunctionBody {
            params,
            is_variadic,
            implicit_self: false,
            block,
            line,
        },
    ))
}

fn parse_parlist(t: TokenSlice) -> PResult<(Vec<String>, bool)> {
    if t.0.first().map(|tok| &tok.kind) == Some(&TokenKind::Ellipsis) {
        return Ok((TokenSlice(&t.0[1..]), (vec![], true)));
    }
    let first = match name(t) {
        Ok((r, (n, _))) => Some((r, n)),
        Err(_) => None,
    };
    let (mut rest, mut params) = match first {
        Some((r, n)) => (r, vec![n]),
        None => return Ok((t, (vec![], false))),
    };
    let mut variadic = false;
    while rest.0.first().map(|tok| &tok.kind) == Some(&TokenKind::Comma) {
        let r = TokenSlice(&rest.0[1..]);
        if r.0.first().map(|tok| &tok.kind) == Some(&TokenKind::Ellipsis) {
            rest = TokenSlice(&r.0[1..]);
            variadic = true;
            break;
        }
        let (r, (n, _)) = name(r)?;
        params.push(n);
        rest = r;
    }
    Ok((rest, (params, variadic)))
}

// ---------------------------------------------------------------------------
// Entry point and goto/label validation
// ---------------------------------------------------------------------------

/// Parses a whole chunk and validates goto targets.
pub fn parse_chunk(tokens: &[Token], chunk: &str) -> LuaResult<Block> {
    let slice = TokenSlice(tokens);
    let (rest, block) = parse_block(slice)
        .map_err(|_| LuaError::syntax("syntax error", chunk, current_line(slice).max(1)))?;
    if !rest.0.is_empty() {
        return Err(LuaError::syntax(
            "unexpected symbol",
            chunk,
            current_line(rest),
        ));
    }
    validate_gotos(&block, &mut Vec::new(), chunk)?;
    Ok(block)
}

/// Load-time goto validation. A goto may target a label in its own block or
/// any enclosing block of the same function; a forward jump in the same
/// block must not cross a local declaration unless the label is the final
/// statement of the block (where those locals' scopes end).
fn validate_gotos(block: &Block, enclosing: &mut Vec<Vec<String>>, chunk: &str) -> LuaResult<()> {
    let labels: Vec<String> = block
        .statements
        .iter()
        .filter_map(|s| match s {
            Statement::Label(l) => Some(l.clone()),
            _ => None,
        })
        .collect();

    for (idx, stmt) in block.statements.iter().enumerate() {
        if let Statement::Goto { label, line } = stmt {
            let visible_here = labels.contains(label);
            let visible_outer = enclosing.iter().any(|ls| ls.contains(label));
            if !visible_here && !visible_outer {
                return Err(LuaError::syntax(
                    format!("no visible label '{}' for goto", label),
                    chunk,
                    *line,
                ));
            }
            if visible_here {
                if let Some(target) = block
                    .statements
                    .iter()
                    .position(|s| matches!(s, Statement::Label(l) if l == label))
                {
                    if target > idx {
                        let crosses_local = block.statements[idx + 1..target].iter().any(|s| {
                            matches!(
                                s,
                                Statement::LocalVars { .. } | Statement::LocalFunction { .. }
                            )
                        });
                        let label_is_last = target == block.statements.len() - 1
                            && block.return_statement.is_none();
                        if crosses_local && !label_is_last {
                            return Err(LuaError::syntax(
                                format!("goto '{}' jumps into the scope of a local", label),
                                chunk,
                                *line,
                            ));
                        }
                    }
                }
            }
        }
    }

    enclosing.push(labels);
    for stmt in &block.statements {
        match stmt {
            Statement::Do(b) => validate_gotos(b, enclosing, chunk)?,
            Statement::While { body, .. }
            | Statement::Repeat { body, .. }
            | Statement::NumericFor { body, .. }
            | Statement::GenericFor { body, .. } => validate_gotos(body, enclosing, chunk)?,
            Statement::If {
                then_block,
                elseif_parts,
                else_block,
                ..
            } => {
                validate_gotos(then_block, enclosing, chunk)?;
                for (_, b) in elseif_parts {
                    validate_gotos(b, enclosing, chunk)?;
                }
                if let Some(b) = else_block {
                    validate_gotos(b, enclosing, chunk)?;
                }
            }
            // Function bodies start a fresh label context.
            Statement::FunctionDecl { body, .. } | Statement::LocalFunction { body, .. } => {
                validate_gotos(&body.block, &mut Vec::new(), chunk)?;
            }
            _ => {}
        }
    }
    enclosing.pop();

    // Function literals in expression position also start fresh.
    for stmt in &block.statements {
        visit_statement_exprs(stmt, &mut |expr| {
            if let Expression::Function(body) = expr {
                validate_gotos(&body.block, &mut Vec::new(), chunk)?;
            }
            Ok(())
        })?;
    }
    if let Some(ret) = &block.return_statement {
        for expr in &ret.expression_list {
            visit_expr(expr, &mut |e| {
                if let Expression::Function(body) = e {
                    validate_gotos(&body.block, &mut Vec::new(), chunk)?;
                }
                Ok(())
            })?;
        }
    }
    Ok(())
}

fn visit_statement_exprs(
    stmt: &Statement,
    f: &mut impl FnMut(&Expression) -> LuaResult<()>,
) -> LuaResult<()> {
    match stmt {
        Statement::Assignment { targets, values, .. } => {
            for e in targets.iter().chain(values) {
                visit_expr(e, f)?;
            }
        }
        Statement::FunctionCall(e) => visit_expr(e, f)?,
        Statement::While { condition, .. } | Statement::Repeat { condition, .. } => {
            visit_expr(condition, f)?
        }
        Statement::If {
            condition,
            elseif_parts,
            ..
        } => {
            visit_expr(condition, f)?;
            for (cond, _) in elseif_parts {
                visit_expr(cond, f)?;
            }
        }
        Statement::NumericFor {
            start, end, step, ..
        } => {
            visit_expr(start, f)?;
            visit_expr(end, f)?;
            if let Some(s) = step {
                visit_expr(s, f)?;
            }
        }
        Statement::GenericFor { exprs, .. } => {
            for e in exprs {
                visit_expr(e, f)?;
            }
        }
        Statement::LocalVars { values, .. } => {
            for e in values {
                visit_expr(e, f)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn visit_expr(
    expr: &Expression,
    f: &mut impl FnMut(&Expression) -> LuaResult<()>,
) -> LuaResult<()> {
    f(expr)?;
    match expr {
        Expression::Binary { left, right, .. } => {
            visit_expr(left, f)?;
            visit_expr(right, f)?;
        }
        Expression::Unary { operand, .. } => visit_expr(operand, f)?,
        Expression::Index { object, index, .. } => {
            visit_expr(object, f)?;
            visit_expr(index, f)?;
        }
        Expression::Field { object, .. } => visit_expr(object, f)?,
        Expression::Call { function, args, .. } => {
            visit_expr(function, f)?;
            for a in args {
                visit_expr(a, f)?;
            }
        }
        Expression::MethodCall { object, args, .. } => {
            visit_expr(object, f)?;
            for a in args {
                visit_expr(a, f)?;
            }
        }
        Expression::TableConstructor { fields, .. } => {
            for field in fields {
                if let FieldKey::Bracket(k) = &field.key {
                    visit_expr(k, f)?;
                }
                visit_expr(&field.value, f)?;
            }
        }
        Expression::Paren(inner) => visit_expr(inner, f)?,
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_src(src: &str) -> LuaResult<Block> {
        let tokens = tokenize(src.as_bytes(), "test")?;
        parse_chunk(&tokens, "test")
    }

    #[test]
    fn test_local_declaration() {
        let block = parse_src("local x, y = 1, 2").unwrap();
        assert_eq!(block.statements.len(), 1);
        match &block.statements[0] {
            Statement::LocalVars { names, values, .. } => {
                assert_eq!(names.len(), 2);
                assert_eq!(values.len(), 2);
            }
            other => panic!("expected local declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_local_attribs() {
        let block = parse_src("local a <const>, b <close> = 1, nil").unwrap();
        match &block.statements[0] {
            Statement::LocalVars { names, .. } => {
                assert_eq!(names[0].1, Attrib::Const);
                assert_eq!(names[1].1, Attrib::Close);
            }
            other => panic!("expected local declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        let block = parse_src("return 1 + 2 * 3").unwrap();
        let ret = block.return_statement.unwrap();
        match &ret.expression_list[0] {
            Expression::Binary { op, right, .. } => {
                assert_eq!(*op, BinaryOp::Add);
                assert!(matches!(
                    right.as_ref(),
                    Expression::Binary {
                        op: BinaryOp::Multiply,
                        ..
                    }
                ));
            }
            other => panic!("expected binary, got {:?}", other),
        }
    }

    #[test]
    fn test_concat_right_assoc() {
        let block = parse_src("return 'a' .. 'b' .. 'c'").unwrap();
        let ret = block.return_statement.unwrap();
        match &ret.expression_list[0] {
            Expression::Binary { op, right, .. } => {
                assert_eq!(*op, BinaryOp::Concat);
                assert!(matches!(
                    right.as_ref(),
                    Expression::Binary {
                        op: BinaryOp::Concat,
                        ..
                    }
                ));
            }
            other => panic!("expected concat, got {:?}", other),
        }
    }

    #[test]
    fn test_pow_binds_tighter_than_unary() {
        let block = parse_src("return -x^2").unwrap();
        let ret = block.return_statement.unwrap();
        assert!(matches!(
            &ret.expression_list[0],
            Expression::Unary {
                op: UnaryOp::Minus,
                ..
            }
        ));
    }

    #[test]
    fn test_method_definition_gets_self() {
        let block = parse_src("function t:m(a) return self end").unwrap();
        match &block.statements[0] {
            Statement::FunctionDecl { name, body, .. } => {
                assert_eq!(name.method.as_deref(), Some("m"));
                assert_eq!(body.params, vec!["self".to_string(), "a".to_string()]);
            }
            other => panic!("expected function decl, got {:?}", other),
        }
    }

    #[test]
    fn test_call_sugar_forms() {
        assert!(parse_src("f 'str'").is_ok());
        assert!(parse_src("f {1, 2}").is_ok());
        assert!(parse_src("obj:method(1)").is_ok());
    }

    #[test]
    fn test_table_constructor_forms() {
        let block = parse_src("return {1, x = 2, [3] = 4; 5}").unwrap();
        let ret = block.return_statement.unwrap();
        match &ret.expression_list[0] {
            Expression::TableConstructor { fields, .. } => {
                assert_eq!(fields.len(), 4);
                assert!(matches!(fields[0].key, FieldKey::Positional));
                assert!(matches!(fields[1].key, FieldKey::Identifier(_)));
                assert!(matches!(fields[2].key, FieldKey::Bracket(_)));
            }
            other => panic!("expected table constructor, got {:?}", other),
        }
    }

    #[test]
    fn test_goto_to_visible_label() {
        assert!(parse_src("for i = 1, 3 do goto continue ::continue:: end").is_ok());
        assert!(parse_src("do ::top:: goto top end").is_ok());
    }

    #[test]
    fn test_goto_undefined_label_rejected() {
        assert!(parse_src("goto nowhere").is_err());
    }

    #[test]
    fn test_goto_into_local_scope_rejected() {
        let err = parse_src("do goto skip local x = 1 print(x) ::skip:: print(1) end");
        assert!(err.is_err());
    }

    #[test]
    fn test_goto_to_final_label_crossing_local_allowed() {
        assert!(parse_src("do goto done local x = 1 ::done:: end").is_ok());
    }

    #[test]
    fn test_goto_does_not_cross_functions() {
        assert!(parse_src("do ::top:: local f = function() goto top end end").is_err());
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(parse_src("local x = 1 end").is_err());
    }

    #[test]
    fn test_varargs_function() {
        let block = parse_src("local function f(a, ...) return ... end").unwrap();
        match &block.statements[0] {
            Statement::LocalFunction { body, .. } => {
                assert!(body.is_variadic);
                assert_eq!(body.params, vec!["a".to_string()]);
            }
            other => panic!("expected local function, got {:?}", other),
        }
    }
}
