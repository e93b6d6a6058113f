//! Upvalues: shared cells joining a closure to variables of enclosing scopes.
//!
//! When a function literal is constructed, its body is scanned once for free
//! names (referenced names that are neither parameters nor locals of the
//! body; nested function bodies are not entered). Each free name that
//! resolves to a local in the current scope chain becomes an upvalue aliasing
//! that cell; if any free name does not resolve, the closure accesses globals
//! and receives a synthetic `_ENV` upvalue. Upvalues are ordered by name,
//! `_ENV` last.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::ast::{Block, Expression, Field, FieldKey, FunctionBody, Statement};
use crate::env::{lookup_cell, CellRef, Scope};

#[derive(Clone)]
pub struct Upvalue {
    pub name: String,
    pub cell: CellRef,
}

/// Builds the upvalue list for a closure being constructed in `scope`.
pub fn analyze(body: &FunctionBody, scope: &Rc<RefCell<Scope>>) -> Vec<Upvalue> {
    let free = free_names(body);
    let mut upvalues = Vec::new();
    let mut needs_env = false;
    for name in &free {
        if name == "_ENV" {
            needs_env = true;
            continue;
        }
        match lookup_cell(scope, name) {
            Some(cell) => upvalues.push(Upvalue {
                name: name.clone(),
                cell,
            }),
            None => needs_env = true,
        }
    }
    if needs_env {
        if let Some(env_cell) = lookup_cell(scope, "_ENV") {
            upvalues.push(Upvalue {
                name: "_ENV".to_string(),
                cell: env_cell,
            });
        }
    }
    upvalues
}

/// Collects the free names of a function body, sorted.
pub fn free_names(body: &FunctionBody) -> BTreeSet<String> {
    let mut declared: BTreeSet<String> = body.params.iter().cloned().collect();
    let mut free = BTreeSet::new();
    scan_block(&body.block, &mut declared, &mut free);
    free
}

fn scan_block(block: &Block, declared: &mut BTreeSet<String>, free: &mut BTreeSet<String>) {
    for stmt in &block.statements {
        scan_statement(stmt, declared, free);
    }
    if let Some(ret) = &block.return_statement {
        for expr in &ret.expression_list {
            scan_expression(expr, declared, free);
        }
    }
}

fn scan_statement(stmt: &Statement, declared: &mut BTreeSet<String>, free: &mut BTreeSet<String>) {
    match stmt {
        Statement::Empty | Statement::Break { .. } | Statement::Label(_) | Statement::Goto { .. } => {}
        Statement::Assignment { targets, values, .. } => {
            for e in targets.iter().chain(values) {
                scan_expression(e, declared, free);
            }
        }
        Statement::FunctionCall(e) => scan_expression(e, declared, free),
        Statement::Do(block) => scan_block(block, declared, free),
        Statement::While { condition, body } => {
            scan_expression(condition, declared, free);
            scan_block(body, declared, free);
        }
        Statement::Repeat { body, condition } => {
            scan_block(body, declared, free);
            scan_expression(condition, declared, free);
        }
        Statement::If {
            condition,
            then_block,
            elseif_parts,
            else_block,
        } => {
            scan_expression(condition, declared, free);
            scan_block(then_block, declared, free);
            for (cond, blk) in elseif_parts {
                scan_expression(cond, declared, free);
                scan_block(blk, declared, free);
            }
            if let Some(blk) = else_block {
                scan_block(blk, declared, free);
            }
        }
        Statement::NumericFor {
            var,
            start,
            end,
            step,
            body,
            ..
        } => {
            scan_expression(start, declared, free);
            scan_expression(end, declared, free);
            if let Some(s) = step {
                scan_expression(s, declared, free);
            }
            declared.insert(var.clone());
            scan_block(body, declared, free);
        }
        Statement::GenericFor {
            names, exprs, body, ..
        } => {
            for e in exprs {
                scan_expression(e, declared, free);
            }
            for n in names {
                declared.insert(n.clone());
            }
            scan_block(body, declared, free);
        }
        Statement::FunctionDecl { name, .. } => {
            // `function a.b()` reads `a`; the body is a nested function.
            reference(&name.base, declared, free);
        }
        Statement::LocalFunction { name, .. } => {
            declared.insert(name.clone());
        }
        Statement::LocalVars { names, values, .. } => {
            // RHS is evaluated before the names come into scope, so
            // `local x = x` reads the outer `x`.
            for e in values {
                scan_expression(e, declared, free);
            }
            for (n, _) in names {
                declared.insert(n.clone());
            }
        }
    }
}

fn scan_expression(expr: &Expression, declared: &mut BTreeSet<String>, free: &mut BTreeSet<String>) {
    match expr {
        Expression::Nil
        | Expression::Boolean(_)
        | Expression::Integer(_)
        | Expression::Float(_)
        | Expression::Str(_)
        | Expression::Varargs { .. } => {}
        Expression::Identifier { name, .. } => reference(name, declared, free),
        Expression::Binary { left, right, .. } => {
            scan_expression(left, declared, free);
            scan_expression(right, declared, free);
        }
        Expression::Unary { operand, .. } => scan_expression(operand, declared, free),
        Expression::Index { object, index, .. } => {
            scan_expression(object, declared, free);
            scan_expression(index, declared, free);
        }
        Expression::Field { object, .. } => scan_expression(object, declared, free),
        Expression::Call { function, args, .. } => {
            scan_expression(function, declared, free);
            for a in args {
                scan_expression(a, declared, free);
            }
        }
        Expression::MethodCall { object, args, .. } => {
            scan_expression(object, declared, free);
            for a in args {
                scan_expression(a, declared, free);
            }
        }
        Expression::TableConstructor { fields, .. } => {
            for Field { key, value } in fields {
                if let FieldKey::Bracket(k) = key {
                    scan_expression(k, declared, free);
                }
                scan_expression(value, declared, free);
            }
        }
        // Nested function bodies run their own analysis when constructed.
        Expression::Function(_) => {}
        Expression::Paren(inner) => scan_expression(inner, declared, free),
    }
}

fn reference(name: &str, declared: &BTreeSet<String>, free: &mut BTreeSet<String>) {
    if !declared.contains(name) {
        free.insert(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ReturnStatement;
    use crate::value::Value;

    fn body_returning(expr: Expression, params: Vec<&str>) -> FunctionBody {
        FunctionBody {
            params: params.into_iter().map(String::from).collect(),
            is_variadic: false,
            implicit_self: false,
            block: Block {
                statements: vec![],
                return_statement: Some(ReturnStatement {
                    expression_list: vec![expr],
                    line: 1,
                }),
            },
            line: 1,
        }
    }

    fn ident(name: &str) -> Expression {
        Expression::Identifier {
            name: name.to_string(),
            line: 1,
        }
    }

    #[test]
    fn test_param_is_not_free() {
        let body = body_returning(ident("x"), vec!["x"]);
        assert!(free_names(&body).is_empty());
    }

    #[test]
    fn test_outer_reference_is_free() {
        let body = body_returning(ident("counter"), vec![]);
        let free = free_names(&body);
        assert!(free.contains("counter"));
    }

    #[test]
    fn test_local_rhs_reads_outer() {
        // local x = x : the RHS reference is free
        let body = FunctionBody {
            params: vec![],
            is_variadic: false,
            implicit_self: false,
            block: Block {
                statements: vec![Statement::LocalVars {
                    names: vec![("x".to_string(), crate::ast::Attrib::None)],
                    values: vec![ident("x")],
                    line: 1,
                }],
                return_statement: None,
            },
            line: 1,
        };
        assert!(free_names(&body).contains("x"));
    }

    #[test]
    fn test_analysis_captures_local_cell() {
        let scope = Scope::new_root();
        scope.borrow_mut().declare("_ENV", Value::new_table());
        let inner = Scope::child_of(&scope);
        let cell = inner.borrow_mut().declare("n", Value::Integer(5));

        let body = body_returning(ident("n"), vec![]);
        let upvalues = analyze(&body, &inner);
        assert_eq!(upvalues.len(), 1);
        assert_eq!(upvalues[0].name, "n");
        assert!(Rc::ptr_eq(&upvalues[0].cell, &cell));
    }

    #[test]
    fn test_global_access_adds_env_upvalue_last() {
        let scope = Scope::new_root();
        scope.borrow_mut().declare("_ENV", Value::new_table());
        let inner = Scope::child_of(&scope);
        inner.borrow_mut().declare("n", Value::Integer(5));

        let body = body_returning(
            Expression::Binary {
                left: Box::new(ident("n")),
                op: crate::ast::BinaryOp::Add,
                right: Box::new(ident("print")),
                line: 1,
            },
            vec![],
        );
        let upvalues = analyze(&body, &inner);
        assert_eq!(upvalues.len(), 2);
        assert_eq!(upvalues[0].name, "n");
        assert_eq!(upvalues.last().unwrap().name, "_ENV");
    }
}
