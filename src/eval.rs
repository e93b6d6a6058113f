//! The evaluator: an AST walker implementing Lua 5.4 semantics.
//!
//! Statement execution returns a `ControlFlow` signal; the error path is
//! reserved for actual errors. Tail calls travel as a signal to the call
//! loop, which rebinds the current frame instead of recursing, so tail
//! recursion runs in constant host-stack space. To-be-closed variables are
//! closed on every scope exit, whatever the exit path.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{
    Attrib, BinaryOp, Block, Expression, Field, FieldKey, FunctionBody, FunctionName,
    ReturnStatement, Statement, UnaryOp,
};
use crate::coroutine::{CoEndpoints, Coroutine};
use crate::env::{find_varargs, lookup_cell, Scope};
use crate::error::{LuaError, LuaResult};
use crate::lexer::tokenize;
use crate::meta;
use crate::modules::ModuleLoader;
use crate::parser::parse_chunk;
use crate::table::Table;
use crate::value::{Function, Interner, LuaClosure, Number, Value};

/// Default bound on non-tail call nesting. Stock Lua allows deeper nesting;
/// this tree-walker burns host stack per frame, so the default stays low
/// and is configurable via `Interpreter::with_max_depth`.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 128;

/// Frames kept when synthesizing a traceback.
const TRACEBACK_FRAMES: usize = 20;

/// Control-flow signal returned by statement execution. Not errors: these
/// are the legitimate exits of a statement.
#[derive(Debug)]
pub enum ControlFlow {
    Normal,
    Break,
    Return(Vec<Value>),
    Goto(String),
    /// A `return f(...)`: the callee and arguments travel to the enclosing
    /// call loop, which reuses the current frame.
    TailCall { callee: Value, args: Vec<Value> },
}

/// One entry of the call stack, for depth limiting and tracebacks.
#[derive(Debug, Clone)]
pub struct Frame {
    pub name: String,
    pub chunk: String,
    pub line: u32,
}

/// State shared by every interpreter attached to the same program: the main
/// interpreter and the per-coroutine ones all point at one `SharedState`.
pub struct SharedState {
    pub root_scope: Rc<RefCell<Scope>>,
    pub globals: Rc<RefCell<Table>>,
    pub interner: Rc<RefCell<Interner>>,
    pub loader: Rc<RefCell<ModuleLoader>>,
    string_meta: RefCell<Option<Rc<RefCell<Table>>>>,
    pub max_call_depth: usize,
}

pub struct Interpreter {
    pub shared: Rc<SharedState>,
    call_stack: Vec<Frame>,
    /// Scratch stack for assembling multi-value expression lists.
    value_stack: Vec<Value>,
    /// The coroutine this interpreter executes (the main thread for the
    /// top-level interpreter).
    pub current_co: Rc<Coroutine>,
    /// Channel endpoints for yield/resume; `None` on the main thread.
    pub co_endpoints: Option<Rc<CoEndpoints>>,
    /// While positive, `coroutine.yield` is illegal (close handlers).
    pub non_yieldable: usize,
    chunk_name: String,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_CALL_DEPTH)
    }

    pub fn with_max_depth(max_call_depth: usize) -> Self {
        let globals = Rc::new(RefCell::new(Table::new()));
        let root_scope = Scope::new_root();
        root_scope
            .borrow_mut()
            .declare("_ENV", Value::Table(Rc::clone(&globals)));

        let shared = Rc::new(SharedState {
            root_scope,
            globals,
            interner: Rc::new(RefCell::new(Interner::new())),
            loader: Rc::new(RefCell::new(ModuleLoader::new())),
            string_meta: RefCell::new(None),
            max_call_depth,
        });

        let mut interp = Interpreter {
            shared,
            call_stack: Vec::new(),
            value_stack: Vec::new(),
            current_co: Coroutine::main(),
            co_endpoints: None,
            non_yieldable: 0,
            chunk_name: "?".to_string(),
        };
        crate::stdlib::install(&mut interp);
        interp
    }

    /// An interpreter for a coroutine body: shares all program state but has
    /// its own call stack and identity.
    pub fn fork_for_coroutine(
        shared: Rc<SharedState>,
        co: Rc<Coroutine>,
        endpoints: Rc<CoEndpoints>,
    ) -> Self {
        Interpreter {
            shared,
            call_stack: Vec::new(),
            value_stack: Vec::new(),
            current_co: co,
            co_endpoints: Some(endpoints),
            non_yieldable: 0,
            chunk_name: "?".to_string(),
        }
    }

    pub fn globals(&self) -> Rc<RefCell<Table>> {
        Rc::clone(&self.shared.globals)
    }

    pub fn string_metatable(&self) -> Option<Rc<RefCell<Table>>> {
        self.shared.string_meta.borrow().clone()
    }

    pub fn set_string_metatable(&self, mt: Rc<RefCell<Table>>) {
        *self.shared.string_meta.borrow_mut() = Some(mt);
    }

    /// Interns literal string bytes in the shared pool.
    pub fn intern(&self, bytes: &[u8]) -> Value {
        Value::Str(self.shared.interner.borrow_mut().intern(bytes))
    }

    pub fn chunk_name(&self) -> &str {
        &self.chunk_name
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Location of the `level`-th frame from the top (1 = innermost).
    pub fn frame_location(&self, level: usize) -> Option<(String, u32)> {
        if level == 0 || level > self.call_stack.len() {
            return None;
        }
        let frame = &self.call_stack[self.call_stack.len() - level];
        Some((frame.chunk.clone(), frame.line))
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Parses and runs a text chunk under the standard environment,
    /// returning the chunk's results.
    pub fn eval_source(&mut self, src: &[u8], chunk_name: &str) -> LuaResult<Vec<Value>> {
        let closure = self.load_source(src, chunk_name, None)?;
        Ok(self.call_value(closure, Vec::new())?.into_vec())
    }

    /// Compiles a text chunk to a callable closure. When `env` is given the
    /// chunk runs isolated under that `_ENV`.
    pub fn load_source(
        &mut self,
        src: &[u8],
        chunk_name: &str,
        env: Option<Value>,
    ) -> LuaResult<Value> {
        let tokens = tokenize(src, chunk_name)?;
        let block = parse_chunk(&tokens, chunk_name)?;
        let body = Rc::new(FunctionBody {
            params: Vec::new(),
            is_variadic: true,
            implicit_self: false,
            block,
            line: 0,
        });
        let scope = match env {
            Some(env_val) => {
                let s = Scope::new_root();
                {
                    let mut sb = s.borrow_mut();
                    sb.is_load_isolated = true;
                    sb.declare("_ENV", env_val);
                }
                s
            }
            None => Rc::clone(&self.shared.root_scope),
        };
        let upvalues = crate::upvalue::analyze(&body, &scope);
        Ok(Value::Function(Rc::new(Function::Closure(LuaClosure {
            body,
            env: scope,
            upvalues,
            name: Some(format!("main chunk [{}]", chunk_name)),
            chunk: chunk_name.to_string(),
        }))))
    }

    // -----------------------------------------------------------------------
    // Errors and tracebacks
    // -----------------------------------------------------------------------

    pub fn traceback_snapshot(&self) -> Vec<String> {
        let mut frames = Vec::new();
        let skipped = self.call_stack.len().saturating_sub(TRACEBACK_FRAMES);
        for frame in self.call_stack.iter().skip(skipped).rev() {
            frames.push(format!(
                "\t{}:{}: in function '{}'",
                frame.chunk, frame.line, frame.name
            ));
        }
        if skipped > 0 {
            frames.push(format!("\t... ({} frames omitted)", skipped));
        }
        frames
    }

    /// Runtime error carrying a `chunk:line:` prefix and a traceback.
    pub fn error_at(&self, line: u32, msg: impl Into<String>) -> LuaError {
        LuaError::runtime_at(msg, &self.chunk_name, line)
            .with_traceback(self.traceback_snapshot())
    }

    fn error_plain(&self, msg: impl Into<String>) -> LuaError {
        LuaError::runtime(msg).with_traceback(self.traceback_snapshot())
    }

    /// Stamps a fresh (positionless) error with the given line; errors that
    /// already carry a traceback pass through untouched.
    fn with_pos<T>(&self, line: u32, r: LuaResult<T>) -> LuaResult<T> {
        match r {
            Err(LuaError::Runtime { payload, traceback }) if traceback.is_empty() => {
                let payload = match payload {
                    Value::Str(s) => Value::string(format!(
                        "{}:{}: {}",
                        self.chunk_name,
                        line,
                        s.to_str_lossy()
                    )),
                    other => other,
                };
                Err(LuaError::Runtime {
                    payload,
                    traceback: self.traceback_snapshot(),
                })
            }
            other => other,
        }
    }

    fn push_frame(&mut self, name: String, line: u32) -> LuaResult<()> {
        if self.call_stack.len() >= self.shared.max_call_depth {
            return Err(LuaError::stack_overflow().with_traceback(self.traceback_snapshot()));
        }
        self.call_stack.push(Frame {
            name,
            chunk: self.chunk_name.clone(),
            line,
        });
        Ok(())
    }

    fn pop_frame(&mut self) {
        self.call_stack.pop();
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    /// Calls any callable value with the given arguments. The result is a
    /// `Multi` carrying all returned values.
    pub fn call_value(&mut self, callee: Value, args: Vec<Value>) -> LuaResult<Value> {
        self.call_function(callee, args, 0)
    }

    /// Follows `__call` chains until an actual function is found. The chain
    /// is flattened here (no frame per hop), bounded against cycles.
    fn resolve_callable(
        &mut self,
        mut callee: Value,
        mut args: Vec<Value>,
    ) -> LuaResult<(Rc<Function>, Vec<Value>)> {
        for _ in 0..meta::MAX_META_DEPTH {
            match callee {
                Value::Function(f) => return Ok((f, args)),
                other => match meta::get_metamethod(self, &other, "__call") {
                    Some(handler) => {
                        args.insert(0, other);
                        callee = handler;
                    }
                    None => {
                        return Err(LuaError::type_error("call", other.type_name())
                            .with_traceback(self.traceback_snapshot()))
                    }
                },
            }
        }
        Err(self.error_plain("'__call' chain too long; possible loop"))
    }

    fn call_function(&mut self, callee: Value, args: Vec<Value>, line: u32) -> LuaResult<Value> {
        let (func, args) = self.resolve_callable(callee, args)?;
        match &*func {
            Function::Native { name, func: f } => {
                let f = Rc::clone(f);
                self.push_frame(name.clone(), line)?;
                let result = f(self, args);
                self.pop_frame();
                result
            }
            Function::Closure(_) => self.call_closure(func, args, line),
        }
    }

    /// The call loop. Tail calls rebind `func`/`args` and continue without
    /// pushing a new frame, so tail recursion is depth-free.
    fn call_closure(
        &mut self,
        mut func: Rc<Function>,
        mut args: Vec<Value>,
        line: u32,
    ) -> LuaResult<Value> {
        let display = func.name().unwrap_or("?").to_string();
        self.push_frame(display, line)?;
        let saved_chunk = self.chunk_name.clone();

        let result = 'call: loop {
            let closure = match &*func {
                Function::Closure(c) => c,
                Function::Native { .. } => unreachable!("native handled by caller"),
            };
            self.chunk_name = closure.chunk.clone();

            let scope = Scope::child_of(&closure.env);
            {
                let mut s = scope.borrow_mut();
                s.is_function_boundary = true;
                // Upvalue cells shadow anything of the same name in the
                // captured chain.
                for up in &closure.upvalues {
                    s.adopt(up.name.clone(), Rc::clone(&up.cell));
                }
                let nparams = closure.body.params.len();
                for (i, p) in closure.body.params.iter().enumerate() {
                    s.declare(p.clone(), args.get(i).cloned().unwrap_or(Value::Nil));
                }
                if closure.body.is_variadic {
                    let extra = if args.len() > nparams {
                        args[nparams..].to_vec()
                    } else {
                        Vec::new()
                    };
                    s.varargs = Some(extra);
                }
            }

            let body = Rc::clone(&closure.body);
            let r = self.execute_block(&body.block, &scope);
            let r = self.close_scope(&scope, r);

            match r {
                Ok(ControlFlow::Normal) => break Ok(Value::Multi(Vec::new())),
                Ok(ControlFlow::Return(vals)) => break Ok(Value::Multi(vals)),
                Ok(ControlFlow::TailCall { callee, args: next_args }) => {
                    match self.resolve_callable(callee, next_args) {
                        Ok((next, a)) => match &*next {
                            Function::Closure(_) => {
                                func = next;
                                args = a;
                                continue 'call;
                            }
                            Function::Native { func: f, .. } => {
                                let f = Rc::clone(f);
                                break f(self, a);
                            }
                        },
                        Err(e) => break Err(e),
                    }
                }
                // Signals escaping their legitimate scope become errors.
                Ok(ControlFlow::Break) => break Err(self.error_plain("break outside a loop")),
                Ok(ControlFlow::Goto(label)) => {
                    break Err(
                        self.error_plain(format!("no visible label '{}' for goto", label))
                    )
                }
                Err(e) => break Err(e),
            }
        };

        self.chunk_name = saved_chunk;
        self.pop_frame();
        result
    }

    fn make_closure(
        &mut self,
        body: &Rc<FunctionBody>,
        scope: &Rc<RefCell<Scope>>,
        name: Option<String>,
    ) -> Value {
        let upvalues = crate::upvalue::analyze(body, scope);
        Value::Function(Rc::new(Function::Closure(LuaClosure {
            body: Rc::clone(body),
            env: Rc::clone(scope),
            upvalues,
            name,
            chunk: self.chunk_name.clone(),
        })))
    }

    // -----------------------------------------------------------------------
    // Blocks and statements
    // -----------------------------------------------------------------------

    /// Executes a block's statements in the given scope, resolving goto
    /// jumps against this block's labels.
    fn execute_block(
        &mut self,
        block: &Block,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<ControlFlow> {
        let mut idx = 0;
        while idx < block.statements.len() {
            match self.execute_statement(&block.statements[idx], scope)? {
                ControlFlow::Normal => idx += 1,
                ControlFlow::Goto(label) => {
                    let target = block
                        .statements
                        .iter()
                        .position(|s| matches!(s, Statement::Label(l) if *l == label));
                    match target {
                        Some(pos) => idx = pos + 1,
                        None => return Ok(ControlFlow::Goto(label)),
                    }
                }
                other => return Ok(other),
            }
        }
        if let Some(ret) = &block.return_statement {
            return self.execute_return(ret, scope);
        }
        Ok(ControlFlow::Normal)
    }

    /// Runs a block in a fresh child scope and closes that scope on every
    /// exit path.
    fn run_block_scoped(
        &mut self,
        block: &Block,
        parent: &Rc<RefCell<Scope>>,
    ) -> LuaResult<ControlFlow> {
        let scope = Scope::child_of(parent);
        let result = self.execute_block(block, &scope);
        self.close_scope(&scope, result)
    }

    /// Runs the to-be-closed handlers of a scope, reverse declaration order,
    /// on any exit. A `__close` error replaces an in-flight error; among
    /// multiple close errors the first prevails.
    pub(crate) fn close_scope(
        &mut self,
        scope: &Rc<RefCell<Scope>>,
        result: LuaResult<ControlFlow>,
    ) -> LuaResult<ControlFlow> {
        if !scope.borrow().has_to_be_closed() {
            return result;
        }
        let cells = scope.borrow_mut().take_to_be_closed();
        let mut current = result;
        let mut close_error_seen = false;
        for cell in cells {
            let v = cell.borrow().value.clone();
            if matches!(v, Value::Nil | Value::Boolean(false)) {
                continue;
            }
            let err_arg = match &current {
                Err(e) if !e.is_cancelled() => e.payload(),
                _ => Value::Nil,
            };
            if let Err(e) = self.invoke_close(v, err_arg) {
                if !close_error_seen {
                    close_error_seen = true;
                    current = Err(e);
                }
            }
        }
        current
    }

    /// Calls `__close(value, err)`; yields are forbidden inside.
    fn invoke_close(&mut self, value: Value, err_arg: Value) -> LuaResult<()> {
        let handler = meta::get_metamethod(self, &value, "__close").ok_or_else(|| {
            self.error_plain(format!(
                "attempt to close a non-closable {} value",
                value.type_name()
            ))
        })?;
        self.non_yieldable += 1;
        let r = self.call_value(handler, vec![value, err_arg]);
        self.non_yieldable -= 1;
        r.map(|_| ())
    }

    /// Closes a single pending value (generic-for's fourth value).
    fn close_pending_value(
        &mut self,
        value: Value,
        result: LuaResult<ControlFlow>,
    ) -> LuaResult<ControlFlow> {
        if matches!(value, Value::Nil | Value::Boolean(false)) {
            return result;
        }
        let err_arg = match &result {
            Err(e) if !e.is_cancelled() => e.payload(),
            _ => Value::Nil,
        };
        match self.invoke_close(value, err_arg) {
            Ok(()) => result,
            Err(e) => Err(e),
        }
    }

    fn execute_statement(
        &mut self,
        stmt: &Statement,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<ControlFlow> {
        match stmt {
            Statement::Empty | Statement::Label(_) => Ok(ControlFlow::Normal),

            Statement::Break { .. } => Ok(ControlFlow::Break),

            Statement::Goto { label, .. } => Ok(ControlFlow::Goto(label.clone())),

            Statement::FunctionCall(expr) => {
                self.eval_expression(expr, scope)?;
                Ok(ControlFlow::Normal)
            }

            Statement::Assignment {
                targets,
                values,
                line,
            } => {
                self.execute_assignment(targets, values, *line, scope)?;
                Ok(ControlFlow::Normal)
            }

            Statement::Do(block) => self.run_block_scoped(block, scope),

            Statement::While { condition, body } => {
                loop {
                    if !self.eval_single(condition, scope)?.is_truthy() {
                        break;
                    }
                    match self.run_block_scoped(body, scope)? {
                        ControlFlow::Normal => continue,
                        ControlFlow::Break => break,
                        other => return Ok(other),
                    }
                }
                Ok(ControlFlow::Normal)
            }

            Statement::Repeat { body, condition } => {
                loop {
                    // The until-condition sees the body's locals, so the
                    // scope closes only after it is evaluated.
                    let iter_scope = Scope::child_of(scope);
                    let r = self.execute_block(body, &iter_scope);
                    let r = match r {
                        Ok(ControlFlow::Normal) => {
                            match self.eval_single(condition, &iter_scope) {
                                Ok(cond) => {
                                    let done = cond.is_truthy();
                                    let closed =
                                        self.close_scope(&iter_scope, Ok(ControlFlow::Normal))?;
                                    match closed {
                                        ControlFlow::Normal => {
                                            if done {
                                                return Ok(ControlFlow::Normal);
                                            }
                                            continue;
                                        }
                                        other => return Ok(other),
                                    }
                                }
                                Err(e) => self.close_scope(&iter_scope, Err(e)),
                            }
                        }
                        other => self.close_scope(&iter_scope, other),
                    };
                    match r? {
                        ControlFlow::Break => return Ok(ControlFlow::Normal),
                        ControlFlow::Normal => continue,
                        other => return Ok(other),
                    }
                }
            }

            Statement::If {
                condition,
                then_block,
                elseif_parts,
                else_block,
            } => {
                if self.eval_single(condition, scope)?.is_truthy() {
                    return self.run_block_scoped(then_block, scope);
                }
                for (cond, blk) in elseif_parts {
                    if self.eval_single(cond, scope)?.is_truthy() {
                        return self.run_block_scoped(blk, scope);
                    }
                }
                match else_block {
                    Some(blk) => self.run_block_scoped(blk, scope),
                    None => Ok(ControlFlow::Normal),
                }
            }

            Statement::NumericFor {
                var,
                start,
                end,
                step,
                body,
                line,
            } => self.execute_numeric_for(var, start, end, step.as_ref(), body, *line, scope),

            Statement::GenericFor {
                names,
                exprs,
                body,
                line,
            } => self.execute_generic_for(names, exprs, body, *line, scope),

            Statement::FunctionDecl { name, body, line } => {
                let closure = self.make_closure(body, scope, Some(name.display()));
                self.assign_function_name(name, closure, *line, scope)?;
                Ok(ControlFlow::Normal)
            }

            Statement::LocalFunction { name, body, line: _ } => {
                // The cell is declared first so the body sees itself.
                let cell = scope.borrow_mut().declare(name.clone(), Value::Nil);
                let closure = self.make_closure(body, scope, Some(name.clone()));
                cell.borrow_mut().value = closure;
                Ok(ControlFlow::Normal)
            }

            Statement::LocalVars {
                names,
                values,
                line,
            } => {
                let mut vals = self.eval_expression_list(values, scope)?;
                vals.resize(names.len(), Value::Nil);
                for ((name, attrib), value) in names.iter().zip(vals) {
                    match attrib {
                        Attrib::None => {
                            scope.borrow_mut().declare(name.clone(), value);
                        }
                        Attrib::Const => {
                            scope.borrow_mut().declare_const(name.clone(), value);
                        }
                        Attrib::Close => {
                            let closable = matches!(value, Value::Nil | Value::Boolean(false))
                                || meta::get_metamethod(self, &value, "__close").is_some();
                            if !closable {
                                return Err(self.error_at(
                                    *line,
                                    format!("variable '{}' got a non-closable value", name),
                                ));
                            }
                            let cell = scope.borrow_mut().declare_const(name.clone(), value);
                            scope.borrow_mut().register_to_be_closed(cell);
                        }
                    }
                }
                Ok(ControlFlow::Normal)
            }
        }
    }

    fn execute_return(
        &mut self,
        ret: &ReturnStatement,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<ControlFlow> {
        if ret.expression_list.len() == 1 {
            // A return whose sole expression is a call becomes a tail call.
            match &ret.expression_list[0] {
                Expression::Call {
                    function,
                    args,
                    line: _,
                } => {
                    let callee = self.eval_single(function, scope)?;
                    let argv = self.eval_expression_list(args, scope)?;
                    return Ok(ControlFlow::TailCall { callee, args: argv });
                }
                Expression::MethodCall {
                    object,
                    method,
                    args,
                    line,
                } => {
                    let obj = self.eval_single(object, scope)?;
                    let key = self.intern(method.as_bytes());
                    let lookup = meta::index_value(self, obj.clone(), key);
                    let callee = self.with_pos(*line, lookup)?;
                    let mut argv = vec![obj];
                    argv.extend(self.eval_expression_list(args, scope)?);
                    return Ok(ControlFlow::TailCall { callee, args: argv });
                }
                _ => {}
            }
        }
        let vals = self.eval_expression_list(&ret.expression_list, scope)?;
        Ok(ControlFlow::Return(vals))
    }

    fn execute_assignment(
        &mut self,
        targets: &[Expression],
        values: &[Expression],
        line: u32,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<()> {
        let mut vals = self.eval_expression_list(values, scope)?;
        vals.resize(targets.len(), Value::Nil);
        for (target, value) in targets.iter().zip(vals) {
            self.assign_target(target, value, line, scope)?;
        }
        Ok(())
    }

    fn assign_target(
        &mut self,
        target: &Expression,
        value: Value,
        line: u32,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<()> {
        match target {
            Expression::Identifier { name, line } => self.assign_name(name, value, *line, scope),
            Expression::Index {
                object,
                index,
                line,
            } => {
                let obj = self.eval_single(object, scope)?;
                let key = self.eval_single(index, scope)?;
                let r = meta::newindex_value(self, obj, key, value);
                self.with_pos(*line, r)
            }
            Expression::Field { object, name, line } => {
                let obj = self.eval_single(object, scope)?;
                let key = self.intern(name.as_bytes());
                let r = meta::newindex_value(self, obj, key, value);
                self.with_pos(*line, r)
            }
            _ => Err(self.error_at(line, "cannot assign to this expression")),
        }
    }

    /// Assignment to a plain name: local cell, else upvalue (already joined
    /// into the scope chain), else `_ENV[<name>]` through `__newindex`.
    fn assign_name(
        &mut self,
        name: &str,
        value: Value,
        line: u32,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<()> {
        if let Some(cell) = lookup_cell(scope, name) {
            if cell.borrow().is_const {
                return Err(self.error_at(
                    line,
                    format!("attempt to assign to const variable '{}'", name),
                ));
            }
            cell.borrow_mut().value = value;
            return Ok(());
        }
        let env = self.env_value(scope);
        let key = self.intern(name.as_bytes());
        let r = meta::newindex_value(self, env, key, value);
        self.with_pos(line, r)
    }

    fn assign_function_name(
        &mut self,
        name: &FunctionName,
        closure: Value,
        line: u32,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<()> {
        let mut keys: Vec<&str> = name.path.iter().map(String::as_str).collect();
        if let Some(m) = &name.method {
            keys.push(m);
        }
        if keys.is_empty() {
            return self.assign_name(&name.base, closure, line, scope);
        }
        let mut obj = self.eval_identifier(&name.base, line, scope)?;
        for key in &keys[..keys.len() - 1] {
            let k = self.intern(key.as_bytes());
            let r = meta::index_value(self, obj, k);
            obj = self.with_pos(line, r)?;
        }
        let last = self.intern(keys[keys.len() - 1].as_bytes());
        let r = meta::newindex_value(self, obj, last, closure);
        self.with_pos(line, r)
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn execute_numeric_for(
        &mut self,
        var: &str,
        start: &Expression,
        end: &Expression,
        step: Option<&Expression>,
        body: &Block,
        line: u32,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<ControlFlow> {
        let start_v = self.eval_single(start, scope)?;
        let end_v = self.eval_single(end, scope)?;
        let step_v = match step {
            Some(e) => self.eval_single(e, scope)?,
            None => Value::Integer(1),
        };

        let start_n = start_v
            .to_numeric()
            .ok_or_else(|| self.error_at(line, "'for' initial value must be a number"))?;
        let end_n = end_v
            .to_numeric()
            .ok_or_else(|| self.error_at(line, "'for' limit must be a number"))?;
        let step_n = step_v
            .to_numeric()
            .ok_or_else(|| self.error_at(line, "'for' step must be a number"))?;

        // All-integer loops use integer arithmetic with overflow checking;
        // anything else runs in floats.
        if let (Number::Int(mut i), Number::Int(stop), Number::Int(step)) =
            (start_n, end_n, step_n)
        {
            if step == 0 {
                return Err(self.error_at(line, "'for' step is zero"));
            }
            loop {
                if step > 0 {
                    if i > stop {
                        break;
                    }
                } else if i < stop {
                    break;
                }
                match self.run_for_iteration(var, Value::Integer(i), body, scope)? {
                    ControlFlow::Normal => {}
                    ControlFlow::Break => break,
                    other => return Ok(other),
                }
                // Control-variable overflow terminates the loop.
                match i.checked_add(step) {
                    Some(next) => i = next,
                    None => break,
                }
            }
            return Ok(ControlFlow::Normal);
        }

        let mut i = start_n.as_float();
        let stop = end_n.as_float();
        let step = step_n.as_float();
        if step == 0.0 {
            return Err(self.error_at(line, "'for' step is zero"));
        }
        loop {
            let cont = if step > 0.0 { i <= stop } else { i >= stop };
            if !cont {
                break;
            }
            match self.run_for_iteration(var, Value::Float(i), body, scope)? {
                ControlFlow::Normal => {}
                ControlFlow::Break => break,
                other => return Ok(other),
            }
            i += step;
        }
        Ok(ControlFlow::Normal)
    }

    /// One loop-body run with a fresh control variable (each iteration's
    /// closure captures its own cell).
    fn run_for_iteration(
        &mut self,
        var: &str,
        value: Value,
        body: &Block,
        parent: &Rc<RefCell<Scope>>,
    ) -> LuaResult<ControlFlow> {
        let iter_scope = Scope::child_of(parent);
        iter_scope.borrow_mut().declare(var.to_string(), value);
        let result = self.execute_block(body, &iter_scope);
        self.close_scope(&iter_scope, result)
    }

    fn execute_generic_for(
        &mut self,
        names: &[String],
        exprs: &[Expression],
        body: &Block,
        line: u32,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<ControlFlow> {
        // Exactly four values: iterator, state, control, closing.
        let mut vals = self.eval_expression_list(exprs, scope)?;
        vals.resize(4, Value::Nil);
        let closing = vals.pop().unwrap();
        let mut control = vals.pop().unwrap();
        let state = vals.pop().unwrap();
        let iterator = vals.pop().unwrap();

        if !matches!(closing, Value::Nil | Value::Boolean(false))
            && meta::get_metamethod(self, &closing, "__close").is_none()
        {
            return Err(self.error_at(line, "variable '(for state)' got a non-closable value"));
        }

        let result = loop {
            let step =
                self.call_function(iterator.clone(), vec![state.clone(), control.clone()], line);
            let step = self.with_pos(line, step);
            let results = match step {
                Ok(v) => v.into_vec(),
                Err(e) => break Err(e),
            };
            let first = results.first().cloned().unwrap_or(Value::Nil);
            if first.is_nil() {
                break Ok(ControlFlow::Normal);
            }
            control = first;

            let iter_scope = Scope::child_of(scope);
            {
                let mut s = iter_scope.borrow_mut();
                for (i, n) in names.iter().enumerate() {
                    s.declare(n.clone(), results.get(i).cloned().unwrap_or(Value::Nil));
                }
            }
            let r = self.execute_block(body, &iter_scope);
            match self.close_scope(&iter_scope, r) {
                Ok(ControlFlow::Normal) => continue,
                Ok(ControlFlow::Break) => break Ok(ControlFlow::Normal),
                other => break other,
            }
        };

        // The closing value is closed on every exit path.
        self.close_pending_value(closing, result)
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Evaluates an expression; calls and `...` may produce a `Multi`.
    pub fn eval_expression(
        &mut self,
        expr: &Expression,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<Value> {
        match expr {
            Expression::Nil => Ok(Value::Nil),
            Expression::Boolean(b) => Ok(Value::Boolean(*b)),
            Expression::Integer(i) => Ok(Value::Integer(*i)),
            Expression::Float(f) => Ok(Value::Float(*f)),
            Expression::Str(bytes) => Ok(self.intern(bytes)),

            Expression::Varargs { line } => match find_varargs(scope) {
                Some(vals) => Ok(Value::Multi(vals)),
                None => {
                    Err(self.error_at(*line, "cannot use '...' outside a vararg function"))
                }
            },

            Expression::Identifier { name, line } => self.eval_identifier(name, *line, scope),

            Expression::Paren(inner) => self.eval_single(inner, scope),

            Expression::Binary {
                left,
                op,
                right,
                line,
            } => self.eval_binary(left, *op, right, *line, scope),

            Expression::Unary { op, operand, line } => {
                let v = self.eval_single(operand, scope)?;
                let r = match op {
                    UnaryOp::Not => Ok(Value::Boolean(!v.is_truthy())),
                    UnaryOp::Minus => meta::unary_minus(self, v),
                    UnaryOp::BitNot => meta::bitwise_not(self, v),
                    UnaryOp::Length => meta::length(self, v),
                };
                self.with_pos(*line, r)
            }

            Expression::Index {
                object,
                index,
                line,
            } => {
                let obj = self.eval_single(object, scope)?;
                let key = self.eval_single(index, scope)?;
                let r = meta::index_value(self, obj, key);
                self.with_pos(*line, r)
            }

            Expression::Field { object, name, line } => {
                let obj = self.eval_single(object, scope)?;
                let key = self.intern(name.as_bytes());
                let r = meta::index_value(self, obj, key);
                self.with_pos(*line, r)
            }

            Expression::Call {
                function,
                args,
                line,
            } => {
                let callee = self.eval_single(function, scope)?;
                let argv = self.eval_expression_list(args, scope)?;
                let r = self.call_function(callee, argv, *line);
                self.with_pos(*line, r)
            }

            Expression::MethodCall {
                object,
                method,
                args,
                line,
            } => {
                // The receiver is evaluated exactly once.
                let obj = self.eval_single(object, scope)?;
                let key = self.intern(method.as_bytes());
                let lookup = meta::index_value(self, obj.clone(), key);
                let callee = self.with_pos(*line, lookup)?;
                let mut argv = vec![obj];
                argv.extend(self.eval_expression_list(args, scope)?);
                let r = self.call_function(callee, argv, *line);
                self.with_pos(*line, r)
            }

            Expression::TableConstructor { fields, line } => {
                self.eval_table_constructor(fields, *line, scope)
            }

            Expression::Function(body) => Ok(self.make_closure(body, scope, None)),
        }
    }

    /// Evaluates to exactly one value (multi carriers collapse).
    pub fn eval_single(
        &mut self,
        expr: &Expression,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<Value> {
        Ok(self.eval_expression(expr, scope)?.collapse())
    }

    /// List evaluation with Lua's expansion rules: every expression but the
    /// last collapses to one value; a multi-producing last expression
    /// spreads. Intermediates are staged on the interpreter's value stack.
    pub fn eval_expression_list(
        &mut self,
        exprs: &[Expression],
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<Vec<Value>> {
        let base = self.value_stack.len();
        for (i, e) in exprs.iter().enumerate() {
            let v = self.eval_expression(e, scope);
            let v = match v {
                Ok(v) => v,
                Err(err) => {
                    self.value_stack.truncate(base);
                    return Err(err);
                }
            };
            if i + 1 == exprs.len() && e.is_multi_producer() {
                self.value_stack.extend(v.into_vec());
            } else {
                self.value_stack.push(v.collapse());
            }
        }
        Ok(self.value_stack.split_off(base))
    }

    /// Name resolution: local cell (upvalues are joined cells), then the
    /// `_ENV` route. `_ENV` itself is found by direct scope walk only, and
    /// `_G` reads raw to keep the bootstrap loop-free.
    fn eval_identifier(
        &mut self,
        name: &str,
        line: u32,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<Value> {
        if name == "_ENV" {
            return Ok(lookup_cell(scope, "_ENV")
                .map(|c| c.borrow().value.clone())
                .unwrap_or(Value::Nil));
        }
        if let Some(cell) = lookup_cell(scope, name) {
            return Ok(cell.borrow().value.clone());
        }
        let env = self.env_value(scope);
        if name == "_G" {
            if let Value::Table(t) = &env {
                return Ok(t.borrow().get(&Value::string("_G")));
            }
        }
        let key = self.intern(name.as_bytes());
        let r = meta::index_value(self, env, key);
        self.with_pos(line, r)
    }

    /// The `_ENV` in effect for the given scope.
    pub fn env_value(&self, scope: &Rc<RefCell<Scope>>) -> Value {
        lookup_cell(scope, "_ENV")
            .map(|c| c.borrow().value.clone())
            .unwrap_or_else(|| Value::Table(self.globals()))
    }

    fn eval_binary(
        &mut self,
        left: &Expression,
        op: BinaryOp,
        right: &Expression,
        line: u32,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<Value> {
        // and/or evaluate lazily and yield an operand, not a boolean.
        match op {
            BinaryOp::And => {
                let l = self.eval_single(left, scope)?;
                if !l.is_truthy() {
                    return Ok(l);
                }
                return self.eval_single(right, scope);
            }
            BinaryOp::Or => {
                let l = self.eval_single(left, scope)?;
                if l.is_truthy() {
                    return Ok(l);
                }
                return self.eval_single(right, scope);
            }
            _ => {}
        }

        let a = self.eval_single(left, scope)?;
        let b = self.eval_single(right, scope)?;
        let r = match op {
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::FloorDivide
            | BinaryOp::Modulo
            | BinaryOp::Power => meta::arith(self, op, a, b),
            BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::LeftShift
            | BinaryOp::RightShift => meta::bitwise(self, op, a, b),
            BinaryOp::Concat => meta::concat(self, a, b),
            BinaryOp::Eq => meta::equals(self, a, b),
            BinaryOp::Neq => {
                meta::equals(self, a, b).map(|v| Value::Boolean(!v.is_truthy()))
            }
            BinaryOp::Lt => meta::less_than(self, a, b),
            BinaryOp::Lte => meta::less_equal(self, a, b),
            // The fallback chain: a > b is b < a, a >= b is b <= a.
            BinaryOp::Gt => meta::less_than(self, b, a),
            BinaryOp::Gte => meta::less_equal(self, b, a),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        };
        self.with_pos(line, r)
    }

    fn eval_table_constructor(
        &mut self,
        fields: &[Field],
        line: u32,
        scope: &Rc<RefCell<Scope>>,
    ) -> LuaResult<Value> {
        let table = Rc::new(RefCell::new(Table::new()));
        let mut next_index: i64 = 1;
        for (i, field) in fields.iter().enumerate() {
            match &field.key {
                FieldKey::Positional => {
                    let is_last = i + 1 == fields.len();
                    let v = self.eval_expression(&field.value, scope)?;
                    if is_last && field.value.is_multi_producer() {
                        for item in v.into_vec() {
                            table
                                .borrow_mut()
                                .set(Value::Integer(next_index), item)
                                .map_err(|e| self.error_at(line, e.message()))?;
                            next_index += 1;
                        }
                    } else {
                        table
                            .borrow_mut()
                            .set(Value::Integer(next_index), v.collapse())
                            .map_err(|e| self.error_at(line, e.message()))?;
                        next_index += 1;
                    }
                }
                FieldKey::Identifier(name) => {
                    let v = self.eval_single(&field.value, scope)?;
                    let key = self.intern(name.as_bytes());
                    table
                        .borrow_mut()
                        .set(key, v)
                        .map_err(|e| self.error_at(line, e.message()))?;
                }
                FieldKey::Bracket(key_expr) => {
                    let key = self.eval_single(key_expr, scope)?;
                    let v = self.eval_single(&field.value, scope)?;
                    table
                        .borrow_mut()
                        .set(key, v)
                        .map_err(|e| self.error_at(line, e.message()))?;
                }
            }
        }
        Ok(Value::Table(table))
    }
}
