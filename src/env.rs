//! Lexical scopes and variable cells.
//!
//! A `Scope` maps names to shared heap cells. Scopes form a parent-linked
//! tree rather than a stack: a closure keeps its defining scope alive, and
//! mutations through any holder of a cell are visible to all holders. The
//! globals table is reached through the `_ENV` cell installed in the root
//! scope; chunks loaded with a custom environment get their own `_ENV` and
//! are marked load-isolated.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::value::Value;

/// A heap cell for one variable binding (the storage a closure's upvalues
/// alias). `is_const` backs the `<const>` attribute.
#[derive(Debug)]
pub struct VarCell {
    pub value: Value,
    pub is_const: bool,
}

impl VarCell {
    pub fn new(value: Value) -> Self {
        VarCell {
            value,
            is_const: false,
        }
    }

    pub fn constant(value: Value) -> Self {
        VarCell {
            value,
            is_const: true,
        }
    }
}

pub type CellRef = Rc<RefCell<VarCell>>;

pub struct Scope {
    vars: AHashMap<String, CellRef>,
    pub parent: Option<Rc<RefCell<Scope>>>,
    /// Set for scopes descending from a chunk loaded with a custom `_ENV`.
    pub is_load_isolated: bool,
    /// Cells declared `<close>` in this scope, in declaration order.
    to_be_closed: Vec<CellRef>,
    /// Set on the scope created for a function invocation; `...` resolution
    /// stops at the nearest boundary instead of walking into outer functions.
    pub is_function_boundary: bool,
    /// Extra arguments packed as `...` (only on variadic call boundaries).
    pub varargs: Option<Vec<Value>>,
}

impl Scope {
    pub fn new_root() -> Rc<RefCell<Scope>> {
        Rc::new(RefCell::new(Scope {
            vars: AHashMap::new(),
            parent: None,
            is_load_isolated: false,
            to_be_closed: Vec::new(),
            is_function_boundary: false,
            varargs: None,
        }))
    }

    /// A child scope; load isolation propagates downward.
    pub fn child_of(parent: &Rc<RefCell<Scope>>) -> Rc<RefCell<Scope>> {
        let isolated = parent.borrow().is_load_isolated;
        Rc::new(RefCell::new(Scope {
            vars: AHashMap::new(),
            parent: Some(Rc::clone(parent)),
            is_load_isolated: isolated,
            to_be_closed: Vec::new(),
            is_function_boundary: false,
            varargs: None,
        }))
    }

    /// Declares a fresh local binding, shadowing any outer one.
    pub fn declare(&mut self, name: impl Into<String>, value: Value) -> CellRef {
        let cell = Rc::new(RefCell::new(VarCell::new(value)));
        self.vars.insert(name.into(), Rc::clone(&cell));
        cell
    }

    pub fn declare_const(&mut self, name: impl Into<String>, value: Value) -> CellRef {
        let cell = Rc::new(RefCell::new(VarCell::constant(value)));
        self.vars.insert(name.into(), Rc::clone(&cell));
        cell
    }

    /// Installs an existing cell under a name (used to join a closure's
    /// upvalues into its call scope so they shadow the captured chain).
    pub fn adopt(&mut self, name: impl Into<String>, cell: CellRef) {
        self.vars.insert(name.into(), cell);
    }

    pub fn get_local(&self, name: &str) -> Option<CellRef> {
        self.vars.get(name).cloned()
    }

    pub fn register_to_be_closed(&mut self, cell: CellRef) {
        self.to_be_closed.push(cell);
    }

    pub fn has_to_be_closed(&self) -> bool {
        !self.to_be_closed.is_empty()
    }

    /// Drains the to-be-closed list in reverse declaration order.
    pub fn take_to_be_closed(&mut self) -> Vec<CellRef> {
        let mut cells = std::mem::take(&mut self.to_be_closed);
        cells.reverse();
        cells
    }
}

/// Walks the scope chain for `name`, innermost first.
pub fn lookup_cell(scope: &Rc<RefCell<Scope>>, name: &str) -> Option<CellRef> {
    let mut current = Rc::clone(scope);
    loop {
        if let Some(cell) = current.borrow().get_local(name) {
            return Some(cell);
        }
        let parent = current.borrow().parent.clone();
        match parent {
            Some(p) => current = p,
            None => return None,
        }
    }
}

/// Finds the `...` of the current function: walks up to the nearest function
/// boundary and returns its vararg pack (None when the function is not
/// variadic or we are outside any function).
pub fn find_varargs(scope: &Rc<RefCell<Scope>>) -> Option<Vec<Value>> {
    let mut current = Rc::clone(scope);
    loop {
        {
            let s = current.borrow();
            if s.is_function_boundary {
                return s.varargs.clone();
            }
        }
        let parent = current.borrow().parent.clone();
        match parent {
            Some(p) => current = p,
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_and_lookup() {
        let root = Scope::new_root();
        root.borrow_mut().declare("x", Value::Integer(42));
        let cell = lookup_cell(&root, "x").unwrap();
        assert_eq!(cell.borrow().value, Value::Integer(42));
        assert!(lookup_cell(&root, "y").is_none());
    }

    #[test]
    fn test_lookup_walks_parents() {
        let root = Scope::new_root();
        root.borrow_mut().declare("outer", Value::Integer(1));
        let inner = Scope::child_of(&root);
        inner.borrow_mut().declare("inner", Value::Integer(2));

        assert!(lookup_cell(&inner, "outer").is_some());
        assert!(lookup_cell(&inner, "inner").is_some());
        assert!(lookup_cell(&root, "inner").is_none());
    }

    #[test]
    fn test_shadowing() {
        let root = Scope::new_root();
        root.borrow_mut().declare("x", Value::Integer(1));
        let inner = Scope::child_of(&root);
        inner.borrow_mut().declare("x", Value::Integer(2));

        let cell = lookup_cell(&inner, "x").unwrap();
        assert_eq!(cell.borrow().value, Value::Integer(2));
        let outer_cell = lookup_cell(&root, "x").unwrap();
        assert_eq!(outer_cell.borrow().value, Value::Integer(1));
    }

    #[test]
    fn test_shared_cell_mutation() {
        let root = Scope::new_root();
        let cell = root.borrow_mut().declare("x", Value::Integer(1));

        // A second holder of the cell observes mutations (closure capture).
        let alias = Rc::clone(&cell);
        cell.borrow_mut().value = Value::Integer(99);
        assert_eq!(alias.borrow().value, Value::Integer(99));

        let looked_up = lookup_cell(&root, "x").unwrap();
        assert_eq!(looked_up.borrow().value, Value::Integer(99));
    }

    #[test]
    fn test_adopt_shadows_chain() {
        let root = Scope::new_root();
        root.borrow_mut().declare("x", Value::Integer(1));
        let call_scope = Scope::child_of(&root);
        let upvalue_cell = Rc::new(RefCell::new(VarCell::new(Value::Integer(7))));
        call_scope.borrow_mut().adopt("x", Rc::clone(&upvalue_cell));

        let cell = lookup_cell(&call_scope, "x").unwrap();
        assert!(Rc::ptr_eq(&cell, &upvalue_cell));
    }

    #[test]
    fn test_load_isolation_propagates() {
        let root = Scope::new_root();
        root.borrow_mut().is_load_isolated = true;
        let child = Scope::child_of(&root);
        let grandchild = Scope::child_of(&child);
        assert!(grandchild.borrow().is_load_isolated);
    }

    #[test]
    fn test_to_be_closed_reversed() {
        let root = Scope::new_root();
        let a = root.borrow_mut().declare("a", Value::Integer(1));
        let b = root.borrow_mut().declare("b", Value::Integer(2));
        root.borrow_mut().register_to_be_closed(Rc::clone(&a));
        root.borrow_mut().register_to_be_closed(Rc::clone(&b));

        let order = root.borrow_mut().take_to_be_closed();
        assert!(Rc::ptr_eq(&order[0], &b));
        assert!(Rc::ptr_eq(&order[1], &a));
        assert!(!root.borrow().has_to_be_closed());
    }
}
