//! Session state: scopes, variables, functions and output pipes
//!
//! A session is a stack of scopes with the global scope at index 0. Each scope
//! may hold a locals [`Slots`](crate::slots::Slots) container, a stack of
//! dotted containers pushed by dot-sourced scripts, a variable table and a
//! function table. All names are case-insensitive.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::script_block::ScriptBlock;
use crate::slots::SlotsRef;
use crate::types::Val;

/// Identifies one session owned by an [`ExecutionContext`](crate::context::ExecutionContext)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub(crate) usize);

impl SessionId {
    pub const GLOBAL: SessionId = SessionId(0);
}

/// Who created a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeOrigin {
    /// Created directly by the host
    #[default]
    Runspace,
    /// Created by a script invocation
    Internal,
}

/* ===================== Pipes ===================== */

/// A shared, append-only stream of values
#[derive(Debug, Clone, Default)]
pub struct Pipe(Rc<RefCell<Vec<Val>>>);

impl Pipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, value: Val) {
        self.0.borrow_mut().push(value);
    }

    /// Drain everything written so far
    pub fn take(&self) -> Vec<Val> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn items(&self) -> Vec<Val> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn same_as(&self, other: &Pipe) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/* ===================== Scope ===================== */

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub value: Val,
    /// Assignments from nested scopes write here instead of shadowing
    pub all_scope: bool,
}

impl Variable {
    pub fn new(value: Val) -> Self {
        Self {
            value,
            all_scope: false,
        }
    }
}

pub(crate) fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Every name ever declared all-scope through one engine, across all
/// sessions. Names are never removed.
#[derive(Debug, Default)]
pub struct AllScopeNames(RwLock<HashSet<String>>);

impl AllScopeNames {
    pub fn declare(&self, name: &str) {
        let key = fold(name);
        if !self.0.read().contains(&key) {
            self.0.write().insert(key);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.read().contains(&fold(name))
    }

    /// Whether any of `names` could refer to an all-scope variable
    pub fn any_of<'a, I>(&self, names: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let declared = self.0.read();
        !declared.is_empty() && names.into_iter().any(|n| declared.contains(&fold(n)))
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Scope {
    pub locals: Option<SlotsRef>,
    pub dotted: Vec<SlotsRef>,
    pub variables: HashMap<String, Variable>,
    pub functions: HashMap<String, ScriptBlock>,
    pub origin: ScopeOrigin,
}

impl Scope {
    pub fn new(origin: ScopeOrigin) -> Self {
        Self {
            origin,
            ..Scope::default()
        }
    }

    /// Read a name: top dotted slots, then locals slots, then the variable table
    pub fn lookup(&self, name: &str) -> Option<Val> {
        if let Some(top) = self.dotted.last() {
            if let Some(v) = top.borrow().get_named(name) {
                return Some(v.clone());
            }
        }
        self.get_local(name)
    }

    /// Read a name from the locals slots or the variable table, ignoring dotted slots
    pub fn get_local(&self, name: &str) -> Option<Val> {
        if let Some(locals) = &self.locals {
            if let Some(v) = locals.borrow().get_named(name) {
                return Some(v.clone());
            }
        }
        self.variables.get(&fold(name)).map(|v| v.value.clone())
    }

    /// Write a name into this scope: a dotted or locals slot when the layout has
    /// it, otherwise the variable table.
    pub fn assign(&mut self, name: &str, value: Val) {
        if let Some(top) = self.dotted.last() {
            if top.borrow().contains(name) {
                top.borrow_mut().set_named(name, value);
                return;
            }
        }
        self.set_local(name, value);
    }

    /// Write a name into the locals slots or the variable table, ignoring dotted slots
    pub fn set_local(&mut self, name: &str, value: Val) {
        if let Some(locals) = &self.locals {
            if locals.borrow().contains(name) {
                locals.borrow_mut().set_named(name, value);
                return;
            }
        }
        let key = fold(name);
        match self.variables.get_mut(&key) {
            Some(var) => var.value = value,
            None => {
                self.variables.insert(key, Variable::new(value));
            }
        }
    }

    /// Undo [`Scope::set_local`]: clears the slot or drops the variable
    pub fn remove_local(&mut self, name: &str) {
        if let Some(locals) = &self.locals {
            let mut locals = locals.borrow_mut();
            if let Some(i) = locals.layout().index_of(name) {
                locals.clear(i);
                return;
            }
        }
        self.variables.remove(&fold(name));
    }
}

/* ===================== Session State ===================== */

/// A stack of scopes; index 0 is the session's global scope
#[derive(Debug)]
pub struct SessionState {
    scopes: Vec<Scope>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(ScopeOrigin::Runspace)],
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn global(&self) -> &Scope {
        &self.scopes[0]
    }

    pub fn global_mut(&mut self) -> &mut Scope {
        &mut self.scopes[0]
    }

    pub fn current(&self) -> &Scope {
        // the global scope is never popped
        self.scopes.last().unwrap_or(&self.scopes[0])
    }

    pub fn current_mut(&mut self) -> &mut Scope {
        let top = self.scopes.len() - 1;
        &mut self.scopes[top]
    }

    pub fn push_scope(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    /// Pop the current scope; the global scope stays
    pub fn pop_scope(&mut self) -> Option<Scope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    /// Scopes from the innermost outward
    pub fn scopes_top_down(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter().rev()
    }

    pub fn get_variable(&self, name: &str) -> Option<Val> {
        self.scopes_top_down().find_map(|scope| scope.lookup(name))
    }

    /// Write by name: the nearest all-scope variable if one exists, otherwise
    /// the current scope.
    pub fn set_variable(&mut self, name: &str, value: Val) {
        let key = fold(name);
        for scope in self.scopes.iter_mut().rev() {
            if let Some(var) = scope.variables.get_mut(&key) {
                if var.all_scope {
                    var.value = value;
                    return;
                }
            }
        }
        self.current_mut().assign(name, value);
    }

    /// Declare (or update) an all-scope variable in the current scope
    pub fn declare_all_scope(&mut self, name: &str, value: Val) {
        let key = fold(name);
        for scope in self.scopes.iter_mut().rev() {
            if let Some(var) = scope.variables.get_mut(&key) {
                if var.all_scope {
                    var.value = value;
                    return;
                }
            }
        }
        self.current_mut().variables.insert(
            key,
            Variable {
                value,
                all_scope: true,
            },
        );
    }

    pub fn find_function(&self, name: &str) -> Option<ScriptBlock> {
        let key = fold(name);
        self.scopes_top_down()
            .find_map(|scope| scope.functions.get(&key).cloned())
    }

    pub fn define_function(&mut self, name: &str, block: ScriptBlock) {
        self.current_mut().functions.insert(fold(name), block);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::slots::{SlotLayout, Slots};

    #[test]
    fn test_lookup_walks_scopes_top_down() {
        let mut session = SessionState::new();
        session.set_variable("x", Val::Num(1.0));
        session.push_scope(Scope::new(ScopeOrigin::Internal));

        assert_eq!(session.get_variable("X"), Some(Val::Num(1.0)));

        session.set_variable("x", Val::Num(2.0));
        assert_eq!(session.get_variable("x"), Some(Val::Num(2.0)));

        session.pop_scope();
        assert_eq!(session.get_variable("x"), Some(Val::Num(1.0)));
    }

    #[test]
    fn test_all_scope_writes_reach_the_declaring_scope() {
        let mut session = SessionState::new();
        session.declare_all_scope("total", Val::Num(0.0));
        session.push_scope(Scope::new(ScopeOrigin::Internal));

        session.set_variable("total", Val::Num(5.0));
        session.pop_scope();

        assert_eq!(session.get_variable("total"), Some(Val::Num(5.0)));
    }

    #[test]
    fn test_dotted_slots_shadow_locals() {
        let mut scope = Scope::new(ScopeOrigin::Internal);
        let locals = Slots::new(Arc::new(SlotLayout::automatic())).into_ref();
        locals.borrow_mut().set_named("_", Val::Num(1.0));
        scope.locals = Some(locals);

        let dotted = Slots::new(Arc::new(SlotLayout::automatic())).into_ref();
        scope.dotted.push(dotted.clone());
        assert_eq!(scope.lookup("_"), Some(Val::Num(1.0)));

        dotted.borrow_mut().set_named("_", Val::Num(2.0));
        assert_eq!(scope.lookup("_"), Some(Val::Num(2.0)));
        assert_eq!(scope.get_local("_"), Some(Val::Num(1.0)));
    }

    #[test]
    fn test_global_scope_is_never_popped() {
        let mut session = SessionState::new();
        assert!(session.pop_scope().is_none());
        assert_eq!(session.depth(), 1);
    }

    #[test]
    fn test_all_scope_names_are_case_insensitive() {
        let names = AllScopeNames::default();
        assert!(!names.any_of(["total"]));

        names.declare("Total");
        names.declare("TOTAL");

        assert_eq!(names.len(), 1);
        assert!(names.contains("total"));
        assert!(names.any_of(["x", "tOtAl"]));
        assert!(!names.any_of(["x", "y"]));
    }
}
