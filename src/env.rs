// Datastructure to manage lexical scoping. One generic chain serves both
// sides of the pipeline: the compiler's symbol tables (bindings carrying a
// static type) and the VM's environments (names carrying runtime values).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;


pub type Node<T> = Rc<T>;


pub struct Env<T> {
    scope: RefCell<HashMap<String, T>>,
    parent: Option<Node<Env<T>>>,
}

impl<T: Clone> Env<T> {
    fn new(parent: Option<Node<Env<T>>>) -> Node<Env<T>> {
        Node::new(Env {
            scope: RefCell::new(HashMap::new()),
            parent,
        })
    }

    pub fn root() -> Node<Env<T>> {
        Self::new(None)
    }

    pub fn chain(parent: &Node<Env<T>>) -> Node<Env<T>> {
        Self::new(Some(parent.clone()))
    }

    // Look up a name from anywhere in the scope chain.
    pub fn get(&self, key: &str) -> Option<T> {
        if let Some(value) = self.scope.borrow().get(key) {
            Some(value.clone())
        } else if let Some(parent) = &self.parent {
            parent.get(key)
        } else {
            None
        }
    }

    // True when the name is bound anywhere in the chain.
    pub fn defined(&self, key: &str) -> bool {
        self.scope.borrow().contains_key(key)
            || self.parent.as_ref().map_or(false, |p| p.defined(key))
    }

    // Insert a value in the current scope.
    pub fn define(&self, key: &str, value: T) {
        self.scope.borrow_mut().insert(String::from(key), value);
    }

    // Overwrite the nearest enclosing binding of the name. Returns false
    // when no scope in the chain binds it.
    pub fn assign(&self, key: &str, value: T) -> bool {
        if self.scope.borrow().contains_key(key) {
            self.scope.borrow_mut().insert(String::from(key), value);
            true
        } else if let Some(parent) = &self.parent {
            parent.assign(key, value)
        } else {
            false
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_get() {
        let env: Node<Env<i64>> = Env::root();
        assert_eq!(env.get("x"), None);
        env.define("x", 1);
        assert_eq!(env.get("x"), Some(1));
    }

    #[test]
    fn test_chain_lookup() {
        let root: Node<Env<i64>> = Env::root();
        root.define("x", 1);
        let child = Env::chain(&root);
        child.define("y", 2);
        assert_eq!(child.get("x"), Some(1));
        assert_eq!(child.get("y"), Some(2));
        assert_eq!(root.get("y"), None);
    }

    #[test]
    fn test_defined_walks_chain() {
        let root: Node<Env<i64>> = Env::root();
        root.define("x", 1);
        let child = Env::chain(&root);
        assert!(child.defined("x"));
        assert!(!child.defined("y"));
    }

    #[test]
    fn test_assign_updates_nearest_binding() {
        let root: Node<Env<i64>> = Env::root();
        root.define("x", 1);
        let child = Env::chain(&root);
        assert!(child.assign("x", 5));
        assert_eq!(root.get("x"), Some(5));
        assert!(!child.assign("missing", 9));
    }
}
