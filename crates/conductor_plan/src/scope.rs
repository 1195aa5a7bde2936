//! Name resolution inside one block.
//!
//! Every block (the processor's top level, a nested block, a loop body)
//! owns a [`BlockScope`] mapping action names to their position. Jumps are
//! bound against the scope once, at prepare time, so the interpreter only
//! ever deals with indexes.

use crate::target::JumpTarget;
use conductor_core::{EngineError, EngineResult, Signal};
use indexmap::IndexMap;

/// Name given to an action that has none
#[must_use]
pub fn default_action_name(index: usize) -> String {
    format!("_a{index}")
}

/// Names of the actions of one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockScope {
    owner: String,
    names: IndexMap<String, usize>,
    in_loop: bool,
}

impl BlockScope {
    /// Build the scope of a block from the declared names of its actions
    ///
    /// # Errors
    ///
    /// Returns error if two actions share a name
    pub fn build<'a, I>(owner: &str, names: I, in_loop: bool) -> EngineResult<Self>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let mut map = IndexMap::new();
        for (index, name) in names.into_iter().enumerate() {
            let name = name.map_or_else(|| default_action_name(index), str::to_string);
            if map.contains_key(&name) {
                return Err(EngineError::DuplicateActionName {
                    block: owner.to_string(),
                    name,
                    position: index + 1,
                });
            }
            map.insert(name, index);
        }
        Ok(Self {
            owner: owner.to_string(),
            names: map,
            in_loop,
        })
    }

    /// A scope with no names, used for the children of a parallel block
    #[must_use]
    pub fn detached(owner: &str, in_loop: bool) -> Self {
        Self {
            owner: owner.to_string(),
            names: IndexMap::new(),
            in_loop,
        }
    }

    /// Block or processor owning the scope
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Is a loop somewhere above this block?
    #[must_use]
    pub fn in_loop(&self) -> bool {
        self.in_loop
    }

    /// Position of a named action
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// Name of the action at `index`
    #[must_use]
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get_index(index).map(|(name, _)| name.as_str())
    }

    /// Number of actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Is the block empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Bind a directive written on `action` to a signal
    ///
    /// # Errors
    ///
    /// Returns error if the named target is not in this block, or if
    /// next-loop is requested outside any loop
    pub fn resolve(&self, action: &str, directive: &str) -> EngineResult<Signal> {
        match JumpTarget::parse(directive) {
            JumpTarget::Stop => Ok(Signal::Stop),
            JumpTarget::BreakLoop => Ok(Signal::BreakLoop),
            JumpTarget::NextLoop if self.in_loop => Ok(Signal::NextLoop),
            JumpTarget::NextLoop => Err(EngineError::NextLoopOutsideLoop {
                action: action.to_string(),
            }),
            JumpTarget::Action(name) => self.index_of(&name).map(Signal::JumpTo).ok_or_else(|| {
                EngineError::JumpTargetNotFound {
                    action: action.to_string(),
                    target: name,
                }
            }),
        }
    }

    /// Bind an optional directive
    ///
    /// # Errors
    ///
    /// See [`BlockScope::resolve`]
    pub fn resolve_opt(&self, action: &str, directive: Option<&str>) -> EngineResult<Option<Signal>> {
        directive.map(|d| self.resolve(action, d)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_names() {
        let scope = BlockScope::build("svc", [Some("a"), None, Some("c")], false).unwrap();
        assert_eq!(scope.len(), 3);
        assert_eq!(scope.index_of("_a1"), Some(1));
        assert_eq!(scope.name_at(2), Some("c"));
        assert_eq!(scope.owner(), "svc");
    }

    #[test]
    fn test_duplicate_name() {
        let err = BlockScope::build("svc", [Some("a"), Some("b"), Some("a")], false).unwrap_err();
        assert_eq!(
            err,
            EngineError::DuplicateActionName {
                block: "svc".to_string(),
                name: "a".to_string(),
                position: 3,
            }
        );
    }

    #[test]
    fn test_explicit_name_clashes_with_default() {
        assert!(BlockScope::build("svc", [None, Some("_a0")], false).is_err());
    }

    #[test]
    fn test_resolve() {
        let scope = BlockScope::build("svc", [Some("a"), Some("b")], false).unwrap();
        assert_eq!(scope.resolve("a", "b").unwrap(), Signal::JumpTo(1));
        assert_eq!(scope.resolve("a", "_s").unwrap(), Signal::Stop);
        assert_eq!(scope.resolve("a", "_break").unwrap(), Signal::BreakLoop);
        assert!(matches!(
            scope.resolve("a", "zz"),
            Err(EngineError::JumpTargetNotFound { .. })
        ));
        assert!(matches!(
            scope.resolve("a", "_next"),
            Err(EngineError::NextLoopOutsideLoop { .. })
        ));
        assert_eq!(scope.resolve_opt("a", None).unwrap(), None);
    }

    #[test]
    fn test_next_loop_inside_loop() {
        let scope = BlockScope::build("body", [Some("a")], true).unwrap();
        assert_eq!(scope.resolve("a", "_n").unwrap(), Signal::NextLoop);
    }

    #[test]
    fn test_detached_scope_has_no_names() {
        let scope = BlockScope::detached("par", false);
        assert!(scope.is_empty());
        assert!(scope.resolve("x", "a").is_err());
    }

    proptest! {
        #[test]
        fn test_any_repeated_name_fails(names in proptest::collection::vec("[a-d]", 2..8)) {
            let has_dup = {
                let mut seen = std::collections::HashSet::new();
                names.iter().any(|n| !seen.insert(n.clone()))
            };
            let result = BlockScope::build("svc", names.iter().map(|n| Some(n.as_str())), false);
            prop_assert_eq!(result.is_err(), has_dup);
        }
    }
}
