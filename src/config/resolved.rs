//! Resolved declarations: inheritance merged, data rules turned into hooks, ready for runtime use.

use crate::config::EntityDeclaration;
use std::collections::HashMap;
use std::sync::Arc;

/// Final, immutable declarations in load order, indexed by entity name.
#[derive(Clone, Debug, Default)]
pub struct DeclarationMap {
    entries: Vec<Arc<EntityDeclaration>>,
    by_name: HashMap<String, usize>,
}

impl DeclarationMap {
    pub fn new(declarations: Vec<EntityDeclaration>) -> Self {
        let mut map = DeclarationMap::default();
        for d in declarations {
            map.by_name.insert(d.name.clone(), map.entries.len());
            map.entries.push(Arc::new(d));
        }
        map
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityDeclaration>> {
        self.by_name.get(name).map(|i| &self.entries[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDeclaration>> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|d| d.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_load_order_and_indexes_by_name() {
        let map = DeclarationMap::new(vec![EntityDeclaration::new("user"), EntityDeclaration::new("product")]);
        assert_eq!(map.names().collect::<Vec<_>>(), vec!["user", "product"]);
        assert_eq!(map.get("product").map(|d| d.name.as_str()), Some("product"));
        assert!(map.get("order").is_none());
    }
}
