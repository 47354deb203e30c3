//! Declaration validation: unique names, inheritance consistency and build order.

use crate::config::EntityDeclaration;
use crate::error::RegistryError;
use std::collections::HashSet;

/// How one declaration depends on another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dependency {
    Extend,
    Discriminator,
}

/// Indices of `declarations` in the order they can be built: independents first (file order),
/// then repeated scans over the `extend` and `discriminator` buckets until both are empty.
pub fn build_order(declarations: &[EntityDeclaration]) -> Result<Vec<usize>, RegistryError> {
    let mut names = HashSet::new();
    for d in declarations {
        if !names.insert(d.name.as_str()) {
            return Err(RegistryError::DuplicateEntity(d.name.clone()));
        }
    }

    let mut order = Vec::with_capacity(declarations.len());
    let mut built: HashSet<&str> = HashSet::new();
    let mut extended: Vec<(usize, &str)> = Vec::new();
    let mut discriminated: Vec<(usize, &str)> = Vec::new();

    for (i, d) in declarations.iter().enumerate() {
        match dependency_of(d)? {
            None => {
                order.push(i);
                built.insert(d.name.as_str());
            }
            Some((Dependency::Extend, target)) => extended.push((i, target)),
            Some((Dependency::Discriminator, target)) => discriminated.push((i, target)),
        }
    }

    for (i, target) in extended.iter().chain(discriminated.iter()) {
        if !names.contains(target) {
            return Err(RegistryError::MissingDependency {
                entity: declarations[*i].name.clone(),
                target: target.to_string(),
            });
        }
    }

    while !extended.is_empty() || !discriminated.is_empty() {
        let mut progressed = false;
        for bucket in [&mut extended, &mut discriminated] {
            bucket.retain(|(i, target)| {
                if built.contains(target) {
                    order.push(*i);
                    built.insert(declarations[*i].name.as_str());
                    progressed = true;
                    false
                } else {
                    true
                }
            });
        }
        if !progressed {
            let mut stuck: Vec<String> = extended
                .iter()
                .chain(discriminated.iter())
                .map(|(i, _)| declarations[*i].name.clone())
                .collect();
            stuck.sort();
            return Err(RegistryError::CyclicDependency(stuck));
        }
    }
    Ok(order)
}

pub fn dependency_of(d: &EntityDeclaration) -> Result<Option<(Dependency, &str)>, RegistryError> {
    match (d.extend.as_deref(), d.discriminator.as_deref()) {
        (Some(_), Some(_)) => Err(RegistryError::ConflictingInheritance(d.name.clone())),
        (Some(t), None) => Ok(Some((Dependency::Extend, t))),
        (None, Some(t)) => Ok(Some((Dependency::Discriminator, t))),
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(decls: &[EntityDeclaration], order: &[usize]) -> Vec<String> {
        order.iter().map(|i| decls[*i].name.clone()).collect()
    }

    #[test]
    fn independents_first_then_dependents_by_scan() {
        let decls = vec![
            EntityDeclaration::new("provider").discriminate("user"),
            EntityDeclaration::new("super-admin").extend("admin"),
            EntityDeclaration::new("admin").extend("user"),
            EntityDeclaration::new("user"),
            EntityDeclaration::new("product"),
        ];
        let order = build_order(&decls).unwrap();
        assert_eq!(names(&decls, &order), vec!["user", "product", "admin", "provider", "super-admin"]);
    }

    #[test]
    fn cycles_are_reported_with_their_members() {
        let decls = vec![
            EntityDeclaration::new("a").extend("b"),
            EntityDeclaration::new("b").discriminate("a"),
            EntityDeclaration::new("c"),
        ];
        match build_order(&decls) {
            Err(RegistryError::CyclicDependency(stuck)) => assert_eq!(stuck, vec!["a", "b"]),
            other => panic!("expected cycle, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn missing_targets_and_conflicts_are_fatal() {
        let decls = vec![EntityDeclaration::new("a").extend("ghost")];
        assert!(matches!(build_order(&decls), Err(RegistryError::MissingDependency { .. })));
        let decls = vec![EntityDeclaration::new("a").extend("b").discriminate("b"), EntityDeclaration::new("b")];
        assert!(matches!(build_order(&decls), Err(RegistryError::ConflictingInheritance(_))));
        let decls = vec![EntityDeclaration::new("a"), EntityDeclaration::new("a")];
        assert!(matches!(build_order(&decls), Err(RegistryError::DuplicateEntity(_))));
    }
}
