//! Sets of types under compatibility.
//!
//! Membership uses [`Type::accepts`] rather than structural equality: adding
//! a type that an existing member accepts is a no-op, so no member of a
//! [`TypeSet`] is accepted by an earlier one. Insertion order is preserved and
//! the first-seen member wins.

use crate::ty::Type;

/// A deduplicated, ordered collection of types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeSet {
    types: Vec<Type>,
}

impl TypeSet {
    pub fn new(types: impl IntoIterator<Item = Type>) -> Self {
        let mut set = Self::default();
        for ty in types {
            set.insert(ty);
        }
        set
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// The members of `ty`, with unions flattened.
    pub fn from_type(ty: &Type) -> Self {
        Self::new(ty.members().into_iter().cloned())
    }

    fn insert(&mut self, ty: Type) {
        if !self.contains(&ty) {
            self.types.push(ty);
        }
    }

    /// True if some member accepts `ty`.
    pub fn contains(&self, ty: &Type) -> bool {
        self.types.iter().any(|member| member.accepts(ty))
    }

    pub fn types(&self) -> &[Type] {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn union(&self, other: &TypeSet) -> TypeSet {
        TypeSet::new(self.types.iter().chain(other.types.iter()).cloned())
    }

    /// Members of `self` that some member of `other` accepts.
    pub fn intersection(&self, other: &TypeSet) -> TypeSet {
        TypeSet::new(
            self.types
                .iter()
                .filter(|ty| other.contains(ty))
                .cloned(),
        )
    }

    /// Members of `self` that no member of `other` accepts.
    pub fn difference(&self, other: &TypeSet) -> TypeSet {
        TypeSet::new(
            self.types
                .iter()
                .filter(|ty| !other.contains(ty))
                .cloned(),
        )
    }

    /// Collapse to one type: `Never` when empty, the member itself when there
    /// is one, otherwise `a | (b | (c | …))`.
    pub fn fold(&self) -> Type {
        let mut members = self.types.iter().rev();
        let Some(last) = members.next() else {
            return Type::Never;
        };
        members.fold(last.clone(), |acc, ty| Type::union(ty.clone(), acc))
    }
}

impl FromIterator<Type> for TypeSet {
    fn from_iter<I: IntoIterator<Item = Type>>(iter: I) -> Self {
        TypeSet::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_types::Unit;

    fn sample() -> TypeSet {
        TypeSet::new([
            Type::Text,
            Type::number(),
            Type::None,
            Type::list(Type::Boolean),
        ])
    }

    #[test]
    fn test_insert_is_compatibility_based() {
        let set = TypeSet::new([
            Type::Measurement(None),
            Type::measurement(Unit::of("ms")),
            Type::Text,
        ]);
        // The generic number already accepts #ms.
        assert_eq!(set.len(), 2);
        assert_eq!(set.types()[0], Type::Measurement(None));
    }

    #[test]
    fn test_idempotence() {
        let s = sample();
        assert_eq!(s.union(&s), s);
        assert_eq!(s.intersection(&s), s);
        assert!(s.difference(&s).is_empty());
    }

    #[test]
    fn test_intersection_and_difference() {
        let s = sample();
        let t = TypeSet::new([Type::None, Type::Boolean]);
        assert_eq!(s.intersection(&t).types(), &[Type::None]);
        assert_eq!(s.difference(&t).len(), 3);
        assert!(!s.difference(&t).contains(&Type::None));
    }

    #[test]
    fn test_from_type_flattens() {
        let ty = Type::union(Type::union(Type::Text, Type::None), Type::Boolean);
        let set = TypeSet::from_type(&ty);
        assert_eq!(set.types(), &[Type::Text, Type::None, Type::Boolean]);
    }

    #[test]
    fn test_fold() {
        assert_eq!(TypeSet::empty().fold(), Type::Never);
        assert_eq!(TypeSet::new([Type::Text]).fold(), Type::Text);
        assert_eq!(
            TypeSet::new([Type::Text, Type::None, Type::Boolean]).fold(),
            Type::union(Type::Text, Type::union(Type::None, Type::Boolean))
        );
    }
}
