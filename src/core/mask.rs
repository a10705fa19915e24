use super::{DbError, Entity, EntitySchema, Result};
use std::fmt;

const WORD_BITS: usize = 64;

/// One flag per field of an entity type.
///
/// Masks of different entity types must not be combined; `union` and
/// `intersect` assume both sides were built for the same field count.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldMask {
    words: Vec<u64>,
    len: usize,
}

impl FieldMask {
    pub fn empty(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    pub fn full(len: usize) -> Self {
        let mut mask = Self::empty(len);
        for index in 0..len {
            mask.set(index);
        }
        mask
    }

    pub fn from_indices(len: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = Self::empty(len);
        for index in indices {
            mask.set(index);
        }
        mask
    }

    /// Builds a mask of `E` from field names.
    pub fn of<E: Entity>(names: &[&str]) -> Result<Self> {
        Self::from_names(E::schema(), names)
    }

    pub fn from_names(schema: &EntitySchema, names: &[&str]) -> Result<Self> {
        let mut mask = Self::empty(schema.field_count());
        for name in names {
            let index = schema.field_index(name).ok_or_else(|| {
                DbError::Validation(format!(
                    "Entity '{}' has no field '{}'",
                    schema.name(),
                    name
                ))
            })?;
            mask.set(index);
        }
        Ok(mask)
    }

    /// Fields where `a` and `b` hold different values.
    pub fn diff<E: Entity>(a: &E, b: &E) -> Self {
        let len = E::schema().field_count();
        Self::from_indices(len, (0..len).filter(|&index| a.field(index) != b.field(index)))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
        }
    }

    pub fn clear(&mut self, index: usize) {
        if index < self.len {
            self.words[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn union(&self, other: &FieldMask) -> FieldMask {
        self.zip_with(other, |a, b| a | b)
    }

    pub fn intersect(&self, other: &FieldMask) -> FieldMask {
        self.zip_with(other, |a, b| a & b)
    }

    /// Keeps only the flags for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(usize) -> bool) {
        for index in 0..self.len {
            if self.contains(index) && !keep(index) {
                self.clear(index);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|&index| self.contains(index))
    }

    /// Set field names in declaration order.
    pub fn fields_set(&self, schema: &EntitySchema) -> Vec<&'static str> {
        self.iter()
            .filter_map(|index| schema.field_name(index))
            .collect()
    }

    fn zip_with(&self, other: &FieldMask, op: impl Fn(u64, u64) -> u64) -> FieldMask {
        debug_assert_eq!(self.len, other.len, "field masks of different entity types");
        let len = self.len.max(other.len);
        let mut words = vec![0; len.div_ceil(WORD_BITS)];
        for (slot, word) in words.iter_mut().enumerate() {
            let a = self.words.get(slot).copied().unwrap_or(0);
            let b = other.words.get(slot).copied().unwrap_or(0);
            *word = op(a, b);
        }
        FieldMask { words, len }
    }
}

impl fmt::Debug for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Entity;

    #[derive(Debug, Clone, Default, Entity)]
    struct Invoice {
        #[entity(id)]
        id: String,
        status: String,
        total: i64,
        #[entity(version)]
        version: i64,
    }

    #[test]
    fn diff_marks_changed_fields_only() {
        let a = Invoice {
            id: "inv-1".into(),
            status: "open".into(),
            total: 500,
            version: 3,
        };
        let mut b = a.clone();
        assert!(FieldMask::diff(&a, &b).is_empty());

        b.status = "voided".into();
        let mask = FieldMask::diff(&a, &b);
        assert_eq!(mask.fields_set(Invoice::schema()), vec!["status"]);
        assert_eq!(FieldMask::diff(&b, &a), mask);
    }

    #[test]
    fn union_and_intersect_are_set_algebra() {
        let a = FieldMask::from_indices(4, [0, 1]);
        let b = FieldMask::from_indices(4, [1, 3]);
        let c = FieldMask::from_indices(4, [2]);

        assert_eq!(a.union(&b), FieldMask::from_indices(4, [0, 1, 3]));
        assert_eq!(a.intersect(&b), FieldMask::from_indices(4, [1]));
        assert_eq!(a.union(&b), b.union(&a));
        assert_eq!(a.union(&b).union(&c), a.union(&b.union(&c)));
        assert_eq!(a.intersect(&b).intersect(&c), a.intersect(&b.intersect(&c)));
        assert!(a.intersect(&c).is_empty());
    }

    #[test]
    fn masks_wider_than_one_word() {
        let mut mask = FieldMask::empty(130);
        mask.set(0);
        mask.set(64);
        mask.set(129);
        mask.set(200);
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 64, 129]);
        assert_eq!(mask.count(), 3);
        mask.retain(|index| index != 64);
        assert!(!mask.contains(64));
        assert_eq!(FieldMask::full(130).count(), 130);
    }

    #[test]
    fn of_resolves_names_in_declaration_order() {
        let mask = FieldMask::of::<Invoice>(&["total", "status"]).unwrap();
        assert_eq!(mask.fields_set(Invoice::schema()), vec!["status", "total"]);
        assert!(FieldMask::of::<Invoice>(&["missing"]).is_err());
    }
}
