//! Arena storage with typed handles.
//!
//! Every expression, local variable and type of a lowered shader lives in an
//! arena and is referred to by a [`Handle`]. Statements refer to runs of
//! expressions through a half-open [`Range`]. Handles are never invalidated:
//! passes rewrite values in place with [`Arena::replace`] and drop them from
//! `Emit` ranges rather than removing them.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A typed `u32` index into an [`Arena`] or [`UniqueArena`].
pub struct Handle<T> {
    index: u32,
    marker: PhantomData<fn() -> T>,
}

/// A half-open run of [`Handle`]s, `start..end`.
pub struct Range<T> {
    start: u32,
    end: u32,
    marker: PhantomData<fn() -> T>,
}

// Derives would bound `T`; handles and ranges are plain integers whatever
// they point at.
macro_rules! integer_like {
    ($name:ident { $($field:ident),+ }) => {
        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $name<T> {}

        impl<T> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                ($(self.$field),+) == ($(other.$field),+)
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> PartialOrd for $name<T> {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl<T> Ord for $name<T> {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                ($(self.$field),+).cmp(&($(other.$field),+))
            }
        }

        impl<T> Hash for $name<T> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                $(self.$field.hash(state);)+
            }
        }
    };
}

integer_like!(Handle { index });
integer_like!(Range { start, end });

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

impl<T> fmt::Debug for Range<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start, self.end)
    }
}

impl<T> Handle<T> {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            marker: PhantomData,
        }
    }

    /// Position of the value in its arena.
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// The handle appended right after this one.
    pub fn next(self) -> Self {
        Self::new(self.index + 1)
    }

    fn from_len(len: usize) -> Self {
        match u32::try_from(len) {
            Ok(index) => Self::new(index),
            Err(_) => panic!("arena overflow: {len} values do not fit a u32 handle"),
        }
    }
}

impl<T> Range<T> {
    /// The handles from `first` up to, but not including, `end`.
    pub fn new(first: Handle<T>, end: Handle<T>) -> Self {
        Self::from_index_range(first.index..end.index)
    }

    pub fn from_index_range(range: std::ops::Range<u32>) -> Self {
        Self {
            start: range.start,
            end: range.end,
            marker: PhantomData,
        }
    }

    pub fn first(&self) -> Handle<T> {
        Handle::new(self.start)
    }

    /// The handle one past the last one in the range.
    pub fn end(&self) -> Handle<T> {
        Handle::new(self.end)
    }

    pub fn index_range(&self) -> std::ops::Range<u32> {
        self.start..self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.index_range().contains(&handle.index)
    }

    pub fn iter(&self) -> impl Iterator<Item = Handle<T>> + use<T> {
        self.index_range().map(Handle::new)
    }
}

/// Append-only storage addressed by [`Handle`].
#[derive(Clone, Debug)]
pub struct Arena<T> {
    values: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self { values: Vec::new() }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The handle [`append`](Self::append) will return next.
    pub fn next_handle(&self) -> Handle<T> {
        Handle::from_len(self.values.len())
    }

    pub fn append(&mut self, value: T) -> Handle<T> {
        let handle = self.next_handle();
        self.values.push(value);
        handle
    }

    /// Swaps in `value` behind `handle` and returns what was there.
    pub fn replace(&mut self, handle: Handle<T>, value: T) -> T {
        std::mem::replace(&mut self.values[handle.index()], value)
    }

    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.values.get(handle.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        (0u32..).map(Handle::new).zip(&self.values)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        (0u32..).map(Handle::new).zip(&mut self.values)
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.values[handle.index()]
    }
}

impl<T> IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.values[handle.index()]
    }
}

/// Storage that hands out one handle per distinct value, so that handle
/// equality is value equality. Types live here.
#[derive(Clone, Debug)]
pub struct UniqueArena<T> {
    values: Vec<T>,
    lookup: HashMap<T, Handle<T>>,
}

impl<T> Default for UniqueArena<T> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            lookup: HashMap::new(),
        }
    }
}

impl<T: Hash + Eq> UniqueArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The handle of `value`, inserting it first if it is new.
    pub fn insert(&mut self, value: T) -> Handle<T>
    where
        T: Clone,
    {
        if let Some(handle) = self.get_handle(&value) {
            return handle;
        }
        let handle = Handle::from_len(self.values.len());
        self.lookup.insert(value.clone(), handle);
        self.values.push(value);
        handle
    }

    pub fn get_handle(&self, value: &T) -> Option<Handle<T>> {
        self.lookup.get(value).copied()
    }

    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.values.get(handle.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        (0u32..).map(Handle::new).zip(&self.values)
    }
}

impl<T> Index<Handle<T>> for UniqueArena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.values[handle.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_keeps_the_handle() {
        let mut exprs = Arena::new();
        let read = exprs.append("readfirstlane");
        let add = exprs.append("add");
        assert_eq!(exprs.replace(read, "argument"), "readfirstlane");
        assert_eq!(exprs[read], "argument");
        assert_eq!(exprs[add], "add");
        assert_eq!(exprs.next_handle(), add.next());
    }

    #[test]
    fn iteration_pairs_handles_with_values() {
        let mut arena = Arena::new();
        for v in [3, 5, 8] {
            arena.append(v);
        }
        for (_, v) in arena.iter_mut() {
            *v *= 2;
        }
        let pairs: Vec<_> = arena.iter().map(|(h, &v)| (h.index(), v)).collect();
        assert_eq!(pairs, vec![(0, 6), (1, 10), (2, 16)]);
        assert_eq!(arena.try_get(Handle::new(3)), None);
    }

    #[test]
    fn equal_values_share_a_handle() {
        let mut types = UniqueArena::new();
        let u32_ty = types.insert("u32");
        let vec4 = types.insert("vec4<f32>");
        assert_eq!(types.insert("u32"), u32_ty);
        assert_ne!(u32_ty, vec4);
        assert_eq!(types.len(), 2);
        assert_eq!(types.get_handle(&"vec4<f32>"), Some(vec4));
        assert_eq!(types.get_handle(&"f16"), None);
    }

    #[test]
    fn emit_ranges() {
        let range = Range::<u32>::new(Handle::new(2), Handle::new(5));
        assert_eq!(range, Range::from_index_range(2..5));
        assert_eq!(range.first().index(), 2);
        assert_eq!(range.end().index(), 5);
        assert!(range.contains(Handle::new(4)));
        assert!(!range.contains(range.end()));
        assert_eq!(range.iter().map(Handle::index).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(Range::<u32>::from_index_range(3..3).is_empty());
        assert!(Handle::<u32>::new(0) < Handle::new(1));
    }
}
