/*
 * Created on Mon Feb 19 2024
 *
 * This file is a part of snaptrie
 * snaptrie is a lock-free concurrent hash array mapped trie with constant
 * time snapshots, written by Sayan Nandan ("the Author") with the vision
 * to provide a fast and safe concurrent index without compromising on
 * consistency or memory safety.
 *
 * Copyright (c) 2024, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

use {
    super::{
        access::{RModeClone, RModeExists, RModeFind, RModeRef},
        iter::{IterKV, IterKey, IterVal},
        meta::{Comparable, ComparableUpgradeable, Config, DefConfig, TreeElement},
        patch::{Insert, Remove, RemoveRet, TryInsert, Update, UpdateRet, UpdateWith},
        RawTree,
    },
    crate::{
        error::TrieResult,
        sync::atm::{cpin, upin, Guard},
    },
    core::fmt,
    std::sync::Arc,
};

/// A tree whose elements are plain `(K, V)` pairs; keys and values are cloned
/// on structural copies
pub type TrieCopy<K, V, C = DefConfig> = RawTree<(K, V), C>;
/// A tree whose elements sit behind an [`Arc`]; structural copies only bump a
/// refcount
pub type TrieArc<K, V, C = DefConfig> = RawTree<Arc<(K, V)>, C>;

// write
impl<T: TreeElement, C: Config> RawTree<T, C> {
    /// Insert or overwrite the value at this key
    pub fn insert<U>(&self, key: U, val: T::Value, g: &Guard)
    where
        U: ComparableUpgradeable<T::Key>,
    {
        self.patch(Insert::new(key, val), g)
    }
    /// Insert only if the key is absent. Returns false if the uniqueness
    /// constraint would be violated
    pub fn try_insert<U>(&self, key: U, val: T::Value, g: &Guard) -> bool
    where
        U: ComparableUpgradeable<T::Key>,
    {
        self.patch(TryInsert::new(key, val), g)
    }
    /// Overwrite only if the key is present. Returns true if the entry was
    /// updated
    pub fn update(&self, key: T::Key, val: T::Value, g: &Guard) -> bool {
        self.patch(Update::new(key, val), g)
    }
    /// Overwrite only if the key is present, returning the displaced value
    pub fn update_return<'g>(
        &self,
        key: T::Key,
        val: T::Value,
        g: &'g Guard,
    ) -> Option<&'g T::Value> {
        self.patch(UpdateRet::new(key, val), g)
    }
    /// The unified mutator: `f` sees the current value (if any) and decides
    /// the new state. `None -> Some` inserts, `Some -> Some` overwrites,
    /// `Some -> None` deletes and `None -> None` does nothing.
    ///
    /// `f` may be called more than once if a commit is lost to a contending
    /// writer, so it must be pure
    pub fn update_with<F>(&self, key: T::Key, f: F, g: &Guard)
    where
        F: Fn(Option<&T::Value>) -> Option<T::Value>,
    {
        self.patch(UpdateWith::new(key, f), g)
    }
    /// Remove the entry. Returns true if the key existed
    pub fn remove<Q>(&self, key: &Q, g: &Guard) -> bool
    where
        Q: ?Sized + Comparable<T::Key>,
    {
        self.patch(Remove::new(key), g)
    }
    /// Remove the entry, returning the removed value if it existed
    pub fn remove_return<'g, Q>(&self, key: &Q, g: &'g Guard) -> Option<&'g T::Value>
    where
        Q: ?Sized + Comparable<T::Key>,
    {
        self.patch(RemoveRet::new(key), g)
    }
}

// read
impl<T: TreeElement, C: Config> RawTree<T, C> {
    pub fn contains_key<Q>(&self, key: &Q, g: &Guard) -> bool
    where
        Q: ?Sized + Comparable<T::Key>,
    {
        self._lookup(RModeExists::new(key), g)
    }
    /// Returns a reference to the value corresponding to the key, if it
    /// exists
    pub fn get<'g, Q>(&self, key: &Q, g: &'g Guard) -> Option<&'g T::Value>
    where
        Q: ?Sized + Comparable<T::Key>,
    {
        self._lookup(RModeRef::new(key), g)
    }
    /// Returns a clone of the value corresponding to the key, if it exists
    pub fn get_cloned<Q>(&self, key: &Q, g: &Guard) -> Option<T::Value>
    where
        Q: ?Sized + Comparable<T::Key>,
    {
        self._lookup(RModeClone::new(key), g)
    }
    /// The strict lookup: a missing key is an [`crate::error::Error`]
    pub fn find<'g, Q>(&self, key: &Q, g: &'g Guard) -> TrieResult<&'g T::Value>
    where
        Q: ?Sized + Comparable<T::Key>,
    {
        self._lookup(RModeFind::new(key), g)
    }
}

// bulk reads
impl<T: TreeElement, C: Config> RawTree<T, C> {
    /// Run `f` over every element. Elements are visited exactly once per
    /// consistent generation; the walk restarts if a fork moves the tree
    pub fn for_each<F>(&self, mut f: F, g: &Guard)
    where
        F: FnMut(&T::Key, &T::Value),
    {
        self.rfold((), |e, ()| f(e.key(), e.val()), |_| false, g)
    }
    /// Post-order fold threading an accumulator through every element
    pub fn fold<A, F>(&self, init: A, mut f: F, g: &Guard) -> A
    where
        A: Clone,
        F: FnMut(&T::Key, &T::Value, A) -> A,
    {
        self.rfold(init, |e, acc| f(e.key(), e.val(), acc), |_| false, g)
    }
    /// [`Self::fold`] with a short-circuit: the walk stops as soon as `stop`
    /// answers true for the accumulator
    pub fn reduce<A, F, S>(&self, init: A, mut f: F, stop: S, g: &Guard) -> A
    where
        A: Clone,
        F: FnMut(&T::Key, &T::Value, A) -> A,
        S: Fn(&A) -> bool,
    {
        self.rfold(init, |e, acc| f(e.key(), e.val(), acc), stop, g)
    }
    /// True iff some element satisfies the predicate (short-circuits)
    pub fn exists<F>(&self, pred: F, g: &Guard) -> bool
    where
        F: Fn(&T::Key, &T::Value) -> bool,
    {
        self.rfold(false, |e, _| pred(e.key(), e.val()), |a| *a, g)
    }
    /// True iff every element satisfies the predicate (short-circuits)
    pub fn for_all<F>(&self, pred: F, g: &Guard) -> bool
    where
        F: Fn(&T::Key, &T::Value) -> bool,
    {
        self.rfold(true, |e, _| pred(e.key(), e.val()), |a| !*a, g)
    }
    /// Number of elements, linearizable against a consistent generation
    pub fn len(&self, g: &Guard) -> usize {
        self.rfold(0usize, |_, n| n + 1, |_| false, g)
    }
}

// iterators
impl<T: TreeElement, C: Config> RawTree<T, C> {
    /// Iterate over `(key, value)` pairs in no particular order. Best-effort
    /// under concurrency
    pub fn iter_kv<'t, 'g, 'v>(&'t self, g: &'g Guard) -> IterKV<'t, 'g, 'v, T, C>
    where
        'g: 't + 'v,
        't: 'v,
    {
        IterKV::new(self, g)
    }
    /// Iterate over keys in no particular order. Best-effort under
    /// concurrency
    pub fn iter_key<'t, 'g, 'v>(&'t self, g: &'g Guard) -> IterKey<'t, 'g, 'v, T, C>
    where
        'g: 't + 'v,
        't: 'v,
    {
        IterKey::new(self, g)
    }
    /// Iterate over values in no particular order. Best-effort under
    /// concurrency
    pub fn iter_val<'t, 'g, 'v>(&'t self, g: &'g Guard) -> IterVal<'t, 'g, 'v, T, C>
    where
        'g: 't + 'v,
        't: 'v,
    {
        IterVal::new(self, g)
    }
}

impl<T: TreeElement, C: Config> FromIterator<T> for RawTree<T, C> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let g = unsafe {
            // UNSAFE(@ohsayan): nobody else can see this tree yet, so the
            // fake guard is fine
            upin()
        };
        let t = Self::new();
        iter.into_iter()
            .for_each(|e| t.insert(e.key().clone(), e.val().clone(), g));
        t
    }
}

impl<T, C> fmt::Debug for RawTree<T, C>
where
    T: TreeElement,
    C: Config,
    T::Key: fmt::Debug,
    T::Value: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = cpin();
        f.debug_map().entries(self.iter_kv(&g)).finish()
    }
}
