/*
 * Created on Thu Feb 15 2024
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
    crate::mem::VInline,
    core::{
        borrow::Borrow,
        hash::{BuildHasher, Hash},
    },
    std::{collections::hash_map::RandomState, sync::Arc},
};

const LNODE_STACK: usize = 2;
pub type DefConfig = Config4BRandomState;
pub(super) type LNode<T> = VInline<LNODE_STACK, T>;

pub trait PreConfig: Sized + 'static {
    type HState: AsHasher;
    const BITS: u32;
}

pub trait Config: PreConfig {
    const BRANCH_MX: usize = <Self as PreConfig>::BITS as _;
    const BRANCH_LG: usize = {
        let mut index = <Self as Config>::BRANCH_MX;
        let mut log = 0usize;
        while {
            index >>= 1;
            index != 0
        } {
            log += 1;
        }
        log
    };
    const MASK: u64 = (<Self as PreConfig>::BITS - 1) as _;
    const MAX_TREE_HEIGHT_UB: usize = 0x40;
    const MAX_TREE_HEIGHT: usize =
        <Self as Config>::MAX_TREE_HEIGHT_UB / <Self as Config>::BRANCH_LG;
    const LEVEL_ZERO: usize = 0;
}

impl<T: PreConfig> Config for T {}

macro_rules! impl_config {
    ($($vis:vis $name:ident: $state:ty = $ty:ty),*) => {
        $($vis struct $name; impl $crate::tree::meta::PreConfig for $name {
            type HState = $state; const BITS: u32 = <$ty>::BITS;
        })*
    }
}

impl_config!(pub Config4BRandomState: RandomState = u32);

assertions!(
    <DefConfig as Config>::BRANCH_MX == 32,
    <DefConfig as Config>::BRANCH_LG == 5,
    <DefConfig as Config>::MASK == 0x1f,
);

/// Retired nodes may be reclaimed by whichever thread advances the epoch, so
/// everything stored in the tree has to be able to cross threads
pub trait Key: Hash + Eq + Clone + Send + Sync + 'static {}
impl<T> Key for T where T: Hash + Eq + Clone + Send + Sync + 'static {}
pub trait Value: Clone + Send + Sync + 'static {}
impl<T> Value for T where T: Clone + Send + Sync + 'static {}
/// Snapshots share the hash state with their source (two forks must agree on
/// every key's path), hence the `Clone` requirement
pub trait AsHasher: BuildHasher + Default + Clone {}
impl<T> AsHasher for T where T: BuildHasher + Default + Clone {}

/// An element stored in the tree: a key paired with a value, possibly behind
/// shared ownership. Cloning must be cheap since structural operations copy
/// elements around
pub trait TreeElement: Clone + Send + Sync + 'static {
    type Key: Key;
    type Value: Value;
    fn key(&self) -> &Self::Key;
    fn val(&self) -> &Self::Value;
    fn new(k: Self::Key, v: Self::Value) -> Self;
}

impl<K: Key, V: Value> TreeElement for (K, V) {
    type Key = K;
    type Value = V;
    #[inline(always)]
    fn key(&self) -> &K {
        &self.0
    }
    #[inline(always)]
    fn val(&self) -> &V {
        &self.1
    }
    fn new(k: K, v: V) -> Self {
        (k, v)
    }
}

impl<K: Key, V: Value> TreeElement for Arc<(K, V)> {
    type Key = K;
    type Value = V;
    #[inline(always)]
    fn key(&self) -> &K {
        &self.0
    }
    #[inline(always)]
    fn val(&self) -> &V {
        &self.1
    }
    fn new(k: K, v: V) -> Self {
        Arc::new((k, v))
    }
}

/// The [`Comparable`] trait is like [`PartialEq`], but is different due to its
/// expectations, and escapes its scandalous relations with [`Eq`] and the
/// consequential implications across the [`std`]
pub trait Comparable<K: ?Sized>: Hash {
    fn cmp_eq(&self, key: &K) -> bool;
}

pub trait ComparableUpgradeable<K>: Comparable<K> {
    fn upgrade(&self) -> K;
}

impl<K: Borrow<T>, T: Eq + Hash + ?Sized> Comparable<K> for T {
    fn cmp_eq(&self, key: &K) -> bool {
        self == key.borrow()
    }
}

impl<K: Hash, T: ToOwned<Owned = K> + Hash + Comparable<K> + ?Sized> ComparableUpgradeable<K>
    for T
{
    fn upgrade(&self) -> K {
        self.to_owned()
    }
}
