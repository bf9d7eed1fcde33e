/*
 * Created on Fri Feb 16 2024
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
    super::meta::{Comparable, ComparableUpgradeable, TreeElement},
    core::marker::PhantomData,
};

/// What a patch wants done to the slot it targeted
pub enum PatchDelta<E> {
    /// leave the current element untouched (no CAS is issued)
    Retain,
    /// replace the element
    Write(E),
    /// remove the element
    Remove,
}

/// A [`PatchWrite`] is one atomic change to the tree at one key. The `nx_*`
/// half runs when the key is missing, the `ex_*` half when it is present.
///
/// The apply routines may run more than once if a CAS is lost to a
/// contending writer, so they must be pure
pub trait PatchWrite<E: TreeElement> {
    type Ret<'a>;
    type Target: Comparable<E::Key> + ?Sized;
    fn target(&self) -> &Self::Target;
    /// the key is missing; `Some` inserts, `None` leaves it missing
    fn nx_apply(&mut self) -> Option<E>;
    fn nx_ret<'a>() -> Self::Ret<'a>;
    /// the key is present
    fn ex_apply(&mut self, current: &E) -> PatchDelta<E>;
    fn ex_ret<'a>(current: &'a E) -> Self::Ret<'a>;
}

/// insert-or-overwrite
pub struct Insert<E: TreeElement, U> {
    target: U,
    val: E::Value,
    _m: PhantomData<E>,
}

impl<E: TreeElement, U> Insert<E, U> {
    pub fn new(target: U, val: E::Value) -> Self {
        Self {
            target,
            val,
            _m: PhantomData,
        }
    }
}

impl<E: TreeElement, U: ComparableUpgradeable<E::Key>> PatchWrite<E> for Insert<E, U> {
    type Ret<'a> = ();
    type Target = U;
    fn target(&self) -> &Self::Target {
        &self.target
    }
    fn nx_apply(&mut self) -> Option<E> {
        Some(E::new(self.target.upgrade(), self.val.clone()))
    }
    fn nx_ret<'a>() -> Self::Ret<'a> {}
    fn ex_apply(&mut self, current: &E) -> PatchDelta<E> {
        PatchDelta::Write(E::new(current.key().clone(), self.val.clone()))
    }
    fn ex_ret<'a>(_: &'a E) -> Self::Ret<'a> {}
}

/// insert-if-absent
pub struct TryInsert<E: TreeElement, U> {
    target: U,
    val: E::Value,
    _m: PhantomData<E>,
}

impl<E: TreeElement, U> TryInsert<E, U> {
    pub fn new(target: U, val: E::Value) -> Self {
        Self {
            target,
            val,
            _m: PhantomData,
        }
    }
}

impl<E: TreeElement, U: ComparableUpgradeable<E::Key>> PatchWrite<E> for TryInsert<E, U> {
    type Ret<'a> = bool;
    type Target = U;
    fn target(&self) -> &Self::Target {
        &self.target
    }
    fn nx_apply(&mut self) -> Option<E> {
        Some(E::new(self.target.upgrade(), self.val.clone()))
    }
    fn nx_ret<'a>() -> Self::Ret<'a> {
        true
    }
    fn ex_apply(&mut self, _: &E) -> PatchDelta<E> {
        PatchDelta::Retain
    }
    fn ex_ret<'a>(_: &'a E) -> Self::Ret<'a> {
        false
    }
}

/// update-if-present
pub struct Update<E: TreeElement> {
    target: E::Key,
    val: E::Value,
}

impl<E: TreeElement> Update<E> {
    pub fn new(target: E::Key, val: E::Value) -> Self {
        Self { target, val }
    }
}

impl<E: TreeElement> PatchWrite<E> for Update<E> {
    type Ret<'a> = bool;
    type Target = E::Key;
    fn target(&self) -> &Self::Target {
        &self.target
    }
    fn nx_apply(&mut self) -> Option<E> {
        None
    }
    fn nx_ret<'a>() -> Self::Ret<'a> {
        false
    }
    fn ex_apply(&mut self, current: &E) -> PatchDelta<E> {
        PatchDelta::Write(E::new(current.key().clone(), self.val.clone()))
    }
    fn ex_ret<'a>(_: &'a E) -> Self::Ret<'a> {
        true
    }
}

/// update-if-present, returning the previous value
pub struct UpdateRet<E: TreeElement> {
    target: E::Key,
    val: E::Value,
}

impl<E: TreeElement> UpdateRet<E> {
    pub fn new(target: E::Key, val: E::Value) -> Self {
        Self { target, val }
    }
}

impl<E: TreeElement> PatchWrite<E> for UpdateRet<E> {
    type Ret<'a> = Option<&'a E::Value>;
    type Target = E::Key;
    fn target(&self) -> &Self::Target {
        &self.target
    }
    fn nx_apply(&mut self) -> Option<E> {
        None
    }
    fn nx_ret<'a>() -> Self::Ret<'a> {
        None
    }
    fn ex_apply(&mut self, current: &E) -> PatchDelta<E> {
        PatchDelta::Write(E::new(current.key().clone(), self.val.clone()))
    }
    fn ex_ret<'a>(c: &'a E) -> Self::Ret<'a> {
        Some(c.val())
    }
}

/// delete
pub struct Remove<'d, E, Q: ?Sized> {
    target: &'d Q,
    _m: PhantomData<E>,
}

impl<'d, E, Q: ?Sized> Remove<'d, E, Q> {
    pub fn new(target: &'d Q) -> Self {
        Self {
            target,
            _m: PhantomData,
        }
    }
}

impl<'d, E: TreeElement, Q: Comparable<E::Key> + ?Sized> PatchWrite<E> for Remove<'d, E, Q> {
    type Ret<'a> = bool;
    type Target = Q;
    fn target(&self) -> &Self::Target {
        self.target
    }
    fn nx_apply(&mut self) -> Option<E> {
        None
    }
    fn nx_ret<'a>() -> Self::Ret<'a> {
        false
    }
    fn ex_apply(&mut self, _: &E) -> PatchDelta<E> {
        PatchDelta::Remove
    }
    fn ex_ret<'a>(_: &'a E) -> Self::Ret<'a> {
        true
    }
}

/// delete, returning the removed value
pub struct RemoveRet<'d, E, Q: ?Sized> {
    target: &'d Q,
    _m: PhantomData<E>,
}

impl<'d, E, Q: ?Sized> RemoveRet<'d, E, Q> {
    pub fn new(target: &'d Q) -> Self {
        Self {
            target,
            _m: PhantomData,
        }
    }
}

impl<'d, E: TreeElement, Q: Comparable<E::Key> + ?Sized> PatchWrite<E> for RemoveRet<'d, E, Q> {
    type Ret<'a> = Option<&'a E::Value>;
    type Target = Q;
    fn target(&self) -> &Self::Target {
        self.target
    }
    fn nx_apply(&mut self) -> Option<E> {
        None
    }
    fn nx_ret<'a>() -> Self::Ret<'a> {
        None
    }
    fn ex_apply(&mut self, _: &E) -> PatchDelta<E> {
        PatchDelta::Remove
    }
    fn ex_ret<'a>(c: &'a E) -> Self::Ret<'a> {
        Some(c.val())
    }
}

/// The unified mutator: insert, overwrite and delete in one closure over the
/// current state of the key. `None -> Some` inserts, `Some -> Some` updates,
/// `Some -> None` deletes, `None -> None` is a no-op.
///
/// The closure may be invoked more than once under contention, so it must be
/// pure
pub struct UpdateWith<E: TreeElement, F> {
    target: E::Key,
    f: F,
}

impl<E: TreeElement, F> UpdateWith<E, F> {
    pub fn new(target: E::Key, f: F) -> Self {
        Self { target, f }
    }
}

impl<E: TreeElement, F> PatchWrite<E> for UpdateWith<E, F>
where
    F: Fn(Option<&E::Value>) -> Option<E::Value>,
{
    type Ret<'a> = ();
    type Target = E::Key;
    fn target(&self) -> &Self::Target {
        &self.target
    }
    fn nx_apply(&mut self) -> Option<E> {
        (self.f)(None).map(|v| E::new(self.target.clone(), v))
    }
    fn nx_ret<'a>() -> Self::Ret<'a> {}
    fn ex_apply(&mut self, current: &E) -> PatchDelta<E> {
        match (self.f)(Some(current.val())) {
            Some(v) => PatchDelta::Write(E::new(current.key().clone(), v)),
            None => PatchDelta::Remove,
        }
    }
    fn ex_ret<'a>(_: &'a E) -> Self::Ret<'a> {}
}
