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
    super::meta::{Comparable, TreeElement},
    crate::error::{Error, TrieResult},
    core::marker::PhantomData,
};

/// How a lookup reports the slot it resolved
pub trait ReadMode<E: TreeElement> {
    type Ret<'a>;
    type Target: Comparable<E::Key> + ?Sized;
    fn target(&self) -> &Self::Target;
    fn ex<'a>(c: &'a E) -> Self::Ret<'a>;
    fn nx<'a>() -> Self::Ret<'a>;
}

pub struct RModeExists<'d, E, Q: ?Sized> {
    target: &'d Q,
    _m: PhantomData<E>,
}

impl<'d, E, Q: ?Sized> RModeExists<'d, E, Q> {
    pub fn new(target: &'d Q) -> Self {
        Self {
            target,
            _m: PhantomData,
        }
    }
}

impl<'d, E: TreeElement, Q: Comparable<E::Key> + ?Sized> ReadMode<E> for RModeExists<'d, E, Q> {
    type Ret<'a> = bool;
    type Target = Q;
    fn target(&self) -> &Self::Target {
        self.target
    }
    fn ex<'a>(_: &'a E) -> Self::Ret<'a> {
        true
    }
    fn nx<'a>() -> Self::Ret<'a> {
        false
    }
}

pub struct RModeRef<'d, E, Q: ?Sized> {
    target: &'d Q,
    _m: PhantomData<E>,
}

impl<'d, E, Q: ?Sized> RModeRef<'d, E, Q> {
    pub fn new(target: &'d Q) -> Self {
        Self {
            target,
            _m: PhantomData,
        }
    }
}

impl<'d, E: TreeElement, Q: Comparable<E::Key> + ?Sized> ReadMode<E> for RModeRef<'d, E, Q> {
    type Ret<'a> = Option<&'a E::Value>;
    type Target = Q;
    fn target(&self) -> &Self::Target {
        self.target
    }
    fn ex<'a>(c: &'a E) -> Self::Ret<'a> {
        Some(c.val())
    }
    fn nx<'a>() -> Self::Ret<'a> {
        None
    }
}

pub struct RModeClone<'d, E, Q: ?Sized> {
    target: &'d Q,
    _m: PhantomData<E>,
}

impl<'d, E, Q: ?Sized> RModeClone<'d, E, Q> {
    pub fn new(target: &'d Q) -> Self {
        Self {
            target,
            _m: PhantomData,
        }
    }
}

impl<'d, E: TreeElement, Q: Comparable<E::Key> + ?Sized> ReadMode<E> for RModeClone<'d, E, Q> {
    type Ret<'a> = Option<E::Value>;
    type Target = Q;
    fn target(&self) -> &Self::Target {
        self.target
    }
    fn ex<'a>(c: &'a E) -> Self::Ret<'a> {
        Some(c.val().clone())
    }
    fn nx<'a>() -> Self::Ret<'a> {
        None
    }
}

/// the strict lookup: missing keys surface as an error
pub struct RModeFind<'d, E, Q: ?Sized> {
    target: &'d Q,
    _m: PhantomData<E>,
}

impl<'d, E, Q: ?Sized> RModeFind<'d, E, Q> {
    pub fn new(target: &'d Q) -> Self {
        Self {
            target,
            _m: PhantomData,
        }
    }
}

impl<'d, E: TreeElement, Q: Comparable<E::Key> + ?Sized> ReadMode<E> for RModeFind<'d, E, Q> {
    type Ret<'a> = TrieResult<&'a E::Value>;
    type Target = Q;
    fn target(&self) -> &Self::Target {
        self.target
    }
    fn ex<'a>(c: &'a E) -> Self::Ret<'a> {
        Ok(c.val())
    }
    fn nx<'a>() -> Self::Ret<'a> {
        Err(Error::KeyNotFound)
    }
}
