/*
 * Created on Mon Feb 12 2024
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

//! # snaptrie
//!
//! A concurrent hash array mapped trie supporting lock-free reads and writes
//! alongside constant time copy-on-write snapshots. Readers never block,
//! writers never block, and a snapshot is a single atomic generation bump:
//! the two tries then share structure until one of them writes, at which
//! point the writer privately regenerates its own path.
//!
//! All operations take an epoch [`Guard`] (see [`pin`]); unlinked nodes are
//! reclaimed once every pinned participant has moved on.
//!
//! ```
//! use snaptrie::{pin, TrieCopy};
//!
//! let g = pin();
//! let t: TrieCopy<&str, u64> = TrieCopy::new();
//! t.insert("apollo", 11, &g);
//! let t2 = t.snapshot(&g);
//! t2.insert("artemis", 1, &g);
//! assert_eq!(t.len(&g), 1);
//! assert_eq!(t2.len(&g), 2);
//! ```

#![deny(unreachable_patterns)]

#[macro_use]
mod macros;
mod error;
mod mem;
mod sync;
mod tree;

pub use {
    error::{Error, TrieResult},
    sync::atm::{cpin as pin, Guard},
    tree::{
        imp::{TrieArc, TrieCopy},
        iter::{IterKV, IterKey, IterVal},
        meta::{
            AsHasher, Comparable, ComparableUpgradeable, Config, DefConfig, Key, PreConfig,
            TreeElement, Value,
        },
        RawTree,
    },
};
