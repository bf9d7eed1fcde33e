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

use {core::fmt, std::sync::Arc, uuid::Uuid};

/// A generation token. Two tokens are equal iff they are the same allocation,
/// which rules out ABA without any counter arithmetic: a reclaimed token can
/// never be minted again while anything still points to it. The embedded
/// uuid is purely diagnostic and is never compared
pub struct Gen {
    id: Arc<Uuid>,
}

impl Gen {
    #[inline(always)]
    pub fn mint() -> Self {
        Self {
            id: Arc::new(Uuid::new_v4()),
        }
    }
    #[inline(always)]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.id, &other.id)
    }
}

impl Clone for Gen {
    fn clone(&self) -> Self {
        Self {
            id: Arc::clone(&self.id),
        }
    }
}

impl fmt::Debug for Gen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gen({})", self.id.simple())
    }
}
