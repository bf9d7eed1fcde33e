/*
 * Created on Tue Feb 13 2024
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

/*!
    # Unsafe APIs

    Thin abstractions (unsafe, still) over the raw allocator, used by the
    inline vector that backs collision lists.
*/

use std::{
    alloc::{self, Layout},
    ptr::{self, NonNull},
};

/// Allocate the given layout. This will panic if the allocator returns an error
#[inline(always)]
pub unsafe fn alloc_layout<T>(layout: Layout) -> *mut T {
    let ptr = alloc::alloc(layout);
    assert!(!ptr.is_null(), "malloc failed");
    ptr as _
}

/// Allocate a block with an array layout of type `T` with space for `l` elements
#[inline(always)]
pub unsafe fn alloc_array<T>(l: usize) -> *mut T {
    if l != 0 {
        self::alloc_layout(Layout::array::<T>(l).unwrap_unchecked())
    } else {
        NonNull::dangling().as_ptr()
    }
}

/// Deallocate the given layout
#[inline(always)]
pub unsafe fn dealloc_layout(ptr: *mut u8, layout: Layout) {
    alloc::dealloc(ptr, layout)
}

/// Deallocate an array of type `T` with size `l`. This function will ensure that nonzero
/// calls are made to the allocator
#[inline(always)]
pub unsafe fn dealloc_array<T>(ptr: *mut T, l: usize) {
    if l != 0 {
        self::dealloc_layout(ptr as *mut u8, Layout::array::<T>(l).unwrap_unchecked())
    }
}

/// Run the dtor for the given slice (range)
#[inline(always)]
pub unsafe fn drop_slice_in_place_ref<T>(ptr: &mut [T]) {
    ptr::drop_in_place(ptr as *mut [T])
}
