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

use super::*;

mod vinline {
    use super::*;
    const CAP: usize = 2;
    #[test]
    fn drop_empty() {
        let array = VInline::<CAP, String>::new();
        drop(array);
    }
    #[test]
    fn stay_on_stack() {
        let mut array = VInline::<CAP, String>::new();
        (0..CAP).for_each(|i| array.push(format!("elem-{i}")));
        assert!(array.on_stack());
        array
            .iter()
            .enumerate()
            .for_each(|(i, elem)| assert_eq!(elem, format!("elem-{i}").as_str()));
    }
    #[test]
    fn spill_to_heap() {
        let mut array = VInline::<CAP, String>::new();
        (0..CAP * 4).for_each(|i| array.push(format!("elem-{i}")));
        assert!(array.on_heap());
        assert_eq!(array.len(), CAP * 4);
        array
            .iter()
            .enumerate()
            .for_each(|(i, elem)| assert_eq!(elem, format!("elem-{i}").as_str()));
    }
    #[test]
    fn clone_collect() {
        let array: VInline<CAP, u8> = (0..6).collect();
        let copy = array.clone();
        assert_eq!(array, copy);
        assert_eq!(copy.len(), 6);
    }
}

mod uarray {
    use super::*;
    const CAP: usize = 8;
    #[test]
    fn empty() {
        let a = UArray::<CAP, u8>::new();
        drop(a);
    }
    #[test]
    fn push_pop() {
        let mut a = UArray::<CAP, u8>::new();
        assert_eq!(a.capacity(), CAP);
        a.push(1);
        a.push(2);
        assert_eq!(a.pop(), Some(2));
        assert_eq!(a.pop(), Some(1));
        assert_eq!(a.pop(), None);
    }
    #[test]
    #[should_panic(expected = "stack,capof")]
    fn push_panic() {
        let mut a = UArray::<CAP, u8>::new();
        (0..=CAP as u8).for_each(|i| a.push(i));
    }
    #[test]
    fn slice() {
        let a: UArray<CAP, _> = (1u8..=8).collect();
        assert_eq!(a.as_slice(), [1, 2, 3, 4, 5, 6, 7, 8]);
    }
    #[test]
    fn last_mut() {
        let mut a: UArray<CAP, _> = (0u8..4).collect();
        *a.last_mut().unwrap() = 10;
        assert_eq!(a.as_slice(), [0, 1, 2, 10]);
    }
    #[test]
    fn drop_nontrivial() {
        let mut a = UArray::<CAP, Vec<u8>>::new();
        a.push(vec![1, 2, 3]);
        a.push(vec![4, 5, 6]);
        drop(a);
    }
}
