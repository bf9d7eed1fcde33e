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
    super::{
        gen::Gen,
        meta::{Config, LNode, TreeElement},
    },
    crate::sync::atm::{upin, Atomic, Guard, Owned, Shared},
    std::sync::Arc,
};

/// An indirection node: the only mutable cell in the tree. Everything it
/// points to is immutable once published (read-copy-update), so every
/// structural change is one pointer swap on this cell
pub struct NodeRef<T, C: Config> {
    body: Atomic<Body<T, C>>,
}

/// What a [`NodeRef`] points to: the node state paired with its generation
/// witness. The two are swapped as one unit, which is exactly what makes the
/// generational CAS below behave like a double compare single swap
pub struct Body<T, C: Config> {
    pub gen: Gen,
    pub mn: MainNode<T, C>,
}

pub enum MainNode<T, C: Config> {
    /// bitmap compressed branch node
    Cn(CNode<T, C>),
    /// tombstone: this subtree collapsed and the parent must absorb it
    Tn(Option<T>),
    /// full hash collision list, only at the maximum depth
    Ln(LNode<T>),
}

/// bitmap compressed branch node: the bit at hash-slice position `i` is set
/// iff slot `i` is occupied, and `br` is packed in bit order
pub struct CNode<T, C: Config> {
    pub bmp: u32,
    pub br: Box<[Branch<T, C>]>,
}

pub enum Branch<T, C: Config> {
    Leaf(T),
    In(Arc<NodeRef<T, C>>),
}

impl<T: TreeElement, C: Config> NodeRef<T, C> {
    pub fn alloc(b: Body<T, C>) -> Self {
        Self {
            body: Atomic::new_alloc(b),
        }
    }
    #[inline(always)]
    pub fn ld<'g>(&self, g: &'g Guard) -> Shared<'g, Body<T, C>> {
        self.body.ld_acq(g)
    }
    /// Generational CAS. The caller has verified the generation witness on
    /// `old` against its own descent generation; since the witness travels
    /// inside the body, a concurrent generation bump necessarily swapped the
    /// body pointer and this commit then fails
    pub fn gcas<'g>(
        &self,
        old: Shared<'g, Body<T, C>>,
        gen: Gen,
        mn: MainNode<T, C>,
        g: &'g Guard,
    ) -> bool {
        self.gcas_shared(old, gen, mn, g).is_some()
    }
    /// [`Self::gcas`], additionally handing back the committed body so the
    /// caller can keep walking from a cell it knows it owns
    pub fn gcas_shared<'g>(
        &self,
        old: Shared<'g, Body<T, C>>,
        gen: Gen,
        mn: MainNode<T, C>,
        g: &'g Guard,
    ) -> Option<Shared<'g, Body<T, C>>> {
        match self.body.cx_rel(old, Owned::new(Body { gen, mn }), g) {
            Ok(new) => {
                unsafe {
                    // UNSAFE(@ohsayan): we just unlinked it; readers still
                    // pinned on it keep it alive until their epoch retires
                    g.defer_destroy(old);
                }
                Some(new)
            }
            // the rejected body rides back inside the error and is dropped
            // here, releasing the fresh clones it carried
            Err(_) => None,
        }
    }
}

impl<T, C: Config> Drop for NodeRef<T, C> {
    fn drop(&mut self) {
        unsafe {
            // UNSAFE(@ohsayan): the last reference is going away, so nothing
            // can be pinned on this cell anymore; the fake pin is only there
            // to do the load
            let g = upin();
            let body = self.body.ld_rlx(g);
            drop(body.into_owned());
        }
    }
}

impl<T: TreeElement, C: Config> CNode<T, C> {
    const _BMP_CAN_HOLD: () = assert!(C::BRANCH_MX <= u32::BITS as usize);
    pub fn empty() -> Self {
        let _ = Self::_BMP_CAN_HOLD;
        Self {
            bmp: 0,
            br: Vec::new().into_boxed_slice(),
        }
    }
    /// The single-bit mask selecting this hash's slot at the given level, or
    /// `None` once the level runs past the hash width (collision territory)
    #[inline(always)]
    pub fn flag(hash: u64, lvl: usize) -> Option<u32> {
        if lvl >= C::MAX_TREE_HEIGHT_UB {
            return None;
        }
        Some(1u32 << ((hash >> lvl) & C::MASK))
    }
    #[inline(always)]
    pub fn has(&self, flag: u32) -> bool {
        self.bmp & flag != 0
    }
    /// packed index: number of occupied slots below this flag
    #[inline(always)]
    pub fn pos(&self, flag: u32) -> usize {
        (self.bmp & (flag - 1)).count_ones() as usize
    }
    pub fn with_inserted(&self, flag: u32, pos: usize, br: Branch<T, C>) -> Self {
        let mut v = Vec::with_capacity(self.br.len() + 1);
        v.extend(self.br[..pos].iter().cloned());
        v.push(br);
        v.extend(self.br[pos..].iter().cloned());
        Self {
            bmp: self.bmp | flag,
            br: v.into_boxed_slice(),
        }
    }
    pub fn with_replaced(&self, pos: usize, br: Branch<T, C>) -> Self {
        let mut v: Vec<_> = self.br.iter().cloned().collect();
        v[pos] = br;
        Self {
            bmp: self.bmp,
            br: v.into_boxed_slice(),
        }
    }
    pub fn with_removed(&self, flag: u32, pos: usize) -> Self {
        let mut v = Vec::with_capacity(self.br.len() - 1);
        v.extend(self.br[..pos].iter().cloned());
        v.extend(self.br[pos + 1..].iter().cloned());
        Self {
            bmp: self.bmp & !flag,
            br: v.into_boxed_slice(),
        }
    }
    /// Vertical contraction: below the root, a branch node holding nothing
    /// becomes a bare tombstone and a branch node holding a single leaf
    /// becomes a tombed leaf. A lone child that is itself an indirection node
    /// cannot be pulled up (that would break the hash prefix)
    pub fn contract(self, lvl: usize) -> MainNode<T, C> {
        if lvl == C::LEVEL_ZERO {
            // the root stays a branch node even when empty
            return MainNode::Cn(self);
        }
        match self.br.len() {
            0 => MainNode::Tn(None),
            1 if matches!(self.br[0], Branch::Leaf(_)) => {
                let l = extract!(Vec::from(self.br).pop(), Some(Branch::Leaf(l)) => l);
                MainNode::Tn(Some(l))
            }
            _ => MainNode::Cn(self),
        }
    }
    /// Horizontal compression: resurrect every collapsed child, drop the dead
    /// ones out of the bitmap, then contract vertically
    pub fn compress<'g>(&self, lvl: usize, g: &'g Guard) -> MainNode<T, C> {
        let mut bmp = self.bmp;
        let mut br = Vec::with_capacity(self.br.len());
        let mut rem = self.bmp;
        let mut i = 0;
        while rem != 0 {
            let flag = rem & rem.wrapping_neg();
            match Self::resurrect(&self.br[i], g) {
                Some(b) => br.push(b),
                None => bmp &= !flag,
            }
            rem ^= flag;
            i += 1;
        }
        Self {
            bmp,
            br: br.into_boxed_slice(),
        }
        .contract(lvl)
    }
    /// Promote a tombed or singleton child back into its parent as a plain
    /// leaf; `None` means the child is dead and its slot goes away
    fn resurrect<'g>(br: &Branch<T, C>, g: &'g Guard) -> Option<Branch<T, C>> {
        match br {
            Branch::Leaf(_) => Some(br.clone()),
            Branch::In(child) => {
                let body = unsafe {
                    // UNSAFE(@ohsayan): guard-protected load
                    child.ld(g).deref()
                };
                match &body.mn {
                    MainNode::Tn(Some(l)) => Some(Branch::Leaf(l.clone())),
                    MainNode::Tn(None) => None,
                    MainNode::Ln(list) if list.len() == 1 => Some(Branch::Leaf(list[0].clone())),
                    MainNode::Ln(list) if list.is_empty() => None,
                    _ => Some(br.clone()),
                }
            }
        }
    }
}

/// Build the subtree distinguishing two elements whose hashes agree on every
/// slice up to `lvl`. Every indirection node minted here carries the calling
/// operation's generation: tagging with anything older would let a fork read
/// the commit through shared structure
pub fn branch_of_pair<T: TreeElement, C: Config>(
    e1: T,
    h1: u64,
    e2: T,
    h2: u64,
    lvl: usize,
    gen: &Gen,
) -> Arc<NodeRef<T, C>> {
    Arc::new(NodeRef::alloc(Body {
        gen: gen.clone(),
        mn: pair_main(e1, h1, e2, h2, lvl, gen),
    }))
}

fn pair_main<T: TreeElement, C: Config>(
    e1: T,
    h1: u64,
    e2: T,
    h2: u64,
    lvl: usize,
    gen: &Gen,
) -> MainNode<T, C> {
    match (CNode::<T, C>::flag(h1, lvl), CNode::<T, C>::flag(h2, lvl)) {
        (Some(f1), Some(f2)) if f1 != f2 => {
            // keep the packed array in bit order
            let (la, lb) = if f1 < f2 {
                (Branch::Leaf(e1), Branch::Leaf(e2))
            } else {
                (Branch::Leaf(e2), Branch::Leaf(e1))
            };
            MainNode::Cn(CNode {
                bmp: f1 | f2,
                br: vec![la, lb].into_boxed_slice(),
            })
        }
        (Some(f), Some(_)) => {
            // same slice of the hash: push the split one level down
            MainNode::Cn(CNode {
                bmp: f,
                br: vec![Branch::In(branch_of_pair(
                    e1,
                    h1,
                    e2,
                    h2,
                    lvl + C::BRANCH_LG,
                    gen,
                ))]
                .into_boxed_slice(),
            })
        }
        _ => {
            // ran out of hash bits: a true collision
            let mut list = LNode::new();
            list.push(e1);
            list.push(e2);
            MainNode::Ln(list)
        }
    }
}

impl<T: TreeElement, C: Config> Clone for CNode<T, C> {
    fn clone(&self) -> Self {
        Self {
            bmp: self.bmp,
            br: self.br.iter().cloned().collect(),
        }
    }
}

impl<T: TreeElement, C: Config> Clone for Branch<T, C> {
    fn clone(&self) -> Self {
        match self {
            Self::Leaf(e) => Self::Leaf(e.clone()),
            Self::In(n) => Self::In(Arc::clone(n)),
        }
    }
}

impl<T: TreeElement, C: Config> Clone for MainNode<T, C> {
    fn clone(&self) -> Self {
        match self {
            Self::Cn(cn) => Self::Cn(cn.clone()),
            Self::Tn(t) => Self::Tn(t.clone()),
            Self::Ln(l) => Self::Ln(l.clone()),
        }
    }
}
