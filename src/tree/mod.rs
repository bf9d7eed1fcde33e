/*
 * Created on Sat Feb 17 2024
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

mod access;
mod gen;
pub mod imp;
pub mod iter;
pub mod meta;
mod node;
mod patch;
#[cfg(test)]
mod tests;

use {
    self::{
        access::ReadMode,
        gen::Gen,
        meta::{Comparable, Config, DefConfig, LNode, TreeElement},
        node::{branch_of_pair, Body, Branch, CNode, MainNode, NodeRef},
        patch::{PatchDelta, PatchWrite},
    },
    crate::sync::{atm::Guard, Backoff},
    core::hash::{BuildHasher, Hash, Hasher},
    log::{debug, trace},
    std::sync::Arc,
};

/*
    concurrent trie impl
    ---
    This implementation follows the research by Prokopec et al. on concurrent
    tries with non-blocking snapshots[1], layered on Bagwell's hash array
    mapped tries[2], with implementation ideas from contrie[3] for the epoch
    based reclamation discipline.

    The structure is a 32-way trie keyed by 5-bit slices of a key's 64-bit
    hash. Each position is an indirection node whose body (branch node, tomb
    or collision list, paired with a generation token) is immutable once
    published; mutations allocate a fresh body and swap the pointer. The
    generation token makes the swap a degenerate multi-word CAS: a snapshot is
    nothing but a generation bump on the root, and every writer descending
    from either handle afterwards privately re-tags (and thereby copies) the
    path it is about to touch, so the two handles can never see each other's
    writes.

    Compaction is lazy, in two moves. A node that shrinks to nothing (or to a
    single leaf) commits itself as a tombstone, and only its immediate parent
    absorbs it (clean-after-dive). Anyone who *finds* a tombstone on the way
    down first compresses it into the parent and retries from there
    (clean-before-dive). Neither signal can escape the root because the root
    is always a branch node.

    ---
    References:
    [1]: Aleksandar Prokopec, Nathan Grasso Bronson, Phil Bagwell, and Martin
    Odersky. 2012. Concurrent tries with efficient non-blocking snapshots.
    SIGPLAN Not. 47, 8 (August 2012), 151-160.
    https://doi.org/10.1145/2370036.2145836
    [2]: https://lampwww.epfl.ch/papers/idealhashtrees.pdf
    [3]: https://github.com/vorner/contrie (distributed under the MIT or
    Apache-2.0 license)
    -- Sayan (@ohsayan)
*/

pub struct RawTree<T, C: Config = DefConfig> {
    root: NodeRef<T, C>,
    hs: C::HState,
}

/// How a descent frame reports back to its caller
enum Dive<R> {
    /// the operation resolved
    Done(R),
    /// the operation resolved, but the commit left a tombstone behind that
    /// the parent must now absorb
    DoneTombed(R),
    /// a generation witness failed somewhere below: restart from the root
    GenFail,
    /// a tombstone is sitting at this node: the parent must compress it away
    /// and retry
    CleanParent,
}

impl<T: TreeElement, C: Config> RawTree<T, C> {
    #[inline(always)]
    fn _new(hs: C::HState) -> Self {
        Self {
            root: NodeRef::alloc(Body {
                gen: Gen::mint(),
                mn: MainNode::Cn(CNode::empty()),
            }),
            hs,
        }
    }
    /// An empty tree with a fresh generation
    #[inline(always)]
    pub fn new() -> Self {
        Self::_new(C::HState::default())
    }
    #[inline(always)]
    fn hash<Q>(&self, k: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        let mut state = self.hs.build_hasher();
        k.hash(&mut state);
        state.finish()
    }
    #[inline(always)]
    fn root_gen(&self, g: &Guard) -> Gen {
        unsafe {
            // UNSAFE(@ohsayan): guard-protected load
            self.root.ld(g).deref()
        }
        .gen
        .clone()
    }
}

// the write state machine
impl<T: TreeElement, C: Config> RawTree<T, C> {
    fn patch<'g, P: PatchWrite<T>>(&self, mut patch: P, g: &'g Guard) -> P::Ret<'g> {
        let hash = self.hash(patch.target());
        loop {
            let cgen = self.root_gen(g);
            match self.patch_at(&self.root, hash, C::LEVEL_ZERO, &mut patch, &cgen, g) {
                Dive::Done(ret) => return ret,
                Dive::GenFail => {}
                Dive::DoneTombed(_) | Dive::CleanParent => {
                    unreachable!("logic,compaction signal escaped the root frame")
                }
            }
        }
    }
    fn patch_at<'g, P: PatchWrite<T>>(
        &self,
        i: &NodeRef<T, C>,
        hash: u64,
        lvl: usize,
        patch: &mut P,
        cgen: &Gen,
        g: &'g Guard,
    ) -> Dive<P::Ret<'g>> {
        loop {
            let body = i.ld(g);
            let bref = unsafe {
                // UNSAFE(@ohsayan): guard-protected load
                body.deref()
            };
            if !bref.gen.same(cgen) {
                return Dive::GenFail;
            }
            match &bref.mn {
                MainNode::Tn(_) => return Dive::CleanParent,
                MainNode::Ln(list) => {
                    match list.iter().position(|e| patch.target().cmp_eq(e.key())) {
                        Some(idx) => match patch.ex_apply(&list[idx]) {
                            PatchDelta::Retain => return Dive::Done(P::ex_ret(&list[idx])),
                            PatchDelta::Write(e) => {
                                let mut nl = LNode::new();
                                nl.extend(list[..idx].iter().cloned());
                                nl.extend(list[idx + 1..].iter().cloned());
                                nl.push(e);
                                if i.gcas(body, cgen.clone(), MainNode::Ln(nl), g) {
                                    return Dive::Done(P::ex_ret(&list[idx]));
                                }
                            }
                            PatchDelta::Remove => {
                                let mut nl = LNode::new();
                                nl.extend(
                                    list.iter()
                                        .enumerate()
                                        .filter_map(|(j, e)| (j != idx).then(|| e.clone())),
                                );
                                if nl.len() > 1 {
                                    if i.gcas(body, cgen.clone(), MainNode::Ln(nl), g) {
                                        return Dive::Done(P::ex_ret(&list[idx]));
                                    }
                                } else {
                                    // a collision list that thins out to one
                                    // entry (or none) becomes a tombstone
                                    let mn = MainNode::Tn(nl.iter().next().cloned());
                                    if i.gcas(body, cgen.clone(), mn, g) {
                                        return Dive::DoneTombed(P::ex_ret(&list[idx]));
                                    }
                                }
                            }
                        },
                        None => match patch.nx_apply() {
                            None => return Dive::Done(P::nx_ret()),
                            Some(e) => {
                                let mut nl = LNode::new();
                                nl.extend(list.iter().cloned());
                                nl.push(e);
                                if i.gcas(body, cgen.clone(), MainNode::Ln(nl), g) {
                                    return Dive::Done(P::nx_ret());
                                }
                            }
                        },
                    }
                }
                MainNode::Cn(cn) => {
                    let Some(flag) = CNode::<T, C>::flag(hash, lvl) else {
                        unreachable!("logic,branch node beyond max depth")
                    };
                    if !cn.has(flag) {
                        // empty slot
                        match patch.nx_apply() {
                            None => return Dive::Done(P::nx_ret()),
                            Some(e) => {
                                let ncn = cn.with_inserted(flag, cn.pos(flag), Branch::Leaf(e));
                                if i.gcas(body, cgen.clone(), MainNode::Cn(ncn), g) {
                                    return Dive::Done(P::nx_ret());
                                }
                            }
                        }
                    } else {
                        let pos = cn.pos(flag);
                        match &cn.br[pos] {
                            Branch::Leaf(l) if patch.target().cmp_eq(l.key()) => {
                                match patch.ex_apply(l) {
                                    PatchDelta::Retain => return Dive::Done(P::ex_ret(l)),
                                    PatchDelta::Write(e) => {
                                        let ncn = cn.with_replaced(pos, Branch::Leaf(e));
                                        if i.gcas(body, cgen.clone(), MainNode::Cn(ncn), g) {
                                            return Dive::Done(P::ex_ret(l));
                                        }
                                    }
                                    PatchDelta::Remove => {
                                        let mn = cn.with_removed(flag, pos).contract(lvl);
                                        let tombed = matches!(mn, MainNode::Tn(_));
                                        if i.gcas(body, cgen.clone(), mn, g) {
                                            return if tombed {
                                                Dive::DoneTombed(P::ex_ret(l))
                                            } else {
                                                Dive::Done(P::ex_ret(l))
                                            };
                                        }
                                    }
                                }
                            }
                            Branch::Leaf(l) => {
                                // occupied by a different key: split the slot
                                match patch.nx_apply() {
                                    None => return Dive::Done(P::nx_ret()),
                                    Some(e) => {
                                        let child = branch_of_pair::<T, C>(
                                            l.clone(),
                                            self.hash(l.key()),
                                            e,
                                            hash,
                                            lvl + C::BRANCH_LG,
                                            cgen,
                                        );
                                        let ncn = cn.with_replaced(pos, Branch::In(child));
                                        if i.gcas(body, cgen.clone(), MainNode::Cn(ncn), g) {
                                            return Dive::Done(P::nx_ret());
                                        }
                                    }
                                }
                            }
                            Branch::In(child) => {
                                let cref = unsafe {
                                    // UNSAFE(@ohsayan): guard-protected load
                                    child.ld(g).deref()
                                };
                                if !cref.gen.same(cgen) {
                                    // the child belongs to another lineage:
                                    // privately re-tag it before descending,
                                    // which is what makes forks copy-on-write
                                    let renewed = NodeRef::alloc(Body {
                                        gen: cgen.clone(),
                                        mn: cref.mn.clone(),
                                    });
                                    let ncn =
                                        cn.with_replaced(pos, Branch::In(Arc::new(renewed)));
                                    let _ = i.gcas(body, cgen.clone(), MainNode::Cn(ncn), g);
                                    continue;
                                }
                                match self.patch_at(child, hash, lvl + C::BRANCH_LG, patch, cgen, g)
                                {
                                    Dive::GenFail => return Dive::GenFail,
                                    Dive::CleanParent => {
                                        self.clean(i, lvl, cgen, g);
                                        continue;
                                    }
                                    Dive::DoneTombed(ret) => {
                                        // the child collapsed on commit
                                        self.clean(i, lvl, cgen, g);
                                        return Dive::Done(ret);
                                    }
                                    done => return done,
                                }
                            }
                        }
                    }
                }
            }
            // lost a CAS; reread this node and go again
        }
    }
}

// the read state machine
impl<T: TreeElement, C: Config> RawTree<T, C> {
    fn _lookup<'g, R: ReadMode<T>>(&self, spec: R, g: &'g Guard) -> R::Ret<'g> {
        let hash = self.hash(spec.target());
        loop {
            let cgen = self.root_gen(g);
            match self.lookup_at(&self.root, hash, C::LEVEL_ZERO, &spec, &cgen, g) {
                Dive::Done(ret) => return ret,
                Dive::GenFail => {}
                Dive::DoneTombed(_) | Dive::CleanParent => {
                    unreachable!("logic,compaction signal escaped the root frame")
                }
            }
        }
    }
    fn lookup_at<'g, R: ReadMode<T>>(
        &self,
        i: &NodeRef<T, C>,
        hash: u64,
        lvl: usize,
        spec: &R,
        cgen: &Gen,
        g: &'g Guard,
    ) -> Dive<R::Ret<'g>> {
        loop {
            let body = i.ld(g);
            let bref = unsafe {
                // UNSAFE(@ohsayan): guard-protected load
                body.deref()
            };
            if !bref.gen.same(cgen) {
                return Dive::GenFail;
            }
            match &bref.mn {
                MainNode::Tn(_) => return Dive::CleanParent,
                // a collision list this thin is waiting to be resurrected
                MainNode::Ln(list) if list.len() <= 1 => return Dive::CleanParent,
                MainNode::Ln(list) => {
                    return Dive::Done(
                        match list.iter().find(|e| spec.target().cmp_eq(e.key())) {
                            Some(e) => R::ex(e),
                            None => R::nx(),
                        },
                    )
                }
                MainNode::Cn(cn) => {
                    let Some(flag) = CNode::<T, C>::flag(hash, lvl) else {
                        unreachable!("logic,branch node beyond max depth")
                    };
                    if !cn.has(flag) {
                        return Dive::Done(R::nx());
                    }
                    let pos = cn.pos(flag);
                    match &cn.br[pos] {
                        Branch::Leaf(e) => {
                            return Dive::Done(if spec.target().cmp_eq(e.key()) {
                                R::ex(e)
                            } else {
                                R::nx()
                            })
                        }
                        Branch::In(child) => {
                            let cref = unsafe {
                                // UNSAFE(@ohsayan): guard-protected load
                                child.ld(g).deref()
                            };
                            if !cref.gen.same(cgen) {
                                let renewed = NodeRef::alloc(Body {
                                    gen: cgen.clone(),
                                    mn: cref.mn.clone(),
                                });
                                let ncn = cn.with_replaced(pos, Branch::In(Arc::new(renewed)));
                                let _ = i.gcas(body, cgen.clone(), MainNode::Cn(ncn), g);
                                continue;
                            }
                            match self.lookup_at(child, hash, lvl + C::BRANCH_LG, spec, cgen, g) {
                                Dive::CleanParent => {
                                    self.clean(i, lvl, cgen, g);
                                    continue;
                                }
                                other => return other,
                            }
                        }
                    }
                }
            }
        }
    }
}

// compaction, snapshots and the aggregate state
impl<T: TreeElement, C: Config> RawTree<T, C> {
    /// Compress the branch node at `i`, absorbing any collapsed children. A
    /// lost race simply means another thread already moved this node forward,
    /// so the outcome is only ever observed for diagnostics
    fn clean(&self, i: &NodeRef<T, C>, lvl: usize, cgen: &Gen, g: &Guard) {
        let body = i.ld(g);
        let bref = unsafe {
            // UNSAFE(@ohsayan): guard-protected load
            body.deref()
        };
        if !bref.gen.same(cgen) {
            return;
        }
        if let MainNode::Cn(cn) = &bref.mn {
            if i.gcas(body, cgen.clone(), cn.compress(lvl, g), g) {
                trace!("compressed a branch node at level {lvl}");
            }
        }
    }
    /// Fork off an O(1) copy-on-write snapshot. The source is bumped to a
    /// fresh generation and the fork gets a second fresh one: in-flight
    /// writers that predate the fork fail their witness on either handle and
    /// restart, and later writers regenerate their paths privately
    pub fn snapshot(&self, g: &Guard) -> Self {
        let backoff = Backoff::new();
        loop {
            let body = self.root.ld(g);
            let bref = unsafe {
                // UNSAFE(@ohsayan): guard-protected load
                body.deref()
            };
            if self.root.gcas(body, Gen::mint(), bref.mn.clone(), g) {
                let fork = Gen::mint();
                debug!("snapshot: forked off at {:?}", fork);
                return Self {
                    root: NodeRef::alloc(Body {
                        gen: fork,
                        mn: bref.mn.clone(),
                    }),
                    hs: self.hs.clone(),
                };
            }
            backoff.snooze();
        }
    }
    /// Atomically reset to empty, keeping the current generation
    pub fn clear(&self, g: &Guard) {
        let backoff = Backoff::new();
        loop {
            let body = self.root.ld(g);
            let bref = unsafe {
                // UNSAFE(@ohsayan): guard-protected load
                body.deref()
            };
            if self
                .root
                .gcas(body, bref.gen.clone(), MainNode::Cn(CNode::empty()), g)
            {
                debug!("cleared the tree");
                return;
            }
            backoff.snooze();
        }
    }
    /// Only meaningful in quiescent states; concurrent writers make this a
    /// best-effort answer
    pub fn is_empty(&self, g: &Guard) -> bool {
        let bref = unsafe {
            // UNSAFE(@ohsayan): guard-protected load
            self.root.ld(g).deref()
        };
        extract!(&bref.mn, MainNode::Cn(cn) => cn.bmp == 0)
    }
}

impl<T: TreeElement, C: Config> Default for RawTree<T, C> {
    fn default() -> Self {
        Self::_new(C::HState::default())
    }
}
