/*
 * Created on Sun Feb 18 2024
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
        meta::{Config, DefConfig, LNode, TreeElement},
        node::{Body, Branch, CNode, MainNode, NodeRef},
        Dive, RawTree,
    },
    crate::{
        mem::UArray,
        sync::atm::{Guard, Shared},
    },
    core::marker::PhantomData,
    std::sync::Arc,
};

/*
    Two traversal families live here.

    The lazy iterators walk whatever they find, frame by frame, and make no
    consistency promise beyond "every element observed existed at some point
    while iterating". They read straight through tombstones (a tombed leaf is
    still live data).

    The eager family (rfold and the transforms) carries the descent
    generation like every other operation: stale children are regenerated in
    place, tombstones are compressed into their parent, and the whole walk
    restarts from the root whenever either of those races is lost. That is
    what buys the stronger promise: every live leaf is folded exactly once
    per consistent generation.
*/

// how a fold frame reports back
enum Crawl<A> {
    Acc(A),
    Stop(A),
    Restart,
    CleanParent,
}

impl<T: TreeElement, C: Config> RawTree<T, C> {
    /// Post-order fold over every element, with an optional short-circuit.
    /// Restarts discard the accumulator, hence the `Clone` bound on the seed
    pub(super) fn rfold<'g, A, F, S>(&self, init: A, mut f: F, stop: S, g: &'g Guard) -> A
    where
        A: Clone,
        F: FnMut(&'g T, A) -> A,
        S: Fn(&A) -> bool,
    {
        loop {
            let cgen = self.root_gen(g);
            match self.crawl(&self.root, C::LEVEL_ZERO, init.clone(), &mut f, &stop, &cgen, g) {
                Crawl::Acc(acc) | Crawl::Stop(acc) => return acc,
                Crawl::Restart => {}
                Crawl::CleanParent => {
                    unreachable!("logic,compaction signal escaped the root frame")
                }
            }
        }
    }
    fn crawl<'g, A, F, S>(
        &self,
        i: &NodeRef<T, C>,
        lvl: usize,
        mut acc: A,
        f: &mut F,
        stop: &S,
        cgen: &Gen,
        g: &'g Guard,
    ) -> Crawl<A>
    where
        F: FnMut(&'g T, A) -> A,
        S: Fn(&A) -> bool,
    {
        let mut body = i.ld(g);
        let mut bref = unsafe {
            // UNSAFE(@ohsayan): guard-protected load
            body.deref()
        };
        if !bref.gen.same(cgen) {
            return Crawl::Restart;
        }
        match &bref.mn {
            MainNode::Tn(_) => Crawl::CleanParent,
            MainNode::Ln(list) if list.len() <= 1 => Crawl::CleanParent,
            MainNode::Ln(list) => {
                for e in list.iter().rev() {
                    acc = f(e, acc);
                    if stop(&acc) {
                        return Crawl::Stop(acc);
                    }
                }
                Crawl::Acc(acc)
            }
            MainNode::Cn(_) => {
                let mut cn = extract!(&bref.mn, MainNode::Cn(cn) => cn);
                // right-to-left over the packed array
                let mut pos = cn.br.len();
                while pos > 0 {
                    pos -= 1;
                    match &cn.br[pos] {
                        Branch::Leaf(e) => {
                            acc = f(e, acc);
                            if stop(&acc) {
                                return Crawl::Stop(acc);
                            }
                        }
                        Branch::In(child) => {
                            let cref = unsafe {
                                // UNSAFE(@ohsayan): guard-protected load
                                child.ld(g).deref()
                            };
                            let sub = if !cref.gen.same(cgen) {
                                let renewed = Arc::new(NodeRef::alloc(Body {
                                    gen: cgen.clone(),
                                    mn: cref.mn.clone(),
                                }));
                                let ncn =
                                    cn.with_replaced(pos, Branch::In(Arc::clone(&renewed)));
                                match i.gcas_shared(body, cgen.clone(), MainNode::Cn(ncn), g) {
                                    Some(nbody) => {
                                        // we own the new body; the walk
                                        // resumes on it since only this slot
                                        // changed
                                        body = nbody;
                                        bref = unsafe {
                                            // UNSAFE(@ohsayan): fresh commit
                                            body.deref()
                                        };
                                        cn = extract!(&bref.mn, MainNode::Cn(cn) => cn);
                                        self.crawl(
                                            &renewed,
                                            lvl + C::BRANCH_LG,
                                            acc,
                                            f,
                                            stop,
                                            cgen,
                                            g,
                                        )
                                    }
                                    None => return Crawl::Restart,
                                }
                            } else {
                                self.crawl(child, lvl + C::BRANCH_LG, acc, f, stop, cgen, g)
                            };
                            match sub {
                                Crawl::Acc(a) => acc = a,
                                Crawl::Stop(a) => return Crawl::Stop(a),
                                Crawl::Restart => return Crawl::Restart,
                                Crawl::CleanParent => {
                                    self.clean(i, lvl, cgen, g);
                                    return Crawl::Restart;
                                }
                            }
                        }
                    }
                }
                Crawl::Acc(acc)
            }
        }
    }
}

impl<T: TreeElement, C: Config> RawTree<T, C> {
    /// Map every element into a fresh tree. The walk runs over a private
    /// fork, so the result is exactly the source as of the fork point and the
    /// source itself is never perturbed
    pub fn transform<'g, E2, F>(&self, f: F, g: &'g Guard) -> RawTree<E2, C>
    where
        E2: TreeElement<Key = T::Key>,
        F: Fn(&T::Key, &T::Value) -> E2::Value,
    {
        let snap = self.snapshot(g);
        let gen = Gen::mint();
        let bref = unsafe {
            // UNSAFE(@ohsayan): guard-protected load
            snap.root.ld(g).deref()
        };
        let mn = Self::transform_mn(&bref.mn, &f, &gen, C::LEVEL_ZERO, g);
        RawTree {
            root: NodeRef::alloc(Body { gen, mn }),
            hs: self.hs.clone(),
        }
    }
    fn transform_mn<'g, E2, F>(
        mn: &MainNode<T, C>,
        f: &F,
        gen: &Gen,
        lvl: usize,
        g: &'g Guard,
    ) -> MainNode<E2, C>
    where
        E2: TreeElement<Key = T::Key>,
        F: Fn(&T::Key, &T::Value) -> E2::Value,
    {
        let tx = |e: &T| E2::new(e.key().clone(), f(e.key(), e.val()));
        match mn {
            MainNode::Cn(cn) => {
                let mut bmp = cn.bmp;
                let mut br: Vec<Branch<E2, C>> = Vec::with_capacity(cn.br.len());
                let mut rem = cn.bmp;
                let mut idx = 0;
                while rem != 0 {
                    let flag = rem & rem.wrapping_neg();
                    match &cn.br[idx] {
                        Branch::Leaf(e) => br.push(Branch::Leaf(tx(e))),
                        Branch::In(child) => {
                            let cref = unsafe {
                                // UNSAFE(@ohsayan): guard-protected load
                                child.ld(g).deref()
                            };
                            match Self::transform_mn(&cref.mn, f, gen, lvl + C::BRANCH_LG, g) {
                                // collapsed structure is compacted on the way
                                // out instead of being copied over
                                MainNode::Tn(None) => bmp &= !flag,
                                MainNode::Tn(Some(l)) => br.push(Branch::Leaf(l)),
                                sub => br.push(Branch::In(Arc::new(NodeRef::alloc(Body {
                                    gen: gen.clone(),
                                    mn: sub,
                                })))),
                            }
                        }
                    }
                    rem ^= flag;
                    idx += 1;
                }
                CNode {
                    bmp,
                    br: br.into_boxed_slice(),
                }
                .contract(lvl)
            }
            MainNode::Tn(None) => MainNode::Tn(None),
            MainNode::Tn(Some(e)) => MainNode::Tn(Some(tx(e))),
            MainNode::Ln(list) => match list.len() {
                0 => MainNode::Tn(None),
                1 => MainNode::Tn(Some(tx(&list[0]))),
                _ => MainNode::Ln(list.iter().map(tx).collect()),
            },
        }
    }
    /// In-place filter-map: one fused descent that rewrites every leaf,
    /// drops the dead slots and contracts on the way back up. The transform
    /// may be replayed on input it has already seen if a commit is lost to a
    /// contending writer, so it must be pure
    pub fn retain_map<F>(&self, f: F, g: &Guard)
    where
        F: Fn(&T::Key, &T::Value) -> Option<T::Value>,
    {
        loop {
            let cgen = self.root_gen(g);
            match self.retain_at(&self.root, C::LEVEL_ZERO, &f, &cgen, g) {
                Dive::Done(()) => return,
                Dive::GenFail => {}
                Dive::DoneTombed(()) | Dive::CleanParent => {
                    unreachable!("logic,compaction signal escaped the root frame")
                }
            }
        }
    }
    fn retain_at<F>(
        &self,
        i: &NodeRef<T, C>,
        lvl: usize,
        f: &F,
        cgen: &Gen,
        g: &Guard,
    ) -> Dive<()>
    where
        F: Fn(&T::Key, &T::Value) -> Option<T::Value>,
    {
        'here: loop {
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
                    let mut nl = LNode::new();
                    for e in list.iter() {
                        if let Some(v) = f(e.key(), e.val()) {
                            nl.push(T::new(e.key().clone(), v));
                        }
                    }
                    if nl.len() > 1 {
                        if i.gcas(body, cgen.clone(), MainNode::Ln(nl), g) {
                            return Dive::Done(());
                        }
                    } else {
                        let mn = MainNode::Tn(nl.iter().next().cloned());
                        if i.gcas(body, cgen.clone(), mn, g) {
                            return Dive::DoneTombed(());
                        }
                    }
                }
                MainNode::Cn(cn) => {
                    // regenerate every stale child up front: a replay of this
                    // frame must only ever see untouched input
                    let mut regen = None;
                    for (pos, branch) in cn.br.iter().enumerate() {
                        if let Branch::In(child) = branch {
                            let cref = unsafe {
                                // UNSAFE(@ohsayan): guard-protected load
                                child.ld(g).deref()
                            };
                            if !cref.gen.same(cgen) {
                                regen = Some((pos, cref.mn.clone()));
                                break;
                            }
                        }
                    }
                    if let Some((pos, mn)) = regen {
                        let renewed = NodeRef::alloc(Body {
                            gen: cgen.clone(),
                            mn,
                        });
                        let ncn = cn.with_replaced(pos, Branch::In(Arc::new(renewed)));
                        let _ = i.gcas(body, cgen.clone(), MainNode::Cn(ncn), g);
                        continue 'here;
                    }
                    // rewrite children bottom-up, absorb whatever collapsed,
                    // then commit this node in one swap
                    let mut bmp = cn.bmp;
                    let mut br: Vec<Branch<T, C>> = Vec::with_capacity(cn.br.len());
                    let mut rem = cn.bmp;
                    let mut idx = 0;
                    while rem != 0 {
                        let flag = rem & rem.wrapping_neg();
                        match &cn.br[idx] {
                            Branch::Leaf(e) => match f(e.key(), e.val()) {
                                Some(v) => br.push(Branch::Leaf(T::new(e.key().clone(), v))),
                                None => bmp &= !flag,
                            },
                            Branch::In(child) => {
                                let cref = unsafe {
                                    // UNSAFE(@ohsayan): guard-protected load
                                    child.ld(g).deref()
                                };
                                match &cref.mn {
                                    // collapsed before we arrived: untouched
                                    // data, so the transform applies here
                                    MainNode::Tn(None) => bmp &= !flag,
                                    MainNode::Tn(Some(e)) => match f(e.key(), e.val()) {
                                        Some(v) => {
                                            br.push(Branch::Leaf(T::new(e.key().clone(), v)))
                                        }
                                        None => bmp &= !flag,
                                    },
                                    MainNode::Ln(list) if list.len() <= 1 => {
                                        match list.iter().next() {
                                            None => bmp &= !flag,
                                            Some(e) => match f(e.key(), e.val()) {
                                                Some(v) => br.push(Branch::Leaf(T::new(
                                                    e.key().clone(),
                                                    v,
                                                ))),
                                                None => bmp &= !flag,
                                            },
                                        }
                                    }
                                    _ => match self.retain_at(child, lvl + C::BRANCH_LG, f, cgen, g)
                                    {
                                        Dive::GenFail => return Dive::GenFail,
                                        Dive::CleanParent => {
                                            self.clean(i, lvl, cgen, g);
                                            continue 'here;
                                        }
                                        Dive::DoneTombed(()) => {
                                            // collapsed under the transform:
                                            // its remains are already
                                            // rewritten, absorb them as they
                                            // are
                                            let cref = unsafe {
                                                // UNSAFE(@ohsayan): guard-protected load
                                                child.ld(g).deref()
                                            };
                                            match &cref.mn {
                                                MainNode::Tn(None) => bmp &= !flag,
                                                MainNode::Tn(Some(e)) => {
                                                    br.push(Branch::Leaf(e.clone()))
                                                }
                                                // someone swapped it again in
                                                // the meantime; keep the
                                                // branch and let them win
                                                _ => br.push(Branch::In(Arc::clone(child))),
                                            }
                                        }
                                        Dive::Done(()) => br.push(Branch::In(Arc::clone(child))),
                                    },
                                }
                            }
                        }
                        rem ^= flag;
                        idx += 1;
                    }
                    let mn = CNode {
                        bmp,
                        br: br.into_boxed_slice(),
                    }
                    .contract(lvl);
                    let tombed = matches!(mn, MainNode::Tn(_));
                    if i.gcas(body, cgen.clone(), mn, g) {
                        return if tombed {
                            Dive::DoneTombed(())
                        } else {
                            Dive::Done(())
                        };
                    }
                }
            }
            // lost a CAS; reread this node and go again
        }
    }
}

/*
    lazy iterators
*/

pub struct IterKV<'t, 'g, 'v, T, C>
where
    't: 'v,
    'g: 'v + 't,
    C: Config,
    T: TreeElement,
{
    i: RawIter<'t, 'g, 'v, T, C, CfgIterKV>,
}

impl<'t, 'g, 'v, T, C> IterKV<'t, 'g, 'v, T, C>
where
    't: 'v,
    'g: 'v + 't,
    T: TreeElement,
    C: Config,
{
    pub fn new(t: &'t RawTree<T, C>, g: &'g Guard) -> Self {
        Self {
            i: RawIter::new(t, g),
        }
    }
}

impl<'t, 'g, 'v, T, C> Iterator for IterKV<'t, 'g, 'v, T, C>
where
    't: 'v,
    'g: 'v + 't,
    C: Config,
    T: TreeElement,
{
    type Item = (&'v T::Key, &'v T::Value);

    fn next(&mut self) -> Option<Self::Item> {
        self.i.next()
    }
}

pub struct IterKey<'t, 'g, 'v, T, C>
where
    't: 'v,
    'g: 'v + 't,
    C: Config,
    T: TreeElement,
{
    i: RawIter<'t, 'g, 'v, T, C, CfgIterKey>,
}

impl<'t, 'g, 'v, T, C> IterKey<'t, 'g, 'v, T, C>
where
    't: 'v,
    'g: 'v + 't,
    T: TreeElement,
    C: Config,
{
    pub fn new(t: &'t RawTree<T, C>, g: &'g Guard) -> Self {
        Self {
            i: RawIter::new(t, g),
        }
    }
}

impl<'t, 'g, 'v, T, C> Iterator for IterKey<'t, 'g, 'v, T, C>
where
    't: 'v,
    'g: 'v + 't,
    C: Config,
    T: TreeElement,
{
    type Item = &'v T::Key;

    fn next(&mut self) -> Option<Self::Item> {
        self.i.next()
    }
}

pub struct IterVal<'t, 'g, 'v, T, C>
where
    't: 'v,
    'g: 'v + 't,
    C: Config,
    T: TreeElement,
{
    i: RawIter<'t, 'g, 'v, T, C, CfgIterVal>,
}

impl<'t, 'g, 'v, T, C> IterVal<'t, 'g, 'v, T, C>
where
    't: 'v,
    'g: 'v + 't,
    T: TreeElement,
    C: Config,
{
    pub fn new(t: &'t RawTree<T, C>, g: &'g Guard) -> Self {
        Self {
            i: RawIter::new(t, g),
        }
    }
}

impl<'t, 'g, 'v, T, C> Iterator for IterVal<'t, 'g, 'v, T, C>
where
    't: 'v,
    'g: 'v + 't,
    C: Config,
    T: TreeElement,
{
    type Item = &'v T::Value;

    fn next(&mut self) -> Option<Self::Item> {
        self.i.next()
    }
}

trait IterConfig<T> {
    type Ret<'a>
    where
        T: 'a;
    fn some<'a>(v: &'a T) -> Option<Self::Ret<'a>>;
}

struct CfgIterKV;
impl<T: TreeElement> IterConfig<T> for CfgIterKV {
    type Ret<'a> = (&'a T::Key, &'a T::Value) where T: 'a;
    fn some<'a>(v: &'a T) -> Option<Self::Ret<'a>> {
        Some((v.key(), v.val()))
    }
}

struct CfgIterKey;
impl<T: TreeElement> IterConfig<T> for CfgIterKey {
    type Ret<'a> = &'a T::Key where T: 'a;
    fn some<'a>(v: &'a T) -> Option<Self::Ret<'a>> {
        Some(v.key())
    }
}

struct CfgIterVal;
impl<T: TreeElement> IterConfig<T> for CfgIterVal {
    type Ret<'a> = &'a T::Value where T: 'a;
    fn some<'a>(v: &'a T) -> Option<Self::Ret<'a>> {
        Some(v.val())
    }
}

struct DFSNodeCtx<'g, T, C: Config> {
    body: Shared<'g, Body<T, C>>,
    idx: usize,
}

struct RawIter<'t, 'g, 'v, T, C, I>
where
    't: 'v,
    'g: 'v + 't,
    I: IterConfig<T>,
    C: Config,
{
    g: &'g Guard,
    stack: UArray<{ <DefConfig as Config>::BRANCH_MX + 1 }, DFSNodeCtx<'g, T, C>>,
    _m: PhantomData<(&'v T, C, &'t RawTree<T, C>, I)>,
}

impl<'t, 'g, 'v, T, C, I> RawIter<'t, 'g, 'v, T, C, I>
where
    't: 'v,
    'g: 'v + 't,
    T: TreeElement,
    I: IterConfig<T>,
    C: Config,
{
    fn new(tree: &'t RawTree<T, C>, g: &'g Guard) -> Self {
        let mut stack = UArray::new();
        let body = tree.root.ld(g);
        stack.push(DFSNodeCtx { body, idx: 0 });
        Self {
            g,
            stack,
            _m: PhantomData,
        }
    }
    /// depth-first search the tree
    fn _next(&mut self) -> Option<I::Ret<'v>>
    where
        'g: 'v,
    {
        while !self.stack.is_empty() {
            let l = self.stack.len() - 1;
            let current = &mut self.stack[l];
            let bref = unsafe {
                // UNSAFE(@ohsayan): guard-protected load
                current.body.deref()
            };
            match &bref.mn {
                MainNode::Cn(cn) => {
                    if current.idx < cn.br.len() {
                        let i = current.idx;
                        current.idx += 1;
                        match &cn.br[i] {
                            Branch::Leaf(e) => return I::some(e),
                            Branch::In(child) => {
                                let body = child.ld(self.g);
                                self.stack.push(DFSNodeCtx { body, idx: 0 });
                            }
                        }
                    } else {
                        self.stack.pop();
                    }
                }
                MainNode::Ln(list) => {
                    if current.idx < list.len() {
                        let e = &list[current.idx];
                        current.idx += 1;
                        return I::some(e);
                    } else {
                        self.stack.pop();
                    }
                }
                MainNode::Tn(tomb) => {
                    // a tombed leaf is still live data
                    if current.idx == 0 {
                        current.idx = 1;
                        if let Some(e) = tomb {
                            return I::some(e);
                        }
                    } else {
                        self.stack.pop();
                    }
                }
            }
        }
        None
    }
}

impl<'t, 'g, 'v, T, C, I> Iterator for RawIter<'t, 'g, 'v, T, C, I>
where
    't: 'v,
    'g: 'v + 't,
    T: TreeElement,
    I: IterConfig<T>,
    C: Config,
{
    type Item = I::Ret<'v>;

    fn next(&mut self) -> Option<Self::Item> {
        self._next()
    }
}
