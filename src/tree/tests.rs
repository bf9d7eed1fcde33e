/*
 * Created on Tue Feb 20 2024
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
        imp::{TrieArc, TrieCopy},
        meta::{Config, Key, PreConfig, TreeElement, Value},
        node::{Branch, CNode, MainNode},
        RawTree,
    },
    crate::{
        error::Error,
        sync::atm::{cpin, Guard},
    },
    std::{
        collections::BTreeMap,
        hash::{BuildHasher, Hasher},
        sync::{Arc, RwLock},
        thread::{self, JoinHandle},
    },
};

type Chm<K, V> = TrieCopy<K, V>;
type Collider<K, V> = TrieCopy<K, V, ColliderConfig>;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A hasher to create collisions on purpose, turning the trie into a
/// glorified list at max depth
struct LolHash {
    seed: usize,
}

impl LolHash {
    const fn with_seed(seed: usize) -> Self {
        Self { seed }
    }
}

impl Hasher for LolHash {
    fn finish(&self) -> u64 {
        self.seed as _
    }
    fn write(&mut self, _: &[u8]) {}
}

#[derive(Clone)]
struct LolState {
    seed: usize,
}

impl BuildHasher for LolState {
    type Hasher = LolHash;
    fn build_hasher(&self) -> Self::Hasher {
        LolHash::with_seed(self.seed)
    }
}

impl Default for LolState {
    fn default() -> Self {
        Self { seed: 0 }
    }
}

struct ColliderConfig;
impl PreConfig for ColliderConfig {
    type HState = LolState;
    const BITS: u32 = u32::BITS;
}

/*
    glass-box structure audit
*/

#[derive(Default, Debug)]
struct Audit {
    leaves: usize,
    cnodes: usize,
    lnodes: usize,
    tombs: usize,
}

fn audit<T: TreeElement, C: Config>(t: &RawTree<T, C>) -> Audit {
    let g = cpin();
    let mut a = Audit::default();
    let bref = unsafe {
        // UNSAFE(@ohsayan): guard-protected load
        t.root.ld(&g).deref()
    };
    match &bref.mn {
        MainNode::Cn(cn) => audit_cn(t, cn, C::LEVEL_ZERO, &mut a, &g),
        _ => panic!("root must be a branch node"),
    }
    a
}

fn audit_cn<T: TreeElement, C: Config>(
    t: &RawTree<T, C>,
    cn: &CNode<T, C>,
    lvl: usize,
    a: &mut Audit,
    g: &Guard,
) {
    a.cnodes += 1;
    assert_eq!(
        cn.bmp.count_ones() as usize,
        cn.br.len(),
        "bitmap arity mismatch"
    );
    let mut rem = cn.bmp;
    let mut idx = 0;
    while rem != 0 {
        let flag = rem & rem.wrapping_neg();
        let slot = flag.trailing_zeros() as u64;
        match &cn.br[idx] {
            Branch::Leaf(e) => {
                a.leaves += 1;
                assert_eq!(
                    (t.hash(e.key()) >> lvl) & <C as Config>::MASK,
                    slot,
                    "leaf filed under the wrong slot"
                );
            }
            Branch::In(child) => {
                let cref = unsafe {
                    // UNSAFE(@ohsayan): guard-protected load
                    child.ld(g).deref()
                };
                match &cref.mn {
                    MainNode::Cn(sub) => audit_cn(t, sub, lvl + C::BRANCH_LG, a, g),
                    MainNode::Tn(tomb) => {
                        a.tombs += 1;
                        a.leaves += tomb.is_some() as usize;
                    }
                    MainNode::Ln(list) => {
                        a.lnodes += 1;
                        assert!(
                            lvl + C::BRANCH_LG >= C::MAX_TREE_HEIGHT_UB,
                            "collision list above max depth"
                        );
                        a.leaves += list.len();
                    }
                }
            }
        }
        rem ^= flag;
        idx += 1;
    }
}

fn contents<K: Key + Ord, V: Value, C: Config>(t: &TrieCopy<K, V, C>, g: &Guard) -> BTreeMap<K, V> {
    t.fold(
        BTreeMap::new(),
        |k, v, mut acc| {
            assert!(acc.insert(k.clone(), v.clone()).is_none(), "duplicate key");
            acc
        },
        g,
    )
}

/*
    consts
*/

#[test]
fn consts_consistent() {
    type D = super::meta::DefConfig;
    multi_assert_eq!(<D as Config>::BRANCH_MX => 32);
    multi_assert_eq!(<D as Config>::BRANCH_LG => 5);
    multi_assert_eq!(<D as Config>::MASK => 0x1f);
    multi_assert_eq!(<D as Config>::MAX_TREE_HEIGHT_UB => 64);
}

/*
    empty state
*/

#[test]
fn drop_empty() {
    let idx = Chm::<u8, u8>::new();
    drop(idx);
}

#[test]
fn get_empty() {
    let idx = Chm::<u8, u8>::new();
    assert!(idx.get(&10, &cpin()).is_none());
}

#[test]
fn update_empty() {
    let idx = Chm::<u8, u8>::new();
    assert!(!idx.update(10, 20, &cpin()));
}

#[test]
fn remove_empty() {
    let idx = Chm::<u8, u8>::new();
    assert!(!idx.remove(&10, &cpin()));
}

#[test]
fn empty_is_empty() {
    let g = cpin();
    let idx = Chm::<u8, u8>::new();
    assert!(idx.is_empty(&g));
    assert_eq!(idx.len(&g), 0);
}

/*
    single threaded crud
*/

#[test]
fn basic_crud() {
    let g = cpin();
    let t: Chm<String, u64> = Chm::new();
    t.insert("a".to_owned(), 1, &g);
    t.insert("b".to_owned(), 2, &g);
    assert_eq!(t.get("a", &g), Some(&1));
    assert_eq!(t.get("b", &g), Some(&2));
    assert_eq!(t.get("c", &g), None);
    assert_eq!(t.get_cloned("a", &g), Some(1));
    assert_eq!(t.len(&g), 2);
    let a = audit(&t);
    assert_eq!(a.leaves, 2);
}

#[test]
fn for_each_visits_everything() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..64u64).for_each(|k| t.insert(k, k, &g));
    let mut seen = 0u64;
    let mut total = 0u64;
    t.for_each(
        |_, v| {
            seen += 1;
            total += *v;
        },
        &g,
    );
    assert_eq!(seen, 64);
    assert_eq!(total, (0..64u64).sum::<u64>());
}

#[test]
fn overwrite_keeps_one_entry() {
    let g = cpin();
    let t: Chm<String, u64> = Chm::new();
    t.insert("a".to_owned(), 1, &g);
    t.insert("a".to_owned(), 2, &g);
    assert_eq!(t.get("a", &g), Some(&2));
    assert_eq!(t.len(&g), 1);
}

#[test]
fn find_reports_missing_keys() {
    let g = cpin();
    let t: Chm<String, u64> = Chm::new();
    t.insert("a".to_owned(), 1, &g);
    assert_eq!(t.find("a", &g), Ok(&1));
    assert_eq!(t.find("b", &g), Err(Error::KeyNotFound));
}

#[test]
fn try_insert_respects_uniqueness() {
    let g = cpin();
    let t: Chm<String, u64> = Chm::new();
    assert!(t.try_insert("a".to_owned(), 1, &g));
    assert!(!t.try_insert("a".to_owned(), 2, &g));
    assert_eq!(t.get("a", &g), Some(&1));
}

#[test]
fn update_return_hands_back_displaced() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    t.insert(1, 10, &g);
    assert_eq!(t.update_return(1, 20, &g), Some(&10));
    assert_eq!(t.update_return(2, 30, &g), None);
    assert_eq!(t.get(&1, &g), Some(&20));
    assert!(!t.contains_key(&2, &g));
}

#[test]
fn remove_return_hands_back_removed() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    t.insert(1, 10, &g);
    assert_eq!(t.remove_return(&1, &g), Some(&10));
    assert_eq!(t.remove_return(&1, &g), None);
}

#[test]
fn add_remove_roundtrip() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    t.insert(7, 1, &g);
    assert!(t.remove(&7, &g));
    assert!(!t.contains_key(&7, &g));
    // removing twice is a no-op beyond the first
    assert!(!t.remove(&7, &g));
    assert_eq!(t.len(&g), 0);
}

#[test]
fn contraction_after_remove() {
    let g = cpin();
    let t: Chm<String, u64> = Chm::new();
    t.insert("a".to_owned(), 1, &g);
    t.insert("b".to_owned(), 2, &g);
    assert!(t.remove("a", &g));
    assert_eq!(t.len(&g), 1);
    assert_eq!(t.get("b", &g), Some(&2));
    // the fold above drained any residual tombstones on its way through
    let a = audit(&t);
    assert_eq!(a.tombs, 0);
    assert_eq!(a.leaves, 1);
}

#[test]
fn spread_and_shrink() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..512u64).for_each(|k| t.insert(k, k * 2, &g));
    assert_eq!(t.len(&g), 512);
    (0..512u64).for_each(|k| assert_eq!(t.get(&k, &g), Some(&(k * 2))));
    (0..256u64).for_each(|k| assert!(t.remove(&k, &g)));
    assert_eq!(t.len(&g), 256);
    (256..512u64).for_each(|k| assert_eq!(t.get(&k, &g), Some(&(k * 2))));
    let a = audit(&t);
    assert_eq!(a.leaves, 256);
    assert_eq!(a.tombs, 0);
}

#[test]
fn clear_resets() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..64u64).for_each(|k| t.insert(k, k, &g));
    t.clear(&g);
    assert!(t.is_empty(&g));
    assert_eq!(t.len(&g), 0);
    // still usable afterwards
    t.insert(1, 1, &g);
    assert_eq!(t.len(&g), 1);
}

/*
    the unified mutator
*/

#[test]
fn update_with_inserts_updates_deletes() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    // None -> Some: insert
    t.update_with(1, |v| {
        assert!(v.is_none());
        Some(10)
    }, &g);
    assert_eq!(t.get(&1, &g), Some(&10));
    // Some -> Some: update
    t.update_with(1, |v| v.map(|v| v + 1), &g);
    assert_eq!(t.get(&1, &g), Some(&11));
    // Some -> None: delete
    t.update_with(1, |_| None, &g);
    assert!(!t.contains_key(&1, &g));
    // None -> None: no-op
    t.update_with(2, |_| None, &g);
    assert!(t.is_empty(&g));
}

/*
    full hash collisions
*/

#[test]
fn collision_forms_a_list_at_max_depth() {
    let g = cpin();
    let t: Collider<String, u64> = Collider::new();
    t.insert("x".to_owned(), 1, &g);
    t.insert("y".to_owned(), 2, &g);
    assert_eq!(t.get("x", &g), Some(&1));
    assert_eq!(t.get("y", &g), Some(&2));
    let a = audit(&t);
    assert_eq!(a.lnodes, 1);
    assert_eq!(a.leaves, 2);
    // root plus one single-slot branch node per remaining hash slice
    assert_eq!(a.cnodes, 13);
}

#[test]
fn collision_removal_resurrects_the_survivor() {
    let g = cpin();
    let t: Collider<String, u64> = Collider::new();
    t.insert("x".to_owned(), 1, &g);
    t.insert("y".to_owned(), 2, &g);
    assert!(t.remove("x", &g));
    assert_eq!(t.get("x", &g), None);
    assert_eq!(t.get("y", &g), Some(&2));
    assert_eq!(t.len(&g), 1);
    let a = audit(&t);
    assert_eq!(a.lnodes, 0);
    assert_eq!(a.tombs, 0);
    assert_eq!(a.leaves, 1);
}

#[test]
fn collision_trio() {
    let g = cpin();
    let t: Collider<String, u64> = Collider::new();
    t.insert("x".to_owned(), 1, &g);
    t.insert("y".to_owned(), 2, &g);
    t.insert("z".to_owned(), 3, &g);
    assert_eq!(t.len(&g), 3);
    assert!(t.remove("y", &g));
    assert_eq!(t.get("x", &g), Some(&1));
    assert_eq!(t.get("z", &g), Some(&3));
    assert_eq!(t.len(&g), 2);
    let a = audit(&t);
    assert_eq!(a.lnodes, 1);
    assert_eq!(a.leaves, 2);
}

/*
    snapshots
*/

#[test]
fn snapshot_sees_the_fork_point() {
    init_log();
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..5u64).for_each(|k| t.insert(k, k, &g));
    let t2 = t.snapshot(&g);
    assert!(t2.remove(&3, &g));
    assert!(t.contains_key(&3, &g));
    assert!(!t2.contains_key(&3, &g));
    assert_eq!(t.len(&g), 5);
    assert_eq!(t2.len(&g), 4);
}

#[test]
fn snapshot_isolation_both_directions() {
    let g = cpin();
    let t: Chm<String, u64> = Chm::new();
    t.insert("a".to_owned(), 1, &g);
    let t2 = t.snapshot(&g);
    t.insert("b".to_owned(), 2, &g);
    t2.insert("c".to_owned(), 3, &g);
    assert_eq!(contents(&t, &g).into_iter().collect::<Vec<_>>(), vec![
        ("a".to_owned(), 1),
        ("b".to_owned(), 2)
    ]);
    assert_eq!(contents(&t2, &g).into_iter().collect::<Vec<_>>(), vec![
        ("a".to_owned(), 1),
        ("c".to_owned(), 3)
    ]);
}

#[test]
fn snapshot_isolation_under_total_collision() {
    // the adversarial case: every key hashes to zero, so a write on the fork
    // must regenerate the entire spine down to the collision list without
    // ever touching the source's nodes
    let g = cpin();
    let t: Collider<String, u64> = Collider::new();
    t.insert("x".to_owned(), 1, &g);
    let t2 = t.snapshot(&g);
    // mutate the fork through the pair-construction path
    t2.insert("y".to_owned(), 2, &g);
    assert!(!t.contains_key("y", &g), "fork write leaked into the source");
    assert_eq!(t.len(&g), 1);
    assert_eq!(t2.len(&g), 2);
    // and the other direction
    t.insert("z".to_owned(), 3, &g);
    assert!(!t2.contains_key("z", &g), "source write leaked into the fork");
    assert_eq!(t2.len(&g), 2);
    // removal through the collision list on the fork
    assert!(t2.remove("x", &g));
    assert_eq!(t.get("x", &g), Some(&1), "fork removal leaked into the source");
}

#[test]
fn snapshot_of_snapshot() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..32u64).for_each(|k| t.insert(k, k, &g));
    let t2 = t.snapshot(&g);
    t2.insert(100, 100, &g);
    let t3 = t2.snapshot(&g);
    t3.remove(&0, &g);
    assert_eq!(t.len(&g), 32);
    assert_eq!(t2.len(&g), 33);
    assert_eq!(t3.len(&g), 32);
    assert!(t3.contains_key(&100, &g));
    assert!(!t3.contains_key(&0, &g));
}

/*
    bulk traversal
*/

#[test]
fn fold_sums() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (1..=10u64).for_each(|k| t.insert(k, k, &g));
    let sum = t.fold(0u64, |_, v, acc| acc + v, &g);
    assert_eq!(sum, 55);
}

#[test]
fn exists_short_circuits() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..100u64).for_each(|k| t.insert(k, k, &g));
    assert!(t.exists(|_, v| *v == 50, &g));
    assert!(!t.exists(|_, v| *v == 1000, &g));
    assert!(t.for_all(|_, v| *v < 100, &g));
    assert!(!t.for_all(|_, v| *v < 50, &g));
}

#[test]
fn reduce_stops_at_the_mark() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..1000u64).for_each(|k| t.insert(k, k, &g));
    // stop after ten elements: the accumulator must never overshoot by more
    // than the element that tripped the stop
    let n = t.reduce(0usize, |_, _, acc| acc + 1, |acc| *acc >= 10, &g);
    assert_eq!(n, 10);
}

#[test]
fn iterators_walk_everything() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..128u64).for_each(|k| t.insert(k, k + 1, &g));
    assert_eq!(t.iter_kv(&g).count(), 128);
    let mut keys: Vec<u64> = t.iter_key(&g).copied().collect();
    keys.sort_unstable();
    assert_eq!(keys, (0..128u64).collect::<Vec<_>>());
    let total: u64 = t.iter_val(&g).copied().sum();
    assert_eq!(total, (1..=128u64).sum::<u64>());
}

#[test]
fn transform_builds_an_independent_tree() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..64u64).for_each(|k| t.insert(k, k, &g));
    let doubled: Chm<u64, u64> = t.transform(|_, v| v * 2, &g);
    assert_eq!(doubled.len(&g), 64);
    (0..64u64).for_each(|k| assert_eq!(doubled.get(&k, &g), Some(&(k * 2))));
    // the source is untouched
    (0..64u64).for_each(|k| assert_eq!(t.get(&k, &g), Some(&k)));
    // and the two are independent from here on
    doubled.remove(&0, &g);
    assert!(t.contains_key(&0, &g));
}

#[test]
fn transform_respects_identity_and_composition() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..32u64).for_each(|k| t.insert(k, k + 7, &g));
    let id: Chm<u64, u64> = t.transform(|_, v| *v, &g);
    assert_eq!(contents(&t, &g), contents(&id, &g));
    let f = |v: u64| v * 3;
    let gg = |v: u64| v + 1;
    let fused: Chm<u64, u64> = t.transform(|_, v| f(gg(*v)), &g);
    let staged_mid: Chm<u64, u64> = t.transform(|_, v| gg(*v), &g);
    let staged: Chm<u64, u64> = staged_mid.transform(|_, v| f(*v), &g);
    assert_eq!(contents(&fused, &g), contents(&staged, &g));
}

#[test]
fn transform_can_change_the_value_type() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..16u64).for_each(|k| t.insert(k, k, &g));
    let strings: Chm<u64, String> = t.transform(|_, v| format!("v{v}"), &g);
    assert_eq!(strings.get(&3, &g), Some(&"v3".to_owned()));
    assert_eq!(strings.len(&g), 16);
}

#[test]
fn retain_map_filters_and_rewrites() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..100u64).for_each(|k| t.insert(k, k, &g));
    // drop the odd values, halve the even ones
    t.retain_map(|_, v| (v % 2 == 0).then(|| v / 2), &g);
    assert_eq!(t.len(&g), 50);
    (0..100u64).for_each(|k| {
        if k % 2 == 0 {
            assert_eq!(t.get(&k, &g), Some(&(k / 2)));
        } else {
            assert!(!t.contains_key(&k, &g));
        }
    });
    let a = audit(&t);
    assert_eq!(a.leaves, 50);
    assert_eq!(a.tombs, 0);
}

#[test]
fn retain_map_none_empties_the_tree() {
    let g = cpin();
    let t: Chm<u64, u64> = Chm::new();
    (0..64u64).for_each(|k| t.insert(k, k, &g));
    t.retain_map(|_, _| None, &g);
    assert!(t.is_empty(&g));
    assert_eq!(t.len(&g), 0);
}

#[test]
fn retain_map_through_collisions() {
    let g = cpin();
    let t: Collider<String, u64> = Collider::new();
    t.insert("x".to_owned(), 1, &g);
    t.insert("y".to_owned(), 2, &g);
    t.insert("z".to_owned(), 3, &g);
    t.retain_map(|_, v| (*v != 2).then(|| v * 10), &g);
    assert_eq!(t.get("x", &g), Some(&10));
    assert_eq!(t.get("y", &g), None);
    assert_eq!(t.get("z", &g), Some(&30));
    assert_eq!(t.len(&g), 2);
}

/*
    std trait plumbing
*/

#[test]
fn from_iterator_and_debug() {
    let t: Chm<u64, u64> = (0..4u64).map(|k| (k, k)).collect();
    let g = cpin();
    assert_eq!(t.len(&g), 4);
    let rendered = format!("{t:?}");
    assert!(rendered.starts_with('{') && rendered.ends_with('}'));
}

#[test]
fn arc_variant_smoke() {
    let g = cpin();
    let t: TrieArc<String, u64> = TrieArc::new();
    t.insert("k".to_owned(), 1, &g);
    assert_eq!(t.get("k", &g), Some(&1));
    let t2 = t.snapshot(&g);
    t2.insert("k".to_owned(), 2, &g);
    assert_eq!(t.get("k", &g), Some(&1));
    assert_eq!(t2.get("k", &g), Some(&2));
}

/*
    randomized single threaded soak
*/

#[test]
fn randomized_against_a_model() {
    use rand::Rng;
    init_log();
    let g = cpin();
    let mut rng = rand::thread_rng();
    let t: Chm<u64, u64> = Chm::new();
    let mut model: BTreeMap<u64, u64> = BTreeMap::new();
    for _ in 0..4096 {
        let k: u64 = rng.gen_range(0..1024);
        if rng.gen_bool(0.6) {
            let v: u64 = rng.gen();
            t.insert(k, v, &g);
            model.insert(k, v);
        } else {
            assert_eq!(t.remove(&k, &g), model.remove(&k).is_some());
        }
    }
    assert_eq!(contents(&t, &g), model);
    assert_eq!(t.len(&g), model.len());
}

/*
    multi threaded
*/

const SPAM_INSERT: usize = 4096;
const SPAM_TENANTS: usize = 16;

#[test]
fn multispam_insert() {
    let idx = Arc::new(Chm::<String, String>::new());
    let token = Arc::new(RwLock::new(()));
    let hold = token.write();
    let data: Vec<(String, String)> = (0..SPAM_INSERT)
        .map(|int| (format!("{int}"), format!("x-{int}-{}", int + 1)))
        .collect();
    let distr_data: Vec<Vec<(String, String)>> = data
        .chunks(SPAM_INSERT / SPAM_TENANTS)
        .map(|chunk| chunk.to_vec())
        .collect();
    let threads: Vec<JoinHandle<_>> = distr_data
        .into_iter()
        .enumerate()
        .map(|(tid, this_data)| {
            let this_token = token.clone();
            let this_idx = idx.clone();
            thread::Builder::new()
                .name(tid.to_string())
                .spawn(move || {
                    let _token = this_token.read();
                    let g = cpin();
                    this_data.into_iter().for_each(|(k, v)| {
                        this_idx.insert(k, v, &g);
                    })
                })
                .unwrap()
        })
        .collect();
    // rush everyone to insert; superb intercore traffic
    drop(hold);
    let _x: Box<[()]> = threads
        .into_iter()
        .map(JoinHandle::join)
        .map(Result::unwrap)
        .collect();
    let pin = cpin();
    assert_eq!(idx.len(&pin), SPAM_INSERT);
    data.into_iter().for_each(|(k, v)| {
        assert_eq!(idx.get(k.as_str(), &pin).unwrap(), &v);
    });
}

#[test]
fn concurrent_writers_same_key() {
    let idx = Arc::new(Chm::<u64, u64>::new());
    let threads: Vec<JoinHandle<_>> = (1..=2u64)
        .map(|val| {
            let this_idx = idx.clone();
            thread::spawn(move || {
                let g = cpin();
                for _ in 0..1000 {
                    this_idx.insert(42, val, &g);
                }
            })
        })
        .collect();
    threads
        .into_iter()
        .for_each(|h| h.join().unwrap());
    let g = cpin();
    assert_eq!(idx.len(&g), 1);
    let v = *idx.get(&42, &g).unwrap();
    assert!(v == 1 || v == 2);
}

#[test]
fn readers_vs_snapshots() {
    const KEYS: u64 = 64;
    let idx = Arc::new(Chm::<u64, u64>::new());
    {
        let g = cpin();
        (0..KEYS).for_each(|k| idx.insert(k, k, &g));
    }
    let readers: Vec<JoinHandle<_>> = (0..4)
        .map(|_| {
            let this_idx = idx.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let g = cpin();
                    for k in 0..KEYS {
                        // no writer ever changes these entries, so every read
                        // must come back intact no matter how many forks fly
                        assert_eq!(this_idx.get(&k, &g), Some(&k));
                    }
                }
            })
        })
        .collect();
    let snapper = {
        let this_idx = idx.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                let g = cpin();
                let snap = this_idx.snapshot(&g);
                assert_eq!(snap.len(&g), KEYS as usize);
                // divergence on the fork must never show through
                snap.remove(&0, &g);
                assert!(!snap.contains_key(&0, &g));
            }
        })
    };
    readers.into_iter().for_each(|h| h.join().unwrap());
    snapper.join().unwrap();
    let g = cpin();
    assert_eq!(idx.len(&g), KEYS as usize);
    assert!(idx.contains_key(&0, &g));
}

#[test]
fn concurrent_disjoint_churn() {
    const PER: u64 = 512;
    let idx = Arc::new(Chm::<u64, u64>::new());
    let threads: Vec<JoinHandle<_>> = (0..4u64)
        .map(|tid| {
            let this_idx = idx.clone();
            thread::spawn(move || {
                let g = cpin();
                let base = tid * PER;
                for k in base..base + PER {
                    this_idx.insert(k, k, &g);
                }
                // churn: delete half of our own range again
                for k in base..base + PER / 2 {
                    assert!(this_idx.remove(&k, &g));
                }
            })
        })
        .collect();
    threads.into_iter().for_each(|h| h.join().unwrap());
    let g = cpin();
    assert_eq!(idx.len(&g), 4 * (PER / 2) as usize);
    for tid in 0..4u64 {
        let base = tid * PER;
        for k in base + PER / 2..base + PER {
            assert_eq!(idx.get(&k, &g), Some(&k));
        }
    }
}
