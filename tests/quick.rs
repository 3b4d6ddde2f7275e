#![cfg(not(miri))]

use quickcheck::{quickcheck, Arbitrary, Gen};

use sidewalk::HopscotchMap;

use fnv::FnvHasher;
use std::hash::BuildHasherDefault;
type FnvBuilder = BuildHasherDefault<FnvHasher>;
type HopscotchMapFnv<K, V> = HopscotchMap<K, V, FnvBuilder>;

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::{BuildHasher, Hash};

fn set<'a, T: 'a, I>(iter: I) -> HashSet<T>
where
    I: IntoIterator<Item = &'a T>,
    T: Copy + Hash + Eq,
{
    iter.into_iter().cloned().collect()
}

quickcheck! {
    fn contains(insert: Vec<u32>) -> bool {
        let mut map = HopscotchMap::new();
        for &key in &insert {
            map.insert(key, ());
        }
        insert.iter().all(|&key| map.get(&key).is_some())
    }

    fn contains_not(insert: Vec<u8>, not: Vec<u8>) -> bool {
        let mut map = HopscotchMap::new();
        for &key in &insert {
            map.insert(key, ());
        }
        let nots = &set(&not) - &set(&insert);
        nots.iter().all(|&key| map.get(&key).is_none())
    }

    fn insert_erase(insert: Vec<u8>, erase: Vec<u8>) -> bool {
        let mut map = HopscotchMap::new();
        for &key in &insert {
            map.insert(key, ());
        }
        for &key in &erase {
            map.erase(&key);
        }
        let elements = &set(&insert) - &set(&erase);
        map.len() == elements.len() && map.iter().count() == elements.len() &&
            elements.iter().all(|k| map.get(k).is_some())
    }

    fn with_cap(cap: u16) -> bool {
        let map: HopscotchMap<u8, u8> = HopscotchMap::with_capacity(cap as usize);
        map.capacity() >= cap as usize
    }
}

use Op::*;
#[derive(Clone, Debug)]
enum Op<K, V> {
    // `HopscotchMap::insert` keeps the existing entry, like `HashMap::entry().or_insert()`.
    Add(K, V),
    // `put_sync` overwrites, like `HashMap::insert`. Running it single-threaded alongside the
    // plain operations also checks that the two API planes agree on observable state.
    Put(K, V),
    Erase(K),
    EraseSync(K),
    Rehash(u16),
}

impl<K, V> Arbitrary for Op<K, V>
where
    K: Arbitrary,
    V: Arbitrary,
{
    fn arbitrary(g: &mut Gen) -> Self {
        match u32::arbitrary(g) % 5 {
            0 => Add(K::arbitrary(g), V::arbitrary(g)),
            1 => Put(K::arbitrary(g), V::arbitrary(g)),
            2 => Erase(K::arbitrary(g)),
            3 => EraseSync(K::arbitrary(g)),
            _ => Rehash(u16::arbitrary(g)),
        }
    }
}

fn do_ops<K, V, S>(ops: &[Op<K, V>], a: &mut HopscotchMap<K, V, S>, b: &mut HashMap<K, V>)
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    for op in ops {
        match *op {
            Add(ref k, ref v) => {
                a.insert(k.clone(), v.clone());
                b.entry(k.clone()).or_insert_with(|| v.clone());
            }
            Put(ref k, ref v) => {
                a.put_sync(k.clone(), v.clone());
                b.insert(k.clone(), v.clone());
            }
            Erase(ref k) => {
                assert_eq!(a.erase(k).is_some(), b.remove(k).is_some());
            }
            EraseSync(ref k) => {
                assert_eq!(a.erase_sync(k), b.remove(k).is_some());
            }
            Rehash(n) => {
                a.rehash(n as usize);
            }
        }
    }
}

fn assert_maps_equivalent<K, V, S>(a: &mut HopscotchMap<K, V, S>, b: &HashMap<K, V>) -> bool
where
    K: Hash + Eq + Clone + Debug,
    V: Eq + Debug,
    S: BuildHasher,
{
    assert_eq!(a.len(), b.len());
    assert_eq!(a.iter().count(), b.len());
    let keys: Vec<K> = a.iter().map(|(k, _)| k.clone()).collect();
    for key in &keys {
        assert!(b.contains_key(key), "reference missing {:?}", key);
    }
    for key in b.keys() {
        assert!(a.get(key).is_some(), "map missing {:?}", key);
    }
    for key in &keys {
        assert_eq!(a.get(key).unwrap(), &b[key]);
    }
    true
}

quickcheck! {
    fn operations_i8(ops: Vec<Op<i8, i8>>) -> bool {
        let mut map = HopscotchMap::new();
        let mut reference = HashMap::new();
        do_ops(&ops, &mut map, &mut reference);
        assert_maps_equivalent(&mut map, &reference)
    }

    fn operations_string(ops: Vec<Op<String, i8>>) -> bool {
        let mut map = HopscotchMap::new();
        let mut reference = HashMap::new();
        do_ops(&ops, &mut map, &mut reference);
        assert_maps_equivalent(&mut map, &reference)
    }

    fn hasher_agnostic(ops: Vec<Op<i8, i8>>) -> bool {
        let mut map = HopscotchMap::new();
        let mut reference = HashMap::new();
        do_ops(&ops, &mut map, &mut reference);

        let mut map2 = HopscotchMapFnv::default();
        let mut reference2 = HashMap::new();
        do_ops(&ops, &mut map2, &mut reference2);

        assert_eq!(reference, reference2);
        assert_eq!(map.len(), map2.len());
        let keys: Vec<i8> = map.iter().map(|(&k, _)| k).collect();
        keys.iter().all(|k| map2.get(k).is_some())
    }
}
