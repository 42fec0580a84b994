//! End-to-end scenarios against a small "pair/vector" test client: type 0
//! is `nil`, type 1 is a dotted pair `{x, y}`, type 2 is a vector of
//! `i32`s. All three are big kinds (`kind == type`).

use seggc::{Config, GcClient, Handle, Kind, KindSpec, Length, Nchunks, Type};

const TYPE_NIL: Type = 0;
const TYPE_PAIR: Type = 1;
const TYPE_VEC: Type = 2;

/// Six general-purpose root slots (`nil, a, b, c, d, e`); `find_root_ptrs`
/// looks at all six on every collection.
struct PairVecClient {
    nil: Handle,
    a: Handle,
    b: Handle,
    c: Handle,
    d: Handle,
    e: Handle,
}

impl PairVecClient {
    fn blank(off_bits: u32) -> Self {
        let n = Handle::no_object(off_bits);
        PairVecClient { nil: n, a: n, b: n, c: n, d: n, e: n }
    }
}

impl GcClient for PairVecClient {
    fn kind(&self, ty: Type, _length: Length) -> Kind {
        ty
    }

    fn nchunks(&self, ty: Type, length: Length) -> Nchunks {
        if ty != TYPE_VEC {
            1
        } else {
            (4 + length) / 4
        }
    }

    fn find_root_ptrs(&mut self, heap: &mut seggc::Heap<Self>) {
        heap.look_at(self.nil);
        heap.look_at(self.a);
        heap.look_at(self.b);
        heap.look_at(self.c);
        heap.look_at(self.d);
        heap.look_at(self.e);
    }

    fn find_object_ptrs(&mut self, heap: &mut seggc::Heap<Self>, h: Handle) {
        if heap.type_of(h) != TYPE_PAIR {
            return;
        }
        let (x, y) = read_pair(heap, h);
        if heap.look_at(x) == 0 {
            return;
        }
        heap.look_at(y);
    }
}

fn config(max_segments: usize) -> Config {
    let mut b = Config::builder()
        .off_bits(6)
        .chunk_size(16)
        .n_types(3)
        .max_segments(max_segments);
    b.push_kind(KindSpec::big()); // kind 0: nil
    b.push_kind(KindSpec::big()); // kind 1: pair
    b.push_kind(KindSpec::big()); // kind 2: vector
    b.build().unwrap()
}

fn read_pair(heap: &seggc::Heap<PairVecClient>, h: Handle) -> (Handle, Handle) {
    let d = heap.data(h);
    let x = u32::from_le_bytes(d[0..4].try_into().unwrap());
    let y = u32::from_le_bytes(d[4..8].try_into().unwrap());
    (Handle::from_bits(x), Handle::from_bits(y))
}

fn write_pair(heap: &mut seggc::Heap<PairVecClient>, pair: Handle, x: Handle, y: Handle) {
    heap.old_to_new_check(pair, x);
    heap.old_to_new_check(pair, y);
    let d = heap.data_mut(pair);
    d[0..4].copy_from_slice(&x.to_bits().to_le_bytes());
    d[4..8].copy_from_slice(&y.to_bits().to_le_bytes());
}

fn write_vec(heap: &mut seggc::Heap<PairVecClient>, h: Handle, values: &[i32]) {
    let d = heap.data_mut(h);
    d[0..4].copy_from_slice(&(values.len() as u32).to_le_bytes());
    for (i, v) in values.iter().enumerate() {
        let off = 4 + i * 4;
        d[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }
}

fn read_vec(heap: &seggc::Heap<PairVecClient>, h: Handle) -> Vec<i32> {
    let d = heap.data(h);
    let len = u32::from_le_bytes(d[0..4].try_into().unwrap()) as usize;
    (0..len)
        .map(|i| {
            let off = 4 + i * 4;
            i32::from_le_bytes(d[off..off + 4].try_into().unwrap())
        })
        .collect()
}

fn alloc_pair(heap: &mut seggc::Heap<PairVecClient>, client: &PairVecClient, x: Handle, y: Handle) -> Handle {
    let h = heap.alloc(client, TYPE_PAIR, 2);
    write_pair(heap, h, x, y);
    h
}

fn alloc_vec(heap: &mut seggc::Heap<PairVecClient>, client: &PairVecClient, values: &[i32]) -> Handle {
    let h = heap.alloc(client, TYPE_VEC, values.len() as Length);
    write_vec(heap, h, values);
    h
}

/// Allocates `nil`, a pair `a`, a vector `b`, and a pair `c = {a, b}`, then
/// runs one full collection. All four survive (they're all rooted or
/// reachable through `c`), and land in `OLD_GEN1`: the promotion rule only
/// moves an object to `OLD_GEN2` if it was *already* in `OLD_GEN1` when a
/// level-1-or-higher collection finds it reachable, so one full collection
/// from fresh allocations promotes into `OLD_GEN1`, not straight to
/// `OLD_GEN2` — reaching `OLD_GEN2` takes a second full collection (see the
/// next test).
#[test]
fn basic_reachability_promotes_to_gen1_after_one_full_collect() {
    let cfg = config(11);
    let off_bits = cfg.off_bits();
    let mut client = PairVecClient::blank(off_bits);
    let mut heap = seggc::Heap::new(cfg, &client).unwrap();

    let nil = heap.alloc(&client, TYPE_NIL, 0);
    client.nil = nil;
    let a = alloc_pair(&mut heap, &client, nil, nil);
    client.a = a;
    let b = alloc_vec(&mut heap, &client, &[0; 10]);
    client.b = b;
    let c = alloc_pair(&mut heap, &client, a, b);
    client.c = c;

    heap.collect(&mut client, 2);

    assert_eq!(heap.type_of(client.nil), TYPE_NIL);
    assert_eq!(heap.type_of(client.a), TYPE_PAIR);
    assert_eq!(heap.type_of(client.b), TYPE_VEC);
    assert_eq!(heap.type_of(client.c), TYPE_PAIR);

    let (cx, cy) = read_pair(&heap, client.c);
    assert_eq!(cx, client.a, "find_object_ptrs(c) must yield a as its x field");
    assert_eq!(cy, client.b, "find_object_ptrs(c) must yield b as its y field");

    assert_eq!(heap.info().gen1_count, 4);
    assert_eq!(heap.info().gen2_count, 0);
    assert_eq!(heap.info().gen0_count, 0);
}

/// Continuing from the previous test: drop `a` and `b` from the roots, keep
/// `c`, and collect again. `a`/`b` remain live (reached through `c`); this
/// second full collection promotes all three from `OLD_GEN1` into
/// `OLD_GEN2`.
#[test]
fn reachable_through_parent_survives_and_reaches_gen2() {
    let cfg = config(11);
    let off_bits = cfg.off_bits();
    let mut client = PairVecClient::blank(off_bits);
    let mut heap = seggc::Heap::new(cfg, &client).unwrap();

    let nil = heap.alloc(&client, TYPE_NIL, 0);
    client.nil = nil;
    let a = alloc_pair(&mut heap, &client, nil, nil);
    let b = alloc_vec(&mut heap, &client, &[0; 10]);
    let c = alloc_pair(&mut heap, &client, a, b);
    client.a = a;
    client.b = b;
    client.c = c;
    heap.collect(&mut client, 2);

    // Drop a/b as direct roots; only nil and c remain rooted. a and b are
    // still reachable transitively through c.
    client.a = Handle::no_object(off_bits);
    client.b = Handle::no_object(off_bits);

    heap.collect(&mut client, 2);

    assert!(!heap.not_marked(a), "a must survive via c, not be swept");
    assert!(!heap.not_marked(b), "b must survive via c, not be swept");
    assert!(!heap.not_marked(c));
    assert_eq!(heap.type_of(a), TYPE_PAIR);
    assert_eq!(heap.type_of(b), TYPE_VEC);

    let (cx, cy) = read_pair(&heap, c);
    assert_eq!(cx, a);
    assert_eq!(cy, b);

    // nil + a + b + c all promoted out of gen1 into gen2 on this second
    // full collection.
    assert_eq!(heap.info().gen2_count, 4);
    assert_eq!(heap.info().gen1_count, 0);
}

fn alloc_with_gc(
    heap: &mut seggc::Heap<PairVecClient>,
    client: &mut PairVecClient,
    alloc_count: &mut u32,
    ty: Type,
    length: Length,
) -> Handle {
    *alloc_count += 1;
    if *alloc_count % 8 == 0 {
        let level = if *alloc_count % 48 == 0 {
            2
        } else if *alloc_count % 24 == 0 {
            1
        } else {
            0
        };
        heap.collect(client, level);
    }
    let mut h = heap.alloc(&*client, ty, length);
    if h == Handle::no_object(heap.config().off_bits()) {
        heap.collect(client, 2);
        h = heap.alloc(&*client, ty, length);
    }
    h
}

/// The canonical stress test: 15 iterations of an allocation/mutation/
/// assertion sequence, including `e.x`/`e.y` captures at iterations 2/6/8
/// and an allocation-count-driven GC schedule (every 8th alloc collects,
/// every 24th at level 1, every 48th at level 2). Passing this implies the
/// remembered set and promotion logic are correct, since `e` ends up
/// holding references into younger generations that only a correct write
/// barrier keeps alive across the interleaved collections.
#[test]
fn canonical_mixed_level_stress_test() {
    let cfg = config(11);
    let off_bits = cfg.off_bits();
    let mut client = PairVecClient::blank(off_bits);
    let mut heap = seggc::Heap::new(cfg, &client).unwrap();
    let mut alloc_count = 0u32;

    let nil = alloc_with_gc(&mut heap, &mut client, &mut alloc_count, TYPE_NIL, 0);
    client.nil = nil;
    client.a = nil;
    client.b = nil;
    client.c = nil;
    client.d = nil;
    client.e = nil;

    let iters = 15;
    for i in 1..=iters {
        let a = alloc_with_gc(&mut heap, &mut client, &mut alloc_count, TYPE_PAIR, 2);
        write_pair(&mut heap, a, nil, nil);
        client.a = a;

        let b = alloc_with_gc(&mut heap, &mut client, &mut alloc_count, TYPE_VEC, 10);
        let b_values: Vec<i32> = (0..10).map(|j| 100 * i + j).collect();
        write_vec(&mut heap, b, &b_values);
        client.b = b;

        let c = alloc_with_gc(&mut heap, &mut client, &mut alloc_count, TYPE_PAIR, 2);
        write_pair(&mut heap, c, client.a, client.b);
        client.c = c;

        let d = alloc_with_gc(&mut heap, &mut client, &mut alloc_count, TYPE_VEC, 1);
        write_vec(&mut heap, d, &[7777]);
        client.d = d;

        if i == 2 {
            client.e = client.a;
        } else if i == 6 {
            write_pair(&mut heap, client.e, client.a, client.b);
        }

        let new_a = alloc_with_gc(&mut heap, &mut client, &mut alloc_count, TYPE_PAIR, 2);
        write_pair(&mut heap, new_a, nil, nil);
        client.a = new_a;

        if i == 8 {
            let (_, e_y) = read_pair(&heap, client.e);
            write_pair(&mut heap, client.e, client.a, e_y);
        }

        // Re-check every live root's contents on every iteration.
        assert_eq!(heap.type_of(client.nil), TYPE_NIL);
        assert_eq!(heap.type_of(client.a), TYPE_PAIR);
        let (ax, ay) = read_pair(&heap, client.a);
        assert_eq!(ax, nil);
        assert_eq!(ay, nil);

        assert_eq!(heap.type_of(client.b), TYPE_VEC);
        assert_eq!(read_vec(&heap, client.b).len(), 10);

        assert_eq!(heap.type_of(client.c), TYPE_PAIR);
        let (cx, cy) = read_pair(&heap, client.c);
        assert_eq!(heap.type_of(cx), TYPE_PAIR);
        assert_eq!(cy, client.b);

        assert_eq!(heap.type_of(client.d), TYPE_VEC);
        assert_eq!(read_vec(&heap, client.d), vec![7777]);

        if i < 2 {
            assert_eq!(client.e, nil);
        } else if i < 6 {
            assert_eq!(heap.type_of(client.e), TYPE_PAIR);
            let (ex, ey) = read_pair(&heap, client.e);
            assert_eq!(ex, nil);
            assert_eq!(ey, nil);
        } else {
            assert_eq!(heap.type_of(client.e), TYPE_PAIR);
            let (ex, ey) = read_pair(&heap, client.e);
            assert_eq!(heap.type_of(ex), TYPE_PAIR);
            assert_eq!(heap.type_of(ey), TYPE_VEC);
            let ey_values = read_vec(&heap, ey);
            let expected: Vec<i32> = (0..10).map(|j| 100 * 6 + j).collect();
            assert_eq!(ey_values, expected);
        }

        let b_actual = read_vec(&heap, client.b);
        assert_eq!(b_actual, b_values);
    }

    // After the final iteration, `e` still holds the pair captured at
    // iteration 6, with `e.y` holding the vector values written that same
    // iteration.
    assert_eq!(heap.type_of(client.e), TYPE_PAIR);
    let (ex, ey) = read_pair(&heap, client.e);
    assert_eq!(heap.type_of(ex), TYPE_PAIR);
    assert_eq!(heap.type_of(ey), TYPE_VEC);
    let expected: Vec<i32> = (0..10).map(|j| 600 + j).collect();
    assert_eq!(read_vec(&heap, ey), expected);
}

/// A constant `nil` registered before any ordinary allocation is handle 0,
/// reports as a constant, and is untouched by any number of full
/// collections.
#[test]
fn constant_nil_is_handle_zero_and_survives() {
    let cfg = config(4);
    let off_bits = cfg.off_bits();
    let client = PairVecClient::blank(off_bits);
    let mut heap = seggc::Heap::new(cfg, &client).unwrap();

    let nil = heap.register_constant(&client, TYPE_NIL, 0);
    assert!(heap.is_constant(nil));
    assert_eq!(nil, Handle::from_bits(0), "nil must be the first handle, segment 0 offset 0");

    let mut client = client;
    for _ in 0..3 {
        heap.collect(&mut client, 2);
    }

    assert!(heap.is_constant(nil));
    assert_eq!(heap.type_of(nil), TYPE_NIL);
    assert_eq!(heap.data(nil).len(), heap.config().chunk_size());
}

/// Adversarial OOM: with `max_segments=2`, two big allocations succeed and
/// a third fails; dropping the roots and running a full collection frees a
/// segment, and a fresh big allocation then succeeds.
#[test]
fn oom_then_recovers_after_collect() {
    let cfg = config(2);
    let off_bits = cfg.off_bits();
    let mut client = PairVecClient::blank(off_bits);
    let mut heap = seggc::Heap::new(cfg, &client).unwrap();
    let no_object = Handle::no_object(off_bits);

    let r1 = heap.alloc(&client, TYPE_VEC, 1000);
    assert_ne!(r1, no_object);
    client.a = r1;

    let r2 = heap.alloc(&client, TYPE_VEC, 1000);
    assert_ne!(r2, no_object);
    client.b = r2;

    let r3 = heap.alloc(&client, TYPE_VEC, 1000);
    assert_eq!(r3, no_object, "segment table is at capacity, third big alloc must fail");

    client.a = no_object;
    client.b = no_object;
    heap.collect(&mut client, 2);

    let r4 = heap.alloc(&client, TYPE_VEC, 1000);
    assert_ne!(r4, no_object, "collect should have freed an unreachable segment for reuse");
}

/// A small-segment kind with `chunks[k]=1` must admit exactly `N_OFF`
/// objects before a new segment is needed.
#[test]
fn small_kind_admits_exactly_n_off_objects_per_segment() {
    struct OneChunkClient;
    impl GcClient for OneChunkClient {
        fn kind(&self, ty: Type, _length: Length) -> Kind {
            ty
        }
        fn nchunks(&self, _ty: Type, _length: Length) -> Nchunks {
            1
        }
        fn find_root_ptrs(&mut self, _heap: &mut seggc::Heap<Self>) {}
        fn find_object_ptrs(&mut self, _heap: &mut seggc::Heap<Self>, _h: Handle) {}
    }

    let mut b = Config::builder().off_bits(3).chunk_size(8).n_types(1).max_segments(4);
    b.push_kind(KindSpec::small(1));
    let cfg = b.build().unwrap();
    let off_bits = cfg.off_bits();
    let n_off = cfg.n_off();

    let client = OneChunkClient;
    let mut heap = seggc::Heap::new(cfg, &client).unwrap();

    let first = heap.alloc(&client, 0, 0);
    let first_seg = first.segment(off_bits);

    for _ in 1..n_off {
        let h = heap.alloc(&client, 0, 0);
        assert_eq!(h.segment(off_bits), first_seg, "should still be filling the first segment");
    }

    let spill = heap.alloc(&client, 0, 0);
    assert_ne!(spill.segment(off_bits), first_seg, "the (n_off+1)th alloc must start a new segment");
}

/// A small kind where some objects in a segment survive a collection and
/// others don't: the survivors must keep their data, and allocations after
/// the collection must land on the dead slots rather than the promoted ones.
#[test]
fn small_kind_reallocates_dead_slots_without_disturbing_survivors() {
    struct TaggedClient {
        roots: Vec<Handle>,
    }
    impl GcClient for TaggedClient {
        fn kind(&self, ty: Type, _length: Length) -> Kind {
            ty
        }
        fn nchunks(&self, _ty: Type, _length: Length) -> Nchunks {
            1
        }
        fn find_root_ptrs(&mut self, heap: &mut seggc::Heap<Self>) {
            for &r in &self.roots {
                heap.look_at(r);
            }
        }
        fn find_object_ptrs(&mut self, _heap: &mut seggc::Heap<Self>, _h: Handle) {}
    }

    let mut b = Config::builder().off_bits(3).chunk_size(8).n_types(1).max_segments(4);
    b.push_kind(KindSpec::small(1));
    let cfg = b.build().unwrap();
    let off_bits = cfg.off_bits();
    let n_off = cfg.n_off();

    let mut client = TaggedClient { roots: Vec::new() };
    let mut heap = seggc::Heap::new(cfg, &client).unwrap();

    // Fill exactly one segment, tagging each object with its allocation
    // index, and root every other one.
    let mut handles = Vec::new();
    for i in 0..n_off {
        let h = heap.alloc(&client, 0, 0);
        heap.data_mut(h)[0] = i as u8;
        handles.push(h);
        if i % 2 == 0 {
            client.roots.push(h);
        }
    }
    assert_eq!(handles[0].segment(off_bits), handles[n_off - 1].segment(off_bits));

    heap.collect(&mut client, 2);

    for &r in &client.roots {
        let i = handles.iter().position(|&h| h == r).unwrap();
        assert_eq!(heap.data(r)[0], i as u8, "rooted object's data corrupted across collect");
    }

    // The odd-indexed (unrooted) slots are now dead and reusable; allocate
    // enough fresh objects to exactly fill them, in the same segment.
    let mut fresh = Vec::new();
    for _ in 0..(n_off / 2) {
        let h = heap.alloc(&client, 0, 0);
        heap.data_mut(h)[0] = 0xAA;
        assert_eq!(h.segment(off_bits), handles[0].segment(off_bits), "should reuse the reclaimed segment");
        assert!(!client.roots.contains(&h), "handed out a slot that is still a rooted survivor: {:?}", h);
        fresh.push(h);
    }

    // Rooted objects must be untouched by the reallocation.
    for &r in &client.roots {
        let i = handles.iter().position(|&h| h == r).unwrap();
        assert_eq!(heap.data(r)[0], i as u8, "survivor's data clobbered by a reused slot");
    }
    for &h in &fresh {
        assert_eq!(heap.data(h)[0], 0xAA);
    }
}
