//! Conservation properties for both allocation strategies.
//!
//! Random allocate/release sequences are replayed against each allocator and
//! a simple model of which pid holds how many bytes.

use std::collections::BTreeMap;

use proptest::prelude::*;

use os_emu::{Allocator, FlatAllocator, PagingAllocator, Pid, Placement};

#[derive(Clone, Debug)]
enum Op {
    Alloc { pid: u32, size: usize },
    Free { pid: u32 },
}

fn ops(max_size: usize) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        3 => (0u32..16, 1usize..=max_size).prop_map(|(pid, size)| Op::Alloc { pid, size }),
        2 => (0u32..16).prop_map(|pid| Op::Free { pid }),
    ];
    prop::collection::vec(op, 0..120)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn flat_reservations_are_disjoint_and_conserved(ops in ops(400)) {
        const CAP: usize = 2048;
        let mut a = FlatAllocator::new(CAP);
        let mut model: BTreeMap<Pid, (usize, usize)> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Alloc { pid, size } => {
                    let pid = Pid(pid);
                    match a.allocate(size, pid) {
                        Some(Placement::Contiguous { offset, len }) => {
                            prop_assert!(!model.contains_key(&pid));
                            prop_assert_eq!(len, size);
                            prop_assert!(offset + len <= CAP);
                            for &(o, l) in model.values() {
                                prop_assert!(offset + len <= o || o + l <= offset, "overlap");
                            }
                            model.insert(pid, (offset, len));
                        }
                        Some(other) => prop_assert!(false, "unexpected placement {:?}", other),
                        None => {}
                    }
                }
                Op::Free { pid } => {
                    let pid = Pid(pid);
                    let expected = model.remove(&pid).map_or(0, |(_, len)| len);
                    prop_assert_eq!(a.deallocate(pid), expected);
                }
            }

            let held: usize = model.values().map(|&(_, len)| len).sum();
            prop_assert_eq!(a.used(), held);
            prop_assert_eq!(a.free(), CAP - held);
            prop_assert!(a.external_fragmentation() <= a.free());
            prop_assert_eq!(a.process_count(), model.len());
        }

        for pid in model.keys().copied().collect::<Vec<_>>() {
            a.deallocate(pid);
        }
        prop_assert_eq!(a.free(), CAP);
        prop_assert_eq!(a.external_fragmentation(), 0);
        prop_assert_eq!(a.process_count(), 0);
    }

    #[test]
    fn paging_frames_are_conserved(
        ops in ops(600),
        frame_shift in 4u32..8,
    ) {
        let frame_size = 1usize << frame_shift;
        let mut a = PagingAllocator::new(2048, frame_size);
        let total = a.num_frames();
        let mut model: BTreeMap<Pid, usize> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Alloc { pid, size } => {
                    let pid = Pid(pid);
                    let needed = a.frames_for(size);
                    let fits = needed <= a.free_frame_count() && !model.contains_key(&pid);
                    let placed = a.allocate(size, pid);
                    prop_assert_eq!(placed.is_some(), fits);
                    if let Some(p) = placed {
                        prop_assert_eq!(p.reserved_bytes(), needed * frame_size);
                        model.insert(pid, needed);
                    }
                }
                Op::Free { pid } => {
                    let pid = Pid(pid);
                    let frames = model.remove(&pid).unwrap_or(0);
                    prop_assert_eq!(a.deallocate(pid), frames * frame_size);
                }
            }

            let owned: usize = model.keys().map(|&pid| a.frames_of(pid).len()).sum();
            prop_assert_eq!(a.free_frame_count() + owned, total);
            prop_assert_eq!(a.external_fragmentation(), 0);
            for (&pid, &n) in &model {
                prop_assert_eq!(a.frames_of(pid).len(), n);
                for &frame in a.frames_of(pid) {
                    prop_assert_eq!(a.frame_owner(frame), Some(pid));
                }
            }
        }
    }
}
