//! Randomized checks of the interval translator against a byte-level model.

use pmem_badblocks::{merge, translate, translate_aligned, BadBlockRange, Extent, PhysicalRange};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

const ROUNDS: u64 = 300;

/// Extents sorted by file offset, scattered over a small physical space.
fn random_extents(rng: &mut StdRng) -> Vec<Extent> {
    let count = rng.gen_range(0..8);
    let mut lengths: Vec<u64> = (0..count).map(|_| rng.gen_range(1..64)).collect();

    // Non-overlapping physical slots, then shuffled so the physical order
    // differs from the file order.
    let mut slots = Vec::new();
    let mut phys = rng.gen_range(0..32);
    for &len in &lengths {
        slots.push(phys);
        phys += len + rng.gen_range(0..48);
    }
    let mut order: Vec<usize> = (0..count).collect();
    order.shuffle(rng);

    let mut extents = Vec::new();
    let mut file = 0u64;
    for i in order {
        let len = std::mem::take(&mut lengths[i]);
        file += rng.gen_range(0..16);
        extents.push(Extent::new(file, slots[i], len));
        file += len;
    }
    extents
}

fn random_bad(rng: &mut StdRng) -> Vec<PhysicalRange> {
    let mut ranges = Vec::new();
    let mut at = rng.gen_range(0..16);
    for _ in 0..rng.gen_range(0..10) {
        let len = rng.gen_range(1..40);
        ranges.push(PhysicalRange::new(at, len));
        at += len + rng.gen_range(0..40);
    }
    ranges
}

/// File offsets whose backing byte is bad, computed byte by byte.
fn model(extents: &[Extent], bad: &[PhysicalRange]) -> BTreeSet<u64> {
    let mut out = BTreeSet::new();
    for e in extents {
        for i in 0..e.length {
            let p = e.physical_offset + i;
            if bad.iter().any(|b| b.offset <= p && p < b.end()) {
                out.insert(e.file_offset + i);
            }
        }
    }
    out
}

fn bytes_of(ranges: &[BadBlockRange]) -> BTreeSet<u64> {
    ranges.iter().flat_map(|r| r.offset..r.end()).collect()
}

fn assert_sorted_disjoint(ranges: &[BadBlockRange]) {
    for pair in ranges.windows(2) {
        assert!(
            pair[0].end() <= pair[1].offset,
            "{} and {} overlap or are out of order",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn test_translate_matches_byte_model() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..ROUNDS {
        let extents = random_extents(&mut rng);
        let bad = random_bad(&mut rng);

        let out = translate(&extents, &bad).unwrap();
        assert!(out.iter().all(|r| r.length > 0));
        assert_sorted_disjoint(&out);
        assert_eq!(bytes_of(&out), model(&extents, &bad));
    }
}

#[test]
fn test_each_output_lies_in_one_extent_and_one_bad_range() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..ROUNDS {
        let extents = random_extents(&mut rng);
        let bad = random_bad(&mut rng);

        for r in translate(&extents, &bad).unwrap() {
            let e = extents
                .iter()
                .find(|e| e.file_offset <= r.offset && r.end() <= e.file_end())
                .unwrap_or_else(|| panic!("{} escapes every extent", r));
            let phys = e.physical_offset + (r.offset - e.file_offset);
            assert!(
                bad.iter()
                    .any(|b| b.offset <= phys && phys + r.length <= b.end()),
                "{} maps outside every bad range",
                r
            );
        }
    }
}

#[test]
fn test_aligned_translation_covers_exact() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..ROUNDS {
        let extents = random_extents(&mut rng);
        let bad = random_bad(&mut rng);
        let block_size = [1u64, 2, 8, 16][rng.gen_range(0..4)];

        let exact = bytes_of(&translate(&extents, &bad).unwrap());
        let aligned = translate_aligned(&extents, &bad, block_size).unwrap();
        let covered = bytes_of(&aligned);

        assert!(exact.is_subset(&covered));
        for r in &aligned {
            assert!(
                extents
                    .iter()
                    .any(|e| e.file_offset <= r.offset && r.end() <= e.file_end()),
                "{} escapes every extent",
                r
            );
        }
        for pair in aligned.windows(2) {
            assert!(pair[0].offset <= pair[1].offset);
        }
    }
}

#[test]
fn test_merge_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..ROUNDS {
        let mut ranges: Vec<BadBlockRange> = (0..rng.gen_range(0..20))
            .map(|_| BadBlockRange::new(rng.gen_range(0..500), rng.gen_range(1..50)))
            .collect();
        ranges.sort();

        let once = merge(&ranges);
        assert_eq!(merge(&once), once);
        assert_eq!(bytes_of(&once), bytes_of(&ranges));
        for pair in once.windows(2) {
            assert!(pair[0].end() < pair[1].offset);
        }
    }
}

#[test]
fn test_unsorted_bad_ranges_rejected() {
    let extents = [Extent::new(0, 0, 100)];
    let bad = [PhysicalRange::new(50, 10), PhysicalRange::new(10, 10)];
    assert!(translate(&extents, &bad).is_err());

    let zero = [PhysicalRange::new(10, 0)];
    assert!(translate(&extents, &zero).is_err());

    let overflow = [PhysicalRange::new(u64::MAX, 2)];
    assert!(translate(&extents, &overflow).is_err());
}
