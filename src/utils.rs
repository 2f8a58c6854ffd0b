/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

/// text-like data that repeats with a short period, compresses very well
#[cfg(test)]
pub fn pattern_data(len: usize) -> Vec<u8> {
    const PATTERN: &[u8] = b"the quick brown fox jumps over the lazy dog. ";
    PATTERN.iter().copied().cycle().take(len).collect()
}

/// deterministic data that is effectively incompressible (xorshift32)
#[cfg(test)]
pub fn pseudo_random_data(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// handy function to compare two arrays, and print the first mismatch. Useful for debugging.
#[cfg(test)]
#[track_caller]
pub fn assert_eq_array<T: PartialEq + std::fmt::Debug>(a: &[T], b: &[T]) {
    use core::panic;

    if a.len() != b.len() {
        for i in 0..std::cmp::min(a.len(), b.len()) {
            assert_eq!(
                a[i],
                b[i],
                "length mismatch {},{} and first mismatch at offset {}",
                a.len(),
                b.len(),
                i
            );
        }
        panic!(
            "length mismatch {} and {}, but common prefix identical",
            a.len(),
            b.len()
        );
    } else {
        for i in 0..a.len() {
            assert_eq!(
                a[i],
                b[i],
                "length identical {}, but first mismatch at offset {}",
                a.len(),
                i
            );
        }
    }
}

#[test]
fn generators_are_deterministic() {
    assert_eq!(pseudo_random_data(100, 5), pseudo_random_data(100, 5));
    assert_ne!(pseudo_random_data(100, 5), pseudo_random_data(100, 6));
    assert_eq!(&pattern_data(9), b"the quick");
    assert!(pattern_data(0).is_empty());
}
