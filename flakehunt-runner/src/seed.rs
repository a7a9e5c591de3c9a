// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Derivation of per-round seeds.
//!
//! A seeded round is fully described by its index and the run's base seed: given those two
//! values, [`seed_for_round`] always produces the same seed, so any prior round can be
//! reproduced exactly.
//!
//! The derivation is a bijection in the round index for a fixed base seed. It steps by an odd
//! constant (a bijection modulo 2^64), then applies the splitmix64 finalizer (a composition of
//! invertible xor-shift and odd-multiply steps). Two distinct indexes therefore can never
//! produce the same seed within one run, no matter how many rounds are requested.

/// The base seed used if none is configured.
pub const DEFAULT_BASE_SEED: u64 = 933_178;

// 2^64 divided by the golden ratio, rounded to an odd number.
const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

/// Returns the seed for the seeded round at `index`, derived from `base_seed`.
pub fn seed_for_round(index: usize, base_seed: u64) -> u64 {
    let step = (index as u64).wrapping_add(1).wrapping_mul(GOLDEN_GAMMA);
    mix64(base_seed.wrapping_add(step))
}

fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
