//! Generates the lookup tables used by `reciprocal`, `log2`/`exp2` and
//! `to_dB`/`from_dB`. Keeping the tables in a build script (rather than
//! checked-in arrays) means the precision/size tradeoff documented in
//! `src/log_exp.rs` and `src/reciprocal.rs` lives in one place next to the
//! derivation, and the tables stay reproducible from source instead of
//! being hand-maintained binary blobs.
use std::env;
use std::fs;
use std::path::Path;

const RECIP_BUCKETS: u32 = 256;
const LOG_BUCKETS: u32 = 256;

/// log2(10) to enough digits to round-trip a 53-bit mantissa.
const LOG2_10: f64 = 3.321928094887362_347_870_319_429_489_39;

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();
    let dest = Path::new(&out_dir).join("tables.rs");

    let mut src = String::new();
    src.push_str("// @generated by build.rs -- do not edit.\n\n");

    // Reciprocal seed table: RECIP_SEED[i] approximates round(2^63 / d) for d
    // the midpoint of the i'th bucket of the normalized range [2^31, 2^32),
    // matching reciprocal()'s `x` representing `2^63 * (1/d_norm)` throughout
    // its Newton-Raphson passes. Exact 128-bit integer division keeps this
    // reproducible across hosts.
    src.push_str(&format!(
        "pub(crate) const RECIP_SEED: [u32; {RECIP_BUCKETS}] = [\n"
    ));
    for i in 0..RECIP_BUCKETS {
        let bucket_lo: u64 = 0x8000_0000 + ((i as u64) << 23);
        let mid = bucket_lo + (1u64 << 22);
        let seed = ((1u128 << 63) + (mid as u128) / 2) / (mid as u128);
        let seed = seed.min(u32::MAX as u128) as u32;
        src.push_str(&format!("    0x{seed:08x},\n"));
    }
    src.push_str("];\n\n");

    // log2(1 + i/256) scaled to Q5.27, with one extra trailing entry so the
    // runtime interpolator always has a "next" sample without bounds checks.
    src.push_str(&format!(
        "pub(crate) const LOG2_TABLE: [i32; {}] = [\n",
        LOG_BUCKETS + 1
    ));
    for i in 0..=LOG_BUCKETS {
        let frac = 1.0 + (i as f64) / (LOG_BUCKETS as f64);
        let value = frac.log2() * (1u64 << 27) as f64;
        src.push_str(&format!("    {}, \n", value.round() as i32));
    }
    src.push_str("];\n\n");

    // 2^(i/256) scaled to Q31 (i.e. in [2^31, 2^32]), inverse of LOG2_TABLE.
    src.push_str(&format!(
        "pub(crate) const EXP2_TABLE: [u32; {}] = [\n",
        LOG_BUCKETS + 1
    ));
    for i in 0..=LOG_BUCKETS {
        let frac = (i as f64) / (LOG_BUCKETS as f64);
        let value = 2f64.powf(frac) * (1u64 << 31) as f64;
        let value = value.round().min(u32::MAX as f64) as u32;
        src.push_str(&format!("    0x{value:08x},\n"));
    }
    src.push_str("];\n\n");

    // to_dB(x) = 2e7 * log10(x) = (2e7 / log2(10)) * log2(x). log2(x) arrives
    // as Q5.27; scale it by a rational constant expressed as a 32-bit
    // numerator over a power-of-two shift so the runtime conversion is a
    // single 64-bit multiply plus shift.
    let shift = 40u32;
    let num = (2.0e7 / LOG2_10 / (1u64 << 27) as f64 * (1u64 << shift) as f64).round() as i64;
    src.push_str(&format!("pub(crate) const TO_DB_NUM: i64 = {num};\n"));
    src.push_str(&format!("pub(crate) const TO_DB_SHIFT: u32 = {shift};\n\n"));

    // from_dB(x) = 10^(x / 20e6) = 2^(x * log2(10) / 20e6): scale factor
    // turning a raw dB-micro integer into the Q27 argument expected by exp2.
    let from_db_q27_per_db_micro = (LOG2_10 / 20.0e6 * (1u64 << 27) as f64).round() as i64;
    src.push_str(&format!(
        "pub(crate) const FROM_DB_Q27_PER_DB_MICRO: i64 = {from_db_q27_per_db_micro};\n"
    ));

    fs::write(&dest, src).expect("failed to write generated fixed-point tables");
    println!("cargo:rerun-if-changed=build.rs");
}
