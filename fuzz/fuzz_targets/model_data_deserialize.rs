#![no_main]

use bytes::Bytes;
use cfnagg::wire::ModelData;
use libfuzzer_sys::fuzz_target;

// The first byte picks `expected_p` out of a small range so the fuzzer can
// still reach the "exactly enough bytes" and "one byte short" boundaries
// instead of almost always landing on TruncatedParameters.
fuzz_target!(|data: &[u8]| {
    let Some((&p_byte, rest)) = data.split_first() else {
        return;
    };
    let expected_p = (p_byte as usize) % 64;
    let _ = ModelData::deserialize(Bytes::copy_from_slice(rest), expected_p);
});
