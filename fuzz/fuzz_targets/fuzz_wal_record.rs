#![no_main]

use chaindb_wal::LogRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1_000_000 {
        return;
    }

    // Decoding arbitrary frames must fail cleanly, and whatever decodes
    // must encode to a frame of the length it was read from
    if let Ok((record, used)) = LogRecord::decode(data) {
        if let Ok(encoded) = record.encode() {
            assert_eq!(encoded.len(), used);
        }
    }
});
