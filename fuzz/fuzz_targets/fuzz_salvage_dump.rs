#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|dump: &str| {
    if dump.len() > 1_000_000 {
        return;
    }
    let _ = chaindb::parse_dump(dump);
});
