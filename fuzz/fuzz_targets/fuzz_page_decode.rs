#![no_main]

use chaindb_btree::page;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1_000_000 {
        return;
    }

    if let Ok((header, entries)) = page::decode(data) {
        // A page that decodes re-encodes to the same records
        let encoded = page::encode(&entries, header.lsn, header.detached);
        let (_, again) = page::decode(&encoded).expect("re-encoded page must decode");
        assert_eq!(entries, again);
    }
});
