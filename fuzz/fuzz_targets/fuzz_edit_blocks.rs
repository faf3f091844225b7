#![no_main]
use libfuzzer_sys::fuzz_target;
use toolsmith::tools::edit::{apply_blocks, parse_blocks};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // The proposal doubles as the file so matches actually happen.
        let blocks = parse_blocks(text);
        let report = apply_blocks(text, &blocks);
        assert_eq!(report.applied + report.failed.len() + report.duplicates, blocks.len());
    }
});
