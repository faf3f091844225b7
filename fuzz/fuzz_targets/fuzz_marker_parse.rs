#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Some(call) = toolsmith::tools::parser::parse_markers(text) {
            assert!(!call.name.is_empty());
        }
    }
});
