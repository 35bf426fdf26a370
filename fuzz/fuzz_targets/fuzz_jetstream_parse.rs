#![no_main]

use libfuzzer_sys::fuzz_target;

// Firehose frames are attacker-adjacent input; classification must never
// panic, only accept or skip.
fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = std::str::from_utf8(data) {
        let _ = bsky_core::jetstream::parse_post_event(raw);
    }
});
