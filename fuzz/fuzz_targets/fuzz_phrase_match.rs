#![no_main]

use libfuzzer_sys::fuzz_target;

use bufo_bot::catalog::Bufo;
use bufo_bot::matcher::{extract_phrase, tokenize, BufoMatcher};

// Catalog filenames and post text are both external input; extraction,
// index construction, and matching must never panic.
fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let (name, post) = text.split_once('\n').unwrap_or((text, text));
        let _ = extract_phrase(name);
        let _ = tokenize(post);
        let bufo = Bufo {
            name: name.to_string(),
            url: String::new(),
        };
        if let Ok(matcher) = BufoMatcher::new(vec![bufo], 1) {
            let _ = matcher.find_match(post);
        }
    }
});
