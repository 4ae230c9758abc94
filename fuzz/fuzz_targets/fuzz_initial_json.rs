#![no_main]

use libfuzzer_sys::fuzz_target;
use supermodel::Model;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let model = Model::from_json(text);

    // Whatever was accepted must survive a serialize/re-seed cycle.
    let reseeded = Model::from_json(&model.to_json_string());
    assert_eq!(reseeded.keys(), model.keys());
    assert_eq!(reseeded.len(), model.len());
});
