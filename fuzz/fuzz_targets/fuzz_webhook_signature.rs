#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use scalazap::fuzz_api::validate_signature;

#[derive(Arbitrary, Debug)]
struct Input {
    app_secret: String,
    signature: String,
    body: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let _ = validate_signature(&input.app_secret, &input.signature, &input.body);
});
