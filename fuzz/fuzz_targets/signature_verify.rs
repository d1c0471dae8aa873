#![no_main]

use kite_access::verify;
use libfuzzer_sys::fuzz_target;

const PUBLIC_KEY_HEX: &str = "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let mut parts = raw.splitn(3, '\n');
    let signature = parts.next().unwrap_or_default();
    let timestamp = parts.next().unwrap_or_default();
    let body = parts.next().unwrap_or_default();
    assert!(!verify(body.as_bytes(), signature, timestamp, PUBLIC_KEY_HEX));
    let _ = verify(body.as_bytes(), signature, timestamp, body);
});
