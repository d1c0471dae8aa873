#![no_main]

use kite_gateway::{parse_interaction, Interaction};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    match parse_interaction(data) {
        Ok(Interaction::Ping) => {}
        Ok(Interaction::Command { meta, invocation }) => {
            assert!(!meta.invoker_id.trim().is_empty());
            assert_eq!(meta.invoker_id, invocation.invoker_id);
        }
        Ok(Interaction::Component { meta, .. }) => {
            assert!(!meta.invoker_id.trim().is_empty());
        }
        Err(message) => assert!(!message.trim().is_empty()),
    }
});
