#![no_main]
use libfuzzer_sys::fuzz_target;

use obfs_socksproto::{SocksHandshake, SocksStatus};

fuzz_target!(|data: Vec<Vec<u8>>| {
    let mut hs = SocksHandshake::with_socks4_limit(256);
    let mut buf = Vec::new();
    for d in data {
        buf.extend_from_slice(&d);
        match hs.handshake(&buf) {
            Ok(action) => {
                buf.drain(..action.drain);
                if action.finished {
                    break;
                }
            }
            Err(e) if e.is_truncated() => {}
            Err(_) => return,
        }
    }
    if hs.request().is_some() && !hs.is_broken() {
        let _ = hs.reply(SocksStatus::SUCCEEDED);
    }
});
