#![no_main]

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use libfuzzer_sys::fuzz_target;
use tokio::io::{duplex, AsyncWriteExt};
use tokio::runtime::Runtime;
use wavelink::accept_async;

// Throws mutated handshake requests at the server-side negotiator; it must
// either upgrade or reject, never panic or hang.
fuzz_target!(|data: &[u8]| {
    let runtime = Runtime::new().unwrap();

    let data_vec = Vec::from(data);
    runtime.block_on(async move {
        let (mut client, server) = duplex(64 * 1024);

        tokio::spawn(async move {
            let handshake = build_fuzzed_handshake(&data_vec);
            let _ = client.write_all(&handshake).await;
        });

        if let Err(err) = accept_async(server).await {
            let _ = format!("{err:?}");
        }
    });
});

// Builds a handshake request whose key and some headers come from the fuzz
// input.
fn build_fuzzed_handshake(data: &[u8]) -> Vec<u8> {
    let mut handshake = String::from(
        "GET / HTTP/1.1\r\n\
         Host: 127.0.0.1\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n",
    );

    handshake.push_str(&format!(
        "Sec-WebSocket-Key: {}\r\n",
        BASE64_STANDARD.encode(data)
    ));
    handshake.push_str("Sec-WebSocket-Version: 13\r\n");

    if data.len() % 2 == 0 {
        handshake.push_str("Sec-WebSocket-Extensions: ");
        handshake.push_str(&String::from_utf8_lossy(data));
        handshake.push_str("\r\n");
    }

    handshake.push_str("\r\n");
    handshake.into_bytes()
}
