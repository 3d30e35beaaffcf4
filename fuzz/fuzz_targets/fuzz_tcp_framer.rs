#![no_main]

use double_socket::core::tcp_framer::TcpFramer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First byte picks the chunk size, the rest is the stream
    let Some((&split, stream)) = data.split_first() else {
        return;
    };
    let mut framer = TcpFramer::new(4096);
    let mut total = 0usize;
    for chunk in stream.chunks(usize::from(split).max(1)) {
        if framer.feed(chunk, |p| total += p.len()).is_err() {
            return;
        }
    }
    assert!(total <= stream.len());
});
