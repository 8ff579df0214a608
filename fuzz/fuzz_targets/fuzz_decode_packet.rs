#![no_main]

use clickhouse_dbplugin::protocol::constants::CLIENT_REVISION;
use clickhouse_dbplugin::protocol::decode_packet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Several packets may arrive in a single TCP segment
    let mut offset = 0;
    while offset < data.len() {
        match decode_packet(&data[offset..], CLIENT_REVISION) {
            Ok((_, consumed)) => {
                if consumed == 0 {
                    break;
                }
                offset += consumed;
            }
            Err(_) => break,
        }
    }
});
