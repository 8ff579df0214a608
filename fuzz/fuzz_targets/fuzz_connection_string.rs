#![no_main]

use clickhouse_dbplugin::client::ConnectionString;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(dsn) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(parsed) = ConnectionString::parse(dsn) else {
        return;
    };

    // Anything that parses and builds must parse back to the same value
    if let Ok(built) = parsed.build() {
        let reparsed = ConnectionString::parse(&built).expect("built DSN must parse");
        assert_eq!(reparsed.build().ok(), Some(built));
    }
});
