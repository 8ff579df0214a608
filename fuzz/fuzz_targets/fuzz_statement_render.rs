#![no_main]

use clickhouse_dbplugin::client::{split_statements, substitute, Substitutions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(template) = std::str::from_utf8(data) else {
        return;
    };
    let substitutions = Substitutions::new()
        .with("name", "v-fuzz")
        .with("password", "{{name}};'");

    for statement in split_statements(template) {
        assert!(!statement.is_empty());
        let _ = substitute(statement, &substitutions);
    }
});
