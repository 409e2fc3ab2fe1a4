#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
pub struct NamedCall {
    pub name: String,
    pub args: Vec<String>,
}

fuzz_target!(|input: NamedCall| {
    formula_sql::fuzz_helper::render_all(&input.name, &input.args);
});
