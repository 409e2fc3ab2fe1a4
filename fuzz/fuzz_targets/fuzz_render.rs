#![no_main]
use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;

#[derive(Debug)]
pub struct CallInput {
    pub function: usize,
    pub args: Vec<String>,
}

const MAX_ARGS: usize = 6;
const MAX_ARG_LENGTH: usize = 200;

const SHAPES: [&str; 10] = [
    "NULL", "''", "'x'", "1", "-2.5", "TRUE", "\"a\"", "\"t\"", "\"j\"", "\"d\"",
];

fn random_arg(u: &mut Unstructured) -> arbitrary::Result<String> {
    if u.arbitrary()? {
        return Ok(u.choose(&SHAPES)?.to_string());
    }
    let s: String = u.arbitrary()?;
    Ok(s.chars().take(MAX_ARG_LENGTH).collect())
}

impl<'a> Arbitrary<'a> for CallInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
        let function = u.arbitrary()?;
        let count = u.int_in_range(0..=MAX_ARGS)?;
        let args = (0..count)
            .map(|_| random_arg(u))
            .collect::<arbitrary::Result<_>>()?;
        Ok(CallInput { function, args })
    }
}

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = Unstructured::new(data).arbitrary::<CallInput>() {
        formula_sql::fuzz_helper::render_nth(input.function, &input.args);
    }
});
