use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "pep9.pest"]
pub struct PepParser;
