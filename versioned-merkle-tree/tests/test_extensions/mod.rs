#![allow(dead_code)]

mod fixtures;
mod tree_tester;

pub use fixtures::*;
pub use tree_tester::{TreeTester, merkle_tree_error};
