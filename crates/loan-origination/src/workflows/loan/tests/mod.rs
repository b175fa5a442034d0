mod common;
mod machine;
