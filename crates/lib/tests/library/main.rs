mod common;
mod compose_tests;
mod resolve_tests;
