mod helpers;

mod block_tests;
mod format_tests;
