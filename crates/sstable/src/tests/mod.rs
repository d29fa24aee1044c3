mod helpers;

mod block_tests;
mod writer_tests;
