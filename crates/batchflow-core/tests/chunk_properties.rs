//! Property tests for chunk counters
//!
//! For any source length, chunk size and worker count: every item is read once,
//! written unless filtered, and the step commits ceil(len / chunk) times.

mod common;

use batchflow_core::item::{CollectingItemWriter, FnItemProcessor, ListItemReader};
use batchflow_core::{BatchStatus, ChunkStepBuilder, JobBuilder};
use proptest::prelude::*;
use std::sync::Arc;

fn run_copy(len: usize, chunk: usize, workers: usize, modulo: i32) -> (BatchStatus, [u64; 4], usize) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let writer = Arc::new(CollectingItemWriter::new());
        let copy = ChunkStepBuilder::new("copy", chunk)
            .reader(ListItemReader::new(0..len as i32))
            .processor(FnItemProcessor::new(move |n: &i32| {
                Ok((n % modulo != 0).then_some(*n))
            }))
            .writer(Arc::clone(&writer))
            .throttle_limit(workers)
            .build()
            .unwrap();
        let job = JobBuilder::new("propertyJob").start(copy).build().unwrap();

        let execution = common::run_once(job).await;
        let step = common::step(&execution, "copy");
        let counts = [
            step.read_count(),
            step.write_count(),
            step.filter_count(),
            step.commit_count(),
        ];
        (step.status, counts, writer.items().len())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_commit_count_is_ceiling_of_len_over_chunk(
        len in 0usize..60,
        chunk in 1usize..9,
        workers in 1usize..5,
        modulo in 2i32..6,
    ) {
        let (status, [read, write, filter, commit], written) = run_copy(len, chunk, workers, modulo);
        let filtered = (0..len as i32).filter(|n| n % modulo == 0).count() as u64;

        prop_assert_eq!(status, BatchStatus::Completed);
        prop_assert_eq!(read, len as u64);
        prop_assert_eq!(filter, filtered);
        prop_assert_eq!(write, len as u64 - filtered);
        prop_assert_eq!(written as u64, write);
        prop_assert_eq!(commit, len.div_ceil(chunk) as u64);
    }
}
