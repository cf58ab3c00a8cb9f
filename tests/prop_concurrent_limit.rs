// Property: concurrency limit is respected
//
// For any limit N and plan of M blocks, never more than N origin fetches are
// outstanding, every block is fetched exactly once, and results come back in
// plan order.

mod common;

use block_slice::cache_key::CacheKeyGenerator;
use block_slice::fetcher::BlockFetcher;
use block_slice::geometry::plan;
use block_slice::orchestrator::ParallelOrchestrator;
use common::{object_bytes, MockOrigin};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_concurrent_limit_enforcement(
        max_parallel in 1usize..8,
        num_blocks in 2u64..20,
        tail in 1u64..100,
    ) {
        let rt = Runtime::new().unwrap();

        let result: Result<(), TestCaseError> = rt.block_on(async {
            let block_size = 100;
            let object_size = (num_blocks - 1) * block_size + tail;
            let origin = Arc::new(MockOrigin::new(object_bytes(object_size as usize), block_size));
            origin.set_default_delay(Duration::from_millis(5));

            let keys = CacheKeyGenerator::new(block_size);
            let fetcher = Arc::new(BlockFetcher::new(origin.clone(), keys));
            let orchestrator = ParallelOrchestrator::new(fetcher, max_parallel);
            let plan = plan(object_size, block_size, None).unwrap();

            let blocks = orchestrator.fetch_all("/obj", &plan).await;
            prop_assert!(blocks.is_ok(), "fetch failed: {:?}", blocks.err());
            let blocks = blocks.unwrap();

            prop_assert_eq!(
                blocks.iter().map(|b| b.index).collect::<Vec<_>>(),
                plan.block_indices()
            );
            prop_assert_eq!(origin.calls(), num_blocks as usize);
            prop_assert!(
                origin.max_in_flight() <= max_parallel,
                "Concurrent limit violated! limit: {}, observed: {}",
                max_parallel,
                origin.max_in_flight()
            );
            Ok(())
        });

        result?;
    }
}

#[tokio::test]
async fn test_limit_is_reached_when_blocks_outnumber_it() {
    let block_size = 100;
    let origin = Arc::new(MockOrigin::new(object_bytes(1000), block_size));
    origin.set_default_delay(Duration::from_millis(30));

    let fetcher = Arc::new(BlockFetcher::new(origin.clone(), CacheKeyGenerator::new(block_size)));
    let orchestrator = ParallelOrchestrator::new(fetcher, 4);
    let plan = plan(1000, block_size, None).unwrap();

    orchestrator.fetch_all("/obj", &plan).await.unwrap();
    assert_eq!(origin.max_in_flight(), 4);
}

#[tokio::test]
async fn test_limit_of_one_is_sequential() {
    let block_size = 100;
    let origin = Arc::new(MockOrigin::new(object_bytes(550), block_size));
    origin.set_default_delay(Duration::from_millis(5));

    let fetcher = Arc::new(BlockFetcher::new(origin.clone(), CacheKeyGenerator::new(block_size)));
    let orchestrator = ParallelOrchestrator::new(fetcher, 1);
    let plan = plan(550, block_size, None).unwrap();

    orchestrator.fetch_all("/obj", &plan).await.unwrap();
    assert_eq!(origin.max_in_flight(), 1);
    assert_eq!(origin.requested_blocks(), vec![0, 1, 2, 3, 4, 5]);
}
