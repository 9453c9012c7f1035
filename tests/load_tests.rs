#[cfg(test)]
mod tests {
    use async_conduit::{
        cancel::run_cancelable,
        errors::RunError,
        pipeline::{stage, stream_from_iter, Pipeline},
        pool::{Config, WorkerPool},
        retry::{run_with_retry, Backoff, RetryPolicy},
        signal::Signal,
        work,
    };
    use std::{
        future::Future,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    };

    async fn measure<F, Fut, T>(name: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let start = Instant::now();
        let result = f().await;
        let elapsed = start.elapsed();
        println!("✓ {}: {:?}", name, elapsed);
        result
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_test_1_small_fast_tasks() {
        println!("\n=== LOAD TEST 1: 10k fast tasks through the pool ===");
        let tasks: Vec<_> = (0..10_000usize)
            .map(|i| work::task(move || async move { Ok::<_, String>(i * 2) }))
            .collect();
        let pool = WorkerPool::new(tasks, Config::io_bound());

        let sum = Arc::new(AtomicUsize::new(0));
        let count = Arc::new(AtomicUsize::new(0));
        let (s, c) = (sum.clone(), count.clone());
        let consumers = pool
            .handle_each(move |v| {
                s.fetch_add(v, Ordering::Relaxed);
                c.fetch_add(1, Ordering::Relaxed);
            }, |_| {})
            .unwrap();

        measure("10k tasks", || pool.wait()).await;
        consumers.join().await.unwrap();

        assert_eq!(count.load(Ordering::Relaxed), 10_000);
        assert_eq!(sum.load(Ordering::Relaxed), (0..10_000usize).map(|i| i * 2).sum::<usize>());
        let metrics = pool.metrics();
        println!("  Succeeded: {}/{}", metrics.succeeded, 10_000);
        assert_eq!(metrics.success_rate(), 1.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_test_2_concurrent_submitters() {
        println!("\n=== LOAD TEST 2: submit from many tasks at once ===");
        let pool = WorkerPool::<usize, String>::with_config(Config::cpu_bound());
        let seen = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let (s, f) = (seen.clone(), failed.clone());
        let consumers = pool
            .handle_each(move |_| {
                s.fetch_add(1, Ordering::Relaxed);
            }, move |_| {
                f.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        let submitters: Vec<_> = (0..16)
            .map(|batch| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    for i in 0..250usize {
                        pool.submit(move || async move {
                            tokio::time::sleep(Duration::from_micros(50)).await;
                            if (batch * 250 + i) % 100 == 0 {
                                Err("every hundredth fails".to_string())
                            } else {
                                Ok(i)
                            }
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for s in submitters {
            s.await.unwrap();
        }

        measure("4k submitted tasks", || pool.wait()).await;
        consumers.join().await.unwrap();

        assert_eq!(seen.load(Ordering::Relaxed) + failed.load(Ordering::Relaxed), 4_000);
        assert_eq!(failed.load(Ordering::Relaxed), 40);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_test_3_stress_with_panics() {
        println!("\n=== LOAD TEST 3: pool stress with panics ===");

        // silence panic output for this test
        std::panic::set_hook(Box::new(|_| {}));

        let pool = WorkerPool::<usize, String>::with_config(Config::default().with_max_workers(8));
        let panicked = Arc::new(AtomicUsize::new(0));
        let ok = Arc::new(AtomicUsize::new(0));
        let (p, o) = (panicked.clone(), ok.clone());
        let consumers = pool
            .handle_each(move |_| {
                o.fetch_add(1, Ordering::Relaxed);
            }, move |err| {
                if matches!(err, RunError::Panicked(_)) {
                    p.fetch_add(1, Ordering::Relaxed);
                }
            })
            .unwrap();

        for x in 0..1_000usize {
            pool.submit(move || async move {
                if x % 10 == 0 {
                    panic!("Intentional panic at {}", x);
                }
                tokio::time::sleep(Duration::from_micros(100)).await;
                Ok(x)
            })
            .unwrap();
        }

        measure("1k tasks (10% panic)", || pool.wait()).await;
        consumers.join().await.unwrap();

        let _ = std::panic::take_hook();

        println!("  Succeeded: {}", ok.load(Ordering::Relaxed));
        println!("  Panics caught: {}", panicked.load(Ordering::Relaxed));
        assert_eq!(panicked.load(Ordering::Relaxed), 100);
        assert_eq!(ok.load(Ordering::Relaxed), 900);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_test_4_long_pipeline() {
        println!("\n=== LOAD TEST 4: 100k elements through 5 stages ===");
        let source = stream_from_iter(64, 0..100_000u64);
        let out = Pipeline::<u64, String>::new()
            .stage(stage::map(64, |v| v + 1))
            .stage(stage::map(64, |v| v * 2))
            .stage(stage::filter(64, |v| v % 4 == 0))
            .stage(stage::map(64, |v| v / 4))
            .stage(stage::inspect(64, |_| {}))
            .run(source)
            .unwrap();

        let got = measure("pipeline drain", || async move {
            let mut out = out;
            let mut got = Vec::with_capacity(50_000);
            while let Some(v) = out.recv().await {
                got.push(v);
            }
            got
        })
        .await;

        assert_eq!(got.len(), 50_000);
        assert!(got.windows(2).all(|w| w[0] < w[1]), "order must be preserved");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_test_5_retrying_tasks_in_pool() {
        println!("\n=== LOAD TEST 5: flaky tasks retried inside the pool ===");
        let attempts = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::<usize, String>::with_config(Config::default().with_max_workers(16));
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        let consumers = pool
            .handle_each(move |_| {
                d.fetch_add(1, Ordering::Relaxed);
            }, |err| panic!("no task should exhaust its budget: {}", err))
            .unwrap();

        for i in 0..500usize {
            let attempts = attempts.clone();
            pool.submit(move || async move {
                let policy = RetryPolicy::new()
                    .with_max_retries(3)
                    .with_backoff(Backoff::Exponential {
                        base: Duration::from_micros(100),
                        multiplier: 2.0,
                        max: Some(Duration::from_millis(1)),
                    });
                let tries = Arc::new(AtomicUsize::new(0));
                run_with_retry(move || {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    let n = tries.fetch_add(1, Ordering::Relaxed);
                    async move {
                        if n < i % 3 {
                            Err(format!("flaky {}", i))
                        } else {
                            Ok(i)
                        }
                    }
                }, policy)
                .await
                .map_err(|e| e.to_string())
            })
            .unwrap();
        }

        measure("500 flaky tasks", || pool.wait()).await;
        consumers.join().await.unwrap();

        assert_eq!(done.load(Ordering::Relaxed), 500);
        let expected: usize = (0..500usize).map(|i| i % 3 + 1).sum();
        assert_eq!(attempts.load(Ordering::Relaxed), expected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_test_6_mass_cancellation() {
        println!("\n=== LOAD TEST 6: 1k cancelable calls sharing one signal ===");
        let parent = Signal::new();
        let calls: Vec<_> = (0..1_000u64)
            .map(|i| {
                let signal = parent.child();
                tokio::spawn(async move {
                    run_cancelable(&signal, move || async move {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok::<_, String>(i)
                    })
                    .await
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        parent.cancel_with("shutting down");

        let results = measure("cancel 1k waiters", || async move {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(call.await.unwrap());
            }
            results
        })
        .await;

        assert!(results.iter().all(|r| matches!(r, Err(RunError::Cancelled(_)))));
    }
}
