use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use skewtest_core::engine::ShimLibrary;
use skewtest_core::provision::{OutputCapture, ShimToolchain, Watchdog, MONOTONIC_MARKER};
use skewtest_core::{SkewError, SkewResult};

/// Scripted behaviour of one self-test attempt.
enum Attempt {
    Pass,
    Fail,
    /// Emit these lines, then never finish.
    Hang(Vec<&'static str>),
}

#[derive(Default)]
struct Calls {
    fetch: AtomicU32,
    self_test: AtomicU32,
    clean: AtomicU32,
    patch: AtomicU32,
    install: AtomicU32,
}

struct FakeToolchain {
    attempts: Mutex<VecDeque<Attempt>>,
    calls: Calls,
}

impl FakeToolchain {
    fn new(attempts: Vec<Attempt>) -> Self {
        Self {
            attempts: Mutex::new(attempts.into()),
            calls: Calls::default(),
        }
    }
}

#[async_trait]
impl ShimToolchain for FakeToolchain {
    async fn fetch(&self) -> SkewResult<()> {
        self.calls.fetch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn self_test(&self, capture: &OutputCapture) -> SkewResult<()> {
        self.calls.self_test.fetch_add(1, Ordering::SeqCst);
        let next = self.attempts.lock().unwrap().pop_front();
        match next.expect("unexpected self-test attempt") {
            Attempt::Pass => Ok(()),
            Attempt::Fail => Err(SkewError::Step {
                step: "self-test".into(),
                message: "exited with 2".into(),
                output: vec!["FAIL".into()],
            }),
            Attempt::Hang(lines) => {
                for line in lines {
                    capture.push(line);
                }
                std::future::pending().await
            }
        }
    }

    async fn clean(&self) -> SkewResult<()> {
        self.calls.clean.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn apply_monotonic_fix(&self) -> SkewResult<()> {
        self.calls.patch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn install(&self) -> SkewResult<ShimLibrary> {
        self.calls.install.fetch_add(1, Ordering::SeqCst);
        Ok(ShimLibrary::default())
    }
}

fn watchdog(attempts: Vec<Attempt>) -> Watchdog<FakeToolchain> {
    Watchdog::new(FakeToolchain::new(attempts)).with_timeout(Duration::from_millis(50))
}

fn count(c: &AtomicU32) -> u32 {
    c.load(Ordering::SeqCst)
}

const MONOTONIC_HANG: &[&str] = &[
    "Running tests...",
    "CLOCK_MONOTONIC test: waiting for clock to advance",
];

#[tokio::test]
async fn clean_self_test_installs_once() {
    let wd = watchdog(vec![Attempt::Pass]);
    wd.provision().await.unwrap();

    let calls = &wd.toolchain().calls;
    assert_eq!(count(&calls.fetch), 1);
    assert_eq!(count(&calls.self_test), 1);
    assert_eq!(count(&calls.clean), 1);
    assert_eq!(count(&calls.patch), 0);
    assert_eq!(count(&calls.install), 1);
}

#[tokio::test]
async fn monotonic_hang_is_patched_and_retried_once() {
    let wd = watchdog(vec![Attempt::Hang(MONOTONIC_HANG.to_vec()), Attempt::Pass]);
    wd.provision().await.unwrap();

    let calls = &wd.toolchain().calls;
    assert_eq!(count(&calls.patch), 1);
    assert_eq!(count(&calls.self_test), 2);
    assert_eq!(count(&calls.clean), 2);
    assert_eq!(count(&calls.install), 1);
}

#[tokio::test]
async fn unrecognized_hang_fails_without_retry() {
    let wd = watchdog(vec![Attempt::Hang(vec!["make[1]: Entering directory"])]);
    let err = wd.provision().await.unwrap_err();

    match &err {
        SkewError::ProvisioningHang {
            attempts, output, ..
        } => {
            assert_eq!(*attempts, 1);
            assert_eq!(output, &vec!["make[1]: Entering directory".to_string()]);
        }
        other => panic!("expected ProvisioningHang, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 3);

    let calls = &wd.toolchain().calls;
    assert_eq!(count(&calls.patch), 0);
    assert_eq!(count(&calls.clean), 1);
    assert_eq!(count(&calls.install), 0);
}

#[tokio::test]
async fn silent_hang_is_unrecognized() {
    let wd = watchdog(vec![Attempt::Hang(vec![])]);
    let err = wd.provision().await.unwrap_err();
    assert!(err.to_string().contains("<no output>"), "{}", err);
}

#[tokio::test]
async fn second_monotonic_hang_is_fatal() {
    let wd = watchdog(vec![
        Attempt::Hang(MONOTONIC_HANG.to_vec()),
        Attempt::Hang(MONOTONIC_HANG.to_vec()),
    ]);
    let err = wd.provision().await.unwrap_err();

    assert!(matches!(err, SkewError::ProvisioningHang { attempts: 2, .. }));
    assert!(err.to_string().contains(MONOTONIC_MARKER));

    let calls = &wd.toolchain().calls;
    assert_eq!(count(&calls.patch), 1);
    assert_eq!(count(&calls.clean), 2);
    assert_eq!(count(&calls.install), 0);
}

#[tokio::test]
async fn failing_self_test_still_cleans() {
    let wd = watchdog(vec![Attempt::Fail]);
    let err = wd.provision().await.unwrap_err();

    assert!(matches!(err, SkewError::Step { .. }));
    assert_eq!(err.captured_output(), ["FAIL".to_string()]);
    assert_eq!(count(&wd.toolchain().calls.clean), 1);
    assert_eq!(count(&wd.toolchain().calls.install), 0);
}
