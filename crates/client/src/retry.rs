//! 指数バックオフ付きの再試行。
//!
//! [`ClientError::is_retryable`] が真のエラーだけを再試行し、それ以外は即座に返す。

use std::future::Future;
use std::time::Duration;

use crate::error::ClientError;

/// 再試行の設定。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 初回の後に再試行する最大回数
    pub max_retries: u32,
    /// 初回の再試行までの待ち時間（以降2倍ずつ延びる）
    pub base_delay: Duration,
}

/// 待ち時間の上限
const MAX_DELAY: Duration = Duration::from_secs(30);

impl RetryPolicy {
    /// `attempt` 回目（0始まり）の失敗の後に待つ時間。
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_DELAY)
    }
}

/// `f` を最大 `max_retries + 1` 回呼び出す。
pub(crate) async fn retry<T, F, Fut>(policy: RetryPolicy, what: &str, f: F) -> Result<T, ClientError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    "{what}に失敗しました。{delay:?}後に再試行します: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    /// 再試行可能なエラーで全回数を使い切ることを確認
    #[tokio::test]
    async fn test_retry_exhausts_all_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = retry(fast(3), "送信", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Network("connection refused".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(ClientError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    /// 再試行できないエラーは1回で返ることを確認
    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = retry(fast(5), "送信", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Integrity {
                    expected: "a".into(),
                    actual: "b".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(ClientError::Integrity { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// 途中で成功すればその値を返すことを確認
    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry(fast(5), "送信", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClientError::Backend {
                        status: 503,
                        message: "busy".into(),
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(800));
        assert_eq!(policy.delay(40), MAX_DELAY);
    }
}
