use std::future::Future;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Why a raced future did not finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Deadline,
    Signal,
}

/// Run `fut` until it completes, `deadline` passes, or `signal` fires.
///
/// Several phases can share one absolute deadline by calling this in turn,
/// each phase getting only what is left of the budget.
pub async fn race<F>(
    fut: F,
    deadline: Instant,
    signal: Option<&Notify>,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    let stop = async {
        match signal {
            Some(signal) => signal.notified().await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        biased;
        _ = stop => Err(Interrupted::Signal),
        out = tokio::time::timeout_at(deadline, fut) => out.map_err(|_| Interrupted::Deadline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completes_before_deadline() {
        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(race(async { 7 }, deadline, None).await, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let deadline = Instant::now() + Duration::from_millis(50);
        let slow = tokio::time::sleep(Duration::from_secs(10));
        assert_eq!(race(slow, deadline, None).await, Err(Interrupted::Deadline));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_phase_gets_remaining_budget() {
        let deadline = Instant::now() + Duration::from_millis(100);
        let first = race(tokio::time::sleep(Duration::from_millis(70)), deadline, None).await;
        assert!(first.is_ok());
        // 50ms would fit a fresh budget but not the 30ms left over.
        let second = race(tokio::time::sleep(Duration::from_millis(50)), deadline, None).await;
        assert_eq!(second, Err(Interrupted::Deadline));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_interrupts() {
        let signal = Arc::new(Notify::new());
        let deadline = Instant::now() + Duration::from_secs(10);
        let notifier = Arc::clone(&signal);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            notifier.notify_one();
        });
        let slow = tokio::time::sleep(Duration::from_secs(5));
        assert_eq!(
            race(slow, deadline, Some(&signal)).await,
            Err(Interrupted::Signal)
        );
    }

    #[tokio::test]
    async fn test_signal_sent_before_race_is_seen() {
        let signal = Notify::new();
        signal.notify_one();
        let deadline = Instant::now() + Duration::from_secs(10);
        let pending = std::future::pending::<()>();
        assert_eq!(
            race(pending, deadline, Some(&signal)).await,
            Err(Interrupted::Signal)
        );
    }
}
