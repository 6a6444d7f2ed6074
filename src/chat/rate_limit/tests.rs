use super::*;

fn limiter() -> RateLimiter {
    RateLimiter::from_config(&RateLimitConfig::default())
}

#[tokio::test]
async fn sixth_request_in_window_is_rejected() {
    let limiter = limiter();
    let start = Instant::now();

    for second in 0..5 {
        limiter
            .check_and_record_at("conv", start + Duration::from_secs(second))
            .await
            .expect("request within burst should pass");
    }

    let result = limiter
        .check_and_record_at("conv", start + Duration::from_secs(10))
        .await;
    match result {
        Err(ChatBotError::RateLimitExceeded { retry_after }) => {
            assert_eq!(retry_after, Duration::from_secs(50));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn requests_pass_again_after_the_window() {
    let limiter = limiter();
    let start = Instant::now();

    for _ in 0..5 {
        limiter
            .check_and_record_at("conv", start)
            .await
            .expect("request within burst should pass");
    }
    assert!(limiter.check_and_record_at("conv", start).await.is_err());

    limiter
        .check_and_record_at("conv", start + Duration::from_secs(61))
        .await
        .expect("request after the window should pass");
}

#[tokio::test]
async fn conversations_are_limited_separately() {
    let limiter = RateLimiter::new(1, Duration::from_secs(60));
    let now = Instant::now();

    limiter
        .check_and_record_at("a", now)
        .await
        .expect("first request should pass");
    assert!(limiter.check_and_record_at("a", now).await.is_err());
    limiter
        .check_and_record_at("b", now)
        .await
        .expect("other conversation should pass");
}

#[tokio::test]
async fn rejected_requests_are_not_recorded() {
    let limiter = RateLimiter::new(2, Duration::from_secs(60));
    let start = Instant::now();

    limiter.check_and_record_at("c", start).await.expect("pass");
    limiter
        .check_and_record_at("c", start + Duration::from_secs(30))
        .await
        .expect("pass");
    for second in 31..40 {
        assert!(
            limiter
                .check_and_record_at("c", start + Duration::from_secs(second))
                .await
                .is_err()
        );
    }

    // Only the first request has expired, so exactly one slot is free.
    limiter
        .check_and_record_at("c", start + Duration::from_secs(61))
        .await
        .expect("pass");
    assert!(
        limiter
            .check_and_record_at("c", start + Duration::from_secs(62))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn idle_windows_are_evicted() {
    let limiter = limiter();
    let start = Instant::now();

    limiter.check_and_record_at("old", start).await.expect("pass");
    limiter
        .check_and_record_at("new", start + Duration::from_secs(50))
        .await
        .expect("pass");
    assert_eq!(limiter.tracked_conversations().await, 2);

    let evicted = limiter.evict_idle_at(start + Duration::from_secs(70)).await;
    assert_eq!(evicted, 1);
    assert_eq!(limiter.tracked_conversations().await, 1);
}

#[tokio::test]
async fn error_message_reports_seconds() {
    let error = ChatBotError::RateLimitExceeded {
        retry_after: Duration::from_millis(1500),
    };
    assert_eq!(
        error.to_string(),
        "Rate limit exceeded. You can make the next request after 1.50 seconds."
    );
}
