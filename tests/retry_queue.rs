#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! Questions that arrive while every bot is busy wait for the retry loop

mod common;

use std::sync::Arc;
use std::time::Duration;

use docs_chat_bot::chat::{Delivery, ReplyMode};
use docs_chat_bot::config::Config;
use docs_chat_bot::messaging::MessageSink;
use tokio::sync::watch;

use common::{EchoCompletion, Outbox, index, service};

#[tokio::test]
async fn only_the_latest_question_per_user_is_retried() {
    let completion = EchoCompletion::new("Purr.");
    let service = service(
        completion.clone(),
        index(&[("cats are great", 0.9)]),
        &Config::default(),
    );
    let outbox = Outbox::default();
    service.pool().bots()[0].set_standby(true);

    for question in ["first question", "second question"] {
        let delivery = service
            .handle_question("conv-1", "u1", question, ReplyMode::Stream, &outbox)
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Queued);
    }
    assert_eq!(service.queue().len().await, 1);
    assert!(outbox.texts().is_empty());

    service.pool().bots()[0].set_standby(false);
    assert_eq!(service.retry_pending(&outbox).await, 1);

    assert!(service.queue().is_empty().await);
    assert_eq!(outbox.texts(), ["[BEGIN]Purr.\n[END]"]);
    let prompts = completion.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].user.ends_with("Question: second question\nAnswer:"));
}

#[tokio::test(start_paused = true)]
async fn retry_loop_delivers_and_stops_on_shutdown() {
    let mut config = Config::default();
    config.queue.retry_interval_seconds = 5;
    let service = Arc::new(service(
        EchoCompletion::new("Purr."),
        index(&[("cats are great", 0.9)]),
        &config,
    ));
    let outbox = Arc::new(Outbox::default());
    service.pool().bots()[0].set_standby(true);

    service
        .handle_question("conv-1", "u1", "cats?", ReplyMode::Stream, outbox.as_ref())
        .await
        .unwrap();
    service.pool().bots()[0].set_standby(false);

    let (tx, rx) = watch::channel(false);
    let sink: Arc<dyn MessageSink> = outbox.clone();
    let retry_loop = tokio::spawn(Arc::clone(&service).run_retry_loop(sink, rx));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(service.queue().is_empty().await);
    assert_eq!(outbox.texts(), ["[BEGIN]Purr.\n[END]"]);

    tx.send(true).unwrap();
    retry_loop.await.unwrap();
}
