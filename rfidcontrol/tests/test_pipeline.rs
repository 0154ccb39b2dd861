mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use common::{Rig, card, cards, device, receivers, rig, wait_for};
use rfidcontrol::led::StatusLed;
use rfidcontrol::pipeline::{CardPipeline, PipelineOutcome};
use rfidcontrol::{CardId, PlayerContext, PlayerSettings};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn settings() -> PlayerSettings {
    PlayerSettings {
        read_timeout: Duration::from_millis(100),
        play_timeout: Duration::from_millis(300),
        play_retry_interval: Duration::from_millis(50),
        retry_blink_period: Duration::from_millis(20),
        ..Default::default()
    }
}

fn pipeline(ctx: &Arc<PlayerContext>, rig: &Rig, volume: &Arc<AtomicU32>) -> CardPipeline {
    CardPipeline::new(
        ctx.clone(),
        rig.hardware.clone(),
        StatusLed::new(rig.hardware.leds.clone()),
        volume.clone(),
    )
}

fn lullabies_id() -> CardId {
    CardId::new(vec![0xa1, 0xb2, 0xc3, 0xd4, 0xe5])
}

#[tokio::test]
async fn test_read_timeout_ends_the_cycle() {
    let dir = TempDir::new().unwrap();
    let rx = receivers(dir.path(), vec![device("LivingRoom", "192.168.1.30")], vec![]);
    let ctx = PlayerContext::new(cards(dir.path(), vec![]), rx.session.clone(), settings());
    let rig = rig();
    let volume = Arc::new(AtomicU32::new(50));

    let started = Instant::now();
    let outcome = pipeline(&ctx, &rig, &volume)
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome, PipelineOutcome::ReadFailed);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(rx.connector.connects().is_empty());
}

#[tokio::test]
async fn test_unknown_card_is_not_played() {
    let dir = TempDir::new().unwrap();
    let rx = receivers(dir.path(), vec![device("LivingRoom", "192.168.1.30")], vec![]);
    let ctx = PlayerContext::new(cards(dir.path(), vec![]), rx.session.clone(), settings());
    let rig = rig();
    rig.reader.push(CardId::new(vec![0x01, 0x02]));
    let volume = Arc::new(AtomicU32::new(50));

    let outcome = pipeline(&ctx, &rig, &volume)
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome, PipelineOutcome::UnknownCard("0102".to_string()));
    assert!(rx.connector.connects().is_empty());
}

#[tokio::test]
async fn test_retry_gives_up_after_budget() {
    let dir = TempDir::new().unwrap();
    let rx = receivers(dir.path(), vec![], vec![]);
    let registry = cards(
        dir.path(),
        vec![card("a1b2c3d4e5", "Lullabies", "LivingRoom", &["http://host/a.mp3"])],
    );
    let ctx = PlayerContext::new(registry, rx.session.clone(), settings());
    let rig = rig();
    rig.reader.push(lullabies_id());
    let volume = Arc::new(AtomicU32::new(50));

    let started = Instant::now();
    let outcome = pipeline(&ctx, &rig, &volume)
        .run(CancellationToken::new())
        .await;

    assert_eq!(outcome, PipelineOutcome::PlayFailed);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(2));
    // Red left lit (lines are active low).
    assert_eq!(rig.leds.current()[0], 0);
    assert!(rig.leds.writes().len() > 1);
}

#[tokio::test]
async fn test_cancel_during_retry_returns_promptly() {
    let dir = TempDir::new().unwrap();
    let rx = receivers(dir.path(), vec![], vec![]);
    let registry = cards(
        dir.path(),
        vec![card("a1b2c3d4e5", "Lullabies", "LivingRoom", &["http://host/a.mp3"])],
    );
    let ctx = PlayerContext::new(
        registry,
        rx.session.clone(),
        PlayerSettings {
            play_timeout: Duration::from_secs(10),
            ..settings()
        },
    );
    let rig = rig();
    rig.reader.push(lullabies_id());
    let volume = Arc::new(AtomicU32::new(50));

    let cancel = CancellationToken::new();
    let task = tokio::spawn(pipeline(&ctx, &rig, &volume).run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(120)).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_millis(500), task)
        .await
        .expect("pipeline did not stop")
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Cancelled);
}

#[tokio::test]
async fn test_played_card_seeds_volume_and_follows_encoder() {
    let dir = TempDir::new().unwrap();
    let rx = receivers(dir.path(), vec![device("LivingRoom", "192.168.1.30")], vec![]);
    let registry = cards(
        dir.path(),
        vec![card("a1b2c3d4e5", "Lullabies", "LivingRoom", &["http://host/a.mp3"])],
    );
    let ctx = PlayerContext::new(registry, rx.session.clone(), settings());
    let rig = rig();
    rig.reader.push(lullabies_id());
    let volume = Arc::new(AtomicU32::new(50));

    let cancel = CancellationToken::new();
    let task = tokio::spawn(pipeline(&ctx, &rig, &volume).run(cancel.clone()));

    assert!(
        wait_for(|| rx
            .connector
            .link("LivingRoom")
            .is_some_and(|l| l.called("load:http://host/a.mp3")))
        .await
    );
    assert!(wait_for(|| volume.load(Ordering::SeqCst) == 40).await);
    assert!(wait_for(|| rig.leds.current() == vec![1, 0, 1]).await);

    // Five clockwise steps: 40 -> 45.
    for (a, b) in [(1, 0), (1, 1), (0, 1), (0, 0), (1, 0)] {
        tokio::time::sleep(Duration::from_millis(20)).await;
        rig.encoder.set(&[a, b]);
    }
    let link = rx.connector.link("LivingRoom").unwrap();
    assert!(wait_for(|| link.called("set_volume:0.45")).await);
    assert!(wait_for(|| volume.load(Ordering::SeqCst) == 45).await);

    cancel.cancel();
    assert_eq!(task.await.unwrap(), PipelineOutcome::Played);
}

#[tokio::test]
async fn test_cancel_while_seeding_volume_returns_promptly() {
    let dir = TempDir::new().unwrap();
    let rx = receivers(dir.path(), vec![device("LivingRoom", "192.168.1.30")], vec![]);
    rx.connector.slow_down("volume");
    let registry = cards(
        dir.path(),
        vec![card("a1b2c3d4e5", "Lullabies", "LivingRoom", &["http://host/a.mp3"])],
    );
    let ctx = PlayerContext::new(registry, rx.session.clone(), settings());
    let rig = rig();
    rig.reader.push(lullabies_id());
    let volume = Arc::new(AtomicU32::new(50));

    let cancel = CancellationToken::new();
    let task = tokio::spawn(pipeline(&ctx, &rig, &volume).run(cancel.clone()));
    assert!(
        wait_for(|| rx
            .connector
            .link("LivingRoom")
            .is_some_and(|l| l.called("load:http://host/a.mp3")))
        .await
    );

    let started = Instant::now();
    cancel.cancel();
    let outcome = tokio::time::timeout(Duration::from_millis(500), task)
        .await
        .expect("volume seed ignored the cancellation")
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(volume.load(Ordering::SeqCst), 50);
}
