use super::*;
use crate::memory::MemoryTransport;
use crate::registry::{ChannelState, ChannelStatus};
use livewire_config::LivewireConfig;
use serde_json::json;
use std::time::Duration;

fn steady_config(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        base_delay_ms: 1_000,
        max_delay_ms: 30_000,
        jitter: 0.0,
        max_attempts,
    }
}

fn fixture(max_attempts: u32) -> (ChannelRegistry, Arc<MemoryTransport>, ReconnectionSupervisor) {
    let transport = Arc::new(MemoryTransport::connected());
    let registry = ChannelRegistry::new(transport.clone(), &LivewireConfig::default());
    let supervisor = ReconnectionSupervisor::spawn(&registry, &steady_config(max_attempts));
    (registry, transport, supervisor)
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn advance(secs: u64) {
    tokio::time::advance(Duration::from_secs(secs)).await;
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn reconnects_and_rejoins_after_a_drop() {
    let (registry, transport, supervisor) = fixture(5);
    let handle = registry.subscribe("room").await.unwrap();
    handle.track(json!({"status": "online"})).await.unwrap();
    assert_eq!(supervisor.status(), SupervisorStatus::Connected);

    transport.set_connected(false).await;
    settle().await;
    assert_eq!(supervisor.status(), SupervisorStatus::Reconnecting { attempt: 1 });
    assert!(matches!(
        handle.status(),
        ChannelStatus::Reconnecting {
            last_error: Some(TransportError::Closed)
        }
    ));

    advance(1).await;
    assert_eq!(supervisor.status(), SupervisorStatus::Connected);
    assert_eq!(handle.status(), ChannelStatus::Subscribed);
    assert_eq!(transport.open_count("room").await, 2);
    assert_eq!(transport.track_count("room").await, 2);
    assert_eq!(registry.ref_count("room").await, 1);
}

#[tokio::test(start_paused = true)]
async fn delays_double_between_failed_attempts() {
    let (_registry, transport, supervisor) = fixture(5);
    transport.fail_next_connects(2).await;
    transport.set_connected(false).await;
    settle().await;

    advance(1).await;
    assert_eq!(transport.connect_calls().await, 1);
    assert_eq!(supervisor.status(), SupervisorStatus::Reconnecting { attempt: 2 });

    advance(1).await;
    assert_eq!(transport.connect_calls().await, 1);
    advance(1).await;
    assert_eq!(transport.connect_calls().await, 2);
    assert_eq!(supervisor.status(), SupervisorStatus::Reconnecting { attempt: 3 });

    advance(3).await;
    assert_eq!(transport.connect_calls().await, 2);
    advance(1).await;
    assert_eq!(transport.connect_calls().await, 3);
    assert_eq!(supervisor.status(), SupervisorStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_reports_disconnect_and_keeps_registrations() {
    let (registry, transport, supervisor) = fixture(3);
    let handle = registry.subscribe("room").await.unwrap();
    transport.fail_next_connects(100).await;
    transport.set_connected(false).await;

    // Round of three ends at 7s; one quiet retry follows at 37s.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(supervisor.status(), SupervisorStatus::Disconnected { attempts: 3 });
    assert_eq!(transport.connect_calls().await, 4);
    assert_eq!(handle.status(), ChannelStatus::Disconnected);
    assert_eq!(registry.ref_count("room").await, 1);
    assert_eq!(registry.state("room").await, Some(ChannelState::Reconnecting));

    transport.fail_next_connects(0).await;
    supervisor.retry_now();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(supervisor.status(), SupervisorStatus::Connected);
    assert_eq!(handle.status(), ChannelStatus::Subscribed);
}

#[tokio::test(start_paused = true)]
async fn keeps_retrying_at_the_cap_after_giving_up() {
    let (registry, transport, supervisor) = fixture(3);
    let handle = registry.subscribe("room").await.unwrap();
    handle.track(json!({"status": "online"})).await.unwrap();
    transport.fail_next_connects(3).await;
    transport.set_connected(false).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(supervisor.status(), SupervisorStatus::Disconnected { attempts: 3 });
    assert_eq!(handle.status(), ChannelStatus::Disconnected);
    assert_eq!(transport.connect_calls().await, 3);

    // Connectivity is back; nobody calls retry_now.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.connect_calls().await, 4);
    assert_eq!(supervisor.status(), SupervisorStatus::Connected);
    assert_eq!(handle.status(), ChannelStatus::Subscribed);
    assert_eq!(transport.open_count("room").await, 2);
    assert!(transport.track_count("room").await >= 2);
}

#[tokio::test(start_paused = true)]
async fn quiet_retries_stay_disconnected_and_spaced() {
    let (registry, transport, supervisor) = fixture(2);
    let _handle = registry.subscribe("room").await.unwrap();
    transport.fail_next_connects(100).await;
    transport.set_connected(false).await;

    // Round of two ends at 3s, then one attempt every 30s.
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(transport.connect_calls().await, 5);
    assert_eq!(supervisor.status(), SupervisorStatus::Disconnected { attempts: 2 });
}

#[tokio::test(start_paused = true)]
async fn external_reconnect_after_exhaustion_rejoins() {
    let (registry, transport, supervisor) = fixture(1);
    let handle = registry.subscribe("room").await.unwrap();
    transport.fail_next_connects(100).await;
    transport.set_connected(false).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(supervisor.status(), SupervisorStatus::Disconnected { attempts: 1 });

    transport.set_connected(true).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(supervisor.status(), SupervisorStatus::Connected);
    assert_eq!(handle.status(), ChannelStatus::Subscribed);
}

#[tokio::test(start_paused = true)]
async fn failed_first_open_is_retried_for_late_subscribers() {
    let (registry, transport, _supervisor) = fixture(5);
    transport.fail_next_opens(1).await;

    assert!(registry.subscribe("room").await.is_err());
    let late = registry.subscribe("room").await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(late.status(), ChannelStatus::Subscribed);
    assert_eq!(transport.open_count("room").await, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_first_open_without_subscribers_is_closed() {
    let (registry, transport, _supervisor) = fixture(5);
    transport.fail_next_opens(1).await;

    assert!(registry.subscribe("room").await.is_err());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(registry.channel_count().await, 0);
    assert_eq!(transport.open_count("room").await, 0);
}

#[tokio::test(start_paused = true)]
async fn bounce_between_observations_is_detected() {
    let (registry, transport, supervisor) = fixture(5);
    let handle = registry.subscribe("room").await.unwrap();

    // Down and up again before the supervisor runs.
    transport.set_connected(false).await;
    transport.set_connected(true).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(supervisor.status(), SupervisorStatus::Connected);
    assert_eq!(handle.status(), ChannelStatus::Subscribed);
    assert_eq!(transport.open_count("room").await, 2);
}

#[tokio::test(start_paused = true)]
async fn starts_a_round_when_spawned_disconnected() {
    let transport = Arc::new(MemoryTransport::new());
    let registry = ChannelRegistry::new(transport.clone(), &LivewireConfig::default());
    let supervisor = ReconnectionSupervisor::spawn(&registry, &steady_config(3));
    assert_eq!(supervisor.status(), SupervisorStatus::Disconnected { attempts: 0 });

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(supervisor.status(), SupervisorStatus::Connected);
    assert_eq!(transport.connect_calls().await, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_supervision() {
    let (_registry, transport, mut supervisor) = fixture(5);
    supervisor.shutdown();
    transport.set_connected(false).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.connect_calls().await, 0);
}
