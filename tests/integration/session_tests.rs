//! Session lifecycle against the scripted controller: phased sync,
//! superseded attempts, teardown, exclusive windows and pairing retry.

use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use async_io_mini::Timer;
use autowater_link::correlate::RequestKey;
use autowater_link::gatt::{self, BACKGROUND_SUBSCRIPTIONS, ESSENTIAL_SUBSCRIPTIONS};
use autowater_link::layout::Value;
use autowater_link::{
    Capability, CapabilityState, DisconnectReason, Endpoint, Error, LinkEvent, LinkState, Resource,
    TransportError,
};
use futures_lite::future;

use crate::mock_link::{Call, MockTransport, fast_config, wait_until, with_session};

// ── Connect and phased sync ──────────────────────────────────

#[test]
fn connect_runs_phases_in_order() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        session.connect("aw-1").await.unwrap();
        assert_eq!(session.state(), LinkState::Connected);
        assert_eq!(session.device().as_deref(), Some("aw-1"));

        let all = events.all();
        assert_eq!(
            all[0],
            LinkEvent::Connecting {
                device: "aw-1".into()
            }
        );
        let setup = events
            .position(&LinkEvent::SetupStatus {
                complete: Some(true),
            })
            .unwrap();
        let ready = events.position(&LinkEvent::Ready).unwrap();
        assert!(setup < ready);

        // Phase 0 then Phase 1, before anything from the background.
        let reads: Vec<Endpoint> = mock
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Read(ep) => Some(ep),
                _ => None,
            })
            .collect();
        assert_eq!(
            &reads[..5],
            &[
                gatt::ONBOARDING,
                gatt::ENVIRONMENT,
                gatt::RAIN,
                gatt::CURRENT_TASK,
                gatt::SYSTEM_CONFIG
            ]
        );
        let env = session.snapshot(Resource::Environment).unwrap();
        assert_eq!(env.get("temperature_c"), Some(&Value::Float(21.5)));

        wait_until(|| events.sync_finished().is_some()).await;
        assert_eq!(events.sync_finished(), Some(0));
        assert_eq!(
            session.subscriptions().len(),
            ESSENTIAL_SUBSCRIPTIONS.len() + BACKGROUND_SUBSCRIPTIONS.len()
        );
        // The controller reports two channels.
        assert!(session.snapshot(Resource::ChannelConfig(1)).is_some());
        assert!(session.snapshot(Resource::ChannelConfig(2)).is_none());
        assert!(session.snapshot(Resource::Alarm).is_some());
    });
}

#[test]
fn priority_and_bond_precede_the_first_read() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, _events| {
        session.connect("aw-1").await.unwrap();
        let calls = mock.calls();
        assert_eq!(calls[0], Call::Connect("aw-1".into()));
        assert_eq!(calls[1], Call::Priority);
        assert_eq!(calls[2], Call::Bond);
        assert_eq!(calls[3], Call::Read(gatt::ONBOARDING));
    });
}

#[test]
fn unreadable_setup_status_routes_as_unknown() {
    let mock = MockTransport::controller();
    mock.fail_reads(gatt::ONBOARDING, [TransportError::Io("gatt 0x85".into())]);
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        session.connect("aw-1").await.unwrap();
        assert!(events.contains(&LinkEvent::SetupStatus { complete: None }));
        assert_eq!(session.state(), LinkState::Connected);
    });
}

#[test]
fn essential_read_failure_tears_down() {
    let mock = MockTransport::controller();
    mock.fail_reads(gatt::SYSTEM_CONFIG, [TransportError::Io("gatt 0x0e".into())]);
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        let result = session.connect("aw-1").await;
        assert_eq!(result, Err(Error::Transport(TransportError::Io("gatt 0x0e".into()))));
        assert_eq!(session.state(), LinkState::Disconnected);
        assert!(session.device().is_none());
        assert!(!events.contains(&LinkEvent::Ready));
        assert_eq!(
            events.all().last(),
            Some(&LinkEvent::Disconnected {
                reason: DisconnectReason::SyncFailed
            })
        );
        assert!(mock.calls().contains(&Call::Disconnect));
        assert!(session.snapshot(Resource::Environment).is_none());
    });
}

#[test]
fn missing_sensors_are_tolerated_and_cached() {
    let mock = MockTransport::controller();
    mock.remove(gatt::ENVIRONMENT);
    mock.remove(gatt::RAIN);
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        session.connect("aw-1").await.unwrap();
        assert_eq!(session.capability(Capability::EnvironmentSensor), CapabilityState::Absent);
        assert_eq!(session.capability(Capability::RainSensor), CapabilityState::Absent);

        wait_until(|| events.sync_finished().is_some()).await;
        assert_eq!(events.sync_finished(), Some(0));
        assert_eq!(mock.count(|c| *c == Call::Subscribe(gatt::ENVIRONMENT)), 0);

        // Short-circuits without touching the radio.
        let before = mock.reads_of(gatt::RAIN);
        let read = session.read_resource(Resource::Rain).await;
        assert_eq!(read, Err(Error::Transport(TransportError::CharacteristicNotFound)));
        assert_eq!(mock.reads_of(gatt::RAIN), before);
    });
}

#[test]
fn connect_to_same_device_is_idempotent() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, _events| {
        session.connect("aw-1").await.unwrap();
        let id = session.connection_id();
        session.connect("aw-1").await.unwrap();
        assert_eq!(session.connection_id(), id);
        assert_eq!(mock.count(|c| matches!(c, Call::Connect(_))), 1);
    });
}

#[test]
fn second_connect_while_connecting_is_rejected() {
    let mock = MockTransport::controller();
    mock.delay_connect("aw-1", Duration::from_millis(60));
    with_session(Rc::clone(&mock), fast_config(), async |session, _events| {
        let (first, second) = future::zip(session.connect("aw-1"), async {
            Timer::after(Duration::from_millis(10)).await;
            session.connect("aw-2").await
        })
        .await;
        assert_eq!(first, Ok(()));
        assert_eq!(second, Err(Error::AlreadyConnecting));
        assert_eq!(session.device().as_deref(), Some("aw-1"));
    });
}

#[test]
fn forced_reconnect_supersedes_attempt_in_progress() {
    let mock = MockTransport::controller();
    mock.delay_connect("aw-a", Duration::from_millis(100));
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        let (a, b) = future::zip(session.connect("aw-a"), async {
            Timer::after(Duration::from_millis(10)).await;
            session.reconnect("aw-b").await
        })
        .await;

        assert_eq!(a, Err(Error::Superseded));
        assert_eq!(b, Ok(()));
        assert_eq!(session.state(), LinkState::Connected);
        assert_eq!(session.device().as_deref(), Some("aw-b"));

        // Only B reached Ready, and nothing from A tore B down afterwards.
        let ready = events.all().iter().filter(|e| **e == LinkEvent::Ready).count();
        assert_eq!(ready, 1);
        let ready_at = events.position(&LinkEvent::Ready).unwrap();
        assert!(
            !events.all()[ready_at..]
                .iter()
                .any(|e| matches!(e, LinkEvent::Disconnected { .. }))
        );
    });
}

// ── Teardown ─────────────────────────────────────────────────

#[test]
fn disconnect_rejects_pending_and_clears_state() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        session.connect("aw-1").await.unwrap();
        let key = RequestKey::Endpoint(gatt::CURRENT_TASK.short_id());

        let (waited, closed) = future::zip(session.await_notification(key), async {
            Timer::after(Duration::from_millis(10)).await;
            session.disconnect().await
        })
        .await;

        assert_eq!(waited, Err(Error::Disconnected));
        assert_eq!(closed, Ok(()));
        assert_eq!(session.state(), LinkState::Disconnected);
        assert!(session.snapshot(Resource::SystemConfig).is_none());
        assert!(session.subscriptions().is_empty());
        assert_eq!(session.capability(Capability::RainSensor), CapabilityState::Unknown);
        assert!(events.contains(&LinkEvent::Disconnected {
            reason: DisconnectReason::Requested
        }));
        assert_eq!(session.read_resource(Resource::Rain).await, Err(Error::NotConnected));
    });
}

#[test]
fn peer_link_loss_tears_down() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        session.connect("aw-1").await.unwrap();
        let id = session.connection_id();
        mock.drop_link();

        assert_eq!(session.state(), LinkState::Disconnected);
        assert!(session.connection_id() > id);
        assert!(events.contains(&LinkEvent::Disconnected {
            reason: DisconnectReason::LinkLost
        }));

        // The session is reusable afterwards.
        session.connect("aw-1").await.unwrap();
        assert_eq!(session.state(), LinkState::Connected);
    });
}

// ── Exclusive access ─────────────────────────────────────────

#[test]
fn exclusive_window_drops_all_and_restores_essentials() {
    let mock = MockTransport::controller();
    // Leaves the three essentials plus status, flow and channel config.
    for ep in [gatt::HISTORY, gatt::ENVIRONMENT, gatt::RAIN, gatt::COMPENSATION] {
        mock.remove(ep);
    }
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        session.connect("aw-1").await.unwrap();
        wait_until(|| events.sync_finished().is_some()).await;
        session.unsubscribe(gatt::FLOW).await.unwrap();
        assert_eq!(session.subscriptions().len(), 5);

        // The controller already forgot one of them, and still pushes flow
        // updates the session no longer tracks.
        mock.forget_subscription(gatt::SYSTEM_STATUS);
        mock.hold_subscription(gatt::FLOW);
        let before = mock.calls().len();

        session.begin_exclusive().await.unwrap();
        assert!(session.is_exclusive());
        assert!(session.subscriptions().is_empty());
        assert!(mock.subscribed().is_empty());

        // One attempt per known target; absent hardware is skipped.
        let dropped: BTreeSet<Endpoint> = mock.calls()[before..]
            .iter()
            .filter_map(|c| match c {
                Call::Unsubscribe(ep) => Some(*ep),
                _ => None,
            })
            .collect();
        let expected: BTreeSet<Endpoint> = ESSENTIAL_SUBSCRIPTIONS
            .iter()
            .copied()
            .chain([gatt::SYSTEM_STATUS, gatt::FLOW, gatt::CHANNEL_CONFIG])
            .collect();
        assert_eq!(dropped, expected);
        let attempts = mock.calls()[before..]
            .iter()
            .filter(|c| matches!(c, Call::Unsubscribe(_)))
            .count();
        assert_eq!(attempts, 6);
        assert!(events.contains(&LinkEvent::ExclusiveStarted));

        // Semantic requests are refused; the raw link stays usable.
        assert_eq!(session.read_resource(Resource::SystemStatus).await, Err(Error::Exclusive));
        assert_eq!(session.begin_exclusive().await, Err(Error::Exclusive));
        let link = session.link().unwrap();
        link.write_without_response(gatt::VALVE_CONTROL, vec![0xA5; 8])
            .await
            .unwrap();

        session.end_exclusive().await.unwrap();
        assert_eq!(session.state(), LinkState::Connected);
        let restored: BTreeSet<Endpoint> = session.subscriptions().into_iter().collect();
        let essentials: BTreeSet<Endpoint> = ESSENTIAL_SUBSCRIPTIONS.iter().copied().collect();
        assert_eq!(restored, essentials);
        assert!(events.contains(&LinkEvent::ExclusiveEnded));

        // A second end is a no-op.
        session.end_exclusive().await.unwrap();
    });
}

#[test]
fn background_sync_waits_out_exclusive_window() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        session.connect("aw-1").await.unwrap();
        session.begin_exclusive().await.unwrap();

        let subscribes = mock.count(|c| matches!(c, Call::Subscribe(_)));
        Timer::after(Duration::from_millis(40)).await;
        assert_eq!(mock.count(|c| matches!(c, Call::Subscribe(_))), subscribes);
        assert_eq!(events.sync_finished(), None);

        session.end_exclusive().await.unwrap();
        wait_until(|| events.sync_finished().is_some()).await;
        let ended = events.position(&LinkEvent::ExclusiveEnded).unwrap();
        let finished = events
            .all()
            .iter()
            .position(|e| matches!(e, LinkEvent::SyncFinished { .. }))
            .unwrap();
        assert!(ended < finished);
    });
}

#[test]
fn exclusive_requires_a_connection() {
    let mock = MockTransport::controller();
    with_session(mock, fast_config(), async |session, _events| {
        assert_eq!(session.begin_exclusive().await, Err(Error::NotConnected));
        assert_eq!(session.end_exclusive().await, Ok(()));
    });
}

// ── Pairing ──────────────────────────────────────────────────

#[test]
fn auth_failure_waits_for_pairing_then_retries_once() {
    let mock = MockTransport::controller();
    mock.fail_reads(gatt::ONBOARDING, [TransportError::AuthenticationFailed]);
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        session.connect("aw-1").await.unwrap();
        assert!(events.contains(&LinkEvent::SetupStatus {
            complete: Some(true)
        }));
        assert_eq!(mock.reads_of(gatt::ONBOARDING), 2);
        assert_eq!(mock.count(|c| *c == Call::Bond), 2);

        let stamps: Vec<_> = mock
            .timed_calls()
            .into_iter()
            .filter(|(_, c)| *c == Call::Read(gatt::ONBOARDING))
            .map(|(at, _)| at)
            .collect();
        assert!(stamps[1] - stamps[0] >= Duration::from_millis(60));
    });
}

#[test]
fn link_drop_during_pairing_reconnects_once() {
    let mock = MockTransport::controller();
    mock.fail_reads(gatt::ONBOARDING, [TransportError::AuthenticationFailed]);
    // Bond #1 is the post-connect negotiation, #2 the pairing request.
    mock.drop_link_on_bond(2);
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        session.connect("aw-1").await.unwrap();
        assert_eq!(mock.count(|c| matches!(c, Call::Connect(_))), 2);
        assert_eq!(mock.reads_of(gatt::ONBOARDING), 2);
        assert_eq!(session.state(), LinkState::Connected);
        assert!(!events.all().iter().any(|e| matches!(e, LinkEvent::Disconnected { .. })));
    });
}

#[test]
fn persistent_auth_failure_continues_sync() {
    let mock = MockTransport::controller();
    mock.fail_reads(
        gatt::RAIN,
        [TransportError::AuthenticationFailed, TransportError::AuthenticationFailed],
    );
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        session.connect("aw-1").await.unwrap();
        assert!(events.contains(&LinkEvent::Ready));
        assert_eq!(mock.reads_of(gatt::RAIN), 2);
        assert!(session.snapshot(Resource::Rain).is_none());
        assert!(session.snapshot(Resource::SystemConfig).is_some());
    });
}
