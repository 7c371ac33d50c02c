//! Semantic requests over a synced session: confirmed writes, paged and
//! streamed history, notification routing, dedupe and queue ordering.

use std::rc::Rc;
use std::time::Duration;

use autowater_link::framing::legacy::encode_legacy;
use autowater_link::framing::unified::{Status, UnifiedHeader, encode_stream};
use autowater_link::gatt;
use autowater_link::layout::{self, Record, Value};
use autowater_link::model;
use autowater_link::{Endpoint, Error, LinkEvent, ProtocolError, Resource, TransportError};
use futures_lite::future;

use crate::mock_link::{
    Call, EventLog, MockTransport, channel_record, fast_config, wait_until, with_session,
};

async fn synced(session: &autowater_link::Session<MockTransport>, events: &EventLog) {
    session.connect("aw-1").await.unwrap();
    wait_until(|| events.sync_finished().is_some()).await;
}

fn page_frame(data_type: u8, page: u8, total: u8, status: Status, payload: &[u8]) -> Vec<u8> {
    let header = UnifiedHeader {
        data_type,
        status,
        entry_count: 1,
        fragment_index: page,
        total_fragments: total,
        fragment_size: payload.len() as u8,
        reserved: 0,
    };
    let mut frame = header.encode().to_vec();
    frame.extend_from_slice(payload);
    frame
}

// ── Confirmed writes ─────────────────────────────────────────

#[test]
fn channel_config_write_is_fragmented_and_confirmed() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        let before = mock.writes_to(gatt::CHANNEL_CONFIG).len();

        let mut wanted = channel_record(1, "Bed");
        wanted.set("plant_type", Value::Uint(4)).unwrap();
        let confirmed = session.update_channel_config(1, &wanted).await.unwrap();

        assert_eq!(confirmed.text("name"), Some("Bed 1"));
        assert_eq!(confirmed.uint("plant_type"), Some(4));
        assert_eq!(mock.channel_image(1), Some(layout::encode(&wanted).unwrap()));

        // 76 bytes at 20 per packet: header packet + 3 continuations, then
        // the confirming select.
        let writes = &mock.writes_to(gatt::CHANNEL_CONFIG)[before..];
        assert_eq!(writes.len(), 5);
        assert_eq!(&writes[0][..4], &[1, 0x03, 76, 0]);
        assert_eq!(writes[4], vec![1]);

        let state = session.snapshot(Resource::ChannelConfig(1)).unwrap();
        assert_eq!(state.uint("plant_type"), Some(4));
    });
}

#[test]
fn rename_uses_big_endian_size_tag() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        let before = mock.writes_to(gatt::CHANNEL_CONFIG).len();

        let renamed = session.rename_channel(0, "Herbs").await.unwrap();
        assert_eq!(renamed.text("name"), Some("Herbs"));
        assert_eq!(renamed.uint("name_len"), Some(5));
        // Everything else survives the rename.
        assert_eq!(renamed.get("auto_enabled"), Some(&Value::Bool(true)));

        let writes = &mock.writes_to(gatt::CHANNEL_CONFIG)[before..];
        // select + header packet + 3 continuations + confirming select.
        assert_eq!(writes[0], vec![0]);
        assert_eq!(&writes[1][..4], &[0, 0x02, 0, 76]);

        let long = "x".repeat(64);
        assert_eq!(
            session.rename_channel(0, &long).await,
            Err(Error::Protocol(ProtocolError::FieldRange("name")))
        );
    });
}

#[test]
fn channel_config_checks_its_arguments() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        let writes = mock.writes_to(gatt::CHANNEL_CONFIG).len();

        let mismatched = channel_record(0, "Bed");
        assert_eq!(
            session.update_channel_config(1, &mismatched).await,
            Err(Error::Protocol(ProtocolError::FieldMismatch("channel_id")))
        );
        let wrong_layout = Record::zeroed(&model::ALARM);
        assert_eq!(
            session.update_channel_config(1, &wrong_layout).await,
            Err(Error::Protocol(ProtocolError::FieldMismatch("layout")))
        );
        assert_eq!(
            session.read_channel_config(200).await,
            Err(Error::Protocol(ProtocolError::FieldRange("channel")))
        );
        assert_eq!(mock.writes_to(gatt::CHANNEL_CONFIG).len(), writes);
    });
}

#[test]
fn system_config_fits_one_packet() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        let mut config = session.snapshot(Resource::SystemConfig).unwrap();
        config.set("power_mode", Value::Uint(2)).unwrap();

        let confirmed = session.update_system_config(&config).await.unwrap();
        assert_eq!(confirmed.uint("power_mode"), Some(2));
        let writes = mock.writes_to(gatt::SYSTEM_CONFIG);
        assert_eq!(writes, vec![layout::encode(&config).unwrap()]);
    });
}

#[test]
fn state_is_not_touched_until_confirmed() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        let mut config = session.snapshot(Resource::SystemConfig).unwrap();
        config.set("power_mode", Value::Uint(1)).unwrap();

        // The write lands; the confirming read fails for good.
        mock.fail_reads(gatt::SYSTEM_CONFIG, [TransportError::Io("gatt 0x0e".into())]);
        let result = session.update_system_config(&config).await;
        assert_eq!(result, Err(Error::Transport(TransportError::Io("gatt 0x0e".into()))));
        assert_eq!(mock.writes_to(gatt::SYSTEM_CONFIG).len(), 1);
        let state = session.snapshot(Resource::SystemConfig).unwrap();
        assert_eq!(state.uint("power_mode"), Some(0));
    });
}

// ── History ──────────────────────────────────────────────────

#[test]
fn fetch_page_correlates_by_page_index() {
    let mock = MockTransport::controller();
    mock.respond_with(Box::new(|endpoint: Endpoint, command: &[u8]| {
        if endpoint != gatt::HISTORY {
            return Vec::new();
        }
        let (data_type, page) = (command[0], command[1]);
        vec![(
            gatt::HISTORY,
            page_frame(data_type, page, 3, Status::Success, &[page; 6]),
        )]
    }));
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;

        let page = session.fetch_page(0x01, 1).await.unwrap();
        assert_eq!(page.page_index(), 1);
        assert_eq!(page.payload, vec![1; 6]);
        assert!(page.has_more());

        let last = session.fetch_page(0x01, 2).await.unwrap();
        assert_eq!(last.payload, vec![2; 6]);
        assert!(!last.has_more());
    });
}

#[test]
fn page_status_is_delivered_to_the_waiter() {
    let mock = MockTransport::controller();
    mock.respond_with(Box::new(|endpoint: Endpoint, command: &[u8]| {
        if endpoint != gatt::HISTORY {
            return Vec::new();
        }
        let status = if command[0] == 0x02 {
            Status::NoData
        } else {
            Status::InvalidParameter
        };
        vec![(gatt::HISTORY, page_frame(command[0], command[1], 1, status, &[]))]
    }));
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;

        let empty = session.fetch_page(0x02, 0).await.unwrap();
        assert!(empty.payload.is_empty());

        let rejected = session.fetch_page(0x03, 0).await;
        assert_eq!(
            rejected,
            Err(Error::Protocol(ProtocolError::Status {
                data_type: 0x03,
                status: Status::InvalidParameter
            }))
        );
    });
}

#[test]
fn truncated_page_reply_fails_its_waiter() {
    let mock = MockTransport::controller();
    mock.respond_with(Box::new(|endpoint: Endpoint, command: &[u8]| {
        if endpoint != gatt::HISTORY {
            return Vec::new();
        }
        let mut frame = page_frame(command[0], command[1], 1, Status::Success, &[7; 6]);
        // Short payload for type 0x01, short header for anything else.
        frame.truncate(if command[0] == 0x01 { 11 } else { 3 });
        vec![(gatt::HISTORY, frame)]
    }));
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;

        let short_payload = session.fetch_page(0x01, 0).await;
        assert_eq!(
            short_payload,
            Err(Error::Protocol(ProtocolError::Undersized {
                expected: 14,
                actual: 11
            }))
        );

        let short_header = session.fetch_page(0x04, 2).await;
        assert_eq!(
            short_header,
            Err(Error::Protocol(ProtocolError::Undersized {
                expected: 8,
                actual: 3
            }))
        );
    });
}

#[test]
fn unanswered_page_times_out() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        assert_eq!(session.fetch_page(0x01, 0).await, Err(Error::Timeout));
        // The slot cleared itself; a retry registers afresh and times out again.
        assert_eq!(session.fetch_page(0x01, 0).await, Err(Error::Timeout));
    });
}

#[test]
fn concurrent_identical_page_requests_share_one_write() {
    let mock = MockTransport::controller();
    mock.respond_with(Box::new(|endpoint: Endpoint, command: &[u8]| {
        if endpoint != gatt::HISTORY {
            return Vec::new();
        }
        vec![(
            gatt::HISTORY,
            page_frame(command[0], command[1], 1, Status::Success, &[9, 9]),
        )]
    }));
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        let (a, b) = future::zip(session.fetch_page(0x01, 0), session.fetch_page(0x01, 0)).await;
        assert_eq!(a, b);
        assert_eq!(a.unwrap().payload, vec![9, 9]);
        assert_eq!(mock.writes_to(gatt::HISTORY), vec![vec![0x01, 0]]);
    });
}

#[test]
fn streamed_history_reassembles_45_bytes() {
    let source: Vec<u8> = (0..45).collect();
    let frames = encode_stream(0x10, 3, &source, 15).unwrap();
    assert_eq!(frames.len(), 3);

    let mock = MockTransport::controller();
    mock.respond_with(Box::new(move |endpoint: Endpoint, _command: &[u8]| {
        if endpoint != gatt::ENV_HISTORY {
            return Vec::new();
        }
        frames.iter().map(|f| (gatt::ENV_HISTORY, f.clone())).collect()
    }));
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        let payload = session.fetch_stream(0x10).await.unwrap();
        assert_eq!(payload, source);
        assert_eq!(mock.writes_to(gatt::ENV_HISTORY), vec![vec![0x10, 0]]);
    });
}

#[test]
fn broken_stream_rejects_its_data_type() {
    let mock = MockTransport::controller();
    mock.respond_with(Box::new(|endpoint: Endpoint, command: &[u8]| {
        if endpoint != gatt::ENV_HISTORY {
            return Vec::new();
        }
        let frames = encode_stream(command[0], 1, &[7; 30], 10).unwrap();
        // Frame 1 goes missing.
        vec![
            (gatt::ENV_HISTORY, frames[0].clone()),
            (gatt::ENV_HISTORY, frames[2].clone()),
        ]
    }));
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        let result = session.fetch_stream(0x11).await;
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::UnexpectedSequence { .. }))
        ));
    });
}

// ── Notifications ────────────────────────────────────────────

#[test]
fn unsolicited_notification_updates_state() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;

        let mut alarm = Record::zeroed(&model::ALARM);
        alarm.set("code", Value::Uint(5)).unwrap();
        alarm.set("data", Value::Uint(300)).unwrap();
        assert!(mock.notify(gatt::ALARM, &layout::encode(&alarm).unwrap()));

        let state = session.snapshot(Resource::Alarm).unwrap();
        assert_eq!(state.uint("code"), Some(5));
        assert_eq!(state.uint("data"), Some(300));
        assert_eq!(
            events.all().last(),
            Some(&LinkEvent::StateUpdated(Resource::Alarm))
        );
    });
}

#[test]
fn legacy_environment_fragments_are_reassembled() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;

        let mut env = Record::zeroed(&model::ENVIRONMENT);
        env.set("temperature_c", Value::Float(30.25)).unwrap();
        env.set("pressure_hpa", Value::Float(1008.0)).unwrap();
        let frames = encode_legacy(&layout::encode(&env).unwrap(), 10).unwrap();
        assert_eq!(frames.len(), 3);

        mock.notify(gatt::ENVIRONMENT, &frames[0]);
        mock.notify(gatt::ENVIRONMENT, &frames[1]);
        let unchanged = session.snapshot(Resource::Environment).unwrap();
        assert_eq!(unchanged.get("temperature_c"), Some(&Value::Float(21.5)));

        mock.notify(gatt::ENVIRONMENT, &frames[2]);
        let updated = session.snapshot(Resource::Environment).unwrap();
        assert_eq!(updated.get("temperature_c"), Some(&Value::Float(30.25)));
        assert_eq!(updated.get("pressure_hpa"), Some(&Value::Float(1008.0)));
    });
}

#[test]
fn channel_config_notification_binds_to_its_channel() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        let pushed = channel_record(1, "Lawn");
        mock.notify(gatt::CHANNEL_CONFIG, &layout::encode(&pushed).unwrap());

        let one = session.snapshot(Resource::ChannelConfig(1)).unwrap();
        assert_eq!(one.text("name"), Some("Lawn 1"));
        let zero = session.snapshot(Resource::ChannelConfig(0)).unwrap();
        assert_eq!(zero.text("name"), Some("Zone 0"));
    });
}

#[test]
fn request_returns_next_notification() {
    let mock = MockTransport::controller();
    mock.respond_with(Box::new(|endpoint: Endpoint, command: &[u8]| {
        if endpoint != gatt::VALVE_CONTROL {
            return Vec::new();
        }
        // Controller acknowledges with the valve's new status.
        vec![(gatt::VALVE_CONTROL, vec![command[0], 1, 0x2c, 0x01])]
    }));
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        let reply = session.request(gatt::VALVE_CONTROL, vec![0, 1, 0x2c, 0x01]).await;
        assert_eq!(reply, Ok(vec![0, 1, 0x2c, 0x01]));
        let valve = session.snapshot(Resource::ValveStatus).unwrap();
        assert_eq!(valve.uint("duration_s"), Some(300));
    });
}

// ── Queue behaviour ──────────────────────────────────────────

#[test]
fn concurrent_reads_collapse_into_one() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        let before = mock.reads_of(gatt::SYSTEM_STATUS);

        let (a, b) = future::zip(
            session.read_resource(Resource::SystemStatus),
            session.read_resource(Resource::SystemStatus),
        )
        .await;
        assert!(a.is_ok());
        assert_eq!(a, b);
        assert_eq!(mock.reads_of(gatt::SYSTEM_STATUS), before + 1);

        // Settled; the next read goes to the radio again.
        session.read_resource(Resource::SystemStatus).await.unwrap();
        assert_eq!(mock.reads_of(gatt::SYSTEM_STATUS), before + 2);
    });
}

#[test]
fn operations_reach_the_radio_in_submission_order() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        mock.delay_reads(Duration::from_millis(8));
        let start = mock.calls().len();

        let (a, (b, c)) = future::zip(
            session.read_resource(Resource::SystemStatus),
            future::zip(
                session.read_resource(Resource::ValveStatus),
                session.read_resource(Resource::Alarm),
            ),
        )
        .await;
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        let timed = mock.timed_calls();
        let reads: Vec<_> = timed[start..]
            .iter()
            .filter(|(_, c)| matches!(c, Call::Read(_)))
            .collect();
        let order: Vec<Endpoint> = reads
            .iter()
            .map(|(_, c)| match c {
                Call::Read(ep) => *ep,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![gatt::SYSTEM_STATUS, gatt::VALVE_CONTROL, gatt::ALARM]);
        // Each read starts only after the previous one finished.
        for pair in reads.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(8));
        }
    });
}

#[test]
fn busy_write_retries_with_growing_backoff() {
    let mock = MockTransport::controller();
    let mut config = fast_config();
    config.retry.base_delay_ms = 20;
    with_session(Rc::clone(&mock), config, async |session, events| {
        synced(&session, &events).await;
        mock.fail_writes([TransportError::Busy, TransportError::Busy]);

        session
            .write_command(gatt::VALVE_CONTROL, vec![0, 1, 10, 0])
            .await
            .unwrap();

        let stamps: Vec<_> = mock
            .timed_calls()
            .into_iter()
            .filter(|(_, c)| matches!(c, Call::Write(ep, _) if *ep == gatt::VALVE_CONTROL))
            .map(|(at, _)| at)
            .collect();
        assert_eq!(stamps.len(), 3);
        let first_gap = stamps[1] - stamps[0];
        let second_gap = stamps[2] - stamps[1];
        assert!(first_gap >= Duration::from_millis(20));
        assert!(second_gap >= Duration::from_millis(40));
        assert!(second_gap > first_gap);
    });
}

#[test]
fn exhausted_budget_surfaces_last_error() {
    let mock = MockTransport::controller();
    with_session(Rc::clone(&mock), fast_config(), async |session, events| {
        synced(&session, &events).await;
        mock.fail_writes([TransportError::Busy, TransportError::Busy, TransportError::Timeout]);

        let result = session.write_command(gatt::VALVE_CONTROL, vec![0]).await;
        assert_eq!(result, Err(Error::Transport(TransportError::Timeout)));

        // A failed operation does not wedge the queue.
        session.write_command(gatt::VALVE_CONTROL, vec![1]).await.unwrap();
        session.drain().await.unwrap();
    });
}
