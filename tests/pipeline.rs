//! End-to-end tests of the engine through the public API: generated commands
//! pass the write pipeline, and the same bytes read back decode into records.

use bytes::Bytes;
use rtkbase_core::core::protocol::nmea::build_sentence;
use rtkbase_core::core::protocol::rtcm3::encode_frame;
use rtkbase_core::core::protocol::ubx::{cfg, class, nav, PortId};
use rtkbase_core::{
    fixed_base_commands, BaseConfig, Coordinate, Engine, EngineConfig, EngineEvent, Protocol,
    UbxGenerator,
};
use tokio::sync::broadcast;

fn collect(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn written(events: &[EngineEvent]) -> Vec<Bytes> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Write(frame) => Some(frame.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn base_sequence_passes_write_pipeline_and_reads_back() {
    let gen = UbxGenerator::new();
    let commands = fixed_base_commands(&BaseConfig::default(), &gen);

    let mut tx_engine = Engine::default();
    let mut tx_events = tx_engine.subscribe();
    for frame in &commands {
        tx_engine.write(frame);
    }
    let out = written(&collect(&mut tx_events));
    assert_eq!(out, commands);
    assert_eq!(tx_engine.stats().frames_written, commands.len() as u64);
    assert_eq!(tx_engine.pending_write(), 0);

    // The receiver echoes CFG frames back when polled; decode them as if read
    let mut rx_engine = Engine::default();
    let stream: Vec<u8> = out.iter().flat_map(|f| f.iter().copied()).collect();
    rx_engine.ingest(&stream);

    assert_eq!(rx_engine.count(Protocol::Ubx), commands.len() as u64);
    let ubx = rx_engine.ubx();
    assert_eq!(ubx.cfg_msg().count(), 30);
    assert_eq!(ubx.cfg_msg().msg_class, class::NAV);
    assert_eq!(ubx.cfg_msg().msg_id, nav::SAT);
    assert_eq!(ubx.cfg_msg().rate(PortId::Usb), 0);
    assert_eq!(ubx.unhandled().get(&0x0608), Some(&1));
    assert_eq!(ubx.unhandled().get(&0x0624), Some(&1));
    assert_eq!(rx_engine.buffered(), 0);
}

#[test]
fn fixed_mode_from_ecef_text() {
    let coord = Coordinate::parse("-2694685.4733", "-4293642.3676", "3857878.9234").unwrap();
    assert!(coord.was_ecef);

    let frame = UbxGenerator::new().config_fixed_mode_ecef(
        coord.ecef.x,
        coord.ecef.y,
        coord.ecef.z,
        0.25,
    );
    let mut engine = Engine::default();
    engine.ingest(&frame);

    let tmode = engine.ubx().cfg_tmode3();
    assert!(tmode.has_data());
    assert_eq!(tmode.mode, 2);
    assert!(!tmode.lla);
    assert!((tmode.ecef_x_or_lat - coord.ecef.x).abs() < 2e-4);
    assert!((tmode.ecef_y_or_lon - coord.ecef.y).abs() < 2e-4);
    assert!((tmode.ecef_z_or_alt - coord.ecef.z).abs() < 2e-4);
    assert!((tmode.fixed_pos_acc - 0.25).abs() < 1e-9);
}

#[test]
fn fixed_mode_from_geodetic_text() {
    let coord = Coordinate::parse("N 37 25 19.07", "W 122 5 2.33", "25.125").unwrap();
    assert!(!coord.was_ecef);
    assert!(coord.lla.lon < 0.0);

    let frame = UbxGenerator::new().config_fixed_mode_lla(
        coord.lla.lat,
        coord.lla.lon,
        coord.lla.alt,
        0.5,
    );
    let mut engine = Engine::default();
    engine.ingest(&frame);

    let tmode = engine.ubx().cfg_tmode3();
    assert_eq!(tmode.mode, 2);
    assert!(tmode.lla);
    assert!((tmode.ecef_x_or_lat - coord.lla.lat).abs() < 1e-8);
    assert!((tmode.ecef_y_or_lon - coord.lla.lon).abs() < 1e-8);
    assert!((tmode.ecef_z_or_alt - 25.125).abs() < 2e-4);
}

#[test]
fn survey_in_command_reads_back() {
    let frame = UbxGenerator::new().start_survey_in(60, 5.0);
    let mut engine = Engine::default();
    engine.ingest(&frame);

    let tmode = engine.ubx().cfg_tmode3();
    assert_eq!(tmode.mode, 1);
    assert_eq!(tmode.svin_min_dur, 60);
    assert!((tmode.svin_acc_limit - 5.0).abs() < 1e-6);
}

#[test]
fn interleaved_stream_in_uneven_reads() {
    let gen = UbxGenerator::new();
    let pvt = gen.generate_message(class::NAV, nav::PVT, &[0u8; 92]);
    let rtcm = encode_frame(&[0x43, 0x20, 0x00, 0x01, 0x02]);
    let gga = build_sentence("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
    let ack = gen.generate_message(class::ACK, 0x01, &[class::CFG, cfg::MSG]);

    let mut stream = Vec::new();
    for _ in 0..25 {
        stream.extend_from_slice(&pvt);
        stream.extend_from_slice(&rtcm);
        stream.extend_from_slice(gga.as_bytes());
        stream.extend_from_slice(&ack);
    }

    let mut engine = Engine::new(EngineConfig::default());
    let mut events = engine.subscribe();

    // Irregular read sizes, the way a serial port delivers data
    let sizes = [1, 7, 64, 3, 200, 13, 511, 2];
    let mut offset = 0;
    let mut i = 0;
    while offset < stream.len() {
        let end = (offset + sizes[i % sizes.len()]).min(stream.len());
        engine.ingest(&stream[offset..end]);
        offset = end;
        i += 1;
    }

    assert_eq!(engine.count(Protocol::Ubx), 50);
    assert_eq!(engine.count(Protocol::Rtcm3), 25);
    assert_eq!(engine.count(Protocol::Nmea), 25);
    assert_eq!(engine.rtcm3().messages().get(&1074), Some(&25));
    assert_eq!(engine.nmea().sentences().get("GPGGA"), Some(&25));
    assert_eq!(engine.ubx().ack_ack().count(), 25);
    assert_eq!(engine.stats().corrupt_frames, 0);
    assert_eq!(engine.stats().resyncs, 0);
    assert_eq!(engine.buffered(), 0);

    // Decoded frames come out in stream order
    let order: Vec<Protocol> = collect(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Decoded { protocol, .. } => Some(protocol),
            _ => None,
        })
        .take(4)
        .collect();
    assert_eq!(
        order,
        vec![Protocol::Ubx, Protocol::Rtcm3, Protocol::Nmea, Protocol::Ubx]
    );
}

#[test]
fn recovers_after_line_noise_between_reads() {
    let poll = UbxGenerator::new().poll(class::CFG, cfg::TMODE3);
    let mut engine = Engine::default();

    engine.ingest(&[0x00, 0xFF, 0x13, 0x37]);
    assert_eq!(engine.buffered(), 0);
    assert_eq!(engine.stats().resyncs, 1);

    engine.ingest(&poll);
    assert_eq!(engine.count(Protocol::Ubx), 1);

    let mut bad = poll.to_vec();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    engine.ingest(&bad);
    engine.ingest(&poll);
    assert_eq!(engine.count(Protocol::Ubx), 2);
    assert_eq!(engine.stats().corrupt_frames, 1);
}
