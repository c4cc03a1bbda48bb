//! Integration tests for the node façade: peer lifecycle, polling and
//! broadcast, inbound dispatch, the configuration protocol end to end, and
//! persistence across restarts.

mod common;

use common::{peer, started_node, MockHal, MockLocalMidi, MockTransport, NODE_MAC};

use midilink_node::{FileStore, Node, NodeError};
use midilink_protocol::mac::MacAddr;
use midilink_protocol::message::{MidiMessage, MidiStatus};
use midilink_protocol::pinconfig::{PinConfig, PinMode};
use midilink_protocol::sysex::{self, Command};

// ---------------------------------------------------------------------------
// 1. Lifecycle -- initialization gate
// ---------------------------------------------------------------------------

#[test]
fn operations_rejected_before_begin() {
    let (transport, _tlog) = MockTransport::new();
    let (hal, _hlog) = MockHal::new();
    let mut node = Node::new(transport, midilink_node::MemStore::new(), hal);

    assert!(matches!(node.add_peer(peer(1)), Err(NodeError::Uninitialized)));
    assert!(matches!(node.tick(), Err(NodeError::Uninitialized)));
    assert!(matches!(
        node.send_note_on(1, 60, 100),
        Err(NodeError::Uninitialized)
    ));
    assert!(matches!(
        node.handle_packet(&peer(1), &[0x90, 60, 100]),
        Err(NodeError::Uninitialized)
    ));
}

#[test]
fn version_reports_package_version() {
    let (node, _tlog, _hlog) = started_node();
    assert_eq!(node.version(), (0, 5, 1));
    assert_eq!(node.mac(), NODE_MAC);
}

// ---------------------------------------------------------------------------
// 2. Peer lifecycle -- add, duplicate, remove, rollback
// ---------------------------------------------------------------------------

#[test]
fn peer_add_duplicate_remove() {
    let (mut node, tlog, _hlog) = started_node();

    node.add_peer_str("AA:BB:CC:DD:EE:FF").unwrap();
    assert_eq!(node.peer_count(), 1);
    assert_eq!(tlog.borrow().peers.len(), 1);

    // Second add of the same address is rejected and changes nothing
    assert!(matches!(
        node.add_peer_str("AA:BB:CC:DD:EE:FF"),
        Err(NodeError::PeerExists)
    ));
    assert_eq!(node.peer_count(), 1);

    node.remove_peer(&peer(0xFF)).unwrap();
    assert_eq!(node.peer_count(), 0);
    assert!(tlog.borrow().peers.is_empty());

    // Remove-then-add leaves it present exactly once
    node.add_peer(peer(0xFF)).unwrap();
    assert_eq!(node.peer_count(), 1);
}

#[test]
fn peer_add_rolls_back_on_transport_failure() {
    let (mut node, tlog, _hlog) = started_node();
    tlog.borrow_mut().fail_add_peer = true;

    let err = node.add_peer(peer(1)).unwrap_err();
    assert!(err.is_transport());
    assert_eq!(node.peer_count(), 0);
    assert!(tlog.borrow().peers.is_empty());
}

#[test]
fn bad_mac_string_rejected() {
    let (mut node, _tlog, _hlog) = started_node();
    assert!(matches!(
        node.add_peer_str("not-a-mac"),
        Err(NodeError::InvalidMac)
    ));
    assert!(matches!(
        node.remove_peer(&peer(9)),
        Err(NodeError::NotFound)
    ));
}

// ---------------------------------------------------------------------------
// 3. Sending -- broadcast fan-out and local mirror
// ---------------------------------------------------------------------------

#[test]
fn broadcast_sends_once_per_peer() {
    let (mut node, tlog, _hlog) = started_node();
    node.add_peer(peer(1)).unwrap();
    node.add_peer(peer(2)).unwrap();

    node.send_note_on(1, 60, 100).unwrap();

    let log = tlog.borrow();
    assert_eq!(log.sent.len(), 2);
    assert_eq!(log.sent[0], (peer(1), vec![0x90, 60, 100]));
    assert_eq!(log.sent[1], (peer(2), vec![0x90, 60, 100]));
}

#[test]
fn send_without_peers_still_mirrors_locally() {
    let (mut node, _tlog, _hlog) = started_node();
    let local = MockLocalMidi::default();
    let local_sent = local.sent.clone();
    node.set_local_midi(Box::new(local));

    let err = node.send_control_change(1, 7, 64).unwrap_err();
    assert!(matches!(err, NodeError::NoPeers));
    assert_eq!(local_sent.borrow().as_slice(), &[vec![0xB0, 7, 64]]);
}

#[test]
fn wireless_failure_does_not_suppress_local_send() {
    let (mut node, tlog, _hlog) = started_node();
    node.add_peer(peer(1)).unwrap();
    tlog.borrow_mut().fail_send = true;

    let local = MockLocalMidi::default();
    let local_sent = local.sent.clone();
    node.set_local_midi(Box::new(local));

    let err = node.send_pitch_bend(1, 0).unwrap_err();
    assert!(err.is_transport());
    assert_eq!(local_sent.borrow().len(), 1);
}

// ---------------------------------------------------------------------------
// 4. Inbound dispatch -- messages drive outputs
// ---------------------------------------------------------------------------

#[test]
fn inbound_note_drives_configured_output() {
    let (mut node, _tlog, hlog) = started_node();
    let mut cfg = PinConfig::new(9, PinMode::DigitalOut);
    cfg.midi_channel = 2;
    cfg.midi_type = MidiStatus::NoteOn;
    cfg.note_number = 60;
    node.set_pin_config(cfg).unwrap();

    node.handle_packet(&peer(1), &MidiMessage::note_on(2, 60, 100).encode())
        .unwrap();
    node.handle_packet(&peer(1), &MidiMessage::note_off(2, 60, 0).encode())
        .unwrap();

    assert_eq!(hlog.borrow().digital_writes, vec![(9, true), (9, false)]);
}

#[test]
fn undecodable_packet_is_dropped_without_error() {
    let (mut node, _tlog, hlog) = started_node();
    node.handle_packet(&peer(1), &[0x00, 0x01, 0x02]).unwrap();
    node.handle_packet(&peer(1), &[]).unwrap();
    assert!(hlog.borrow().digital_writes.is_empty());
}

#[test]
fn send_complete_reports_do_not_disturb_state() {
    let (mut node, _tlog, _hlog) = started_node();
    node.add_peer(peer(1)).unwrap();
    node.handle_send_complete(&peer(1), true);
    node.handle_send_complete(&peer(1), false);
    assert_eq!(node.peer_count(), 1);
}

// ---------------------------------------------------------------------------
// 5. Polling -- analog input to wire traffic
// ---------------------------------------------------------------------------

#[test]
fn analog_ramp_broadcasts_gated_cc() {
    let (mut node, tlog, hlog) = started_node();
    node.add_peer(peer(1)).unwrap();

    let mut cfg = PinConfig::new(4, PinMode::AnalogIn);
    cfg.cc_number = 7;
    cfg.threshold = 2;
    node.set_pin_config(cfg).unwrap();

    for (i, raw) in (0..=4095u16).step_by(64).enumerate() {
        {
            let mut hal = hlog.borrow_mut();
            hal.analog.insert(4, raw);
            hal.now = i as u32 * 20;
        }
        node.tick().unwrap();
    }

    let log = tlog.borrow();
    let values: Vec<u8> = log
        .sent
        .iter()
        .filter(|(_, buf)| buf.len() == 3 && buf[0] == 0xB0 && buf[1] == 7)
        .map(|(_, buf)| buf[2])
        .collect();
    assert!(!values.is_empty());
    for pair in values.windows(2) {
        assert!(pair[1] >= pair[0], "CC values decreased: {values:?}");
        assert!(pair[1] - pair[0] >= 2, "delta under threshold: {values:?}");
    }
}

// ---------------------------------------------------------------------------
// 6. Configuration protocol -- end to end over the wireless path
// ---------------------------------------------------------------------------

#[test]
fn set_pin_config_frame_then_note_drives_pin() {
    let (mut node, _tlog, hlog) = started_node();

    let mut cfg = PinConfig::new(9, PinMode::DigitalOut);
    cfg.midi_channel = 2;
    cfg.midi_type = MidiStatus::NoteOn;
    cfg.note_number = 60;
    let frame = sysex::encode_request(Command::SetPinConfig, &cfg.encode_wire());
    node.handle_packet(&peer(1), &frame).unwrap();

    assert_eq!(node.pin_config(9).map(|c| c.note_number), Some(60));
    assert_eq!(hlog.borrow().modes, vec![(9, PinMode::DigitalOut)]);

    node.handle_packet(&peer(1), &MidiMessage::note_on(2, 60, 100).encode())
        .unwrap();
    node.handle_packet(&peer(1), &MidiMessage::note_off(2, 60, 0).encode())
        .unwrap();
    assert_eq!(hlog.borrow().digital_writes, vec![(9, true), (9, false)]);
}

#[test]
fn get_mac_reply_recombines_to_hardware_address() {
    let (mut node, tlog, _hlog) = started_node();

    let request = sysex::encode_request(Command::GetMac, &[]);
    node.handle_packet(&peer(1), &request).unwrap();

    let log = tlog.borrow();
    assert_eq!(log.sent.len(), 1);
    let (dest, reply) = &log.sent[0];
    assert_eq!(*dest, peer(1));
    let frame = sysex::Frame::parse(reply).unwrap();
    assert_eq!(frame.command, Command::GetMac as u8);
    assert_eq!(MacAddr::from_nibbles(frame.payload), Some(NODE_MAC));
}

#[test]
fn get_peers_reply_lists_directory() {
    let (mut node, tlog, _hlog) = started_node();
    node.add_peer(peer(1)).unwrap();
    node.add_peer(peer(2)).unwrap();

    let request = sysex::encode_request(Command::GetPeers, &[]);
    node.handle_packet(&peer(1), &request).unwrap();

    let log = tlog.borrow();
    let (_, reply) = log.sent.last().unwrap();
    let frame = sysex::Frame::parse(reply).unwrap();
    assert_eq!(frame.command, Command::GetPeers.response_code());
    assert_eq!(
        sysex::decode_peers_payload(frame.payload),
        Some(vec![peer(1), peer(2)])
    );
}

#[test]
fn get_version_reply() {
    let (mut node, tlog, _hlog) = started_node();
    let request = sysex::encode_request(Command::GetVersion, &[]);
    node.handle_packet(&peer(1), &request).unwrap();

    let log = tlog.borrow();
    let frame = sysex::Frame::parse(&log.sent[0].1).unwrap();
    assert_eq!(frame.command, Command::GetVersion.response_code());
    assert_eq!(frame.payload, &[0, 5]);
}

#[test]
fn get_pin_config_roundtrip_and_silent_miss() {
    let (mut node, tlog, _hlog) = started_node();
    let mut cfg = PinConfig::new(4, PinMode::AnalogIn);
    cfg.cc_number = 7;
    node.set_pin_config(cfg).unwrap();

    let request = sysex::encode_request(Command::GetPinConfig, &[4]);
    node.handle_packet(&peer(1), &request).unwrap();
    {
        let log = tlog.borrow();
        let frame = sysex::Frame::parse(&log.sent[0].1).unwrap();
        assert_eq!(frame.command, Command::GetPinConfig.response_code());
        assert_eq!(PinConfig::decode_wire(frame.payload).map(|c| c.pin), Some(4));
    }

    // Absent pin: no reply at all
    let request = sysex::encode_request(Command::GetPinConfig, &[99]);
    node.handle_packet(&peer(1), &request).unwrap();
    assert_eq!(tlog.borrow().sent.len(), 1);
}

#[test]
fn get_all_pin_configs_sends_one_frame_each() {
    let (mut node, tlog, _hlog) = started_node();
    node.set_pin_config(PinConfig::new(4, PinMode::AnalogIn)).unwrap();
    node.set_pin_config(PinConfig::new(9, PinMode::DigitalOut)).unwrap();

    let request = sysex::encode_request(Command::GetAllPinConfigs, &[]);
    node.handle_packet(&peer(1), &request).unwrap();

    let log = tlog.borrow();
    assert_eq!(log.sent.len(), 2);
    let pins: Vec<u8> = log
        .sent
        .iter()
        .map(|(_, buf)| {
            let frame = sysex::Frame::parse(buf).unwrap();
            PinConfig::decode_wire(frame.payload).unwrap().pin
        })
        .collect();
    assert_eq!(pins, vec![4, 9]);
}

#[test]
fn delete_pin_config_acknowledges_with_pin_echo() {
    let (mut node, tlog, _hlog) = started_node();
    node.set_pin_config(PinConfig::new(9, PinMode::DigitalOut)).unwrap();

    let request = sysex::encode_request(Command::DeletePinConfig, &[9]);
    node.handle_packet(&peer(1), &request).unwrap();

    assert!(node.pin_config(9).is_none());
    let log = tlog.borrow();
    let frame = sysex::Frame::parse(&log.sent[0].1).unwrap();
    assert_eq!(frame.command, Command::DeletePinConfig as u8);
    assert_eq!(frame.payload, &[9]);
}

#[test]
fn reset_frame_wipes_pins_and_peers() {
    let (mut node, tlog, _hlog) = started_node();
    node.add_peer(peer(1)).unwrap();
    node.set_pin_config(PinConfig::new(4, PinMode::AnalogIn)).unwrap();

    let request = sysex::encode_request(Command::Reset, &[]);
    node.handle_packet(&peer(1), &request).unwrap();

    assert_eq!(node.peer_count(), 0);
    assert!(node.pin_configs().is_empty());
    assert!(tlog.borrow().peers.is_empty());
}

#[test]
fn add_peer_frame_registers_peer() {
    let (mut node, tlog, _hlog) = started_node();

    let request = sysex::encode_request(Command::AddPeer, &peer(7).to_nibbles());
    node.handle_packet(&peer(1), &request).unwrap();
    assert_eq!(node.peer_count(), 1);
    assert!(tlog.borrow().peers.contains(&peer(7)));

    // Re-adding over the protocol is tolerated silently
    node.handle_packet(&peer(1), &request).unwrap();
    assert_eq!(node.peer_count(), 1);
}

#[test]
fn malformed_and_incompatible_frames_are_ignored() {
    let (mut node, tlog, _hlog) = started_node();
    node.set_pin_config(PinConfig::new(4, PinMode::AnalogIn)).unwrap();

    // Wrong manufacturer byte
    node.handle_packet(&peer(1), &[0xF0, 0x42, 0, 5, 0x03, 0xF7]).unwrap();
    // Truncated header
    node.handle_packet(&peer(1), &[0xF0, 0x7D, 0, 5, 0x03]).unwrap();
    // Major-version mismatch on a ClearPinConfigs request
    node.handle_packet(&peer(1), &[0xF0, 0x7D, 9, 5, 0x03, 0xF7]).unwrap();
    // Unknown command
    node.handle_packet(&peer(1), &[0xF0, 0x7D, 0, 5, 0x3F, 0xF7]).unwrap();

    assert_eq!(node.pin_configs().len(), 1);
    assert!(tlog.borrow().sent.is_empty());
}

// ---------------------------------------------------------------------------
// 7. Local MIDI path -- control replies go out the wired port
// ---------------------------------------------------------------------------

#[test]
fn local_sysex_replies_on_local_port() {
    let (mut node, tlog, _hlog) = started_node();
    let local = MockLocalMidi::default();
    let local_sent = local.sent.clone();
    node.set_local_midi(Box::new(local));

    let request = sysex::encode_request(Command::GetVersion, &[]);
    node.handle_local_midi(&request).unwrap();

    assert!(tlog.borrow().sent.is_empty());
    let sent = local_sent.borrow();
    let frame = sysex::Frame::parse(&sent[0]).unwrap();
    assert_eq!(frame.command, Command::GetVersion.response_code());
}

#[test]
fn local_message_drives_outputs_like_wireless() {
    let (mut node, _tlog, hlog) = started_node();
    let mut cfg = PinConfig::new(9, PinMode::DigitalOut);
    cfg.cc_number = 7;
    node.set_pin_config(cfg).unwrap();

    node.handle_local_midi(&MidiMessage::control_change(1, 7, 127).encode())
        .unwrap();
    assert_eq!(hlog.borrow().digital_writes, vec![(9, true)]);
}

// ---------------------------------------------------------------------------
// 8. Persistence -- state survives a restart
// ---------------------------------------------------------------------------

#[test]
fn peers_and_pins_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (transport, _tlog) = MockTransport::new();
        let (hal, _hlog) = MockHal::new();
        let mut node = Node::new(transport, FileStore::new(dir.path()), hal);
        node.begin().unwrap();
        node.add_peer(peer(1)).unwrap();
        let mut cfg = PinConfig::new(4, PinMode::AnalogIn);
        cfg.cc_number = 7;
        cfg.threshold = 2;
        node.set_pin_config(cfg).unwrap();
    }

    let (transport, tlog) = MockTransport::new();
    let (hal, hlog) = MockHal::new();
    let mut node = Node::new(transport, FileStore::new(dir.path()), hal);
    node.begin().unwrap();

    assert_eq!(node.peer_count(), 1);
    assert!(node.peers().any(|p| *p == peer(1)));
    // Loaded peers are mirrored back into the transport
    assert_eq!(tlog.borrow().peers, vec![peer(1)]);

    let cfg = node.pin_config(4).copied().unwrap();
    assert_eq!(cfg.cc_number, 7);
    assert_eq!(cfg.threshold, 2);
    // Loaded pins get their hardware mode re-initialized
    assert_eq!(hlog.borrow().modes, vec![(4, PinMode::AnalogIn)]);
}

#[test]
fn factory_reset_clears_the_store_too() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (transport, _tlog) = MockTransport::new();
        let (hal, _hlog) = MockHal::new();
        let mut node = Node::new(transport, FileStore::new(dir.path()), hal);
        node.begin().unwrap();
        node.add_peer(peer(1)).unwrap();
        node.set_pin_config(PinConfig::new(4, PinMode::AnalogIn)).unwrap();
        node.factory_reset().unwrap();
    }

    let (transport, _tlog) = MockTransport::new();
    let (hal, _hlog) = MockHal::new();
    let mut node = Node::new(transport, FileStore::new(dir.path()), hal);
    node.begin().unwrap();
    assert_eq!(node.peer_count(), 0);
    assert!(node.pin_configs().is_empty());
}
