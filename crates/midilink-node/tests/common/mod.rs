//! Shared mock collaborators for the node integration tests. The mocks
//! record everything through shared handles so tests can inspect traffic
//! after handing ownership to the node.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use midilink_node::{Hal, LocalMidi, MemStore, Node, Transport};
use midilink_protocol::mac::MacAddr;
use midilink_protocol::pinconfig::PinMode;

pub const NODE_MAC: MacAddr = MacAddr([0xA4, 0xCF, 0x12, 0x09, 0xFE, 0x01]);

// ---------------------------------------------------------------------------
// Transport mock
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TransportLog {
    pub peers: Vec<MacAddr>,
    pub sent: Vec<(MacAddr, Vec<u8>)>,
    pub fail_add_peer: bool,
    pub fail_send: bool,
}

pub struct MockTransport {
    pub log: Rc<RefCell<TransportLog>>,
}

impl MockTransport {
    pub fn new() -> (Self, Rc<RefCell<TransportLog>>) {
        let log = Rc::new(RefCell::new(TransportLog::default()));
        (Self { log: log.clone() }, log)
    }
}

impl Transport for MockTransport {
    fn initialize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn local_mac(&self) -> MacAddr {
        NODE_MAC
    }

    fn add_peer(&mut self, mac: &MacAddr) -> anyhow::Result<()> {
        let mut log = self.log.borrow_mut();
        if log.fail_add_peer {
            anyhow::bail!("radio rejected peer");
        }
        log.peers.push(*mac);
        Ok(())
    }

    fn remove_peer(&mut self, mac: &MacAddr) -> anyhow::Result<()> {
        self.log.borrow_mut().peers.retain(|p| p != mac);
        Ok(())
    }

    fn send(&mut self, mac: &MacAddr, data: &[u8]) -> anyhow::Result<()> {
        let mut log = self.log.borrow_mut();
        if log.fail_send {
            anyhow::bail!("send buffer full");
        }
        log.sent.push((*mac, data.to_vec()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hardware mock
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct HalLog {
    pub now: u32,
    pub digital: HashMap<u8, bool>,
    pub analog: HashMap<u8, u16>,
    pub touch: HashMap<u8, u16>,
    pub digital_writes: Vec<(u8, bool)>,
    pub pwm_writes: Vec<(u8, u8)>,
    pub modes: Vec<(u8, PinMode)>,
}

pub struct MockHal {
    pub log: Rc<RefCell<HalLog>>,
}

impl MockHal {
    pub fn new() -> (Self, Rc<RefCell<HalLog>>) {
        let log = Rc::new(RefCell::new(HalLog::default()));
        (Self { log: log.clone() }, log)
    }
}

impl Hal for MockHal {
    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) {
        self.log.borrow_mut().modes.push((pin, mode));
    }

    fn digital_read(&mut self, pin: u8) -> bool {
        *self.log.borrow().digital.get(&pin).unwrap_or(&false)
    }

    fn digital_write(&mut self, pin: u8, high: bool) {
        self.log.borrow_mut().digital_writes.push((pin, high));
    }

    fn analog_read(&mut self, pin: u8) -> u16 {
        *self.log.borrow().analog.get(&pin).unwrap_or(&0)
    }

    fn analog_write(&mut self, pin: u8, duty: u8) {
        self.log.borrow_mut().pwm_writes.push((pin, duty));
    }

    fn touch_read(&mut self, pin: u8) -> u16 {
        *self.log.borrow().touch.get(&pin).unwrap_or(&4095)
    }

    fn millis(&self) -> u32 {
        self.log.borrow().now
    }
}

// ---------------------------------------------------------------------------
// Local MIDI mock
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockLocalMidi {
    pub sent: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl LocalMidi for MockLocalMidi {
    fn send(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.sent.borrow_mut().push(data.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Assembly helpers
// ---------------------------------------------------------------------------

pub type TestNode = Node<MockTransport, MemStore, MockHal>;

/// A started node over fresh mocks and an empty in-memory store.
pub fn started_node() -> (TestNode, Rc<RefCell<TransportLog>>, Rc<RefCell<HalLog>>) {
    let (transport, tlog) = MockTransport::new();
    let (hal, hlog) = MockHal::new();
    let mut node = Node::new(transport, MemStore::new(), hal);
    node.begin().expect("begin should succeed on fresh mocks");
    (node, tlog, hlog)
}

pub fn peer(last: u8) -> MacAddr {
    MacAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last])
}
