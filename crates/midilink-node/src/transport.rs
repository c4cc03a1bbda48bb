use midilink_protocol::mac::MacAddr;

/// Wireless point-to-point transport collaborator. Implementations wrap
/// whatever link actually moves the bytes (ESP-NOW on hardware, UDP in the
/// simulator); the node never assumes native multicast and sends once per
/// directory entry when broadcasting.
///
/// Receive and send-completion are push-style: the embedding application
/// feeds incoming buffers into [`Node::handle_packet`] and delivery reports
/// into [`Node::handle_send_complete`].
///
/// [`Node::handle_packet`]: crate::Node::handle_packet
/// [`Node::handle_send_complete`]: crate::Node::handle_send_complete
pub trait Transport {
    /// Bring the link up. Fatal to [`Node::begin`] on failure.
    ///
    /// [`Node::begin`]: crate::Node::begin
    fn initialize(&mut self) -> anyhow::Result<()>;

    /// The node's own hardware address.
    fn local_mac(&self) -> MacAddr;

    /// Mirror a directory entry into the transport's peer table.
    fn add_peer(&mut self, mac: &MacAddr) -> anyhow::Result<()>;

    fn remove_peer(&mut self, mac: &MacAddr) -> anyhow::Result<()>;

    /// Send one buffer to one peer. Fails immediately if the link cannot
    /// take the buffer; the node never retries internally.
    fn send(&mut self, mac: &MacAddr, data: &[u8]) -> anyhow::Result<()>;
}

/// Optional wired MIDI collaborator, mirroring the wireless path. Inbound
/// bytes from this port go through [`Node::handle_local_midi`].
///
/// [`Node::handle_local_midi`]: crate::Node::handle_local_midi
pub trait LocalMidi {
    fn send(&mut self, data: &[u8]) -> anyhow::Result<()>;
}
