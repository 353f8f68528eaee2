//! Dword command stream with length-prefixed packets and deferred patching.
//!
//! Every parameter packet is framed as `[type tag][byte length][body...]`.
//! The byte length covers the whole packet including the two framing dwords
//! and is written after the body through a reserved [`Slot`]. Packet lengths
//! accumulate into a per-task total that is patched into the task-info
//! packet once all packets of the task have been emitted.

/// Index of a reserved dword that will be patched later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot(usize);

/// Handle for a packet opened with [`CmdStream::begin_packet`]. Closing it
/// through [`CmdStream::end_packet`] is what writes the length word; an
/// `OpenPacket` must never be dropped without being closed.
#[derive(Debug)]
#[must_use = "an open packet must be closed with end_packet"]
pub struct OpenPacket {
    begin: usize,
    len_slot: Slot,
}

#[derive(Debug, Default)]
pub struct CmdStream {
    buf: Vec<u32>,
    task_total: u32,
    task_size_slot: Option<Slot>,
}

impl CmdStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor in dwords. Advances monotonically within a task.
    pub fn cursor(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn dwords(&self) -> &[u32] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.task_total = 0;
        self.task_size_slot = None;
    }

    pub fn push(&mut self, value: u32) {
        self.buf.push(value);
    }

    pub fn reserve_slot(&mut self) -> Slot {
        self.buf.push(0);
        Slot(self.buf.len() - 1)
    }

    pub fn patch(&mut self, slot: Slot, value: u32) {
        self.buf[slot.0] = value;
    }

    /// Appends one byte of bit-packed payload. Bytes fill each dword from
    /// the least significant byte up, so the byte stream reads back in
    /// little-endian dword order. `byte_index` counts bytes emitted since
    /// the packer was last reset; the caller must not interleave dword
    /// writes with a partially filled byte region.
    pub fn push_packed_byte(&mut self, byte_index: usize, byte: u8) {
        let shift = 8 * (byte_index % 4);
        if shift == 0 {
            self.buf.push(u32::from(byte));
        } else if let Some(dw) = self.buf.last_mut() {
            *dw |= u32::from(byte) << shift;
        }
    }

    pub fn begin_packet(&mut self, tag: u32) -> OpenPacket {
        let begin = self.buf.len();
        self.buf.push(tag);
        let len_slot = self.reserve_slot();
        OpenPacket { begin, len_slot }
    }

    /// Closes a packet: patches its byte length and adds it to the running
    /// task total. Returns the packet length in bytes.
    pub fn end_packet(&mut self, packet: OpenPacket) -> u32 {
        let len = ((self.buf.len() - packet.begin) * 4) as u32;
        self.patch(packet.len_slot, len);
        self.task_total += len;
        len
    }

    /// Starts task-size accounting for a new task. Called immediately
    /// before the task-info packet is emitted.
    pub fn start_task(&mut self) {
        self.task_total = 0;
        self.task_size_slot = None;
    }

    /// Remembers the total-task-size placeholder inside the task-info
    /// packet body.
    pub fn set_task_size_slot(&mut self, slot: Slot) {
        self.task_size_slot = Some(slot);
    }

    /// Patches the accumulated task size into the task-info placeholder.
    /// Returns the total in bytes, or 0 if no task was open.
    pub fn finish_task(&mut self) -> u32 {
        match self.task_size_slot.take() {
            Some(slot) => {
                let total = self.task_total;
                self.patch(slot, total);
                total
            }
            None => 0,
        }
    }
}
