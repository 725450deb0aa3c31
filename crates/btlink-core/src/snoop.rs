//! btsnoop packet capture.
//!
//! Every packet crossing the layer can be mirrored into a capture sink for
//! diagnostics. [`FileSnoop`] writes the standard btsnoop v1 file format
//! (the format understood by the usual Bluetooth analysis tools); the
//! capture records carry the H4 packet-type indicator so the dump is
//! self-describing.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{error::Result, hal::PacketType};

/// Capture sink for HCI traffic.
pub trait BtSnoop: Send {
    /// Starts capturing to `path`.
    fn open(&mut self, path: &Path) -> Result<()>;

    /// Stops capturing.
    fn close(&mut self);

    /// Records one whole packet. `incoming` is true for controller-to-host
    /// traffic. `data` excludes the H4 indicator byte; the sink adds it.
    fn capture(&mut self, packet_type: PacketType, data: &[u8], incoming: bool);
}

/// Capture sink that drops everything. The default when logging is unused.
#[derive(Debug, Default)]
pub struct NoopSnoop;

impl BtSnoop for NoopSnoop {
    fn open(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn capture(&mut self, _packet_type: PacketType, _data: &[u8], _incoming: bool) {}
}

/// btsnoop file magic: "btsnoop" followed by a NUL.
const BTSNOOP_MAGIC: &[u8; 8] = b"btsnoop\0";
/// File format version.
const BTSNOOP_VERSION: u32 = 1;
/// Datalink type for H4 (HCI UART).
const BTSNOOP_DATALINK_H4: u32 = 1002;
/// Microseconds between 0 AD (the btsnoop epoch) and the Unix epoch.
const BTSNOOP_EPOCH_DELTA_US: u64 = 0x00dc_ddb3_0f2f_8000;

/// Capture sink writing the btsnoop v1 file format.
#[derive(Debug, Default)]
pub struct FileSnoop {
    writer: Option<BufWriter<File>>,
}

impl FileSnoop {
    /// Creates a closed sink; nothing is captured until [`BtSnoop::open`].
    pub fn new() -> Self {
        Self::default()
    }

    fn write_record(
        writer: &mut BufWriter<File>,
        packet_type: PacketType,
        data: &[u8],
        incoming: bool,
    ) -> io::Result<()> {
        // Flag word: bit 0 is direction (1 = received), bit 1 marks the
        // command/event channel.
        let mut flags: u32 = if incoming { 1 } else { 0 };
        if matches!(packet_type, PacketType::Command | PacketType::Event) {
            flags |= 2;
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
            + BTSNOOP_EPOCH_DELTA_US;

        let length = (data.len() + 1) as u32;
        writer.write_all(&length.to_be_bytes())?; // original length
        writer.write_all(&length.to_be_bytes())?; // included length
        writer.write_all(&flags.to_be_bytes())?;
        writer.write_all(&0u32.to_be_bytes())?; // cumulative drops
        writer.write_all(&timestamp.to_be_bytes())?;
        writer.write_all(&[packet_type.to_u8()])?;
        writer.write_all(data)
    }
}

impl BtSnoop for FileSnoop {
    fn open(&mut self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(BTSNOOP_MAGIC)?;
        writer.write_all(&BTSNOOP_VERSION.to_be_bytes())?;
        writer.write_all(&BTSNOOP_DATALINK_H4.to_be_bytes())?;
        self.writer = Some(writer);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }

    fn capture(&mut self, packet_type: PacketType, data: &[u8], incoming: bool) {
        if let Some(writer) = self.writer.as_mut() {
            if Self::write_record(writer, packet_type, data, incoming).is_err() {
                // The sink is diagnostics only; stop capturing on a bad disk
                // rather than disturbing the transport.
                self.writer = None;
            }
        }
    }
}
