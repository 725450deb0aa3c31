//! Loopback demo: bring the layer up against an emulated controller and
//! run an HCI_Reset round trip.
//!
//! - cargo run -p btlink --example loopback
//!
//! The emulated controller answers every command with a Command Complete
//! event carrying status 0, like a freshly reset chip would.

use std::sync::{
    mpsc, Arc, Mutex,
};

use btlink::{
    BtPacket, Collaborators, Config, Hal, HalEvents, Hci, PacketType, UpperCallbacks, Vendor,
    VendorEvents, VendorOp,
};

/// In-process controller: commands in, synthesized Command Complete out.
#[derive(Clone, Default)]
struct LoopbackController(Arc<Mutex<ControllerState>>);

#[derive(Default)]
struct ControllerState {
    events: Option<Box<dyn HalEvents>>,
    inbound: Vec<u8>,
}

impl Hal for LoopbackController {
    fn init(&mut self, events: Box<dyn HalEvents>) {
        self.0.lock().unwrap().events = Some(events);
    }

    fn open(&mut self) -> btlink::Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn read_data(&mut self, _packet_type: PacketType, dst: &mut [u8]) -> usize {
        let mut state = self.0.lock().unwrap();
        let count = dst.len().min(state.inbound.len());
        dst[..count].copy_from_slice(&state.inbound[..count]);
        state.inbound.drain(..count);
        count
    }

    fn transmit_data(&mut self, packet_type: PacketType, data: &[u8]) {
        if packet_type != PacketType::Command || data.len() < 2 {
            return;
        }

        // Command Complete: one credit, the echoed opcode, status 0.
        let mut state = self.0.lock().unwrap();
        state.inbound.extend([0x0E, 0x04, 0x01, data[0], data[1], 0x00]);
        if let Some(events) = state.events.as_ref() {
            events.data_ready(PacketType::Event);
        }
    }

    fn packet_finished(&mut self, _packet_type: PacketType) {}
}

/// Vendor driver whose async operations all succeed immediately.
#[derive(Default)]
struct LoopbackVendor {
    events: Option<Box<dyn VendorEvents>>,
}

impl Vendor for LoopbackVendor {
    fn open(&mut self, _local_addr: [u8; 6], events: Box<dyn VendorEvents>) -> btlink::Result<()> {
        self.events = Some(events);
        Ok(())
    }

    fn close(&mut self) {}

    fn send_command(&mut self, _op: VendorOp) -> btlink::Result<()> {
        Ok(())
    }

    fn send_async_command(&mut self, op: VendorOp) -> btlink::Result<()> {
        if let Some(events) = self.events.as_ref() {
            match op {
                VendorOp::ConfigureFirmware => events.firmware_configured(true),
                VendorOp::ConfigureSco => events.sco_configured(true),
                VendorOp::DoEpilog => events.epilog_done(true),
                VendorOp::ChipPowerControl(_) => {}
            }
        }
        Ok(())
    }
}

struct PrintingCallbacks;

impl UpperCallbacks for PrintingCallbacks {
    fn preload_finished(&self, success: bool) {
        println!("[lifecycle] preload finished (success: {})", success);
    }

    fn transmit_finished(&self, packet: BtPacket, all_sent: bool) {
        println!(
            "[outbound] {} byte data packet sent (all: {})",
            packet.payload().len(),
            all_sent
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let collaborators = Collaborators::new(
        Box::new(LoopbackController::default()),
        Box::new(LoopbackVendor::default()),
    );

    let mut hci = Hci::start_up(
        [0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22],
        collaborators,
        Arc::new(PrintingCallbacks),
        Config::default(),
    )?;

    hci.set_chip_power_on(true);
    hci.do_preload();
    hci.do_postload();

    // HCI_Reset (opcode 0x0C03), answered by the emulated controller.
    let (done_tx, done_rx) = mpsc::channel();
    let reset = BtPacket::new(0, vec![0x03, 0x0C, 0x00]);
    hci.transmit_command(
        reset,
        Some(Box::new(move |event| {
            println!("[inbound] command complete: {:02x?}", event.payload());
            let _ = done_tx.send(());
        })),
        None,
    );

    done_rx.recv()?;
    hci.shut_down();
    println!("done");
    Ok(())
}
