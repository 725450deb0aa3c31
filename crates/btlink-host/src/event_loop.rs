//! The hci-thread reactor.
//!
//! Everything stateful happens here, on one thread: draining the command
//! queue under HCI command credits, transmitting data packets, pulling
//! inbound bytes through the reassembler, filtering command responses,
//! running the lifecycle tasks, and watching the alarms. The facade only
//! ever posts work in; at shutdown the thread hands the vendor driver back
//! so the facade can finish powering the chip off.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crossbeam_channel::{Receiver, Select, Sender};
use tracing::{debug, error, info, warn};

use btlink_core::{
    config::Config,
    controller::Controller,
    hal::{Hal, HalEvents, PacketType},
    low_power::{LowPowerCommand, LowPowerManager},
    packet_pool::BufferAllocator,
    snoop::BtSnoop,
    vendor::{PowerState, Vendor, VendorEvents, VendorOp},
};
use btlink_protocol::{BtPacket, ByteSource, Reassembler, ReassemblyStatus};

use crate::{
    alarm::{Alarm, Clock},
    dispatcher::UpwardDispatcher,
    fatal::FatalHandler,
    filter::{filter_incoming_event, FilterOutcome},
    fragmenter::{FragmentSink, Fragmenter},
    hci::UpperCallbacks,
    pending::{PendingCommand, PendingCommands},
};

/// Work posted to the event-loop thread.
#[derive(Debug)]
pub(crate) enum Task {
    Preload,
    Postload,
    Epilog,
    Stop,
    DataReady(PacketType),
    FirmwareConfigured(bool),
    ScoConfigured(bool),
    EpilogDone(bool),
    AclSizeFetched,
    ChipPower(PowerState),
    LowPower(LowPowerCommand),
    SnoopOn(PathBuf),
    SnoopOff,
}

/// Vendor completion capability: posts results back to the loop.
pub(crate) struct LoopVendorEvents(pub(crate) Sender<Task>);

impl VendorEvents for LoopVendorEvents {
    fn firmware_configured(&self, success: bool) {
        let _ = self.0.send(Task::FirmwareConfigured(success));
    }

    fn sco_configured(&self, success: bool) {
        let _ = self.0.send(Task::ScoConfigured(success));
    }

    fn epilog_done(&self, success: bool) {
        let _ = self.0.send(Task::EpilogDone(success));
    }
}

/// HAL readiness capability: posts data-ready notifications to the loop.
pub(crate) struct LoopHalEvents(pub(crate) Sender<Task>);

impl HalEvents for LoopHalEvents {
    fn data_ready(&self, packet_type: PacketType) {
        let _ = self.0.send(Task::DataReady(packet_type));
    }
}

/// The collaborators the loop thread owns, with the config-derived defaults
/// (allocator sizing, fatal drain delay) already resolved by the facade.
pub(crate) struct LoopCollaborators {
    pub(crate) hal: Box<dyn Hal>,
    pub(crate) vendor: Box<dyn Vendor>,
    pub(crate) fragmenter: Box<dyn Fragmenter>,
    pub(crate) controller: Box<dyn Controller>,
    pub(crate) low_power: Box<dyn LowPowerManager>,
    pub(crate) snoop: Box<dyn BtSnoop>,
    pub(crate) allocator: Box<dyn BufferAllocator>,
    pub(crate) fatal: Box<dyn FatalHandler>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum LifecycleState {
    Starting,
    Preloading,
    Configured,
    Postloading,
    Running,
    Epiloging,
    Down,
}

/// Adapts the HAL's per-type non-blocking read to the reassembler.
struct HalByteSource<'a> {
    hal: &'a mut dyn Hal,
    packet_type: PacketType,
}

impl ByteSource for HalByteSource<'_> {
    fn read(&mut self, dst: &mut [u8]) -> usize {
        self.hal.read_data(self.packet_type, dst)
    }
}

/// The fragmenter's callbacks, borrowed from the loop for one call.
struct LoopSink<'a> {
    hal: &'a mut dyn Hal,
    snoop: &'a mut dyn BtSnoop,
    allocator: &'a mut dyn BufferAllocator,
    dispatcher: &'a UpwardDispatcher,
    upper: &'a dyn UpperCallbacks,
}

impl FragmentSink for LoopSink<'_> {
    fn transmit_fragment(&mut self, packet: &BtPacket, _send_done: bool) {
        let Some(packet_type) = packet.serial_type() else {
            error!("cannot transmit a packet with tag 0x{:04x}", packet.event);
            return;
        };
        self.snoop.capture(packet_type, packet.payload(), false);
        self.hal.transmit_data(packet_type, packet.payload());
    }

    fn dispatch_reassembled(&mut self, packet: BtPacket) {
        if let Err(packet) = self.dispatcher.dispatch(packet) {
            warn!("no upward subscriber for tag 0x{:04x}, dropping the packet", packet.event);
            self.allocator.release(packet.into_buffer());
        }
    }

    fn transmit_finished(&mut self, packet: BtPacket, all_sent: bool) {
        self.upper.transmit_finished(packet, all_sent);
    }
}

/// What the reactor woke up for.
enum Woke {
    Task(Task),
    Command(PendingCommand),
    Packet(BtPacket),
    TimedOut,
    ChannelClosed,
}

pub(crate) struct EventLoop {
    config: Config,
    clock: Arc<dyn Clock>,
    credits: usize,
    state: LifecycleState,
    reassembler: Reassembler,
    pending: Arc<PendingCommands>,
    dispatcher: Arc<UpwardDispatcher>,
    upper: Arc<dyn UpperCallbacks>,
    firmware_is_configured: Arc<AtomicBool>,
    command_rx: Receiver<PendingCommand>,
    packet_rx: Receiver<BtPacket>,
    task_rx: Receiver<Task>,
    task_tx: Sender<Task>,
    watchdog: Alarm,
    epilog: Alarm,
    collaborators: LoopCollaborators,
}

impl EventLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        collaborators: LoopCollaborators,
        command_rx: Receiver<PendingCommand>,
        packet_rx: Receiver<BtPacket>,
        task_rx: Receiver<Task>,
        task_tx: Sender<Task>,
        pending: Arc<PendingCommands>,
        dispatcher: Arc<UpwardDispatcher>,
        upper: Arc<dyn UpperCallbacks>,
        firmware_is_configured: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            clock,
            // The host may send at most one command until the controller
            // says otherwise (Vol 2, Part E, 4.4 Command Flow Control).
            credits: 1,
            state: LifecycleState::Starting,
            reassembler: Reassembler::new(),
            pending,
            dispatcher,
            upper,
            firmware_is_configured,
            command_rx,
            packet_rx,
            task_rx,
            task_tx,
            watchdog: Alarm::new(),
            epilog: Alarm::new(),
            collaborators,
        }
    }

    /// Runs until stopped, then tears down and hands the vendor driver back.
    pub(crate) fn run(mut self) -> Box<dyn Vendor> {
        debug!("hci thread running");

        loop {
            let now = self.clock.now();

            if self.epilog.expired(now) {
                info!("epilog wait timed out, stopping the hci thread");
                break;
            }
            if self.watchdog.expired(now) {
                self.watchdog.cancel();
                if !self.handle_watchdog() {
                    break;
                }
                continue;
            }

            let timeout = match (self.watchdog.remaining(now), self.epilog.remaining(now)) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };

            let woke = {
                let mut sel = Select::new();
                let task_idx = sel.recv(&self.task_rx);
                let packet_idx = sel.recv(&self.packet_rx);
                // The command queue only participates while credits allow a
                // dispatch; a credit refresh re-registers it next pass.
                let command_idx =
                    (self.credits > 0).then(|| sel.recv(&self.command_rx));

                let oper = match timeout {
                    Some(timeout) => sel.select_timeout(timeout).ok(),
                    None => Some(sel.select()),
                };

                match oper {
                    None => Woke::TimedOut,
                    Some(oper) => {
                        let index = oper.index();
                        if index == task_idx {
                            oper.recv(&self.task_rx).map(Woke::Task).unwrap_or(Woke::ChannelClosed)
                        } else if index == packet_idx {
                            oper.recv(&self.packet_rx)
                                .map(Woke::Packet)
                                .unwrap_or(Woke::ChannelClosed)
                        } else if Some(index) == command_idx {
                            oper.recv(&self.command_rx)
                                .map(Woke::Command)
                                .unwrap_or(Woke::ChannelClosed)
                        } else {
                            Woke::TimedOut
                        }
                    }
                }
            };

            match woke {
                Woke::Task(task) => {
                    if !self.handle_task(task) {
                        break;
                    }
                }
                Woke::Command(entry) => self.dispatch_command(entry),
                Woke::Packet(packet) => self.transmit_packet(packet),
                Woke::TimedOut => {}
                Woke::ChannelClosed => {
                    warn!("a queue closed from under the hci thread, stopping");
                    break;
                }
            }
        }

        self.teardown()
    }

    /// Returns false when the loop should stop.
    fn handle_task(&mut self, task: Task) -> bool {
        match task {
            Task::Preload => {
                info!("preloading: opening the hal and configuring firmware");
                self.set_state(LifecycleState::Preloading);
                if let Err(err) = self.collaborators.hal.open() {
                    error!("unable to open the hal: {}", err);
                    self.upper.preload_finished(false);
                    return true;
                }
                if let Err(err) =
                    self.collaborators.vendor.send_async_command(VendorOp::ConfigureFirmware)
                {
                    error!("unable to start firmware configuration: {}", err);
                    self.upper.preload_finished(false);
                }
                true
            }
            Task::FirmwareConfigured(success) => {
                debug!("vendor firmware configuration finished (success: {})", success);
                self.firmware_is_configured.store(true, Ordering::Release);
                self.set_state(LifecycleState::Configured);
                self.upper.preload_finished(true);
                true
            }
            Task::Postload => {
                info!("postloading: configuring sco");
                self.set_state(LifecycleState::Postloading);
                if self.collaborators.vendor.send_async_command(VendorOp::ConfigureSco).is_err() {
                    // Without the submission there will be no sco callback,
                    // so run the next step of the chain as if it had failed.
                    warn!("unable to submit sco configuration, continuing postload anyway");
                    return self.handle_task(Task::ScoConfigured(false));
                }
                true
            }
            Task::ScoConfigured(success) => {
                debug!("sco configuration finished (success: {})", success);
                let tx = self.task_tx.clone();
                self.collaborators.controller.begin_acl_size_fetch(Box::new(move || {
                    let _ = tx.send(Task::AclSizeFetched);
                }));
                true
            }
            Task::AclSizeFetched => {
                info!("postload finished");
                self.set_state(LifecycleState::Running);
                true
            }
            Task::Epilog => {
                self.set_state(LifecycleState::Epiloging);
                self.epilog.set(self.clock.as_ref(), self.config.epilog_timeout);
                if let Err(err) = self.collaborators.vendor.send_async_command(VendorOp::DoEpilog) {
                    // The epilog alarm bounds the wait either way.
                    error!("unable to submit the epilog command: {}", err);
                }
                true
            }
            Task::EpilogDone(success) => {
                info!("epilog finished (success: {}), stopping the hci thread", success);
                false
            }
            Task::Stop => false,
            Task::DataReady(packet_type) => {
                self.handle_data_ready(packet_type);
                true
            }
            Task::ChipPower(state) => {
                debug!("setting bluetooth chip power to {:?}", state);
                if let Err(err) =
                    self.collaborators.vendor.send_command(VendorOp::ChipPowerControl(state))
                {
                    error!("chip power control failed: {}", err);
                }
                true
            }
            Task::LowPower(command) => {
                self.collaborators.low_power.post_command(command);
                true
            }
            Task::SnoopOn(path) => {
                if let Err(err) = self.collaborators.snoop.open(&path) {
                    error!("unable to open snoop log at {:?}: {}", path, err);
                }
                true
            }
            Task::SnoopOff => {
                self.collaborators.snoop.close();
                true
            }
        }
    }

    /// Returns false when the loop should stop.
    fn handle_watchdog(&mut self) -> bool {
        match self.pending.front_opcode() {
            None => {
                error!("command response timeout with no commands pending response");
                true
            }
            Some(opcode) => {
                error!("timeout waiting for response to a command, opcode 0x{:04x}", opcode);
                self.collaborators.fatal.command_timed_out(opcode);
                // Only reachable with a non-terminating handler installed.
                false
            }
        }
    }

    fn handle_data_ready(&mut self, packet_type: PacketType) {
        let status = {
            let LoopCollaborators { hal, allocator, .. } = &mut self.collaborators;
            let mut source = HalByteSource { hal: hal.as_mut(), packet_type };
            self.reassembler.poll(packet_type, &mut source, allocator.as_mut())
        };

        let ReassemblyStatus::Finished(packet) = status else {
            return;
        };

        self.collaborators.snoop.capture(packet_type, packet.payload(), true);

        let forward = if packet_type == PacketType::Event {
            match filter_incoming_event(packet, &self.pending, self.collaborators.allocator.as_mut())
            {
                FilterOutcome::Consumed(credits) => {
                    // Credits are replaced, never added to.
                    self.credits = credits as usize;
                    self.restart_watchdog();
                    None
                }
                FilterOutcome::Dropped => None,
                FilterOutcome::Forward(packet) => Some(packet),
            }
        } else {
            Some(packet)
        };

        if let Some(packet) = forward {
            let LoopCollaborators { fragmenter, hal, snoop, allocator, .. } = &mut self.collaborators;
            let mut sink = LoopSink {
                hal: hal.as_mut(),
                snoop: snoop.as_mut(),
                allocator: allocator.as_mut(),
                dispatcher: &self.dispatcher,
                upper: self.upper.as_ref(),
            };
            fragmenter.reassemble_and_dispatch(packet, &mut sink);
        }

        self.collaborators.hal.packet_finished(packet_type);

        // More bytes may be buffered; take another turn through the reactor
        // so other packet types and queue work can interleave.
        let _ = self.task_tx.send(Task::DataReady(packet_type));
    }

    fn dispatch_command(&mut self, entry: PendingCommand) {
        let PendingCommand { opcode, complete_callback, status_callback, command } = entry;
        self.credits -= 1;

        self.collaborators.low_power.wake_assert();
        let command = {
            let LoopCollaborators { fragmenter, hal, snoop, allocator, .. } = &mut self.collaborators;
            let mut sink = LoopSink {
                hal: hal.as_mut(),
                snoop: snoop.as_mut(),
                allocator: allocator.as_mut(),
                dispatcher: &self.dispatcher,
                upper: self.upper.as_ref(),
            };
            match command {
                Some(packet) => fragmenter.fragment_and_dispatch(packet, &mut sink),
                None => None,
            }
        };
        self.collaborators.low_power.transmit_done();

        // The command now awaits its response event.
        self.pending.push(PendingCommand { opcode, complete_callback, status_callback, command });
        self.restart_watchdog();
    }

    fn transmit_packet(&mut self, packet: BtPacket) {
        self.collaborators.low_power.wake_assert();
        let leftover = {
            let LoopCollaborators { fragmenter, hal, snoop, allocator, .. } = &mut self.collaborators;
            let mut sink = LoopSink {
                hal: hal.as_mut(),
                snoop: snoop.as_mut(),
                allocator: allocator.as_mut(),
                dispatcher: &self.dispatcher,
                upper: self.upper.as_ref(),
            };
            fragmenter.fragment_and_dispatch(packet, &mut sink)
        };
        self.collaborators.low_power.transmit_done();

        if let Some(packet) = leftover {
            // Only commands come back, and commands never use this queue.
            warn!("unexpected command on the data packet path, releasing it");
            self.collaborators.allocator.release(packet.into_buffer());
        }
    }

    fn restart_watchdog(&mut self) {
        if self.pending.is_empty() {
            self.watchdog.cancel();
        } else {
            self.watchdog.set(self.clock.as_ref(), self.config.command_timeout);
        }
    }

    fn set_state(&mut self, next: LifecycleState) {
        if self.state != next {
            debug!("hci lifecycle {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn teardown(mut self) -> Box<dyn Vendor> {
        self.set_state(LifecycleState::Down);

        // Anything still queued goes back to the allocator.
        while let Ok(entry) = self.command_rx.try_recv() {
            if let Some(command) = entry.command {
                self.collaborators.allocator.release(command.into_buffer());
            }
        }
        while let Ok(packet) = self.packet_rx.try_recv() {
            self.collaborators.allocator.release(packet.into_buffer());
        }
        for entry in self.pending.drain() {
            if let Some(command) = entry.command {
                self.collaborators.allocator.release(command.into_buffer());
            }
        }

        self.watchdog.cancel();
        self.epilog.cancel();

        self.collaborators.fragmenter.cleanup();
        self.collaborators.low_power.cleanup();
        self.collaborators.hal.close();
        self.collaborators.snoop.close();

        debug!("hci thread exiting");
        self.collaborators.vendor
    }
}
