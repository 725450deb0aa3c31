//! The public facade of the transport layer.
//!
//! [`Hci::start_up`] wires the collaborators together, spawns the event-loop
//! thread and returns the handle the upper stack drives. Every method is
//! thread-safe: entry points only send over channels or touch atomics, so
//! the upper stack may call them from anywhere.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, error, info, warn};

use btlink_core::{
    config::Config,
    controller::{Controller, ImmediateController},
    error::Result,
    hal::Hal,
    low_power::{LowPowerCommand, LowPowerManager, NoopLowPowerManager},
    packet_pool::{BufferAllocator, PooledAllocator},
    snoop::{BtSnoop, NoopSnoop},
    vendor::{PowerState, Vendor, VendorOp},
};
use btlink_protocol::{tag, BtPacket};

use crate::{
    alarm::{Clock, SystemClock},
    dispatcher::UpwardDispatcher,
    event_loop::{EventLoop, LoopCollaborators, LoopHalEvents, LoopVendorEvents, Task},
    fatal::{AbortOnTimeout, FatalHandler},
    fragmenter::{Fragmenter, PassthroughFragmenter},
    pending::{CompleteCallback, PendingCommand, PendingCommands, StatusCallback},
};

/// Callbacks into the upper stack.
pub trait UpperCallbacks: Send + Sync {
    /// Preload (firmware configuration) finished with the given result.
    fn preload_finished(&self, success: bool);

    /// An outbound data packet left the layer. The upper stack owns the
    /// packet again.
    fn transmit_finished(&self, packet: BtPacket, all_sent: bool);
}

/// Clonable handle for pushing traffic down into the layer.
///
/// This is the capability handed to the inject side-channel; the facade
/// itself uses one internally.
#[derive(Clone)]
pub struct TransmitHandle {
    command_tx: Sender<PendingCommand>,
    packet_tx: Sender<BtPacket>,
}

impl TransmitHandle {
    /// Queues a command for dispatch under command flow control.
    pub fn transmit_command(
        &self,
        mut command: BtPacket,
        on_complete: Option<CompleteCallback>,
        on_status: Option<StatusCallback>,
    ) {
        let opcode = match command.opcode() {
            Ok(opcode) => opcode,
            Err(_) => {
                error!("command too short to contain an opcode, dropping it");
                return;
            }
        };

        // Stamp the message type in case the upper layer didn't.
        command.event = tag::STACK_TO_CONTROLLER_COMMAND;

        let entry = PendingCommand {
            opcode,
            complete_callback: on_complete,
            status_callback: on_status,
            command: Some(command),
        };
        if self.command_tx.send(entry).is_err() {
            warn!("transmit_command after the hci thread stopped");
        }
    }

    /// Queues an outbound packet by its event tag. Commands are routed
    /// through [`TransmitHandle::transmit_command`] with no callbacks.
    pub fn transmit_downward(&self, event: u16, mut packet: BtPacket) {
        if event & tag::EVENT_TYPE_MASK == tag::STACK_TO_CONTROLLER_COMMAND {
            warn!("legacy transmit of a command, use transmit_command instead");
            self.transmit_command(packet, None, None);
        } else {
            packet.event = event;
            if self.packet_tx.send(packet).is_err() {
                warn!("transmit_downward after the hci thread stopped");
            }
        }
    }
}

/// The HCI inject side-channel, a debug facility that feeds externally
/// sourced packets into the outbound path.
pub trait Inject: Send {
    /// Opens the side-channel. Returning false is tolerated; injection is
    /// never required for the stack to work.
    fn open(&mut self, transmit: TransmitHandle) -> bool;

    /// Closes the side-channel.
    fn close(&mut self);
}

/// Inject stub for builds without the debug facility.
#[derive(Debug, Default)]
pub struct NoopInject;

impl Inject for NoopInject {
    fn open(&mut self, _transmit: TransmitHandle) -> bool {
        true
    }

    fn close(&mut self) {}
}

/// Everything the transport layer talks to, bundled for [`Hci::start_up`].
///
/// [`Collaborators::new`] fills in workable defaults for all but the HAL
/// and the vendor driver; override the public fields to substitute real
/// implementations (or fakes under test). The allocator and fatal handler
/// stay `None` by default so start-up can build them from the [`Config`]
/// it receives (pool sizing, fatal drain delay).
pub struct Collaborators {
    /// Serial channel to the controller.
    pub hal: Box<dyn Hal>,
    /// Vendor driver for chip power, firmware and epilog.
    pub vendor: Box<dyn Vendor>,
    /// Outbound fragmentation / inbound multi-packet reassembly.
    pub fragmenter: Box<dyn Fragmenter>,
    /// Controller model (ACL size fetch).
    pub controller: Box<dyn Controller>,
    /// Transport sleep protocol driver.
    pub low_power: Box<dyn LowPowerManager>,
    /// Packet capture sink.
    pub snoop: Box<dyn BtSnoop>,
    /// Buffer source for whole packets. `None` means start-up builds a
    /// [`PooledAllocator`] sized from the [`Config`].
    pub allocator: Option<Box<dyn BufferAllocator>>,
    /// Debug inject side-channel.
    pub inject: Box<dyn Inject>,
    /// Receiver of the fatal command-timeout condition. `None` means
    /// start-up builds an [`AbortOnTimeout`] with the [`Config`] drain
    /// delay.
    pub fatal: Option<Box<dyn FatalHandler>>,
}

impl Collaborators {
    /// Bundles the two mandatory collaborators with defaults for the rest.
    pub fn new(hal: Box<dyn Hal>, vendor: Box<dyn Vendor>) -> Self {
        Self {
            hal,
            vendor,
            fragmenter: Box::new(PassthroughFragmenter),
            controller: Box::new(ImmediateController),
            low_power: Box::new(NoopLowPowerManager),
            snoop: Box::new(NoopSnoop),
            allocator: None,
            inject: Box::new(NoopInject),
            fatal: None,
        }
    }
}

/// The host-side HCI transport layer.
///
/// One instance per process is sufficient; dropping it shuts the layer
/// down if [`Hci::shut_down`] was not called already.
pub struct Hci {
    transmit: TransmitHandle,
    task_tx: Sender<Task>,
    thread: Option<JoinHandle<Box<dyn Vendor>>>,
    dispatcher: Arc<UpwardDispatcher>,
    firmware_is_configured: Arc<AtomicBool>,
    has_shut_down: AtomicBool,
    inject: Box<dyn Inject>,
}

impl Hci {
    /// Brings the layer up: wires the collaborators, spawns the hci thread.
    ///
    /// Any failure rolls back whatever was already initialized and returns
    /// the error; nothing keeps running half-started.
    pub fn start_up(
        local_addr: [u8; 6],
        collaborators: Collaborators,
        callbacks: Arc<dyn UpperCallbacks>,
        config: Config,
    ) -> Result<Hci> {
        Self::start_up_with_clock(local_addr, collaborators, callbacks, config, Arc::new(SystemClock))
    }

    /// [`Hci::start_up`] with a custom clock for the alarms.
    pub fn start_up_with_clock(
        local_addr: [u8; 6],
        collaborators: Collaborators,
        callbacks: Arc<dyn UpperCallbacks>,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Hci> {
        info!("starting up the hci layer");

        let Collaborators {
            mut hal,
            mut vendor,
            mut fragmenter,
            mut controller,
            mut low_power,
            snoop,
            allocator,
            mut inject,
            fatal,
        } = collaborators;

        // Config-derived defaults for the pieces nobody substituted.
        let allocator = allocator.unwrap_or_else(|| {
            Box::new(PooledAllocator::new(config.pool_buffer_size, config.pool_max_buffers))
        });
        let fatal =
            fatal.unwrap_or_else(|| Box::new(AbortOnTimeout::new(config.fatal_drain_delay)));

        let (command_tx, command_rx) = unbounded();
        let (packet_tx, packet_rx) = unbounded();
        let (task_tx, task_rx) = unbounded();

        let pending = Arc::new(PendingCommands::new());
        let dispatcher = Arc::new(UpwardDispatcher::new());
        let firmware_is_configured = Arc::new(AtomicBool::new(false));

        controller.init();
        fragmenter.init();

        if let Err(err) = vendor.open(local_addr, Box::new(LoopVendorEvents(task_tx.clone()))) {
            error!("unable to open the vendor driver: {}", err);
            fragmenter.cleanup();
            return Err(err);
        }

        hal.init(Box::new(LoopHalEvents(task_tx.clone())));
        low_power.init();

        // The inject channel stays with the facade: it is closed before the
        // thread is stopped during shutdown. Opening it may fail silently.
        let transmit = TransmitHandle { command_tx, packet_tx };
        if !inject.open(transmit.clone()) {
            debug!("hci inject channel did not open");
        }

        let collaborators = LoopCollaborators {
            hal,
            vendor,
            fragmenter,
            controller,
            low_power,
            snoop,
            allocator,
            fatal,
        };

        let event_loop = EventLoop::new(
            config,
            clock,
            collaborators,
            command_rx,
            packet_rx,
            task_rx,
            task_tx.clone(),
            pending,
            dispatcher.clone(),
            callbacks,
            firmware_is_configured.clone(),
        );

        match thread::Builder::new().name("hci-thread".into()).spawn(move || event_loop.run()) {
            Ok(handle) => Ok(Hci {
                transmit,
                task_tx,
                thread: Some(handle),
                dispatcher,
                firmware_is_configured,
                has_shut_down: AtomicBool::new(false),
                inject,
            }),
            Err(err) => {
                error!("unable to spawn the hci thread: {}", err);
                inject.close();
                Err(err.into())
            }
        }
    }

    /// Tears the layer down. Idempotent: a second call only logs.
    ///
    /// When the firmware was configured this runs the vendor epilog first,
    /// bounded by the epilog alarm; either way the hci thread is joined,
    /// queued buffers are returned to the allocator, and the chip is
    /// powered off.
    pub fn shut_down(&mut self) {
        if self.has_shut_down.swap(true, Ordering::SeqCst) {
            warn!("shut down already happened for this session");
            return;
        }

        info!("shutting down the hci layer");
        self.inject.close();

        if let Some(handle) = self.thread.take() {
            let task = if self.firmware_is_configured.load(Ordering::Acquire) {
                Task::Epilog
            } else {
                Task::Stop
            };
            let _ = self.task_tx.send(task);

            match handle.join() {
                Ok(mut vendor) => {
                    if let Err(err) =
                        vendor.send_command(VendorOp::ChipPowerControl(PowerState::Off))
                    {
                        error!("unable to power the chip off: {}", err);
                    }
                    vendor.close();
                }
                Err(_) => error!("the hci thread panicked during shutdown"),
            }
        }
    }

    /// Routes a chip power change to the vendor driver.
    pub fn set_chip_power_on(&self, on: bool) {
        let state = if on { PowerState::On } else { PowerState::Off };
        self.post(Task::ChipPower(state));
    }

    /// Starts preload: opens the HAL and configures the firmware. The
    /// result arrives through [`UpperCallbacks::preload_finished`].
    pub fn do_preload(&self) {
        debug!("posting preload work item");
        self.post(Task::Preload);
    }

    /// Starts postload: configures SCO routing and fetches ACL sizes.
    pub fn do_postload(&self) {
        debug!("posting postload work item");
        self.post(Task::Postload);
    }

    /// Starts capturing traffic to a btsnoop log at `path`.
    pub fn turn_on_logging(&self, path: &Path) {
        debug!("turning on btsnoop logging at {:?}", path);
        self.post(Task::SnoopOn(path.to_path_buf()));
    }

    /// Stops capturing traffic.
    pub fn turn_off_logging(&self) {
        debug!("turning off btsnoop logging");
        self.post(Task::SnoopOff);
    }

    /// Queues a command for dispatch under command flow control. The
    /// callbacks own whichever buffer the response kind hands them.
    pub fn transmit_command(
        &self,
        command: BtPacket,
        on_complete: Option<CompleteCallback>,
        on_status: Option<StatusCallback>,
    ) {
        self.transmit.transmit_command(command, on_complete, on_status);
    }

    /// Queues an outbound packet by its event tag.
    pub fn transmit_downward(&self, event: u16, packet: BtPacket) {
        self.transmit.transmit_downward(event, packet);
    }

    /// Forwards a command to the low-power manager.
    pub fn send_low_power_command(&self, command: LowPowerCommand) {
        self.post(Task::LowPower(command));
    }

    /// The dispatcher the upper stack subscribes to for inbound packets.
    pub fn upward_dispatcher(&self) -> &UpwardDispatcher {
        &self.dispatcher
    }

    fn post(&self, task: Task) {
        if self.task_tx.send(task).is_err() {
            warn!("the hci thread is not running");
        }
    }
}

impl Drop for Hci {
    fn drop(&mut self) {
        self.shut_down();
    }
}
