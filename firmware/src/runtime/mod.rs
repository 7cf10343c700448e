use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::gpio::{Input, Level, Output, OutputOpenDrain, Pull, Speed};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use static_cell::StaticCell;

use crate::control::{ControlQueue, ReplyQueue};
use crate::hw::OutputStage;
use crate::hw::one_wire::ConnectorPins;
use crate::hw::power::AnalogFrontEnd;
use crate::repl::ReplFrameQueue;
use crate::store::{self, StoreCell};
use crate::telemetry::{SharedTelemetry, TelemetryLog};
use crate::usb::UsbDeviceStorage;

mod charger_task;
mod repl_task;
mod tick_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) static CONTROL_QUEUE: ControlQueue = Channel::new();
pub(super) static REPLY_QUEUE: ReplyQueue = Channel::new();
pub(super) static REPL_RX_QUEUE: ReplFrameQueue = Channel::new();
pub(super) static REPL_TX_QUEUE: ReplFrameQueue = Channel::new();
pub(super) static TELEMETRY: SharedTelemetry = Mutex::new(RefCell::new(TelemetryLog::new()));
pub(super) static USB_STORAGE: StaticCell<UsbDeviceStorage> = StaticCell::new();
static STORE: StaticCell<StoreCell> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA4,
        PA8,
        PA9,
        PB3,
        PB4,
        PB5,
        ADC1,
        USB,
        PA11,
        PA12,
        ..
    } = hal::init(config);

    let store: &'static StoreCell = STORE.init(store::new_cell());

    let analog = AnalogFrontEnd::new(Adc::new(ADC1), PA0, PA1, PA4);
    let stage = OutputStage::new(
        Output::new(PB3, Level::Low, Speed::Low),
        Output::new(PB4, Level::Low, Speed::Low),
    );
    let cc_flag = Input::new(PB5, Pull::Up);
    let connector = ConnectorPins::new(
        OutputOpenDrain::new(PA8, Level::High, Speed::Low),
        Input::new(PA9, Pull::Up),
    );

    spawner
        .spawn(tick_task::run(analog, stage, cc_flag, &TELEMETRY))
        .expect("failed to spawn tick task");

    spawner
        .spawn(charger_task::run(connector, store, &TELEMETRY))
        .expect("failed to spawn charger task");

    spawner
        .spawn(usb_task::run(USB, PA12, PA11, &TELEMETRY))
        .expect("failed to spawn USB task");

    spawner
        .spawn(repl_task::run(store, &TELEMETRY))
        .expect("failed to spawn REPL task");

    core::future::pending::<()>().await;
}
