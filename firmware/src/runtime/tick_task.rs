//! 100 Hz context: ADC averaging, failure monitor, output stage and session counters.

use charger_core::counters::TickContext;
use charger_core::failure::{FailureFlags, FailureInputs};
use charger_core::measurement::{AdcAverager, Measurements};
use charger_core::telemetry::{FailureTelemetry, TelemetryEventKind, TelemetryPayload};
use embassy_stm32::gpio::{Input, Output};
use embassy_time::{Duration, Ticker};

use crate::control::FirmwareInstant;
use crate::hw::power::AnalogFrontEnd;
use crate::hw::{self, OutputStage};
use crate::status;
use crate::telemetry::SharedTelemetry;

const TICK: Duration = Duration::from_millis(10);
/// Conversions averaged into each published sample.
const OVERSAMPLE: usize = 8;

#[embassy_executor::task]
pub async fn run(
    mut analog: AnalogFrontEnd<'static>,
    mut stage: OutputStage<Output<'static>, Output<'static>>,
    cc_flag: Input<'static>,
    telemetry: &'static SharedTelemetry,
) -> ! {
    let mut context = TickContext::new();
    let mut averager = AdcAverager::<OVERSAMPLE>::new();
    let mut ticker = Ticker::every(TICK);

    loop {
        ticker.next().await;

        let raw = loop {
            if let Some(average) = averager.push(analog.sample()) {
                break average;
            }
        };
        status::record_sample(raw);

        let power_good = analog.power_good();
        status::record_power_good(power_good);

        let calibration = status::calibration();
        let target = status::target();
        let measured = calibration.to_display(raw);
        let inputs = FailureInputs {
            power_good,
            measured,
            target: Measurements {
                voltage: calibration.voltage.adc_to_display(target.voltage_raw),
                current: calibration.current.adc_to_display(target.current_raw),
            },
            output_requested: status::output_requested(),
            regulation: status::regulation(),
        };

        if status::take_clear_latched() {
            let cleared = context.monitor_mut().clear_latched();
            record_released(telemetry, cleared, context.monitor().flags(), measured);
        }

        let report = context.on_tick(&inputs, status::take_counter_reset());
        let regulating = stage.apply(report.failure.directive, inputs.output_requested);
        status::record_directive(report.failure.directive);
        status::record_regulation(hw::reported_regulation(regulating, cc_flag.is_low()));
        status::record_failures(report.failure.flags);
        status::record_counters(report.counters);

        if !report.failure.tripped.is_empty() || !report.failure.cleared.is_empty() {
            telemetry.lock(|log| {
                log.borrow_mut()
                    .failures(&report.failure, measured, FirmwareInstant::now());
            });
        }
    }
}

fn record_released(
    telemetry: &SharedTelemetry,
    cleared: FailureFlags,
    flags: FailureFlags,
    measured: Measurements,
) {
    if cleared.is_empty() {
        return;
    }
    let payload = TelemetryPayload::Failure(FailureTelemetry { flags, measured });
    let now = FirmwareInstant::now();
    telemetry.lock(|log| {
        let mut log = log.borrow_mut();
        for kind in cleared.kinds() {
            log.record(TelemetryEventKind::FailureCleared(kind), payload, now);
        }
    });
}
