//! ESP32-S3 implementation of the hardware capability port.
//!
//! GPIO through the raw `gpio_*` driver calls, ADC through one ADC1
//! oneshot unit whose channels are configured on first use, delays
//! through `esp_idf_hal`'s hybrid [`Delay`] (busy-wait below a tick,
//! FreeRTOS sleep above), which keeps bit-timing waits jitter-free.

use esp_idf_hal::delay::Delay;
use esp_idf_svc::sys::*;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::PinState;
use log::{info, warn};

use crate::adapters::time::MonotonicClock;
use crate::app::ports::{HardwarePort, PinMode};
use crate::error::{BusError, Error};

/// On the S3, GPIO1..=GPIO10 are ADC1 channels 0..=9.
fn adc1_channel(pin: u8) -> Option<adc_channel_t> {
    (1..=10).contains(&pin).then(|| adc_channel_t::from(pin - 1))
}

pub struct EspHardware {
    delay: Delay,
    clock: MonotonicClock,
    adc: adc_oneshot_unit_handle_t,
    /// Bit n set once ADC1 channel n is configured.
    adc_configured: u16,
}

// SAFETY: the ADC unit handle is only used through `&mut self`, and the
// registry keeps the whole port behind one mutex.
unsafe impl Send for EspHardware {}

impl EspHardware {
    pub fn new() -> Result<Self, Error> {
        let mut adc: adc_oneshot_unit_handle_t = core::ptr::null_mut();
        let cfg = adc_oneshot_unit_init_cfg_t {
            unit_id: adc_unit_t_ADC_UNIT_1,
            ulp_mode: adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
            ..Default::default()
        };
        // SAFETY: called once at boot; `adc` outlives the call.
        let ret = unsafe { adc_oneshot_new_unit(&cfg, &mut adc) };
        if ret != ESP_OK as i32 {
            return Err(Error::Init("ADC1 oneshot unit"));
        }
        info!("Hardware: ADC1 oneshot unit ready");
        Ok(Self {
            delay: Delay::new_default(),
            clock: MonotonicClock::new(),
            adc,
            adc_configured: 0,
        })
    }

    fn ensure_adc_channel(&mut self, channel: adc_channel_t) -> Result<(), BusError> {
        let bit = 1u16 << channel;
        if self.adc_configured & bit != 0 {
            return Ok(());
        }
        let cfg = adc_oneshot_chan_cfg_t {
            atten: adc_atten_t_ADC_ATTEN_DB_12,
            bitwidth: adc_bitwidth_t_ADC_BITWIDTH_12,
        };
        // SAFETY: `self.adc` is a live unit handle created in `new`.
        let ret = unsafe { adc_oneshot_config_channel(self.adc, channel, &cfg) };
        if ret != ESP_OK as i32 {
            warn!("Hardware: ADC1 channel {} config failed (rc={})", channel, ret);
            return Err(BusError::Unsupported);
        }
        self.adc_configured |= bit;
        Ok(())
    }
}

impl Drop for EspHardware {
    fn drop(&mut self) {
        // SAFETY: handle created in `new` and not used after this.
        unsafe {
            adc_oneshot_del_unit(self.adc);
        }
    }
}

impl DelayNs for EspHardware {
    fn delay_ns(&mut self, ns: u32) {
        self.delay.delay_ns(ns);
    }

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}

impl HardwarePort for EspHardware {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        let gpio = i32::from(pin);
        let (direction, pull) = match mode {
            PinMode::Output => (
                gpio_mode_t_GPIO_MODE_INPUT_OUTPUT_OD,
                gpio_pull_mode_t_GPIO_FLOATING,
            ),
            PinMode::Input => (gpio_mode_t_GPIO_MODE_INPUT, gpio_pull_mode_t_GPIO_FLOATING),
            PinMode::InputPullup => {
                (gpio_mode_t_GPIO_MODE_INPUT, gpio_pull_mode_t_GPIO_PULLUP_ONLY)
            }
        };
        // SAFETY: plain register configuration of a caller-chosen pin.
        let ret = unsafe {
            let r = gpio_set_direction(gpio, direction);
            if r == ESP_OK as i32 { gpio_set_pull_mode(gpio, pull) } else { r }
        };
        if ret != ESP_OK as i32 {
            warn!("Hardware: GPIO{} mode {:?} failed (rc={})", pin, mode, ret);
        }
    }

    fn digital_write(&mut self, pin: u8, level: PinState) {
        // SAFETY: register write on a configured pin.
        unsafe {
            gpio_set_level(i32::from(pin), u32::from(level == PinState::High));
        }
    }

    fn digital_read(&mut self, pin: u8) -> PinState {
        // SAFETY: read-only register access.
        PinState::from(unsafe { gpio_get_level(i32::from(pin)) } != 0)
    }

    fn analog_read(&mut self, pin: u8) -> Result<u16, BusError> {
        let channel = adc1_channel(pin).ok_or(BusError::Unsupported)?;
        self.ensure_adc_channel(channel)?;
        let mut raw: i32 = 0;
        // SAFETY: channel configured above; `raw` outlives the call.
        let ret = unsafe { adc_oneshot_read(self.adc, channel, &mut raw) };
        if ret != ESP_OK as i32 {
            return Err(BusError::Timeout);
        }
        Ok(raw.max(0) as u16)
    }

    fn millis(&self) -> u64 {
        self.clock.uptime_ms()
    }
}
