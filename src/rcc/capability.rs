//! Device capability tables
//!
//! Static, datasheet-derived description of one target device: available
//! oscillators, legal PLL multiplier and prescaler sets, per-domain legal
//! divider sets and absolute ceilings, flash-latency thresholds and
//! startup timing bounds. Pure table lookup, no behavior; device variants
//! are selected by loading a different table, never a different code path.
//!
//! [`CapabilityTable::validate`] asserts the table's self-consistency once
//! at startup. A self-contradictory table is a build defect, not a
//! recoverable condition.

use super::tree::NodeId;

/// One legal divider choice together with its register encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DividerEntry {
    /// Integer divisor
    pub divisor: u32,
    /// Register-encoded selector
    pub code: u32,
}

/// A legal rational scaling choice, for nodes that are not plain integer
/// dividers (the USB prescaler can divide by 1.5, i.e. scale by 2/3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RatioEntry {
    /// Multiplier applied to the parent frequency
    pub numerator: u32,
    /// Divisor applied after the multiplier
    pub denominator: u32,
    /// Register-encoded selector
    pub code: u32,
}

/// Flash wait states required up to a given core frequency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LatencyEntry {
    /// Highest core (AHB) frequency this entry covers, inclusive
    pub max_hclk: u32,
    /// Wait states to program
    pub wait_states: u32,
}

const fn div(divisor: u32, code: u32) -> DividerEntry {
    DividerEntry { divisor, code }
}

/// Capability description of one device. Immutable, compiled in.
#[derive(Debug)]
pub struct CapabilityTable {
    /// Device name, for diagnostics
    pub name: &'static str,

    /// Internal oscillator: fixed frequency and ready-wait bound
    pub hsi_frequency: u32,
    /// Spin bound while waiting for the internal oscillator ready flag
    pub hsi_startup_spins: u32,
    /// Legal external oscillator frequency window (inclusive)
    pub hse_frequency_range: (u32, u32),
    /// Spin bound while waiting for the external oscillator ready flag
    pub hse_startup_spins: u32,

    /// Legal PLL multipliers
    pub pll_multipliers: &'static [u32],
    /// Legal PLL input prescalers when fed from the external oscillator
    pub pll_hse_prescalers: &'static [DividerEntry],
    /// Fixed PLL input prescaler when fed from the internal oscillator
    pub pll_hsi_prescaler: u32,
    /// Legal PLL output window (inclusive)
    pub pll_output_range: (u32, u32),
    /// Spin bound while waiting for PLL lock
    pub pll_startup_spins: u32,

    /// Absolute system clock ceiling
    pub sys_max: u32,
    /// Spin bound while waiting for the system clock mux to report the
    /// newly selected source
    pub switch_spins: u32,

    /// Legal AHB prescalers and ceiling
    pub ahb_dividers: &'static [DividerEntry],
    /// Absolute AHB (core) ceiling
    pub ahb_max: u32,
    /// Legal APB1 prescalers
    pub apb1_dividers: &'static [DividerEntry],
    /// Absolute APB1 ceiling
    pub apb1_max: u32,
    /// Legal APB2 prescalers
    pub apb2_dividers: &'static [DividerEntry],
    /// Absolute APB2 ceiling
    pub apb2_max: u32,
    /// Legal ADC prescalers (divide APB2)
    pub adc_dividers: &'static [DividerEntry],
    /// Absolute ADC kernel clock ceiling
    pub adc_max: u32,
    /// Legal USB scalings of the PLL output; empty when the device has no
    /// USB
    pub usb_dividers: &'static [RatioEntry],
    /// Exact frequency the USB kernel clock must hit
    pub usb_frequency: u32,
    /// Legal SPI baud-rate dividers (divide the owning APB)
    pub spi_dividers: &'static [DividerEntry],
    /// Timer kernel clocks run at twice their APB when that APB's own
    /// prescaler is not 1
    pub timer_doubler: bool,

    /// Wait states per core frequency band, ascending
    pub flash_latency: &'static [LatencyEntry],
}

impl CapabilityTable {
    /// The legal PLL multiplier set.
    pub fn legal_pll_multipliers(&self) -> &'static [u32] {
        self.pll_multipliers
    }

    /// Legal divider set of a domain. Empty for nodes that are not integer
    /// dividers (oscillators, the muxes, USB).
    pub fn legal_dividers(&self, domain: NodeId) -> &'static [DividerEntry] {
        match domain {
            NodeId::Ahb => self.ahb_dividers,
            NodeId::Apb1 => self.apb1_dividers,
            NodeId::Apb2 => self.apb2_dividers,
            NodeId::Adc => self.adc_dividers,
            NodeId::Spi1 | NodeId::Spi2 => self.spi_dividers,
            _ => &[],
        }
    }

    /// Absolute frequency ceiling of a domain.
    pub fn max_frequency(&self, domain: NodeId) -> u32 {
        match domain {
            NodeId::Sys => self.sys_max,
            NodeId::Ahb => self.ahb_max,
            NodeId::Apb1 => self.apb1_max,
            NodeId::Apb2 | NodeId::Spi1 => self.apb2_max,
            NodeId::Spi2 => self.apb1_max,
            NodeId::Adc => self.adc_max,
            NodeId::Usb => self.usb_frequency,
            NodeId::Hsi => self.hsi_frequency,
            NodeId::Hse | NodeId::HseBypass => self.hse_frequency_range.1,
            NodeId::Pll => self.pll_output_range.1,
            // Timer kernels may legally run at twice their APB, up to the
            // system ceiling
            NodeId::TimApb1 | NodeId::TimApb2 => self.sys_max,
        }
    }

    /// Wait states required for a core frequency.
    pub fn flash_latency_for(&self, hclk: u32) -> u32 {
        for entry in self.flash_latency {
            if hclk <= entry.max_hclk {
                return entry.wait_states;
            }
        }
        // validate() guarantees the table covers sys_max
        self.flash_latency[self.flash_latency.len() - 1].wait_states
    }

    /// Whether this device routes a USB kernel clock at all.
    pub fn has_usb(&self) -> bool {
        !self.usb_dividers.is_empty()
    }

    /// Assert the table is self-consistent. Called once at startup; a
    /// failure here is fatal and indicates a defective table, so this
    /// panics rather than returning an error.
    pub fn validate(&self) {
        assert!(self.hsi_frequency > 0, "{}: HSI frequency", self.name);
        assert!(
            self.hse_frequency_range.0 <= self.hse_frequency_range.1,
            "{}: HSE range",
            self.name
        );
        assert!(
            !self.pll_multipliers.is_empty(),
            "{}: PLL multiplier set",
            self.name
        );
        assert!(
            self.pll_output_range.0 <= self.pll_output_range.1,
            "{}: PLL output range",
            self.name
        );
        assert!(self.pll_hsi_prescaler > 0, "{}: PLL HSI prescaler", self.name);
        assert!(self.sys_max > 0 && self.ahb_max <= self.sys_max);

        for domain in [
            NodeId::Ahb,
            NodeId::Apb1,
            NodeId::Apb2,
            NodeId::Adc,
            NodeId::Spi1,
        ] {
            let dividers = self.legal_dividers(domain);
            assert!(!dividers.is_empty(), "{}: {:?} dividers", self.name, domain);
            for pair in dividers.windows(2) {
                assert!(
                    pair[0].divisor < pair[1].divisor,
                    "{}: {:?} dividers not ascending",
                    self.name,
                    domain
                );
            }
        }

        assert!(
            !self.flash_latency.is_empty()
                && self.flash_latency[self.flash_latency.len() - 1].max_hclk
                    >= self.ahb_max,
            "{}: flash latency table does not cover the AHB ceiling",
            self.name
        );
        for pair in self.flash_latency.windows(2) {
            assert!(
                pair[0].max_hclk < pair[1].max_hclk
                    && pair[0].wait_states < pair[1].wait_states,
                "{}: flash latency table not ascending",
                self.name
            );
        }

        for ratio in self.usb_dividers {
            assert!(
                ratio.numerator > 0 && ratio.denominator > 0,
                "{}: USB ratio",
                self.name
            );
        }
        if self.has_usb() {
            assert!(self.usb_frequency > 0, "{}: USB frequency", self.name);
        }
    }
}

/// STM32F103 (performance line, RM0008).
pub const STM32F103: CapabilityTable = CapabilityTable {
    name: "STM32F103",

    hsi_frequency: 8_000_000,
    hsi_startup_spins: 64,
    hse_frequency_range: (4_000_000, 16_000_000),
    hse_startup_spins: 1536,

    pll_multipliers: &[2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16],
    pll_hse_prescalers: &[div(1, 0), div(2, 1)],
    pll_hsi_prescaler: 2,
    pll_output_range: (16_000_000, 72_000_000),
    pll_startup_spins: 512,

    sys_max: 72_000_000,
    switch_spins: 16,

    ahb_dividers: &[
        div(1, 0b0000),
        div(2, 0b1000),
        div(4, 0b1001),
        div(8, 0b1010),
        div(16, 0b1011),
        div(64, 0b1100),
        div(128, 0b1101),
        div(256, 0b1110),
        div(512, 0b1111),
    ],
    ahb_max: 72_000_000,
    apb1_dividers: &[
        div(1, 0b000),
        div(2, 0b100),
        div(4, 0b101),
        div(8, 0b110),
        div(16, 0b111),
    ],
    apb1_max: 36_000_000,
    apb2_dividers: &[
        div(1, 0b000),
        div(2, 0b100),
        div(4, 0b101),
        div(8, 0b110),
        div(16, 0b111),
    ],
    apb2_max: 72_000_000,
    adc_dividers: &[div(2, 0b00), div(4, 0b01), div(6, 0b10), div(8, 0b11)],
    adc_max: 14_000_000,
    usb_dividers: &[
        // USBPRE = 1: PLL undivided; USBPRE = 0: PLL / 1.5
        RatioEntry { numerator: 1, denominator: 1, code: 1 },
        RatioEntry { numerator: 2, denominator: 3, code: 0 },
    ],
    usb_frequency: 48_000_000,
    spi_dividers: &[
        div(2, 0b000),
        div(4, 0b001),
        div(8, 0b010),
        div(16, 0b011),
        div(32, 0b100),
        div(64, 0b101),
        div(128, 0b110),
        div(256, 0b111),
    ],
    timer_doubler: true,

    flash_latency: &[
        LatencyEntry { max_hclk: 24_000_000, wait_states: 0 },
        LatencyEntry { max_hclk: 48_000_000, wait_states: 1 },
        LatencyEntry { max_hclk: 72_000_000, wait_states: 2 },
    ],
};

/// STM32F100 (value line, RM0041). No USB; 24 MHz ceiling; zero-wait-state
/// flash across the whole range.
pub const STM32F100: CapabilityTable = CapabilityTable {
    name: "STM32F100",

    hsi_frequency: 8_000_000,
    hsi_startup_spins: 64,
    hse_frequency_range: (4_000_000, 24_000_000),
    hse_startup_spins: 1536,

    pll_multipliers: &[2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16],
    pll_hse_prescalers: &[div(1, 0), div(2, 1)],
    pll_hsi_prescaler: 2,
    pll_output_range: (16_000_000, 24_000_000),
    pll_startup_spins: 512,

    sys_max: 24_000_000,
    switch_spins: 16,

    ahb_dividers: &[
        div(1, 0b0000),
        div(2, 0b1000),
        div(4, 0b1001),
        div(8, 0b1010),
        div(16, 0b1011),
        div(64, 0b1100),
        div(128, 0b1101),
        div(256, 0b1110),
        div(512, 0b1111),
    ],
    ahb_max: 24_000_000,
    apb1_dividers: &[
        div(1, 0b000),
        div(2, 0b100),
        div(4, 0b101),
        div(8, 0b110),
        div(16, 0b111),
    ],
    apb1_max: 24_000_000,
    apb2_dividers: &[
        div(1, 0b000),
        div(2, 0b100),
        div(4, 0b101),
        div(8, 0b110),
        div(16, 0b111),
    ],
    apb2_max: 24_000_000,
    adc_dividers: &[div(2, 0b00), div(4, 0b01), div(6, 0b10), div(8, 0b11)],
    adc_max: 12_000_000,
    usb_dividers: &[],
    usb_frequency: 0,
    spi_dividers: &[
        div(2, 0b000),
        div(4, 0b001),
        div(8, 0b010),
        div(16, 0b011),
        div(32, 0b100),
        div(64, 0b101),
        div(128, 0b110),
        div(256, 0b111),
    ],
    timer_doubler: true,

    flash_latency: &[LatencyEntry { max_hclk: 24_000_000, wait_states: 0 }],
};
