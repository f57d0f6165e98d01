//! Register field descriptors
//!
//! The core never dereferences memory. Every hardware touch point is named
//! by a [`FieldId`], which resolves here to a register, a bit mask and a bit
//! offset within that register. The [`ClockRegisters`](super::executor::ClockRegisters)
//! collaborator owns the actual memory-mapped layout.
//!
//! Values carried by planner operations are field-relative: a collaborator
//! shifts them by [`FieldId::offset`] and masks them with [`FieldId::mask`]
//! when performing the write.

/// Hardware registers reachable through the collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    /// RCC clock control register (oscillator and PLL on/ready bits)
    Cr,
    /// RCC clock configuration register (mux, prescalers, PLL settings)
    Cfgr,
    /// RCC clock interrupt register
    Cir,
    /// AHB peripheral clock enable register
    AhbEnr,
    /// APB1 peripheral clock enable register
    Apb1Enr,
    /// APB2 peripheral clock enable register
    Apb2Enr,
    /// APB1 peripheral reset register
    Apb1Rstr,
    /// APB2 peripheral reset register
    Apb2Rstr,
    /// Flash access control register
    FlashAcr,
}

/// A named hardware field.
///
/// `BusPrescalers` and `PllConfiguration` are composite fields covering
/// several adjacent selector fields, so that the planner can program all bus
/// prescalers (or the whole PLL setup) with a single batched register write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FieldId {
    /// Internal oscillator enable
    HsiOn,
    /// Internal oscillator ready flag
    HsiReady,
    /// External oscillator enable
    HseOn,
    /// External oscillator ready flag
    HseReady,
    /// External oscillator bypass (external clock signal, no XTAL driver)
    HseBypass,
    /// PLL enable
    PllOn,
    /// PLL ready flag
    PllReady,
    /// System clock mux selector
    SysClockSwitch,
    /// System clock mux status (read-only, reflects the active source)
    SysClockStatus,
    /// AHB, APB1, APB2 and ADC prescalers as one batched field
    BusPrescalers,
    /// PLL source, input prescaler, multiplier and USB prescaler as one
    /// batched field. Must only be written while the PLL is disabled.
    PllConfiguration,
    /// Flash wait states
    FlashLatency,
    /// Internal oscillator ready interrupt enable
    HsiReadyInterruptEnable,
    /// External oscillator ready interrupt enable
    HseReadyInterruptEnable,
    /// PLL ready interrupt enable
    PllReadyInterruptEnable,
    /// AHB peripheral clock gates (whole register)
    AhbEnable,
    /// APB1 peripheral clock gates (whole register)
    Apb1Enable,
    /// APB2 peripheral clock gates (whole register)
    Apb2Enable,
    /// APB1 peripheral reset lines (whole register)
    Apb1Reset,
    /// APB2 peripheral reset lines (whole register)
    Apb2Reset,
}

impl FieldId {
    /// Register this field lives in.
    pub const fn register(self) -> Register {
        use FieldId::*;
        match self {
            HsiOn | HsiReady | HseOn | HseReady | HseBypass | PllOn
            | PllReady => Register::Cr,
            SysClockSwitch | SysClockStatus | BusPrescalers
            | PllConfiguration => Register::Cfgr,
            HsiReadyInterruptEnable | HseReadyInterruptEnable
            | PllReadyInterruptEnable => Register::Cir,
            AhbEnable => Register::AhbEnr,
            Apb1Enable => Register::Apb1Enr,
            Apb2Enable => Register::Apb2Enr,
            Apb1Reset => Register::Apb1Rstr,
            Apb2Reset => Register::Apb2Rstr,
            FlashLatency => Register::FlashAcr,
        }
    }

    /// Bit offset of the field within its register.
    pub const fn offset(self) -> u32 {
        use FieldId::*;
        match self {
            HsiOn => 0,
            HsiReady => 1,
            HseOn => 16,
            HseReady => 17,
            HseBypass => 18,
            PllOn => 24,
            PllReady => 25,
            SysClockSwitch => 0,
            SysClockStatus => 2,
            BusPrescalers => 4,
            PllConfiguration => 16,
            FlashLatency => 0,
            HsiReadyInterruptEnable => 10,
            HseReadyInterruptEnable => 11,
            PllReadyInterruptEnable => 12,
            AhbEnable | Apb1Enable | Apb2Enable | Apb1Reset | Apb2Reset => 0,
        }
    }

    /// In-register mask of the field (already shifted to its position).
    pub const fn mask(self) -> u32 {
        use FieldId::*;
        match self {
            HsiOn | HsiReady | HseOn | HseReady | HseBypass | PllOn
            | PllReady | HsiReadyInterruptEnable | HseReadyInterruptEnable
            | PllReadyInterruptEnable => 1 << self.offset(),
            SysClockSwitch | SysClockStatus => 0b11 << self.offset(),
            // HPRE[3:0] | PPRE1[2:0] | PPRE2[2:0] | ADCPRE[1:0]
            BusPrescalers => 0xfff << self.offset(),
            // PLLSRC | PLLXTPRE | PLLMUL[3:0] | USBPRE
            PllConfiguration => 0x7f << self.offset(),
            FlashLatency => 0b111,
            AhbEnable | Apb1Enable | Apb2Enable | Apb1Reset | Apb2Reset => {
                0xffff_ffff
            }
        }
    }
}

/// System clock mux selector codes
pub const SW_HSI: u32 = 0b00;
/// System clock mux selector code for the external oscillator
pub const SW_HSE: u32 = 0b01;
/// System clock mux selector code for the PLL
pub const SW_PLL: u32 = 0b10;

/// PLL source selector codes (internal oscillator through the fixed /2)
pub const PLLSRC_HSI: u32 = 0;
/// PLL source selector code for the external oscillator
pub const PLLSRC_HSE: u32 = 1;

/// Pack the four bus prescaler codes into a `BusPrescalers` field value.
pub const fn pack_prescalers(
    hpre: u32,
    ppre1: u32,
    ppre2: u32,
    adcpre: u32,
) -> u32 {
    hpre | (ppre1 << 4) | (ppre2 << 7) | (adcpre << 10)
}

/// Pack source, input prescaler, multiplier and USB prescaler codes into a
/// `PllConfiguration` field value.
pub const fn pack_pll_config(
    src: u32,
    xtpre: u32,
    mul: u32,
    usbpre: u32,
) -> u32 {
    src | (xtpre << 1) | (mul << 2) | (usbpre << 6)
}
