//! Peripheral Reset and Enable Control
//!
//! Safe accessors for the per-peripheral bus clock gates and reset lines,
//! collapsed into a data table keyed by [`PeripheralId`] and consumed by
//! generic routines over the register access collaborator.
//!
//! Enabling is a read-modify-write logical OR of a single bit, so repeated
//! or overlapping enable requests merge idempotently; a reset is an
//! explicit set-then-clear pulse and is never merged. AHB peripherals have
//! no reset line on this family.
//!
//! A peripheral's bus clock must be enabled before any of its control
//! registers are touched, and disabled only once no further access is
//! needed; that ordering is the caller's contract, these routines only
//! flip the gate.

use super::executor::ClockRegisters;
use super::field::FieldId;

/// The peripheral bus a gate lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bus {
    /// AHB (no reset lines)
    Ahb,
    /// APB1, the low-speed peripheral bus
    Apb1,
    /// APB2, the high-speed peripheral bus
    Apb2,
}

impl Bus {
    const fn enable_field(self) -> FieldId {
        match self {
            Bus::Ahb => FieldId::AhbEnable,
            Bus::Apb1 => FieldId::Apb1Enable,
            Bus::Apb2 => FieldId::Apb2Enable,
        }
    }

    const fn reset_field(self) -> Option<FieldId> {
        match self {
            Bus::Ahb => None,
            Bus::Apb1 => Some(FieldId::Apb1Reset),
            Bus::Apb2 => Some(FieldId::Apb2Reset),
        }
    }
}

/// Gated peripherals, keyed to their bus and bit position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum PeripheralId {
    Dma1,
    Crc,
    Afio,
    Gpioa,
    Gpiob,
    Gpioc,
    Gpiod,
    Adc1,
    Tim1,
    Spi1,
    Usart1,
    Tim2,
    Tim3,
    Wwdg,
    Spi2,
    Usart2,
    I2c1,
    Usb,
    Bkp,
    Pwr,
}

impl PeripheralId {
    /// The bus carrying this peripheral's gate.
    pub const fn bus(self) -> Bus {
        use PeripheralId::*;
        match self {
            Dma1 | Crc => Bus::Ahb,
            Afio | Gpioa | Gpiob | Gpioc | Gpiod | Adc1 | Tim1 | Spi1
            | Usart1 => Bus::Apb2,
            Tim2 | Tim3 | Wwdg | Spi2 | Usart2 | I2c1 | Usb | Bkp | Pwr => {
                Bus::Apb1
            }
        }
    }

    /// Bit position in the bus's enable (and reset) register.
    const fn bit(self) -> u32 {
        use PeripheralId::*;
        match self {
            Dma1 => 0,
            Crc => 6,
            Afio => 0,
            Gpioa => 2,
            Gpiob => 3,
            Gpioc => 4,
            Gpiod => 5,
            Adc1 => 9,
            Tim1 => 11,
            Spi1 => 12,
            Usart1 => 14,
            Tim2 => 0,
            Tim3 => 1,
            Wwdg => 11,
            Spi2 => 14,
            Usart2 => 17,
            I2c1 => 21,
            Usb => 23,
            Bkp => 27,
            Pwr => 28,
        }
    }

    /// Whether the hardware routes a reset line to this peripheral.
    pub const fn has_reset_line(self) -> bool {
        self.bus().reset_field().is_some()
    }
}

/// Open the peripheral's bus clock gate. Idempotent: already-set gates on
/// the same register are left untouched.
pub fn enable(regs: &mut impl ClockRegisters, peripheral: PeripheralId) {
    let bit = 1 << peripheral.bit();
    regs.read_modify_write(peripheral.bus().enable_field(), bit, bit);
}

/// Close the peripheral's bus clock gate.
pub fn disable(regs: &mut impl ClockRegisters, peripheral: PeripheralId) {
    let bit = 1 << peripheral.bit();
    regs.read_modify_write(peripheral.bus().enable_field(), bit, 0);
}

/// Pulse the peripheral's reset line. No-op (debug-asserted) for
/// peripherals without one; check [`PeripheralId::has_reset_line`].
pub fn reset(regs: &mut impl ClockRegisters, peripheral: PeripheralId) {
    debug_assert!(
        peripheral.has_reset_line(),
        "{:?} has no reset line",
        peripheral
    );
    if let Some(field) = peripheral.bus().reset_field() {
        let bit = 1 << peripheral.bit();
        regs.read_modify_write(field, bit, bit);
        regs.read_modify_write(field, bit, 0);
    }
}
