//! Hardware control: WM configuration, power/reset, interrupts, calibration.

pub mod calib;
pub mod irq;
pub mod power;
pub mod wm;
