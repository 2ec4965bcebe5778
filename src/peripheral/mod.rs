//! Board-level peripherals that sit outside the SoC die: the NAND array
//! and the I²C/GPIO satellites around it.

pub mod adxl345;
pub mod mcp230xx;
pub mod mt29f4g08;
pub mod potentiometer;

pub use adxl345::Adxl345;
pub use mcp230xx::{Mcp230xx, Mcp230xxModel};
pub use mt29f4g08::{Mt29f4g08, NandGeometry};
pub use potentiometer::{PotHandle, Potentiometer};
