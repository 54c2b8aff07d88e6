pub mod dma;
pub mod gpio;
pub mod ipc;
pub mod nvic;
pub mod scb;
pub mod systick;
pub mod wdt;
