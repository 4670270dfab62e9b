#![cfg_attr(not(test), no_std)]

//! Reliable segmented data transfer over half-duplex LoRa-family radios
//!
//! Layers, leaves first: [`radio`] and [`time`] are the hardware seams,
//! [`protocol`] frames packets, [`reliable`] sends one packet and waits for
//! its ACK, and [`transfer`] moves whole payloads as acknowledged segments.
//! [`ymodem`] hands received files on to a PC over a serial port.

pub mod config;
pub mod protocol;
pub mod radio;
pub mod reliable;
pub mod serial;
pub mod time;
pub mod transfer;
pub mod ymodem;
